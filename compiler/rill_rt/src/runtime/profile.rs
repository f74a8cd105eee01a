//! Function entry/exit probes.
//!
//! Instrumented code calls `rl_profile_enter(id, name)` after binding its
//! parameters and `rl_profile_exit(id)` before each return. Timing uses a
//! per-thread stack of open frames; counts and totals are machine-wide.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tracing::trace;

use super::{arg, int_arg};
use crate::{Machine, Unwind, Word};

type RtResult = Result<Word, Unwind>;

struct Record {
    name: Arc<str>,
    calls: u64,
    total: Duration,
}

/// Accumulated probe data for one machine.
#[derive(Default)]
pub struct Profile {
    records: FxHashMap<i64, Record>,
}

/// One row of a profile report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfileEntry {
    pub id: i64,
    pub name: String,
    pub calls: u64,
    pub total: Duration,
}

impl Profile {
    fn enter(&mut self, id: i64, name: Arc<str>) {
        let record = self.records.entry(id).or_insert_with(|| Record {
            name,
            calls: 0,
            total: Duration::ZERO,
        });
        record.calls += 1;
    }

    fn exit(&mut self, id: i64, elapsed: Duration) {
        if let Some(record) = self.records.get_mut(&id) {
            record.total += elapsed;
        }
    }

    /// Entries sorted by probe id.
    pub fn report(&self) -> Vec<ProfileEntry> {
        let mut entries: Vec<ProfileEntry> = self
            .records
            .iter()
            .map(|(&id, record)| ProfileEntry {
                id,
                name: record.name.to_string(),
                calls: record.calls,
                total: record.total,
            })
            .collect();
        entries.sort_by_key(|entry| entry.id);
        entries
    }
}

thread_local! {
    static OPEN_FRAMES: RefCell<Vec<(i64, Instant)>> = const { RefCell::new(Vec::new()) };
}

pub(super) fn rl_profile_enter(m: &Machine, args: &[Word]) -> RtResult {
    let id = int_arg(args, 0);
    let name = m.text(arg(args, 1))?;
    trace!(id, name = &*name, "probe enter");
    m.profile().lock().enter(id, name);
    OPEN_FRAMES.with(|frames| frames.borrow_mut().push((id, Instant::now())));
    Ok(Word::Null)
}

/// Close the innermost open frame for `id`. Frames opened above it that
/// never exited (an exception unwound through them) are discarded.
pub(super) fn rl_profile_exit(m: &Machine, args: &[Word]) -> RtResult {
    let id = int_arg(args, 0);
    let started = OPEN_FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        let position = frames.iter().rposition(|&(open, _)| open == id)?;
        let (_, started) = frames[position];
        frames.truncate(position);
        Some(started)
    });
    if let Some(started) = started {
        m.profile().lock().exit(id, started.elapsed());
    }
    Ok(Word::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_is_sorted_and_counts_calls() {
        let mut profile = Profile::default();
        profile.enter(2, Arc::from("b"));
        profile.enter(1, Arc::from("a"));
        profile.enter(2, Arc::from("b"));
        profile.exit(2, Duration::from_millis(3));

        let report = profile.report();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].name, "a");
        assert_eq!(report[1].calls, 2);
        assert_eq!(report[1].total, Duration::from_millis(3));
    }
}
