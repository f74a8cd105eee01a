//! Block ordering.
//!
//! Nested-construct lowering creates merge blocks before it knows whether
//! anything will branch to them. Blocks that no terminator targets are
//! moved to the end of the layout so fall-through order stays correct for
//! targets that emit blocks linearly.

use rustc_hash::FxHashSet;
use std::hash::Hash;

use crate::FunctionBody;

/// Reorder `ids` so blocks without predecessors (other than `entry`) come
/// last, keeping relative order within both groups.
pub fn reorder_orphans<T, F, I>(ids: &[T], entry: T, mut successors: F) -> Vec<T>
where
    T: Copy + Eq + Hash,
    F: FnMut(T) -> I,
    I: IntoIterator<Item = T>,
{
    let mut targeted: FxHashSet<T> = FxHashSet::default();
    for &id in ids {
        targeted.extend(successors(id));
    }
    let (mut live, orphans): (Vec<T>, Vec<T>) = ids
        .iter()
        .copied()
        .partition(|id| *id == entry || targeted.contains(id));
    let moved = orphans.len();
    live.extend(orphans);
    if moved > 0 {
        tracing::trace!(moved, "reordered orphan blocks");
    }
    live
}

/// Apply [`reorder_orphans`] to a native function body.
pub fn layout_blocks(body: &mut FunctionBody) {
    let ids: Vec<_> = body.blocks.iter().map(|b| b.id).collect();
    let blocks = &body.blocks;
    body.layout = reorder_orphans(&ids, crate::BlockId::ENTRY, |id| {
        blocks[id.index()]
            .terminator
            .as_ref()
            .map(|t| t.successors().into_iter().collect::<Vec<_>>())
            .unwrap_or_default()
    });
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn orphans_move_to_end() {
        // 0 -> 2, 1 is orphaned, 2 -> 3
        let succ = |id: u32| -> Vec<u32> {
            match id {
                0 => vec![2],
                2 => vec![3],
                _ => vec![],
            }
        };
        assert_eq!(reorder_orphans(&[0, 1, 2, 3], 0, succ), vec![0, 2, 3, 1]);
    }

    #[test]
    fn entry_is_never_moved() {
        let succ = |_: u32| -> Vec<u32> { vec![] };
        assert_eq!(reorder_orphans(&[0, 1], 0, succ), vec![0, 1]);
    }
}
