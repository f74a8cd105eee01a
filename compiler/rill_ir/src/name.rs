//! Interned identifiers.
//!
//! Every identifier in the IR (function, class, method, local and field
//! names) is a [`Name`]: a 32-bit index into a [`StringInterner`]. Comparing
//! two names is an integer comparison; resolving one back to text is a
//! single indexed read.

use std::fmt;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Interned string identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Name(u32);

impl Name {
    /// Pre-interned empty string.
    pub const EMPTY: Name = Name(0);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Name(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.0)
    }
}

struct InternerInner {
    map: FxHashMap<&'static str, u32>,
    strings: Vec<&'static str>,
}

/// String interner shared by the IR loader and both code generators.
///
/// Interned strings are leaked so lookups can hand out `&'static str`
/// without holding the lock. A compilation interns a bounded set of
/// identifiers, so the leak is bounded by the program size.
pub struct StringInterner {
    inner: RwLock<InternerInner>,
}

impl StringInterner {
    pub fn new() -> Self {
        let mut map = FxHashMap::default();
        map.insert("", 0);
        StringInterner {
            inner: RwLock::new(InternerInner {
                map,
                strings: vec![""],
            }),
        }
    }

    /// Rebuild an interner whose ids match a saved symbol table.
    ///
    /// Returns `None` when the table would not reproduce the same ids
    /// (first entry not empty, or a duplicate entry).
    pub fn from_symbols(symbols: &[String]) -> Option<Self> {
        let interner = StringInterner::new();
        for (index, symbol) in symbols.iter().enumerate() {
            if index == 0 {
                if !symbol.is_empty() {
                    return None;
                }
                continue;
            }
            let name = interner.intern(symbol);
            if name.index() != index {
                return None;
            }
        }
        Some(interner)
    }

    /// Intern a string, returning its existing name if already present.
    pub fn intern(&self, s: &str) -> Name {
        if let Some(&id) = self.inner.read().map.get(s) {
            return Name(id);
        }
        let mut inner = self.inner.write();
        if let Some(&id) = inner.map.get(s) {
            return Name(id);
        }
        let id = u32::try_from(inner.strings.len()).unwrap_or(u32::MAX);
        let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
        inner.map.insert(leaked, id);
        inner.strings.push(leaked);
        Name(id)
    }

    /// Look up an already interned string without inserting it.
    pub fn get(&self, s: &str) -> Option<Name> {
        self.inner.read().map.get(s).copied().map(Name)
    }

    /// Resolve a name to its text. Unknown names resolve to `""`.
    pub fn lookup(&self, name: Name) -> &'static str {
        self.inner
            .read()
            .strings
            .get(name.index())
            .copied()
            .unwrap_or("")
    }

    pub fn contains(&self, name: Name) -> bool {
        name.index() < self.inner.read().strings.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// All interned strings in id order.
    pub fn snapshot(&self) -> Vec<String> {
        self.inner
            .read()
            .strings
            .iter()
            .map(|s| (*s).to_owned())
            .collect()
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StringInterner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringInterner")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_preinterned() {
        let interner = StringInterner::new();
        assert_eq!(interner.intern(""), Name::EMPTY);
        assert_eq!(interner.lookup(Name::EMPTY), "");
    }

    #[test]
    fn interning_is_idempotent() {
        let interner = StringInterner::new();
        let a = interner.intern("counter");
        let b = interner.intern("counter");
        let c = interner.intern("total");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.lookup(c), "total");
    }

    #[test]
    fn symbols_round_trip() {
        let interner = StringInterner::new();
        let x = interner.intern("x");
        let y = interner.intern("y");
        let rebuilt = StringInterner::from_symbols(&interner.snapshot());
        let Some(rebuilt) = rebuilt else {
            panic!("snapshot should rebuild");
        };
        assert_eq!(rebuilt.get("x"), Some(x));
        assert_eq!(rebuilt.get("y"), Some(y));
    }

    #[test]
    fn duplicate_symbols_are_rejected() {
        let symbols = vec![String::new(), "a".to_owned(), "a".to_owned()];
        assert!(StringInterner::from_symbols(&symbols).is_none());
    }
}
