//! Stable probe ids for instrumented builds.

use rill_ir::Program;
use rustc_hash::FxHashMap;

use crate::descriptor::DescriptorCache;

/// One id per function symbol, assigned in program order starting at 1.
#[derive(Debug, Default)]
pub struct ProbeRegistry {
    ids: FxHashMap<String, i64>,
    order: Vec<String>,
}

impl ProbeRegistry {
    pub fn build(program: &Program, descriptors: &DescriptorCache) -> Self {
        let mut registry = ProbeRegistry::default();
        for function in &program.functions {
            if let Some(d) = descriptors.of(function) {
                registry.register(&d.symbol);
            }
        }
        registry
    }

    /// Id of `symbol`, registering it on first sight.
    pub fn register(&mut self, symbol: &str) -> i64 {
        if let Some(&id) = self.ids.get(symbol) {
            return id;
        }
        let id = i64::try_from(self.order.len() + 1).unwrap_or(i64::MAX);
        self.ids.insert(symbol.to_owned(), id);
        self.order.push(symbol.to_owned());
        id
    }

    pub fn id(&self, symbol: &str) -> Option<i64> {
        self.ids.get(symbol).copied()
    }

    /// `(id, symbol)` pairs in id order.
    pub fn list(&self) -> Vec<(i64, String)> {
        self.order
            .iter()
            .enumerate()
            .map(|(i, s)| (i64::try_from(i + 1).unwrap_or(i64::MAX), s.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ids_are_stable_per_symbol() {
        let mut probes = ProbeRegistry::default();
        assert_eq!(probes.register("main"), 1);
        assert_eq!(probes.register("Point#norm"), 2);
        assert_eq!(probes.register("main"), 1);
        assert_eq!(
            probes.list(),
            vec![(1, "main".to_owned()), (2, "Point#norm".to_owned())]
        );
    }
}
