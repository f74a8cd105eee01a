//! Virtual tables for classes that need run-time polymorphism.
//!
//! A class gets a table when it, or one of its ancestors, is polymorphic:
//! declared so by the IR, or defining a method that a subclass overrides.
//!
//! ```text
//!   word 0      address of the table itself
//!   word 1…     one slot per method, parent slots first (same indices),
//!               new methods appended in declaration order
//! ```
//!
//! Every slot holds the owner's uniform entry (`self` and all arguments
//! boxed, boxed result), so a call through any slot has one signature per
//! parameter count. An override whose parameter shape differs from the
//! method it overrides is reported and its slot is poisoned in the whole
//! family; calls to a poisoned method fall back to named dispatch.

use rill_diagnostic::{Diagnostic, ErrorCode, Location};
use rill_ir::{Name, StringInterner};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::classes::ClassRegistry;
use crate::context::Findings;
use crate::descriptor::{DescriptorCache, MethodDescriptor};

/// Parameter shape that must agree between a method and its overrides.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Shape {
    lead: usize,
    trail: usize,
    rest: bool,
    keyword_rest: bool,
    block: bool,
}

impl Shape {
    fn of(d: &MethodDescriptor) -> Self {
        Shape {
            lead: d.lead,
            trail: d.trail,
            rest: d.rest.is_some(),
            keyword_rest: d.keyword_rest.is_some(),
            block: d.block.is_some(),
        }
    }
}

/// One method slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VtableSlot {
    pub method: Name,
    /// Class whose definition this table's slot points at.
    pub owner: Name,
    /// Parameter count of the uniform entry, `self` excluded.
    pub params: usize,
    pub poisoned: bool,
}

#[derive(Clone, Debug)]
pub struct Vtable {
    pub class: Name,
    /// Method slots; slot `i` lives at table word `i + 1`.
    pub slots: Vec<VtableSlot>,
}

impl Vtable {
    /// Table word of `method`.
    pub fn word_of(&self, method: Name) -> Option<u32> {
        self.slots
            .iter()
            .position(|s| s.method == method)
            .and_then(|i| u32::try_from(i + 1).ok())
    }

    pub fn slot(&self, method: Name) -> Option<&VtableSlot> {
        self.slots.iter().find(|s| s.method == method)
    }

    /// Table size in words.
    pub fn words(&self) -> u32 {
        u32::try_from(self.slots.len() + 1).unwrap_or(u32::MAX)
    }
}

/// Name of the global holding the table of `class`.
pub fn global_name(class: &str) -> String {
    format!("vtable.{class}")
}

/// Tables of every polymorphic family, parent-first.
#[derive(Debug, Default)]
pub struct VtableRegistry {
    tables: Vec<Vtable>,
    index: FxHashMap<Name, usize>,
}

impl VtableRegistry {
    pub fn build(
        classes: &ClassRegistry,
        descriptors: &DescriptorCache,
        interner: &StringInterner,
        findings: &mut Findings,
    ) -> Self {
        let polymorphic: FxHashSet<Name> = classes
            .iter()
            .filter(|c| {
                c.declared_polymorphic
                    || c.methods
                        .iter()
                        .any(|m| classes.is_overridden_below(c.name, *m))
            })
            .map(|c| c.name)
            .collect();

        let mut registry = VtableRegistry::default();
        let mut mismatches: Vec<(Name, Name)> = Vec::new();

        for class in classes.iter() {
            if !classes.ancestors(class.name).any(|a| polymorphic.contains(&a.name)) {
                continue;
            }
            let parent_table = class.superclass.and_then(|p| registry.get(p)).cloned();
            let mut slots = match parent_table {
                Some(parent) => parent.slots,
                None => {
                    // Family root: methods visible on the class, outermost ancestor first.
                    let chain: Vec<_> = classes.ancestors(class.name).collect();
                    let mut slots: Vec<VtableSlot> = Vec::new();
                    for ancestor in chain.iter().rev() {
                        for &method in &ancestor.methods {
                            if slots.iter().any(|s| s.method == method) {
                                continue;
                            }
                            let owner = classes.find_method(class.name, method).unwrap_or(ancestor.name);
                            let params = descriptors
                                .get(Some(owner), method)
                                .map_or(0, |d| d.params.len());
                            slots.push(VtableSlot {
                                method,
                                owner,
                                params,
                                poisoned: false,
                            });
                        }
                    }
                    slots
                }
            };

            for &method in &class.methods {
                let Some(own) = descriptors.get(Some(class.name), method) else {
                    continue;
                };
                if let Some(slot) = slots.iter_mut().find(|s| s.method == method) {
                    if slot.owner == class.name {
                        continue;
                    }
                    let overridden = descriptors.get(Some(slot.owner), method);
                    if overridden.is_some_and(|o| Shape::of(o) != Shape::of(own)) {
                        let _ = findings.push(
                            Diagnostic::warning(ErrorCode::E6001)
                                .with_message(format!(
                                    "`{}` overrides `{}#{}` with a different parameter list",
                                    own.symbol,
                                    interner.lookup(slot.owner),
                                    interner.lookup(method),
                                ))
                                .with_location(Location::new(own.symbol.clone(), None))
                                .with_note("calls to this method use dynamic dispatch"),
                        );
                        mismatches.push((class.name, method));
                    }
                    slot.owner = class.name;
                    slot.params = own.params.len();
                } else {
                    slots.push(VtableSlot {
                        method,
                        owner: class.name,
                        params: own.params.len(),
                        poisoned: false,
                    });
                }
            }

            trace!(
                class = interner.lookup(class.name),
                slots = slots.len(),
                "vtable"
            );
            registry.index.insert(class.name, registry.tables.len());
            registry.tables.push(Vtable {
                class: class.name,
                slots,
            });
        }

        for (class, method) in mismatches {
            let family: Vec<Name> = classes
                .ancestors(class)
                .map(|c| c.name)
                .chain(classes.descendants(class))
                .collect();
            for member in family {
                if let Some(&i) = registry.index.get(&member) {
                    if let Some(slot) = registry.tables[i]
                        .slots
                        .iter_mut()
                        .find(|s| s.method == method)
                    {
                        slot.poisoned = true;
                    }
                }
            }
        }

        debug!(tables = registry.tables.len(), "vtables synthesized");
        registry
    }

    pub fn get(&self, class: Name) -> Option<&Vtable> {
        self.index.get(&class).map(|&i| &self.tables[i])
    }

    pub fn has_vtable(&self, class: Name) -> bool {
        self.index.contains_key(&class)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vtable> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rill_ir::{Body, ClassType, Function, Param, Program, Ty};

    fn method(owner: Name, name: Name, params: Vec<Param>) -> Function {
        Function::method(owner, name, params, Ty::Dynamic, Body::default())
    }

    fn registry_for(program: &Program, interner: &StringInterner) -> (VtableRegistry, Findings) {
        let mut findings = Findings::new();
        let Ok(classes) = ClassRegistry::build(program, interner, &mut findings) else {
            panic!("registry should build");
        };
        let descriptors = DescriptorCache::build(program, interner, &classes);
        let vtables = VtableRegistry::build(&classes, &descriptors, interner, &mut findings);
        (vtables, findings)
    }

    #[test]
    fn subclass_tables_extend_the_parent_prefix() {
        let interner = StringInterner::new();
        let n = |s: &str| interner.intern(s);
        let (a, b, c, speak, name, fetch) = (n("A"), n("B"), n("C"), n("speak"), n("name"), n("fetch"));
        let program = Program::new(
            vec![
                method(a, speak, Vec::new()),
                method(a, name, Vec::new()),
                method(b, speak, Vec::new()),
                method(b, fetch, Vec::new()),
                method(c, speak, Vec::new()),
            ],
            vec![
                ClassType::new(a, None).with_method(speak).with_method(name),
                ClassType::new(b, Some(a)).with_method(speak).with_method(fetch),
                ClassType::new(c, Some(a)).with_method(speak),
            ],
        );
        let (vtables, findings) = registry_for(&program, &interner);
        assert!(findings.diagnostics.is_empty());
        assert_eq!(vtables.len(), 3);

        let Some(table_b) = vtables.get(b) else {
            panic!("B needs a vtable");
        };
        let owners: Vec<(&str, &str)> = table_b
            .slots
            .iter()
            .map(|s| (interner.lookup(s.method), interner.lookup(s.owner)))
            .collect();
        assert_eq!(owners, vec![("speak", "B"), ("name", "A"), ("fetch", "B")]);
        assert_eq!(table_b.word_of(speak), Some(1));
        assert_eq!(vtables.get(a).and_then(|t| t.word_of(name)), Some(2));
        assert_eq!(vtables.get(c).map(Vtable::words), Some(3));
    }

    #[test]
    fn monomorphic_classes_have_no_table() {
        let interner = StringInterner::new();
        let n = |s: &str| interner.intern(s);
        let (a, b, m) = (n("A"), n("B"), n("m"));
        let program = Program::new(
            vec![method(a, m, Vec::new())],
            vec![
                ClassType::new(a, None).with_method(m),
                ClassType::new(b, Some(a)),
            ],
        );
        let (vtables, _) = registry_for(&program, &interner);
        assert!(vtables.is_empty());
    }

    #[test]
    fn arity_mismatch_poisons_the_family_slot() {
        let interner = StringInterner::new();
        let n = |s: &str| interner.intern(s);
        let (a, b, m, x) = (n("A"), n("B"), n("m"), n("x"));
        let program = Program::new(
            vec![
                method(a, m, Vec::new()),
                method(b, m, vec![Param::new(x, Ty::Int)]),
            ],
            vec![
                ClassType::new(a, None).with_method(m),
                ClassType::new(b, Some(a)).with_method(m),
            ],
        );
        let (vtables, findings) = registry_for(&program, &interner);
        let codes: Vec<ErrorCode> = findings.diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![ErrorCode::E6001]);
        assert_eq!(vtables.get(a).and_then(|t| t.slot(m)).map(|s| s.poisoned), Some(true));
        assert_eq!(vtables.get(b).and_then(|t| t.slot(m)).map(|s| s.poisoned), Some(true));
    }
}
