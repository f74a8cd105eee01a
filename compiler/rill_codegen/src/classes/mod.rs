//! Class registry.
//!
//! Every IR class is registered once, before any function is lowered, in
//! parent-first order. The registry resolves the instance layout (parent
//! fields first, after the two header words), the methods each class
//! defines, and the builtin exception class a user exception family
//! descends from. Lookups walk the explicit parent chain.
//!
//! ```text
//!   object word 0  class metadata pointer
//!   object word 1  vtable pointer (null without a vtable)
//!   object word 2… fields, ancestors' first
//! ```

use rill_diagnostic::{Diagnostic, ErrorCode, Location};
use rill_ir::{ClassType, Name, Program, StringInterner, Ty};
use rill_native::abi::{self, is_builtin_exception};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::context::Findings;
use crate::repr::Repr;
use crate::CodegenError;

#[cfg(test)]
mod tests;

/// Implicit root of user classes; never registered.
pub const ROOT_CLASS: &str = "Object";

/// A field slot in an instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: Name,
    pub ty: Ty,
    pub repr: Repr,
    /// Word index in the instance, header included.
    pub index: u32,
    /// Class that declared the field.
    pub owner: Name,
}

/// A registered class.
#[derive(Clone, Debug)]
pub struct ClassInfo {
    pub name: Name,
    /// User superclass, if any.
    pub superclass: Option<Name>,
    /// Builtin exception class named as the superclass.
    pub builtin_super: Option<&'static str>,
    /// All instance fields, inherited ones first.
    pub fields: Vec<FieldInfo>,
    /// Methods defined directly by this class, in declaration order.
    pub methods: Vec<Name>,
    /// The IR says instances need run-time polymorphism.
    pub declared_polymorphic: bool,
}

impl ClassInfo {
    /// Instance size in words, header included.
    pub fn instance_words(&self) -> u32 {
        abi::OBJECT_HEADER_WORDS + u32::try_from(self.fields.len()).unwrap_or(u32::MAX)
    }

    pub fn defines(&self, method: Name) -> bool {
        self.methods.contains(&method)
    }
}

/// Append-only registry of user classes.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    /// Parent-first.
    classes: Vec<ClassInfo>,
    index: FxHashMap<Name, usize>,
    children: FxHashMap<Name, Vec<Name>>,
}

impl ClassRegistry {
    /// Register every class of `program`.
    pub fn build(
        program: &Program,
        interner: &StringInterner,
        findings: &mut Findings,
    ) -> Result<Self, CodegenError> {
        let mut decls: FxHashMap<Name, &ClassType> = FxHashMap::default();
        let mut declared_order = Vec::with_capacity(program.classes.len());
        for class in &program.classes {
            if decls.insert(class.name, class).is_some() {
                return Err(CodegenError::DuplicateClass {
                    class: interner.lookup(class.name).to_owned(),
                });
            }
            declared_order.push(class.name);
        }

        let order = parent_first(&declared_order, &decls, interner)?;
        let mut registry = ClassRegistry::default();
        let known: FxHashSet<Name> = decls.keys().copied().collect();

        for name in order {
            let Some(decl) = decls.get(&name) else {
                continue;
            };
            let info = registry.layout(decl, &known, program, interner, findings)?;
            trace!(
                class = interner.lookup(name),
                fields = info.fields.len(),
                methods = info.methods.len(),
                "registered class"
            );
            if let Some(parent) = info.superclass {
                registry.children.entry(parent).or_default().push(name);
            }
            registry.index.insert(name, registry.classes.len());
            registry.classes.push(info);
        }

        for function in &program.functions {
            if let Some(owner) = function.owner {
                if !registry.contains(owner) {
                    return Err(CodegenError::MethodForUnknownClass {
                        class: interner.lookup(owner).to_owned(),
                        method: interner.lookup(function.name).to_owned(),
                    });
                }
            }
        }
        debug!(classes = registry.classes.len(), "class registry built");
        Ok(registry)
    }

    fn layout(
        &self,
        decl: &ClassType,
        known: &FxHashSet<Name>,
        program: &Program,
        interner: &StringInterner,
        findings: &mut Findings,
    ) -> Result<ClassInfo, CodegenError> {
        let (superclass, builtin_super) = match decl.superclass {
            None => (None, None),
            Some(parent) if known.contains(&parent) => (Some(parent), None),
            Some(parent) => {
                let text = interner.lookup(parent);
                if text == ROOT_CLASS {
                    (None, None)
                } else if is_builtin_exception(text) {
                    (None, Some(text))
                } else {
                    return Err(CodegenError::UnknownSuperclass {
                        class: interner.lookup(decl.name).to_owned(),
                        superclass: text.to_owned(),
                    });
                }
            }
        };

        let mut fields = superclass
            .and_then(|parent| self.get(parent))
            .map(|parent| parent.fields.clone())
            .unwrap_or_default();
        for field in &decl.fields {
            if let Some(existing) = fields.iter().find(|f| f.name == field.name) {
                let _ = findings.push(
                    Diagnostic::warning(ErrorCode::E6002)
                        .with_message(format!(
                            "field `{}` of `{}` is already declared by `{}`",
                            interner.lookup(field.name),
                            interner.lookup(decl.name),
                            interner.lookup(existing.owner),
                        ))
                        .with_location(Location::new(interner.lookup(decl.name), None))
                        .with_note("the existing slot is reused"),
                );
                continue;
            }
            let index = abi::OBJECT_HEADER_WORDS + u32::try_from(fields.len()).unwrap_or(u32::MAX);
            fields.push(FieldInfo {
                name: field.name,
                ty: field.ty.clone(),
                repr: Repr::of(&field.ty, |n| known.contains(&n)),
                index,
                owner: decl.name,
            });
        }

        let mut methods: Vec<Name> = Vec::new();
        let defined: Vec<Name> = program
            .functions
            .iter()
            .filter(|f| f.owner == Some(decl.name))
            .map(|f| f.name)
            .collect();
        for name in decl.methods.iter().chain(defined.iter()) {
            if defined.contains(name) && !methods.contains(name) {
                methods.push(*name);
            }
        }

        Ok(ClassInfo {
            name: decl.name,
            superclass,
            builtin_super,
            fields,
            methods,
            declared_polymorphic: decl.needs_vtable,
        })
    }

    // -- Queries --

    pub fn contains(&self, name: Name) -> bool {
        self.index.contains_key(&name)
    }

    pub fn get(&self, name: Name) -> Option<&ClassInfo> {
        self.index.get(&name).map(|&i| &self.classes[i])
    }

    /// Classes in parent-first order.
    pub fn iter(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.iter()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn repr_of(&self, ty: &Ty) -> Repr {
        Repr::of(ty, |n| self.contains(n))
    }

    /// `name` and its user superclasses, nearest first.
    pub fn ancestors(&self, name: Name) -> Ancestors<'_> {
        Ancestors {
            registry: self,
            next: self.get(name).map(|c| c.name),
        }
    }

    /// True when `ancestor` is `class` or one of its superclasses.
    pub fn is_subclass(&self, class: Name, ancestor: Name) -> bool {
        self.ancestors(class).any(|c| c.name == ancestor)
    }

    /// Class that defines `method` for instances of `class`.
    pub fn find_method(&self, class: Name, method: Name) -> Option<Name> {
        self.ancestors(class)
            .find(|c| c.defines(method))
            .map(|c| c.name)
    }

    pub fn field(&self, class: Name, field: Name) -> Option<&FieldInfo> {
        self.get(class)?.fields.iter().find(|f| f.name == field)
    }

    /// Direct subclasses.
    pub fn children(&self, name: Name) -> &[Name] {
        self.children.get(&name).map_or(&[], Vec::as_slice)
    }

    /// All strict descendants, parent-first.
    pub fn descendants(&self, name: Name) -> Vec<Name> {
        let mut out = Vec::new();
        let mut stack: Vec<Name> = self.children(name).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// True when a strict descendant of `class` redefines `method`.
    pub fn is_overridden_below(&self, class: Name, method: Name) -> bool {
        self.descendants(class)
            .into_iter()
            .filter_map(|d| self.get(d))
            .any(|d| d.defines(method))
    }

    /// Builtin exception class the family of `class` descends from.
    pub fn exception_base(&self, class: Name) -> Option<&'static str> {
        self.ancestors(class).find_map(|c| c.builtin_super)
    }

    pub fn is_exception(&self, class: Name) -> bool {
        self.exception_base(class).is_some()
    }
}

/// Iterator over a class and its superclasses.
pub struct Ancestors<'a> {
    registry: &'a ClassRegistry,
    next: Option<Name>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a ClassInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let info = self.registry.get(self.next?)?;
        self.next = info.superclass;
        Some(info)
    }
}

/// Order class names so that every superclass precedes its subclasses.
fn parent_first(
    declared: &[Name],
    decls: &FxHashMap<Name, &ClassType>,
    interner: &StringInterner,
) -> Result<Vec<Name>, CodegenError> {
    #[derive(Copy, Clone, PartialEq, Eq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: FxHashMap<Name, Mark> = FxHashMap::default();
    let mut order = Vec::with_capacity(declared.len());
    for &start in declared {
        // Collect the chain up to the first finished or external class.
        let mut chain = Vec::new();
        let mut current = Some(start);
        while let Some(name) = current {
            match marks.get(&name) {
                Some(Mark::Done) => break,
                Some(Mark::Visiting) => {
                    return Err(CodegenError::InheritanceCycle {
                        class: interner.lookup(name).to_owned(),
                    });
                }
                None => {}
            }
            let Some(decl) = decls.get(&name) else {
                break;
            };
            marks.insert(name, Mark::Visiting);
            chain.push(name);
            current = decl.superclass;
        }
        for name in chain.into_iter().rev() {
            marks.insert(name, Mark::Done);
            order.push(name);
        }
    }
    Ok(order)
}
