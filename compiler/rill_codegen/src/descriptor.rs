//! Method descriptors, computed once per `(owner, method)` pair.
//!
//! Call sites and the method's own definition both read the cached
//! descriptor, so the parameter representations a caller passes always
//! match what the definition expects. Nothing recomputes a descriptor from
//! a call site.

use rill_ir::{Function, Name, ParamKind, Program, StringInterner};
use rill_native::{NativeType, Signature};
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::classes::ClassRegistry;
use crate::repr::Repr;
use rill_native::abi::{ElemKind, KeyKind};

/// One parameter as seen by callers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamSlot {
    pub name: Name,
    pub kind: ParamKind,
    pub repr: Repr,
}

/// Calling convention of one function or method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub owner: Option<Name>,
    pub name: Name,
    /// Native symbol: `name` for top-level routines, `Class#name` for methods.
    pub symbol: String,
    pub params: Vec<ParamSlot>,
    pub ret: Repr,
    /// Required parameters before the rest parameter (all of them without one).
    pub lead: usize,
    /// Required parameters after the rest parameter.
    pub trail: usize,
    pub rest: Option<usize>,
    pub keyword_rest: Option<usize>,
    pub block: Option<usize>,
}

impl MethodDescriptor {
    fn new(function: &Function, interner: &StringInterner, classes: &ClassRegistry) -> Self {
        let mut params = Vec::with_capacity(function.params.len());
        let (mut lead, mut trail) = (0, 0);
        let (mut rest, mut keyword_rest, mut block) = (None, None, None);
        for (i, param) in function.params.iter().enumerate() {
            let repr = match param.kind {
                ParamKind::Required => {
                    if rest.is_some() {
                        trail += 1;
                    } else {
                        lead += 1;
                    }
                    classes.repr_of(&param.ty)
                }
                ParamKind::Rest => {
                    rest = Some(i);
                    Repr::Array(ElemKind::Boxed)
                }
                ParamKind::KeywordRest => {
                    keyword_rest = Some(i);
                    Repr::Hash(KeyKind::Text)
                }
                ParamKind::Block => {
                    block = Some(i);
                    Repr::Boxed
                }
            };
            params.push(ParamSlot {
                name: param.name,
                kind: param.kind,
                repr,
            });
        }
        let symbol = match function.owner {
            Some(owner) => format!(
                "{}#{}",
                interner.lookup(owner),
                interner.lookup(function.name)
            ),
            None => interner.lookup(function.name).to_owned(),
        };
        MethodDescriptor {
            owner: function.owner,
            name: function.name,
            symbol,
            params,
            ret: classes.repr_of(&function.return_ty),
            lead,
            trail,
            rest,
            keyword_rest,
            block,
        }
    }

    /// Number of required positional parameters.
    #[inline]
    pub fn required(&self) -> usize {
        self.lead + self.trail
    }

    #[inline]
    pub fn is_method(&self) -> bool {
        self.owner.is_some()
    }

    /// Whether `argc` positional arguments can be bound.
    pub fn accepts(&self, argc: usize) -> bool {
        if self.rest.is_some() {
            argc >= self.required()
        } else {
            argc == self.required()
        }
    }

    /// Arity as recorded in method metadata: the required count, or
    /// `-(required + 1)` when a rest parameter takes any excess.
    pub fn arity(&self) -> i64 {
        let required = i64::try_from(self.required()).unwrap_or(i64::MAX);
        if self.rest.is_some() {
            -(required + 1)
        } else {
            required
        }
    }

    /// Native signature: `self` first for methods, then every parameter.
    pub fn native_signature(&self) -> Signature {
        let mut params = Vec::with_capacity(self.params.len() + 1);
        if self.is_method() {
            params.push(NativeType::Ptr);
        }
        params.extend(self.params.iter().map(|p| p.repr.native_type()));
        Signature::new(params, self.ret.native_type())
    }

    /// Signature of the uniform entry used by vtable slots: `self` and every
    /// parameter boxed, boxed result.
    pub fn boxed_signature(&self) -> Signature {
        Signature::new(vec![NativeType::Ptr; self.params.len() + 1], NativeType::Ptr)
    }

    /// Managed method descriptor (receiver excluded).
    pub fn managed_descriptor(&self, interner: &StringInterner) -> String {
        let mut out = String::from("(");
        for param in &self.params {
            out.push_str(&managed_type(param.repr, interner));
        }
        out.push(')');
        out.push_str(&managed_type(self.ret, interner));
        out
    }
}

/// Managed field/parameter type of a representation.
pub fn managed_type(repr: Repr, interner: &StringInterner) -> String {
    match repr {
        Repr::Int => "J".to_owned(),
        Repr::Float => "D".to_owned(),
        Repr::Bool => "Z".to_owned(),
        Repr::Boxed => "Ljava/lang/Object;".to_owned(),
        Repr::Struct(class) => format!("L{};", interner.lookup(class)),
        Repr::Array(_) => "Lrill/rt/RArray;".to_owned(),
        Repr::Hash(_) => "Lrill/rt/RHash;".to_owned(),
    }
}

/// Descriptors for every function of a program.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    descriptors: FxHashMap<(Option<Name>, Name), MethodDescriptor>,
}

impl DescriptorCache {
    pub fn build(program: &Program, interner: &StringInterner, classes: &ClassRegistry) -> Self {
        let mut descriptors = FxHashMap::default();
        for function in &program.functions {
            let descriptor = MethodDescriptor::new(function, interner, classes);
            trace!(symbol = %descriptor.symbol, params = descriptor.params.len(), "descriptor");
            descriptors.insert((function.owner, function.name), descriptor);
        }
        DescriptorCache { descriptors }
    }

    pub fn get(&self, owner: Option<Name>, name: Name) -> Option<&MethodDescriptor> {
        self.descriptors.get(&(owner, name))
    }

    pub fn of(&self, function: &Function) -> Option<&MethodDescriptor> {
        self.get(function.owner, function.name)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Findings;
    use pretty_assertions::assert_eq;
    use rill_ir::{Body, Param, Ty};

    #[test]
    fn rest_parameter_splits_lead_and_trail() {
        let interner = StringInterner::new();
        let n = |s: &str| interner.intern(s);
        let f = Function::new(
            n("collect"),
            vec![
                Param::new(n("a"), Ty::Int),
                Param::rest(n("middle")),
                Param::new(n("z"), Ty::Float),
                Param::keyword_rest(n("opts")),
                Param::block(n("blk")),
            ],
            Ty::Nil,
            Body::default(),
        );
        let program = Program::new(vec![f], Vec::new());
        let Ok(classes) = ClassRegistry::build(&program, &interner, &mut Findings::new()) else {
            panic!("registry should build");
        };
        let cache = DescriptorCache::build(&program, &interner, &classes);
        let Some(d) = cache.get(None, n("collect")) else {
            panic!("descriptor should be cached");
        };
        assert_eq!((d.lead, d.trail), (1, 1));
        assert_eq!((d.rest, d.keyword_rest, d.block), (Some(1), Some(3), Some(4)));
        assert_eq!(d.arity(), -3);
        assert!(d.accepts(2) && d.accepts(5) && !d.accepts(1));
        assert_eq!(
            d.native_signature(),
            Signature::new(
                vec![
                    NativeType::I64,
                    NativeType::Ptr,
                    NativeType::F64,
                    NativeType::Ptr,
                    NativeType::Ptr
                ],
                NativeType::Ptr
            )
        );
        assert_eq!(
            d.managed_descriptor(&interner),
            "(JLrill/rt/RArray;DLrill/rt/RHash;Ljava/lang/Object;)Ljava/lang/Object;"
        );
    }
}
