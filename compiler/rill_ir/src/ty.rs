//! Static types attached to IR instructions by the frontend.

use serde::{Deserialize, Serialize};

use crate::{Name, StringInterner};

/// Static type annotation.
///
/// `Dynamic` marks a value whose type the frontend could not resolve; a
/// `Union` is treated the same way by the code generators since neither
/// pins down a single representation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    Int,
    Float,
    Bool,
    Nil,
    Str,
    Array(Box<Ty>),
    Hash(Box<Ty>, Box<Ty>),
    Class(Name),
    Union(Vec<Ty>),
    Proc,
    Thread,
    Mutex,
    ConditionVariable,
    SizedQueue,
    Fiber,
    Exception,
    Dynamic,
}

impl Ty {
    pub fn array(elem: Ty) -> Ty {
        Ty::Array(Box::new(elem))
    }

    pub fn hash(key: Ty, value: Ty) -> Ty {
        Ty::Hash(Box::new(key), Box::new(value))
    }

    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Ty::Int | Ty::Float)
    }

    /// True when the type gives no single static class to work with.
    #[inline]
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Ty::Dynamic | Ty::Union(_))
    }

    pub fn class_name(&self) -> Option<Name> {
        match self {
            Ty::Class(name) => Some(*name),
            _ => None,
        }
    }

    /// Element type of an array type.
    pub fn element(&self) -> Option<&Ty> {
        match self {
            Ty::Array(elem) => Some(elem),
            _ => None,
        }
    }

    /// Key type of a hash type.
    pub fn key(&self) -> Option<&Ty> {
        match self {
            Ty::Hash(key, _) => Some(key),
            _ => None,
        }
    }

    /// Runtime class name for builtin types.
    pub fn builtin_class(&self) -> Option<&'static str> {
        Some(match self {
            Ty::Int => "Integer",
            Ty::Float => "Float",
            Ty::Bool => "Boolean",
            Ty::Nil => "NilClass",
            Ty::Str => "String",
            Ty::Array(_) => "Array",
            Ty::Hash(..) => "Hash",
            Ty::Proc => "Proc",
            Ty::Thread => "Thread",
            Ty::Mutex => "Mutex",
            Ty::ConditionVariable => "ConditionVariable",
            Ty::SizedQueue => "SizedQueue",
            Ty::Fiber => "Fiber",
            Ty::Exception => "Exception",
            Ty::Class(_) | Ty::Union(_) | Ty::Dynamic => return None,
        })
    }

    /// Human readable rendering, resolving class names.
    pub fn display(&self, interner: &StringInterner) -> String {
        match self {
            Ty::Array(elem) => format!("Array[{}]", elem.display(interner)),
            Ty::Hash(key, value) => format!(
                "Hash[{}, {}]",
                key.display(interner),
                value.display(interner)
            ),
            Ty::Class(name) => interner.lookup(*name).to_owned(),
            Ty::Union(members) => members
                .iter()
                .map(|m| m.display(interner))
                .collect::<Vec<_>>()
                .join(" | "),
            Ty::Dynamic => "untyped".to_owned(),
            other => other.builtin_class().unwrap_or("untyped").to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_types() {
        assert!(Ty::Dynamic.is_unresolved());
        assert!(Ty::Union(vec![Ty::Int, Ty::Nil]).is_unresolved());
        assert!(!Ty::Int.is_unresolved());
    }

    #[test]
    fn display_nested() {
        let interner = StringInterner::new();
        let point = interner.intern("Point");
        let ty = Ty::hash(Ty::Str, Ty::array(Ty::Class(point)));
        assert_eq!(ty.display(&interner), "Hash[String, Array[Point]]");
    }
}
