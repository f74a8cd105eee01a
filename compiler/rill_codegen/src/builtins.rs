//! Builtin methods both adapters call directly.
//!
//! A call whose receiver class is statically known and whose method is in
//! this table skips named dispatch: the native adapter calls the runtime
//! entry point, the managed adapter invokes the static helper. Everything
//! else a builtin value responds to goes through dispatch.

use crate::repr::Repr;

/// Physical shape of a builtin's receiver, arguments and result.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Float,
    Bool,
    /// A boxed value or any heap handle.
    Value,
}

impl ValueKind {
    pub fn repr(self) -> Repr {
        match self {
            ValueKind::Int => Repr::Int,
            ValueKind::Float => Repr::Float,
            ValueKind::Bool => Repr::Bool,
            ValueKind::Value => Repr::Boxed,
        }
    }
}

/// Managed method a builtin maps to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ManagedRef {
    pub owner: &'static str,
    pub name: &'static str,
    pub descriptor: &'static str,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BuiltinMethod {
    pub class: &'static str,
    pub method: &'static str,
    /// Native runtime entry point.
    pub entry: &'static str,
    pub arity: usize,
    /// `None` for `Kernel` functions, which take no receiver.
    pub receiver: Option<ValueKind>,
    pub ret: ValueKind,
    pub managed: ManagedRef,
}

const KERNEL: &str = "rill/rt/Kernel";
const BUILTINS: &str = "rill/rt/Builtins";
const OBJ_TO_OBJ: &str = "(Ljava/lang/Object;)Ljava/lang/Object;";

#[allow(clippy::too_many_arguments)]
const fn def(
    class: &'static str,
    method: &'static str,
    entry: &'static str,
    arity: usize,
    receiver: Option<ValueKind>,
    ret: ValueKind,
    owner: &'static str,
    name: &'static str,
    descriptor: &'static str,
) -> BuiltinMethod {
    BuiltinMethod {
        class,
        method,
        entry,
        arity,
        receiver,
        ret,
        managed: ManagedRef {
            owner,
            name,
            descriptor,
        },
    }
}

pub const BUILTIN_METHODS: &[BuiltinMethod] = &[
    def("Kernel", "puts", "rl_puts", 1, None, ValueKind::Value, KERNEL, "puts", OBJ_TO_OBJ),
    def("Kernel", "print", "rl_print", 1, None, ValueKind::Value, KERNEL, "print", OBJ_TO_OBJ),
    def("Kernel", "p", "rl_p", 1, None, ValueKind::Value, KERNEL, "p", OBJ_TO_OBJ),
    def("Integer", "to_s", "rl_int_to_s", 0, Some(ValueKind::Int), ValueKind::Value,
        BUILTINS, "intToS", "(J)Ljava/lang/Object;"),
    def("Integer", "to_f", "rl_int_to_f", 0, Some(ValueKind::Int), ValueKind::Float,
        BUILTINS, "intToF", "(J)D"),
    def("Integer", "abs", "rl_int_abs", 0, Some(ValueKind::Int), ValueKind::Int,
        BUILTINS, "intAbs", "(J)J"),
    def("Float", "to_s", "rl_float_to_s", 0, Some(ValueKind::Float), ValueKind::Value,
        BUILTINS, "floatToS", "(D)Ljava/lang/Object;"),
    def("Float", "to_i", "rl_float_to_i", 0, Some(ValueKind::Float), ValueKind::Int,
        BUILTINS, "floatToI", "(D)J"),
    def("Float", "round", "rl_float_round", 0, Some(ValueKind::Float), ValueKind::Int,
        BUILTINS, "floatRound", "(D)J"),
    def("String", "length", "rl_str_length", 0, Some(ValueKind::Value), ValueKind::Int,
        BUILTINS, "strLength", "(Ljava/lang/Object;)J"),
    def("String", "upcase", "rl_str_upcase", 0, Some(ValueKind::Value), ValueKind::Value,
        BUILTINS, "strUpcase", OBJ_TO_OBJ),
    def("String", "to_s", "rl_to_s", 0, Some(ValueKind::Value), ValueKind::Value,
        BUILTINS, "toS", OBJ_TO_OBJ),
    def("Array", "size", "rl_array_size", 0, Some(ValueKind::Value), ValueKind::Int,
        BUILTINS, "arraySize", "(Ljava/lang/Object;)J"),
    def("Array", "first", "rl_array_first", 0, Some(ValueKind::Value), ValueKind::Value,
        BUILTINS, "arrayFirst", OBJ_TO_OBJ),
    def("Array", "last", "rl_array_last", 0, Some(ValueKind::Value), ValueKind::Value,
        BUILTINS, "arrayLast", OBJ_TO_OBJ),
    def("Hash", "size", "rl_hash_size", 0, Some(ValueKind::Value), ValueKind::Int,
        BUILTINS, "hashSize", "(Ljava/lang/Object;)J"),
    def("Object", "inspect", "rl_inspect", 0, Some(ValueKind::Value), ValueKind::Value,
        BUILTINS, "inspect", OBJ_TO_OBJ),
    def("Object", "to_s", "rl_to_s", 0, Some(ValueKind::Value), ValueKind::Value,
        BUILTINS, "toS", OBJ_TO_OBJ),
    def("Object", "nil?", "rl_is_nil", 0, Some(ValueKind::Value), ValueKind::Bool,
        BUILTINS, "isNil", "(Ljava/lang/Object;)Z"),
];

/// Builtin `method` of runtime class `class`, falling back to the methods
/// every object has.
pub fn lookup(class: &str, method: &str) -> Option<&'static BuiltinMethod> {
    BUILTIN_METHODS
        .iter()
        .find(|b| b.class == class && b.method == method)
        .or_else(|| object_method(method))
}

/// `Kernel` function `name`.
pub fn kernel(name: &str) -> Option<&'static BuiltinMethod> {
    BUILTIN_METHODS
        .iter()
        .find(|b| b.class == "Kernel" && b.method == name)
}

/// Method every object responds to.
pub fn object_method(method: &str) -> Option<&'static BuiltinMethod> {
    BUILTIN_METHODS
        .iter()
        .find(|b| b.class == "Object" && b.method == method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn class_methods_win_over_object_methods() {
        assert_eq!(lookup("String", "to_s").map(|b| b.class), Some("String"));
        assert_eq!(lookup("Integer", "inspect").map(|b| b.entry), Some("rl_inspect"));
        assert_eq!(lookup("Hash", "upcase"), None);
    }

    #[test]
    fn kernel_functions_take_no_receiver() {
        let Some(puts) = kernel("puts") else {
            panic!("puts is a kernel function");
        };
        assert_eq!((puts.receiver, puts.arity), (None, 1));
        assert!(kernel("upcase").is_none());
    }

    #[test]
    fn unboxed_receivers_match_their_managed_descriptors() {
        for b in BUILTIN_METHODS {
            let first = match b.receiver {
                Some(ValueKind::Int) => "(J",
                Some(ValueKind::Float) => "(D",
                Some(_) | None => "(L",
            };
            assert!(b.managed.descriptor.starts_with(first), "{}#{}", b.class, b.method);
        }
    }
}
