//! Memory layouts and constants shared by generated code and the runtime.
//!
//! # Layouts
//!
//! Every field is one word. Field indices below double as word indices.
//!
//! | Struct | Fields |
//! |--------|--------|
//! | `rl.box` | class, payload |
//! | `rl.array` | class, len, cap, data, kind |
//! | `rl.hash` | class, size, cap, entries, key_kind |
//! | `rl.hash.entry` | state, hash, key, value |
//! | `rl.closure` | class, generic_fn, env, arity, typed_fn |
//! | `rl.class` | name, super_name, method_count, methods, instance_words |
//! | `rl.method` | name, thunk, arity |
//! | `rl.exception` | class, name, message |
//! | `rl.handle` | class, id |
//!
//! Boxed values are pointers. `nil` is the null pointer. Builtin values
//! carry a [`BuiltinClass`] tag in word 0; instances of user classes carry
//! a pointer to their `rl.class` metadata there instead, followed by their
//! vtable pointer (or null) and then their fields.

use crate::{NativeType, StructId, StructTable};

pub const BOX: &str = "rl.box";
pub const ARRAY: &str = "rl.array";
pub const HASH: &str = "rl.hash";
pub const HASH_ENTRY: &str = "rl.hash.entry";
pub const CLOSURE: &str = "rl.closure";
pub const CLASS_META: &str = "rl.class";
pub const METHOD_ENTRY: &str = "rl.method";
pub const EXCEPTION: &str = "rl.exception";
pub const HANDLE: &str = "rl.handle";

/// Header words of a user object: class metadata and vtable pointers.
pub const OBJECT_HEADER_WORDS: u32 = 2;
pub const OBJECT_META: u32 = 0;
pub const OBJECT_VTABLE: u32 = 1;

/// Bytes per hash entry.
pub const HASH_ENTRY_BYTES: i64 = 32;

/// Minimum capacities of freshly allocated collections.
pub const MIN_ARRAY_CAPACITY: i64 = 4;
pub const MIN_HASH_CAPACITY: i64 = 8;

/// Multiplier of the integer key hash (Fibonacci hashing).
pub const INT_HASH_MULTIPLIER: i64 = 0x9E37_79B9_7F4A_7C15_u64 as i64;

pub mod boxed {
    pub const CLASS: u32 = 0;
    pub const PAYLOAD: u32 = 1;
}

pub mod array {
    pub const CLASS: u32 = 0;
    pub const LEN: u32 = 1;
    pub const CAP: u32 = 2;
    pub const DATA: u32 = 3;
    pub const KIND: u32 = 4;
}

pub mod hash {
    pub const CLASS: u32 = 0;
    pub const SIZE: u32 = 1;
    pub const CAP: u32 = 2;
    pub const ENTRIES: u32 = 3;
    pub const KEY_KIND: u32 = 4;
}

pub mod entry {
    pub const STATE: u32 = 0;
    pub const HASH: u32 = 1;
    pub const KEY: u32 = 2;
    pub const VALUE: u32 = 3;

    pub const EMPTY: i64 = 0;
    pub const OCCUPIED: i64 = 1;
    pub const TOMBSTONE: i64 = 2;
}

pub mod closure {
    pub const CLASS: u32 = 0;
    pub const GENERIC_FN: u32 = 1;
    pub const ENV: u32 = 2;
    pub const ARITY: u32 = 3;
    pub const TYPED_FN: u32 = 4;
}

pub mod class_meta {
    pub const NAME: u32 = 0;
    pub const SUPER_NAME: u32 = 1;
    pub const METHOD_COUNT: u32 = 2;
    pub const METHODS: u32 = 3;
    pub const INSTANCE_WORDS: u32 = 4;
}

pub mod method_entry {
    pub const NAME: u32 = 0;
    pub const THUNK: u32 = 1;
    pub const ARITY: u32 = 2;
    pub const WORDS: u32 = 3;
}

pub mod exception {
    pub const CLASS: u32 = 0;
    pub const NAME: u32 = 1;
    pub const MESSAGE: u32 = 2;
}

pub mod handle {
    pub const CLASS: u32 = 0;
    pub const ID: u32 = 1;
}

/// Tag stored in word 0 of builtin values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum BuiltinClass {
    Integer = 1,
    Float = 2,
    Boolean = 3,
    String = 4,
    Array = 5,
    Hash = 6,
    Proc = 7,
    Exception = 8,
    Thread = 9,
    Mutex = 10,
    ConditionVariable = 11,
    SizedQueue = 12,
    Fiber = 13,
}

impl BuiltinClass {
    pub const ALL: [BuiltinClass; 13] = [
        BuiltinClass::Integer,
        BuiltinClass::Float,
        BuiltinClass::Boolean,
        BuiltinClass::String,
        BuiltinClass::Array,
        BuiltinClass::Hash,
        BuiltinClass::Proc,
        BuiltinClass::Exception,
        BuiltinClass::Thread,
        BuiltinClass::Mutex,
        BuiltinClass::ConditionVariable,
        BuiltinClass::SizedQueue,
        BuiltinClass::Fiber,
    ];

    #[inline]
    pub fn tag(self) -> i64 {
        self as i64
    }

    pub fn from_tag(tag: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.tag() == tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinClass::Integer => "Integer",
            BuiltinClass::Float => "Float",
            BuiltinClass::Boolean => "Boolean",
            BuiltinClass::String => "String",
            BuiltinClass::Array => "Array",
            BuiltinClass::Hash => "Hash",
            BuiltinClass::Proc => "Proc",
            BuiltinClass::Exception => "Exception",
            BuiltinClass::Thread => "Thread",
            BuiltinClass::Mutex => "Mutex",
            BuiltinClass::ConditionVariable => "ConditionVariable",
            BuiltinClass::SizedQueue => "SizedQueue",
            BuiltinClass::Fiber => "Fiber",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// Element storage of an array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i64)]
pub enum ElemKind {
    Boxed = 0,
    Int = 1,
    Float = 2,
}

impl ElemKind {
    #[inline]
    pub fn tag(self) -> i64 {
        self as i64
    }

    pub fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            0 => Some(ElemKind::Boxed),
            1 => Some(ElemKind::Int),
            2 => Some(ElemKind::Float),
            _ => None,
        }
    }

    pub fn native_type(self) -> NativeType {
        match self {
            ElemKind::Boxed => NativeType::Ptr,
            ElemKind::Int => NativeType::I64,
            ElemKind::Float => NativeType::F64,
        }
    }

    /// Symbol suffix of the helpers specialized for this kind.
    pub fn suffix(self) -> &'static str {
        match self {
            ElemKind::Boxed => "boxed",
            ElemKind::Int => "int",
            ElemKind::Float => "float",
        }
    }
}

/// Key hashing and equality strategy of a hash table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i64)]
pub enum KeyKind {
    /// Generic value hash and deep equality.
    Value = 0,
    /// Raw integers, multiplicative hash.
    Int = 1,
    /// Strings, text hash and byte-wise equality.
    Text = 2,
}

impl KeyKind {
    #[inline]
    pub fn tag(self) -> i64 {
        self as i64
    }

    pub fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            0 => Some(KeyKind::Value),
            1 => Some(KeyKind::Int),
            2 => Some(KeyKind::Text),
            _ => None,
        }
    }

    pub fn native_type(self) -> NativeType {
        match self {
            KeyKind::Int => NativeType::I64,
            KeyKind::Value | KeyKind::Text => NativeType::Ptr,
        }
    }

    /// Element kind of the array returned by `keys`.
    pub fn elem_kind(self) -> ElemKind {
        match self {
            KeyKind::Int => ElemKind::Int,
            KeyKind::Value | KeyKind::Text => ElemKind::Boxed,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            KeyKind::Value => "value",
            KeyKind::Int => "int",
            KeyKind::Text => "text",
        }
    }
}

/// Operator codes understood by `rl_binop`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum OpCode {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
    Rem = 4,
    Eq = 5,
    Ne = 6,
    Lt = 7,
    Le = 8,
    Gt = 9,
    Ge = 10,
    BitAnd = 11,
    BitOr = 12,
    BitXor = 13,
    Shl = 14,
    Shr = 15,
}

impl OpCode {
    pub const ALL: [OpCode; 16] = [
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Div,
        OpCode::Rem,
        OpCode::Eq,
        OpCode::Ne,
        OpCode::Lt,
        OpCode::Le,
        OpCode::Gt,
        OpCode::Ge,
        OpCode::BitAnd,
        OpCode::BitOr,
        OpCode::BitXor,
        OpCode::Shl,
        OpCode::Shr,
    ];

    #[inline]
    pub fn tag(self) -> i64 {
        self as i64
    }

    pub fn from_tag(tag: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.tag() == tag)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            OpCode::Add => "+",
            OpCode::Sub => "-",
            OpCode::Mul => "*",
            OpCode::Div => "/",
            OpCode::Rem => "%",
            OpCode::Eq => "==",
            OpCode::Ne => "!=",
            OpCode::Lt => "<",
            OpCode::Le => "<=",
            OpCode::Gt => ">",
            OpCode::Ge => ">=",
            OpCode::BitAnd => "&",
            OpCode::BitOr => "|",
            OpCode::BitXor => "^",
            OpCode::Shl => "<<",
            OpCode::Shr => ">>",
        }
    }
}

/// Builtin exception classes and their parents.
pub const EXCEPTION_HIERARCHY: &[(&str, Option<&str>)] = &[
    ("Exception", None),
    ("StandardError", Some("Exception")),
    ("RuntimeError", Some("StandardError")),
    ("FrozenError", Some("RuntimeError")),
    ("ArgumentError", Some("StandardError")),
    ("TypeError", Some("StandardError")),
    ("NameError", Some("StandardError")),
    ("NoMethodError", Some("NameError")),
    ("ZeroDivisionError", Some("StandardError")),
    ("IndexError", Some("StandardError")),
    ("KeyError", Some("IndexError")),
    ("StopIteration", Some("IndexError")),
    ("IOError", Some("StandardError")),
    ("FiberError", Some("StandardError")),
    ("ThreadError", Some("StandardError")),
    ("RangeError", Some("StandardError")),
];

/// Class rescued by a bare `rescue`.
pub const DEFAULT_RESCUE: &str = "StandardError";

/// Parent of a builtin exception class, `None` for the root or for names
/// that are not builtin exception classes.
pub fn builtin_exception_parent(name: &str) -> Option<&'static str> {
    EXCEPTION_HIERARCHY
        .iter()
        .find(|(n, _)| *n == name)
        .and_then(|(_, parent)| *parent)
}

pub fn is_builtin_exception(name: &str) -> bool {
    EXCEPTION_HIERARCHY.iter().any(|(n, _)| *n == name)
}

/// Struct ids of the runtime layouts in one module.
#[derive(Clone, Copy, Debug)]
pub struct AbiLayouts {
    pub boxed: StructId,
    pub array: StructId,
    pub hash: StructId,
    pub entry: StructId,
    pub closure: StructId,
    pub class_meta: StructId,
    pub method_entry: StructId,
    pub exception: StructId,
    pub handle: StructId,
}

/// Register every runtime layout in `structs`.
pub fn register_layouts(structs: &mut StructTable) -> AbiLayouts {
    use NativeType::{Ptr, I64};
    AbiLayouts {
        boxed: structs.define(BOX, &[("class", I64), ("payload", I64)]),
        array: structs.define(
            ARRAY,
            &[
                ("class", I64),
                ("len", I64),
                ("cap", I64),
                ("data", Ptr),
                ("kind", I64),
            ],
        ),
        hash: structs.define(
            HASH,
            &[
                ("class", I64),
                ("size", I64),
                ("cap", I64),
                ("entries", Ptr),
                ("key_kind", I64),
            ],
        ),
        // The key word is typed per key kind at each access.
        entry: structs.define(
            HASH_ENTRY,
            &[("state", I64), ("hash", I64), ("key", I64), ("value", Ptr)],
        ),
        closure: structs.define(
            CLOSURE,
            &[
                ("class", I64),
                ("generic_fn", Ptr),
                ("env", Ptr),
                ("arity", I64),
                ("typed_fn", Ptr),
            ],
        ),
        class_meta: structs.define(
            CLASS_META,
            &[
                ("name", Ptr),
                ("super_name", Ptr),
                ("method_count", I64),
                ("methods", Ptr),
                ("instance_words", I64),
            ],
        ),
        method_entry: structs.define(
            METHOD_ENTRY,
            &[("name", Ptr), ("thunk", Ptr), ("arity", I64)],
        ),
        exception: structs.define(
            EXCEPTION,
            &[("class", I64), ("name", Ptr), ("message", Ptr)],
        ),
        handle: structs.define(HANDLE, &[("class", I64), ("id", I64)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_layout_is_32_bytes() {
        let mut structs = StructTable::new();
        let layouts = register_layouts(&mut structs);
        assert_eq!(i64::from(structs.get(layouts.entry).size), HASH_ENTRY_BYTES);
        assert_eq!(structs.get(layouts.array).fields[array::DATA as usize].offset, 24);
    }

    #[test]
    fn tags_round_trip() {
        for class in BuiltinClass::ALL {
            assert_eq!(BuiltinClass::from_tag(class.tag()), Some(class));
            assert_eq!(BuiltinClass::from_name(class.name()), Some(class));
        }
        assert_eq!(OpCode::from_tag(OpCode::Shr.tag()), Some(OpCode::Shr));
        assert_eq!(KeyKind::from_tag(2), Some(KeyKind::Text));
    }

    #[test]
    fn exception_parents() {
        assert_eq!(builtin_exception_parent("KeyError"), Some("IndexError"));
        assert_eq!(builtin_exception_parent("Exception"), None);
        assert_eq!(builtin_exception_parent("MyError"), None);
        assert!(is_builtin_exception("FiberError"));
    }
}
