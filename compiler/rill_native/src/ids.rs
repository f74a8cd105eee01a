//! Opaque ID newtypes for the native module.
//!
//! Each ID is a `u32` index into the corresponding `Vec` of the owning
//! [`Module`](crate::Module) or [`FunctionBody`](crate::FunctionBody).

use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            #[inline]
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }

            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            #[inline]
            pub(crate) fn from_len(len: usize) -> Self {
                Self(u32::try_from(len).unwrap_or(u32::MAX))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_id!(
    /// SSA value within a function body.
    ValueId,
    "%"
);
define_id!(
    /// Basic block within a function body. The entry block is always 0.
    BlockId,
    "bb"
);
define_id!(
    /// Function declared in a module.
    FuncId,
    "fn"
);
define_id!(
    /// Global declared in a module.
    GlobalId,
    "@g"
);
define_id!(
    /// External (runtime) function declared in a module.
    ExternId,
    "ext"
);
define_id!(
    /// Struct layout in the module's struct table.
    StructId,
    "struct"
);

impl BlockId {
    pub const ENTRY: BlockId = BlockId(0);
}
