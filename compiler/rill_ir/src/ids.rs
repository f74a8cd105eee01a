//! Index newtypes for bindings and block labels.

use std::fmt;

use serde::{Deserialize, Serialize};

/// SSA result binding.
///
/// Unique within a function, including bindings defined inside nested
/// bodies (rescue clauses, ensure bodies, closure literals).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct BindingId(u32);

impl BindingId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        BindingId(raw)
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

impl fmt::Debug for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Stable label of a basic block within its body.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct BlockLabel(u32);

impl BlockLabel {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        BlockLabel(raw)
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

impl fmt::Debug for BlockLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}
