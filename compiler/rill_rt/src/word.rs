//! Machine words.

use rill_native::{FuncId, NativeType};

/// Address inside the executor heap: allocation index plus byte offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ptr {
    pub alloc: u32,
    pub offset: i64,
}

impl Ptr {
    pub const fn new(alloc: u32, offset: i64) -> Self {
        Ptr { alloc, offset }
    }

    #[must_use]
    pub fn add(self, bytes: i64) -> Ptr {
        Ptr {
            alloc: self.alloc,
            offset: self.offset.wrapping_add(bytes),
        }
    }
}

/// One value slot: an SSA value, a memory word or a call argument.
///
/// Memory starts out as `Zero`, which reads back as `0`, `0.0`, `false` or
/// null depending on the type of the load.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Word {
    Zero,
    Undef,
    Int(i64),
    Float(f64),
    Bool(bool),
    Ptr(Ptr),
    Null,
    Func(FuncId),
}

impl Word {
    /// Reinterpret a word for a load of type `ty`.
    pub fn coerce(self, ty: NativeType) -> Word {
        match (ty, self) {
            (NativeType::I64, Word::Zero | Word::Null) => Word::Int(0),
            (NativeType::I64, Word::Bool(b)) => Word::Int(i64::from(b)),
            (NativeType::I64, Word::Float(f)) => Word::Int(f.to_bits() as i64),
            (NativeType::F64, Word::Zero) => Word::Float(0.0),
            (NativeType::F64, Word::Int(i)) => Word::Float(f64::from_bits(i as u64)),
            (NativeType::I1, Word::Zero) => Word::Bool(false),
            (NativeType::I1, Word::Int(i)) => Word::Bool(i != 0),
            (NativeType::Ptr, Word::Zero | Word::Int(0)) => Word::Null,
            (_, word) => word,
        }
    }

    pub fn is_null(self) -> bool {
        matches!(self, Word::Null | Word::Zero)
    }

    pub fn as_int(self) -> Option<i64> {
        match self {
            Word::Int(v) => Some(v),
            Word::Zero => Some(0),
            Word::Bool(b) => Some(i64::from(b)),
            _ => None,
        }
    }

    pub fn as_float(self) -> Option<f64> {
        match self {
            Word::Float(v) => Some(v),
            Word::Zero => Some(0.0),
            _ => None,
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Word::Bool(b) => Some(b),
            Word::Zero => Some(false),
            Word::Int(i) => Some(i != 0),
            _ => None,
        }
    }

    pub fn as_ptr(self) -> Option<Ptr> {
        match self {
            Word::Ptr(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_reads_by_type() {
        assert_eq!(Word::Zero.coerce(NativeType::I64), Word::Int(0));
        assert_eq!(Word::Zero.coerce(NativeType::F64), Word::Float(0.0));
        assert_eq!(Word::Zero.coerce(NativeType::I1), Word::Bool(false));
        assert_eq!(Word::Zero.coerce(NativeType::Ptr), Word::Null);
    }

    #[test]
    fn float_bits_round_trip_through_int_loads() {
        let w = Word::Float(2.5).coerce(NativeType::I64);
        assert_eq!(w.coerce(NativeType::F64), Word::Float(2.5));
    }
}
