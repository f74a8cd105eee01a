//! Guest values as the runtime sees them.
//!
//! Generated code passes boxed values around as plain pointers; this module
//! classifies them, builds new boxes and renders them as text.

use std::fmt::Write as _;
use std::sync::Arc;

use rill_native::abi::{self, BuiltinClass, ElemKind, KeyKind};

use crate::{ExecError, Machine, Ptr, Unwind, Word};

/// A classified boxed value.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Value {
    Nil,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Arc<str>),
    Array(Word),
    Hash(Word),
    Proc(Word),
    Exception(Word),
    Object { ptr: Word, meta: Word },
    Handle { class: BuiltinClass, id: i64 },
}

impl Value {
    pub(crate) fn class_name(&self, m: &Machine) -> String {
        match self {
            Value::Nil => "NilClass".to_owned(),
            Value::Int(_) => "Integer".to_owned(),
            Value::Float(_) => "Float".to_owned(),
            Value::Bool(true) => "TrueClass".to_owned(),
            Value::Bool(false) => "FalseClass".to_owned(),
            Value::Str(_) => "String".to_owned(),
            Value::Array(_) => "Array".to_owned(),
            Value::Hash(_) => "Hash".to_owned(),
            Value::Proc(_) => "Proc".to_owned(),
            Value::Exception(ptr) => exception_name(m, *ptr).unwrap_or_else(|_| "Exception".to_owned()),
            Value::Object { meta, .. } => meta_name(m, *meta).unwrap_or_else(|_| "Object".to_owned()),
            Value::Handle { class, .. } => class.name().to_owned(),
        }
    }
}

pub(crate) fn classify(m: &Machine, word: Word) -> Result<Value, ExecError> {
    let ptr = match word {
        Word::Null | Word::Zero | Word::Undef => return Ok(Value::Nil),
        Word::Int(v) => return Ok(Value::Int(v)),
        Word::Float(v) => return Ok(Value::Float(v)),
        Word::Bool(v) => return Ok(Value::Bool(v)),
        Word::Func(_) => {
            return Err(ExecError::TypeMismatch(
                "function pointer used as a value".to_owned(),
            ))
        }
        Word::Ptr(p) => p,
    };
    let tag = m.load(ptr)?;
    let payload = || m.load(ptr.add(i64::from(abi::boxed::PAYLOAD * rill_native::WORD)));
    match tag {
        Word::Ptr(_) => Ok(Value::Object { ptr: word, meta: tag }),
        Word::Int(tag) => {
            let class = BuiltinClass::from_tag(tag)
                .ok_or_else(|| ExecError::TypeMismatch(format!("unknown class tag {tag}")))?;
            Ok(match class {
                BuiltinClass::Integer => Value::Int(payload()?.coerce(rill_native::NativeType::I64).as_int().unwrap_or(0)),
                BuiltinClass::Float => Value::Float(
                    payload()?.coerce(rill_native::NativeType::F64).as_float().unwrap_or(0.0),
                ),
                BuiltinClass::Boolean => Value::Bool(payload()?.as_bool().unwrap_or(false)),
                BuiltinClass::String => Value::Str(m.text(payload()?)?),
                BuiltinClass::Array => Value::Array(word),
                BuiltinClass::Hash => Value::Hash(word),
                BuiltinClass::Proc => Value::Proc(word),
                BuiltinClass::Exception => Value::Exception(word),
                other => Value::Handle {
                    class: other,
                    id: m.load_field(word, abi::handle::ID)?.as_int().unwrap_or(-1),
                },
            })
        }
        other => Err(ExecError::TypeMismatch(format!(
            "value header is not a class tag: {other:?}"
        ))),
    }
}

// -- Boxing --

pub(crate) fn box_int(m: &Machine, v: i64) -> Word {
    m.alloc_words(vec![Word::Int(BuiltinClass::Integer.tag()), Word::Int(v)])
}

pub(crate) fn box_float(m: &Machine, v: f64) -> Word {
    m.alloc_words(vec![Word::Int(BuiltinClass::Float.tag()), Word::Float(v)])
}

pub(crate) fn box_bool(m: &Machine, v: bool) -> Word {
    m.alloc_words(vec![Word::Int(BuiltinClass::Boolean.tag()), Word::Bool(v)])
}

pub(crate) fn new_string(m: &Machine, text: &str) -> Word {
    let payload = m.alloc_text(text);
    m.alloc_words(vec![Word::Int(BuiltinClass::String.tag()), payload])
}

/// Box a string whose text allocation already exists.
pub(crate) fn string_from_text(m: &Machine, text: Word) -> Word {
    m.alloc_words(vec![Word::Int(BuiltinClass::String.tag()), text])
}

/// Box a raw element read from storage of kind `kind`.
pub(crate) fn box_elem(m: &Machine, kind: ElemKind, word: Word) -> Word {
    match kind {
        ElemKind::Boxed => word.coerce(rill_native::NativeType::Ptr),
        ElemKind::Int => box_int(m, word.coerce(rill_native::NativeType::I64).as_int().unwrap_or(0)),
        ElemKind::Float => box_float(
            m,
            word.coerce(rill_native::NativeType::F64).as_float().unwrap_or(0.0),
        ),
    }
}

/// Box a raw key read from a table of kind `kind`.
pub(crate) fn box_key(m: &Machine, kind: KeyKind, word: Word) -> Word {
    match kind {
        KeyKind::Int => box_int(m, word.coerce(rill_native::NativeType::I64).as_int().unwrap_or(0)),
        KeyKind::Value | KeyKind::Text => word.coerce(rill_native::NativeType::Ptr),
    }
}

// -- Names --

pub(crate) fn meta_name(m: &Machine, meta: Word) -> Result<String, ExecError> {
    let name = m.load_field(meta, abi::class_meta::NAME)?;
    Ok(m.text(name)?.to_string())
}

pub(crate) fn exception_name(m: &Machine, exc: Word) -> Result<String, ExecError> {
    let name = m.load_field(exc, abi::exception::NAME)?;
    Ok(m.text(name)?.to_string())
}

// -- Rendering --

fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{v:.1}")
    } else if v.is_nan() {
        "NaN".to_owned()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_owned()
    } else {
        format!("{v}")
    }
}

/// `to_s` of any value.
pub(crate) fn to_s(m: &Machine, word: Word) -> Result<String, Unwind> {
    let value = classify(m, word)?;
    Ok(match &value {
        Value::Nil => String::new(),
        Value::Str(s) => s.to_string(),
        Value::Exception(exc) => {
            let message = m.load_field(*exc, abi::exception::MESSAGE)?;
            if message.is_null() {
                exception_name(m, *exc)?
            } else {
                to_s(m, message)?
            }
        }
        _ => inspect(m, word)?,
    })
}

/// `inspect` of any value.
pub(crate) fn inspect(m: &Machine, word: Word) -> Result<String, Unwind> {
    let value = classify(m, word)?;
    Ok(match &value {
        Value::Nil => "nil".to_owned(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => format_float(*v),
        Value::Bool(v) => v.to_string(),
        Value::Str(s) => format!("{s:?}"),
        Value::Array(arr) => {
            let items = super::collections::array_elements(m, *arr)?;
            let mut out = String::from("[");
            for (i, item) in items.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&inspect(m, item)?);
            }
            out.push(']');
            out
        }
        Value::Hash(hash) => {
            let entries = super::collections::hash_entries(m, *hash)?;
            if entries.is_empty() {
                "{}".to_owned()
            } else {
                let mut out = String::from("{");
                for (i, (k, v)) in entries.into_iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{} => {}", inspect(m, k)?, inspect(m, v)?);
                }
                out.push('}');
                out
            }
        }
        Value::Proc(_) => "#<Proc>".to_owned(),
        Value::Exception(exc) => {
            let name = exception_name(m, *exc)?;
            format!("#<{name}: {}>", to_s(m, word)?)
        }
        Value::Object { .. } | Value::Handle { .. } => format!("#<{}>", value.class_name(m)),
    })
}

// -- Hashing and equality --

/// FNV-1a over the bytes, shifted to stay non-negative.
pub(crate) fn text_hash(text: &str) -> i64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.bytes() {
        h ^= u64::from(byte);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    (h >> 1) as i64
}

/// Same distribution as the integer-key hash of generated tables.
pub(crate) fn int_hash(v: i64) -> i64 {
    ((v.wrapping_mul(abi::INT_HASH_MULTIPLIER) as u64) >> 1) as i64
}

pub(crate) fn value_hash(m: &Machine, word: Word) -> Result<i64, Unwind> {
    Ok(match classify(m, word)? {
        Value::Nil => 0,
        Value::Int(v) => int_hash(v),
        Value::Float(v) => int_hash(v.to_bits() as i64),
        Value::Bool(v) => int_hash(i64::from(v) + 2),
        Value::Str(s) => text_hash(&s),
        Value::Array(arr) => {
            let mut h: i64 = 7;
            for item in super::collections::array_elements(m, arr)? {
                h = h.wrapping_mul(31).wrapping_add(value_hash(m, item)?);
            }
            int_hash(h)
        }
        Value::Handle { class, id } => int_hash(class.tag().wrapping_mul(1_000_003).wrapping_add(id)),
        Value::Hash(w) | Value::Proc(w) | Value::Exception(w) | Value::Object { ptr: w, .. } => {
            match w {
                Word::Ptr(p) => identity_hash(p),
                _ => 0,
            }
        }
    })
}

fn identity_hash(p: Ptr) -> i64 {
    int_hash(i64::from(p.alloc) << 16 ^ p.offset)
}

/// Deep equality (`==`).
pub(crate) fn value_eq(m: &Machine, a: Word, b: Word) -> Result<bool, Unwind> {
    let (va, vb) = (classify(m, a)?, classify(m, b)?);
    Ok(match (&va, &vb) {
        (Value::Nil, Value::Nil) => true,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            let (xs, ys) = (
                super::collections::array_elements(m, *x)?,
                super::collections::array_elements(m, *y)?,
            );
            if xs.len() != ys.len() {
                return Ok(false);
            }
            for (p, q) in xs.into_iter().zip(ys) {
                if !value_eq(m, p, q)? {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Handle { class: c1, id: i1 }, Value::Handle { class: c2, id: i2 }) => {
            c1 == c2 && i1 == i2
        }
        _ => a == b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_non_negative() {
        for v in [i64::MIN, -1, 0, 1, i64::MAX] {
            assert!(int_hash(v) >= 0);
        }
        assert!(text_hash("anything") >= 0);
        assert_eq!(text_hash("abc"), text_hash("abc"));
    }

    #[test]
    fn float_rendering() {
        assert_eq!(format_float(3.0), "3.0");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(f64::INFINITY), "Infinity");
    }
}
