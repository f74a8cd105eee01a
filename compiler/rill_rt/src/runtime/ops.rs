//! Boxing, generic operators, strings and output.

use rill_native::abi::OpCode;
use rill_native::NativeType;

use super::value::{self, classify, Value};
use super::{arg, float_arg, int_arg};
use crate::{ExecError, Machine, Unwind, Word};

type RtResult = Result<Word, Unwind>;

// -- Memory and boxing --

pub(super) fn rl_alloc(m: &Machine, args: &[Word]) -> RtResult {
    Ok(m.alloc_zeroed(int_arg(args, 0)))
}

pub(super) fn rl_free(m: &Machine, args: &[Word]) -> RtResult {
    if let Some(ptr) = arg(args, 0).as_ptr() {
        m.free(ptr)?;
    }
    Ok(Word::Undef)
}

pub(super) fn rl_box_int(m: &Machine, args: &[Word]) -> RtResult {
    Ok(value::box_int(m, int_arg(args, 0)))
}

pub(super) fn rl_box_float(m: &Machine, args: &[Word]) -> RtResult {
    Ok(value::box_float(m, float_arg(args, 0)))
}

pub(super) fn rl_box_bool(m: &Machine, args: &[Word]) -> RtResult {
    let v = arg(args, 0).as_bool().unwrap_or(false);
    Ok(value::box_bool(m, v))
}

fn conversion_error(m: &Machine, value: &Value, target: &str) -> Unwind {
    let from = match value {
        Value::Nil => "nil".to_owned(),
        other => other.class_name(m),
    };
    m.raise_error("TypeError", format!("no implicit conversion of {from} into {target}"))
}

pub(super) fn rl_unbox_int(m: &Machine, args: &[Word]) -> RtResult {
    match classify(m, arg(args, 0))? {
        Value::Int(v) => Ok(Word::Int(v)),
        other => Err(conversion_error(m, &other, "Integer")),
    }
}

pub(super) fn rl_unbox_float(m: &Machine, args: &[Word]) -> RtResult {
    match classify(m, arg(args, 0))? {
        Value::Float(v) => Ok(Word::Float(v)),
        Value::Int(v) => Ok(Word::Float(v as f64)),
        other => Err(conversion_error(m, &other, "Float")),
    }
}

pub(super) fn rl_unbox_bool(m: &Machine, args: &[Word]) -> RtResult {
    Ok(Word::Bool(truthy(m, arg(args, 0))?))
}

pub(crate) fn truthy(m: &Machine, word: Word) -> Result<bool, Unwind> {
    Ok(!matches!(classify(m, word)?, Value::Nil | Value::Bool(false)))
}

pub(super) fn rl_truthy(m: &Machine, args: &[Word]) -> RtResult {
    Ok(Word::Bool(truthy(m, arg(args, 0))?))
}

/// Narrow a boxed value to an instance of the named class. `nil` passes.
pub(super) fn rl_check_class(m: &Machine, args: &[Word]) -> RtResult {
    let value = arg(args, 0);
    let expected = m.text(arg(args, 1))?;
    let classified = classify(m, value)?;
    if matches!(classified, Value::Nil) {
        return Ok(Word::Null);
    }
    let actual = classified.class_name(m);
    if super::control::is_subclass(m, &actual, &expected) {
        Ok(value)
    } else {
        Err(m.raise_error(
            "TypeError",
            format!("expected {expected}, got {actual}"),
        ))
    }
}

// -- Generic operators --

fn no_method(m: &Machine, op: &str, value: &Value) -> Unwind {
    let class = match value {
        Value::Nil => "nil".to_owned(),
        other => other.class_name(m),
    };
    m.raise_error("NoMethodError", format!("undefined method '{op}' for {class}"))
}

fn zero_division(m: &Machine) -> Unwind {
    m.raise_error("ZeroDivisionError", "divided by 0")
}

fn int_op(m: &Machine, op: OpCode, a: i64, b: i64) -> RtResult {
    let shift = (b & 63) as u32;
    Ok(match op {
        OpCode::Add => value::box_int(m, a.wrapping_add(b)),
        OpCode::Sub => value::box_int(m, a.wrapping_sub(b)),
        OpCode::Mul => value::box_int(m, a.wrapping_mul(b)),
        OpCode::Div => {
            if b == 0 {
                return Err(zero_division(m));
            }
            value::box_int(m, a.wrapping_div(b))
        }
        OpCode::Rem => {
            if b == 0 {
                return Err(zero_division(m));
            }
            value::box_int(m, a.wrapping_rem(b))
        }
        OpCode::BitAnd => value::box_int(m, a & b),
        OpCode::BitOr => value::box_int(m, a | b),
        OpCode::BitXor => value::box_int(m, a ^ b),
        OpCode::Shl => value::box_int(m, a.wrapping_shl(shift)),
        OpCode::Shr => value::box_int(m, a.wrapping_shr(shift)),
        cmp => value::box_bool(m, ordered(cmp, a.cmp(&b))),
    })
}

fn float_op(m: &Machine, op: OpCode, a: f64, b: f64, lhs: &Value) -> RtResult {
    Ok(match op {
        OpCode::Add => value::box_float(m, a + b),
        OpCode::Sub => value::box_float(m, a - b),
        OpCode::Mul => value::box_float(m, a * b),
        OpCode::Div => value::box_float(m, a / b),
        OpCode::Rem => value::box_float(m, a % b),
        OpCode::Eq | OpCode::Ne | OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge => {
            let result = match a.partial_cmp(&b) {
                Some(ord) => ordered(op, ord),
                None => op == OpCode::Ne,
            };
            value::box_bool(m, result)
        }
        bitwise => return Err(no_method(m, bitwise.symbol(), lhs)),
    })
}

fn ordered(op: OpCode, ord: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};
    match op {
        OpCode::Eq => ord == Equal,
        OpCode::Ne => ord != Equal,
        OpCode::Lt => ord == Less,
        OpCode::Le => ord != Greater,
        OpCode::Gt => ord == Greater,
        _ => ord != Less,
    }
}

/// Apply operator `op` to two boxed values.
pub(crate) fn binop(m: &Machine, op: OpCode, lhs: Word, rhs: Word) -> RtResult {
    let (a, b) = (classify(m, lhs)?, classify(m, rhs)?);
    match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => return int_op(m, op, *x, *y),
        (Value::Float(x), Value::Float(y)) => return float_op(m, op, *x, *y, &a),
        (Value::Int(x), Value::Float(y)) => return float_op(m, op, *x as f64, *y, &a),
        (Value::Float(x), Value::Int(y)) => return float_op(m, op, *x, *y as f64, &a),
        _ => {}
    }
    // User-defined operators.
    if let Value::Object { .. } = a {
        if op != OpCode::Ne || super::dispatch::responds_to(m, lhs, op.symbol())? {
            return super::dispatch::send(m, lhs, op.symbol(), &[rhs], Word::Null);
        }
    }
    match op {
        OpCode::Eq => return Ok(value::box_bool(m, value::value_eq(m, lhs, rhs)?)),
        OpCode::Ne => return Ok(value::box_bool(m, !value::value_eq(m, lhs, rhs)?)),
        _ => {}
    }
    match (&a, &b) {
        (Value::Str(x), Value::Str(y)) => match op {
            OpCode::Add => Ok(value::new_string(m, &format!("{x}{y}"))),
            OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge => {
                Ok(value::box_bool(m, ordered(op, x.cmp(y))))
            }
            _ => Err(no_method(m, op.symbol(), &a)),
        },
        (Value::Str(x), Value::Int(n)) if op == OpCode::Mul => {
            if *n < 0 {
                return Err(m.raise_error("ArgumentError", "negative argument"));
            }
            Ok(value::new_string(m, &x.repeat(usize::try_from(*n).unwrap_or(0))))
        }
        (Value::Str(_), _) if op == OpCode::Add => Err(m.raise_error(
            "TypeError",
            format!("no implicit conversion of {} into String", b.class_name(m)),
        )),
        (Value::Array(x), Value::Array(y)) if op == OpCode::Add => {
            let mut items = super::array_elements(m, *x)?;
            items.extend(super::array_elements(m, *y)?);
            Ok(super::collections::new_boxed_array(m, &items))
        }
        (Value::Array(x), _) if op == OpCode::Shl => {
            super::collections::array_push_boxed(m, *x, rhs)?;
            Ok(lhs)
        }
        (Value::Nil | Value::Int(_) | Value::Float(_), _) => match (&a, op) {
            (Value::Nil, _) => Err(no_method(m, op.symbol(), &a)),
            _ => Err(m.raise_error(
                "TypeError",
                format!("{} can't be coerced into {}", b.class_name(m), a.class_name(m)),
            )),
        },
        _ => Err(no_method(m, op.symbol(), &a)),
    }
}

pub(super) fn rl_binop(m: &Machine, args: &[Word]) -> RtResult {
    let code = int_arg(args, 0);
    let op = OpCode::from_tag(code)
        .ok_or_else(|| ExecError::TypeMismatch(format!("unknown operator code {code}")))?;
    binop(m, op, arg(args, 1), arg(args, 2))
}

pub(super) fn rl_neg(m: &Machine, args: &[Word]) -> RtResult {
    let operand = arg(args, 0);
    match classify(m, operand)? {
        Value::Int(v) => Ok(value::box_int(m, v.wrapping_neg())),
        Value::Float(v) => Ok(value::box_float(m, -v)),
        Value::Object { .. } => super::dispatch::send(m, operand, "-@", &[], Word::Null),
        other => Err(no_method(m, "-@", &other)),
    }
}

// -- Hashing and equality --

pub(super) fn rl_value_hash(m: &Machine, args: &[Word]) -> RtResult {
    Ok(Word::Int(value::value_hash(m, arg(args, 0))?))
}

pub(super) fn rl_value_eq(m: &Machine, args: &[Word]) -> RtResult {
    Ok(Word::Bool(value::value_eq(m, arg(args, 0), arg(args, 1))?))
}

fn string_text(m: &Machine, word: Word) -> Result<std::sync::Arc<str>, Unwind> {
    match classify(m, word)? {
        Value::Str(s) => Ok(s),
        other => Err(conversion_error(m, &other, "String")),
    }
}

pub(super) fn rl_str_hash(m: &Machine, args: &[Word]) -> RtResult {
    Ok(Word::Int(value::text_hash(&string_text(m, arg(args, 0))?)))
}

pub(super) fn rl_str_eq(m: &Machine, args: &[Word]) -> RtResult {
    let (a, b) = (arg(args, 0), arg(args, 1));
    match (classify(m, a)?, classify(m, b)?) {
        (Value::Str(x), Value::Str(y)) => Ok(Word::Bool(x == y)),
        _ => Ok(Word::Bool(false)),
    }
}

// -- Strings and output --

/// Box a module text literal as a fresh string.
pub(super) fn rl_str_lit(m: &Machine, args: &[Word]) -> RtResult {
    Ok(value::string_from_text(m, arg(args, 0)))
}

pub(super) fn rl_to_s(m: &Machine, args: &[Word]) -> RtResult {
    let word = arg(args, 0);
    if let Value::Str(_) = classify(m, word)? {
        return Ok(word);
    }
    let text = to_s_dispatch(m, word)?;
    Ok(value::new_string(m, &text))
}

pub(super) fn rl_inspect(m: &Machine, args: &[Word]) -> RtResult {
    let text = value::inspect(m, arg(args, 0))?;
    Ok(value::new_string(m, &text))
}

/// `to_s`, honoring a user-defined `to_s` on objects.
pub(crate) fn to_s_dispatch(m: &Machine, word: Word) -> Result<String, Unwind> {
    if let Value::Object { .. } = classify(m, word)? {
        if super::dispatch::find_user_method(m, word, "to_s")?.is_some() {
            let result = super::dispatch::send(m, word, "to_s", &[], Word::Null)?;
            return value::to_s(m, result);
        }
    }
    value::to_s(m, word)
}

fn puts_value(m: &Machine, word: Word, out: &mut String) -> Result<(), Unwind> {
    if let Value::Array(arr) = classify(m, word)? {
        let items = super::array_elements(m, arr)?;
        if items.is_empty() {
            out.push('\n');
        }
        for item in items {
            puts_value(m, item, out)?;
        }
        return Ok(());
    }
    let text = to_s_dispatch(m, word)?;
    out.push_str(&text);
    if !text.ends_with('\n') {
        out.push('\n');
    }
    Ok(())
}

pub(super) fn rl_puts(m: &Machine, args: &[Word]) -> RtResult {
    let mut out = String::new();
    puts_value(m, arg(args, 0), &mut out)?;
    m.write_output(&out);
    Ok(Word::Null)
}

pub(super) fn rl_print(m: &Machine, args: &[Word]) -> RtResult {
    let text = to_s_dispatch(m, arg(args, 0))?;
    m.write_output(&text);
    Ok(Word::Null)
}

pub(super) fn rl_p(m: &Machine, args: &[Word]) -> RtResult {
    let word = arg(args, 0);
    let mut text = value::inspect(m, word)?;
    text.push('\n');
    m.write_output(&text);
    Ok(word)
}

// -- Builtin method entry points --

pub(super) fn rl_int_to_s(m: &Machine, args: &[Word]) -> RtResult {
    Ok(value::new_string(m, &int_arg(args, 0).to_string()))
}

pub(super) fn rl_int_to_f(_m: &Machine, args: &[Word]) -> RtResult {
    Ok(Word::Float(int_arg(args, 0) as f64))
}

pub(super) fn rl_int_abs(_m: &Machine, args: &[Word]) -> RtResult {
    Ok(Word::Int(int_arg(args, 0).wrapping_abs()))
}

pub(super) fn rl_float_to_s(m: &Machine, args: &[Word]) -> RtResult {
    let boxed = value::box_float(m, float_arg(args, 0));
    Ok(value::new_string(m, &value::inspect(m, boxed)?))
}

pub(super) fn rl_float_to_i(m: &Machine, args: &[Word]) -> RtResult {
    let v = float_arg(args, 0);
    if !v.is_finite() {
        return Err(m.raise_error("FloatDomainError", value::inspect(m, value::box_float(m, v))?));
    }
    Ok(Word::Int(v.trunc() as i64))
}

pub(super) fn rl_float_round(m: &Machine, args: &[Word]) -> RtResult {
    let v = float_arg(args, 0);
    if !v.is_finite() {
        return Err(m.raise_error("FloatDomainError", value::inspect(m, value::box_float(m, v))?));
    }
    Ok(Word::Int(v.round() as i64))
}

pub(super) fn rl_str_length(m: &Machine, args: &[Word]) -> RtResult {
    let text = string_text(m, arg(args, 0))?;
    Ok(Word::Int(i64::try_from(text.chars().count()).unwrap_or(i64::MAX)))
}

pub(super) fn rl_str_upcase(m: &Machine, args: &[Word]) -> RtResult {
    let text = string_text(m, arg(args, 0))?;
    Ok(value::new_string(m, &text.to_uppercase()))
}

pub(super) fn rl_is_nil(_m: &Machine, args: &[Word]) -> RtResult {
    Ok(Word::Bool(arg(args, 0).is_null()))
}

/// Unbox an integer, raising `TypeError` for anything else.
pub(crate) fn unbox_int_word(m: &Machine, word: Word) -> Result<i64, Unwind> {
    Ok(rl_unbox_int(m, &[word])?
        .coerce(NativeType::I64)
        .as_int()
        .unwrap_or(0))
}

/// Unbox a number as a float, raising `TypeError` for anything else.
pub(crate) fn unbox_float_word(m: &Machine, word: Word) -> Result<f64, Unwind> {
    Ok(rl_unbox_float(m, &[word])?
        .coerce(NativeType::F64)
        .as_float()
        .unwrap_or(0.0))
}
