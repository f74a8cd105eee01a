//! Class registration and named (open) dispatch.
//!
//! # Lookup order of `rl_send`
//!
//! 1. Methods of a user object's class, walking superclasses by name.
//! 2. Builtin methods of the receiver's runtime class.
//! 3. Top-level routines, registered as methods of the `Object` class.
//! 4. `NoMethodError`.

use std::sync::Arc;

use rill_native::abi::{self, BuiltinClass, OpCode};
use rill_native::NativeType;
use tracing::trace;

use super::collections::{self as coll};
use super::concurrency;
use super::control::{call_closure, is_subclass};
use super::fiber;
use super::ops::{binop, to_s_dispatch};
use super::value::{self, classify, Value};
use super::{arg, int_arg, read_argv};
use crate::{Machine, Unwind, Word};

type RtResult = Result<Word, Unwind>;

/// Class holding top-level routines.
pub(crate) const TOP_LEVEL_CLASS: &str = "Object";

const MAX_CHAIN: usize = 256;

pub(super) fn rl_register_class(m: &Machine, args: &[Word]) -> RtResult {
    let meta = arg(args, 0);
    let name = m.text(m.load_field(meta, abi::class_meta::NAME)?)?;
    let Some(ptr) = meta.as_ptr() else {
        return Ok(Word::Undef);
    };
    trace!(class = %name, "register class");
    m.register_class(name, ptr);
    Ok(Word::Undef)
}

fn find_in_meta(m: &Machine, meta: Word, name: &str) -> Result<Option<Word>, Unwind> {
    let count = m
        .load_field(meta, abi::class_meta::METHOD_COUNT)?
        .coerce(NativeType::I64)
        .as_int()
        .unwrap_or(0);
    let methods = m.load_field(meta, abi::class_meta::METHODS)?;
    for i in 0..count {
        let base = u32::try_from(i).unwrap_or(u32::MAX) * abi::method_entry::WORDS;
        let entry_name = m.load_field(methods, base + abi::method_entry::NAME)?;
        if &*m.text(entry_name)? == name {
            return Ok(Some(m.load_field(methods, base + abi::method_entry::THUNK)?));
        }
    }
    Ok(None)
}

fn super_meta(m: &Machine, meta: Word) -> Result<Option<Word>, Unwind> {
    let super_name = m
        .load_field(meta, abi::class_meta::SUPER_NAME)?
        .coerce(NativeType::Ptr);
    if super_name.is_null() {
        return Ok(None);
    }
    Ok(m.class_meta(&m.text(super_name)?).map(Word::Ptr))
}

/// Method thunk `name` defined by the class of a user object, or by one of
/// its superclasses.
pub(crate) fn find_user_method(m: &Machine, recv: Word, name: &str) -> Result<Option<Word>, Unwind> {
    let Value::Object { meta, .. } = classify(m, recv)? else {
        return Ok(None);
    };
    let mut current = Some(meta);
    for _ in 0..MAX_CHAIN {
        let Some(meta) = current else { break };
        if let Some(thunk) = find_in_meta(m, meta, name)? {
            return Ok(Some(thunk));
        }
        current = super_meta(m, meta)?;
    }
    Ok(None)
}

pub(crate) fn responds_to(m: &Machine, recv: Word, name: &str) -> Result<bool, Unwind> {
    Ok(find_user_method(m, recv, name)?.is_some())
}

fn call_thunk(m: &Machine, thunk: Word, recv: Word, args: &[Word], block: Word) -> RtResult {
    let argc = i64::try_from(args.len()).unwrap_or(i64::MAX);
    let argv = if args.is_empty() {
        Word::Null
    } else {
        m.alloc_words(args.to_vec())
    };
    let result = m.call_word(thunk, &[recv, Word::Int(argc), argv, block]);
    if let Some(ptr) = argv.as_ptr() {
        m.free(ptr)?;
    }
    result
}

/// Send `name` to `recv` with boxed `args` and an optional block.
pub(crate) fn send(m: &Machine, recv: Word, name: &str, args: &[Word], block: Word) -> RtResult {
    if let Some(thunk) = find_user_method(m, recv, name)? {
        return call_thunk(m, thunk, recv, args, block);
    }
    let value = classify(m, recv)?;
    if let Some(result) = builtin(m, recv, &value, name, args, block)? {
        return Ok(result);
    }
    if let Some(top) = m.class_meta(TOP_LEVEL_CLASS) {
        if let Some(thunk) = find_in_meta(m, Word::Ptr(top), name)? {
            return call_thunk(m, thunk, recv, args, block);
        }
    }
    let class = match value {
        Value::Nil => "nil".to_owned(),
        other => other.class_name(m),
    };
    Err(m.raise_error(
        "NoMethodError",
        format!("undefined method '{name}' for {class}"),
    ))
}

pub(super) fn rl_send(m: &Machine, args: &[Word]) -> RtResult {
    let recv = arg(args, 0);
    let name = m.text(arg(args, 1))?;
    let argv = read_argv(m, int_arg(args, 2), arg(args, 3))?;
    let block = arg(args, 4).coerce(NativeType::Ptr);
    send(m, recv, &name, &argv, block)
}

fn operator(name: &str) -> Option<OpCode> {
    OpCode::ALL.into_iter().find(|op| op.symbol() == name)
}

fn int_of(m: &Machine, word: Word) -> Result<i64, Unwind> {
    super::ops::unbox_int_word(m, word)
}

fn argument_error(m: &Machine, name: &str, given: usize, expected: usize) -> Unwind {
    m.raise_error(
        "ArgumentError",
        format!("wrong number of arguments calling '{name}' (given {given}, expected {expected})"),
    )
}

/// Builtin method `name` of `value`; `None` when there is no such method.
fn builtin(
    m: &Machine,
    recv: Word,
    value: &Value,
    name: &str,
    args: &[Word],
    block: Word,
) -> Result<Option<Word>, Unwind> {
    let first = arg(args, 0);
    let result = match (value, name) {
        // Integer and Float
        (Value::Int(v), "to_s") => value::new_string(m, &v.to_string()),
        (Value::Int(v), "to_f") => value::box_float(m, *v as f64),
        (Value::Int(_), "to_i") | (Value::Str(_), "to_s") => recv,
        (Value::Int(v), "abs") => value::box_int(m, v.wrapping_abs()),
        (Value::Int(v), "succ") => value::box_int(m, v.wrapping_add(1)),
        (Value::Int(v), "even?") => value::box_bool(m, v % 2 == 0),
        (Value::Int(v), "odd?") => value::box_bool(m, v % 2 != 0),
        (Value::Int(v), "zero?") => value::box_bool(m, *v == 0),
        (Value::Int(v), "times") => {
            for i in 0..*v {
                call_closure(m, block, &[value::box_int(m, i)])?;
            }
            recv
        }
        (Value::Float(_), "to_s") => value::new_string(m, &value::inspect(m, recv)?),
        (Value::Float(_), "to_f") => recv,
        (Value::Float(v), "to_i") => value::box_int(m, v.trunc() as i64),
        (Value::Float(v), "round") => value::box_int(m, v.round() as i64),
        (Value::Float(v), "floor") => value::box_int(m, v.floor() as i64),
        (Value::Float(v), "ceil") => value::box_int(m, v.ceil() as i64),
        (Value::Float(v), "abs") => value::box_float(m, v.abs()),
        (Value::Int(_) | Value::Float(_) | Value::Str(_) | Value::Array(_), op)
            if operator(op).is_some() =>
        {
            let Some(op) = operator(op) else {
                return Ok(None);
            };
            if args.len() != 1 {
                return Err(argument_error(m, name, args.len(), 1));
            }
            binop(m, op, recv, first)?
        }
        (Value::Int(v), "-@") => value::box_int(m, v.wrapping_neg()),
        (Value::Float(v), "-@") => value::box_float(m, -v),

        // String
        (Value::Str(s), "length" | "size") => {
            value::box_int(m, i64::try_from(s.chars().count()).unwrap_or(i64::MAX))
        }
        (Value::Str(s), "upcase") => value::new_string(m, &s.to_uppercase()),
        (Value::Str(s), "downcase") => value::new_string(m, &s.to_lowercase()),
        (Value::Str(s), "reverse") => value::new_string(m, &s.chars().rev().collect::<String>()),
        (Value::Str(s), "empty?") => value::box_bool(m, s.is_empty()),
        (Value::Str(s), "to_i") => value::box_int(m, s.trim().parse::<i64>().unwrap_or(0)),
        (Value::Str(s), "include?") => match classify(m, first)? {
            Value::Str(needle) => value::box_bool(m, s.contains(&*needle)),
            _ => value::box_bool(m, false),
        },

        // Array
        (Value::Array(arr), "size" | "length") => {
            value::box_int(m, i64::try_from(coll::array_elements(m, *arr)?.len()).unwrap_or(0))
        }
        (Value::Array(arr), "empty?") => {
            value::box_bool(m, coll::array_elements(m, *arr)?.is_empty())
        }
        (Value::Array(arr), "first") => coll::array_get_boxed_or_nil(m, *arr, 0)?,
        (Value::Array(arr), "last") => coll::array_get_boxed_or_nil(m, *arr, -1)?,
        (Value::Array(arr), "push") => {
            for item in args {
                coll::array_push_boxed(m, *arr, *item)?;
            }
            recv
        }
        (Value::Array(arr), "pop") => coll::array_pop_boxed(m, *arr)?,
        (Value::Array(arr), "[]") => coll::array_get_boxed(m, *arr, int_of(m, first)?)?,
        (Value::Array(arr), "[]=") => {
            coll::array_set_boxed(m, *arr, int_of(m, first)?, arg(args, 1))?
        }
        (Value::Array(arr), "include?") => {
            let mut found = false;
            for item in coll::array_elements(m, *arr)? {
                if value::value_eq(m, item, first)? {
                    found = true;
                    break;
                }
            }
            value::box_bool(m, found)
        }
        (Value::Array(arr), "each") => {
            for item in coll::array_elements(m, *arr)? {
                call_closure(m, block, &[item])?;
            }
            recv
        }
        (Value::Array(arr), "join") => {
            let sep = match classify(m, first)? {
                Value::Str(s) => s.to_string(),
                _ => String::new(),
            };
            let mut parts = Vec::new();
            for item in coll::array_elements(m, *arr)? {
                parts.push(to_s_dispatch(m, item)?);
            }
            value::new_string(m, &parts.join(&sep))
        }

        // Hash
        (Value::Hash(hash), "[]") => coll::hash_get_boxed(m, *hash, first)?.unwrap_or(Word::Null),
        (Value::Hash(hash), "[]=") => {
            coll::hash_set_boxed(m, *hash, first, arg(args, 1))?;
            arg(args, 1)
        }
        (Value::Hash(hash), "delete") => {
            coll::hash_delete_boxed(m, *hash, first)?.unwrap_or(Word::Null)
        }
        (Value::Hash(hash), "key?" | "has_key?" | "include?") => {
            value::box_bool(m, coll::hash_get_boxed(m, *hash, first)?.is_some())
        }
        (Value::Hash(hash), "keys") => coll::hash_keys(m, *hash)?,
        (Value::Hash(hash), "values") => coll::hash_values(m, *hash)?,
        (Value::Hash(hash), "size" | "length") => value::box_int(m, coll::hash_size(m, *hash)?),
        (Value::Hash(hash), "empty?") => value::box_bool(m, coll::hash_size(m, *hash)? == 0),
        (Value::Hash(hash), "each") => {
            for (key, item) in coll::hash_entries(m, *hash)? {
                call_closure(m, block, &[key, item])?;
            }
            recv
        }

        // Proc and Exception
        (Value::Proc(_), "call") => call_closure(m, recv, args)?,
        (Value::Exception(_), "message" | "to_s") => {
            super::control::exception_message(m, recv)?
        }

        // Handles
        (Value::Handle { class, .. }, _) => {
            match handle_method(m, recv, *class, name, args, block)? {
                Some(result) => result,
                None => return object_method(m, recv, value, name, args),
            }
        }
        _ => return object_method(m, recv, value, name, args),
    };
    Ok(Some(result))
}

fn handle_method(
    m: &Machine,
    recv: Word,
    class: BuiltinClass,
    name: &str,
    args: &[Word],
    block: Word,
) -> Result<Option<Word>, Unwind> {
    let with = |extra: &[Word]| {
        let mut all = vec![recv];
        all.extend_from_slice(extra);
        all
    };
    let result = match (class, name) {
        (BuiltinClass::Thread, "join") => concurrency::rl_thread_join(m, &[recv])?,
        (BuiltinClass::Thread, "value") => concurrency::rl_thread_value(m, &[recv])?,
        (BuiltinClass::Mutex, "lock") => concurrency::rl_mutex_lock(m, &[recv])?,
        (BuiltinClass::Mutex, "unlock") => concurrency::rl_mutex_unlock(m, &[recv])?,
        (BuiltinClass::Mutex, "synchronize") => {
            concurrency::rl_mutex_lock(m, &[recv])?;
            let result = call_closure(m, block, &[]);
            concurrency::rl_mutex_unlock(m, &[recv])?;
            result?
        }
        (BuiltinClass::ConditionVariable, "wait") => {
            concurrency::rl_condvar_wait(m, &with(&args[..args.len().min(1)]))?
        }
        (BuiltinClass::ConditionVariable, "signal") => concurrency::rl_condvar_signal(m, &[recv])?,
        (BuiltinClass::ConditionVariable, "broadcast") => {
            concurrency::rl_condvar_broadcast(m, &[recv])?
        }
        (BuiltinClass::SizedQueue, "push" | "<<") => {
            concurrency::rl_queue_push(m, &with(&args[..args.len().min(1)]))?
        }
        (BuiltinClass::SizedQueue, "pop") => concurrency::rl_queue_pop(m, &[recv])?,
        (BuiltinClass::Fiber, "resume") => fiber::rl_fiber_resume(m, &with(&args[..args.len().min(1)]))?,
        (BuiltinClass::Fiber, "alive?") => {
            let alive = fiber::rl_fiber_alive(m, &[recv])?.as_bool().unwrap_or(false);
            value::box_bool(m, alive)
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}

/// Methods every value answers.
fn object_method(
    m: &Machine,
    recv: Word,
    value: &Value,
    name: &str,
    args: &[Word],
) -> Result<Option<Word>, Unwind> {
    let first = arg(args, 0);
    let result = match name {
        "to_s" => value::new_string(m, &value::to_s(m, recv)?),
        "inspect" => value::new_string(m, &value::inspect(m, recv)?),
        "nil?" => value::box_bool(m, matches!(value, Value::Nil)),
        "==" => value::box_bool(m, value::value_eq(m, recv, first)?),
        "!=" => value::box_bool(m, !value::value_eq(m, recv, first)?),
        "!" => value::box_bool(m, !super::ops::truthy(m, recv)?),
        "class" => value::new_string(m, &value.class_name(m)),
        "is_a?" | "kind_of?" => {
            let target = match classify(m, first)? {
                Value::Str(s) => s,
                _ => Arc::from(""),
            };
            value::box_bool(m, is_subclass(m, &value.class_name(m), &target))
        }
        "hash" => value::box_int(m, value::value_hash(m, recv)?),
        "message" if matches!(value, Value::Object { .. }) => {
            value::new_string(m, &value.class_name(m))
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}
