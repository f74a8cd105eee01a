//! Closure calls, protected calls and exceptions.

use rill_native::abi::{self, builtin_exception_parent, is_builtin_exception};
use rill_native::NativeType;

use super::value::{self, classify, Value};
use super::{arg, int_arg, read_argv};
use crate::{Machine, Unwind, Word};

type RtResult = Result<Word, Unwind>;

const MAX_CHAIN: usize = 256;

/// Call a closure value with boxed `args` through its generic entry.
pub(crate) fn call_closure(m: &Machine, closure: Word, args: &[Word]) -> RtResult {
    if closure.is_null() {
        return Err(m.raise_error("LocalJumpError", "no block given (yield)"));
    }
    if !matches!(classify(m, closure)?, Value::Proc(_)) {
        return Err(m.raise_error("TypeError", "wrong argument type (expected Proc)"));
    }
    let generic = m.load_field(closure, abi::closure::GENERIC_FN)?;
    let env = m.load_field(closure, abi::closure::ENV)?.coerce(NativeType::Ptr);
    let argc = i64::try_from(args.len()).unwrap_or(i64::MAX);
    let argv = if args.is_empty() {
        Word::Null
    } else {
        m.alloc_words(args.to_vec())
    };
    let result = m.call_word(generic, &[env, Word::Int(argc), argv]);
    if let Some(ptr) = argv.as_ptr() {
        m.free(ptr)?;
    }
    result
}

pub(super) fn rl_closure_call(m: &Machine, args: &[Word]) -> RtResult {
    let argv = read_argv(m, int_arg(args, 1), arg(args, 2))?;
    call_closure(m, arg(args, 0).coerce(NativeType::Ptr), &argv)
}

/// `body(benv)`; if it raises, `handler(henv, exception)`.
///
/// Faults of the executor are never handed to the handler.
pub(super) fn rl_protect(m: &Machine, args: &[Word]) -> RtResult {
    let (body, benv, handler, henv) = (arg(args, 0), arg(args, 1), arg(args, 2), arg(args, 3));
    match m.call_word(body, &[benv]) {
        Err(Unwind::Raise(exc)) => m.call_word(handler, &[henv, exc]),
        other => other,
    }
}

/// `main(menv)`, then always `finalizer(fenv)`.
///
/// The finalizer's own exception replaces the main result; otherwise the
/// main result (value or exception) is passed through.
pub(super) fn rl_ensure(m: &Machine, args: &[Word]) -> RtResult {
    let (main, menv, finalizer, fenv) = (arg(args, 0), arg(args, 1), arg(args, 2), arg(args, 3));
    let result = m.call_word(main, &[menv]);
    if let Err(Unwind::Fault(_)) = result {
        return result;
    }
    m.call_word(finalizer, &[fenv])?;
    result
}

/// Raise a new exception of the class named by text `args[0]`.
pub(super) fn rl_raise(m: &Machine, args: &[Word]) -> RtResult {
    let name = arg(args, 0);
    let message = arg(args, 1).coerce(NativeType::Ptr);
    // Keep the caller's text allocation as the class name.
    m.text(name)?;
    let exc = m.alloc_words(vec![
        Word::Int(rill_native::abi::BuiltinClass::Exception.tag()),
        name,
        message,
    ]);
    Err(Unwind::Raise(exc))
}

/// `raise value`: exceptions and exception objects are raised as is; a
/// string raises a `RuntimeError` with that message.
pub(super) fn rl_raise_value(m: &Machine, args: &[Word]) -> RtResult {
    let value = arg(args, 0).coerce(NativeType::Ptr);
    match classify(m, value)? {
        Value::Exception(_) | Value::Object { .. } => Err(Unwind::Raise(value)),
        Value::Str(s) => Err(m.raise_error("RuntimeError", &*s)),
        Value::Nil => Err(m.raise_error("RuntimeError", "unhandled exception")),
        _ => Err(m.raise_error("TypeError", "exception class/object expected")),
    }
}

pub(super) fn rl_reraise(_m: &Machine, args: &[Word]) -> RtResult {
    Err(Unwind::Raise(arg(args, 0).coerce(NativeType::Ptr)))
}

/// Parent of class `name`: a registered user class's superclass, or the
/// builtin hierarchy. Unknown names are treated as `StandardError`s.
fn parent_class(m: &Machine, name: &str) -> Option<String> {
    if let Some(meta) = m.class_meta(name) {
        let super_name = m
            .load_field(Word::Ptr(meta), abi::class_meta::SUPER_NAME)
            .ok()?
            .coerce(NativeType::Ptr);
        if super_name.is_null() {
            return None;
        }
        return m.text(super_name).ok().map(|s| s.to_string());
    }
    if is_builtin_exception(name) {
        return builtin_exception_parent(name).map(str::to_owned);
    }
    if rill_native::abi::BuiltinClass::from_name(name).is_some() {
        return None;
    }
    Some(abi::DEFAULT_RESCUE.to_owned())
}

/// True when class `name` is `target` or inherits from it.
pub(crate) fn is_subclass(m: &Machine, name: &str, target: &str) -> bool {
    let mut current = Some(name.to_owned());
    for _ in 0..MAX_CHAIN {
        let Some(class) = current else { return false };
        if class == target {
            return true;
        }
        current = parent_class(m, &class);
    }
    false
}

fn exception_class(m: &Machine, exc: Word) -> Result<Option<String>, Unwind> {
    Ok(match classify(m, exc)? {
        Value::Exception(_) => Some(value::exception_name(m, exc)?),
        Value::Object { meta, .. } => Some(value::meta_name(m, meta)?),
        _ => None,
    })
}

pub(super) fn rl_exc_matches(m: &Machine, args: &[Word]) -> RtResult {
    let exc = arg(args, 0).coerce(NativeType::Ptr);
    let target = m.text(arg(args, 1))?;
    let matched = match exception_class(m, exc)? {
        Some(class) => &*target == "Exception" || is_subclass(m, &class, &target),
        None => false,
    };
    Ok(Word::Bool(matched))
}

/// `exception.message` as a boxed string.
pub(crate) fn exception_message(m: &Machine, exc: Word) -> RtResult {
    match classify(m, exc)? {
        Value::Exception(_) => {
            let message = m.load_field(exc, abi::exception::MESSAGE)?.coerce(NativeType::Ptr);
            if message.is_null() {
                Ok(value::new_string(m, &value::exception_name(m, exc)?))
            } else {
                Ok(message)
            }
        }
        other => Ok(value::new_string(m, &other.class_name(m))),
    }
}

pub(super) fn rl_exc_message(m: &Machine, args: &[Word]) -> RtResult {
    exception_message(m, arg(args, 0).coerce(NativeType::Ptr))
}
