//! Runtime entry points called by generated code.
//!
//! Every `rl_*` function a native module may declare as an extern is listed
//! in [`RUNTIME_FUNCTIONS`]; [`Machine`] resolves externs against that table
//! when it is built.
//!
//! # Conventions
//!
//! - Boxed values are pointers; `nil` is null.
//! - Text arguments (method names, class names) are pointers to text
//!   allocations, usually module text globals.
//! - A guest exception is returned as `Err(Unwind::Raise(exception))`.

mod collections;
mod concurrency;
mod control;
mod dispatch;
mod fiber;
mod ops;
mod profile;
mod value;

pub use concurrency::Handles;
pub use profile::{Profile, ProfileEntry};

pub(crate) use collections::array_elements;
pub(crate) use value::{classify, Value};

use rill_native::abi::BuiltinClass;

use crate::{Machine, RuntimeFn, Unwind, Word};

/// Every runtime entry point, by extern name.
pub const RUNTIME_FUNCTIONS: &[(&str, RuntimeFn)] = &[
    // memory and boxing
    ("rl_alloc", ops::rl_alloc),
    ("rl_free", ops::rl_free),
    ("rl_box_int", ops::rl_box_int),
    ("rl_box_float", ops::rl_box_float),
    ("rl_box_bool", ops::rl_box_bool),
    ("rl_unbox_int", ops::rl_unbox_int),
    ("rl_unbox_float", ops::rl_unbox_float),
    ("rl_unbox_bool", ops::rl_unbox_bool),
    ("rl_truthy", ops::rl_truthy),
    ("rl_check_class", ops::rl_check_class),
    ("rl_array_coerce", collections::rl_array_coerce),
    ("rl_hash_coerce", collections::rl_hash_coerce),
    // operators, hashing, equality
    ("rl_binop", ops::rl_binop),
    ("rl_neg", ops::rl_neg),
    ("rl_value_hash", ops::rl_value_hash),
    ("rl_value_eq", ops::rl_value_eq),
    ("rl_str_hash", ops::rl_str_hash),
    ("rl_str_eq", ops::rl_str_eq),
    // strings and output
    ("rl_str_lit", ops::rl_str_lit),
    ("rl_to_s", ops::rl_to_s),
    ("rl_inspect", ops::rl_inspect),
    ("rl_puts", ops::rl_puts),
    ("rl_print", ops::rl_print),
    ("rl_p", ops::rl_p),
    // builtin method entry points
    ("rl_int_to_s", ops::rl_int_to_s),
    ("rl_int_to_f", ops::rl_int_to_f),
    ("rl_int_abs", ops::rl_int_abs),
    ("rl_float_to_s", ops::rl_float_to_s),
    ("rl_float_to_i", ops::rl_float_to_i),
    ("rl_float_round", ops::rl_float_round),
    ("rl_str_length", ops::rl_str_length),
    ("rl_str_upcase", ops::rl_str_upcase),
    ("rl_array_size", collections::rl_array_size),
    ("rl_array_first", collections::rl_array_first),
    ("rl_array_last", collections::rl_array_last),
    ("rl_hash_size", collections::rl_hash_size),
    ("rl_is_nil", ops::rl_is_nil),
    // classes and named dispatch
    ("rl_register_class", dispatch::rl_register_class),
    ("rl_send", dispatch::rl_send),
    // closures and exceptions
    ("rl_closure_call", control::rl_closure_call),
    ("rl_protect", control::rl_protect),
    ("rl_ensure", control::rl_ensure),
    ("rl_raise", control::rl_raise),
    ("rl_raise_value", control::rl_raise_value),
    ("rl_reraise", control::rl_reraise),
    ("rl_exc_matches", control::rl_exc_matches),
    ("rl_exc_message", control::rl_exc_message),
    // concurrency
    ("rl_thread_new", concurrency::rl_thread_new),
    ("rl_thread_join", concurrency::rl_thread_join),
    ("rl_thread_value", concurrency::rl_thread_value),
    ("rl_mutex_new", concurrency::rl_mutex_new),
    ("rl_mutex_lock", concurrency::rl_mutex_lock),
    ("rl_mutex_unlock", concurrency::rl_mutex_unlock),
    ("rl_condvar_new", concurrency::rl_condvar_new),
    ("rl_condvar_wait", concurrency::rl_condvar_wait),
    ("rl_condvar_signal", concurrency::rl_condvar_signal),
    ("rl_condvar_broadcast", concurrency::rl_condvar_broadcast),
    ("rl_queue_new", concurrency::rl_queue_new),
    ("rl_queue_push", concurrency::rl_queue_push),
    ("rl_queue_pop", concurrency::rl_queue_pop),
    ("rl_fiber_new", fiber::rl_fiber_new),
    ("rl_fiber_resume", fiber::rl_fiber_resume),
    ("rl_fiber_yield", fiber::rl_fiber_yield),
    ("rl_fiber_current", fiber::rl_fiber_current),
    ("rl_fiber_alive", fiber::rl_fiber_alive),
    // profiling probes
    ("rl_profile_enter", profile::rl_profile_enter),
    ("rl_profile_exit", profile::rl_profile_exit),
];

pub(crate) fn lookup(name: &str) -> Option<RuntimeFn> {
    RUNTIME_FUNCTIONS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, f)| *f)
}

/// True when the runtime provides an entry point named `name`.
pub fn provides(name: &str) -> bool {
    lookup(name).is_some()
}

/// Class name and message of an escaped exception value.
pub fn describe_exception(m: &Machine, exc: Word) -> (String, String) {
    let class = classify(m, exc).map_or_else(|_| "Exception".to_owned(), |v| v.class_name(m));
    let message = match classify(m, exc) {
        Ok(Value::Exception(_)) => value::to_s(m, exc).unwrap_or_default(),
        Ok(Value::Object { .. }) => class.clone(),
        _ => value::inspect(m, exc).unwrap_or_default(),
    };
    (class, message)
}

// -- Argument access --

#[inline]
pub(crate) fn arg(args: &[Word], index: usize) -> Word {
    args.get(index).copied().unwrap_or(Word::Null)
}

pub(crate) fn int_arg(args: &[Word], index: usize) -> i64 {
    arg(args, index)
        .coerce(rill_native::NativeType::I64)
        .as_int()
        .unwrap_or(0)
}

pub(crate) fn float_arg(args: &[Word], index: usize) -> f64 {
    arg(args, index)
        .coerce(rill_native::NativeType::F64)
        .as_float()
        .unwrap_or(0.0)
}

/// Boxed arguments passed as `(argc, argv)`.
pub(crate) fn read_argv(m: &Machine, argc: i64, argv: Word) -> Result<Vec<Word>, Unwind> {
    let count = usize::try_from(argc).unwrap_or(0);
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let index = u32::try_from(i).unwrap_or(u32::MAX);
        out.push(m.load_field(argv, index)?.coerce(rill_native::NativeType::Ptr));
    }
    Ok(out)
}

impl Machine {
    /// Build a guest exception of builtin or user class `class`.
    pub(crate) fn new_exception(&self, class: &str, message: Option<&str>) -> Word {
        let name = self.alloc_text(class);
        let message = message.map_or(Word::Null, |text| value::new_string(self, text));
        self.alloc_words(vec![Word::Int(BuiltinClass::Exception.tag()), name, message])
    }

    /// An unwind raising `class` with `message`.
    pub(crate) fn raise_error(&self, class: &str, message: impl AsRef<str>) -> Unwind {
        Unwind::Raise(self.new_exception(class, Some(message.as_ref())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_no_duplicates() {
        let mut names: Vec<&str> = RUNTIME_FUNCTIONS.iter().map(|(n, _)| *n).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }

    #[test]
    fn lookup_finds_entries() {
        assert!(provides("rl_send"));
        assert!(provides("rl_profile_exit"));
        assert!(!provides("rl_does_not_exist"));
    }
}
