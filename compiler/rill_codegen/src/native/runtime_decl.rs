//! Runtime entry points the native adapter calls.
//!
//! Each variant names one `rl_*` extern and its native signature. Externs
//! are declared lazily, so a module only lists the entry points it uses.

use rill_native::NativeType::{self, Void, F64, I1, I64};
use rill_native::{ExternId, Module};

use crate::builtins::{BuiltinMethod, ValueKind};

const PTR: NativeType = NativeType::Ptr;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Rt {
    Alloc,
    Free,
    BoxInt,
    BoxFloat,
    BoxBool,
    UnboxInt,
    UnboxFloat,
    Truthy,
    CheckClass,
    ArrayCoerce,
    HashCoerce,
    Binop,
    Neg,
    ValueHash,
    ValueEq,
    StrHash,
    StrEq,
    StrLit,
    RegisterClass,
    Send,
    ClosureCall,
    Protect,
    Ensure,
    Raise,
    RaiseValue,
    Reraise,
    ExcMatches,
    ThreadNew,
    ThreadJoin,
    ThreadValue,
    MutexNew,
    MutexLock,
    MutexUnlock,
    CondvarNew,
    CondvarWait,
    CondvarSignal,
    CondvarBroadcast,
    QueueNew,
    QueuePush,
    QueuePop,
    FiberNew,
    FiberResume,
    FiberYield,
    FiberCurrent,
    FiberAlive,
    ProfileEnter,
    ProfileExit,
}

impl Rt {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Rt::Alloc => "rl_alloc",
            Rt::Free => "rl_free",
            Rt::BoxInt => "rl_box_int",
            Rt::BoxFloat => "rl_box_float",
            Rt::BoxBool => "rl_box_bool",
            Rt::UnboxInt => "rl_unbox_int",
            Rt::UnboxFloat => "rl_unbox_float",
            Rt::Truthy => "rl_truthy",
            Rt::CheckClass => "rl_check_class",
            Rt::ArrayCoerce => "rl_array_coerce",
            Rt::HashCoerce => "rl_hash_coerce",
            Rt::Binop => "rl_binop",
            Rt::Neg => "rl_neg",
            Rt::ValueHash => "rl_value_hash",
            Rt::ValueEq => "rl_value_eq",
            Rt::StrHash => "rl_str_hash",
            Rt::StrEq => "rl_str_eq",
            Rt::StrLit => "rl_str_lit",
            Rt::RegisterClass => "rl_register_class",
            Rt::Send => "rl_send",
            Rt::ClosureCall => "rl_closure_call",
            Rt::Protect => "rl_protect",
            Rt::Ensure => "rl_ensure",
            Rt::Raise => "rl_raise",
            Rt::RaiseValue => "rl_raise_value",
            Rt::Reraise => "rl_reraise",
            Rt::ExcMatches => "rl_exc_matches",
            Rt::ThreadNew => "rl_thread_new",
            Rt::ThreadJoin => "rl_thread_join",
            Rt::ThreadValue => "rl_thread_value",
            Rt::MutexNew => "rl_mutex_new",
            Rt::MutexLock => "rl_mutex_lock",
            Rt::MutexUnlock => "rl_mutex_unlock",
            Rt::CondvarNew => "rl_condvar_new",
            Rt::CondvarWait => "rl_condvar_wait",
            Rt::CondvarSignal => "rl_condvar_signal",
            Rt::CondvarBroadcast => "rl_condvar_broadcast",
            Rt::QueueNew => "rl_queue_new",
            Rt::QueuePush => "rl_queue_push",
            Rt::QueuePop => "rl_queue_pop",
            Rt::FiberNew => "rl_fiber_new",
            Rt::FiberResume => "rl_fiber_resume",
            Rt::FiberYield => "rl_fiber_yield",
            Rt::FiberCurrent => "rl_fiber_current",
            Rt::FiberAlive => "rl_fiber_alive",
            Rt::ProfileEnter => "rl_profile_enter",
            Rt::ProfileExit => "rl_profile_exit",
        }
    }

    pub(crate) fn params(self) -> &'static [NativeType] {
        match self {
            Rt::MutexNew | Rt::CondvarNew | Rt::FiberCurrent => &[],
            Rt::Alloc | Rt::BoxInt | Rt::QueueNew | Rt::ProfileExit => &[I64],
            Rt::BoxFloat => &[F64],
            Rt::BoxBool => &[I1],
            Rt::Free
            | Rt::UnboxInt
            | Rt::UnboxFloat
            | Rt::Truthy
            | Rt::Neg
            | Rt::ValueHash
            | Rt::StrHash
            | Rt::StrLit
            | Rt::RegisterClass
            | Rt::RaiseValue
            | Rt::Reraise
            | Rt::ThreadNew
            | Rt::ThreadJoin
            | Rt::ThreadValue
            | Rt::MutexLock
            | Rt::MutexUnlock
            | Rt::CondvarSignal
            | Rt::CondvarBroadcast
            | Rt::QueuePop
            | Rt::FiberNew
            | Rt::FiberYield
            | Rt::FiberAlive => &[PTR],
            Rt::CheckClass
            | Rt::ValueEq
            | Rt::StrEq
            | Rt::Raise
            | Rt::ExcMatches
            | Rt::CondvarWait
            | Rt::QueuePush
            | Rt::FiberResume => &[PTR, PTR],
            Rt::ArrayCoerce | Rt::HashCoerce => &[PTR, I64],
            Rt::ProfileEnter => &[I64, PTR],
            Rt::Binop => &[I64, PTR, PTR],
            Rt::ClosureCall => &[PTR, I64, PTR],
            Rt::Protect | Rt::Ensure => &[PTR, PTR, PTR, PTR],
            Rt::Send => &[PTR, PTR, I64, PTR, PTR],
        }
    }

    pub(crate) fn ret(self) -> NativeType {
        match self {
            Rt::Free | Rt::RegisterClass | Rt::ProfileEnter | Rt::ProfileExit => Void,
            Rt::UnboxInt | Rt::ValueHash | Rt::StrHash => I64,
            Rt::UnboxFloat => F64,
            Rt::Truthy | Rt::ValueEq | Rt::StrEq | Rt::ExcMatches | Rt::FiberAlive => I1,
            _ => PTR,
        }
    }

    pub(crate) fn declare(self, module: &mut Module) -> ExternId {
        module.declare_extern(self.name(), self.params(), self.ret())
    }
}

fn kind_type(kind: ValueKind) -> NativeType {
    kind.repr().native_type()
}

/// Declare the runtime entry point of builtin method `b`.
pub(crate) fn declare_builtin(module: &mut Module, b: &BuiltinMethod) -> ExternId {
    let mut params: Vec<NativeType> = b.receiver.map(kind_type).into_iter().collect();
    params.extend(std::iter::repeat(PTR).take(b.arity));
    module.declare_extern(b.entry, &params, kind_type(b.ret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use pretty_assertions::assert_eq;

    #[test]
    fn builtin_externs_follow_receiver_and_result_kinds() {
        let mut module = Module::new("externs");
        let Some(to_f) = builtins::lookup("Integer", "to_f") else {
            panic!("Integer#to_f is a builtin");
        };
        let id = declare_builtin(&mut module, to_f);
        let decl = module.extern_decl(id);
        assert_eq!((decl.sig.params.as_slice(), decl.sig.ret), (&[I64][..], F64));

        let puts = Rt::Send.declare(&mut module);
        assert_eq!(module.extern_decl(puts).sig.params.len(), 5);
    }
}
