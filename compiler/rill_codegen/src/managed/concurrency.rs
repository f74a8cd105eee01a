//! Threads, mutexes, condition variables, queues and fibers.
//!
//! Every primitive is an object of a runtime class; lowering evaluates the
//! operands and calls the class's static helper.

use rill_ir::{ConcurrencyOp, Operand};

use super::document::Insn;
use super::lowerer::Unit;
use crate::repr::{Repr, Tracked};
use crate::CodegenError;

const THREAD: &str = "rill/rt/RThread";
const MUTEX: &str = "rill/rt/RMutex";
const CONDVAR: &str = "rill/rt/RConditionVariable";
const QUEUE: &str = "rill/rt/RSizedQueue";
const FIBER: &str = "rill/rt/RFiber";

const NEW: &str = "()Ljava/lang/Object;";
const UNARY: &str = "(Ljava/lang/Object;)Ljava/lang/Object;";
const BINARY: &str = "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;";

/// Static helper and the representation of its result.
struct Helper {
    owner: &'static str,
    name: &'static str,
    descriptor: &'static str,
    ret: Repr,
}

const fn helper(owner: &'static str, name: &'static str, descriptor: &'static str) -> Helper {
    Helper {
        owner,
        name,
        descriptor,
        ret: Repr::Boxed,
    }
}

impl Unit<'_, '_> {
    fn nil_or(&mut self, op: Option<&Operand>) -> Result<Tracked<u16>, CodegenError> {
        match op {
            Some(op) => self.operand(op),
            None => Ok(self.nil()),
        }
    }

    pub(super) fn concurrency(&mut self, op: &ConcurrencyOp) -> Result<Repr, CodegenError> {
        let mut args: Vec<(Tracked<u16>, Repr)> = Vec::with_capacity(2);
        let call = match op {
            ConcurrencyOp::ThreadNew { block } => {
                args.push((self.operand(block)?, Repr::Boxed));
                helper(THREAD, "start", UNARY)
            }
            ConcurrencyOp::ThreadJoin { thread } => {
                args.push((self.operand(thread)?, Repr::Boxed));
                helper(THREAD, "join", UNARY)
            }
            ConcurrencyOp::ThreadValue { thread } => {
                args.push((self.operand(thread)?, Repr::Boxed));
                helper(THREAD, "value", UNARY)
            }
            ConcurrencyOp::MutexNew => helper(MUTEX, "create", NEW),
            ConcurrencyOp::MutexLock { mutex } => {
                args.push((self.operand(mutex)?, Repr::Boxed));
                helper(MUTEX, "lock", UNARY)
            }
            ConcurrencyOp::MutexUnlock { mutex } => {
                args.push((self.operand(mutex)?, Repr::Boxed));
                helper(MUTEX, "unlock", UNARY)
            }
            ConcurrencyOp::CondVarNew => helper(CONDVAR, "create", NEW),
            ConcurrencyOp::CondVarWait { condvar, mutex } => {
                args.push((self.operand(condvar)?, Repr::Boxed));
                args.push((self.operand(mutex)?, Repr::Boxed));
                helper(CONDVAR, "wait", BINARY)
            }
            ConcurrencyOp::CondVarSignal { condvar } => {
                args.push((self.operand(condvar)?, Repr::Boxed));
                helper(CONDVAR, "signal", UNARY)
            }
            ConcurrencyOp::CondVarBroadcast { condvar } => {
                args.push((self.operand(condvar)?, Repr::Boxed));
                helper(CONDVAR, "broadcast", UNARY)
            }
            ConcurrencyOp::QueueNew { capacity } => {
                args.push((self.operand(capacity)?, Repr::Int));
                helper(QUEUE, "create", "(J)Ljava/lang/Object;")
            }
            ConcurrencyOp::QueuePush { queue, value } => {
                args.push((self.operand(queue)?, Repr::Boxed));
                args.push((self.operand(value)?, Repr::Boxed));
                helper(QUEUE, "push", BINARY)
            }
            ConcurrencyOp::QueuePop { queue } => {
                args.push((self.operand(queue)?, Repr::Boxed));
                helper(QUEUE, "pop", UNARY)
            }
            ConcurrencyOp::FiberNew { block } => {
                args.push((self.operand(block)?, Repr::Boxed));
                helper(FIBER, "create", UNARY)
            }
            ConcurrencyOp::FiberResume { fiber, value } => {
                args.push((self.operand(fiber)?, Repr::Boxed));
                args.push((self.nil_or(value.as_ref())?, Repr::Boxed));
                helper(FIBER, "resume", BINARY)
            }
            ConcurrencyOp::FiberYield { value } => {
                args.push((self.nil_or(value.as_ref())?, Repr::Boxed));
                helper(FIBER, "yield", UNARY)
            }
            ConcurrencyOp::FiberCurrent => helper(FIBER, "current", NEW),
            ConcurrencyOp::FiberAlive { fiber } => {
                args.push((self.operand(fiber)?, Repr::Boxed));
                Helper {
                    ret: Repr::Bool,
                    ..helper(FIBER, "alive", "(Ljava/lang/Object;)Z")
                }
            }
        };
        for (value, repr) in args {
            self.push(value, repr);
        }
        self.em
            .invoke_static(call.owner, call.name, call.descriptor);
        Ok(call.ret)
    }

    /// Call `RMutex.name(mutex)` and drop the result.
    pub(super) fn mutex_call(&mut self, mutex: Tracked<u16>, name: &str) {
        self.push_boxed(mutex);
        self.em.invoke_static(MUTEX, name, UNARY);
        self.em.emit(Insn::Pop);
    }
}
