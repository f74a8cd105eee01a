//! Threads, mutexes, condition variables, queues and fibers.
//!
//! Every primitive is a runtime object; lowering boxes the operands and
//! calls the matching entry point.

use rill_ir::{ConcurrencyOp, Operand};
use rill_native::ValueId;

use super::lowerer::Unit;
use super::Rt;
use crate::repr::{Repr, Tracked};
use crate::CodegenError;

impl Unit<'_, '_> {
    fn boxed_operand(&mut self, op: &Operand) -> Result<ValueId, CodegenError> {
        self.operand_as(op, Repr::Boxed)
    }

    fn boxed_or_nil(&mut self, op: Option<&Operand>) -> Result<ValueId, CodegenError> {
        match op {
            Some(op) => self.boxed_operand(op),
            None => Ok(self.fb.null()),
        }
    }

    pub(super) fn concurrency(&mut self, op: &ConcurrencyOp) -> Result<Tracked<ValueId>, CodegenError> {
        let (rt, args) = match op {
            ConcurrencyOp::ThreadNew { block } => (Rt::ThreadNew, vec![self.boxed_operand(block)?]),
            ConcurrencyOp::ThreadJoin { thread } => (Rt::ThreadJoin, vec![self.boxed_operand(thread)?]),
            ConcurrencyOp::ThreadValue { thread } => (Rt::ThreadValue, vec![self.boxed_operand(thread)?]),
            ConcurrencyOp::MutexNew => (Rt::MutexNew, Vec::new()),
            ConcurrencyOp::MutexLock { mutex } => (Rt::MutexLock, vec![self.boxed_operand(mutex)?]),
            ConcurrencyOp::MutexUnlock { mutex } => (Rt::MutexUnlock, vec![self.boxed_operand(mutex)?]),
            ConcurrencyOp::CondVarNew => (Rt::CondvarNew, Vec::new()),
            ConcurrencyOp::CondVarWait { condvar, mutex } => {
                let condvar = self.boxed_operand(condvar)?;
                let mutex = self.boxed_operand(mutex)?;
                (Rt::CondvarWait, vec![condvar, mutex])
            }
            ConcurrencyOp::CondVarSignal { condvar } => (Rt::CondvarSignal, vec![self.boxed_operand(condvar)?]),
            ConcurrencyOp::CondVarBroadcast { condvar } => {
                (Rt::CondvarBroadcast, vec![self.boxed_operand(condvar)?])
            }
            ConcurrencyOp::QueueNew { capacity } => (Rt::QueueNew, vec![self.operand_as(capacity, Repr::Int)?]),
            ConcurrencyOp::QueuePush { queue, value } => {
                let queue = self.boxed_operand(queue)?;
                let value = self.boxed_operand(value)?;
                (Rt::QueuePush, vec![queue, value])
            }
            ConcurrencyOp::QueuePop { queue } => (Rt::QueuePop, vec![self.boxed_operand(queue)?]),
            ConcurrencyOp::FiberNew { block } => (Rt::FiberNew, vec![self.boxed_operand(block)?]),
            ConcurrencyOp::FiberResume { fiber, value } => {
                let fiber = self.boxed_operand(fiber)?;
                let value = self.boxed_or_nil(value.as_ref())?;
                (Rt::FiberResume, vec![fiber, value])
            }
            ConcurrencyOp::FiberYield { value } => (Rt::FiberYield, vec![self.boxed_or_nil(value.as_ref())?]),
            ConcurrencyOp::FiberCurrent => (Rt::FiberCurrent, Vec::new()),
            ConcurrencyOp::FiberAlive { fiber } => {
                let fiber = self.boxed_operand(fiber)?;
                return Ok(Tracked {
                    value: self.rt(Rt::FiberAlive, vec![fiber]),
                    repr: Repr::Bool,
                });
            }
        };
        Ok(Tracked {
            value: self.rt(rt, args),
            repr: Repr::Boxed,
        })
    }
}
