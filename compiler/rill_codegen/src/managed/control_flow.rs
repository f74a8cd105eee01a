//! Blocks, terminators and phi locals.
//!
//! Blocks are emitted in reverse postorder behind fresh labels, so a body
//! lowered twice (an `ensure` on both its paths) gets distinct labels.
//! Every phi owns a local that each predecessor writes before jumping.

use rill_ir::{BasicBlock, BindingId, BlockLabel, Body, InstrKind, Operand, Terminator};

use super::document::Insn;
use super::lowerer::{Exit, Unit};
use crate::repr::Repr;
use crate::CodegenError;

impl Unit<'_, '_> {
    /// Lower `body` at the current position; its returns go to `exit`.
    pub(super) fn lower_body(&mut self, body: &Body, exit: Exit) -> Result<(), CodegenError> {
        let saved_exit = std::mem::replace(&mut self.exit, exit);
        let order = body.reverse_postorder();
        if order.is_empty() {
            self.emit_exit(None)?;
            self.exit = saved_exit;
            return Ok(());
        }
        let saved_labels = std::mem::take(&mut self.labels);

        for label in &order {
            let Some(block) = body.block(*label) else {
                continue;
            };
            let name = self.em.label(&format!("bb{}", label.raw()));
            self.labels.insert(*label, name);
            self.alloc_phi_slots(block);
        }

        for label in &order {
            let Some(block) = body.block(*label) else {
                continue;
            };
            let name = self.label_of(*label)?;
            self.em.place(&name);
            for instr in &block.instrs {
                self.instr(instr)?;
            }
            self.terminator(body, block)?;
        }

        self.labels = saved_labels;
        self.exit = saved_exit;
        Ok(())
    }

    fn alloc_phi_slots(&mut self, block: &BasicBlock) {
        for instr in &block.instrs {
            if let (Some(id), InstrKind::Phi { .. }) = (instr.result, &instr.kind) {
                let repr = self.scope.plan.binding(id).unwrap_or(Repr::Boxed);
                let slot = self.em.local(repr);
                self.em.zero(repr);
                self.em.store(slot, repr);
                self.phis.insert(id, (slot, repr));
            }
        }
    }

    fn label_of(&self, label: BlockLabel) -> Result<String, CodegenError> {
        self.labels
            .get(&label)
            .cloned()
            .ok_or_else(|| CodegenError::UnknownBlock {
                function: self.scope.function.clone(),
                label: label.raw(),
            })
    }

    fn terminator(&mut self, body: &Body, block: &BasicBlock) -> Result<(), CodegenError> {
        match &block.terminator {
            Terminator::Jump { target } => {
                self.phi_moves(body, block.label, *target)?;
                let dest = self.label_of(*target)?;
                self.em.goto(&dest);
            }
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            } => {
                self.push_operand(cond, Repr::Bool)?;
                let on_false = if body.has_phis(*else_block) {
                    self.em.label("edge")
                } else {
                    self.label_of(*else_block)?
                };
                self.em.emit(Insn::Ifeq {
                    target: on_false.clone(),
                });
                self.phi_moves(body, block.label, *then_block)?;
                let dest = self.label_of(*then_block)?;
                self.em.goto(&dest);
                if body.has_phis(*else_block) {
                    self.em.place(&on_false);
                    self.phi_moves(body, block.label, *else_block)?;
                    let dest = self.label_of(*else_block)?;
                    self.em.goto(&dest);
                }
            }
            Terminator::Return { value } => self.emit_exit(value.as_ref())?,
        }
        Ok(())
    }

    fn phi_moves(&mut self, body: &Body, from: BlockLabel, to: BlockLabel) -> Result<(), CodegenError> {
        let Some(target) = body.block(to) else {
            return Ok(());
        };
        for instr in &target.instrs {
            let (Some(id), InstrKind::Phi { incoming }) = (instr.result, &instr.kind) else {
                continue;
            };
            let Some((_, op)) = incoming.iter().find(|(label, _)| *label == from) else {
                continue;
            };
            let Some((slot, repr)) = self.phis.get(&id).copied() else {
                continue;
            };
            self.push_operand(op, repr)?;
            self.em.store(slot, repr);
        }
        Ok(())
    }

    /// Push the value of phi `result`.
    pub(super) fn phi_value(&mut self, result: Option<BindingId>) -> Repr {
        match result.and_then(|id| self.phis.get(&id).copied()) {
            Some((slot, repr)) => {
                self.em.load(slot, repr);
                repr
            }
            None => {
                self.em.emit(Insn::AconstNull);
                Repr::Boxed
            }
        }
    }

    /// Leave the current body with `value` (or the zero of the exit).
    pub(super) fn emit_exit(&mut self, value: Option<&Operand>) -> Result<(), CodegenError> {
        match self.exit.clone() {
            Exit::Return => {
                let ret = self.ret_repr;
                match value {
                    Some(op) => self.push_operand(op, ret)?,
                    None => self.em.zero(ret),
                }
                self.probe_exit();
                self.em.ret(ret);
            }
            Exit::Store { slot, done } => {
                match value {
                    Some(op) => self.push_operand(op, Repr::Boxed)?,
                    None => self.em.emit(Insn::AconstNull),
                }
                self.em.store(slot, Repr::Boxed);
                self.em.goto(&done);
            }
            Exit::Discard { done } => {
                if let Some(op) = value {
                    let _ = self.operand(op)?;
                }
                self.em.goto(&done);
            }
        }
        Ok(())
    }
}
