//! Blocks, terminators and phi slots.
//!
//! Every phi gets a one-word stack slot. A predecessor stores its incoming
//! value (materialized at the slot's representation) right before jumping,
//! and the phi itself is a load. Conditional edges into a block with phis
//! get their own edge block so each arm stores only its own values.

use rill_ir::{BasicBlock, BindingId, BlockLabel, Body, InstrKind, Operand, Terminator};
use rill_native::{BlockId, ValueId};

use super::lowerer::Unit;
use crate::repr::{Repr, Tracked};
use crate::CodegenError;

impl Unit<'_, '_> {
    /// Lower `body` at the current position. Every exit of the body returns
    /// from the unit.
    pub(super) fn lower_body(&mut self, body: &Body) -> Result<(), CodegenError> {
        let order = body.reverse_postorder();
        if order.is_empty() {
            self.emit_return(None)?;
            return Ok(());
        }
        let saved = std::mem::take(&mut self.labels);

        for label in &order {
            let Some(block) = body.block(*label) else {
                continue;
            };
            let id = self.fb.new_block(&format!("bb{}", label.raw()));
            self.labels.insert(*label, id);
            self.alloc_phi_slots(block);
        }
        let start = self.block_of(order[0])?;
        self.fb.br(start);

        for label in &order {
            let Some(block) = body.block(*label) else {
                continue;
            };
            let id = self.block_of(*label)?;
            self.fb.position_at(id);
            for instr in &block.instrs {
                self.instr(instr)?;
            }
            self.terminator(body, block)?;
        }

        self.labels = saved;
        Ok(())
    }

    fn alloc_phi_slots(&mut self, block: &BasicBlock) {
        for instr in &block.instrs {
            if let (Some(id), InstrKind::Phi { .. }) = (instr.result, &instr.kind) {
                let repr = self.scope.plan.binding(id).unwrap_or(Repr::Boxed);
                let slot = self.fb.alloca(1);
                self.phis.insert(id, (slot, repr));
            }
        }
    }

    fn block_of(&self, label: BlockLabel) -> Result<BlockId, CodegenError> {
        self.labels
            .get(&label)
            .copied()
            .ok_or_else(|| CodegenError::UnknownBlock {
                function: self.scope.function.clone(),
                label: label.raw(),
            })
    }

    fn terminator(&mut self, body: &Body, block: &BasicBlock) -> Result<(), CodegenError> {
        match &block.terminator {
            Terminator::Jump { target } => {
                self.phi_moves(body, block.label, *target)?;
                let dest = self.block_of(*target)?;
                self.fb.br(dest);
            }
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            } => {
                let cond = self.operand_as(cond, Repr::Bool)?;
                let from = self.fb.current_block();
                let on_true = self.edge(body, block.label, *then_block)?;
                let on_false = self.edge(body, block.label, *else_block)?;
                self.fb.position_at(from);
                self.fb.cond_br(cond, on_true, on_false);
            }
            Terminator::Return { value } => self.emit_return(value.as_ref())?,
        }
        Ok(())
    }

    /// Native target of the edge `from → to`, through an edge block when
    /// `to` has phis.
    fn edge(&mut self, body: &Body, from: BlockLabel, to: BlockLabel) -> Result<BlockId, CodegenError> {
        let dest = self.block_of(to)?;
        if !body.has_phis(to) {
            return Ok(dest);
        }
        let edge = self.fb.new_block(&format!("edge{}.{}", from.raw(), to.raw()));
        self.fb.position_at(edge);
        self.phi_moves(body, from, to)?;
        self.fb.br(dest);
        Ok(edge)
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
            let value = self.operand_as(op, repr)?;
            self.fb.store(slot, value);
        }
        Ok(())
    }

    pub(super) fn phi_value(&mut self, result: Option<BindingId>) -> Tracked<ValueId> {
        match result.and_then(|id| self.phis.get(&id).copied()) {
            Some((slot, repr)) => Tracked {
                value: self.fb.load(repr.native_type(), slot),
                repr,
            },
            None => self.nil(),
        }
    }

    /// Return `value` (or the zero of the unit's result) after the exit probe.
    pub(super) fn emit_return(&mut self, value: Option<&Operand>) -> Result<(), CodegenError> {
        let ret_repr = self.ret_repr;
        let v = match value {
            Some(op) => self.operand_as(op, ret_repr)?,
            None => self.zero(ret_repr),
        };
        self.probe_exit();
        self.fb.ret(Some(v));
        Ok(())
    }
}
