//! Builder for IR bodies.
//!
//! # Design
//!
//! Follows the "position at a block, emit instructions, terminate" pattern.
//! Nested bodies (closure literals, rescue clauses, ensure bodies) are built
//! with [`BodyBuilder::nested`] and folded back with [`BodyBuilder::adopt`],
//! which keeps binding ids unique across the whole function.

use crate::{
    BasicBlock, BinaryOp, BindingId, BlockLabel, Body, CallArgs, InstrKind, Instruction, Literal,
    Name, Operand, Terminator, Ty,
};

struct PendingBlock {
    label: BlockLabel,
    instrs: Vec<Instruction>,
    terminator: Option<Terminator>,
}

/// Builder for an in-progress [`Body`].
pub struct BodyBuilder {
    blocks: Vec<PendingBlock>,
    current: usize,
    next_binding: u32,
    line: Option<u32>,
}

impl BodyBuilder {
    /// Create a builder with an entry block already allocated.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create a builder whose fresh bindings start at `next_binding`.
    pub fn starting_at(next_binding: u32) -> Self {
        BodyBuilder {
            blocks: vec![PendingBlock {
                label: BlockLabel::new(0),
                instrs: Vec::new(),
                terminator: None,
            }],
            current: 0,
            next_binding,
            line: None,
        }
    }

    /// Start a nested body sharing this builder's binding space.
    pub fn nested(&self) -> BodyBuilder {
        let mut inner = Self::starting_at(self.next_binding);
        inner.line = self.line;
        inner
    }

    /// Finish a nested body and continue numbering after its bindings.
    pub fn adopt(&mut self, nested: BodyBuilder) -> Body {
        self.next_binding = self.next_binding.max(nested.next_binding);
        nested.finish()
    }

    pub fn next_binding(&self) -> u32 {
        self.next_binding
    }

    /// Source line attached to subsequently emitted instructions.
    pub fn set_line(&mut self, line: Option<u32>) {
        self.line = line;
    }

    pub fn new_block(&mut self) -> BlockLabel {
        let label = BlockLabel::new(u32::try_from(self.blocks.len()).unwrap_or(u32::MAX));
        self.blocks.push(PendingBlock {
            label,
            instrs: Vec::new(),
            terminator: None,
        });
        label
    }

    pub fn position_at(&mut self, label: BlockLabel) {
        debug_assert!(label.index() < self.blocks.len());
        self.current = label.index();
    }

    pub fn current_block(&self) -> BlockLabel {
        self.blocks[self.current].label
    }

    pub fn is_terminated(&self) -> bool {
        self.blocks[self.current].terminator.is_some()
    }

    pub fn fresh_binding(&mut self) -> BindingId {
        let id = BindingId::new(self.next_binding);
        self.next_binding += 1;
        id
    }

    /// Emit an instruction with a fresh result binding.
    pub fn emit(&mut self, ty: Ty, kind: InstrKind) -> BindingId {
        let id = self.fresh_binding();
        self.push(Instruction::new(Some(id), ty, kind));
        id
    }

    /// Emit an instruction whose result is not needed.
    pub fn emit_void(&mut self, kind: InstrKind) {
        self.push(Instruction::new(None, Ty::Nil, kind));
    }

    fn push(&mut self, mut instr: Instruction) {
        debug_assert!(!self.is_terminated(), "emitting into a terminated block");
        if instr.line.is_none() {
            instr.line = self.line;
        }
        self.blocks[self.current].instrs.push(instr);
    }

    pub fn int(&mut self, value: i64) -> BindingId {
        self.emit(Ty::Int, InstrKind::Literal(Literal::Int(value)))
    }

    pub fn float(&mut self, value: f64) -> BindingId {
        self.emit(Ty::Float, InstrKind::Literal(Literal::Float(value)))
    }

    pub fn bool(&mut self, value: bool) -> BindingId {
        self.emit(Ty::Bool, InstrKind::Literal(Literal::Bool(value)))
    }

    pub fn nil(&mut self) -> BindingId {
        self.emit(Ty::Nil, InstrKind::Literal(Literal::Nil))
    }

    pub fn str(&mut self, value: &str) -> BindingId {
        self.emit(Ty::Str, InstrKind::Literal(Literal::Str(value.to_owned())))
    }

    pub fn load(&mut self, name: Name, ty: Ty) -> BindingId {
        self.emit(ty, InstrKind::LoadLocal { name })
    }

    pub fn store(&mut self, name: Name, value: BindingId) {
        self.emit_void(InstrKind::StoreLocal {
            name,
            value: value.into(),
        });
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: BindingId, rhs: BindingId, ty: Ty) -> BindingId {
        self.emit(
            ty,
            InstrKind::Binary {
                op,
                lhs: lhs.into(),
                rhs: rhs.into(),
            },
        )
    }

    pub fn call(&mut self, name: Name, args: &[BindingId], ty: Ty) -> BindingId {
        self.emit(
            ty,
            InstrKind::Call {
                name,
                args: CallArgs::positional(args.iter().map(|a| Operand::from(*a))),
            },
        )
    }

    pub fn method_call(
        &mut self,
        receiver: BindingId,
        method: Name,
        args: &[BindingId],
        ty: Ty,
    ) -> BindingId {
        self.emit(
            ty,
            InstrKind::MethodCall {
                receiver: receiver.into(),
                method,
                args: CallArgs::positional(args.iter().map(|a| Operand::from(*a))),
            },
        )
    }

    pub fn new_object(&mut self, class: Name, args: &[BindingId]) -> BindingId {
        self.emit(
            Ty::Class(class),
            InstrKind::New {
                class,
                args: CallArgs::positional(args.iter().map(|a| Operand::from(*a))),
            },
        )
    }

    pub fn phi(&mut self, ty: Ty, incoming: &[(BlockLabel, BindingId)]) -> BindingId {
        self.emit(
            ty,
            InstrKind::Phi {
                incoming: incoming
                    .iter()
                    .map(|(label, value)| (*label, Operand::from(*value)))
                    .collect(),
            },
        )
    }

    /// `puts value` through the Kernel builtin.
    pub fn puts(&mut self, puts: Name, value: BindingId) {
        self.emit_void(InstrKind::Call {
            name: puts,
            args: CallArgs::positional([Operand::from(value)]),
        });
    }

    fn terminate(&mut self, terminator: Terminator) {
        debug_assert!(!self.is_terminated(), "block terminated twice");
        self.blocks[self.current].terminator = Some(terminator);
    }

    pub fn jump(&mut self, target: BlockLabel) {
        self.terminate(Terminator::Jump { target });
    }

    pub fn branch(&mut self, cond: BindingId, then_block: BlockLabel, else_block: BlockLabel) {
        self.terminate(Terminator::Branch {
            cond: cond.into(),
            then_block,
            else_block,
        });
    }

    pub fn ret(&mut self, value: Option<BindingId>) {
        self.terminate(Terminator::Return {
            value: value.map(Operand::from),
        });
    }

    /// Consume the builder. Unterminated blocks return nil.
    pub fn finish(self) -> Body {
        Body {
            blocks: self
                .blocks
                .into_iter()
                .map(|b| BasicBlock {
                    label: b.label,
                    instrs: b.instrs,
                    terminator: b.terminator.unwrap_or(Terminator::Return { value: None }),
                })
                .collect(),
        }
    }
}

impl Default for BodyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
