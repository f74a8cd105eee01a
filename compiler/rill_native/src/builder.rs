//! Function builder.
//!
//! # Design
//!
//! "Position at a block, emit, terminate." Emitting into a block that is
//! already terminated opens a fresh (unreachable) block first, so lowering
//! code never has to check whether a `raise` or `return` already closed the
//! current block. Stack slots are collected separately and hoisted to the
//! top of the entry block by [`FunctionBuilder::finish`].
//!
//! | Category | Methods |
//! |----------|---------|
//! | Constants | `iconst`, `fconst`, `bconst`, `null` |
//! | Arithmetic | `binary`, `icmp`, `fcmp`, `not`, `cast`, `select` |
//! | Memory | `alloca`, `load`, `store`, `ptr_add`, `field_addr`, `load_field`, `store_field` |
//! | Addresses | `global_addr`, `func_addr` |
//! | Calls | `call` |
//! | Control flow | `br`, `cond_br`, `ret`, `unreachable` |

use crate::{
    BinOp, Block, BlockId, Callee, CastOp, CmpPred, Const, FunctionBody, GlobalId, Inst,
    InstData, NativeType, Signature, StructId, StructTable, Terminator, ValueId, FuncId, WORD,
};

pub struct FunctionBuilder {
    params: u32,
    blocks: Vec<Block>,
    value_types: Vec<NativeType>,
    current: BlockId,
    entry_allocas: Vec<InstData>,
}

impl FunctionBuilder {
    pub fn new(sig: &Signature) -> Self {
        let params = u32::try_from(sig.params.len()).unwrap_or(u32::MAX);
        FunctionBuilder {
            params,
            blocks: vec![Block {
                id: BlockId::ENTRY,
                name: "entry".to_owned(),
                insts: Vec::new(),
                terminator: None,
            }],
            value_types: sig.params.clone(),
            current: BlockId::ENTRY,
            entry_allocas: Vec::new(),
        }
    }

    pub fn param(&self, index: u32) -> ValueId {
        debug_assert!(index < self.params, "parameter index out of range");
        ValueId::new(index)
    }

    pub fn value_type(&self, value: ValueId) -> NativeType {
        self.value_types
            .get(value.index())
            .copied()
            .unwrap_or(NativeType::Void)
    }

    // -- Blocks --

    pub fn new_block(&mut self, name: &str) -> BlockId {
        let id = BlockId::from_len(self.blocks.len());
        self.blocks.push(Block {
            id,
            name: name.to_owned(),
            insts: Vec::new(),
            terminator: None,
        });
        id
    }

    pub fn position_at(&mut self, block: BlockId) {
        debug_assert!(block.index() < self.blocks.len());
        self.current = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn is_terminated(&self) -> bool {
        self.blocks[self.current.index()].terminator.is_some()
    }

    fn fresh_value(&mut self, ty: NativeType) -> ValueId {
        let id = ValueId::from_len(self.value_types.len());
        self.value_types.push(ty);
        id
    }

    fn push(&mut self, result: Option<ValueId>, inst: Inst) {
        if self.is_terminated() {
            let dead = self.new_block("dead");
            self.current = dead;
        }
        self.blocks[self.current.index()]
            .insts
            .push(InstData { result, inst });
    }

    fn emit(&mut self, ty: NativeType, inst: Inst) -> ValueId {
        let id = self.fresh_value(ty);
        self.push(Some(id), inst);
        id
    }

    // -- Constants --

    pub fn iconst(&mut self, value: i64) -> ValueId {
        self.emit(NativeType::I64, Inst::Const(Const::Int(value)))
    }

    pub fn fconst(&mut self, value: f64) -> ValueId {
        self.emit(NativeType::F64, Inst::Const(Const::Float(value)))
    }

    pub fn bconst(&mut self, value: bool) -> ValueId {
        self.emit(NativeType::I1, Inst::Const(Const::Bool(value)))
    }

    pub fn null(&mut self) -> ValueId {
        self.emit(NativeType::Ptr, Inst::Const(Const::Null))
    }

    // -- Arithmetic --

    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.emit(op.result_type(), Inst::Binary { op, lhs, rhs })
    }

    pub fn icmp(&mut self, pred: CmpPred, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.emit(NativeType::I1, Inst::ICmp { pred, lhs, rhs })
    }

    pub fn fcmp(&mut self, pred: CmpPred, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.emit(NativeType::I1, Inst::FCmp { pred, lhs, rhs })
    }

    pub fn not(&mut self, value: ValueId) -> ValueId {
        self.emit(NativeType::I1, Inst::Not(value))
    }

    pub fn cast(&mut self, op: CastOp, value: ValueId) -> ValueId {
        self.emit(op.result_type(), Inst::Cast { op, value })
    }

    pub fn select(&mut self, cond: ValueId, on_true: ValueId, on_false: ValueId) -> ValueId {
        let ty = self.value_type(on_true);
        self.emit(
            ty,
            Inst::Select {
                cond,
                on_true,
                on_false,
            },
        )
    }

    // -- Memory --

    /// Stack slot of `words` words, hoisted to the entry block.
    pub fn alloca(&mut self, words: u32) -> ValueId {
        let id = self.fresh_value(NativeType::Ptr);
        self.entry_allocas.push(InstData {
            result: Some(id),
            inst: Inst::Alloca { words },
        });
        id
    }

    pub fn load(&mut self, ty: NativeType, ptr: ValueId) -> ValueId {
        self.emit(ty, Inst::Load { ty, ptr })
    }

    pub fn store(&mut self, ptr: ValueId, value: ValueId) {
        self.push(None, Inst::Store { ptr, value });
    }

    pub fn ptr_add(&mut self, base: ValueId, offset: ValueId) -> ValueId {
        self.emit(NativeType::Ptr, Inst::PtrAdd { base, offset })
    }

    /// `base + index * WORD`.
    pub fn word_addr(&mut self, base: ValueId, index: ValueId) -> ValueId {
        let scale = self.iconst(i64::from(WORD));
        let offset = self.binary(BinOp::Mul, index, scale);
        self.ptr_add(base, offset)
    }

    pub fn field_addr(
        &mut self,
        structs: &StructTable,
        base: ValueId,
        layout: StructId,
        field: u32,
    ) -> ValueId {
        let offset = structs
            .get(layout)
            .field(field)
            .map_or(field * WORD, |f| f.offset);
        self.emit(
            NativeType::Ptr,
            Inst::FieldAddr {
                base,
                layout,
                field,
                offset,
            },
        )
    }

    pub fn load_field(
        &mut self,
        structs: &StructTable,
        base: ValueId,
        layout: StructId,
        field: u32,
    ) -> ValueId {
        let ty = structs
            .get(layout)
            .field(field)
            .map_or(NativeType::I64, |f| f.ty);
        let addr = self.field_addr(structs, base, layout, field);
        self.load(ty, addr)
    }

    pub fn store_field(
        &mut self,
        structs: &StructTable,
        base: ValueId,
        layout: StructId,
        field: u32,
        value: ValueId,
    ) {
        let addr = self.field_addr(structs, base, layout, field);
        self.store(addr, value);
    }

    // -- Addresses --

    pub fn global_addr(&mut self, global: GlobalId) -> ValueId {
        self.emit(NativeType::Ptr, Inst::GlobalAddr(global))
    }

    pub fn func_addr(&mut self, func: FuncId) -> ValueId {
        self.emit(NativeType::Ptr, Inst::FuncAddr(func))
    }

    // -- Calls --

    /// Emit a call. Calls returning `void` still produce a (`void`-typed)
    /// value id that must not be used as an operand.
    pub fn call(&mut self, callee: Callee, args: Vec<ValueId>, ret: NativeType) -> ValueId {
        self.emit(ret, Inst::Call { callee, args, ret })
    }

    // -- Terminators --

    fn terminate(&mut self, terminator: Terminator) {
        let block = &mut self.blocks[self.current.index()];
        if block.terminator.is_none() {
            block.terminator = Some(terminator);
        }
    }

    pub fn br(&mut self, target: BlockId) {
        self.terminate(Terminator::Br(target));
    }

    pub fn cond_br(&mut self, cond: ValueId, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::CondBr {
            cond,
            then_block,
            else_block,
        });
    }

    pub fn ret(&mut self, value: Option<ValueId>) {
        self.terminate(Terminator::Ret(value));
    }

    pub fn unreachable(&mut self) {
        self.terminate(Terminator::Unreachable);
    }

    /// Finish the body. Blocks left open end in `unreachable`.
    pub fn finish(mut self) -> FunctionBody {
        for block in &mut self.blocks {
            if block.terminator.is_none() {
                block.terminator = Some(Terminator::Unreachable);
            }
        }
        if !self.entry_allocas.is_empty() {
            let entry = &mut self.blocks[BlockId::ENTRY.index()];
            let mut insts = std::mem::take(&mut self.entry_allocas);
            insts.append(&mut entry.insts);
            entry.insts = insts;
        }
        let layout = self.blocks.iter().map(|b| b.id).collect();
        FunctionBody {
            params: self.params,
            blocks: self.blocks,
            value_types: self.value_types,
            layout,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn allocas_are_hoisted_to_entry() {
        let sig = Signature::new(vec![NativeType::I64], NativeType::I64);
        let mut b = FunctionBuilder::new(&sig);
        let next = b.new_block("next");
        b.br(next);
        b.position_at(next);
        let slot = b.alloca(1);
        b.store(slot, b.param(0));
        let v = b.load(NativeType::I64, slot);
        b.ret(Some(v));
        let body = b.finish();
        assert!(matches!(
            body.blocks[0].insts[0].inst,
            Inst::Alloca { words: 1 }
        ));
        assert_eq!(body.blocks[1].insts.len(), 2);
    }

    #[test]
    fn emitting_after_terminator_opens_dead_block() {
        let sig = Signature::new(vec![], NativeType::Void);
        let mut b = FunctionBuilder::new(&sig);
        b.ret(None);
        let _ = b.iconst(1);
        b.br(BlockId::ENTRY);
        let body = b.finish();
        assert_eq!(body.blocks.len(), 2);
        assert_eq!(body.blocks[1].name, "dead");
        assert_eq!(body.blocks[0].terminator, Some(Terminator::Ret(None)));
    }

    #[test]
    fn second_terminator_is_ignored() {
        let sig = Signature::new(vec![], NativeType::Void);
        let mut b = FunctionBuilder::new(&sig);
        b.unreachable();
        b.ret(None);
        let body = b.finish();
        assert_eq!(body.blocks[0].terminator, Some(Terminator::Unreachable));
    }
}
