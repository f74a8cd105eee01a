//! Native instructions and terminators.

use smallvec::SmallVec;

use crate::{BlockId, ExternId, FuncId, GlobalId, NativeType, StructId, ValueId};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Const {
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Const {
    pub fn ty(self) -> NativeType {
        match self {
            Const::Int(_) => NativeType::I64,
            Const::Float(_) => NativeType::F64,
            Const::Bool(_) => NativeType::I1,
            Const::Null => NativeType::Ptr,
        }
    }
}

/// Binary operators. Integer operators wrap on overflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    AShr,
    LShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

impl BinOp {
    pub fn is_float(self) -> bool {
        matches!(
            self,
            BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv | BinOp::FRem
        )
    }

    pub fn result_type(self) -> NativeType {
        if self.is_float() {
            NativeType::F64
        } else {
            NativeType::I64
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::SDiv => "sdiv",
            BinOp::SRem => "srem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::AShr => "ashr",
            BinOp::LShr => "lshr",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
            BinOp::FRem => "frem",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpPred {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpPred {
    pub fn mnemonic(self) -> &'static str {
        match self {
            CmpPred::Eq => "eq",
            CmpPred::Ne => "ne",
            CmpPred::Lt => "lt",
            CmpPred::Le => "le",
            CmpPred::Gt => "gt",
            CmpPred::Ge => "ge",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CastOp {
    SiToFp,
    FpToSi,
    BoolToInt,
}

impl CastOp {
    pub fn result_type(self) -> NativeType {
        match self {
            CastOp::SiToFp => NativeType::F64,
            CastOp::FpToSi | CastOp::BoolToInt => NativeType::I64,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            CastOp::SiToFp => "sitofp",
            CastOp::FpToSi => "fptosi",
            CastOp::BoolToInt => "zext",
        }
    }
}

/// Call target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Callee {
    Func(FuncId),
    Extern(ExternId),
    /// Call through a function pointer value.
    Indirect(ValueId),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Inst {
    Const(Const),
    Binary {
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Integer, boolean or pointer compare.
    ICmp {
        pred: CmpPred,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Ordered float compare.
    FCmp {
        pred: CmpPred,
        lhs: ValueId,
        rhs: ValueId,
    },
    Not(ValueId),
    Cast {
        op: CastOp,
        value: ValueId,
    },
    /// Stack slot of `words` words, always placed in the entry block.
    Alloca {
        words: u32,
    },
    Load {
        ty: NativeType,
        ptr: ValueId,
    },
    Store {
        ptr: ValueId,
        value: ValueId,
    },
    /// Pointer plus a byte offset held in an `i64` value.
    PtrAdd {
        base: ValueId,
        offset: ValueId,
    },
    /// Address of a struct field.
    FieldAddr {
        base: ValueId,
        layout: StructId,
        field: u32,
        offset: u32,
    },
    GlobalAddr(GlobalId),
    FuncAddr(FuncId),
    Call {
        callee: Callee,
        args: Vec<ValueId>,
        ret: NativeType,
    },
    Select {
        cond: ValueId,
        on_true: ValueId,
        on_false: ValueId,
    },
}

impl Inst {
    /// Values read by this instruction.
    pub fn operands(&self) -> SmallVec<[ValueId; 4]> {
        let mut out = SmallVec::new();
        match self {
            Inst::Const(_)
            | Inst::Alloca { .. }
            | Inst::GlobalAddr(_)
            | Inst::FuncAddr(_) => {}
            Inst::Binary { lhs, rhs, .. }
            | Inst::ICmp { lhs, rhs, .. }
            | Inst::FCmp { lhs, rhs, .. } => {
                out.push(*lhs);
                out.push(*rhs);
            }
            Inst::Not(v) => out.push(*v),
            Inst::Cast { value, .. } => out.push(*value),
            Inst::Load { ptr, .. } => out.push(*ptr),
            Inst::Store { ptr, value } => {
                out.push(*ptr);
                out.push(*value);
            }
            Inst::PtrAdd { base, offset } => {
                out.push(*base);
                out.push(*offset);
            }
            Inst::FieldAddr { base, .. } => out.push(*base),
            Inst::Call { callee, args, .. } => {
                if let Callee::Indirect(target) = callee {
                    out.push(*target);
                }
                out.extend(args.iter().copied());
            }
            Inst::Select {
                cond,
                on_true,
                on_false,
            } => {
                out.push(*cond);
                out.push(*on_true);
                out.push(*on_false);
            }
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstData {
    pub result: Option<ValueId>,
    pub inst: Inst,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminator {
    Br(BlockId),
    CondBr {
        cond: ValueId,
        then_block: BlockId,
        else_block: BlockId,
    },
    Ret(Option<ValueId>),
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        let mut out = SmallVec::new();
        match self {
            Terminator::Br(target) => out.push(*target),
            Terminator::CondBr {
                then_block,
                else_block,
                ..
            } => {
                out.push(*then_block);
                if else_block != then_block {
                    out.push(*else_block);
                }
            }
            Terminator::Ret(_) | Terminator::Unreachable => {}
        }
        out
    }

    pub fn operands(&self) -> SmallVec<[ValueId; 1]> {
        let mut out = SmallVec::new();
        match self {
            Terminator::CondBr { cond, .. } => out.push(*cond),
            Terminator::Ret(Some(v)) => out.push(*v),
            Terminator::Br(_) | Terminator::Ret(None) | Terminator::Unreachable => {}
        }
        out
    }
}
