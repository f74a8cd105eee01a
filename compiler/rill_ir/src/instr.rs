//! Instructions, operands and terminators.
//!
//! # Design
//!
//! Instructions are immutable once the frontend produces them. An operand
//! is either a reference to an earlier SSA binding or an inline instruction
//! (an expression tree evaluated at the use site). Structured constructs
//! that need their own control flow (`Begin`, `Synchronize`, closure
//! literals) carry nested [`Body`] values; a `Return` terminator inside a
//! nested body produces that body's value.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{BindingId, BlockLabel, Body, Name, Param, Ty};

/// Literal constant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
    Str(String),
}

/// Binary operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinaryOp {
    #[inline]
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    #[inline]
    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr
        )
    }

    /// Source-level method name of the operator, used by named dispatch.
    pub fn method_name(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Instruction operand.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Binding(BindingId),
    Inline(Box<Instruction>),
}

impl Operand {
    #[inline]
    pub fn binding(&self) -> Option<BindingId> {
        match self {
            Operand::Binding(id) => Some(*id),
            Operand::Inline(_) => None,
        }
    }

    /// Static type of the operand when it is an inline instruction.
    pub fn inline_ty(&self) -> Option<&Ty> {
        match self {
            Operand::Inline(instr) => Some(&instr.ty),
            Operand::Binding(_) => None,
        }
    }
}

impl From<BindingId> for Operand {
    fn from(id: BindingId) -> Self {
        Operand::Binding(id)
    }
}

impl From<Instruction> for Operand {
    fn from(instr: Instruction) -> Self {
        Operand::Inline(Box::new(instr))
    }
}

/// Arguments of a call site.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    pub positional: Vec<Operand>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<(Name, Operand)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<Operand>,
}

impl CallArgs {
    pub fn positional(args: impl IntoIterator<Item = Operand>) -> Self {
        CallArgs {
            positional: args.into_iter().collect(),
            keywords: Vec::new(),
            block: None,
        }
    }

    #[must_use]
    pub fn with_keyword(mut self, name: Name, value: Operand) -> Self {
        self.keywords.push((name, value));
        self
    }

    #[must_use]
    pub fn with_block(mut self, block: Operand) -> Self {
        self.block = Some(block);
        self
    }

    fn operands(&self) -> impl Iterator<Item = &Operand> {
        self.positional
            .iter()
            .chain(self.keywords.iter().map(|(_, op)| op))
            .chain(self.block.iter())
    }
}

/// A block or lambda literal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClosureLiteral {
    pub params: Vec<Param>,
    pub body: Body,
}

/// One `rescue` clause. An empty class list rescues `StandardError`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RescueClause {
    pub classes: Vec<Name>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<Name>,
    pub body: Body,
}

/// Structured `begin`/`rescue`/`else`/`ensure`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeginBlock {
    pub body: Body,
    #[serde(default)]
    pub rescues: Vec<RescueClause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub else_body: Option<Body>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensure: Option<Body>,
}

/// Concurrency primitives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ConcurrencyOp {
    ThreadNew { block: Operand },
    ThreadJoin { thread: Operand },
    ThreadValue { thread: Operand },
    MutexNew,
    MutexLock { mutex: Operand },
    MutexUnlock { mutex: Operand },
    CondVarNew,
    CondVarWait { condvar: Operand, mutex: Operand },
    CondVarSignal { condvar: Operand },
    CondVarBroadcast { condvar: Operand },
    QueueNew { capacity: Operand },
    QueuePush { queue: Operand, value: Operand },
    QueuePop { queue: Operand },
    FiberNew { block: Operand },
    FiberResume { fiber: Operand, value: Option<Operand> },
    FiberYield { value: Option<Operand> },
    FiberCurrent,
    FiberAlive { fiber: Operand },
}

impl ConcurrencyOp {
    fn operands(&self) -> SmallVec<[&Operand; 2]> {
        let mut out = SmallVec::new();
        match self {
            ConcurrencyOp::ThreadNew { block } | ConcurrencyOp::FiberNew { block } => {
                out.push(block);
            }
            ConcurrencyOp::ThreadJoin { thread } | ConcurrencyOp::ThreadValue { thread } => {
                out.push(thread);
            }
            ConcurrencyOp::MutexLock { mutex } | ConcurrencyOp::MutexUnlock { mutex } => {
                out.push(mutex);
            }
            ConcurrencyOp::CondVarWait { condvar, mutex } => {
                out.push(condvar);
                out.push(mutex);
            }
            ConcurrencyOp::CondVarSignal { condvar }
            | ConcurrencyOp::CondVarBroadcast { condvar } => out.push(condvar),
            ConcurrencyOp::QueueNew { capacity } => out.push(capacity),
            ConcurrencyOp::QueuePush { queue, value } => {
                out.push(queue);
                out.push(value);
            }
            ConcurrencyOp::QueuePop { queue } => out.push(queue),
            ConcurrencyOp::FiberResume { fiber, value } => {
                out.push(fiber);
                out.extend(value.iter());
            }
            ConcurrencyOp::FiberYield { value } => out.extend(value.iter()),
            ConcurrencyOp::FiberAlive { fiber } => out.push(fiber),
            ConcurrencyOp::MutexNew | ConcurrencyOp::CondVarNew | ConcurrencyOp::FiberCurrent => {}
        }
        out
    }
}

/// Operation performed by an instruction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum InstrKind {
    Literal(Literal),
    LoadLocal {
        name: Name,
    },
    StoreLocal {
        name: Name,
        value: Operand,
    },
    Binary {
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
    },
    Unary {
        op: UnaryOp,
        operand: Operand,
    },
    /// Call of a top-level routine (or a `Kernel` builtin).
    Call {
        name: Name,
        args: CallArgs,
    },
    MethodCall {
        receiver: Operand,
        method: Name,
        args: CallArgs,
    },
    New {
        class: Name,
        args: CallArgs,
    },
    SelfRef,
    GetField {
        object: Operand,
        field: Name,
    },
    SetField {
        object: Operand,
        field: Name,
        value: Operand,
    },
    ArrayLit {
        elements: Vec<Operand>,
    },
    ArrayGet {
        array: Operand,
        index: Operand,
    },
    ArraySet {
        array: Operand,
        index: Operand,
        value: Operand,
    },
    ArrayPush {
        array: Operand,
        value: Operand,
    },
    ArrayPop {
        array: Operand,
    },
    ArrayLen {
        array: Operand,
    },
    ArrayEach {
        array: Operand,
        block: Operand,
    },
    HashLit {
        entries: Vec<(Operand, Operand)>,
    },
    HashGet {
        hash: Operand,
        key: Operand,
    },
    HashSet {
        hash: Operand,
        key: Operand,
        value: Operand,
    },
    HashDelete {
        hash: Operand,
        key: Operand,
    },
    HashLen {
        hash: Operand,
    },
    HashHasKey {
        hash: Operand,
        key: Operand,
    },
    HashKeys {
        hash: Operand,
    },
    HashValues {
        hash: Operand,
    },
    HashEach {
        hash: Operand,
        block: Operand,
    },
    Closure(ClosureLiteral),
    CallClosure {
        closure: Operand,
        args: Vec<Operand>,
    },
    /// Invoke the enclosing function's block parameter.
    Yield {
        args: Vec<Operand>,
    },
    Phi {
        incoming: Vec<(BlockLabel, Operand)>,
    },
    Begin(BeginBlock),
    Raise {
        class: Name,
        message: Option<Operand>,
    },
    /// Re-raise an exception value (e.g. one bound by a rescue clause).
    RaiseValue {
        exception: Operand,
    },
    IsNil {
        value: Operand,
    },
    Synchronize {
        mutex: Operand,
        body: Body,
    },
    Concurrency(ConcurrencyOp),
}

/// A typed instruction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<BindingId>,
    pub ty: Ty,
    pub kind: InstrKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Instruction {
    pub fn new(result: Option<BindingId>, ty: Ty, kind: InstrKind) -> Self {
        Instruction {
            result,
            ty,
            kind,
            line: None,
        }
    }

    /// An instruction without a result binding, for use as an inline operand.
    pub fn inline(ty: Ty, kind: InstrKind) -> Self {
        Instruction::new(None, ty, kind)
    }

    #[must_use]
    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Direct operands, in evaluation order. Nested bodies are not included.
    pub fn operands(&self) -> SmallVec<[&Operand; 4]> {
        let mut out: SmallVec<[&Operand; 4]> = SmallVec::new();
        match &self.kind {
            InstrKind::Literal(_)
            | InstrKind::LoadLocal { .. }
            | InstrKind::SelfRef
            | InstrKind::Closure(_)
            | InstrKind::Begin(_) => {}
            InstrKind::StoreLocal { value, .. } => out.push(value),
            InstrKind::Binary { lhs, rhs, .. } => {
                out.push(lhs);
                out.push(rhs);
            }
            InstrKind::Unary { operand, .. } => out.push(operand),
            InstrKind::Call { args, .. } | InstrKind::New { args, .. } => {
                out.extend(args.operands());
            }
            InstrKind::MethodCall { receiver, args, .. } => {
                out.push(receiver);
                out.extend(args.operands());
            }
            InstrKind::GetField { object, .. } => out.push(object),
            InstrKind::SetField { object, value, .. } => {
                out.push(object);
                out.push(value);
            }
            InstrKind::ArrayLit { elements } => out.extend(elements.iter()),
            InstrKind::ArrayGet { array, index } => {
                out.push(array);
                out.push(index);
            }
            InstrKind::ArraySet {
                array,
                index,
                value,
            } => {
                out.push(array);
                out.push(index);
                out.push(value);
            }
            InstrKind::ArrayPush { array, value } => {
                out.push(array);
                out.push(value);
            }
            InstrKind::ArrayPop { array } | InstrKind::ArrayLen { array } => out.push(array),
            InstrKind::ArrayEach { array, block } => {
                out.push(array);
                out.push(block);
            }
            InstrKind::HashLit { entries } => {
                for (key, value) in entries {
                    out.push(key);
                    out.push(value);
                }
            }
            InstrKind::HashGet { hash, key }
            | InstrKind::HashDelete { hash, key }
            | InstrKind::HashHasKey { hash, key } => {
                out.push(hash);
                out.push(key);
            }
            InstrKind::HashSet { hash, key, value } => {
                out.push(hash);
                out.push(key);
                out.push(value);
            }
            InstrKind::HashLen { hash }
            | InstrKind::HashKeys { hash }
            | InstrKind::HashValues { hash } => out.push(hash),
            InstrKind::HashEach { hash, block } => {
                out.push(hash);
                out.push(block);
            }
            InstrKind::CallClosure { closure, args } => {
                out.push(closure);
                out.extend(args.iter());
            }
            InstrKind::Yield { args } => out.extend(args.iter()),
            InstrKind::Phi { incoming } => out.extend(incoming.iter().map(|(_, op)| op)),
            InstrKind::Raise { message, .. } => out.extend(message.iter()),
            InstrKind::RaiseValue { exception } => out.push(exception),
            InstrKind::IsNil { value } => out.push(value),
            InstrKind::Synchronize { mutex, .. } => out.push(mutex),
            InstrKind::Concurrency(op) => out.extend(op.operands()),
        }
        out
    }

    /// Nested bodies that share this function's locals.
    pub fn regions(&self) -> SmallVec<[&Body; 4]> {
        let mut out: SmallVec<[&Body; 4]> = SmallVec::new();
        match &self.kind {
            InstrKind::Begin(begin) => {
                out.push(&begin.body);
                out.extend(begin.rescues.iter().map(|r| &r.body));
                out.extend(begin.else_body.iter());
                out.extend(begin.ensure.iter());
            }
            InstrKind::Synchronize { body, .. } => out.push(body),
            _ => {}
        }
        out
    }

    /// The closure literal carried by this instruction, if any.
    pub fn closure(&self) -> Option<&ClosureLiteral> {
        match &self.kind {
            InstrKind::Closure(closure) => Some(closure),
            _ => None,
        }
    }

    /// The local name this instruction writes, if any.
    pub fn stored_name(&self) -> Option<Name> {
        match &self.kind {
            InstrKind::StoreLocal { name, .. } => Some(*name),
            _ => None,
        }
    }

    /// The local name this instruction reads, if any.
    pub fn loaded_name(&self) -> Option<Name> {
        match &self.kind {
            InstrKind::LoadLocal { name } => Some(*name),
            _ => None,
        }
    }
}

/// Block terminator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    Branch {
        cond: Operand,
        then_block: BlockLabel,
        else_block: BlockLabel,
    },
    Jump {
        target: BlockLabel,
    },
    Return {
        value: Option<Operand>,
    },
}

impl Terminator {
    pub fn operands(&self) -> SmallVec<[&Operand; 1]> {
        let mut out = SmallVec::new();
        match self {
            Terminator::Branch { cond, .. } => out.push(cond),
            Terminator::Return { value } => out.extend(value.iter()),
            Terminator::Jump { .. } => {}
        }
        out
    }

    pub fn successors(&self) -> SmallVec<[BlockLabel; 2]> {
        let mut out = SmallVec::new();
        match self {
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => {
                out.push(*then_block);
                if else_block != then_block {
                    out.push(*else_block);
                }
            }
            Terminator::Jump { target } => out.push(*target),
            Terminator::Return { .. } => {}
        }
        out
    }
}
