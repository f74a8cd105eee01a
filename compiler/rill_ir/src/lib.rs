//! Rill IR: the typed, basic-block structured program representation that
//! the code generators consume.
//!
//! # Contract
//!
//! - Every basic block ends in exactly one terminator.
//! - Every instruction with a result binding has a binding id unique within
//!   its function (nested bodies included).
//! - Class field and method types are either resolved or [`Ty::Dynamic`].
//!
//! Code generators read the IR; they never mutate it.

mod builder;
mod function;
mod ids;
mod instr;
mod name;
mod program;
mod ty;
pub mod walk;

pub use builder::BodyBuilder;
pub use function::{BasicBlock, Body, ClassType, FieldDecl, Function, Param, ParamKind};
pub use ids::{BindingId, BlockLabel};
pub use instr::{
    BeginBlock, BinaryOp, CallArgs, ClosureLiteral, ConcurrencyOp, InstrKind, Instruction,
    Literal, Operand, RescueClause, Terminator, UnaryOp,
};
pub use name::{Name, StringInterner};
pub use program::{load_program, save_program, IrError, Program, ProgramDocument};
pub use ty::Ty;
