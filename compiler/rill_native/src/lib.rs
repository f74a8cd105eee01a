//! Native module object for the Rill code generator.
//!
//! A [`Module`] holds a struct-type table, globals, runtime extern
//! declarations and functions made of basic blocks of SSA instructions.
//! It is built with [`FunctionBuilder`], checked with [`verify_module`],
//! laid out with [`layout_blocks`] and rendered with [`print_module`].
//! The `rill_rt` crate executes verified modules.

pub mod abi;
mod builder;
mod ids;
mod inst;
mod layout;
mod module;
mod printer;
mod types;
mod verify;

pub use builder::FunctionBuilder;
pub use ids::{BlockId, ExternId, FuncId, GlobalId, StructId, ValueId};
pub use inst::{BinOp, Callee, CastOp, CmpPred, Const, Inst, InstData, Terminator};
pub use layout::{layout_blocks, reorder_orphans};
pub use module::{
    Block, ConstWord, ExternDecl, FunctionBody, FunctionDecl, FunctionFlags, Global, GlobalInit,
    Module,
};
pub use printer::print_module;
pub use types::{NativeType, Signature, StructField, StructLayout, StructTable, WORD};
pub use verify::{verify_module, VerifyError};
