//! Execution errors.

use thiserror::Error;

use crate::Word;

/// A failure of the executor itself, or an exception nobody rescued.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    #[error("runtime function `{0}` is not provided by this runtime")]
    UnknownExtern(String),
    #[error("no function named `{0}` in the module")]
    UnknownFunction(String),
    #[error("function `{0}` has no body")]
    MissingBody(String),
    #[error("`{function}` called with {found} arguments, expected {expected}")]
    ArityMismatch {
        function: String,
        expected: usize,
        found: usize,
    },
    #[error("null pointer dereference")]
    NullPointer,
    #[error("access outside allocation {alloc} at byte offset {offset}")]
    OutOfBounds { alloc: u32, offset: i64 },
    #[error("use of freed allocation {0}")]
    UseAfterFree(u32),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("reached unreachable code in `{0}`")]
    Unreachable(String),
    #[error("integer division by zero in generated code")]
    DivisionByZero,
    #[error("guest thread panicked")]
    ThreadPanicked,
    #[error("uncaught {class}: {message}")]
    Uncaught { class: String, message: String },
}

/// Non-local exit from a call.
#[derive(Debug, Clone, PartialEq)]
pub enum Unwind {
    /// A guest exception, carrying the exception value.
    Raise(Word),
    /// An executor fault; never rescued by guest code.
    Fault(ExecError),
}

impl From<ExecError> for Unwind {
    fn from(err: ExecError) -> Self {
        Unwind::Fault(err)
    }
}
