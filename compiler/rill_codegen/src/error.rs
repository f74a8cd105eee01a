//! Fatal code generation errors.

use rill_native::VerifyError;
use thiserror::Error;

/// Problems that stop compilation.
///
/// Everything recoverable (dynamic dispatch fallbacks, arity mismatches
/// excluded from a vtable, unknown rescue classes) is a diagnostic instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    #[error("class `{class}` extends unknown class `{superclass}`")]
    UnknownSuperclass { class: String, superclass: String },
    #[error("inheritance cycle through class `{class}`")]
    InheritanceCycle { class: String },
    #[error("class `{class}` is declared more than once")]
    DuplicateClass { class: String },
    #[error("method `{method}` is defined for unknown class `{class}`")]
    MethodForUnknownClass { class: String, method: String },
    #[error("{function}: `new` of unknown class `{class}`")]
    UnknownClass { function: String, class: String },
    #[error("{function}: jump to unknown block bb{label}")]
    UnknownBlock { function: String, label: u32 },
    #[error("{function}: use of undefined binding %{binding}")]
    UndefinedBinding { function: String, binding: u32 },
    #[error("native module failed verification: {}", render_verify(.0))]
    Verify(Vec<VerifyError>),
}

fn render_verify(errors: &[VerifyError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
