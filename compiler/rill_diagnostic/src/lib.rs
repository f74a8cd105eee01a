//! Diagnostics for the Rill code generators.
//!
//! Lowering never stops on these: dynamic dispatch fallbacks, arity
//! mismatches excluded from a vtable and unknown rescue classes are all
//! recorded here and surfaced by the driver as a summary. Fatal problems
//! (broken class hierarchies, malformed IR) are `CodegenError`s in the
//! code generator instead.

mod diagnostic;
mod error_code;
pub mod queue;

pub use diagnostic::{dynamic_dispatch, Diagnostic, Location, Severity};
pub use error_code::ErrorCode;
pub use queue::{DiagnosticQueue, DispatchReport, DynamicSite};
