//! Rill code generator.
//!
//! Lowers a typed [`rill_ir::Program`] to two targets that share one
//! front half:
//!
//! ```text
//!                      ┌── native::lower_program  ──> rill_native::Module
//! Program ─> CodegenCx ┤
//!                      └── managed::lower_program ──> ManagedDocument (JSON)
//! ```
//!
//! [`CodegenCx`] registers classes, computes method descriptors, vtables
//! and probe ids once; both adapters read it and report into the same
//! [`Findings`], so a dispatch site lowered twice is reported once.
//!
//! # Debugging
//!
//! - `RUST_LOG=rill_codegen=debug`: one line per stage with sizes.
//! - `RUST_LOG=rill_codegen=trace`: every class, slot and dispatch decision.

#![allow(
    // Lowering threads context, output, findings and scope through helpers
    clippy::too_many_arguments,
)]

mod builtins;
mod captures;
mod classes;
mod context;
mod descriptor;
mod dispatch;
mod error;
mod exceptions;
mod locals;
pub mod managed;
pub mod native;
mod options;
mod probes;
mod repr;
mod vtable;

use rill_diagnostic::{Diagnostic, DispatchReport};
use rill_ir::{Program, StringInterner};
use rill_native::Module;
use tracing::{debug, info_span};

pub use context::{CodegenCx, Findings};
pub use error::CodegenError;
pub use managed::ManagedDocument;
pub use options::{CodegenOptions, DispatchNotes};

/// Everything one compilation produced.
#[derive(Debug)]
pub struct CodegenOutput {
    /// Verified native module, when requested.
    pub native: Option<Module>,
    /// Managed class document, when requested.
    pub managed: Option<ManagedDocument>,
    /// Diagnostics in source order.
    pub diagnostics: Vec<Diagnostic>,
    /// Every call site that fell back to named dispatch.
    pub report: DispatchReport,
    /// Probe ids and the routines they measure; empty unless instrumenting.
    pub probes: Vec<(i64, String)>,
}

/// Compile `program` for every target `options` asks for.
pub fn compile(
    program: &Program,
    interner: &StringInterner,
    options: &CodegenOptions,
) -> Result<CodegenOutput, CodegenError> {
    let _span = info_span!("compile").entered();
    let mut findings = Findings::new();
    let cx = CodegenCx::new(program, interner, options, &mut findings)?;

    let native = if options.emit_native {
        Some(native::lower_program(&cx, &mut findings)?)
    } else {
        None
    };
    let managed = if options.emit_managed {
        Some(managed::lower_program(&cx, &mut findings)?)
    } else {
        None
    };

    let probes = if options.instrument {
        cx.probes.list()
    } else {
        Vec::new()
    };
    let diagnostics = findings
        .diagnostics
        .sorted()
        .into_iter()
        .cloned()
        .collect::<Vec<_>>();
    debug!(
        diagnostics = diagnostics.len(),
        dynamic_sites = findings.report.sites().len(),
        "compilation finished"
    );
    Ok(CodegenOutput {
        native,
        managed,
        diagnostics,
        report: findings.report,
        probes,
    })
}
