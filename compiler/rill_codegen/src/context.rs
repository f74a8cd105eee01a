//! Compilation context shared by both target adapters.
//!
//! # Architecture
//!
//! ```text
//! CodegenCx (immutable once built)
//!   ├── ClassRegistry    parent-first class layouts
//!   ├── DescriptorCache  one descriptor per (owner, method)
//!   ├── VtableRegistry   slot tables for polymorphic families
//!   ├── ProbeRegistry    stable probe id per function
//!   └── WellKnown        pre-interned names
//!
//! Findings (owned by each adapter run, merged at the end)
//!   ├── DiagnosticQueue
//!   └── DispatchReport
//! ```

use rill_diagnostic::{
    dynamic_dispatch, Diagnostic, DiagnosticQueue, DispatchReport, DynamicSite, Location,
};
use rill_ir::{Name, Program, StringInterner};
use tracing::debug;

use crate::classes::ClassRegistry;
use crate::descriptor::DescriptorCache;
use crate::options::{CodegenOptions, DispatchNotes};
use crate::probes::ProbeRegistry;
use crate::vtable::VtableRegistry;
use crate::CodegenError;

/// Names the lowerers look up often, interned once.
#[derive(Copy, Clone, Debug)]
pub struct WellKnown {
    pub initialize: Name,
    pub object: Name,
    pub puts: Name,
    pub print: Name,
    pub p: Name,
    pub main: Name,
}

impl WellKnown {
    pub fn new(interner: &StringInterner) -> Self {
        WellKnown {
            initialize: interner.intern("initialize"),
            object: interner.intern(crate::classes::ROOT_CLASS),
            puts: interner.intern("puts"),
            print: interner.intern("print"),
            p: interner.intern("p"),
            main: interner.intern("main"),
        }
    }
}

/// Non-fatal findings of one lowering run.
#[derive(Debug, Default)]
pub struct Findings {
    pub diagnostics: DiagnosticQueue,
    pub report: DispatchReport,
}

impl Findings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a diagnostic; duplicates are dropped.
    pub fn push(&mut self, diagnostic: Diagnostic) -> bool {
        self.diagnostics.push(diagnostic)
    }

    /// Record a dynamic dispatch fallback.
    pub fn dynamic(&mut self, notes: DispatchNotes, class: &str, method: &str, location: Location) {
        let fresh = self.report.record(DynamicSite {
            class: class.to_owned(),
            method: method.to_owned(),
            location: location.clone(),
        });
        if fresh && notes == DispatchNotes::PerSite {
            let _ = self.diagnostics.push(dynamic_dispatch(class, method, location));
        }
    }

    /// Fold `other` into `self`.
    pub fn merge(&mut self, other: Findings) {
        for diagnostic in other.diagnostics.into_vec() {
            let _ = self.diagnostics.push(diagnostic);
        }
        for site in other.report.sites() {
            self.report.record(site.clone());
        }
    }
}

/// Everything the adapters read while lowering one program.
pub struct CodegenCx<'a> {
    pub program: &'a Program,
    pub interner: &'a StringInterner,
    pub options: &'a CodegenOptions,
    pub classes: ClassRegistry,
    pub descriptors: DescriptorCache,
    pub vtables: VtableRegistry,
    pub probes: ProbeRegistry,
    pub names: WellKnown,
}

impl<'a> CodegenCx<'a> {
    /// Register classes and precompute descriptors, vtables and probe ids.
    pub fn new(
        program: &'a Program,
        interner: &'a StringInterner,
        options: &'a CodegenOptions,
        findings: &mut Findings,
    ) -> Result<Self, CodegenError> {
        let classes = ClassRegistry::build(program, interner, findings)?;
        let descriptors = DescriptorCache::build(program, interner, &classes);
        let vtables = VtableRegistry::build(&classes, &descriptors, interner, findings);
        let probes = ProbeRegistry::build(program, &descriptors);
        debug!(
            functions = program.functions.len(),
            classes = classes.len(),
            vtables = vtables.len(),
            "codegen context ready"
        );
        Ok(CodegenCx {
            program,
            interner,
            options,
            classes,
            descriptors,
            vtables,
            probes,
            names: WellKnown::new(interner),
        })
    }

    #[inline]
    pub fn name(&self, name: Name) -> &'static str {
        self.interner.lookup(name)
    }
}
