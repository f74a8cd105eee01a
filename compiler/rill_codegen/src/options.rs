//! Code generator configuration.

/// How much the dispatch lowerer says about dynamic dispatch fallbacks.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DispatchNotes {
    /// Only the dispatch report records fallbacks.
    Quiet,
    /// Every fallback is also pushed as an `E5001` note.
    #[default]
    PerSite,
}

/// Options for one compilation.
#[derive(Clone, Debug)]
pub struct CodegenOptions {
    /// Lower to a native module.
    pub emit_native: bool,
    /// Lower to a managed bytecode document.
    pub emit_managed: bool,
    /// Insert profiling probes into every user function.
    pub instrument: bool,
    /// Internal name of the managed class holding top-level routines.
    pub main_class: String,
    /// Class-file major version written into the managed document.
    pub class_version: u32,
    pub dispatch_notes: DispatchNotes,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            emit_native: true,
            emit_managed: false,
            instrument: false,
            main_class: String::from("RillMain"),
            class_version: 52,
            dispatch_notes: DispatchNotes::default(),
        }
    }
}

impl CodegenOptions {
    /// Options that produce both outputs.
    #[must_use]
    pub fn both() -> Self {
        CodegenOptions {
            emit_managed: true,
            ..Self::default()
        }
    }
}
