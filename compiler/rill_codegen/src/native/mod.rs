//! Native target adapter.
//!
//! Lowers a program to a [`rill_native::Module`] the `rill_rt` machine can
//! execute.
//!
//! # Architecture
//!
//! ```text
//! lower_program
//!   ├── declare      every user function, its dispatch thunk and, for
//!   │                vtable families, its uniform boxed entry
//!   ├── globals      class metadata, method tables, vtables
//!   ├── Unit         one per user function; callbacks (closure bodies,
//!   │                protected regions, handlers) get nested units that
//!   │                share the enclosing function's frame
//!   ├── helpers      array and hash algorithms, one function per kind
//!   └── __rill_init  registers every class before `main` runs
//! ```
//!
//! Locals live in a word-addressed frame allocated in the function's entry
//! block. Callbacks reach it through their environment, so every region of
//! a function reads and writes the same slots. Locals written by closures
//! live in module globals instead.

mod arith;
mod calls;
mod classes;
mod closures;
mod collections;
mod concurrency;
mod control_flow;
mod exceptions;
mod lowerer;
mod runtime_decl;
mod values;

use rill_ir::Name;
use rill_native::abi::{register_layouts, AbiLayouts};
use rill_native::{
    layout_blocks, verify_module, Callee, FuncId, FunctionBuilder, FunctionFlags, Module,
    StructId, StructTable,
};
use rustc_hash::FxHashMap;
use tracing::{debug, debug_span};

use crate::context::{CodegenCx, Findings};
use crate::CodegenError;

pub(crate) use runtime_decl::Rt;

/// Name of the module produced for a program.
pub const MODULE_NAME: &str = "rill";

/// Module under construction plus the tables every unit shares.
pub(crate) struct NativeOut {
    pub(crate) module: Module,
    /// Snapshot of the module's struct table, taken once every layout is
    /// registered.
    pub(crate) structs: StructTable,
    pub(crate) abi: AbiLayouts,
    class_structs: FxHashMap<Name, StructId>,
    callbacks: FxHashMap<String, u32>,
}

impl NativeOut {
    fn new(cx: &CodegenCx<'_>) -> Self {
        let mut module = Module::new(MODULE_NAME);
        let abi = register_layouts(module.structs_mut());
        let class_structs = classes::register_class_structs(cx, module.structs_mut());
        let structs = module.structs().clone();
        NativeOut {
            module,
            structs,
            abi,
            class_structs,
            callbacks: FxHashMap::default(),
        }
    }

    /// Callee of runtime entry point `rt`, declared on first use.
    pub(crate) fn rt(&mut self, rt: Rt) -> Callee {
        Callee::Extern(rt.declare(&mut self.module))
    }

    pub(crate) fn class_struct(&self, class: Name) -> Option<StructId> {
        self.class_structs.get(&class).copied()
    }

    /// Next callback number for scope `symbol`.
    pub(crate) fn next_callback(&mut self, symbol: &str) -> u32 {
        let counter = self.callbacks.entry(symbol.to_owned()).or_insert(0);
        let n = *counter;
        *counter += 1;
        n
    }

    /// Finish `fb`, lay its blocks out and attach it to `id`.
    pub(crate) fn define(&mut self, id: FuncId, fb: FunctionBuilder) {
        let mut body = fb.finish();
        layout_blocks(&mut body);
        self.module.define_function(id, body);
    }
}

/// Lower every function of the program in `cx` to a verified module.
pub fn lower_program(cx: &CodegenCx<'_>, findings: &mut Findings) -> Result<Module, CodegenError> {
    let _span = debug_span!("native").entered();
    let mut out = NativeOut::new(cx);

    classes::declare_functions(cx, &mut out);
    classes::build_class_globals(cx, &mut out);

    for function in &cx.program.functions {
        lowerer::lower_function(cx, &mut out, findings, function)?;
    }
    classes::define_entries(cx, &mut out);
    classes::define_init(cx, &mut out);

    let module = out.module;
    verify_module(&module).map_err(CodegenError::Verify)?;
    debug!(
        functions = module.function_count(),
        externs = module.externs().count(),
        globals = module.globals().count(),
        "native module ready"
    );
    Ok(module)
}

/// Flags of user function `symbol`.
fn user_flags(cx: &CodegenCx<'_>, owner: Option<Name>, name: Name) -> FunctionFlags {
    let mut flags = FunctionFlags::empty();
    if cx.options.instrument {
        flags |= FunctionFlags::INSTRUMENTED;
    }
    if owner.is_none() && name == cx.names.main {
        flags |= FunctionFlags::ENTRY;
    }
    flags
}
