//! Managed target adapter.
//!
//! Lowers a program to a [`ManagedDocument`]: class files described as
//! JSON, ready for a bytecode assembler.
//!
//! # Architecture
//!
//! ```text
//! lower_program
//!   ├── declare_classes  one class per program class, parents first
//!   ├── Unit             one per user function; closure bodies become
//!   │                    private static methods of the same host class
//!   ├── define_bridges   `$boxed` entries for vtable families
//!   └── define_entry     main([Ljava/lang/String;)V on the main class
//! ```
//!
//! Values live in local variable slots between instructions. Protected
//! regions are laid out inline with exception-table rows, and locals
//! written by closures are static fields of the main class.

mod arith;
mod calls;
mod classes;
mod closures;
mod collections;
mod concurrency;
mod control_flow;
pub mod document;
mod emitter;
mod exceptions;
mod lowerer;

#[cfg(test)]
mod tests;

use rustc_hash::FxHashMap;
use tracing::{debug, debug_span};

use crate::context::{CodegenCx, Findings};
use crate::CodegenError;
use document::{Access, ClassDef, FieldDef, MethodDef};
pub use document::ManagedDocument;
use emitter::OBJECT_DESC;

/// Runtime class receiving probe events.
pub(crate) const PROFILE: &str = "rill/rt/Profile";

/// Classes under construction.
pub(crate) struct ManagedOut {
    pub(crate) classes: Vec<ClassDef>,
    main: String,
    callbacks: FxHashMap<String, u32>,
}

impl ManagedOut {
    fn new(cx: &CodegenCx<'_>) -> Self {
        let main = cx.options.main_class.clone();
        ManagedOut {
            classes: vec![classes::main_class(&main)],
            main,
            callbacks: FxHashMap::default(),
        }
    }

    /// Internal name of the class holding top-level routines.
    pub(crate) fn main_class(&self) -> &str {
        &self.main
    }

    pub(crate) fn class_mut(&mut self, name: &str) -> Option<&mut ClassDef> {
        self.classes.iter_mut().find(|c| c.name == name)
    }

    pub(crate) fn add_method(&mut self, class: &str, method: MethodDef) {
        match self.class_mut(class) {
            Some(def) => def.methods.push(method),
            None => debug!(class, method = %method.name, "method for a class never declared"),
        }
    }

    /// Declare the static field holding shared local `name`, once.
    pub(crate) fn shared_field(&mut self, name: &str) {
        let main = self.main.clone();
        let Some(class) = self.class_mut(&main) else {
            return;
        };
        if !class.has_field(name) {
            class.fields.push(FieldDef {
                name: name.to_owned(),
                descriptor: OBJECT_DESC.to_owned(),
                access: vec![Access::Public, Access::Static],
            });
        }
    }

    /// Next closure number for scope `key`.
    pub(crate) fn next_callback(&mut self, key: &str) -> u32 {
        let counter = self.callbacks.entry(key.to_owned()).or_insert(0);
        let n = *counter;
        *counter += 1;
        n
    }
}

/// Lower every function of the program in `cx` to a managed document.
pub fn lower_program(cx: &CodegenCx<'_>, findings: &mut Findings) -> Result<ManagedDocument, CodegenError> {
    let _span = debug_span!("managed").entered();
    let mut out = ManagedOut::new(cx);

    classes::declare_classes(cx, &mut out);
    for function in &cx.program.functions {
        lowerer::lower_function(cx, &mut out, findings, function)?;
    }
    classes::define_bridges(cx, &mut out);
    classes::define_entry(cx, &mut out);

    let document = ManagedDocument {
        version: cx.options.class_version,
        classes: out.classes,
    };
    debug!(
        classes = document.classes.len(),
        methods = document.classes.iter().map(|c| c.methods.len()).sum::<usize>(),
        "managed document ready"
    );
    Ok(document)
}
