//! The executor for native modules.
//!
//! # Design
//!
//! A [`Machine`] is a cheaply clonable handle (an `Arc`) so guest threads
//! and fibers can run on OS threads of their own. Globals are the first
//! allocations of the heap, in declaration order, so a global's id is also
//! its allocation index. Externs are resolved by name against the runtime
//! table when the machine is built; an unknown extern is an error up front
//! rather than at the first call.

mod exec;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rill_native::{ConstWord, FuncId, GlobalInit, Module, NativeType, WORD};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::runtime::{self, Handles, Profile, ProfileEntry};
use crate::{ExecError, Heap, Ptr, Unwind, Word};

/// A runtime entry point.
pub type RuntimeFn = fn(&Machine, &[Word]) -> Result<Word, Unwind>;

/// Name of the module initializer run before `main`.
pub const INIT_FUNCTION: &str = "__rill_init";
/// Name of the program entry point.
pub const MAIN_FUNCTION: &str = "main";

#[derive(Clone, Debug, Default)]
pub struct MachineConfig {
    /// Copy program output to stdout as it is produced.
    pub echo: bool,
}

struct Inner {
    module: Module,
    heap: Mutex<Heap>,
    externs: Vec<RuntimeFn>,
    output: Mutex<String>,
    echo: bool,
    classes: RwLock<FxHashMap<Arc<str>, Ptr>>,
    handles: Mutex<Handles>,
    profile: Mutex<Profile>,
}

#[derive(Clone)]
pub struct Machine {
    inner: Arc<Inner>,
}

impl Machine {
    pub fn new(module: Module) -> Result<Self, ExecError> {
        Self::with_config(module, MachineConfig::default())
    }

    pub fn with_config(module: Module, config: MachineConfig) -> Result<Self, ExecError> {
        let mut heap = Heap::new();
        for (_, global) in module.globals() {
            match &global.init {
                GlobalInit::Zeroed(words) => {
                    let _ = heap.alloc_words(vec![Word::Zero; *words as usize]);
                }
                GlobalInit::Words(words) => {
                    let cells = words
                        .iter()
                        .map(|w| match w {
                            ConstWord::Int(v) => Word::Int(*v),
                            ConstWord::Float(v) => Word::Float(*v),
                            ConstWord::Null => Word::Null,
                            ConstWord::Global(g) => Word::Ptr(Ptr::new(g.raw(), 0)),
                            ConstWord::Func(f) => Word::Func(*f),
                        })
                        .collect();
                    let _ = heap.alloc_words(cells);
                }
                GlobalInit::Text(text) => {
                    let _ = heap.alloc_text(Arc::from(text.as_str()));
                }
            }
        }

        let mut externs = Vec::new();
        for (_, ext) in module.externs() {
            let f = runtime::lookup(&ext.name)
                .ok_or_else(|| ExecError::UnknownExtern(ext.name.clone()))?;
            externs.push(f);
        }
        debug!(
            module = module.name(),
            functions = module.function_count(),
            externs = externs.len(),
            "machine ready"
        );

        Ok(Machine {
            inner: Arc::new(Inner {
                module,
                heap: Mutex::new(heap),
                externs,
                output: Mutex::new(String::new()),
                echo: config.echo,
                classes: RwLock::new(FxHashMap::default()),
                handles: Mutex::new(Handles::default()),
                profile: Mutex::new(Profile::default()),
            }),
        })
    }

    pub fn module(&self) -> &Module {
        &self.inner.module
    }

    // -- Calls --

    pub fn call(&self, func: FuncId, args: &[Word]) -> Result<Word, Unwind> {
        exec::call_function(self, func, args)
    }

    pub fn call_by_name(&self, name: &str, args: &[Word]) -> Result<Word, Unwind> {
        let func = self
            .inner
            .module
            .function_id(name)
            .ok_or_else(|| ExecError::UnknownFunction(name.to_owned()))?;
        self.call(func, args)
    }

    /// Call a function pointer word.
    pub fn call_word(&self, target: Word, args: &[Word]) -> Result<Word, Unwind> {
        match target {
            Word::Func(f) => self.call(f, args),
            other => Err(ExecError::TypeMismatch(format!("call through non-function {other:?}")).into()),
        }
    }

    pub(crate) fn extern_fn(&self, index: usize) -> Option<RuntimeFn> {
        self.inner.externs.get(index).copied()
    }

    /// Run the module initializer (when present) and `main`.
    ///
    /// An exception that escapes `main` becomes [`ExecError::Uncaught`].
    pub fn run_main(&self) -> Result<Word, ExecError> {
        let result = (|| {
            if self.inner.module.function_id(INIT_FUNCTION).is_some() {
                self.call_by_name(INIT_FUNCTION, &[])?;
            }
            self.call_by_name(MAIN_FUNCTION, &[])
        })();
        match result {
            Ok(word) => Ok(word),
            Err(Unwind::Fault(err)) => Err(err),
            Err(Unwind::Raise(exc)) => {
                let (class, message) = runtime::describe_exception(self, exc);
                Err(ExecError::Uncaught { class, message })
            }
        }
    }

    // -- Memory --

    pub fn load(&self, ptr: Ptr) -> Result<Word, ExecError> {
        self.inner.heap.lock().load(ptr)
    }

    pub fn load_typed(&self, ptr: Ptr, ty: NativeType) -> Result<Word, ExecError> {
        Ok(self.load(ptr)?.coerce(ty))
    }

    pub fn store(&self, ptr: Ptr, value: Word) -> Result<(), ExecError> {
        self.inner.heap.lock().store(ptr, value)
    }

    /// Load word `index` of the struct at `base`.
    pub fn load_field(&self, base: Word, index: u32) -> Result<Word, ExecError> {
        let ptr = base.as_ptr().ok_or(ExecError::NullPointer)?;
        self.load(ptr.add(i64::from(index * WORD)))
    }

    pub fn store_field(&self, base: Word, index: u32, value: Word) -> Result<(), ExecError> {
        let ptr = base.as_ptr().ok_or(ExecError::NullPointer)?;
        self.store(ptr.add(i64::from(index * WORD)), value)
    }

    pub fn alloc_words(&self, words: Vec<Word>) -> Word {
        Word::Ptr(self.inner.heap.lock().alloc_words(words))
    }

    pub fn alloc_zeroed(&self, bytes: i64) -> Word {
        Word::Ptr(self.inner.heap.lock().alloc_zeroed(bytes))
    }

    pub fn free(&self, ptr: Ptr) -> Result<(), ExecError> {
        self.inner.heap.lock().free(ptr)
    }

    pub fn alloc_text(&self, text: &str) -> Word {
        Word::Ptr(self.inner.heap.lock().alloc_text(Arc::from(text)))
    }

    pub fn text(&self, word: Word) -> Result<Arc<str>, ExecError> {
        let ptr = word.as_ptr().ok_or(ExecError::NullPointer)?;
        self.inner.heap.lock().text(ptr)
    }

    pub fn live_words(&self) -> usize {
        self.inner.heap.lock().live_words()
    }

    /// Address of a global by name.
    pub fn global(&self, name: &str) -> Option<Word> {
        self.inner
            .module
            .global_id(name)
            .map(|g| Word::Ptr(Ptr::new(g.raw(), 0)))
    }

    // -- Output --

    pub(crate) fn write_output(&self, text: &str) {
        if self.inner.echo {
            print!("{text}");
        }
        self.inner.output.lock().push_str(text);
    }

    /// Everything the program printed so far.
    pub fn output(&self) -> String {
        self.inner.output.lock().clone()
    }

    pub fn take_output(&self) -> String {
        std::mem::take(&mut *self.inner.output.lock())
    }

    // -- Classes --

    pub(crate) fn register_class(&self, name: Arc<str>, meta: Ptr) {
        self.inner.classes.write().insert(name, meta);
    }

    pub(crate) fn class_meta(&self, name: &str) -> Option<Ptr> {
        self.inner.classes.read().get(name).copied()
    }

    // -- Handles and profiling --

    pub(crate) fn handles(&self) -> &Mutex<Handles> {
        &self.inner.handles
    }

    pub(crate) fn profile(&self) -> &Mutex<Profile> {
        &self.inner.profile
    }

    /// Per-function call counts and times recorded by the profiling probes.
    pub fn profile_report(&self) -> Vec<ProfileEntry> {
        self.inner.profile.lock().report()
    }
}

#[cfg(test)]
mod tests;
