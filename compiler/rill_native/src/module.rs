//! The native module object.
//!
//! # Design
//!
//! Two-pass declare-then-define: every function is declared by symbol
//! (get-or-insert) before any body is built, so call sites and definitions
//! always agree on the signature. Bodies are attached later with
//! [`Module::define_function`].

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::{
    BlockId, ExternId, FuncId, GlobalId, InstData, NativeType, Signature, StructTable, Terminator,
    ValueId,
};

/// A basic block.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub name: String,
    pub insts: Vec<InstData>,
    pub terminator: Option<Terminator>,
}

/// A function body. Values `0..params` are the parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionBody {
    pub params: u32,
    pub blocks: Vec<Block>,
    pub value_types: Vec<NativeType>,
    /// Emission order of the blocks. The entry block is always first.
    pub layout: Vec<BlockId>,
}

impl FunctionBody {
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index())
    }

    pub fn value_type(&self, value: ValueId) -> Option<NativeType> {
        self.value_types.get(value.index()).copied()
    }

    pub fn param(&self, index: u32) -> ValueId {
        ValueId::new(index)
    }

    /// Instruction count, terminators excluded.
    pub fn inst_count(&self) -> usize {
        self.blocks.iter().map(|b| b.insts.len()).sum()
    }
}

bitflags! {
    /// What kind of function a declaration is.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct FunctionFlags: u8 {
        /// Synthesized callback (closure body, protected-call body or handler).
        const CALLBACK = 1 << 0;
        /// Generic-convention thunk wrapping a typed function.
        const THUNK = 1 << 1;
        /// Collection helper.
        const HELPER = 1 << 2;
        /// Carries profiling probes.
        const INSTRUMENTED = 1 << 3;
        /// Program entry or module initializer.
        const ENTRY = 1 << 4;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub sig: Signature,
    pub flags: FunctionFlags,
    pub body: Option<FunctionBody>,
}

impl FunctionDecl {
    pub fn is_defined(&self) -> bool {
        self.body.is_some()
    }
}

/// A function provided by the runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternDecl {
    pub name: String,
    pub sig: Signature,
}

/// One word of a global initializer.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstWord {
    Int(i64),
    Float(f64),
    Null,
    Global(GlobalId),
    Func(FuncId),
}

#[derive(Clone, Debug, PartialEq)]
pub enum GlobalInit {
    /// `n` zeroed words.
    Zeroed(u32),
    Words(Vec<ConstWord>),
    /// Immutable text literal.
    Text(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Global {
    pub name: String,
    pub init: GlobalInit,
    pub mutable: bool,
}

/// A complete native module.
#[derive(Debug, Default)]
pub struct Module {
    name: String,
    structs: StructTable,
    functions: Vec<FunctionDecl>,
    function_index: FxHashMap<String, FuncId>,
    externs: Vec<ExternDecl>,
    extern_index: FxHashMap<String, ExternId>,
    globals: Vec<Global>,
    global_index: FxHashMap<String, GlobalId>,
    text_pool: FxHashMap<String, GlobalId>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            ..Module::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn structs(&self) -> &StructTable {
        &self.structs
    }

    pub fn structs_mut(&mut self) -> &mut StructTable {
        &mut self.structs
    }

    // -- Functions --

    /// Declare a function, or return the existing declaration.
    ///
    /// Flags of a repeated declaration are merged; the first signature wins.
    pub fn declare_function(&mut self, name: &str, sig: Signature, flags: FunctionFlags) -> FuncId {
        if let Some(&id) = self.function_index.get(name) {
            let decl = &mut self.functions[id.index()];
            decl.flags |= flags;
            debug_assert_eq!(decl.sig, sig, "conflicting signatures for {name}");
            return id;
        }
        let id = FuncId::from_len(self.functions.len());
        self.functions.push(FunctionDecl {
            name: name.to_owned(),
            sig,
            flags,
            body: None,
        });
        self.function_index.insert(name.to_owned(), id);
        id
    }

    pub fn define_function(&mut self, id: FuncId, body: FunctionBody) {
        self.functions[id.index()].body = Some(body);
    }

    pub fn function(&self, id: FuncId) -> &FunctionDecl {
        &self.functions[id.index()]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut FunctionDecl {
        &mut self.functions[id.index()]
    }

    pub fn function_id(&self, name: &str) -> Option<FuncId> {
        self.function_index.get(name).copied()
    }

    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &FunctionDecl)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FuncId::from_len(i), f))
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    // -- Externs --

    pub fn declare_extern(&mut self, name: &str, params: &[NativeType], ret: NativeType) -> ExternId {
        if let Some(&id) = self.extern_index.get(name) {
            return id;
        }
        let id = ExternId::from_len(self.externs.len());
        self.externs.push(ExternDecl {
            name: name.to_owned(),
            sig: Signature::new(params.to_vec(), ret),
        });
        self.extern_index.insert(name.to_owned(), id);
        id
    }

    pub fn extern_decl(&self, id: ExternId) -> &ExternDecl {
        &self.externs[id.index()]
    }

    pub fn extern_id(&self, name: &str) -> Option<ExternId> {
        self.extern_index.get(name).copied()
    }

    pub fn externs(&self) -> impl Iterator<Item = (ExternId, &ExternDecl)> {
        self.externs
            .iter()
            .enumerate()
            .map(|(i, e)| (ExternId::from_len(i), e))
    }

    // -- Globals --

    /// Add a global, or return the existing one with the same name.
    pub fn add_global(&mut self, name: &str, init: GlobalInit, mutable: bool) -> GlobalId {
        if let Some(&id) = self.global_index.get(name) {
            return id;
        }
        let id = GlobalId::from_len(self.globals.len());
        self.globals.push(Global {
            name: name.to_owned(),
            init,
            mutable,
        });
        self.global_index.insert(name.to_owned(), id);
        id
    }

    /// Replace the initializer of a global added earlier as a placeholder.
    pub fn set_global_init(&mut self, id: GlobalId, init: GlobalInit) {
        self.globals[id.index()].init = init;
    }

    pub fn global(&self, id: GlobalId) -> &Global {
        &self.globals[id.index()]
    }

    pub fn global_id(&self, name: &str) -> Option<GlobalId> {
        self.global_index.get(name).copied()
    }

    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &Global)> {
        self.globals
            .iter()
            .enumerate()
            .map(|(i, g)| (GlobalId::from_len(i), g))
    }

    /// Interned text literal. Identical texts share one global.
    pub fn text(&mut self, text: &str) -> GlobalId {
        if let Some(&id) = self.text_pool.get(text) {
            return id;
        }
        let name = format!(".str.{}", self.text_pool.len());
        let id = self.add_global(&name, GlobalInit::Text(text.to_owned()), false);
        self.text_pool.insert(text.to_owned(), id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declarations_are_get_or_insert() {
        let mut module = Module::new("m");
        let sig = Signature::new(vec![NativeType::I64], NativeType::I64);
        let a = module.declare_function("f", sig.clone(), FunctionFlags::empty());
        let b = module.declare_function("f", sig, FunctionFlags::INSTRUMENTED);
        assert_eq!(a, b);
        assert!(module.function(a).flags.contains(FunctionFlags::INSTRUMENTED));
        assert_eq!(module.function_count(), 1);
    }

    #[test]
    fn text_pool_shares_globals() {
        let mut module = Module::new("m");
        let a = module.text("hello");
        let b = module.text("hello");
        let c = module.text("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(module.global(c).name, ".str.1");
    }
}
