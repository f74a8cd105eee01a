//! Whole-program container and its JSON document form.

use serde::{Deserialize, Serialize};

use crate::walk::{walk_body, Descend};
use crate::{ClassType, Function, InstrKind, Name, StringInterner};

/// Errors while loading or saving an IR document.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    #[error("malformed IR document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("symbol table does not reproduce name ids (empty first entry, no duplicates)")]
    SymbolTable,
    #[error("name id {id} is outside the symbol table ({len} entries)")]
    DanglingName { id: u32, len: usize },
}

/// The frontend's output: functions plus class declarations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    pub functions: Vec<Function>,
    pub classes: Vec<ClassType>,
}

impl Program {
    pub fn new(functions: Vec<Function>, classes: Vec<ClassType>) -> Self {
        Program { functions, classes }
    }

    /// Top-level routine by name.
    pub fn function(&self, name: Name) -> Option<&Function> {
        self.functions
            .iter()
            .find(|f| f.owner.is_none() && f.name == name)
    }

    /// Method defined directly on `owner` (no inheritance walk).
    pub fn method(&self, owner: Name, name: Name) -> Option<&Function> {
        self.functions
            .iter()
            .find(|f| f.owner == Some(owner) && f.name == name)
    }

    pub fn class(&self, name: Name) -> Option<&ClassType> {
        self.classes.iter().find(|c| c.name == name)
    }
}

/// Serialized program: names are written as ids into `symbols`.
#[derive(Serialize, Deserialize)]
pub struct ProgramDocument {
    pub symbols: Vec<String>,
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default)]
    pub classes: Vec<ClassType>,
}

/// Parse a program document, returning the program and an interner whose
/// ids match the document's symbol table.
pub fn load_program(json: &str) -> Result<(Program, StringInterner), IrError> {
    let doc: ProgramDocument = serde_json::from_str(json)?;
    let interner = StringInterner::from_symbols(&doc.symbols).ok_or(IrError::SymbolTable)?;
    let program = Program::new(doc.functions, doc.classes);
    check_names(&program, &interner)?;
    Ok((program, interner))
}

/// Serialize a program together with the interner's symbol table.
pub fn save_program(program: &Program, interner: &StringInterner) -> Result<String, IrError> {
    let doc = ProgramDocument {
        symbols: interner.snapshot(),
        functions: program.functions.clone(),
        classes: program.classes.clone(),
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

fn check_names(program: &Program, interner: &StringInterner) -> Result<(), IrError> {
    let mut names: Vec<Name> = Vec::new();
    for class in &program.classes {
        names.push(class.name);
        names.extend(class.superclass);
        names.extend(class.fields.iter().map(|f| f.name));
        names.extend(class.methods.iter().copied());
    }
    for function in &program.functions {
        names.push(function.name);
        names.extend(function.owner);
        names.extend(function.params.iter().map(|p| p.name));
        walk_body(&function.body, Descend::RegionsAndClosures, &mut |instr, _| {
            match &instr.kind {
                InstrKind::LoadLocal { name } | InstrKind::StoreLocal { name, .. } => {
                    names.push(*name);
                }
                InstrKind::Call { name, .. } => names.push(*name),
                InstrKind::MethodCall { method, .. } => names.push(*method),
                InstrKind::New { class, .. } | InstrKind::Raise { class, .. } => {
                    names.push(*class);
                }
                InstrKind::GetField { field, .. } | InstrKind::SetField { field, .. } => {
                    names.push(*field);
                }
                _ => {}
            }
        });
    }
    let len = interner.len();
    match names.into_iter().find(|n| !interner.contains(*n)) {
        Some(name) => Err(IrError::DanglingName {
            id: name.raw(),
            len,
        }),
        None => Ok(()),
    }
}
