//! The managed output document.
//!
//! A JSON description of class files that a bytecode assembler turns into
//! `.class` files: one entry per class, one instruction object per
//! bytecode, labels by name and exception tables by label.

use serde::{Deserialize, Serialize};

/// Access flags, written as lowercase words.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Public,
    Private,
    Static,
    Final,
    Super,
    Synthetic,
    Abstract,
    Interface,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagedDocument {
    /// Class-file major version.
    pub version: u32,
    pub classes: Vec<ClassDef>,
}

impl ManagedDocument {
    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDef {
    pub name: String,
    pub access: Vec<Access>,
    pub super_name: String,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>, super_name: impl Into<String>) -> Self {
        ClassDef {
            name: name.into(),
            access: vec![Access::Public, Access::Super],
            super_name: super_name.into(),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodDef> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// First method called `name`, whatever its descriptor.
    pub fn method_named(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub descriptor: String,
    pub access: Vec<Access>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDef {
    pub name: String,
    pub descriptor: String,
    pub access: Vec<Access>,
    pub instructions: Vec<Insn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exception_table: Vec<ExceptionEntry>,
}

impl MethodDef {
    /// Instructions with operation `op`.
    pub fn count(&self, op: &str) -> usize {
        self.instructions.iter().filter(|i| i.op() == op).count()
    }
}

/// One exception table row. `class` is `None` for a catch-all.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEntry {
    pub start: String,
    pub end: String,
    pub handler: String,
    #[serde(rename = "type")]
    pub class: Option<String>,
}

/// Constant pushed by `ldc`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Str(String),
}

/// Wide constant kind of `ldc2_w`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WideKind {
    Long,
    Double,
}

/// Static argument of a bootstrap method.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BootstrapArg {
    #[serde(rename = "methodType")]
    MethodType { descriptor: String },
    #[serde(rename = "handle")]
    Handle {
        tag: String,
        owner: String,
        name: String,
        descriptor: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        itf: bool,
    },
}

/// One bytecode instruction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Insn {
    Label { name: String },
    Linenumber { line: u32, label: String },

    Lload { var: u16 },
    Lstore { var: u16 },
    Dload { var: u16 },
    Dstore { var: u16 },
    Iload { var: u16 },
    Istore { var: u16 },
    Aload { var: u16 },
    Astore { var: u16 },

    Ldc { value: Constant },
    Ldc2W {
        value: Constant,
        #[serde(rename = "type")]
        kind: WideKind,
    },
    Iconst { value: i32 },
    #[serde(rename = "lconst_0")]
    Lconst0,
    #[serde(rename = "lconst_1")]
    Lconst1,
    #[serde(rename = "dconst_0")]
    Dconst0,
    #[serde(rename = "dconst_1")]
    Dconst1,
    AconstNull,

    Ladd,
    Lsub,
    Lmul,
    Lneg,
    Land,
    Lor,
    Lxor,
    Lshl,
    Lshr,
    Dadd,
    Dsub,
    Dmul,
    Ddiv,
    Drem,
    Dneg,
    I2l,
    L2i,
    L2d,
    D2l,
    Lcmp,
    Dcmpl,
    Dcmpg,

    Ifeq { target: String },
    Ifne { target: String },
    Iflt { target: String },
    Ifge { target: String },
    Ifgt { target: String },
    Ifle { target: String },
    IfIcmpeq { target: String },
    IfIcmpne { target: String },
    Ifnull { target: String },
    Ifnonnull { target: String },
    Goto { target: String },

    Lreturn,
    Dreturn,
    Ireturn,
    Areturn,
    Return,

    #[serde(rename_all = "camelCase")]
    Invokestatic {
        owner: String,
        name: String,
        descriptor: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_interface: bool,
    },
    Invokevirtual { owner: String, name: String, descriptor: String },
    Invokespecial { owner: String, name: String, descriptor: String },
    Invokeinterface { owner: String, name: String, descriptor: String },
    #[serde(rename_all = "camelCase")]
    Invokedynamic {
        name: String,
        descriptor: String,
        bootstrap_owner: String,
        bootstrap_name: String,
        bootstrap_descriptor: String,
        #[serde(default)]
        bootstrap_args: Vec<BootstrapArg>,
    },

    Getfield { owner: String, name: String, descriptor: String },
    Putfield { owner: String, name: String, descriptor: String },
    Getstatic { owner: String, name: String, descriptor: String },
    Putstatic { owner: String, name: String, descriptor: String },

    New {
        #[serde(rename = "type")]
        class: String,
    },
    Dup,
    Pop,
    Pop2,
    Swap,
    Checkcast {
        #[serde(rename = "type")]
        class: String,
    },
    Anewarray {
        #[serde(rename = "type")]
        class: String,
    },
    Aastore,
    Athrow,
}

impl Insn {
    /// Operation name as written in the document.
    pub fn op(&self) -> &'static str {
        match self {
            Insn::Label { .. } => "label",
            Insn::Linenumber { .. } => "linenumber",
            Insn::Lload { .. } => "lload",
            Insn::Lstore { .. } => "lstore",
            Insn::Dload { .. } => "dload",
            Insn::Dstore { .. } => "dstore",
            Insn::Iload { .. } => "iload",
            Insn::Istore { .. } => "istore",
            Insn::Aload { .. } => "aload",
            Insn::Astore { .. } => "astore",
            Insn::Ldc { .. } => "ldc",
            Insn::Ldc2W { .. } => "ldc2_w",
            Insn::Iconst { .. } => "iconst",
            Insn::Lconst0 => "lconst_0",
            Insn::Lconst1 => "lconst_1",
            Insn::Dconst0 => "dconst_0",
            Insn::Dconst1 => "dconst_1",
            Insn::AconstNull => "aconst_null",
            Insn::Ladd => "ladd",
            Insn::Lsub => "lsub",
            Insn::Lmul => "lmul",
            Insn::Lneg => "lneg",
            Insn::Land => "land",
            Insn::Lor => "lor",
            Insn::Lxor => "lxor",
            Insn::Lshl => "lshl",
            Insn::Lshr => "lshr",
            Insn::Dadd => "dadd",
            Insn::Dsub => "dsub",
            Insn::Dmul => "dmul",
            Insn::Ddiv => "ddiv",
            Insn::Drem => "drem",
            Insn::Dneg => "dneg",
            Insn::I2l => "i2l",
            Insn::L2i => "l2i",
            Insn::L2d => "l2d",
            Insn::D2l => "d2l",
            Insn::Lcmp => "lcmp",
            Insn::Dcmpl => "dcmpl",
            Insn::Dcmpg => "dcmpg",
            Insn::Ifeq { .. } => "ifeq",
            Insn::Ifne { .. } => "ifne",
            Insn::Iflt { .. } => "iflt",
            Insn::Ifge { .. } => "ifge",
            Insn::Ifgt { .. } => "ifgt",
            Insn::Ifle { .. } => "ifle",
            Insn::IfIcmpeq { .. } => "if_icmpeq",
            Insn::IfIcmpne { .. } => "if_icmpne",
            Insn::Ifnull { .. } => "ifnull",
            Insn::Ifnonnull { .. } => "ifnonnull",
            Insn::Goto { .. } => "goto",
            Insn::Lreturn => "lreturn",
            Insn::Dreturn => "dreturn",
            Insn::Ireturn => "ireturn",
            Insn::Areturn => "areturn",
            Insn::Return => "return",
            Insn::Invokestatic { .. } => "invokestatic",
            Insn::Invokevirtual { .. } => "invokevirtual",
            Insn::Invokespecial { .. } => "invokespecial",
            Insn::Invokeinterface { .. } => "invokeinterface",
            Insn::Invokedynamic { .. } => "invokedynamic",
            Insn::Getfield { .. } => "getfield",
            Insn::Putfield { .. } => "putfield",
            Insn::Getstatic { .. } => "getstatic",
            Insn::Putstatic { .. } => "putstatic",
            Insn::New { .. } => "new",
            Insn::Dup => "dup",
            Insn::Pop => "pop",
            Insn::Pop2 => "pop2",
            Insn::Swap => "swap",
            Insn::Checkcast { .. } => "checkcast",
            Insn::Anewarray { .. } => "anewarray",
            Insn::Aastore => "aastore",
            Insn::Athrow => "athrow",
        }
    }

    /// Whether control never falls through to the next instruction.
    pub fn ends_flow(&self) -> bool {
        matches!(
            self,
            Insn::Goto { .. }
                | Insn::Lreturn
                | Insn::Dreturn
                | Insn::Ireturn
                | Insn::Areturn
                | Insn::Return
                | Insn::Athrow
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn instructions_use_assembler_field_names() {
        let call = Insn::Invokestatic {
            owner: "rill/rt/Ops".to_owned(),
            name: "truthy".to_owned(),
            descriptor: "(Ljava/lang/Object;)Z".to_owned(),
            is_interface: false,
        };
        let Ok(value) = serde_json::to_value(&call) else {
            panic!("instruction should serialize");
        };
        assert_eq!(
            value,
            json!({
                "op": "invokestatic",
                "owner": "rill/rt/Ops",
                "name": "truthy",
                "descriptor": "(Ljava/lang/Object;)Z"
            })
        );

        let wide = Insn::Ldc2W {
            value: Constant::Int(40),
            kind: WideKind::Long,
        };
        let Ok(value) = serde_json::to_value(&wide) else {
            panic!("instruction should serialize");
        };
        assert_eq!(value, json!({"op": "ldc2_w", "value": 40, "type": "long"}));

        let Ok(value) = serde_json::to_value(Insn::Lconst1) else {
            panic!("instruction should serialize");
        };
        assert_eq!(value, json!({"op": "lconst_1"}));
    }

    #[test]
    fn invokedynamic_carries_bootstrap_arguments() {
        let insn = Insn::Invokedynamic {
            name: "call".to_owned(),
            descriptor: "()Lrill/rt/Block;".to_owned(),
            bootstrap_owner: "java/lang/invoke/LambdaMetafactory".to_owned(),
            bootstrap_name: "metafactory".to_owned(),
            bootstrap_descriptor: "(...)".to_owned(),
            bootstrap_args: vec![
                BootstrapArg::MethodType {
                    descriptor: "([Ljava/lang/Object;)Ljava/lang/Object;".to_owned(),
                },
                BootstrapArg::Handle {
                    tag: "H_INVOKESTATIC".to_owned(),
                    owner: "RillMain".to_owned(),
                    name: "main$block0$generic".to_owned(),
                    descriptor: "([Ljava/lang/Object;)Ljava/lang/Object;".to_owned(),
                    itf: false,
                },
            ],
        };
        let Ok(value) = serde_json::to_value(&insn) else {
            panic!("instruction should serialize");
        };
        assert_eq!(value["bootstrapOwner"], json!("java/lang/invoke/LambdaMetafactory"));
        assert_eq!(value["bootstrapArgs"][0]["type"], json!("methodType"));
        assert_eq!(value["bootstrapArgs"][1]["tag"], json!("H_INVOKESTATIC"));
        assert!(value["bootstrapArgs"][1].get("itf").is_none());
    }

    #[test]
    fn exception_rows_write_null_for_catch_all() {
        let row = ExceptionEntry {
            start: "L0".to_owned(),
            end: "L1".to_owned(),
            handler: "L2".to_owned(),
            class: None,
        };
        let Ok(value) = serde_json::to_value(&row) else {
            panic!("row should serialize");
        };
        assert_eq!(
            value,
            json!({"start": "L0", "end": "L1", "handler": "L2", "type": null})
        );
    }

    #[test]
    fn documents_read_back() {
        let text = r#"{
            "version": 52,
            "classes": [{
                "name": "RillMain",
                "access": ["public", "super"],
                "superName": "java/lang/Object",
                "methods": [{
                    "name": "main",
                    "descriptor": "([Ljava/lang/String;)V",
                    "access": ["public", "static"],
                    "instructions": [{"op": "return"}]
                }]
            }]
        }"#;
        let Ok(doc) = serde_json::from_str::<ManagedDocument>(text) else {
            panic!("document should parse");
        };
        let Some(main) = doc.class("RillMain") else {
            panic!("main class should be present");
        };
        assert_eq!(main.interfaces, Vec::<String>::new());
        assert_eq!(
            main.method("main", "([Ljava/lang/String;)V").map(|m| m.count("return")),
            Some(1)
        );
    }
}
