//! Textual rendering of a native module.
//!
//! The format follows LLVM's textual IR closely enough to be read by anyone
//! familiar with it, but it is not meant to be parsed back.

use std::fmt::Write as _;

use crate::{
    Callee, Const, ConstWord, FunctionDecl, GlobalInit, Inst, InstData, Module, Terminator,
};

/// Render the whole module.
pub fn print_module(module: &Module) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "; module {}", module.name());

    if !module.structs().is_empty() {
        out.push('\n');
        for (_, layout) in module.structs().iter() {
            let fields: Vec<String> = layout
                .fields
                .iter()
                .map(|f| format!("{} {}", f.ty, f.name))
                .collect();
            let _ = writeln!(
                out,
                "%{} = type {{ {} }} ; {} bytes",
                layout.name,
                fields.join(", "),
                layout.size
            );
        }
    }

    let mut globals = module.globals().peekable();
    if globals.peek().is_some() {
        out.push('\n');
    }
    for (_, global) in globals {
        let kind = if global.mutable { "global" } else { "constant" };
        let init = match &global.init {
            GlobalInit::Zeroed(words) => format!("zeroinitializer [{words} x i64]"),
            GlobalInit::Text(text) => format!("c{text:?}"),
            GlobalInit::Words(words) => {
                let rendered: Vec<String> =
                    words.iter().map(|w| print_const_word(module, w)).collect();
                format!("[ {} ]", rendered.join(", "))
            }
        };
        let _ = writeln!(out, "@{} = {kind} {init}", global.name);
    }

    let mut externs = module.externs().peekable();
    if externs.peek().is_some() {
        out.push('\n');
    }
    for (_, ext) in externs {
        let params: Vec<&str> = ext.sig.params.iter().map(|p| p.name()).collect();
        let _ = writeln!(
            out,
            "declare {} @{}({})",
            ext.sig.ret,
            ext.name,
            params.join(", ")
        );
    }

    for (_, decl) in module.functions() {
        out.push('\n');
        print_function(module, decl, &mut out);
    }
    out
}

fn print_const_word(module: &Module, word: &ConstWord) -> String {
    match word {
        ConstWord::Int(v) => format!("i64 {v}"),
        ConstWord::Float(v) => format!("f64 {v:?}"),
        ConstWord::Null => "ptr null".to_owned(),
        ConstWord::Global(g) => format!("ptr @{}", module.global(*g).name),
        ConstWord::Func(f) => format!("ptr @{}", module.function(*f).name),
    }
}

fn print_function(module: &Module, decl: &FunctionDecl, out: &mut String) {
    let params: Vec<String> = decl
        .sig
        .params
        .iter()
        .enumerate()
        .map(|(i, ty)| format!("{ty} %{i}"))
        .collect();
    let Some(body) = &decl.body else {
        let _ = writeln!(
            out,
            "declare {} @{}({})",
            decl.sig.ret,
            decl.name,
            params.join(", ")
        );
        return;
    };
    let flags = if decl.flags.is_empty() {
        String::new()
    } else {
        format!(" ; {:?}", decl.flags)
    };
    let _ = writeln!(
        out,
        "define {} @{}({}) {{{flags}",
        decl.sig.ret,
        decl.name,
        params.join(", ")
    );
    for id in &body.layout {
        let Some(block) = body.block(*id) else {
            continue;
        };
        let _ = writeln!(out, "{}.{}:", block.name, id.raw());
        for data in &block.insts {
            let _ = writeln!(out, "  {}", print_inst(module, body, data));
        }
        let term = match &block.terminator {
            Some(term) => print_terminator(body, term),
            None => "<unterminated>".to_owned(),
        };
        let _ = writeln!(out, "  {term}");
    }
    out.push_str("}\n");
}

fn block_ref(body: &crate::FunctionBody, id: crate::BlockId) -> String {
    match body.block(id) {
        Some(block) => format!("%{}.{}", block.name, id.raw()),
        None => format!("%bb{}", id.raw()),
    }
}

fn print_inst(module: &Module, body: &crate::FunctionBody, data: &InstData) -> String {
    let lhs = match data.result {
        Some(v) => format!("%{} = ", v.raw()),
        None => String::new(),
    };
    let ty = |v: crate::ValueId| body.value_type(v).map_or("?", |t| t.name());
    let rhs = match &data.inst {
        Inst::Const(c) => match c {
            Const::Int(v) => format!("const i64 {v}"),
            Const::Float(v) => format!("const f64 {v:?}"),
            Const::Bool(v) => format!("const i1 {v}"),
            Const::Null => "const ptr null".to_owned(),
        },
        Inst::Binary { op, lhs, rhs } => format!(
            "{} {} %{}, %{}",
            op.mnemonic(),
            op.result_type(),
            lhs.raw(),
            rhs.raw()
        ),
        Inst::ICmp { pred, lhs, rhs } => format!(
            "icmp {} {} %{}, %{}",
            pred.mnemonic(),
            ty(*lhs),
            lhs.raw(),
            rhs.raw()
        ),
        Inst::FCmp { pred, lhs, rhs } => {
            format!("fcmp o{} f64 %{}, %{}", pred.mnemonic(), lhs.raw(), rhs.raw())
        }
        Inst::Not(v) => format!("not i1 %{}", v.raw()),
        Inst::Cast { op, value } => format!(
            "{} {} %{} to {}",
            op.mnemonic(),
            ty(*value),
            value.raw(),
            op.result_type()
        ),
        Inst::Alloca { words } => format!("alloca [{words} x i64]"),
        Inst::Load { ty, ptr } => format!("load {ty}, ptr %{}", ptr.raw()),
        Inst::Store { ptr, value } => {
            format!("store {} %{}, ptr %{}", ty(*value), value.raw(), ptr.raw())
        }
        Inst::PtrAdd { base, offset } => {
            format!("getelementptr i8, ptr %{}, i64 %{}", base.raw(), offset.raw())
        }
        Inst::FieldAddr {
            base,
            layout,
            field,
            offset,
        } => format!(
            "getelementptr %{}, ptr %{}, i32 0, i32 {field} ; +{offset}",
            module.structs().get(*layout).name,
            base.raw()
        ),
        Inst::GlobalAddr(g) => format!("addr @{}", module.global(*g).name),
        Inst::FuncAddr(f) => format!("addr @{}", module.function(*f).name),
        Inst::Call { callee, args, ret } => {
            let target = match callee {
                Callee::Func(f) => format!("@{}", module.function(*f).name),
                Callee::Extern(e) => format!("@{}", module.extern_decl(*e).name),
                Callee::Indirect(v) => format!("%{}", v.raw()),
            };
            let rendered: Vec<String> = args
                .iter()
                .map(|a| format!("{} %{}", ty(*a), a.raw()))
                .collect();
            format!("call {ret} {target}({})", rendered.join(", "))
        }
        Inst::Select {
            cond,
            on_true,
            on_false,
        } => format!(
            "select i1 %{}, {} %{}, %{}",
            cond.raw(),
            ty(*on_true),
            on_true.raw(),
            on_false.raw()
        ),
    };
    format!("{lhs}{rhs}")
}

fn print_terminator(body: &crate::FunctionBody, term: &Terminator) -> String {
    match term {
        Terminator::Br(target) => format!("br label {}", block_ref(body, *target)),
        Terminator::CondBr {
            cond,
            then_block,
            else_block,
        } => format!(
            "br i1 %{}, label {}, label {}",
            cond.raw(),
            block_ref(body, *then_block),
            block_ref(body, *else_block)
        ),
        Terminator::Ret(Some(v)) => {
            let ty = body.value_type(*v).map_or("?", |t| t.name());
            format!("ret {ty} %{}", v.raw())
        }
        Terminator::Ret(None) => "ret void".to_owned(),
        Terminator::Unreachable => "unreachable".to_owned(),
    }
}

#[cfg(test)]
mod tests;
