//! Read-only traversals over bodies.
//!
//! Walkers visit every instruction reachable from a body, including inline
//! operands, terminator operands and region bodies (`Begin`, `Synchronize`).
//! Closure literal bodies are visited only when asked for; the callback is
//! told whether the instruction sits inside a closure literal.

use rustc_hash::FxHashSet;

use crate::{BindingId, Body, Instruction, Name, Operand};

/// Whether traversal descends into closure literal bodies.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Descend {
    Regions,
    RegionsAndClosures,
}

/// Visit every instruction in `body`.
pub fn walk_body<'a, F>(body: &'a Body, descend: Descend, f: &mut F)
where
    F: FnMut(&'a Instruction, bool),
{
    walk_body_inner(body, descend, false, f);
}

/// Visit `instr` and everything nested under it.
pub fn walk_instruction<'a, F>(instr: &'a Instruction, descend: Descend, f: &mut F)
where
    F: FnMut(&'a Instruction, bool),
{
    walk_instr(instr, descend, false, f);
}

fn walk_body_inner<'a, F>(body: &'a Body, descend: Descend, in_closure: bool, f: &mut F)
where
    F: FnMut(&'a Instruction, bool),
{
    for block in &body.blocks {
        for instr in &block.instrs {
            walk_instr(instr, descend, in_closure, f);
        }
        for op in block.terminator.operands() {
            if let Operand::Inline(inner) = op {
                walk_instr(inner, descend, in_closure, f);
            }
        }
    }
}

fn walk_instr<'a, F>(instr: &'a Instruction, descend: Descend, in_closure: bool, f: &mut F)
where
    F: FnMut(&'a Instruction, bool),
{
    f(instr, in_closure);
    for op in instr.operands() {
        if let Operand::Inline(inner) = op {
            walk_instr(inner, descend, in_closure, f);
        }
    }
    for region in instr.regions() {
        walk_body_inner(region, descend, in_closure, f);
    }
    if descend == Descend::RegionsAndClosures {
        if let Some(closure) = instr.closure() {
            walk_body_inner(&closure.body, descend, true, f);
        }
    }
}

/// Closure literals directly nested in `body` (not inside other closures).
pub fn closures_in(body: &Body) -> Vec<&Instruction> {
    let mut out = Vec::new();
    walk_body(body, Descend::Regions, &mut |instr, _| {
        if instr.closure().is_some() {
            out.push(instr);
        }
    });
    out
}

/// Local names stored anywhere in `body`.
pub fn stored_names(body: &Body, descend: Descend) -> FxHashSet<Name> {
    let mut out = FxHashSet::default();
    walk_body(body, descend, &mut |instr, _| {
        if let Some(name) = instr.stored_name() {
            out.insert(name);
        }
    });
    collect_rescue_bindings(body, descend, &mut out);
    out
}

/// Local names loaded anywhere in `body`.
pub fn loaded_names(body: &Body, descend: Descend) -> FxHashSet<Name> {
    let mut out = FxHashSet::default();
    walk_body(body, descend, &mut |instr, _| {
        if let Some(name) = instr.loaded_name() {
            out.insert(name);
        }
    });
    out
}

/// Rescue clauses bind the exception to a local, which counts as a store.
fn collect_rescue_bindings(body: &Body, descend: Descend, out: &mut FxHashSet<Name>) {
    walk_body(body, descend, &mut |instr, _| {
        if let crate::InstrKind::Begin(begin) = &instr.kind {
            out.extend(begin.rescues.iter().filter_map(|r| r.binding));
        }
    });
}

/// Bindings defined in `body`.
pub fn defined_bindings(body: &Body, descend: Descend) -> FxHashSet<BindingId> {
    let mut out = FxHashSet::default();
    walk_body(body, descend, &mut |instr, _| {
        if let Some(id) = instr.result {
            out.insert(id);
        }
    });
    out
}

/// Bindings referenced as operands in `body`, in first-use order.
pub fn used_bindings(body: &Body, descend: Descend) -> Vec<BindingId> {
    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    let mut note = |op: &Operand| {
        if let Some(id) = op.binding() {
            if seen.insert(id) {
                out.push(id);
            }
        }
    };
    walk_body(body, descend, &mut |instr, _| {
        for op in instr.operands() {
            note(op);
        }
    });
    // Terminator operands of every nested body.
    visit_terminators(body, descend, &mut |op| note(op));
    out
}

fn visit_terminators<'a>(body: &'a Body, descend: Descend, f: &mut dyn FnMut(&'a Operand)) {
    for block in &body.blocks {
        for op in block.terminator.operands() {
            f(op);
        }
    }
    let mut nested: Vec<&'a Body> = Vec::new();
    walk_body(body, Descend::Regions, &mut |instr, _| {
        nested.extend(instr.regions());
        if descend == Descend::RegionsAndClosures {
            if let Some(closure) = instr.closure() {
                nested.push(&closure.body);
            }
        }
    });
    for inner in nested {
        visit_terminators(inner, descend, f);
    }
}

/// Bindings referenced in `body` but defined outside it.
pub fn free_bindings(body: &Body) -> Vec<BindingId> {
    let defined = defined_bindings(body, Descend::RegionsAndClosures);
    used_bindings(body, Descend::RegionsAndClosures)
        .into_iter()
        .filter(|id| !defined.contains(id))
        .collect()
}
