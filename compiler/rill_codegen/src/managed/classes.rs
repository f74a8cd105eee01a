//! Class definitions, constructors, accessors, bridges and the entry point.
//!
//! ```text
//!   <Main>         top-level routines, shared locals, main([String)V
//!   <C> : <Super>  fields, <init>()V, field accessors, <m>$boxed bridges
//! ```
//!
//! Classes descending from a builtin exception also get
//! `<init>(Object)V`, the constructor `raise` uses.

use rill_ir::ParamKind;
use rustc_hash::FxHashSet;
use tracing::trace;

use super::calls::{boxed_descriptor, bridge_name};
use super::document::{Access, ClassDef, FieldDef, Insn, MethodDef};
use super::emitter::{member_name, MethodEmitter, ARRAY, HASH, OBJECT};
use super::ManagedOut;
use crate::classes::{ClassInfo, FieldInfo};
use crate::context::CodegenCx;
use crate::descriptor::{managed_type, MethodDescriptor};
use crate::exceptions::managed_builtin;
use crate::repr::Repr;

/// Superclass of `class` in the managed output.
fn super_name(cx: &CodegenCx<'_>, class: &ClassInfo) -> String {
    match (class.superclass, class.builtin_super) {
        (Some(parent), _) => cx.name(parent).to_owned(),
        (None, Some(builtin)) => managed_builtin(builtin),
        (None, None) => OBJECT.to_owned(),
    }
}

/// `<init>` forwarding `descriptor`'s single optional argument to the
/// superclass constructor.
fn constructor(super_name: &str, descriptor: &str) -> MethodDef {
    let mut em = MethodEmitter::new(0);
    em.emit(Insn::Aload { var: 0 });
    if descriptor != "()V" {
        em.emit(Insn::Aload { var: 1 });
    }
    em.invoke_special(super_name, "<init>", descriptor);
    em.emit(Insn::Return);
    em.finish("<init>".to_owned(), descriptor.to_owned(), vec![Access::Public])
}

/// The main class, holding top-level routines.
pub(super) fn main_class(name: &str) -> ClassDef {
    let mut class = ClassDef::new(name, OBJECT);
    class.methods.push(constructor(OBJECT, "()V"));
    class
}

/// Definitions of every program class, parents first.
pub(super) fn declare_classes(cx: &CodegenCx<'_>, out: &mut ManagedOut) {
    for info in cx.classes.iter() {
        let name = cx.name(info.name);
        let parent = super_name(cx, info);
        trace!(class = name, %parent, "managed class");
        let mut class = ClassDef::new(name, parent.clone());
        for field in info.fields.iter().filter(|f| f.owner == info.name) {
            class.fields.push(FieldDef {
                name: member_name(cx.name(field.name)),
                descriptor: managed_type(field.repr, cx.interner),
                access: vec![Access::Public],
            });
        }
        class.methods.push(constructor(&parent, "()V"));
        if cx.classes.is_exception(info.name) {
            class
                .methods
                .push(constructor(&parent, "(Ljava/lang/Object;)V"));
        }
        for field in info.fields.iter().filter(|f| f.owner == info.name) {
            for setter in [false, true] {
                let method = accessor_name(cx, field, setter);
                if info.methods.iter().any(|m| cx.name(*m) == method) {
                    continue;
                }
                class.methods.push(accessor(cx, field, setter));
            }
        }
        out.classes.push(class);
    }
}

fn accessor_name(cx: &CodegenCx<'_>, field: &FieldInfo, setter: bool) -> String {
    let name = cx.name(field.name);
    if setter {
        format!("{name}=")
    } else {
        name.to_owned()
    }
}

/// Boxed getter or setter reached by named dispatch.
fn accessor(cx: &CodegenCx<'_>, field: &FieldInfo, setter: bool) -> MethodDef {
    let owner = cx.name(field.owner).to_owned();
    let name = member_name(cx.name(field.name));
    let descriptor = managed_type(field.repr, cx.interner);
    let mut em = MethodEmitter::new(if setter { 2 } else { 1 });
    em.emit(Insn::Aload { var: 0 });
    if setter {
        em.emit(Insn::Aload { var: 1 });
        em.convert(Repr::Boxed, field.repr, cx.interner);
        em.emit(Insn::Putfield {
            owner,
            name,
            descriptor,
        });
        em.emit(Insn::Aload { var: 1 });
    } else {
        em.emit(Insn::Getfield {
            owner,
            name,
            descriptor,
        });
        em.box_top(field.repr);
    }
    em.emit(Insn::Areturn);
    em.finish(
        member_name(&accessor_name(cx, field, setter)),
        boxed_descriptor(usize::from(setter)),
        vec![Access::Public],
    )
}

/// Descriptors of methods some vtable slot reaches, each once.
fn bridged<'a>(cx: &'a CodegenCx<'_>) -> Vec<&'a MethodDescriptor> {
    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    for table in cx.vtables.iter() {
        for slot in table.slots.iter().filter(|s| !s.poisoned) {
            let Some(d) = cx.descriptors.get(Some(slot.owner), slot.method) else {
                continue;
            };
            if seen.insert(d.symbol.as_str()) {
                out.push(d);
            }
        }
    }
    out
}

/// `<m>$boxed` on the owner of every vtable slot: unbox, call, box.
pub(super) fn define_bridges(cx: &CodegenCx<'_>, out: &mut ManagedOut) {
    for d in bridged(cx) {
        let Some(owner) = d.owner else {
            continue;
        };
        let owner_name = cx.name(owner);
        let params = u16::try_from(d.params.len()).unwrap_or(u16::MAX);
        let mut em = MethodEmitter::new(params.saturating_add(1));
        em.emit(Insn::Aload { var: 0 });
        for (i, param) in (1u16..).zip(&d.params) {
            em.emit(Insn::Aload { var: i });
            em.convert(Repr::Boxed, param.repr, cx.interner);
        }
        em.invoke_virtual(
            owner_name,
            &member_name(cx.name(d.name)),
            &d.managed_descriptor(cx.interner),
        );
        em.box_top(d.ret);
        em.emit(Insn::Areturn);
        let method = em.finish(
            bridge_name(cx.name(d.name)),
            boxed_descriptor(d.params.len()),
            vec![Access::Public],
        );
        out.add_method(owner_name, method);
    }
}

/// `main([Ljava/lang/String;)V`: call the program's `main` when it takes
/// no required arguments; report probes when instrumented.
pub(super) fn define_entry(cx: &CodegenCx<'_>, out: &mut ManagedOut) {
    let mut em = MethodEmitter::new(1);
    let entry = cx
        .descriptors
        .get(None, cx.names.main)
        .filter(|d| d.accepts(0));
    if let Some(d) = entry {
        for param in &d.params {
            match param.kind {
                ParamKind::Rest => em.construct(ARRAY),
                ParamKind::KeywordRest => em.construct(HASH),
                ParamKind::Required | ParamKind::Block => em.zero(param.repr),
            }
        }
        let main = out.main_class().to_owned();
        em.invoke_static(&main, &member_name(cx.name(d.name)), &d.managed_descriptor(cx.interner));
        em.pop(d.ret);
    }
    if cx.options.instrument {
        em.invoke_static(super::PROFILE, "report", "()V");
    }
    em.emit(Insn::Return);
    let method = em.finish(
        "main".to_owned(),
        "([Ljava/lang/String;)V".to_owned(),
        vec![Access::Public, Access::Static],
    );
    let main = out.main_class().to_owned();
    out.add_method(&main, method);
}
