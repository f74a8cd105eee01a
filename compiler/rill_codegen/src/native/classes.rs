//! Class layouts, metadata and the entry points the runtime calls.
//!
//! ```text
//!   class.<C>     struct: [meta][vtable][fields…]
//!   meta.<C>      [name][super name][method count][methods][instance words]
//!   methods.<C>   [name][thunk][arity] per method, accessors last
//!   vtable.<C>    [itself][<owner>#<m>.boxed | null]…
//!   meta.Object   top-level routines, for named dispatch to `self`
//! ```
//!
//! Thunks (`<symbol>.thunk`) take `(recv, argc, argv, block)` with boxed
//! arguments, check the arity and bind the call to the typed function.

use rill_ir::{Name, ParamKind};
use rill_native::abi::{ElemKind, KeyKind};
use rill_native::{
    BinOp, CastOp, CmpPred, ConstWord, FuncId, FunctionBuilder, FunctionFlags, GlobalId, GlobalInit,
    NativeType, Signature, StructId, StructTable, ValueId,
};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use super::calls::meta_global_name;
use super::collections::{array_fn, hash_fn, ArrayFn, Helper, HashFn};
use super::{user_flags, values, NativeOut, Rt};
use crate::classes::{ClassInfo, FieldInfo, ROOT_CLASS};
use crate::context::CodegenCx;
use crate::descriptor::MethodDescriptor;
use crate::repr::{Repr, Tracked};
use crate::vtable;

/// Module initializer run before `main`.
pub const INIT_FUNCTION: &str = "__rill_init";

fn thunk_name(symbol: &str) -> String {
    format!("{symbol}.thunk")
}

fn boxed_name(symbol: &str) -> String {
    format!("{symbol}.boxed")
}

fn thunk_signature() -> Signature {
    Signature::new(
        vec![NativeType::Ptr, NativeType::I64, NativeType::Ptr, NativeType::Ptr],
        NativeType::Ptr,
    )
}

/// Struct layout of every user class, keyed by class name.
pub(super) fn register_class_structs(cx: &CodegenCx<'_>, structs: &mut StructTable) -> FxHashMap<Name, StructId> {
    let mut out = FxHashMap::default();
    for class in cx.classes.iter() {
        let mut fields = vec![
            ("meta".to_owned(), NativeType::Ptr),
            ("vtable".to_owned(), NativeType::Ptr),
        ];
        fields.extend(
            class
                .fields
                .iter()
                .map(|f| (cx.name(f.name).to_owned(), f.repr.native_type())),
        );
        let id = structs.define_owned(&format!("class.{}", cx.name(class.name)), fields);
        out.insert(class.name, id);
    }
    out
}

/// A field reachable by named dispatch through a generated accessor.
struct Accessor<'a> {
    field: &'a FieldInfo,
    setter: bool,
}

impl Accessor<'_> {
    fn method(&self, cx: &CodegenCx<'_>) -> String {
        let name = cx.name(self.field.name);
        if self.setter {
            format!("{name}=")
        } else {
            name.to_owned()
        }
    }

    fn symbol(&self, cx: &CodegenCx<'_>) -> String {
        let suffix = if self.setter { "set" } else { "get" };
        format!("{}#{}.{suffix}", cx.name(self.field.owner), cx.name(self.field.name))
    }
}

/// Accessors of the fields `class` declares, minus names it defines as
/// methods.
fn accessors<'a>(cx: &CodegenCx<'_>, class: &'a ClassInfo) -> Vec<Accessor<'a>> {
    let mut out = Vec::new();
    for field in class.fields.iter().filter(|f| f.owner == class.name) {
        for setter in [false, true] {
            let accessor = Accessor { field, setter };
            let method = accessor.method(cx);
            if !class.methods.iter().any(|m| cx.name(*m) == method) {
                out.push(accessor);
            }
        }
    }
    out
}

/// Descriptors of methods some vtable slot points at.
fn boxed_entries<'c>(cx: &'c CodegenCx<'_>) -> Vec<&'c MethodDescriptor> {
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

/// Declare every user function with its thunk, the boxed entries of
/// vtable slots and field accessors.
pub(super) fn declare_functions(cx: &CodegenCx<'_>, out: &mut NativeOut) {
    for function in &cx.program.functions {
        let Some(d) = cx.descriptors.of(function) else {
            continue;
        };
        out.module
            .declare_function(&d.symbol, d.native_signature(), user_flags(cx, d.owner, d.name));
        out.module
            .declare_function(&thunk_name(&d.symbol), thunk_signature(), FunctionFlags::THUNK);
    }
    for d in boxed_entries(cx) {
        out.module
            .declare_function(&boxed_name(&d.symbol), d.boxed_signature(), FunctionFlags::THUNK);
    }
    for class in cx.classes.iter() {
        for accessor in accessors(cx, class) {
            out.module
                .declare_function(&accessor.symbol(cx), thunk_signature(), FunctionFlags::THUNK);
        }
    }
}

/// One method table row.
struct MethodRow {
    name: String,
    thunk: Option<FuncId>,
    arity: i64,
}

fn text_word(out: &mut NativeOut, text: &str) -> ConstWord {
    ConstWord::Global(out.module.text(text))
}

fn meta_global(
    out: &mut NativeOut,
    class: &str,
    super_name: Option<&str>,
    rows: Vec<MethodRow>,
    instance_words: u32,
) -> GlobalId {
    let mut words = Vec::with_capacity(rows.len() * 3);
    let mut count = 0_i64;
    for row in rows {
        let Some(thunk) = row.thunk else {
            continue;
        };
        words.push(text_word(out, &row.name));
        words.push(ConstWord::Func(thunk));
        words.push(ConstWord::Int(row.arity));
        count += 1;
    }
    let methods = if words.is_empty() {
        ConstWord::Null
    } else {
        ConstWord::Global(
            out.module
                .add_global(&format!("methods.{class}"), GlobalInit::Words(words), false),
        )
    };

    let meta = out
        .module
        .add_global(&meta_global_name(class), GlobalInit::Zeroed(5), false);
    let init = vec![
        text_word(out, class),
        match super_name {
            Some(name) => text_word(out, name),
            None => ConstWord::Null,
        },
        ConstWord::Int(count),
        methods,
        ConstWord::Int(i64::from(instance_words)),
    ];
    out.module.set_global_init(meta, GlobalInit::Words(init));
    trace!(class, methods = count, "class metadata");
    meta
}

/// Class metadata, method tables and vtables.
pub(super) fn build_class_globals(cx: &CodegenCx<'_>, out: &mut NativeOut) {
    let top: Vec<MethodRow> = cx
        .program
        .functions
        .iter()
        .filter(|f| f.owner.is_none())
        .filter_map(|f| cx.descriptors.of(f))
        .map(|d| MethodRow {
            name: cx.name(d.name).to_owned(),
            thunk: out.module.function_id(&thunk_name(&d.symbol)),
            arity: d.arity(),
        })
        .collect();
    meta_global(out, ROOT_CLASS, None, top, rill_native::abi::OBJECT_HEADER_WORDS);

    for class in cx.classes.iter() {
        let name = cx.name(class.name);
        let mut rows: Vec<MethodRow> = class
            .methods
            .iter()
            .filter_map(|m| cx.descriptors.get(Some(class.name), *m))
            .map(|d| MethodRow {
                name: cx.name(d.name).to_owned(),
                thunk: out.module.function_id(&thunk_name(&d.symbol)),
                arity: d.arity(),
            })
            .collect();
        for accessor in accessors(cx, class) {
            rows.push(MethodRow {
                name: accessor.method(cx),
                thunk: out.module.function_id(&accessor.symbol(cx)),
                arity: i64::from(accessor.setter),
            });
        }
        let super_name = class.superclass.map(|s| cx.name(s)).or(class.builtin_super);
        meta_global(out, name, super_name, rows, class.instance_words());

        if let Some(table) = cx.vtables.get(class.name) {
            let id = out.module.add_global(
                &vtable::global_name(name),
                GlobalInit::Zeroed(table.words()),
                false,
            );
            let mut words = vec![ConstWord::Global(id)];
            for slot in &table.slots {
                let entry = if slot.poisoned {
                    None
                } else {
                    cx.descriptors
                        .get(Some(slot.owner), slot.method)
                        .and_then(|d| out.module.function_id(&boxed_name(&d.symbol)))
                };
                words.push(entry.map_or(ConstWord::Null, ConstWord::Func));
            }
            out.module.set_global_init(id, GlobalInit::Words(words));
        }
    }
}

/// Boxed word `index` of `argv`.
fn arg_word(h: &mut Helper<'_>, argv: ValueId, index: ValueId) -> ValueId {
    let addr = h.word(argv, index);
    h.fb.load(NativeType::Ptr, addr)
}

fn unbox(h: &mut Helper<'_>, cx: &CodegenCx<'_>, value: ValueId, to: Repr) -> ValueId {
    values::materialize(
        &mut h.fb,
        h.out,
        cx,
        Tracked {
            value,
            repr: Repr::Boxed,
        },
        to,
    )
}

/// Boxed array of `argv[from..to]`.
fn rest_array(h: &mut Helper<'_>, argv: ValueId, from: i64, to: ValueId) -> ValueId {
    let (new, _) = array_fn(h.out, ArrayFn::New, ElemKind::Boxed);
    let (push, push_ret) = array_fn(h.out, ArrayFn::Push, ElemKind::Boxed);
    let start = h.int(from);
    let count = h.fb.binary(BinOp::Sub, to, start);
    let array = h.call(new, vec![count], NativeType::Ptr);
    let i = h.var(start);
    let head = h.fb.new_block("rest.head");
    h.fb.br(head);
    h.fb.position_at(head);
    let current = h.read(i, NativeType::I64);
    let more = h.cmp(CmpPred::Lt, current, to);
    let item = h.split(more, "rest.item");
    let exit = h.fb.current_block();
    h.fb.position_at(item);
    let current = h.read(i, NativeType::I64);
    let value = arg_word(h, argv, current);
    let _ = h.call(push, vec![array, value], push_ret);
    h.bump(i);
    h.fb.br(head);
    h.fb.position_at(exit);
    array
}

/// Text-keyed hash of keyword arguments: the trailing argument when
/// `present`, otherwise empty.
fn keyword_hash(h: &mut Helper<'_>, cx: &CodegenCx<'_>, argv: ValueId, at: ValueId, present: Option<ValueId>) -> ValueId {
    let (new, _) = hash_fn(h.out, HashFn::New, KeyKind::Text);
    let fresh = h.call(new, Vec::new(), NativeType::Ptr);
    let Some(present) = present else {
        return fresh;
    };
    let slot = h.var(fresh);
    let take = h.split(present, "kwargs");
    let cont = h.fb.current_block();
    h.fb.position_at(take);
    let boxed = arg_word(h, argv, at);
    let hash = unbox(h, cx, boxed, Repr::Hash(KeyKind::Text));
    h.fb.store(slot, hash);
    h.fb.br(cont);
    h.fb.position_at(cont);
    h.read(slot, NativeType::Ptr)
}

fn expected_arguments(d: &MethodDescriptor) -> String {
    if d.rest.is_some() {
        format!("{}+", d.required())
    } else {
        d.required().to_string()
    }
}

/// `<symbol>.thunk`: arity check, argument binding, typed call.
fn define_thunk(cx: &CodegenCx<'_>, out: &mut NativeOut, d: &MethodDescriptor) {
    let (Some(id), Some(target)) = (
        out.module.function_id(&thunk_name(&d.symbol)),
        out.module.function_id(&d.symbol),
    ) else {
        return;
    };
    let sig = thunk_signature();
    let mut h = Helper {
        fb: FunctionBuilder::new(&sig),
        out,
    };
    let (recv, argc, argv, block) = (h.fb.param(0), h.fb.param(1), h.fb.param(2), h.fb.param(3));

    // Keyword arguments of a named call travel as one trailing hash.
    let required = h.int(i64::try_from(d.required()).unwrap_or(i64::MAX));
    let kw_present = (d.keyword_rest.is_some() && d.rest.is_none()).then(|| h.cmp(CmpPred::Gt, argc, required));
    let end = match kw_present {
        Some(present) => {
            let extra = h.fb.cast(CastOp::BoolToInt, present);
            h.fb.binary(BinOp::Sub, argc, extra)
        }
        None => argc,
    };
    let pred = if d.rest.is_some() { CmpPred::Ge } else { CmpPred::Eq };
    let ok = h.cmp(pred, end, required);
    let bad = h.fb.not(ok);
    let fail = h.split(bad, "arity");
    let cont = h.fb.current_block();
    h.fb.position_at(fail);
    h.raise(
        "ArgumentError",
        &format!(
            "wrong number of arguments calling '{}' (expected {})",
            d.symbol,
            expected_arguments(d)
        ),
    );
    h.fb.position_at(cont);

    let mut args = Vec::with_capacity(d.params.len() + 1);
    if let Some(owner) = d.owner {
        args.push(unbox(&mut h, cx, recv, Repr::Struct(owner)));
    }
    let trail = h.int(i64::try_from(d.trail).unwrap_or(0));
    let trail_start = h.fb.binary(BinOp::Sub, end, trail);
    let (mut lead_seen, mut trail_seen) = (0_i64, 0_i64);
    for (i, param) in d.params.iter().enumerate() {
        let value = match param.kind {
            ParamKind::Required => {
                let index = if d.rest.is_some_and(|r| r < i) {
                    let k = h.int(trail_seen);
                    trail_seen += 1;
                    h.fb.binary(BinOp::Add, trail_start, k)
                } else {
                    let k = h.int(lead_seen);
                    lead_seen += 1;
                    k
                };
                let boxed = arg_word(&mut h, argv, index);
                unbox(&mut h, cx, boxed, param.repr)
            }
            ParamKind::Rest => rest_array(&mut h, argv, i64::try_from(d.lead).unwrap_or(0), trail_start),
            ParamKind::KeywordRest => keyword_hash(&mut h, cx, argv, end, kw_present),
            ParamKind::Block => block,
        };
        args.push(value);
    }

    let result = h.call(target, args, d.ret.native_type());
    let boxed = values::box_value(&mut h.fb, h.out, result, d.ret);
    h.fb.ret(Some(boxed));
    let Helper { fb, out } = h;
    out.define(id, fb);
}

/// `<symbol>.boxed`: the vtable entry, every argument boxed.
fn define_boxed(cx: &CodegenCx<'_>, out: &mut NativeOut, d: &MethodDescriptor) {
    let (Some(id), Some(target), Some(owner)) = (
        out.module.function_id(&boxed_name(&d.symbol)),
        out.module.function_id(&d.symbol),
        d.owner,
    ) else {
        return;
    };
    let sig = d.boxed_signature();
    let mut h = Helper {
        fb: FunctionBuilder::new(&sig),
        out,
    };
    let this = h.fb.param(0);
    let mut args = vec![unbox(&mut h, cx, this, Repr::Struct(owner))];
    for (i, param) in d.params.iter().enumerate() {
        let value = h.fb.param(u32::try_from(i + 1).unwrap_or(u32::MAX));
        args.push(unbox(&mut h, cx, value, param.repr));
    }
    let result = h.call(target, args, d.ret.native_type());
    let boxed = values::box_value(&mut h.fb, h.out, result, d.ret);
    h.fb.ret(Some(boxed));
    let Helper { fb, out } = h;
    out.define(id, fb);
}

/// Getter or setter thunk of one field.
fn define_accessor(cx: &CodegenCx<'_>, out: &mut NativeOut, accessor: &Accessor<'_>) {
    let Some(id) = out.module.function_id(&accessor.symbol(cx)) else {
        return;
    };
    let field = accessor.field;
    let layout = out.class_struct(field.owner);
    let mut h = Helper {
        fb: FunctionBuilder::new(&thunk_signature()),
        out,
    };
    let (recv, argc, argv) = (h.fb.param(0), h.fb.param(1), h.fb.param(2));
    let this = unbox(&mut h, cx, recv, Repr::Struct(field.owner));

    if accessor.setter {
        let one = h.int(1);
        let missing = h.cmp(CmpPred::Lt, argc, one);
        let fail = h.split(missing, "arity");
        let cont = h.fb.current_block();
        h.fb.position_at(fail);
        h.raise(
            "ArgumentError",
            &format!("wrong number of arguments calling '{}' (expected 1)", accessor.method(cx)),
        );
        h.fb.position_at(cont);
        let zero = h.int(0);
        let boxed = arg_word(&mut h, argv, zero);
        let value = unbox(&mut h, cx, boxed, field.repr);
        match layout {
            Some(layout) => h.set(this, layout, field.index, value),
            None => {
                let index = h.int(i64::from(field.index));
                let addr = h.word(this, index);
                h.fb.store(addr, value);
            }
        }
        h.fb.ret(Some(boxed));
    } else {
        let value = match layout {
            Some(layout) => h.get(this, layout, field.index),
            None => {
                let index = h.int(i64::from(field.index));
                let addr = h.word(this, index);
                h.fb.load(field.repr.native_type(), addr)
            }
        };
        let boxed = values::box_value(&mut h.fb, h.out, value, field.repr);
        h.fb.ret(Some(boxed));
    }
    let Helper { fb, out } = h;
    out.define(id, fb);
}

/// Bodies of every thunk, boxed entry and accessor declared by
/// [`declare_functions`].
pub(super) fn define_entries(cx: &CodegenCx<'_>, out: &mut NativeOut) {
    for function in &cx.program.functions {
        if let Some(d) = cx.descriptors.of(function) {
            define_thunk(cx, out, d);
        }
    }
    for d in boxed_entries(cx) {
        define_boxed(cx, out, d);
    }
    for class in cx.classes.iter() {
        for accessor in accessors(cx, class) {
            define_accessor(cx, out, &accessor);
        }
    }
}

/// `__rill_init`: register every class, parents first.
pub(super) fn define_init(cx: &CodegenCx<'_>, out: &mut NativeOut) {
    let sig = Signature::new(Vec::new(), NativeType::Void);
    let id = out
        .module
        .declare_function(INIT_FUNCTION, sig.clone(), FunctionFlags::ENTRY);
    let mut fb = FunctionBuilder::new(&sig);
    let names = std::iter::once(ROOT_CLASS).chain(cx.classes.iter().map(|c| cx.name(c.name)));
    let mut registered = 0_usize;
    for name in names {
        let Some(meta) = out.module.global_id(&meta_global_name(name)) else {
            continue;
        };
        let meta = fb.global_addr(meta);
        let _ = values::call_rt(&mut fb, out, Rt::RegisterClass, vec![meta]);
        registered += 1;
    }
    fb.ret(None);
    out.define(id, fb);
    debug!(classes = registered, "class registration");
}
