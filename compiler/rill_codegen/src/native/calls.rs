//! Calls, object construction, field access and `raise`.

use std::rc::Rc;

use rill_diagnostic::{Diagnostic, ErrorCode};
use rill_ir::{CallArgs, Name, Operand, ParamKind};
use rill_native::abi::{self, ElemKind, KeyKind};
use rill_native::{Callee, FuncId, NativeType, ValueId};

use super::collections::{array_fn, hash_fn, ArrayFn, HashFn};
use super::lowerer::Unit;
use super::runtime_decl::declare_builtin;
use super::{values, Rt};
use crate::builtins::BuiltinMethod;
use crate::classes::{FieldInfo, ROOT_CLASS};
use crate::descriptor::MethodDescriptor;
use crate::dispatch::{note_dynamic, resolve_call, resolve_method, Dispatch, Receiver};
use crate::repr::{Repr, Tracked};
use crate::CodegenError;

/// Arguments of a call site, evaluated left to right.
struct Evaluated {
    positional: Vec<Tracked<ValueId>>,
    keywords: Vec<(Name, Tracked<ValueId>)>,
    block: Option<Tracked<ValueId>>,
}

/// Name of the global holding class metadata of `class`.
pub(super) fn meta_global_name(class: &str) -> String {
    format!("meta.{class}")
}

impl Unit<'_, '_> {
    fn evaluate(&mut self, args: &CallArgs) -> Result<Evaluated, CodegenError> {
        let positional = self.operands(&args.positional)?;
        let mut keywords = Vec::with_capacity(args.keywords.len());
        for (name, op) in &args.keywords {
            keywords.push((*name, self.operand(op)?));
        }
        let block = match &args.block {
            Some(op) => Some(self.operand(op)?),
            None => None,
        };
        Ok(Evaluated {
            positional,
            keywords,
            block,
        })
    }

    /// Send `method` to the boxed `recv` through the runtime.
    pub(super) fn send_boxed(
        &mut self,
        recv: ValueId,
        method: &str,
        args: &[ValueId],
        block: Option<ValueId>,
    ) -> ValueId {
        let name = self.text(method);
        let argc = self.fb.iconst(i64::try_from(args.len()).unwrap_or(i64::MAX));
        let argv = self.argv(args);
        let block = match block {
            Some(b) => b,
            None => self.fb.null(),
        };
        self.rt(Rt::Send, vec![recv, name, argc, argv, block])
    }

    /// Boxed array holding `items`.
    fn pack_array(&mut self, items: &[Tracked<ValueId>]) -> ValueId {
        let (new, _) = array_fn(self.out, ArrayFn::New, ElemKind::Boxed);
        let (push, _) = array_fn(self.out, ArrayFn::Push, ElemKind::Boxed);
        let cap = self.fb.iconst(i64::try_from(items.len()).unwrap_or(0));
        let arr = self.call_func(new, vec![cap], NativeType::Ptr);
        for item in items {
            let v = self.boxed(*item);
            let _ = self.call_func(push, vec![arr, v], NativeType::Ptr);
        }
        arr
    }

    /// Text-keyed hash holding `keywords`.
    fn pack_keywords(&mut self, keywords: &[(Name, Tracked<ValueId>)]) -> ValueId {
        let (new, _) = hash_fn(self.out, HashFn::New, KeyKind::Text);
        let (set, _) = hash_fn(self.out, HashFn::Set, KeyKind::Text);
        let hash = self.call_func(new, Vec::new(), NativeType::Ptr);
        for (name, value) in keywords {
            let text = self.text(self.cx.name(*name));
            let key = self.rt(Rt::StrLit, vec![text]);
            let v = self.boxed(*value);
            let _ = self.call_func(set, vec![hash, key, v], NativeType::Ptr);
        }
        hash
    }

    fn unmatched_keywords(&mut self, callee: &str, keywords: &[(Name, Tracked<ValueId>)]) {
        for (name, _) in keywords {
            let diagnostic = Diagnostic::warning(ErrorCode::E5002)
                .with_message(format!(
                    "keyword `{}` matches no parameter of `{callee}`",
                    self.cx.name(*name)
                ))
                .with_location(self.location())
                .with_note("the argument is dropped");
            let _ = self.findings.push(diagnostic);
        }
    }

    /// Arguments of `d` in parameter order, each at its parameter's
    /// representation. The caller has checked `d.accepts(argc)`.
    fn bind_args(&mut self, d: &MethodDescriptor, args: Evaluated) -> Vec<ValueId> {
        let argc = args.positional.len();
        let rest_end = argc.saturating_sub(d.trail);
        let mut out = Vec::with_capacity(d.params.len());
        let mut required_seen = 0;
        for (i, param) in d.params.iter().enumerate() {
            let value = match param.kind {
                ParamKind::Required => {
                    let index = if d.rest.is_some_and(|r| r < i) {
                        rest_end + (required_seen - d.lead)
                    } else {
                        required_seen
                    };
                    required_seen += 1;
                    match args.positional.get(index).copied() {
                        Some(arg) => self.materialize(arg, param.repr),
                        None => self.zero(param.repr),
                    }
                }
                ParamKind::Rest => {
                    let excess = args
                        .positional
                        .get(d.lead..rest_end.max(d.lead))
                        .unwrap_or_default();
                    self.pack_array(excess)
                }
                ParamKind::KeywordRest => self.pack_keywords(&args.keywords),
                ParamKind::Block => match args.block {
                    Some(block) => self.boxed(block),
                    None => self.fb.null(),
                },
            };
            out.push(value);
        }
        if d.keyword_rest.is_none() && !args.keywords.is_empty() {
            self.unmatched_keywords(&d.symbol, &args.keywords);
        }
        out
    }

    /// Function id of user function `d`, declared on first use.
    fn user_function(&mut self, d: &MethodDescriptor) -> FuncId {
        if let Some(id) = self.out.module.function_id(&d.symbol) {
            return id;
        }
        let flags = super::user_flags(self.cx, d.owner, d.name);
        self.out
            .module
            .declare_function(&d.symbol, d.native_signature(), flags)
    }

    fn call_static(
        &mut self,
        d: &MethodDescriptor,
        this: Option<Tracked<ValueId>>,
        args: Evaluated,
    ) -> Tracked<ValueId> {
        let mut argv = Vec::with_capacity(d.params.len() + 1);
        if let Some(owner) = d.owner {
            let this = match this {
                Some(this) => self.materialize(this, Repr::Struct(owner)),
                None => self.fb.null(),
            };
            argv.push(this);
        }
        argv.extend(self.bind_args(d, args));
        let id = self.user_function(d);
        Tracked {
            value: self.call_func(id, argv, d.ret.native_type()),
            repr: d.ret,
        }
    }

    fn call_virtual(
        &mut self,
        d: &MethodDescriptor,
        word: u32,
        recv: Tracked<ValueId>,
        args: Evaluated,
    ) -> Tracked<ValueId> {
        let this = self.boxed(recv);
        let bound = self.bind_args(d, args);
        let mut argv = Vec::with_capacity(bound.len() + 1);
        argv.push(this);
        for (value, param) in bound.into_iter().zip(&d.params) {
            argv.push(values::box_value(&mut self.fb, self.out, value, param.repr));
        }
        let table = self.load_word(this, abi::OBJECT_VTABLE, NativeType::Ptr);
        let entry = self.load_word(table, word, NativeType::Ptr);
        Tracked {
            value: self.fb.call(Callee::Indirect(entry), argv, NativeType::Ptr),
            repr: Repr::Boxed,
        }
    }

    fn call_builtin(
        &mut self,
        b: &BuiltinMethod,
        recv: Option<Tracked<ValueId>>,
        args: Evaluated,
    ) -> Tracked<ValueId> {
        let ext = declare_builtin(&mut self.out.module, b);
        let mut argv = Vec::with_capacity(b.arity + 1);
        if let (Some(kind), Some(recv)) = (b.receiver, recv) {
            argv.push(self.materialize(recv, kind.repr()));
        }
        for arg in &args.positional {
            argv.push(self.boxed(*arg));
        }
        if !args.keywords.is_empty() {
            self.unmatched_keywords(b.method, &args.keywords);
        }
        let ret = b.ret.repr();
        Tracked {
            value: self.fb.call(Callee::Extern(ext), argv, ret.native_type()),
            repr: ret,
        }
    }

    /// Named dispatch of `method` to `recv`. Keyword arguments travel as a
    /// trailing text-keyed hash.
    fn call_dynamic(&mut self, recv: ValueId, method: &str, args: Evaluated) -> Tracked<ValueId> {
        let mut argv: Vec<ValueId> = args.positional.iter().map(|a| self.boxed(*a)).collect();
        if !args.keywords.is_empty() {
            argv.push(self.pack_keywords(&args.keywords));
        }
        let block = args.block.map(|b| self.boxed(b));
        Tracked {
            value: self.send_boxed(recv, method, &argv, block),
            repr: Repr::Boxed,
        }
    }

    fn note_dynamic(&mut self, class: &str, method: &str) {
        let function = self.scope.function.clone();
        note_dynamic(self.cx, self.findings, class, method, &function, self.line);
    }

    fn load_field_value(&mut self, object: Tracked<ValueId>, field: &FieldInfo) -> Tracked<ValueId> {
        let this = self.materialize(object, Repr::Struct(field.owner));
        let value = match self.out.class_struct(field.owner) {
            Some(layout) => self.fb.load_field(&self.out.structs, this, layout, field.index),
            None => self.load_word(this, field.index, field.repr.native_type()),
        };
        Tracked {
            value,
            repr: field.repr,
        }
    }

    fn store_field_value(
        &mut self,
        object: Tracked<ValueId>,
        field: &FieldInfo,
        value: Tracked<ValueId>,
    ) -> Tracked<ValueId> {
        let this = self.materialize(object, Repr::Struct(field.owner));
        let v = self.materialize(value, field.repr);
        match self.out.class_struct(field.owner) {
            Some(layout) => self.fb.store_field(&self.out.structs, this, layout, field.index, v),
            None => self.store_word(this, field.index, v),
        }
        Tracked {
            value: v,
            repr: field.repr,
        }
    }

    // -- Instructions --

    pub(super) fn method_call(
        &mut self,
        receiver: &Operand,
        method: Name,
        args: &CallArgs,
    ) -> Result<Tracked<ValueId>, CodegenError> {
        let recv = self.operand(receiver)?;
        let evaluated = self.evaluate(args)?;
        let exact = receiver.binding().is_some_and(|id| self.tracker.is_exact(id));
        let scope = Rc::clone(&self.scope);
        let cx = self.cx;
        let dispatch = resolve_method(
            cx,
            Receiver {
                repr: recv.repr,
                ty: scope.types.operand(receiver),
                exact,
            },
            method,
            evaluated.positional.len(),
        );
        Ok(match dispatch {
            Dispatch::Static { descriptor } => self.call_static(descriptor, Some(recv), evaluated),
            Dispatch::Virtual { descriptor, word } => self.call_virtual(descriptor, word, recv, evaluated),
            Dispatch::Builtin(b) => self.call_builtin(b, Some(recv), evaluated),
            Dispatch::Getter(field) => self.load_field_value(recv, field),
            Dispatch::Setter(field) => {
                let value = match evaluated.positional.first().copied() {
                    Some(v) => v,
                    None => self.nil(),
                };
                self.store_field_value(recv, field, value)
            }
            Dispatch::Dynamic { class } => {
                let method = cx.name(method);
                self.note_dynamic(&class, method);
                let recv = self.boxed(recv);
                self.call_dynamic(recv, method, evaluated)
            }
        })
    }

    /// Call of top-level routine `name`: direct when the program defines
    /// it, the runtime entry for `Kernel` builtins, named dispatch to `self`
    /// otherwise.
    pub(super) fn call(&mut self, name: Name, args: &CallArgs) -> Result<Tracked<ValueId>, CodegenError> {
        let evaluated = self.evaluate(args)?;
        let cx = self.cx;
        Ok(match resolve_call(cx, name, evaluated.positional.len()) {
            Dispatch::Static { descriptor } => self.call_static(descriptor, None, evaluated),
            Dispatch::Builtin(b) => self.call_builtin(b, None, evaluated),
            _ => {
                let method = cx.name(name);
                self.note_dynamic(ROOT_CLASS, method);
                let recv = match self.self_value {
                    Some(this) => self.boxed(this),
                    None => self.fb.null(),
                };
                self.call_dynamic(recv, method, evaluated)
            }
        })
    }

    /// `Class.new(args)`: allocate, fill the header, run `initialize`.
    pub(super) fn new_object(&mut self, class: Name, args: &CallArgs) -> Result<Tracked<ValueId>, CodegenError> {
        let cx = self.cx;
        let Some(info) = cx.classes.get(class) else {
            return Err(CodegenError::UnknownClass {
                function: self.scope.function.clone(),
                class: cx.name(class).to_owned(),
            });
        };
        let evaluated = self.evaluate(args)?;
        let class_name = cx.name(class);

        let bytes = self.fb.iconst(i64::from(info.instance_words()) * i64::from(rill_native::WORD));
        let object = self.rt(Rt::Alloc, vec![bytes]);
        let meta = self
            .out
            .module
            .add_global(&meta_global_name(class_name), rill_native::GlobalInit::Zeroed(5), false);
        let meta = self.fb.global_addr(meta);
        self.store_word(object, abi::OBJECT_META, meta);
        if cx.vtables.has_vtable(class) {
            let table = self.out.module.add_global(
                &crate::vtable::global_name(class_name),
                rill_native::GlobalInit::Zeroed(1),
                false,
            );
            let table = self.fb.global_addr(table);
            self.store_word(object, abi::OBJECT_VTABLE, table);
        }
        let this = Tracked {
            value: object,
            repr: Repr::Struct(class),
        };

        let argc = evaluated.positional.len();
        let init = cx
            .classes
            .find_method(class, cx.names.initialize)
            .and_then(|owner| cx.descriptors.get(Some(owner), cx.names.initialize));
        match init {
            Some(d) if d.accepts(argc) => {
                let _ = self.call_static(d, Some(this), evaluated);
            }
            Some(_) => {
                let _ = self.call_dynamic(object, "initialize", evaluated);
            }
            None if argc > 0 => {
                let class_text = self.text("ArgumentError");
                let message = self.text(&format!(
                    "wrong number of arguments calling '{class_name}.new' (given {argc}, expected 0)"
                ));
                let message = self.rt(Rt::StrLit, vec![message]);
                let _ = self.rt(Rt::Raise, vec![class_text, message]);
            }
            None => {}
        }
        Ok(this)
    }

    pub(super) fn get_field(&mut self, object: &Operand, field: Name) -> Result<Tracked<ValueId>, CodegenError> {
        let obj = self.operand(object)?;
        let cx = self.cx;
        if let Repr::Struct(class) = obj.repr {
            if let Some(info) = cx.classes.field(class, field) {
                return Ok(self.load_field_value(obj, info));
            }
        }
        let method = cx.name(field);
        let class = obj_class_name(cx, obj.repr);
        self.note_dynamic(&class, method);
        let recv = self.boxed(obj);
        Ok(Tracked {
            value: self.send_boxed(recv, method, &[], None),
            repr: Repr::Boxed,
        })
    }

    pub(super) fn set_field(
        &mut self,
        object: &Operand,
        field: Name,
        value: &Operand,
    ) -> Result<Tracked<ValueId>, CodegenError> {
        let obj = self.operand(object)?;
        let v = self.operand(value)?;
        let cx = self.cx;
        if let Repr::Struct(class) = obj.repr {
            if let Some(info) = cx.classes.field(class, field) {
                return Ok(self.store_field_value(obj, info, v));
            }
        }
        let method = format!("{}=", cx.name(field));
        let class = obj_class_name(cx, obj.repr);
        self.note_dynamic(&class, &method);
        let recv = self.boxed(obj);
        let boxed = self.boxed(v);
        let _ = self.send_boxed(recv, &method, &[boxed], None);
        Ok(v)
    }

    /// `raise Class, message`.
    pub(super) fn raise(&mut self, class: Name, message: Option<&Operand>) -> Result<Tracked<ValueId>, CodegenError> {
        let message = match message {
            Some(op) => self.operand_as(op, Repr::Boxed)?,
            None => self.fb.null(),
        };
        let class = self.text(self.cx.name(class));
        Ok(Tracked {
            value: self.rt(Rt::Raise, vec![class, message]),
            repr: Repr::Boxed,
        })
    }
}

fn obj_class_name(cx: &crate::context::CodegenCx<'_>, repr: Repr) -> String {
    match repr {
        Repr::Struct(class) => cx.name(class).to_owned(),
        _ => String::from("untyped"),
    }
}
