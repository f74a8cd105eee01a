//! Calls, object construction, field access and `raise`.
//!
//! Statically resolved calls are `invokevirtual`/`invokestatic` with the
//! callee's own descriptor. Virtual calls go through the all-`Object`
//! `$boxed` bridge of the slot owner. Everything else is `invokedynamic`
//! bound by `rill/rt/Dispatch`, which looks the method up by name at the
//! first call.

use std::rc::Rc;

use rill_diagnostic::{Diagnostic, ErrorCode};
use rill_ir::{CallArgs, Name, Operand, ParamKind};

use super::document::Insn;
use super::emitter::{member_name, ARRAY, BLOCK, HASH, OBJECT_DESC};
use super::lowerer::Unit;
use crate::builtins::BuiltinMethod;
use crate::classes::{FieldInfo, ROOT_CLASS};
use crate::descriptor::{managed_type, MethodDescriptor};
use crate::dispatch::{note_dynamic, resolve_call, resolve_method, Dispatch, Receiver};
use crate::exceptions::{managed_builtin, managed_exception_class};
use crate::repr::{Repr, Tracked};
use crate::CodegenError;

pub(crate) const DISPATCH: &str = "rill/rt/Dispatch";
pub(crate) const DISPATCH_BOOTSTRAP: &str = "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;";

/// Descriptor taking `params` objects and returning an object.
pub(crate) fn boxed_descriptor(params: usize) -> String {
    format!("({})Ljava/lang/Object;", OBJECT_DESC.repeat(params))
}

/// Name of the uniform entry a vtable slot owner defines for `method`.
pub(crate) fn bridge_name(method: &str) -> String {
    format!("{}$boxed", member_name(method))
}

/// Arguments of a call site, evaluated left to right.
struct Evaluated {
    positional: Vec<Tracked<u16>>,
    keywords: Vec<(Name, Tracked<u16>)>,
    block: Option<Tracked<u16>>,
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

    /// Push an `RArray` holding `items`.
    pub(super) fn pack_array(&mut self, items: &[Tracked<u16>]) {
        self.em.construct(ARRAY);
        for item in items {
            self.push_boxed(*item);
            self.em
                .invoke_virtual(ARRAY, "push", "(Ljava/lang/Object;)Lrill/rt/RArray;");
        }
    }

    /// Push an `RHash` from keyword names to values.
    fn pack_keywords(&mut self, keywords: &[(Name, Tracked<u16>)]) {
        self.em.construct(HASH);
        for (name, value) in keywords {
            self.em.emit(Insn::Dup);
            self.em.string_object(self.cx.name(*name));
            self.push_boxed(*value);
            self.em.invoke_virtual(
                HASH,
                "put",
                "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;",
            );
            self.em.emit(Insn::Pop);
        }
    }

    fn unmatched_keywords(&mut self, callee: &str, keywords: &[(Name, Tracked<u16>)]) {
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

    /// Push the arguments of `d` in parameter order, each at its
    /// parameter's representation (boxed when `boxed`). The caller has
    /// checked `d.accepts(argc)`.
    fn bind_args(&mut self, d: &MethodDescriptor, args: &Evaluated, boxed: bool) {
        let argc = args.positional.len();
        let rest_end = argc.saturating_sub(d.trail);
        let mut required_seen = 0;
        for (i, param) in d.params.iter().enumerate() {
            let produced = match param.kind {
                ParamKind::Required => {
                    let index = if d.rest.is_some_and(|r| r < i) {
                        rest_end + (required_seen - d.lead)
                    } else {
                        required_seen
                    };
                    required_seen += 1;
                    match args.positional.get(index).copied() {
                        Some(arg) => {
                            self.push(arg, param.repr);
                        }
                        None => self.em.zero(param.repr),
                    }
                    param.repr
                }
                ParamKind::Rest => {
                    let excess = args
                        .positional
                        .get(d.lead..rest_end.max(d.lead))
                        .unwrap_or_default();
                    self.pack_array(excess);
                    param.repr
                }
                ParamKind::KeywordRest => {
                    self.pack_keywords(&args.keywords);
                    param.repr
                }
                ParamKind::Block => {
                    match args.block {
                        Some(block) => self.push_boxed(block),
                        None => self.em.emit(Insn::AconstNull),
                    }
                    Repr::Boxed
                }
            };
            if boxed {
                self.em.box_top(produced);
            }
        }
        if d.keyword_rest.is_none() && !args.keywords.is_empty() {
            self.unmatched_keywords(&d.symbol, &args.keywords);
        }
    }

    fn call_static(&mut self, d: &MethodDescriptor, this: Option<Tracked<u16>>, args: &Evaluated) -> Repr {
        let cx = self.cx;
        let name = member_name(cx.name(d.name));
        let descriptor = d.managed_descriptor(cx.interner);
        match d.owner {
            Some(owner) => {
                match this {
                    Some(this) => self.push(this, Repr::Struct(owner)),
                    None => self.em.emit(Insn::AconstNull),
                }
                self.bind_args(d, args, false);
                self.em.invoke_virtual(cx.name(owner), &name, &descriptor);
            }
            None => {
                self.bind_args(d, args, false);
                let main = self.out.main_class().to_owned();
                self.em.invoke_static(&main, &name, &descriptor);
            }
        }
        d.ret
    }

    fn call_virtual(&mut self, d: &MethodDescriptor, recv: Tracked<u16>, args: &Evaluated) -> Repr {
        let Some(owner) = d.owner else {
            return self.call_static(d, Some(recv), args);
        };
        let cx = self.cx;
        self.push(recv, Repr::Struct(owner));
        self.bind_args(d, args, true);
        self.em.invoke_virtual(
            cx.name(owner),
            &bridge_name(cx.name(d.name)),
            &boxed_descriptor(d.params.len()),
        );
        Repr::Boxed
    }

    fn call_builtin(&mut self, b: &BuiltinMethod, recv: Option<Tracked<u16>>, args: &Evaluated) -> Repr {
        if let (Some(kind), Some(recv)) = (b.receiver, recv) {
            self.push(recv, kind.repr());
        }
        for arg in &args.positional {
            self.push_boxed(*arg);
        }
        if !args.keywords.is_empty() {
            self.unmatched_keywords(b.method, &args.keywords);
        }
        self.em
            .invoke_static(b.managed.owner, b.managed.name, b.managed.descriptor);
        b.ret.repr()
    }

    /// Named dispatch of `method` to `recv` through `invokedynamic`.
    /// Keyword arguments travel as a trailing hash.
    fn call_dynamic(&mut self, recv: Tracked<u16>, method: &str, args: &Evaluated) -> Repr {
        self.push_boxed(recv);
        for arg in &args.positional {
            self.push_boxed(*arg);
        }
        let mut params = args.positional.len() + 1;
        if !args.keywords.is_empty() {
            self.pack_keywords(&args.keywords);
            params += 1;
        }
        let mut descriptor = format!("({}", OBJECT_DESC.repeat(params));
        if let Some(block) = args.block {
            self.push_boxed(block);
            self.em.checkcast(BLOCK);
            descriptor.push_str("Lrill/rt/Block;");
        }
        descriptor.push_str(")Ljava/lang/Object;");
        self.em.emit(Insn::Invokedynamic {
            name: member_name(method),
            descriptor,
            bootstrap_owner: DISPATCH.to_owned(),
            bootstrap_name: "bootstrap".to_owned(),
            bootstrap_descriptor: DISPATCH_BOOTSTRAP.to_owned(),
            bootstrap_args: Vec::new(),
        });
        Repr::Boxed
    }

    /// Named call of `method` with positional `args` and an optional block.
    pub(super) fn send(
        &mut self,
        recv: Tracked<u16>,
        method: &str,
        args: &[Tracked<u16>],
        block: Option<Tracked<u16>>,
    ) -> Repr {
        let evaluated = Evaluated {
            positional: args.to_vec(),
            keywords: Vec::new(),
            block,
        };
        self.call_dynamic(recv, method, &evaluated)
    }

    fn note_dynamic(&mut self, class: &str, method: &str) {
        let function = self.scope.function.clone();
        note_dynamic(self.cx, self.findings, class, method, &function, self.line);
    }

    fn field_ref(&self, field: &FieldInfo) -> (String, String, String) {
        let cx = self.cx;
        (
            cx.name(field.owner).to_owned(),
            member_name(cx.name(field.name)),
            managed_type(field.repr, cx.interner),
        )
    }

    fn load_field_value(&mut self, object: Tracked<u16>, field: &FieldInfo) -> Repr {
        let (owner, name, descriptor) = self.field_ref(field);
        self.push(object, Repr::Struct(field.owner));
        self.em.emit(Insn::Getfield {
            owner,
            name,
            descriptor,
        });
        field.repr
    }

    fn store_field_value(&mut self, object: Tracked<u16>, field: &FieldInfo, value: Tracked<u16>) -> Repr {
        let (owner, name, descriptor) = self.field_ref(field);
        self.push(object, Repr::Struct(field.owner));
        self.push(value, field.repr);
        self.em.emit(Insn::Putfield {
            owner,
            name,
            descriptor,
        });
        self.push(value, field.repr);
        field.repr
    }

    // -- Instructions --

    pub(super) fn method_call(&mut self, receiver: &Operand, method: Name, args: &CallArgs) -> Result<Repr, CodegenError> {
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
            Dispatch::Static { descriptor } => self.call_static(descriptor, Some(recv), &evaluated),
            Dispatch::Virtual { descriptor, .. } => self.call_virtual(descriptor, recv, &evaluated),
            Dispatch::Builtin(b) => self.call_builtin(b, Some(recv), &evaluated),
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
                self.call_dynamic(recv, method, &evaluated)
            }
        })
    }

    /// Call of top-level routine `name`: a static method of the main class
    /// when the program defines it, the `Kernel` helper for builtins, named
    /// dispatch to `self` otherwise.
    pub(super) fn call(&mut self, name: Name, args: &CallArgs) -> Result<Repr, CodegenError> {
        let evaluated = self.evaluate(args)?;
        let cx = self.cx;
        Ok(match resolve_call(cx, name, evaluated.positional.len()) {
            Dispatch::Static { descriptor } => self.call_static(descriptor, None, &evaluated),
            Dispatch::Builtin(b) => self.call_builtin(b, None, &evaluated),
            _ => {
                let method = cx.name(name);
                self.note_dynamic(ROOT_CLASS, method);
                let recv = self.self_or_nil();
                self.call_dynamic(recv, method, &evaluated)
            }
        })
    }

    /// `Class.new(args)`: construct, then run `initialize`.
    pub(super) fn new_object(&mut self, class: Name, args: &CallArgs) -> Result<Repr, CodegenError> {
        let cx = self.cx;
        if !cx.classes.contains(class) {
            return Err(CodegenError::UnknownClass {
                function: self.scope.function.clone(),
                class: cx.name(class).to_owned(),
            });
        }
        let evaluated = self.evaluate(args)?;
        let class_name = cx.name(class);
        self.em.construct(class_name);
        let this = self.spill(Repr::Struct(class));

        let argc = evaluated.positional.len();
        let init = cx
            .classes
            .find_method(class, cx.names.initialize)
            .and_then(|owner| cx.descriptors.get(Some(owner), cx.names.initialize));
        match init {
            Some(d) if d.accepts(argc) => {
                let ret = self.call_static(d, Some(this), &evaluated);
                self.em.pop(ret);
            }
            Some(_) => {
                let _ = self.call_dynamic(this, "initialize", &evaluated);
                self.em.emit(Insn::Pop);
            }
            None if argc > 0 => {
                self.em.string_object(&format!(
                    "wrong number of arguments calling '{class_name}.new' (given {argc}, expected 0)"
                ));
                self.em.throw_with_message(&managed_builtin("ArgumentError"));
            }
            None => {}
        }
        self.em.load(this.value, this.repr);
        Ok(this.repr)
    }

    pub(super) fn get_field(&mut self, object: &Operand, field: Name) -> Result<Repr, CodegenError> {
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
        let none = Evaluated {
            positional: Vec::new(),
            keywords: Vec::new(),
            block: None,
        };
        Ok(self.call_dynamic(obj, method, &none))
    }

    pub(super) fn set_field(&mut self, object: &Operand, field: Name, value: &Operand) -> Result<Repr, CodegenError> {
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
        let one = Evaluated {
            positional: vec![v],
            keywords: Vec::new(),
            block: None,
        };
        let _ = self.call_dynamic(obj, &method, &one);
        self.em.emit(Insn::Pop);
        self.em.load(v.value, v.repr);
        Ok(v.repr)
    }

    /// `raise Class, message`. Program classes that do not descend from an
    /// exception class raise `TypeError`.
    pub(super) fn raise(&mut self, class: Name, message: Option<&Operand>) -> Result<Repr, CodegenError> {
        match message {
            Some(op) => self.push_operand(op, Repr::Boxed)?,
            None => self.em.emit(Insn::AconstNull),
        }
        let cx = self.cx;
        let thrown = if cx.classes.contains(class) && !cx.classes.is_exception(class) {
            managed_builtin("TypeError")
        } else {
            managed_exception_class(cx, class)
        };
        self.em.throw_with_message(&thrown);
        self.em.emit(Insn::AconstNull);
        Ok(Repr::Boxed)
    }
}

fn obj_class_name(cx: &crate::context::CodegenCx<'_>, repr: Repr) -> String {
    match repr {
        Repr::Struct(class) => cx.name(class).to_owned(),
        _ => String::from("untyped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bridges_take_and_return_objects() {
        assert_eq!(boxed_descriptor(0), "()Ljava/lang/Object;");
        assert_eq!(
            boxed_descriptor(2),
            "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;"
        );
        assert_eq!(bridge_name("<=>"), "$lt=$gt$boxed");
    }
}
