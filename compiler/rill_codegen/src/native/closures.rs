//! Block and lambda literals.
//!
//! A closure literal becomes two functions and a heap object:
//!
//! ```text
//!   <scope>$block<N>          (env, params…) -> value   typed entry
//!   <scope>$block<N>.generic  (env, argc, argv) -> value
//!   rl.closure                [class][generic][env][arity][typed]
//! ```
//!
//! The environment is a heap vector laid out by
//! [`ClosureCaptures`](crate::captures::ClosureCaptures). Captured words
//! keep the representation they had in the creating scope. Shared locals
//! are not captured; both sides reach them through module globals.

use std::rc::Rc;

use rill_diagnostic::{Diagnostic, ErrorCode};
use rill_ir::walk::{stored_names, Descend};
use rill_ir::{BindingId, ClosureLiteral, Name, Operand};
use rill_native::abi::{closure as fields, BuiltinClass};
use rill_native::{CmpPred, FuncId, FunctionBuilder, FunctionFlags, NativeType, Signature, ValueId, WORD};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use super::lowerer::{KnownClosure, Scope, Unit};
use super::{values, NativeOut, Rt};
use crate::captures::{CaptureSlot, ClosureCaptures};
use crate::context::CodegenCx;
use crate::locals::{LocalPlan, PlanInputs};
use crate::repr::{Repr, Tracked};
use crate::CodegenError;

const CLOSURE_WORDS: i64 = 5;

/// Build `<typed>.generic`: read up to `params.len()` boxed arguments
/// (missing ones are nil), convert them and call the typed entry.
fn build_generic(cx: &CodegenCx<'_>, out: &mut NativeOut, name: &str, typed: FuncId, params: &[Repr]) -> FuncId {
    let sig = Signature::new(vec![NativeType::Ptr, NativeType::I64, NativeType::Ptr], NativeType::Ptr);
    let id = out.module.declare_function(name, sig.clone(), FunctionFlags::CALLBACK);
    let mut fb = FunctionBuilder::new(&sig);
    let (env, argc, argv) = (fb.param(0), fb.param(1), fb.param(2));
    let mut args = vec![env];
    for (i, repr) in params.iter().enumerate() {
        let index = i64::try_from(i).unwrap_or(i64::MAX);
        let slot = fb.alloca(1);
        let nil = fb.null();
        fb.store(slot, nil);
        let present = fb.iconst(index);
        let present = fb.icmp(CmpPred::Lt, present, argc);
        let read = fb.new_block(&format!("arg{i}"));
        let cont = fb.new_block(&format!("arg{i}.cont"));
        fb.cond_br(present, read, cont);
        fb.position_at(read);
        let at = fb.iconst(index);
        let addr = fb.word_addr(argv, at);
        let value = fb.load(NativeType::Ptr, addr);
        fb.store(slot, value);
        fb.br(cont);
        fb.position_at(cont);
        let boxed = fb.load(NativeType::Ptr, slot);
        args.push(values::materialize(
            &mut fb,
            out,
            cx,
            Tracked {
                value: boxed,
                repr: Repr::Boxed,
            },
            *repr,
        ));
    }
    let result = fb.call(rill_native::Callee::Func(typed), args, NativeType::Ptr);
    fb.ret(Some(result));
    out.define(id, fb);
    id
}

impl Unit<'_, '_> {
    /// Value and representation stored in capture word `slot`.
    fn capture_value(&mut self, slot: CaptureSlot) -> Result<Tracked<ValueId>, CodegenError> {
        Ok(match slot {
            CaptureSlot::SelfRef => match self.self_value {
                Some(this) => this,
                None => self.nil(),
            },
            CaptureSlot::Block => match self.block_value {
                Some(block) => Tracked {
                    value: block,
                    repr: Repr::Boxed,
                },
                None => self.nil(),
            },
            CaptureSlot::Local(name) => self.load_local(name),
            CaptureSlot::Binding(id) => match self.tracker.get(id) {
                Some(value) => value,
                None => self.nil(),
            },
        })
    }

    pub(super) fn closure(
        &mut self,
        literal: &ClosureLiteral,
        result: Option<BindingId>,
    ) -> Result<Tracked<ValueId>, CodegenError> {
        let scope = Rc::clone(&self.scope);
        let captures = ClosureCaptures::analyze(
            literal,
            &scope.visible,
            &scope.shared,
            self.self_value.is_some(),
            self.block_value.is_some(),
        );

        // Environment, filled in the creating scope.
        let mut captured = Vec::with_capacity(captures.len());
        for slot in &captures.slots {
            captured.push((*slot, self.capture_value(*slot)?));
        }
        let env = if captured.is_empty() {
            self.fb.null()
        } else {
            let words = i64::try_from(captured.len()).unwrap_or(i64::MAX);
            let bytes = self.fb.iconst(words * i64::from(WORD));
            let env = self.rt(Rt::Alloc, vec![bytes]);
            for (i, (_, value)) in captured.iter().enumerate() {
                self.store_word(env, u32::try_from(i).unwrap_or(u32::MAX), value.value);
            }
            env
        };

        let n = self.out.next_callback(&scope.symbol);
        let name = format!("{}$block{n}", scope.symbol);
        trace!(%name, captures = captures.len(), "closure");
        let declared: Vec<Repr> = literal
            .params
            .iter()
            .map(|p| self.cx.classes.repr_of(&p.ty))
            .collect();
        let (plan, visible) = self.closure_plan(literal, &captured, &declared);
        // parameters take the slot representation their uses demand
        let params: Vec<Repr> = literal
            .params
            .iter()
            .zip(&declared)
            .map(|(p, r)| plan.local(p.name).unwrap_or(*r))
            .collect();
        let mut sig_params = vec![NativeType::Ptr];
        sig_params.extend(params.iter().map(|r| r.native_type()));
        let sig = Signature::new(sig_params, NativeType::Ptr);
        let typed = self
            .out
            .module
            .declare_function(&name, sig.clone(), FunctionFlags::CALLBACK);

        self.lower_closure_body(literal, plan, visible, typed, &name, &sig, &captured, &params)?;
        let generic = build_generic(self.cx, self.out, &format!("{name}.generic"), typed, &params);

        let bytes = self.fb.iconst(CLOSURE_WORDS * i64::from(WORD));
        let object = self.rt(Rt::Alloc, vec![bytes]);
        let layout = self.out.abi.closure;
        let tag = self.fb.iconst(BuiltinClass::Proc.tag());
        let generic_addr = self.fb.func_addr(generic);
        let arity = self.fb.iconst(i64::try_from(params.len()).unwrap_or(i64::MAX));
        let typed_addr = self.fb.func_addr(typed);
        for (field, value) in [
            (fields::CLASS, tag),
            (fields::GENERIC_FN, generic_addr),
            (fields::ENV, env),
            (fields::ARITY, arity),
            (fields::TYPED_FN, typed_addr),
        ] {
            self.fb.store_field(&self.out.structs, object, layout, field, value);
        }

        if let Some(id) = result {
            self.closures.insert(id, KnownClosure { typed, params });
        }
        Ok(Tracked {
            value: object,
            repr: Repr::Boxed,
        })
    }

    /// Plan the locals of `literal` with its parameters and captured words
    /// bound on entry. Also returns the names the body can see.
    fn closure_plan(
        &self,
        literal: &ClosureLiteral,
        captured: &[(CaptureSlot, Tracked<ValueId>)],
        params: &[Repr],
    ) -> (LocalPlan, FxHashSet<Name>) {
        let mut entry: Vec<_> = literal
            .params
            .iter()
            .zip(params)
            .map(|(p, r)| (p.name, *r))
            .collect();
        let mut outer = FxHashMap::default();
        for (slot, value) in captured {
            match slot {
                CaptureSlot::Local(name) => entry.push((*name, value.repr)),
                CaptureSlot::Binding(id) => {
                    outer.insert(*id, value.repr);
                }
                CaptureSlot::SelfRef | CaptureSlot::Block => {}
            }
        }
        let mut visible = stored_names(&literal.body, Descend::Regions);
        visible.extend(entry.iter().map(|(name, _)| *name));
        let inputs = PlanInputs {
            entry,
            shared: (*self.scope.shared).clone(),
            outer,
        };
        (LocalPlan::build(&literal.body, inputs, &self.cx.classes), visible)
    }

    fn lower_closure_body(
        &mut self,
        literal: &ClosureLiteral,
        plan: LocalPlan,
        visible: FxHashSet<Name>,
        typed: FuncId,
        name: &str,
        sig: &Signature,
        captured: &[(CaptureSlot, Tracked<ValueId>)],
        params: &[Repr],
    ) -> Result<(), CodegenError> {
        let scope = Scope::new(
            name.to_owned(),
            self.scope.function.clone(),
            plan,
            Rc::clone(&self.scope.shared),
            visible,
            Rc::clone(&self.scope.types),
        );

        let mut fb = FunctionBuilder::new(sig);
        let frame = fb.alloca(scope.frame_words);
        let env = fb.param(0);
        let mut unit = Unit::new(
            self.cx,
            &mut *self.out,
            &mut *self.findings,
            Rc::new(scope),
            fb,
            frame,
            Repr::Boxed,
        );
        for (i, (slot, value)) in captured.iter().enumerate() {
            let word = unit.load_word(env, u32::try_from(i).unwrap_or(u32::MAX), value.repr.native_type());
            let loaded = Tracked {
                value: word,
                repr: value.repr,
            };
            match slot {
                CaptureSlot::SelfRef => unit.self_value = Some(loaded),
                CaptureSlot::Block => unit.block_value = Some(word),
                CaptureSlot::Local(name) => unit.store_local(*name, loaded),
                CaptureSlot::Binding(id) => unit.tracker.record(*id, word, value.repr),
            }
        }
        for (i, (param, repr)) in literal.params.iter().zip(params).enumerate() {
            let value = unit.fb.param(u32::try_from(i + 1).unwrap_or(u32::MAX));
            unit.store_local(param.name, Tracked { value, repr: *repr });
        }
        unit.lower_body(&literal.body)?;
        let fb = unit.fb;
        self.out.define(typed, fb);
        Ok(())
    }

    /// Call a closure value. A binding holding a literal of this unit is
    /// called through its typed entry; anything else through the runtime.
    pub(super) fn call_closure(&mut self, closure: &Operand, args: &[Operand]) -> Result<Tracked<ValueId>, CodegenError> {
        let known = closure
            .binding()
            .and_then(|id| self.closures.get(&id).cloned())
            .filter(|k| k.params.len() == args.len());
        let target = self.operand(closure)?;
        if let Some(known) = known {
            let object = self.boxed(target);
            let layout = self.out.abi.closure;
            let env = self.fb.load_field(&self.out.structs, object, layout, fields::ENV);
            let mut argv = vec![env];
            for (arg, repr) in args.iter().zip(&known.params) {
                argv.push(self.operand_as(arg, *repr)?);
            }
            return Ok(Tracked {
                value: self.call_func(known.typed, argv, NativeType::Ptr),
                repr: Repr::Boxed,
            });
        }
        let args = self.operands(args)?;
        Ok(Tracked {
            value: self.invoke_block(target, &args),
            repr: Repr::Boxed,
        })
    }

    /// Call `block` through its generic entry with boxed `args`.
    pub(super) fn invoke_block(&mut self, block: Tracked<ValueId>, args: &[Tracked<ValueId>]) -> ValueId {
        let block = self.boxed(block);
        let boxed: Vec<ValueId> = args.iter().map(|a| self.boxed(*a)).collect();
        let argc = self.fb.iconst(i64::try_from(boxed.len()).unwrap_or(i64::MAX));
        let argv = self.argv(&boxed);
        self.rt(Rt::ClosureCall, vec![block, argc, argv])
    }

    /// `yield args`. Without a block parameter the call still goes through
    /// the runtime, which raises `LocalJumpError`.
    pub(super) fn yield_block(&mut self, args: &[Operand]) -> Result<Tracked<ValueId>, CodegenError> {
        let args = self.operands(args)?;
        let block = match self.block_value {
            Some(block) => block,
            None => {
                let diagnostic = Diagnostic::warning(ErrorCode::E5003)
                    .with_message("`yield` in a function without a block parameter")
                    .with_location(self.location())
                    .with_note("raises LocalJumpError when reached");
                let _ = self.findings.push(diagnostic);
                self.fb.null()
            }
        };
        Ok(Tracked {
            value: self.invoke_block(
                Tracked {
                    value: block,
                    repr: Repr::Boxed,
                },
                &args,
            ),
            repr: Repr::Boxed,
        })
    }
}
