//! Block and lambda literals.
//!
//! A closure literal becomes two private static methods of the host class
//! and one `invokedynamic` site:
//!
//! ```text
//!   <scope>$block<N>           (captures…, params…) Object   typed body
//!   <scope>$block<N>$generic   (captures…, Object[]) Object  bridge
//!   invokedynamic call         (captures…) rill/rt/Block     metafactory
//! ```
//!
//! The metafactory binds the captured values to the generic bridge, which
//! unpacks the argument array (missing arguments are nil) and calls the
//! typed body. Shared locals are not captured; both sides reach them
//! through static fields of the main class.

use std::rc::Rc;

use rill_diagnostic::{Diagnostic, ErrorCode};
use rill_ir::walk::{stored_names, Descend};
use rill_ir::{ClosureLiteral, Name, Operand};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use super::document::{Access, BootstrapArg, Insn};
use super::emitter::{width, MethodEmitter, OPS};
use super::lowerer::{Exit, Scope, Unit};
use crate::captures::{CaptureSlot, ClosureCaptures};
use crate::descriptor::managed_type;
use crate::locals::{LocalPlan, PlanInputs};
use crate::repr::{Repr, Tracked};
use crate::CodegenError;

const METAFACTORY: &str = "java/lang/invoke/LambdaMetafactory";
const METAFACTORY_DESC: &str = "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;";
const BLOCK_CALL: &str = "([Ljava/lang/Object;)Ljava/lang/Object;";
const CALL_BLOCK: &str = "(Ljava/lang/Object;[Ljava/lang/Object;)Ljava/lang/Object;";

impl Unit<'_, '_> {
    /// Value and representation passed for capture `slot`.
    fn capture_value(&mut self, slot: CaptureSlot) -> Tracked<u16> {
        match slot {
            CaptureSlot::SelfRef => self.self_or_nil(),
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
        }
    }

    pub(super) fn closure(&mut self, literal: &ClosureLiteral) -> Result<Repr, CodegenError> {
        let scope = Rc::clone(&self.scope);
        let captures = ClosureCaptures::analyze(
            literal,
            &scope.visible,
            &scope.shared,
            self.self_value.is_some(),
            self.block_value.is_some(),
        );
        let captured: Vec<(CaptureSlot, Tracked<u16>)> = captures
            .slots
            .iter()
            .map(|slot| (*slot, self.capture_value(*slot)))
            .collect();

        let n = self
            .out
            .next_callback(&format!("{}.{}", scope.host, scope.symbol));
        let name = format!("{}$block{n}", scope.symbol);
        let generic = format!("{name}$generic");
        trace!(%name, captures = captured.len(), "managed closure");

        let interner = self.cx.interner;
        let declared: Vec<Repr> = literal
            .params
            .iter()
            .map(|p| self.cx.classes.repr_of(&p.ty))
            .collect();
        let (plan, visible) = self.closure_plan(literal, &captured, &declared);
        let params: Vec<Repr> = literal
            .params
            .iter()
            .zip(&declared)
            .map(|(p, r)| plan.local(p.name).unwrap_or(*r))
            .collect();
        let capture_desc: String = captured
            .iter()
            .map(|(_, v)| managed_type(v.repr, interner))
            .collect();
        let param_desc: String = params.iter().map(|r| managed_type(*r, interner)).collect();
        let typed_desc = format!("({capture_desc}{param_desc})Ljava/lang/Object;");
        let generic_desc = format!("({capture_desc}[Ljava/lang/Object;)Ljava/lang/Object;");

        self.lower_closure_body(literal, plan, visible, &name, &typed_desc, &captured, &params)?;
        self.build_generic(&generic, &generic_desc, &name, &typed_desc, &captured, &params);

        for (_, value) in &captured {
            self.em.load(value.value, value.repr);
        }
        self.em.emit(Insn::Invokedynamic {
            name: "call".to_owned(),
            descriptor: format!("({capture_desc})Lrill/rt/Block;"),
            bootstrap_owner: METAFACTORY.to_owned(),
            bootstrap_name: "metafactory".to_owned(),
            bootstrap_descriptor: METAFACTORY_DESC.to_owned(),
            bootstrap_args: vec![
                BootstrapArg::MethodType {
                    descriptor: BLOCK_CALL.to_owned(),
                },
                BootstrapArg::Handle {
                    tag: "H_INVOKESTATIC".to_owned(),
                    owner: scope.host.clone(),
                    name: generic,
                    descriptor: generic_desc,
                    itf: false,
                },
                BootstrapArg::MethodType {
                    descriptor: BLOCK_CALL.to_owned(),
                },
            ],
        });
        Ok(Repr::Boxed)
    }

    /// Plan the locals of `literal` with its parameters and captured values
    /// bound on entry. Also returns the names the body can see.
    fn closure_plan(
        &self,
        literal: &ClosureLiteral,
        captured: &[(CaptureSlot, Tracked<u16>)],
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
        name: &str,
        descriptor: &str,
        captured: &[(CaptureSlot, Tracked<u16>)],
        params: &[Repr],
    ) -> Result<(), CodegenError> {
        let scope = Scope {
            symbol: name.to_owned(),
            function: self.scope.function.clone(),
            host: self.scope.host.clone(),
            plan,
            shared: Rc::clone(&self.scope.shared),
            visible,
            types: Rc::clone(&self.scope.types),
        };

        // Captures first, then parameters, each in its own slots.
        let mut next = 0u16;
        let mut capture_slots = Vec::with_capacity(captured.len());
        for (slot, value) in captured {
            capture_slots.push((*slot, next, value.repr));
            next += width(value.repr);
        }
        let mut param_slots = Vec::with_capacity(params.len());
        for (param, repr) in literal.params.iter().zip(params) {
            param_slots.push((param.name, next, *repr));
            next += width(*repr);
        }

        let mut unit = Unit::new(
            self.cx,
            &mut *self.out,
            &mut *self.findings,
            Rc::new(scope),
            MethodEmitter::new(next),
            Repr::Boxed,
        );
        unit.line = self.line;
        unit.init_locals();
        for (slot, at, repr) in capture_slots {
            let value = Tracked { value: at, repr };
            match slot {
                CaptureSlot::SelfRef => unit.self_value = Some(value),
                CaptureSlot::Block => unit.block_value = Some(at),
                CaptureSlot::Local(name) => unit.store_local(name, value),
                CaptureSlot::Binding(id) => unit.tracker.record(id, at, repr),
            }
        }
        for (param, at, repr) in param_slots {
            unit.store_local(param, Tracked { value: at, repr });
        }
        unit.lower_body(&literal.body, Exit::Return)?;

        let host = unit.scope.host.clone();
        let method = unit.em.finish(
            name.to_owned(),
            descriptor.to_owned(),
            vec![Access::Private, Access::Static, Access::Synthetic],
        );
        self.out.add_method(&host, method);
        Ok(())
    }

    /// Bridge from the block calling convention to the typed body.
    fn build_generic(
        &mut self,
        name: &str,
        descriptor: &str,
        typed: &str,
        typed_desc: &str,
        captured: &[(CaptureSlot, Tracked<u16>)],
        params: &[Repr],
    ) {
        let mut at = 0u16;
        let mut em = MethodEmitter::new(0);
        for (_, value) in captured {
            em.load(at, value.repr);
            at += width(value.repr);
        }
        let args = at;
        for (i, repr) in params.iter().enumerate() {
            em.load(args, Repr::Boxed);
            em.int(i32::try_from(i).unwrap_or(i32::MAX));
            em.invoke_static(OPS, "arg", "([Ljava/lang/Object;I)Ljava/lang/Object;");
            em.convert(Repr::Boxed, *repr, self.cx.interner);
        }
        em.invoke_static(&self.scope.host, typed, typed_desc);
        em.emit(Insn::Areturn);
        let method = em.finish(
            name.to_owned(),
            descriptor.to_owned(),
            vec![Access::Private, Access::Static, Access::Synthetic],
        );
        let host = self.scope.host.clone();
        self.out.add_method(&host, method);
    }

    /// Push the result of calling `block` with boxed `args`.
    pub(super) fn invoke_block(&mut self, block: Tracked<u16>, args: &[Tracked<u16>]) {
        self.push_boxed(block);
        let items: Vec<(u16, Repr)> = args.iter().map(|a| (a.value, a.repr)).collect();
        self.em.object_array(&items);
        self.em.invoke_static(OPS, "callBlock", CALL_BLOCK);
    }

    /// Call a closure value through the block protocol.
    pub(super) fn call_closure(&mut self, closure: &Operand, args: &[Operand]) -> Result<Repr, CodegenError> {
        let target = self.operand(closure)?;
        let args = self.operands(args)?;
        self.invoke_block(target, &args);
        Ok(Repr::Boxed)
    }

    /// `yield args`. Without a block parameter the call passes nil, and the
    /// runtime raises `LocalJumpError`.
    pub(super) fn yield_block(&mut self, args: &[Operand]) -> Result<Repr, CodegenError> {
        let args = self.operands(args)?;
        let block = match self.block_value {
            Some(block) => Tracked {
                value: block,
                repr: Repr::Boxed,
            },
            None => {
                let diagnostic = Diagnostic::warning(ErrorCode::E5003)
                    .with_message("`yield` in a function without a block parameter")
                    .with_location(self.location())
                    .with_note("raises LocalJumpError when reached");
                let _ = self.findings.push(diagnostic);
                self.nil()
            }
        };
        self.invoke_block(block, &args);
        Ok(Repr::Boxed)
    }
}
