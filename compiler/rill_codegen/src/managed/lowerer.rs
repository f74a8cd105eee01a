//! Per-method lowering state.

use std::rc::Rc;

use rill_diagnostic::Location;
use rill_ir::walk::{stored_names, Descend};
use rill_ir::{BindingId, BlockLabel, Function, InstrKind, Instruction, Literal, Name, Operand};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use super::document::{Access, Insn};
use super::emitter::{member_name, width, MethodEmitter, OBJECT_DESC};
use super::ManagedOut;
use crate::captures::shared_names;
use crate::context::{CodegenCx, Findings};
use crate::locals::{LocalPlan, PlanInputs, TypeMap};
use crate::repr::{Repr, ReprTracker, Tracked};
use crate::CodegenError;

/// What a method and the closure methods carved out of it share.
pub(super) struct Scope {
    /// Prefix of closure method names created in this scope.
    pub(super) symbol: String,
    /// User function the scope belongs to, for diagnostics and shared
    /// field names.
    pub(super) function: String,
    /// Class that receives closure methods of this scope.
    pub(super) host: String,
    pub(super) plan: LocalPlan,
    pub(super) shared: Rc<FxHashSet<Name>>,
    /// Names a closure created here may capture.
    pub(super) visible: FxHashSet<Name>,
    pub(super) types: Rc<TypeMap>,
}

/// Where a body's `return` goes.
#[derive(Clone, Debug)]
pub(super) enum Exit {
    /// Return from the method.
    Return,
    /// Store the boxed value in `slot` and continue at `done`.
    Store { slot: u16, done: String },
    /// Drop the value and continue at `done`.
    Discard { done: String },
}

/// One managed method being built.
pub(super) struct Unit<'u, 'cx> {
    pub(super) cx: &'u CodegenCx<'cx>,
    pub(super) out: &'u mut ManagedOut,
    pub(super) findings: &'u mut Findings,
    pub(super) scope: Rc<Scope>,
    pub(super) em: MethodEmitter,
    /// Slot and representation of each local of the scope.
    pub(super) locals: FxHashMap<Name, (u16, Repr)>,
    pub(super) self_value: Option<Tracked<u16>>,
    pub(super) block_value: Option<u16>,
    pub(super) tracker: ReprTracker<u16>,
    pub(super) labels: FxHashMap<BlockLabel, String>,
    pub(super) phis: FxHashMap<BindingId, (u16, Repr)>,
    pub(super) exit: Exit,
    pub(super) ret_repr: Repr,
    pub(super) probe: Option<i64>,
    pub(super) line: Option<u32>,
}

impl<'u, 'cx> Unit<'u, 'cx> {
    pub(super) fn new(
        cx: &'u CodegenCx<'cx>,
        out: &'u mut ManagedOut,
        findings: &'u mut Findings,
        scope: Rc<Scope>,
        em: MethodEmitter,
        ret_repr: Repr,
    ) -> Self {
        Unit {
            cx,
            out,
            findings,
            scope,
            em,
            locals: FxHashMap::default(),
            self_value: None,
            block_value: None,
            tracker: ReprTracker::new(),
            labels: FxHashMap::default(),
            phis: FxHashMap::default(),
            exit: Exit::Return,
            ret_repr,
            probe: None,
            line: None,
        }
    }

    pub(super) fn location(&self) -> Location {
        Location::new(self.scope.function.as_str(), self.line)
    }

    /// Give every planned local a slot holding its zero value, so each
    /// slot has one type on every path.
    pub(super) fn init_locals(&mut self) {
        let scope = Rc::clone(&self.scope);
        for (name, repr) in scope.plan.locals() {
            if scope.shared.contains(&name) {
                continue;
            }
            let slot = self.em.local(repr);
            self.em.zero(repr);
            self.em.store(slot, repr);
            self.locals.insert(name, (slot, repr));
        }
    }

    // -- Values --

    /// Push `value` converted to `to`.
    pub(super) fn push(&mut self, value: Tracked<u16>, to: Repr) {
        self.em.load(value.value, value.repr);
        self.em.convert(value.repr, to, self.cx.interner);
    }

    pub(super) fn push_boxed(&mut self, value: Tracked<u16>) {
        self.push(value, Repr::Boxed);
    }

    /// Store the stack top, held at `repr`, in a fresh local.
    pub(super) fn spill(&mut self, repr: Repr) -> Tracked<u16> {
        Tracked {
            value: self.em.spill(repr),
            repr,
        }
    }

    pub(super) fn nil(&mut self) -> Tracked<u16> {
        self.em.emit(Insn::AconstNull);
        self.spill(Repr::Boxed)
    }

    pub(super) fn self_or_nil(&mut self) -> Tracked<u16> {
        match self.self_value {
            Some(this) => this,
            None => self.nil(),
        }
    }

    // -- Operands --

    pub(super) fn operand(&mut self, op: &Operand) -> Result<Tracked<u16>, CodegenError> {
        match op {
            Operand::Binding(id) => self.binding(*id),
            Operand::Inline(instr) => self.instr(instr),
        }
    }

    /// Evaluate `op` and push it at `repr`.
    pub(super) fn push_operand(&mut self, op: &Operand, repr: Repr) -> Result<(), CodegenError> {
        let value = self.operand(op)?;
        self.push(value, repr);
        Ok(())
    }

    pub(super) fn operands(&mut self, ops: &[Operand]) -> Result<Vec<Tracked<u16>>, CodegenError> {
        ops.iter().map(|op| self.operand(op)).collect()
    }

    pub(super) fn binding(&self, id: BindingId) -> Result<Tracked<u16>, CodegenError> {
        self.tracker
            .get(id)
            .ok_or_else(|| CodegenError::UndefinedBinding {
                function: self.scope.function.clone(),
                binding: id.raw(),
            })
    }

    // -- Locals --

    fn shared_field(&mut self, name: Name) -> String {
        let field = member_name(&format!("shared${}${}", self.scope.function, self.cx.name(name)));
        self.out.shared_field(&field);
        field
    }

    /// Push local `name`; unknown names read as nil.
    pub(super) fn push_local(&mut self, name: Name) -> Repr {
        if self.scope.shared.contains(&name) {
            let field = self.shared_field(name);
            self.em.emit(Insn::Getstatic {
                owner: self.out.main_class().to_owned(),
                name: field,
                descriptor: OBJECT_DESC.to_owned(),
            });
            return Repr::Boxed;
        }
        match self.locals.get(&name).copied() {
            Some((slot, repr)) => {
                self.em.load(slot, repr);
                repr
            }
            None => {
                self.em.emit(Insn::AconstNull);
                Repr::Boxed
            }
        }
    }

    /// Copy of local `name` in a fresh slot.
    pub(super) fn load_local(&mut self, name: Name) -> Tracked<u16> {
        let repr = self.push_local(name);
        self.spill(repr)
    }

    pub(super) fn store_local(&mut self, name: Name, value: Tracked<u16>) {
        if self.scope.shared.contains(&name) {
            let field = self.shared_field(name);
            self.push_boxed(value);
            self.em.emit(Insn::Putstatic {
                owner: self.out.main_class().to_owned(),
                name: field,
                descriptor: OBJECT_DESC.to_owned(),
            });
            return;
        }
        if let Some((slot, repr)) = self.locals.get(&name).copied() {
            self.push(value, repr);
            self.em.store(slot, repr);
        }
    }

    // -- Instructions --

    /// Lower `instr` into a fresh local held at its planned representation.
    pub(super) fn instr(&mut self, instr: &Instruction) -> Result<Tracked<u16>, CodegenError> {
        if let Some(line) = instr.line {
            self.line = Some(line);
            self.em.line(line);
        }
        let produced = match &instr.kind {
            InstrKind::Literal(lit) => self.literal(lit),
            InstrKind::LoadLocal { name } => self.push_local(*name),
            InstrKind::StoreLocal { name, value } => {
                let v = self.operand(value)?;
                self.store_local(*name, v);
                self.em.load(v.value, v.repr);
                v.repr
            }
            InstrKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs)?,
            InstrKind::Unary { op, operand } => self.unary(*op, operand)?,
            InstrKind::Call { name, args } => self.call(*name, args)?,
            InstrKind::MethodCall {
                receiver,
                method,
                args,
            } => self.method_call(receiver, *method, args)?,
            InstrKind::New { class, args } => self.new_object(*class, args)?,
            InstrKind::SelfRef => {
                let this = self.self_or_nil();
                self.em.load(this.value, this.repr);
                this.repr
            }
            InstrKind::GetField { object, field } => self.get_field(object, *field)?,
            InstrKind::SetField {
                object,
                field,
                value,
            } => self.set_field(object, *field, value)?,
            InstrKind::ArrayLit { elements } => self.array_literal(elements, &instr.ty)?,
            InstrKind::ArrayGet { array, index } => self.array_get(array, index)?,
            InstrKind::ArraySet {
                array,
                index,
                value,
            } => self.array_set(array, index, value)?,
            InstrKind::ArrayPush { array, value } => self.array_push(array, value)?,
            InstrKind::ArrayPop { array } => self.array_pop(array)?,
            InstrKind::ArrayLen { array } => self.array_len(array)?,
            InstrKind::ArrayEach { array, block } => self.array_each(array, block)?,
            InstrKind::HashLit { entries } => self.hash_literal(entries, &instr.ty)?,
            InstrKind::HashGet { hash, key } => self.hash_get(hash, key)?,
            InstrKind::HashSet { hash, key, value } => self.hash_set(hash, key, value)?,
            InstrKind::HashDelete { hash, key } => self.hash_delete(hash, key)?,
            InstrKind::HashLen { hash } => self.hash_len(hash)?,
            InstrKind::HashHasKey { hash, key } => self.hash_has_key(hash, key)?,
            InstrKind::HashKeys { hash } => self.hash_listing(hash, false)?,
            InstrKind::HashValues { hash } => self.hash_listing(hash, true)?,
            InstrKind::HashEach { hash, block } => self.hash_each(hash, block)?,
            InstrKind::Closure(literal) => self.closure(literal)?,
            InstrKind::CallClosure { closure, args } => self.call_closure(closure, args)?,
            InstrKind::Yield { args } => self.yield_block(args)?,
            InstrKind::Phi { .. } => self.phi_value(instr.result),
            InstrKind::Begin(begin) => self.begin(begin)?,
            InstrKind::Raise { class, message } => self.raise(*class, message.as_ref())?,
            InstrKind::RaiseValue { exception } => {
                self.push_operand(exception, Repr::Boxed)?;
                self.em.checkcast("java/lang/Throwable");
                self.em.emit(Insn::Athrow);
                self.em.emit(Insn::AconstNull);
                Repr::Boxed
            }
            InstrKind::IsNil { value } => self.is_nil(value)?,
            InstrKind::Synchronize { mutex, body } => self.synchronize(mutex, body)?,
            InstrKind::Concurrency(op) => self.concurrency(op)?,
        };

        let want = self.scope.plan.instr_repr(instr, &self.cx.classes);
        self.em.convert(produced, want, self.cx.interner);
        let value = self.spill(want);
        if let Some(id) = instr.result {
            self.tracker.record(id, value.value, want);
            if matches!(instr.kind, InstrKind::New { .. }) && produced == want {
                self.tracker.mark_exact(id);
            }
        }
        Ok(value)
    }

    fn literal(&mut self, lit: &Literal) -> Repr {
        match lit {
            Literal::Int(v) => {
                self.em.long(*v);
                Repr::Int
            }
            Literal::Float(v) => {
                self.em.double(*v);
                Repr::Float
            }
            Literal::Bool(v) => {
                self.em.int(i32::from(*v));
                Repr::Bool
            }
            Literal::Nil => {
                self.em.emit(Insn::AconstNull);
                Repr::Boxed
            }
            Literal::Str(s) => {
                self.em.string_object(s);
                Repr::Boxed
            }
        }
    }

    fn is_nil(&mut self, op: &Operand) -> Result<Repr, CodegenError> {
        let value = self.operand(op)?;
        if value.repr.is_unboxed() {
            self.em.int(0);
        } else {
            self.em.load(value.value, value.repr);
            self.em.flag(|target| Insn::Ifnull { target });
        }
        Ok(Repr::Bool)
    }

    // -- Probes --

    pub(super) fn probe_enter(&mut self) {
        let Some(id) = self.probe else {
            return;
        };
        self.em.long(id);
        self.em.string(&self.scope.function);
        self.em
            .invoke_static(super::PROFILE, "enter", "(JLjava/lang/String;)V");
    }

    pub(super) fn probe_exit(&mut self) {
        if let Some(id) = self.probe {
            self.em.long(id);
            self.em.invoke_static(super::PROFILE, "exit", "(J)V");
        }
    }
}

/// Lower user function `function` into its class.
pub(super) fn lower_function(
    cx: &CodegenCx<'_>,
    out: &mut ManagedOut,
    findings: &mut Findings,
    function: &Function,
) -> Result<(), CodegenError> {
    let Some(descriptor) = cx.descriptors.of(function) else {
        return Ok(());
    };
    let name = member_name(cx.name(function.name));
    let host = match function.owner {
        Some(owner) => cx.name(owner).to_owned(),
        None => out.main_class().to_owned(),
    };
    trace!(symbol = %descriptor.symbol, %host, "lower managed method");

    let shared = Rc::new(shared_names(&function.params, &function.body));
    let inputs = PlanInputs {
        entry: descriptor.params.iter().map(|p| (p.name, p.repr)).collect(),
        shared: (*shared).clone(),
        outer: FxHashMap::default(),
    };
    let plan = LocalPlan::build(&function.body, inputs, &cx.classes);
    let mut visible = stored_names(&function.body, Descend::Regions);
    visible.extend(descriptor.params.iter().map(|p| p.name));
    let scope = Scope {
        symbol: name.clone(),
        function: descriptor.symbol.clone(),
        host: host.clone(),
        plan,
        shared,
        visible,
        types: Rc::new(TypeMap::of_body(&function.body)),
    };

    let mut next = u16::from(descriptor.is_method());
    let mut params = Vec::with_capacity(descriptor.params.len());
    for param in &descriptor.params {
        params.push((param.name, next, param.repr));
        next += width(param.repr);
    }

    let mut unit = Unit::new(cx, out, findings, Rc::new(scope), MethodEmitter::new(next), descriptor.ret);
    if let Some(owner) = function.owner {
        unit.self_value = Some(Tracked {
            value: 0,
            repr: Repr::Struct(owner),
        });
    }
    unit.init_locals();
    for (i, (param, slot, repr)) in params.into_iter().enumerate() {
        if descriptor.block == Some(i) {
            unit.block_value = Some(slot);
        }
        unit.store_local(param, Tracked { value: slot, repr });
    }
    if cx.options.instrument {
        unit.probe = cx.probes.id(&descriptor.symbol);
        unit.probe_enter();
    }
    unit.lower_body(&function.body, Exit::Return)?;

    let access = if function.owner.is_some() {
        vec![Access::Public]
    } else {
        vec![Access::Public, Access::Static]
    };
    let method = unit
        .em
        .finish(name, descriptor.managed_descriptor(cx.interner), access);
    out.add_method(&host, method);
    Ok(())
}
