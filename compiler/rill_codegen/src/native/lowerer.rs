//! Per-function lowering state.

use std::rc::Rc;

use rill_diagnostic::Location;
use rill_ir::walk::{stored_names, Descend};
use rill_ir::{BindingId, BlockLabel, Function, InstrKind, Instruction, Literal, Name, Operand};
use rill_native::{BlockId, Callee, FuncId, FunctionBuilder, NativeType, ValueId, WORD};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use super::{values, NativeOut, Rt};
use crate::captures::shared_names;
use crate::context::{CodegenCx, Findings};
use crate::locals::{LocalPlan, PlanInputs, TypeMap};
use crate::repr::{Repr, ReprTracker, Tracked};
use crate::CodegenError;

/// What a function and every callback carved out of it share.
pub(super) struct Scope {
    /// Prefix of callback symbols created in this scope.
    pub(super) symbol: String,
    /// User function the scope belongs to, for diagnostics and shared
    /// storage names.
    pub(super) function: String,
    pub(super) plan: LocalPlan,
    /// Frame word and representation of each planned local.
    pub(super) slots: FxHashMap<Name, (u32, Repr)>,
    pub(super) frame_words: u32,
    pub(super) shared: Rc<FxHashSet<Name>>,
    /// Names a closure created here may capture.
    pub(super) visible: FxHashSet<Name>,
    pub(super) types: Rc<TypeMap>,
}

impl Scope {
    pub(super) fn new(
        symbol: String,
        function: String,
        plan: LocalPlan,
        shared: Rc<FxHashSet<Name>>,
        visible: FxHashSet<Name>,
        types: Rc<TypeMap>,
    ) -> Self {
        let mut slots = FxHashMap::default();
        for (index, (name, repr)) in plan.locals().enumerate() {
            slots.insert(name, (u32::try_from(index).unwrap_or(u32::MAX), repr));
        }
        let frame_words = u32::try_from(slots.len()).unwrap_or(u32::MAX).max(1);
        Scope {
            symbol,
            function,
            plan,
            slots,
            frame_words,
            shared,
            visible,
            types,
        }
    }
}

/// A closure literal whose typed entry a call site can use directly.
#[derive(Clone, Debug)]
pub(super) struct KnownClosure {
    pub(super) typed: FuncId,
    pub(super) params: Vec<Repr>,
}

/// One native function being built.
pub(super) struct Unit<'u, 'cx> {
    pub(super) cx: &'u CodegenCx<'cx>,
    pub(super) out: &'u mut NativeOut,
    pub(super) findings: &'u mut Findings,
    pub(super) scope: Rc<Scope>,
    pub(super) fb: FunctionBuilder,
    pub(super) frame: ValueId,
    pub(super) self_value: Option<Tracked<ValueId>>,
    pub(super) block_value: Option<ValueId>,
    pub(super) tracker: ReprTracker<ValueId>,
    pub(super) closures: FxHashMap<BindingId, KnownClosure>,
    pub(super) labels: FxHashMap<BlockLabel, BlockId>,
    pub(super) phis: FxHashMap<BindingId, (ValueId, Repr)>,
    /// Representation the unit returns.
    pub(super) ret_repr: Repr,
    /// Probe id emitted before every return.
    pub(super) probe: Option<i64>,
    pub(super) line: Option<u32>,
}

impl<'u, 'cx> Unit<'u, 'cx> {
    pub(super) fn new(
        cx: &'u CodegenCx<'cx>,
        out: &'u mut NativeOut,
        findings: &'u mut Findings,
        scope: Rc<Scope>,
        fb: FunctionBuilder,
        frame: ValueId,
        ret_repr: Repr,
    ) -> Self {
        Unit {
            cx,
            out,
            findings,
            scope,
            fb,
            frame,
            self_value: None,
            block_value: None,
            tracker: ReprTracker::new(),
            closures: FxHashMap::default(),
            labels: FxHashMap::default(),
            phis: FxHashMap::default(),
            ret_repr,
            probe: None,
            line: None,
        }
    }

    pub(super) fn location(&self) -> Location {
        Location::new(self.scope.function.as_str(), self.line)
    }

    // -- Emission helpers --

    pub(super) fn rt(&mut self, rt: Rt, args: Vec<ValueId>) -> ValueId {
        values::call_rt(&mut self.fb, self.out, rt, args)
    }

    pub(super) fn call_func(&mut self, func: FuncId, args: Vec<ValueId>, ret: NativeType) -> ValueId {
        self.fb.call(Callee::Func(func), args, ret)
    }

    pub(super) fn materialize(&mut self, value: Tracked<ValueId>, to: Repr) -> ValueId {
        values::materialize(&mut self.fb, self.out, self.cx, value, to)
    }

    pub(super) fn boxed(&mut self, value: Tracked<ValueId>) -> ValueId {
        self.materialize(value, Repr::Boxed)
    }

    /// Address of module text `text`.
    pub(super) fn text(&mut self, text: &str) -> ValueId {
        let global = self.out.module.text(text);
        self.fb.global_addr(global)
    }

    pub(super) fn nil(&mut self) -> Tracked<ValueId> {
        Tracked {
            value: self.fb.null(),
            repr: Repr::Boxed,
        }
    }

    /// The zero value of `repr`: `0`, `0.0`, `false` or `nil`.
    pub(super) fn zero(&mut self, repr: Repr) -> ValueId {
        match repr {
            Repr::Int => self.fb.iconst(0),
            Repr::Float => self.fb.fconst(0.0),
            Repr::Bool => self.fb.bconst(false),
            _ => self.fb.null(),
        }
    }

    // -- Operands --

    pub(super) fn operand(&mut self, op: &Operand) -> Result<Tracked<ValueId>, CodegenError> {
        match op {
            Operand::Binding(id) => self.binding(*id),
            Operand::Inline(instr) => self.instr(instr),
        }
    }

    pub(super) fn operand_as(&mut self, op: &Operand, repr: Repr) -> Result<ValueId, CodegenError> {
        let value = self.operand(op)?;
        Ok(self.materialize(value, repr))
    }

    pub(super) fn operands(&mut self, ops: &[Operand]) -> Result<Vec<Tracked<ValueId>>, CodegenError> {
        ops.iter().map(|op| self.operand(op)).collect()
    }

    pub(super) fn binding(&self, id: BindingId) -> Result<Tracked<ValueId>, CodegenError> {
        self.tracker
            .get(id)
            .ok_or_else(|| CodegenError::UndefinedBinding {
                function: self.scope.function.clone(),
                binding: id.raw(),
            })
    }

    // -- Locals --

    fn shared_slot(&mut self, name: Name) -> ValueId {
        let global_name = format!("__shared.{}.{}", self.scope.function, self.cx.name(name));
        let global = self
            .out
            .module
            .add_global(&global_name, rill_native::GlobalInit::Zeroed(1), true);
        self.fb.global_addr(global)
    }

    fn frame_slot(&mut self, index: u32) -> ValueId {
        let offset = self.fb.iconst(i64::from(index) * i64::from(WORD));
        self.fb.ptr_add(self.frame, offset)
    }

    pub(super) fn load_local(&mut self, name: Name) -> Tracked<ValueId> {
        if self.scope.shared.contains(&name) {
            let addr = self.shared_slot(name);
            return Tracked {
                value: self.fb.load(NativeType::Ptr, addr),
                repr: Repr::Boxed,
            };
        }
        match self.scope.slots.get(&name).copied() {
            Some((index, repr)) => {
                let addr = self.frame_slot(index);
                Tracked {
                    value: self.fb.load(repr.native_type(), addr),
                    repr,
                }
            }
            None => self.nil(),
        }
    }

    pub(super) fn store_local(&mut self, name: Name, value: Tracked<ValueId>) {
        if self.scope.shared.contains(&name) {
            let boxed = self.boxed(value);
            let addr = self.shared_slot(name);
            self.fb.store(addr, boxed);
            return;
        }
        if let Some((index, repr)) = self.scope.slots.get(&name).copied() {
            let v = self.materialize(value, repr);
            let addr = self.frame_slot(index);
            self.fb.store(addr, v);
        }
    }

    // -- Instructions --

    pub(super) fn instr(&mut self, instr: &Instruction) -> Result<Tracked<ValueId>, CodegenError> {
        if instr.line.is_some() {
            self.line = instr.line;
        }
        let produced = match &instr.kind {
            InstrKind::Literal(lit) => self.literal(lit),
            InstrKind::LoadLocal { name } => self.load_local(*name),
            InstrKind::StoreLocal { name, value } => {
                let v = self.operand(value)?;
                self.store_local(*name, v);
                v
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
            InstrKind::SelfRef => match self.self_value {
                Some(this) => this,
                None => self.nil(),
            },
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
            InstrKind::Closure(literal) => self.closure(literal, instr.result)?,
            InstrKind::CallClosure { closure, args } => self.call_closure(closure, args)?,
            InstrKind::Yield { args } => self.yield_block(args)?,
            InstrKind::Phi { .. } => self.phi_value(instr.result),
            InstrKind::Begin(begin) => self.begin(begin)?,
            InstrKind::Raise { class, message } => self.raise(*class, message.as_ref())?,
            InstrKind::RaiseValue { exception } => {
                let exc = self.operand_as(exception, Repr::Boxed)?;
                let value = self.rt(Rt::RaiseValue, vec![exc]);
                Tracked {
                    value,
                    repr: Repr::Boxed,
                }
            }
            InstrKind::IsNil { value } => self.is_nil(value)?,
            InstrKind::Synchronize { mutex, body } => self.synchronize(mutex, body)?,
            InstrKind::Concurrency(op) => self.concurrency(op)?,
        };

        let want = self.scope.plan.instr_repr(instr, &self.cx.classes);
        let value = self.materialize(produced, want);
        if let Some(id) = instr.result {
            self.tracker.record(id, value, want);
            if matches!(instr.kind, InstrKind::New { .. }) && produced.repr == want {
                self.tracker.mark_exact(id);
            }
        }
        Ok(Tracked { value, repr: want })
    }

    fn literal(&mut self, lit: &Literal) -> Tracked<ValueId> {
        let (value, repr) = match lit {
            Literal::Int(v) => (self.fb.iconst(*v), Repr::Int),
            Literal::Float(v) => (self.fb.fconst(*v), Repr::Float),
            Literal::Bool(v) => (self.fb.bconst(*v), Repr::Bool),
            Literal::Nil => (self.fb.null(), Repr::Boxed),
            Literal::Str(s) => {
                let text = self.text(s);
                (self.rt(Rt::StrLit, vec![text]), Repr::Boxed)
            }
        };
        Tracked { value, repr }
    }

    fn is_nil(&mut self, op: &Operand) -> Result<Tracked<ValueId>, CodegenError> {
        let value = self.operand(op)?;
        let result = if value.repr.is_unboxed() {
            self.fb.bconst(false)
        } else {
            let null = self.fb.null();
            self.fb.icmp(rill_native::CmpPred::Eq, value.value, null)
        };
        Ok(Tracked {
            value: result,
            repr: Repr::Bool,
        })
    }

    // -- Probes --

    pub(super) fn probe_enter(&mut self) {
        let Some(id) = self.probe else {
            return;
        };
        let id = self.fb.iconst(id);
        let name = self.text(&self.scope.function.clone());
        let _ = self.rt(Rt::ProfileEnter, vec![id, name]);
    }

    pub(super) fn probe_exit(&mut self) {
        if let Some(id) = self.probe {
            let id = self.fb.iconst(id);
            let _ = self.rt(Rt::ProfileExit, vec![id]);
        }
    }
}

/// Lower user function `function` into the module.
pub(super) fn lower_function(
    cx: &CodegenCx<'_>,
    out: &mut NativeOut,
    findings: &mut Findings,
    function: &Function,
) -> Result<(), CodegenError> {
    let Some(descriptor) = cx.descriptors.of(function) else {
        return Ok(());
    };
    let symbol = descriptor.symbol.clone();
    trace!(%symbol, "lower function");
    let sig = descriptor.native_signature();
    let id = out.module.declare_function(
        &symbol,
        sig.clone(),
        super::user_flags(cx, function.owner, function.name),
    );

    let shared = Rc::new(shared_names(&function.params, &function.body));
    let inputs = PlanInputs {
        entry: descriptor.params.iter().map(|p| (p.name, p.repr)).collect(),
        shared: (*shared).clone(),
        outer: FxHashMap::default(),
    };
    let plan = LocalPlan::build(&function.body, inputs, &cx.classes);
    let mut visible = stored_names(&function.body, Descend::Regions);
    visible.extend(descriptor.params.iter().map(|p| p.name));
    let scope = Scope::new(
        symbol.clone(),
        symbol.clone(),
        plan,
        shared,
        visible,
        Rc::new(TypeMap::of_body(&function.body)),
    );

    let mut fb = FunctionBuilder::new(&sig);
    let frame = fb.alloca(scope.frame_words);
    let mut unit = Unit::new(cx, out, findings, Rc::new(scope), fb, frame, descriptor.ret);
    let offset = u32::from(descriptor.is_method());
    if let Some(owner) = function.owner {
        unit.self_value = Some(Tracked {
            value: unit.fb.param(0),
            repr: Repr::Struct(owner),
        });
    }
    for (i, param) in descriptor.params.iter().enumerate() {
        let index = offset + u32::try_from(i).unwrap_or(u32::MAX);
        let value = unit.fb.param(index);
        if descriptor.block == Some(i) {
            unit.block_value = Some(value);
        }
        unit.store_local(
            param.name,
            Tracked {
                value,
                repr: param.repr,
            },
        );
    }
    if cx.options.instrument {
        unit.probe = cx.probes.id(&symbol);
        unit.probe_enter();
    }
    unit.lower_body(&function.body)?;
    let fb = unit.fb;
    out.define(id, fb);
    Ok(())
}
