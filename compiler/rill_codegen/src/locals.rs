//! Local variable planning.
//!
//! Before a body is lowered, every local it stores gets one physical
//! representation for its whole lifetime, and every phi gets the
//! representation of the slot its incoming values are written to. A local
//! that holds an `Int` on one path and a `Float` on another is a `Float`
//! everywhere; one that ever holds `nil` next to a primitive is boxed.
//!
//! Representations only grow (`bottom → primitive → Float → Boxed`), so the
//! plan is a fixpoint over the body's local stores, loads and phis.

use rill_ir::walk::{walk_body, Descend};
use rill_ir::{BindingId, Body, InstrKind, Instruction, Name, Operand, Ty};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::classes::ClassRegistry;
use crate::repr::Repr;

static DYNAMIC: Ty = Ty::Dynamic;

/// Static type of every binding of a function, closure bodies included.
#[derive(Debug, Default)]
pub struct TypeMap {
    tys: FxHashMap<BindingId, Ty>,
}

impl TypeMap {
    pub fn of_body(body: &Body) -> Self {
        let mut tys = FxHashMap::default();
        walk_body(body, Descend::RegionsAndClosures, &mut |instr, _| {
            if let Some(id) = instr.result {
                tys.insert(id, instr.ty.clone());
            }
        });
        TypeMap { tys }
    }

    #[allow(dead_code)]
    pub fn get(&self, binding: BindingId) -> Option<&Ty> {
        self.tys.get(&binding)
    }

    /// Static type of `op`; bindings the map does not know are dynamic.
    pub fn operand<'a>(&'a self, op: &'a Operand) -> &'a Ty {
        match op {
            Operand::Binding(id) => self.tys.get(id).unwrap_or(&DYNAMIC),
            Operand::Inline(instr) => &instr.ty,
        }
    }
}

/// What a body knows on entry.
#[derive(Debug, Default)]
pub struct PlanInputs {
    /// Names bound on entry (parameters, captured names) with the
    /// representation they arrive in.
    pub entry: Vec<(Name, Repr)>,
    /// Names held in shared storage: boxed, never planned.
    pub shared: FxHashSet<Name>,
    /// Bindings defined outside the body (captured bindings).
    pub outer: FxHashMap<BindingId, Repr>,
}

/// Representation of every local, phi and binding of one body.
#[derive(Debug, Default)]
pub struct LocalPlan {
    locals: FxHashMap<Name, Repr>,
    order: Vec<Name>,
    bindings: FxHashMap<BindingId, Repr>,
    outer: FxHashMap<BindingId, Repr>,
    shared: FxHashSet<Name>,
    planned: FxHashSet<Name>,
}

impl LocalPlan {
    /// Plan `body` (regions included, closure bodies excluded).
    pub fn build(body: &Body, inputs: PlanInputs, classes: &ClassRegistry) -> LocalPlan {
        let mut instrs: Vec<&Instruction> = Vec::new();
        walk_body(body, Descend::Regions, &mut |instr, _| instrs.push(instr));

        let mut order: Vec<Name> = Vec::new();
        let mut seen: FxHashSet<Name> = FxHashSet::default();
        for (name, _) in &inputs.entry {
            if !inputs.shared.contains(name) && seen.insert(*name) {
                order.push(*name);
            }
        }
        let mut rescued: Vec<Name> = Vec::new();
        for instr in &instrs {
            if let Some(name) = instr.stored_name() {
                if !inputs.shared.contains(&name) && seen.insert(name) {
                    order.push(name);
                }
            }
            if let InstrKind::Begin(begin) = &instr.kind {
                for name in begin.rescues.iter().filter_map(|r| r.binding) {
                    rescued.push(name);
                    if !inputs.shared.contains(&name) && seen.insert(name) {
                        order.push(name);
                    }
                }
            }
        }

        // `x.nil?` means `x` may hold nil, whatever its declared type.
        let loads: FxHashMap<BindingId, Name> = instrs
            .iter()
            .filter_map(|instr| match (&instr.kind, instr.result) {
                (InstrKind::LoadLocal { name }, Some(id)) => Some((id, *name)),
                _ => None,
            })
            .collect();
        let nil_checked: Vec<Name> = instrs
            .iter()
            .filter_map(|instr| match &instr.kind {
                InstrKind::IsNil { value: Operand::Binding(id) } => loads.get(id).copied(),
                InstrKind::IsNil { value: Operand::Inline(inner) } => match inner.kind {
                    InstrKind::LoadLocal { name } => Some(name),
                    _ => None,
                },
                _ => None,
            })
            .collect();

        let mut plan = LocalPlan {
            locals: FxHashMap::default(),
            order,
            bindings: FxHashMap::default(),
            outer: inputs.outer,
            shared: inputs.shared,
            planned: seen,
        };

        // Fixed results first; loads and phis start at bottom.
        for instr in &instrs {
            if let Some(id) = instr.result {
                if !matches!(instr.kind, InstrKind::Phi { .. } | InstrKind::LoadLocal { .. }) {
                    plan.bindings.insert(id, classes.repr_of(&instr.ty));
                }
            }
        }

        let bound = 4 * (instrs.len() + plan.order.len() + 1);
        for round in 0..bound {
            let mut changed = false;

            let mut locals: FxHashMap<Name, Repr> = FxHashMap::default();
            for (name, repr) in &inputs.entry {
                join_into(&mut locals, *name, *repr);
            }
            for name in rescued.iter().chain(&nil_checked) {
                join_into(&mut locals, *name, Repr::Boxed);
            }
            for instr in &instrs {
                if let InstrKind::StoreLocal { name, value } = &instr.kind {
                    if let Some(repr) = plan.estimate(value, classes) {
                        join_into(&mut locals, *name, repr);
                    }
                }
            }
            locals.retain(|name, _| !plan.shared.contains(name));
            if locals != plan.locals {
                plan.locals = locals;
                changed = true;
            }

            for instr in &instrs {
                let Some(id) = instr.result else { continue };
                let next = match &instr.kind {
                    InstrKind::LoadLocal { name } => plan.load_estimate(*name),
                    InstrKind::Phi { incoming } => incoming
                        .iter()
                        .filter_map(|(_, op)| plan.estimate(op, classes))
                        .reduce(Repr::unify),
                    _ => continue,
                };
                if let Some(repr) = next {
                    if plan.bindings.get(&id) != Some(&repr) {
                        plan.bindings.insert(id, repr);
                        changed = true;
                    }
                }
            }

            if !changed {
                trace!(rounds = round + 1, locals = plan.order.len(), "local plan converged");
                break;
            }
        }

        // Phis without a typed incoming value hold boxed values.
        for instr in &instrs {
            if let (Some(id), InstrKind::Phi { .. }) = (instr.result, &instr.kind) {
                plan.bindings.entry(id).or_insert(Repr::Boxed);
            }
        }
        for name in &plan.order {
            plan.locals.entry(*name).or_insert(Repr::Boxed);
        }
        plan
    }

    fn estimate(&self, op: &Operand, classes: &ClassRegistry) -> Option<Repr> {
        match op {
            Operand::Binding(id) => self
                .bindings
                .get(id)
                .or_else(|| self.outer.get(id))
                .copied(),
            Operand::Inline(instr) => match &instr.kind {
                InstrKind::LoadLocal { name } => self.load_estimate(*name),
                _ => Some(self.instr_repr(instr, classes)),
            },
        }
    }

    /// Current estimate of a load of `name`; bottom while a planned local
    /// has no store estimate yet.
    fn load_estimate(&self, name: Name) -> Option<Repr> {
        if self.planned.contains(&name) {
            self.locals.get(&name).copied()
        } else {
            Some(Repr::Boxed)
        }
    }

    fn local_or_boxed(&self, name: Name) -> Repr {
        self.locals.get(&name).copied().unwrap_or(Repr::Boxed)
    }

    /// Representation a lowered `instr` is materialized at.
    pub fn instr_repr(&self, instr: &Instruction, classes: &ClassRegistry) -> Repr {
        if let Some(repr) = instr.result.and_then(|id| self.bindings.get(&id)) {
            return *repr;
        }
        match &instr.kind {
            InstrKind::LoadLocal { name } => self.local_or_boxed(*name),
            _ => classes.repr_of(&instr.ty),
        }
    }

    /// Representation of an operand once lowered.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn operand(&self, op: &Operand, classes: &ClassRegistry) -> Repr {
        self.estimate(op, classes).unwrap_or(Repr::Boxed)
    }

    /// Slot representation of local `name`; `None` for shared or unknown names.
    pub fn local(&self, name: Name) -> Option<Repr> {
        self.locals.get(&name).copied()
    }

    /// Planned locals in first-definition order.
    pub fn locals(&self) -> impl Iterator<Item = (Name, Repr)> + '_ {
        self.order.iter().map(|n| (*n, self.local_or_boxed(*n)))
    }

    pub fn binding(&self, binding: BindingId) -> Option<Repr> {
        self.bindings.get(&binding).copied()
    }
}

fn join_into(map: &mut FxHashMap<Name, Repr>, name: Name, repr: Repr) {
    map.entry(name)
        .and_modify(|r| *r = r.unify(repr))
        .or_insert(repr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Findings;
    use pretty_assertions::assert_eq;
    use rill_ir::{
        BeginBlock, BinaryOp, BodyBuilder, Literal, Program, RescueClause, StringInterner,
    };

    fn classes() -> ClassRegistry {
        let program = Program::new(Vec::new(), Vec::new());
        let interner = StringInterner::new();
        let Ok(classes) = ClassRegistry::build(&program, &interner, &mut Findings::new()) else {
            panic!("empty registry should build");
        };
        classes
    }

    #[test]
    fn int_and_float_paths_widen_to_float() {
        let interner = StringInterner::new();
        let x = interner.intern("x");
        let mut b = BodyBuilder::new();
        let cond = b.bool(true);
        let (then_bb, else_bb, join) = (b.new_block(), b.new_block(), b.new_block());
        b.branch(cond, then_bb, else_bb);
        b.position_at(then_bb);
        let one = b.int(1);
        b.store(x, one);
        b.jump(join);
        b.position_at(else_bb);
        let half = b.float(0.5);
        b.store(x, half);
        b.jump(join);
        b.position_at(join);
        let phi = b.phi(Ty::Dynamic, &[(then_bb, one), (else_bb, half)]);
        let loaded = b.load(x, Ty::Dynamic);
        let sum = b.binary(BinaryOp::Add, loaded, phi, Ty::Float);
        b.ret(Some(sum));
        let body = b.finish();

        let plan = LocalPlan::build(&body, PlanInputs::default(), &classes());
        assert_eq!(plan.local(x), Some(Repr::Float));
        assert_eq!(plan.binding(phi), Some(Repr::Float));
        assert_eq!(plan.binding(loaded), Some(Repr::Float));
        assert_eq!(plan.binding(sum), Some(Repr::Float));
    }

    #[test]
    fn nil_on_one_path_boxes_the_local() {
        let interner = StringInterner::new();
        let v = interner.intern("v");
        let mut b = BodyBuilder::new();
        let nil = b.nil();
        b.store(v, nil);
        let seven = b.int(7);
        b.store(v, seven);
        let loaded = b.load(v, Ty::Int);
        b.ret(Some(loaded));
        let body = b.finish();

        let plan = LocalPlan::build(&body, PlanInputs::default(), &classes());
        assert_eq!(plan.local(v), Some(Repr::Boxed));
        assert_eq!(plan.binding(loaded), Some(Repr::Boxed));
    }

    #[test]
    fn nil_checked_parameters_are_boxed() {
        let interner = StringInterner::new();
        let x = interner.intern("x");
        let mut b = BodyBuilder::new();
        let loaded = b.load(x, Ty::Int);
        let check = b.emit(Ty::Bool, InstrKind::IsNil { value: loaded.into() });
        b.ret(Some(check));
        let body = b.finish();

        let inputs = PlanInputs {
            entry: vec![(x, Repr::Int)],
            ..PlanInputs::default()
        };
        let plan = LocalPlan::build(&body, inputs, &classes());
        assert_eq!(plan.local(x), Some(Repr::Boxed));
        assert_eq!(plan.binding(loaded), Some(Repr::Boxed));
        assert_eq!(plan.binding(check), Some(Repr::Bool));
    }

    #[test]
    fn parameters_join_their_stores() {
        let interner = StringInterner::new();
        let n = interner.intern("n");
        let mut b = BodyBuilder::new();
        let f = b.float(2.5);
        b.store(n, f);
        b.ret(None);
        let body = b.finish();

        let inputs = PlanInputs {
            entry: vec![(n, Repr::Int)],
            ..PlanInputs::default()
        };
        let plan = LocalPlan::build(&body, inputs, &classes());
        assert_eq!(plan.locals().collect::<Vec<_>>(), vec![(n, Repr::Float)]);
    }

    #[test]
    fn shared_names_and_rescue_bindings() {
        let interner = StringInterner::new();
        let (count, err) = (interner.intern("count"), interner.intern("err"));
        let mut inner = BodyBuilder::new();
        inner.ret(None);
        let rescue_body = inner.finish();

        let mut b = BodyBuilder::new();
        let zero = b.int(0);
        b.store(count, zero);
        b.emit(
            Ty::Nil,
            InstrKind::Begin(BeginBlock {
                body: Body::default(),
                rescues: vec![RescueClause {
                    classes: Vec::new(),
                    binding: Some(err),
                    body: rescue_body,
                }],
                else_body: None,
                ensure: None,
            }),
        );
        let loaded = b.load(count, Ty::Int);
        b.ret(Some(loaded));
        let body = b.finish();

        let inputs = PlanInputs {
            shared: [count].into_iter().collect(),
            ..PlanInputs::default()
        };
        let plan = LocalPlan::build(&body, inputs, &classes());
        assert_eq!(plan.local(count), None);
        assert!(plan.shared.contains(&count));
        assert_eq!(plan.binding(loaded), Some(Repr::Boxed));
        assert_eq!(plan.local(err), Some(Repr::Boxed));
    }

    #[test]
    fn phi_cycles_converge() {
        // i = 0; loop { i = phi(0, i + 1) }
        let mut b = BodyBuilder::new();
        let zero = b.int(0);
        let entry = b.current_block();
        let head = b.new_block();
        b.jump(head);
        b.position_at(head);
        let phi = b.phi(Ty::Dynamic, &[(entry, zero)]);
        let one = b.int(1);
        let inc = b.binary(BinaryOp::Add, phi, one, Ty::Int);
        b.ret(Some(inc));
        let mut body = b.finish();
        // Close the loop by hand: the phi also receives `inc` from `head`.
        if let Some(block) = body.blocks.iter_mut().find(|bb| bb.label == head) {
            for instr in &mut block.instrs {
                if let InstrKind::Phi { incoming } = &mut instr.kind {
                    incoming.push((head, Operand::Binding(inc)));
                }
            }
        }
        let plan = LocalPlan::build(&body, PlanInputs::default(), &classes());
        assert_eq!(plan.binding(phi), Some(Repr::Int));

        let lit = Instruction::inline(Ty::Float, InstrKind::Literal(Literal::Float(1.0)));
        assert_eq!(plan.operand(&Operand::from(lit), &classes()), Repr::Float);
    }
}
