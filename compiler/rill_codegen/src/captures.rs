//! Closure capture analysis.
//!
//! A closure sees the locals of the scope it is created in. Two kinds of
//! capture come out of that:
//!
//! - **read-only**: names the closure reads but never writes, and SSA
//!   bindings of the enclosing scope it uses. They are copied into the
//!   closure's environment when the closure is created.
//! - **shared**: names written inside a closure that are also locals
//!   (stored or parameters) of an enclosing scope. Both sides must see every
//!   write, so these live in process-wide storage, boxed, for the whole
//!   function and every closure nested in it.
//!
//! Environment words are laid out `[self][block][names…][bindings…]`, each
//! part present only when used.

use rill_ir::walk::{closures_in, free_bindings, loaded_names, stored_names, walk_body, Descend};
use rill_ir::{BindingId, Body, ClosureLiteral, ConcurrencyOp, InstrKind, Name, Operand, Param};
use rustc_hash::FxHashSet;

/// One word of a closure environment.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CaptureSlot {
    /// The enclosing method's receiver.
    SelfRef,
    /// The enclosing method's block parameter, for `yield` inside the closure.
    Block,
    Local(Name),
    Binding(BindingId),
}

/// Names of a function (and its nested closures) that need shared storage.
pub fn shared_names(params: &[Param], body: &Body) -> FxHashSet<Name> {
    let names: Vec<Name> = params.iter().map(|p| p.name).collect();
    let mut out = FxHashSet::default();
    collect_shared(&names, body, &mut out);
    out
}

fn collect_shared(params: &[Name], body: &Body, out: &mut FxHashSet<Name>) {
    let mut scope = stored_names(body, Descend::Regions);
    scope.extend(params.iter().copied());
    let spawned = spawned_closures(body);
    for instr in closures_in(body) {
        let Some(closure) = instr.closure() else {
            continue;
        };
        let own: Vec<Name> = closure.params.iter().map(|p| p.name).collect();
        let mut touched = stored_names(&closure.body, Descend::RegionsAndClosures);
        // a thread or fiber body runs interleaved with its creator, so
        // everything it reads from the creator must see later writes too
        if instr.result.is_some_and(|id| spawned.bindings.contains(&id))
            || spawned.inline.iter().any(|c| std::ptr::eq(*c, closure))
        {
            touched.extend(loaded_names(&closure.body, Descend::RegionsAndClosures));
        }
        for name in touched {
            if scope.contains(&name) && !own.contains(&name) {
                out.insert(name);
            }
        }
        collect_shared(&own, &closure.body, out);
    }
}

/// Closure literals handed to `Thread.new` or `Fiber.new` in `body`.
#[derive(Default)]
struct Spawned<'a> {
    bindings: FxHashSet<BindingId>,
    inline: Vec<&'a ClosureLiteral>,
}

fn spawned_closures(body: &Body) -> Spawned<'_> {
    let mut spawned = Spawned::default();
    walk_body(body, Descend::Regions, &mut |instr, _| {
        let InstrKind::Concurrency(
            ConcurrencyOp::ThreadNew { block } | ConcurrencyOp::FiberNew { block },
        ) = &instr.kind
        else {
            return;
        };
        match block {
            Operand::Binding(id) => {
                spawned.bindings.insert(*id);
            }
            Operand::Inline(inner) => {
                if let Some(closure) = inner.closure() {
                    spawned.inline.push(closure);
                }
            }
        }
    });
    spawned
}

/// Environment of one closure literal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClosureCaptures {
    pub slots: Vec<CaptureSlot>,
}

impl ClosureCaptures {
    /// Captures of `closure` created in a scope that can read `visible`.
    /// `has_self` and `has_block` say whether the enclosing scope has a
    /// receiver and a block parameter to hand down.
    pub fn analyze(
        closure: &ClosureLiteral,
        visible: &FxHashSet<Name>,
        shared: &FxHashSet<Name>,
        has_self: bool,
        has_block: bool,
    ) -> Self {
        let (mut uses_self, mut yields) = (false, false);
        walk_body(&closure.body, Descend::RegionsAndClosures, &mut |instr, _| {
            match instr.kind {
                InstrKind::SelfRef => uses_self = true,
                InstrKind::Yield { .. } => yields = true,
                _ => {}
            }
        });

        let mut own: FxHashSet<Name> = closure.params.iter().map(|p| p.name).collect();
        own.extend(stored_names(&closure.body, Descend::RegionsAndClosures));
        let mut names: Vec<Name> = loaded_names(&closure.body, Descend::RegionsAndClosures)
            .into_iter()
            .filter(|n| !own.contains(n) && !shared.contains(n) && visible.contains(n))
            .collect();
        names.sort_unstable();

        let mut slots = Vec::with_capacity(names.len() + 2);
        if uses_self && has_self {
            slots.push(CaptureSlot::SelfRef);
        }
        if yields && has_block {
            slots.push(CaptureSlot::Block);
        }
        slots.extend(names.into_iter().map(CaptureSlot::Local));
        slots.extend(free_bindings(&closure.body).into_iter().map(CaptureSlot::Binding));
        ClosureCaptures { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rill_ir::{BinaryOp, BodyBuilder, StringInterner, Ty};

    fn closure_instr(b: &mut BodyBuilder, closure: ClosureLiteral) -> BindingId {
        b.emit(Ty::Proc, InstrKind::Closure(closure))
    }

    #[test]
    fn counter_mutated_inside_a_block_is_shared() {
        // count = 0; inc = { count = count + 1 }; step = 2; show = { puts(step) }
        let interner = StringInterner::new();
        let n = |s: &str| interner.intern(s);
        let (count, step) = (n("count"), n("step"));

        let mut b = BodyBuilder::new();
        let zero = b.int(0);
        b.store(count, zero);

        let mut inc = b.nested();
        let current = inc.load(count, Ty::Int);
        let one = inc.int(1);
        let next = inc.binary(BinaryOp::Add, current, one, Ty::Int);
        inc.store(count, next);
        inc.ret(Some(next));
        let inc_body = b.adopt(inc);
        closure_instr(&mut b, ClosureLiteral { params: Vec::new(), body: inc_body });

        let two = b.int(2);
        b.store(step, two);
        let mut show = b.nested();
        let s = show.load(step, Ty::Int);
        show.ret(Some(s));
        let show_body = b.adopt(show);
        let show_closure = ClosureLiteral { params: Vec::new(), body: show_body };
        closure_instr(&mut b, show_closure.clone());
        b.ret(None);
        let body = b.finish();

        let shared = shared_names(&[], &body);
        let expected: FxHashSet<Name> = [count].into_iter().collect();
        assert_eq!(shared, expected);

        let visible: FxHashSet<Name> = [count, step].into_iter().collect();
        let captures = ClosureCaptures::analyze(&show_closure, &visible, &shared, false, false);
        assert_eq!(captures.slots, vec![CaptureSlot::Local(step)]);
    }

    #[test]
    fn values_read_by_a_fiber_body_are_shared() {
        // x = 1; f = Fiber.new { puts x }; y = 2; plain = { y }
        let interner = StringInterner::new();
        let (x, y) = (interner.intern("x"), interner.intern("y"));
        let mut b = BodyBuilder::new();
        let one = b.int(1);
        b.store(x, one);

        let mut fiber = b.nested();
        let seen = fiber.load(x, Ty::Int);
        fiber.ret(Some(seen));
        let fiber_body = b.adopt(fiber);
        let block = closure_instr(&mut b, ClosureLiteral { params: Vec::new(), body: fiber_body });
        let _ = b.emit(
            Ty::Fiber,
            InstrKind::Concurrency(ConcurrencyOp::FiberNew { block: block.into() }),
        );

        let two = b.int(2);
        b.store(y, two);
        let mut plain = b.nested();
        let seen = plain.load(y, Ty::Int);
        plain.ret(Some(seen));
        let plain_body = b.adopt(plain);
        closure_instr(&mut b, ClosureLiteral { params: Vec::new(), body: plain_body });
        b.ret(None);
        let body = b.finish();

        let expected: FxHashSet<Name> = [x].into_iter().collect();
        assert_eq!(shared_names(&[], &body), expected);
    }

    #[test]
    fn block_parameters_shadow_outer_names() {
        let interner = StringInterner::new();
        let x = interner.intern("x");
        let mut b = BodyBuilder::new();
        let one = b.int(1);
        b.store(x, one);
        let mut inner = b.nested();
        let two = inner.int(2);
        inner.store(x, two);
        inner.ret(None);
        let inner_body = b.adopt(inner);
        closure_instr(
            &mut b,
            ClosureLiteral {
                params: vec![Param::new(x, Ty::Int)],
                body: inner_body,
            },
        );
        b.ret(None);
        let body = b.finish();
        assert!(shared_names(&[], &body).is_empty());
    }

    #[test]
    fn self_block_and_free_bindings_are_laid_out_in_order() {
        let interner = StringInterner::new();
        let y = interner.intern("y");
        let mut b = BodyBuilder::new();
        let outer = b.int(40);
        let mut inner = b.nested();
        inner.emit(Ty::Dynamic, InstrKind::SelfRef);
        inner.emit(Ty::Dynamic, InstrKind::Yield { args: Vec::new() });
        let loaded = inner.load(y, Ty::Int);
        let sum = inner.binary(BinaryOp::Add, loaded, outer, Ty::Int);
        inner.ret(Some(sum));
        let inner_body = b.adopt(inner);
        let closure = ClosureLiteral { params: Vec::new(), body: inner_body };

        let visible: FxHashSet<Name> = [y].into_iter().collect();
        let captures =
            ClosureCaptures::analyze(&closure, &visible, &FxHashSet::default(), true, true);
        assert_eq!(
            captures.slots,
            vec![
                CaptureSlot::SelfRef,
                CaptureSlot::Block,
                CaptureSlot::Local(y),
                CaptureSlot::Binding(outer),
            ]
        );

        let without = ClosureCaptures::analyze(&closure, &visible, &FxHashSet::default(), false, false);
        assert_eq!(without.len(), 2);
    }
}
