//! Protected regions: `begin`/`rescue`/`else`/`ensure` and `synchronize`.
//!
//! Every region body becomes a callback the runtime calls through
//! `rl_protect` or `rl_ensure`. Callbacks receive one environment vector
//! from the enclosing unit:
//!
//! ```text
//!   [0] frame       enclosing frame, so locals stay shared
//!   [1] self        receiver or null
//!   [2] block       block parameter or null
//!   [3] aux         0, set to 1 by a handler; the mutex for synchronize
//!   [4..] bindings  values of the enclosing unit used inside the region
//! ```
//!
//! A `return` inside a region body returns from its callback, so the value
//! becomes the value of the region.

use std::rc::Rc;

use rill_ir::walk::free_bindings;
use rill_ir::{BeginBlock, BindingId, Body, Operand, RescueClause};
use rill_native::{CmpPred, FuncId, FunctionBuilder, FunctionFlags, NativeType, Signature, ValueId, WORD};
use rustc_hash::FxHashSet;
use tracing::trace;

use super::lowerer::Unit;
use super::Rt;
use crate::exceptions::{rescue_targets, RescueTarget};
use crate::repr::{Repr, Tracked};
use crate::CodegenError;

const FRAME: u32 = 0;
const SELF: u32 = 1;
const BLOCK: u32 = 2;
const AUX: u32 = 3;
const FIRST_BINDING: u32 = 4;

/// Environment shared by the callbacks of one region.
struct Region {
    base: String,
    env: ValueId,
    bindings: Vec<(BindingId, Repr)>,
}

fn env_word(fb: &mut FunctionBuilder, env: ValueId, index: u32, ty: NativeType) -> ValueId {
    let offset = fb.iconst(i64::from(index) * i64::from(WORD));
    let addr = fb.ptr_add(env, offset);
    fb.load(ty, addr)
}

impl<'u, 'cx> Unit<'u, 'cx> {
    /// Allocate and fill the environment of a region covering `bodies`.
    fn region(&mut self, bodies: &[&Body]) -> Region {
        let mut seen = FxHashSet::default();
        let mut bindings = Vec::new();
        for body in bodies {
            for id in free_bindings(body) {
                if !seen.insert(id) {
                    continue;
                }
                if let Some(value) = self.tracker.get(id) {
                    bindings.push((id, value));
                }
            }
        }

        let words = FIRST_BINDING + u32::try_from(bindings.len()).unwrap_or(u32::MAX - FIRST_BINDING);
        let env = self.fb.alloca(words);
        let frame = self.frame;
        self.store_word(env, FRAME, frame);
        let this = match self.self_value {
            Some(this) => this.value,
            None => self.fb.null(),
        };
        self.store_word(env, SELF, this);
        let block = match self.block_value {
            Some(block) => block,
            None => self.fb.null(),
        };
        self.store_word(env, BLOCK, block);
        let zero = self.fb.iconst(0);
        self.store_word(env, AUX, zero);
        for (i, (_, value)) in bindings.iter().enumerate() {
            let index = FIRST_BINDING + u32::try_from(i).unwrap_or(0);
            self.store_word(env, index, value.value);
        }

        let n = self.out.next_callback(&self.scope.symbol);
        Region {
            base: format!("{}$region{n}", self.scope.symbol),
            env,
            bindings: bindings.into_iter().map(|(id, v)| (id, v.repr)).collect(),
        }
    }

    /// Define callback `<region>.<suffix>`. Its unit sees the enclosing
    /// frame, receiver, block and bindings; `handler` callbacks take the
    /// raised exception as a second parameter.
    fn region_callback<F>(
        &mut self,
        region: &Region,
        suffix: &str,
        handler: bool,
        build: F,
    ) -> Result<FuncId, CodegenError>
    where
        F: FnOnce(&mut Unit<'_, 'cx>, ValueId) -> Result<(), CodegenError>,
    {
        let mut params = vec![NativeType::Ptr];
        if handler {
            params.push(NativeType::Ptr);
        }
        let sig = Signature::new(params, NativeType::Ptr);
        let name = format!("{}.{suffix}", region.base);
        trace!(%name, "region callback");
        let id = self
            .out
            .module
            .declare_function(&name, sig.clone(), FunctionFlags::CALLBACK);

        let mut fb = FunctionBuilder::new(&sig);
        let env = fb.param(0);
        let frame = env_word(&mut fb, env, FRAME, NativeType::Ptr);
        let self_value = self.self_value.map(|this| Tracked {
            value: env_word(&mut fb, env, SELF, this.repr.native_type()),
            repr: this.repr,
        });
        let block_value = self
            .block_value
            .map(|_| env_word(&mut fb, env, BLOCK, NativeType::Ptr));
        let mut values = Vec::with_capacity(region.bindings.len());
        for (i, (id, repr)) in region.bindings.iter().enumerate() {
            let index = FIRST_BINDING + u32::try_from(i).unwrap_or(0);
            values.push((*id, env_word(&mut fb, env, index, repr.native_type()), *repr));
        }

        let closures = self.closures.clone();
        let line = self.line;
        let mut unit = Unit::new(
            self.cx,
            &mut *self.out,
            &mut *self.findings,
            Rc::clone(&self.scope),
            fb,
            frame,
            Repr::Boxed,
        );
        unit.self_value = self_value;
        unit.block_value = block_value;
        unit.closures = closures;
        unit.line = line;
        for (id, value, repr) in values {
            unit.tracker.record(id, value, repr);
        }
        build(&mut unit, env)?;
        let fb = unit.fb;
        self.out.define(id, fb);
        Ok(id)
    }

    /// `begin ... rescue ... else ... ensure ... end`.
    pub(super) fn begin(&mut self, begin: &BeginBlock) -> Result<Tracked<ValueId>, CodegenError> {
        let mut bodies = vec![&begin.body];
        bodies.extend(begin.rescues.iter().map(|clause| &clause.body));
        bodies.extend(begin.else_body.iter());
        bodies.extend(begin.ensure.iter());
        let region = self.region(&bodies);

        let body = self.region_callback(&region, "body", false, |unit, _| unit.lower_body(&begin.body))?;
        let handler = if begin.rescues.is_empty() {
            None
        } else {
            Some(self.handler(&region, &begin.rescues)?)
        };
        let else_fn = match &begin.else_body {
            Some(else_body) => Some(self.region_callback(&region, "else", false, |unit, _| {
                unit.lower_body(else_body)
            })?),
            None => None,
        };

        let value = match &begin.ensure {
            None => self.protected(region.env, body, handler, else_fn),
            Some(ensure) => {
                let main = self.region_callback(&region, "main", false, |unit, env| {
                    let value = unit.protected(env, body, handler, else_fn);
                    unit.fb.ret(Some(value));
                    Ok(())
                })?;
                let finalizer = self.region_callback(&region, "ensure", false, |unit, _| unit.lower_body(ensure))?;
                let main = self.fb.func_addr(main);
                let finalizer = self.fb.func_addr(finalizer);
                self.rt(Rt::Ensure, vec![main, region.env, finalizer, region.env])
            }
        };
        Ok(Tracked {
            value,
            repr: Repr::Boxed,
        })
    }

    /// Run `body` under `handler`, then `else_fn` when no handler ran.
    fn protected(&mut self, env: ValueId, body: FuncId, handler: Option<FuncId>, else_fn: Option<FuncId>) -> ValueId {
        let value = match handler {
            Some(handler) => {
                let body = self.fb.func_addr(body);
                let handler = self.fb.func_addr(handler);
                self.rt(Rt::Protect, vec![body, env, handler, env])
            }
            None => self.call_func(body, vec![env], NativeType::Ptr),
        };
        let Some(else_fn) = else_fn else {
            return value;
        };

        let slot = self.fb.alloca(1);
        self.fb.store(slot, value);
        let aux = self.load_word(env, AUX, NativeType::I64);
        let zero = self.fb.iconst(0);
        let clean = self.fb.icmp(CmpPred::Eq, aux, zero);
        let run = self.fb.new_block("else");
        let done = self.fb.new_block("else.done");
        self.fb.cond_br(clean, run, done);
        self.fb.position_at(run);
        let value = self.call_func(else_fn, vec![env], NativeType::Ptr);
        self.fb.store(slot, value);
        self.fb.br(done);
        self.fb.position_at(done);
        self.fb.load(NativeType::Ptr, slot)
    }

    /// Handler testing `rescues` in order; no match re-raises.
    fn handler(&mut self, region: &Region, rescues: &[RescueClause]) -> Result<FuncId, CodegenError> {
        let function = self.scope.function.clone();
        let line = self.line;
        let targets: Vec<Vec<RescueTarget>> = rescues
            .iter()
            .map(|clause| rescue_targets(self.cx, clause, self.findings, &function, line))
            .collect();

        self.region_callback(region, "handler", true, |unit, env| {
            let exc = unit.fb.param(1);
            let one = unit.fb.iconst(1);
            unit.store_word(env, AUX, one);

            for (i, (clause, targets)) in rescues.iter().zip(&targets).enumerate() {
                let matched = unit.fb.new_block(&format!("rescue{i}"));
                for (j, target) in targets.iter().enumerate() {
                    let name = unit.text(&target.name);
                    let hit = unit.rt(Rt::ExcMatches, vec![exc, name]);
                    let next = unit.fb.new_block(&format!("rescue{i}.miss{j}"));
                    unit.fb.cond_br(hit, matched, next);
                    unit.fb.position_at(next);
                }
                let miss = unit.fb.current_block();
                unit.fb.position_at(matched);
                if let Some(name) = clause.binding {
                    unit.store_local(
                        name,
                        Tracked {
                            value: exc,
                            repr: Repr::Boxed,
                        },
                    );
                }
                unit.lower_body(&clause.body)?;
                unit.fb.position_at(miss);
            }

            let _ = unit.rt(Rt::Reraise, vec![exc]);
            let nil = unit.fb.null();
            unit.fb.ret(Some(nil));
            Ok(())
        })
    }

    /// `mutex.synchronize { body }`: lock, run, unlock on every exit.
    pub(super) fn synchronize(&mut self, mutex: &Operand, body: &Body) -> Result<Tracked<ValueId>, CodegenError> {
        let mutex = self.operand_as(mutex, Repr::Boxed)?;
        let region = self.region(&[body]);
        self.store_word(region.env, AUX, mutex);

        let main = self.region_callback(&region, "body", false, |unit, _| unit.lower_body(body))?;
        let unlock = self.region_callback(&region, "unlock", false, |unit, env| {
            let mutex = unit.load_word(env, AUX, NativeType::Ptr);
            let _ = unit.rt(Rt::MutexUnlock, vec![mutex]);
            let nil = unit.fb.null();
            unit.fb.ret(Some(nil));
            Ok(())
        })?;

        let _ = self.rt(Rt::MutexLock, vec![mutex]);
        let main = self.fb.func_addr(main);
        let unlock = self.fb.func_addr(unlock);
        let value = self.rt(Rt::Ensure, vec![main, region.env, unlock, region.env]);
        Ok(Tracked {
            value,
            repr: Repr::Boxed,
        })
    }
}
