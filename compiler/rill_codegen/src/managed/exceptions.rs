//! Protected regions: `begin`/`rescue`/`else`/`ensure` and `synchronize`.
//!
//! Regions are laid out inline and described by exception-table rows:
//!
//! ```text
//!   try_start   body            ─┐ one row per rescued class
//!   try_end     else body        │
//!   handler_0   rescue body 0    │ ─┐ catch-all row for ensure,
//!   …                            │  │ pushed after the rescue rows
//!   covered     ensure (thrown) ─┘ ─┘
//!   normal      ensure (normal)
//!   done        result
//! ```
//!
//! Rows of nested regions are pushed while their bodies are lowered, so
//! they precede the rows of the region that contains them. Values are
//! spilled between instructions, so the operand stack is empty at every
//! region boundary.

use rill_ir::{BeginBlock, Body, Operand};

use super::document::Insn;
use super::lowerer::{Exit, Unit};
use crate::exceptions::rescue_targets;
use crate::repr::{Repr, Tracked};
use crate::CodegenError;

impl Unit<'_, '_> {
    /// A fresh boxed local holding nil.
    fn result_slot(&mut self) -> u16 {
        let slot = self.em.local(Repr::Boxed);
        self.em.emit(Insn::AconstNull);
        self.em.store(slot, Repr::Boxed);
        slot
    }

    pub(super) fn begin(&mut self, begin: &BeginBlock) -> Result<Repr, CodegenError> {
        let result = self.result_slot();
        let try_start = self.em.label("try_start");
        let try_end = self.em.label("try_end");
        let covered = self.em.label("covered");
        let normal = self.em.label("normal");

        self.em.place(&try_start);
        let after_body = match begin.else_body {
            Some(_) => self.em.label("else"),
            None => normal.clone(),
        };
        self.lower_body(
            &begin.body,
            Exit::Store {
                slot: result,
                done: after_body.clone(),
            },
        )?;
        self.em.place(&try_end);

        // `else` runs only when the body raised nothing; it is outside the
        // rescue rows but still under `ensure`.
        if let Some(else_body) = &begin.else_body {
            self.em.place(&after_body);
            self.lower_body(
                else_body,
                Exit::Store {
                    slot: result,
                    done: normal.clone(),
                },
            )?;
        }

        let mut rows = Vec::new();
        let function = self.scope.function.clone();
        for clause in &begin.rescues {
            let targets = rescue_targets(self.cx, clause, self.findings, &function, self.line);
            let handler = self.em.label("rescue");
            self.em.place(&handler);
            let exception = self.spill(Repr::Boxed);
            if let Some(name) = clause.binding {
                self.store_local(name, exception);
            }
            self.lower_body(
                &clause.body,
                Exit::Store {
                    slot: result,
                    done: normal.clone(),
                },
            )?;
            rows.extend(targets.into_iter().map(|t| (handler.clone(), t.managed)));
        }
        self.em.place(&covered);
        for (handler, class) in rows {
            self.em.protect(&try_start, &try_end, &handler, Some(class));
        }

        if let Some(ensure) = &begin.ensure {
            let catch_all = self.em.label("ensure");
            let rethrow = self.em.label("rethrow");
            self.em.place(&catch_all);
            let exception = self.spill(Repr::Boxed);
            self.lower_body(
                ensure,
                Exit::Discard {
                    done: rethrow.clone(),
                },
            )?;
            self.em.place(&rethrow);
            self.em.load(exception.value, Repr::Boxed);
            self.em.emit(Insn::Athrow);
            self.em.protect(&try_start, &covered, &catch_all, None);

            let done = self.em.label("done");
            self.em.place(&normal);
            self.lower_body(ensure, Exit::Discard { done: done.clone() })?;
            self.em.place(&done);
        } else {
            self.em.place(&normal);
        }

        self.em.load(result, Repr::Boxed);
        Ok(Repr::Boxed)
    }

    /// `mutex.synchronize { body }`: the mutex is released on both the
    /// normal and the exceptional path.
    pub(super) fn synchronize(&mut self, mutex: &Operand, body: &Body) -> Result<Repr, CodegenError> {
        let mutex: Tracked<u16> = self.operand(mutex)?;
        self.mutex_call(mutex, "lock");
        let result = self.result_slot();
        let start = self.em.label("sync_start");
        let end = self.em.label("sync_end");
        let release = self.em.label("sync_release");
        let unwind = self.em.label("sync_unwind");

        self.em.place(&start);
        self.lower_body(
            body,
            Exit::Store {
                slot: result,
                done: release.clone(),
            },
        )?;
        self.em.place(&end);

        self.em.place(&unwind);
        let exception = self.spill(Repr::Boxed);
        self.mutex_call(mutex, "unlock");
        self.em.load(exception.value, Repr::Boxed);
        self.em.emit(Insn::Athrow);
        self.em.protect(&start, &end, &unwind, None);

        self.em.place(&release);
        self.mutex_call(mutex, "unlock");
        self.em.load(result, Repr::Boxed);
        Ok(Repr::Boxed)
    }
}
