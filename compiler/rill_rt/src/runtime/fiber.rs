//! Fibers: resume/yield with values passed both ways.
//!
//! # Design
//!
//! Each fiber runs its block on an OS thread of its own, parked on a
//! rendezvous channel until the first `resume`. Exactly one side runs at a
//! time: `resume` sends a value and blocks until the fiber yields or
//! finishes; `Fiber.yield` sends a value back and blocks until the next
//! `resume`. The fiber thread records itself as the current fiber in a
//! thread local, which is what `Fiber.yield` and `Fiber.current` consult.
//!
//! A fiber that is never resumed to completion keeps its thread parked
//! until the process exits.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use rill_native::abi::BuiltinClass;
use tracing::trace;

use super::concurrency::{new_handle, resolve, HandleObject};
use super::control::call_closure;
use super::arg;
use crate::{ExecError, Machine, Unwind, Word};

type RtResult = Result<Word, Unwind>;

enum FiberMsg {
    Yield(Word),
    Done(Result<Word, Unwind>),
}

pub(crate) struct FiberState {
    resume_tx: Sender<Word>,
    event_rx: Receiver<FiberMsg>,
    alive: AtomicBool,
}

struct FiberLink {
    handle: Word,
    events: Sender<FiberMsg>,
    resumes: Receiver<Word>,
}

thread_local! {
    static CURRENT_FIBER: RefCell<Option<FiberLink>> = const { RefCell::new(None) };
}

pub(super) fn rl_fiber_new(m: &Machine, args: &[Word]) -> RtResult {
    let block = arg(args, 0);
    let (resume_tx, resume_rx) = channel::bounded::<Word>(0);
    let (event_tx, event_rx) = channel::bounded::<FiberMsg>(0);
    let state = Arc::new(FiberState {
        resume_tx,
        event_rx,
        alive: AtomicBool::new(true),
    });
    let handle = new_handle(m, BuiltinClass::Fiber, HandleObject::Fiber(Arc::clone(&state)));

    let child = m.clone();
    std::thread::Builder::new()
        .name("rill-fiber".to_owned())
        .spawn(move || {
            let Ok(first) = resume_rx.recv() else {
                return;
            };
            let events = event_tx.clone();
            CURRENT_FIBER.with(|current| {
                *current.borrow_mut() = Some(FiberLink {
                    handle,
                    events: event_tx,
                    resumes: resume_rx,
                });
            });
            let result = call_closure(&child, block, &[first]);
            let _ = events.send(FiberMsg::Done(result));
        })
        .map_err(|err| m.raise_error("FiberError", format!("can't create fiber: {err}")))?;
    trace!(?handle, "fiber created");
    Ok(handle)
}

fn fiber_of(m: &Machine, word: Word) -> Result<Arc<FiberState>, Unwind> {
    match resolve(m, word, BuiltinClass::Fiber)? {
        HandleObject::Fiber(state) => Ok(state),
        _ => Err(ExecError::TypeMismatch("fiber handle".to_owned()).into()),
    }
}

/// Transfer control into the fiber, returning what it yields or returns.
pub(super) fn rl_fiber_resume(m: &Machine, args: &[Word]) -> RtResult {
    let fiber = fiber_of(m, arg(args, 0))?;
    if !fiber.alive.load(Ordering::Acquire) {
        return Err(m.raise_error("FiberError", "dead fiber called"));
    }
    fiber
        .resume_tx
        .send(arg(args, 1))
        .map_err(|_| m.raise_error("FiberError", "dead fiber called"))?;
    match fiber.event_rx.recv() {
        Ok(FiberMsg::Yield(value)) => Ok(value),
        Ok(FiberMsg::Done(result)) => {
            fiber.alive.store(false, Ordering::Release);
            result
        }
        Err(_) => {
            fiber.alive.store(false, Ordering::Release);
            Err(m.raise_error("FiberError", "fiber terminated abnormally"))
        }
    }
}

/// Suspend the current fiber, handing `value` to its resumer.
pub(super) fn rl_fiber_yield(m: &Machine, args: &[Word]) -> RtResult {
    let value = arg(args, 0);
    let channels = CURRENT_FIBER.with(|current| {
        current
            .borrow()
            .as_ref()
            .map(|link| (link.events.clone(), link.resumes.clone()))
    });
    let Some((events, resumes)) = channels else {
        return Err(m.raise_error("FiberError", "can't yield from root fiber"));
    };
    events
        .send(FiberMsg::Yield(value))
        .map_err(|_| m.raise_error("FiberError", "resumer is gone"))?;
    resumes
        .recv()
        .map_err(|_| m.raise_error("FiberError", "fiber abandoned"))
}

/// The running fiber, or nil on the root fiber.
pub(super) fn rl_fiber_current(_m: &Machine, _args: &[Word]) -> RtResult {
    Ok(CURRENT_FIBER.with(|current| {
        current
            .borrow()
            .as_ref()
            .map_or(Word::Null, |link| link.handle)
    }))
}

pub(super) fn rl_fiber_alive(m: &Machine, args: &[Word]) -> RtResult {
    let fiber = fiber_of(m, arg(args, 0))?;
    Ok(Word::Bool(fiber.alive.load(Ordering::Acquire)))
}
