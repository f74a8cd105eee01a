//! Threads, mutexes, condition variables and bounded queues.
//!
//! Guest objects of these classes are handles: a two-word box holding the
//! class tag and an id into the machine's [`Handles`] table. Blocking
//! operations never hold the table lock while they wait.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use rill_native::abi::BuiltinClass;
use rustc_hash::FxHashMap;
use tracing::debug;

use super::control::call_closure;
use super::fiber::FiberState;
use super::value::{classify, Value};
use super::{arg, int_arg};
use crate::{ExecError, Machine, Unwind, Word};

type RtResult = Result<Word, Unwind>;

pub(crate) struct ThreadSlot {
    handle: Option<JoinHandle<Result<Word, Unwind>>>,
    result: Option<Result<Word, Unwind>>,
}

/// A guest mutex. Not reentrant; unlocking an unlocked mutex raises.
pub(crate) struct GuestMutex {
    locked: Mutex<bool>,
    released: Condvar,
}

#[derive(Default)]
struct CondState {
    waiting: u64,
    permits: u64,
}

pub(crate) struct GuestCondvar {
    state: Mutex<CondState>,
    wake: Condvar,
}

pub(crate) struct GuestQueue {
    tx: Sender<Word>,
    rx: Receiver<Word>,
}

#[derive(Clone)]
pub(crate) enum HandleObject {
    Thread(Arc<Mutex<ThreadSlot>>),
    Mutex(Arc<GuestMutex>),
    Condvar(Arc<GuestCondvar>),
    Queue(Arc<GuestQueue>),
    Fiber(Arc<FiberState>),
}

/// Table of live concurrency objects, keyed by handle id.
#[derive(Default)]
pub struct Handles {
    next: i64,
    objects: FxHashMap<i64, HandleObject>,
}

impl Handles {
    pub(crate) fn insert(&mut self, object: HandleObject) -> i64 {
        self.next += 1;
        self.objects.insert(self.next, object);
        self.next
    }

    pub(crate) fn get(&self, id: i64) -> Option<HandleObject> {
        self.objects.get(&id).cloned()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Register `object` and box a handle of class `class` for it.
pub(crate) fn new_handle(m: &Machine, class: BuiltinClass, object: HandleObject) -> Word {
    let id = m.handles().lock().insert(object);
    m.alloc_words(vec![Word::Int(class.tag()), Word::Int(id)])
}

/// The object behind a handle of class `class`.
pub(crate) fn resolve(m: &Machine, word: Word, class: BuiltinClass) -> Result<HandleObject, Unwind> {
    match classify(m, word)? {
        Value::Handle { class: actual, id } if actual == class => m
            .handles()
            .lock()
            .get(id)
            .ok_or_else(|| ExecError::TypeMismatch(format!("stale {} handle {id}", class.name())).into()),
        other => {
            let found = match other {
                Value::Nil => "nil".to_owned(),
                other => other.class_name(m),
            };
            Err(m.raise_error(
                "TypeError",
                format!("wrong argument type {found} (expected {})", class.name()),
            ))
        }
    }
}

// -- Threads --

pub(super) fn rl_thread_new(m: &Machine, args: &[Word]) -> RtResult {
    let block = arg(args, 0);
    let child = m.clone();
    let handle = std::thread::Builder::new()
        .name("rill-thread".to_owned())
        .spawn(move || call_closure(&child, block, &[]))
        .map_err(|err| m.raise_error("ThreadError", format!("can't create thread: {err}")))?;
    let slot = ThreadSlot {
        handle: Some(handle),
        result: None,
    };
    let word = new_handle(m, BuiltinClass::Thread, HandleObject::Thread(Arc::new(Mutex::new(slot))));
    debug!(?word, "thread started");
    Ok(word)
}

/// Wait for a thread and return its result, re-raising its exception.
fn join(m: &Machine, thread: Word) -> RtResult {
    let HandleObject::Thread(slot) = resolve(m, thread, BuiltinClass::Thread)? else {
        return Err(ExecError::TypeMismatch("thread handle".to_owned()).into());
    };
    let mut slot = slot.lock();
    if let Some(handle) = slot.handle.take() {
        let result = handle.join().map_err(|_| ExecError::ThreadPanicked)?;
        slot.result = Some(result);
    }
    slot.result
        .clone()
        .unwrap_or_else(|| Err(ExecError::ThreadPanicked.into()))
}

pub(super) fn rl_thread_join(m: &Machine, args: &[Word]) -> RtResult {
    let thread = arg(args, 0);
    join(m, thread)?;
    Ok(thread)
}

pub(super) fn rl_thread_value(m: &Machine, args: &[Word]) -> RtResult {
    join(m, arg(args, 0))
}

// -- Mutexes --

fn mutex_of(m: &Machine, word: Word) -> Result<Arc<GuestMutex>, Unwind> {
    match resolve(m, word, BuiltinClass::Mutex)? {
        HandleObject::Mutex(mutex) => Ok(mutex),
        _ => Err(ExecError::TypeMismatch("mutex handle".to_owned()).into()),
    }
}

pub(super) fn rl_mutex_new(m: &Machine, _args: &[Word]) -> RtResult {
    let mutex = GuestMutex {
        locked: Mutex::new(false),
        released: Condvar::new(),
    };
    Ok(new_handle(m, BuiltinClass::Mutex, HandleObject::Mutex(Arc::new(mutex))))
}

impl GuestMutex {
    fn lock(&self) {
        let mut locked = self.locked.lock();
        while *locked {
            self.released.wait(&mut locked);
        }
        *locked = true;
    }

    fn unlock(&self) -> bool {
        let mut locked = self.locked.lock();
        if !*locked {
            return false;
        }
        *locked = false;
        self.released.notify_one();
        true
    }
}

pub(super) fn rl_mutex_lock(m: &Machine, args: &[Word]) -> RtResult {
    let word = arg(args, 0);
    mutex_of(m, word)?.lock();
    Ok(word)
}

pub(super) fn rl_mutex_unlock(m: &Machine, args: &[Word]) -> RtResult {
    let word = arg(args, 0);
    if !mutex_of(m, word)?.unlock() {
        return Err(m.raise_error("ThreadError", "Attempt to unlock a mutex which is not locked"));
    }
    Ok(word)
}

// -- Condition variables --

fn condvar_of(m: &Machine, word: Word) -> Result<Arc<GuestCondvar>, Unwind> {
    match resolve(m, word, BuiltinClass::ConditionVariable)? {
        HandleObject::Condvar(cv) => Ok(cv),
        _ => Err(ExecError::TypeMismatch("condition variable handle".to_owned()).into()),
    }
}

pub(super) fn rl_condvar_new(m: &Machine, _args: &[Word]) -> RtResult {
    let cv = GuestCondvar {
        state: Mutex::new(CondState::default()),
        wake: Condvar::new(),
    };
    Ok(new_handle(
        m,
        BuiltinClass::ConditionVariable,
        HandleObject::Condvar(Arc::new(cv)),
    ))
}

/// Release the mutex, wait for a signal, then re-acquire the mutex.
pub(super) fn rl_condvar_wait(m: &Machine, args: &[Word]) -> RtResult {
    let (cv_word, mutex_word) = (arg(args, 0), arg(args, 1));
    let cv = condvar_of(m, cv_word)?;
    let mutex = mutex_of(m, mutex_word)?;
    {
        // The waiter is counted before the mutex is released.
        let mut state = cv.state.lock();
        state.waiting += 1;
        if !mutex.unlock() {
            state.waiting -= 1;
            return Err(m.raise_error("ThreadError", "condition wait without holding the mutex"));
        }
        while state.permits == 0 {
            cv.wake.wait(&mut state);
        }
        state.permits -= 1;
        state.waiting -= 1;
    }
    mutex.lock();
    Ok(cv_word)
}

pub(super) fn rl_condvar_signal(m: &Machine, args: &[Word]) -> RtResult {
    let word = arg(args, 0);
    let cv = condvar_of(m, word)?;
    let mut state = cv.state.lock();
    if state.waiting > state.permits {
        state.permits += 1;
        cv.wake.notify_one();
    }
    Ok(word)
}

pub(super) fn rl_condvar_broadcast(m: &Machine, args: &[Word]) -> RtResult {
    let word = arg(args, 0);
    let cv = condvar_of(m, word)?;
    let mut state = cv.state.lock();
    state.permits = state.waiting;
    cv.wake.notify_all();
    Ok(word)
}

// -- Bounded queues --

fn queue_of(m: &Machine, word: Word) -> Result<Arc<GuestQueue>, Unwind> {
    match resolve(m, word, BuiltinClass::SizedQueue)? {
        HandleObject::Queue(queue) => Ok(queue),
        _ => Err(ExecError::TypeMismatch("queue handle".to_owned()).into()),
    }
}

pub(super) fn rl_queue_new(m: &Machine, args: &[Word]) -> RtResult {
    let capacity = int_arg(args, 0);
    if capacity <= 0 {
        return Err(m.raise_error("ArgumentError", "queue size must be positive"));
    }
    let (tx, rx) = channel::bounded(usize::try_from(capacity).unwrap_or(usize::MAX));
    Ok(new_handle(
        m,
        BuiltinClass::SizedQueue,
        HandleObject::Queue(Arc::new(GuestQueue { tx, rx })),
    ))
}

/// Push, blocking while the queue is full.
pub(super) fn rl_queue_push(m: &Machine, args: &[Word]) -> RtResult {
    let word = arg(args, 0);
    let queue = queue_of(m, word)?;
    queue
        .tx
        .send(arg(args, 1))
        .map_err(|_| m.raise_error("ThreadError", "queue closed"))?;
    Ok(word)
}

/// Pop, blocking while the queue is empty.
pub(super) fn rl_queue_pop(m: &Machine, args: &[Word]) -> RtResult {
    let queue = queue_of(m, arg(args, 0))?;
    queue
        .rx
        .recv()
        .map_err(|_| m.raise_error("ThreadError", "queue closed"))
}
