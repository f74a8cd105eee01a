//! Threads, queues, mutexes and fibers driven through the runtime table.

use pretty_assertions::assert_eq;
use rill_native::abi::BuiltinClass;
use rill_native::{Callee, FuncId, FunctionBuilder, FunctionFlags, Module, NativeType, Signature};
use rill_rt::{describe_exception, Machine, RuntimeFn, Unwind, Word, RUNTIME_FUNCTIONS};

fn rt(name: &str) -> RuntimeFn {
    let Some((_, f)) = RUNTIME_FUNCTIONS.iter().find(|(n, _)| *n == name) else {
        panic!("runtime function {name} is missing");
    };
    *f
}

fn call(m: &Machine, name: &str, args: &[Word]) -> Word {
    match rt(name)(m, args) {
        Ok(word) => word,
        Err(err) => panic!("{name} failed: {err:?}"),
    }
}

fn unbox(m: &Machine, word: Word) -> i64 {
    let Some(v) = call(m, "rl_unbox_int", &[word]).as_int() else {
        panic!("expected an integer");
    };
    v
}

fn generic_sig() -> Signature {
    Signature::new(
        vec![NativeType::Ptr, NativeType::I64, NativeType::Ptr],
        NativeType::Ptr,
    )
}

/// Generic closure entry that pushes 1, 2 and 3 onto the queue in its env.
fn producer(module: &mut Module) -> FuncId {
    let box_int = module.declare_extern("rl_box_int", &[NativeType::I64], NativeType::Ptr);
    let push = module.declare_extern(
        "rl_queue_push",
        &[NativeType::Ptr, NativeType::Ptr],
        NativeType::Ptr,
    );
    let sig = generic_sig();
    let f = module.declare_function("producer", sig.clone(), FunctionFlags::empty());
    let mut b = FunctionBuilder::new(&sig);
    let queue = b.param(0);
    for i in 1..=3 {
        let raw = b.iconst(i);
        let boxed = b.call(Callee::Extern(box_int), vec![raw], NativeType::Ptr);
        b.call(Callee::Extern(push), vec![queue, boxed], NativeType::Ptr);
    }
    let nil = b.null();
    b.ret(Some(nil));
    module.define_function(f, b.finish());
    f
}

/// Generic closure entry: `|x| Fiber.yield(x)`, returning what the next
/// resume passes in.
fn echo_fiber(module: &mut Module) -> FuncId {
    let yield_ = module.declare_extern("rl_fiber_yield", &[NativeType::Ptr], NativeType::Ptr);
    let sig = generic_sig();
    let f = module.declare_function("echo", sig.clone(), FunctionFlags::empty());
    let mut b = FunctionBuilder::new(&sig);
    let argv = b.param(2);
    let first = b.load(NativeType::Ptr, argv);
    let resumed = b.call(Callee::Extern(yield_), vec![first], NativeType::Ptr);
    b.ret(Some(resumed));
    module.define_function(f, b.finish());
    f
}

fn closure(m: &Machine, generic: FuncId, env: Word) -> Word {
    m.alloc_words(vec![
        Word::Int(BuiltinClass::Proc.tag()),
        Word::Func(generic),
        env,
        Word::Int(-1),
        Word::Null,
    ])
}

fn machine(build: impl FnOnce(&mut Module) -> FuncId) -> (Machine, FuncId) {
    let mut module = Module::new("concurrency");
    let f = build(&mut module);
    let Ok(m) = Machine::new(module) else {
        panic!("machine should build");
    };
    (m, f)
}

#[test]
fn thread_feeds_a_bounded_queue() {
    let (m, producer) = machine(producer);
    let queue = call(&m, "rl_queue_new", &[Word::Int(1)]);
    let block = closure(&m, producer, queue);
    let thread = call(&m, "rl_thread_new", &[block]);

    let received: Vec<i64> = (0..3)
        .map(|_| {
            let item = call(&m, "rl_queue_pop", &[queue]);
            unbox(&m, item)
        })
        .collect();
    assert_eq!(received, vec![1, 2, 3]);
    assert_eq!(call(&m, "rl_thread_join", &[thread]), thread);
    assert_eq!(call(&m, "rl_thread_value", &[thread]), Word::Null);
}

#[test]
fn fiber_passes_values_both_ways() {
    let (m, echo) = machine(echo_fiber);
    let fiber = call(&m, "rl_fiber_new", &[closure(&m, echo, Word::Null)]);

    let one = call(&m, "rl_box_int", &[Word::Int(1)]);
    let yielded = call(&m, "rl_fiber_resume", &[fiber, one]);
    assert_eq!(unbox(&m, yielded), 1);
    assert_eq!(call(&m, "rl_fiber_alive", &[fiber]), Word::Bool(true));

    let two = call(&m, "rl_box_int", &[Word::Int(2)]);
    let finished = call(&m, "rl_fiber_resume", &[fiber, two]);
    assert_eq!(unbox(&m, finished), 2);
    assert_eq!(call(&m, "rl_fiber_alive", &[fiber]), Word::Bool(false));

    let Err(Unwind::Raise(exc)) = rt("rl_fiber_resume")(&m, &[fiber, Word::Null]) else {
        panic!("resuming a dead fiber should raise");
    };
    assert_eq!(
        describe_exception(&m, exc),
        ("FiberError".to_owned(), "dead fiber called".to_owned())
    );
}

#[test]
fn yield_from_root_raises() {
    let (m, _) = machine(echo_fiber);
    assert_eq!(call(&m, "rl_fiber_current", &[]), Word::Null);
    let Err(Unwind::Raise(exc)) = rt("rl_fiber_yield")(&m, &[Word::Null]) else {
        panic!("yield outside a fiber should raise");
    };
    assert_eq!(describe_exception(&m, exc).0, "FiberError");
}

#[test]
fn unlocking_an_unlocked_mutex_raises() {
    let (m, _) = machine(producer);
    let mutex = call(&m, "rl_mutex_new", &[]);
    call(&m, "rl_mutex_lock", &[mutex]);
    call(&m, "rl_mutex_unlock", &[mutex]);
    let Err(Unwind::Raise(exc)) = rt("rl_mutex_unlock")(&m, &[mutex]) else {
        panic!("second unlock should raise");
    };
    assert_eq!(describe_exception(&m, exc).0, "ThreadError");
}

#[test]
fn queue_rejects_non_positive_capacity() {
    let (m, _) = machine(producer);
    let Err(Unwind::Raise(exc)) = rt("rl_queue_new")(&m, &[Word::Int(0)]) else {
        panic!("zero capacity should raise");
    };
    assert_eq!(describe_exception(&m, exc).0, "ArgumentError");
}
