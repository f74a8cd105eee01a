use pretty_assertions::assert_eq;
use rill_native::{
    BinOp, Callee, CmpPred, FunctionBuilder, FunctionFlags, GlobalInit, Module, NativeType,
    Signature,
};

use super::{Machine, MAIN_FUNCTION};
use crate::{ExecError, Unwind, Word};

/// `add(a, b) = a + b`.
fn add_module() -> Module {
    let mut module = Module::new("test");
    let sig = Signature::new(vec![NativeType::I64, NativeType::I64], NativeType::I64);
    let add = module.declare_function("add", sig.clone(), FunctionFlags::empty());
    let mut b = FunctionBuilder::new(&sig);
    let (lhs, rhs) = (b.param(0), b.param(1));
    let sum = b.binary(BinOp::Add, lhs, rhs);
    b.ret(Some(sum));
    module.define_function(add, b.finish());
    module
}

/// `main` that prints `text` with `rl_puts`.
fn hello_module(text: &str) -> Module {
    let mut module = Module::new("hello");
    let lit = module.declare_extern("rl_str_lit", &[NativeType::Ptr], NativeType::Ptr);
    let puts = module.declare_extern("rl_puts", &[NativeType::Ptr], NativeType::Ptr);
    let greeting = module.text(text);
    let sig = Signature::new(Vec::new(), NativeType::Ptr);
    let main = module.declare_function(MAIN_FUNCTION, sig.clone(), FunctionFlags::empty());
    let mut b = FunctionBuilder::new(&sig);
    let addr = b.global_addr(greeting);
    let s = b.call(Callee::Extern(lit), vec![addr], NativeType::Ptr);
    b.call(Callee::Extern(puts), vec![s], NativeType::Ptr);
    let nil = b.null();
    b.ret(Some(nil));
    module.define_function(main, b.finish());
    module
}

#[test]
fn calls_a_defined_function() {
    let Ok(machine) = Machine::new(add_module()) else {
        panic!("machine should build");
    };
    let result = machine.call_by_name("add", &[Word::Int(40), Word::Int(2)]);
    assert_eq!(result, Ok(Word::Int(42)));
}

#[test]
fn arity_mismatch_is_a_fault() {
    let Ok(machine) = Machine::new(add_module()) else {
        panic!("machine should build");
    };
    let result = machine.call_by_name("add", &[Word::Int(1)]);
    assert!(matches!(
        result,
        Err(Unwind::Fault(ExecError::ArityMismatch { expected: 2, found: 1, .. }))
    ));
}

#[test]
fn unknown_extern_is_rejected_up_front() {
    let mut module = Module::new("bad");
    module.declare_extern("rl_no_such_thing", &[], NativeType::Void);
    assert!(matches!(
        Machine::new(module),
        Err(ExecError::UnknownExtern(name)) if name == "rl_no_such_thing"
    ));
}

#[test]
fn run_main_captures_output() {
    let Ok(machine) = Machine::new(hello_module("hello")) else {
        panic!("machine should build");
    };
    assert_eq!(machine.run_main(), Ok(Word::Null));
    assert_eq!(machine.take_output(), "hello\n");
    assert_eq!(machine.output(), "");
}

#[test]
fn loop_counts_down_through_a_stack_slot() {
    // n = 5; while n > 0 { n = n - 1 }; return n
    let mut module = Module::new("loop");
    let sig = Signature::new(Vec::new(), NativeType::I64);
    let f = module.declare_function("countdown", sig.clone(), FunctionFlags::empty());
    let mut b = FunctionBuilder::new(&sig);
    let slot = b.alloca(1);
    let five = b.iconst(5);
    b.store(slot, five);
    let head = b.new_block("head");
    let body = b.new_block("body");
    let exit = b.new_block("exit");
    b.br(head);

    b.position_at(head);
    let n = b.load(NativeType::I64, slot);
    let zero = b.iconst(0);
    let more = b.icmp(CmpPred::Gt, n, zero);
    b.cond_br(more, body, exit);

    b.position_at(body);
    let n = b.load(NativeType::I64, slot);
    let one = b.iconst(1);
    let next = b.binary(BinOp::Sub, n, one);
    b.store(slot, next);
    b.br(head);

    b.position_at(exit);
    let n = b.load(NativeType::I64, slot);
    b.ret(Some(n));
    module.define_function(f, b.finish());

    let Ok(machine) = Machine::new(module) else {
        panic!("machine should build");
    };
    let before = machine.live_words();
    assert_eq!(machine.call_by_name("countdown", &[]), Ok(Word::Int(0)));
    // The stack slot is released when the frame exits.
    assert_eq!(machine.live_words(), before);
}

#[test]
fn uncaught_raise_reports_class_and_message() {
    let mut module = Module::new("raise");
    let raise = module.declare_extern(
        "rl_raise",
        &[NativeType::Ptr, NativeType::Ptr],
        NativeType::Ptr,
    );
    let lit = module.declare_extern("rl_str_lit", &[NativeType::Ptr], NativeType::Ptr);
    let class = module.text("ArgumentError");
    let message = module.text("bad value");
    let sig = Signature::new(Vec::new(), NativeType::Ptr);
    let main = module.declare_function(MAIN_FUNCTION, sig.clone(), FunctionFlags::empty());
    let mut b = FunctionBuilder::new(&sig);
    let class_addr = b.global_addr(class);
    let message_addr = b.global_addr(message);
    let boxed = b.call(Callee::Extern(lit), vec![message_addr], NativeType::Ptr);
    let r = b.call(Callee::Extern(raise), vec![class_addr, boxed], NativeType::Ptr);
    b.ret(Some(r));
    module.define_function(main, b.finish());

    let Ok(machine) = Machine::new(module) else {
        panic!("machine should build");
    };
    assert_eq!(
        machine.run_main(),
        Err(ExecError::Uncaught {
            class: "ArgumentError".to_owned(),
            message: "bad value".to_owned(),
        })
    );
}

#[test]
fn globals_are_addressable_by_name() {
    let mut module = Module::new("globals");
    module.add_global("counter", GlobalInit::Zeroed(1), true);
    let Ok(machine) = Machine::new(module) else {
        panic!("machine should build");
    };
    let Some(Word::Ptr(ptr)) = machine.global("counter") else {
        panic!("global should resolve to a pointer");
    };
    assert_eq!(machine.store(ptr, Word::Int(7)), Ok(()));
    assert_eq!(machine.load_typed(ptr, NativeType::I64), Ok(Word::Int(7)));
}
