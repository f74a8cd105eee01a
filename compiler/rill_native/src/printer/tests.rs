use pretty_assertions::assert_eq;

use super::*;
use crate::{BinOp, FunctionBuilder, FunctionFlags, NativeType, Signature};

#[test]
fn prints_simple_function() {
    let mut module = Module::new("demo");
    let sig = Signature::new(vec![NativeType::I64, NativeType::I64], NativeType::I64);
    let f = module.declare_function("add", sig.clone(), FunctionFlags::empty());
    let mut b = FunctionBuilder::new(&sig);
    let sum = b.binary(BinOp::Add, b.param(0), b.param(1));
    b.ret(Some(sum));
    module.define_function(f, b.finish());

    assert_eq!(
        print_module(&module),
        "; module demo\n\ndefine i64 @add(i64 %0, i64 %1) {\nentry.0:\n  %2 = add i64 %0, %1\n  ret i64 %2\n}\n"
    );
}

#[test]
fn prints_globals_and_externs() {
    let mut module = Module::new("demo");
    let _ = module.text("hi");
    let _ = module.declare_extern("rl_puts", &[NativeType::Ptr], NativeType::Void);
    let text = print_module(&module);
    assert!(text.contains("@.str.0 = constant c\"hi\""));
    assert!(text.contains("declare void @rl_puts(ptr)"));
}
