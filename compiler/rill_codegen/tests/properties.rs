//! Property tests: natively compiled arithmetic, arrays and hash tables
//! agree with their Rust counterparts.

#![allow(clippy::unwrap_used, clippy::expect_used, reason = "Tests can panic")]

use std::collections::BTreeMap;
use std::fmt::Write;

use proptest::prelude::*;
use rill_codegen::{compile, CodegenOptions};
use rill_ir::{BinaryOp, BodyBuilder, Function, InstrKind, Program, StringInterner, Ty};
use rill_rt::Machine;

/// Compile `main` as built by `build` and return its output.
fn run(build: impl FnOnce(&StringInterner, &mut BodyBuilder)) -> String {
    let interner = StringInterner::new();
    let mut main = BodyBuilder::new();
    build(&interner, &mut main);
    main.ret(None);
    let program = Program::new(
        vec![Function::new(
            interner.intern("main"),
            Vec::new(),
            Ty::Nil,
            main.finish(),
        )],
        Vec::new(),
    );
    let output = compile(&program, &interner, &CodegenOptions::default()).expect("compiles");
    let machine = Machine::new(output.native.expect("native module")).expect("loads");
    machine.run_main().expect("runs");
    machine.take_output()
}

fn evaluate(op: BinaryOp, lhs: i64, rhs: i64) -> String {
    run(|interner, main| {
        let l = main.int(lhs);
        let r = main.int(rhs);
        let out = main.binary(op, l, r, Ty::Int);
        main.puts(interner.intern("puts"), out);
    })
}

fn op_strategy() -> impl Strategy<Value = (BinaryOp, fn(i64, i64) -> i64)> {
    prop_oneof![
        Just((BinaryOp::Add, (|a, b| a + b) as fn(i64, i64) -> i64)),
        Just((BinaryOp::Sub, (|a, b| a - b) as fn(i64, i64) -> i64)),
        Just((BinaryOp::Mul, (|a, b| a * b) as fn(i64, i64) -> i64)),
        Just((BinaryOp::Div, (|a, b| a / b) as fn(i64, i64) -> i64)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn integer_ops_match_host(
        (op, host) in op_strategy(),
        lhs in -10_000i64..10_000,
        rhs in (-100i64..100).prop_filter("non-zero", |v| *v != 0),
    ) {
        prop_assert_eq!(evaluate(op, lhs, rhs), format!("{}\n", host(lhs, rhs)));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Inserts that outgrow the initial capacity keep every key reachable,
    /// later writes replace earlier ones, deletes report misses as nil and
    /// deleted keys can be written again.
    #[test]
    fn hash_tables_behave_like_maps(
        writes in prop::collection::vec((0i64..48, -1000i64..1000), 0..80),
        removed in prop::collection::vec(0i64..48, 0..10),
    ) {
        let mut expected = BTreeMap::new();
        for (k, v) in &writes {
            expected.insert(*k, *v);
        }
        let mut want = String::new();
        for k in &removed {
            let _ = writeln!(want, "{}", expected.remove(k).is_none());
        }
        let _ = writeln!(want, "{}", expected.len());
        for k in &removed {
            expected.insert(*k, k * 10);
        }
        let _ = writeln!(want, "{}", expected.len());
        for v in expected.values() {
            let _ = writeln!(want, "{v}");
        }

        let output = run(|interner, main| {
            let puts = interner.intern("puts");
            let table = main.emit(
                Ty::hash(Ty::Int, Ty::Int),
                InstrKind::HashLit { entries: Vec::new() },
            );
            let set = |main: &mut BodyBuilder, k: i64, v: i64| {
                let (k, v) = (main.int(k), main.int(v));
                main.emit_void(InstrKind::HashSet {
                    hash: table.into(),
                    key: k.into(),
                    value: v.into(),
                });
            };
            for (k, v) in &writes {
                set(&mut *main, *k, *v);
            }
            for k in &removed {
                let k = main.int(*k);
                let gone = main.emit(
                    Ty::Dynamic,
                    InstrKind::HashDelete { hash: table.into(), key: k.into() },
                );
                let missed = main.emit(Ty::Bool, InstrKind::IsNil { value: gone.into() });
                main.puts(puts, missed);
            }
            let len = main.emit(Ty::Int, InstrKind::HashLen { hash: table.into() });
            main.puts(puts, len);
            for k in &removed {
                set(&mut *main, *k, k * 10);
            }
            let len = main.emit(Ty::Int, InstrKind::HashLen { hash: table.into() });
            main.puts(puts, len);
            for k in expected.keys() {
                let k = main.int(*k);
                let v = main.emit(
                    Ty::Int,
                    InstrKind::HashGet { hash: table.into(), key: k.into() },
                );
                main.puts(puts, v);
            }
        });

        prop_assert_eq!(output, want);
    }

    #[test]
    fn arrays_grow_and_shrink_like_vectors(
        pushed in prop::collection::vec(-1000i64..1000, 0..40),
        pops in 0usize..8,
    ) {
        let pops = pops.min(pushed.len());
        let mut expected = pushed.clone();
        expected.truncate(pushed.len() - pops);

        let output = run(|interner, main| {
            let puts = interner.intern("puts");
            let list = main.emit(Ty::array(Ty::Int), InstrKind::ArrayLit { elements: Vec::new() });
            for v in &pushed {
                let v = main.int(*v);
                main.emit_void(InstrKind::ArrayPush { array: list.into(), value: v.into() });
            }
            for _ in 0..pops {
                let _ = main.emit(Ty::Int, InstrKind::ArrayPop { array: list.into() });
            }
            let len = main.emit(Ty::Int, InstrKind::ArrayLen { array: list.into() });
            main.puts(puts, len);
            for i in 0..expected.len() {
                let i = main.int(i64::try_from(i).unwrap());
                let v = main.emit(
                    Ty::Int,
                    InstrKind::ArrayGet { array: list.into(), index: i.into() },
                );
                main.puts(puts, v);
            }
        });

        let mut want = format!("{}\n", expected.len());
        for v in &expected {
            let _ = writeln!(want, "{v}");
        }
        prop_assert_eq!(output, want);
    }
}
