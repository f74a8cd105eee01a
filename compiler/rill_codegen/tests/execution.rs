//! End-to-end tests: build IR, compile it natively and run it on the
//! `rill_rt` machine.

use pretty_assertions::assert_eq;
use rill_codegen::{compile, CodegenOptions, CodegenOutput};
use rill_ir::{
    BeginBlock, BinaryOp, BodyBuilder, CallArgs, ClassType, ClosureLiteral, ConcurrencyOp, Function,
    InstrKind, Name, Operand, Param, Program, RescueClause, StringInterner, Ty,
};
use rill_native::{abi, NativeType};
use rill_rt::{ExecError, Machine};

struct Harness {
    interner: StringInterner,
}

impl Harness {
    fn new() -> Self {
        Harness {
            interner: StringInterner::new(),
        }
    }

    fn n(&self, s: &str) -> Name {
        self.interner.intern(s)
    }

    fn compile(&self, program: &Program, options: &CodegenOptions) -> CodegenOutput {
        match compile(program, &self.interner, options) {
            Ok(output) => output,
            Err(err) => panic!("compilation failed: {err}"),
        }
    }

    fn machine(&self, program: &Program, options: &CodegenOptions) -> (Machine, CodegenOutput) {
        let mut output = self.compile(program, options);
        let Some(module) = output.native.take() else {
            panic!("no native module");
        };
        let machine = match Machine::new(module) {
            Ok(machine) => machine,
            Err(err) => panic!("machine rejected the module: {err}"),
        };
        (machine, output)
    }

    /// Run `main` and return what the program printed.
    fn run(&self, program: &Program) -> String {
        let (machine, _) = self.machine(program, &CodegenOptions::default());
        if let Err(err) = machine.run_main() {
            panic!("program failed: {err}\noutput so far:\n{}", machine.output());
        }
        machine.take_output()
    }
}

fn main_only(h: &Harness, body: BodyBuilder) -> Program {
    Program::new(
        vec![Function::new(h.n("main"), Vec::new(), Ty::Nil, body.finish())],
        Vec::new(),
    )
}

#[test]
fn branches_merge_through_phis() {
    let h = Harness::new();
    let (a, b) = (h.n("a"), h.n("b"));

    let mut max = BodyBuilder::new();
    let x = max.load(a, Ty::Int);
    let y = max.load(b, Ty::Int);
    let greater = max.binary(BinaryOp::Gt, x, y, Ty::Bool);
    let (left, right, join) = (max.new_block(), max.new_block(), max.new_block());
    max.branch(greater, left, right);
    max.position_at(left);
    max.jump(join);
    max.position_at(right);
    max.jump(join);
    max.position_at(join);
    let picked = max.phi(Ty::Int, &[(left, x), (right, y)]);
    max.ret(Some(picked));

    let mut main = BodyBuilder::new();
    for (l, r) in [(3, 9), (12, -4)] {
        let l = main.int(l);
        let r = main.int(r);
        let m = main.call(h.n("max"), &[l, r], Ty::Int);
        main.puts(h.n("puts"), m);
    }
    main.ret(None);

    let program = Program::new(
        vec![
            Function::new(
                h.n("max"),
                vec![Param::new(a, Ty::Int), Param::new(b, Ty::Int)],
                Ty::Int,
                max.finish(),
            ),
            Function::new(h.n("main"), Vec::new(), Ty::Nil, main.finish()),
        ],
        Vec::new(),
    );
    assert_eq!(h.run(&program), "9\n12\n");
}

#[test]
fn integer_division_truncates_toward_zero() {
    let h = Harness::new();
    let mut main = BodyBuilder::new();
    let seven = main.int(-7);
    let two = main.int(2);
    let q = main.binary(BinaryOp::Div, seven, two, Ty::Int);
    main.puts(h.n("puts"), q);
    main.ret(None);
    assert_eq!(h.run(&main_only(&h, main)), "-3\n");
}

/// `def pick(flag) = flag ? <then> : <else>` printed through `show`.
fn merge_program(
    h: &Harness,
    then_value: impl Fn(&mut BodyBuilder) -> rill_ir::BindingId,
    else_value: impl Fn(&mut BodyBuilder) -> rill_ir::BindingId,
    show: impl Fn(&mut BodyBuilder, rill_ir::BindingId) -> rill_ir::BindingId,
) -> Program {
    let flag = h.n("flag");
    let mut pick = BodyBuilder::new();
    let cond = pick.load(flag, Ty::Bool);
    let (left, right, join) = (pick.new_block(), pick.new_block(), pick.new_block());
    pick.branch(cond, left, right);
    pick.position_at(left);
    let l = then_value(&mut pick);
    pick.jump(join);
    pick.position_at(right);
    let r = else_value(&mut pick);
    pick.jump(join);
    pick.position_at(join);
    let merged = pick.phi(Ty::Dynamic, &[(left, l), (right, r)]);
    let shown = show(&mut pick, merged);
    pick.puts(h.n("puts"), shown);
    pick.ret(None);

    let mut main = BodyBuilder::new();
    for value in [true, false] {
        let v = main.bool(value);
        let _ = main.call(h.n("pick"), &[v], Ty::Nil);
    }
    main.ret(None);

    Program::new(
        vec![
            Function::new(h.n("pick"), vec![Param::new(flag, Ty::Bool)], Ty::Nil, pick.finish()),
            Function::new(h.n("main"), Vec::new(), Ty::Nil, main.finish()),
        ],
        Vec::new(),
    )
}

#[test]
fn int_and_float_branches_merge_as_float() {
    let h = Harness::new();
    let program = merge_program(
        &h,
        |b| b.int(1),
        |b| b.float(0.5),
        |b, merged| {
            let one = b.float(1.0);
            b.binary(BinaryOp::Add, merged, one, Ty::Float)
        },
    );
    assert_eq!(h.run(&program), "2.0\n1.5\n");
}

#[test]
fn nil_and_int_branches_merge_boxed() {
    let h = Harness::new();
    let program = merge_program(
        &h,
        BodyBuilder::nil,
        |b| b.int(7),
        |b, merged| {
            b.emit(
                Ty::Bool,
                InstrKind::IsNil {
                    value: merged.into(),
                },
            )
        },
    );
    assert_eq!(h.run(&program), "true\nfalse\n");
}

#[test]
fn negative_indices_count_from_the_end() {
    let h = Harness::new();
    let mut main = BodyBuilder::new();
    let elements = [10, 20, 30].map(|v| Operand::from(main.int(v))).to_vec();
    let list = main.emit(Ty::array(Ty::Int), InstrKind::ArrayLit { elements });
    for index in [-1, 0] {
        let i = main.int(index);
        let v = main.emit(
            Ty::Int,
            InstrKind::ArrayGet {
                array: list.into(),
                index: i.into(),
            },
        );
        main.puts(h.n("puts"), v);
    }
    main.ret(None);
    assert_eq!(h.run(&main_only(&h, main)), "30\n10\n");
}

fn animals(h: &Harness, talk_ty: Ty) -> Program {
    let (a, b, speak, pet) = (h.n("Animal"), h.n("Dog"), h.n("speak"), h.n("pet"));
    let speak_body = |text: &str| {
        let mut body = BodyBuilder::new();
        let s = body.str(text);
        body.ret(Some(s));
        body.finish()
    };

    let mut talk = BodyBuilder::new();
    let recv = talk.load(pet, talk_ty.clone());
    let said = talk.method_call(recv, speak, &[], Ty::Str);
    talk.puts(h.n("puts"), said);
    talk.ret(None);

    let mut main = BodyBuilder::new();
    for class in [a, b] {
        let obj = main.new_object(class, &[]);
        let _ = main.call(h.n("talk"), &[obj], Ty::Nil);
    }
    main.ret(None);

    Program::new(
        vec![
            Function::method(a, speak, Vec::new(), Ty::Str, speak_body("...")),
            Function::method(b, speak, Vec::new(), Ty::Str, speak_body("woof")),
            Function::new(h.n("talk"), vec![Param::new(pet, talk_ty)], Ty::Nil, talk.finish()),
            Function::new(h.n("main"), Vec::new(), Ty::Nil, main.finish()),
        ],
        vec![
            ClassType::new(a, None).with_method(speak),
            ClassType::new(b, Some(a)).with_method(speak),
        ],
    )
}

#[test]
fn overridden_methods_dispatch_through_the_vtable() {
    let h = Harness::new();
    let program = animals(&h, Ty::Class(h.n("Animal")));
    let (machine, output) = h.machine(&program, &CodegenOptions::default());
    if let Err(err) = machine.run_main() {
        panic!("program failed: {err}");
    }
    assert_eq!(machine.take_output(), "...\nwoof\n");
    assert!(output.report.is_empty());
}

#[test]
fn untyped_receivers_fall_back_to_named_dispatch() {
    let h = Harness::new();
    let program = animals(&h, Ty::Dynamic);
    let (machine, output) = h.machine(&program, &CodegenOptions::default());
    if let Err(err) = machine.run_main() {
        panic!("program failed: {err}");
    }
    assert_eq!(machine.take_output(), "...\nwoof\n");
    assert_eq!(output.report.sites().len(), 1);
    assert_eq!(output.diagnostics.len(), 1);
}

#[test]
fn sibling_overrides_and_inherited_methods() {
    let h = Harness::new();
    let (a, b, c) = (h.n("A"), h.n("B"), h.n("C"));
    let (m, base, pet) = (h.n("m"), h.n("base"), h.n("pet"));
    let text = |s: &str| {
        let mut body = BodyBuilder::new();
        let v = body.str(s);
        body.ret(Some(v));
        body.finish()
    };

    let mut talk = BodyBuilder::new();
    let recv = talk.load(pet, Ty::Class(a));
    let said = talk.method_call(recv, m, &[], Ty::Str);
    talk.puts(h.n("puts"), said);
    let inherited = talk.method_call(recv, base, &[], Ty::Str);
    talk.puts(h.n("puts"), inherited);
    talk.ret(None);

    let mut main = BodyBuilder::new();
    for class in [b, c] {
        let obj = main.new_object(class, &[]);
        let _ = main.call(h.n("talk"), &[obj], Ty::Nil);
    }
    main.ret(None);

    let program = Program::new(
        vec![
            Function::method(a, m, Vec::new(), Ty::Str, text("A#m")),
            Function::method(a, base, Vec::new(), Ty::Str, text("A#base")),
            Function::method(b, m, Vec::new(), Ty::Str, text("B#m")),
            Function::method(c, m, Vec::new(), Ty::Str, text("C#m")),
            Function::new(h.n("talk"), vec![Param::new(pet, Ty::Class(a))], Ty::Nil, talk.finish()),
            Function::new(h.n("main"), Vec::new(), Ty::Nil, main.finish()),
        ],
        vec![
            ClassType::new(a, None).with_method(m).with_method(base),
            ClassType::new(b, Some(a)).with_method(m),
            ClassType::new(c, Some(a)).with_method(m),
        ],
    );
    assert_eq!(h.run(&program), "B#m\nA#base\nC#m\nA#base\n");
}

fn closure(b: &mut BodyBuilder, params: Vec<Param>, body: BodyBuilder) -> rill_ir::BindingId {
    let body = b.adopt(body);
    b.emit(Ty::Proc, InstrKind::Closure(ClosureLiteral { params, body }))
}

fn call_closure(b: &mut BodyBuilder, block: rill_ir::BindingId, args: &[rill_ir::BindingId]) {
    let _ = b.emit(
        Ty::Dynamic,
        InstrKind::CallClosure {
            closure: block.into(),
            args: args.iter().copied().map(Operand::from).collect(),
        },
    );
}

#[test]
fn closures_share_locals_they_write() {
    let h = Harness::new();
    let count = h.n("count");
    let mut main = BodyBuilder::new();
    let zero = main.int(0);
    main.store(count, zero);

    let mut body = main.nested();
    let current = body.load(count, Ty::Int);
    let one = body.int(1);
    let next = body.binary(BinaryOp::Add, current, one, Ty::Int);
    body.store(count, next);
    body.ret(Some(next));
    let block = closure(&mut main, Vec::new(), body);

    call_closure(&mut main, block, &[]);
    call_closure(&mut main, block, &[]);
    let total = main.load(count, Ty::Int);
    main.puts(h.n("puts"), total);
    main.ret(None);

    assert_eq!(h.run(&main_only(&h, main)), "2\n");
}

#[test]
fn read_only_captures_are_snapshots() {
    let h = Harness::new();
    let x = h.n("x");
    let mut main = BodyBuilder::new();
    let one = main.int(1);
    main.store(x, one);

    let mut body = main.nested();
    let seen = body.load(x, Ty::Int);
    body.puts(h.n("puts"), seen);
    body.ret(None);
    let block = closure(&mut main, Vec::new(), body);

    let five = main.int(5);
    main.store(x, five);
    call_closure(&mut main, block, &[]);
    main.ret(None);

    assert_eq!(h.run(&main_only(&h, main)), "1\n");
}

#[test]
fn array_each_visits_every_element() {
    let h = Harness::new();
    let (arr, sum, item) = (h.n("arr"), h.n("sum"), h.n("item"));
    let mut main = BodyBuilder::new();
    let elements = [3, 1, 2].map(|v| Operand::from(main.int(v))).to_vec();
    let list = main.emit(Ty::array(Ty::Int), InstrKind::ArrayLit { elements });
    main.store(arr, list);
    let zero = main.int(0);
    main.store(sum, zero);

    let list = main.load(arr, Ty::array(Ty::Int));
    let four = main.int(4);
    main.emit_void(InstrKind::ArrayPush {
        array: list.into(),
        value: four.into(),
    });

    let mut body = main.nested();
    let acc = body.load(sum, Ty::Int);
    let v = body.load(item, Ty::Int);
    let next = body.binary(BinaryOp::Add, acc, v, Ty::Int);
    body.store(sum, next);
    body.ret(None);
    let block = closure(&mut main, vec![Param::new(item, Ty::Int)], body);
    let _ = main.emit(
        Ty::array(Ty::Int),
        InstrKind::ArrayEach {
            array: list.into(),
            block: block.into(),
        },
    );

    let total = main.load(sum, Ty::Int);
    main.puts(h.n("puts"), total);
    let len = main.emit(Ty::Int, InstrKind::ArrayLen { array: list.into() });
    main.puts(h.n("puts"), len);
    main.ret(None);

    assert_eq!(h.run(&main_only(&h, main)), "10\n4\n");
}

#[test]
fn hashes_store_and_find_string_keys() {
    let h = Harness::new();
    let ty = Ty::hash(Ty::Str, Ty::Int);
    let mut main = BodyBuilder::new();
    let (ka, one) = (main.str("a"), main.int(1));
    let table = main.emit(
        ty.clone(),
        InstrKind::HashLit {
            entries: vec![(ka.into(), one.into())],
        },
    );
    for (key, value) in [("b", 2), ("c", 3), ("a", 10)] {
        let (k, v) = (main.str(key), main.int(value));
        main.emit_void(InstrKind::HashSet {
            hash: table.into(),
            key: k.into(),
            value: v.into(),
        });
    }
    let len = main.emit(Ty::Int, InstrKind::HashLen { hash: table.into() });
    main.puts(h.n("puts"), len);
    let ka = main.str("a");
    let a = main.emit(
        Ty::Int,
        InstrKind::HashGet {
            hash: table.into(),
            key: ka.into(),
        },
    );
    main.puts(h.n("puts"), a);
    let kb = main.str("b");
    let _ = main.emit(
        Ty::Int,
        InstrKind::HashDelete {
            hash: table.into(),
            key: kb.into(),
        },
    );
    let kb = main.str("b");
    let has = main.emit(
        Ty::Bool,
        InstrKind::HashHasKey {
            hash: table.into(),
            key: kb.into(),
        },
    );
    main.puts(h.n("puts"), has);
    main.ret(None);

    assert_eq!(h.run(&main_only(&h, main)), "3\n10\nfalse\n");
}

/// `begin; raise <raised>, "boom"; rescue <rescued> => e; puts e; ensure; puts "ensure"; end`
fn rescue_program(h: &Harness, raised: &str, rescued: &str) -> Program {
    let mut main = BodyBuilder::new();

    let mut body = main.nested();
    let message = body.str("boom");
    body.emit_void(InstrKind::Raise {
        class: h.n(raised),
        message: Some(message.into()),
    });
    body.ret(None);
    let body = main.adopt(body);

    let mut handler = main.nested();
    let e = handler.load(h.n("e"), Ty::Exception);
    handler.puts(h.n("puts"), e);
    handler.ret(None);
    let handler = main.adopt(handler);

    let mut ensure = main.nested();
    let text = ensure.str("ensure");
    ensure.puts(h.n("puts"), text);
    ensure.ret(None);
    let ensure = main.adopt(ensure);

    let _ = main.emit(
        Ty::Dynamic,
        InstrKind::Begin(BeginBlock {
            body,
            rescues: vec![RescueClause {
                classes: vec![h.n(rescued)],
                binding: Some(h.n("e")),
                body: handler,
            }],
            else_body: None,
            ensure: Some(ensure),
        }),
    );
    let after = main.str("after");
    main.puts(h.n("puts"), after);
    main.ret(None);
    main_only(h, main)
}

#[test]
fn rescue_then_ensure_then_continue() {
    let h = Harness::new();
    let program = rescue_program(&h, "ArgumentError", "StandardError");
    assert_eq!(h.run(&program), "boom\nensure\nafter\n");
}

#[test]
fn unmatched_rescue_runs_ensure_and_propagates() {
    let h = Harness::new();
    let program = rescue_program(&h, "RuntimeError", "ZeroDivisionError");
    let (machine, _) = h.machine(&program, &CodegenOptions::default());
    let Err(ExecError::Uncaught { class, message }) = machine.run_main() else {
        panic!("expected the RuntimeError to escape main");
    };
    assert_eq!(class, "RuntimeError");
    assert_eq!(message, "boom");
    assert_eq!(machine.take_output(), "ensure\n");
}

fn puts_text(h: &Harness, b: &mut BodyBuilder, text: &str) {
    let v = b.str(text);
    b.puts(h.n("puts"), v);
}

#[test]
fn inner_ensure_runs_before_the_outer_rescue() {
    let h = Harness::new();
    let mut main = BodyBuilder::new();

    let mut outer_body = main.nested();
    {
        let mut inner_body = outer_body.nested();
        let message = inner_body.str("boom");
        inner_body.emit_void(InstrKind::Raise {
            class: h.n("RuntimeError"),
            message: Some(message.into()),
        });
        inner_body.ret(None);
        let inner_body = outer_body.adopt(inner_body);

        let mut miss = outer_body.nested();
        puts_text(&h, &mut miss, "wrong rescue");
        miss.ret(None);
        let miss = outer_body.adopt(miss);

        let mut inner_ensure = outer_body.nested();
        puts_text(&h, &mut inner_ensure, "inner ensure");
        inner_ensure.ret(None);
        let inner_ensure = outer_body.adopt(inner_ensure);

        let _ = outer_body.emit(
            Ty::Dynamic,
            InstrKind::Begin(BeginBlock {
                body: inner_body,
                rescues: vec![RescueClause {
                    classes: vec![h.n("ZeroDivisionError")],
                    binding: None,
                    body: miss,
                }],
                else_body: None,
                ensure: Some(inner_ensure),
            }),
        );
    }
    puts_text(&h, &mut outer_body, "not reached");
    outer_body.ret(None);
    let outer_body = main.adopt(outer_body);

    let mut handler = main.nested();
    let e = handler.load(h.n("e"), Ty::Exception);
    handler.puts(h.n("puts"), e);
    handler.ret(None);
    let handler = main.adopt(handler);

    let mut outer_ensure = main.nested();
    puts_text(&h, &mut outer_ensure, "outer ensure");
    outer_ensure.ret(None);
    let outer_ensure = main.adopt(outer_ensure);

    let _ = main.emit(
        Ty::Dynamic,
        InstrKind::Begin(BeginBlock {
            body: outer_body,
            rescues: vec![RescueClause {
                classes: vec![h.n("RuntimeError")],
                binding: Some(h.n("e")),
                body: handler,
            }],
            else_body: None,
            ensure: Some(outer_ensure),
        }),
    );
    main.ret(None);

    assert_eq!(
        h.run(&main_only(&h, main)),
        "inner ensure\nboom\nouter ensure\n"
    );
}

#[test]
fn keywords_without_a_parameter_are_dropped_with_a_warning() {
    let h = Harness::new();
    let (scale, by, x) = (h.n("scale"), h.n("by"), h.n("x"));

    let mut body = BodyBuilder::new();
    let xv = body.load(x, Ty::Int);
    let product = body.binary(BinaryOp::Add, xv, xv, Ty::Int);
    body.ret(Some(product));

    let mut main = BodyBuilder::new();
    let six = main.int(6);
    let seven = main.int(7);
    let args = CallArgs::positional([Operand::from(six)]).with_keyword(by, seven.into());
    let out = main.emit(Ty::Int, InstrKind::Call { name: scale, args });
    main.puts(h.n("puts"), out);
    main.ret(None);

    let program = Program::new(
        vec![
            Function::new(scale, vec![Param::new(x, Ty::Int)], Ty::Int, body.finish()),
            Function::new(h.n("main"), Vec::new(), Ty::Nil, main.finish()),
        ],
        Vec::new(),
    );
    let (machine, output) = h.machine(&program, &CodegenOptions::default());
    if let Err(err) = machine.run_main() {
        panic!("program failed: {err}");
    }
    assert_eq!(machine.take_output(), "12\n");
    assert!(output
        .diagnostics
        .iter()
        .any(|d| d.code.as_str() == "E5002"));
}

#[test]
fn instrumented_routines_are_counted() {
    let h = Harness::new();
    let n = h.n("n");
    let mut twice = BodyBuilder::new();
    let v = twice.load(n, Ty::Int);
    let doubled = twice.binary(BinaryOp::Add, v, v, Ty::Int);
    twice.ret(Some(doubled));

    let mut main = BodyBuilder::new();
    let one = main.int(1);
    let two = main.call(h.n("twice"), &[one], Ty::Int);
    let four = main.call(h.n("twice"), &[two], Ty::Int);
    main.puts(h.n("puts"), four);
    main.ret(None);

    let program = Program::new(
        vec![
            Function::new(h.n("twice"), vec![Param::new(n, Ty::Int)], Ty::Int, twice.finish()),
            Function::new(h.n("main"), Vec::new(), Ty::Nil, main.finish()),
        ],
        Vec::new(),
    );
    let options = CodegenOptions {
        instrument: true,
        ..CodegenOptions::default()
    };
    let (machine, output) = h.machine(&program, &options);
    if let Err(err) = machine.run_main() {
        panic!("program failed: {err}");
    }
    assert_eq!(machine.take_output(), "4\n");
    assert!(output.probes.iter().any(|(_, name)| name == "twice"));
    let report = machine.profile_report();
    let Some(entry) = report.iter().find(|e| e.name == "twice") else {
        panic!("no profile entry for twice: {report:?}");
    };
    assert_eq!(entry.calls, 2);
}

#[test]
fn nil_checks_on_block_parameters_see_nil() {
    let h = Harness::new();
    let (x, blk) = (h.n("x"), h.n("blk"));
    let mut main = BodyBuilder::new();

    let mut body = main.nested();
    let seen = body.load(x, Ty::Int);
    let check = body.emit(Ty::Bool, InstrKind::IsNil { value: seen.into() });
    body.puts(h.n("puts"), check);
    body.ret(None);
    let block = closure(&mut main, vec![Param::new(x, Ty::Int)], body);
    main.store(blk, block);

    let block = main.load(blk, Ty::Proc);
    let nil = main.nil();
    call_closure(&mut main, block, &[nil]);
    let five = main.int(5);
    call_closure(&mut main, block, &[five]);
    main.ret(None);

    assert_eq!(h.run(&main_only(&h, main)), "true\nfalse\n");
}

/// `begin; <body>; rescue <class> => e; <handler>; end`
fn begin_rescue(h: &Harness, b: &mut BodyBuilder, body: BodyBuilder, class: &str, handler: BodyBuilder) {
    let body = b.adopt(body);
    let handler = b.adopt(handler);
    let _ = b.emit(
        Ty::Dynamic,
        InstrKind::Begin(BeginBlock {
            body,
            rescues: vec![RescueClause {
                classes: vec![h.n(class)],
                binding: Some(h.n("e")),
                body: handler,
            }],
            else_body: None,
            ensure: None,
        }),
    );
}

fn concurrency(b: &mut BodyBuilder, ty: Ty, op: ConcurrencyOp) -> rill_ir::BindingId {
    b.emit(ty, InstrKind::Concurrency(op))
}

#[test]
fn synchronize_releases_the_mutex_when_its_body_raises() {
    let h = Harness::new();
    let (lock, t) = (h.n("lock"), h.n("t"));
    let mut main = BodyBuilder::new();
    let mutex = concurrency(&mut main, Ty::Mutex, ConcurrencyOp::MutexNew);
    main.store(lock, mutex);

    // Thread.new { lock.synchronize { puts "locked"; raise "boom" } }
    let mut body = main.nested();
    let mutex = body.load(lock, Ty::Mutex);
    let mut critical = body.nested();
    puts_text(&h, &mut critical, "locked");
    let message = critical.str("boom");
    critical.emit_void(InstrKind::Raise {
        class: h.n("RuntimeError"),
        message: Some(message.into()),
    });
    critical.ret(None);
    let critical = body.adopt(critical);
    let _ = body.emit(
        Ty::Dynamic,
        InstrKind::Synchronize {
            mutex: mutex.into(),
            body: critical,
        },
    );
    body.ret(None);
    let block = closure(&mut main, Vec::new(), body);
    let thread = concurrency(&mut main, Ty::Thread, ConcurrencyOp::ThreadNew { block: block.into() });
    main.store(t, thread);

    // join re-raises the thread's exception
    let mut join = main.nested();
    let thread = join.load(t, Ty::Thread);
    let _ = concurrency(&mut join, Ty::Thread, ConcurrencyOp::ThreadJoin { thread: thread.into() });
    join.ret(None);
    let mut handler = main.nested();
    let e = handler.load(h.n("e"), Ty::Exception);
    handler.puts(h.n("puts"), e);
    handler.ret(None);
    begin_rescue(&h, &mut main, join, "RuntimeError", handler);

    // unlocking a released mutex raises ThreadError
    let mut unlock = main.nested();
    let mutex = unlock.load(lock, Ty::Mutex);
    let _ = concurrency(&mut unlock, Ty::Mutex, ConcurrencyOp::MutexUnlock { mutex: mutex.into() });
    puts_text(&h, &mut unlock, "still locked");
    unlock.ret(None);
    let mut released = main.nested();
    puts_text(&h, &mut released, "released");
    released.ret(None);
    begin_rescue(&h, &mut main, unlock, "ThreadError", released);
    main.ret(None);

    assert_eq!(h.run(&main_only(&h, main)), "locked\nboom\nreleased\n");
}

#[test]
fn threads_update_a_shared_counter_under_a_mutex() {
    let h = Harness::new();
    let (lock, count, first, second) = (h.n("lock"), h.n("count"), h.n("first"), h.n("second"));
    let mut main = BodyBuilder::new();
    let mutex = concurrency(&mut main, Ty::Mutex, ConcurrencyOp::MutexNew);
    main.store(lock, mutex);
    let zero = main.int(0);
    main.store(count, zero);

    for slot in [first, second] {
        let mut body = main.nested();
        let mutex = body.load(lock, Ty::Mutex);
        let mut critical = body.nested();
        let current = critical.load(count, Ty::Int);
        let one = critical.int(1);
        let next = critical.binary(BinaryOp::Add, current, one, Ty::Int);
        critical.store(count, next);
        critical.ret(None);
        let critical = body.adopt(critical);
        let _ = body.emit(
            Ty::Dynamic,
            InstrKind::Synchronize {
                mutex: mutex.into(),
                body: critical,
            },
        );
        body.ret(None);
        let block = closure(&mut main, Vec::new(), body);
        let thread = concurrency(&mut main, Ty::Thread, ConcurrencyOp::ThreadNew { block: block.into() });
        main.store(slot, thread);
    }
    for slot in [first, second] {
        let thread = main.load(slot, Ty::Thread);
        let _ = concurrency(&mut main, Ty::Thread, ConcurrencyOp::ThreadJoin { thread: thread.into() });
    }
    let total = main.load(count, Ty::Int);
    main.puts(h.n("puts"), total);
    main.ret(None);

    assert_eq!(h.run(&main_only(&h, main)), "2\n");
}

#[test]
fn fiber_bodies_see_writes_made_between_resumes() {
    let h = Harness::new();
    let (x, f) = (h.n("x"), h.n("f"));
    let mut main = BodyBuilder::new();
    let one = main.int(1);
    main.store(x, one);

    // Fiber.new { puts x; Fiber.yield; puts x }
    let mut body = main.nested();
    let seen = body.load(x, Ty::Int);
    body.puts(h.n("puts"), seen);
    let _ = concurrency(&mut body, Ty::Dynamic, ConcurrencyOp::FiberYield { value: None });
    let seen = body.load(x, Ty::Int);
    body.puts(h.n("puts"), seen);
    body.ret(None);
    let block = closure(&mut main, Vec::new(), body);
    let fiber = concurrency(&mut main, Ty::Fiber, ConcurrencyOp::FiberNew { block: block.into() });
    main.store(f, fiber);

    let fiber = main.load(f, Ty::Fiber);
    let _ = concurrency(&mut main, Ty::Dynamic, ConcurrencyOp::FiberResume { fiber: fiber.into(), value: None });
    let two = main.int(2);
    main.store(x, two);
    let fiber = main.load(f, Ty::Fiber);
    let _ = concurrency(&mut main, Ty::Dynamic, ConcurrencyOp::FiberResume { fiber: fiber.into(), value: None });
    main.ret(None);

    assert_eq!(h.run(&main_only(&h, main)), "1\n2\n");
}

#[test]
fn fibers_pass_values_through_resume_and_yield() {
    let h = Harness::new();
    let (v, f) = (h.n("v"), h.n("f"));
    let mut main = BodyBuilder::new();

    // Fiber.new { |v| puts v; puts Fiber.yield(v * 10); 99 }
    let mut body = main.nested();
    let first = body.load(v, Ty::Int);
    body.puts(h.n("puts"), first);
    let ten = body.int(10);
    let scaled = body.binary(BinaryOp::Mul, first, ten, Ty::Int);
    let resumed = concurrency(
        &mut body,
        Ty::Dynamic,
        ConcurrencyOp::FiberYield {
            value: Some(scaled.into()),
        },
    );
    body.puts(h.n("puts"), resumed);
    let done = body.int(99);
    body.ret(Some(done));
    let block = closure(&mut main, vec![Param::new(v, Ty::Int)], body);
    let fiber = concurrency(&mut main, Ty::Fiber, ConcurrencyOp::FiberNew { block: block.into() });
    main.store(f, fiber);

    for arg in [1, 2] {
        let fiber = main.load(f, Ty::Fiber);
        let value = main.int(arg);
        let got = concurrency(
            &mut main,
            Ty::Dynamic,
            ConcurrencyOp::FiberResume {
                fiber: fiber.into(),
                value: Some(value.into()),
            },
        );
        main.puts(h.n("puts"), got);
    }
    let fiber = main.load(f, Ty::Fiber);
    let alive = concurrency(&mut main, Ty::Bool, ConcurrencyOp::FiberAlive { fiber: fiber.into() });
    main.puts(h.n("puts"), alive);
    main.ret(None);

    assert_eq!(h.run(&main_only(&h, main)), "1\n10\n2\n99\nfalse\n");
}

#[test]
fn a_producer_thread_feeds_a_bounded_queue() {
    let h = Harness::new();
    let (q, t) = (h.n("q"), h.n("t"));
    let mut main = BodyBuilder::new();
    let two = main.int(2);
    let queue = concurrency(&mut main, Ty::SizedQueue, ConcurrencyOp::QueueNew { capacity: two.into() });
    main.store(q, queue);

    // the third push blocks until the consumer pops
    let mut body = main.nested();
    for item in [1, 2, 3] {
        let queue = body.load(q, Ty::SizedQueue);
        let value = body.int(item);
        let _ = concurrency(
            &mut body,
            Ty::SizedQueue,
            ConcurrencyOp::QueuePush {
                queue: queue.into(),
                value: value.into(),
            },
        );
    }
    body.ret(None);
    let block = closure(&mut main, Vec::new(), body);
    let thread = concurrency(&mut main, Ty::Thread, ConcurrencyOp::ThreadNew { block: block.into() });
    main.store(t, thread);

    for _ in 0..3 {
        let queue = main.load(q, Ty::SizedQueue);
        let item = concurrency(&mut main, Ty::Dynamic, ConcurrencyOp::QueuePop { queue: queue.into() });
        main.puts(h.n("puts"), item);
    }
    let thread = main.load(t, Ty::Thread);
    let _ = concurrency(&mut main, Ty::Thread, ConcurrencyOp::ThreadJoin { thread: thread.into() });
    main.ret(None);

    assert_eq!(h.run(&main_only(&h, main)), "1\n2\n3\n");
}

/// A `main` that fills an `{Int => Int}` table with `keys` entries and
/// returns it.
fn filled_table(h: &Harness, keys: i64) -> Program {
    let ty = Ty::hash(Ty::Int, Ty::Int);
    let mut main = BodyBuilder::new();
    let table = main.emit(ty.clone(), InstrKind::HashLit { entries: Vec::new() });
    for k in 0..keys {
        let (key, value) = (main.int(k), main.int(k * 10));
        main.emit_void(InstrKind::HashSet {
            hash: table.into(),
            key: key.into(),
            value: value.into(),
        });
    }
    main.ret(Some(table));
    Program::new(vec![Function::new(h.n("main"), Vec::new(), ty, main.finish())], Vec::new())
}

fn table_field(h: &Harness, keys: i64, field: u32) -> i64 {
    let (machine, _) = h.machine(&filled_table(h, keys), &CodegenOptions::default());
    let table = match machine.run_main() {
        Ok(table) => table,
        Err(err) => panic!("program failed: {err}"),
    };
    let Ok(word) = machine.load_field(table, field) else {
        panic!("table {table:?} has no field {field}");
    };
    let Some(value) = word.coerce(NativeType::I64).as_int() else {
        panic!("field {field} holds {word:?}");
    };
    value
}

#[test]
fn generated_tables_double_past_three_quarters_load() {
    let h = Harness::new();
    // 6 of 8 slots is exactly three quarters
    assert_eq!(table_field(&h, 6, abi::hash::CAP), 8);
    assert_eq!(table_field(&h, 6, abi::hash::SIZE), 6);
    assert_eq!(table_field(&h, 7, abi::hash::CAP), 16);
    assert_eq!(table_field(&h, 7, abi::hash::SIZE), 7);
}
