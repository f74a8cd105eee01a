use pretty_assertions::assert_eq;
use rill_ir::{
    BeginBlock, BinaryOp, BodyBuilder, ClassType, ClosureLiteral, Function, InstrKind, Param,
    Program, RescueClause, StringInterner, Ty,
};

use super::document::{Access, Constant, Insn, ManagedDocument, MethodDef};
use super::lower_program;
use crate::context::{CodegenCx, Findings};
use crate::options::CodegenOptions;

fn lower(program: &Program, interner: &StringInterner) -> (ManagedDocument, Findings) {
    let options = CodegenOptions::both();
    let mut findings = Findings::new();
    let Ok(cx) = CodegenCx::new(program, interner, &options, &mut findings) else {
        panic!("context should build");
    };
    let document = match lower_program(&cx, &mut findings) {
        Ok(document) => document,
        Err(e) => panic!("managed lowering failed: {e}"),
    };
    (document, findings)
}

fn method<'d>(document: &'d ManagedDocument, class: &str, name: &str) -> &'d MethodDef {
    let Some(class_def) = document.class(class) else {
        panic!("class {class} missing");
    };
    let Some(method) = class_def.method_named(name) else {
        panic!("method {class}.{name} missing");
    };
    method
}

#[test]
fn typed_routines_use_primitive_descriptors() {
    let interner = StringInterner::new();
    let n = |s: &str| interner.intern(s);
    let (a, b) = (n("a"), n("b"));

    let mut add = BodyBuilder::new();
    let x = add.load(a, Ty::Int);
    let y = add.load(b, Ty::Int);
    let sum = add.binary(BinaryOp::Add, x, y, Ty::Int);
    add.ret(Some(sum));

    let mut main = BodyBuilder::new();
    let one = main.int(1);
    let two = main.int(2);
    let three = main.call(n("add"), &[one, two], Ty::Int);
    main.puts(n("puts"), three);
    main.ret(None);

    let program = Program::new(
        vec![
            Function::new(
                n("add"),
                vec![Param::new(a, Ty::Int), Param::new(b, Ty::Int)],
                Ty::Int,
                add.finish(),
            ),
            Function::new(n("main"), Vec::new(), Ty::Nil, main.finish()),
        ],
        Vec::new(),
    );
    let (document, _) = lower(&program, &interner);

    let add = method(&document, "RillMain", "add");
    assert_eq!(add.descriptor, "(JJ)J");
    assert_eq!(add.count("ladd"), 1);
    assert_eq!(add.count("lreturn"), 1);
    assert_eq!(add.access, vec![Access::Public, Access::Static]);

    let main = method(&document, "RillMain", "main");
    assert!(main.instructions.iter().any(|insn| matches!(
        insn,
        Insn::Invokestatic { owner, name, descriptor, .. }
            if owner == "RillMain" && name == "add" && descriptor == "(JJ)J"
    )));
    assert!(main.instructions.iter().any(|insn| matches!(
        insn,
        Insn::Invokestatic { owner, name, .. } if owner == "rill/rt/Kernel" && name == "puts"
    )));

    let Some(main_class) = document.class("RillMain") else {
        panic!("main class missing");
    };
    assert!(main_class
        .method("main", "([Ljava/lang/String;)V")
        .is_some());
    assert!(main_class.method("<init>", "()V").is_some());
}

#[test]
fn overridden_methods_call_the_boxed_bridge() {
    let interner = StringInterner::new();
    let n = |s: &str| interner.intern(s);
    let (a, b, speak, pet) = (n("A"), n("B"), n("speak"), n("pet"));

    let speak_body = |text: &str| {
        let mut body = BodyBuilder::new();
        let s = body.str(text);
        body.ret(Some(s));
        body.finish()
    };
    let mut talk = BodyBuilder::new();
    let recv = talk.load(pet, Ty::Class(a));
    let said = talk.method_call(recv, speak, &[], Ty::Str);
    talk.ret(Some(said));

    let program = Program::new(
        vec![
            Function::method(a, speak, Vec::new(), Ty::Str, speak_body("...")),
            Function::method(b, speak, Vec::new(), Ty::Str, speak_body("woof")),
            Function::new(n("talk"), vec![Param::new(pet, Ty::Class(a))], Ty::Str, talk.finish()),
        ],
        vec![
            ClassType::new(a, None).with_method(speak),
            ClassType::new(b, Some(a)).with_method(speak),
        ],
    );
    let (document, findings) = lower(&program, &interner);

    let talk = method(&document, "RillMain", "talk");
    assert_eq!(talk.descriptor, "(LA;)Ljava/lang/Object;");
    assert!(talk.instructions.iter().any(|insn| matches!(
        insn,
        Insn::Invokevirtual { owner, name, descriptor }
            if owner == "A" && name == "speak$boxed" && descriptor == "()Ljava/lang/Object;"
    )));
    for class in ["A", "B"] {
        assert_eq!(method(&document, class, "speak$boxed").count("invokevirtual"), 1);
    }
    let Some(b_class) = document.class("B") else {
        panic!("class B missing");
    };
    assert_eq!(b_class.super_name, "A");
    assert!(findings.report.is_empty());
}

#[test]
fn untyped_receivers_dispatch_through_invokedynamic() {
    let interner = StringInterner::new();
    let n = |s: &str| interner.intern(s);
    let thing = n("thing");

    let mut body = BodyBuilder::new();
    let recv = body.load(thing, Ty::Dynamic);
    let arg = body.int(3);
    let out = body.method_call(recv, n("frob"), &[arg], Ty::Dynamic);
    body.ret(Some(out));

    let program = Program::new(
        vec![Function::new(
            n("poke"),
            vec![Param::new(thing, Ty::Dynamic)],
            Ty::Dynamic,
            body.finish(),
        )],
        Vec::new(),
    );
    let (document, findings) = lower(&program, &interner);

    let poke = method(&document, "RillMain", "poke");
    let Some(Insn::Invokedynamic {
        name,
        descriptor,
        bootstrap_owner,
        ..
    }) = poke
        .instructions
        .iter()
        .find(|insn| matches!(insn, Insn::Invokedynamic { .. }))
    else {
        panic!("expected an invokedynamic site");
    };
    assert_eq!(name, "frob");
    assert_eq!(
        descriptor,
        "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;"
    );
    assert_eq!(bootstrap_owner, "rill/rt/Dispatch");
    assert_eq!(findings.report.sites().len(), 1);
}

#[test]
fn exception_rows_list_inner_regions_then_the_catch_all() {
    let interner = StringInterner::new();
    let n = |s: &str| interner.intern(s);
    let mut b = BodyBuilder::new();

    let mut raising = b.nested();
    raising.emit_void(InstrKind::Raise {
        class: n("ZeroDivisionError"),
        message: None,
    });
    raising.ret(None);
    let raising = b.adopt(raising);

    let mut recover = b.nested();
    let one = recover.int(1);
    recover.ret(Some(one));
    let recover = b.adopt(recover);

    let mut outer = b.nested();
    let inner = outer.emit(
        Ty::Dynamic,
        InstrKind::Begin(BeginBlock {
            body: raising,
            rescues: vec![RescueClause {
                classes: vec![n("ZeroDivisionError")],
                binding: None,
                body: recover,
            }],
            else_body: None,
            ensure: None,
        }),
    );
    outer.ret(Some(inner));
    let outer = b.adopt(outer);

    let mut handler = b.nested();
    let two = handler.int(2);
    handler.ret(Some(two));
    let handler = b.adopt(handler);

    let mut ensure = b.nested();
    let note = ensure.str("cleanup");
    ensure.puts(n("puts"), note);
    ensure.ret(None);
    let ensure = b.adopt(ensure);

    let result = b.emit(
        Ty::Dynamic,
        InstrKind::Begin(BeginBlock {
            body: outer,
            rescues: vec![RescueClause {
                classes: vec![n("ArgumentError")],
                binding: Some(n("e")),
                body: handler,
            }],
            else_body: None,
            ensure: Some(ensure),
        }),
    );
    b.ret(Some(result));

    let program = Program::new(
        vec![Function::new(n("main"), Vec::new(), Ty::Dynamic, b.finish())],
        Vec::new(),
    );
    let (document, _) = lower(&program, &interner);

    let main = method(&document, "RillMain", "main");
    let classes: Vec<Option<&str>> = main
        .exception_table
        .iter()
        .map(|row| row.class.as_deref())
        .collect();
    assert_eq!(
        classes,
        vec![
            Some("rill/rt/exc/ZeroDivisionError"),
            Some("rill/rt/exc/ArgumentError"),
            None
        ]
    );
    // The ensure body runs on the normal path and on the rethrow path.
    let cleanups = main
        .instructions
        .iter()
        .filter(|insn| {
            matches!(insn, Insn::Ldc { value: Constant::Str(s) } if s == "cleanup")
        })
        .count();
    assert_eq!(cleanups, 2);
    assert!(main.count("athrow") >= 2);
}

#[test]
fn closures_become_synthetic_methods_and_share_written_locals() {
    let interner = StringInterner::new();
    let n = |s: &str| interner.intern(s);
    let count = n("count");
    let mut b = BodyBuilder::new();

    let zero = b.int(0);
    b.store(count, zero);

    let mut body = b.nested();
    let current = body.load(count, Ty::Int);
    let one = body.int(1);
    let next = body.binary(BinaryOp::Add, current, one, Ty::Int);
    body.store(count, next);
    body.ret(Some(next));
    let body = b.adopt(body);

    let block = b.emit(
        Ty::Proc,
        InstrKind::Closure(ClosureLiteral {
            params: Vec::new(),
            body,
        }),
    );
    let _ = b.emit(
        Ty::Dynamic,
        InstrKind::CallClosure {
            closure: block.into(),
            args: Vec::new(),
        },
    );
    let total = b.load(count, Ty::Dynamic);
    b.ret(Some(total));

    let program = Program::new(
        vec![Function::new(n("main"), Vec::new(), Ty::Dynamic, b.finish())],
        Vec::new(),
    );
    let (document, _) = lower(&program, &interner);

    let Some(main_class) = document.class("RillMain") else {
        panic!("main class missing");
    };
    assert!(main_class.has_field("shared$main$count"));

    let typed = method(&document, "RillMain", "main$block0");
    assert_eq!(typed.descriptor, "()Ljava/lang/Object;");
    assert!(typed.access.contains(&Access::Synthetic));
    assert!(typed.count("putstatic") >= 1);

    let generic = method(&document, "RillMain", "main$block0$generic");
    assert_eq!(generic.descriptor, "([Ljava/lang/Object;)Ljava/lang/Object;");

    let main = method(&document, "RillMain", "main");
    let Some(Insn::Invokedynamic {
        name,
        bootstrap_owner,
        bootstrap_args,
        ..
    }) = main
        .instructions
        .iter()
        .find(|insn| matches!(insn, Insn::Invokedynamic { .. }))
    else {
        panic!("closure creation should be an invokedynamic site");
    };
    assert_eq!(name, "call");
    assert_eq!(bootstrap_owner, "java/lang/invoke/LambdaMetafactory");
    assert_eq!(bootstrap_args.len(), 3);
    assert!(main.instructions.iter().any(|insn| matches!(
        insn,
        Insn::Invokestatic { name, .. } if name == "callBlock"
    )));
}

#[test]
fn exception_subclasses_get_a_message_constructor() {
    let interner = StringInterner::new();
    let n = |s: &str| interner.intern(s);
    let oops = n("Oops");
    let mut b = BodyBuilder::new();
    let message = b.str("bad");
    b.emit_void(InstrKind::Raise {
        class: oops,
        message: Some(message.into()),
    });
    b.ret(None);
    let program = Program::new(
        vec![Function::new(n("main"), Vec::new(), Ty::Nil, b.finish())],
        vec![ClassType::new(oops, Some(n("StandardError")))],
    );
    let (document, _) = lower(&program, &interner);

    let Some(class) = document.class("Oops") else {
        panic!("class Oops missing");
    };
    assert_eq!(class.super_name, "rill/rt/exc/StandardError");
    assert!(class.method("<init>", "(Ljava/lang/Object;)V").is_some());
    let main = method(&document, "RillMain", "main");
    assert!(main.instructions.iter().any(|insn| matches!(
        insn,
        Insn::New { class } if class == "Oops"
    )));
}

#[test]
fn nil_checked_block_parameters_take_objects() {
    let interner = StringInterner::new();
    let n = |s: &str| interner.intern(s);
    let x = n("x");
    let mut b = BodyBuilder::new();

    let mut body = b.nested();
    let loaded = body.load(x, Ty::Int);
    let check = body.emit(Ty::Bool, InstrKind::IsNil { value: loaded.into() });
    body.puts(n("puts"), check);
    body.ret(None);
    let body = b.adopt(body);
    let _ = b.emit(
        Ty::Proc,
        InstrKind::Closure(ClosureLiteral {
            params: vec![Param::new(x, Ty::Int)],
            body,
        }),
    );
    b.ret(None);

    let program = Program::new(
        vec![Function::new(n("main"), Vec::new(), Ty::Nil, b.finish())],
        Vec::new(),
    );
    let (document, _) = lower(&program, &interner);
    let typed = method(&document, "RillMain", "main$block0");
    assert_eq!(typed.descriptor, "(Ljava/lang/Object;)Ljava/lang/Object;");
}
