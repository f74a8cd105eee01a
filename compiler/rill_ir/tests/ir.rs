use pretty_assertions::assert_eq;
use rill_ir::walk::{free_bindings, stored_names, Descend};
use rill_ir::{
    load_program, save_program, BinaryOp, BodyBuilder, ClosureLiteral, Function, InstrKind,
    IrError, Param, Program, StringInterner, Ty,
};

fn counter_program(interner: &StringInterner) -> Program {
    let counter = interner.intern("counter");
    let main = interner.intern("main");

    let mut b = BodyBuilder::new();
    let zero = b.int(0);
    b.store(counter, zero);

    let mut inner = b.nested();
    let current = inner.load(counter, Ty::Int);
    let one = inner.int(1);
    let next = inner.binary(BinaryOp::Add, current, one, Ty::Int);
    inner.store(counter, next);
    inner.ret(Some(next));
    let closure_body = b.adopt(inner);

    let closure = b.emit(
        Ty::Proc,
        InstrKind::Closure(ClosureLiteral {
            params: Vec::new(),
            body: closure_body,
        }),
    );
    let result = b.load(counter, Ty::Int);
    let _ = closure;
    b.ret(Some(result));
    Program::new(vec![Function::new(main, Vec::new(), Ty::Int, b.finish())], Vec::new())
}

#[test]
fn nested_builders_share_binding_space() {
    let interner = StringInterner::new();
    let program = counter_program(&interner);
    let body = &program.functions[0].body;
    let mut ids: Vec<u32> = Vec::new();
    rill_ir::walk::walk_body(body, Descend::RegionsAndClosures, &mut |instr, _| {
        ids.extend(instr.result.map(|r| r.raw()));
    });
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(ids.len(), sorted.len());
}

#[test]
fn stored_names_respect_closure_descent() {
    let interner = StringInterner::new();
    let program = counter_program(&interner);
    let body = &program.functions[0].body;
    let counter = interner.intern("counter");
    assert!(stored_names(body, Descend::Regions).contains(&counter));
    assert!(stored_names(body, Descend::RegionsAndClosures).contains(&counter));
}

#[test]
fn free_bindings_of_closure_body() {
    let mut b = BodyBuilder::new();
    let outer = b.int(7);
    let mut inner = b.nested();
    let one = inner.int(1);
    let sum = inner.binary(BinaryOp::Add, outer, one, Ty::Int);
    inner.ret(Some(sum));
    let body = b.adopt(inner);
    assert_eq!(free_bindings(&body), vec![outer]);
}

#[test]
fn document_round_trip_preserves_names() {
    let interner = StringInterner::new();
    let program = counter_program(&interner);
    let json = match save_program(&program, &interner) {
        Ok(json) => json,
        Err(err) => panic!("save failed: {err}"),
    };
    let (loaded, rebuilt) = match load_program(&json) {
        Ok(pair) => pair,
        Err(err) => panic!("load failed: {err}"),
    };
    assert_eq!(loaded, program);
    assert_eq!(rebuilt.lookup(loaded.functions[0].name), "main");
}

#[test]
fn dangling_name_is_reported() {
    let json = r#"{
        "symbols": [""],
        "functions": [{
            "name": 5,
            "params": [],
            "return_ty": "Nil",
            "body": { "blocks": [] }
        }]
    }"#;
    assert!(matches!(
        load_program(json),
        Err(IrError::DanglingName { id: 5, len: 1 })
    ));
}

#[test]
fn params_keep_their_kind() {
    let interner = StringInterner::new();
    let rest = Param::rest(interner.intern("rest"));
    let block = Param::block(interner.intern("blk"));
    let f = Function::new(
        interner.intern("f"),
        vec![Param::new(interner.intern("a"), Ty::Int), rest, block],
        Ty::Nil,
        BodyBuilder::new().finish(),
    );
    assert_eq!(f.required_arity(), 1);
    assert_eq!(f.block_param().map(|p| p.name), Some(interner.intern("blk")));
}
