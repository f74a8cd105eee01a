use pretty_assertions::assert_eq;
use rill_diagnostic::ErrorCode;
use rill_ir::{Body, ClassType, Function, Program, StringInterner, Ty};

use super::*;

fn method(owner: Name, name: Name) -> Function {
    Function::method(owner, name, Vec::new(), Ty::Nil, Body::default())
}

fn build(program: &Program, interner: &StringInterner) -> (ClassRegistry, Findings) {
    let mut findings = Findings::new();
    let Ok(registry) = ClassRegistry::build(program, interner, &mut findings) else {
        panic!("registry should build");
    };
    (registry, findings)
}

#[test]
fn subclasses_declared_first_are_registered_after_parents() {
    let interner = StringInterner::new();
    let n = |s: &str| interner.intern(s);
    let program = Program::new(
        Vec::new(),
        vec![
            ClassType::new(n("C"), Some(n("B"))),
            ClassType::new(n("B"), Some(n("A"))),
            ClassType::new(n("A"), None),
        ],
    );
    let (registry, _) = build(&program, &interner);
    let order: Vec<&str> = registry.iter().map(|c| interner.lookup(c.name)).collect();
    assert_eq!(order, vec!["A", "B", "C"]);
    let chain: Vec<&str> = registry
        .ancestors(n("C"))
        .map(|c| interner.lookup(c.name))
        .collect();
    assert_eq!(chain, vec!["C", "B", "A"]);
    assert!(registry.is_subclass(n("C"), n("A")));
    assert!(!registry.is_subclass(n("A"), n("C")));
}

#[test]
fn inherited_fields_come_first() {
    let interner = StringInterner::new();
    let n = |s: &str| interner.intern(s);
    let program = Program::new(
        Vec::new(),
        vec![
            ClassType::new(n("Point"), None)
                .with_field(n("x"), Ty::Float)
                .with_field(n("y"), Ty::Float),
            ClassType::new(n("Point3"), Some(n("Point"))).with_field(n("z"), Ty::Int),
        ],
    );
    let (registry, _) = build(&program, &interner);
    let Some(z) = registry.field(n("Point3"), n("z")) else {
        panic!("z should be laid out");
    };
    assert_eq!(z.index, 4);
    assert_eq!(z.repr, Repr::Int);
    let Some(x) = registry.field(n("Point3"), n("x")) else {
        panic!("x should be inherited");
    };
    assert_eq!((x.index, x.owner), (2, n("Point")));
    assert_eq!(registry.get(n("Point3")).map(ClassInfo::instance_words), Some(5));
}

#[test]
fn duplicate_field_reuses_the_slot_with_a_warning() {
    let interner = StringInterner::new();
    let n = |s: &str| interner.intern(s);
    let program = Program::new(
        Vec::new(),
        vec![
            ClassType::new(n("A"), None).with_field(n("v"), Ty::Int),
            ClassType::new(n("B"), Some(n("A"))).with_field(n("v"), Ty::Int),
        ],
    );
    let (registry, findings) = build(&program, &interner);
    assert_eq!(registry.get(n("B")).map(|c| c.fields.len()), Some(1));
    let codes: Vec<ErrorCode> = findings.diagnostics.iter().map(|d| d.code).collect();
    assert_eq!(codes, vec![ErrorCode::E6002]);
}

#[test]
fn overrides_are_detected_below_the_defining_class() {
    let interner = StringInterner::new();
    let n = |s: &str| interner.intern(s);
    let (a, b, c, m, only_a) = (n("A"), n("B"), n("C"), n("m"), n("only_a"));
    let program = Program::new(
        vec![method(a, m), method(a, only_a), method(b, m), method(c, m)],
        vec![
            ClassType::new(a, None).with_method(m).with_method(only_a),
            ClassType::new(b, Some(a)).with_method(m),
            ClassType::new(c, Some(a)).with_method(m),
        ],
    );
    let (registry, _) = build(&program, &interner);
    assert!(registry.is_overridden_below(a, m));
    assert!(!registry.is_overridden_below(a, only_a));
    assert!(!registry.is_overridden_below(b, m));
    assert_eq!(registry.find_method(b, only_a), Some(a));
    assert_eq!(registry.find_method(b, m), Some(b));
    assert_eq!(registry.descendants(a), vec![b, c]);
}

#[test]
fn exception_families_resolve_their_builtin_base() {
    let interner = StringInterner::new();
    let n = |s: &str| interner.intern(s);
    let program = Program::new(
        Vec::new(),
        vec![
            ClassType::new(n("AppError"), Some(n("RuntimeError"))),
            ClassType::new(n("DbError"), Some(n("AppError"))),
            ClassType::new(n("Plain"), Some(n("Object"))),
        ],
    );
    let (registry, _) = build(&program, &interner);
    assert_eq!(registry.exception_base(n("DbError")), Some("RuntimeError"));
    assert!(!registry.is_exception(n("Plain")));
    assert_eq!(registry.get(n("Plain")).and_then(|c| c.superclass), None);
}

#[test]
fn broken_hierarchies_are_fatal() {
    let interner = StringInterner::new();
    let n = |s: &str| interner.intern(s);

    let unknown = Program::new(Vec::new(), vec![ClassType::new(n("A"), Some(n("Missing")))]);
    let err = ClassRegistry::build(&unknown, &interner, &mut Findings::new()).err();
    assert_eq!(
        err,
        Some(CodegenError::UnknownSuperclass {
            class: "A".to_owned(),
            superclass: "Missing".to_owned(),
        })
    );

    let cycle = Program::new(
        Vec::new(),
        vec![
            ClassType::new(n("A"), Some(n("B"))),
            ClassType::new(n("B"), Some(n("A"))),
        ],
    );
    let err = ClassRegistry::build(&cycle, &interner, &mut Findings::new()).err();
    assert!(matches!(err, Some(CodegenError::InheritanceCycle { .. })));

    let orphan = Program::new(vec![method(n("Ghost"), n("m"))], Vec::new());
    let err = ClassRegistry::build(&orphan, &interner, &mut Findings::new()).err();
    assert_eq!(
        err,
        Some(CodegenError::MethodForUnknownClass {
            class: "Ghost".to_owned(),
            method: "m".to_owned(),
        })
    );
}
