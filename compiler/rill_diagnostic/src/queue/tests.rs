use pretty_assertions::assert_eq;

use super::*;
use crate::{dynamic_dispatch, ErrorCode};

fn site(class: &str, method: &str, line: u32) -> DynamicSite {
    DynamicSite {
        class: class.to_owned(),
        method: method.to_owned(),
        location: Location::new("main", Some(line)),
    }
}

#[test]
fn queue_drops_exact_duplicates() {
    let mut queue = DiagnosticQueue::new();
    let diag = dynamic_dispatch("<untyped>", "size", Location::new("f", Some(3)));
    assert!(queue.push(diag.clone()));
    assert!(!queue.push(diag));
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.count(Severity::Note), 1);
    assert!(!queue.has_errors());
}

#[test]
fn sorted_puts_errors_first() {
    let mut queue = DiagnosticQueue::new();
    let _ = queue.push(Diagnostic::note(ErrorCode::E5001).with_message("n"));
    let _ = queue.push(Diagnostic::error(ErrorCode::E9001).with_message("e"));
    let _ = queue.push(Diagnostic::warning(ErrorCode::E6001).with_message("w"));
    let order: Vec<Severity> = queue.sorted().iter().map(|d| d.severity).collect();
    assert_eq!(order, vec![Severity::Error, Severity::Warning, Severity::Note]);
}

#[test]
fn report_groups_by_class_and_method() {
    let mut report = DispatchReport::new();
    assert!(report.record(site("<untyped>", "area", 4)));
    assert!(report.record(site("<untyped>", "area", 9)));
    assert!(report.record(site("Shape | nil", "name", 2)));
    assert!(!report.record(site("<untyped>", "area", 4)));

    let summary = report.summary();
    assert_eq!(
        summary,
        "3 call site(s) use dynamic dispatch:\n  <untyped>#area (2 site(s))\n    at main:4\n    at main:9\n  Shape | nil#name (1 site(s))\n    at main:2\n"
    );
}

#[test]
fn empty_report_summary() {
    assert_eq!(
        DispatchReport::new().summary(),
        "all call sites dispatched statically\n"
    );
}
