//! Rescue class resolution shared by both adapters.

use rill_diagnostic::{Diagnostic, ErrorCode, Location};
use rill_ir::{Name, RescueClause};
use rill_native::abi::{is_builtin_exception, DEFAULT_RESCUE};

use crate::context::{CodegenCx, Findings};

/// Managed package of the builtin exception classes.
pub const MANAGED_EXCEPTION_PACKAGE: &str = "rill/rt/exc";

/// One class a rescue clause catches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RescueTarget {
    /// Runtime class name matched by native handlers.
    pub name: String,
    /// Internal name of the managed class caught.
    pub managed: String,
}

impl RescueTarget {
    fn builtin(name: &str) -> Self {
        RescueTarget {
            name: name.to_owned(),
            managed: managed_builtin(name),
        }
    }
}

/// Internal managed name of builtin exception class `name`.
pub fn managed_builtin(name: &str) -> String {
    format!("{MANAGED_EXCEPTION_PACKAGE}/{name}")
}

/// Managed class thrown for a raise of class `class`.
pub fn managed_exception_class(cx: &CodegenCx<'_>, class: Name) -> String {
    let text = cx.name(class);
    if cx.classes.contains(class) {
        text.to_owned()
    } else if is_builtin_exception(text) {
        managed_builtin(text)
    } else {
        managed_builtin(DEFAULT_RESCUE)
    }
}

/// Classes caught by `clause`, in clause order. A bare clause catches
/// `StandardError`; a class the program never defines is reported and
/// caught as `StandardError`.
pub fn rescue_targets(
    cx: &CodegenCx<'_>,
    clause: &RescueClause,
    findings: &mut Findings,
    symbol: &str,
    line: Option<u32>,
) -> Vec<RescueTarget> {
    if clause.classes.is_empty() {
        return vec![RescueTarget::builtin(DEFAULT_RESCUE)];
    }
    let mut out: Vec<RescueTarget> = Vec::with_capacity(clause.classes.len());
    for &class in &clause.classes {
        let text = cx.name(class);
        let target = if cx.classes.contains(class) {
            RescueTarget {
                name: text.to_owned(),
                managed: text.to_owned(),
            }
        } else if is_builtin_exception(text) {
            RescueTarget::builtin(text)
        } else {
            let _ = findings.push(
                Diagnostic::warning(ErrorCode::E5004)
                    .with_message(format!("rescue of unknown class `{text}`"))
                    .with_location(Location::new(symbol, line))
                    .with_note("rescued as StandardError"),
            );
            RescueTarget::builtin(DEFAULT_RESCUE)
        };
        if !out.contains(&target) {
            out.push(target);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CodegenOptions;
    use pretty_assertions::assert_eq;
    use rill_ir::{Body, ClassType, Program, StringInterner};

    #[test]
    fn targets_cover_builtin_user_and_unknown_classes() {
        let interner = StringInterner::new();
        let n = |s: &str| interner.intern(s);
        let program = Program::new(
            Vec::new(),
            vec![ClassType::new(n("AppError"), Some(n("RuntimeError")))],
        );
        let options = CodegenOptions::default();
        let mut findings = Findings::new();
        let Ok(cx) = CodegenCx::new(&program, &interner, &options, &mut findings) else {
            panic!("context should build");
        };

        let bare = RescueClause {
            classes: Vec::new(),
            binding: None,
            body: Body::default(),
        };
        assert_eq!(
            rescue_targets(&cx, &bare, &mut findings, "main", None),
            vec![RescueTarget::builtin("StandardError")]
        );

        let listed = RescueClause {
            classes: vec![n("AppError"), n("ZeroDivisionError"), n("Nope")],
            binding: None,
            body: Body::default(),
        };
        let targets = rescue_targets(&cx, &listed, &mut findings, "main", Some(4));
        let managed: Vec<&str> = targets.iter().map(|t| t.managed.as_str()).collect();
        assert_eq!(
            managed,
            vec!["AppError", "rill/rt/exc/ZeroDivisionError", "rill/rt/exc/StandardError"]
        );
        let codes: Vec<ErrorCode> = findings.diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![ErrorCode::E5004]);
        assert_eq!(managed_exception_class(&cx, n("Nope")), "rill/rt/exc/StandardError");
    }
}
