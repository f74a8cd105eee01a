//! The `check` command: load an IR program and register its classes
//! without lowering anything.

use rill_codegen::{CodegenCx, CodegenOptions, Findings};

use super::{load, report_diagnostics};

pub fn check_file(path: &str) {
    let (program, interner) = load(path);
    let options = CodegenOptions::default();
    let mut findings = Findings::new();
    let cx = match CodegenCx::new(&program, &interner, &options, &mut findings) {
        Ok(cx) => cx,
        Err(e) => {
            eprintln!("error: {path}: {e}");
            std::process::exit(1);
        }
    };

    let diagnostics: Vec<_> = findings.diagnostics.sorted().into_iter().cloned().collect();
    report_diagnostics(&diagnostics, false);
    if findings.diagnostics.has_errors() {
        std::process::exit(1);
    }
    println!(
        "OK: {path} ({} functions, {} classes, {} vtables)",
        program.functions.len(),
        cx.classes.len(),
        cx.vtables.len()
    );
}
