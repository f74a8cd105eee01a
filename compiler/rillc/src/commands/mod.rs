//! Command implementations for the `rillc` driver.

mod build;
mod check;
mod run;

pub use build::{build_file, parse_build_options, BuildOptions};
pub use check::check_file;
pub use run::run_file;

use rill_diagnostic::{Diagnostic, DispatchReport, Severity};
use rill_ir::{load_program, Program, StringInterner};

/// Read a file, exiting with a readable message when that fails.
fn read_file(path: &str) -> String {
    match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            let msg = match e.kind() {
                std::io::ErrorKind::NotFound => format!("cannot find file '{path}'"),
                std::io::ErrorKind::PermissionDenied => {
                    format!("permission denied reading '{path}'")
                }
                std::io::ErrorKind::InvalidData => {
                    format!("'{path}' contains invalid UTF-8 data")
                }
                _ => format!("error reading '{path}': {e}"),
            };
            eprintln!("{msg}");
            std::process::exit(1);
        }
    }
}

/// Read and parse an IR program document.
fn load(path: &str) -> (Program, StringInterner) {
    let json = read_file(path);
    match load_program(&json) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("error: {path}: {e}");
            std::process::exit(1);
        }
    }
}

/// Print diagnostics to stderr. Notes are skipped when `quiet`.
fn report_diagnostics(diagnostics: &[Diagnostic], quiet: bool) {
    for diagnostic in diagnostics {
        if quiet && diagnostic.severity == Severity::Note {
            continue;
        }
        eprintln!("{diagnostic}");
    }
}

fn report_dispatch(report: &DispatchReport, quiet: bool) {
    if !quiet {
        eprint!("{}", report.summary());
    }
}
