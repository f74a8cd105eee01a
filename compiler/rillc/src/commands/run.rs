//! The `run` command: lower natively and execute on the runtime.

use rill_codegen::compile;
use rill_rt::{ExecError, Machine, MachineConfig};
use tracing::debug;

use super::{load, report_diagnostics, report_dispatch, BuildOptions};

/// Run `path`, streaming program output to stdout. Diagnostics, the
/// dispatch summary and (with `--instrument`) the profile go to stderr.
pub fn run_file(path: &str, options: &BuildOptions) {
    let (program, interner) = load(path);
    let mut codegen = options.codegen_options();
    codegen.emit_native = true;
    codegen.emit_managed = false;
    let output = match compile(&program, &interner, &codegen) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    report_diagnostics(&output.diagnostics, options.quiet);
    let Some(module) = output.native else {
        eprintln!("error: no native module was produced");
        std::process::exit(1);
    };

    let machine = match Machine::with_config(module, MachineConfig { echo: true }) {
        Ok(machine) => machine,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    let result = machine.run_main();
    debug!(live_words = machine.live_words(), "program finished");

    report_dispatch(&output.report, options.quiet);
    if options.instrument {
        eprintln!("profile:");
        for entry in machine.profile_report() {
            eprintln!(
                "  {:<24} {:>8} call(s) {:>12?}",
                entry.name, entry.calls, entry.total
            );
        }
    }

    match result {
        Ok(_) => {}
        Err(ExecError::Uncaught { class, message }) => {
            eprintln!("{path}: uncaught {class}: {message}");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
