//! The `build` command: lower an IR program to native text and/or a
//! managed class document.

use std::path::{Path, PathBuf};

use rill_codegen::{compile, CodegenOptions, DispatchNotes};
use rill_native::print_module;
use tracing::debug;

use super::{load, report_diagnostics, report_dispatch};

/// Which targets to lower to (`--emit=`).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Emit {
    #[default]
    Native,
    Managed,
    Both,
}

impl Emit {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "native" => Some(Emit::Native),
            "managed" => Some(Emit::Managed),
            "both" => Some(Emit::Both),
            _ => None,
        }
    }
}

/// Options shared by `build` and `run`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Targets to produce (--emit)
    pub emit: Emit,
    /// Insert profiling probes (--instrument)
    pub instrument: bool,
    /// Managed class holding top-level routines (--main-class)
    pub main_class: Option<String>,
    /// Output directory (-o)
    pub out_dir: Option<PathBuf>,
    /// Suppress per-site notes and the dispatch summary (--quiet)
    pub quiet: bool,
}

impl BuildOptions {
    pub fn codegen_options(&self) -> CodegenOptions {
        let mut options = CodegenOptions {
            emit_native: matches!(self.emit, Emit::Native | Emit::Both),
            emit_managed: matches!(self.emit, Emit::Managed | Emit::Both),
            instrument: self.instrument,
            ..CodegenOptions::default()
        };
        if let Some(main_class) = &self.main_class {
            options.main_class.clone_from(main_class);
        }
        if self.quiet {
            options.dispatch_notes = DispatchNotes::Quiet;
        }
        options
    }
}

/// Parse build flags. Flags taking a value (`-o`, `--main-class`) read
/// the next argument; unknown flags are warned about and skipped.
pub fn parse_build_options(args: &[String]) -> BuildOptions {
    let mut options = BuildOptions::default();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if let Some(emit) = arg.strip_prefix("--emit=") {
            if let Some(e) = Emit::from_str(emit) {
                options.emit = e;
            } else {
                eprintln!("warning: unknown emit type '{emit}', options: native, managed, both");
            }
        } else if arg == "--instrument" {
            options.instrument = true;
        } else if arg == "--quiet" || arg == "-q" {
            options.quiet = true;
        } else if let Some(name) = arg.strip_prefix("--main-class=") {
            options.main_class = Some(name.to_string());
        } else if arg == "--main-class" && i + 1 < args.len() {
            options.main_class = Some(args[i + 1].clone());
            i += 1;
        } else if arg == "-o" && i + 1 < args.len() {
            options.out_dir = Some(PathBuf::from(&args[i + 1]));
            i += 1;
        } else if let Some(dir) = arg.strip_prefix("-o=") {
            options.out_dir = Some(PathBuf::from(dir));
        } else {
            eprintln!("warning: ignoring unknown option '{arg}'");
        }
        i += 1;
    }
    options
}

fn write_output(path: &Path, contents: &str) {
    if let Err(e) = std::fs::write(path, contents) {
        eprintln!("error: cannot write '{}': {e}", path.display());
        std::process::exit(1);
    }
    println!("wrote {}", path.display());
}

/// Lower `path` and write `<stem>.ll` and/or `<stem>.classes.json`.
pub fn build_file(path: &str, options: &BuildOptions) {
    let (program, interner) = load(path);
    let codegen = options.codegen_options();
    let output = match compile(&program, &interner, &codegen) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    report_diagnostics(&output.diagnostics, options.quiet);

    let out_dir = options.out_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    if let Err(e) = std::fs::create_dir_all(&out_dir) {
        eprintln!("error: cannot create '{}': {e}", out_dir.display());
        std::process::exit(1);
    }
    let stem = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("program");
    debug!(stem, out_dir = %out_dir.display(), "writing build outputs");

    if let Some(module) = &output.native {
        write_output(&out_dir.join(format!("{stem}.ll")), &print_module(module));
    }
    if let Some(document) = &output.managed {
        match document.to_json() {
            Ok(json) => write_output(&out_dir.join(format!("{stem}.classes.json")), &json),
            Err(e) => {
                eprintln!("error: cannot serialize managed output: {e}");
                std::process::exit(1);
            }
        }
    }
    report_dispatch(&output.report, options.quiet);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn value_flags_read_the_next_argument() {
        let options = parse_build_options(&args(&[
            "--emit=both",
            "--main-class",
            "app/Main",
            "-o",
            "out",
            "--instrument",
        ]));
        assert_eq!(
            options,
            BuildOptions {
                emit: Emit::Both,
                instrument: true,
                main_class: Some("app/Main".to_string()),
                out_dir: Some(PathBuf::from("out")),
                quiet: false,
            }
        );
    }

    #[test]
    fn quiet_builds_only_report_into_the_summary() {
        let options = parse_build_options(&args(&["--emit=managed", "--quiet"]));
        let codegen = options.codegen_options();
        assert!(!codegen.emit_native);
        assert!(codegen.emit_managed);
        assert_eq!(codegen.dispatch_notes, DispatchNotes::Quiet);
        assert_eq!(codegen.main_class, "RillMain");
    }

    #[test]
    fn unknown_emit_keeps_the_default() {
        let options = parse_build_options(&args(&["--emit=wasm"]));
        assert_eq!(options.emit, Emit::Native);
    }
}
