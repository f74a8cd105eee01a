//! Rill code generator CLI.
//!
//! Reads IR program documents (JSON with a `symbols` table) and lowers
//! them to native modules or managed class documents.

mod commands;

use std::sync::Once;

use commands::{build_file, check_file, parse_build_options, run_file};

static TRACING_INIT: Once = Once::new();

/// Install the tracing subscriber when `RUST_LOG` is set.
///
/// `RILL_LOG_TREE=1` renders spans as an indented tree instead of flat
/// lines.
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_err() {
            return;
        }
        let filter = EnvFilter::from_default_env();
        if std::env::var("RILL_LOG_TREE").is_ok_and(|v| v == "1") {
            tracing_subscriber::registry()
                .with(
                    tracing_tree::HierarchicalLayer::new(2)
                        .with_targets(true)
                        .with_writer(std::io::stderr),
                )
                .with(filter)
                .init();
        } else {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .with_writer(std::io::stderr),
                )
                .with(filter)
                .init();
        }
    });
}

fn main() {
    init_tracing();
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    let command = &args[1];

    match command.as_str() {
        "build" => {
            if args.len() < 3 {
                eprintln!("Usage: rillc build <program.json> [options]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --emit=<target>     Emit: native (default), managed, both");
                eprintln!("  --instrument        Insert profiling probes");
                eprintln!("  --main-class NAME   Managed class for top-level routines");
                eprintln!("  -o <dir>            Output directory");
                eprintln!("  --quiet             No per-site notes or dispatch summary");
                std::process::exit(1);
            }
            let options = parse_build_options(&args[3..]);
            build_file(&args[2], &options);
        }
        "run" => {
            if args.len() < 3 {
                eprintln!("Usage: rillc run <program.json> [--instrument] [--quiet]");
                std::process::exit(1);
            }
            let options = parse_build_options(&args[3..]);
            run_file(&args[2], &options);
        }
        "check" => {
            if args.len() < 3 {
                eprintln!("Usage: rillc check <program.json>");
                std::process::exit(1);
            }
            check_file(&args[2]);
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        "version" | "--version" | "-V" => {
            println!("rillc {}", env!("CARGO_PKG_VERSION"));
        }
        _ => {
            eprintln!("Unknown command: {command}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!("Rill code generator");
    println!();
    println!("Usage: rillc <command> [options]");
    println!();
    println!("Commands:");
    println!("  build <program.json>   Lower to native text and/or managed JSON");
    println!("  run <program.json>     Lower natively and execute");
    println!("  check <program.json>   Validate the IR and its class hierarchy");
    println!("  help                   Show this help message");
    println!("  version                Show version information");
    println!();
    println!("Build options:");
    println!("  --emit=<target>        Emit: native (default), managed, both");
    println!("  --instrument           Insert profiling probes");
    println!("  --main-class NAME      Managed class for top-level routines (default: RillMain)");
    println!("  -o <dir>               Output directory (default: .)");
    println!("  --quiet                No per-site notes or dispatch summary");
    println!();
    println!("Environment:");
    println!("  RUST_LOG=rill_codegen=debug   Log each lowering stage");
    println!("  RILL_LOG_TREE=1               Indented span tree instead of flat lines");
    println!();
    println!("Examples:");
    println!("  rillc build app.json --emit=both -o build");
    println!("  rillc run app.json --instrument");
    println!("  rillc check app.json");
}
