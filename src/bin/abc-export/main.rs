//! abc-export - replay JSON scene scripts through an export session.

mod script;

use std::env;

use tracing_subscriber::EnvFilter;

use alembic_export::archive::{ContainerWriter, MemoryArchive, ObjectHandle, RecordedKind};
use alembic_export::export::Diagnostics;

use script::Script;

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level = "info";
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "error",
            _ => filtered_args.push(arg),
        }
    }
    init_logging(level);

    if filtered_args.is_empty() {
        print_help();
        return;
    }

    match filtered_args[0] {
        "run" | "r" => {
            let Some(path) = filtered_args.get(1) else {
                eprintln!("Error: missing script argument");
                eprintln!("Usage: abc-export run <scene.json> [-o out.json]");
                std::process::exit(1);
            };
            let out = flag_value(&filtered_args, "-o");
            cmd_run(path, out);
        }

        "tree" | "t" => {
            let Some(path) = filtered_args.get(1) else {
                eprintln!("Error: missing script argument");
                eprintln!("Usage: abc-export tree <scene.json>");
                std::process::exit(1);
            };
            let (archive, diagnostics) = replay(path);
            print_tree(&archive, archive.root(), 0);
            print_diagnostics(&diagnostics);
        }

        "version" | "--version" | "-V" => {
            println!(
                "abc-export {} (built {} {})",
                env!("CARGO_PKG_VERSION"),
                env!("ABC_EXPORT_BUILD_DATE"),
                env!("ABC_EXPORT_BUILD_TIME")
            );
        }

        "help" | "h" | "--help" | "-h" => print_help(),

        other => {
            eprintln!("Unknown command: {}", other);
            print_help();
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!("abc-export - frame-by-frame scene export driver");
    println!();
    println!("USAGE:");
    println!("    abc-export [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    r, run  <scene.json> [-o out.json]  Replay a scene script and summarize the archive");
    println!("    t, tree <scene.json>                Replay and print the written hierarchy");
    println!("    version                             Show version and build date");
    println!("    h, help                             Show this help");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Show debug output");
    println!("    -vv, --trace     Show trace output (very verbose)");
    println!("    -q, --quiet      Only show errors");
    println!();
    println!("RUST_LOG overrides the level chosen by the flags.");
}

fn flag_value<'a>(args: &[&'a str], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| *a == flag)
        .and_then(|i| args.get(i + 1))
        .copied()
}

fn replay(path: &str) -> (MemoryArchive, Diagnostics) {
    let result = Script::load(path).and_then(|s| s.replay());
    match result {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to replay {}: {}", path, e);
            std::process::exit(1);
        }
    }
}

fn cmd_run(path: &str, out: Option<&str>) {
    let (archive, diagnostics) = replay(path);

    let frames = archive.archive_bounds().len();
    println!("Script:    {}", path);
    println!("Frames:    {}", frames);
    println!("Objects:   {}", archive.len() - 1);
    println!("Instances: {}", archive.instance_count());
    if let Some(b) = archive.archive_bounds().last().filter(|b| !b.is_empty()) {
        println!("Bounds:    {:?} .. {:?}", b.min.to_array(), b.max.to_array());
    }

    if let Some(out) = out {
        if let Err(e) = archive.save_json(out) {
            eprintln!("Failed to write {}: {}", out, e);
            std::process::exit(1);
        }
        println!("Wrote {}", out);
    }
    print_diagnostics(&diagnostics);
}

fn print_tree(archive: &MemoryArchive, handle: ObjectHandle, depth: usize) {
    let Some(obj) = archive.object(handle) else {
        return;
    };
    let indent = "  ".repeat(depth);
    let kind = match obj.kind {
        RecordedKind::Root => "root".to_string(),
        RecordedKind::Object(k) => format!("{:?}", k),
        RecordedKind::Instance(src) => {
            let source = archive.object(src).map(|o| o.path.as_str()).unwrap_or("?");
            format!("instance of {}", source)
        }
    };
    let name = if obj.name.is_empty() { "/" } else { obj.name.as_str() };
    let mut line = format!("{}{} [{}] samples={}", indent, name, kind, obj.samples.len());
    if !obj.meta.is_empty() {
        line.push_str(&format!(" meta={}", obj.meta.serialize()));
    }
    println!("{}", line);

    for &child in &obj.children {
        print_tree(archive, child, depth + 1);
    }
}

fn print_diagnostics(diagnostics: &Diagnostics) {
    for w in diagnostics.warnings() {
        println!("warning: {}", w);
    }
    for e in diagnostics.errors() {
        println!("error: {}", e);
    }
}
