//! LineScript Compiler CLI
//!
//! Command-line driver for compiling `.lsc`/`.ls` programs to executables.
//! Known options are parsed with clap; any other `--name` token matching a
//! user `flag name()` declaration activates that handler, and all remaining
//! tokens are forwarded verbatim to the produced binary in run mode.

use clap::{CommandFactory, Parser as ClapParser};
use clap_complete::{Shell, generate};
use lscc::{
    Backend, CompileOptions, ExplicitFlags, ReplSession, build_executable, compile_files,
    load_manifest, run_pipeline,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

#[derive(ClapParser, Debug)]
#[command(name = "lscc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "LineScript compiler - compile .lsc programs to executables", long_about = None)]
struct Cli {
    /// Parse, type-check, and optimize only
    #[arg(long)]
    check: bool,

    /// Emit C and invoke the external C toolchain
    #[arg(long)]
    build: bool,

    /// Build, then execute the resulting binary
    #[arg(long)]
    run: bool,

    /// Output path (defaults to the first input without its extension)
    #[arg(short = 'o')]
    output: Option<PathBuf>,

    /// C compiler command
    #[arg(long)]
    cc: Option<String>,

    /// Code generation backend
    #[arg(long)]
    backend: Option<String>,

    /// Target triple handed to the C compiler
    #[arg(long)]
    target: Option<String>,

    /// Sysroot handed to the C compiler
    #[arg(long)]
    sysroot: Option<String>,

    /// Linker selected via -fuse-ld
    #[arg(long)]
    linker: Option<String>,

    /// Optimizer pass budget
    #[arg(long)]
    passes: Option<u32>,

    /// Enable the typed-IR cache explicitly
    #[arg(long)]
    incremental: bool,

    /// Typed-IR cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Disable the typed-IR cache
    #[arg(long)]
    no_cache: bool,

    /// Write the typed-IR bundle to a file
    #[arg(long)]
    emit_typed_ir: Option<PathBuf>,

    /// Skip the frontend and reuse a typed-IR bundle
    #[arg(long)]
    consume_typed_ir: Option<PathBuf>,

    /// Raise the pass budget and toolchain optimization (-O4)
    #[arg(long)]
    max_speed: bool,

    /// Preserve the emitted C next to the output
    #[arg(long)]
    keep_c: bool,

    /// Interactive line-oriented shell
    #[arg(long, alias = "shell")]
    repl: bool,

    /// Generate shell completion scripts
    #[arg(long, value_enum)]
    completions: Option<Shell>,
}

/// Known options that take a value token.
const VALUE_FLAGS: &[&str] = &[
    "-o",
    "--cc",
    "--backend",
    "--target",
    "--sysroot",
    "--linker",
    "--passes",
    "--cache-dir",
    "--emit-typed-ir",
    "--consume-typed-ir",
    "--completions",
];

const BOOL_FLAGS: &[&str] = &[
    "--check",
    "--build",
    "--run",
    "--incremental",
    "--no-cache",
    "--max-speed",
    "--keep-c",
    "--repl",
    "--shell",
    "--help",
    "-h",
    "--version",
    "-V",
];

/// Split raw arguments into clap-known options, source inputs, and tokens
/// forwarded to the program (candidate user flags included).
fn split_args(argv: &[String]) -> (Vec<String>, Vec<PathBuf>, Vec<String>) {
    let mut known = Vec::new();
    let mut inputs = Vec::new();
    let mut extra = Vec::new();

    let mut iter = argv.iter().peekable();
    while let Some(arg) = iter.next() {
        if arg == "-O4" {
            known.push("--max-speed".to_string());
            continue;
        }
        if BOOL_FLAGS.contains(&arg.as_str()) {
            known.push(arg.clone());
            continue;
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            known.push(arg.clone());
            if let Some(value) = iter.next() {
                known.push(value.clone());
            }
            continue;
        }
        if let Some((flag, _)) = arg.split_once('=') {
            if VALUE_FLAGS.contains(&flag) {
                known.push(arg.clone());
                continue;
            }
        }
        if arg.ends_with(".lsc") || arg.ends_with(".ls") {
            inputs.push(PathBuf::from(arg));
            continue;
        }
        extra.push(arg.clone());
    }
    (known, inputs, extra)
}

/// Discover declared `flag` handlers by parsing the sources; parse errors
/// are reported later by the real compile.
fn discover_flags(paths: &[PathBuf]) -> Vec<String> {
    let mut flags = Vec::new();
    for path in paths {
        let Ok(text) = std::fs::read_to_string(path) else {
            continue;
        };
        if let Ok(program) = lscc::parser::parse_source(&text) {
            flags.extend(program.flags);
        }
    }
    flags
}

/// Match extra tokens against declared flags: first occurrence activates,
/// duplicates are dropped, everything else forwards to the binary.
fn partition_extra(extra: &[String], declared: &[String]) -> (Vec<String>, Vec<String>) {
    let mut active = Vec::new();
    let mut forwarded = Vec::new();
    for token in extra {
        if let Some(name) = token.strip_prefix("--") {
            if declared.iter().any(|f| f == name) {
                if !active.iter().any(|a| a == name) {
                    active.push(name.to_string());
                }
                continue;
            }
        }
        forwarded.push(token.clone());
    }
    (active, forwarded)
}

fn main() {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let (known, inputs, extra) = split_args(&argv);

    let mut clap_args = vec!["lscc".to_string()];
    clap_args.extend(known);
    let cli = Cli::parse_from(&clap_args);

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "lscc", &mut io::stdout());
        return;
    }

    let mut options = CompileOptions::default();
    let explicit = ExplicitFlags {
        cc: cli.cc.is_some(),
        passes: cli.passes.is_some(),
        cache_dir: cli.cache_dir.is_some(),
        max_speed: cli.max_speed,
    };
    if let Some(cc) = cli.cc {
        options.cc = cc;
    }
    if let Some(backend) = cli.backend {
        match backend.parse::<Backend>() {
            Ok(backend) => options.backend = backend,
            Err(e) => fail(&e),
        }
    }
    if let Some(target) = cli.target {
        options.target = target;
    }
    if let Some(sysroot) = cli.sysroot {
        options.sysroot = sysroot;
    }
    if let Some(linker) = cli.linker {
        options.linker = linker;
    }
    if let Some(passes) = cli.passes {
        options.passes = passes;
    }
    options.max_speed = cli.max_speed;
    options.keep_c = cli.keep_c;
    options.cache_dir = cli.cache_dir;
    // The cache is on by default; --incremental is accepted as an explicit
    // opt-in for compatibility.
    options.no_cache = cli.no_cache && !cli.incremental;
    options.output = cli.output;
    options.emit_typed_ir = cli.emit_typed_ir;
    options.consume_typed_ir = cli.consume_typed_ir;

    // Project manifest defaults, next to the first input.
    if let Some(first) = inputs.first() {
        let dir = first.parent().unwrap_or_else(|| std::path::Path::new("."));
        match load_manifest(dir) {
            Ok(Some(manifest)) => options.apply_manifest(&manifest, &explicit),
            Ok(None) => {}
            Err(e) => fail(&format!("LineScript failure (manifest): {}", e)),
        }
    }

    if cli.repl {
        run_shell(options);
        return;
    }

    if inputs.is_empty() {
        fail("LineScript failure (driver): no input files");
    }

    let declared = discover_flags(&inputs);
    let (active, forwarded) = partition_extra(&extra, &declared);
    options.active_flags = active;
    options.run_args = forwarded;

    if cli.run {
        match run_pipeline(&inputs, &options) {
            Ok(code) => process::exit(code),
            Err(e) => fail(&e),
        }
    }

    let output = match compile_files(&inputs, &options) {
        Ok(output) => output,
        Err(e) => fail(&e),
    };
    for warning in &output.warnings {
        eprintln!("{}", warning);
    }

    if cli.check {
        return;
    }

    // Default mode (and --build): emit C and invoke the toolchain.
    let out_path = options.output.clone().unwrap_or_else(|| {
        let stem = inputs[0].file_stem().unwrap_or_default();
        PathBuf::from(stem)
    });
    if let Err(e) = build_executable(&output.bundle, &out_path, &options) {
        fail(&e);
    }
}

fn fail(message: &str) -> ! {
    eprintln!("{}", message);
    process::exit(1)
}

/// Plain-stdin interactive shell; the `lscr` binary layers line editing on
/// the same session type.
fn run_shell(mut options: CompileOptions) {
    let mut session = ReplSession::new();
    let tmp = std::env::temp_dir().join(format!("lsc-repl-{}", process::id()));
    let _ = std::fs::create_dir_all(&tmp);
    options.no_cache = true;

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("lsc> ");
        let _ = io::stdout().flush();
        let Some(Ok(line)) = lines.next() else {
            break;
        };
        let line = line.trim().to_string();
        match line.as_str() {
            "" => continue,
            ":quit" | ":q" => break,
            ":reset" => {
                session.reset();
                continue;
            }
            ":list" => {
                print!("{}", session.listing());
                continue;
            }
            _ => {}
        }

        let source = session.compose(Some(&line));
        let source_path = tmp.join("session.lsc");
        if let Err(e) = std::fs::write(&source_path, &source) {
            eprintln!("LineScript failure (repl): {}", e);
            continue;
        }
        let mut run_options = options.clone();
        run_options.output = Some(tmp.join("session"));
        match run_pipeline(std::slice::from_ref(&source_path), &run_options) {
            Ok(_) => session.accept(&line),
            Err(e) => eprintln!("{}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn split_separates_inputs_known_and_extra() {
        let argv = strings(&[
            "app.lsc",
            "--run",
            "--cc",
            "gcc",
            "--verbose-mode",
            "data.txt",
        ]);
        let (known, inputs, extra) = split_args(&argv);
        assert_eq!(known, strings(&["--run", "--cc", "gcc"]));
        assert_eq!(inputs, vec![PathBuf::from("app.lsc")]);
        assert_eq!(extra, strings(&["--verbose-mode", "data.txt"]));
    }

    #[test]
    fn o4_translates_to_max_speed() {
        let argv = strings(&["-O4", "app.lsc"]);
        let (known, inputs, _) = split_args(&argv);
        assert_eq!(known, strings(&["--max-speed"]));
        assert_eq!(inputs.len(), 1);
    }

    #[test]
    fn value_flags_keep_their_argument() {
        let argv = strings(&["--passes", "20", "--emit-typed-ir", "out.json", "a.ls"]);
        let (known, inputs, extra) = split_args(&argv);
        assert_eq!(
            known,
            strings(&["--passes", "20", "--emit-typed-ir", "out.json"])
        );
        assert_eq!(inputs, vec![PathBuf::from("a.ls")]);
        assert!(extra.is_empty());
    }

    #[test]
    fn equals_form_is_recognized() {
        let argv = strings(&["--cc=gcc", "a.lsc"]);
        let (known, _, extra) = split_args(&argv);
        assert_eq!(known, strings(&["--cc=gcc"]));
        assert!(extra.is_empty());
    }

    #[test]
    fn partition_activates_declared_flags_once() {
        let declared = strings(&["dump-stats", "verbose"]);
        let extra = strings(&["--dump-stats", "--unknown", "--dump-stats", "plain"]);
        let (active, forwarded) = partition_extra(&extra, &declared);
        assert_eq!(active, strings(&["dump-stats"]));
        assert_eq!(forwarded, strings(&["--unknown", "plain"]));
    }

    #[test]
    fn cli_parses_the_documented_surface() {
        let cli = Cli::parse_from([
            "lscc",
            "--check",
            "--cc",
            "gcc",
            "--backend",
            "c",
            "--passes",
            "7",
            "--no-cache",
            "--keep-c",
        ]);
        assert!(cli.check);
        assert_eq!(cli.cc.as_deref(), Some("gcc"));
        assert_eq!(cli.passes, Some(7));
        assert!(cli.no_cache);
        assert!(cli.keep_c);
    }
}
