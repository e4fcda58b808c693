//! LineScript Compiler Library
//!
//! Provides compilation from `.lsc`/`.ls` source to a portable C
//! translation unit and on to native executables through a host C
//! toolchain.
//!
//! The pipeline: read → lex → parse → typecheck → optimize → typecheck
//! (validating the optimizer's output) → emit C → cache write. The
//! cacheable result is a typed-IR bundle: the generated C plus a source
//! hash and a config hash.
//!
//! ```rust,ignore
//! use lscc::{CompileOptions, compile_files};
//!
//! let options = CompileOptions::new().with_cc("clang");
//! let output = compile_files(&[PathBuf::from("app.lsc")], &options)?;
//! println!("{}", output.bundle.c_code);
//! ```

pub mod ast;
pub mod builtins;
pub mod cache;
pub mod codegen;
pub mod config;
pub mod error;
pub mod lexer;
pub mod optimizer;
pub mod parser;
pub mod session;
pub mod typechecker;

pub use ast::Program;
pub use cache::TypedIrBundle;
pub use codegen::{CodeGen, EmitOptions, RuntimeTier};
pub use config::{Backend, CompileOptions, ExplicitFlags, ProjectManifest, load_manifest};
pub use error::{CompileError, Warning};
pub use optimizer::{DEFAULT_PASSES, MAX_SPEED_PASSES, Optimizer};
pub use parser::Parser;
pub use session::ReplSession;
pub use typechecker::TypeChecker;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

/// Result of running the frontend pipeline.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub bundle: TypedIrBundle,
    pub warnings: Vec<Warning>,
    pub superuser: bool,
    /// Number of optimizer passes that actually ran.
    pub passes_run: u32,
}

/// Pass budget after applying max-speed.
pub fn effective_passes(options: &CompileOptions) -> u32 {
    if options.max_speed {
        options.passes.max(MAX_SPEED_PASSES)
    } else {
        options.passes
    }
}

fn stage_error(stage: &str, message: impl std::fmt::Display) -> String {
    format!("LineScript error ({}): {}", stage, message)
}

fn stage_failure(stage: &str, message: impl std::fmt::Display) -> String {
    format!("LineScript failure ({}): {}", stage, message)
}

/// Compile in-memory sources into a typed-IR bundle.
pub fn compile_sources(
    sources: &[(PathBuf, String)],
    options: &CompileOptions,
) -> Result<CompileOutput, String> {
    if options.backend == Backend::Asm {
        return Err(stage_failure(
            "backend",
            "the asm backend is not implemented; use --backend c",
        ));
    }
    if sources.is_empty() {
        return Err(stage_failure("driver", "no input files"));
    }

    // Parse every input and merge into one program.
    let mut program = Program::new();
    for (path, text) in sources {
        let file = path.display().to_string();
        let parsed = parser::parse_source(text).map_err(|e| stage_error(&file, e))?;
        for (name, class) in parsed.classes {
            if program.classes.contains_key(&name) {
                return Err(stage_error(
                    &file,
                    format!("line {}, col {}: duplicate class declaration '{}'",
                        class.span.line, class.span.col, name),
                ));
            }
            program.classes.insert(name, class);
        }
        for (name, mac) in parsed.macros {
            if program.macros.contains_key(&name) {
                return Err(stage_error(
                    &file,
                    format!("line {}, col {}: duplicate macro declaration '{}'",
                        mac.span.line, mac.span.col, name),
                ));
            }
            program.macros.insert(name, mac);
        }
        program.functions.extend(parsed.functions);
        program.flags.extend(parsed.flags);
        program.top_level.extend(parsed.top_level);
    }

    let mut checker = TypeChecker::new();
    checker
        .check_program(&mut program)
        .map_err(|e| stage_error("typecheck", e))?;
    let superuser = checker.superuser_mode();
    let mut warnings = checker.warnings().to_vec();

    let passes_run = Optimizer::new(effective_passes(options)).optimize(&mut program);

    // Validate the optimizer's output with a fresh checker.
    let mut recheck = TypeChecker::new();
    recheck
        .check_program(&mut program)
        .map_err(|e| stage_failure("optimizer", e))?;
    for warning in recheck.warnings() {
        if !warnings.contains(warning) {
            warnings.push(warning.clone());
        }
    }

    let emit_options = EmitOptions {
        target: options.target.clone(),
        active_flags: options.active_flags.clone(),
        superuser,
    };
    let c_code = CodeGen::new(emit_options)
        .generate(&program)
        .map_err(|e| stage_error("codegen", e))?;

    let source_hash = cache::source_hash(sources);
    let config_hash = cache::config_hash(&source_hash, &config_key(options));
    Ok(CompileOutput {
        bundle: TypedIrBundle::new(source_hash, config_hash, c_code),
        warnings,
        superuser,
        passes_run,
    })
}

fn config_key(options: &CompileOptions) -> cache::ConfigKey {
    cache::ConfigKey {
        cc: options.cc.clone(),
        backend: options.backend.name().to_string(),
        max_speed: options.max_speed,
        passes: effective_passes(options),
        target: options.target.clone(),
        sysroot: options.sysroot.clone(),
        linker: options.linker.clone(),
    }
}

/// Read source files, surfacing IO problems as driver failures.
pub fn read_sources(paths: &[PathBuf]) -> Result<Vec<(PathBuf, String)>, String> {
    paths
        .iter()
        .map(|path| {
            fs::read_to_string(path)
                .map(|text| (path.clone(), text))
                .map_err(|e| stage_failure(&path.display().to_string(), e))
        })
        .collect()
}

/// Compile files, honoring the typed-IR cache and consume/emit options.
pub fn compile_files(
    paths: &[PathBuf],
    options: &CompileOptions,
) -> Result<CompileOutput, String> {
    let sources = read_sources(paths)?;
    let source_hash = cache::source_hash(&sources);

    // A consumed bundle replaces the frontend entirely, but stale bundles
    // are never reused.
    if let Some(path) = &options.consume_typed_ir {
        let text = fs::read_to_string(path)
            .map_err(|e| stage_failure(&path.display().to_string(), e))?;
        let bundle = TypedIrBundle::from_json(&text)
            .map_err(|e| stage_failure("typed-ir", e))?;
        if bundle.source_hash != source_hash {
            return Err(stage_failure(
                "typed-ir",
                "stale typed-IR bundle: sources have changed since it was emitted",
            ));
        }
        return Ok(CompileOutput {
            bundle,
            warnings: Vec::new(),
            superuser: false,
            passes_run: 0,
        });
    }

    let config_hash = cache::config_hash(&source_hash, &config_key(options));
    let cache_dir = options.cache_dir.clone().or_else(cache::default_cache_dir);
    if !options.no_cache {
        if let Some(dir) = &cache_dir {
            if let Some(bundle) = cache::load(dir, &source_hash, &config_hash) {
                return Ok(CompileOutput {
                    bundle,
                    warnings: Vec::new(),
                    superuser: false,
                    passes_run: 0,
                });
            }
        }
    }

    let output = compile_sources(&sources, options)?;

    if !options.no_cache {
        if let Some(dir) = &cache_dir {
            // Cache write failures do not fail the build.
            let _ = cache::store(dir, &output.bundle);
        }
    }
    if let Some(path) = &options.emit_typed_ir {
        fs::write(path, output.bundle.to_json()?)
            .map_err(|e| stage_failure(&path.display().to_string(), e))?;
    }
    Ok(output)
}

/// The generated C of a bundle (the `emit` half of the driver contract).
pub fn emit(bundle: &TypedIrBundle) -> &str {
    &bundle.c_code
}

/// Availability probe for the configured C compiler, cached per process.
fn check_cc_available(cc: &str) -> Result<(), String> {
    static CC_CHECKED: OnceLock<Result<(), String>> = OnceLock::new();
    CC_CHECKED
        .get_or_init(|| {
            let output = Command::new(cc).arg("--version").output().map_err(|e| {
                format!(
                    "failed to run '{}': {}. Install a C compiler or pass --cc.",
                    cc, e
                )
            })?;
            if !output.status.success() {
                return Err(format!(
                    "'{} --version' failed with exit code {:?}",
                    cc,
                    output.status.code()
                ));
            }
            Ok(())
        })
        .clone()
}

/// Assemble and link the generated C into a native executable.
pub fn build_executable(
    bundle: &TypedIrBundle,
    output: &Path,
    options: &CompileOptions,
) -> Result<PathBuf, String> {
    check_cc_available(&options.cc).map_err(|e| stage_failure("cc", e))?;

    let c_path = output.with_extension("c");
    fs::write(&c_path, &bundle.c_code)
        .map_err(|e| stage_failure(&c_path.display().to_string(), e))?;

    let mut cmd = Command::new(&options.cc);
    if options.max_speed {
        cmd.arg("-O3").arg("-fopenmp");
    } else {
        cmd.arg("-O2");
    }
    if !options.target.is_empty() {
        cmd.arg("-target").arg(&options.target);
    }
    if !options.sysroot.is_empty() {
        cmd.arg(format!("--sysroot={}", options.sysroot));
    }
    if !options.linker.is_empty() {
        cmd.arg(format!("-fuse-ld={}", options.linker));
    }
    cmd.arg(&c_path).arg("-o").arg(output).arg("-lm");

    let result = cmd
        .output()
        .map_err(|e| stage_failure("cc", format!("failed to spawn '{}': {}", options.cc, e)))?;
    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        let _ = fs::remove_file(&c_path);
        return Err(stage_failure(
            "cc",
            format!(
                "C compilation failed (exit {:?}):\n{}",
                result.status.code(),
                stderr.trim_end()
            ),
        ));
    }
    if !options.keep_c {
        let _ = fs::remove_file(&c_path);
    }
    Ok(output.to_path_buf())
}

/// Fused build-and-run: compile (cache-aware), link, execute.
///
/// Warnings print to the error stream; the produced binary's exit code is
/// returned.
pub fn run_pipeline(paths: &[PathBuf], options: &CompileOptions) -> Result<i32, String> {
    let output_path = options.output.clone().unwrap_or_else(|| {
        let stem = paths
            .first()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_os_string())
            .unwrap_or_else(|| "a.out".into());
        PathBuf::from(stem)
    });

    let compiled = compile_files(paths, options)?;
    for warning in &compiled.warnings {
        eprintln!("{}", warning);
    }
    let binary = build_executable(&compiled.bundle, &output_path, options)?;

    let status = Command::new(&binary)
        .args(&options.run_args)
        .status()
        .map_err(|e| stage_failure(&binary.display().to_string(), e))?;
    Ok(status.code().unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_source(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn determinism_same_input_same_c() {
        let sources = vec![(
            PathBuf::from("t.lsc"),
            "declare s = 0\nfor i in 0..100 {\n  s = s + i\n}\nprintln(s)\n".to_string(),
        )];
        let options = CompileOptions::default();
        let a = compile_sources(&sources, &options).unwrap();
        let b = compile_sources(&sources, &options).unwrap();
        assert_eq!(a.bundle.c_code, b.bundle.c_code);
        assert_eq!(a.bundle.source_hash, b.bundle.source_hash);
        assert_eq!(a.bundle.config_hash, b.bundle.config_hash);
    }

    #[test]
    fn affine_loop_folds_into_constant_print() {
        let sources = vec![(
            PathBuf::from("t.lsc"),
            "declare s = 0\nfor i in 0..1000000 {\n  s = s + i\n}\nprintln(s)\n".to_string(),
        )];
        let output = compile_sources(&sources, &CompileOptions::default()).unwrap();
        assert!(output.bundle.c_code.contains("499999500000"));
        assert!(!output.bundle.c_code.contains("for ("));
    }

    #[test]
    fn iterative_fib_program_compiles() {
        let source = "fn fib(n: i64) -> i64 {\n  declare a = 0\n  declare b = 1\n  for i in 0..n {\n    declare t = a + b\n    a = b\n    b = t\n  }\n  return a\n}\nfn main() -> i64 {\n  println(fib(45))\n  return 0\n}\n";
        let sources = vec![(PathBuf::from("fib.lsc"), source.to_string())];
        let output = compile_sources(&sources, &CompileOptions::default()).unwrap();
        assert!(output.bundle.c_code.contains("ls_main"));
        assert!(output.bundle.c_code.contains("fib"));
    }

    #[test]
    fn class_scenario_compiles_with_object_store() {
        let source = "class P {\n  declare x: i64 = 0\n  fn constructor(v: i64) {\n    this.x = v\n  }\n}\nfn main() {\n  declare p = P(7)\n  println(p.x)\n}\n";
        let sources = vec![(PathBuf::from("p.lsc"), source.to_string())];
        let output = compile_sources(&sources, &CompileOptions::default()).unwrap();
        assert!(output.bundle.c_code.contains("ls_object_new"));
        assert!(output.bundle.c_code.contains("ls_object_set"));
        assert!(output.bundle.c_code.contains("__ls_cls_P_constructor"));
    }

    #[test]
    fn parse_errors_carry_file_prefix() {
        let sources = vec![(PathBuf::from("bad.lsc"), "fn {".to_string())];
        let err = compile_sources(&sources, &CompileOptions::default()).unwrap_err();
        assert!(err.starts_with("LineScript error (bad.lsc): line "), "got: {}", err);
    }

    #[test]
    fn type_errors_carry_stage_prefix() {
        let sources = vec![(PathBuf::from("t.lsc"), "if 1 {\n}\n".to_string())];
        let err = compile_sources(&sources, &CompileOptions::default()).unwrap_err();
        assert!(err.starts_with("LineScript error (typecheck): line "), "got: {}", err);
    }

    #[test]
    fn asm_backend_is_reported_unsupported() {
        let sources = vec![(PathBuf::from("t.lsc"), "println(1)\n".to_string())];
        let mut options = CompileOptions::default();
        options.backend = Backend::Asm;
        let err = compile_sources(&sources, &options).unwrap_err();
        assert!(err.contains("asm backend"));
    }

    #[test]
    fn max_speed_raises_pass_budget() {
        let options = CompileOptions::default().with_max_speed(true);
        assert_eq!(effective_passes(&options), MAX_SPEED_PASSES);
        let options = CompileOptions::default().with_max_speed(true).with_passes(64);
        assert_eq!(effective_passes(&options), 64);
    }

    #[test]
    fn cache_round_trip_and_staleness() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_source(dir.path(), "t.lsc", "println(41)\n");
        let mut options = CompileOptions::default();
        options.cache_dir = Some(dir.path().join("cache"));

        let first = compile_files(std::slice::from_ref(&src), &options).unwrap();
        assert!(first.passes_run > 0);

        // Second run hits the cache (no passes run).
        let second = compile_files(std::slice::from_ref(&src), &options).unwrap();
        assert_eq!(second.passes_run, 0);
        assert_eq!(first.bundle, second.bundle);

        // Any changed byte misses.
        fs::write(&src, "println(42)\n").unwrap();
        let third = compile_files(std::slice::from_ref(&src), &options).unwrap();
        assert!(third.passes_run > 0);
        assert_ne!(first.bundle.source_hash, third.bundle.source_hash);
    }

    #[test]
    fn no_cache_forces_recompilation() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_source(dir.path(), "t.lsc", "println(41)\n");
        let mut options = CompileOptions::default();
        options.cache_dir = Some(dir.path().join("cache"));
        options.no_cache = true;

        compile_files(std::slice::from_ref(&src), &options).unwrap();
        let again = compile_files(std::slice::from_ref(&src), &options).unwrap();
        assert!(again.passes_run > 0);
    }

    #[test]
    fn typed_ir_emit_and_consume_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_source(dir.path(), "t.lsc", "println(7)\n");
        let ir_path = dir.path().join("t.typed-ir.json");

        let mut options = CompileOptions::default();
        options.no_cache = true;
        options.emit_typed_ir = Some(ir_path.clone());
        let emitted = compile_files(std::slice::from_ref(&src), &options).unwrap();

        let mut consume = CompileOptions::default();
        consume.no_cache = true;
        consume.consume_typed_ir = Some(ir_path.clone());
        let consumed = compile_files(std::slice::from_ref(&src), &consume).unwrap();
        assert_eq!(emitted.bundle.c_code, consumed.bundle.c_code);

        // Stale bundle: change the source, consumption must fail.
        fs::write(&src, "println(8)\n").unwrap();
        let err = compile_files(std::slice::from_ref(&src), &consume).unwrap_err();
        assert!(err.contains("stale typed-IR"));
    }

    #[test]
    fn multiple_files_merge_into_one_program() {
        let a = (
            PathBuf::from("a.lsc"),
            "fn helper() -> i64 {\n  return 5\n}\n".to_string(),
        );
        let b = (
            PathBuf::from("b.lsc"),
            "fn main() -> i64 {\n  println(helper())\n  return 0\n}\n".to_string(),
        );
        let output = compile_sources(&[a, b], &CompileOptions::default()).unwrap();
        assert!(output.bundle.c_code.contains("ls_main"));
    }

    #[test]
    fn warnings_surface_from_superuser_mode() {
        let sources = vec![(
            PathBuf::from("t.lsc"),
            "superuser()\ndeclare x = unknown_name\nprintln(x)\n".to_string(),
        )];
        let output = compile_sources(&sources, &CompileOptions::default()).unwrap();
        assert!(output.superuser);
        assert!(output.warnings.iter().any(|w| w.msg.contains("unknown name")));
    }
}
