//! C code generation
//!
//! Generates a single portable C translation unit from a checked, optimized
//! `Program`. The unit carries one of three runtime prelude tiers chosen by
//! inspecting the program, every user function (prototypes first), and an
//! entry wrapper that runs the active CLI-flag handlers before the user
//! entry.
//!
//! # Module structure
//!
//! - `mod.rs`: CodeGen state, tier selection, expression emission, entry
//!   synthesis
//! - `statements.rs`: statement lowering and the owned-cleanup scope stack
//! - `loops.rs`: for-range shape specialization (parallel, closed-form
//!   reductions, SIMD hints, plain loops)
//! - `runtime.rs`: the C runtime prelude constants
//! - `error.rs`: error types

mod error;
mod loops;
mod runtime;
mod statements;

pub use error::CodeGenError;
pub use runtime::RuntimeTier;

use crate::ast::{BinOp, Expr, ExprKind, Function, Program, Stmt, StmtKind, Ty};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Options the driver hands to code generation.
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Target triple (selects the ultra-minimal tier on Windows).
    pub target: String,
    /// Active CLI flags, in the order the driver provides.
    pub active_flags: Vec<String>,
    /// Superuser mode: emit step/memory guards and tracing hooks.
    pub superuser: bool,
}

/// One owned binding awaiting cleanup; an empty variable name emits a
/// zero-argument cleanup call (used by format-block guards).
#[derive(Debug, Clone)]
pub(super) struct Cleanup {
    pub var: String,
    pub free_fn: String,
}

#[derive(Debug, Default)]
pub(super) struct CleanupScope {
    pub cleanups: Vec<Cleanup>,
    pub is_loop: bool,
}

pub struct CodeGen {
    options: EmitOptions,
    tier: RuntimeTier,
    pub(super) output: String,
    pub(super) indent: usize,
    pub(super) scopes: Vec<CleanupScope>,
    user_symbols: HashSet<String>,
    /// Whether the function currently being emitted captured a start
    /// timestamp for `stateSpeed()`.
    pub(super) fn_tracks_time: bool,
}

impl CodeGen {
    pub fn new(options: EmitOptions) -> Self {
        CodeGen {
            options,
            tier: RuntimeTier::Full,
            output: String::new(),
            indent: 0,
            scopes: Vec::new(),
            user_symbols: HashSet::new(),
            fn_tracks_time: false,
        }
    }

    pub fn tier(&self) -> RuntimeTier {
        self.tier
    }

    /// Generate the full translation unit.
    pub fn generate(mut self, program: &Program) -> Result<String, CodeGenError> {
        self.tier = runtime::select_tier(program, &self.options);
        self.user_symbols = program.functions.iter().map(|f| f.name.clone()).collect();

        writeln!(self.output, "/* generated by lscc */")?;
        self.output.push_str(runtime::prelude(self.tier, &self.options));

        if self.tier == RuntimeTier::UltraMinimal {
            return self.generate_ultra_minimal(program);
        }

        let entry = self.select_entry(program)?;

        // Extern declarations.
        for func in program.functions.iter().filter(|f| f.is_extern) {
            writeln!(self.output, "extern {};", self.signature(func))?;
        }

        // Prototypes, then definitions.
        for func in program.functions.iter().filter(|f| !f.is_extern) {
            writeln!(self.output, "{};", self.signature(func))?;
        }
        if matches!(entry, EntryPoint::Script) {
            writeln!(self.output, "static int64_t __linescript_script_main(void);")?;
        }
        writeln!(self.output)?;

        for func in program.functions.iter().filter(|f| !f.is_extern) {
            self.emit_function(func)?;
        }
        if matches!(entry, EntryPoint::Script) {
            self.emit_script_main(program)?;
        }

        self.emit_entry_wrapper(program, &entry)?;
        Ok(self.output)
    }

    // ------------------------------------------------------------------
    // Entry synthesis
    // ------------------------------------------------------------------

    fn select_entry(&self, program: &Program) -> Result<EntryPoint, CodeGenError> {
        if let Some(main) = program
            .functions
            .iter()
            .find(|f| f.source_name == "main" && f.class_owner.is_none())
        {
            return Ok(EntryPoint::Function(main.name.clone(), main.return_ty));
        }
        if !program.top_level.is_empty() {
            return Ok(EntryPoint::Script);
        }
        let mut candidates = program.functions.iter().filter(|f| {
            !f.is_extern && f.params.is_empty() && f.cli_flag.is_none() && f.class_owner.is_none()
        });
        match (candidates.next(), candidates.next()) {
            (Some(f), None) => Ok(EntryPoint::Function(f.name.clone(), f.return_ty)),
            (None, _) => Err(CodeGenError::Logic(
                "no entry point: define main(), a top-level statement, or a single zero-argument function"
                    .to_string(),
            )),
            (Some(_), Some(_)) => Err(CodeGenError::Logic(
                "ambiguous entry point: multiple zero-argument functions and no main()".to_string(),
            )),
        }
    }

    fn emit_script_main(&mut self, program: &Program) -> Result<(), CodeGenError> {
        writeln!(self.output, "static int64_t __linescript_script_main(void) {{")?;
        self.indent = 1;
        self.fn_tracks_time = block_uses_state_speed(&program.top_level);
        if self.fn_tracks_time {
            self.line("int64_t __ls_fn_start_us = ls_clock_us();")?;
        }
        self.scopes.push(CleanupScope::default());
        let top = program.top_level.clone();
        for stmt in &top {
            self.emit_stmt(stmt)?;
        }
        self.emit_scope_cleanups_on_exit()?;
        self.scopes.pop();
        self.line("return 0;")?;
        self.indent = 0;
        writeln!(self.output, "}}")?;
        writeln!(self.output)?;
        Ok(())
    }

    fn emit_entry_wrapper(
        &mut self,
        program: &Program,
        entry: &EntryPoint,
    ) -> Result<(), CodeGenError> {
        writeln!(self.output, "int main(int argc, char **argv) {{")?;
        writeln!(self.output, "    ls_runtime_init(argc, argv);")?;
        // Flag handlers fire in driver order before the user entry.
        for flag in &self.options.active_flags {
            if program.flags.contains(flag) {
                writeln!(
                    self.output,
                    "    __ls_flag_{}();",
                    flag.replace('-', "_")
                )?;
            }
        }
        match entry {
            EntryPoint::Function(symbol, return_ty) => {
                let call = format!("{}()", self.c_symbol(symbol));
                if return_ty.is_integer() {
                    writeln!(self.output, "    return (int){};", call)?;
                } else {
                    writeln!(self.output, "    {};", call)?;
                    writeln!(self.output, "    return 0;")?;
                }
            }
            EntryPoint::Script => {
                writeln!(
                    self.output,
                    "    return (int)__linescript_script_main();"
                )?;
            }
        }
        writeln!(self.output, "}}")?;
        Ok(())
    }

    /// The ultra-minimal tier: literal prints only, no C runtime entry.
    fn generate_ultra_minimal(&mut self, program: &Program) -> Result<String, CodeGenError> {
        writeln!(
            self.output,
            "static LS_ALWAYS_INLINE void __linescript_script_main(void) {{"
        )?;
        for stmt in &program.top_level {
            let StmtKind::Expr(expr) = &stmt.kind else {
                return Err(CodeGenError::Logic(
                    "internal: non-print statement in ultra-minimal tier".to_string(),
                ));
            };
            let ExprKind::Call { callee, args } = &expr.kind else {
                return Err(CodeGenError::Logic(
                    "internal: non-call statement in ultra-minimal tier".to_string(),
                ));
            };
            let newline = callee.starts_with("println");
            let mut text = match &args[0].kind {
                ExprKind::Str(s) => s.clone(),
                ExprKind::Int(v) => v.to_string(),
                ExprKind::Bool(b) => b.to_string(),
                _ => {
                    return Err(CodeGenError::Logic(
                        "internal: non-literal argument in ultra-minimal tier".to_string(),
                    ));
                }
            };
            if newline {
                text.push('\n');
            }
            writeln!(
                self.output,
                "    ls_um_write({}, {});",
                escape_c_string(&text),
                text.len()
            )?;
        }
        writeln!(self.output, "}}")?;
        writeln!(self.output)?;
        writeln!(self.output, "void mainCRTStartup(void) {{")?;
        writeln!(self.output, "    ls_um_init();")?;
        writeln!(self.output, "    __linescript_script_main();")?;
        writeln!(self.output, "    ls_um_exit(0);")?;
        writeln!(self.output, "}}")?;
        Ok(std::mem::take(&mut self.output))
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    fn signature(&self, func: &Function) -> String {
        let params = if func.params.is_empty() {
            "void".to_string()
        } else {
            func.params
                .iter()
                .map(|p| format!("{} {}", c_ty(p.ty), p.name))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let linkage = if func.is_extern {
            ""
        } else if func.is_inline {
            "static inline "
        } else {
            "static "
        };
        format!(
            "{}{} {}({})",
            linkage,
            c_ty(func.return_ty),
            self.c_symbol(&func.name),
            params
        )
    }

    fn emit_function(&mut self, func: &Function) -> Result<(), CodeGenError> {
        writeln!(self.output, "{} {{", self.signature(func))?;
        self.indent = 1;
        self.fn_tracks_time = block_uses_state_speed(&func.body);
        if self.fn_tracks_time {
            self.line("int64_t __ls_fn_start_us = ls_clock_us();")?;
        }
        self.scopes.push(CleanupScope::default());
        for stmt in &func.body {
            self.emit_stmt(stmt)?;
        }
        self.emit_scope_cleanups_on_exit()?;
        self.scopes.pop();
        self.indent = 0;
        writeln!(self.output, "}}")?;
        writeln!(self.output)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Map a symbol to its C name (`main` collides with the wrapper).
    pub(super) fn c_symbol(&self, name: &str) -> String {
        if name == "main" {
            "ls_main".to_string()
        } else {
            name.to_string()
        }
    }

    pub(super) fn expr_to_c(&self, expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Int(v) => {
                if *v == i64::MIN {
                    "INT64_MIN".to_string()
                } else {
                    format!("{}LL", v)
                }
            }
            ExprKind::Float(v) => format!("{:?}", v),
            ExprKind::Bool(b) => b.to_string(),
            ExprKind::Str(s) => escape_c_string(s),
            ExprKind::Var(name) => name.clone(),
            ExprKind::Unary {
                op,
                operand,
                override_fn,
            } => {
                let inner = self.expr_to_c(operand);
                match override_fn {
                    Some(symbol) => format!("{}({})", symbol, inner),
                    None => format!("({}{})", op.symbol(), inner),
                }
            }
            ExprKind::Binary {
                op,
                lhs,
                rhs,
                override_fn,
            } => {
                let a = self.expr_to_c(lhs);
                let b = self.expr_to_c(rhs);
                if let Some(symbol) = override_fn {
                    return format!("{}({}, {})", symbol, a, b);
                }
                // String equality is value equality.
                if matches!(op, BinOp::Eq | BinOp::Ne) && lhs.ty == Ty::Str && rhs.ty == Ty::Str {
                    let helper = if *op == BinOp::Eq {
                        "ls_str_eq"
                    } else {
                        "ls_str_neq"
                    };
                    return format!("{}({}, {})", helper, a, b);
                }
                if *op == BinOp::Pow {
                    return format!("ls_pow({}, {})", a, b);
                }
                format!("({} {} {})", a, op.symbol(), b)
            }
            ExprKind::Call { callee, args } => self.call_to_c(callee, args),
        }
    }

    fn call_to_c(&self, callee: &str, args: &[Expr]) -> String {
        // Compiler-recognized pseudo-calls.
        match callee {
            ".stateSpeed" | "stateSpeed" => {
                return "ls_state_speed(__ls_fn_start_us)".to_string();
            }
            ".freeConsole" => return "ls_free_console()".to_string(),
            ".format" => {
                let inner = args
                    .first()
                    .map(|a| self.expr_to_c(a))
                    .unwrap_or_else(|| "\"\"".to_string());
                return format!("ls_format_value({})", inner);
            }
            "superuser" => return "ls_superuser_enable()".to_string(),
            _ => {}
        }

        // spawn(fn()) passes the function pointer.
        if callee == "spawn" {
            if let Some(ExprKind::Call { callee: task, .. }) = args.first().map(|a| &a.kind) {
                return format!("ls_spawn({})", self.c_symbol(task));
            }
        }

        let rendered: Vec<String> = args.iter().map(|a| self.arg_to_c(a)).collect();
        let joined = rendered.join(", ");

        if self.user_symbols.contains(callee) {
            return format!("{}({})", self.c_symbol(callee), joined);
        }
        format!("{}({})", builtin_c_name(callee), joined)
    }

    /// Arguments of type `str` are held so the callee observes a stable
    /// pointer; literals are already stable.
    fn arg_to_c(&self, arg: &Expr) -> String {
        let rendered = self.expr_to_c(arg);
        if self.tier == RuntimeTier::Full
            && arg.ty == Ty::Str
            && arg.typed
            && !matches!(arg.kind, ExprKind::Str(_))
        {
            format!("ls_str_hold({})", rendered)
        } else {
            rendered
        }
    }

    // ------------------------------------------------------------------
    // Output helpers
    // ------------------------------------------------------------------

    pub(super) fn line(&mut self, text: &str) -> Result<(), CodeGenError> {
        for _ in 0..self.indent {
            self.output.push_str("    ");
        }
        self.output.push_str(text);
        self.output.push('\n');
        Ok(())
    }

    pub(super) fn superuser(&self) -> bool {
        self.options.superuser
    }
}

enum EntryPoint {
    /// A concrete function symbol and its return type.
    Function(String, Ty),
    /// Synthesized `__linescript_script_main` over the top-level block.
    Script,
}

/// C type for a semantic type.
pub(super) fn c_ty(ty: Ty) -> &'static str {
    match ty {
        Ty::I32 => "int32_t",
        Ty::I64 => "int64_t",
        Ty::F32 => "float",
        Ty::F64 => "double",
        Ty::Bool => "bool",
        Ty::Str => "const char *",
        Ty::Void => "void",
    }
}

/// C runtime entry point name for a builtin.
fn builtin_c_name(name: &str) -> String {
    match name {
        "formatOutput" => "ls_format_value".to_string(),
        _ => format!("ls_{}", name.replace('.', "_")),
    }
}

pub(super) fn escape_c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn expr_uses_state_speed(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Call { callee, args } => {
            callee == ".stateSpeed"
                || callee == "stateSpeed"
                || args.iter().any(expr_uses_state_speed)
        }
        ExprKind::Unary { operand, .. } => expr_uses_state_speed(operand),
        ExprKind::Binary { lhs, rhs, .. } => {
            expr_uses_state_speed(lhs) || expr_uses_state_speed(rhs)
        }
        _ => false,
    }
}

pub(super) fn block_uses_state_speed(body: &[Stmt]) -> bool {
    body.iter().any(|stmt| match &stmt.kind {
        StmtKind::Declare { init, .. } => expr_uses_state_speed(init),
        StmtKind::Assign { value, .. } => expr_uses_state_speed(value),
        StmtKind::Expr(e) => expr_uses_state_speed(e),
        StmtKind::Return(e) => e.as_ref().is_some_and(expr_uses_state_speed),
        StmtKind::If { arms, else_body } => {
            arms.iter()
                .any(|a| expr_uses_state_speed(&a.cond) || block_uses_state_speed(&a.body))
                || else_body.as_ref().is_some_and(|b| block_uses_state_speed(b))
        }
        StmtKind::While { cond, body } => {
            expr_uses_state_speed(cond) || block_uses_state_speed(body)
        }
        StmtKind::ForRange {
            start,
            stop,
            step,
            body,
            ..
        } => {
            expr_uses_state_speed(start)
                || expr_uses_state_speed(stop)
                || step.as_ref().is_some_and(expr_uses_state_speed)
                || block_uses_state_speed(body)
        }
        StmtKind::FormatBlock { end_suffix, body } => {
            end_suffix.as_ref().is_some_and(expr_uses_state_speed)
                || block_uses_state_speed(body)
        }
        StmtKind::Break | StmtKind::Continue => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::Optimizer;
    use crate::parser::parse_source;
    use crate::typechecker::TypeChecker;

    pub(crate) fn generate(source: &str, mut options: EmitOptions) -> String {
        let mut program = parse_source(source).expect("parse");
        let mut checker = TypeChecker::new();
        checker.check_program(&mut program).expect("typecheck");
        options.superuser |= checker.superuser_mode();
        Optimizer::new(12).optimize(&mut program);
        CodeGen::new(options).generate(&program).expect("codegen")
    }

    fn r#gen(source: &str) -> String {
        generate(source, EmitOptions::default())
    }

    #[test]
    fn emits_main_wrapper_for_user_main() {
        let c = r#gen("fn main() -> i64 {\n  println(1)\n  return 0\n}\n");
        assert!(c.contains("static int64_t ls_main(void)"));
        assert!(c.contains("int main(int argc, char **argv)"));
        assert!(c.contains("return (int)ls_main();"));
    }

    #[test]
    fn synthesizes_script_main_for_top_level_statements() {
        let c = r#gen("println(1)\n");
        assert!(c.contains("__linescript_script_main"));
    }

    #[test]
    fn missing_entry_point_is_an_error() {
        let mut program = parse_source("fn a(x: i64) {\n}\n").unwrap();
        TypeChecker::new().check_program(&mut program).unwrap();
        let err = CodeGen::new(EmitOptions::default())
            .generate(&program)
            .unwrap_err();
        assert!(err.to_string().contains("no entry point"));
    }

    #[test]
    fn ambiguous_entry_point_is_an_error() {
        let mut program = parse_source("fn a() {\n}\nfn b() {\n}\n").unwrap();
        TypeChecker::new().check_program(&mut program).unwrap();
        let err = CodeGen::new(EmitOptions::default())
            .generate(&program)
            .unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn unique_zero_arg_function_is_the_entry() {
        let c = r#gen("fn start() {\n  println(1)\n}\n");
        assert!(c.contains("start();"));
    }

    #[test]
    fn flag_handlers_run_before_entry_in_driver_order() {
        let options = EmitOptions {
            active_flags: vec!["b-flag".to_string(), "a-flag".to_string()],
            ..EmitOptions::default()
        };
        let c = generate(
            "flag a-flag() {\n  println(1)\n}\nflag b-flag() {\n  println(2)\n}\nfn main() -> i64 {\n  return 0\n}\n",
            options,
        );
        let b_pos = c.find("__ls_flag_b_flag();").expect("b call");
        let a_pos = c.find("__ls_flag_a_flag();").expect("a call");
        let entry_pos = c.find("return (int)ls_main()").expect("entry");
        assert!(b_pos < a_pos && a_pos < entry_pos);
    }

    #[test]
    fn string_equality_uses_runtime_helper() {
        let c = r#gen("declare a = \"x\"\ndeclare b = \"y\"\nif a == b {\n  println(1)\n}\n");
        assert!(c.contains("ls_str_eq("));
    }

    #[test]
    fn power_emits_generic_helper() {
        let c = r#gen("declare x = cli_count() ** 2\n");
        assert!(c.contains("ls_pow("));
    }

    #[test]
    fn escape_c_string_handles_specials() {
        assert_eq!(escape_c_string("a\nb\"c\\"), "\"a\\nb\\\"c\\\\\"");
    }

    #[test]
    fn state_speed_captures_function_start() {
        let c = r#gen("fn main() -> i64 {\n  .stateSpeed()\n  return 0\n}\n");
        assert!(c.contains("int64_t __ls_fn_start_us = ls_clock_us();"));
        assert!(c.contains("ls_state_speed(__ls_fn_start_us)"));
    }

    #[test]
    fn spawn_passes_function_pointer() {
        let c = r#gen(
            "fn w() -> i64 {\n  return 1\n}\nfn main() -> i64 {\n  declare t = spawn(w())\n  return await(t)\n}\n",
        );
        assert!(c.contains("ls_spawn(w)"));
        assert!(c.contains("ls_await("));
    }

    #[test]
    fn su_calls_map_to_runtime_names() {
        let c = r#gen("superuser()\nprintln(su.step_count())\n");
        assert!(c.contains("ls_su_step_count()"));
    }

    #[test]
    fn ultra_minimal_unit_avoids_the_c_runtime() {
        let options = EmitOptions {
            target: "x86_64-pc-windows-msvc".to_string(),
            ..EmitOptions::default()
        };
        let c = generate("println(\"hello\")\nprintln(42)\n", options);
        assert!(c.contains("mainCRTStartup"));
        assert!(c.contains("static LS_ALWAYS_INLINE void __linescript_script_main(void)"));
        assert!(c.contains("ls_um_write(\"hello\\n\", 6);"));
        assert!(c.contains("ls_um_write(\"42\\n\", 3);"));
        assert!(!c.contains("fputs"));
        assert!(!c.contains("scratch"));
        assert!(!c.contains("int main("));
    }
}
