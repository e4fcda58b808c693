//! Straight-line i64 constant propagation
//!
//! Within one block, a map from variable to last-known literal i64 is
//! maintained until the first control-flow statement, which resets it.
//! Reads of known variables fold to literals, and a `print`/`println` whose
//! argument has become a constant i64 is rewritten to `print_str`/
//! `println_str` on the decimal form.

use crate::ast::{Expr, ExprKind, Stmt, StmtKind, Ty};
use crate::optimizer::{ConstEnv, fold};

/// The literal-i64 environment in effect after a statement prefix. Used by
/// loop analysis to resolve bounds through const-like bindings.
pub fn const_env_before(prefix: &[Stmt]) -> ConstEnv {
    let mut env = ConstEnv::new();
    for stmt in prefix {
        apply_stmt(&mut env, stmt);
    }
    env
}

fn apply_stmt(env: &mut ConstEnv, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::Declare { name, init, owned: false, .. } => {
            match init.as_i64() {
                Some(v) => {
                    env.insert(name.clone(), v);
                }
                None => {
                    env.remove(name);
                }
            }
        }
        StmtKind::Declare { name, .. } => {
            env.remove(name);
        }
        StmtKind::Assign { name, value } => match value.as_i64() {
            Some(v) => {
                env.insert(name.clone(), v);
            }
            None => {
                env.remove(name);
            }
        },
        StmtKind::Expr(_) | StmtKind::Return(_) => {}
        // Control flow invalidates everything written inside it; resetting
        // the whole map keeps the analysis simple and safe.
        _ => env.clear(),
    }
}

/// Run constant propagation over one block. Returns true on change.
pub fn propagate_block(block: &mut [Stmt]) -> bool {
    let mut env = ConstEnv::new();
    let mut changed = false;

    for stmt in block.iter_mut() {
        match &mut stmt.kind {
            StmtKind::Declare { init, .. } => {
                changed |= substitute_consts(init, &env);
            }
            StmtKind::Assign { value, .. } => {
                changed |= substitute_consts(value, &env);
            }
            StmtKind::Expr(expr) => {
                changed |= substitute_consts(expr, &env);
                changed |= rewrite_constant_print(expr);
            }
            StmtKind::Return(Some(expr)) => {
                changed |= substitute_consts(expr, &env);
            }
            _ => {}
        }
        apply_stmt(&mut env, stmt);
    }
    changed
}

/// Replace reads of known variables with literals, then re-fold.
fn substitute_consts(expr: &mut Expr, env: &ConstEnv) -> bool {
    if env.is_empty() {
        return false;
    }
    let mut changed = replace_vars(expr, env);
    if changed {
        fold::fold_expr(expr);
    }
    changed
}

fn replace_vars(expr: &mut Expr, env: &ConstEnv) -> bool {
    match &mut expr.kind {
        ExprKind::Var(name) => {
            if let Some(value) = env.get(name) {
                expr.kind = ExprKind::Int(*value);
                expr.ty = Ty::I64;
                expr.typed = true;
                return true;
            }
            false
        }
        ExprKind::Unary { operand, .. } => replace_vars(operand, env),
        ExprKind::Binary { lhs, rhs, .. } => {
            let a = replace_vars(lhs, env);
            let b = replace_vars(rhs, env);
            a || b
        }
        ExprKind::Call { args, .. } => {
            let mut changed = false;
            for arg in args {
                changed |= replace_vars(arg, env);
            }
            changed
        }
        _ => false,
    }
}

/// `println(42)` (constant i64) becomes `println_str("42")`.
fn rewrite_constant_print(expr: &mut Expr) -> bool {
    let ExprKind::Call { callee, args } = &mut expr.kind else {
        return false;
    };
    if callee.as_str() != "print" && callee.as_str() != "println" {
        return false;
    }
    let [arg] = args.as_mut_slice() else {
        return false;
    };
    let Some(value) = arg.as_i64() else {
        return false;
    };
    if arg.typed && arg.ty != Ty::I64 {
        return false;
    }
    *callee = format!("{}_str", callee);
    let mut text = Expr::new(ExprKind::Str(value.to_string()), arg.span);
    text.ty = Ty::Str;
    text.typed = true;
    *arg = text;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn propagate(source: &str) -> Vec<Stmt> {
        let mut program = parse_source(source).expect("parse");
        propagate_block(&mut program.top_level);
        program.top_level
    }

    #[test]
    fn propagates_through_straight_line_code() {
        let block = propagate("declare x = 2\ndeclare y = x + 3\n");
        match &block[1].kind {
            StmtKind::Declare { init, .. } => assert_eq!(init.as_i64(), Some(5)),
            other => panic!("expected declare, got {:?}", other),
        }
    }

    #[test]
    fn assignment_updates_the_environment() {
        let block = propagate("declare x = 2\nx = 7\ndeclare y = x\n");
        match &block[2].kind {
            StmtKind::Declare { init, .. } => assert_eq!(init.as_i64(), Some(7)),
            other => panic!("expected declare, got {:?}", other),
        }
    }

    #[test]
    fn non_literal_assignment_invalidates() {
        let block = propagate("declare x = 2\nx = cli_count()\ndeclare y = x\n");
        match &block[2].kind {
            StmtKind::Declare { init, .. } => assert_eq!(init.as_var(), Some("x")),
            other => panic!("expected declare, got {:?}", other),
        }
    }

    #[test]
    fn control_flow_resets_the_map() {
        let block = propagate(
            "declare x = 2\nwhile cli_has(\"go\") {\n  x = 3\n}\ndeclare y = x\n",
        );
        match &block[2].kind {
            StmtKind::Declare { init, .. } => assert_eq!(init.as_var(), Some("x")),
            other => panic!("expected declare, got {:?}", other),
        }
    }

    #[test]
    fn constant_print_rewrites_to_print_str() {
        let block = propagate("declare x = 41\nprintln(x + 1)\n");
        match &block[1].kind {
            StmtKind::Expr(e) => match &e.kind {
                ExprKind::Call { callee, args } => {
                    assert_eq!(callee, "println_str");
                    assert!(matches!(&args[0].kind, ExprKind::Str(s) if s == "42"));
                }
                other => panic!("expected call, got {:?}", other),
            },
            other => panic!("expected expr, got {:?}", other),
        }
    }

    #[test]
    fn env_before_tracks_const_bindings() {
        let program = parse_source("declare const n = 10\ndeclare s = 0\n").unwrap();
        let env = const_env_before(&program.top_level);
        assert_eq!(env.get("n"), Some(&10));
        assert_eq!(env.get("s"), Some(&0));
    }

    #[test]
    fn env_before_drops_reassigned_names() {
        let program =
            parse_source("declare n = 10\nn = cli_count()\n").unwrap();
        let env = const_env_before(&program.top_level);
        assert!(!env.contains_key("n"));
    }
}
