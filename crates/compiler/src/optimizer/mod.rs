//! AST-to-AST optimizer
//!
//! A fixpoint driver over a set of semantics-preserving rewrites. Each pass
//! walks every function body and the top-level block; the driver stops as
//! soon as a pass reports no change, or when the pass budget is exhausted.
//!
//! Rules live in focused submodules:
//! - `fold`: constant folding (128-bit intermediates) and algebraic
//!   identities
//! - `inline`: single-return-statement function inlining
//! - `loops`: trip-count analysis, small-loop unrolling, and closed-form
//!   reduction folding
//! - `propagate`: straight-line i64 constant propagation and the
//!   constant-print rewrite
//! - `dead`: unreachable-code removal, literal-branch collapse, and
//!   dead-store pruning

mod dead;
mod fold;
mod inline;
mod loops;
mod propagate;

pub use loops::{LoopBounds, LoopShape, PolyAccum, analyze_loop, resolve_bounds, trip_count};

use crate::ast::{Expr, ExprKind, Program, Stmt, StmtKind};
use inline::InlineSet;
use std::collections::HashMap;

/// Default optimizer pass budget.
pub const DEFAULT_PASSES: u32 = 12;
/// Pass budget under max-speed.
pub const MAX_SPEED_PASSES: u32 = 32;

pub struct Optimizer {
    passes: u32,
}

impl Optimizer {
    pub fn new(passes: u32) -> Self {
        Optimizer { passes }
    }

    /// Run passes to fixpoint (or budget). Returns the number of passes run.
    pub fn optimize(&self, program: &mut Program) -> u32 {
        for pass in 0..self.passes {
            if !self.run_pass(program) {
                return pass + 1;
            }
        }
        self.passes
    }

    fn run_pass(&self, program: &mut Program) -> bool {
        let inline_set = InlineSet::build(program);
        let mut changed = false;
        let mut functions = std::mem::take(&mut program.functions);
        for func in &mut functions {
            if func.is_extern {
                continue;
            }
            changed |= optimize_block(&mut func.body, &inline_set, false);
        }
        program.functions = functions;
        changed |= optimize_block(&mut program.top_level, &inline_set, false);
        changed
    }
}

/// Optimize one block in place. `in_loop` suppresses dead-store pruning,
/// which is only valid outside loop bodies.
fn optimize_block(block: &mut Vec<Stmt>, inline_set: &InlineSet, in_loop: bool) -> bool {
    let mut changed = false;

    // Per-statement rewrites, including recursion into nested blocks.
    let mut idx = 0;
    while idx < block.len() {
        // Literal bounds for loop analysis come from the constant
        // environment accumulated over the statements before the loop.
        let env = propagate::const_env_before(&block[..idx]);
        let stmt = &mut block[idx];
        changed |= optimize_stmt_exprs(stmt, inline_set);

        match &mut stmt.kind {
            StmtKind::If { arms, else_body } => {
                for arm in arms.iter_mut() {
                    changed |= optimize_block(&mut arm.body, inline_set, in_loop);
                }
                if let Some(body) = else_body {
                    changed |= optimize_block(body, inline_set, in_loop);
                }
            }
            StmtKind::While { body, .. } => {
                changed |= optimize_block(body, inline_set, true);
            }
            StmtKind::FormatBlock { body, .. } => {
                changed |= optimize_block(body, inline_set, in_loop);
            }
            StmtKind::ForRange { body, .. } => {
                changed |= optimize_block(body, inline_set, true);
            }
            _ => {}
        }

        // For-loop analysis: deletion, unrolling, closed-form reductions.
        if matches!(block[idx].kind, StmtKind::ForRange { .. }) {
            if let Some(replacement) = loops::rewrite_for(&block[idx], &env) {
                block.splice(idx..=idx, replacement);
                changed = true;
                continue; // re-visit the spliced statements
            }
        }
        idx += 1;
    }

    // Block-level rewrites.
    changed |= dead::erase_after_terminator(block);
    changed |= dead::collapse_literal_branches(block);
    changed |= propagate::propagate_block(block);
    if !in_loop {
        changed |= dead::prune_dead_stores(block);
    }

    changed
}

/// Fold and inline every expression held by one statement.
fn optimize_stmt_exprs(stmt: &mut Stmt, inline_set: &InlineSet) -> bool {
    let mut changed = false;
    for expr in stmt_exprs_mut(stmt) {
        changed |= inline_set.inline_calls(expr);
        changed |= fold::fold_expr(expr);
    }
    changed
}

/// The expressions directly held by a statement (not those in nested
/// blocks, which are visited through block recursion).
fn stmt_exprs_mut(stmt: &mut Stmt) -> Vec<&mut Expr> {
    match &mut stmt.kind {
        StmtKind::Declare { init, .. } => vec![init],
        StmtKind::Assign { value, .. } => vec![value],
        StmtKind::Expr(e) => vec![e],
        StmtKind::Return(Some(e)) => vec![e],
        StmtKind::Return(None) => vec![],
        StmtKind::If { arms, .. } => arms.iter_mut().map(|a| &mut a.cond).collect(),
        StmtKind::While { cond, .. } => vec![cond],
        StmtKind::ForRange {
            start, stop, step, ..
        } => {
            let mut v = vec![start, stop];
            if let Some(s) = step {
                v.push(s);
            }
            v
        }
        StmtKind::FormatBlock { end_suffix, .. } => {
            end_suffix.as_mut().map(|e| vec![e]).unwrap_or_default()
        }
        StmtKind::Break | StmtKind::Continue => vec![],
    }
}

/// Side-effect analysis shared by the dead-store and propagation passes.
///
/// Division, modulo, power, calls, and any operator carrying an override are
/// treated as side-effecting.
pub(crate) fn expr_is_pure(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Bool(_) | ExprKind::Str(_) => true,
        ExprKind::Var(_) => true,
        ExprKind::Unary {
            operand,
            override_fn,
            ..
        } => override_fn.is_none() && expr_is_pure(operand),
        ExprKind::Binary {
            op,
            lhs,
            rhs,
            override_fn,
        } => {
            use crate::ast::BinOp;
            override_fn.is_none()
                && !matches!(op, BinOp::Div | BinOp::Mod | BinOp::Pow)
                && expr_is_pure(lhs)
                && expr_is_pure(rhs)
        }
        ExprKind::Call { .. } => false,
    }
}

/// Literal i64 environment used for loop-bound resolution.
pub(crate) type ConstEnv = HashMap<String, i64>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::typechecker::TypeChecker;

    fn optimized(source: &str, passes: u32) -> Program {
        let mut program = parse_source(source).expect("parse");
        TypeChecker::new()
            .check_program(&mut program)
            .expect("typecheck");
        Optimizer::new(passes).optimize(&mut program);
        program
    }

    #[test]
    fn fixpoint_terminates_early() {
        let mut program = parse_source("declare x = 1\n").unwrap();
        TypeChecker::new().check_program(&mut program).unwrap();
        let passes = Optimizer::new(12).optimize(&mut program);
        assert!(passes < 12);
    }

    #[test]
    fn deterministic_output() {
        let source = "declare s = 0\nfor i in 0..100 {\n  s = s + i * 2 + 1\n}\nprintln(s)\n";
        let a = optimized(source, 12);
        let b = optimized(source, 12);
        assert_eq!(a, b);
    }

    #[test]
    fn purity_analysis_rejects_division() {
        let mut program = parse_source("declare x = a / b\n").unwrap();
        let _ = &mut program;
        match &program.top_level[0].kind {
            StmtKind::Declare { init, .. } => assert!(!expr_is_pure(init)),
            other => panic!("expected declare, got {:?}", other),
        }
    }

    #[test]
    fn purity_analysis_accepts_arithmetic() {
        let program = parse_source("declare x = a + b * 3\n").unwrap();
        match &program.top_level[0].kind {
            StmtKind::Declare { init, .. } => assert!(expr_is_pure(init)),
            other => panic!("expected declare, got {:?}", other),
        }
    }
}
