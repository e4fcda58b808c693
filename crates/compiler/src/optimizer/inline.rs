//! Single-return-statement function inlining
//!
//! A function is an inline candidate when it is non-extern, has at most
//! eight parameters, and its whole body is one non-recursive `return expr`.
//! Call sites substitute parameters by cloning argument ASTs; later passes
//! re-optimize the spliced expression.

use crate::ast::{Expr, ExprKind, Program, StmtKind};
use std::collections::HashMap;

const MAX_INLINE_PARAMS: usize = 8;

/// One inlinable function body.
#[derive(Debug, Clone)]
struct InlineCandidate {
    params: Vec<String>,
    body: Expr,
}

/// The set of inline candidates for one optimizer pass.
pub struct InlineSet {
    candidates: HashMap<String, InlineCandidate>,
}

impl InlineSet {
    pub fn build(program: &Program) -> Self {
        let mut candidates = HashMap::new();
        for func in &program.functions {
            if func.is_extern || func.params.len() > MAX_INLINE_PARAMS {
                continue;
            }
            let [stmt] = func.body.as_slice() else {
                continue;
            };
            let StmtKind::Return(Some(expr)) = &stmt.kind else {
                continue;
            };
            if calls_symbol(expr, &func.name) {
                continue; // recursive
            }
            candidates.insert(
                func.name.clone(),
                InlineCandidate {
                    params: func.params.iter().map(|p| p.name.clone()).collect(),
                    body: expr.clone(),
                },
            );
        }
        InlineSet { candidates }
    }

    /// Replace calls to candidates inside `expr`. Returns true on change.
    pub fn inline_calls(&self, expr: &mut Expr) -> bool {
        let mut changed = false;
        match &mut expr.kind {
            ExprKind::Unary { operand, .. } => changed |= self.inline_calls(operand),
            ExprKind::Binary { lhs, rhs, .. } => {
                changed |= self.inline_calls(lhs);
                changed |= self.inline_calls(rhs);
            }
            ExprKind::Call { callee, args } => {
                for arg in args.iter_mut() {
                    changed |= self.inline_calls(arg);
                }
                if let Some(candidate) = self.candidates.get(callee) {
                    if candidate.params.len() == args.len() {
                        let mut body = candidate.body.clone();
                        for (param, arg) in candidate.params.iter().zip(args.iter()) {
                            body = body.substitute(param, arg);
                        }
                        body.span = expr.span;
                        *expr = body;
                        return true;
                    }
                }
            }
            _ => {}
        }
        changed
    }
}

fn calls_symbol(expr: &Expr, symbol: &str) -> bool {
    match &expr.kind {
        ExprKind::Call { callee, args } => {
            callee == symbol || args.iter().any(|a| calls_symbol(a, symbol))
        }
        ExprKind::Unary { operand, .. } => calls_symbol(operand, symbol),
        ExprKind::Binary { lhs, rhs, .. } => {
            calls_symbol(lhs, symbol) || calls_symbol(rhs, symbol)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::Optimizer;
    use crate::parser::parse_source;
    use crate::typechecker::TypeChecker;

    fn optimized(source: &str) -> Program {
        let mut program = parse_source(source).expect("parse");
        TypeChecker::new()
            .check_program(&mut program)
            .expect("typecheck");
        Optimizer::new(12).optimize(&mut program);
        program
    }

    #[test]
    fn inlines_single_return_function() {
        let source = "fn double(x: i64) -> i64 {\n  return x * 2\n}\ndeclare y = double(21)\n";
        let program = optimized(source);
        match &program.top_level[0].kind {
            StmtKind::Declare { init, .. } => {
                // double(21) -> 21 * 2 -> 42 after folding
                assert_eq!(init.as_i64(), Some(42));
            }
            other => panic!("expected declare, got {:?}", other),
        }
    }

    #[test]
    fn recursive_function_is_not_inlined() {
        let source =
            "fn r(x: i64) -> i64 {\n  return r(x)\n}\ndeclare y = r(1)\n";
        let program = optimized(source);
        match &program.top_level[0].kind {
            StmtKind::Declare { init, .. } => {
                assert!(matches!(
                    &init.kind,
                    ExprKind::Call { callee, .. } if callee == "r"
                ));
            }
            other => panic!("expected declare, got {:?}", other),
        }
    }

    #[test]
    fn multi_statement_body_is_not_inlined() {
        let source = "fn f(x: i64) -> i64 {\n  declare t = x + 1\n  return t\n}\ndeclare y = f(1)\n";
        let program = optimized(source);
        match &program.top_level[0].kind {
            StmtKind::Declare { init, .. } => {
                assert!(matches!(&init.kind, ExprKind::Call { .. }));
            }
            other => panic!("expected declare, got {:?}", other),
        }
    }

    #[test]
    fn arguments_are_cloned_per_site() {
        let source = "fn id(x: i64) -> i64 {\n  return x\n}\ndeclare a = id(1)\ndeclare b = id(2)\n";
        let program = optimized(source);
        match (&program.top_level[0].kind, &program.top_level[1].kind) {
            (
                StmtKind::Declare { init: a, .. },
                StmtKind::Declare { init: b, .. },
            ) => {
                assert_eq!(a.as_i64(), Some(1));
                assert_eq!(b.as_i64(), Some(2));
            }
            other => panic!("expected declares, got {:?}", other),
        }
    }
}
