//! Constant folding and algebraic identities
//!
//! Integer arithmetic folds through 128-bit intermediates; a result that
//! does not fit in i64 abandons that fold. Float arithmetic folds in
//! double. Power with a non-negative integer exponent folds via repeated
//! squaring. Operators carrying an override symbol are never folded.

use crate::ast::{BinOp, Expr, ExprKind, Span, Ty, UnOp};
use crate::optimizer::expr_is_pure;

/// Fold an expression tree bottom-up. Returns true when anything changed.
pub fn fold_expr(expr: &mut Expr) -> bool {
    let mut changed = false;
    match &mut expr.kind {
        ExprKind::Unary { operand, .. } => changed |= fold_expr(operand),
        ExprKind::Binary { lhs, rhs, .. } => {
            changed |= fold_expr(lhs);
            changed |= fold_expr(rhs);
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                changed |= fold_expr(arg);
            }
        }
        _ => {}
    }

    if let Some(folded) = fold_node(expr) {
        *expr = folded;
        return true;
    }
    changed
}

fn int_expr(value: i64, span: Span) -> Expr {
    let mut e = Expr::int(value, span);
    e.ty = Ty::I64;
    e.typed = true;
    e
}

fn float_expr(value: f64, span: Span) -> Expr {
    let mut e = Expr::new(ExprKind::Float(value), span);
    e.ty = Ty::F64;
    e.typed = true;
    e
}

fn bool_expr(value: bool, span: Span) -> Expr {
    let mut e = Expr::new(ExprKind::Bool(value), span);
    e.ty = Ty::Bool;
    e.typed = true;
    e
}

fn fold_node(expr: &Expr) -> Option<Expr> {
    let span = expr.span;
    match &expr.kind {
        ExprKind::Unary {
            op,
            operand,
            override_fn: None,
        } => match (op, &operand.kind) {
            (UnOp::Neg, ExprKind::Int(v)) => {
                let negated = (*v as i128).checked_neg()?;
                Some(int_expr(i64::try_from(negated).ok()?, span))
            }
            (UnOp::Neg, ExprKind::Float(v)) => Some(float_expr(-v, span)),
            (UnOp::Not, ExprKind::Bool(v)) => Some(bool_expr(!v, span)),
            _ => None,
        },
        ExprKind::Binary {
            op,
            lhs,
            rhs,
            override_fn: None,
        } => fold_binary(*op, lhs, rhs, span),
        _ => None,
    }
}

fn fold_binary(op: BinOp, lhs: &Expr, rhs: &Expr, span: Span) -> Option<Expr> {
    // Literal-literal folds.
    if let (ExprKind::Int(a), ExprKind::Int(b)) = (&lhs.kind, &rhs.kind) {
        if let Some(folded) = fold_int(op, *a, *b, span) {
            return Some(folded);
        }
    }
    if let (ExprKind::Float(a), ExprKind::Float(b)) = (&lhs.kind, &rhs.kind) {
        if let Some(folded) = fold_float(op, *a, *b, span) {
            return Some(folded);
        }
    }
    if let (ExprKind::Bool(a), ExprKind::Bool(b)) = (&lhs.kind, &rhs.kind) {
        match op {
            BinOp::And => return Some(bool_expr(*a && *b, span)),
            BinOp::Or => return Some(bool_expr(*a || *b, span)),
            BinOp::Eq => return Some(bool_expr(a == b, span)),
            BinOp::Ne => return Some(bool_expr(a != b, span)),
            _ => {}
        }
    }
    if let (ExprKind::Str(a), ExprKind::Str(b)) = (&lhs.kind, &rhs.kind) {
        match op {
            BinOp::Eq => return Some(bool_expr(a == b, span)),
            BinOp::Ne => return Some(bool_expr(a != b, span)),
            _ => {}
        }
    }

    // Short-circuit specialization with one literal side.
    if op.is_logical() {
        if let ExprKind::Bool(a) = &lhs.kind {
            return Some(match (op, a) {
                (BinOp::And, true) | (BinOp::Or, false) => rhs.clone(),
                (BinOp::And, false) => bool_expr(false, span),
                (BinOp::Or, true) => bool_expr(true, span),
                _ => unreachable!(),
            });
        }
        if let ExprKind::Bool(b) = &rhs.kind {
            match (op, b) {
                // The left side still evaluates; dropping it is only safe
                // when it is pure.
                (BinOp::And, true) | (BinOp::Or, false) => return Some(lhs.clone()),
                (BinOp::And, false) if expr_is_pure(lhs) => {
                    return Some(bool_expr(false, span));
                }
                (BinOp::Or, true) if expr_is_pure(lhs) => {
                    return Some(bool_expr(true, span));
                }
                _ => {}
            }
        }
    }

    // Algebraic identities.
    match op {
        BinOp::Add => {
            if rhs.as_i64() == Some(0) || matches!(rhs.kind, ExprKind::Float(f) if f == 0.0) {
                return Some(lhs.clone());
            }
            if lhs.as_i64() == Some(0) || matches!(lhs.kind, ExprKind::Float(f) if f == 0.0) {
                return Some(rhs.clone());
            }
        }
        BinOp::Sub => {
            if rhs.as_i64() == Some(0) {
                return Some(lhs.clone());
            }
            // x - x on i64 variables.
            if let (ExprKind::Var(a), ExprKind::Var(b)) = (&lhs.kind, &rhs.kind) {
                if a == b && lhs.ty == Ty::I64 && lhs.typed {
                    return Some(int_expr(0, span));
                }
            }
        }
        BinOp::Mul => {
            if rhs.as_i64() == Some(1) {
                return Some(lhs.clone());
            }
            if lhs.as_i64() == Some(1) {
                return Some(rhs.clone());
            }
        }
        BinOp::Div => {
            if rhs.as_i64() == Some(1) {
                return Some(lhs.clone());
            }
        }
        BinOp::Pow => {
            if rhs.as_i64() == Some(1) {
                return Some(lhs.clone());
            }
        }
        _ => {}
    }

    None
}

fn fold_int(op: BinOp, a: i64, b: i64, span: Span) -> Option<Expr> {
    let wide_a = a as i128;
    let wide_b = b as i128;
    let result: i128 = match op {
        BinOp::Add => wide_a.checked_add(wide_b)?,
        BinOp::Sub => wide_a.checked_sub(wide_b)?,
        BinOp::Mul => wide_a.checked_mul(wide_b)?,
        BinOp::Div => {
            if b == 0 {
                return None;
            }
            wide_a.checked_div(wide_b)?
        }
        BinOp::Mod => {
            if b == 0 {
                return None;
            }
            wide_a.checked_rem(wide_b)?
        }
        BinOp::Pow => pow_i128(wide_a, b)?,
        BinOp::Eq => return Some(bool_expr(a == b, span)),
        BinOp::Ne => return Some(bool_expr(a != b, span)),
        BinOp::Lt => return Some(bool_expr(a < b, span)),
        BinOp::Le => return Some(bool_expr(a <= b, span)),
        BinOp::Gt => return Some(bool_expr(a > b, span)),
        BinOp::Ge => return Some(bool_expr(a >= b, span)),
        BinOp::And | BinOp::Or => return None,
    };
    Some(int_expr(i64::try_from(result).ok()?, span))
}

/// Repeated squaring with overflow checks; negative exponents abandon the
/// fold.
fn pow_i128(base: i128, exp: i64) -> Option<i128> {
    if exp < 0 {
        return None;
    }
    let mut result: i128 = 1;
    let mut base = base;
    let mut exp = exp as u64;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result.checked_mul(base)?;
        }
        exp >>= 1;
        if exp > 0 {
            base = base.checked_mul(base)?;
        }
    }
    Some(result)
}

fn fold_float(op: BinOp, a: f64, b: f64, span: Span) -> Option<Expr> {
    match op {
        BinOp::Add => Some(float_expr(a + b, span)),
        BinOp::Sub => Some(float_expr(a - b, span)),
        BinOp::Mul => Some(float_expr(a * b, span)),
        BinOp::Div => Some(float_expr(a / b, span)),
        BinOp::Eq => Some(bool_expr(a == b, span)),
        BinOp::Ne => Some(bool_expr(a != b, span)),
        BinOp::Lt => Some(bool_expr(a < b, span)),
        BinOp::Le => Some(bool_expr(a <= b, span)),
        BinOp::Gt => Some(bool_expr(a > b, span)),
        BinOp::Ge => Some(bool_expr(a >= b, span)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp() -> Span {
        Span::new(1, 1)
    }

    fn fold(mut expr: Expr) -> Expr {
        fold_expr(&mut expr);
        expr
    }

    #[test]
    fn folds_integer_arithmetic() {
        let e = fold(Expr::binary(
            BinOp::Add,
            Expr::int(2, sp()),
            Expr::int(3, sp()),
            sp(),
        ));
        assert_eq!(e.as_i64(), Some(5));
    }

    #[test]
    fn folds_nested_expressions() {
        // (2 + 3) * (4 - 1)
        let e = fold(Expr::binary(
            BinOp::Mul,
            Expr::binary(BinOp::Add, Expr::int(2, sp()), Expr::int(3, sp()), sp()),
            Expr::binary(BinOp::Sub, Expr::int(4, sp()), Expr::int(1, sp()), sp()),
            sp(),
        ));
        assert_eq!(e.as_i64(), Some(15));
    }

    #[test]
    fn overflow_abandons_the_fold() {
        let e = fold(Expr::binary(
            BinOp::Mul,
            Expr::int(i64::MAX, sp()),
            Expr::int(2, sp()),
            sp(),
        ));
        assert!(matches!(e.kind, ExprKind::Binary { .. }));
    }

    #[test]
    fn power_folds_by_repeated_squaring() {
        let e = fold(Expr::binary(
            BinOp::Pow,
            Expr::int(2, sp()),
            Expr::int(62, sp()),
            sp(),
        ));
        assert_eq!(e.as_i64(), Some(1 << 62));
    }

    #[test]
    fn negative_exponent_is_not_folded() {
        let e = fold(Expr::binary(
            BinOp::Pow,
            Expr::int(2, sp()),
            Expr::int(-1, sp()),
            sp(),
        ));
        assert!(matches!(e.kind, ExprKind::Binary { .. }));
    }

    #[test]
    fn division_by_zero_is_not_folded() {
        let e = fold(Expr::binary(
            BinOp::Div,
            Expr::int(1, sp()),
            Expr::int(0, sp()),
            sp(),
        ));
        assert!(matches!(e.kind, ExprKind::Binary { .. }));
    }

    #[test]
    fn identity_add_zero() {
        let e = fold(Expr::binary(
            BinOp::Add,
            Expr::var("x", sp()),
            Expr::int(0, sp()),
            sp(),
        ));
        assert_eq!(e.as_var(), Some("x"));
    }

    #[test]
    fn identity_x_minus_x_requires_i64() {
        let mut lhs = Expr::var("x", sp());
        lhs.ty = Ty::I64;
        lhs.typed = true;
        let mut rhs = Expr::var("x", sp());
        rhs.ty = Ty::I64;
        rhs.typed = true;
        let e = fold(Expr::binary(BinOp::Sub, lhs, rhs, sp()));
        assert_eq!(e.as_i64(), Some(0));

        // Untyped (or non-i64) variables stay put.
        let e = fold(Expr::binary(
            BinOp::Sub,
            Expr::var("y", sp()),
            Expr::var("y", sp()),
            sp(),
        ));
        assert!(matches!(e.kind, ExprKind::Binary { .. }));
    }

    #[test]
    fn short_circuit_with_literal_lhs() {
        let e = fold(Expr::binary(
            BinOp::And,
            Expr::new(ExprKind::Bool(false), sp()),
            Expr::var("x", sp()),
            sp(),
        ));
        assert_eq!(e.as_bool(), Some(false));

        let e = fold(Expr::binary(
            BinOp::Or,
            Expr::new(ExprKind::Bool(false), sp()),
            Expr::var("x", sp()),
            sp(),
        ));
        assert_eq!(e.as_var(), Some("x"));
    }

    #[test]
    fn short_circuit_keeps_effectful_lhs() {
        // f() && false cannot drop the call.
        let e = fold(Expr::binary(
            BinOp::And,
            Expr::call("f", vec![], sp()),
            Expr::new(ExprKind::Bool(false), sp()),
            sp(),
        ));
        assert!(matches!(e.kind, ExprKind::Binary { .. }));
    }

    #[test]
    fn folds_comparisons() {
        let e = fold(Expr::binary(
            BinOp::Lt,
            Expr::int(1, sp()),
            Expr::int(2, sp()),
            sp(),
        ));
        assert_eq!(e.as_bool(), Some(true));
    }

    #[test]
    fn folds_string_equality() {
        let e = fold(Expr::binary(
            BinOp::Eq,
            Expr::new(ExprKind::Str("a".into()), sp()),
            Expr::new(ExprKind::Str("a".into()), sp()),
            sp(),
        ));
        assert_eq!(e.as_bool(), Some(true));
    }

    #[test]
    fn override_suppresses_folding() {
        let mut e = Expr::binary(BinOp::Add, Expr::int(1, sp()), Expr::int(2, sp()), sp());
        if let ExprKind::Binary { override_fn, .. } = &mut e.kind {
            *override_fn = Some("__ls_op_add".to_string());
        }
        let e = fold(e);
        assert!(matches!(e.kind, ExprKind::Binary { .. }));
    }

    #[test]
    fn float_arithmetic_folds_in_double() {
        let e = fold(Expr::binary(
            BinOp::Mul,
            Expr::new(ExprKind::Float(1.5), sp()),
            Expr::new(ExprKind::Float(2.0), sp()),
            sp(),
        ));
        assert!(matches!(e.kind, ExprKind::Float(v) if v == 3.0));
    }
}
