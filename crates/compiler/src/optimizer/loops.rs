//! For-loop analysis: trip counts, unrolling, closed-form reductions
//!
//! Bounds resolve from literals or from a local binding with a literal
//! initializer that is provably unassigned before the loop (the caller
//! supplies that environment). From the trip count the loop is deleted,
//! fully unrolled (1-8 trips), or matched against the reduction shapes:
//!
//! - polynomial accumulators of degree <= 2 (affine is the degree-1 case),
//!   one to four independent accumulators per body
//! - pair-coupled: `acc += state; state += a*i + b`
//! - modular-linear: `x += (a*i + b) % m`, summed with the floor-sum
//!   identity (cycle enumeration is unnecessary here; the identity covers
//!   every literal-bounds case, with sign splitting for truncated division)
//! - alternating-sign: `if i % 2 == 0 { x += i } else { x -= i }`
//!
//! All closed forms are computed in 128-bit arithmetic; a result that does
//! not fit in i64 abandons the fold and leaves the loop in place.

use crate::ast::{BinOp, Expr, ExprKind, Span, Stmt, StmtKind, Ty, UnOp};
use crate::optimizer::ConstEnv;

/// Resolved literal loop bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopBounds {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

/// A recognized reduction body shape.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopShape {
    /// Independent accumulators `x += a2*i^2 + a1*i + a0` (1-4 of them).
    Poly(Vec<PolyAccum>),
    /// `acc += state; state += a*i + b`.
    PairCoupled {
        acc: String,
        state: String,
        a: i128,
        b: i128,
    },
    /// `x += (a*i + b) % m` with literal `m > 0`.
    ModLinear {
        target: String,
        a: i128,
        b: i128,
        m: i128,
    },
    /// `if i % 2 == 0 { x += i } else { x -= i }` (or the mirrored shape).
    Alternating { target: String, even_adds: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolyAccum {
    pub target: String,
    pub a2: i128,
    pub a1: i128,
    pub a0: i128,
}

/// Iterations of `for v in start..stop step s`; `None` for a zero step.
pub fn trip_count(start: i64, stop: i64, step: i64) -> Option<i128> {
    if step == 0 {
        return None;
    }
    let start = start as i128;
    let stop = stop as i128;
    let step = step as i128;
    let count = if step > 0 {
        if start >= stop {
            0
        } else {
            (stop - start + step - 1) / step
        }
    } else if start <= stop {
        0
    } else {
        (start - stop + (-step) - 1) / (-step)
    };
    Some(count)
}

fn resolve_bound(expr: &Expr, env: &ConstEnv) -> Option<i64> {
    match &expr.kind {
        ExprKind::Int(v) => Some(*v),
        ExprKind::Var(name) => env.get(name).copied(),
        _ => None,
    }
}

/// Resolve literal bounds for a for-range statement.
pub fn resolve_bounds(stmt: &Stmt, env: &ConstEnv) -> Option<LoopBounds> {
    let StmtKind::ForRange {
        start, stop, step, ..
    } = &stmt.kind
    else {
        return None;
    };
    let start = resolve_bound(start, env)?;
    let stop = resolve_bound(stop, env)?;
    let step = match step {
        Some(s) => resolve_bound(s, env)?,
        None => 1,
    };
    Some(LoopBounds { start, stop, step })
}

/// Attempt to replace a for-range statement. Returns the replacement
/// statement list (possibly empty) or `None` to keep the loop.
pub fn rewrite_for(stmt: &Stmt, env: &ConstEnv) -> Option<Vec<Stmt>> {
    let bounds = resolve_bounds(stmt, env)?;
    let n = trip_count(bounds.start, bounds.stop, bounds.step)?;
    let StmtKind::ForRange { var, body, .. } = &stmt.kind else {
        return None;
    };
    let span = stmt.span;

    if n == 0 {
        return Some(Vec::new());
    }

    if (1..=8).contains(&n) && unrollable(body) {
        let mut out = Vec::new();
        for k in 0..n as i64 {
            let value = bounds.start.checked_add(k.checked_mul(bounds.step)?)?;
            let mut iter_value = Expr::int(value, span);
            iter_value.ty = Ty::I64;
            iter_value.typed = true;
            for s in body {
                out.push(s.substitute(var, &iter_value));
            }
        }
        return Some(out);
    }

    let shape = analyze_loop(var, body)?;
    fold_shape(&shape, bounds, n, span)
}

/// A body unrolls when it has no break/continue at this loop's level and
/// declares no bindings (clones would redeclare them).
fn unrollable(body: &[Stmt]) -> bool {
    fn has_decl_or_break(body: &[Stmt]) -> bool {
        body.iter().any(|stmt| match &stmt.kind {
            StmtKind::Declare { .. } => true,
            StmtKind::Break | StmtKind::Continue => true,
            StmtKind::If { arms, else_body } => {
                arms.iter().any(|a| has_decl_or_break(&a.body))
                    || else_body.as_ref().is_some_and(|b| has_decl_or_break(b))
            }
            StmtKind::FormatBlock { body, .. } => has_decl_or_break(body),
            // Nested loops bind their own break/continue but may declare.
            StmtKind::While { body, .. } | StmtKind::ForRange { body, .. } => {
                fn has_decl(body: &[Stmt]) -> bool {
                    body.iter().any(|s| match &s.kind {
                        StmtKind::Declare { .. } => true,
                        StmtKind::If { arms, else_body } => {
                            arms.iter().any(|a| has_decl(&a.body))
                                || else_body.as_ref().is_some_and(|b| has_decl(b))
                        }
                        StmtKind::While { body, .. }
                        | StmtKind::ForRange { body, .. }
                        | StmtKind::FormatBlock { body, .. } => has_decl(body),
                        _ => false,
                    })
                }
                has_decl(body)
            }
            _ => false,
        })
    }
    !has_decl_or_break(body)
}

// ----------------------------------------------------------------------
// Shape recognition
// ----------------------------------------------------------------------

/// Recognize a reduction body shape over loop variable `var`.
pub fn analyze_loop(var: &str, body: &[Stmt]) -> Option<LoopShape> {
    let body = eliminate_temp(var, body);
    let body: &[Stmt] = &body;

    // Alternating-sign: a single two-armed if on i % 2.
    if let [stmt] = body {
        if let Some(shape) = match_alternating(var, stmt) {
            return Some(shape);
        }
    }

    // Modular-linear: single accumulator over a residue term.
    if let [stmt] = body {
        if let Some(shape) = match_mod_linear(var, stmt) {
            return Some(shape);
        }
    }

    // Pair-coupled: acc += state; state += affine(i).
    if let [first, second] = body {
        if let Some(shape) = match_pair_coupled(var, first, second) {
            return Some(shape);
        }
    }

    // 1-4 independent polynomial accumulators.
    if body.is_empty() || body.len() > 4 {
        return None;
    }
    let mut accums: Vec<PolyAccum> = Vec::new();
    for stmt in body {
        let (target, addend) = match_accum(stmt)?;
        let poly = poly_of(&addend, var)?;
        accums.push(PolyAccum {
            target,
            a2: poly.0,
            a1: poly.1,
            a0: poly.2,
        });
    }
    // Accumulators must be pairwise distinct and independent: no addend may
    // read any accumulator.
    for (idx, accum) in accums.iter().enumerate() {
        if accums
            .iter()
            .enumerate()
            .any(|(j, other)| j != idx && other.target == accum.target)
        {
            return None;
        }
    }
    for stmt in body {
        let (_, addend) = match_accum(stmt)?;
        if accums.iter().any(|a| addend.mentions(&a.target)) {
            return None;
        }
    }
    Some(LoopShape::Poly(accums))
}

/// `declare tmp = g(i); x += tmp` canonicalizes to `x += g(i)`.
fn eliminate_temp(_var: &str, body: &[Stmt]) -> Vec<Stmt> {
    if let [first, second] = body {
        if let StmtKind::Declare {
            name,
            owned: false,
            init,
            ..
        } = &first.kind
        {
            if second.mentions(name) && !init.mentions(name) && !init.contains_call() {
                return vec![second.substitute(name, init)];
            }
        }
    }
    body.to_vec()
}

/// `x = x + g` / `x = g + x` / `x = x - g`; returns (target, signed addend).
fn match_accum(stmt: &Stmt) -> Option<(String, Expr)> {
    let StmtKind::Assign { name, value } = &stmt.kind else {
        return None;
    };
    let ExprKind::Binary {
        op,
        lhs,
        rhs,
        override_fn: None,
    } = &value.kind
    else {
        return None;
    };
    match op {
        BinOp::Add => {
            if lhs.as_var() == Some(name) {
                Some((name.clone(), (**rhs).clone()))
            } else if rhs.as_var() == Some(name) {
                Some((name.clone(), (**lhs).clone()))
            } else {
                None
            }
        }
        BinOp::Sub if lhs.as_var() == Some(name) => {
            let span = rhs.span;
            Some((
                name.clone(),
                Expr::new(
                    ExprKind::Unary {
                        op: UnOp::Neg,
                        operand: rhs.clone(),
                        override_fn: None,
                    },
                    span,
                ),
            ))
        }
        _ => None,
    }
}

/// Evaluate an expression as a polynomial `a2*i^2 + a1*i + a0` over the
/// loop variable. Rejects calls, operator overrides, non-Neg unaries, and
/// any other variable.
fn poly_of(expr: &Expr, var: &str) -> Option<(i128, i128, i128)> {
    match &expr.kind {
        ExprKind::Int(c) => Some((0, 0, *c as i128)),
        ExprKind::Var(name) if name == var => Some((0, 1, 0)),
        ExprKind::Var(_) => None,
        ExprKind::Unary {
            op: UnOp::Neg,
            operand,
            override_fn: None,
        } => {
            let (a2, a1, a0) = poly_of(operand, var)?;
            Some((a2.checked_neg()?, a1.checked_neg()?, a0.checked_neg()?))
        }
        ExprKind::Binary {
            op,
            lhs,
            rhs,
            override_fn: None,
        } => {
            let l = poly_of(lhs, var)?;
            let r = poly_of(rhs, var)?;
            match op {
                BinOp::Add => Some((
                    l.0.checked_add(r.0)?,
                    l.1.checked_add(r.1)?,
                    l.2.checked_add(r.2)?,
                )),
                BinOp::Sub => Some((
                    l.0.checked_sub(r.0)?,
                    l.1.checked_sub(r.1)?,
                    l.2.checked_sub(r.2)?,
                )),
                BinOp::Mul => {
                    // Degree sum must stay <= 2.
                    let a2 = l.0.checked_mul(r.2)?
                        .checked_add(l.2.checked_mul(r.0)?)?
                        .checked_add(l.1.checked_mul(r.1)?)?;
                    let cubic = l.0 != 0 && (r.0 != 0 || r.1 != 0) || l.1 != 0 && r.0 != 0;
                    if cubic {
                        return None;
                    }
                    let a1 = l.1.checked_mul(r.2)?.checked_add(l.2.checked_mul(r.1)?)?;
                    let a0 = l.2.checked_mul(r.2)?;
                    Some((a2, a1, a0))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Affine restriction of `poly_of`.
fn affine_of(expr: &Expr, var: &str) -> Option<(i128, i128)> {
    let (a2, a1, a0) = poly_of(expr, var)?;
    if a2 != 0 {
        return None;
    }
    Some((a1, a0))
}

fn match_pair_coupled(var: &str, first: &Stmt, second: &Stmt) -> Option<LoopShape> {
    let (acc, addend) = match_accum(first)?;
    let state = addend.as_var()?.to_string();
    if state == acc {
        return None;
    }
    let (state_target, state_addend) = match_accum(second)?;
    if state_target != state {
        return None;
    }
    if state_addend.mentions(&acc) || state_addend.mentions(&state) {
        return None;
    }
    let (a, b) = affine_of(&state_addend, var)?;
    Some(LoopShape::PairCoupled { acc, state, a, b })
}

fn match_mod_linear(var: &str, stmt: &Stmt) -> Option<LoopShape> {
    let (target, addend) = match_accum(stmt)?;
    let ExprKind::Binary {
        op: BinOp::Mod,
        lhs,
        rhs,
        override_fn: None,
    } = &addend.kind
    else {
        return None;
    };
    let m = rhs.as_i64()? as i128;
    if m <= 0 {
        return None;
    }
    let (a, b) = affine_of(lhs, var)?;
    if lhs.mentions(&target) {
        return None;
    }
    Some(LoopShape::ModLinear { target, a, b, m })
}

fn match_alternating(var: &str, stmt: &Stmt) -> Option<LoopShape> {
    let StmtKind::If { arms, else_body } = &stmt.kind else {
        return None;
    };
    let [arm] = arms.as_slice() else {
        return None;
    };
    let else_body = else_body.as_ref()?;

    // Condition: i % 2 == 0 (or != 0, which mirrors the arms).
    let ExprKind::Binary {
        op: cmp,
        lhs,
        rhs,
        override_fn: None,
    } = &arm.cond.kind
    else {
        return None;
    };
    let even_then = match cmp {
        BinOp::Eq => true,
        BinOp::Ne => false,
        _ => return None,
    };
    if rhs.as_i64() != Some(0) {
        return None;
    }
    let ExprKind::Binary {
        op: BinOp::Mod,
        lhs: mod_lhs,
        rhs: mod_rhs,
        override_fn: None,
    } = &lhs.kind
    else {
        return None;
    };
    if mod_lhs.as_var() != Some(var) || mod_rhs.as_i64() != Some(2) {
        return None;
    }

    // Arms: one adds i, the other subtracts i, same accumulator.
    let sign_of = |body: &[Stmt]| -> Option<(String, bool)> {
        let [s] = body else { return None };
        let (target, addend) = match_accum(s)?;
        match &addend.kind {
            ExprKind::Var(v) if v == var => Some((target, true)),
            ExprKind::Unary {
                op: UnOp::Neg,
                operand,
                override_fn: None,
            } if operand.as_var() == Some(var) => Some((target, false)),
            _ => None,
        }
    };
    let (then_target, then_adds) = sign_of(&arm.body)?;
    let (else_target, else_adds) = sign_of(else_body)?;
    if then_target != else_target || then_adds == else_adds {
        return None;
    }

    let even_adds = if even_then { then_adds } else { else_adds };
    Some(LoopShape::Alternating {
        target: then_target,
        even_adds,
    })
}

// ----------------------------------------------------------------------
// Closed forms (literal bounds)
// ----------------------------------------------------------------------

/// Index-sequence power sums over `i_k = start + k*step`, `k = 0..n-1`.
fn index_sums(bounds: LoopBounds, n: i128) -> Option<(i128, i128)> {
    let start = bounds.start as i128;
    let step = bounds.step as i128;
    let t1 = n.checked_mul(n.checked_sub(1)?)? / 2;
    let t2 = n
        .checked_sub(1)?
        .checked_mul(n)?
        .checked_mul(n.checked_mul(2)?.checked_sub(1)?)?
        / 6;
    let sum_i = n.checked_mul(start)?.checked_add(step.checked_mul(t1)?)?;
    let sum_i2 = n
        .checked_mul(start.checked_mul(start)?)?
        .checked_add(
            start
                .checked_mul(step)?
                .checked_mul(t1)?
                .checked_mul(2)?,
        )?
        .checked_add(step.checked_mul(step)?.checked_mul(t2)?)?;
    Some((sum_i, sum_i2))
}

fn add_const_stmt(target: &str, delta: i64, span: Span) -> Stmt {
    let mut value = Expr::binary(
        BinOp::Add,
        Expr::var(target, span),
        Expr::int(delta, span),
        span,
    );
    value.ty = Ty::I64;
    Stmt::new(
        StmtKind::Assign {
            name: target.to_string(),
            value,
        },
        span,
    )
}

/// Turn a recognized shape into straight-line statements, or abandon when
/// any constant falls outside i64.
fn fold_shape(shape: &LoopShape, bounds: LoopBounds, n: i128, span: Span) -> Option<Vec<Stmt>> {
    match shape {
        LoopShape::Poly(accums) => {
            let (sum_i, sum_i2) = index_sums(bounds, n)?;
            let mut out = Vec::new();
            for accum in accums {
                let delta = accum
                    .a2
                    .checked_mul(sum_i2)?
                    .checked_add(accum.a1.checked_mul(sum_i)?)?
                    .checked_add(accum.a0.checked_mul(n)?)?;
                let delta = i64::try_from(delta).ok()?;
                if delta != 0 {
                    out.push(add_const_stmt(&accum.target, delta, span));
                }
            }
            Some(out)
        }
        LoopShape::PairCoupled { acc, state, a, b } => {
            let (sum_i, _) = index_sums(bounds, n)?;
            let start = bounds.start as i128;
            let step = bounds.step as i128;
            // acc gains N*state + W; state gains S.
            let s_total = a.checked_mul(sum_i)?.checked_add(b.checked_mul(n)?)?;
            let c = a.checked_mul(start)?.checked_add(*b)?;
            let d = a.checked_mul(step)?;
            let m = n.checked_sub(1)?;
            let k1 = m.checked_sub(1)?.checked_mul(m)? / 2;
            let k2 = m
                .checked_sub(1)?
                .checked_mul(m)?
                .checked_mul(m.checked_mul(2)?.checked_sub(1)?)?
                / 6;
            let w = c
                .checked_mul(m.checked_mul(m.checked_add(1)?)? / 2)?
                .checked_add(d.checked_mul(m.checked_mul(k1)?.checked_sub(k2)?)?)?;

            let n_i64 = i64::try_from(n).ok()?;
            let w_i64 = i64::try_from(w).ok()?;
            let s_i64 = i64::try_from(s_total).ok()?;

            let acc_gain = Expr::binary(
                BinOp::Add,
                Expr::binary(
                    BinOp::Mul,
                    Expr::int(n_i64, span),
                    Expr::var(state.clone(), span),
                    span,
                ),
                Expr::int(w_i64, span),
                span,
            );
            let acc_stmt = Stmt::new(
                StmtKind::Assign {
                    name: acc.clone(),
                    value: Expr::binary(BinOp::Add, Expr::var(acc.clone(), span), acc_gain, span),
                },
                span,
            );
            let state_stmt = add_const_stmt(state, s_i64, span);
            Some(vec![acc_stmt, state_stmt])
        }
        LoopShape::ModLinear { target, a, b, m } => {
            // Terms are (A*k + B) % m over k = 0..n-1.
            let big_a = a.checked_mul(bounds.step as i128)?;
            let big_b = a
                .checked_mul(bounds.start as i128)?
                .checked_add(*b)?;
            let total = sum_trunc_mod_linear(n, big_a, big_b, *m)?;
            let delta = i64::try_from(total).ok()?;
            Some(if delta == 0 {
                Vec::new()
            } else {
                vec![add_const_stmt(target, delta, span)]
            })
        }
        LoopShape::Alternating { target, even_adds } => {
            // Canonical form only: start 0, step 1.
            if bounds.start != 0 || bounds.step != 1 {
                return None;
            }
            let half = n / 2;
            let delta = if n % 2 == 0 { -half } else { half };
            let delta = if *even_adds { delta } else { -delta };
            let delta = i64::try_from(delta).ok()?;
            Some(if delta == 0 {
                Vec::new()
            } else {
                vec![add_const_stmt(target, delta, span)]
            })
        }
    }
}

// ----------------------------------------------------------------------
// Modular sums
// ----------------------------------------------------------------------

/// Sum of `floor((a*k + b) / m)` for `k = 0..n-1`; requires `a, b >= 0`.
fn floor_sum(mut n: i128, mut m: i128, mut a: i128, mut b: i128) -> Option<i128> {
    let mut ans: i128 = 0;
    loop {
        if a >= m {
            ans = ans.checked_add(
                n.checked_sub(1)?
                    .checked_mul(n)?
                    .checked_div(2)?
                    .checked_mul(a / m)?,
            )?;
            a %= m;
        }
        if b >= m {
            ans = ans.checked_add(n.checked_mul(b / m)?)?;
            b %= m;
        }
        let y_max = a.checked_mul(n)?.checked_add(b)?;
        if y_max < m {
            return Some(ans);
        }
        n = y_max / m;
        b = y_max % m;
        std::mem::swap(&mut m, &mut a);
    }
}

/// Sum of `(a*k + b) % m` for `k = 0..n-1` under C's truncated `%`.
///
/// Negative stretches are handled by sign-splitting the (monotone) term
/// sequence, then reducing each stretch to the non-negative floor-sum case.
fn sum_trunc_mod_linear(n: i128, a: i128, b: i128, m: i128) -> Option<i128> {
    if n <= 0 {
        return Some(0);
    }
    if m <= 0 {
        return None;
    }
    if a == 0 {
        return n.checked_mul(b % m);
    }
    if a < 0 {
        // Reverse the index so the sequence ascends.
        let last = a.checked_mul(n.checked_sub(1)?)?.checked_add(b)?;
        return sum_trunc_mod_linear(n, -a, last, m);
    }
    if b >= 0 {
        // All terms non-negative: truncated and floored agree.
        let t1 = n.checked_sub(1)?.checked_mul(n)? / 2;
        let linear = a.checked_mul(t1)?.checked_add(b.checked_mul(n)?)?;
        return linear.checked_sub(m.checked_mul(floor_sum(n, m, a, b)?)?);
    }
    // Ascending with a negative head: split where terms reach zero.
    let k0 = (-b + a - 1) / a; // first k with a*k + b >= 0
    let k0 = k0.min(n);
    // Negative stretch: |terms| = (-a)*k + (-b), handled by the reversal
    // case, and (-x) % m == -(x % m).
    let neg = sum_trunc_mod_linear(k0, -a, -b, m)?;
    let tail = sum_trunc_mod_linear(
        n.checked_sub(k0)?,
        a,
        a.checked_mul(k0)?.checked_add(b)?,
        m,
    )?;
    neg.checked_neg()?.checked_add(tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::Optimizer;
    use crate::parser::parse_source;
    use crate::typechecker::TypeChecker;
    use crate::ast::Program;

    fn optimized(source: &str) -> Program {
        let mut program = parse_source(source).expect("parse");
        TypeChecker::new()
            .check_program(&mut program)
            .expect("typecheck");
        Optimizer::new(12).optimize(&mut program);
        program
    }

    fn top_has_loop(program: &Program) -> bool {
        fn any_loop(body: &[Stmt]) -> bool {
            body.iter().any(|s| match &s.kind {
                StmtKind::ForRange { .. } | StmtKind::While { .. } => true,
                StmtKind::If { arms, else_body } => {
                    arms.iter().any(|a| any_loop(&a.body))
                        || else_body.as_ref().is_some_and(|b| any_loop(b))
                }
                _ => false,
            })
        }
        any_loop(&program.top_level)
    }

    /// Reference interpreter for the single-accumulator loops under test.
    fn naive_sum(start: i64, stop: i64, step: i64, f: impl Fn(i128) -> i128) -> i128 {
        let mut total: i128 = 0;
        let mut i = start as i128;
        if step > 0 {
            while i < stop as i128 {
                total += f(i);
                i += step as i128;
            }
        } else {
            while i > stop as i128 {
                total += f(i);
                i += step as i128;
            }
        }
        total
    }

    #[test]
    fn trip_counts() {
        assert_eq!(trip_count(0, 10, 1), Some(10));
        assert_eq!(trip_count(0, 10, 3), Some(4));
        assert_eq!(trip_count(10, 0, -1), Some(10));
        assert_eq!(trip_count(10, 0, -3), Some(4));
        assert_eq!(trip_count(5, 5, 1), Some(0));
        assert_eq!(trip_count(5, 0, 1), Some(0));
        assert_eq!(trip_count(0, 5, 0), None);
    }

    #[test]
    fn zero_trip_loop_is_deleted() {
        let program = optimized("declare s = 0\nfor i in 5..5 {\n  s = s + i\n}\nprintln(s)\n");
        assert!(!top_has_loop(&program));
    }

    #[test]
    fn small_loop_unrolls() {
        let program = optimized("declare s = 0\nfor i in 0..3 {\n  println(i)\n}\n");
        assert!(!top_has_loop(&program));
        // println(0), println(1), println(2) survive (as println_str after
        // the constant-print rewrite).
        assert!(program.top_level.len() >= 3);
    }

    #[test]
    fn affine_reduction_folds_to_constant() {
        let program =
            optimized("declare s = 0\nfor i in 0..1000000 {\n  s = s + i\n}\nprintln(s)\n");
        assert!(!top_has_loop(&program));
        let expected = naive_sum(0, 1_000_000, 1, |i| i);
        assert_eq!(expected, 499999500000);
        assert_eq!(printed_constants(&program), vec![expected as i64]);
    }

    /// Constants that reached the constant-print rewrite, in output order.
    /// After full optimization a folded accumulator propagates into its
    /// print and the stores themselves are pruned, so the print argument is
    /// the observable result.
    fn printed_constants(program: &Program) -> Vec<i64> {
        let mut out = Vec::new();
        for stmt in &program.top_level {
            if let StmtKind::Expr(e) = &stmt.kind {
                if let ExprKind::Call { callee, args } = &e.kind {
                    if callee == "println_str" || callee == "print_str" {
                        if let ExprKind::Str(s) = &args[0].kind {
                            if let Ok(v) = s.parse() {
                                out.push(v);
                            }
                        }
                    }
                }
            }
        }
        out
    }

    #[test]
    fn affine_with_temp_binding_folds() {
        let source = "declare s = 0\nfor i in 0..1000 {\n  declare t = i * 3 + 1\n  s = s + t\n}\nprintln(s)\n";
        let program = optimized(source);
        assert!(!top_has_loop(&program));
        let expected = naive_sum(0, 1000, 1, |i| i * 3 + 1);
        assert_eq!(printed_constants(&program), vec![expected as i64]);
    }

    #[test]
    fn multi_affine_reduction_folds() {
        let source = "declare a = 0\ndeclare b = 0\nfor i in 0..5000 {\n  a = a + i\n  b = b + i * 2\n}\nprintln(a)\nprintln(b)\n";
        let program = optimized(source);
        assert!(!top_has_loop(&program));
        assert_eq!(
            printed_constants(&program),
            vec![
                naive_sum(0, 5000, 1, |i| i) as i64,
                naive_sum(0, 5000, 1, |i| i * 2) as i64,
            ]
        );
    }

    #[test]
    fn quadratic_reduction_folds() {
        let source = "declare s = 0\nfor i in 0..2000 {\n  s = s + i * i\n}\nprintln(s)\n";
        let program = optimized(source);
        assert!(!top_has_loop(&program));
        assert_eq!(
            printed_constants(&program),
            vec![naive_sum(0, 2000, 1, |i| i * i) as i64]
        );
    }

    #[test]
    fn negative_step_reduction_folds() {
        let source = "declare s = 0\nfor i in 100..0 step -3 {\n  s = s + i\n}\nprintln(s)\n";
        let program = optimized(source);
        assert!(!top_has_loop(&program));
        assert_eq!(
            printed_constants(&program),
            vec![naive_sum(100, 0, -3, |i| i) as i64]
        );
    }

    #[test]
    fn overflowing_reduction_keeps_the_loop() {
        let source = format!(
            "declare s = 0\nfor i in 0..1000000 {{\n  s = s + {}\n}}\nprintln(s)\n",
            i64::MAX / 100
        );
        let program = optimized(&source);
        assert!(top_has_loop(&program));
    }

    #[test]
    fn mod_linear_reduction_folds() {
        let source = "declare m = 0\nfor i in 0..7 {\n  m = m + (i * 3 + 1) % 5\n}\nprintln(m)\n";
        let program = optimized(source);
        assert!(!top_has_loop(&program));
        let expected = naive_sum(0, 7, 1, |i| (i * 3 + 1) % 5);
        assert_eq!(printed_constants(&program), vec![expected as i64]);
    }

    #[test]
    fn mod_linear_with_negative_terms_matches_naive() {
        let n = 1000;
        for (a, b, m) in [(-3i128, 7i128, 5i128), (3, -100, 7), (-2, -5, 9)] {
            let expected: i128 = (0..n).map(|k| (a * k + b) % m).sum();
            assert_eq!(
                sum_trunc_mod_linear(n, a, b, m),
                Some(expected),
                "a={} b={} m={}",
                a,
                b,
                m
            );
        }
    }

    #[test]
    fn floor_sum_matches_naive() {
        for (n, m, a, b) in [(10i128, 3i128, 2i128, 1i128), (100, 7, 13, 5), (50, 2, 0, 3)] {
            let expected: i128 = (0..n).map(|k| (a * k + b) / m).sum();
            assert_eq!(floor_sum(n, m, a, b), Some(expected));
        }
    }

    #[test]
    fn alternating_reduction_folds() {
        let source = "declare s = 0\nfor i in 0..10 {\n  if i % 2 == 0 {\n    s = s + i\n  }\nelse {\n    s = s - i\n  }\n}\nprintln(s)\n";
        let program = optimized(source);
        assert!(!top_has_loop(&program));
        assert_eq!(printed_constants(&program), vec![-5]);
    }

    #[test]
    fn alternating_mirrored_flips_sign() {
        let source = "declare s = 0\nfor i in 0..10 {\n  if i % 2 == 0 {\n    s = s - i\n  }\nelse {\n    s = s + i\n  }\n}\nprintln(s)\n";
        let program = optimized(source);
        assert_eq!(printed_constants(&program), vec![5]);
    }

    #[test]
    fn pair_coupled_reduction_folds() {
        let source = "declare acc = 0\ndeclare st = 0\nfor i in 0..100 {\n  acc = acc + st\n  st = st + i * 2 + 1\n}\nprintln(acc)\n";
        let program = optimized(source);
        assert!(!top_has_loop(&program));
        // Reference: simulate.
        let mut acc: i128 = 0;
        let mut st: i128 = 0;
        for i in 0..100i128 {
            acc += st;
            st += i * 2 + 1;
        }
        assert_eq!(printed_constants(&program), vec![acc as i64]);
    }

    #[test]
    fn redeclared_accumulator_is_not_a_reduction() {
        // The accumulator is re-declared each iteration, so the loop stays.
        let source = "for i in 0..10 {\n  declare s = 0\n  s = s + i\n  println(s)\n}\n";
        let program = optimized(source);
        assert!(top_has_loop(&program));
    }

    #[test]
    fn call_in_addend_rejects_reduction() {
        let source = "declare s = 0\nfor i in 0..100 {\n  s = s + clock_us()\n}\n";
        let program = optimized(source);
        assert!(top_has_loop(&program));
    }

    #[test]
    fn bounds_resolve_through_const_bindings() {
        let source = "declare const n = 1000\ndeclare s = 0\nfor i in 0..n {\n  s = s + i\n}\nprintln(s)\n";
        let program = optimized(source);
        assert!(!top_has_loop(&program));
    }

    #[test]
    fn reassigned_bound_is_not_resolved() {
        let source = "declare n = 1000\nn = cli_count()\ndeclare s = 0\nfor i in 0..n {\n  s = s + i\n}\n";
        let program = optimized(source);
        assert!(top_has_loop(&program));
    }
}
