//! For-range loop shape specialization
//!
//! The optimizer folds reductions with fully literal bounds; everything
//! else reaches code generation as a loop. Here the C shape is chosen:
//!
//! - `parallel` loops wrap in `LS_PAR_FOR_IF` (OpenMP when enabled, scalar
//!   fallback otherwise)
//! - serial loops whose body matches a reduction shape emit runtime closed
//!   forms in `__int128` (plain loop fallback when the host C compiler has
//!   no 128-bit type)
//! - loops with simple call-free bodies get `LS_OMP_SIMD`/`LS_VEC_HINT`
//! - everything else becomes a plain C for loop with `++`/`--`/`+= step`
//!   chosen from the literal step

use super::{CodeGen, CodeGenError};
use crate::ast::{Expr, ExprKind, Stmt, StmtKind};
use crate::optimizer::{LoopShape, PolyAccum, analyze_loop};

impl CodeGen {
    pub(super) fn emit_for(&mut self, stmt: &Stmt) -> Result<(), CodeGenError> {
        let StmtKind::ForRange {
            var,
            start,
            stop,
            step,
            parallel,
            body,
        } = &stmt.kind
        else {
            return Err(CodeGenError::Logic(
                "internal: emit_for on a non-loop statement".to_string(),
            ));
        };

        let start_c = self.expr_to_c(start);
        let stop_c = self.expr_to_c(stop);
        let step_lit = match step {
            Some(s) => s.as_i64(),
            None => Some(1),
        };
        let step_c = step
            .as_ref()
            .map(|s| self.expr_to_c(s))
            .unwrap_or_else(|| "1LL".to_string());

        if *parallel {
            return self.emit_parallel_for(var, &start_c, &stop_c, &step_c, step_lit, body);
        }

        if let Some(shape) = analyze_loop(var, body) {
            if self.emit_closed_form(&shape, var, start, &start_c, &stop_c, &step_c, step_lit, body)?
            {
                return Ok(());
            }
        }

        if body_is_vectorizable(body) {
            self.line("LS_OMP_SIMD")?;
            self.line("LS_VEC_HINT")?;
        }
        self.emit_plain_for(var, &start_c, &stop_c, &step_c, step_lit, body)
    }

    fn emit_plain_for(
        &mut self,
        var: &str,
        start: &str,
        stop: &str,
        step: &str,
        step_lit: Option<i64>,
        body: &[Stmt],
    ) -> Result<(), CodeGenError> {
        let header = match step_lit {
            Some(1) => format!("for (int64_t {v} = {start}; {v} < {stop}; ++{v}) {{", v = var),
            Some(-1) => format!("for (int64_t {v} = {start}; {v} > {stop}; --{v}) {{", v = var),
            Some(s) if s > 0 => format!(
                "for (int64_t {v} = {start}; {v} < {stop}; {v} += {s}) {{",
                v = var,
                s = s
            ),
            Some(s) => format!(
                "for (int64_t {v} = {start}; {v} > {stop}; {v} += {s}) {{",
                v = var,
                s = s
            ),
            None => {
                // Runtime step: hoist the bounds and branch on direction.
                self.line("{")?;
                self.indent += 1;
                self.line(&format!("int64_t __ls_step = {};", step))?;
                self.line(&format!("int64_t __ls_stop = {};", stop))?;
                let header = format!(
                    "for (int64_t {v} = {start}; __ls_step > 0 ? {v} < __ls_stop : {v} > __ls_stop; {v} += __ls_step) {{",
                    v = var,
                    start = start
                );
                self.line(&header)?;
                self.emit_scoped_body(body, true)?;
                self.line("}")?;
                self.indent -= 1;
                return self.line("}");
            }
        };
        self.line(&header)?;
        self.emit_scoped_body(body, true)?;
        self.line("}")
    }

    fn emit_parallel_for(
        &mut self,
        var: &str,
        start: &str,
        stop: &str,
        step: &str,
        step_lit: Option<i64>,
        body: &[Stmt],
    ) -> Result<(), CodeGenError> {
        self.line("{")?;
        self.indent += 1;
        self.line(&format!("const int64_t __ls_start = {};", start))?;
        self.line(&format!("const int64_t __ls_stop = {};", stop))?;
        self.line(&format!("const int64_t __ls_step = {};", step))?;
        self.line(
            "LS_PAR_FOR_IF(ls_trip_count(__ls_start, __ls_stop, __ls_step) >= LS_PAR_MIN_ITERS)",
        )?;
        let header = match step_lit {
            Some(s) if s > 0 => format!(
                "for (int64_t {v} = __ls_start; {v} < __ls_stop; {v} += __ls_step) {{",
                v = var
            ),
            Some(_) => format!(
                "for (int64_t {v} = __ls_start; {v} > __ls_stop; {v} += __ls_step) {{",
                v = var
            ),
            None => format!(
                "for (int64_t {v} = __ls_start; __ls_step > 0 ? {v} < __ls_stop : {v} > __ls_stop; {v} += __ls_step) {{",
                v = var
            ),
        };
        self.line(&header)?;
        self.emit_scoped_body(body, true)?;
        self.line("}")?;
        self.indent -= 1;
        self.line("}")
    }

    /// Emit a runtime closed form for a recognized shape. Returns false when
    /// the shape cannot be emitted (the caller falls back to a loop).
    #[allow(clippy::too_many_arguments)]
    fn emit_closed_form(
        &mut self,
        shape: &LoopShape,
        var: &str,
        start_expr: &Expr,
        start: &str,
        stop: &str,
        step: &str,
        step_lit: Option<i64>,
        body: &[Stmt],
    ) -> Result<bool, CodeGenError> {
        // Coefficients must be emittable as i64 literals.
        let fits = |v: i128| i64::try_from(v).is_ok();

        match shape {
            LoopShape::Poly(accums) => {
                if !accums
                    .iter()
                    .all(|a| fits(a.a2) && fits(a.a1) && fits(a.a0))
                {
                    return Ok(false);
                }
                self.open_closed_form(start, stop, step)?;
                for accum in accums {
                    self.emit_poly_update(accum)?;
                }
                self.close_closed_form(var, start, stop, step, step_lit, body)?;
                Ok(true)
            }
            LoopShape::ModLinear { target, a, b, m } => {
                if !(fits(*a) && fits(*b) && fits(*m)) {
                    return Ok(false);
                }
                self.open_closed_form(start, stop, step)?;
                self.line(&format!(
                    "{t} = (int64_t)((__int128){t} + ls_sum_mod_linear_i128({a}LL, {b}LL, {m}LL, __ls_cf_start, __ls_cf_step, __ls_cf_n));",
                    t = target,
                    a = a,
                    b = b,
                    m = m
                ))?;
                self.close_closed_form(var, start, stop, step, step_lit, body)?;
                Ok(true)
            }
            LoopShape::PairCoupled { acc, state, a, b } => {
                if !(fits(*a) && fits(*b)) {
                    return Ok(false);
                }
                self.open_closed_form(start, stop, step)?;
                self.line(&format!(
                    "__int128 __ls_cf_w = ls_pair_weight_i128({a}LL, {b}LL, __ls_cf_start, __ls_cf_step, __ls_cf_n);",
                    a = a,
                    b = b
                ))?;
                self.line(&format!(
                    "{acc} = (int64_t)((__int128){acc} + (__int128)__ls_cf_n * {state} + __ls_cf_w);",
                    acc = acc,
                    state = state
                ))?;
                self.line(&format!(
                    "{state} = (int64_t)((__int128){state} + {a}LL * ls_sum_i_i128(__ls_cf_start, __ls_cf_step, __ls_cf_n) + (__int128){b}LL * __ls_cf_n);",
                    state = state,
                    a = a,
                    b = b
                ))?;
                self.close_closed_form(var, start, stop, step, step_lit, body)?;
                Ok(true)
            }
            LoopShape::Alternating { target, even_adds } => {
                // Half-count form; canonical index sequence only.
                if start_expr.as_i64() != Some(0) || step_lit != Some(1) {
                    return Ok(false);
                }
                self.open_closed_form(start, stop, step)?;
                let (even, odd) = if *even_adds {
                    ("-(__ls_cf_n / 2)", "(__ls_cf_n / 2)")
                } else {
                    ("(__ls_cf_n / 2)", "-(__ls_cf_n / 2)")
                };
                self.line(&format!(
                    "{t} = {t} + ((__ls_cf_n % 2 == 0) ? {even} : {odd});",
                    t = target,
                    even = even,
                    odd = odd
                ))?;
                self.close_closed_form(var, start, stop, step, step_lit, body)?;
                Ok(true)
            }
        }
    }

    fn emit_poly_update(&mut self, accum: &PolyAccum) -> Result<(), CodeGenError> {
        let mut update = format!("(__int128){}", accum.target);
        if accum.a2 != 0 {
            update.push_str(&format!(
                " + {}LL * ls_sum_i2_i128(__ls_cf_start, __ls_cf_step, __ls_cf_n)",
                accum.a2
            ));
        }
        if accum.a1 != 0 {
            update.push_str(&format!(
                " + {}LL * ls_sum_i_i128(__ls_cf_start, __ls_cf_step, __ls_cf_n)",
                accum.a1
            ));
        }
        if accum.a0 != 0 {
            update.push_str(&format!(" + (__int128){}LL * __ls_cf_n", accum.a0));
        }
        self.line(&format!(
            "{} = (int64_t)({});",
            accum.target, update
        ))
    }

    fn open_closed_form(
        &mut self,
        start: &str,
        stop: &str,
        step: &str,
    ) -> Result<(), CodeGenError> {
        self.raw_line("#if LS_HAS_INT128")?;
        self.line("{")?;
        self.indent += 1;
        self.line(&format!("const int64_t __ls_cf_start = {};", start))?;
        self.line(&format!("const int64_t __ls_cf_stop = {};", stop))?;
        self.line(&format!("const int64_t __ls_cf_step = {};", step))?;
        self.line(
            "const int64_t __ls_cf_n = ls_trip_count(__ls_cf_start, __ls_cf_stop, __ls_cf_step);",
        )?;
        Ok(())
    }

    /// Close the 128-bit branch and emit the plain loop as the
    /// no-`__int128` fallback.
    fn close_closed_form(
        &mut self,
        var: &str,
        start: &str,
        stop: &str,
        step: &str,
        step_lit: Option<i64>,
        body: &[Stmt],
    ) -> Result<(), CodeGenError> {
        self.indent -= 1;
        self.line("}")?;
        self.raw_line("#else")?;
        self.emit_plain_for(var, start, stop, step, step_lit, body)?;
        self.raw_line("#endif")
    }

    /// Preprocessor lines sit at column zero.
    fn raw_line(&mut self, text: &str) -> Result<(), CodeGenError> {
        self.output.push_str(text);
        self.output.push('\n');
        Ok(())
    }
}

/// A body qualifies for the vector hint when it contains only simple local
/// assigns/declares/expression statements with no calls.
fn body_is_vectorizable(body: &[Stmt]) -> bool {
    !body.is_empty()
        && body.iter().all(|stmt| match &stmt.kind {
            StmtKind::Declare { init, owned, .. } => !owned && !contains_call(init),
            StmtKind::Assign { value, .. } => !contains_call(value),
            StmtKind::Expr(e) => !contains_call(e),
            _ => false,
        })
}

fn contains_call(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Call { .. } => true,
        ExprKind::Unary { operand, .. } => contains_call(operand),
        ExprKind::Binary { lhs, rhs, .. } => contains_call(lhs) || contains_call(rhs),
        _ => false,
    }
}
