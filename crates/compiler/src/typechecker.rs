//! Type checker for LineScript
//!
//! Two phases. Collect: every builtin and user function is inserted into a
//! flat symbol table (keyed by mangled symbol) and an overload group (keyed
//! by public name). Check: each non-extern function body is walked with a
//! local scope stack; expression types are inferred bottom-up, overloads are
//! resolved by minimum total conversion cost, and the throws/ownership/const
//! rules are enforced.
//!
//! A `superuser()` call anywhere in the source flips the checker into
//! permissive mode: every would-be error is recorded as a warning and a
//! permissive default type is chosen (`i64` in arithmetic contexts, `bool`
//! for predicates, `str` where required). The same mode unlocks the `su.*`
//! introspection namespace.

use crate::ast::{
    BinOp, Expr, ExprKind, Function, Program, Span, Stmt, StmtKind, Ty, UnOp,
};
use crate::builtins;
use crate::error::{CompileError, Warning};
use std::collections::{HashMap, HashSet};

/// One resolved callable signature.
#[derive(Debug, Clone)]
pub struct FuncSig {
    pub symbol: String,
    /// Overload group key (public name, or `Class.method`).
    pub group: String,
    pub params: Vec<Ty>,
    pub return_ty: Ty,
    pub throws: Vec<String>,
    pub is_builtin: bool,
}

#[derive(Debug, Clone)]
struct VarInfo {
    ty: Ty,
    is_const: bool,
    owned: bool,
    assigned: bool,
}

pub struct TypeChecker {
    /// Flat symbol table keyed by mangled symbol (builtin overloads get a
    /// `name@idx` key; their C-side dispatch is _Generic, not a symbol).
    symbols: HashMap<String, FuncSig>,
    /// Overload groups keyed by public name.
    groups: HashMap<String, Vec<String>>,
    /// Permissive mode, enabled by any `superuser()` call in the source.
    superuser: bool,
    warnings: Vec<Warning>,
    seen_warnings: HashSet<Warning>,
    /// Scope stack for the function currently being checked.
    scopes: Vec<HashMap<String, VarInfo>>,
    /// Declared throws of the enclosing function (empty at top level).
    current_throws: Vec<String>,
    loop_depth: u32,
}

impl TypeChecker {
    pub fn new() -> Self {
        TypeChecker {
            symbols: HashMap::new(),
            groups: HashMap::new(),
            superuser: false,
            warnings: Vec::new(),
            seen_warnings: HashSet::new(),
            scopes: Vec::new(),
            current_throws: Vec::new(),
            loop_depth: 0,
        }
    }

    pub fn superuser_mode(&self) -> bool {
        self.superuser
    }

    /// Deduplicated warnings accumulated so far, in encounter order.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Check a whole program, annotating expression types in place.
    pub fn check_program(&mut self, program: &mut Program) -> Result<(), CompileError> {
        self.superuser = program_calls_superuser(program);
        self.collect(program)?;

        let mut functions = std::mem::take(&mut program.functions);
        for func in &mut functions {
            if func.is_extern {
                continue;
            }
            self.check_function(func)?;
        }
        program.functions = functions;

        // Top-level statements check as the body of the synthesized entry.
        let mut top = std::mem::take(&mut program.top_level);
        self.current_throws = Vec::new();
        self.scopes = vec![HashMap::new()];
        self.loop_depth = 0;
        for stmt in &mut top {
            self.check_stmt(stmt, Ty::I64)?;
        }
        program.top_level = top;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Collect phase
    // ------------------------------------------------------------------

    fn collect(&mut self, program: &Program) -> Result<(), CompileError> {
        self.symbols.clear();
        self.groups.clear();

        for (idx, builtin) in builtins::catalog().into_iter().enumerate() {
            let key = format!("{}@{}", builtin.name, idx);
            let sig = FuncSig {
                symbol: builtin.name.to_string(),
                group: builtin.name.to_string(),
                params: builtin.params.clone(),
                return_ty: builtin.ret,
                throws: builtin.throws.iter().map(|s| s.to_string()).collect(),
                is_builtin: true,
            };
            self.groups
                .entry(builtin.name.to_string())
                .or_default()
                .push(key.clone());
            self.symbols.insert(key, sig);
        }

        for func in &program.functions {
            let group = match &func.class_owner {
                Some(owner) if func.name != func.source_name || func.name.starts_with("__ls_cls_") => {
                    format!("{}.{}", owner, func.source_name)
                }
                _ => func.source_name.clone(),
            };
            let sig = FuncSig {
                symbol: func.name.clone(),
                group: group.clone(),
                params: func.params.iter().map(|p| p.ty).collect(),
                return_ty: func.return_ty,
                throws: func.throws.clone(),
                is_builtin: false,
            };

            // Identical parameter type sequences within one overload group
            // are forbidden.
            let duplicate = self
                .groups
                .get(&group)
                .into_iter()
                .flatten()
                .filter_map(|s| self.symbols.get(s))
                .any(|other| !other.is_builtin && other.params == sig.params);
            if duplicate {
                let err = CompileError::new(
                    func.span,
                    format!("duplicate definition of '{}' with identical parameter types", group),
                );
                if self.superuser {
                    self.warn(func.span, err.msg.clone());
                } else {
                    return Err(err);
                }
            }

            self.groups.entry(group).or_default().push(func.name.clone());
            self.symbols.insert(func.name.clone(), sig);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Check phase
    // ------------------------------------------------------------------

    fn check_function(&mut self, func: &mut Function) -> Result<(), CompileError> {
        self.scopes = vec![HashMap::new()];
        self.current_throws = func.throws.clone();
        self.loop_depth = 0;
        for param in &func.params {
            self.scopes.last_mut().expect("scope").insert(
                param.name.clone(),
                VarInfo {
                    ty: param.ty,
                    is_const: false,
                    owned: false,
                    assigned: true,
                },
            );
        }
        let return_ty = func.return_ty;
        for stmt in &mut func.body {
            self.check_stmt(stmt, return_ty)?;
        }
        Ok(())
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn lookup_var(&self, name: &str) -> Option<&VarInfo> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn lookup_var_mut(&mut self, name: &str) -> Option<&mut VarInfo> {
        self.scopes.iter_mut().rev().find_map(|s| s.get_mut(name))
    }

    fn warn(&mut self, span: Span, msg: impl Into<String>) {
        let warning = Warning::new(span, msg);
        if self.seen_warnings.insert(warning.clone()) {
            self.warnings.push(warning);
        }
    }

    /// Raise an error, or record it and fall back to `default` in superuser
    /// mode.
    fn demote(&mut self, span: Span, msg: String, default: Ty) -> Result<Ty, CompileError> {
        if self.superuser {
            self.warn(span, msg);
            Ok(default)
        } else {
            Err(CompileError::new(span, msg))
        }
    }

    fn check_stmt(&mut self, stmt: &mut Stmt, return_ty: Ty) -> Result<(), CompileError> {
        let span = stmt.span;
        match &mut stmt.kind {
            StmtKind::Declare {
                name,
                declared_ty,
                is_const,
                owned,
                init,
                ..
            } => {
                let init_ty = self.check_expr(init)?;
                let ty = match declared_ty {
                    Some(declared) => {
                        if !init_ty.assignable_to(*declared) {
                            let msg = format!(
                                "cannot initialize '{}' of type {} with a {} value",
                                name, declared, init_ty
                            );
                            self.demote(span, msg, *declared)?;
                        }
                        *declared
                    }
                    None => init_ty,
                };
                if ty == Ty::Void {
                    self.demote(
                        span,
                        format!("binding '{}' would have type void", name),
                        Ty::I64,
                    )?;
                }
                if *owned && self.loop_depth > 0 {
                    let msg = format!("owned binding '{}' may not appear inside a loop", name);
                    self.demote(span, msg, ty)?;
                }
                self.scopes.last_mut().expect("scope").insert(
                    name.clone(),
                    VarInfo {
                        ty,
                        is_const: *is_const,
                        owned: *owned,
                        assigned: false,
                    },
                );
                Ok(())
            }
            StmtKind::Assign { name, value } => {
                let value_ty = self.check_expr(value)?;
                let Some(info) = self.lookup_var(name).cloned() else {
                    self.demote(span, format!("unknown name '{}'", name), Ty::I64)?;
                    return Ok(());
                };
                if info.is_const {
                    self.demote(
                        span,
                        format!("cannot assign to const binding '{}'", name),
                        info.ty,
                    )?;
                }
                if info.owned {
                    self.demote(
                        span,
                        format!("owned binding '{}' may not be reassigned", name),
                        info.ty,
                    )?;
                }
                if !value_ty.assignable_to(info.ty) {
                    let msg = format!(
                        "cannot assign a {} value to '{}' of type {}",
                        value_ty, name, info.ty
                    );
                    self.demote(span, msg, info.ty)?;
                }
                if let Some(info) = self.lookup_var_mut(name) {
                    info.assigned = true;
                }
                Ok(())
            }
            StmtKind::Expr(expr) => {
                self.check_expr(expr)?;
                Ok(())
            }
            StmtKind::Return(value) => {
                match value {
                    Some(expr) => {
                        // Owned handles may not escape their scope.
                        if let Some(name) = expr.as_var() {
                            if self.lookup_var(name).is_some_and(|v| v.owned) {
                                self.demote(
                                    span,
                                    format!("owned binding '{}' may not be returned", name),
                                    return_ty,
                                )?;
                            }
                        }
                        let ty = self.check_expr(expr)?;
                        if !ty.assignable_to(return_ty) {
                            let msg = format!(
                                "cannot return a {} value from a {} function",
                                ty, return_ty
                            );
                            self.demote(span, msg, return_ty)?;
                        }
                    }
                    None => {
                        if return_ty != Ty::Void {
                            let msg = format!(
                                "missing return value in a {} function",
                                return_ty
                            );
                            self.demote(span, msg, return_ty)?;
                        }
                    }
                }
                Ok(())
            }
            StmtKind::If { arms, else_body } => {
                for arm in arms.iter_mut() {
                    let cond_ty = self.check_expr(&mut arm.cond)?;
                    if cond_ty != Ty::Bool {
                        self.demote(
                            arm.cond.span,
                            format!("if condition must be bool, found {}", cond_ty),
                            Ty::Bool,
                        )?;
                    }
                    self.push_scope();
                    for s in &mut arm.body {
                        self.check_stmt(s, return_ty)?;
                    }
                    self.pop_scope();
                }
                if let Some(body) = else_body {
                    self.push_scope();
                    for s in body {
                        self.check_stmt(s, return_ty)?;
                    }
                    self.pop_scope();
                }
                Ok(())
            }
            StmtKind::While { cond, body } => {
                let cond_ty = self.check_expr(cond)?;
                if cond_ty != Ty::Bool {
                    self.demote(
                        cond.span,
                        format!("while condition must be bool, found {}", cond_ty),
                        Ty::Bool,
                    )?;
                }
                self.push_scope();
                self.loop_depth += 1;
                for s in body {
                    self.check_stmt(s, return_ty)?;
                }
                self.loop_depth -= 1;
                self.pop_scope();
                Ok(())
            }
            StmtKind::ForRange {
                var,
                start,
                stop,
                step,
                parallel,
                body,
            } => {
                for bound in [&mut *start, &mut *stop].into_iter().chain(step.as_mut()) {
                    let ty = self.check_expr(bound)?;
                    if ty != Ty::I64 {
                        self.demote(
                            bound.span,
                            format!("for-range bounds must be i64, found {}", ty),
                            Ty::I64,
                        )?;
                    }
                }
                if let Some(step_expr) = step {
                    if step_expr.as_i64() == Some(0) {
                        return Err(CompileError::new(
                            step_expr.span,
                            "for-range step must not be zero",
                        ));
                    }
                }

                // Loop variable shadows within the body only.
                self.push_scope();
                self.scopes.last_mut().expect("scope").insert(
                    var.clone(),
                    VarInfo {
                        ty: Ty::I64,
                        is_const: true,
                        owned: false,
                        assigned: true,
                    },
                );
                self.loop_depth += 1;
                for s in body.iter_mut() {
                    self.check_stmt(s, return_ty)?;
                }
                self.loop_depth -= 1;
                self.pop_scope();

                if *parallel {
                    self.check_parallel_rules(var, body, span)?;
                }
                Ok(())
            }
            StmtKind::FormatBlock { end_suffix, body } => {
                if let Some(suffix) = end_suffix {
                    let ty = self.check_expr(suffix)?;
                    if ty != Ty::Str {
                        self.demote(
                            suffix.span,
                            format!("format block end suffix must be str, found {}", ty),
                            Ty::Str,
                        )?;
                    }
                }
                self.push_scope();
                for s in body {
                    self.check_stmt(s, return_ty)?;
                }
                self.pop_scope();
                Ok(())
            }
            StmtKind::Break | StmtKind::Continue => {
                if self.loop_depth == 0 {
                    return Err(CompileError::new(span, "break/continue outside of a loop"));
                }
                Ok(())
            }
        }
    }

    /// Parallel loops may not break/continue and may not assign to names
    /// defined outside the loop body.
    fn check_parallel_rules(
        &mut self,
        loop_var: &str,
        body: &[Stmt],
        span: Span,
    ) -> Result<(), CompileError> {
        if block_breaks(body) {
            let msg = "parallel for-loops may not contain break or continue".to_string();
            self.demote(span, msg, Ty::Void)?;
        }
        let mut local: HashSet<String> = HashSet::new();
        local.insert(loop_var.to_string());
        collect_declares(body, &mut local);
        let mut outer = Vec::new();
        collect_assign_targets(body, &mut outer);
        for name in outer {
            if !local.contains(&name) {
                let msg = format!(
                    "parallel for-loop assigns to '{}', which is defined outside the loop",
                    name
                );
                self.demote(span, msg, Ty::Void)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn check_expr(&mut self, expr: &mut Expr) -> Result<Ty, CompileError> {
        let span = expr.span;
        let ty = match &mut expr.kind {
            ExprKind::Int(_) => Ty::I64,
            ExprKind::Float(_) => Ty::F64,
            ExprKind::Bool(_) => Ty::Bool,
            ExprKind::Str(_) => Ty::Str,
            ExprKind::Var(name) => match self.lookup_var(name) {
                Some(info) => info.ty,
                None => {
                    let msg = format!("unknown name '{}'", name);
                    self.demote(span, msg, Ty::I64)?
                }
            },
            ExprKind::Unary {
                op,
                operand,
                override_fn,
            } => {
                let operand_ty = self.check_expr(operand)?;
                if let Some(symbol) = override_fn.clone() {
                    self.override_return_ty(&symbol, span)?
                } else if let Some((symbol, ret)) =
                    self.free_override(op.override_key(), &[operand_ty])
                {
                    *override_fn = Some(symbol);
                    ret
                } else {
                    match op {
                        UnOp::Neg => {
                            if operand_ty.is_numeric() {
                                operand_ty
                            } else {
                                let msg =
                                    format!("cannot negate a {} value", operand_ty);
                                self.demote(span, msg, Ty::I64)?
                            }
                        }
                        UnOp::Not => {
                            if operand_ty == Ty::Bool {
                                Ty::Bool
                            } else {
                                let msg = format!(
                                    "logical not requires bool, found {}",
                                    operand_ty
                                );
                                self.demote(span, msg, Ty::Bool)?
                            }
                        }
                    }
                }
            }
            ExprKind::Binary {
                op,
                lhs,
                rhs,
                override_fn,
            } => {
                let op = *op;
                let lhs_ty = self.check_expr(lhs)?;
                let rhs_ty = self.check_expr(rhs)?;
                if let Some(symbol) = override_fn.clone() {
                    self.override_return_ty(&symbol, span)?
                } else if let Some((symbol, ret)) =
                    self.free_override(op.override_key(), &[lhs_ty, rhs_ty])
                {
                    *override_fn = Some(symbol);
                    ret
                } else {
                    self.builtin_binary_ty(op, lhs_ty, rhs_ty, span)?
                }
            }
            ExprKind::Call { callee, args } => {
                let callee = callee.clone();
                return self.check_call(expr, &callee, span);
            }
        };
        expr.ty = ty;
        expr.typed = true;
        Ok(ty)
    }

    fn builtin_binary_ty(
        &mut self,
        op: BinOp,
        lhs: Ty,
        rhs: Ty,
        span: Span,
    ) -> Result<Ty, CompileError> {
        if op.is_logical() {
            if lhs == Ty::Bool && rhs == Ty::Bool {
                return Ok(Ty::Bool);
            }
            let msg = format!("logical operator requires bool operands, found {} and {}", lhs, rhs);
            return self.demote(span, msg, Ty::Bool);
        }
        if op.is_comparison() {
            if lhs.is_numeric() && rhs.is_numeric() {
                return Ok(Ty::Bool);
            }
            if lhs == rhs && (lhs == Ty::Str || lhs == Ty::Bool) {
                if matches!(op, BinOp::Eq | BinOp::Ne) {
                    return Ok(Ty::Bool);
                }
                let msg = format!("ordered comparison is not defined for {}", lhs);
                return self.demote(span, msg, Ty::Bool);
            }
            let msg = format!("cannot compare {} with {}", lhs, rhs);
            return self.demote(span, msg, Ty::Bool);
        }
        // Arithmetic.
        if op == BinOp::Mod && (lhs.is_float() || rhs.is_float()) {
            let msg = "modulo is only defined for integers".to_string();
            return self.demote(span, msg, Ty::I64);
        }
        match numeric_join(lhs, rhs) {
            Some(ty) => Ok(ty),
            None => {
                let msg = format!(
                    "operator '{}' is not defined for {} and {}",
                    op.symbol(),
                    lhs,
                    rhs
                );
                self.demote(span, msg, Ty::I64)
            }
        }
    }

    fn override_return_ty(&mut self, symbol: &str, span: Span) -> Result<Ty, CompileError> {
        match self.symbols.get(symbol) {
            Some(sig) => Ok(sig.return_ty),
            None => {
                let msg = format!("unknown operator override symbol '{}'", symbol);
                self.demote(span, msg, Ty::I64)
            }
        }
    }

    /// Try a free operator-override group for the given operand types.
    fn free_override(&self, key: &str, operands: &[Ty]) -> Option<(String, Ty)> {
        let group = self.groups.get(key)?;
        let mut best: Option<(u32, &FuncSig)> = None;
        let mut tied = false;
        for symbol in group {
            let sig = self.symbols.get(symbol)?;
            if sig.params.len() != operands.len() {
                continue;
            }
            let mut cost = 0u32;
            let mut viable = true;
            for (have, want) in operands.iter().zip(&sig.params) {
                match have.widening_cost(*want) {
                    Some(c) => cost += c,
                    None => {
                        viable = false;
                        break;
                    }
                }
            }
            if !viable {
                continue;
            }
            match &best {
                Some((best_cost, _)) if cost > *best_cost => {}
                Some((best_cost, _)) if cost == *best_cost => tied = true,
                _ => {
                    best = Some((cost, sig));
                    tied = false;
                }
            }
        }
        let (_, sig) = best?;
        if tied {
            return None;
        }
        Some((sig.symbol.clone(), sig.return_ty))
    }

    fn check_call(
        &mut self,
        expr: &mut Expr,
        callee: &str,
        span: Span,
    ) -> Result<Ty, CompileError> {
        // Argument types first; every special form below relies on them.
        let mut arg_tys = Vec::new();
        {
            let ExprKind::Call { args, .. } = &mut expr.kind else {
                unreachable!("check_call on non-call");
            };
            let mut args_taken = std::mem::take(args);
            for arg in &mut args_taken {
                arg_tys.push(self.check_expr(arg)?);
            }
            let ExprKind::Call { args, .. } = &mut expr.kind else {
                unreachable!("check_call on non-call");
            };
            *args = args_taken;
        }

        // Pseudo-calls bypass the symbol table.
        if let Some(name) = callee.strip_prefix('.') {
            let ty = match name {
                "format" => Ty::Str,
                _ => Ty::Void,
            };
            expr.ty = ty;
            expr.typed = true;
            return Ok(ty);
        }

        if callee == "superuser" {
            expr.ty = Ty::Void;
            expr.typed = true;
            return Ok(Ty::Void);
        }

        // `throw(kind, message)` raises; the kind must be declared.
        if callee == "throw" {
            let kind = if let ExprKind::Call { args, .. } = &expr.kind {
                args.first().and_then(|a| match &a.kind {
                    ExprKind::Str(s) => Some(s.clone()),
                    _ => None,
                })
            } else {
                None
            };
            match kind {
                Some(kind) => {
                    if !self.current_throws.contains(&kind) {
                        let msg = format!(
                            "throw kind '{}' is not declared by the enclosing function",
                            kind
                        );
                        self.demote(span, msg, Ty::Void)?;
                    }
                }
                None => {
                    let msg = "throw requires a literal string kind".to_string();
                    self.demote(span, msg, Ty::Void)?;
                }
            }
            expr.ty = Ty::Void;
            expr.typed = true;
            return Ok(Ty::Void);
        }

        // `spawn(fn())` takes a zero-argument user call.
        if callee == "spawn" {
            let ok = if let ExprKind::Call { args, .. } = &expr.kind {
                args.len() == 1
                    && matches!(
                        &args[0].kind,
                        ExprKind::Call { callee, args }
                            if args.is_empty() && self.symbols.contains_key(callee)
                    )
            } else {
                false
            };
            if !ok {
                let msg = "spawn requires a call to a zero-argument function".to_string();
                self.demote(span, msg, Ty::I64)?;
            }
            expr.ty = Ty::I64;
            expr.typed = true;
            return Ok(Ty::I64);
        }

        // `su.*` requires superuser mode.
        if callee.starts_with("su.") && !self.superuser {
            return Err(CompileError::new(
                span,
                format!("'{}' requires superuser() mode", callee),
            ));
        }

        let resolved = self.resolve_overload(callee, &arg_tys);
        let sig = match resolved {
            Ok(sig) => sig,
            Err(msg) => {
                let ty = self.demote(span, msg, Ty::I64)?;
                expr.ty = ty;
                expr.typed = true;
                return Ok(ty);
            }
        };

        // Throws contract: callee throw kinds must be covered by the
        // enclosing function's declared throws.
        for kind in &sig.throws {
            if !self.current_throws.contains(kind) {
                let msg = format!(
                    "call to '{}' may throw '{}', which the enclosing function does not declare",
                    callee, kind
                );
                self.demote(span, msg, sig.return_ty)?;
            }
        }

        // Rewrite the callee to the resolved symbol for user functions so
        // codegen emits a direct call.
        if !sig.is_builtin {
            if let ExprKind::Call { callee, .. } = &mut expr.kind {
                *callee = sig.symbol.clone();
            }
        }

        expr.ty = sig.return_ty;
        expr.typed = true;
        Ok(sig.return_ty)
    }

    /// Select the unique overload with minimum total conversion cost.
    fn resolve_overload(&self, callee: &str, args: &[Ty]) -> Result<FuncSig, String> {
        let candidates: Vec<&FuncSig> = match self.groups.get(callee) {
            Some(symbols) => symbols
                .iter()
                .filter_map(|s| self.symbols.get(s))
                .collect(),
            // A direct symbol call (pre-mangled or compiler-synthesized).
            None => match self.symbols.get(callee) {
                Some(sig) => vec![sig],
                None => return Err(format!("unknown function '{}'", callee)),
            },
        };

        let mut best: Option<(u32, &FuncSig)> = None;
        let mut tie = false;
        for sig in &candidates {
            if sig.params.len() != args.len() {
                continue;
            }
            let mut cost = 0u32;
            let mut viable = true;
            for (have, want) in args.iter().zip(&sig.params) {
                match have.widening_cost(*want) {
                    Some(c) => cost += c,
                    None => {
                        viable = false;
                        break;
                    }
                }
            }
            if !viable {
                continue;
            }
            match best {
                Some((best_cost, _)) if cost > best_cost => {}
                Some((best_cost, _)) if cost == best_cost => tie = true,
                _ => {
                    best = Some((cost, sig));
                    tie = false;
                }
            }
        }

        match best {
            Some(_) if tie => Err(format!(
                "ambiguous call to '{}' for argument types ({})",
                callee,
                format_tys(args)
            )),
            Some((_, sig)) => Ok((*sig).clone()),
            None => Err(format!(
                "no overload of '{}' accepts argument types ({})",
                callee,
                format_tys(args)
            )),
        }
    }
}

impl Default for TypeChecker {
    fn default() -> Self {
        TypeChecker::new()
    }
}

fn format_tys(tys: &[Ty]) -> String {
    tys.iter()
        .map(|t| t.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Widening join of two numeric types, if any.
fn numeric_join(a: Ty, b: Ty) -> Option<Ty> {
    if !a.is_numeric() || !b.is_numeric() {
        return None;
    }
    if a == b {
        return Some(a);
    }
    for candidate in [Ty::I32, Ty::I64, Ty::F32, Ty::F64] {
        if a.widening_cost(candidate).is_some() && b.widening_cost(candidate).is_some() {
            return Some(candidate);
        }
    }
    None
}

/// Whether any call to `superuser()` appears anywhere in the program.
fn program_calls_superuser(program: &Program) -> bool {
    fn expr_calls(expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Call { callee, args } => {
                callee == "superuser" || args.iter().any(expr_calls)
            }
            ExprKind::Unary { operand, .. } => expr_calls(operand),
            ExprKind::Binary { lhs, rhs, .. } => expr_calls(lhs) || expr_calls(rhs),
            _ => false,
        }
    }
    fn stmt_calls(stmt: &Stmt) -> bool {
        match &stmt.kind {
            StmtKind::Declare { init, .. } => expr_calls(init),
            StmtKind::Assign { value, .. } => expr_calls(value),
            StmtKind::Expr(e) => expr_calls(e),
            StmtKind::Return(e) => e.as_ref().is_some_and(expr_calls),
            StmtKind::If { arms, else_body } => {
                arms.iter()
                    .any(|a| expr_calls(&a.cond) || a.body.iter().any(stmt_calls))
                    || else_body.as_ref().is_some_and(|b| b.iter().any(stmt_calls))
            }
            StmtKind::While { cond, body } => {
                expr_calls(cond) || body.iter().any(stmt_calls)
            }
            StmtKind::ForRange {
                start, stop, step, body, ..
            } => {
                expr_calls(start)
                    || expr_calls(stop)
                    || step.as_ref().is_some_and(expr_calls)
                    || body.iter().any(stmt_calls)
            }
            StmtKind::FormatBlock { end_suffix, body } => {
                end_suffix.as_ref().is_some_and(expr_calls) || body.iter().any(stmt_calls)
            }
            StmtKind::Break | StmtKind::Continue => false,
        }
    }
    program.functions.iter().any(|f| f.body.iter().any(stmt_calls))
        || program.top_level.iter().any(stmt_calls)
}

/// Breaks/continues belonging to this loop level (nested loops bind their
/// own).
fn block_breaks(body: &[Stmt]) -> bool {
    body.iter().any(|stmt| match &stmt.kind {
        StmtKind::Break | StmtKind::Continue => true,
        StmtKind::If { arms, else_body } => {
            arms.iter().any(|a| block_breaks(&a.body))
                || else_body.as_ref().is_some_and(|b| block_breaks(b))
        }
        StmtKind::FormatBlock { body, .. } => block_breaks(body),
        _ => false,
    })
}

fn collect_declares(body: &[Stmt], out: &mut HashSet<String>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Declare { name, .. } => {
                out.insert(name.clone());
            }
            StmtKind::If { arms, else_body } => {
                for arm in arms {
                    collect_declares(&arm.body, out);
                }
                if let Some(b) = else_body {
                    collect_declares(b, out);
                }
            }
            StmtKind::While { body, .. } => collect_declares(body, out),
            StmtKind::ForRange { var, body, .. } => {
                out.insert(var.clone());
                collect_declares(body, out);
            }
            StmtKind::FormatBlock { body, .. } => collect_declares(body, out),
            _ => {}
        }
    }
}

fn collect_assign_targets(body: &[Stmt], out: &mut Vec<String>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign { name, .. } => out.push(name.clone()),
            StmtKind::If { arms, else_body } => {
                for arm in arms {
                    collect_assign_targets(&arm.body, out);
                }
                if let Some(b) = else_body {
                    collect_assign_targets(b, out);
                }
            }
            StmtKind::While { body, .. } => collect_assign_targets(body, out),
            StmtKind::ForRange { body, .. } => collect_assign_targets(body, out),
            StmtKind::FormatBlock { body, .. } => collect_assign_targets(body, out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn check(source: &str) -> Result<Program, CompileError> {
        let mut program = parse_source(source)?;
        let mut checker = TypeChecker::new();
        checker.check_program(&mut program)?;
        Ok(program)
    }

    fn check_err(source: &str) -> CompileError {
        check(source).expect_err("expected a type error")
    }

    #[test]
    fn infers_literal_types() {
        let program = check("declare x = 1\ndeclare y = 1.5\ndeclare b = true\n").unwrap();
        match &program.top_level[0].kind {
            StmtKind::Declare { init, .. } => {
                assert!(init.typed);
                assert_eq!(init.ty, Ty::I64);
            }
            other => panic!("expected declare, got {:?}", other),
        }
    }

    #[test]
    fn overload_prefers_exact_match() {
        let source = "fn f(a: i32) -> i64 {\n  return 1\n}\nfn f(a: i64) -> i64 {\n  return 2\n}\nfn g(a: i32) -> i64 {\n  return f(a)\n}\nfn h(a: i64) -> i64 {\n  return f(a)\n}\n";
        let program = check(source).unwrap();
        let g = program.functions.iter().find(|f| f.name == "g").unwrap();
        match &g.body[0].kind {
            StmtKind::Return(Some(e)) => match &e.kind {
                ExprKind::Call { callee, .. } => assert_eq!(callee, "f"),
                other => panic!("expected call, got {:?}", other),
            },
            other => panic!("expected return, got {:?}", other),
        }
        let h = program.functions.iter().find(|f| f.name == "h").unwrap();
        match &h.body[0].kind {
            StmtKind::Return(Some(e)) => match &e.kind {
                ExprKind::Call { callee, .. } => assert_eq!(callee, "f__1"),
                other => panic!("expected call, got {:?}", other),
            },
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn overload_rejects_inconvertible_argument() {
        let source = "fn f(a: i32) {\n}\nfn f(a: i64) {\n}\nfn g(b: bool) {\n  f(b)\n}\n";
        let err = check_err(source);
        assert!(err.msg.contains("no overload"));
    }

    #[test]
    fn const_binding_is_write_once() {
        let err = check_err("declare const x = 1\nx = 2\n");
        assert!(err.msg.contains("const"));
    }

    #[test]
    fn owned_cannot_be_reassigned() {
        let err = check_err("declare owned a = array_new()\na = 2\n");
        assert!(err.msg.contains("reassigned"));
    }

    #[test]
    fn owned_cannot_appear_in_loop() {
        let err = check_err("for i in 0..3 {\n  declare owned a = array_new()\n}\n");
        assert!(err.msg.contains("inside a loop"));
    }

    #[test]
    fn owned_cannot_be_returned() {
        let err = check_err(
            "fn f() -> i64 {\n  declare owned a = array_new()\n  return a\n}\nf()\n",
        );
        assert!(err.msg.contains("returned"));
    }

    #[test]
    fn if_condition_must_be_bool() {
        let err = check_err("if 1 {\n}\n");
        assert!(err.msg.contains("must be bool"));
    }

    #[test]
    fn for_bounds_must_be_i64() {
        let err = check_err("for i in 0..\"x\" {\n}\n");
        assert!(err.msg.contains("must be i64"));
    }

    #[test]
    fn literal_zero_step_rejected() {
        let err = check_err("for i in 0..10 step 0 {\n}\n");
        assert!(err.msg.contains("step"));
    }

    #[test]
    fn throws_contract_enforced() {
        let err = check_err("fn f() {\n  http_get(http_client(), \"u\")\n}\nf()\n");
        assert!(err.msg.contains("net"));
    }

    #[test]
    fn throws_contract_satisfied_by_declaration() {
        let source =
            "fn f() throws net {\n  http_get(http_client(), \"u\")\n}\n";
        assert!(check(source).is_ok());
    }

    #[test]
    fn throws_propagates_through_user_calls() {
        let source =
            "fn f() throws net {\n  http_get(http_client(), \"u\")\n}\nfn g() {\n  f()\n}\n";
        let err = check_err(source);
        assert!(err.msg.contains("net"));
    }

    #[test]
    fn parallel_loop_rejects_outer_assign() {
        let err = check_err("declare s = 0\nparallel for i in 0..10 {\n  s = s + i\n}\n");
        assert!(err.msg.contains("outside the loop"));
    }

    #[test]
    fn parallel_loop_rejects_break() {
        let err = check_err("parallel for i in 0..10 {\n  break\n}\n");
        assert!(err.msg.contains("break"));
    }

    #[test]
    fn serial_loop_allows_outer_assign() {
        assert!(check("declare s = 0\nfor i in 0..10 {\n  s = s + i\n}\n").is_ok());
    }

    #[test]
    fn su_namespace_requires_superuser() {
        let err = check_err("declare x = su.step_count()\n");
        assert!(err.msg.contains("superuser"));
    }

    #[test]
    fn superuser_downgrades_errors_to_warnings() {
        let source = "superuser()\ndeclare x = unknown_name\n";
        let mut program = parse_source(source).unwrap();
        let mut checker = TypeChecker::new();
        checker.check_program(&mut program).unwrap();
        assert!(checker.superuser_mode());
        assert!(!checker.warnings().is_empty());
        assert!(checker.warnings()[0].msg.contains("unknown name"));
    }

    #[test]
    fn superuser_unlocks_su_namespace() {
        let source = "superuser()\ndeclare x = su.step_count()\n";
        assert!(check(source).is_ok());
    }

    #[test]
    fn warnings_are_deduplicated() {
        let source = "superuser()\ndeclare a = unknown_name\ndeclare b = unknown_name\n";
        let mut program = parse_source(source).unwrap();
        let mut checker = TypeChecker::new();
        checker.check_program(&mut program).unwrap();
        assert_eq!(
            checker
                .warnings()
                .iter()
                .filter(|w| w.msg.contains("unknown name"))
                .count(),
            1
        );
    }

    #[test]
    fn numeric_join_widens() {
        assert_eq!(numeric_join(Ty::I32, Ty::I64), Some(Ty::I64));
        assert_eq!(numeric_join(Ty::I64, Ty::F32), Some(Ty::F64));
        assert_eq!(numeric_join(Ty::I32, Ty::F32), Some(Ty::F32));
        assert_eq!(numeric_join(Ty::Str, Ty::I64), None);
    }

    #[test]
    fn string_equality_is_allowed() {
        assert!(check("declare b = \"a\" == \"b\"\n").is_ok());
    }

    #[test]
    fn string_ordering_is_rejected() {
        let err = check_err("declare b = \"a\" < \"b\"\n");
        assert!(err.msg.contains("ordered comparison"));
    }

    #[test]
    fn free_operator_override_is_selected() {
        let source = "operator + (a: str, b: str) -> str {\n  return str_concat(a, b)\n}\ndeclare c = \"x\" + \"y\"\n";
        let program = check(source).unwrap();
        match &program.top_level[0].kind {
            StmtKind::Declare { init, .. } => match &init.kind {
                ExprKind::Binary { override_fn, .. } => {
                    assert_eq!(override_fn.as_deref(), Some("__ls_op_add"));
                }
                other => panic!("expected binary, got {:?}", other),
            },
            other => panic!("expected declare, got {:?}", other),
        }
    }

    #[test]
    fn member_override_takes_precedence_over_free_override() {
        let source = "class V {\n  operator + (other: i64) -> i64 {\n    return 1\n  }\n}\noperator + (a: i64, b: i64) -> i64 {\n  return 2\n}\nfn main() {\n  declare v = V()\n  declare w = v + 3\n}\n";
        let program = check(source).unwrap();
        let main = program.functions.iter().find(|f| f.name == "main").unwrap();
        match &main.body[1].kind {
            StmtKind::Declare { init, .. } => match &init.kind {
                ExprKind::Binary { override_fn, .. } => {
                    // The member symbol survives; the free override does not
                    // replace it.
                    assert_eq!(override_fn.as_deref(), Some("__ls_cls_V___ls_op_add"));
                }
                other => panic!("expected binary, got {:?}", other),
            },
            other => panic!("expected declare, got {:?}", other),
        }
    }

    #[test]
    fn spawn_requires_zero_argument_call() {
        let err = check_err("fn w() -> i64 {\n  return 1\n}\ndeclare t = spawn(w(1))\n");
        assert!(err.msg.contains("spawn"));
    }

    #[test]
    fn spawn_of_zero_arg_function_is_i64_task() {
        let source = "fn w() -> i64 {\n  return 1\n}\ndeclare t = spawn(w())\ndeclare r = await(t)\n";
        assert!(check(source).is_ok());
    }

    #[test]
    fn method_call_resolves_to_mangled_symbol() {
        let source = "class P {\n  declare x: i64\n  fn get() -> i64 {\n    return this.x\n  }\n}\nfn main() {\n  declare p = P()\n  println(p.get())\n}\n";
        let program = check(source).unwrap();
        let main = program.functions.iter().find(|f| f.name == "main").unwrap();
        match &main.body[1].kind {
            StmtKind::Expr(e) => match &e.kind {
                ExprKind::Call { args, .. } => match &args[0].kind {
                    ExprKind::Call { callee, .. } => {
                        assert_eq!(callee, "__ls_cls_P_get");
                    }
                    other => panic!("expected method call, got {:?}", other),
                },
                other => panic!("expected call, got {:?}", other),
            },
            other => panic!("expected expr, got {:?}", other),
        }
    }

    #[test]
    fn throw_requires_declared_kind() {
        let err = check_err("fn f() {\n  throw(\"io\", \"boom\")\n}\n");
        assert!(err.msg.contains("not declared"));
        assert!(check("fn f() throws io {\n  throw(\"io\", \"boom\")\n}\n").is_ok());
    }
}
