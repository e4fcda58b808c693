//! Statement lowering
//!
//! Every block is a cleanup scope: `owned` bindings register their free
//! function here and are released on every exit path. `return` unwinds all
//! live scopes inside-out; `break`/`continue` unwind up to and including
//! the innermost loop scope. Formatted-output blocks install a scope guard
//! so the format buffer is released on early exits too.

use super::{Cleanup, CleanupScope, CodeGen, CodeGenError, c_ty, escape_c_string};
use crate::ast::{Expr, Stmt, StmtKind, Ty};

impl CodeGen {
    pub(super) fn emit_stmt(&mut self, stmt: &Stmt) -> Result<(), CodeGenError> {
        if self.superuser() && !matches!(stmt.kind, StmtKind::Break | StmtKind::Continue) {
            self.line(&format!("ls_su_guard({});", stmt.span.line))?;
        }

        match &stmt.kind {
            StmtKind::Declare {
                name,
                declared_ty,
                is_const,
                owned,
                free_fn,
                init,
            } => {
                let ty = declared_ty.unwrap_or(init.ty);
                let value = self.store_value(init, ty);
                let decl = if ty == Ty::Str {
                    format!("const char *{} = {};", name, value)
                } else if *is_const {
                    format!("const {} {} = {};", c_ty(ty), name, value)
                } else {
                    format!("{} {} = {};", c_ty(ty), name, value)
                };
                self.line(&decl)?;
                if *owned {
                    if let Some(free_fn) = free_fn {
                        self.scopes
                            .last_mut()
                            .expect("scope stack")
                            .cleanups
                            .push(Cleanup {
                                var: name.clone(),
                                free_fn: format!("ls_{}", free_fn),
                            });
                    }
                }
                Ok(())
            }
            StmtKind::Assign { name, value } => {
                let rendered = self.store_value(value, value.ty);
                self.line(&format!("{} = {};", name, rendered))
            }
            StmtKind::Expr(expr) => {
                let rendered = self.expr_to_c(expr);
                self.line(&format!("{};", rendered))
            }
            StmtKind::Return(value) => self.emit_return(value.as_ref()),
            StmtKind::If { arms, else_body } => {
                for (idx, arm) in arms.iter().enumerate() {
                    let cond = self.expr_to_c(&arm.cond);
                    if idx == 0 {
                        self.line(&format!("if ({}) {{", cond))?;
                    } else {
                        self.line(&format!("}} else if ({}) {{", cond))?;
                    }
                    self.emit_scoped_body(&arm.body, false)?;
                }
                if let Some(body) = else_body {
                    self.line("} else {")?;
                    self.emit_scoped_body(body, false)?;
                }
                self.line("}")
            }
            StmtKind::While { cond, body } => {
                let cond = self.expr_to_c(cond);
                self.line(&format!("while ({}) {{", cond))?;
                self.emit_scoped_body(body, true)?;
                self.line("}")
            }
            StmtKind::ForRange { .. } => self.emit_for(stmt),
            StmtKind::FormatBlock { end_suffix, body } => {
                self.emit_format_block(end_suffix.as_ref(), body)
            }
            StmtKind::Break => {
                self.emit_cleanups_through_loop()?;
                self.line("break;")
            }
            StmtKind::Continue => {
                self.emit_cleanups_through_loop()?;
                self.line("continue;")
            }
        }
    }

    /// A value stored into a binding: `str` values are held so references
    /// into the shared format/scratch buffer become owned heap copies.
    fn store_value(&self, expr: &Expr, target_ty: Ty) -> String {
        let rendered = self.expr_to_c(expr);
        if target_ty == Ty::Str && expr.ty == Ty::Str {
            format!("ls_str_hold({})", rendered)
        } else {
            rendered
        }
    }

    /// Emit `{ body }` contents as a fresh cleanup scope inside braces the
    /// caller already opened.
    pub(super) fn emit_scoped_body(
        &mut self,
        body: &[Stmt],
        is_loop: bool,
    ) -> Result<(), CodeGenError> {
        self.indent += 1;
        self.scopes.push(CleanupScope {
            cleanups: Vec::new(),
            is_loop,
        });
        for stmt in body {
            self.emit_stmt(stmt)?;
        }
        self.emit_scope_cleanups_on_exit()?;
        self.scopes.pop();
        self.indent -= 1;
        Ok(())
    }

    fn emit_return(&mut self, value: Option<&Expr>) -> Result<(), CodeGenError> {
        let pending = self.scopes.iter().any(|s| !s.cleanups.is_empty());
        match value {
            Some(expr) => {
                let rendered = self.store_value(expr, expr.ty);
                if pending {
                    // Evaluate before unwinding so cleanups cannot
                    // invalidate the value.
                    self.line("{")?;
                    self.indent += 1;
                    self.line(&format!("{} __ls_ret = {};", c_ty(expr.ty), rendered))?;
                    self.emit_all_cleanups()?;
                    self.line("return __ls_ret;")?;
                    self.indent -= 1;
                    self.line("}")
                } else {
                    self.line(&format!("return {};", rendered))
                }
            }
            None => {
                if pending {
                    self.emit_all_cleanups()?;
                }
                self.line("return;")
            }
        }
    }

    fn emit_format_block(
        &mut self,
        end_suffix: Option<&Expr>,
        body: &[Stmt],
    ) -> Result<(), CodeGenError> {
        self.line("ls_format_begin();")?;
        self.line("{")?;
        self.indent += 1;
        // The guard releases the buffer on early exits (return/break).
        self.scopes.push(CleanupScope {
            cleanups: vec![Cleanup {
                var: String::new(),
                free_fn: "ls_format_abort".to_string(),
            }],
            is_loop: false,
        });
        for stmt in body {
            self.emit_stmt(stmt)?;
        }
        // Normal exit: release owned bindings of this scope, then flush the
        // buffer (the guard itself must not run).
        let scope = self.scopes.pop().expect("format scope");
        for cleanup in scope.cleanups.iter().rev() {
            if !cleanup.var.is_empty() {
                self.line(&format!("{}({});", cleanup.free_fn, cleanup.var))?;
            }
        }
        let suffix = end_suffix
            .map(|e| self.expr_to_c(e))
            .unwrap_or_else(|| escape_c_string(""));
        self.line(&format!("ls_emit_text(ls_format_end({}));", suffix))?;
        self.indent -= 1;
        self.line("}")
    }

    /// Cleanups of the innermost scope, in reverse registration order
    /// (normal fall-through exit).
    pub(super) fn emit_scope_cleanups_on_exit(&mut self) -> Result<(), CodeGenError> {
        let scope = self.scopes.last().expect("scope stack");
        let lines = cleanup_lines(scope);
        for line in lines {
            self.line(&line)?;
        }
        Ok(())
    }

    /// Cleanups of every live scope, inside-out (used by `return`).
    fn emit_all_cleanups(&mut self) -> Result<(), CodeGenError> {
        let lines: Vec<String> = self
            .scopes
            .iter()
            .rev()
            .flat_map(cleanup_lines)
            .collect();
        for line in lines {
            self.line(&line)?;
        }
        Ok(())
    }

    /// Cleanups up to and including the innermost loop scope (used by
    /// `break`/`continue`).
    fn emit_cleanups_through_loop(&mut self) -> Result<(), CodeGenError> {
        let mut lines = Vec::new();
        for scope in self.scopes.iter().rev() {
            lines.extend(cleanup_lines(scope));
            if scope.is_loop {
                break;
            }
        }
        for line in lines {
            self.line(&line)?;
        }
        Ok(())
    }
}

fn cleanup_lines(scope: &CleanupScope) -> Vec<String> {
    scope
        .cleanups
        .iter()
        .rev()
        .map(|c| {
            if c.var.is_empty() {
                format!("{}();", c.free_fn)
            } else {
                format!("{}({});", c.free_fn, c.var)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::{EmitOptions, tests::generate};

    fn r#gen(source: &str) -> String {
        generate(source, EmitOptions::default())
    }

    #[test]
    fn owned_binding_frees_on_fall_through() {
        let c = r#gen("fn main() -> i64 {\n  declare owned a = array_new()\n  array_push(a, \"x\")\n  return 0\n}\n");
        // The return sees a pending cleanup and frees before returning.
        assert!(c.contains("ls_array_free(a);"));
        let free_pos = c.find("ls_array_free(a);").unwrap();
        let ret_pos = c.find("return __ls_ret;").unwrap();
        assert!(free_pos < ret_pos);
    }

    #[test]
    fn owned_binding_frees_exactly_once_without_return() {
        let c = r#gen("fn helper() {\n  declare owned a = array_new()\n  array_push(a, \"x\")\n}\nfn main() -> i64 {\n  helper()\n  return 0\n}\n");
        assert_eq!(c.matches("ls_array_free(a);").count(), 1);
    }

    #[test]
    fn return_unwinds_scopes_inside_out() {
        let source = "fn main() -> i64 {\n  declare owned a = array_new()\n  if cli_has(\"x\") {\n    declare owned b = dict_new()\n    return 1\n  }\n  return 0\n}\n";
        let c = r#gen(source);
        let b_free = c.find("ls_dict_free(b);").expect("inner free");
        let a_free = c.find("ls_array_free(a);").expect("outer free");
        assert!(b_free < a_free, "inner scope must unwind first");
    }

    #[test]
    fn break_unwinds_up_to_loop_scope_only() {
        let source = "fn main() -> i64 {\n  declare owned a = array_new()\n  while cli_has(\"x\") {\n    break\n  }\n  return 0\n}\n";
        let c = r#gen(source);
        let break_pos = c.find("break;").unwrap();
        // The outer owned binding is not freed before break.
        let free_pos = c.find("ls_array_free(a);").unwrap();
        assert!(free_pos > break_pos);
    }

    #[test]
    fn string_declares_hold_their_value() {
        let c = r#gen("fn main() -> i64 {\n  declare s = formatOutput(1)\n  println(s)\n  return 0\n}\n");
        assert!(c.contains("const char *s = ls_str_hold(ls_format_value(1LL));"));
    }

    #[test]
    fn string_returns_hold_their_value() {
        let c = r#gen("fn name() -> str {\n  return formatOutput(7)\n}\nfn main() -> i64 {\n  println(name())\n  return 0\n}\n");
        assert!(c.contains("return ls_str_hold(ls_format_value(7LL));"));
    }

    #[test]
    fn format_block_brackets_body_with_begin_end() {
        let c = r#gen("formatOutput(\"!\") do\n  print(\"x\")\nend\n");
        assert!(c.contains("ls_format_begin();"));
        assert!(c.contains("ls_emit_text(ls_format_end(\"!\"));"));
        let begin = c.find("ls_format_begin();").unwrap();
        let end = c.find("ls_emit_text(ls_format_end(").unwrap();
        assert!(begin < end);
    }

    #[test]
    fn format_block_guard_runs_on_early_return() {
        let source = "fn main() -> i64 {\n  formatOutput() do\n    print(\"x\")\n    return 1\n  end\n  return 0\n}\n";
        let c = r#gen(source);
        assert!(c.contains("ls_format_abort();"));
    }

    #[test]
    fn elif_chain_emits_else_if() {
        let c = r#gen(
            "declare x = cli_count()\nif x == 1 {\n  println(1)\n}\nelif x == 2 {\n  println(2)\n}\nelse {\n  println(3)\n}\n",
        );
        assert!(c.contains("} else if ("));
        assert!(c.contains("} else {"));
    }

    #[test]
    fn superuser_mode_emits_step_guards() {
        let c = r#gen("superuser()\nprintln(1)\n");
        assert!(c.contains("ls_su_guard("));
    }
}
