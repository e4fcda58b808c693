//! Dead-code elimination
//!
//! Three block-level rewrites: statements after a terminator are erased,
//! literal branch conditions collapse `if`/`while` structures, and dead
//! stores are pruned (outside loop bodies) under the shared side-effect
//! discipline.

use crate::ast::{Stmt, StmtKind};
use crate::optimizer::expr_is_pure;

/// Erase statements following a `return`/`break`/`continue` in the same
/// block.
pub fn erase_after_terminator(block: &mut Vec<Stmt>) -> bool {
    let terminator = block.iter().position(|s| {
        matches!(
            s.kind,
            StmtKind::Return(_) | StmtKind::Break | StmtKind::Continue
        )
    });
    match terminator {
        Some(idx) if idx + 1 < block.len() => {
            block.truncate(idx + 1);
            true
        }
        _ => false,
    }
}

/// Collapse `if` statements with literal conditions and delete
/// `while false` loops.
pub fn collapse_literal_branches(block: &mut Vec<Stmt>) -> bool {
    enum Action {
        TakeFirstArm,
        DropFirstArm,
        DeleteStmt,
        Keep,
    }

    let mut changed = false;
    let mut idx = 0;
    while idx < block.len() {
        let action = match &block[idx].kind {
            // Drop arms that are literally false; take one that is
            // literally true.
            StmtKind::If { arms, .. } => match arms.first().and_then(|a| a.cond.as_bool()) {
                Some(true) => Action::TakeFirstArm,
                Some(false) => Action::DropFirstArm,
                None => Action::Keep,
            },
            StmtKind::While { cond, .. } if cond.as_bool() == Some(false) => Action::DeleteStmt,
            _ => Action::Keep,
        };

        match action {
            Action::TakeFirstArm => {
                let StmtKind::If { arms, .. } = &mut block[idx].kind else {
                    unreachable!()
                };
                let body = std::mem::take(&mut arms[0].body);
                block.splice(idx..=idx, body);
                changed = true;
            }
            Action::DropFirstArm => {
                let StmtKind::If { arms, else_body } = &mut block[idx].kind else {
                    unreachable!()
                };
                arms.remove(0);
                if arms.is_empty() {
                    let replacement = else_body.take().unwrap_or_default();
                    block.splice(idx..=idx, replacement);
                }
                changed = true;
            }
            Action::DeleteStmt => {
                block.remove(idx);
                changed = true;
            }
            Action::Keep => idx += 1,
        }
    }
    changed
}

/// Remove stores that are never read, and pure expression statements.
///
/// Only valid outside loop bodies (a loop re-enters the block). A `declare`
/// is removed only when its name is not mentioned again at all; an
/// assignment is removed when the next access to the name is another plain
/// overwrite. `owned` bindings always survive (their cleanup is an effect).
pub fn prune_dead_stores(block: &mut Vec<Stmt>) -> bool {
    let mut changed = false;
    let mut idx = 0;
    while idx < block.len() {
        let removable = match &block[idx].kind {
            StmtKind::Declare {
                name,
                owned: false,
                init,
                ..
            } if expr_is_pure(init) => {
                !block[idx + 1..].iter().any(|s| s.mentions(name))
            }
            StmtKind::Assign { name, value } if expr_is_pure(value) => {
                overwritten_before_read(&block[idx + 1..], name)
            }
            StmtKind::Expr(e) if expr_is_pure(e) => true,
            _ => false,
        };
        if removable {
            block.remove(idx);
            changed = true;
        } else {
            idx += 1;
        }
    }
    changed
}

/// Whether the next access to `name` in `rest` is a plain overwrite (or
/// there is no access at all). Control flow that mentions the name is
/// treated as a read.
fn overwritten_before_read(rest: &[Stmt], name: &str) -> bool {
    for stmt in rest {
        match &stmt.kind {
            StmtKind::Assign { name: target, value } if target == name => {
                return !value.mentions(name);
            }
            StmtKind::Declare {
                name: target,
                init,
                ..
            } if target == name => {
                // The shadowing declare's initializer may still read the
                // old binding.
                return !init.mentions(name);
            }
            other if stmt_mentions(other, name) => return false,
            _ => {}
        }
    }
    true
}

fn stmt_mentions(kind: &StmtKind, name: &str) -> bool {
    let probe = Stmt::new(kind.clone(), crate::ast::Span::default());
    probe.mentions(name)
}
