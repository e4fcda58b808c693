//! Abstract syntax tree for LineScript
//!
//! The parser produces a `Program`; the optimizer rewrites it in place and
//! the code generator consumes it. Nodes carry a `Span` for diagnostics and
//! an inferred type filled in by the type checker.

use std::collections::BTreeMap;

/// Source position, 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub fn new(line: u32, col: u32) -> Self {
        Span { line, col }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, col {}", self.line, self.col)
    }
}

/// The closed set of semantic types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ty {
    I32,
    I64,
    F32,
    F64,
    Bool,
    Str,
    Void,
}

impl Ty {
    pub fn name(self) -> &'static str {
        match self {
            Ty::I32 => "i32",
            Ty::I64 => "i64",
            Ty::F32 => "f32",
            Ty::F64 => "f64",
            Ty::Bool => "bool",
            Ty::Str => "str",
            Ty::Void => "void",
        }
    }

    /// Parse a type name as written in source.
    pub fn from_name(name: &str) -> Option<Ty> {
        match name {
            "i32" => Some(Ty::I32),
            "i64" => Some(Ty::I64),
            "f32" => Some(Ty::F32),
            "f64" => Some(Ty::F64),
            "bool" => Some(Ty::Bool),
            "str" => Some(Ty::Str),
            "void" => Some(Ty::Void),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Ty::I32 | Ty::I64 | Ty::F32 | Ty::F64)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Ty::I32 | Ty::I64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Ty::F32 | Ty::F64)
    }

    /// Number of widening steps needed to convert `self` into `target`.
    ///
    /// The lattice is `i32 ⊑ i64 ⊑ f64` and `i32 ⊑ f32 ⊑ f64`. Returns
    /// `Some(0)` for identical types and `None` when no safe widening path
    /// exists. Used as the overload-resolution conversion cost.
    pub fn widening_cost(self, target: Ty) -> Option<u32> {
        if self == target {
            return Some(0);
        }
        match (self, target) {
            (Ty::I32, Ty::I64) | (Ty::I32, Ty::F32) => Some(1),
            (Ty::I64, Ty::F64) | (Ty::F32, Ty::F64) => Some(1),
            (Ty::I32, Ty::F64) => Some(2),
            _ => None,
        }
    }

    /// Whether a value of `self` may be assigned to a binding of `target`.
    ///
    /// Numeric-to-numeric is always allowed (runtime conversion); all other
    /// pairs require identical types.
    pub fn assignable_to(self, target: Ty) -> bool {
        self == target || (self.is_numeric() && target.is_numeric())
    }
}

impl std::fmt::Display for Ty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

impl UnOp {
    /// Method key used for member/free operator overrides.
    pub fn override_key(self) -> &'static str {
        match self {
            UnOp::Neg => "__ls_uop_neg",
            UnOp::Not => "__ls_uop_not",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::Not => "!",
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow
        )
    }

    /// Method key used for member/free operator overrides.
    pub fn override_key(self) -> &'static str {
        match self {
            BinOp::Add => "__ls_op_add",
            BinOp::Sub => "__ls_op_sub",
            BinOp::Mul => "__ls_op_mul",
            BinOp::Div => "__ls_op_div",
            BinOp::Mod => "__ls_op_mod",
            BinOp::Pow => "__ls_op_pow",
            BinOp::Eq => "__ls_op_eq",
            BinOp::Ne => "__ls_op_ne",
            BinOp::Lt => "__ls_op_lt",
            BinOp::Le => "__ls_op_le",
            BinOp::Gt => "__ls_op_gt",
            BinOp::Ge => "__ls_op_ge",
            BinOp::And => "__ls_op_and",
            BinOp::Or => "__ls_op_or",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

/// Expression node variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Var(String),
    Unary {
        op: UnOp,
        operand: Box<Expr>,
        /// Mangled symbol of an operator override, attached by the parser
        /// (member override) or the type checker (free override).
        override_fn: Option<String>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        override_fn: Option<String>,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
    },
}

/// An expression with its span and inferred type.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    /// Inferred type; meaningful once `typed` is set by the checker.
    pub ty: Ty,
    pub typed: bool,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr {
            kind,
            span,
            ty: Ty::Void,
            typed: false,
        }
    }

    pub fn int(value: i64, span: Span) -> Self {
        Expr::new(ExprKind::Int(value), span)
    }

    pub fn var(name: impl Into<String>, span: Span) -> Self {
        Expr::new(ExprKind::Var(name.into()), span)
    }

    pub fn call(callee: impl Into<String>, args: Vec<Expr>, span: Span) -> Self {
        Expr::new(
            ExprKind::Call {
                callee: callee.into(),
                args,
            },
            span,
        )
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr, span: Span) -> Self {
        Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                override_fn: None,
            },
            span,
        )
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Bool(_) | ExprKind::Str(_)
        )
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.kind {
            ExprKind::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind {
            ExprKind::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Var(name) => Some(name),
            _ => None,
        }
    }

    /// Clone this expression, replacing every occurrence of the variable
    /// `name` with a clone of `replacement`.
    ///
    /// Used by macro expansion, inlining, and loop unrolling. Cloning (not
    /// sharing) keeps later rewrites at one site from affecting another.
    pub fn substitute(&self, name: &str, replacement: &Expr) -> Expr {
        let kind = match &self.kind {
            ExprKind::Var(v) if v == name => return replacement.clone(),
            ExprKind::Unary {
                op,
                operand,
                override_fn,
            } => ExprKind::Unary {
                op: *op,
                operand: Box::new(operand.substitute(name, replacement)),
                override_fn: override_fn.clone(),
            },
            ExprKind::Binary {
                op,
                lhs,
                rhs,
                override_fn,
            } => ExprKind::Binary {
                op: *op,
                lhs: Box::new(lhs.substitute(name, replacement)),
                rhs: Box::new(rhs.substitute(name, replacement)),
                override_fn: override_fn.clone(),
            },
            ExprKind::Call { callee, args } => ExprKind::Call {
                callee: callee.clone(),
                args: args
                    .iter()
                    .map(|a| a.substitute(name, replacement))
                    .collect(),
            },
            other => other.clone(),
        };
        Expr {
            kind,
            span: self.span,
            ty: self.ty,
            typed: self.typed,
        }
    }

    /// Whether the expression mentions the variable `name` anywhere.
    pub fn mentions(&self, name: &str) -> bool {
        match &self.kind {
            ExprKind::Var(v) => v == name,
            ExprKind::Unary { operand, .. } => operand.mentions(name),
            ExprKind::Binary { lhs, rhs, .. } => lhs.mentions(name) || rhs.mentions(name),
            ExprKind::Call { args, .. } => args.iter().any(|a| a.mentions(name)),
            _ => false,
        }
    }

    /// Whether the expression contains any call.
    pub fn contains_call(&self) -> bool {
        match &self.kind {
            ExprKind::Call { .. } => true,
            ExprKind::Unary { operand, .. } => operand.contains_call(),
            ExprKind::Binary { lhs, rhs, .. } => lhs.contains_call() || rhs.contains_call(),
            _ => false,
        }
    }
}

/// One `if`/`elif` arm.
#[derive(Debug, Clone, PartialEq)]
pub struct IfArm {
    pub cond: Expr,
    pub body: Vec<Stmt>,
}

/// Statement node variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Declare {
        name: String,
        /// Declared type, when spelled out; otherwise inferred from `init`.
        declared_ty: Option<Ty>,
        is_const: bool,
        owned: bool,
        /// Free function matching the initializer's constructor, resolved at
        /// declaration time for `owned` bindings.
        free_fn: Option<String>,
        init: Expr,
    },
    Assign {
        name: String,
        value: Expr,
    },
    Expr(Expr),
    Return(Option<Expr>),
    If {
        arms: Vec<IfArm>,
        else_body: Option<Vec<Stmt>>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    ForRange {
        var: String,
        start: Expr,
        stop: Expr,
        step: Option<Expr>,
        parallel: bool,
        body: Vec<Stmt>,
    },
    /// Formatted-output block: emission inside the body accumulates into a
    /// thread-local buffer, flushed with the optional end suffix on exit.
    FormatBlock {
        end_suffix: Option<Expr>,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Stmt { kind, span }
    }

    /// Clone, substituting a variable in every contained expression.
    ///
    /// A nested `declare` of the same name shadows: substitution stops for
    /// the remainder of that block.
    pub fn substitute(&self, name: &str, replacement: &Expr) -> Stmt {
        let kind = match &self.kind {
            StmtKind::Declare {
                name: n,
                declared_ty,
                is_const,
                owned,
                free_fn,
                init,
            } => StmtKind::Declare {
                name: n.clone(),
                declared_ty: *declared_ty,
                is_const: *is_const,
                owned: *owned,
                free_fn: free_fn.clone(),
                init: init.substitute(name, replacement),
            },
            StmtKind::Assign { name: n, value } => StmtKind::Assign {
                name: n.clone(),
                value: value.substitute(name, replacement),
            },
            StmtKind::Expr(e) => StmtKind::Expr(e.substitute(name, replacement)),
            StmtKind::Return(e) => {
                StmtKind::Return(e.as_ref().map(|e| e.substitute(name, replacement)))
            }
            StmtKind::If { arms, else_body } => StmtKind::If {
                arms: arms
                    .iter()
                    .map(|arm| IfArm {
                        cond: arm.cond.substitute(name, replacement),
                        body: substitute_block(&arm.body, name, replacement),
                    })
                    .collect(),
                else_body: else_body
                    .as_ref()
                    .map(|b| substitute_block(b, name, replacement)),
            },
            StmtKind::While { cond, body } => StmtKind::While {
                cond: cond.substitute(name, replacement),
                body: substitute_block(body, name, replacement),
            },
            StmtKind::ForRange {
                var,
                start,
                stop,
                step,
                parallel,
                body,
            } => StmtKind::ForRange {
                var: var.clone(),
                start: start.substitute(name, replacement),
                stop: stop.substitute(name, replacement),
                step: step.as_ref().map(|s| s.substitute(name, replacement)),
                parallel: *parallel,
                // The loop variable shadows within the body.
                body: if var == name {
                    body.clone()
                } else {
                    substitute_block(body, name, replacement)
                },
            },
            StmtKind::FormatBlock { end_suffix, body } => StmtKind::FormatBlock {
                end_suffix: end_suffix
                    .as_ref()
                    .map(|e| e.substitute(name, replacement)),
                body: substitute_block(body, name, replacement),
            },
            StmtKind::Break => StmtKind::Break,
            StmtKind::Continue => StmtKind::Continue,
        };
        Stmt {
            kind,
            span: self.span,
        }
    }

    /// Whether the statement (or anything nested in it) mentions `name`.
    pub fn mentions(&self, name: &str) -> bool {
        match &self.kind {
            StmtKind::Declare { init, .. } => init.mentions(name),
            StmtKind::Assign { name: n, value } => n == name || value.mentions(name),
            StmtKind::Expr(e) => e.mentions(name),
            StmtKind::Return(e) => e.as_ref().is_some_and(|e| e.mentions(name)),
            StmtKind::If { arms, else_body } => {
                arms.iter()
                    .any(|a| a.cond.mentions(name) || a.body.iter().any(|s| s.mentions(name)))
                    || else_body
                        .as_ref()
                        .is_some_and(|b| b.iter().any(|s| s.mentions(name)))
            }
            StmtKind::While { cond, body } => {
                cond.mentions(name) || body.iter().any(|s| s.mentions(name))
            }
            StmtKind::ForRange {
                start,
                stop,
                step,
                body,
                ..
            } => {
                start.mentions(name)
                    || stop.mentions(name)
                    || step.as_ref().is_some_and(|s| s.mentions(name))
                    || body.iter().any(|s| s.mentions(name))
            }
            StmtKind::FormatBlock { end_suffix, body } => {
                end_suffix.as_ref().is_some_and(|e| e.mentions(name))
                    || body.iter().any(|s| s.mentions(name))
            }
            StmtKind::Break | StmtKind::Continue => false,
        }
    }
}

fn substitute_block(block: &[Stmt], name: &str, replacement: &Expr) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(block.len());
    let mut shadowed = false;
    for stmt in block {
        if shadowed {
            out.push(stmt.clone());
            continue;
        }
        if let StmtKind::Declare { name: n, .. } = &stmt.kind {
            if n == name {
                // The declare's own initializer still sees the outer binding.
                out.push(stmt.substitute(name, replacement));
                shadowed = true;
                continue;
            }
        }
        out.push(stmt.substitute(name, replacement));
    }
    out
}

/// Member access levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Protected,
    Private,
}

/// Operator kind for operator-override functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    Binary(BinOp),
    Unary(UnOp),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Ty,
}

/// A function definition (free function, method, flag handler, or operator
/// override).
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    /// Unique (possibly mangled) symbol.
    pub name: String,
    /// Public name before mangling; overload groups key on this.
    pub source_name: String,
    pub params: Vec<Param>,
    pub return_ty: Ty,
    pub throws: Vec<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
    pub class_owner: Option<String>,
    pub access: Access,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_final: bool,
    pub operator_kind: Option<OperatorKind>,
    /// CLI flag name (with dashes) for `flag name()` handlers.
    pub cli_flag: Option<String>,
    pub is_extern: bool,
    pub is_inline: bool,
}

impl Function {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        let name = name.into();
        Function {
            source_name: name.clone(),
            name,
            params: Vec::new(),
            return_ty: Ty::Void,
            throws: Vec::new(),
            body: Vec::new(),
            span,
            class_owner: None,
            access: Access::Public,
            is_static: false,
            is_virtual: false,
            is_override: false,
            is_final: false,
            operator_kind: None,
            cli_flag: None,
            is_extern: false,
            is_inline: false,
        }
    }
}

/// A class field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub ty: Ty,
    pub access: Access,
    /// Declaring class (fields are never redeclared in subclasses).
    pub owner: String,
}

/// One method overload as seen by dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSig {
    /// Mangled symbol: `__ls_cls_<Class>_<key>[_<idx>]`.
    pub symbol: String,
    pub owner: String,
    pub access: Access,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_final: bool,
    /// Parameter types excluding the receiver.
    pub params: Vec<Ty>,
    pub return_ty: Ty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassInfo {
    pub name: String,
    pub base: Option<String>,
    pub fields: BTreeMap<String, FieldInfo>,
    /// Method key (source name or synthetic operator key) → overload list.
    pub methods: BTreeMap<String, Vec<MethodSig>>,
    pub span: Span,
}

impl ClassInfo {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        ClassInfo {
            name: name.into(),
            base: None,
            fields: BTreeMap::new(),
            methods: BTreeMap::new(),
            span,
        }
    }
}

/// Macro parameter kinds. Only `expr` is fully implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroParamKind {
    Expr,
    Stmt,
    Item,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacroParam {
    pub name: String,
    pub kind: MacroParamKind,
}

/// A macro declaration; expanded at parse time via `expand(name(args))`.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroDef {
    pub name: String,
    pub params: Vec<MacroParam>,
    pub body: Expr,
    pub span: Span,
}

/// A whole translation unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub functions: Vec<Function>,
    pub classes: BTreeMap<String, ClassInfo>,
    pub macros: BTreeMap<String, MacroDef>,
    /// Declared CLI flag names, in declaration order.
    pub flags: Vec<String>,
    /// Top-level statements; wrapped into `__linescript_script_main` when no
    /// explicit entry exists.
    pub top_level: Vec<Stmt>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    pub fn find_function(&self, symbol: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == symbol)
    }

    /// Look up a field, walking the base-class chain.
    pub fn resolve_field(&self, class: &str, field: &str) -> Option<&FieldInfo> {
        let mut current = Some(class);
        while let Some(name) = current {
            let info = self.classes.get(name)?;
            if let Some(f) = info.fields.get(field) {
                return Some(f);
            }
            current = info.base.as_deref();
        }
        None
    }

    /// Look up method overloads by key, walking the base-class chain.
    /// Returns the most-derived class that defines the key.
    pub fn resolve_methods(&self, class: &str, key: &str) -> Option<&Vec<MethodSig>> {
        let mut current = Some(class);
        while let Some(name) = current {
            let info = self.classes.get(name)?;
            if let Some(m) = info.methods.get(key) {
                return Some(m);
            }
            current = info.base.as_deref();
        }
        None
    }
}
