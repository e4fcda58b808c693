//! Recursive-descent parser for LineScript
//!
//! One token of lookahead, augmented by a non-newline peek used to decide
//! whether a `do`/`{`/`->`/`throws` follows a parameter list. Newlines are
//! optional statement terminators; `;` is also accepted, and a closing
//! brace/`end`/`else`/`elif` ends a block without a terminator.
//!
//! The parser also owns class resolution (field layout, method symbol
//! mangling, override legality), macro expansion via `expand(...)`, and the
//! lowering of typed field access onto the string-keyed `object_get`/
//! `object_set` runtime.

use crate::ast::{
    Access, BinOp, ClassInfo, Expr, ExprKind, FieldInfo, Function, IfArm, MacroDef, MacroParam,
    MacroParamKind, MethodSig, OperatorKind, Param, Program, Span, Stmt, StmtKind, Ty, UnOp,
};
use crate::builtins::constructor_free_fn;
use crate::error::CompileError;
use crate::lexer::{Token, TokenKind, tokenize};
use std::collections::HashMap;

/// Pseudo-calls recognized after a leading `.`; these bypass the symbol
/// table entirely.
const PSEUDO_CALLS: &[&str] = &["format", "stateSpeed", "freeConsole"];

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    program: Program,
    /// Scope stack mapping variable name → class name, for member lowering.
    var_classes: Vec<HashMap<String, String>>,
    /// Class whose method body is currently being parsed (access control).
    current_class: Option<String>,
    /// Count of declarations per public name, for pre-mangling collisions.
    overload_counts: HashMap<String, u32>,
    /// Explicit field default literals, keyed (class, field).
    field_defaults: HashMap<(String, String), Expr>,
}

impl Parser {
    pub fn new(source: &str) -> Result<Self, CompileError> {
        let tokens = tokenize(source)?;
        Ok(Parser {
            tokens,
            pos: 0,
            program: Program::new(),
            var_classes: vec![HashMap::new()],
            current_class: None,
            overload_counts: HashMap::new(),
            field_defaults: HashMap::new(),
        })
    }

    pub fn parse(mut self) -> Result<Program, CompileError> {
        loop {
            self.skip_terminators();
            if self.at_eof() {
                break;
            }

            if self.check("macro") {
                self.parse_macro()?;
            } else if self.check("class") {
                self.parse_class()?;
            } else if self.check("flag") {
                self.parse_flag()?;
            } else if self.check("operator") {
                let func = self.parse_operator_fn(None)?;
                self.program.functions.push(func);
            } else if self.starts_function() {
                let func = self.parse_function()?;
                self.program.functions.push(func);
            } else {
                let stmt = self.parse_stmt()?;
                self.program.top_level.push(stmt);
                self.expect_terminator()?;
            }
        }
        Ok(self.program)
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, k: usize) -> &Token {
        let idx = (self.pos + k).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    /// Peek the k-th token ahead, skipping newlines.
    fn look_non_nl(&self, k: usize) -> &Token {
        let mut idx = self.pos;
        let mut remaining = k;
        loop {
            if idx >= self.tokens.len() - 1 {
                return &self.tokens[self.tokens.len() - 1];
            }
            if self.tokens[idx].kind == TokenKind::Newline {
                idx += 1;
                continue;
            }
            if remaining == 0 {
                return &self.tokens[idx];
            }
            remaining -= 1;
            idx += 1;
        }
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn check(&self, text: &str) -> bool {
        self.peek().is(text)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn consume(&mut self, text: &str) -> bool {
        if self.check(text) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, text: &str, context: &str) -> Result<Token, CompileError> {
        if self.check(text) {
            Ok(self.advance())
        } else {
            let tok = self.peek();
            Err(CompileError::new(
                tok.span,
                format!("expected '{}' {}, found '{}'", text, context, tok.text),
            ))
        }
    }

    fn expect_ident(&mut self, context: &str) -> Result<Token, CompileError> {
        if self.peek().kind == TokenKind::Ident {
            Ok(self.advance())
        } else {
            let tok = self.peek();
            Err(CompileError::new(
                tok.span,
                format!("expected identifier {}, found '{}'", context, tok.text),
            ))
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek().kind == TokenKind::Newline {
            self.advance();
        }
    }

    fn skip_terminators(&mut self) {
        while self.peek().kind == TokenKind::Newline || self.check(";") {
            self.advance();
        }
    }

    /// A statement must be followed by a newline, a `;`, or a block closer.
    fn expect_terminator(&mut self) -> Result<(), CompileError> {
        if self.peek().kind == TokenKind::Newline || self.check(";") {
            self.skip_terminators();
            return Ok(());
        }
        if self.check("}") || self.check("end") || self.check("else") || self.check("elif")
            || self.at_eof()
        {
            return Ok(());
        }
        let tok = self.peek();
        Err(CompileError::new(
            tok.span,
            format!("expected end of statement, found '{}'", tok.text),
        ))
    }

    fn parse_type(&mut self, context: &str) -> Result<Ty, CompileError> {
        let tok = self.advance();
        Ty::from_name(&tok.text).ok_or_else(|| {
            CompileError::new(tok.span, format!("expected type {}, found '{}'", context, tok.text))
        })
    }

    // ------------------------------------------------------------------
    // Scope helpers
    // ------------------------------------------------------------------

    fn push_scope(&mut self) {
        self.var_classes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.var_classes.pop();
    }

    fn bind_class(&mut self, var: &str, class: &str) {
        if let Some(scope) = self.var_classes.last_mut() {
            scope.insert(var.to_string(), class.to_string());
        }
    }

    fn class_of_var(&self, var: &str) -> Option<&str> {
        for scope in self.var_classes.iter().rev() {
            if let Some(c) = scope.get(var) {
                return Some(c);
            }
        }
        None
    }

    fn class_is_or_derives(&self, sub: &str, base: &str) -> bool {
        let mut current = Some(sub);
        while let Some(name) = current {
            if name == base {
                return true;
            }
            current = self
                .program
                .classes
                .get(name)
                .and_then(|c| c.base.as_deref());
        }
        false
    }

    /// Assign a unique symbol for a public name, mangling on collision.
    fn mangle_symbol(&mut self, source_name: &str) -> String {
        let count = self.overload_counts.entry(source_name.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            source_name.to_string()
        } else {
            format!("{}__{}", source_name, *count - 1)
        }
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn starts_function(&self) -> bool {
        if self.check("fn") || self.check("func") {
            return true;
        }
        if self.check("inline") || self.check("extern") {
            // `inline`/`extern` prefixes may stack in either order.
            let next = self.peek_at(1);
            return next.is("fn") || next.is("func") || next.is("inline") || next.is("extern");
        }
        false
    }

    fn parse_function(&mut self) -> Result<Function, CompileError> {
        let mut is_inline = false;
        let mut is_extern = false;
        loop {
            if self.consume("inline") {
                is_inline = true;
            } else if self.consume("extern") {
                is_extern = true;
            } else {
                break;
            }
        }
        if !self.consume("fn") && !self.consume("func") {
            let tok = self.peek();
            return Err(CompileError::new(
                tok.span,
                format!("expected 'fn' after function modifiers, found '{}'", tok.text),
            ));
        }

        let name_tok = self.expect_ident("after 'fn'")?;
        let mut func = Function::new(self.mangle_symbol(&name_tok.text), name_tok.span);
        func.source_name = name_tok.text.clone();
        func.is_inline = is_inline;
        func.is_extern = is_extern;

        self.parse_signature(&mut func)?;

        if is_extern {
            self.expect_terminator()?;
            return Ok(func);
        }

        self.push_scope();
        func.body = self.parse_block()?;
        self.pop_scope();
        Ok(func)
    }

    /// Parse `(params) [-> type] [throws A, B]` into `func`.
    fn parse_signature(&mut self, func: &mut Function) -> Result<(), CompileError> {
        self.expect("(", "to begin parameter list")?;
        self.skip_newlines();
        while !self.check(")") {
            let name = self.expect_ident("as parameter name")?;
            self.expect(":", "after parameter name")?;
            let ty = self.parse_type("for parameter")?;
            func.params.push(Param {
                name: name.text,
                ty,
            });
            self.skip_newlines();
            if !self.consume(",") {
                break;
            }
            self.skip_newlines();
        }
        self.expect(")", "to close parameter list")?;

        if self.look_non_nl(0).is("->") {
            self.skip_newlines();
            self.advance();
            func.return_ty = self.parse_type("after '->'")?;
        }

        if self.look_non_nl(0).is("throws") {
            self.skip_newlines();
            self.advance();
            loop {
                let kind = self.expect_ident("as throw kind")?;
                func.throws.push(kind.text);
                if !self.consume(",") {
                    break;
                }
            }
        }
        Ok(())
    }

    /// `flag name-with-dashes() block` declares a startup handler.
    fn parse_flag(&mut self) -> Result<(), CompileError> {
        let kw = self.expect("flag", "")?;
        let first = self.expect_ident("as flag name")?;
        let mut flag_name = first.text.clone();
        // Dashes glue onto the flag name only when written without spaces.
        let mut end_col = first.span.col + first.text.len() as u32;
        while self.check("-")
            && self.peek().span.line == first.span.line
            && self.peek().span.col == end_col
        {
            self.advance();
            let part = self.expect_ident("after '-' in flag name")?;
            flag_name.push('-');
            flag_name.push_str(&part.text);
            end_col = part.span.col + part.text.len() as u32;
        }

        if self.program.flags.contains(&flag_name) {
            return Err(CompileError::new(
                kw.span,
                format!("duplicate flag declaration '{}'", flag_name),
            ));
        }

        let symbol = format!("__ls_flag_{}", flag_name.replace('-', "_"));
        let mut func = Function::new(symbol, kw.span);
        func.cli_flag = Some(flag_name.clone());

        self.expect("(", "after flag name")?;
        self.expect(")", "flag handlers take no parameters")?;
        self.push_scope();
        func.body = self.parse_block()?;
        self.pop_scope();

        self.program.flags.push(flag_name);
        self.program.functions.push(func);
        Ok(())
    }

    /// Free operator override: `operator [unary] OP (params) -> type block`.
    fn parse_operator_fn(&mut self, class: Option<&str>) -> Result<Function, CompileError> {
        let kw = self.expect("operator", "")?;
        let unary = self.consume("unary");
        let op_tok = self.advance();

        let (key, operator_kind) = if unary {
            let op = match op_tok.text.as_str() {
                "-" => UnOp::Neg,
                "!" => UnOp::Not,
                other => {
                    return Err(CompileError::new(
                        op_tok.span,
                        format!("'{}' is not an overridable unary operator", other),
                    ));
                }
            };
            (op.override_key(), OperatorKind::Unary(op))
        } else {
            let op = match op_tok.text.as_str() {
                "+" => BinOp::Add,
                "-" => BinOp::Sub,
                "*" => BinOp::Mul,
                "/" => BinOp::Div,
                "%" => BinOp::Mod,
                "**" => BinOp::Pow,
                "==" => BinOp::Eq,
                "!=" => BinOp::Ne,
                "<" => BinOp::Lt,
                "<=" => BinOp::Le,
                ">" => BinOp::Gt,
                ">=" => BinOp::Ge,
                other => {
                    return Err(CompileError::new(
                        op_tok.span,
                        format!("'{}' is not an overridable operator", other),
                    ));
                }
            };
            (op.override_key(), OperatorKind::Binary(op))
        };

        let symbol = match class {
            Some(_) => key.to_string(), // method symbol assigned by the class resolver
            None => self.mangle_symbol(key),
        };
        let mut func = Function::new(symbol, kw.span);
        func.source_name = key.to_string();
        func.operator_kind = Some(operator_kind);

        self.parse_signature(&mut func)?;
        self.push_scope();
        if let Some(cls) = class {
            self.bind_class("this", cls);
        }
        func.body = self.parse_block()?;
        self.pop_scope();
        Ok(func)
    }

    // ------------------------------------------------------------------
    // Macros
    // ------------------------------------------------------------------

    fn parse_macro(&mut self) -> Result<(), CompileError> {
        let kw = self.expect("macro", "")?;
        let name = self.expect_ident("after 'macro'")?;
        if self.program.macros.contains_key(&name.text) {
            return Err(CompileError::new(
                name.span,
                format!("duplicate macro declaration '{}'", name.text),
            ));
        }

        self.expect("(", "after macro name")?;
        let mut params = Vec::new();
        while !self.check(")") {
            let pname = self.expect_ident("as macro parameter")?;
            self.expect(":", "after macro parameter name")?;
            let kind_tok = self.advance();
            let kind = match kind_tok.text.as_str() {
                "expr" => MacroParamKind::Expr,
                "stmt" => MacroParamKind::Stmt,
                "item" => MacroParamKind::Item,
                other => {
                    return Err(CompileError::new(
                        kind_tok.span,
                        format!("unknown macro parameter kind '{}'", other),
                    ));
                }
            };
            if kind != MacroParamKind::Expr {
                return Err(CompileError::new(
                    kind_tok.span,
                    "only 'expr' macro parameters are implemented",
                ));
            }
            params.push(MacroParam {
                name: pname.text,
                kind,
            });
            if !self.consume(",") {
                break;
            }
        }
        self.expect(")", "to close macro parameter list")?;

        // The body is a single expression in either block syntax.
        let closer = if self.consume("{") {
            "}"
        } else if self.consume("do") {
            "do-end"
        } else {
            let tok = self.peek();
            return Err(CompileError::new(
                tok.span,
                format!("expected macro body block, found '{}'", tok.text),
            ));
        };
        self.skip_newlines();
        let body = self.parse_expr()?;
        self.skip_newlines();
        if closer == "}" {
            self.expect("}", "to close macro body")?;
        } else {
            self.expect("end", "to close macro body")?;
        }

        self.program.macros.insert(
            name.text.clone(),
            MacroDef {
                name: name.text,
                params,
                body,
                span: kw.span,
            },
        );
        Ok(())
    }

    /// `expand(name(a1, ..., an))` splices the macro body with cloned
    /// argument expressions.
    fn parse_expand(&mut self) -> Result<Expr, CompileError> {
        let kw = self.expect("expand", "")?;
        self.expect("(", "after 'expand'")?;
        let name = self.expect_ident("as macro name")?;
        self.expect("(", "after macro name in expand")?;
        let mut args = Vec::new();
        self.skip_newlines();
        while !self.check(")") {
            args.push(self.parse_expr()?);
            self.skip_newlines();
            if !self.consume(",") {
                break;
            }
            self.skip_newlines();
        }
        self.expect(")", "to close macro arguments")?;
        self.expect(")", "to close expand")?;

        let def = self
            .program
            .macros
            .get(&name.text)
            .cloned()
            .ok_or_else(|| {
                CompileError::new(name.span, format!("unknown macro '{}'", name.text))
            })?;
        if args.len() != def.params.len() {
            return Err(CompileError::new(
                name.span,
                format!(
                    "macro '{}' expects {} arguments, got {}",
                    def.name,
                    def.params.len(),
                    args.len()
                ),
            ));
        }

        let mut expanded = def.body.clone();
        for (param, arg) in def.params.iter().zip(&args) {
            expanded = expanded.substitute(&param.name, arg);
        }
        expanded.span = kw.span;
        Ok(expanded)
    }

    // ------------------------------------------------------------------
    // Classes
    // ------------------------------------------------------------------

    fn parse_class(&mut self) -> Result<(), CompileError> {
        let kw = self.expect("class", "")?;
        let name_tok = self.expect_ident("after 'class'")?;
        let class_name = name_tok.text.clone();
        if self.program.classes.contains_key(&class_name) {
            return Err(CompileError::new(
                name_tok.span,
                format!("duplicate class declaration '{}'", class_name),
            ));
        }

        let mut info = ClassInfo::new(class_name.clone(), kw.span);
        if self.consume("extends") {
            let base = self.expect_ident("after 'extends'")?;
            if !self.program.classes.contains_key(&base.text) {
                return Err(CompileError::new(
                    base.span,
                    format!("unknown base class '{}'", base.text),
                ));
            }
            info.base = Some(base.text);
        }

        let closer = if self.consume("{") {
            "}"
        } else if self.consume("do") {
            "end"
        } else {
            let tok = self.peek();
            return Err(CompileError::new(
                tok.span,
                format!("expected '{{' or 'do' to begin class body, found '{}'", tok.text),
            ));
        };

        // The class must be visible while its own methods parse (for `this`).
        self.program.classes.insert(class_name.clone(), info);

        let mut methods: Vec<(String, Function, Span)> = Vec::new();
        let mut ctor: Option<(Function, Option<(String, Vec<Expr>)>, Span)> = None;

        loop {
            self.skip_terminators();
            if self.consume(closer) {
                break;
            }
            if self.at_eof() {
                return Err(CompileError::new(
                    kw.span,
                    format!("unterminated class '{}'", class_name),
                ));
            }

            let access = if self.consume("public") {
                Access::Public
            } else if self.consume("protected") {
                Access::Protected
            } else if self.consume("private") {
                Access::Private
            } else {
                Access::Public
            };

            let mut is_static = false;
            let mut is_virtual = false;
            let mut is_override = false;
            let mut is_final = false;
            loop {
                if self.consume("static") {
                    is_static = true;
                } else if self.consume("virtual") {
                    is_virtual = true;
                } else if self.consume("override") {
                    is_override = true;
                } else if self.consume("final") {
                    is_final = true;
                } else {
                    break;
                }
            }

            if self.check("declare") || self.check("let") || self.check("var") {
                if is_static || is_virtual || is_override || is_final {
                    let tok = self.peek();
                    return Err(CompileError::new(
                        tok.span,
                        "method modifiers are not valid on fields",
                    ));
                }
                self.parse_field(&class_name, access)?;
                self.expect_terminator()?;
                continue;
            }

            if self.check("operator") {
                self.current_class = Some(class_name.clone());
                let mut func = self.parse_operator_fn(Some(&class_name))?;
                self.current_class = None;
                func.access = access;
                func.is_static = is_static;
                func.is_virtual = is_virtual;
                func.is_override = is_override;
                func.is_final = is_final;
                let key = func.source_name.clone();
                let span = func.span;
                methods.push((key, func, span));
                continue;
            }

            if self.check("fn") || self.check("func") {
                let (key, func, init_list, span) = self.parse_method(&class_name)?;
                if key == "constructor" {
                    if ctor.is_some() {
                        return Err(CompileError::new(
                            span,
                            format!("class '{}' already has a constructor", class_name),
                        ));
                    }
                    let mut func = func;
                    func.access = access;
                    ctor = Some((func, init_list, span));
                } else {
                    let mut func = func;
                    func.access = access;
                    func.is_static = is_static;
                    func.is_virtual = is_virtual;
                    func.is_override = is_override;
                    func.is_final = is_final;
                    methods.push((key, func, span));
                }
                continue;
            }

            let tok = self.peek();
            return Err(CompileError::new(
                tok.span,
                format!("expected class member, found '{}'", tok.text),
            ));
        }

        for (key, func, span) in methods {
            self.register_method(&class_name, key, func, span)?;
        }
        self.synthesize_constructor(&class_name, ctor, kw.span)?;
        Ok(())
    }

    /// `declare name: type [= literal]` inside a class body.
    fn parse_field(&mut self, class: &str, access: Access) -> Result<(), CompileError> {
        self.advance(); // declare/let/var
        let name = self.expect_ident("as field name")?;
        self.expect(":", "after field name")?;
        let ty = self.parse_type("for field")?;
        if ty == Ty::Void {
            return Err(CompileError::new(name.span, "fields may not have type void"));
        }
        // An explicit initializer must be a literal; the type-appropriate
        // zero applies otherwise.
        if self.consume("=") {
            let init = self.parse_expr()?;
            if !init.is_literal() {
                return Err(CompileError::new(
                    init.span,
                    "field initializers must be literals",
                ));
            }
            self.field_defaults
                .insert((class.to_string(), name.text.clone()), init);
        }

        if self.program.resolve_field(class, &name.text).is_some() {
            return Err(CompileError::new(
                name.span,
                format!("field '{}' is already declared in '{}' or a base class", name.text, class),
            ));
        }

        let info = self.program.classes.get_mut(class).expect("class exists");
        info.fields.insert(
            name.text,
            FieldInfo {
                ty,
                access,
                owner: class.to_string(),
            },
        );
        Ok(())
    }

    /// Parse a method definition; returns (key, function, ctor-init-list, span).
    fn parse_method(
        &mut self,
        class: &str,
    ) -> Result<(String, Function, Option<(String, Vec<Expr>)>, Span), CompileError> {
        if !self.consume("fn") {
            self.expect("func", "to begin method")?;
        }
        let name_tok = self.expect_ident("as method name")?;
        let key = if name_tok.text == class || name_tok.text == "constructor" {
            "constructor".to_string()
        } else {
            name_tok.text.clone()
        };

        let mut func = Function::new(String::new(), name_tok.span);
        func.source_name = key.clone();
        func.class_owner = Some(class.to_string());
        self.parse_signature(&mut func)?;

        // Constructor init list: `: Base(args)`.
        let mut init_list = None;
        if key == "constructor" && self.look_non_nl(0).is(":") {
            self.skip_newlines();
            self.advance();
            let base_tok = self.expect_ident("as base class in init list")?;
            self.expect("(", "after base class name")?;
            let mut args = Vec::new();
            while !self.check(")") {
                args.push(self.parse_expr()?);
                if !self.consume(",") {
                    break;
                }
            }
            self.expect(")", "to close base init list")?;
            init_list = Some((base_tok.text, args));
        }

        self.current_class = Some(class.to_string());
        self.push_scope();
        self.bind_class("this", class);
        let body = self.parse_block()?;
        self.pop_scope();
        self.current_class = None;
        func.body = body;

        Ok((key, func, init_list, name_tok.span))
    }

    /// Assign the mangled symbol, run override legality checks, and record
    /// the overload in the class table.
    fn register_method(
        &mut self,
        class: &str,
        key: String,
        mut func: Function,
        span: Span,
    ) -> Result<(), CompileError> {
        let existing = self
            .program
            .classes
            .get(class)
            .and_then(|c| c.methods.get(&key))
            .map(|v| v.len())
            .unwrap_or(0);
        for sig in self
            .program
            .classes
            .get(class)
            .and_then(|c| c.methods.get(&key))
            .into_iter()
            .flatten()
        {
            if sig.params == func.params.iter().map(|p| p.ty).collect::<Vec<_>>() {
                return Err(CompileError::new(
                    span,
                    format!("duplicate overload of method '{}' in class '{}'", key, class),
                ));
            }
        }
        let symbol = if existing == 0 {
            format!("__ls_cls_{}_{}", class, key)
        } else {
            format!("__ls_cls_{}_{}_{}", class, key, existing)
        };

        // Override legality against the base chain.
        let base = self
            .program
            .classes
            .get(class)
            .and_then(|c| c.base.clone());
        let base_sig = base.as_deref().and_then(|b| {
            self.program.resolve_methods(b, &key).and_then(|sigs| {
                sigs.iter()
                    .find(|s| s.params.len() == func.params.len())
                    .cloned()
            })
        });
        if func.is_override {
            let Some(base_sig) = base_sig else {
                return Err(CompileError::new(
                    span,
                    format!("'{}' overrides nothing: no base method with matching arity", key),
                ));
            };
            if base_sig.is_final {
                return Err(CompileError::new(
                    span,
                    format!("cannot override final method '{}'", key),
                ));
            }
            if base_sig.is_static != func.is_static {
                return Err(CompileError::new(
                    span,
                    format!("override of '{}' must match static-ness of the base method", key),
                ));
            }
            if base_sig.return_ty != func.return_ty {
                return Err(CompileError::new(
                    span,
                    format!("override of '{}' must match the base return type", key),
                ));
            }
            // Override implicitly inherits virtual.
            func.is_virtual = true;
        }

        let param_tys: Vec<Ty> = func.params.iter().map(|p| p.ty).collect();
        let sig = MethodSig {
            symbol: symbol.clone(),
            owner: class.to_string(),
            access: func.access,
            is_static: func.is_static,
            is_virtual: func.is_virtual,
            is_override: func.is_override,
            is_final: func.is_final,
            params: param_tys,
            return_ty: func.return_ty,
        };
        self.program
            .classes
            .get_mut(class)
            .expect("class exists")
            .methods
            .entry(key.clone())
            .or_default()
            .push(sig);

        func.name = symbol;
        if !func.is_static {
            func.params.insert(
                0,
                Param {
                    name: "this".to_string(),
                    ty: Ty::I64,
                },
            );
        }
        self.program.functions.push(func);
        Ok(())
    }

    /// Emit `__ls_cls_C_constructor` (allocate + defaults + init call) and
    /// `__ls_cls_C_ctor_init` (base init list + user body).
    fn synthesize_constructor(
        &mut self,
        class: &str,
        ctor: Option<(Function, Option<(String, Vec<Expr>)>, Span)>,
        class_span: Span,
    ) -> Result<(), CompileError> {
        let sp = class_span;
        let ctor_symbol = format!("__ls_cls_{}_constructor", class);
        let init_symbol = format!("__ls_cls_{}_ctor_init", class);

        // Defaults cover the whole base chain; string fields start empty,
        // everything else starts at zero.
        let mut defaults = Vec::new();
        let mut chain = vec![class.to_string()];
        let mut cursor = self.program.classes.get(class).and_then(|c| c.base.clone());
        while let Some(b) = cursor {
            cursor = self.program.classes.get(&b).and_then(|c| c.base.clone());
            chain.push(b);
        }
        for cls in chain.iter().rev() {
            let info = self.program.classes.get(cls).expect("class exists");
            for (fname, field) in &info.fields {
                let explicit = self
                    .field_defaults
                    .get(&(cls.clone(), fname.clone()))
                    .cloned();
                let value = match (field.ty, explicit) {
                    (Ty::Str, None) => Expr::new(ExprKind::Str(String::new()), sp),
                    (Ty::Str, Some(lit)) => lit,
                    (Ty::Bool, Some(lit)) => Expr::call(
                        "formatOutput",
                        vec![Expr::call("bool_to_i64", vec![lit], sp)],
                        sp,
                    ),
                    (_, Some(lit)) => Expr::call("formatOutput", vec![lit], sp),
                    (Ty::F32 | Ty::F64, None) => {
                        Expr::call("formatOutput", vec![Expr::new(ExprKind::Float(0.0), sp)], sp)
                    }
                    (_, None) => Expr::call("formatOutput", vec![Expr::int(0, sp)], sp),
                };
                defaults.push(Stmt::new(
                    StmtKind::Expr(Expr::call(
                        "object_set",
                        vec![
                            Expr::var("this", sp),
                            Expr::new(ExprKind::Str(fname.clone()), sp),
                            value,
                        ],
                        sp,
                    )),
                    sp,
                ));
            }
        }

        let (user_params, init_body, ctor_access) = match ctor {
            Some((func, init_list, span)) => {
                let mut body = Vec::new();
                if let Some((base_name, args)) = init_list {
                    let Some(base) = self
                        .program
                        .classes
                        .get(class)
                        .and_then(|c| c.base.clone())
                    else {
                        return Err(CompileError::new(
                            span,
                            format!("class '{}' has no base class to initialize", class),
                        ));
                    };
                    if base != base_name {
                        return Err(CompileError::new(
                            span,
                            format!("init list names '{}' but the base class is '{}'", base_name, base),
                        ));
                    }
                    let mut call_args = vec![Expr::var("this", sp)];
                    call_args.extend(args);
                    body.push(Stmt::new(
                        StmtKind::Expr(Expr::call(
                            format!("__ls_cls_{}_ctor_init", base),
                            call_args,
                            span,
                        )),
                        span,
                    ));
                }
                body.extend(func.body);
                (func.params, body, func.access)
            }
            None => (Vec::new(), Vec::new(), Access::Public),
        };

        // __ls_cls_C_ctor_init(this, params...) -> void
        let mut init_fn = Function::new(init_symbol.clone(), sp);
        init_fn.class_owner = Some(class.to_string());
        init_fn.params.push(Param {
            name: "this".to_string(),
            ty: Ty::I64,
        });
        init_fn.params.extend(user_params.iter().cloned());
        init_fn.body = init_body;

        // __ls_cls_C_constructor(params...) -> i64
        let mut ctor_fn = Function::new(ctor_symbol.clone(), sp);
        ctor_fn.source_name = "constructor".to_string();
        ctor_fn.class_owner = Some(class.to_string());
        ctor_fn.access = ctor_access;
        ctor_fn.params = user_params.clone();
        ctor_fn.return_ty = Ty::I64;
        let mut body = vec![Stmt::new(
            StmtKind::Declare {
                name: "this".to_string(),
                declared_ty: Some(Ty::I64),
                is_const: false,
                owned: false,
                free_fn: None,
                init: Expr::call(
                    "object_new",
                    vec![Expr::new(ExprKind::Str(class.to_string()), sp)],
                    sp,
                ),
            },
            sp,
        )];
        body.extend(defaults);
        let mut init_args = vec![Expr::var("this", sp)];
        init_args.extend(
            user_params
                .iter()
                .map(|p| Expr::var(p.name.clone(), sp)),
        );
        body.push(Stmt::new(
            StmtKind::Expr(Expr::call(init_symbol, init_args, sp)),
            sp,
        ));
        body.push(Stmt::new(StmtKind::Return(Some(Expr::var("this", sp))), sp));
        ctor_fn.body = body;

        let param_tys: Vec<Ty> = user_params.iter().map(|p| p.ty).collect();
        self.program
            .classes
            .get_mut(class)
            .expect("class exists")
            .methods
            .entry("constructor".to_string())
            .or_default()
            .push(MethodSig {
                symbol: ctor_symbol,
                owner: class.to_string(),
                access: ctor_access,
                is_static: true,
                is_virtual: false,
                is_override: false,
                is_final: false,
                params: param_tys,
                return_ty: Ty::I64,
            });

        self.program.functions.push(init_fn);
        self.program.functions.push(ctor_fn);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Parse a `{ ... }` or `do ... end` block.
    fn parse_block(&mut self) -> Result<Vec<Stmt>, CompileError> {
        self.skip_newlines();
        let closer = if self.consume("{") {
            "}"
        } else if self.consume("do") {
            "end"
        } else {
            let tok = self.peek();
            return Err(CompileError::new(
                tok.span,
                format!("expected '{{' or 'do' to begin block, found '{}'", tok.text),
            ));
        };

        let mut stmts = Vec::new();
        loop {
            self.skip_terminators();
            if self.consume(closer) {
                return Ok(stmts);
            }
            if self.at_eof() {
                let tok = self.peek();
                return Err(CompileError::new(
                    tok.span,
                    format!("unterminated block, expected '{}'", closer),
                ));
            }
            stmts.push(self.parse_stmt()?);
            self.expect_terminator()?;
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, CompileError> {
        let tok = self.peek().clone();
        match tok.text.as_str() {
            "declare" | "let" | "var" | "const" => self.parse_declare(),
            "return" => {
                self.advance();
                let value = if self.peek().kind == TokenKind::Newline
                    || self.check(";")
                    || self.check("}")
                    || self.check("end")
                {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                Ok(Stmt::new(StmtKind::Return(value), tok.span))
            }
            "if" | "unless" => self.parse_if(),
            "while" => {
                self.advance();
                let cond = self.parse_expr()?;
                self.push_scope();
                let body = self.parse_block()?;
                self.pop_scope();
                Ok(Stmt::new(StmtKind::While { cond, body }, tok.span))
            }
            "for" | "parallel" => self.parse_for(),
            "break" => {
                self.advance();
                Ok(Stmt::new(StmtKind::Break, tok.span))
            }
            "continue" => {
                self.advance();
                Ok(Stmt::new(StmtKind::Continue, tok.span))
            }
            _ => self.parse_simple_stmt(),
        }
    }

    /// `declare [const|owned] name [: type] = expr` (also `let`/`var`, and
    /// bare `const name = expr`).
    fn parse_declare(&mut self) -> Result<Stmt, CompileError> {
        let kw = self.advance();
        let mut is_const = kw.is("const");
        let mut owned = false;
        loop {
            if self.consume("const") {
                is_const = true;
            } else if self.consume("owned") {
                owned = true;
            } else {
                break;
            }
        }

        let name = self.expect_ident("as binding name")?;
        let declared_ty = if self.consume(":") {
            Some(self.parse_type("for binding")?)
        } else {
            None
        };
        self.expect("=", "in declaration (bindings require an initializer)")?;
        let init = self.parse_expr()?;

        // `owned` resolves its free function from the initializer's
        // constructor identity, at declaration time.
        let free_fn = if owned {
            let ctor = match &init.kind {
                ExprKind::Call { callee, .. } => constructor_free_fn(callee),
                _ => None,
            };
            match ctor {
                Some(f) => Some(f.to_string()),
                None => {
                    return Err(CompileError::new(
                        init.span,
                        "owned bindings must be initialized by a recognized constructor",
                    ));
                }
            }
        } else {
            None
        };

        // Track class identity for member lowering.
        if let ExprKind::Call { callee, .. } = &init.kind {
            if let Some(class) = callee.strip_suffix(".constructor") {
                let class = class.to_string();
                self.bind_class(&name.text, &class);
            }
        }

        Ok(Stmt::new(
            StmtKind::Declare {
                name: name.text,
                declared_ty,
                is_const,
                owned,
                free_fn,
                init,
            },
            kw.span,
        ))
    }

    fn parse_if(&mut self) -> Result<Stmt, CompileError> {
        let kw = self.advance();
        let negate = kw.is("unless");
        let mut cond = self.parse_expr()?;
        if negate {
            let span = cond.span;
            cond = Expr::new(
                ExprKind::Unary {
                    op: UnOp::Not,
                    operand: Box::new(cond),
                    override_fn: None,
                },
                span,
            );
        }
        self.push_scope();
        let body = self.parse_block()?;
        self.pop_scope();

        let mut arms = vec![IfArm { cond, body }];
        let mut else_body = None;
        loop {
            if self.look_non_nl(0).is("elif") {
                self.skip_newlines();
                self.advance();
                let cond = self.parse_expr()?;
                self.push_scope();
                let body = self.parse_block()?;
                self.pop_scope();
                arms.push(IfArm { cond, body });
            } else if self.look_non_nl(0).is("else") {
                self.skip_newlines();
                self.advance();
                self.push_scope();
                else_body = Some(self.parse_block()?);
                self.pop_scope();
                break;
            } else {
                break;
            }
        }
        Ok(Stmt::new(StmtKind::If { arms, else_body }, kw.span))
    }

    /// `[parallel] for v in start..stop [step s] block`.
    fn parse_for(&mut self) -> Result<Stmt, CompileError> {
        let kw = self.peek().clone();
        let parallel = self.consume("parallel");
        self.expect("for", "to begin for loop")?;
        let var = self.expect_ident("as loop variable")?;
        self.expect("in", "after loop variable")?;
        let start = self.parse_expr()?;
        self.expect("..", "in range")?;
        let stop = self.parse_expr()?;
        let step = if self.consume("step") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.push_scope();
        let body = self.parse_block()?;
        self.pop_scope();
        Ok(Stmt::new(
            StmtKind::ForRange {
                var: var.text,
                start,
                stop,
                step,
                parallel,
                body,
            },
            kw.span,
        ))
    }

    /// Assignments, member assignments, format blocks, and bare expressions.
    fn parse_simple_stmt(&mut self) -> Result<Stmt, CompileError> {
        let tok = self.peek().clone();

        if tok.kind == TokenKind::Ident || tok.is("this") {
            let next = self.peek_at(1).text.clone();
            match next.as_str() {
                "=" => {
                    self.advance();
                    self.advance();
                    let value = self.parse_expr()?;
                    return Ok(Stmt::new(
                        StmtKind::Assign {
                            name: tok.text,
                            value,
                        },
                        tok.span,
                    ));
                }
                "+=" | "-=" | "*=" | "/=" | "%=" | "^=" | "**=" => {
                    self.advance();
                    self.advance();
                    let rhs = self.parse_expr()?;
                    let op = compound_op(&next);
                    let value = Expr::binary(op, Expr::var(tok.text.clone(), tok.span), rhs, tok.span);
                    return Ok(Stmt::new(
                        StmtKind::Assign {
                            name: tok.text,
                            value,
                        },
                        tok.span,
                    ));
                }
                "++" | "--" => {
                    self.advance();
                    self.advance();
                    let op = if next == "++" { BinOp::Add } else { BinOp::Sub };
                    let value = Expr::binary(
                        op,
                        Expr::var(tok.text.clone(), tok.span),
                        Expr::int(1, tok.span),
                        tok.span,
                    );
                    return Ok(Stmt::new(
                        StmtKind::Assign {
                            name: tok.text,
                            value,
                        },
                        tok.span,
                    ));
                }
                "." => {
                    // Member assignment lowers to object_set; anything else
                    // falls through to an expression statement.
                    let field = self.peek_at(2).text.clone();
                    let after = self.peek_at(3).text.clone();
                    if self.peek_at(2).kind == TokenKind::Ident
                        && matches!(
                            after.as_str(),
                            "=" | "+=" | "-=" | "*=" | "/=" | "%=" | "^=" | "**="
                        )
                    {
                        self.advance(); // receiver
                        self.advance(); // .
                        self.advance(); // field
                        let op_tok = self.advance();
                        let rhs = self.parse_expr()?;
                        let lowered =
                            self.lower_member_assign(&tok, &field, &op_tok.text, rhs)?;
                        return Ok(Stmt::new(StmtKind::Expr(lowered), tok.span));
                    }
                }
                _ => {}
            }
        }

        let expr = self.parse_expr()?;

        // A formatOutput call directly followed by a block opens a
        // formatted-output region.
        if let ExprKind::Call { callee, args } = &expr.kind {
            if (callee == "formatOutput" || callee == ".format")
                && (self.look_non_nl(0).is("{") || self.look_non_nl(0).is("do"))
            {
                let end_suffix = args.first().cloned();
                self.skip_newlines();
                self.push_scope();
                let body = self.parse_block()?;
                self.pop_scope();
                return Ok(Stmt::new(
                    StmtKind::FormatBlock { end_suffix, body },
                    expr.span,
                ));
            }
        }

        Ok(Stmt::new(StmtKind::Expr(expr), tok.span))
    }

    // ------------------------------------------------------------------
    // Member lowering
    // ------------------------------------------------------------------

    fn field_of(&self, class: &str, field: &str, span: Span) -> Result<FieldInfo, CompileError> {
        let Some(info) = self.program.resolve_field(class, field) else {
            return Err(CompileError::new(
                span,
                format!("class '{}' has no field '{}'", class, field),
            ));
        };
        let info = info.clone();
        self.check_member_access(info.access, &info.owner, field, span)?;
        Ok(info)
    }

    fn check_member_access(
        &self,
        access: Access,
        owner: &str,
        member: &str,
        span: Span,
    ) -> Result<(), CompileError> {
        let allowed = match access {
            Access::Public => true,
            Access::Private => self.current_class.as_deref() == Some(owner),
            Access::Protected => self
                .current_class
                .as_deref()
                .is_some_and(|c| self.class_is_or_derives(c, owner)),
        };
        if allowed {
            Ok(())
        } else {
            Err(CompileError::new(
                span,
                format!("member '{}' of class '{}' is not accessible here", member, owner),
            ))
        }
    }

    /// `v.x` → `object_get(v, "x")` plus a coercion for the declared type.
    fn lower_field_read(
        &self,
        receiver: Expr,
        class: &str,
        field: &str,
        span: Span,
    ) -> Result<Expr, CompileError> {
        let info = self.field_of(class, field, span)?;
        let raw = Expr::call(
            "object_get",
            vec![receiver, Expr::new(ExprKind::Str(field.to_string()), span)],
            span,
        );
        Ok(match info.ty {
            Ty::Str => raw,
            Ty::F32 | Ty::F64 => Expr::call("parse_f64", vec![raw], span),
            Ty::Bool => Expr::binary(
                BinOp::Ne,
                Expr::call("parse_i64", vec![raw], span),
                Expr::int(0, span),
                span,
            ),
            _ => Expr::call("parse_i64", vec![raw], span),
        })
    }

    /// `v.x = e` (or compound) → `object_set(v, "x", formatOutput(...))`.
    fn lower_member_assign(
        &mut self,
        receiver_tok: &Token,
        field: &str,
        op: &str,
        rhs: Expr,
    ) -> Result<Expr, CompileError> {
        let span = receiver_tok.span;
        let Some(class) = self.class_of_var(&receiver_tok.text).map(str::to_string) else {
            return Err(CompileError::new(
                span,
                format!("'{}' has no known class for member assignment", receiver_tok.text),
            ));
        };
        let info = self.field_of(&class, field, span)?;
        let receiver = Expr::var(receiver_tok.text.clone(), span);

        let value = if op == "=" {
            rhs
        } else {
            let current =
                self.lower_field_read(receiver.clone(), &class, field, span)?;
            let bin = compound_op(op);
            Expr::binary(bin, current, rhs, span)
        };

        // Bool values cross the string store as 0/1.
        let value = if info.ty == Ty::Bool {
            Expr::call("bool_to_i64", vec![value], span)
        } else {
            value
        };
        let formatted = Expr::call("formatOutput", vec![value], span);
        Ok(Expr::call(
            "object_set",
            vec![
                receiver,
                Expr::new(ExprKind::Str(field.to_string()), span),
                formatted,
            ],
            span,
        ))
    }

    // ------------------------------------------------------------------
    // Expressions (precedence climbing, high to low: unary, power, factor,
    // term, comparison, equality, and, or)
    // ------------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_and()?;
        while self.check("||") {
            let op_tok = self.advance();
            let rhs = self.parse_and()?;
            lhs = self.make_binary(BinOp::Or, lhs, rhs, op_tok.span);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_equality()?;
        while self.check("&&") {
            let op_tok = self.advance();
            let rhs = self.parse_equality()?;
            lhs = self.make_binary(BinOp::And, lhs, rhs, op_tok.span);
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = if self.check("==") {
                BinOp::Eq
            } else if self.check("!=") {
                BinOp::Ne
            } else {
                return Ok(lhs);
            };
            let op_tok = self.advance();
            let rhs = self.parse_comparison()?;
            lhs = self.make_binary(op, lhs, rhs, op_tok.span);
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = if self.check("<") {
                BinOp::Lt
            } else if self.check("<=") {
                BinOp::Le
            } else if self.check(">") {
                BinOp::Gt
            } else if self.check(">=") {
                BinOp::Ge
            } else {
                return Ok(lhs);
            };
            let op_tok = self.advance();
            let rhs = self.parse_term()?;
            lhs = self.make_binary(op, lhs, rhs, op_tok.span);
        }
    }

    fn parse_term(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_factor()?;
        loop {
            let op = if self.check("+") {
                BinOp::Add
            } else if self.check("-") {
                BinOp::Sub
            } else {
                return Ok(lhs);
            };
            let op_tok = self.advance();
            let rhs = self.parse_factor()?;
            lhs = self.make_binary(op, lhs, rhs, op_tok.span);
        }
    }

    fn parse_factor(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_power()?;
        loop {
            let op = if self.check("*") {
                BinOp::Mul
            } else if self.check("/") {
                BinOp::Div
            } else if self.check("%") {
                BinOp::Mod
            } else {
                return Ok(lhs);
            };
            let op_tok = self.advance();
            let rhs = self.parse_power()?;
            lhs = self.make_binary(op, lhs, rhs, op_tok.span);
        }
    }

    fn parse_power(&mut self) -> Result<Expr, CompileError> {
        let lhs = self.parse_unary()?;
        if self.check("**") {
            let op_tok = self.advance();
            // Right-associative.
            let rhs = self.parse_power()?;
            return Ok(self.make_binary(BinOp::Pow, lhs, rhs, op_tok.span));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        if self.check("-") || self.check("!") {
            let op_tok = self.advance();
            let op = if op_tok.is("-") { UnOp::Neg } else { UnOp::Not };
            let operand = self.parse_unary()?;
            let override_fn = self.member_override_symbol(&operand, op.override_key());
            return Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                    override_fn,
                },
                op_tok.span,
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.parse_primary()?;
        while self.check(".") {
            let dot = self.advance();
            let member = self.expect_ident("after '.'")?;
            if self.check("(") {
                expr = self.parse_member_call(expr, &member, dot.span)?;
            } else {
                // Field read; requires a receiver with a known class.
                let Some(class) = expr
                    .as_var()
                    .and_then(|v| self.class_of_var(v))
                    .map(str::to_string)
                else {
                    return Err(CompileError::new(
                        dot.span,
                        format!("'{}' is not a member access on a known class instance", member.text),
                    ));
                };
                expr = self.lower_field_read(expr, &class, &member.text, dot.span)?;
            }
        }
        Ok(expr)
    }

    fn parse_member_call(
        &mut self,
        receiver: Expr,
        member: &Token,
        span: Span,
    ) -> Result<Expr, CompileError> {
        let args = self.parse_call_args()?;

        // Pseudo-calls bypass the symbol table: `x.stateSpeed()`.
        if PSEUDO_CALLS.contains(&member.text.as_str()) {
            return Ok(Expr::call(format!(".{}", member.text), args, span));
        }

        // `su.*` runtime introspection namespace.
        if receiver.as_var() == Some("su") {
            let mut call = Expr::call(format!("su.{}", member.text), args, span);
            call.span = span;
            return Ok(call);
        }

        let Some(class) = receiver
            .as_var()
            .and_then(|v| self.class_of_var(v))
            .map(str::to_string)
        else {
            return Err(CompileError::new(
                span,
                format!("'{}' is not a method call on a known class instance", member.text),
            ));
        };

        let Some(sigs) = self.program.resolve_methods(&class, &member.text) else {
            return Err(CompileError::new(
                span,
                format!("class '{}' has no method '{}'", class, member.text),
            ));
        };
        let sig = sigs[0].clone();
        self.check_member_access(sig.access, &sig.owner, &member.text, span)?;

        // The overload group is keyed `<owner>.<method>`; the type checker
        // picks the exact overload by conversion cost.
        let mut call_args = Vec::with_capacity(args.len() + 1);
        if !sig.is_static {
            call_args.push(receiver);
        }
        call_args.extend(args);
        Ok(Expr::call(
            format!("{}.{}", sig.owner, member.text),
            call_args,
            span,
        ))
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, CompileError> {
        self.expect("(", "to begin arguments")?;
        let mut args = Vec::new();
        self.skip_newlines();
        while !self.check(")") {
            args.push(self.parse_expr()?);
            self.skip_newlines();
            if !self.consume(",") {
                break;
            }
            self.skip_newlines();
        }
        self.expect(")", "to close arguments")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Int => {
                self.advance();
                let value: i64 = tok.text.parse().map_err(|_| {
                    CompileError::new(tok.span, format!("integer literal '{}' out of range", tok.text))
                })?;
                Ok(Expr::int(value, tok.span))
            }
            TokenKind::Float => {
                self.advance();
                let value: f64 = tok.text.parse().map_err(|_| {
                    CompileError::new(tok.span, format!("invalid float literal '{}'", tok.text))
                })?;
                Ok(Expr::new(ExprKind::Float(value), tok.span))
            }
            TokenKind::Str => {
                self.advance();
                Ok(Expr::new(ExprKind::Str(tok.text), tok.span))
            }
            TokenKind::Keyword if tok.is("true") || tok.is("false") => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(tok.is("true")), tok.span))
            }
            TokenKind::Keyword if tok.is("this") => {
                self.advance();
                Ok(Expr::var("this", tok.span))
            }
            TokenKind::Keyword if tok.is("expand") => self.parse_expand(),
            TokenKind::Ident => {
                self.advance();
                if self.check("(") {
                    let args = self.parse_call_args()?;
                    // A class name in call position is its constructor.
                    let callee = if self.program.classes.contains_key(&tok.text) {
                        format!("{}.constructor", tok.text)
                    } else {
                        tok.text
                    };
                    Ok(Expr::call(callee, args, tok.span))
                } else {
                    Ok(Expr::var(tok.text, tok.span))
                }
            }
            TokenKind::Punct if tok.is("(") => {
                self.advance();
                self.skip_newlines();
                let expr = self.parse_expr()?;
                self.skip_newlines();
                self.expect(")", "to close parenthesized expression")?;
                Ok(expr)
            }
            TokenKind::Punct if tok.is(".") => {
                // Leading-dot pseudo-call: `.stateSpeed()`.
                self.advance();
                let name = self.expect_ident("after '.'")?;
                if !PSEUDO_CALLS.contains(&name.text.as_str()) {
                    return Err(CompileError::new(
                        name.span,
                        format!("unknown pseudo-call '.{}'", name.text),
                    ));
                }
                let args = self.parse_call_args()?;
                Ok(Expr::call(format!(".{}", name.text), args, tok.span))
            }
            _ => Err(CompileError::new(
                tok.span,
                format!("unexpected token '{}' in expression", tok.text),
            )),
        }
    }

    /// Build a binary node, attaching a member operator-override symbol when
    /// the left operand is an instance of a class that defines one.
    fn make_binary(&self, op: BinOp, lhs: Expr, rhs: Expr, span: Span) -> Expr {
        let override_fn = self.member_override_symbol(&lhs, op.override_key());
        Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                override_fn,
            },
            span,
        )
    }

    fn member_override_symbol(&self, operand: &Expr, key: &str) -> Option<String> {
        let class = operand.as_var().and_then(|v| self.class_of_var(v))?;
        let sigs = self.program.resolve_methods(class, key)?;
        Some(sigs[0].symbol.clone())
    }
}

fn compound_op(op: &str) -> BinOp {
    match op {
        "+=" => BinOp::Add,
        "-=" => BinOp::Sub,
        "*=" => BinOp::Mul,
        "/=" => BinOp::Div,
        "%=" => BinOp::Mod,
        "**=" => BinOp::Pow,
        // `^=` is the power-assign alias.
        "^=" => BinOp::Pow,
        other => unreachable!("not a compound assignment operator: {}", other),
    }
}

/// Parse a source string into a `Program`.
pub fn parse_source(source: &str) -> Result<Program, CompileError> {
    Parser::new(source)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        parse_source(source).expect("parse should succeed")
    }

    #[test]
    fn parses_function_with_signature() {
        let program = parse_ok("fn add(a: i64, b: i64) -> i64 {\n  return a + b\n}\n");
        assert_eq!(program.functions.len(), 1);
        let f = &program.functions[0];
        assert_eq!(f.name, "add");
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.return_ty, Ty::I64);
    }

    #[test]
    fn do_end_blocks_are_equivalent() {
        let program = parse_ok("fn f() do\n  return\nend\n");
        assert_eq!(program.functions[0].body.len(), 1);
    }

    #[test]
    fn newline_before_arrow_is_tolerated() {
        let program = parse_ok("fn f(a: i64)\n -> i64 { return a }\n");
        assert_eq!(program.functions[0].return_ty, Ty::I64);
    }

    #[test]
    fn throws_list_is_recorded() {
        let program = parse_ok("fn f() throws io, net {\n}\n");
        assert_eq!(program.functions[0].throws, vec!["io", "net"]);
    }

    #[test]
    fn top_level_statements_collect() {
        let program = parse_ok("declare x = 1\nprintln(x)\n");
        assert_eq!(program.top_level.len(), 2);
    }

    #[test]
    fn compound_assignment_desugars() {
        let program = parse_ok("declare x = 1\nx += 2\n");
        match &program.top_level[1].kind {
            StmtKind::Assign { name, value } => {
                assert_eq!(name, "x");
                assert!(matches!(
                    value.kind,
                    ExprKind::Binary { op: BinOp::Add, .. }
                ));
            }
            other => panic!("expected assign, got {:?}", other),
        }
    }

    #[test]
    fn increment_desugars_to_plus_one() {
        let program = parse_ok("declare x = 1\nx++\n");
        match &program.top_level[1].kind {
            StmtKind::Assign { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Binary { op: BinOp::Add, .. }));
            }
            other => panic!("expected assign, got {:?}", other),
        }
    }

    #[test]
    fn power_is_right_associative_and_tighter_than_factor() {
        let program = parse_ok("declare x = 2 * 3 ** 2 ** 2\n");
        // 2 * (3 ** (2 ** 2))
        match &program.top_level[0].kind {
            StmtKind::Declare { init, .. } => match &init.kind {
                ExprKind::Binary { op: BinOp::Mul, rhs, .. } => match &rhs.kind {
                    ExprKind::Binary { op: BinOp::Pow, rhs, .. } => {
                        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinOp::Pow, .. }));
                    }
                    other => panic!("expected pow, got {:?}", other),
                },
                other => panic!("expected mul, got {:?}", other),
            },
            other => panic!("expected declare, got {:?}", other),
        }
    }

    #[test]
    fn unless_negates_condition() {
        let program = parse_ok("unless x > 0 {\n  println(1)\n}\n");
        match &program.top_level[0].kind {
            StmtKind::If { arms, .. } => {
                assert!(matches!(
                    arms[0].cond.kind,
                    ExprKind::Unary { op: UnOp::Not, .. }
                ));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn for_with_step_and_parallel() {
        let program = parse_ok("parallel for i in 0..10 step 2 {\n}\n");
        match &program.top_level[0].kind {
            StmtKind::ForRange { parallel, step, .. } => {
                assert!(*parallel);
                assert!(step.is_some());
            }
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn elif_chain_collects_arms() {
        let program = parse_ok("if a { }\nelif b { }\nelif c { }\nelse { }\n");
        match &program.top_level[0].kind {
            StmtKind::If { arms, else_body } => {
                assert_eq!(arms.len(), 3);
                assert!(else_body.is_some());
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn format_block_captures_suffix() {
        let program = parse_ok("formatOutput(\"\\n\") do\n  print(1)\nend\n");
        match &program.top_level[0].kind {
            StmtKind::FormatBlock { end_suffix, body } => {
                assert!(end_suffix.is_some());
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected format block, got {:?}", other),
        }
    }

    #[test]
    fn class_fields_and_methods_are_registered() {
        let source = "class P {\n  declare x: i64\n  fn get() -> i64 {\n    return this.x\n  }\n}\n";
        let program = parse_ok(source);
        let class = &program.classes["P"];
        assert_eq!(class.fields["x"].ty, Ty::I64);
        assert_eq!(class.methods["get"][0].symbol, "__ls_cls_P_get");
        // get + synthesized ctor_init + constructor
        assert_eq!(program.functions.len(), 3);
    }

    #[test]
    fn method_overloads_get_index_suffixes() {
        let source =
            "class P {\n  fn f(a: i64) { }\n  fn f(a: str) { }\n}\n";
        let program = parse_ok(source);
        let sigs = &program.classes["P"].methods["f"];
        assert_eq!(sigs[0].symbol, "__ls_cls_P_f");
        assert_eq!(sigs[1].symbol, "__ls_cls_P_f_1");
    }

    #[test]
    fn duplicate_method_signature_rejected() {
        let source = "class P {\n  fn f(a: i64) { }\n  fn f(b: i64) { }\n}\n";
        let err = parse_source(source).unwrap_err();
        assert!(err.msg.contains("duplicate overload"));
    }

    #[test]
    fn field_redeclaration_in_subclass_rejected() {
        let source =
            "class A {\n  declare x: i64\n}\nclass B extends A {\n  declare x: i64\n}\n";
        let err = parse_source(source).unwrap_err();
        assert!(err.msg.contains("already declared"));
    }

    #[test]
    fn override_without_base_method_rejected() {
        let source = "class A {\n}\nclass B extends A {\n  override fn f() { }\n}\n";
        let err = parse_source(source).unwrap_err();
        assert!(err.msg.contains("overrides nothing"));
    }

    #[test]
    fn override_of_final_rejected() {
        let source =
            "class A {\n  final fn f() { }\n}\nclass B extends A {\n  override fn f() { }\n}\n";
        let err = parse_source(source).unwrap_err();
        assert!(err.msg.contains("final"));
    }

    #[test]
    fn field_access_lowers_to_object_get() {
        let source = "class P {\n  declare x: i64\n}\nfn main() {\n  declare p = P()\n  println(p.x)\n}\n";
        let program = parse_ok(source);
        let main = program.functions.iter().find(|f| f.name == "main").unwrap();
        match &main.body[1].kind {
            StmtKind::Expr(e) => match &e.kind {
                ExprKind::Call { callee, args } => {
                    assert_eq!(callee, "println");
                    // parse_i64(object_get(p, "x"))
                    match &args[0].kind {
                        ExprKind::Call { callee, args } => {
                            assert_eq!(callee, "parse_i64");
                            assert!(matches!(
                                &args[0].kind,
                                ExprKind::Call { callee, .. } if callee == "object_get"
                            ));
                        }
                        other => panic!("expected coercion call, got {:?}", other),
                    }
                }
                other => panic!("expected call, got {:?}", other),
            },
            other => panic!("expected expr stmt, got {:?}", other),
        }
    }

    #[test]
    fn member_assign_lowers_to_object_set() {
        let source = "class P {\n  declare x: i64\n}\nfn main() {\n  declare p = P()\n  p.x = 7\n}\n";
        let program = parse_ok(source);
        let main = program.functions.iter().find(|f| f.name == "main").unwrap();
        match &main.body[1].kind {
            StmtKind::Expr(e) => {
                assert!(matches!(
                    &e.kind,
                    ExprKind::Call { callee, .. } if callee == "object_set"
                ));
            }
            other => panic!("expected expr stmt, got {:?}", other),
        }
    }

    #[test]
    fn private_field_not_accessible_outside_class() {
        let source = "class P {\n  private declare x: i64\n}\nfn main() {\n  declare p = P()\n  println(p.x)\n}\n";
        let err = parse_source(source).unwrap_err();
        assert!(err.msg.contains("not accessible"));
    }

    #[test]
    fn constructor_synthesis_returns_handle() {
        let source = "class P {\n  declare x: i64\n  fn constructor(v: i64) {\n    this.x = v\n  }\n}\n";
        let program = parse_ok(source);
        let ctor = program
            .functions
            .iter()
            .find(|f| f.name == "__ls_cls_P_constructor")
            .unwrap();
        assert_eq!(ctor.return_ty, Ty::I64);
        assert_eq!(ctor.params.len(), 1);
        // allocate, one field default, init call, return
        assert_eq!(ctor.body.len(), 4);
    }

    #[test]
    fn macro_expansion_substitutes_arguments() {
        let source = "macro twice(x: expr) {\n  x + x\n}\ndeclare y = expand(twice(3))\n";
        let program = parse_ok(source);
        match &program.top_level[0].kind {
            StmtKind::Declare { init, .. } => match &init.kind {
                ExprKind::Binary { lhs, rhs, .. } => {
                    assert_eq!(lhs.as_i64(), Some(3));
                    assert_eq!(rhs.as_i64(), Some(3));
                }
                other => panic!("expected binary, got {:?}", other),
            },
            other => panic!("expected declare, got {:?}", other),
        }
    }

    #[test]
    fn expand_arity_mismatch_rejected() {
        let source = "macro twice(x: expr) {\n  x + x\n}\ndeclare y = expand(twice(1, 2))\n";
        let err = parse_source(source).unwrap_err();
        assert!(err.msg.contains("expects 1 arguments"));
    }

    #[test]
    fn flag_declaration_mangles_dashes() {
        let program = parse_ok("flag dump-stats() {\n  println(1)\n}\n");
        assert_eq!(program.flags, vec!["dump-stats"]);
        assert_eq!(program.functions[0].name, "__ls_flag_dump_stats");
        assert_eq!(
            program.functions[0].cli_flag.as_deref(),
            Some("dump-stats")
        );
    }

    #[test]
    fn owned_declare_resolves_free_function() {
        let program = parse_ok("fn main() {\n  declare owned a = array_new()\n}\n");
        match &program.functions[0].body[0].kind {
            StmtKind::Declare { owned, free_fn, .. } => {
                assert!(*owned);
                assert_eq!(free_fn.as_deref(), Some("array_free"));
            }
            other => panic!("expected declare, got {:?}", other),
        }
    }

    #[test]
    fn owned_requires_recognized_constructor() {
        let err = parse_source("fn main() {\n  declare owned a = 3\n}\n").unwrap_err();
        assert!(err.msg.contains("recognized constructor"));
    }

    #[test]
    fn free_operator_override_uses_synthetic_name() {
        let program = parse_ok("operator + (a: i64, b: i64) -> i64 {\n  return a - b\n}\n");
        assert_eq!(program.functions[0].name, "__ls_op_add");
        assert!(matches!(
            program.functions[0].operator_kind,
            Some(OperatorKind::Binary(BinOp::Add))
        ));
    }

    #[test]
    fn member_operator_attaches_override_symbol() {
        let source = "class V {\n  operator + (other: i64) -> i64 {\n    return 0\n  }\n}\nfn main() {\n  declare v = V()\n  declare w = v + 1\n}\n";
        let program = parse_ok(source);
        let main = program.functions.iter().find(|f| f.name == "main").unwrap();
        match &main.body[1].kind {
            StmtKind::Declare { init, .. } => match &init.kind {
                ExprKind::Binary { override_fn, .. } => {
                    assert_eq!(override_fn.as_deref(), Some("__ls_cls_V___ls_op_add"));
                }
                other => panic!("expected binary, got {:?}", other),
            },
            other => panic!("expected declare, got {:?}", other),
        }
    }

    #[test]
    fn pseudo_call_parses_with_leading_dot() {
        let program = parse_ok("fn main() {\n  .stateSpeed()\n}\n");
        match &program.functions[0].body[0].kind {
            StmtKind::Expr(e) => {
                assert!(matches!(
                    &e.kind,
                    ExprKind::Call { callee, .. } if callee == ".stateSpeed"
                ));
            }
            other => panic!("expected expr, got {:?}", other),
        }
    }

    #[test]
    fn su_namespace_calls_parse() {
        let program = parse_ok("fn main() {\n  println(su.step_count())\n}\n");
        let main = &program.functions[0];
        match &main.body[0].kind {
            StmtKind::Expr(e) => match &e.kind {
                ExprKind::Call { args, .. } => {
                    assert!(matches!(
                        &args[0].kind,
                        ExprKind::Call { callee, .. } if callee == "su.step_count"
                    ));
                }
                other => panic!("expected call, got {:?}", other),
            },
            other => panic!("expected expr, got {:?}", other),
        }
    }

    #[test]
    fn missing_terminator_is_an_error() {
        let err = parse_source("declare x = 1 declare y = 2\n").unwrap_err();
        assert!(err.msg.contains("end of statement"));
    }

    #[test]
    fn extern_function_has_no_body() {
        let program = parse_ok("extern fn putchar(c: i64) -> i64\n");
        assert!(program.functions[0].is_extern);
        assert!(program.functions[0].body.is_empty());
    }

    #[test]
    fn duplicate_free_function_names_premangle() {
        let program = parse_ok("fn f(a: i64) { }\nfn f(a: str) { }\n");
        assert_eq!(program.functions[0].name, "f");
        assert_eq!(program.functions[1].name, "f__1");
        assert_eq!(program.functions[1].source_name, "f");
    }
}
