//! Compile error and warning types shared by the frontend stages.

use crate::ast::Span;

/// A diagnostic with a source position.
///
/// Rendered as `line <L>, col <C>: <message>`, the single-line format the
/// driver prints on the error stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub line: u32,
    pub col: u32,
    pub msg: String,
}

impl CompileError {
    pub fn new(span: Span, msg: impl Into<String>) -> Self {
        CompileError {
            line: span.line,
            col: span.col,
            msg: msg.into(),
        }
    }

    pub fn at(line: u32, col: u32, msg: impl Into<String>) -> Self {
        CompileError {
            line,
            col,
            msg: msg.into(),
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, col {}: {}", self.line, self.col, self.msg)
    }
}

impl std::error::Error for CompileError {}

/// A non-fatal diagnostic, accumulated by the type checker and printed
/// (deduplicated) even on success.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Warning {
    pub line: u32,
    pub col: u32,
    pub msg: String,
}

impl Warning {
    pub fn new(span: Span, msg: impl Into<String>) -> Self {
        Warning {
            line: span.line,
            col: span.col,
            msg: msg.into(),
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, col {}: warning: {}", self.line, self.col, self.msg)
    }
}
