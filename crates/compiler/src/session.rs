//! Interactive session support
//!
//! The line-oriented shell accumulates snippets into a synthetic source
//! buffer and re-runs the full pipeline per entry. Declarations (functions,
//! classes, macros, flag handlers) persist across entries; statements are
//! replayed in order so each run observes the same state history.

use crate::parser::parse_source;

/// How a snippet participates in the synthetic source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnippetKind {
    /// Functions, classes, macros, flags: emitted before all statements.
    Declaration,
    /// Everything else, replayed in entry order.
    Statement,
}

/// Classify a snippet by parsing it in isolation. Snippets that fail to
/// parse alone are treated as statements; the pipeline reports the real
/// error against the composed source.
pub fn classify(snippet: &str) -> SnippetKind {
    match parse_source(snippet) {
        Ok(program) => {
            let declares_only = program.top_level.is_empty()
                && (!program.functions.is_empty()
                    || !program.classes.is_empty()
                    || !program.macros.is_empty());
            if declares_only {
                SnippetKind::Declaration
            } else {
                SnippetKind::Statement
            }
        }
        Err(_) => SnippetKind::Statement,
    }
}

#[derive(Debug, Default)]
pub struct ReplSession {
    declarations: Vec<String>,
    statements: Vec<String>,
}

impl ReplSession {
    pub fn new() -> Self {
        ReplSession::default()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty() && self.statements.is_empty()
    }

    /// The synthetic source for the accumulated session plus a candidate
    /// snippet (not yet accepted).
    pub fn compose(&self, candidate: Option<&str>) -> String {
        let mut source = String::new();
        for decl in &self.declarations {
            source.push_str(decl);
            source.push('\n');
        }
        if let Some(snippet) = candidate {
            if classify(snippet) == SnippetKind::Declaration {
                source.push_str(snippet);
                source.push('\n');
            }
        }
        for stmt in &self.statements {
            source.push_str(stmt);
            source.push('\n');
        }
        if let Some(snippet) = candidate {
            if classify(snippet) == SnippetKind::Statement {
                source.push_str(snippet);
                source.push('\n');
            }
        }
        source
    }

    /// Accept a snippet into the session after a successful run.
    pub fn accept(&mut self, snippet: &str) {
        match classify(snippet) {
            SnippetKind::Declaration => self.declarations.push(snippet.to_string()),
            SnippetKind::Statement => self.statements.push(snippet.to_string()),
        }
    }

    pub fn reset(&mut self) {
        self.declarations.clear();
        self.statements.clear();
    }

    /// Human-readable listing of the accumulated session.
    pub fn listing(&self) -> String {
        self.compose(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn functions_classify_as_declarations() {
        assert_eq!(
            classify("fn f(a: i64) -> i64 {\n  return a\n}\n"),
            SnippetKind::Declaration
        );
        assert_eq!(
            classify("class P {\n  declare x: i64\n}\n"),
            SnippetKind::Declaration
        );
    }

    #[test]
    fn statements_classify_as_statements() {
        assert_eq!(classify("println(1)\n"), SnippetKind::Statement);
        assert_eq!(classify("declare x = 1\n"), SnippetKind::Statement);
    }

    #[test]
    fn declarations_precede_statements_in_composition() {
        let mut session = ReplSession::new();
        session.accept("declare x = 1");
        session.accept("fn f() -> i64 {\n  return 2\n}");
        session.accept("println(f())");
        let source = session.compose(None);
        let fn_pos = source.find("fn f()").unwrap();
        let decl_pos = source.find("declare x").unwrap();
        assert!(fn_pos < decl_pos);
    }

    #[test]
    fn candidate_is_included_without_acceptance() {
        let session = ReplSession::new();
        let source = session.compose(Some("println(3)"));
        assert!(source.contains("println(3)"));
        assert!(session.is_empty());
    }

    #[test]
    fn reset_clears_the_session() {
        let mut session = ReplSession::new();
        session.accept("println(1)");
        session.reset();
        assert!(session.is_empty());
    }
}
