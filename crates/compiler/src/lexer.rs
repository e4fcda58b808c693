//! Lexer for LineScript source
//!
//! Turns a UTF-8 byte stream into tokens with 1-based `(line, col)` spans.
//! Newlines are significant: they become `Newline` tokens that the parser
//! treats as optional statement terminators. Compound operators are matched
//! greedily with two characters of lookahead.

use crate::ast::Span;
use crate::error::CompileError;

/// Token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Eof,
    Newline,
    Ident,
    Keyword,
    Str,
    Int,
    Float,
    Punct,
}

/// A token with its source text and the span of its first character.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, span: Span) -> Self {
        Token {
            kind,
            text: text.into(),
            span,
        }
    }

    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }
}

/// Reserved words. `and`/`or`/`not` are aliased to their operator forms
/// during lexing and never reach the parser as keywords.
const KEYWORDS: &[&str] = &[
    "fn", "func", "inline", "extern", "let", "var", "const", "declare", "owned", "return", "if",
    "unless", "elif", "else", "while", "for", "parallel", "macro", "class", "extends", "in",
    "step", "do", "end", "throws", "break", "continue", "true", "false", "public", "protected",
    "private", "static", "virtual", "override", "final", "flag", "operator", "expand", "this",
];

fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

/// Two-character operators, longest-match-first.
const TWO_CHAR_OPS: &[&str] = &[
    "**", "..", "->", "==", "!=", "<=", ">=", "&&", "||", "++", "--", "+=", "-=", "*=", "/=",
    "%=", "^=",
];

const ONE_CHAR_OPS: &[char] = &[
    '+', '-', '*', '/', '%', '^', '=', '<', '>', '!', '(', ')', '{', '}', '[', ']', ',', ':',
    ';', '.', '&', '|',
];

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Tokenize the whole input, ending with an `Eof` token.
    pub fn tokenize(mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.col)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn next_token(&mut self) -> Result<Token, CompileError> {
        self.skip_trivia();

        let span = self.span();
        let Some(c) = self.peek() else {
            return Ok(Token::new(TokenKind::Eof, "", span));
        };

        if c == b'\n' {
            self.bump();
            return Ok(Token::new(TokenKind::Newline, "\n", span));
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            return Ok(self.lex_word(span));
        }

        if c.is_ascii_digit() {
            return Ok(self.lex_number(span));
        }

        if c == b'"' {
            return self.lex_string(span);
        }

        self.lex_operator(span)
    }

    /// Skip spaces, tabs, carriage returns, and `//` comments. Newlines are
    /// tokens, not trivia.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') => {
                    self.bump();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return,
            }
        }
    }

    fn lex_word(&mut self, span: Span) -> Token {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .unwrap_or_default()
            .to_string();

        // Word-form logical operators lex as their punctuation aliases.
        match text.as_str() {
            "and" => return Token::new(TokenKind::Punct, "&&", span),
            "or" => return Token::new(TokenKind::Punct, "||", span),
            "not" => return Token::new(TokenKind::Punct, "!", span),
            _ => {}
        }

        let kind = if is_keyword(&text) {
            TokenKind::Keyword
        } else {
            TokenKind::Ident
        };
        Token::new(kind, text, span)
    }

    fn lex_number(&mut self, span: Span) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        // A dot only joins the literal when a digit follows; `0..10` must
        // stay `0` `..` `10`.
        let mut kind = TokenKind::Int;
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            kind = TokenKind::Float;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .unwrap_or_default()
            .to_string();
        Token::new(kind, text, span)
    }

    fn lex_string(&mut self, span: Span) -> Result<Token, CompileError> {
        self.bump(); // opening quote
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(CompileError::new(span, "unterminated string literal"));
                }
                Some(b'\n') => {
                    return Err(CompileError::new(
                        span,
                        "newline inside string literal",
                    ));
                }
                Some(b'"') => {
                    self.bump();
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    return Ok(Token::new(TokenKind::Str, text, span));
                }
                Some(b'\\') => {
                    let esc_span = self.span();
                    self.bump();
                    match self.bump() {
                        Some(b'n') => bytes.push(b'\n'),
                        Some(b'r') => bytes.push(b'\r'),
                        Some(b't') => bytes.push(b'\t'),
                        Some(b'\\') => bytes.push(b'\\'),
                        Some(b'"') => bytes.push(b'"'),
                        Some(c) => {
                            return Err(CompileError::new(
                                esc_span,
                                format!("unsupported escape '\\{}'", c as char),
                            ));
                        }
                        None => {
                            return Err(CompileError::new(span, "unterminated string literal"));
                        }
                    }
                }
                Some(_) => {
                    // Raw bytes; multi-byte UTF-8 sequences pass through.
                    bytes.push(self.bump().unwrap_or_default());
                }
            }
        }
    }

    fn lex_operator(&mut self, span: Span) -> Result<Token, CompileError> {
        if let (Some(a), Some(b)) = (self.peek(), self.peek_at(1)) {
            let pair = [a, b];
            let pair = std::str::from_utf8(&pair).unwrap_or_default();
            if TWO_CHAR_OPS.contains(&pair) {
                self.bump();
                self.bump();
                // `**=` extends power-assign past the greedy pair.
                if pair == "**" && self.peek() == Some(b'=') {
                    self.bump();
                    return Ok(Token::new(TokenKind::Punct, "**=", span));
                }
                return Ok(Token::new(TokenKind::Punct, pair, span));
            }
        }

        let c = self.peek().unwrap_or_default();
        if ONE_CHAR_OPS.contains(&(c as char)) {
            self.bump();
            return Ok(Token::new(TokenKind::Punct, (c as char).to_string(), span));
        }

        Err(CompileError::new(
            span,
            format!("unknown character '{}'", c as char),
        ))
    }
}

/// Convenience entry point: tokenize a source string.
pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(source: &str) -> Vec<String> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .filter(|t| t.kind != TokenKind::Eof && t.kind != TokenKind::Newline)
            .map(|t| t.text)
            .collect()
    }

    #[test]
    fn lexes_identifiers_and_keywords() {
        let tokens = tokenize("fn foo_1 return").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[1].kind, TokenKind::Ident);
        assert_eq!(tokens[1].text, "foo_1");
        assert_eq!(tokens[2].kind, TokenKind::Keyword);
    }

    #[test]
    fn newline_is_a_token_with_position() {
        let tokens = tokenize("a\nb").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Newline);
        assert_eq!(tokens[2].span, Span::new(2, 1));
    }

    #[test]
    fn range_does_not_absorb_into_float() {
        assert_eq!(texts("0..10"), vec!["0", "..", "10"]);
        assert_eq!(texts("1.5"), vec!["1.5"]);
        let tokens = tokenize("1.5").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Float);
    }

    #[test]
    fn compound_operators_match_greedily() {
        assert_eq!(texts("a**=b"), vec!["a", "**=", "b"]);
        assert_eq!(texts("a**b"), vec!["a", "**", "b"]);
        assert_eq!(texts("a<=b->c"), vec!["a", "<=", "b", "->", "c"]);
        assert_eq!(texts("i++"), vec!["i", "++"]);
    }

    #[test]
    fn word_logical_operators_alias_punctuation() {
        assert_eq!(texts("a and b or not c"), vec!["a", "&&", "b", "||", "!", "c"]);
    }

    #[test]
    fn string_escapes() {
        let tokens = tokenize(r#""a\tb\n""#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].text, "a\tb\n");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = tokenize("\"abc").unwrap_err();
        assert!(err.msg.contains("unterminated"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn bad_escape_is_an_error() {
        let err = tokenize(r#""a\qb""#).unwrap_err();
        assert!(err.msg.contains("unsupported escape"));
    }

    #[test]
    fn newline_in_string_is_an_error() {
        let err = tokenize("\"ab\ncd\"").unwrap_err();
        assert!(err.msg.contains("newline inside string"));
    }

    #[test]
    fn unknown_character_is_an_error() {
        let err = tokenize("a @ b").unwrap_err();
        assert!(err.msg.contains("unknown character"));
        assert_eq!(err.col, 3);
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(texts("a // comment ** here\nb"), vec!["a", "b"]);
    }

    #[test]
    fn spans_are_one_based(){
        let tokens = tokenize("  x").unwrap();
        assert_eq!(tokens[0].span, Span::new(1, 3));
    }
}
