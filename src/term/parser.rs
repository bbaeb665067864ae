//! Recursive-descent parser for KIF terms.
//!
//! Supports per-term error recovery: a malformed top-level term is reported
//! with its line and column and skipped, and parsing continues with the
//! remaining input. Unbalanced parentheses at end-of-file are a warning, not
//! an error.

use smol_str::SmolStr;
use tracing::warn;

use crate::error::ParseError;

use super::Term;
use super::lexer::{Token, TokenKind, tokenize};

/// Parse result: the terms that parsed, plus the errors and warnings
/// collected along the way. Insertion order of terms is preserved.
#[derive(Debug, Clone, Default)]
pub struct Parsed {
    pub terms: Vec<Term>,
    pub errors: Vec<ParseError>,
    pub warnings: Vec<String>,
}

impl Parsed {
    /// Check if parsing succeeded without errors.
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parse a sequence of top-level terms.
pub fn parse_terms(input: &str) -> Parsed {
    let tokens = tokenize(input);
    let mut parsed = Parsed::default();
    let mut pos = 0;

    while pos < tokens.len() {
        let token = &tokens[pos];
        match token.kind {
            TokenKind::RParen => {
                parsed.errors.push(ParseError::new(
                    "unexpected ')'",
                    token.line,
                    token.column,
                ));
                pos += 1;
            }
            TokenKind::LParen => {
                match matching_close(&tokens, pos) {
                    Some(close) => {
                        let mut cursor = pos;
                        match parse_at(&tokens, &mut cursor) {
                            Ok(term) => parsed.terms.push(term),
                            Err(error) => parsed.errors.push(error),
                        }
                        // The whole top-level term is consumed either way.
                        pos = close + 1;
                    }
                    None => {
                        let message = format!(
                            "unbalanced parentheses at end of input (opened at {}:{})",
                            token.line, token.column
                        );
                        warn!("{message}");
                        parsed.warnings.push(message);
                        break;
                    }
                }
            }
            _ => {
                let mut cursor = pos;
                match parse_at(&tokens, &mut cursor) {
                    Ok(term) => parsed.terms.push(term),
                    Err(error) => parsed.errors.push(error),
                }
                pos = cursor.max(pos + 1);
            }
        }
    }

    parsed
}

/// Parse exactly one term.
pub fn parse_term(input: &str) -> Result<Term, ParseError> {
    let mut parsed = parse_terms(input);
    if let Some(error) = parsed.errors.into_iter().next() {
        return Err(error);
    }
    if let Some(message) = parsed.warnings.into_iter().next() {
        return Err(ParseError::new(message, 0, 0));
    }
    match parsed.terms.len() {
        1 => Ok(parsed.terms.remove(0)),
        0 => Err(ParseError::new("expected a term", 0, 0)),
        _ => Err(ParseError::new("expected a single term", 0, 0)),
    }
}

/// Index of the `)` matching the `(` at `open`, if present.
fn matching_close(tokens: &[Token<'_>], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_at(tokens: &[Token<'_>], pos: &mut usize) -> Result<Term, ParseError> {
    let token = tokens
        .get(*pos)
        .ok_or_else(|| ParseError::new("unexpected end of input", 0, 0))?;
    *pos += 1;

    match token.kind {
        TokenKind::Atom => Ok(Term::atom(token.text)),
        TokenKind::Variable => Ok(Term::variable(token.text)),
        TokenKind::String => Ok(Term::atom(unescape(token.text))),
        TokenKind::LParen => {
            let mut children = Vec::new();
            loop {
                let next = tokens.get(*pos).ok_or_else(|| {
                    ParseError::new("missing ')'", token.line, token.column)
                })?;
                if next.kind == TokenKind::RParen {
                    *pos += 1;
                    return Ok(Term::list(children));
                }
                children.push(parse_at(tokens, pos)?);
            }
        }
        TokenKind::RParen => Err(ParseError::new(
            "unexpected ')'",
            token.line,
            token.column,
        )),
        TokenKind::Error => Err(ParseError::new(
            format!("unrecognized token {:?}", token.text),
            token.line,
            token.column,
        )),
        TokenKind::Whitespace | TokenKind::Comment => unreachable!("trivia filtered by lexer"),
    }
}

/// Strip quotes and resolve `\\` and `\"` escapes.
fn unescape(text: &str) -> SmolStr {
    let body = &text[1..text.len() - 1];
    if !body.contains('\\') {
        return SmolStr::new(body);
    }
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    SmolStr::new(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_lists() {
        let term = parse_term("(=> (instance ?X Dog) (attribute ?X Canine))").unwrap();
        assert_eq!(term.operator().map(|s| s.as_str()), Some("=>"));
        assert_eq!(term.children().unwrap().len(), 3);
        assert_eq!(term.variables(), &["?X"]);
    }

    #[test]
    fn print_parse_roundtrip() {
        let source = "(p ?x (q a \"two words\") skc_1)";
        let term = parse_term(source).unwrap();
        let reparsed = parse_term(term.kif()).unwrap();
        assert_eq!(term, reparsed);
    }

    #[test]
    fn string_escapes() {
        let term = parse_term(r#""say \"hi\" \\ now""#).unwrap();
        assert_eq!(term.as_atom().unwrap(), "say \"hi\" \\ now");
    }

    #[test]
    fn recovers_after_a_bad_term() {
        let parsed = parse_terms("(p a) (q ? b) (r c)");
        assert_eq!(parsed.terms.len(), 2);
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.terms[1].kif(), "(r c)");
    }

    #[test]
    fn error_reports_line_and_column() {
        let parsed = parse_terms("(p a)\n(q ~)");
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.errors[0].line, 2);
        assert_eq!(parsed.errors[0].column, 4);
    }

    #[test]
    fn unbalanced_eof_is_a_warning() {
        let parsed = parse_terms("(p a) (q b");
        assert_eq!(parsed.terms.len(), 1);
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn comments_run_to_end_of_line() {
        let parsed = parse_terms("(p a) ; trailing (not a term)\n(q b)");
        assert_eq!(parsed.terms.len(), 2);
        assert!(parsed.ok());
    }

    #[test]
    fn stray_close_paren_is_an_error() {
        let parsed = parse_terms(") (p a)");
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.terms.len(), 1);
    }
}
