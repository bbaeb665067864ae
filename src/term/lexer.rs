//! Logos-based lexer for the KIF term grammar.
//!
//! Fast tokenization using the logos crate. The iterator tracks line and
//! column so parse errors can point at their source location.

use logos::Logos;

/// Raw logos token enum.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KifToken {
    // =========================================================================
    // TRIVIA
    // =========================================================================
    #[regex(r"[ \t\r\n]+")]
    Whitespace,

    /// `;` to end of line
    #[regex(r";[^\n]*")]
    Comment,

    // =========================================================================
    // STRUCTURE
    // =========================================================================
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    // =========================================================================
    // TOKENS
    // =========================================================================
    /// `?`-prefixed bare token, length ≥ 2
    #[regex(r"\?[A-Za-z0-9_+*/.<>=:!#%&'-]+")]
    Variable,

    /// Bare atom token
    #[regex(r"[A-Za-z0-9_+*/.<>=:!#%&'-]+")]
    Atom,

    /// Double-quoted string with `\\` and `\"` escapes
    #[regex(r#""([^"\\]|\\.)*""#)]
    String,
}

/// Token kind after error folding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    Comment,
    LParen,
    RParen,
    Variable,
    Atom,
    String,
    /// Anything the lexer could not recognize
    Error,
}

impl From<KifToken> for TokenKind {
    fn from(token: KifToken) -> Self {
        match token {
            KifToken::Whitespace => TokenKind::Whitespace,
            KifToken::Comment => TokenKind::Comment,
            KifToken::LParen => TokenKind::LParen,
            KifToken::RParen => TokenKind::RParen,
            KifToken::Variable => TokenKind::Variable,
            KifToken::Atom => TokenKind::Atom,
            KifToken::String => TokenKind::String,
        }
    }
}

impl TokenKind {
    /// Whitespace or comment.
    pub fn is_trivia(self) -> bool {
        matches!(self, TokenKind::Whitespace | TokenKind::Comment)
    }
}

/// A token with its kind, text, and 1-based source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub line: u32,
    pub column: u32,
}

/// Lexer wrapping the logos-generated tokenizer.
pub struct Lexer<'a> {
    inner: logos::Lexer<'a, KifToken>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            inner: KifToken::lexer(input),
            line: 1,
            column: 1,
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.inner.next()?;
        let text = self.inner.slice();
        let line = self.line;
        let column = self.column;

        for c in text.chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }

        let kind = match raw {
            Ok(t) => t.into(),
            Err(()) => TokenKind::Error,
        };

        Some(Token {
            kind,
            text,
            line,
            column,
        })
    }
}

/// Tokenize an entire string, dropping trivia.
pub fn tokenize(input: &str) -> Vec<Token<'_>> {
    Lexer::new(input)
        .filter(|t| !t.kind.is_trivia())
        .collect()
}
