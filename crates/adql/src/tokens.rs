use std::str::FromStr;

use smol_str::SmolStr;
use strum_macros::{AsRefStr, Display, EnumString, IntoStaticStr};

use crate::span::Span;

/// Reserved words of the query language. Matching is case-insensitive;
/// rendering always uses the upper-case form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Keyword {
    Select,
    Distinct,
    All,
    Top,
    From,
    Where,
    Group,
    By,
    Having,
    Order,
    Asc,
    Desc,
    Offset,
    As,
    Join,
    Inner,
    Left,
    Right,
    Full,
    Outer,
    Cross,
    Natural,
    On,
    Using,
    Union,
    Intersect,
    Except,
    With,
    And,
    Or,
    Not,
    Between,
    In,
    Like,
    Is,
    Null,
    Exists,
    Case,
    When,
    Then,
    Else,
    End,
    Cast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Keyword(Keyword),
    /// Unquoted identifier, folded for comparisons.
    Identifier,
    /// `"…"` delimited identifier, compared verbatim.
    QuotedIdentifier,
    Number,
    String,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,
    Plus,
    Minus,
    Star,
    Slash,
    /// `||`
    Concat,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Eof,
}

impl TokenKind {
    /// Short label used in "expected one of" parse errors.
    pub fn label(self) -> &'static str {
        match self {
            TokenKind::Keyword(_) => "keyword",
            TokenKind::Identifier => "identifier",
            TokenKind::QuotedIdentifier => "quoted identifier",
            TokenKind::Number => "number",
            TokenKind::String => "string literal",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::Semicolon => ";",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Concat => "||",
            TokenKind::Eq => "=",
            TokenKind::NotEq => "<>",
            TokenKind::Less => "<",
            TokenKind::LessEq => "<=",
            TokenKind::Greater => ">",
            TokenKind::GreaterEq => ">=",
            TokenKind::Eof => "end of query",
        }
    }
}

/// A lexed token. `text` holds the identifier/literal payload: for quoted
/// identifiers and strings the enclosing delimiters are stripped and escape
/// sequences are already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: SmolStr,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<SmolStr>, span: Span) -> Self {
        Token {
            kind,
            text: text.into(),
            span,
        }
    }

    pub fn keyword(&self) -> Option<Keyword> {
        match self.kind {
            TokenKind::Keyword(kw) => Some(kw),
            _ => None,
        }
    }
}

/// Classify a word as either a keyword or a plain identifier.
pub(crate) fn classify_word(word: &str) -> TokenKind {
    match Keyword::from_str(word) {
        Ok(kw) => TokenKind::Keyword(kw),
        Err(_) => TokenKind::Identifier,
    }
}
