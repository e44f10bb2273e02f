use thiserror::Error;

use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The input could not even be tokenized.
    LexError,
    /// The token stream did not match the grammar.
    SyntaxError,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseErrorKind::LexError => f.write_str("lexical error"),
            ParseErrorKind::SyntaxError => f.write_str("syntax error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} at {pos}: {message}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub pos: Span,
    pub message: String,
    /// Tokens any one of which would have been accepted at `pos`.
    pub expected: Vec<&'static str>,
}

impl ParseError {
    pub fn lex(pos: Span, message: impl Into<String>) -> Self {
        ParseError {
            kind: ParseErrorKind::LexError,
            pos,
            message: message.into(),
            expected: Vec::new(),
        }
    }

    pub fn syntax(pos: Span, message: impl Into<String>) -> Self {
        ParseError {
            kind: ParseErrorKind::SyntaxError,
            pos,
            message: message.into(),
            expected: Vec::new(),
        }
    }

    pub fn expecting(mut self, expected: Vec<&'static str>) -> Self {
        self.expected = expected;
        self
    }
}

/// Semantic errors raised while resolving a parsed query against a catalog
/// and the service feature set. One stable kind per failure mode.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CheckError {
    #[error("unknown table \"{name}\"{}", fmt_pos(.pos))]
    UnresolvedTable { name: String, pos: Option<Span> },

    #[error("ambiguous table \"{name}\" (candidates: {}){}", .candidates.join(", "), fmt_pos(.pos))]
    AmbiguousTable {
        name: String,
        candidates: Vec<String>,
        pos: Option<Span>,
    },

    #[error("unknown column \"{name}\"{}", fmt_pos(.pos))]
    UnresolvedColumn { name: String, pos: Option<Span> },

    #[error("ambiguous column \"{name}\" (candidates: {}){}", .candidates.join(", "), fmt_pos(.pos))]
    AmbiguousColumn {
        name: String,
        candidates: Vec<String>,
        pos: Option<Span>,
    },

    #[error("unknown function {signature}{}", fmt_pos(.pos))]
    UnknownFunction {
        signature: String,
        pos: Option<Span>,
    },

    #[error("{function} takes {expected} argument(s), {found} given{}", fmt_pos(.pos))]
    ArityMismatch {
        function: String,
        expected: String,
        found: usize,
        pos: Option<Span>,
    },

    #[error("argument \"{param}\" of {function} expects {expected}, got {found}{}", fmt_pos(.pos))]
    TypeMismatch {
        function: String,
        param: String,
        expected: String,
        found: String,
        pos: Option<Span>,
    },

    #[error("the language feature {feature} is not available on this service{}", fmt_pos(.pos))]
    FeatureForbidden { feature: String, pos: Option<Span> },

    #[error("ORDER BY position {index} does not designate a single select item (select list has {select_items} item(s)){}", fmt_pos(.pos))]
    AmbiguousOrderPosition {
        index: u32,
        select_items: usize,
        pos: Option<Span>,
    },
}

fn fmt_pos(pos: &Option<Span>) -> String {
    match pos {
        Some(span) => format!(" ({span})"),
        None => String::new(),
    }
}

/// Violations of the AST mutation protocol. These indicate misuse of the
/// replacement cursor, not bad query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CursorError {
    #[error("cursor has no current item, or the item was already replaced or removed")]
    InvalidCursorState,

    #[error("the {0} slot is required and cannot be removed")]
    NotRemovable(&'static str),

    #[error("cannot put a {found} into a {expected} slot")]
    IncompatibleReplacement {
        expected: &'static str,
        found: &'static str,
    },
}
