use smol_str::SmolStr;

use crate::errors::ParseError;
use crate::span::Span;
use crate::tokens::{Token, TokenKind, classify_word};

/// Tokenize a whole query text. Returns the token stream terminated by a
/// single [`TokenKind::Eof`] token, or the first lexical error.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut cursor = Cursor::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = cursor.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

struct Cursor {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
}

impl Cursor {
    fn new(input: &str) -> Self {
        Cursor {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    /// Consume one character, returning it with the line/column it occupied.
    fn bump(&mut self) -> Option<(char, u32, u32)> {
        let ch = self.peek()?;
        let at = (ch, self.line, self.col);
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(at)
    }

    fn here(&self) -> Span {
        Span::point(self.line, self.col)
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() => {
                    self.bump();
                }
                Some('-') if self.peek_at(1) == Some('-') => {
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let start = self.here();
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            Some('*') if self.peek_at(1) == Some('/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(_) => {
                                self.bump();
                            }
                            None => {
                                return Err(ParseError::lex(start, "unterminated block comment"));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_trivia()?;

        let Some(ch) = self.peek() else {
            return Ok(Token::new(TokenKind::Eof, "", self.here()));
        };

        if ch.is_ascii_alphabetic() {
            return Ok(self.lex_word());
        }
        if ch.is_ascii_digit() || (ch == '.' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()))
        {
            return self.lex_number();
        }
        match ch {
            '\'' => self.lex_string(),
            '"' => self.lex_quoted_identifier(),
            _ => self.lex_symbol(),
        }
    }

    fn lex_word(&mut self) -> Token {
        let mut text = String::new();
        let (first, line, col) = self.bump().unwrap();
        text.push(first);
        let (mut end_line, mut end_col) = (line, col);
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                let (ch, l, c) = self.bump().unwrap();
                text.push(ch);
                (end_line, end_col) = (l, c);
            } else {
                break;
            }
        }
        let span = Span::new(line, col, end_line, end_col);
        Token::new(classify_word(&text), text, span)
    }

    fn lex_number(&mut self) -> Result<Token, ParseError> {
        let mut text = String::new();
        let (first, line, col) = self.bump().unwrap();
        text.push(first);
        let (mut end_line, mut end_col) = (line, col);

        let mut take = |cursor: &mut Cursor, text: &mut String| {
            let (ch, l, c) = cursor.bump().unwrap();
            text.push(ch);
            (end_line, end_col) = (l, c);
        };

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            take(self, &mut text);
        }
        if first != '.' && self.peek() == Some('.') {
            take(self, &mut text);
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                take(self, &mut text);
            }
        }
        if self.peek().is_some_and(|c| c == 'e' || c == 'E') {
            take(self, &mut text);
            if self.peek().is_some_and(|c| c == '+' || c == '-') {
                take(self, &mut text);
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(ParseError::lex(
                    self.here(),
                    format!("truncated exponent in numeric literal \"{text}\""),
                ));
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                take(self, &mut text);
            }
        }

        let span = Span::new(line, col, end_line, end_col);
        Ok(Token::new(TokenKind::Number, text, span))
    }

    fn lex_string(&mut self) -> Result<Token, ParseError> {
        let (_, line, col) = self.bump().unwrap();
        let mut value = String::new();
        loop {
            match self.peek() {
                Some('\'') if self.peek_at(1) == Some('\'') => {
                    self.bump();
                    self.bump();
                    value.push('\'');
                }
                Some('\'') => {
                    let (_, l, c) = self.bump().unwrap();
                    let span = Span::new(line, col, l, c);
                    return Ok(Token::new(TokenKind::String, value, span));
                }
                Some(_) => {
                    let (ch, _, _) = self.bump().unwrap();
                    value.push(ch);
                }
                None => {
                    return Err(ParseError::lex(
                        Span::point(line, col),
                        "unterminated string literal",
                    ));
                }
            }
        }
    }

    fn lex_quoted_identifier(&mut self) -> Result<Token, ParseError> {
        let (_, line, col) = self.bump().unwrap();
        let mut value = String::new();
        loop {
            match self.peek() {
                Some('"') if self.peek_at(1) == Some('"') => {
                    self.bump();
                    self.bump();
                    value.push('"');
                }
                Some('"') => {
                    let (_, l, c) = self.bump().unwrap();
                    if value.is_empty() {
                        return Err(ParseError::lex(
                            Span::point(line, col),
                            "empty delimited identifier",
                        ));
                    }
                    let span = Span::new(line, col, l, c);
                    return Ok(Token::new(TokenKind::QuotedIdentifier, value, span));
                }
                Some(_) => {
                    let (ch, _, _) = self.bump().unwrap();
                    value.push(ch);
                }
                None => {
                    return Err(ParseError::lex(
                        Span::point(line, col),
                        "unterminated delimited identifier",
                    ));
                }
            }
        }
    }

    fn lex_symbol(&mut self) -> Result<Token, ParseError> {
        let (ch, line, col) = self.bump().unwrap();
        let single = |kind: TokenKind, text: &str| {
            Ok(Token::new(
                kind,
                SmolStr::new(text),
                Span::new(line, col, line, col),
            ))
        };
        let double = |cursor: &mut Cursor, kind: TokenKind, text: &str| {
            let (_, l, c) = cursor.bump().unwrap();
            Ok(Token::new(
                kind,
                SmolStr::new(text),
                Span::new(line, col, l, c),
            ))
        };
        match ch {
            '(' => single(TokenKind::LParen, "("),
            ')' => single(TokenKind::RParen, ")"),
            ',' => single(TokenKind::Comma, ","),
            '.' => single(TokenKind::Dot, "."),
            ';' => single(TokenKind::Semicolon, ";"),
            '+' => single(TokenKind::Plus, "+"),
            '-' => single(TokenKind::Minus, "-"),
            '*' => single(TokenKind::Star, "*"),
            '/' => single(TokenKind::Slash, "/"),
            '=' => single(TokenKind::Eq, "="),
            '|' if self.peek() == Some('|') => double(self, TokenKind::Concat, "||"),
            '!' if self.peek() == Some('=') => double(self, TokenKind::NotEq, "!="),
            '<' => match self.peek() {
                Some('>') => double(self, TokenKind::NotEq, "<>"),
                Some('=') => double(self, TokenKind::LessEq, "<="),
                _ => single(TokenKind::Less, "<"),
            },
            '>' => match self.peek() {
                Some('=') => double(self, TokenKind::GreaterEq, ">="),
                _ => single(TokenKind::Greater, ">"),
            },
            _ => Err(ParseError::lex(
                Span::point(line, col),
                format!("unexpected character '{ch}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::errors::ParseErrorKind;
    use crate::tokens::Keyword;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("SELECT ra FROM sources"),
            vec![
                TokenKind::Keyword(Keyword::Select),
                TokenKind::Identifier,
                TokenKind::Keyword(Keyword::From),
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let tokens = tokenize("12 3.5 .25 1e10 2.5E-3").unwrap();
        let texts: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Number)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(texts, vec!["12", "3.5", ".25", "1e10", "2.5E-3"]);
    }

    #[test]
    fn test_string_escape() {
        let tokens = tokenize("'it''s'").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].text.as_str(), "it's");
    }

    #[test]
    fn test_quoted_identifier_preserves_case() {
        let tokens = tokenize("\"RaDec\"").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::QuotedIdentifier);
        assert_eq!(tokens[0].text.as_str(), "RaDec");
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("SELECT -- trailing\n /* block\n comment */ x"),
            vec![
                TokenKind::Keyword(Keyword::Select),
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("<> <= >= || != ="),
            vec![
                TokenKind::NotEq,
                TokenKind::LessEq,
                TokenKind::GreaterEq,
                TokenKind::Concat,
                TokenKind::NotEq,
                TokenKind::Eq,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_spans_track_lines() {
        let tokens = tokenize("SELECT\n  ra").unwrap();
        assert_eq!(tokens[0].span, Span::new(1, 1, 1, 6));
        assert_eq!(tokens[1].span, Span::new(2, 3, 2, 4));
    }

    #[test]
    fn test_unterminated_string_is_a_lex_error() {
        let err = tokenize("SELECT 'oops").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::LexError);
        assert_eq!(err.pos, Span::point(1, 8));
    }

    #[test]
    fn test_lone_bang_is_rejected() {
        let err = tokenize("a ! b").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::LexError);
    }
}
