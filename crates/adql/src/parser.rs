//! Predictive recursive-descent parser for the query grammar.
//!
//! One token of lookahead almost everywhere; the two genuinely ambiguous
//! spots (`(` opening either a constraint group or a parenthesized
//! operand, and a select item that may be a `table.*`) are resolved by
//! saving and restoring the cursor. Every node produced carries the span
//! from its first to its last consumed token.

use smol_str::SmolStr;

use crate::ast::constraint::NotConstraint;
use crate::ast::operand::{CaseBranch, CaseExpr, CastExpr, NegationExpr, WrappedOperand};
use crate::ast::query::{SelectAll, SelectExpr};
use crate::ast::{
    ArithOp, Between, BinaryExpr, CaseMask, ColumnExpr, ColumnPath, Comparison, ComparisonOp,
    Concatenation, Constraint, ConstraintClause, Exists, FromClause, FromItem, FunctionCall,
    GeometryFunction, GeometryKind, IdentPart, InConstraint, InList, IsNull, JoinCondition,
    JoinKind, JoinedTable, Like, LogicalSep, NodeList, NumericLiteral, Operand, OrderItem,
    OrderTarget, Query, QueryExpr, SelectClause, SelectItem, SetOp, SetOperation, StringLiteral,
    SubQueryRef, TablePath, TableRef, WithItem,
};
use crate::catalog::{DbType, DbTypeKind};
use crate::errors::ParseError;
use crate::lexer::tokenize;
use crate::span::Span;
use crate::tokens::{Keyword, Token, TokenKind};

/// Parse a single query. Trailing `;` is tolerated; anything after it is
/// an error.
pub fn parse(text: &str) -> Result<QueryExpr, ParseError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser::new(tokens);
    let query = parser.parse_query_expr()?;
    parser.accept(TokenKind::Semicolon);
    parser.expect(TokenKind::Eof)?;
    Ok(query)
}

/// Parse a `;`-separated batch. After an error the parser skips to the
/// next statement boundary and goes on, so one bad statement does not
/// hide the rest.
pub fn parse_all(text: &str) -> Vec<Result<QueryExpr, ParseError>> {
    let tokens = match tokenize(text) {
        Ok(tokens) => tokens,
        Err(err) => return vec![Err(err)],
    };
    let mut parser = Parser::new(tokens);
    let mut parsed = Vec::new();
    while !parser.at(TokenKind::Eof) {
        match parser.parse_query_expr() {
            Ok(query) => {
                parsed.push(Ok(query));
                if !parser.accept(TokenKind::Semicolon) && !parser.at(TokenKind::Eof) {
                    parsed.push(Err(parser
                        .error_here("unexpected input after the query")
                        .expecting(vec![";", "end of query"])));
                    parser.skip_to_statement_boundary();
                }
            }
            Err(err) => {
                parsed.push(Err(err));
                parser.skip_to_statement_boundary();
            }
        }
        // Swallow empty statements.
        while parser.accept(TokenKind::Semicolon) {}
    }
    parsed
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn at_kw(&self, kw: Keyword) -> bool {
        self.peek().kind == TokenKind::Keyword(kw)
    }

    fn at_ident(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Identifier | TokenKind::QuotedIdentifier
        )
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn accept(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn accept_kw(&mut self, kw: Keyword) -> bool {
        self.accept(TokenKind::Keyword(kw))
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            Err(self
                .error_here(format!(
                    "expected {} but found \"{}\"",
                    kind.label(),
                    self.describe_current()
                ))
                .expecting(vec![kind.label()]))
        }
    }

    fn expect_kw(&mut self, kw: Keyword) -> Result<Token, ParseError> {
        if self.at_kw(kw) {
            Ok(self.bump())
        } else {
            {
                let label: &'static str = kw.into();
                Err(self
                    .error_here(format!(
                        "expected {} but found \"{}\"",
                        label,
                        self.describe_current()
                    ))
                    .expecting(vec![label]))
            }
        }
    }

    fn describe_current(&self) -> String {
        let token = self.peek();
        match token.kind {
            TokenKind::Eof => "end of query".to_string(),
            _ => token.text.to_string(),
        }
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        ParseError::syntax(self.peek().span, message)
    }

    fn skip_to_statement_boundary(&mut self) {
        while !self.at(TokenKind::Eof) && !self.at(TokenKind::Semicolon) {
            self.bump();
        }
        self.accept(TokenKind::Semicolon);
    }

    fn mark(&self) -> usize {
        self.pos
    }

    fn rewind(&mut self, mark: usize) {
        self.pos = mark;
    }

    fn span_since(&self, mark: usize) -> Option<Span> {
        if self.pos == 0 || mark >= self.pos {
            return None;
        }
        Some(self.tokens[mark].span.merge(self.tokens[self.pos - 1].span))
    }

    // ---- identifiers ------------------------------------------------

    /// Consume one identifier (quoted or not), returning its text and
    /// whether it was quoted.
    fn parse_ident(&mut self) -> Result<(SmolStr, bool), ParseError> {
        match self.peek().kind {
            TokenKind::Identifier => Ok((self.bump().text, false)),
            TokenKind::QuotedIdentifier => Ok((self.bump().text, true)),
            _ => Err(self
                .error_here(format!(
                    "expected an identifier but found \"{}\"",
                    self.describe_current()
                ))
                .expecting(vec!["identifier", "quoted identifier"])),
        }
    }

    /// Dotted identifier chain of at most `max_parts` parts.
    fn parse_ident_chain(&mut self, max_parts: usize) -> Result<Vec<(SmolStr, bool)>, ParseError> {
        let mut parts = vec![self.parse_ident()?];
        while self.at(TokenKind::Dot) && self.peek_at(1).is_some_and(|t| {
            matches!(t.kind, TokenKind::Identifier | TokenKind::QuotedIdentifier)
        }) {
            if parts.len() == max_parts {
                return Err(self.error_here("too many qualifier parts in identifier"));
            }
            self.bump();
            parts.push(self.parse_ident()?);
        }
        Ok(parts)
    }

    fn table_path_from_parts(parts: Vec<(SmolStr, bool)>) -> TablePath {
        let mut case = CaseMask::new();
        let mut iter = parts.into_iter().rev();
        let (table, table_q) = iter.next().expect("chain is never empty");
        case.set(IdentPart::Table, table_q);
        let schema = iter.next().map(|(name, quoted)| {
            case.set(IdentPart::Schema, quoted);
            name
        });
        let catalog = iter.next().map(|(name, quoted)| {
            case.set(IdentPart::Catalog, quoted);
            name
        });
        TablePath {
            catalog,
            schema,
            table,
            case,
        }
    }

    fn column_path_from_parts(parts: Vec<(SmolStr, bool)>) -> ColumnPath {
        let mut case = CaseMask::new();
        let mut iter = parts.into_iter().rev();
        let (column, column_q) = iter.next().expect("chain is never empty");
        case.set(IdentPart::Column, column_q);
        let table = iter.next().map(|(name, quoted)| {
            case.set(IdentPart::Table, quoted);
            name
        });
        let schema = iter.next().map(|(name, quoted)| {
            case.set(IdentPart::Schema, quoted);
            name
        });
        let catalog = iter.next().map(|(name, quoted)| {
            case.set(IdentPart::Catalog, quoted);
            name
        });
        ColumnPath {
            catalog,
            schema,
            table,
            column,
            case,
        }
    }

    /// `AS name`, or a bare trailing identifier.
    fn parse_optional_alias(&mut self) -> Result<Option<(SmolStr, bool)>, ParseError> {
        if self.accept_kw(Keyword::As) {
            return self.parse_ident().map(Some);
        }
        if self.at_ident() {
            return self.parse_ident().map(Some);
        }
        Ok(None)
    }

    fn parse_unsigned(&mut self, what: &str) -> Result<u64, ParseError> {
        let token = self.expect(TokenKind::Number)?;
        token.text.parse().map_err(|_| {
            ParseError::syntax(
                token.span,
                format!("{what} requires an unsigned integer, not \"{}\"", token.text),
            )
        })
    }

    // ---- query level ------------------------------------------------

    fn parse_query_expr(&mut self) -> Result<QueryExpr, ParseError> {
        let start = self.mark();

        let with = if self.at_kw(Keyword::With) {
            self.parse_with_list()?
        } else {
            NodeList::named("WITH")
        };

        let mut expr = self.parse_set_term()?;
        while self.at_kw(Keyword::Union) || self.at_kw(Keyword::Except) {
            let op = if self.accept_kw(Keyword::Union) {
                SetOp::Union
            } else {
                self.bump();
                SetOp::Except
            };
            let all = self.accept_kw(Keyword::All);
            let right = self.parse_set_term()?;
            expr = QueryExpr::Set(Box::new(SetOperation {
                with: NodeList::named("WITH"),
                op,
                all,
                left: expr,
                right,
                order_by: None,
                offset: None,
                span: self.span_since(start),
            }));
        }

        let order_by = if self.at_kw(Keyword::Order) {
            Some(self.parse_order_by()?)
        } else {
            None
        };
        let offset = if self.accept_kw(Keyword::Offset) {
            Some(self.parse_unsigned("OFFSET")?)
        } else {
            None
        };

        // A parenthesized operand may already carry its own WITH/ORDER
        // BY/OFFSET; only overwrite with what this level actually saw.
        let span = self.span_since(start);
        match &mut expr {
            QueryExpr::Select(q) => {
                if !with.is_empty() {
                    q.with = with;
                }
                if order_by.is_some() {
                    q.order_by = order_by;
                }
                if offset.is_some() {
                    q.offset = offset;
                }
                q.span = span;
            }
            QueryExpr::Set(s) => {
                if !with.is_empty() {
                    s.with = with;
                }
                if order_by.is_some() {
                    s.order_by = order_by;
                }
                if offset.is_some() {
                    s.offset = offset;
                }
                s.span = span;
            }
        }
        Ok(expr)
    }

    fn parse_set_term(&mut self) -> Result<QueryExpr, ParseError> {
        let start = self.mark();
        let mut expr = self.parse_set_factor()?;
        while self.at_kw(Keyword::Intersect) {
            self.bump();
            let all = self.accept_kw(Keyword::All);
            let right = self.parse_set_factor()?;
            expr = QueryExpr::Set(Box::new(SetOperation {
                with: NodeList::named("WITH"),
                op: SetOp::Intersect,
                all,
                left: expr,
                right,
                order_by: None,
                offset: None,
                span: self.span_since(start),
            }));
        }
        Ok(expr)
    }

    fn parse_set_factor(&mut self) -> Result<QueryExpr, ParseError> {
        if self.accept(TokenKind::LParen) {
            let query = self.parse_query_expr()?;
            self.expect(TokenKind::RParen)?;
            Ok(query)
        } else {
            Ok(QueryExpr::Select(Box::new(self.parse_simple_query()?)))
        }
    }

    fn parse_with_list(&mut self) -> Result<NodeList<WithItem>, ParseError> {
        let start = self.mark();
        self.expect_kw(Keyword::With)?;
        let mut list = NodeList::named("WITH");
        loop {
            let item_start = self.mark();
            let (name, name_sensitive) = self.parse_ident()?;
            self.expect_kw(Keyword::As)?;
            self.expect(TokenKind::LParen)?;
            let query = self.parse_query_expr()?;
            self.expect(TokenKind::RParen)?;
            list.push(WithItem {
                name,
                name_sensitive,
                query,
                span: self.span_since(item_start),
            });
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        list.set_span(self.span_since(start));
        Ok(list)
    }

    fn parse_simple_query(&mut self) -> Result<Query, ParseError> {
        let start = self.mark();
        self.expect_kw(Keyword::Select)?;

        let mut select = SelectClause::new();
        if self.accept_kw(Keyword::Distinct) {
            select.distinct = true;
        } else {
            self.accept_kw(Keyword::All);
        }
        if self.accept_kw(Keyword::Top) {
            select.top = Some(self.parse_unsigned("TOP")?);
        }
        loop {
            let item = self.parse_select_item()?;
            select.items.push(item);
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        select.items.set_span(self.span_since(start));
        select.span = self.span_since(start);

        self.expect_kw(Keyword::From)?;
        let from = self.parse_from_list()?;

        let mut query = Query::new(select, from);
        if self.accept_kw(Keyword::Where) {
            query.where_clause = Some(self.parse_condition_list("WHERE")?);
        }
        if self.at_kw(Keyword::Group) {
            self.bump();
            self.expect_kw(Keyword::By)?;
            let group_start = self.mark();
            let mut group = NodeList::named("GROUP BY");
            loop {
                group.push(self.parse_operand()?);
                if !self.accept(TokenKind::Comma) {
                    break;
                }
            }
            group.set_span(self.span_since(group_start));
            query.group_by = Some(group);
        }
        if self.accept_kw(Keyword::Having) {
            query.having = Some(self.parse_condition_list("HAVING")?);
        }

        query.span = self.span_since(start);
        Ok(query)
    }

    fn parse_select_item(&mut self) -> Result<SelectItem, ParseError> {
        let start = self.mark();

        if self.accept(TokenKind::Star) {
            return Ok(SelectItem::AllColumns(SelectAll {
                table: None,
                binding: None,
                span: self.span_since(start),
            }));
        }

        // `table.*`, with up to three qualifier parts.
        if self.at_ident() {
            let save = self.mark();
            if let Ok(parts) = self.parse_ident_chain(3) {
                if self.at(TokenKind::Dot)
                    && self.peek_at(1).is_some_and(|t| t.kind == TokenKind::Star)
                {
                    self.bump();
                    self.bump();
                    return Ok(SelectItem::AllColumns(SelectAll {
                        table: Some(Self::table_path_from_parts(parts)),
                        binding: None,
                        span: self.span_since(start),
                    }));
                }
            }
            self.rewind(save);
        }

        let operand = self.parse_operand()?;
        let alias = self.parse_optional_alias()?;
        let (alias, alias_sensitive) = match alias {
            Some((name, quoted)) => (Some(name), quoted),
            None => (None, false),
        };
        Ok(SelectItem::Expr(SelectExpr {
            operand,
            alias,
            alias_sensitive,
            span: self.span_since(start),
        }))
    }

    fn parse_order_by(&mut self) -> Result<NodeList<OrderItem>, ParseError> {
        let start = self.mark();
        self.expect_kw(Keyword::Order)?;
        self.expect_kw(Keyword::By)?;
        let mut list = NodeList::named("ORDER BY");
        loop {
            let item_start = self.mark();
            let target = if self.at(TokenKind::Number) {
                let index = self.parse_unsigned("an ORDER BY position")?;
                if index == 0 {
                    return Err(ParseError::syntax(
                        self.tokens[item_start].span,
                        "ORDER BY positions are 1-based",
                    ));
                }
                OrderTarget::Index(index.min(u32::MAX as u64) as u32)
            } else {
                let (name, sensitive) = self.parse_ident()?;
                OrderTarget::Name { name, sensitive }
            };
            let descending = if self.accept_kw(Keyword::Desc) {
                true
            } else {
                self.accept_kw(Keyword::Asc);
                false
            };
            list.push(OrderItem {
                target,
                descending,
                span: self.span_since(item_start),
            });
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        list.set_span(self.span_since(start));
        Ok(list)
    }

    // ---- from level -------------------------------------------------

    fn parse_from_list(&mut self) -> Result<FromClause, ParseError> {
        let start = self.mark();
        let mut item = self.parse_table_ref()?;
        while self.accept(TokenKind::Comma) {
            let right = self.parse_table_ref()?;
            item = FromItem::Join(Box::new(JoinedTable {
                left: item,
                right,
                kind: JoinKind::Cross,
                condition: JoinCondition::None,
                span: self.span_since(start),
            }));
        }
        let mut clause = FromClause::new(item);
        clause.span = self.span_since(start);
        Ok(clause)
    }

    fn parse_table_ref(&mut self) -> Result<FromItem, ParseError> {
        let start = self.mark();
        let mut item = self.parse_table_primary()?;
        loop {
            let kind = if self.accept_kw(Keyword::Natural) {
                self.expect_kw(Keyword::Join)
                    .map_err(|err| err.expecting(vec!["JOIN"]))?;
                JoinKind::Natural
            } else if self.at_kw(Keyword::Join) {
                self.bump();
                JoinKind::Inner
            } else if self.at_kw(Keyword::Inner) {
                self.bump();
                self.expect_kw(Keyword::Join)?;
                JoinKind::Inner
            } else if self.at_kw(Keyword::Cross) {
                self.bump();
                self.expect_kw(Keyword::Join)?;
                JoinKind::Cross
            } else if self.at_kw(Keyword::Left)
                || self.at_kw(Keyword::Right)
                || self.at_kw(Keyword::Full)
            {
                let kw = self.bump().keyword().expect("checked above");
                self.accept_kw(Keyword::Outer);
                self.expect_kw(Keyword::Join)?;
                match kw {
                    Keyword::Left => JoinKind::Left,
                    Keyword::Right => JoinKind::Right,
                    _ => JoinKind::Full,
                }
            } else {
                break;
            };

            let right = self.parse_table_primary()?;
            let condition = match kind {
                JoinKind::Cross | JoinKind::Natural => JoinCondition::None,
                _ => {
                    if self.accept_kw(Keyword::On) {
                        JoinCondition::On(self.parse_condition_list("ON")?)
                    } else if self.accept_kw(Keyword::Using) {
                        self.expect(TokenKind::LParen)?;
                        let mut columns = NodeList::named("USING");
                        loop {
                            let col_start = self.mark();
                            let (name, quoted) = self.parse_ident()?;
                            let mut path = ColumnPath::bare(name);
                            path.case.set(IdentPart::Column, quoted);
                            let mut col = ColumnExpr::new(path);
                            col.span = self.span_since(col_start);
                            columns.push(col);
                            if !self.accept(TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(TokenKind::RParen)?;
                        JoinCondition::Using(columns)
                    } else {
                        return Err(self
                            .error_here("a qualified join needs an ON or USING condition")
                            .expecting(vec!["ON", "USING"]));
                    }
                }
            };

            item = FromItem::Join(Box::new(JoinedTable {
                left: item,
                right,
                kind,
                condition,
                span: self.span_since(start),
            }));
        }
        Ok(item)
    }

    fn parse_table_primary(&mut self) -> Result<FromItem, ParseError> {
        let start = self.mark();

        if self.at(TokenKind::LParen) {
            let next = self.peek_at(1).map(|t| t.kind);
            let is_query = matches!(
                next,
                Some(TokenKind::Keyword(Keyword::Select))
                    | Some(TokenKind::Keyword(Keyword::With))
                    | Some(TokenKind::LParen)
            );
            self.bump();
            if is_query {
                let query = self.parse_query_expr()?;
                self.expect(TokenKind::RParen)?;
                let Some((alias, alias_sensitive)) = self.parse_optional_alias()? else {
                    return Err(self
                        .error_here("a sub-query in FROM needs an alias")
                        .expecting(vec!["AS"]));
                };
                return Ok(FromItem::SubQuery(Box::new(SubQueryRef {
                    query,
                    alias,
                    alias_sensitive,
                    span: self.span_since(start),
                })));
            }
            let item = self.parse_table_ref()?;
            self.expect(TokenKind::RParen)?;
            return Ok(item);
        }

        let parts = self.parse_ident_chain(3)?;
        let mut path = Self::table_path_from_parts(parts);
        let alias = self.parse_optional_alias()?.map(|(name, quoted)| {
            path.case.set(IdentPart::Alias, quoted);
            name
        });
        let mut table = TableRef::new(path);
        table.alias = alias;
        table.span = self.span_since(start);
        Ok(FromItem::Table(table))
    }

    // ---- constraints ------------------------------------------------

    fn parse_condition_list(&mut self, name: &'static str) -> Result<ConstraintClause, ParseError> {
        let start = self.mark();
        let mut clause = ConstraintClause::new(name);
        clause.push(self.parse_constraint()?);
        loop {
            if self.accept_kw(Keyword::And) {
                clause.push_with(LogicalSep::And, self.parse_constraint()?);
            } else if self.accept_kw(Keyword::Or) {
                clause.push_with(LogicalSep::Or, self.parse_constraint()?);
            } else {
                break;
            }
        }
        clause.set_span(self.span_since(start));
        Ok(clause)
    }

    fn parse_constraint(&mut self) -> Result<Constraint, ParseError> {
        let start = self.mark();
        if self.accept_kw(Keyword::Not) {
            let inner = self.parse_constraint()?;
            return Ok(Constraint::Not(Box::new(NotConstraint {
                constraint: inner,
                span: self.span_since(start),
            })));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Constraint, ParseError> {
        let start = self.mark();

        if self.accept_kw(Keyword::Exists) {
            self.expect(TokenKind::LParen)?;
            let query = self.parse_query_expr()?;
            self.expect(TokenKind::RParen)?;
            return Ok(Constraint::Exists(Box::new(Exists {
                query,
                span: self.span_since(start),
            })));
        }

        // `(` may open a constraint group or a parenthesized operand of a
        // predicate. Try the group reading first and fall back.
        if self.at(TokenKind::LParen) {
            let save = self.mark();
            self.bump();
            match self.parse_condition_list("") {
                Ok(group) if self.accept(TokenKind::RParen) => {
                    let mut group = group;
                    group.set_span(self.span_since(save));
                    return Ok(Constraint::Group(Box::new(group)));
                }
                _ => self.rewind(save),
            }
        }

        let operand = self.parse_operand()?;

        let comparison_op = match self.peek().kind {
            TokenKind::Eq => Some(ComparisonOp::Eq),
            TokenKind::NotEq => Some(ComparisonOp::NotEq),
            TokenKind::Less => Some(ComparisonOp::Less),
            TokenKind::LessEq => Some(ComparisonOp::LessEq),
            TokenKind::Greater => Some(ComparisonOp::Greater),
            TokenKind::GreaterEq => Some(ComparisonOp::GreaterEq),
            _ => None,
        };
        if let Some(op) = comparison_op {
            self.bump();
            let right = self.parse_operand()?;
            return Ok(Constraint::Comparison(Box::new(Comparison {
                left: operand,
                op,
                right,
                span: self.span_since(start),
            })));
        }

        let negated = self.accept_kw(Keyword::Not);

        if self.accept_kw(Keyword::Between) {
            let low = self.parse_operand()?;
            self.expect_kw(Keyword::And)?;
            let high = self.parse_operand()?;
            return Ok(Constraint::Between(Box::new(Between {
                operand,
                low,
                high,
                negated,
                span: self.span_since(start),
            })));
        }

        if self.accept_kw(Keyword::In) {
            self.expect(TokenKind::LParen)?;
            let list = if self.at_kw(Keyword::Select) || self.at_kw(Keyword::With) {
                InList::Query(self.parse_query_expr()?)
            } else {
                let mut values = NodeList::named("IN");
                loop {
                    values.push(self.parse_operand()?);
                    if !self.accept(TokenKind::Comma) {
                        break;
                    }
                }
                InList::Values(values)
            };
            self.expect(TokenKind::RParen)?;
            return Ok(Constraint::In(Box::new(InConstraint {
                operand,
                list,
                negated,
                span: self.span_since(start),
            })));
        }

        if self.accept_kw(Keyword::Like) {
            let pattern = self.parse_operand()?;
            return Ok(Constraint::Like(Box::new(Like {
                operand,
                pattern,
                negated,
                span: self.span_since(start),
            })));
        }

        if negated {
            return Err(self
                .error_here("expected BETWEEN, IN or LIKE after NOT")
                .expecting(vec!["BETWEEN", "IN", "LIKE"]));
        }

        if self.accept_kw(Keyword::Is) {
            let negated = self.accept_kw(Keyword::Not);
            self.expect_kw(Keyword::Null)?;
            return Ok(Constraint::IsNull(Box::new(IsNull {
                operand,
                negated,
                span: self.span_since(start),
            })));
        }

        Err(self
            .error_here(format!(
                "expected a predicate but found \"{}\"",
                self.describe_current()
            ))
            .expecting(vec![
                "=", "<>", "<", "<=", ">", ">=", "BETWEEN", "IN", "LIKE", "IS",
            ]))
    }

    // ---- operands ---------------------------------------------------

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        let start = self.mark();
        let first = self.parse_additive()?;
        if !self.at(TokenKind::Concat) {
            return Ok(first);
        }
        let mut items = NodeList::named("||");
        items.push(first);
        while self.accept(TokenKind::Concat) {
            items.push(self.parse_additive()?);
        }
        items.set_span(self.span_since(start));
        Ok(Operand::Concat(Concatenation { items }))
    }

    fn parse_additive(&mut self) -> Result<Operand, ParseError> {
        let start = self.mark();
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.accept(TokenKind::Plus) {
                ArithOp::Add
            } else if self.accept(TokenKind::Minus) {
                ArithOp::Sub
            } else {
                break;
            };
            let right = self.parse_multiplicative()?;
            left = Operand::Binary(Box::new(BinaryExpr {
                left,
                op,
                right,
                span: self.span_since(start),
            }));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Operand, ParseError> {
        let start = self.mark();
        let mut left = self.parse_factor()?;
        loop {
            let op = if self.accept(TokenKind::Star) {
                ArithOp::Mul
            } else if self.accept(TokenKind::Slash) {
                ArithOp::Div
            } else {
                break;
            };
            let right = self.parse_factor()?;
            left = Operand::Binary(Box::new(BinaryExpr {
                left,
                op,
                right,
                span: self.span_since(start),
            }));
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Operand, ParseError> {
        let start = self.mark();
        if self.accept(TokenKind::Minus) {
            let operand = self.parse_factor()?;
            return Ok(Operand::Negation(Box::new(NegationExpr {
                operand,
                span: self.span_since(start),
            })));
        }
        if self.accept(TokenKind::Plus) {
            return self.parse_factor();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Operand, ParseError> {
        let start = self.mark();

        match self.peek().kind {
            TokenKind::Number => {
                let token = self.bump();
                let mut literal = NumericLiteral::new(token.text);
                literal.span = Some(token.span);
                return Ok(Operand::Number(literal));
            }
            TokenKind::String => {
                let token = self.bump();
                let mut literal = StringLiteral::new(token.text);
                literal.span = Some(token.span);
                return Ok(Operand::Str(literal));
            }
            TokenKind::LParen => {
                self.bump();
                let operand = self.parse_operand()?;
                self.expect(TokenKind::RParen)?;
                return Ok(Operand::Wrapped(Box::new(WrappedOperand {
                    operand,
                    span: self.span_since(start),
                })));
            }
            TokenKind::Keyword(Keyword::Case) => return self.parse_case(),
            TokenKind::Keyword(Keyword::Cast) => return self.parse_cast(),
            _ => {}
        }

        if !self.at_ident() {
            return Err(self
                .error_here(format!(
                    "expected a value expression but found \"{}\"",
                    self.describe_current()
                ))
                .expecting(vec![
                    "column", "number", "string literal", "function", "(", "-", "CASE", "CAST",
                ]));
        }

        // Function call: an unquoted identifier directly followed by `(`.
        if self.peek().kind == TokenKind::Identifier
            && self.peek_at(1).is_some_and(|t| t.kind == TokenKind::LParen)
        {
            return self.parse_function_call();
        }

        let parts = self.parse_ident_chain(4)?;
        let mut column = ColumnExpr::new(Self::column_path_from_parts(parts));
        column.span = self.span_since(start);
        Ok(Operand::Column(column))
    }

    fn parse_function_call(&mut self) -> Result<Operand, ParseError> {
        let start = self.mark();
        let name_token = self.bump();
        let name = name_token.text;
        self.expect(TokenKind::LParen)?;

        if let Some(kind) = GeometryKind::from_name(&name) {
            let mut args = NodeList::named("arguments");
            if !self.at(TokenKind::RParen) {
                loop {
                    args.push(self.parse_operand()?);
                    if !self.accept(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RParen)?;

            let (min, max) = kind.arity();
            let bad_arity = args.len() < min || max.is_some_and(|max| args.len() > max);
            if bad_arity {
                let wanted = match max {
                    Some(max) if max == min => format!("{min}"),
                    Some(max) => format!("{min} to {max}"),
                    None => format!("at least {min}"),
                };
                return Err(ParseError::syntax(
                    name_token.span,
                    format!("{kind} takes {wanted} argument(s), {} given", args.len()),
                ));
            }

            let mut geometry = GeometryFunction::new(kind, args);
            geometry.span = self.span_since(start);
            return Ok(Operand::Geometry(Box::new(geometry)));
        }

        let mut call = FunctionCall::new(name, NodeList::named("arguments"));
        if call.builtin == Some(crate::ast::BuiltinFunction::Count) {
            call.distinct = self.accept_kw(Keyword::Distinct);
            if self.accept(TokenKind::Star) {
                call.star = true;
            } else {
                call.args.push(self.parse_operand()?);
            }
            self.expect(TokenKind::RParen)?;
        } else {
            if call.builtin.is_some_and(|b| b.is_aggregate()) {
                call.distinct = self.accept_kw(Keyword::Distinct);
            }
            if !self.at(TokenKind::RParen) {
                loop {
                    call.args.push(self.parse_operand()?);
                    if !self.accept(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RParen)?;
        }
        // The geometric predicates always take two regions.
        if crate::ast::is_geometry_predicate(&call.name) && call.args.len() != 2 {
            return Err(ParseError::syntax(
                name_token.span,
                format!(
                    "{} takes 2 argument(s), {} given",
                    call.name.to_ascii_uppercase(),
                    call.args.len()
                ),
            ));
        }
        call.span = self.span_since(start);
        Ok(Operand::Function(Box::new(call)))
    }

    fn parse_case(&mut self) -> Result<Operand, ParseError> {
        let start = self.mark();
        self.expect_kw(Keyword::Case)?;
        let mut branches = Vec::new();
        while self.accept_kw(Keyword::When) {
            let when = self.parse_condition_list("")?;
            self.expect_kw(Keyword::Then)?;
            let then = self.parse_operand()?;
            branches.push(CaseBranch { when, then });
        }
        if branches.is_empty() {
            return Err(self
                .error_here("CASE needs at least one WHEN branch")
                .expecting(vec!["WHEN"]));
        }
        let else_value = if self.accept_kw(Keyword::Else) {
            Some(self.parse_operand()?)
        } else {
            None
        };
        self.expect_kw(Keyword::End)?;
        Ok(Operand::Case(Box::new(CaseExpr {
            branches,
            else_value,
            span: self.span_since(start),
        })))
    }

    fn parse_cast(&mut self) -> Result<Operand, ParseError> {
        let start = self.mark();
        self.expect_kw(Keyword::Cast)?;
        self.expect(TokenKind::LParen)?;
        let operand = self.parse_operand()?;
        self.expect_kw(Keyword::As)?;
        let target = self.parse_db_type()?;
        self.expect(TokenKind::RParen)?;
        Ok(Operand::Cast(Box::new(CastExpr {
            operand,
            target,
            span: self.span_since(start),
        })))
    }

    fn parse_db_type(&mut self) -> Result<DbType, ParseError> {
        let token = self.expect(TokenKind::Identifier).map_err(|err| {
            err.expecting(vec![
                "SMALLINT", "INTEGER", "BIGINT", "REAL", "DOUBLE", "CHAR", "VARCHAR", "TIMESTAMP",
            ])
        })?;
        let kind: DbTypeKind = token.text.parse().map_err(|_| {
            ParseError::syntax(
                token.span,
                format!("\"{}\" is not a castable type", token.text),
            )
        })?;
        // `DOUBLE PRECISION` spells the double type in two words.
        if kind == DbTypeKind::Double
            && self.peek().kind == TokenKind::Identifier
            && self.peek().text.eq_ignore_ascii_case("precision")
        {
            self.bump();
        }
        let length = if matches!(
            kind,
            DbTypeKind::Char | DbTypeKind::Varchar | DbTypeKind::Binary | DbTypeKind::Varbinary
        ) && self.accept(TokenKind::LParen)
        {
            let len = self.parse_unsigned("a type length")?;
            self.expect(TokenKind::RParen)?;
            Some(len.min(u32::MAX as u64) as u32)
        } else {
            None
        };
        Ok(DbType { kind, length })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::errors::ParseErrorKind;
    use crate::render::ToAdql;

    fn parse_ok(text: &str) -> QueryExpr {
        match parse(text) {
            Ok(query) => query,
            Err(err) => panic!("failed to parse {text:?}: {err}"),
        }
    }

    fn select_query(query: &QueryExpr) -> &Query {
        match query {
            QueryExpr::Select(q) => q,
            QueryExpr::Set(_) => panic!("expected a plain SELECT"),
        }
    }

    #[test]
    fn test_cone_search_query_shape() {
        let query = parse_ok(
            "SELECT TOP 10 ra, dec FROM cat.sources \
             WHERE CONTAINS(POINT('ICRS', ra, dec), CIRCLE('ICRS', 10.0, 20.0, 0.5)) = 1 \
             ORDER BY 1 DESC OFFSET 5",
        );
        let q = select_query(&query);

        assert_eq!(q.select.top, Some(10));
        assert_eq!(q.select.items.len(), 2);
        assert!(matches!(
            q.select.items.get(0),
            Some(SelectItem::Expr(SelectExpr { operand: Operand::Column(c), .. }))
                if c.path.column == "ra"
        ));

        let FromItem::Table(table) = &q.from.root else {
            panic!("expected a plain table reference");
        };
        assert_eq!(table.path.schema.as_deref(), Some("cat"));
        assert_eq!(table.path.table.as_str(), "sources");

        let where_clause = q.where_clause.as_ref().expect("WHERE parsed");
        assert_eq!(where_clause.len(), 1);
        let Some(Constraint::Comparison(cmp)) = where_clause.get(0) else {
            panic!("expected a comparison");
        };
        assert_eq!(cmp.op, ComparisonOp::Eq);
        // The predicate is a plain function call over geometry arguments.
        let Operand::Function(contains) = &cmp.left else {
            panic!("expected CONTAINS on the left");
        };
        assert!(contains.name.eq_ignore_ascii_case("CONTAINS"));
        assert!(!contains.udf);
        assert_eq!(contains.args.len(), 2);
        assert!(matches!(
            contains.args.get(0),
            Some(Operand::Geometry(g)) if g.kind == GeometryKind::Point
        ));
        assert!(matches!(
            contains.args.get(1),
            Some(Operand::Geometry(g)) if g.kind == GeometryKind::Circle
        ));
        assert!(matches!(&cmp.right, Operand::Number(n) if n.text == "1"));

        let order = q.order_by.as_ref().expect("ORDER BY parsed");
        assert_eq!(order.len(), 1);
        let item = order.get(0).unwrap();
        assert_eq!(item.target, OrderTarget::Index(1));
        assert!(item.descending);
        assert_eq!(q.offset, Some(5));
    }

    #[test]
    fn test_spans_cover_nodes() {
        let query = parse_ok("SELECT ra\nFROM sources");
        let q = select_query(&query);
        let span = q.span.expect("query span recorded");
        assert_eq!((span.begin_line, span.begin_col), (1, 1));
        assert_eq!((span.end_line, span.end_col), (2, 12));
    }

    #[test]
    fn test_case_mask_from_quoting() {
        let query = parse_ok("SELECT s.\"RaJ2000\" FROM \"Cat\".sources AS s");
        let q = select_query(&query);
        let Some(SelectItem::Expr(SelectExpr { operand: Operand::Column(col), .. })) =
            q.select.items.get(0)
        else {
            panic!("expected a column item");
        };
        assert!(col.path.case.is_sensitive(IdentPart::Column));
        assert!(!col.path.case.is_sensitive(IdentPart::Table));

        let FromItem::Table(table) = &q.from.root else {
            panic!("expected a table");
        };
        assert!(table.path.case.is_sensitive(IdentPart::Schema));
        assert!(!table.path.case.is_sensitive(IdentPart::Table));
        assert_eq!(table.alias.as_deref(), Some("s"));
    }

    #[test]
    fn test_join_tree() {
        let query = parse_ok(
            "SELECT * FROM a JOIN b ON a.id = b.id LEFT OUTER JOIN c USING (id), d",
        );
        let q = select_query(&query);
        // Comma binds last: CROSS JOIN of (a JOIN b LEFT JOIN c) with d.
        let FromItem::Join(cross) = &q.from.root else {
            panic!("expected the comma join at the root");
        };
        assert_eq!(cross.kind, JoinKind::Cross);
        let FromItem::Join(left_join) = &cross.left else {
            panic!("expected the LEFT JOIN under the comma");
        };
        assert_eq!(left_join.kind, JoinKind::Left);
        assert!(matches!(&left_join.condition, JoinCondition::Using(cols) if cols.len() == 1));
        let FromItem::Join(inner) = &left_join.left else {
            panic!("expected the INNER JOIN at the bottom");
        };
        assert_eq!(inner.kind, JoinKind::Inner);
        assert!(matches!(&inner.condition, JoinCondition::On(_)));
    }

    #[test]
    fn test_set_operations_are_left_associative() {
        let query = parse_ok("SELECT a FROM t UNION SELECT a FROM u EXCEPT SELECT a FROM v");
        let QueryExpr::Set(outer) = &query else {
            panic!("expected a set operation");
        };
        assert_eq!(outer.op, SetOp::Except);
        assert!(matches!(&outer.left, QueryExpr::Set(inner) if inner.op == SetOp::Union));
    }

    #[test]
    fn test_intersect_binds_tighter_than_union() {
        let query = parse_ok("SELECT a FROM t UNION SELECT a FROM u INTERSECT SELECT a FROM v");
        let QueryExpr::Set(outer) = &query else {
            panic!("expected a set operation");
        };
        assert_eq!(outer.op, SetOp::Union);
        assert!(matches!(&outer.right, QueryExpr::Set(inner) if inner.op == SetOp::Intersect));
    }

    #[test]
    fn test_with_clause() {
        let query = parse_ok("WITH bright AS (SELECT ra FROM sources) SELECT ra FROM bright");
        let q = select_query(&query);
        assert_eq!(q.with.len(), 1);
        assert_eq!(q.with.get(0).unwrap().name.as_str(), "bright");
    }

    #[test]
    fn test_where_separators_are_kept_per_item() {
        let query = parse_ok("SELECT a FROM t WHERE a = 1 OR b = 2 AND c = 3");
        let q = select_query(&query);
        let clause = q.where_clause.as_ref().unwrap();
        assert_eq!(clause.len(), 3);
        assert_eq!(clause.sep_before(1), Some(LogicalSep::Or));
        assert_eq!(clause.sep_before(2), Some(LogicalSep::And));
    }

    #[test]
    fn test_arithmetic_precedence() {
        let query = parse_ok("SELECT 1 + 2 * 3 FROM t");
        let q = select_query(&query);
        let Some(SelectItem::Expr(SelectExpr { operand: Operand::Binary(add), .. })) =
            q.select.items.get(0)
        else {
            panic!("expected an addition at the top");
        };
        assert_eq!(add.op, ArithOp::Add);
        assert!(matches!(&add.right, Operand::Binary(mul) if mul.op == ArithOp::Mul));
    }

    #[test]
    fn test_count_star_and_distinct() {
        let query = parse_ok("SELECT COUNT(*), COUNT(DISTINCT band) FROM t");
        let q = select_query(&query);
        let Some(SelectItem::Expr(SelectExpr { operand: Operand::Function(star), .. })) =
            q.select.items.get(0)
        else {
            panic!("expected COUNT(*)");
        };
        assert!(star.star);
        let Some(SelectItem::Expr(SelectExpr { operand: Operand::Function(distinct), .. })) =
            q.select.items.get(1)
        else {
            panic!("expected COUNT(DISTINCT …)");
        };
        assert!(distinct.distinct);
        assert_eq!(distinct.args.len(), 1);
    }

    #[test]
    fn test_table_star_select_item() {
        let query = parse_ok("SELECT s.*, 1 FROM sources AS s");
        let q = select_query(&query);
        assert!(matches!(
            q.select.items.get(0),
            Some(SelectItem::AllColumns(all))
                if all.table.as_ref().map(|t| t.table.as_str()) == Some("s")
        ));
    }

    #[test]
    fn test_geometry_arity_is_checked_at_parse() {
        let err = parse("SELECT POINT('ICRS', ra, dec, 4) FROM t").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::SyntaxError);
        assert!(err.message.contains("POINT"), "{}", err.message);

        let err = parse("SELECT a FROM t WHERE CONTAINS(POINT('ICRS', 1, 2)) = 1").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::SyntaxError);
        assert!(err.message.contains("CONTAINS"), "{}", err.message);
    }

    #[test]
    fn test_parenthesized_constraint_vs_operand() {
        // A group …
        let query = parse_ok("SELECT a FROM t WHERE (a = 1 OR b = 2) AND c = 3");
        let q = select_query(&query);
        let clause = q.where_clause.as_ref().unwrap();
        assert!(matches!(clause.get(0), Some(Constraint::Group(_))));

        // … and a parenthesized operand.
        let query = parse_ok("SELECT a FROM t WHERE (a + b) > 2");
        let q = select_query(&query);
        let clause = q.where_clause.as_ref().unwrap();
        let Some(Constraint::Comparison(cmp)) = clause.get(0) else {
            panic!("expected a comparison");
        };
        assert!(matches!(&cmp.left, Operand::Wrapped(_)));
    }

    #[test]
    fn test_not_and_quantified_predicates() {
        let query = parse_ok(
            "SELECT a FROM t WHERE NOT a LIKE '%x%' AND b NOT IN (1, 2) \
             AND c NOT BETWEEN 0 AND 9 AND d IS NOT NULL",
        );
        let q = select_query(&query);
        let clause = q.where_clause.as_ref().unwrap();
        assert!(matches!(clause.get(0), Some(Constraint::Not(_))));
        assert!(matches!(clause.get(1), Some(Constraint::In(c)) if c.negated));
        assert!(matches!(clause.get(2), Some(Constraint::Between(c)) if c.negated));
        assert!(matches!(clause.get(3), Some(Constraint::IsNull(c)) if c.negated));
    }

    #[test]
    fn test_exists_and_in_subquery() {
        let query = parse_ok(
            "SELECT a FROM t WHERE EXISTS(SELECT b FROM u) AND a IN (SELECT b FROM u)",
        );
        let q = select_query(&query);
        let clause = q.where_clause.as_ref().unwrap();
        assert!(matches!(clause.get(0), Some(Constraint::Exists(_))));
        assert!(matches!(
            clause.get(1),
            Some(Constraint::In(c)) if matches!(c.list, InList::Query(_))
        ));
    }

    #[test]
    fn test_errors_carry_expected_tokens() {
        let err = parse("SELECT a FROM t WHERE a !").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::LexError);

        let err = parse("SELECT a FROM t JOIN u").unwrap_err();
        assert!(err.expected.contains(&"ON"));
        assert!(err.expected.contains(&"USING"));

        let err = parse("SELECT TOP x a FROM t").unwrap_err();
        assert!(err.expected.contains(&"number"));
    }

    #[test]
    fn test_subquery_in_from_requires_alias() {
        let err = parse("SELECT a FROM (SELECT a FROM t)").unwrap_err();
        assert!(err.message.contains("alias"), "{}", err.message);
    }

    #[test]
    fn test_order_by_zero_is_rejected() {
        let err = parse("SELECT a FROM t ORDER BY 0").unwrap_err();
        assert!(err.message.contains("1-based"), "{}", err.message);
    }

    #[test]
    fn test_top_on_set_operation_is_rejected() {
        // TOP belongs to a SELECT clause only; a limit on the whole set
        // operation has no grammar slot.
        assert!(parse("SELECT a FROM t UNION TOP 3 SELECT a FROM u").is_err());
    }

    #[test]
    fn test_parse_all_recovers_at_statement_boundaries() {
        let parsed = parse_all("SELECT a FROM t; SELECT FROM oops; SELECT b FROM u");
        assert_eq!(parsed.len(), 3);
        assert!(parsed[0].is_ok());
        assert!(parsed[1].is_err());
        assert!(parsed[2].is_ok());
    }

    #[test]
    fn test_render_is_stable_over_reparse() {
        let queries = [
            "SELECT TOP 10 ra, dec FROM cat.sources WHERE CONTAINS(POINT('ICRS', ra, dec), \
             CIRCLE('ICRS', 10.0, 20.0, 0.5)) = 1 ORDER BY 1 DESC OFFSET 5",
            "SELECT DISTINCT \"RaJ2000\" AS ra FROM \"Cat\".sources AS s",
            "SELECT a FROM t WHERE a = 1 OR b = 2 AND NOT c LIKE '%x''y%'",
            "SELECT COUNT(*), AVG(mag) FROM t GROUP BY band HAVING COUNT(*) > 10",
            "WITH bright AS (SELECT ra FROM sources) SELECT ra FROM bright",
            "SELECT a FROM t UNION ALL SELECT a FROM u INTERSECT SELECT a FROM v",
            "SELECT a + 2 * b, -c, x || '-' || y FROM t",
            "SELECT CASE WHEN a > 0 THEN 'pos' ELSE 'neg' END FROM t",
            "SELECT CAST(flux AS DOUBLE) FROM t",
            "SELECT s.* FROM sources AS s JOIN bands AS b ON s.band = b.id",
            "SELECT a FROM (SELECT a FROM t) AS sub",
            "SELECT a FROM t WHERE EXISTS(SELECT b FROM u WHERE u.b = t.a)",
        ];
        for text in queries {
            let first = parse_ok(text).to_adql();
            let second = parse_ok(&first).to_adql();
            assert_eq!(first, second, "render not stable for {text:?}");
        }
    }
}
