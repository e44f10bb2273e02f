use smol_str::SmolStr;
use strum_macros::{AsRefStr, Display};

use super::constraint::ConstraintClause;
use super::from::FromClause;
use super::list::NodeList;
use super::operand::Operand;
use super::{AdqlNode, TablePath};
use crate::catalog::TableId;
use crate::feature::{FeatureCategory, LanguageFeature};
use crate::span::Span;

/// A full query: either a plain `SELECT` or a set operation over two
/// sub-queries.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpr {
    Select(Box<Query>),
    Set(Box<SetOperation>),
}

impl QueryExpr {
    /// The `WITH` list of the root, shared by both forms.
    pub fn with_items(&self) -> &NodeList<WithItem> {
        match self {
            QueryExpr::Select(q) => &q.with,
            QueryExpr::Set(s) => &s.with,
        }
    }

    pub fn order_by(&self) -> Option<&NodeList<OrderItem>> {
        match self {
            QueryExpr::Select(q) => q.order_by.as_ref(),
            QueryExpr::Set(s) => s.order_by.as_ref(),
        }
    }

    pub fn offset(&self) -> Option<u64> {
        match self {
            QueryExpr::Select(q) => q.offset,
            QueryExpr::Set(s) => s.offset,
        }
    }
}

impl AdqlNode for QueryExpr {
    fn feature(&self) -> LanguageFeature {
        match self {
            QueryExpr::Select(_) => LanguageFeature::core("query"),
            QueryExpr::Set(s) => {
                LanguageFeature::optional(FeatureCategory::SetOperation, s.op.to_string())
            }
        }
    }

    fn span(&self) -> Option<Span> {
        match self {
            QueryExpr::Select(q) => q.span,
            QueryExpr::Set(s) => s.span,
        }
    }

    fn clear_span(&mut self) {
        match self {
            QueryExpr::Select(q) => q.span = None,
            QueryExpr::Set(s) => s.span = None,
        }
    }
}

/// `SELECT … FROM … [WHERE …] [GROUP BY …] [HAVING …] [ORDER BY …]
/// [OFFSET …]`.
///
/// The select and from clauses are required slots; the rest are optional.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub with: NodeList<WithItem>,
    pub select: SelectClause,
    pub from: FromClause,
    pub where_clause: Option<ConstraintClause>,
    pub group_by: Option<NodeList<Operand>>,
    pub having: Option<ConstraintClause>,
    pub order_by: Option<NodeList<OrderItem>>,
    pub offset: Option<u64>,
    pub span: Option<Span>,
}

impl Query {
    pub fn new(select: SelectClause, from: FromClause) -> Self {
        Query {
            with: NodeList::named("WITH"),
            select,
            from,
            where_clause: None,
            group_by: None,
            having: None,
            order_by: None,
            offset: None,
            span: None,
        }
    }
}

impl AdqlNode for Query {
    fn feature(&self) -> LanguageFeature {
        LanguageFeature::core("query")
    }

    fn span(&self) -> Option<Span> {
        self.span
    }

    fn clear_span(&mut self) {
        self.span = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum SetOp {
    Union,
    Intersect,
    Except,
}

/// `left UNION|INTERSECT|EXCEPT [ALL] right`, with an optional outer
/// `ORDER BY`/`OFFSET`. Both operands are required slots.
#[derive(Debug, Clone, PartialEq)]
pub struct SetOperation {
    pub with: NodeList<WithItem>,
    pub op: SetOp,
    pub all: bool,
    pub left: QueryExpr,
    pub right: QueryExpr,
    pub order_by: Option<NodeList<OrderItem>>,
    pub offset: Option<u64>,
    pub span: Option<Span>,
}

impl AdqlNode for SetOperation {
    fn feature(&self) -> LanguageFeature {
        LanguageFeature::optional(FeatureCategory::SetOperation, self.op.to_string())
    }

    fn span(&self) -> Option<Span> {
        self.span
    }

    fn clear_span(&mut self) {
        self.span = None;
    }
}

/// One named sub-query of a `WITH` list.
#[derive(Debug, Clone, PartialEq)]
pub struct WithItem {
    pub name: SmolStr,
    pub name_sensitive: bool,
    pub query: QueryExpr,
    pub span: Option<Span>,
}

impl AdqlNode for WithItem {
    fn feature(&self) -> LanguageFeature {
        LanguageFeature::optional(FeatureCategory::CommonTableExpr, "WITH")
    }

    fn span(&self) -> Option<Span> {
        self.span
    }

    fn clear_span(&mut self) {
        self.span = None;
    }
}

/// The `SELECT` clause: item list plus the `DISTINCT` and `TOP n`
/// modifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectClause {
    pub distinct: bool,
    pub top: Option<u64>,
    pub items: NodeList<SelectItem>,
    pub span: Option<Span>,
}

impl SelectClause {
    pub fn new() -> Self {
        SelectClause {
            distinct: false,
            top: None,
            items: NodeList::named("SELECT"),
            span: None,
        }
    }
}

impl Default for SelectClause {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Expr(SelectExpr),
    /// `*` or `table.*`.
    AllColumns(SelectAll),
}

impl AdqlNode for SelectItem {
    fn feature(&self) -> LanguageFeature {
        LanguageFeature::core("select item")
    }

    fn span(&self) -> Option<Span> {
        match self {
            SelectItem::Expr(n) => n.span,
            SelectItem::AllColumns(n) => n.span,
        }
    }

    fn clear_span(&mut self) {
        match self {
            SelectItem::Expr(n) => n.span = None,
            SelectItem::AllColumns(n) => n.span = None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectExpr {
    pub operand: Operand,
    pub alias: Option<SmolStr>,
    pub alias_sensitive: bool,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectAll {
    /// `None` for a bare `*`; the qualifying table for `t.*`.
    pub table: Option<TablePath>,
    /// Filled in by the checker when the qualifier names a base table.
    pub binding: Option<TableId>,
    pub span: Option<Span>,
}

/// One `ORDER BY` key with its direction.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub target: OrderTarget,
    pub descending: bool,
    pub span: Option<Span>,
}

impl AdqlNode for OrderItem {
    fn feature(&self) -> LanguageFeature {
        LanguageFeature::core("sort key")
    }

    fn span(&self) -> Option<Span> {
        self.span
    }

    fn clear_span(&mut self) {
        self.span = None;
    }
}

/// What an `ORDER BY` key designates: a 1-based select-list position or a
/// column/alias name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderTarget {
    Index(u32),
    Name { name: SmolStr, sensitive: bool },
}
