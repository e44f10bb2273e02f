use smol_str::SmolStr;
use strum_macros::{AsRefStr, Display};

use super::constraint::ConstraintClause;
use super::list::NodeList;
use super::operand::ColumnExpr;
use super::query::QueryExpr;
use super::{AdqlNode, TablePath};
use crate::catalog::TableId;
use crate::feature::LanguageFeature;
use crate::span::Span;

/// The content of a `FROM` clause: a single table, a join tree, or a
/// parenthesized sub-query.
#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    Table(TableRef),
    Join(Box<JoinedTable>),
    SubQuery(Box<SubQueryRef>),
}

impl AdqlNode for FromItem {
    fn feature(&self) -> LanguageFeature {
        match self {
            FromItem::Table(_) => LanguageFeature::core("table reference"),
            FromItem::Join(_) => LanguageFeature::core("join"),
            FromItem::SubQuery(_) => LanguageFeature::core("derived table"),
        }
    }

    fn span(&self) -> Option<Span> {
        match self {
            FromItem::Table(n) => n.span,
            FromItem::Join(n) => n.span,
            FromItem::SubQuery(n) => n.span,
        }
    }

    fn clear_span(&mut self) {
        match self {
            FromItem::Table(n) => n.span = None,
            FromItem::Join(n) => n.span = None,
            FromItem::SubQuery(n) => n.span = None,
        }
    }
}

/// A base-table reference, optionally aliased.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub path: TablePath,
    pub alias: Option<SmolStr>,
    /// Filled in by the checker.
    pub binding: Option<TableId>,
    pub span: Option<Span>,
}

impl TableRef {
    pub fn new(path: TablePath) -> Self {
        TableRef {
            path,
            alias: None,
            binding: None,
            span: None,
        }
    }

    /// The name by which columns may qualify this table: the alias when
    /// present, the table part of the path otherwise.
    pub fn reference_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.path.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum JoinKind {
    #[strum(serialize = "INNER JOIN")]
    Inner,
    #[strum(serialize = "LEFT OUTER JOIN")]
    Left,
    #[strum(serialize = "RIGHT OUTER JOIN")]
    Right,
    #[strum(serialize = "FULL OUTER JOIN")]
    Full,
    #[strum(serialize = "CROSS JOIN")]
    Cross,
    #[strum(serialize = "NATURAL JOIN")]
    Natural,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinCondition {
    None,
    On(ConstraintClause),
    Using(NodeList<ColumnExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinedTable {
    pub left: FromItem,
    pub right: FromItem,
    pub kind: JoinKind,
    pub condition: JoinCondition,
    pub span: Option<Span>,
}

/// A sub-query in `FROM` position. The alias is mandatory.
#[derive(Debug, Clone, PartialEq)]
pub struct SubQueryRef {
    pub query: QueryExpr,
    pub alias: SmolStr,
    pub alias_sensitive: bool,
    pub span: Option<Span>,
}

/// The `FROM` clause. Always holds exactly one (possibly joined) root
/// item; the clause itself is required and cannot be removed from a query.
#[derive(Debug, Clone, PartialEq)]
pub struct FromClause {
    pub root: FromItem,
    pub span: Option<Span>,
}

impl FromClause {
    pub fn new(root: FromItem) -> Self {
        FromClause { root, span: None }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_reference_name_prefers_alias() {
        let mut table = TableRef::new(TablePath::bare("sources"));
        assert_eq!(table.reference_name(), "sources");
        table.alias = Some("s".into());
        assert_eq!(table.reference_name(), "s");
    }

    #[test]
    fn test_join_kind_rendering() {
        assert_eq!(JoinKind::Left.to_string(), "LEFT OUTER JOIN");
        assert_eq!(JoinKind::Natural.to_string(), "NATURAL JOIN");
    }
}
