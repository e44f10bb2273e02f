//! The query syntax tree.
//!
//! Each syntactic category is a sum type (`Operand`, `Constraint`,
//! `FromItem`, `QueryExpr`) whose variants own their children. All nodes
//! implement [`AdqlNode`]: a feature descriptor for the service allow-list,
//! a cached source [`Span`], and deep copy via `Clone`. Ordered clauses are
//! [`NodeList`]s with a replace/remove cursor; tree-wide traversal and
//! in-place replacement live in [`search`](crate::ast::search).

pub mod constraint;
pub mod from;
pub mod list;
pub mod operand;
pub mod query;
pub mod search;

use smol_str::SmolStr;

pub use self::constraint::{
    Between, Comparison, ComparisonOp, Constraint, ConstraintClause, Exists, InConstraint, InList,
    IsNull, Like, LogicalSep, NotConstraint,
};
pub use self::from::{FromClause, FromItem, JoinCondition, JoinKind, JoinedTable, SubQueryRef, TableRef};
pub use self::list::{ListCursor, NodeList};
pub use self::operand::{
    ArithOp, BinaryExpr, BuiltinFunction, CaseBranch, CaseExpr, CastExpr, ColumnBinding,
    ColumnExpr, Concatenation, FunctionCall, GeometryFunction, GeometryKind, NegationExpr,
    NumericLiteral, Operand, StringLiteral, WrappedOperand, is_geometry_predicate,
};
pub use self::query::{
    OrderItem, OrderTarget, Query, QueryExpr, SelectAll, SelectClause, SelectExpr, SelectItem,
    SetOp, SetOperation, WithItem,
};

use crate::feature::LanguageFeature;
use crate::span::Span;

/// One part of a (possibly qualified) identifier, for case-sensitivity
/// bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentPart {
    Column,
    Table,
    Schema,
    Catalog,
    Alias,
}

impl IdentPart {
    fn bit(self) -> u8 {
        match self {
            IdentPart::Column => 1,
            IdentPart::Table => 1 << 1,
            IdentPart::Schema => 1 << 2,
            IdentPart::Catalog => 1 << 3,
            IdentPart::Alias => 1 << 4,
        }
    }
}

/// Per-part case sensitivity of an identifier reference.
///
/// A set bit records that the part was written between double quotes and
/// must be compared verbatim; a clear bit means the part is folded before
/// comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CaseMask(u8);

impl CaseMask {
    pub fn new() -> Self {
        CaseMask(0)
    }

    pub fn with(mut self, part: IdentPart, sensitive: bool) -> Self {
        self.set(part, sensitive);
        self
    }

    pub fn set(&mut self, part: IdentPart, sensitive: bool) {
        if sensitive {
            self.0 |= part.bit();
        } else {
            self.0 &= !part.bit();
        }
    }

    pub fn is_sensitive(self, part: IdentPart) -> bool {
        self.0 & part.bit() != 0
    }
}

/// Compare a reference part against a declared name under the case rule
/// recorded for that part.
pub fn ident_matches(reference: &str, declared: &str, sensitive: bool) -> bool {
    if sensitive {
        reference == declared
    } else {
        reference.eq_ignore_ascii_case(declared)
    }
}

/// A possibly-qualified column reference as written in the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPath {
    pub catalog: Option<SmolStr>,
    pub schema: Option<SmolStr>,
    pub table: Option<SmolStr>,
    pub column: SmolStr,
    pub case: CaseMask,
}

impl ColumnPath {
    pub fn bare(column: impl Into<SmolStr>) -> Self {
        ColumnPath {
            catalog: None,
            schema: None,
            table: None,
            column: column.into(),
            case: CaseMask::new(),
        }
    }

    /// The reference as written, dot-joined, without delimiters.
    pub fn qualified_name(&self) -> String {
        let mut out = String::new();
        for part in [&self.catalog, &self.schema, &self.table] {
            if let Some(part) = part {
                out.push_str(part);
                out.push('.');
            }
        }
        out.push_str(&self.column);
        out
    }
}

/// A possibly-qualified table reference as written in the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePath {
    pub catalog: Option<SmolStr>,
    pub schema: Option<SmolStr>,
    pub table: SmolStr,
    pub case: CaseMask,
}

impl TablePath {
    pub fn bare(table: impl Into<SmolStr>) -> Self {
        TablePath {
            catalog: None,
            schema: None,
            table: table.into(),
            case: CaseMask::new(),
        }
    }

    pub fn qualified_name(&self) -> String {
        let mut out = String::new();
        for part in [&self.catalog, &self.schema] {
            if let Some(part) = part {
                out.push_str(part);
                out.push('.');
            }
        }
        out.push_str(&self.table);
        out
    }
}

/// Behavior common to every node of the tree.
pub trait AdqlNode {
    /// The descriptor checked against the service's declared feature bags.
    fn feature(&self) -> LanguageFeature;

    /// The region of the original text this node was parsed from, if the
    /// node has not been mutated since parsing.
    fn span(&self) -> Option<Span>;

    /// Drop the cached source position. Called on every structural
    /// mutation, on the node and each of its ancestors.
    fn clear_span(&mut self);
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_case_mask_bits_are_independent() {
        let mut mask = CaseMask::new();
        mask.set(IdentPart::Column, true);
        mask.set(IdentPart::Schema, true);
        assert!(mask.is_sensitive(IdentPart::Column));
        assert!(mask.is_sensitive(IdentPart::Schema));
        assert!(!mask.is_sensitive(IdentPart::Table));
        mask.set(IdentPart::Column, false);
        assert!(!mask.is_sensitive(IdentPart::Column));
        assert!(mask.is_sensitive(IdentPart::Schema));
    }

    #[test]
    fn test_ident_matching_follows_the_mask() {
        assert!(ident_matches("Ra", "RA", false));
        assert!(!ident_matches("Ra", "RA", true));
        assert!(ident_matches("RA", "RA", true));
    }

    #[test]
    fn test_qualified_names() {
        let mut path = ColumnPath::bare("dec");
        path.schema = Some("cat".into());
        path.table = Some("sources".into());
        assert_eq!(path.qualified_name(), "cat.sources.dec");
    }
}
