use strum_macros::{AsRefStr, Display};

use super::list::NodeList;
use super::operand::Operand;
use super::query::QueryExpr;
use super::AdqlNode;
use crate::feature::LanguageFeature;
use crate::span::Span;

/// A boolean condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Comparison(Box<Comparison>),
    Between(Box<Between>),
    In(Box<InConstraint>),
    IsNull(Box<IsNull>),
    Like(Box<Like>),
    Exists(Box<Exists>),
    /// A parenthesized group of constraints.
    Group(Box<ConstraintClause>),
    Not(Box<NotConstraint>),
}

impl AdqlNode for Constraint {
    fn feature(&self) -> LanguageFeature {
        match self {
            Constraint::Comparison(_) => LanguageFeature::core("comparison"),
            Constraint::Between(_) => LanguageFeature::core("BETWEEN"),
            Constraint::In(_) => LanguageFeature::core("IN"),
            Constraint::IsNull(_) => LanguageFeature::core("IS NULL"),
            Constraint::Like(_) => LanguageFeature::core("LIKE"),
            Constraint::Exists(_) => LanguageFeature::core("EXISTS"),
            Constraint::Group(_) => LanguageFeature::core("constraint group"),
            Constraint::Not(_) => LanguageFeature::core("NOT"),
        }
    }

    fn span(&self) -> Option<Span> {
        match self {
            Constraint::Comparison(n) => n.span,
            Constraint::Between(n) => n.span,
            Constraint::In(n) => n.span,
            Constraint::IsNull(n) => n.span,
            Constraint::Like(n) => n.span,
            Constraint::Exists(n) => n.span,
            Constraint::Group(n) => n.span(),
            Constraint::Not(n) => n.span,
        }
    }

    fn clear_span(&mut self) {
        match self {
            Constraint::Comparison(n) => n.span = None,
            Constraint::Between(n) => n.span = None,
            Constraint::In(n) => n.span = None,
            Constraint::IsNull(n) => n.span = None,
            Constraint::Like(n) => n.span = None,
            Constraint::Exists(n) => n.span = None,
            Constraint::Group(n) => n.clear_span(),
            Constraint::Not(n) => n.span = None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum ComparisonOp {
    #[strum(serialize = "=")]
    Eq,
    #[strum(serialize = "<>")]
    NotEq,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessEq,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterEq,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub left: Operand,
    pub op: ComparisonOp,
    pub right: Operand,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Between {
    pub operand: Operand,
    pub low: Operand,
    pub high: Operand,
    pub negated: bool,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InList {
    Values(NodeList<Operand>),
    Query(QueryExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InConstraint {
    pub operand: Operand,
    pub list: InList,
    pub negated: bool,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IsNull {
    pub operand: Operand,
    pub negated: bool,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Like {
    pub operand: Operand,
    pub pattern: Operand,
    pub negated: bool,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exists {
    pub query: QueryExpr,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotConstraint {
    pub constraint: Constraint,
    pub span: Option<Span>,
}

/// The separator written between two adjacent constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum LogicalSep {
    And,
    Or,
}

/// `WHERE`/`HAVING` (and parenthesized groups): an ordered constraint list
/// where each adjacent pair is joined by its own `AND`/`OR`.
///
/// The separator list always holds exactly `len() - 1` entries; the
/// separator at position `i - 1` joins items `i - 1` and `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintClause {
    name: &'static str,
    items: Vec<Constraint>,
    seps: Vec<LogicalSep>,
    default_sep: LogicalSep,
    span: Option<Span>,
}

impl ConstraintClause {
    pub fn new(name: &'static str) -> Self {
        ConstraintClause {
            name,
            items: Vec::new(),
            seps: Vec::new(),
            default_sep: LogicalSep::And,
            span: None,
        }
    }

    pub fn with_default_sep(mut self, sep: LogicalSep) -> Self {
        self.default_sep = sep;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Constraint> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Constraint> {
        self.items.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Constraint> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Constraint> {
        self.items.iter_mut()
    }

    /// Append with the clause's default separator.
    pub fn push(&mut self, constraint: Constraint) {
        let sep = self.default_sep;
        self.push_with(sep, constraint);
    }

    /// Append, naming the separator joining the new item to its
    /// predecessor. The separator is ignored for the first item.
    pub fn push_with(&mut self, sep: LogicalSep, constraint: Constraint) {
        if !self.items.is_empty() {
            self.seps.push(sep);
        }
        self.items.push(constraint);
        self.span = None;
    }

    /// The separator written before item `index` (`index >= 1`).
    pub fn sep_before(&self, index: usize) -> Option<LogicalSep> {
        if index == 0 {
            None
        } else {
            self.seps.get(index - 1).copied()
        }
    }

    pub fn set_sep_before(&mut self, index: usize, sep: LogicalSep) {
        self.seps[index - 1] = sep;
        self.span = None;
    }

    pub fn set(&mut self, index: usize, constraint: Constraint) -> Constraint {
        self.span = None;
        std::mem::replace(&mut self.items[index], constraint)
    }

    pub fn remove(&mut self, index: usize) -> Constraint {
        let removed = self.items.remove(index);
        if !self.seps.is_empty() {
            // Removing an item also removes the separator that joined it.
            if index == 0 {
                self.seps.remove(0);
            } else {
                self.seps.remove(index - 1);
            }
        }
        self.span = None;
        removed
    }

    pub fn span(&self) -> Option<Span> {
        self.span
    }

    pub fn set_span(&mut self, span: Option<Span>) {
        self.span = span;
    }

    pub fn clear_span(&mut self) {
        self.span = None;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ast::operand::{NumericLiteral, Operand};

    fn number(n: &str) -> Constraint {
        Constraint::Comparison(Box::new(Comparison {
            left: Operand::Number(NumericLiteral::new(n)),
            op: ComparisonOp::Eq,
            right: Operand::Number(NumericLiteral::new("1")),
            span: None,
        }))
    }

    #[test]
    fn test_separator_bookkeeping() {
        let mut clause = ConstraintClause::new("WHERE");
        clause.push(number("1"));
        clause.push_with(LogicalSep::Or, number("2"));
        clause.push_with(LogicalSep::And, number("3"));

        assert_eq!(clause.len(), 3);
        assert_eq!(clause.sep_before(0), None);
        assert_eq!(clause.sep_before(1), Some(LogicalSep::Or));
        assert_eq!(clause.sep_before(2), Some(LogicalSep::And));
    }

    #[test]
    fn test_remove_keeps_separator_invariant() {
        let mut clause = ConstraintClause::new("WHERE");
        clause.push(number("1"));
        clause.push_with(LogicalSep::Or, number("2"));
        clause.push_with(LogicalSep::And, number("3"));

        clause.remove(0);
        assert_eq!(clause.len(), 2);
        assert_eq!(clause.sep_before(1), Some(LogicalSep::And));

        clause.remove(1);
        assert_eq!(clause.len(), 1);
        assert_eq!(clause.sep_before(0), None);
    }

    #[test]
    fn test_mutation_drops_span() {
        let mut clause = ConstraintClause::new("HAVING");
        clause.push(number("1"));
        clause.set_span(Some(crate::span::Span::new(1, 1, 1, 20)));
        clause.set(0, number("2"));
        assert_eq!(clause.span(), None);
    }
}
