use std::str::FromStr;

use smol_str::SmolStr;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use super::list::NodeList;
use super::{AdqlNode, ColumnPath};
use crate::catalog::{ColumnId, DbType, DbTypeKind};
use crate::feature::{FeatureCategory, LanguageFeature};
use crate::span::Span;

/// A value expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(ColumnExpr),
    Number(NumericLiteral),
    Str(StringLiteral),
    Binary(Box<BinaryExpr>),
    Concat(Concatenation),
    Negation(Box<NegationExpr>),
    Function(Box<FunctionCall>),
    Geometry(Box<GeometryFunction>),
    Case(Box<CaseExpr>),
    Cast(Box<CastExpr>),
    Wrapped(Box<WrappedOperand>),
}

impl AdqlNode for Operand {
    fn feature(&self) -> LanguageFeature {
        match self {
            Operand::Column(_) => LanguageFeature::core("column reference"),
            Operand::Number(_) => LanguageFeature::core("numeric literal"),
            Operand::Str(_) => LanguageFeature::core("string literal"),
            Operand::Binary(_) => LanguageFeature::core("arithmetic"),
            Operand::Concat(_) => LanguageFeature::core("concatenation"),
            Operand::Negation(_) => LanguageFeature::core("negation"),
            Operand::Function(f) => f.feature(),
            Operand::Geometry(g) => g.feature(),
            Operand::Case(_) => {
                LanguageFeature::optional(FeatureCategory::ConditionalExpr, "CASE")
            }
            Operand::Cast(_) => LanguageFeature::optional(FeatureCategory::Cast, "CAST"),
            Operand::Wrapped(_) => LanguageFeature::core("parenthesized expression"),
        }
    }

    fn span(&self) -> Option<Span> {
        match self {
            Operand::Column(n) => n.span,
            Operand::Number(n) => n.span,
            Operand::Str(n) => n.span,
            Operand::Binary(n) => n.span,
            Operand::Concat(n) => n.items.span(),
            Operand::Negation(n) => n.span,
            Operand::Function(n) => n.span,
            Operand::Geometry(n) => n.span,
            Operand::Case(n) => n.span,
            Operand::Cast(n) => n.span,
            Operand::Wrapped(n) => n.span,
        }
    }

    fn clear_span(&mut self) {
        match self {
            Operand::Column(n) => n.span = None,
            Operand::Number(n) => n.span = None,
            Operand::Str(n) => n.span = None,
            Operand::Binary(n) => n.span = None,
            Operand::Concat(n) => n.items.clear_span(),
            Operand::Negation(n) => n.span = None,
            Operand::Function(n) => n.span = None,
            Operand::Geometry(n) => n.span = None,
            Operand::Case(n) => n.span = None,
            Operand::Cast(n) => n.span = None,
            Operand::Wrapped(n) => n.span = None,
        }
    }
}

/// Where a resolved column reference points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnBinding {
    /// A column of a declared catalog table; the handle is resolved
    /// through the catalog at use.
    Base(ColumnId),
    /// An output column of a sub-query or CTE. The type is carried
    /// directly since there is no catalog entry to point at.
    Derived { dtype: DbType },
}

impl ColumnBinding {
    pub fn dtype(&self, catalog: &crate::catalog::Catalog) -> DbType {
        match self {
            ColumnBinding::Base(id) => catalog.column(*id).dtype,
            ColumnBinding::Derived { dtype } => *dtype,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnExpr {
    pub path: ColumnPath,
    /// Filled in by the checker.
    pub binding: Option<ColumnBinding>,
    pub span: Option<Span>,
}

impl ColumnExpr {
    pub fn new(path: ColumnPath) -> Self {
        ColumnExpr {
            path,
            binding: None,
            span: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericLiteral {
    /// Verbatim literal text, so rendering never reformats `1e3` as
    /// `1000`.
    pub text: SmolStr,
    pub span: Option<Span>,
}

impl NumericLiteral {
    pub fn new(text: impl Into<SmolStr>) -> Self {
        NumericLiteral {
            text: text.into(),
            span: None,
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.text.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringLiteral {
    /// The unescaped value.
    pub value: SmolStr,
    pub span: Option<Span>,
}

impl StringLiteral {
    pub fn new(value: impl Into<SmolStr>) -> Self {
        StringLiteral {
            value: value.into(),
            span: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum ArithOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    pub left: Operand,
    pub op: ArithOp,
    pub right: Operand,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Concatenation {
    pub items: NodeList<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NegationExpr {
    pub operand: Operand,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WrappedOperand {
    pub operand: Operand,
    pub span: Option<Span>,
}

/// Functions every service understands without declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum BuiltinFunction {
    Count,
    Avg,
    Max,
    Min,
    Sum,
    Abs,
    Ceiling,
    Degrees,
    Exp,
    Floor,
    Log,
    Log10,
    Mod,
    Pi,
    Power,
    Radians,
    Rand,
    Round,
    Sqrt,
    Truncate,
    Acos,
    Asin,
    Atan,
    Atan2,
    Cos,
    Cot,
    Sin,
    Tan,
    Lower,
    Upper,
}

impl BuiltinFunction {
    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            BuiltinFunction::Count
                | BuiltinFunction::Avg
                | BuiltinFunction::Max
                | BuiltinFunction::Min
                | BuiltinFunction::Sum
        )
    }

    pub fn is_string(self) -> bool {
        matches!(self, BuiltinFunction::Lower | BuiltinFunction::Upper)
    }

    /// Result type, where it does not depend on the argument.
    pub fn fixed_return_kind(self) -> Option<DbTypeKind> {
        match self {
            BuiltinFunction::Count => Some(DbTypeKind::Bigint),
            BuiltinFunction::Avg => Some(DbTypeKind::Double),
            BuiltinFunction::Max | BuiltinFunction::Min | BuiltinFunction::Sum => None,
            BuiltinFunction::Lower | BuiltinFunction::Upper => Some(DbTypeKind::Varchar),
            _ => Some(DbTypeKind::Double),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    /// The function name as written.
    pub name: SmolStr,
    pub builtin: Option<BuiltinFunction>,
    /// `COUNT(DISTINCT x)`.
    pub distinct: bool,
    /// `COUNT(*)`.
    pub star: bool,
    pub args: NodeList<Operand>,
    /// Not a built-in: must match a declared function signature.
    pub udf: bool,
    /// Declared return type, filled in by the checker for matched UDFs.
    pub resolved_type: Option<DbType>,
    pub span: Option<Span>,
}

/// The geometric predicates. They take geometry arguments but are plain
/// function calls in the tree, not [`GeometryFunction`] nodes.
pub fn is_geometry_predicate(name: &str) -> bool {
    name.eq_ignore_ascii_case("CONTAINS") || name.eq_ignore_ascii_case("INTERSECTS")
}

impl FunctionCall {
    pub fn new(name: impl Into<SmolStr>, args: NodeList<Operand>) -> Self {
        let name = name.into();
        let builtin = BuiltinFunction::from_str(&name).ok();
        FunctionCall {
            udf: builtin.is_none() && !is_geometry_predicate(&name),
            name,
            builtin,
            distinct: false,
            star: false,
            args,
            resolved_type: None,
            span: None,
        }
    }

    fn feature(&self) -> LanguageFeature {
        if is_geometry_predicate(&self.name) {
            LanguageFeature::optional(FeatureCategory::Geometry, self.name.to_ascii_uppercase())
        } else if self.udf {
            LanguageFeature::udf(self.name.clone())
        } else if self.builtin.is_some_and(BuiltinFunction::is_string) {
            LanguageFeature::optional(FeatureCategory::StringFunction, self.name.to_string())
        } else {
            LanguageFeature::core("function call")
        }
    }
}

/// The geometric value constructors and accessors of the language. The
/// `CONTAINS`/`INTERSECTS` predicates are not kinds of this node; they
/// stay plain function calls (see [`is_geometry_predicate`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum GeometryKind {
    Point,
    Circle,
    Box,
    Polygon,
    Region,
    Centroid,
    Distance,
    Area,
    Coord1,
    Coord2,
    CoordSys,
}

impl GeometryKind {
    /// Accepted argument counts, including the optional leading
    /// coordinate-system literal. `None` means unbounded.
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            GeometryKind::Point => (2, Some(3)),
            GeometryKind::Circle => (3, Some(4)),
            GeometryKind::Box => (4, Some(5)),
            GeometryKind::Polygon => (6, None),
            GeometryKind::Region => (1, Some(1)),
            GeometryKind::Centroid => (1, Some(1)),
            GeometryKind::Distance => (2, Some(4)),
            GeometryKind::Area => (1, Some(1)),
            GeometryKind::Coord1 | GeometryKind::Coord2 | GeometryKind::CoordSys => (1, Some(1)),
        }
    }

    pub fn return_kind(self) -> DbTypeKind {
        match self {
            GeometryKind::Point | GeometryKind::Centroid => DbTypeKind::Point,
            GeometryKind::Circle
            | GeometryKind::Box
            | GeometryKind::Polygon
            | GeometryKind::Region => DbTypeKind::Region,
            GeometryKind::Distance | GeometryKind::Area => DbTypeKind::Double,
            GeometryKind::Coord1 | GeometryKind::Coord2 => DbTypeKind::Double,
            GeometryKind::CoordSys => DbTypeKind::Varchar,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::from_str(name).ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeometryFunction {
    pub kind: GeometryKind,
    pub args: NodeList<Operand>,
    pub span: Option<Span>,
}

impl GeometryFunction {
    pub fn new(kind: GeometryKind, args: NodeList<Operand>) -> Self {
        GeometryFunction {
            kind,
            args,
            span: None,
        }
    }

    fn feature(&self) -> LanguageFeature {
        LanguageFeature::optional(FeatureCategory::Geometry, self.kind.to_string())
    }

    /// The leading coordinate-system literal, when present.
    pub fn coord_sys(&self) -> Option<&StringLiteral> {
        match self.args.get(0) {
            Some(Operand::Str(s)) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseBranch {
    pub when: super::constraint::ConstraintClause,
    pub then: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseExpr {
    pub branches: Vec<CaseBranch>,
    pub else_value: Option<Operand>,
    pub span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CastExpr {
    pub operand: Operand,
    pub target: DbType,
    pub span: Option<Span>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_builtin_classification() {
        let count = FunctionCall::new("count", NodeList::new());
        assert_eq!(count.builtin, Some(BuiltinFunction::Count));
        assert!(!count.udf);

        let custom = FunctionCall::new("gaia_healpix", NodeList::new());
        assert_eq!(custom.builtin, None);
        assert!(custom.udf);

        // The geometric predicates are ordinary calls, not declared
        // functions.
        let contains = FunctionCall::new("contains", NodeList::new());
        assert_eq!(contains.builtin, None);
        assert!(!contains.udf);
    }

    #[test]
    fn test_geometry_names() {
        assert_eq!(GeometryKind::from_name("circle"), Some(GeometryKind::Circle));
        assert_eq!(GeometryKind::from_name("COORDSYS"), Some(GeometryKind::CoordSys));
        assert_eq!(GeometryKind::from_name("sphere"), None);
        // Predicates have no constructor kind.
        assert_eq!(GeometryKind::from_name("CONTAINS"), None);
        assert_eq!(GeometryKind::CoordSys.to_string(), "COORDSYS");
    }

    #[test]
    fn test_geometry_arity_table() {
        assert_eq!(GeometryKind::Point.arity(), (2, Some(3)));
        assert_eq!(GeometryKind::Polygon.arity(), (6, None));
        assert_eq!(GeometryKind::Distance.arity(), (2, Some(4)));
    }

    #[test]
    fn test_geometry_predicate_names() {
        assert!(is_geometry_predicate("contains"));
        assert!(is_geometry_predicate("INTERSECTS"));
        assert!(!is_geometry_predicate("point"));
    }
}
