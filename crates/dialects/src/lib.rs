//! Serialization of a checked query tree to backend SQL.
//!
//! A [`SqlDialect`] supplies the parts that differ between backends: the
//! identifier quote character, the row-limit form, the SQL spelling of
//! each geometric function, and type names. The [`translator`] walks the
//! tree once and never mutates it; the same tree can be translated for
//! several dialects.

pub mod ansi;
pub mod errors;
pub mod mysql;
pub mod postgres;
pub mod translator;

use skyql_adql::ast::{GeometryFunction, NodeList, Operand};
use skyql_adql::catalog::{DbType, DbTypeKind};
use skyql_adql::feature::GeoFeature;
use strum_macros::{AsRefStr, Display};

pub use crate::ansi::AnsiDialect;
pub use crate::errors::TranslateError;
pub use crate::mysql::MySqlDialect;
pub use crate::postgres::PostgresDialect;
pub use crate::translator::{BoundIdentifier, TranslateOptions, Translation, SqlWriter, translate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum DialectKind {
    Ansi,
    Postgres,
    MySql,
}

/// How a dialect spells a row limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitForm {
    /// `LIMIT n [OFFSET m]`
    Limit,
    /// `OFFSET m ROWS FETCH FIRST n ROWS ONLY`
    FetchFirst,
}

/// The backend-specific half of the translator.
pub trait SqlDialect: Send + Sync {
    fn kind(&self) -> DialectKind;

    fn quote_char(&self) -> char {
        '"'
    }

    fn limit_form(&self) -> LimitForm;

    fn supports_geometry(&self, feature: GeoFeature) -> bool;

    /// Emit the SQL call for a geometric constructor or accessor. Only
    /// invoked for kinds the dialect reports as supported.
    fn write_geometry(
        &self,
        writer: &mut SqlWriter<'_>,
        geometry: &GeometryFunction,
    ) -> Result<(), TranslateError>;

    /// Emit the SQL for a `CONTAINS`/`INTERSECTS` call. Only invoked for
    /// predicates the dialect reports as supported.
    fn write_geometry_predicate(
        &self,
        writer: &mut SqlWriter<'_>,
        predicate: GeoFeature,
        args: &NodeList<Operand>,
    ) -> Result<(), TranslateError>;

    /// Fold applied to case-insensitive identifier parts.
    fn fold(&self, part: &str) -> String {
        part.to_ascii_lowercase()
    }

    /// SQL spelling of a column type, for `CAST`.
    fn type_name(&self, dtype: DbType) -> String {
        let base = match dtype.kind {
            DbTypeKind::Double => "DOUBLE PRECISION".to_string(),
            other => other.to_string(),
        };
        match dtype.length {
            Some(length) => format!("{base}({length})"),
            None => base,
        }
    }
}
