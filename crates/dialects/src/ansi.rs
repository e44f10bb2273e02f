use skyql_adql::ast::{GeometryFunction, NodeList, Operand};
use skyql_adql::feature::GeoFeature;

use crate::{DialectKind, LimitForm, SqlDialect, SqlWriter, TranslateError};

/// Plain SQL:2008. Double-quote delimiters, `FETCH FIRST n ROWS ONLY`,
/// no geometry extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiDialect;

impl SqlDialect for AnsiDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Ansi
    }

    fn limit_form(&self) -> LimitForm {
        LimitForm::FetchFirst
    }

    fn supports_geometry(&self, _feature: GeoFeature) -> bool {
        false
    }

    fn write_geometry(
        &self,
        _writer: &mut SqlWriter<'_>,
        geometry: &GeometryFunction,
    ) -> Result<(), TranslateError> {
        Err(TranslateError::UnsupportedByDialect {
            dialect: self.kind(),
            feature: geometry.kind.to_string(),
        })
    }

    fn write_geometry_predicate(
        &self,
        _writer: &mut SqlWriter<'_>,
        predicate: GeoFeature,
        _args: &NodeList<Operand>,
    ) -> Result<(), TranslateError> {
        Err(TranslateError::UnsupportedByDialect {
            dialect: self.kind(),
            feature: predicate.to_string(),
        })
    }
}
