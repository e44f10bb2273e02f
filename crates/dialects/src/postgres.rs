//! PostgreSQL, optionally with the pgSphere extension for the spherical
//! geometry of the query language.
//!
//! Angles on the query side are degrees; pgSphere works in radians, so
//! every constructor wraps its coordinates in `radians(…)` and every
//! angular result is brought back with `degrees(…)`. Containment and
//! overlap are the `<@` and `&&` operators, re-shaped into the `0`/`1`
//! integer the language's predicates compare against.

use skyql_adql::ast::{GeometryFunction, GeometryKind, NodeList, Operand};
use skyql_adql::feature::GeoFeature;

use crate::{DialectKind, LimitForm, SqlDialect, SqlWriter, TranslateError};

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect {
    pgsphere: bool,
}

impl PostgresDialect {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable geometry translation through pgSphere.
    pub fn with_pgsphere() -> Self {
        PostgresDialect { pgsphere: true }
    }
}

/// The coordinate arguments, with the optional leading coordinate-system
/// literal stripped. The coordinate system itself does not translate:
/// pgSphere stores plain spherical coordinates.
fn coords(geometry: &GeometryFunction) -> Vec<&Operand> {
    let skip = match geometry.kind {
        GeometryKind::Point | GeometryKind::Circle | GeometryKind::Box => {
            let (min, _) = geometry.kind.arity();
            usize::from(geometry.args.len() > min)
        }
        GeometryKind::Polygon => usize::from(geometry.args.len() % 2 == 1),
        _ => 0,
    };
    geometry.args.iter().skip(skip).collect()
}

/// A numeric constant, through negation and parentheses.
fn literal_value(operand: &Operand) -> Option<f64> {
    match operand {
        Operand::Number(n) => n.value(),
        Operand::Negation(n) => literal_value(&n.operand).map(|v| -v),
        Operand::Wrapped(w) => literal_value(&w.operand),
        _ => None,
    }
}

impl PostgresDialect {
    fn write_spoint(
        &self,
        writer: &mut SqlWriter<'_>,
        x: &Operand,
        y: &Operand,
    ) -> Result<(), TranslateError> {
        writer.push("spoint(radians(");
        writer.write_operand(x)?;
        writer.push("),radians(");
        writer.write_operand(y)?;
        writer.push("))");
        Ok(())
    }

    /// Containment and overlap come back as operators; re-shape them
    /// into the 0/1 integer the query language compares against.
    fn write_predicate(
        &self,
        writer: &mut SqlWriter<'_>,
        args: &NodeList<Operand>,
        op: &str,
    ) -> Result<(), TranslateError> {
        writer.push("(CASE WHEN (");
        writer.write_operand(args.get(0).expect("arity checked at parse"))?;
        writer.push(&format!(") {op} ("));
        writer.write_operand(args.get(1).expect("arity checked at parse"))?;
        writer.push(") THEN 1 ELSE 0 END)");
        Ok(())
    }
}

impl SqlDialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn limit_form(&self) -> LimitForm {
        LimitForm::Limit
    }

    fn supports_geometry(&self, feature: GeoFeature) -> bool {
        self.pgsphere
            && !matches!(feature, GeoFeature::CoordSys | GeoFeature::Region)
    }

    fn write_geometry(
        &self,
        writer: &mut SqlWriter<'_>,
        geometry: &GeometryFunction,
    ) -> Result<(), TranslateError> {
        let args = coords(geometry);
        match geometry.kind {
            GeometryKind::Point => self.write_spoint(writer, args[0], args[1]),
            GeometryKind::Circle => {
                writer.push("scircle(");
                self.write_spoint(writer, args[0], args[1])?;
                writer.push(",radians(");
                writer.write_operand(args[2])?;
                writer.push("))");
                Ok(())
            }
            GeometryKind::Box => {
                // Corners at center ± half the extent on each axis.
                let corner = |writer: &mut SqlWriter<'_>, sign: char| -> Result<(), TranslateError> {
                    writer.push("spoint(radians((");
                    writer.write_operand(args[0])?;
                    writer.push(&format!(") {sign} ("));
                    writer.write_operand(args[2])?;
                    writer.push(")/2.0),radians((");
                    writer.write_operand(args[1])?;
                    writer.push(&format!(") {sign} ("));
                    writer.write_operand(args[3])?;
                    writer.push(")/2.0))");
                    Ok(())
                };
                writer.push("sbox(");
                corner(writer, '-')?;
                writer.push(",");
                corner(writer, '+')?;
                writer.push(")");
                Ok(())
            }
            GeometryKind::Polygon => {
                // spoly has no constructor over expressions; only constant
                // vertex lists translate.
                let mut vertices = Vec::with_capacity(args.len() / 2);
                for pair in args.chunks(2) {
                    let (Some(x), Some(y)) = (literal_value(pair[0]), literal_value(pair[1]))
                    else {
                        return Err(TranslateError::InvalidLiteral {
                            message: "POLYGON vertices must be numeric constants for pgSphere"
                                .to_string(),
                        });
                    };
                    vertices.push(format!("({x}d,{y}d)"));
                }
                writer.push(&format!("spoly '{{{}}}'", vertices.join(",")));
                Ok(())
            }
            GeometryKind::Centroid => {
                writer.push("@@ (");
                writer.write_operand(args[0])?;
                writer.push(")");
                Ok(())
            }
            GeometryKind::Distance => {
                if args.len() != 2 && args.len() != 4 {
                    return Err(TranslateError::InvalidLiteral {
                        message: format!(
                            "DISTANCE takes 2 points or 4 coordinates, {} argument(s) given",
                            args.len()
                        ),
                    });
                }
                writer.push("degrees((");
                if args.len() == 2 {
                    writer.write_operand(args[0])?;
                    writer.push(") <-> (");
                    writer.write_operand(args[1])?;
                } else {
                    self.write_spoint(writer, args[0], args[1])?;
                    writer.push(") <-> (");
                    self.write_spoint(writer, args[2], args[3])?;
                }
                writer.push("))");
                Ok(())
            }
            GeometryKind::Area => {
                // steradians to square degrees: two passes through
                // degrees() multiply by (180/pi)^2.
                writer.push("degrees(degrees(area(");
                writer.write_operand(args[0])?;
                writer.push(")))");
                Ok(())
            }
            GeometryKind::Coord1 => {
                writer.push("degrees(long(");
                writer.write_operand(args[0])?;
                writer.push("))");
                Ok(())
            }
            GeometryKind::Coord2 => {
                writer.push("degrees(lat(");
                writer.write_operand(args[0])?;
                writer.push("))");
                Ok(())
            }
            GeometryKind::CoordSys | GeometryKind::Region => {
                Err(TranslateError::UnsupportedByDialect {
                    dialect: self.kind(),
                    feature: geometry.kind.to_string(),
                })
            }
        }
    }

    fn write_geometry_predicate(
        &self,
        writer: &mut SqlWriter<'_>,
        predicate: GeoFeature,
        args: &NodeList<Operand>,
    ) -> Result<(), TranslateError> {
        match predicate {
            GeoFeature::Contains => self.write_predicate(writer, args, "<@"),
            GeoFeature::Intersects => self.write_predicate(writer, args, "&&"),
            other => Err(TranslateError::UnsupportedByDialect {
                dialect: self.kind(),
                feature: other.to_string(),
            }),
        }
    }
}
