//! Language-feature descriptors and the per-service allow-lists checked
//! against them.

use std::str::FromStr;

use ahash::AHashSet;
use smol_str::SmolStr;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::ast::operand::GeometryKind;
use crate::catalog::DbType;

/// One entry of the geometry allow-list: a constructor/accessor kind or
/// one of the two predicates, which are plain function calls in the tree
/// but are declined (or granted) through the same bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum GeoFeature {
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
    Contains,
    Intersects,
}

impl GeoFeature {
    pub fn from_name(name: &str) -> Option<Self> {
        Self::from_str(name).ok()
    }
}

impl From<GeometryKind> for GeoFeature {
    fn from(kind: GeometryKind) -> Self {
        match kind {
            GeometryKind::Point => GeoFeature::Point,
            GeometryKind::Circle => GeoFeature::Circle,
            GeometryKind::Box => GeoFeature::Box,
            GeometryKind::Polygon => GeoFeature::Polygon,
            GeometryKind::Region => GeoFeature::Region,
            GeometryKind::Centroid => GeoFeature::Centroid,
            GeometryKind::Distance => GeoFeature::Distance,
            GeometryKind::Area => GeoFeature::Area,
            GeometryKind::Coord1 => GeoFeature::Coord1,
            GeometryKind::Coord2 => GeoFeature::Coord2,
            GeometryKind::CoordSys => GeoFeature::CoordSys,
        }
    }
}

/// The registry group a language feature belongs to. Optional groups can
/// be switched off per service; `Core` is always available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum FeatureCategory {
    Core,
    Geometry,
    Udf,
    SetOperation,
    CommonTableExpr,
    StringFunction,
    ConditionalExpr,
    Cast,
    Offset,
}

impl FeatureCategory {
    /// The registry identifier this group is published under, for
    /// services that advertise their capabilities.
    pub fn registry_id(self) -> Option<&'static str> {
        match self {
            FeatureCategory::Core => None,
            FeatureCategory::Geometry => Some("ivo://ivoa.net/std/TAPRegExt#features-adql-geo"),
            FeatureCategory::Udf => Some("ivo://ivoa.net/std/TAPRegExt#features-udf"),
            FeatureCategory::SetOperation => {
                Some("ivo://ivoa.net/std/TAPRegExt#features-adql-sets")
            }
            FeatureCategory::CommonTableExpr => {
                Some("ivo://ivoa.net/std/TAPRegExt#features-adql-common-table")
            }
            FeatureCategory::StringFunction => {
                Some("ivo://ivoa.net/std/TAPRegExt#features-adql-string")
            }
            FeatureCategory::ConditionalExpr => {
                Some("ivo://ivoa.net/std/TAPRegExt#features-adql-conditional")
            }
            FeatureCategory::Cast => Some("ivo://ivoa.net/std/TAPRegExt#features-adql-type"),
            FeatureCategory::Offset => Some("ivo://ivoa.net/std/TAPRegExt#features-adql-offset"),
        }
    }
}

/// The descriptor every AST node carries for allow-list checking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageFeature {
    pub category: FeatureCategory,
    /// The feature's display form, e.g. `POINT` or a declared function
    /// name.
    pub form: SmolStr,
    /// Whether a service may decline the feature.
    pub optional: bool,
    pub description: Option<SmolStr>,
}

impl LanguageFeature {
    pub fn core(form: impl Into<SmolStr>) -> Self {
        LanguageFeature {
            category: FeatureCategory::Core,
            form: form.into(),
            optional: false,
            description: None,
        }
    }

    pub fn optional(category: FeatureCategory, form: impl Into<SmolStr>) -> Self {
        LanguageFeature {
            category,
            form: form.into(),
            optional: true,
            description: None,
        }
    }

    pub fn udf(form: impl Into<SmolStr>) -> Self {
        Self::optional(FeatureCategory::Udf, form)
    }
}

/// One parameter of a declared function signature.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionParam {
    pub name: SmolStr,
    pub dtype: DbType,
}

/// A declared (user-defined) function: signature plus an optional backend
/// implementation name the translator substitutes for the published one.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: SmolStr,
    pub params: Vec<FunctionParam>,
    pub return_type: DbType,
    pub impl_ref: Option<SmolStr>,
    pub description: Option<String>,
}

impl FunctionDef {
    pub fn new(name: impl Into<SmolStr>, params: Vec<FunctionParam>, return_type: DbType) -> Self {
        FunctionDef {
            name: name.into(),
            params,
            return_type,
            impl_ref: None,
            description: None,
        }
    }

    pub fn with_impl_ref(mut self, impl_ref: impl Into<SmolStr>) -> Self {
        self.impl_ref = Some(impl_ref.into());
        self
    }

    /// `name(param, …) -> type` for messages and capability listings.
    pub fn signature(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|p| format!("{} {}", p.name, p.dtype))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({params}) -> {}", self.name, self.return_type)
    }
}

/// The optional-feature allow-lists a service declares.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    /// `None`: every geometric feature is available. `Some(set)`: only the
    /// listed ones (an empty set forbids all geometry).
    geometries: Option<AHashSet<GeoFeature>>,
    udfs: Vec<FunctionDef>,
}

impl FeatureSet {
    /// Everything allowed, no functions declared.
    pub fn permissive() -> Self {
        Self::default()
    }

    pub fn without_geometry(mut self) -> Self {
        self.geometries = Some(AHashSet::new());
        self
    }

    pub fn with_geometries(mut self, features: impl IntoIterator<Item = GeoFeature>) -> Self {
        self.geometries
            .get_or_insert_with(AHashSet::new)
            .extend(features);
        self
    }

    pub fn with_udf(mut self, def: FunctionDef) -> Self {
        self.udfs.push(def);
        self
    }

    pub fn geometry_allowed(&self, feature: GeoFeature) -> bool {
        match &self.geometries {
            None => true,
            Some(set) => set.contains(&feature),
        }
    }

    pub fn udfs(&self) -> &[FunctionDef] {
        &self.udfs
    }

    /// Declared functions matching `name` case-insensitively.
    pub fn find_udfs(&self, name: &str) -> impl Iterator<Item = &FunctionDef> {
        self.udfs
            .iter()
            .filter(move |def| def.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::catalog::DbTypeKind;

    #[test]
    fn test_geometry_allow_list_modes() {
        let permissive = FeatureSet::permissive();
        assert!(permissive.geometry_allowed(GeoFeature::Contains));

        let none = FeatureSet::permissive().without_geometry();
        assert!(!none.geometry_allowed(GeoFeature::Point));

        let some =
            FeatureSet::permissive().with_geometries([GeoFeature::Point, GeoFeature::Circle]);
        assert!(some.geometry_allowed(GeoFeature::Point));
        assert!(some.geometry_allowed(GeometryKind::Circle.into()));
        assert!(!some.geometry_allowed(GeoFeature::Contains));
    }

    #[test]
    fn test_udf_lookup_is_case_insensitive() {
        let set = FeatureSet::permissive().with_udf(FunctionDef::new(
            "gaia_healpix",
            vec![FunctionParam {
                name: "order".into(),
                dtype: DbType::new(DbTypeKind::Integer),
            }],
            DbType::new(DbTypeKind::Bigint),
        ));
        assert_eq!(set.find_udfs("GAIA_HEALPIX").count(), 1);
        assert_eq!(set.find_udfs("missing").count(), 0);
    }

    #[test]
    fn test_signature_rendering() {
        let def = FunctionDef::new(
            "dist",
            vec![
                FunctionParam {
                    name: "a".into(),
                    dtype: DbType::new(DbTypeKind::Double),
                },
                FunctionParam {
                    name: "b".into(),
                    dtype: DbType::new(DbTypeKind::Double),
                },
            ],
            DbType::new(DbTypeKind::Double),
        );
        assert_eq!(def.signature(), "dist(a DOUBLE, b DOUBLE) -> DOUBLE");
    }
}
