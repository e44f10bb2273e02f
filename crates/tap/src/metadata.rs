//! The self-describing metadata schema every service publishes, plus the
//! optional ObsCore table. Both are plain catalog entries, so queries
//! against the service's own metadata resolve like any other.

use skyql_adql::catalog::{Catalog, Column, DbType, DbTypeKind, Schema, Table};

fn varchar(name: &str) -> Column {
    Column::new(name, DbType::new(DbTypeKind::Varchar))
}

fn flag(name: &str) -> Column {
    Column::new(name, DbType::new(DbTypeKind::Integer))
}

fn double(name: &str) -> Column {
    Column::new(name, DbType::new(DbTypeKind::Double))
}

/// The standard `TAP_SCHEMA` with its five tables.
pub fn tap_schema() -> Schema {
    let mut schema = Schema::new("TAP_SCHEMA");
    schema.db_name = Some("tap_schema".into());
    schema.description =
        Some("Set of tables listing the columns and the keys of the published tables.".to_string());
    schema.tables = vec![
        Table::new("schemas").with_columns(vec![
            varchar("schema_name"),
            varchar("description"),
            varchar("utype"),
        ]),
        Table::new("tables").with_columns(vec![
            varchar("schema_name"),
            varchar("table_name"),
            varchar("table_type"),
            varchar("description"),
            varchar("utype"),
        ]),
        Table::new("columns").with_columns(vec![
            varchar("table_name"),
            varchar("column_name"),
            varchar("datatype"),
            flag("arraysize"),
            flag("size"),
            varchar("description"),
            varchar("unit"),
            varchar("ucd"),
            varchar("utype"),
            flag("principal"),
            flag("indexed"),
            flag("std"),
        ]),
        Table::new("keys").with_columns(vec![
            varchar("key_id"),
            varchar("from_table"),
            varchar("target_table"),
            varchar("description"),
            varchar("utype"),
        ]),
        Table::new("key_columns").with_columns(vec![
            varchar("key_id"),
            varchar("from_column"),
            varchar("target_column"),
        ]),
    ];
    schema
}

/// The `ivoa` schema with a minimal ObsCore table.
pub fn ivoa_schema() -> Schema {
    let mut obscore = Table::new("obscore").with_columns(vec![
        varchar("dataproduct_type"),
        flag("calib_level"),
        varchar("obs_collection"),
        varchar("obs_id"),
        varchar("obs_publisher_did"),
        varchar("access_url"),
        varchar("access_format"),
        Column::new("access_estsize", DbType::new(DbTypeKind::Bigint)),
        varchar("target_name"),
        double("s_ra"),
        double("s_dec"),
        double("s_fov"),
        Column::new("s_region", DbType::new(DbTypeKind::Region)),
        double("s_resolution"),
        double("t_min"),
        double("t_max"),
        double("t_exptime"),
        double("t_resolution"),
        double("em_min"),
        double("em_max"),
        double("em_res_power"),
        varchar("o_ucd"),
        varchar("pol_states"),
        varchar("facility_name"),
        varchar("instrument_name"),
    ]);
    obscore.dm = Some("ObsCore-1.1".into());
    obscore.utype = Some("ivo://ivoa.net/std/ObsCore#table-1.1".to_string());

    let mut schema = Schema::new("ivoa");
    schema.tables = vec![obscore];
    schema
}

/// Graft the service metadata (and optionally ObsCore) into a catalog.
pub fn attach_service_schemas(catalog: &mut Catalog, with_obscore: bool) {
    catalog.add_schema(tap_schema());
    if with_obscore {
        catalog.add_schema(ivoa_schema());
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use skyql_adql::feature::FeatureSet;
    use skyql_adql::{check, parse};

    use super::*;

    #[test]
    fn test_metadata_queries_resolve() {
        let mut catalog = Catalog::new();
        attach_service_schemas(&mut catalog, true);

        let mut query = parse(
            "SELECT table_name, description FROM TAP_SCHEMA.tables \
             WHERE schema_name = 'TAP_SCHEMA'",
        )
        .unwrap();
        let output = check(&mut query, &catalog, &FeatureSet::permissive()).unwrap();
        assert_eq!(output.len(), 2);

        let mut query = parse("SELECT s_ra, s_dec FROM ivoa.obscore").unwrap();
        check(&mut query, &catalog, &FeatureSet::permissive()).unwrap();
    }

    #[test]
    fn test_tap_schema_lists_the_standard_tables() {
        let schema = tap_schema();
        let names: Vec<&str> = schema.tables.iter().map(|t| t.name.as_ref()).collect();
        assert_eq!(
            names,
            vec!["schemas", "tables", "columns", "keys", "key_columns"]
        );
    }
}
