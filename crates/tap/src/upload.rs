//! User-provided temporary tables, addressed inside queries through the
//! fixed `TAP_UPLOAD` namespace.

use std::io::Read;

use skyql_adql::catalog::{Column, Schema, Table};
use skyql_uws::params::{ParamValue, UploadFile};

use crate::backend::Row;
use crate::errors::TapError;

/// The schema name uploads are queried under.
pub const UPLOAD_SCHEMA: &str = "TAP_UPLOAD";

/// One materialized upload: declared columns plus its rows.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedTable {
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

/// Decodes one uploaded document (the serialization format is the
/// collaborator's business) into a table.
pub trait UploadReader: Send + Sync {
    fn read(&self, name: &str, source: &mut dyn Read) -> Result<UploadedTable, TapError>;
}

/// Split an upload parameter into `(table, uri)` pairs. The parameter
/// value is `name,uri` with several pairs separated by `;`; repeated
/// parameters contribute their pairs in order.
pub fn parse_upload_param(value: &ParamValue) -> Result<Vec<(String, String)>, TapError> {
    let raws: Vec<&str> = match value {
        ParamValue::Text(text) => vec![text.as_str()],
        ParamValue::Array(items) => items.iter().map(String::as_str).collect(),
    };
    let mut pairs = Vec::new();
    for raw in raws {
        for part in raw.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((name, uri)) = part.split_once(',') else {
                return Err(TapError::Upload(format!(
                    "\"{part}\" is not a table,uri pair"
                )));
            };
            let (name, uri) = (name.trim(), uri.trim());
            if name.is_empty() || uri.is_empty() {
                return Err(TapError::Upload(format!(
                    "\"{part}\" is not a table,uri pair"
                )));
            }
            if !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(TapError::Upload(format!(
                    "\"{name}\" is not a valid upload table name"
                )));
            }
            pairs.push((name.to_string(), uri.to_string()));
        }
    }
    Ok(pairs)
}

/// The upload descriptors recorded on a job for its `name,uri` pairs.
pub fn upload_files(pairs: &[(String, String)]) -> Vec<UploadFile> {
    pairs
        .iter()
        .map(|(name, uri)| UploadFile {
            param_name: "upload".to_string(),
            file_name: name.clone(),
            location: uri.clone(),
            mime: None,
            length: None,
        })
        .collect()
}

/// Build the catalog schema exposing the uploads to the checker and the
/// translator. The physical names land in a `tap_upload` namespace the
/// backend creates the temporary tables under.
pub fn upload_schema(tables: &[UploadedTable]) -> Schema {
    let mut schema = Schema::new(UPLOAD_SCHEMA);
    schema.db_name = Some("tap_upload".into());
    schema.tables = tables
        .iter()
        .map(|uploaded| {
            let mut table = Table::new(uploaded.name.as_str());
            table.uploaded = true;
            table.columns = uploaded.columns.clone();
            table
        })
        .collect();
    schema
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use skyql_adql::catalog::{DbType, DbTypeKind};

    use super::*;

    #[test]
    fn test_parse_upload_pairs() {
        let pairs = parse_upload_param(&ParamValue::Text(
            "mine,http://example.org/t.xml; other,param:up1".to_string(),
        ))
        .unwrap();
        assert_eq!(
            pairs,
            vec![
                ("mine".to_string(), "http://example.org/t.xml".to_string()),
                ("other".to_string(), "param:up1".to_string()),
            ]
        );
    }

    #[test]
    fn test_array_values_accumulate() {
        let pairs = parse_upload_param(&ParamValue::Array(vec![
            "a,uri-a".to_string(),
            "b,uri-b".to_string(),
        ]))
        .unwrap();
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_malformed_pairs_are_rejected() {
        assert!(parse_upload_param(&ParamValue::Text("no-comma".to_string())).is_err());
        assert!(parse_upload_param(&ParamValue::Text("bad name!,uri".to_string())).is_err());
        assert!(parse_upload_param(&ParamValue::Text(",uri".to_string())).is_err());
    }

    #[test]
    fn test_upload_schema_marks_tables() {
        let uploaded = UploadedTable {
            name: "mine".to_string(),
            columns: vec![Column::new("ra", DbType::new(DbTypeKind::Double))],
            rows: vec![],
        };
        let schema = upload_schema(std::slice::from_ref(&uploaded));
        assert_eq!(schema.name.as_str(), UPLOAD_SCHEMA);
        assert!(schema.tables[0].uploaded);
        assert_eq!(schema.tables[0].columns.len(), 1);
    }
}
