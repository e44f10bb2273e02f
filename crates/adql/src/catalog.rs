//! The declared metadata an incoming query is resolved against: schemas,
//! tables, columns and foreign keys, plus the handle types the checker
//! stamps onto the tree.
//!
//! Handles (`TableId`, `ColumnId`) are plain indices, valid for the
//! catalog instance they were resolved against. The catalog is read-mostly:
//! services swap the whole instance on metadata reload rather than editing
//! it in place.

use smol_str::SmolStr;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::ast::{IdentPart, TablePath, ident_matches};
use crate::errors::CheckError;
use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum DbTypeKind {
    Smallint,
    Integer,
    Bigint,
    Real,
    Double,
    Char,
    Varchar,
    Binary,
    Varbinary,
    Blob,
    Clob,
    Timestamp,
    Point,
    Region,
    Unknown,
    #[strum(serialize = "UNKNOWN_NUMERIC")]
    UnknownNumeric,
}

impl DbTypeKind {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DbTypeKind::Smallint
                | DbTypeKind::Integer
                | DbTypeKind::Bigint
                | DbTypeKind::Real
                | DbTypeKind::Double
                | DbTypeKind::Unknown
                | DbTypeKind::UnknownNumeric
        )
    }

    pub fn is_string(self) -> bool {
        matches!(
            self,
            DbTypeKind::Char
                | DbTypeKind::Varchar
                | DbTypeKind::Clob
                | DbTypeKind::Timestamp
                | DbTypeKind::Unknown
        )
    }

    pub fn is_binary(self) -> bool {
        matches!(
            self,
            DbTypeKind::Binary | DbTypeKind::Varbinary | DbTypeKind::Blob | DbTypeKind::Unknown
        )
    }

    pub fn is_geometry(self) -> bool {
        matches!(
            self,
            DbTypeKind::Point | DbTypeKind::Region | DbTypeKind::Unknown
        )
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, DbTypeKind::Unknown | DbTypeKind::UnknownNumeric)
    }
}

/// A column type: a kind plus an optional length for the sized kinds
/// (`CHAR(n)`, `VARCHAR(n)`, `BINARY(n)`, `VARBINARY(n)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbType {
    pub kind: DbTypeKind,
    pub length: Option<u32>,
}

impl DbType {
    pub fn new(kind: DbTypeKind) -> Self {
        DbType { kind, length: None }
    }

    pub fn sized(kind: DbTypeKind, length: u32) -> Self {
        DbType {
            kind,
            length: Some(length),
        }
    }

    /// Loose compatibility used for declared-function argument checks:
    /// two types are compatible when they belong to the same family, and
    /// the unknown types are compatible with everything.
    pub fn compatible_with(self, other: DbType) -> bool {
        let (a, b) = (self.kind, other.kind);
        if a == DbTypeKind::Unknown || b == DbTypeKind::Unknown {
            return true;
        }
        (a.is_numeric() && b.is_numeric())
            || (a.is_string() && b.is_string())
            || (a.is_binary() && b.is_binary())
            || (a == b)
    }
}

impl std::fmt::Display for DbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.length {
            Some(len) => write!(f, "{}({len})", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: SmolStr,
    /// Physical name in the backend, when it differs from the published
    /// one.
    pub db_name: Option<SmolStr>,
    pub dtype: DbType,
    pub unit: Option<String>,
    pub ucd: Option<String>,
    pub utype: Option<String>,
    pub description: Option<String>,
    pub principal: bool,
    pub indexed: bool,
    pub std: bool,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<SmolStr>, dtype: DbType) -> Self {
        Column {
            name: name.into(),
            db_name: None,
            dtype,
            unit: None,
            ucd: None,
            utype: None,
            description: None,
            principal: false,
            indexed: false,
            std: false,
            nullable: true,
        }
    }

    pub fn db_name(&self) -> &str {
        self.db_name.as_deref().unwrap_or(&self.name)
    }
}

/// A declared relation between two tables, kept for metadata publication.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub key_id: SmolStr,
    pub target_schema: Option<SmolStr>,
    pub target_table: SmolStr,
    /// Pairs of (column here, column in the target table).
    pub columns: Vec<(SmolStr, SmolStr)>,
    pub description: Option<String>,
    pub utype: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: SmolStr,
    pub db_name: Option<SmolStr>,
    /// Owning schema; set when the table is added to a catalog schema.
    pub schema: Option<SmolStr>,
    pub description: Option<String>,
    pub utype: Option<String>,
    pub columns: Vec<Column>,
    pub keys: Vec<ForeignKey>,
    /// A user-provided temporary table, living in the upload namespace.
    pub uploaded: bool,
    /// Data-model tag (e.g. the ObsCore table carries one).
    pub dm: Option<SmolStr>,
}

impl Table {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Table {
            name: name.into(),
            db_name: None,
            schema: None,
            description: None,
            utype: None,
            columns: Vec::new(),
            keys: Vec::new(),
            uploaded: false,
            dm: None,
        }
    }

    pub fn with_columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = columns;
        self
    }

    pub fn db_name(&self) -> &str {
        self.db_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub name: SmolStr,
    pub db_name: Option<SmolStr>,
    pub description: Option<String>,
    pub utype: Option<String>,
    pub tables: Vec<Table>,
}

impl Schema {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Schema {
            name: name.into(),
            db_name: None,
            description: None,
            utype: None,
            tables: Vec::new(),
        }
    }

    pub fn with_tables(mut self, tables: Vec<Table>) -> Self {
        self.tables = tables;
        self
    }

    pub fn db_name(&self) -> &str {
        self.db_name.as_deref().unwrap_or(&self.name)
    }
}

/// Handle to a table inside one catalog instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId {
    pub(crate) schema: u32,
    pub(crate) table: u32,
}

/// Handle to a column inside one catalog instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnId {
    pub table: TableId,
    pub(crate) column: u32,
}

/// A column of a query's result set, as inferred by the checker.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    pub name: SmolStr,
    pub dtype: DbType,
    /// The catalog column carried through, when the output is a plain
    /// column reference or a `*` expansion.
    pub source: Option<ColumnId>,
}

impl OutputColumn {
    pub fn synthesized(name: impl Into<SmolStr>, dtype: DbType) -> Self {
        OutputColumn {
            name: name.into(),
            dtype,
            source: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    schemas: Vec<Schema>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_schema(&mut self, mut schema: Schema) {
        for table in &mut schema.tables {
            table.schema = Some(schema.name.clone());
        }
        self.schemas.push(schema);
    }

    pub fn schemas(&self) -> &[Schema] {
        &self.schemas
    }

    pub fn schema_of(&self, id: TableId) -> &Schema {
        &self.schemas[id.schema as usize]
    }

    pub fn table(&self, id: TableId) -> &Table {
        &self.schemas[id.schema as usize].tables[id.table as usize]
    }

    pub fn column(&self, id: ColumnId) -> &Column {
        &self.table(id.table).columns[id.column as usize]
    }

    pub fn columns_of(&self, id: TableId) -> impl Iterator<Item = (ColumnId, &Column)> {
        self.table(id)
            .columns
            .iter()
            .enumerate()
            .map(move |(i, col)| {
                (
                    ColumnId {
                        table: id,
                        column: i as u32,
                    },
                    col,
                )
            })
    }

    /// Qualified published name of a table, for messages.
    pub fn qualified_table_name(&self, id: TableId) -> String {
        let schema = self.schema_of(id);
        format!("{}.{}", schema.name, self.table(id).name)
    }

    /// A copy of this catalog with one more schema, used to graft the
    /// upload namespace in for the duration of a query.
    pub fn with_extra_schema(&self, schema: Schema) -> Catalog {
        let mut merged = self.clone();
        merged.add_schema(schema);
        merged
    }

    /// Resolve a table reference following the case rules recorded in the
    /// path's mask. Unqualified references match across all schemas.
    pub fn resolve_table(
        &self,
        path: &TablePath,
        pos: Option<Span>,
    ) -> Result<TableId, CheckError> {
        // No catalog level is declared, so a catalog-qualified reference
        // can never match.
        if path.catalog.is_some() {
            return Err(CheckError::UnresolvedTable {
                name: path.qualified_name(),
                pos,
            });
        }

        let mut matches = Vec::new();
        for (si, schema) in self.schemas.iter().enumerate() {
            if let Some(schema_ref) = &path.schema {
                if !ident_matches(
                    schema_ref,
                    &schema.name,
                    path.case.is_sensitive(IdentPart::Schema),
                ) {
                    continue;
                }
            }
            for (ti, table) in schema.tables.iter().enumerate() {
                if ident_matches(
                    &path.table,
                    &table.name,
                    path.case.is_sensitive(IdentPart::Table),
                ) {
                    matches.push(TableId {
                        schema: si as u32,
                        table: ti as u32,
                    });
                }
            }
        }

        match matches.len() {
            0 => Err(CheckError::UnresolvedTable {
                name: path.qualified_name(),
                pos,
            }),
            1 => Ok(matches[0]),
            _ => Err(CheckError::AmbiguousTable {
                name: path.qualified_name(),
                candidates: matches
                    .iter()
                    .map(|id| self.qualified_table_name(*id))
                    .collect(),
                pos,
            }),
        }
    }

    /// All columns named `column` (under the given case rule) among the
    /// supplied in-scope tables.
    pub fn search_columns(
        &self,
        column: &str,
        sensitive: bool,
        tables: &[TableId],
    ) -> Vec<ColumnId> {
        let mut found = Vec::new();
        for &table in tables {
            for (id, col) in self.columns_of(table) {
                if ident_matches(column, &col.name, sensitive) {
                    found.push(id);
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ast::CaseMask;

    fn sample_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.add_schema(Schema::new("cat").with_tables(vec![
            Table::new("sources").with_columns(vec![
                Column::new("ra", DbType::new(DbTypeKind::Double)),
                Column::new("dec", DbType::new(DbTypeKind::Double)),
            ]),
            Table::new("Filters").with_columns(vec![Column::new(
                "band",
                DbType::sized(DbTypeKind::Varchar, 8),
            )]),
        ]));
        catalog
    }

    #[test]
    fn test_resolve_unqualified_table() {
        let catalog = sample_catalog();
        let id = catalog.resolve_table(&TablePath::bare("SOURCES"), None).unwrap();
        assert_eq!(catalog.table(id).name.as_str(), "sources");
    }

    #[test]
    fn test_case_sensitive_reference_must_match_verbatim() {
        let catalog = sample_catalog();
        let mut path = TablePath::bare("filters");
        path.case = CaseMask::new().with(IdentPart::Table, true);
        assert!(matches!(
            catalog.resolve_table(&path, None),
            Err(CheckError::UnresolvedTable { .. })
        ));

        path.table = "Filters".into();
        assert!(catalog.resolve_table(&path, None).is_ok());
    }

    #[test]
    fn test_search_columns_respects_scope() {
        let catalog = sample_catalog();
        let sources = catalog.resolve_table(&TablePath::bare("sources"), None).unwrap();
        let filters = catalog.resolve_table(&TablePath::bare("Filters"), None).unwrap();

        assert_eq!(catalog.search_columns("ra", false, &[sources]).len(), 1);
        assert_eq!(catalog.search_columns("ra", false, &[filters]).len(), 0);
        assert_eq!(
            catalog
                .search_columns("BAND", false, &[sources, filters])
                .len(),
            1
        );
    }

    #[test]
    fn test_type_compatibility() {
        let double = DbType::new(DbTypeKind::Double);
        let int = DbType::new(DbTypeKind::Integer);
        let varchar = DbType::sized(DbTypeKind::Varchar, 16);
        let unknown = DbType::new(DbTypeKind::Unknown);
        assert!(double.compatible_with(int));
        assert!(!double.compatible_with(varchar));
        assert!(unknown.compatible_with(varchar));
    }
}
