//! The dialect-independent half of SQL generation.
//!
//! [`translate`] is a pure function over the checked tree: it produces the
//! SQL text plus the list of catalog identifiers the text binds to, and
//! leaves the tree untouched.

use skyql_adql::ast::{
    ColumnBinding, ColumnExpr, Constraint, ConstraintClause, FromItem, IdentPart, InList,
    JoinCondition, NodeList, Operand, OrderItem, OrderTarget, Query, QueryExpr, SelectItem,
    SetOperation, TablePath, WithItem, ident_matches, is_geometry_predicate,
};
use skyql_adql::catalog::{Catalog, TableId};
use skyql_adql::feature::{FeatureSet, GeoFeature};

use crate::{LimitForm, SqlDialect, TranslateError};

/// Service-level knobs applied during translation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TranslateOptions {
    /// Service row cap. The emitted limit is `min(TOP, cap + 1)`: one row
    /// more than the cap, so the executor can detect an overflowing
    /// result and flag it truncated.
    pub row_cap: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundKind {
    Table,
    Column,
}

/// One catalog identifier the emitted SQL references.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundIdentifier {
    /// Published (query-side) qualified name.
    pub adql: String,
    /// Name as emitted in the SQL.
    pub sql: String,
    pub kind: BoundKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub sql: String,
    pub bound: Vec<BoundIdentifier>,
    /// The limit actually emitted on the outermost query, when any.
    pub effective_limit: Option<u64>,
}

/// Serialize `query` for `dialect`. The `features` set supplies declared
/// function definitions so their backend implementation names can be
/// substituted.
pub fn translate(
    query: &QueryExpr,
    dialect: &dyn SqlDialect,
    catalog: &Catalog,
    features: &FeatureSet,
    options: &TranslateOptions,
) -> Result<Translation, TranslateError> {
    let mut writer = SqlWriter {
        dialect,
        catalog,
        features,
        row_cap: options.row_cap,
        out: String::new(),
        bound: Vec::new(),
        effective_limit: None,
    };
    writer.write_query_expr(query, true)?;
    Ok(Translation {
        sql: writer.out,
        bound: writer.bound,
        effective_limit: writer.effective_limit,
    })
}

/// The growing SQL string plus everything dialect hooks need to append to
/// it.
pub struct SqlWriter<'a> {
    dialect: &'a dyn SqlDialect,
    catalog: &'a Catalog,
    features: &'a FeatureSet,
    row_cap: Option<u64>,
    out: String,
    bound: Vec<BoundIdentifier>,
    effective_limit: Option<u64>,
}

impl SqlWriter<'_> {
    pub fn push(&mut self, text: &str) {
        self.out.push_str(text);
    }

    pub fn push_char(&mut self, ch: char) {
        self.out.push(ch);
    }

    fn write_quoted(&mut self, name: &str) {
        let quote = self.dialect.quote_char();
        self.out.push(quote);
        for ch in name.chars() {
            if ch == quote {
                self.out.push(quote);
            }
            self.out.push(ch);
        }
        self.out.push(quote);
    }

    /// Emit an identifier part as written in the query: delimited parts
    /// are re-quoted verbatim with the dialect's quote character,
    /// undelimited ones are folded and left bare.
    pub fn write_ident(&mut self, name: &str, delimited: bool) {
        if delimited {
            self.write_quoted(name);
        } else {
            self.out.push_str(&self.dialect.fold(name));
        }
    }

    /// Emit a physical name from the catalog. Quoted exactly when it
    /// would not survive as a bare identifier.
    pub fn write_db_ident(&mut self, name: &str) {
        let plain = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if plain {
            self.out.push_str(name);
        } else {
            self.write_quoted(name);
        }
    }

    pub fn write_string_literal(&mut self, value: &str) {
        self.out.push('\'');
        for ch in value.chars() {
            if ch == '\'' {
                self.out.push('\'');
            }
            self.out.push(ch);
        }
        self.out.push('\'');
    }

    fn bind(&mut self, adql: String, sql: String, kind: BoundKind) {
        self.bound.push(BoundIdentifier { adql, sql, kind });
    }

    // ---- query level ------------------------------------------------

    fn write_query_expr(
        &mut self,
        query: &QueryExpr,
        outermost: bool,
    ) -> Result<(), TranslateError> {
        match query {
            QueryExpr::Select(q) => self.write_select_query(q, outermost),
            QueryExpr::Set(s) => self.write_set_operation(s, outermost),
        }
    }

    fn write_with(&mut self, with: &NodeList<WithItem>) -> Result<(), TranslateError> {
        if with.is_empty() {
            return Ok(());
        }
        self.push("WITH ");
        for (i, item) in with.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.write_ident(&item.name, item.name_sensitive);
            self.push(" AS (");
            self.write_query_expr(&item.query, false)?;
            self.push(")");
        }
        self.push(" ");
        Ok(())
    }

    fn write_select_query(&mut self, q: &Query, outermost: bool) -> Result<(), TranslateError> {
        self.write_with(&q.with)?;

        self.push("SELECT ");
        if q.select.distinct {
            self.push("DISTINCT ");
        }
        for (i, item) in q.select.items.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.write_select_item(item)?;
        }

        self.push(" FROM ");
        self.write_from_item(&q.from.root)?;

        if let Some(clause) = &q.where_clause {
            if !clause.is_empty() {
                self.push(" WHERE ");
                self.write_constraints(clause)?;
            }
        }
        if let Some(group) = &q.group_by {
            if !group.is_empty() {
                self.push(" GROUP BY ");
                for (i, operand) in group.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.write_operand(operand)?;
                }
            }
        }
        if let Some(clause) = &q.having {
            if !clause.is_empty() {
                self.push(" HAVING ");
                self.write_constraints(clause)?;
            }
        }
        if let Some(order) = &q.order_by {
            if !order.is_empty() {
                self.push(" ORDER BY ");
                for (i, item) in order.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.write_order_item(item);
                }
            }
        }

        let limit = if outermost {
            let effective = match (q.select.top, self.row_cap) {
                (Some(top), Some(cap)) => Some(top.min(cap + 1)),
                (Some(top), None) => Some(top),
                (None, Some(cap)) => Some(cap + 1),
                (None, None) => None,
            };
            self.effective_limit = effective;
            effective
        } else {
            q.select.top
        };
        self.write_limit_offset(limit, q.offset);
        Ok(())
    }

    fn write_set_operation(
        &mut self,
        s: &SetOperation,
        outermost: bool,
    ) -> Result<(), TranslateError> {
        self.write_with(&s.with)?;

        self.push("(");
        self.write_query_expr(&s.left, false)?;
        self.push(") ");
        self.push(match s.op {
            skyql_adql::ast::SetOp::Union => "UNION",
            skyql_adql::ast::SetOp::Intersect => "INTERSECT",
            skyql_adql::ast::SetOp::Except => "EXCEPT",
        });
        if s.all {
            self.push(" ALL");
        }
        self.push(" (");
        self.write_query_expr(&s.right, false)?;
        self.push(")");

        if let Some(order) = &s.order_by {
            if !order.is_empty() {
                self.push(" ORDER BY ");
                for (i, item) in order.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.write_order_item(item);
                }
            }
        }

        let limit = if outermost {
            let effective = self.row_cap.map(|cap| cap + 1);
            self.effective_limit = effective;
            effective
        } else {
            None
        };
        self.write_limit_offset(limit, s.offset);
        Ok(())
    }

    fn write_limit_offset(&mut self, limit: Option<u64>, offset: Option<u64>) {
        match self.dialect.limit_form() {
            LimitForm::Limit => {
                if let Some(limit) = limit {
                    self.push(&format!(" LIMIT {limit}"));
                }
                if let Some(offset) = offset {
                    self.push(&format!(" OFFSET {offset}"));
                }
            }
            LimitForm::FetchFirst => {
                if let Some(offset) = offset {
                    self.push(&format!(" OFFSET {offset} ROWS"));
                }
                if let Some(limit) = limit {
                    self.push(&format!(" FETCH FIRST {limit} ROWS ONLY"));
                }
            }
        }
    }

    fn write_order_item(&mut self, item: &OrderItem) {
        match &item.target {
            OrderTarget::Index(index) => self.push(&index.to_string()),
            OrderTarget::Name { name, sensitive } => self.write_ident(name, *sensitive),
        }
        if item.descending {
            self.push(" DESC");
        }
    }

    fn write_select_item(&mut self, item: &SelectItem) -> Result<(), TranslateError> {
        match item {
            SelectItem::Expr(expr) => {
                self.write_operand(&expr.operand)?;
                if let Some(alias) = &expr.alias {
                    self.push(" AS ");
                    self.write_ident(alias, expr.alias_sensitive);
                }
                Ok(())
            }
            SelectItem::AllColumns(all) => {
                if let Some(path) = &all.table {
                    self.write_table_qualifier(path, all.binding)?;
                    self.push(".");
                }
                self.push("*");
                Ok(())
            }
        }
    }

    // ---- FROM -------------------------------------------------------

    fn write_from_item(&mut self, item: &FromItem) -> Result<(), TranslateError> {
        match item {
            FromItem::Table(table) => {
                match table.binding {
                    Some(id) => self.write_base_table(id),
                    // A CTE reference keeps its written name.
                    None => self.write_ident(
                        &table.path.table,
                        table.path.case.is_sensitive(IdentPart::Table),
                    ),
                }
                if let Some(alias) = &table.alias {
                    self.push(" AS ");
                    self.write_ident(alias, table.path.case.is_sensitive(IdentPart::Alias));
                }
                Ok(())
            }
            FromItem::Join(join) => {
                self.write_from_item(&join.left)?;
                self.push_char(' ');
                self.push(join.kind.as_ref());
                self.push_char(' ');
                self.write_from_item(&join.right)?;
                match &join.condition {
                    JoinCondition::None => {}
                    JoinCondition::On(clause) => {
                        self.push(" ON ");
                        self.write_constraints(clause)?;
                    }
                    JoinCondition::Using(columns) => {
                        self.push(" USING (");
                        for (i, column) in columns.iter().enumerate() {
                            if i > 0 {
                                self.push(", ");
                            }
                            self.write_column(column)?;
                        }
                        self.push(")");
                    }
                }
                Ok(())
            }
            FromItem::SubQuery(sub) => {
                self.push("(");
                self.write_query_expr(&sub.query, false)?;
                self.push(") AS ");
                self.write_ident(&sub.alias, sub.alias_sensitive);
                Ok(())
            }
        }
    }

    fn write_base_table(&mut self, id: TableId) {
        let schema_name = self.catalog.schema_of(id).db_name().to_string();
        let table_name = self.catalog.table(id).db_name().to_string();
        let sql_start = self.out.len();
        self.write_db_ident(&schema_name);
        self.push(".");
        self.write_db_ident(&table_name);
        let sql = self.out[sql_start..].to_string();
        self.bind(self.catalog.qualified_table_name(id), sql, BoundKind::Table);
    }

    /// Emit the qualifier of a column (or `table.*`) reference: the alias
    /// or CTE name as written, or the physical name for a direct base
    /// table reference.
    fn write_table_qualifier(
        &mut self,
        path: &TablePath,
        binding: Option<TableId>,
    ) -> Result<(), TranslateError> {
        let sensitive = path.case.is_sensitive(IdentPart::Table);
        match binding {
            Some(id) => {
                let declared = self.catalog.table(id);
                if ident_matches(&path.table, &declared.name, sensitive) {
                    // Direct reference: swap in the physical name, with
                    // the schema qualifier when one was written.
                    let schema_name = self.catalog.schema_of(id).db_name().to_string();
                    let table_name = declared.db_name().to_string();
                    if path.schema.is_some() {
                        self.write_db_ident(&schema_name);
                        self.push(".");
                    }
                    self.write_db_ident(&table_name);
                } else {
                    // Alias: emit as written.
                    self.write_ident(&path.table, sensitive);
                }
                Ok(())
            }
            None => {
                self.write_ident(&path.table, sensitive);
                Ok(())
            }
        }
    }

    // ---- operands ---------------------------------------------------

    pub fn write_column(&mut self, column: &ColumnExpr) -> Result<(), TranslateError> {
        let sql_start = self.out.len();
        if let Some(table) = &column.path.table {
            let table_binding = match column.binding {
                Some(ColumnBinding::Base(id)) => Some(id.table),
                _ => None,
            };
            let mut path = TablePath::bare(table.clone());
            path.schema = column.path.schema.clone();
            path.case = column.path.case;
            self.write_table_qualifier(&path, table_binding)?;
            self.push(".");
        }
        match column.binding {
            Some(ColumnBinding::Base(id)) => {
                let db_name = self.catalog.column(id).db_name().to_string();
                self.write_db_ident(&db_name);
                let sql = self.out[sql_start..].to_string();
                self.bind(column.path.qualified_name(), sql, BoundKind::Column);
            }
            _ => {
                self.write_ident(
                    &column.path.column,
                    column.path.case.is_sensitive(IdentPart::Column),
                );
            }
        }
        Ok(())
    }

    pub fn write_operand(&mut self, operand: &Operand) -> Result<(), TranslateError> {
        match operand {
            Operand::Column(column) => self.write_column(column),
            Operand::Number(n) => {
                self.push(&n.text);
                Ok(())
            }
            Operand::Str(s) => {
                self.write_string_literal(&s.value);
                Ok(())
            }
            Operand::Binary(b) => {
                self.write_operand(&b.left)?;
                self.push(&format!(" {} ", b.op));
                self.write_operand(&b.right)
            }
            Operand::Concat(c) => {
                for (i, item) in c.items.iter().enumerate() {
                    if i > 0 {
                        self.push(" || ");
                    }
                    self.write_operand(item)?;
                }
                Ok(())
            }
            Operand::Negation(n) => {
                self.push("-");
                self.write_operand(&n.operand)
            }
            Operand::Function(call) => {
                if is_geometry_predicate(&call.name) {
                    let predicate =
                        GeoFeature::from_name(&call.name).expect("predicate names resolve");
                    if !self.dialect.supports_geometry(predicate) {
                        return Err(TranslateError::UnsupportedByDialect {
                            dialect: self.dialect.kind(),
                            feature: predicate.to_string(),
                        });
                    }
                    let dialect = self.dialect;
                    return dialect.write_geometry_predicate(self, predicate, &call.args);
                }
                let name = if call.udf {
                    // Prefer the overload the checker matched by arity.
                    let def = self
                        .features
                        .find_udfs(&call.name)
                        .find(|def| def.params.len() == call.args.len())
                        .or_else(|| self.features.find_udfs(&call.name).next());
                    def.and_then(|def| def.impl_ref.clone())
                        .unwrap_or_else(|| call.name.clone())
                } else {
                    call.name.clone()
                };
                self.push(&name);
                self.push("(");
                if call.distinct {
                    self.push("DISTINCT ");
                }
                if call.star {
                    self.push("*");
                } else {
                    for (i, arg) in call.args.iter().enumerate() {
                        if i > 0 {
                            self.push(", ");
                        }
                        self.write_operand(arg)?;
                    }
                }
                self.push(")");
                Ok(())
            }
            Operand::Geometry(geo) => {
                if !self.dialect.supports_geometry(geo.kind.into()) {
                    return Err(TranslateError::UnsupportedByDialect {
                        dialect: self.dialect.kind(),
                        feature: geo.kind.to_string(),
                    });
                }
                let dialect = self.dialect;
                dialect.write_geometry(self, geo)
            }
            Operand::Case(case) => {
                self.push("CASE");
                for branch in &case.branches {
                    self.push(" WHEN ");
                    self.write_constraints(&branch.when)?;
                    self.push(" THEN ");
                    self.write_operand(&branch.then)?;
                }
                if let Some(else_value) = &case.else_value {
                    self.push(" ELSE ");
                    self.write_operand(else_value)?;
                }
                self.push(" END");
                Ok(())
            }
            Operand::Cast(cast) => {
                self.push("CAST(");
                self.write_operand(&cast.operand)?;
                self.push(" AS ");
                self.push(&self.dialect.type_name(cast.target));
                self.push(")");
                Ok(())
            }
            Operand::Wrapped(w) => {
                self.push("(");
                self.write_operand(&w.operand)?;
                self.push(")");
                Ok(())
            }
        }
    }

    // ---- constraints ------------------------------------------------

    fn write_constraints(&mut self, clause: &ConstraintClause) -> Result<(), TranslateError> {
        for (i, constraint) in clause.iter().enumerate() {
            if i > 0 {
                let sep = clause.sep_before(i).expect("separator list in step");
                self.push_char(' ');
                self.push(sep.as_ref());
                self.push_char(' ');
            }
            self.write_constraint(constraint)?;
        }
        Ok(())
    }

    fn write_constraint(&mut self, constraint: &Constraint) -> Result<(), TranslateError> {
        match constraint {
            Constraint::Comparison(cmp) => {
                self.write_operand(&cmp.left)?;
                self.push(&format!(" {} ", cmp.op));
                self.write_operand(&cmp.right)
            }
            Constraint::Between(b) => {
                self.write_operand(&b.operand)?;
                if b.negated {
                    self.push(" NOT");
                }
                self.push(" BETWEEN ");
                self.write_operand(&b.low)?;
                self.push(" AND ");
                self.write_operand(&b.high)
            }
            Constraint::In(in_c) => {
                self.write_operand(&in_c.operand)?;
                if in_c.negated {
                    self.push(" NOT");
                }
                self.push(" IN (");
                match &in_c.list {
                    InList::Values(values) => {
                        for (i, value) in values.iter().enumerate() {
                            if i > 0 {
                                self.push(", ");
                            }
                            self.write_operand(value)?;
                        }
                    }
                    InList::Query(query) => self.write_query_expr(query, false)?,
                }
                self.push(")");
                Ok(())
            }
            Constraint::IsNull(n) => {
                self.write_operand(&n.operand)?;
                self.push(if n.negated { " IS NOT NULL" } else { " IS NULL" });
                Ok(())
            }
            Constraint::Like(like) => {
                self.write_operand(&like.operand)?;
                if like.negated {
                    self.push(" NOT");
                }
                self.push(" LIKE ");
                self.write_operand(&like.pattern)
            }
            Constraint::Exists(e) => {
                self.push("EXISTS(");
                self.write_query_expr(&e.query, false)?;
                self.push(")");
                Ok(())
            }
            Constraint::Group(group) => {
                self.push("(");
                self.write_constraints(group)?;
                self.push(")");
                Ok(())
            }
            Constraint::Not(not) => {
                self.push("NOT ");
                self.write_constraint(&not.constraint)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use skyql_adql::catalog::{Column, DbType, DbTypeKind, Schema, Table};
    use skyql_adql::feature::{FunctionDef, FunctionParam};
    use skyql_adql::{check, parse};

    use super::*;
    use crate::{AnsiDialect, DialectKind, MySqlDialect, PostgresDialect};

    fn fixture_catalog() -> Catalog {
        let double = DbType::new(DbTypeKind::Double);
        let mut catalog = Catalog::new();
        catalog.add_schema(Schema::new("cat").with_tables(vec![Table::new("sources")
            .with_columns(vec![
                Column::new("id", DbType::new(DbTypeKind::Bigint)),
                Column::new("ra", double),
                Column::new("dec", double),
                Column::new("mag", double),
            ])]));
        catalog
    }

    fn translate_with(
        text: &str,
        dialect: &dyn SqlDialect,
        options: &TranslateOptions,
    ) -> Result<Translation, TranslateError> {
        let catalog = fixture_catalog();
        let features = skyql_adql::feature::FeatureSet::permissive();
        let mut query = parse(text).expect("fixture query parses");
        check(&mut query, &catalog, &features).expect("fixture query checks");
        translate(&query, dialect, &catalog, &features, options)
    }

    fn postgres_sql(text: &str) -> String {
        translate_with(text, &PostgresDialect::with_pgsphere(), &TranslateOptions::default())
            .expect("translates")
            .sql
    }

    #[test]
    fn test_cone_search_on_postgres() {
        let translation = translate_with(
            "SELECT TOP 10 ra, dec FROM cat.sources \
             WHERE CONTAINS(POINT('ICRS', ra, dec), CIRCLE('ICRS', 10.0, 20.0, 0.5)) = 1 \
             ORDER BY 1 DESC OFFSET 5",
            &PostgresDialect::with_pgsphere(),
            &TranslateOptions::default(),
        )
        .unwrap();

        assert!(translation.sql.contains("LIMIT 10"), "{}", translation.sql);
        assert!(translation.sql.contains("OFFSET 5"), "{}", translation.sql);
        assert!(translation.sql.contains("spoint(radians(ra),radians(dec))"));
        assert!(translation.sql.contains("scircle("));
        assert!(translation.sql.contains("<@"));
        assert!(translation.sql.contains("= 1"));
        assert_eq!(translation.effective_limit, Some(10));
        assert!(translation
            .bound
            .iter()
            .any(|b| b.kind == BoundKind::Table && b.adql == "cat.sources"));
    }

    #[test]
    fn test_row_cap_probes_one_extra_row() {
        let options = TranslateOptions { row_cap: Some(100) };
        let dialect = PostgresDialect::new();

        let translation =
            translate_with("SELECT ra FROM cat.sources", &dialect, &options).unwrap();
        assert!(translation.sql.ends_with("LIMIT 101"), "{}", translation.sql);
        assert_eq!(translation.effective_limit, Some(101));

        // TOP below the cap wins.
        let translation =
            translate_with("SELECT TOP 7 ra FROM cat.sources", &dialect, &options).unwrap();
        assert_eq!(translation.effective_limit, Some(7));

        // TOP above the cap is clamped to cap + 1.
        let translation =
            translate_with("SELECT TOP 4000 ra FROM cat.sources", &dialect, &options).unwrap();
        assert_eq!(translation.effective_limit, Some(101));
    }

    #[test]
    fn test_ansi_uses_fetch_first() {
        let translation = translate_with(
            "SELECT TOP 3 ra FROM cat.sources OFFSET 4",
            &AnsiDialect,
            &TranslateOptions::default(),
        )
        .unwrap();
        assert!(
            translation.sql.ends_with("OFFSET 4 ROWS FETCH FIRST 3 ROWS ONLY"),
            "{}",
            translation.sql
        );
    }

    #[test]
    fn test_geometry_unsupported_without_pgsphere() {
        let err = translate_with(
            "SELECT POINT('ICRS', ra, dec) FROM cat.sources",
            &PostgresDialect::new(),
            &TranslateOptions::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            TranslateError::UnsupportedByDialect {
                dialect: DialectKind::Postgres,
                feature: "POINT".to_string(),
            }
        );

        let err = translate_with(
            "SELECT DISTANCE(POINT('ICRS', ra, dec), POINT('ICRS', 1, 2)) FROM cat.sources",
            &MySqlDialect,
            &TranslateOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TranslateError::UnsupportedByDialect { .. }));
    }

    #[test]
    fn test_polygon_requires_constant_vertices() {
        let sql = postgres_sql("SELECT POLYGON('ICRS', 1, 2, 3, 4, 5, 6) FROM cat.sources");
        assert!(sql.contains("spoly '{(1d,2d),(3d,4d),(5d,6d)}'"), "{sql}");

        let err = translate_with(
            "SELECT POLYGON('ICRS', ra, 2, 3, 4, 5, 6) FROM cat.sources",
            &PostgresDialect::with_pgsphere(),
            &TranslateOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TranslateError::InvalidLiteral { .. }));
    }

    #[test]
    fn test_geometry_helpers() {
        let sql = postgres_sql("SELECT DISTANCE(POINT('ICRS', ra, dec), POINT('ICRS', 1, 2)) FROM cat.sources");
        assert!(sql.contains("degrees(("), "{sql}");
        assert!(sql.contains("<->"), "{sql}");

        let sql = postgres_sql("SELECT AREA(CIRCLE('ICRS', 1, 2, 3)) FROM cat.sources");
        assert!(sql.contains("degrees(degrees(area("), "{sql}");

        let sql = postgres_sql("SELECT COORD1(POINT('ICRS', ra, dec)) FROM cat.sources");
        assert!(sql.contains("degrees(long("), "{sql}");
    }

    #[test]
    fn test_quoted_identifiers_requote_with_dialect_char() {
        let mut catalog = Catalog::new();
        catalog.add_schema(Schema::new("cat").with_tables(vec![Table::new("Sources")
            .with_columns(vec![Column::new(
                "RaJ2000",
                DbType::new(DbTypeKind::Double),
            )])]));
        let features = skyql_adql::feature::FeatureSet::permissive();

        let mut query = parse("SELECT \"RaJ2000\" FROM \"Sources\"").unwrap();
        check(&mut query, &catalog, &features).unwrap();

        let translation = translate(
            &query,
            &PostgresDialect::new(),
            &catalog,
            &features,
            &TranslateOptions::default(),
        )
        .unwrap();
        assert!(translation.sql.contains("\"RaJ2000\""), "{}", translation.sql);
        assert!(translation.sql.contains("cat.\"Sources\""), "{}", translation.sql);

        let translation = translate(
            &query,
            &MySqlDialect,
            &catalog,
            &features,
            &TranslateOptions::default(),
        )
        .unwrap();
        assert!(translation.sql.contains("`RaJ2000`"), "{}", translation.sql);
    }

    #[test]
    fn test_physical_names_are_substituted() {
        let mut catalog = Catalog::new();
        let mut table = Table::new("sources");
        table.db_name = Some("smc_sources".into());
        let mut column = Column::new("ra", DbType::new(DbTypeKind::Double));
        column.db_name = Some("ra_j2000".into());
        table.columns = vec![column];
        catalog.add_schema(Schema::new("cat").with_tables(vec![table]));
        let features = skyql_adql::feature::FeatureSet::permissive();

        let mut query = parse("SELECT sources.ra FROM sources").unwrap();
        check(&mut query, &catalog, &features).unwrap();
        let translation = translate(
            &query,
            &PostgresDialect::new(),
            &catalog,
            &features,
            &TranslateOptions::default(),
        )
        .unwrap();
        assert!(
            translation.sql.contains("smc_sources.ra_j2000"),
            "{}",
            translation.sql
        );
        assert!(translation.sql.contains("FROM cat.smc_sources"));
        let column_binding = translation
            .bound
            .iter()
            .find(|b| b.kind == BoundKind::Column)
            .unwrap();
        assert_eq!(column_binding.adql, "sources.ra");
        assert_eq!(column_binding.sql, "smc_sources.ra_j2000");
    }

    #[test]
    fn test_udf_impl_ref_substitution() {
        let catalog = fixture_catalog();
        let features = skyql_adql::feature::FeatureSet::permissive().with_udf(
            FunctionDef::new(
                "gaia_healpix",
                vec![FunctionParam {
                    name: "order".into(),
                    dtype: DbType::new(DbTypeKind::Integer),
                }],
                DbType::new(DbTypeKind::Bigint),
            )
            .with_impl_ref("healpix_nest"),
        );

        let mut query = parse("SELECT gaia_healpix(8) FROM cat.sources").unwrap();
        check(&mut query, &catalog, &features).unwrap();
        let translation = translate(
            &query,
            &PostgresDialect::new(),
            &catalog,
            &features,
            &TranslateOptions::default(),
        )
        .unwrap();
        assert!(translation.sql.contains("healpix_nest(8)"), "{}", translation.sql);
    }

    #[test]
    fn test_set_operation_translation() {
        let translation = translate_with(
            "SELECT ra FROM cat.sources UNION ALL SELECT dec FROM cat.sources",
            &PostgresDialect::new(),
            &TranslateOptions { row_cap: Some(10) },
        )
        .unwrap();
        assert!(translation.sql.contains("UNION ALL"), "{}", translation.sql);
        assert!(translation.sql.ends_with("LIMIT 11"), "{}", translation.sql);
    }

    #[test]
    fn test_translation_does_not_mutate_the_tree() {
        let catalog = fixture_catalog();
        let features = skyql_adql::feature::FeatureSet::permissive();
        let mut query = parse("SELECT TOP 5 ra FROM cat.sources WHERE mag < 20").unwrap();
        check(&mut query, &catalog, &features).unwrap();
        let snapshot = query.clone();
        translate(
            &query,
            &PostgresDialect::new(),
            &catalog,
            &features,
            &TranslateOptions { row_cap: Some(3) },
        )
        .unwrap();
        assert_eq!(snapshot, query);
    }
}
