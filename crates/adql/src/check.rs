//! Post-parse validation: resolves every identifier against the catalog,
//! enforces the service's feature allow-lists, and infers the result
//! columns of the query.
//!
//! The pass mutates the tree only by annotation (column/table bindings,
//! declared-function return types); it never restructures it, so checking
//! an already-checked tree is a no-op that reproduces the same
//! annotations.

use smol_str::SmolStr;

use crate::ast::query::{SelectAll, SelectExpr};
use crate::ast::{
    AdqlNode, ColumnBinding, ColumnExpr, Constraint, ConstraintClause, FromItem, FunctionCall,
    GeometryKind, IdentPart, InList, JoinCondition, NodeList, Operand, OrderItem, OrderTarget,
    Query, QueryExpr, SelectItem, SetOperation, TablePath, ident_matches, is_geometry_predicate,
};
use crate::catalog::{Catalog, DbType, DbTypeKind, OutputColumn, TableId};
use crate::errors::CheckError;
use crate::feature::{FeatureSet, FunctionDef, GeoFeature};
use crate::render::ToAdql;
use crate::span::Span;

/// Resolve and validate `query` against `catalog` and `features`,
/// returning the inferred result columns.
pub fn check(
    query: &mut QueryExpr,
    catalog: &Catalog,
    features: &FeatureSet,
) -> Result<Vec<OutputColumn>, CheckError> {
    let checker = Checker { catalog, features };
    let mut stack = Vec::new();
    checker.check_query(query, &mut stack)
}

/// What a name in `FROM` scope resolves to.
#[derive(Debug, Clone)]
enum ScopeSource {
    Base(TableId),
    Derived(Vec<OutputColumn>),
}

#[derive(Debug, Clone)]
struct ScopeTable {
    /// The name columns may qualify this table by: the alias when one was
    /// given, the declared table name otherwise.
    name: SmolStr,
    /// Declared schema, for schema-qualified references. `None` when the
    /// table is aliased: an alias replaces the table's identity.
    schema: Option<SmolStr>,
    source: ScopeSource,
}

#[derive(Debug, Clone)]
struct CteDef {
    name: SmolStr,
    sensitive: bool,
    columns: Vec<OutputColumn>,
}

#[derive(Debug, Default)]
struct Scope {
    tables: Vec<ScopeTable>,
    ctes: Vec<CteDef>,
}

struct Checker<'a> {
    catalog: &'a Catalog,
    features: &'a FeatureSet,
}

impl Checker<'_> {
    fn check_query(
        &self,
        query: &mut QueryExpr,
        stack: &mut Vec<Scope>,
    ) -> Result<Vec<OutputColumn>, CheckError> {
        stack.push(Scope::default());
        let result = self.check_query_in_scope(query, stack);
        stack.pop();
        result
    }

    fn check_query_in_scope(
        &self,
        query: &mut QueryExpr,
        stack: &mut Vec<Scope>,
    ) -> Result<Vec<OutputColumn>, CheckError> {
        match query {
            QueryExpr::Select(q) => self.check_select_query(q, stack),
            QueryExpr::Set(s) => self.check_set_operation(s, stack),
        }
    }

    fn check_with_list(
        &self,
        with: &mut NodeList<crate::ast::WithItem>,
        stack: &mut Vec<Scope>,
    ) -> Result<(), CheckError> {
        for item in with.iter_mut() {
            let columns = self.check_query(&mut item.query, stack)?;
            let cte = CteDef {
                name: item.name.clone(),
                sensitive: item.name_sensitive,
                columns,
            };
            stack.last_mut().expect("scope pushed").ctes.push(cte);
        }
        Ok(())
    }

    fn check_select_query(
        &self,
        q: &mut Query,
        stack: &mut Vec<Scope>,
    ) -> Result<Vec<OutputColumn>, CheckError> {
        self.check_with_list(&mut q.with, stack)?;
        self.resolve_from(&mut q.from.root, stack)?;

        if let Some(clause) = &mut q.where_clause {
            self.resolve_constraint_clause(clause, stack)?;
        }
        if let Some(group) = &mut q.group_by {
            for operand in group.iter_mut() {
                self.resolve_operand(operand, stack)?;
            }
        }
        if let Some(clause) = &mut q.having {
            self.resolve_constraint_clause(clause, stack)?;
        }

        let output = self.infer_select_columns(&mut q.select.items, stack)?;

        if let Some(order) = &q.order_by {
            self.check_order_by(order, &q.select.items, &output, stack)?;
        }

        Ok(output)
    }

    fn check_set_operation(
        &self,
        s: &mut SetOperation,
        stack: &mut Vec<Scope>,
    ) -> Result<Vec<OutputColumn>, CheckError> {
        self.check_with_list(&mut s.with, stack)?;
        let left = self.check_query(&mut s.left, stack)?;
        let _right = self.check_query(&mut s.right, stack)?;

        if let Some(order) = &s.order_by {
            for item in order {
                match &item.target {
                    OrderTarget::Index(index) => {
                        let index = *index;
                        if index as usize > left.len() {
                            return Err(CheckError::AmbiguousOrderPosition {
                                index,
                                select_items: left.len(),
                                pos: item.span(),
                            });
                        }
                    }
                    OrderTarget::Name { name, sensitive } => {
                        let found = left
                            .iter()
                            .any(|col| ident_matches(name, &col.name, *sensitive));
                        if !found {
                            return Err(CheckError::UnresolvedColumn {
                                name: name.to_string(),
                                pos: item.span(),
                            });
                        }
                    }
                }
            }
        }

        Ok(left)
    }

    // ---- FROM -------------------------------------------------------

    fn resolve_from(&self, item: &mut FromItem, stack: &mut Vec<Scope>) -> Result<(), CheckError> {
        match item {
            FromItem::Table(table) => {
                // A plain, unqualified name may refer to a CTE of this or
                // an enclosing query.
                if table.path.schema.is_none() {
                    let sensitive = table.path.case.is_sensitive(IdentPart::Table);
                    let cte = stack.iter().rev().find_map(|scope| {
                        scope.ctes.iter().find(|cte| {
                            ident_matches(&table.path.table, &cte.name, sensitive || cte.sensitive)
                        })
                    });
                    if let Some(cte) = cte {
                        let entry = ScopeTable {
                            name: table
                                .alias
                                .clone()
                                .unwrap_or_else(|| table.path.table.clone()),
                            schema: None,
                            source: ScopeSource::Derived(cte.columns.clone()),
                        };
                        table.binding = None;
                        stack.last_mut().expect("scope pushed").tables.push(entry);
                        return Ok(());
                    }
                }

                let id = self.catalog.resolve_table(&table.path, table.span)?;
                table.binding = Some(id);
                let declared = self.catalog.table(id);
                let entry = match &table.alias {
                    Some(alias) => ScopeTable {
                        name: alias.clone(),
                        schema: None,
                        source: ScopeSource::Base(id),
                    },
                    None => ScopeTable {
                        name: declared.name.clone(),
                        schema: Some(self.catalog.schema_of(id).name.clone()),
                        source: ScopeSource::Base(id),
                    },
                };
                stack.last_mut().expect("scope pushed").tables.push(entry);
                Ok(())
            }
            FromItem::Join(join) => {
                self.resolve_from(&mut join.left, stack)?;
                self.resolve_from(&mut join.right, stack)?;
                match &mut join.condition {
                    JoinCondition::None => {}
                    JoinCondition::On(clause) => {
                        self.resolve_constraint_clause(clause, stack)?;
                    }
                    JoinCondition::Using(columns) => {
                        for column in columns.iter_mut() {
                            self.resolve_column(column, stack)?;
                        }
                    }
                }
                Ok(())
            }
            FromItem::SubQuery(sub) => {
                let columns = self.check_query(&mut sub.query, stack)?;
                let entry = ScopeTable {
                    name: sub.alias.clone(),
                    schema: None,
                    source: ScopeSource::Derived(columns),
                };
                stack.last_mut().expect("scope pushed").tables.push(entry);
                Ok(())
            }
        }
    }

    // ---- columns ----------------------------------------------------

    /// Whether a scope table can be designated by the qualifier parts of
    /// `path`.
    fn table_matches(entry: &ScopeTable, path: &ColumnPathParts<'_>) -> bool {
        if let Some((table, sensitive)) = path.table {
            if !ident_matches(table, &entry.name, sensitive) {
                return false;
            }
        }
        if let Some((schema, sensitive)) = path.schema {
            match &entry.schema {
                Some(declared) => {
                    if !ident_matches(schema, declared, sensitive) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }

    fn resolve_column(
        &self,
        column: &mut ColumnExpr,
        stack: &mut Vec<Scope>,
    ) -> Result<(), CheckError> {
        // No catalog level is declared.
        if column.path.catalog.is_some() {
            return Err(CheckError::UnresolvedColumn {
                name: column.path.qualified_name(),
                pos: column.span,
            });
        }

        let parts = ColumnPathParts {
            schema: column
                .path
                .schema
                .as_deref()
                .map(|s| (s, column.path.case.is_sensitive(IdentPart::Schema))),
            table: column
                .path
                .table
                .as_deref()
                .map(|t| (t, column.path.case.is_sensitive(IdentPart::Table))),
        };
        let name = column.path.column.as_str();
        let sensitive = column.path.case.is_sensitive(IdentPart::Column);

        let mut qualifier_matched = parts.table.is_none();
        for scope in stack.iter().rev() {
            let mut candidates: Vec<ColumnBinding> = Vec::new();
            let mut candidate_names = Vec::new();
            for entry in &scope.tables {
                if !Self::table_matches(entry, &parts) {
                    continue;
                }
                qualifier_matched = true;
                match &entry.source {
                    ScopeSource::Base(id) => {
                        for found in self.catalog.search_columns(name, sensitive, &[*id]) {
                            candidates.push(ColumnBinding::Base(found));
                            candidate_names.push(format!(
                                "{}.{}",
                                entry.name,
                                self.catalog.column(found).name
                            ));
                        }
                    }
                    ScopeSource::Derived(columns) => {
                        for col in columns {
                            if ident_matches(name, &col.name, sensitive) {
                                candidates.push(ColumnBinding::Derived { dtype: col.dtype });
                                candidate_names.push(format!("{}.{}", entry.name, col.name));
                            }
                        }
                    }
                }
            }
            match candidates.len() {
                0 => continue,
                1 => {
                    column.binding = Some(candidates[0]);
                    return Ok(());
                }
                _ => {
                    return Err(CheckError::AmbiguousColumn {
                        name: column.path.qualified_name(),
                        candidates: candidate_names,
                        pos: column.span,
                    });
                }
            }
        }

        if !qualifier_matched {
            let table = column.path.table.clone().unwrap_or_default();
            let mut path = TablePath::bare(table);
            path.schema = column.path.schema.clone();
            path.case = column.path.case;
            return Err(CheckError::UnresolvedTable {
                name: path.qualified_name(),
                pos: column.span,
            });
        }
        Err(CheckError::UnresolvedColumn {
            name: column.path.qualified_name(),
            pos: column.span,
        })
    }

    // ---- operands and constraints ------------------------------------

    fn resolve_constraint_clause(
        &self,
        clause: &mut ConstraintClause,
        stack: &mut Vec<Scope>,
    ) -> Result<(), CheckError> {
        for constraint in clause.iter_mut() {
            self.resolve_constraint(constraint, stack)?;
        }
        Ok(())
    }

    fn resolve_constraint(
        &self,
        constraint: &mut Constraint,
        stack: &mut Vec<Scope>,
    ) -> Result<(), CheckError> {
        match constraint {
            Constraint::Comparison(cmp) => {
                self.resolve_operand(&mut cmp.left, stack)?;
                self.resolve_operand(&mut cmp.right, stack)
            }
            Constraint::Between(b) => {
                self.resolve_operand(&mut b.operand, stack)?;
                self.resolve_operand(&mut b.low, stack)?;
                self.resolve_operand(&mut b.high, stack)
            }
            Constraint::In(in_c) => {
                self.resolve_operand(&mut in_c.operand, stack)?;
                match &mut in_c.list {
                    InList::Values(values) => {
                        for value in values.iter_mut() {
                            self.resolve_operand(value, stack)?;
                        }
                        Ok(())
                    }
                    InList::Query(query) => self.check_query(query, stack).map(|_| ()),
                }
            }
            Constraint::IsNull(n) => self.resolve_operand(&mut n.operand, stack),
            Constraint::Like(like) => {
                self.resolve_operand(&mut like.operand, stack)?;
                self.resolve_operand(&mut like.pattern, stack)
            }
            Constraint::Exists(e) => self.check_query(&mut e.query, stack).map(|_| ()),
            Constraint::Group(group) => self.resolve_constraint_clause(group, stack),
            Constraint::Not(not) => self.resolve_constraint(&mut not.constraint, stack),
        }
    }

    fn resolve_operand(
        &self,
        operand: &mut Operand,
        stack: &mut Vec<Scope>,
    ) -> Result<(), CheckError> {
        match operand {
            Operand::Column(column) => self.resolve_column(column, stack),
            Operand::Number(_) | Operand::Str(_) => Ok(()),
            Operand::Binary(b) => {
                self.resolve_operand(&mut b.left, stack)?;
                self.resolve_operand(&mut b.right, stack)
            }
            Operand::Concat(c) => {
                for item in c.items.iter_mut() {
                    self.resolve_operand(item, stack)?;
                }
                Ok(())
            }
            Operand::Negation(n) => self.resolve_operand(&mut n.operand, stack),
            Operand::Function(_) => self.resolve_function(operand, stack),
            Operand::Geometry(_) => self.resolve_geometry(operand, stack),
            Operand::Case(case) => {
                for branch in &mut case.branches {
                    self.resolve_constraint_clause(&mut branch.when, stack)?;
                    self.resolve_operand(&mut branch.then, stack)?;
                }
                if let Some(else_value) = &mut case.else_value {
                    self.resolve_operand(else_value, stack)?;
                }
                Ok(())
            }
            Operand::Cast(cast) => self.resolve_operand(&mut cast.operand, stack),
            Operand::Wrapped(w) => self.resolve_operand(&mut w.operand, stack),
        }
    }

    fn resolve_function(
        &self,
        operand: &mut Operand,
        stack: &mut Vec<Scope>,
    ) -> Result<(), CheckError> {
        let Operand::Function(call) = operand else {
            unreachable!("caller matched the variant");
        };
        for arg in call.args.iter_mut() {
            self.resolve_operand(arg, stack)?;
        }

        if is_geometry_predicate(&call.name) {
            return self.check_geometry_predicate(call);
        }
        if !call.udf {
            return Ok(());
        }

        let matching: Vec<&FunctionDef> = self.features.find_udfs(&call.name).collect();
        if matching.is_empty() {
            return Err(CheckError::UnknownFunction {
                signature: format!("{}({} argument(s))", call.name, call.args.len()),
                pos: call.span,
            });
        }

        let arg_types: Vec<DbType> = call
            .args
            .iter()
            .map(|arg| self.infer_type(arg))
            .collect();

        let by_arity: Vec<&FunctionDef> = matching
            .iter()
            .copied()
            .filter(|def| def.params.len() == call.args.len())
            .collect();
        if by_arity.is_empty() {
            let expected = matching
                .iter()
                .map(|def| def.params.len().to_string())
                .collect::<Vec<_>>()
                .join(" or ");
            return Err(CheckError::ArityMismatch {
                function: call.name.to_string(),
                expected,
                found: call.args.len(),
                pos: call.span,
            });
        }

        for def in &by_arity {
            let compatible = def
                .params
                .iter()
                .zip(&arg_types)
                .all(|(param, arg)| param.dtype.compatible_with(*arg));
            if compatible {
                call.resolved_type = Some(def.return_type);
                return Ok(());
            }
        }

        // Report the first incompatible parameter of the first candidate.
        let def = by_arity[0];
        let (param, arg) = def
            .params
            .iter()
            .zip(&arg_types)
            .find(|(param, arg)| !param.dtype.compatible_with(**arg))
            .expect("at least one parameter is incompatible");
        Err(CheckError::TypeMismatch {
            function: call.name.to_string(),
            param: param.name.to_string(),
            expected: param.dtype.to_string(),
            found: arg.to_string(),
            pos: call.span,
        })
    }

    /// `CONTAINS`/`INTERSECTS`: plain function calls, but granted through
    /// the geometry allow-list and constrained to geometry arguments.
    fn check_geometry_predicate(&self, call: &FunctionCall) -> Result<(), CheckError> {
        let name = call.name.to_ascii_uppercase();
        let feature = GeoFeature::from_name(&name).expect("predicate names resolve");
        if !self.features.geometry_allowed(feature) {
            return Err(CheckError::FeatureForbidden {
                feature: name,
                pos: call.span,
            });
        }
        for (i, arg) in call.args.iter().enumerate() {
            let dtype = self.infer_type(arg);
            if !dtype.kind.is_geometry() {
                return Err(CheckError::TypeMismatch {
                    function: name,
                    param: format!("region{}", i + 1),
                    expected: "a geometry".to_string(),
                    found: dtype.to_string(),
                    pos: call.span,
                });
            }
        }
        Ok(())
    }

    fn resolve_geometry(
        &self,
        operand: &mut Operand,
        stack: &mut Vec<Scope>,
    ) -> Result<(), CheckError> {
        let Operand::Geometry(geo) = operand else {
            unreachable!("caller matched the variant");
        };

        if !self.features.geometry_allowed(geo.kind.into()) {
            return Err(CheckError::FeatureForbidden {
                feature: geo.kind.to_string(),
                pos: geo.span,
            });
        }

        for arg in geo.args.iter_mut() {
            self.resolve_operand(arg, stack)?;
        }

        self.check_geometry_args(geo.kind, &geo.args, geo.span)
    }

    fn check_geometry_args(
        &self,
        kind: GeometryKind,
        args: &NodeList<Operand>,
        span: Option<Span>,
    ) -> Result<(), CheckError> {
        let type_error = |param: &str, expected: &str, found: DbType| {
            Err(CheckError::TypeMismatch {
                function: kind.to_string(),
                param: param.to_string(),
                expected: expected.to_string(),
                found: found.to_string(),
                pos: span,
            })
        };

        match kind {
            GeometryKind::Point | GeometryKind::Circle | GeometryKind::Box
            | GeometryKind::Polygon => {
                // The optional leading coordinate-system argument is a
                // string; every coordinate after it must be numeric. A
                // polygon has pairs of coordinates, so an odd count means
                // the coordinate system is present.
                let has_coosys = match kind {
                    GeometryKind::Polygon => args.len() % 2 == 1,
                    _ => {
                        let (min, _) = kind.arity();
                        args.len() > min
                    }
                };
                for (i, arg) in args.iter().enumerate() {
                    let dtype = self.infer_type(arg);
                    if i == 0 && has_coosys {
                        if !dtype.kind.is_string() {
                            return type_error("coosys", "a string", dtype);
                        }
                        continue;
                    }
                    if !dtype.kind.is_numeric() {
                        return type_error(&format!("coord{i}"), "a numeric", dtype);
                    }
                }
                Ok(())
            }
            GeometryKind::Distance => {
                match args.len() {
                    2 => {
                        for (i, arg) in args.iter().enumerate() {
                            let dtype = self.infer_type(arg);
                            if dtype.kind != DbTypeKind::Point && !dtype.kind.is_unknown() {
                                return type_error(&format!("point{}", i + 1), "a point", dtype);
                            }
                        }
                        Ok(())
                    }
                    4 => {
                        for (i, arg) in args.iter().enumerate() {
                            let dtype = self.infer_type(arg);
                            if !dtype.kind.is_numeric() {
                                return type_error(&format!("coord{i}"), "a numeric", dtype);
                            }
                        }
                        Ok(())
                    }
                    n => Err(CheckError::ArityMismatch {
                        function: kind.to_string(),
                        expected: "2 or 4".to_string(),
                        found: n,
                        pos: span,
                    }),
                }
            }
            GeometryKind::Centroid | GeometryKind::Area => {
                let dtype = self.infer_type(args.get(0).expect("arity checked at parse"));
                if !dtype.kind.is_geometry() {
                    return type_error("region", "a geometry", dtype);
                }
                Ok(())
            }
            GeometryKind::Coord1 | GeometryKind::Coord2 => {
                let dtype = self.infer_type(args.get(0).expect("arity checked at parse"));
                if dtype.kind != DbTypeKind::Point && !dtype.kind.is_unknown() {
                    return type_error("point", "a point", dtype);
                }
                Ok(())
            }
            GeometryKind::CoordSys | GeometryKind::Region => {
                let dtype = self.infer_type(args.get(0).expect("arity checked at parse"));
                match kind {
                    GeometryKind::Region if !dtype.kind.is_string() => {
                        type_error("region", "a string", dtype)
                    }
                    GeometryKind::CoordSys
                        if dtype.kind != DbTypeKind::Point
                            && dtype.kind != DbTypeKind::Region
                            && !dtype.kind.is_unknown() =>
                    {
                        type_error("geometry", "a geometry", dtype)
                    }
                    _ => Ok(()),
                }
            }
        }
    }

    // ---- result columns ---------------------------------------------

    fn infer_select_columns(
        &self,
        items: &mut NodeList<SelectItem>,
        stack: &mut Vec<Scope>,
    ) -> Result<Vec<OutputColumn>, CheckError> {
        let mut output = Vec::new();
        for i in 0..items.len() {
            let item = items.get_mut(i).expect("index in range");
            match item {
                SelectItem::AllColumns(all) => {
                    self.expand_all_columns(all, stack, &mut output)?;
                }
                SelectItem::Expr(expr) => {
                    self.resolve_operand(&mut expr.operand, stack)?;
                    output.push(self.output_column_for(expr));
                }
            }
        }
        Ok(output)
    }

    fn expand_all_columns(
        &self,
        all: &mut SelectAll,
        stack: &[Scope],
        output: &mut Vec<OutputColumn>,
    ) -> Result<(), CheckError> {
        let scope = stack.last().expect("scope pushed");
        let expand = |entry: &ScopeTable, output: &mut Vec<OutputColumn>| match &entry.source {
            ScopeSource::Base(id) => {
                for (col_id, col) in self.catalog.columns_of(*id) {
                    output.push(OutputColumn {
                        name: col.name.clone(),
                        dtype: col.dtype,
                        source: Some(col_id),
                    });
                }
            }
            ScopeSource::Derived(columns) => output.extend(columns.iter().cloned()),
        };

        match &all.table {
            None => {
                for entry in &scope.tables {
                    expand(entry, output);
                }
                Ok(())
            }
            Some(path) => {
                let parts = ColumnPathParts {
                    schema: path
                        .schema
                        .as_deref()
                        .map(|s| (s, path.case.is_sensitive(IdentPart::Schema))),
                    table: Some((
                        path.table.as_str(),
                        path.case.is_sensitive(IdentPart::Table),
                    )),
                };
                let matches: Vec<&ScopeTable> = scope
                    .tables
                    .iter()
                    .filter(|entry| Self::table_matches(entry, &parts))
                    .collect();
                match matches.len() {
                    0 => Err(CheckError::UnresolvedTable {
                        name: path.qualified_name(),
                        pos: all.span,
                    }),
                    1 => {
                        let entry = matches[0];
                        all.binding = match &entry.source {
                            ScopeSource::Base(id) => Some(*id),
                            ScopeSource::Derived(_) => None,
                        };
                        expand(entry, output);
                        Ok(())
                    }
                    _ => Err(CheckError::AmbiguousTable {
                        name: path.qualified_name(),
                        candidates: matches.iter().map(|e| e.name.to_string()).collect(),
                        pos: all.span,
                    }),
                }
            }
        }
    }

    fn output_column_for(&self, expr: &SelectExpr) -> OutputColumn {
        let dtype = self.infer_type(&expr.operand);
        let source = match &expr.operand {
            Operand::Column(column) => match column.binding {
                Some(ColumnBinding::Base(id)) => Some(id),
                _ => None,
            },
            _ => None,
        };
        let name: SmolStr = match &expr.alias {
            Some(alias) => alias.clone(),
            None => match &expr.operand {
                Operand::Column(column) => column.path.column.clone(),
                other => other.to_adql().into(),
            },
        };
        OutputColumn {
            name,
            dtype,
            source,
        }
    }

    // ---- ORDER BY ---------------------------------------------------

    fn check_order_by(
        &self,
        order: &NodeList<OrderItem>,
        select_items: &NodeList<SelectItem>,
        output: &[OutputColumn],
        stack: &[Scope],
    ) -> Result<(), CheckError> {
        for item in order {
            match &item.target {
                OrderTarget::Index(index) => {
                    let index = *index;
                    let position = index as usize;
                    if position == 0 || position > select_items.len() {
                        return Err(CheckError::AmbiguousOrderPosition {
                            index,
                            select_items: select_items.len(),
                            pos: item.span(),
                        });
                    }
                    if matches!(
                        select_items.get(position - 1),
                        Some(SelectItem::AllColumns(_))
                    ) {
                        return Err(CheckError::AmbiguousOrderPosition {
                            index,
                            select_items: select_items.len(),
                            pos: item.span(),
                        });
                    }
                }
                OrderTarget::Name { name, sensitive } => {
                    let alias_hit = select_items.iter().any(|si| match si {
                        SelectItem::Expr(expr) => expr
                            .alias
                            .as_deref()
                            .is_some_and(|alias| ident_matches(name, alias, *sensitive)),
                        SelectItem::AllColumns(_) => false,
                    });
                    let scope = stack.last().expect("scope pushed");
                    let base_hit = scope.tables.iter().any(|entry| match &entry.source {
                        ScopeSource::Base(id) => !self
                            .catalog
                            .search_columns(name, *sensitive, &[*id])
                            .is_empty(),
                        ScopeSource::Derived(columns) => columns
                            .iter()
                            .any(|col| ident_matches(name, &col.name, *sensitive)),
                    });

                    if alias_hit && base_hit {
                        log::warn!(
                            target: "adql::check",
                            "sort key \"{name}\" matches both a select alias and a table column; the alias wins"
                        );
                    }
                    if !alias_hit && !base_hit {
                        // As a last resort the key may name an output
                        // column of the select list (unaliased columns).
                        let out_hit = output
                            .iter()
                            .any(|col| ident_matches(name, &col.name, *sensitive));
                        if !out_hit {
                            return Err(CheckError::UnresolvedColumn {
                                name: name.to_string(),
                                pos: item.span(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // ---- type inference ---------------------------------------------

    fn infer_type(&self, operand: &Operand) -> DbType {
        match operand {
            Operand::Column(column) => column
                .binding
                .map(|b| b.dtype(self.catalog))
                .unwrap_or(DbType::new(DbTypeKind::Unknown)),
            Operand::Number(_) => DbType::new(DbTypeKind::UnknownNumeric),
            Operand::Str(_) => DbType::new(DbTypeKind::Varchar),
            Operand::Binary(_) | Operand::Negation(_) => DbType::new(DbTypeKind::UnknownNumeric),
            Operand::Concat(_) => DbType::new(DbTypeKind::Varchar),
            Operand::Function(call) => {
                if is_geometry_predicate(&call.name) {
                    // Predicates answer 0 or 1.
                    DbType::new(DbTypeKind::Integer)
                } else if let Some(builtin) = call.builtin {
                    match builtin.fixed_return_kind() {
                        Some(kind) => DbType::new(kind),
                        // MIN/MAX/SUM keep their argument's type.
                        None => call
                            .args
                            .get(0)
                            .map(|arg| self.infer_type(arg))
                            .unwrap_or(DbType::new(DbTypeKind::UnknownNumeric)),
                    }
                } else {
                    call.resolved_type
                        .unwrap_or(DbType::new(DbTypeKind::Unknown))
                }
            }
            Operand::Geometry(geo) => DbType::new(geo.kind.return_kind()),
            Operand::Case(case) => case
                .branches
                .first()
                .map(|branch| self.infer_type(&branch.then))
                .unwrap_or(DbType::new(DbTypeKind::Unknown)),
            Operand::Cast(cast) => cast.target,
            Operand::Wrapped(w) => self.infer_type(&w.operand),
        }
    }
}

struct ColumnPathParts<'a> {
    schema: Option<(&'a str, bool)>,
    table: Option<(&'a str, bool)>,
}
