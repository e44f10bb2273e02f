//! Serialization of the tree back to query text.
//!
//! Rendering is total and loss-free up to whitespace: the output of
//! [`ToAdql::to_adql`] re-parses to a structurally equal tree. Quoted
//! identifiers keep their quotes, unquoted ones keep the case they were
//! written with.

use crate::ast::{
    CaseMask, ColumnPath, Constraint, ConstraintClause, FromItem, IdentPart, InList,
    JoinCondition, NodeList, Operand, OrderItem, OrderTarget, Query, QueryExpr, SelectItem,
    SetOperation, TablePath, WithItem,
};

pub trait ToAdql {
    fn fmt_adql(&self, out: &mut String);

    fn to_adql(&self) -> String {
        let mut out = String::new();
        self.fmt_adql(&mut out);
        out
    }
}

fn write_ident(out: &mut String, name: &str, sensitive: bool) {
    if sensitive {
        out.push('"');
        for ch in name.chars() {
            if ch == '"' {
                out.push('"');
            }
            out.push(ch);
        }
        out.push('"');
    } else {
        out.push_str(name);
    }
}

fn write_string_literal(out: &mut String, value: &str) {
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            out.push('\'');
        }
        out.push(ch);
    }
    out.push('\'');
}

fn write_column_path(out: &mut String, path: &ColumnPath) {
    let mask: CaseMask = path.case;
    for (part, bit) in [
        (&path.catalog, IdentPart::Catalog),
        (&path.schema, IdentPart::Schema),
        (&path.table, IdentPart::Table),
    ] {
        if let Some(part) = part {
            write_ident(out, part, mask.is_sensitive(bit));
            out.push('.');
        }
    }
    write_ident(out, &path.column, mask.is_sensitive(IdentPart::Column));
}

fn write_table_path(out: &mut String, path: &TablePath) {
    let mask: CaseMask = path.case;
    for (part, bit) in [
        (&path.catalog, IdentPart::Catalog),
        (&path.schema, IdentPart::Schema),
    ] {
        if let Some(part) = part {
            write_ident(out, part, mask.is_sensitive(bit));
            out.push('.');
        }
    }
    write_ident(out, &path.table, mask.is_sensitive(IdentPart::Table));
}

fn write_comma_separated<T: ToAdql>(out: &mut String, list: &NodeList<T>) {
    for (i, item) in list.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.fmt_adql(out);
    }
}

impl ToAdql for Operand {
    fn fmt_adql(&self, out: &mut String) {
        match self {
            Operand::Column(col) => write_column_path(out, &col.path),
            Operand::Number(n) => out.push_str(&n.text),
            Operand::Str(s) => write_string_literal(out, &s.value),
            Operand::Binary(b) => {
                b.left.fmt_adql(out);
                out.push_str(&format!(" {} ", b.op));
                b.right.fmt_adql(out);
            }
            Operand::Concat(c) => {
                for (i, item) in c.items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" || ");
                    }
                    item.fmt_adql(out);
                }
            }
            Operand::Negation(n) => {
                out.push('-');
                n.operand.fmt_adql(out);
            }
            Operand::Function(func) => {
                out.push_str(&func.name);
                out.push('(');
                if func.distinct {
                    out.push_str("DISTINCT ");
                }
                if func.star {
                    out.push('*');
                } else {
                    write_comma_separated(out, &func.args);
                }
                out.push(')');
            }
            Operand::Geometry(geo) => {
                out.push_str(geo.kind.as_ref());
                out.push('(');
                write_comma_separated(out, &geo.args);
                out.push(')');
            }
            Operand::Case(case) => {
                out.push_str("CASE");
                for branch in &case.branches {
                    out.push_str(" WHEN ");
                    write_constraints(out, &branch.when);
                    out.push_str(" THEN ");
                    branch.then.fmt_adql(out);
                }
                if let Some(else_value) = &case.else_value {
                    out.push_str(" ELSE ");
                    else_value.fmt_adql(out);
                }
                out.push_str(" END");
            }
            Operand::Cast(cast) => {
                out.push_str("CAST(");
                cast.operand.fmt_adql(out);
                out.push_str(" AS ");
                out.push_str(&cast.target.to_string());
                out.push(')');
            }
            Operand::Wrapped(w) => {
                out.push('(');
                w.operand.fmt_adql(out);
                out.push(')');
            }
        }
    }
}

fn write_constraints(out: &mut String, clause: &ConstraintClause) {
    for (i, constraint) in clause.iter().enumerate() {
        if i > 0 {
            let sep = clause.sep_before(i).expect("separator list out of step");
            out.push(' ');
            out.push_str(sep.as_ref());
            out.push(' ');
        }
        constraint.fmt_adql(out);
    }
}

impl ToAdql for Constraint {
    fn fmt_adql(&self, out: &mut String) {
        match self {
            Constraint::Comparison(cmp) => {
                cmp.left.fmt_adql(out);
                out.push_str(&format!(" {} ", cmp.op));
                cmp.right.fmt_adql(out);
            }
            Constraint::Between(b) => {
                b.operand.fmt_adql(out);
                if b.negated {
                    out.push_str(" NOT");
                }
                out.push_str(" BETWEEN ");
                b.low.fmt_adql(out);
                out.push_str(" AND ");
                b.high.fmt_adql(out);
            }
            Constraint::In(in_c) => {
                in_c.operand.fmt_adql(out);
                if in_c.negated {
                    out.push_str(" NOT");
                }
                out.push_str(" IN (");
                match &in_c.list {
                    InList::Values(values) => write_comma_separated(out, values),
                    InList::Query(q) => q.fmt_adql(out),
                }
                out.push(')');
            }
            Constraint::IsNull(n) => {
                n.operand.fmt_adql(out);
                out.push_str(if n.negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Constraint::Like(like) => {
                like.operand.fmt_adql(out);
                if like.negated {
                    out.push_str(" NOT");
                }
                out.push_str(" LIKE ");
                like.pattern.fmt_adql(out);
            }
            Constraint::Exists(e) => {
                out.push_str("EXISTS(");
                e.query.fmt_adql(out);
                out.push(')');
            }
            Constraint::Group(group) => {
                out.push('(');
                write_constraints(out, group);
                out.push(')');
            }
            Constraint::Not(not) => {
                out.push_str("NOT ");
                not.constraint.fmt_adql(out);
            }
        }
    }
}

impl ToAdql for SelectItem {
    fn fmt_adql(&self, out: &mut String) {
        match self {
            SelectItem::Expr(e) => {
                e.operand.fmt_adql(out);
                if let Some(alias) = &e.alias {
                    out.push_str(" AS ");
                    write_ident(out, alias, e.alias_sensitive);
                }
            }
            SelectItem::AllColumns(all) => {
                if let Some(table) = &all.table {
                    write_table_path(out, table);
                    out.push('.');
                }
                out.push('*');
            }
        }
    }
}

impl ToAdql for FromItem {
    fn fmt_adql(&self, out: &mut String) {
        match self {
            FromItem::Table(table) => {
                write_table_path(out, &table.path);
                if let Some(alias) = &table.alias {
                    out.push_str(" AS ");
                    write_ident(out, alias, table.path.case.is_sensitive(IdentPart::Alias));
                }
            }
            FromItem::Join(join) => {
                join.left.fmt_adql(out);
                out.push(' ');
                out.push_str(join.kind.as_ref());
                out.push(' ');
                join.right.fmt_adql(out);
                match &join.condition {
                    JoinCondition::None => {}
                    JoinCondition::On(clause) => {
                        out.push_str(" ON ");
                        write_constraints(out, clause);
                    }
                    JoinCondition::Using(columns) => {
                        out.push_str(" USING (");
                        for (i, col) in columns.iter().enumerate() {
                            if i > 0 {
                                out.push_str(", ");
                            }
                            write_column_path(out, &col.path);
                        }
                        out.push(')');
                    }
                }
            }
            FromItem::SubQuery(sub) => {
                out.push('(');
                sub.query.fmt_adql(out);
                out.push_str(") AS ");
                write_ident(out, &sub.alias, sub.alias_sensitive);
            }
        }
    }
}

impl ToAdql for OrderItem {
    fn fmt_adql(&self, out: &mut String) {
        match &self.target {
            OrderTarget::Index(i) => out.push_str(&i.to_string()),
            OrderTarget::Name { name, sensitive } => write_ident(out, name, *sensitive),
        }
        if self.descending {
            out.push_str(" DESC");
        }
    }
}

impl ToAdql for WithItem {
    fn fmt_adql(&self, out: &mut String) {
        write_ident(out, &self.name, self.name_sensitive);
        out.push_str(" AS (");
        self.query.fmt_adql(out);
        out.push(')');
    }
}

fn write_with(out: &mut String, with: &NodeList<WithItem>) {
    if !with.is_empty() {
        out.push_str("WITH ");
        write_comma_separated(out, with);
        out.push(' ');
    }
}

fn write_order_offset(
    out: &mut String,
    order_by: Option<&NodeList<OrderItem>>,
    offset: Option<u64>,
) {
    if let Some(order) = order_by {
        if !order.is_empty() {
            out.push_str(" ORDER BY ");
            write_comma_separated(out, order);
        }
    }
    if let Some(offset) = offset {
        out.push_str(&format!(" OFFSET {offset}"));
    }
}

impl ToAdql for Query {
    fn fmt_adql(&self, out: &mut String) {
        write_with(out, &self.with);
        out.push_str("SELECT ");
        if self.select.distinct {
            out.push_str("DISTINCT ");
        }
        if let Some(top) = self.select.top {
            out.push_str(&format!("TOP {top} "));
        }
        write_comma_separated(out, &self.select.items);
        out.push_str(" FROM ");
        self.from.root.fmt_adql(out);
        if let Some(clause) = &self.where_clause {
            if !clause.is_empty() {
                out.push_str(" WHERE ");
                write_constraints(out, clause);
            }
        }
        if let Some(group) = &self.group_by {
            if !group.is_empty() {
                out.push_str(" GROUP BY ");
                write_comma_separated(out, group);
            }
        }
        if let Some(clause) = &self.having {
            if !clause.is_empty() {
                out.push_str(" HAVING ");
                write_constraints(out, clause);
            }
        }
        write_order_offset(out, self.order_by.as_ref(), self.offset);
    }
}

/// Whether a set-operation operand needs re-parenthesizing to keep its
/// grouping on re-parse.
fn needs_parens(operand: &QueryExpr) -> bool {
    match operand {
        QueryExpr::Set(_) => true,
        QueryExpr::Select(q) => {
            !q.with.is_empty() || q.order_by.as_ref().is_some_and(|o| !o.is_empty()) || q.offset.is_some()
        }
    }
}

impl ToAdql for SetOperation {
    fn fmt_adql(&self, out: &mut String) {
        write_with(out, &self.with);
        let mut write_operand = |out: &mut String, operand: &QueryExpr| {
            if needs_parens(operand) {
                out.push('(');
                operand.fmt_adql(out);
                out.push(')');
            } else {
                operand.fmt_adql(out);
            }
        };
        write_operand(out, &self.left);
        out.push(' ');
        out.push_str(self.op.as_ref());
        if self.all {
            out.push_str(" ALL");
        }
        out.push(' ');
        write_operand(out, &self.right);
        write_order_offset(out, self.order_by.as_ref(), self.offset);
    }
}

impl ToAdql for QueryExpr {
    fn fmt_adql(&self, out: &mut String) {
        match self {
            QueryExpr::Select(q) => q.fmt_adql(out),
            QueryExpr::Set(s) => s.fmt_adql(out),
        }
    }
}

/// Render a whole query back to text.
pub fn render_adql(query: &QueryExpr) -> String {
    query.to_adql()
}
