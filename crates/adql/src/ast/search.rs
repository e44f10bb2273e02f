//! Depth-first traversal, predicate search, and in-place replacement.
//!
//! [`search`] drives a read-only walk, calling a [`SearchHandler`] on every
//! matching node. [`transform`] drives the same walk with exclusive access:
//! the closure decides per node whether to keep, replace, or remove it.
//! Replacing or removing a node drops the cached source span of the node's
//! every ancestor, so stale positions can never leak out of a rewrite.
//!
//! `USING (…)` column lists and order keys by position carry no child
//! nodes and are left to dedicated passes.

use super::constraint::{Constraint, ConstraintClause, InList};
use super::from::{FromItem, JoinCondition};
use super::list::NodeList;
use super::operand::Operand;
use super::query::{OrderItem, Query, QueryExpr, SelectItem, SetOperation, WithItem};
use crate::errors::CursorError;

/// A borrowed view of any traversable node.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Query(&'a QueryExpr),
    SelectItem(&'a SelectItem),
    From(&'a FromItem),
    Operand(&'a Operand),
    Constraint(&'a Constraint),
    OrderItem(&'a OrderItem),
    WithItem(&'a WithItem),
}

/// An exclusive view of any traversable node.
pub enum NodeMut<'a> {
    Query(&'a mut QueryExpr),
    SelectItem(&'a mut SelectItem),
    From(&'a mut FromItem),
    Operand(&'a mut Operand),
    Constraint(&'a mut Constraint),
    OrderItem(&'a mut OrderItem),
    WithItem(&'a mut WithItem),
}

/// An owned node, for substitution through [`transform`].
#[derive(Debug, Clone)]
pub enum NodeValue {
    Query(QueryExpr),
    SelectItem(SelectItem),
    From(FromItem),
    Operand(Operand),
    Constraint(Constraint),
    OrderItem(OrderItem),
    WithItem(WithItem),
}

impl NodeValue {
    fn kind_name(&self) -> &'static str {
        match self {
            NodeValue::Query(_) => "query",
            NodeValue::SelectItem(_) => "select item",
            NodeValue::From(_) => "from item",
            NodeValue::Operand(_) => "operand",
            NodeValue::Constraint(_) => "constraint",
            NodeValue::OrderItem(_) => "order item",
            NodeValue::WithItem(_) => "with item",
        }
    }
}

/// What [`transform`]'s closure wants done with the node it was shown.
#[derive(Debug, Clone)]
pub enum Action {
    /// Keep the node and descend into its children.
    Continue,
    /// Keep the node, do not descend.
    Skip,
    /// Substitute the node. The walk does not descend into the
    /// replacement.
    Replace(NodeValue),
    /// Drop the node. Only valid in list slots; required slots refuse.
    Remove,
}

/// A match predicate plus a visit hook, driven depth-first over the tree.
pub trait SearchHandler {
    fn matches(&self, node: NodeRef<'_>) -> bool;

    fn visit(&mut self, node: NodeRef<'_>);

    /// Whether to keep descending inside a matched node.
    fn recursive(&self) -> bool {
        false
    }
}

/// Run `handler` over every node of `root`, depth-first.
pub fn search(root: &QueryExpr, handler: &mut dyn SearchHandler) {
    visit(NodeRef::Query(root), handler);
}

fn visit(node: NodeRef<'_>, handler: &mut dyn SearchHandler) {
    if handler.matches(node) {
        handler.visit(node);
        if !handler.recursive() {
            return;
        }
    }
    for_each_child(node, &mut |child| visit(child, handler));
}

/// Collect references to every node satisfying `pred`.
pub fn collect<'a>(
    root: &'a QueryExpr,
    recursive: bool,
    pred: impl Fn(NodeRef<'_>) -> bool,
) -> Vec<NodeRef<'a>> {
    fn go<'a>(
        node: NodeRef<'a>,
        recursive: bool,
        pred: &impl Fn(NodeRef<'_>) -> bool,
        hits: &mut Vec<NodeRef<'a>>,
    ) {
        if pred(node) {
            hits.push(node);
            if !recursive {
                return;
            }
        }
        for_each_child_collect(node, &mut |child| go(child, recursive, pred, hits));
    }

    let mut hits = Vec::new();
    go(NodeRef::Query(root), recursive, &pred, &mut hits);
    hits
}

fn for_each_child<'a>(node: NodeRef<'a>, f: &mut dyn FnMut(NodeRef<'a>)) {
    for_each_child_collect(node, f)
}

fn for_each_child_collect<'a>(node: NodeRef<'a>, f: &mut (impl FnMut(NodeRef<'a>) + ?Sized)) {
    match node {
        NodeRef::Query(QueryExpr::Select(q)) => {
            for item in &q.with {
                f(NodeRef::WithItem(item));
            }
            for item in &q.select.items {
                f(NodeRef::SelectItem(item));
            }
            f(NodeRef::From(&q.from.root));
            if let Some(clause) = &q.where_clause {
                for c in clause.iter() {
                    f(NodeRef::Constraint(c));
                }
            }
            if let Some(group) = &q.group_by {
                for op in group {
                    f(NodeRef::Operand(op));
                }
            }
            if let Some(clause) = &q.having {
                for c in clause.iter() {
                    f(NodeRef::Constraint(c));
                }
            }
            if let Some(order) = &q.order_by {
                for item in order {
                    f(NodeRef::OrderItem(item));
                }
            }
        }
        NodeRef::Query(QueryExpr::Set(s)) => {
            for item in &s.with {
                f(NodeRef::WithItem(item));
            }
            f(NodeRef::Query(&s.left));
            f(NodeRef::Query(&s.right));
            if let Some(order) = &s.order_by {
                for item in order {
                    f(NodeRef::OrderItem(item));
                }
            }
        }
        NodeRef::SelectItem(SelectItem::Expr(e)) => f(NodeRef::Operand(&e.operand)),
        NodeRef::SelectItem(SelectItem::AllColumns(_)) => {}
        NodeRef::From(FromItem::Table(_)) => {}
        NodeRef::From(FromItem::Join(join)) => {
            f(NodeRef::From(&join.left));
            f(NodeRef::From(&join.right));
            if let JoinCondition::On(clause) = &join.condition {
                for c in clause.iter() {
                    f(NodeRef::Constraint(c));
                }
            }
        }
        NodeRef::From(FromItem::SubQuery(sub)) => f(NodeRef::Query(&sub.query)),
        NodeRef::Operand(op) => match op {
            Operand::Column(_) | Operand::Number(_) | Operand::Str(_) => {}
            Operand::Binary(b) => {
                f(NodeRef::Operand(&b.left));
                f(NodeRef::Operand(&b.right));
            }
            Operand::Concat(c) => {
                for item in &c.items {
                    f(NodeRef::Operand(item));
                }
            }
            Operand::Negation(n) => f(NodeRef::Operand(&n.operand)),
            Operand::Function(func) => {
                for arg in &func.args {
                    f(NodeRef::Operand(arg));
                }
            }
            Operand::Geometry(geo) => {
                for arg in &geo.args {
                    f(NodeRef::Operand(arg));
                }
            }
            Operand::Case(case) => {
                for branch in &case.branches {
                    for c in branch.when.iter() {
                        f(NodeRef::Constraint(c));
                    }
                    f(NodeRef::Operand(&branch.then));
                }
                if let Some(else_value) = &case.else_value {
                    f(NodeRef::Operand(else_value));
                }
            }
            Operand::Cast(cast) => f(NodeRef::Operand(&cast.operand)),
            Operand::Wrapped(w) => f(NodeRef::Operand(&w.operand)),
        },
        NodeRef::Constraint(c) => match c {
            Constraint::Comparison(cmp) => {
                f(NodeRef::Operand(&cmp.left));
                f(NodeRef::Operand(&cmp.right));
            }
            Constraint::Between(b) => {
                f(NodeRef::Operand(&b.operand));
                f(NodeRef::Operand(&b.low));
                f(NodeRef::Operand(&b.high));
            }
            Constraint::In(in_c) => {
                f(NodeRef::Operand(&in_c.operand));
                match &in_c.list {
                    InList::Values(values) => {
                        for v in values {
                            f(NodeRef::Operand(v));
                        }
                    }
                    InList::Query(q) => f(NodeRef::Query(q)),
                }
            }
            Constraint::IsNull(n) => f(NodeRef::Operand(&n.operand)),
            Constraint::Like(like) => {
                f(NodeRef::Operand(&like.operand));
                f(NodeRef::Operand(&like.pattern));
            }
            Constraint::Exists(e) => f(NodeRef::Query(&e.query)),
            Constraint::Group(group) => {
                for c in group.iter() {
                    f(NodeRef::Constraint(c));
                }
            }
            Constraint::Not(not) => f(NodeRef::Constraint(&not.constraint)),
        },
        NodeRef::OrderItem(_) => {}
        NodeRef::WithItem(item) => f(NodeRef::Query(&item.query)),
    }
}

/// Rewrite `root` in place. The closure is shown every node depth-first
/// and answers with an [`Action`]. Returns whether anything was replaced
/// or removed.
pub fn transform(
    root: &mut QueryExpr,
    f: &mut dyn FnMut(NodeMut<'_>) -> Action,
) -> Result<bool, CursorError> {
    walk_query_children(root, f)
}

type Walk = Result<bool, CursorError>;

fn incompatible(expected: &'static str, found: NodeValue) -> CursorError {
    CursorError::IncompatibleReplacement {
        expected,
        found: found.kind_name(),
    }
}

fn walk_query_children(query: &mut QueryExpr, f: &mut dyn FnMut(NodeMut<'_>) -> Action) -> Walk {
    let mut mutated = false;
    match query {
        QueryExpr::Select(q) => {
            mutated |= walk_select_query(q, f)?;
            if mutated {
                q.span = None;
            }
        }
        QueryExpr::Set(s) => {
            mutated |= walk_set_operation(s, f)?;
            if mutated {
                s.span = None;
            }
        }
    }
    Ok(mutated)
}

fn walk_select_query(q: &mut Query, f: &mut dyn FnMut(NodeMut<'_>) -> Action) -> Walk {
    let mut mutated = false;
    mutated |= walk_with_list(&mut q.with, f)?;
    mutated |= walk_select_items(&mut q.select.items, f)?;
    if mutated {
        q.select.span = None;
    }

    mutated |= {
        let changed = slot_from(&mut q.from.root, "FROM", f)?;
        if changed {
            q.from.span = None;
        }
        changed
    };

    if let Some(clause) = &mut q.where_clause {
        mutated |= walk_constraint_clause(clause, f)?;
    }
    if let Some(group) = &mut q.group_by {
        mutated |= walk_operand_list(group, true, f)?;
    }
    if let Some(clause) = &mut q.having {
        mutated |= walk_constraint_clause(clause, f)?;
    }
    if let Some(order) = &mut q.order_by {
        mutated |= walk_order_list(order, f)?;
    }
    Ok(mutated)
}

fn walk_set_operation(s: &mut SetOperation, f: &mut dyn FnMut(NodeMut<'_>) -> Action) -> Walk {
    let mut mutated = false;
    mutated |= walk_with_list(&mut s.with, f)?;
    mutated |= slot_query(&mut s.left, "set operation operand", f)?;
    mutated |= slot_query(&mut s.right, "set operation operand", f)?;
    if let Some(order) = &mut s.order_by {
        mutated |= walk_order_list(order, f)?;
    }
    Ok(mutated)
}

/// A required query slot: replaceable, never removable.
fn slot_query(
    slot: &mut QueryExpr,
    slot_name: &'static str,
    f: &mut dyn FnMut(NodeMut<'_>) -> Action,
) -> Walk {
    match f(NodeMut::Query(slot)) {
        Action::Continue => walk_query_children(slot, f),
        Action::Skip => Ok(false),
        Action::Replace(NodeValue::Query(mut new)) => {
            use super::AdqlNode;
            new.clear_span();
            *slot = new;
            Ok(true)
        }
        Action::Replace(other) => Err(incompatible("query", other)),
        Action::Remove => Err(CursorError::NotRemovable(slot_name)),
    }
}

/// A required from slot (the root of a `FROM` clause or a join operand).
fn slot_from(
    slot: &mut FromItem,
    slot_name: &'static str,
    f: &mut dyn FnMut(NodeMut<'_>) -> Action,
) -> Walk {
    match f(NodeMut::From(slot)) {
        Action::Continue => walk_from_children(slot, f),
        Action::Skip => Ok(false),
        Action::Replace(NodeValue::From(mut new)) => {
            use super::AdqlNode;
            new.clear_span();
            *slot = new;
            Ok(true)
        }
        Action::Replace(other) => Err(incompatible("from item", other)),
        Action::Remove => Err(CursorError::NotRemovable(slot_name)),
    }
}

/// A required operand slot.
fn slot_operand(
    slot: &mut Operand,
    slot_name: &'static str,
    f: &mut dyn FnMut(NodeMut<'_>) -> Action,
) -> Walk {
    match f(NodeMut::Operand(slot)) {
        Action::Continue => walk_operand_children(slot, f),
        Action::Skip => Ok(false),
        Action::Replace(NodeValue::Operand(mut new)) => {
            use super::AdqlNode;
            new.clear_span();
            *slot = new;
            Ok(true)
        }
        Action::Replace(other) => Err(incompatible("operand", other)),
        Action::Remove => Err(CursorError::NotRemovable(slot_name)),
    }
}

/// A required constraint slot (inside `NOT`).
fn slot_constraint(
    slot: &mut Constraint,
    slot_name: &'static str,
    f: &mut dyn FnMut(NodeMut<'_>) -> Action,
) -> Walk {
    match f(NodeMut::Constraint(slot)) {
        Action::Continue => walk_constraint_children(slot, f),
        Action::Skip => Ok(false),
        Action::Replace(NodeValue::Constraint(mut new)) => {
            use super::AdqlNode;
            new.clear_span();
            *slot = new;
            Ok(true)
        }
        Action::Replace(other) => Err(incompatible("constraint", other)),
        Action::Remove => Err(CursorError::NotRemovable(slot_name)),
    }
}

fn walk_with_list(list: &mut NodeList<WithItem>, f: &mut dyn FnMut(NodeMut<'_>) -> Action) -> Walk {
    let mut mutated = false;
    let mut i = 0;
    while i < list.len() {
        match f(NodeMut::WithItem(list.get_mut(i).unwrap())) {
            Action::Continue => {
                let item = list.get_mut(i).unwrap();
                let changed = slot_query(&mut item.query, "WITH sub-query", f)?;
                if changed {
                    item.span = None;
                    list.clear_span();
                    mutated = true;
                }
                i += 1;
            }
            Action::Skip => i += 1,
            Action::Replace(NodeValue::WithItem(mut new)) => {
                use super::AdqlNode;
                new.clear_span();
                list.set(i, new);
                mutated = true;
                i += 1;
            }
            Action::Replace(other) => return Err(incompatible("with item", other)),
            Action::Remove => {
                list.remove(i);
                mutated = true;
            }
        }
    }
    Ok(mutated)
}

fn walk_select_items(
    list: &mut NodeList<SelectItem>,
    f: &mut dyn FnMut(NodeMut<'_>) -> Action,
) -> Walk {
    let mut mutated = false;
    let mut i = 0;
    while i < list.len() {
        match f(NodeMut::SelectItem(list.get_mut(i).unwrap())) {
            Action::Continue => {
                if let SelectItem::Expr(e) = list.get_mut(i).unwrap() {
                    let changed = slot_operand(&mut e.operand, "select expression", f)?;
                    if changed {
                        e.span = None;
                        list.clear_span();
                        mutated = true;
                    }
                }
                i += 1;
            }
            Action::Skip => i += 1,
            Action::Replace(NodeValue::SelectItem(mut new)) => {
                use super::AdqlNode;
                new.clear_span();
                list.set(i, new);
                mutated = true;
                i += 1;
            }
            Action::Replace(other) => return Err(incompatible("select item", other)),
            Action::Remove => {
                if list.len() == 1 {
                    return Err(CursorError::NotRemovable("SELECT"));
                }
                list.remove(i);
                mutated = true;
            }
        }
    }
    Ok(mutated)
}

fn walk_order_list(
    list: &mut NodeList<OrderItem>,
    f: &mut dyn FnMut(NodeMut<'_>) -> Action,
) -> Walk {
    let mut mutated = false;
    let mut i = 0;
    while i < list.len() {
        match f(NodeMut::OrderItem(list.get_mut(i).unwrap())) {
            Action::Continue | Action::Skip => i += 1,
            Action::Replace(NodeValue::OrderItem(mut new)) => {
                use super::AdqlNode;
                new.clear_span();
                list.set(i, new);
                mutated = true;
                i += 1;
            }
            Action::Replace(other) => return Err(incompatible("order item", other)),
            Action::Remove => {
                list.remove(i);
                mutated = true;
            }
        }
    }
    Ok(mutated)
}

fn walk_operand_list(
    list: &mut NodeList<Operand>,
    removable: bool,
    f: &mut dyn FnMut(NodeMut<'_>) -> Action,
) -> Walk {
    let mut mutated = false;
    let mut i = 0;
    while i < list.len() {
        match f(NodeMut::Operand(list.get_mut(i).unwrap())) {
            Action::Continue => {
                let changed = walk_operand_children(list.get_mut(i).unwrap(), f)?;
                if changed {
                    list.clear_span();
                    mutated = true;
                }
                i += 1;
            }
            Action::Skip => i += 1,
            Action::Replace(NodeValue::Operand(mut new)) => {
                use super::AdqlNode;
                new.clear_span();
                list.set(i, new);
                mutated = true;
                i += 1;
            }
            Action::Replace(other) => return Err(incompatible("operand", other)),
            Action::Remove if removable => {
                list.remove(i);
                mutated = true;
            }
            Action::Remove => return Err(CursorError::NotRemovable("argument list")),
        }
    }
    Ok(mutated)
}

fn walk_constraint_clause(
    clause: &mut ConstraintClause,
    f: &mut dyn FnMut(NodeMut<'_>) -> Action,
) -> Walk {
    let mut mutated = false;
    let mut i = 0;
    while i < clause.len() {
        match f(NodeMut::Constraint(clause.get_mut(i).unwrap())) {
            Action::Continue => {
                let changed = walk_constraint_children(clause.get_mut(i).unwrap(), f)?;
                if changed {
                    clause.clear_span();
                    mutated = true;
                }
                i += 1;
            }
            Action::Skip => i += 1,
            Action::Replace(NodeValue::Constraint(mut new)) => {
                use super::AdqlNode;
                new.clear_span();
                clause.set(i, new);
                mutated = true;
                i += 1;
            }
            Action::Replace(other) => return Err(incompatible("constraint", other)),
            Action::Remove => {
                clause.remove(i);
                mutated = true;
            }
        }
    }
    Ok(mutated)
}

fn walk_from_children(item: &mut FromItem, f: &mut dyn FnMut(NodeMut<'_>) -> Action) -> Walk {
    let mut mutated = false;
    match item {
        FromItem::Table(_) => {}
        FromItem::Join(join) => {
            mutated |= slot_from(&mut join.left, "join operand", f)?;
            mutated |= slot_from(&mut join.right, "join operand", f)?;
            if let JoinCondition::On(clause) = &mut join.condition {
                mutated |= walk_constraint_clause(clause, f)?;
            }
            if mutated {
                join.span = None;
            }
        }
        FromItem::SubQuery(sub) => {
            mutated |= slot_query(&mut sub.query, "derived table sub-query", f)?;
            if mutated {
                sub.span = None;
            }
        }
    }
    Ok(mutated)
}

fn walk_operand_children(op: &mut Operand, f: &mut dyn FnMut(NodeMut<'_>) -> Action) -> Walk {
    let mut mutated = false;
    match op {
        Operand::Column(_) | Operand::Number(_) | Operand::Str(_) => {}
        Operand::Binary(b) => {
            mutated |= slot_operand(&mut b.left, "arithmetic operand", f)?;
            mutated |= slot_operand(&mut b.right, "arithmetic operand", f)?;
            if mutated {
                b.span = None;
            }
        }
        Operand::Concat(c) => {
            mutated |= walk_operand_list(&mut c.items, false, f)?;
        }
        Operand::Negation(n) => {
            mutated |= slot_operand(&mut n.operand, "negated operand", f)?;
            if mutated {
                n.span = None;
            }
        }
        Operand::Function(func) => {
            mutated |= walk_operand_list(&mut func.args, false, f)?;
            if mutated {
                func.span = None;
            }
        }
        Operand::Geometry(geo) => {
            mutated |= walk_operand_list(&mut geo.args, false, f)?;
            if mutated {
                geo.span = None;
            }
        }
        Operand::Case(case) => {
            for branch in &mut case.branches {
                mutated |= walk_constraint_clause(&mut branch.when, f)?;
                mutated |= slot_operand(&mut branch.then, "THEN value", f)?;
            }
            if let Some(else_value) = &mut case.else_value {
                mutated |= slot_operand(else_value, "ELSE value", f)?;
            }
            if mutated {
                case.span = None;
            }
        }
        Operand::Cast(cast) => {
            mutated |= slot_operand(&mut cast.operand, "CAST operand", f)?;
            if mutated {
                cast.span = None;
            }
        }
        Operand::Wrapped(w) => {
            mutated |= slot_operand(&mut w.operand, "parenthesized operand", f)?;
            if mutated {
                w.span = None;
            }
        }
    }
    Ok(mutated)
}

fn walk_constraint_children(c: &mut Constraint, f: &mut dyn FnMut(NodeMut<'_>) -> Action) -> Walk {
    let mut mutated = false;
    match c {
        Constraint::Comparison(cmp) => {
            mutated |= slot_operand(&mut cmp.left, "comparison operand", f)?;
            mutated |= slot_operand(&mut cmp.right, "comparison operand", f)?;
            if mutated {
                cmp.span = None;
            }
        }
        Constraint::Between(b) => {
            mutated |= slot_operand(&mut b.operand, "BETWEEN operand", f)?;
            mutated |= slot_operand(&mut b.low, "BETWEEN bound", f)?;
            mutated |= slot_operand(&mut b.high, "BETWEEN bound", f)?;
            if mutated {
                b.span = None;
            }
        }
        Constraint::In(in_c) => {
            mutated |= slot_operand(&mut in_c.operand, "IN operand", f)?;
            match &mut in_c.list {
                InList::Values(values) => {
                    mutated |= walk_operand_list(values, false, f)?;
                }
                InList::Query(q) => {
                    mutated |= slot_query(q, "IN sub-query", f)?;
                }
            }
            if mutated {
                in_c.span = None;
            }
        }
        Constraint::IsNull(n) => {
            mutated |= slot_operand(&mut n.operand, "IS NULL operand", f)?;
            if mutated {
                n.span = None;
            }
        }
        Constraint::Like(like) => {
            mutated |= slot_operand(&mut like.operand, "LIKE operand", f)?;
            mutated |= slot_operand(&mut like.pattern, "LIKE pattern", f)?;
            if mutated {
                like.span = None;
            }
        }
        Constraint::Exists(e) => {
            mutated |= slot_query(&mut e.query, "EXISTS sub-query", f)?;
            if mutated {
                e.span = None;
            }
        }
        Constraint::Group(group) => {
            mutated |= walk_constraint_clause(group, f)?;
        }
        Constraint::Not(not) => {
            mutated |= slot_constraint(&mut not.constraint, "NOT operand", f)?;
            if mutated {
                not.span = None;
            }
        }
    }
    Ok(mutated)
}
