use super::*;
use crate::ir::ScopeKind;
use crate::query::BinOp;
use quarry_core::Value;

fn table_select(arena: &mut ScopeArena) -> SelectNode {
    let t = arena.alloc(ScopeKind::Table);
    let s = arena.alloc(ScopeKind::Select);
    let mut select = SelectNode::new(
        s,
        Source::Table {
            scope: t,
            table: "users".to_string(),
            columns: vec!["id".to_string(), "age".to_string()],
        },
    );
    select.columns.push(ColumnDef::new("id", SqlExpr::column(t, "id")));
    select.add_predicate(SqlExpr::binary(
        BinOp::Gt,
        SqlExpr::column(t, "age"),
        SqlExpr::Parameter(Value::from(30i64)),
    ));
    select
}

#[test]
fn test_for_each_column_reaches_subqueries() {
    let mut arena = ScopeArena::new();
    let inner = table_select(&mut arena);
    let outer_table = arena.alloc(ScopeKind::Table);
    let mut outer = SelectNode::new(
        arena.alloc(ScopeKind::Select),
        Source::Table {
            scope: outer_table,
            table: "orders".to_string(),
            columns: vec!["user_id".to_string()],
        },
    );
    outer.add_predicate(SqlExpr::In {
        operand: Box::new(SqlExpr::column(outer_table, "user_id")),
        subquery: Box::new(inner),
    });

    let mut seen = Vec::new();
    outer.for_each_column(&mut |c| seen.push(c.to_string()));
    assert_eq!(seen, vec!["t2.user_id", "t0.id", "t0.age"]);
}

#[test]
fn test_duplicate_gives_fresh_scopes() {
    let mut arena = ScopeArena::new();
    let select = table_select(&mut arena);
    let (copy, map) = arena.duplicate(&select);

    assert_eq!(map.len(), 2);
    assert_ne!(copy.scope, select.scope);
    assert!(copy.free_scopes().is_empty());
    let copied_from = copy.from.as_ref().map(Source::scopes).unwrap_or_default();
    assert_eq!(copied_from, vec![map[&select.from.as_ref().unwrap().scopes()[0]]]);
}

#[test]
fn test_free_scopes_lists_outer_references() {
    let mut arena = ScopeArena::new();
    let outer = arena.alloc(ScopeKind::Table);
    let mut select = table_select(&mut arena);
    select.add_predicate(SqlExpr::eq(
        SqlExpr::column(select.from.as_ref().unwrap().scopes()[0], "id"),
        SqlExpr::column(outer, "user_id"),
    ));
    assert_eq!(select.free_scopes(), vec![outer]);
}

#[test]
fn test_map_columns_rewrites_own_and_nested() {
    let mut arena = ScopeArena::new();
    let select = table_select(&mut arena);
    let renamed = select.map_columns(|c| SqlExpr::column(c.scope, format!("x_{}", c.name)));
    let mut names = Vec::new();
    renamed.for_each_column(&mut |c| names.push(c.name.clone()));
    assert_eq!(names, vec!["x_id", "x_age"]);
}
