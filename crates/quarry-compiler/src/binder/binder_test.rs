use super::*;
use crate::ir::{CommandNode, JoinKind};
use crate::query::{BinOp, Expr};
use crate::test_utils::{field, lambda, sample_catalog};

fn bind_with(tree: &QueryNode, security: &SecurityFilters) -> CompileResult<Projection> {
    let catalog = sample_catalog();
    Binder::new(&catalog, security).bind(tree)
}

fn bind(tree: &QueryNode) -> CompileResult<Projection> {
    bind_with(tree, &SecurityFilters::new())
}

fn names(select: &SelectNode) -> Vec<&str> {
    select.columns.iter().map(|c| c.name.as_str()).collect()
}

/// Navigation joins along a FROM chain: (kind, joined table)
fn joins(source: &Source) -> Vec<(JoinKind, String)> {
    match source {
        Source::Join(join) => {
            let mut out = joins(&join.left);
            if let Source::Table { table, .. } = &join.right {
                out.push((join.kind, table.clone()));
            }
            out
        }
        _ => Vec::new(),
    }
}

/// Every parameter value in a predicate built from binary operators
fn parameters(expr: &SqlExpr, out: &mut Vec<Value>) {
    match expr {
        SqlExpr::Parameter(v) => out.push(v.clone()),
        SqlExpr::Binary { left, right, .. } => {
            parameters(left, out);
            parameters(right, out);
        }
        _ => {}
    }
}

fn users_over_18() -> QueryNode {
    QueryNode::source("User").filter(lambda(
        "u",
        field("u", "age").gt(Expr::constant(18i64)),
    ))
}

#[test]
fn test_bind_source_exposes_entity_columns() {
    let projection = bind(&QueryNode::source("User")).unwrap();

    assert_eq!(
        names(&projection.select),
        vec!["id", "name", "age", "country_id", "tenant_id"]
    );
    assert!(
        matches!(&projection.select.from, Some(Source::Table { table, .. }) if table == "users")
    );
    match &projection.projector {
        ProjectorExpr::Entity {
            entity, presence, ..
        } => {
            assert_eq!(entity, "User");
            assert!(presence.is_none());
        }
        other => panic!("expected entity projector, got {other:?}"),
    }
}

#[test]
fn test_bind_filter_adds_predicate_over_input_select() {
    let projection = bind(&users_over_18()).unwrap();

    assert!(matches!(projection.select.from, Some(Source::Select(_))));
    match &projection.select.predicate {
        Some(SqlExpr::Binary { op, right, .. }) => {
            assert_eq!(*op, BinOp::Gt);
            assert_eq!(**right, SqlExpr::Parameter(Value::from(18i64)));
        }
        other => panic!("expected comparison, got {other:?}"),
    }
}

#[test]
fn test_navigation_join_is_shared_within_a_select() {
    let tree = QueryNode::source("User").project(lambda(
        "u",
        Expr::new_object([
            ("country", field("u", "country").member("name")),
            ("country_key", field("u", "country").member("id")),
        ]),
    ));
    let projection = bind(&tree).unwrap();

    let from = projection.select.from.as_ref().unwrap();
    assert_eq!(
        joins(from),
        vec![(JoinKind::LeftOuter, "countries".to_string())]
    );
    assert_eq!(names(&projection.select), vec!["name", "id"]);
}

#[test]
fn test_required_reference_uses_inner_join() {
    let tree = QueryNode::source("Order").project(lambda("o", field("o", "user").member("name")));
    let projection = bind(&tree).unwrap();

    let from = projection.select.from.as_ref().unwrap();
    assert_eq!(joins(from), vec![(JoinKind::Inner, "users".to_string())]);
}

#[test]
fn test_unknown_member_is_binding_error() {
    let tree = QueryNode::source("User").project(lambda("u", field("u", "nickname")));
    let err = bind(&tree).unwrap_err();

    assert!(matches!(err, CompileError::Binding { .. }));
    assert!(err.to_string().contains("nickname"));
}

#[test]
fn test_unknown_entity_is_binding_error() {
    let err = bind(&QueryNode::source("Invoice")).unwrap_err();
    assert!(err.to_string().contains("Invoice"));
}

#[test]
fn test_negative_take_is_rejected() {
    let err = bind(&QueryNode::source("User").take(-1)).unwrap_err();
    assert!(matches!(err, CompileError::Binding { .. }));
}

#[test]
fn test_take_and_skip_compose_on_one_select() {
    let projection = bind(&QueryNode::source("User").skip(2).take(5)).unwrap();
    assert_eq!(projection.select.offset, Some(2));
    assert_eq!(projection.select.limit, Some(5));

    let projection = bind(&QueryNode::source("User").take(5).skip(2)).unwrap();
    assert_eq!(projection.select.offset, Some(2));
    assert_eq!(projection.select.limit, Some(3));

    let projection = bind(&QueryNode::source("User").take(5).take(3)).unwrap();
    assert_eq!(projection.select.limit, Some(3));
}

#[test]
fn test_chained_large_skips_saturate() {
    let tree = QueryNode::source("User")
        .skip(i64::MAX)
        .skip(i64::MAX)
        .skip(i64::MAX);
    let projection = bind(&tree).unwrap();
    assert_eq!(projection.select.offset, Some(u64::MAX));
}

#[test]
fn test_collection_count_becomes_scalar_subquery() {
    let tree = QueryNode::source("User").project(lambda(
        "u",
        Expr::new_object([
            ("name", field("u", "name")),
            ("orders", field("u", "orders").count()),
        ]),
    ));
    let projection = bind(&tree).unwrap();

    let subquery = projection
        .select
        .columns
        .iter()
        .find_map(|c| match &c.expr {
            SqlExpr::Subquery(s) => Some(s),
            _ => None,
        })
        .expect("count subquery");
    assert_eq!(names(subquery), vec!["count"]);
    // correlated to the user row
    assert!(!subquery.free_scopes().is_empty());
}

#[test]
fn test_collection_member_becomes_nested_placeholder() {
    let tree = QueryNode::source("User").project(lambda(
        "u",
        Expr::new_object([("name", field("u", "name")), ("orders", field("u", "orders"))]),
    ));
    let projection = bind(&tree).unwrap();

    let ProjectorExpr::Construct { fields, .. } = &projection.projector else {
        panic!("expected constructed projector");
    };
    let (_, orders) = fields.iter().find(|(n, _)| n == "orders").unwrap();
    let ProjectorExpr::Nested(nested) = orders else {
        panic!("expected nested collection, got {orders:?}");
    };
    assert_eq!(nested.outer_keys.len(), 1);
    assert_eq!(nested.projection.keys.len(), 1);
    assert_eq!(nested.projection.keys[0].name, "user_id");
    assert!(nested.projection.select.free_scopes().is_empty());
}

#[test]
fn test_paging_inside_nested_collection_is_rejected() {
    let orders = QueryNode::related(Expr::param("u"), "orders", "Order").take(2);
    let tree = QueryNode::source("User").project(lambda("u", orders.into_expr()));
    let err = bind(&tree).unwrap_err();

    assert!(matches!(err, CompileError::Binding { .. }));
}

#[test]
fn test_group_aggregate_is_pending_aggregate_subquery() {
    let tree = QueryNode::source("Order")
        .group_by(lambda("o", field("o", "user_id")))
        .project(lambda(
            "g",
            Expr::new_object([
                ("user", field("g", "key")),
                (
                    "total",
                    Expr::param("g")
                        .aggregate(AggregateKind::Sum, Some(lambda("o", field("o", "amount")))),
                ),
            ]),
        ));
    let projection = bind(&tree).unwrap();

    let Some(Source::Select(grouping)) = &projection.select.from else {
        panic!("expected derived grouping select");
    };
    assert_eq!(grouping.group_by.len(), 1);
    let pending = projection
        .select
        .columns
        .iter()
        .find_map(|c| match &c.expr {
            SqlExpr::AggregateSubquery {
                group, aggregate, ..
            } => Some((*group, aggregate.kind)),
            _ => None,
        })
        .expect("pending group aggregate");
    assert_eq!(pending, (grouping.scope, AggregateKind::Sum));
}

#[test]
fn test_bare_grouping_projects_key_and_elements() {
    let tree = QueryNode::source("Order").group_by(lambda("o", field("o", "status")));
    let projection = bind(&tree).unwrap();

    let ProjectorExpr::Construct { type_name, fields } = &projection.projector else {
        panic!("expected grouping projector");
    };
    assert_eq!(type_name.as_deref(), Some("Grouping"));
    let field_names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(field_names, vec!["key", "elements"]);
    assert!(matches!(fields[1].1, ProjectorExpr::Nested(_)));
}

#[test]
fn test_set_operation_over_mismatched_shapes_fails() {
    let names_only = QueryNode::source("User").project(lambda("u", field("u", "name")));
    let tree = names_only.set_op(SetOpKind::Union, QueryNode::source("User"));
    let err = bind(&tree).unwrap_err();

    assert!(matches!(err, CompileError::Binding { .. }));
}

#[test]
fn test_set_operation_names_columns_positionally() {
    let user_names = QueryNode::source("User").project(lambda("u", field("u", "name")));
    let statuses = QueryNode::source("Order").project(lambda("o", field("o", "status")));
    let projection = bind(&user_names.set_op(SetOpKind::Union, statuses)).unwrap();

    let Some(Source::SetOp { left, right, .. }) = &projection.select.from else {
        panic!("expected set operation source");
    };
    assert_eq!(names(left), vec!["name"]);
    assert_eq!(names(right), vec!["name"]);
}

#[test]
fn test_unexpanded_macro_is_binding_error() {
    let tree = QueryNode::source("User")
        .project(lambda("u", Expr::macro_call("full_name", vec![Expr::param("u")])));
    let err = bind(&tree).unwrap_err();

    assert!(err.to_string().contains("full_name"));
}

#[test]
fn test_security_predicate_applies_to_collection_navigation() {
    let mut security = SecurityFilters::new();
    security
        .register(
            "Order",
            lambda("o", field("o", "status").eq(Expr::constant("open"))),
        )
        .unwrap();
    let tree = QueryNode::source("User").project(lambda("u", field("u", "orders").count()));
    let projection = bind_with(&tree, &security).unwrap();

    let mut found = Vec::new();
    projection.select.for_each_select(&mut |s| {
        if let Some(p) = &s.predicate {
            parameters(p, &mut found);
        }
    });
    assert!(found.contains(&Value::from("open")));
}

#[test]
fn test_delete_selects_entity_keys() {
    let catalog = sample_catalog();
    let security = SecurityFilters::new();
    let command = Binder::new(&catalog, &security)
        .bind_delete(&users_over_18())
        .unwrap();

    let CommandNode::Delete(delete) = command else {
        panic!("expected delete");
    };
    assert_eq!(delete.table, "users");
    assert_eq!(delete.key, "id");
    assert_eq!(names(&delete.rows), vec!["id"]);
}

#[test]
fn test_update_binds_assignments_over_target_row() {
    let catalog = sample_catalog();
    let security = SecurityFilters::new();
    let assignments = lambda(
        "u",
        Expr::new_object([(
            "age",
            field("u", "age").binary(BinOp::Plus, Expr::constant(1i64)),
        )]),
    );
    let command = Binder::new(&catalog, &security)
        .bind_update(&users_over_18(), &assignments)
        .unwrap();

    let CommandNode::Update(update) = command else {
        panic!("expected update");
    };
    assert_eq!(update.assignments.len(), 1);
    assert_eq!(update.assignments[0].0, "age");
    let mut scopes = Vec::new();
    update.assignments[0]
        .1
        .for_each_column(&mut |c| scopes.push(c.scope));
    assert_eq!(scopes, vec![update.target]);
}

#[test]
fn test_update_rejects_key_assignment_and_navigation() {
    let catalog = sample_catalog();
    let security = SecurityFilters::new();
    let mut binder = Binder::new(&catalog, &security);

    let key = lambda("u", Expr::new_object([("id", Expr::constant(7i64))]));
    let err = binder
        .bind_update(&QueryNode::source("User"), &key)
        .unwrap_err();
    assert!(err.to_string().contains("key column"));

    let navigation = lambda(
        "u",
        Expr::new_object([("name", field("u", "country").member("name"))]),
    );
    let err = binder
        .bind_update(&QueryNode::source("User"), &navigation)
        .unwrap_err();
    assert!(matches!(err, CompileError::Binding { .. }));
}

#[test]
fn test_insert_without_source_has_no_from() {
    let catalog = sample_catalog();
    let security = SecurityFilters::new();
    let values = Lambda {
        params: Vec::new(),
        body: Box::new(Expr::new_object([
            ("id", Expr::constant(1i64)),
            ("name", Expr::constant("Norway")),
        ])),
    };
    let command = Binder::new(&catalog, &security)
        .bind_insert("Country", None, &values)
        .unwrap();

    let CommandNode::Insert(insert) = command else {
        panic!("expected insert");
    };
    assert_eq!(insert.table, "countries");
    assert_eq!(insert.columns, vec!["id", "name"]);
    assert!(insert.source.from.is_none());
}

#[test]
fn test_insert_rejects_unknown_column() {
    let catalog = sample_catalog();
    let security = SecurityFilters::new();
    let values = lambda("u", Expr::new_object([("nickname", field("u", "name"))]));
    let err = Binder::new(&catalog, &security)
        .bind_insert("Country", Some(&QueryNode::source("User")), &values)
        .unwrap_err();

    assert!(err.to_string().contains("nickname"));
}
