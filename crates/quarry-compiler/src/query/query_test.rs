use super::*;

fn users_named(name: &str) -> QueryNode {
    QueryNode::source("User").filter(Lambda::new(
        "u",
        Expr::param("u").member("name").eq(Expr::constant(name)),
    ))
}

#[test]
fn test_element_type_follows_input() {
    let q = users_named("a").take(3);
    assert_eq!(q.element_type(), ElementType::Entity("User".to_string()));
}

#[test]
fn test_element_type_of_projection() {
    let shaped = users_named("a").project(Lambda::new(
        "u",
        Expr::new_object([("n", Expr::param("u").member("name"))]),
    ));
    assert_eq!(shaped.element_type(), ElementType::Shape);

    let identity = users_named("a").project(Lambda::new("u", Expr::param("u")));
    assert_eq!(
        identity.element_type(),
        ElementType::Entity("User".to_string())
    );

    let grouped = QueryNode::source("Order").group_by(Lambda::new(
        "o",
        Expr::param("o").member("user_id"),
    ));
    assert_eq!(grouped.element_type(), ElementType::Grouping);
    assert_eq!(grouped.count().element_type(), ElementType::Scalar);
}

#[test]
fn test_order_by_appends_secondary_key() {
    let q = QueryNode::source("User")
        .order_by(Lambda::new("u", Expr::param("u").member("name")), false)
        .order_by(Lambda::new("u", Expr::param("u").member("id")), true);
    match q {
        QueryNode::OrderBy { keys, .. } => {
            assert_eq!(keys.len(), 2);
            assert!(keys[1].descending);
        }
        other => panic!("expected OrderBy, got {}", other.kind_name()),
    }
}

#[test]
fn test_walk_exprs_visits_lambdas_and_counts() {
    let q = users_named("a").skip(2);
    let mut constants = Vec::new();
    q.walk_exprs(&mut |e| {
        if let Expr::Constant(v) = e {
            constants.push(v.clone());
        }
    });
    assert_eq!(
        constants,
        vec![quarry_core::Value::from("a"), quarry_core::Value::from(2i64)]
    );
}

#[test]
fn test_tree_round_trips_through_json() {
    let q = users_named("o'brien").count();
    let json = serde_json::to_string(&q).unwrap();
    let back: QueryNode = serde_json::from_str(&json).unwrap();
    assert_eq!(back, q);
}

struct RenameParams;

impl TreeRewriter for RenameParams {
    fn rewrite_expr(&mut self, expr: Expr) -> Expr {
        match expr {
            Expr::Param(p) => Expr::Param(format!("{p}_1")),
            other => other,
        }
    }
}

#[test]
fn test_rewriter_reaches_nested_queries() {
    let inner = QueryNode::related(Expr::param("u"), "orders", "Order");
    let q = QueryNode::source("User").project(Lambda::new(
        "u",
        Expr::new_object([("orders", inner.into_expr())]),
    ));
    let rewritten = rewrite_node(q, &mut RenameParams);
    let mut params = Vec::new();
    rewritten.walk_exprs(&mut |e| {
        if let Expr::Param(p) = e {
            params.push(p.clone());
        }
    });
    assert_eq!(params, vec!["u_1".to_string()]);
}
