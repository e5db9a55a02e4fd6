use super::*;
use crate::binder::Binder;
use crate::ir::{Plan, ProjectorExpr};
use crate::optimize::{Optimizer, PassContext};
use crate::provider::QueryProvider;
use crate::query::{Expr, Lambda, QueryNode};
use crate::security::SecurityFilters;
use crate::test_utils::{field, lambda, sample_catalog, sample_provider};
use quarry_core::{Config, OptimizerConfig};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

fn assert_parses(text: &str) {
    if let Err(e) = Parser::parse_sql(&PostgreSqlDialect {}, text) {
        panic!("generated text does not parse: {e}\n{text}");
    }
}

fn names_after_one() -> QueryNode {
    QueryNode::source("User")
        .filter(lambda("u", field("u", "id").gt(Expr::constant(1i64))))
        .project(lambda("u", field("u", "name")))
}

/// Bound and optimized projection for `tree`, before translation
fn optimized(tree: &QueryNode) -> Projection {
    let catalog = sample_catalog();
    let security = SecurityFilters::new();
    let mut binder = Binder::new(&catalog, &security);
    let projection = binder.bind(tree).unwrap();
    let mut cx = PassContext::new(binder.into_arena(), OptimizerConfig::default());
    match Optimizer::with_defaults()
        .run(Plan::Query(projection), &mut cx)
        .unwrap()
    {
        Plan::Query(projection) => projection,
        Plan::Command(_) => panic!("query expected"),
    }
}

fn users_with_orders() -> QueryNode {
    QueryNode::source("User").project(lambda(
        "u",
        Expr::new_object([("name", field("u", "name")), ("orders", field("u", "orders"))]),
    ))
}

#[test]
fn test_filter_project_selects_one_parameterized_column() {
    let translation = sample_provider().compile(&names_after_one()).unwrap();
    let text = &translation.command.text;

    assert!(text.starts_with("SELECT \""), "{text}");
    assert!(text.contains("AS \"name\" FROM \"users\" AS \""), "{text}");
    assert!(text.contains(" > $1)"), "{text}");
    assert_eq!(translation.command.parameters.len(), 1);
    assert_eq!(translation.command.parameters[0].value, Value::Integer(1));
    assert_eq!(translation.command.parameters[0].name, "p1");
    assert_eq!(translation.shape, ResultShape::Scalar { ordinal: 0 });
    assert!(translation.children.is_empty());
    assert_parses(text);
}

#[test]
fn test_string_constants_never_reach_the_text() {
    let tree = QueryNode::source("User").filter(lambda(
        "u",
        field("u", "name").eq(Expr::constant("o'brien; DROP TABLE users")),
    ));
    let translation = sample_provider().compile(&tree).unwrap();

    assert!(!translation.command.text.contains('\''));
    let parameter = &translation.command.parameters[0];
    assert_eq!(parameter.value, Value::from("o'brien; DROP TABLE users"));
    assert_eq!(parameter.sql_type.to_string(), "VARCHAR");
    assert_parses(&translation.command.text);
}

#[test]
fn test_translation_is_deterministic() {
    let provider = sample_provider();
    let first = provider.compile(&users_with_orders()).unwrap();
    let second = provider.compile(&users_with_orders()).unwrap();

    assert_eq!(first.command, second.command);
    assert_eq!(first.shape, second.shape);
    assert_eq!(first.commands(), second.commands());
}

#[test]
fn test_nested_collection_becomes_restricted_ordered_child() {
    let translation = sample_provider().compile(&users_with_orders()).unwrap();

    let ResultShape::Object { fields, .. } = &translation.shape else {
        panic!("object shape expected, got {:?}", translation.shape);
    };
    assert_eq!(fields[0].name, "name");
    assert_eq!(fields[1].shape, ResultShape::Collection { child: 0 });
    assert_eq!(translation.children.len(), 1);

    let child = &translation.children[0];
    assert_eq!(child.outer_ordinals.len(), 1);
    assert_eq!(child.key_ordinals.len(), 1);
    let text = &child.translation.command.text;
    assert!(text.contains("FROM \"orders\" AS"), "{text}");
    assert!(text.contains(" IN (SELECT "), "{text}");
    assert!(!text.contains("IS NULL"), "{text}");
    assert!(!child.null_keys_match);
    assert!(text.contains(" ORDER BY "), "{text}");
    assert!(matches!(
        child.translation.shape,
        ResultShape::Entity { ref entity, .. } if entity == "Order"
    ));
    assert_parses(&translation.command.text);
    assert_parses(text);
}

#[test]
fn test_grouping_loads_elements_as_child() {
    let tree = QueryNode::source("Order").group_by(lambda("o", field("o", "user_id")));
    let translation = sample_provider().compile(&tree).unwrap();

    let ResultShape::Object { type_name, fields } = &translation.shape else {
        panic!("grouping shape expected, got {:?}", translation.shape);
    };
    assert_eq!(type_name.as_deref(), Some("Grouping"));
    assert_eq!(fields[0].name, "key");
    assert_eq!(fields[1].shape, ResultShape::Collection { child: 0 });
    assert!(translation.command.text.contains(" GROUP BY "));
    let elements = &translation.children[0];
    assert!(elements.null_keys_match);
    assert!(elements.translation.command.text.contains("IS NULL"));
    for command in translation.commands() {
        assert_parses(&command.text);
    }
}

#[test]
fn test_sqlserver_quoting_and_placeholders() {
    let config = Config {
        dialect: Dialect::SqlServer,
        ..Config::default()
    };
    let provider = QueryProvider::new(sample_catalog(), config);
    let translation = provider.compile(&names_after_one()).unwrap();
    let text = &translation.command.text;

    assert!(text.contains("AS [name] FROM [users] AS ["), "{text}");
    assert!(text.contains(" > @p0)"), "{text}");
    assert_eq!(translation.command.parameters[0].name, "@p0");
}

#[test]
fn test_sqlite_placeholders_are_positional() {
    let config = Config {
        dialect: Dialect::Sqlite,
        ..Config::default()
    };
    let provider = QueryProvider::new(sample_catalog(), config);
    let text = provider.query_text(&names_after_one()).unwrap();
    assert!(text.contains(" > ?)"), "{text}");
}

#[test]
fn test_count_over_take_pages_inside_derived_table() {
    let tree = QueryNode::source("User").take(5).count();
    let text = sample_provider().query_text(&tree).unwrap();

    assert!(text.starts_with("SELECT COUNT(*) AS \"count\" FROM (SELECT "), "{text}");
    assert!(text.contains(" LIMIT 5) AS "), "{text}");
    assert_parses(&text);
}

#[test]
fn test_delete_text() {
    let tree = QueryNode::source("User")
        .filter(lambda("u", field("u", "age").gt(Expr::constant(18i64))));
    let translation = sample_provider().compile_delete(&tree).unwrap();
    let text = &translation.command.text;

    assert!(
        text.starts_with("DELETE FROM \"users\" WHERE \"id\" IN (SELECT "),
        "{text}"
    );
    assert_eq!(translation.command.parameters.len(), 1);
    assert_parses(text);
}

#[test]
fn test_update_parameters_follow_text_order() {
    let tree = QueryNode::source("User")
        .filter(lambda("u", field("u", "age").gt(Expr::constant(18i64))));
    let assignments = lambda(
        "u",
        Expr::new_object([(
            "age",
            field("u", "age").binary(BinOp::Plus, Expr::constant(1i64)),
        )]),
    );
    let translation = sample_provider()
        .compile_update(&tree, &assignments)
        .unwrap();
    let text = &translation.command.text;

    assert!(
        text.starts_with("UPDATE \"users\" SET \"age\" = (\"users\".\"age\" + $1) WHERE \"id\" IN ("),
        "{text}"
    );
    let values: Vec<&Value> = translation
        .command
        .parameters
        .iter()
        .map(|p| &p.value)
        .collect();
    assert_eq!(values, vec![&Value::Integer(1), &Value::Integer(18)]);
    assert_parses(text);
}

#[test]
fn test_insert_without_source_selects_parameters() {
    let values = Lambda {
        params: Vec::new(),
        body: Box::new(Expr::new_object([
            ("id", Expr::constant(1i64)),
            ("name", Expr::constant("Norway")),
        ])),
    };
    let translation = sample_provider()
        .compile_insert("Country", None, &values)
        .unwrap();

    assert_eq!(
        translation.command.text,
        r#"INSERT INTO "countries" ("id", "name") SELECT $1 AS "id", $2 AS "name""#
    );
    assert_eq!(translation.command.parameters[1].value, Value::from("Norway"));
    assert_parses(&translation.command.text);
}

#[test]
fn test_outer_key_outside_parent_is_translation_error() {
    let mut projection = optimized(&users_with_orders());
    let ProjectorExpr::Construct { fields, .. } = &mut projection.projector else {
        panic!("construct projector expected");
    };
    let ProjectorExpr::Nested(nested) = &mut fields[1].1 else {
        panic!("nested projector expected");
    };
    nested.outer_keys = vec![SqlExpr::Literal(1)];

    let err = TranslatorBuilder::new(Dialect::DuckDb)
        .build(projection)
        .unwrap_err();
    assert!(matches!(err, CompileError::Translation { .. }));
}
