//! End-to-end compile pipeline tests over the sample catalog

use quarry_compiler::test_utils::{field, lambda, sample_catalog, sample_provider};
use quarry_compiler::{
    AggregateKind, Expr, JoinType, Lambda, MemorySource, QueryError, QueryNode, QueryProvider,
    SetOpKind, Translation,
};
use quarry_core::{Config, Dialect, Value};
use serde_json::json;
use sqlparser::dialect::{GenericDialect, MsSqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;

fn assert_valid_sql(translation: &Translation) {
    for command in translation.commands() {
        if let Err(e) = Parser::parse_sql(&PostgreSqlDialect {}, &command.text) {
            panic!("invalid SQL: {e}\n{}", command.text);
        }
    }
}

fn adults() -> QueryNode {
    QueryNode::source("User").filter(lambda("u", field("u", "age").gt(Expr::constant(18i64))))
}

/// One query per operator family
fn corpus() -> Vec<(&'static str, QueryNode)> {
    vec![
        ("source", QueryNode::source("User")),
        (
            "filter-project",
            adults().project(lambda("u", field("u", "name"))),
        ),
        (
            "order-page",
            adults()
                .order_by(lambda("u", field("u", "name")), false)
                .order_by(lambda("u", field("u", "id")), true)
                .skip(10)
                .take(5),
        ),
        (
            "distinct",
            QueryNode::source("Order")
                .project(lambda("o", field("o", "status")))
                .distinct(),
        ),
        ("count-over-take", QueryNode::source("User").take(5).count()),
        (
            "sum",
            QueryNode::source("Order")
                .aggregate(AggregateKind::Sum, Some(lambda("o", field("o", "amount")))),
        ),
        (
            "reference",
            QueryNode::source("Order").project(lambda("o", field("o", "user").member("name"))),
        ),
        (
            "collection-count",
            QueryNode::source("User").project(lambda(
                "u",
                Expr::new_object([
                    ("name", field("u", "name")),
                    ("orders", field("u", "orders").count()),
                ]),
            )),
        ),
        (
            "any",
            QueryNode::source("User").filter(lambda("u", field("u", "orders").any(None))),
        ),
        (
            "group-aggregate",
            QueryNode::source("Order")
                .group_by(lambda("o", field("o", "user_id")))
                .project(lambda(
                    "g",
                    Expr::new_object([
                        ("user", field("g", "key")),
                        (
                            "total",
                            Expr::param("g").aggregate(
                                AggregateKind::Sum,
                                Some(lambda("o", field("o", "amount"))),
                            ),
                        ),
                    ]),
                )),
        ),
        (
            "join",
            QueryNode::source("User").join(
                JoinType::Inner,
                QueryNode::source("Order"),
                lambda("u", field("u", "id")),
                lambda("o", field("o", "user_id")),
                Lambda::new2(
                    "u",
                    "o",
                    Expr::new_object([("name", field("u", "name")), ("amount", field("o", "amount"))]),
                ),
            ),
        ),
        (
            "select-many",
            QueryNode::source("User").select_many(
                lambda("u", field("u", "orders")),
                Some(Lambda::new2(
                    "u",
                    "o",
                    Expr::new_object([("name", field("u", "name")), ("status", field("o", "status"))]),
                )),
                false,
            ),
        ),
        (
            "union",
            QueryNode::source("User")
                .project(lambda("u", field("u", "name")))
                .set_op(
                    SetOpKind::Union,
                    QueryNode::source("Country").project(lambda("c", field("c", "name"))),
                ),
        ),
        (
            "nested",
            QueryNode::source("User").project(lambda(
                "u",
                Expr::new_object([("name", field("u", "name")), ("orders", field("u", "orders"))]),
            )),
        ),
        (
            "grouping",
            QueryNode::source("Order").group_by(lambda("o", field("o", "status"))),
        ),
    ]
}

#[test]
fn test_every_operator_compiles_to_valid_sql() {
    let provider = sample_provider();
    for (name, tree) in corpus() {
        let translation = provider
            .compile(&tree)
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        assert_valid_sql(&translation);
    }
}

#[test]
fn test_compilation_is_deterministic() {
    let provider = sample_provider();
    for (name, tree) in corpus() {
        let first = provider.compile(&tree).unwrap();
        let second = provider.compile(&tree).unwrap();
        assert_eq!(first.commands(), second.commands(), "{name}");
        assert_eq!(first.shape, second.shape, "{name}");
    }
}

#[test]
fn test_sqlserver_texts_parse_as_tsql() {
    let config = Config {
        dialect: Dialect::SqlServer,
        ..Config::default()
    };
    let provider = QueryProvider::new(sample_catalog(), config);
    for (name, tree) in [
        ("filter", adults().project(lambda("u", field("u", "name")))),
        (
            "reference",
            QueryNode::source("Order").project(lambda("o", field("o", "user").member("name"))),
        ),
    ] {
        let text = provider.query_text(&tree).unwrap();
        if let Err(e) = Parser::parse_sql(&MsSqlDialect {}, &text) {
            panic!("{name}: {e}\n{text}");
        }
    }
}

#[test]
fn test_literal_strings_are_always_parameters() {
    let hostile = "x'); DELETE FROM users; --";
    let tree = QueryNode::source("User")
        .filter(lambda("u", field("u", "name").eq(Expr::constant(hostile))))
        .project(lambda("u", field("u", "id")));
    let translation = sample_provider().compile(&tree).unwrap();

    assert!(!translation.command.text.contains("DELETE"));
    assert_eq!(translation.command.parameters[0].value, Value::from(hostile));
    let statements = Parser::parse_sql(&GenericDialect {}, &translation.command.text).unwrap();
    assert_eq!(statements.len(), 1);
}

#[test]
fn test_unused_columns_are_dropped_from_derived_tables() {
    let tree = adults()
        .order_by(lambda("u", field("u", "age")), false)
        .take(3)
        .project(lambda("u", field("u", "name")));
    let text = sample_provider().query_text(&tree).unwrap();

    assert!(!text.contains("\"country_id\""), "{text}");
    assert!(!text.contains("\"tenant_id\""), "{text}");
}

#[test]
fn test_paged_rows_stay_below_aggregate() {
    let text = sample_provider()
        .query_text(&QueryNode::source("User").take(5).count())
        .unwrap();
    assert!(text.contains(" LIMIT 5) AS "), "{text}");
}

#[test]
fn test_round_trip_through_memory_source() {
    let provider = sample_provider();
    let tree = adults().project(lambda("u", field("u", "name")));
    let source = MemorySource::new().with_rows([vec![Value::from("b")], vec![Value::from("c")]]);

    let values = provider.execute(&tree, &source).unwrap();

    assert_eq!(values, vec![json!("b"), json!("c")]);
    assert_eq!(source.commands()[0].parameters[0].value, Value::Integer(18));
}

#[test]
fn test_exhausted_source_surfaces_data_error() {
    let err = sample_provider()
        .execute(&QueryNode::source("User"), &MemorySource::new())
        .unwrap_err();
    assert!(matches!(err, QueryError::Data(_)));
}

#[test]
fn test_data_modification_texts() {
    let provider = sample_provider();

    let delete = provider.compile_delete(&adults()).unwrap();
    assert!(delete.command.text.starts_with("DELETE FROM \"users\" WHERE"));

    let update = provider
        .compile_update(
            &adults(),
            &lambda("u", Expr::new_object([("name", Expr::constant("adult"))])),
        )
        .unwrap();
    assert!(update.command.text.starts_with("UPDATE \"users\" SET \"name\" = $1"));

    let insert = provider
        .compile_insert(
            "Country",
            Some(&QueryNode::source("User")),
            &lambda(
                "u",
                Expr::new_object([("id", field("u", "id")), ("name", field("u", "name"))]),
            ),
        )
        .unwrap();
    assert!(insert
        .command
        .text
        .starts_with("INSERT INTO \"countries\" (\"id\", \"name\") SELECT "));

    for text in [&delete.command.text, &update.command.text, &insert.command.text] {
        if let Err(e) = Parser::parse_sql(&PostgreSqlDialect {}, text) {
            panic!("invalid SQL: {e}\n{text}");
        }
    }
}
