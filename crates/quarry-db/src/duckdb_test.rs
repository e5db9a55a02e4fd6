use super::*;
use quarry_compiler::test_utils::{order_entity, sample_catalog};
use quarry_compiler::Parameter;

fn command(text: &str, values: Vec<Value>) -> Command {
    Command {
        text: text.to_string(),
        parameters: values
            .into_iter()
            .enumerate()
            .map(|(i, value)| Parameter {
                name: format!("p{}", i + 1),
                sql_type: value.sql_type(),
                value,
            })
            .collect(),
    }
}

fn rows(source: &DuckDbSource, text: &str, values: Vec<Value>) -> Vec<Vec<Value>> {
    let mut cursor = source.query(&command(text, values)).unwrap();
    let mut out = Vec::new();
    while let Some(row) = cursor.next_row().unwrap() {
        out.push(row.values().to_vec());
    }
    out
}

#[test]
fn test_in_memory_query_binds_positional_parameters() {
    let db = DuckDbSource::in_memory().unwrap();
    let out = rows(
        &db,
        "SELECT $1 + 1 AS n, $2 AS s",
        vec![Value::Integer(41), Value::from("x")],
    );
    assert_eq!(out, vec![vec![Value::Integer(42), Value::from("x")]]);
}

#[test]
fn test_value_conversion() {
    let db = DuckDbSource::in_memory().unwrap();
    let out = rows(
        &db,
        "SELECT CAST(1 AS INTEGER), CAST(2 AS SMALLINT), 1.5::DOUBLE, TRUE, NULL, 'a'",
        vec![],
    );
    assert_eq!(
        out[0],
        vec![
            Value::Integer(1),
            Value::Integer(2),
            Value::Float(1.5),
            Value::Boolean(true),
            Value::Null,
            Value::from("a"),
        ]
    );
}

#[test]
fn test_execute_returns_affected_rows() {
    let db = DuckDbSource::in_memory().unwrap();
    db.execute_batch("CREATE TABLE t (id BIGINT); INSERT INTO t VALUES (1), (2), (3);")
        .unwrap();

    let affected = db
        .execute(&command("DELETE FROM t WHERE id > $1", vec![Value::Integer(1)]))
        .unwrap();
    assert_eq!(affected, 2);
}

#[test]
fn test_missing_table_is_classified() {
    let db = DuckDbSource::in_memory().unwrap();
    let err = db
        .query(&command("SELECT * FROM nowhere", vec![]))
        .err()
        .unwrap();
    assert!(matches!(
        err.downcast_ref::<DbError>(),
        Some(DbError::TableNotFound(_))
    ));
}

#[test]
fn test_create_table_sql() {
    assert_eq!(
        create_table_sql(&order_entity()),
        r#"CREATE TABLE IF NOT EXISTS "orders" ("id" BIGINT NOT NULL, "user_id" BIGINT NOT NULL, "amount" DOUBLE NOT NULL, "status" VARCHAR NOT NULL, PRIMARY KEY ("id"))"#
    );
}

#[test]
fn test_create_tables_is_idempotent() {
    let db = DuckDbSource::in_memory().unwrap();
    db.create_tables(&sample_catalog()).unwrap();
    db.create_tables(&sample_catalog()).unwrap();

    let out = rows(&db, "SELECT COUNT(*) FROM users", vec![]);
    assert_eq!(out, vec![vec![Value::Integer(0)]]);
}

#[test]
fn test_from_path_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quarry.duckdb");
    {
        let db = DuckDbSource::from_path(&path).unwrap();
        db.execute_batch("CREATE TABLE kept AS SELECT 7 AS n").unwrap();
    }
    let db = DuckDbSource::new(path.to_str().unwrap()).unwrap();
    let out = rows(&db, "SELECT n FROM kept", vec![]);
    assert_eq!(out, vec![vec![Value::Integer(7)]]);
}
