//! DuckDB data source implementation

use crate::error::{DbError, DbResult};
use duckdb::types::Value as DuckValue;
use duckdb::{params_from_iter, Connection};
use log::debug;
use quarry_compiler::{Command, DataError, DataSource, Row, RowCursor, VecCursor};
use quarry_core::sql_utils::{quote_ident, quote_qualified};
use quarry_core::{Catalog, Dialect, EntityDef, Value};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Runs compiled commands against a DuckDB connection
pub struct DuckDbSource {
    conn: Mutex<Connection>,
}

impl DuckDbSource {
    /// Create a new in-memory DuckDB connection
    pub fn in_memory() -> DbResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| DbError::ConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create a new DuckDB connection from a file path
    pub fn from_path(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path).map_err(|e| DbError::ConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create from path string (handles :memory: special case)
    pub fn new(path: &str) -> DbResult<Self> {
        if path == ":memory:" {
            Self::in_memory()
        } else {
            Self::from_path(Path::new(path))
        }
    }

    /// Run semicolon-separated SQL without parameters
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.lock()?
            .execute_batch(sql)
            .map_err(|e| DbError::ExecutionError(e.to_string()))
    }

    /// Create the table of every catalog entity that does not exist yet
    pub fn create_tables(&self, catalog: &Catalog) -> DbResult<()> {
        let ddl: Vec<String> = catalog.entities().map(create_table_sql).collect();
        debug!("Creating {} catalog tables", ddl.len());
        self.execute_batch(&ddl.join(";\n"))
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DbError::MutexPoisoned(e.to_string()))
    }

    fn query_rows(&self, command: &Command) -> DbResult<Vec<Row>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&command.text)?;
        let mut rows = stmt.query(params_from_iter(bind_values(command)))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let width = row.as_ref().column_count();
            let mut values = Vec::with_capacity(width);
            for ordinal in 0..width {
                let value: DuckValue = row.get(ordinal)?;
                values.push(from_duck(ordinal, value)?);
            }
            out.push(Row::new(values));
        }
        debug!("Fetched {} rows", out.len());
        Ok(out)
    }

    fn execute_command(&self, command: &Command) -> DbResult<u64> {
        let conn = self.lock()?;
        let affected = conn
            .execute(&command.text, params_from_iter(bind_values(command)))
            .map_err(|e| DbError::ExecutionError(format!("{}: {}", e, command.text)))?;
        Ok(affected as u64)
    }
}

impl DataSource for DuckDbSource {
    fn query(&self, command: &Command) -> Result<Box<dyn RowCursor + '_>, DataError> {
        let rows = self.query_rows(command).map_err(DataError::new)?;
        Ok(Box::new(VecCursor::new(rows)))
    }

    fn execute(&self, command: &Command) -> Result<u64, DataError> {
        self.execute_command(command).map_err(DataError::new)
    }
}

/// `CREATE TABLE IF NOT EXISTS` for one entity, key column as primary key
pub fn create_table_sql(entity: &EntityDef) -> String {
    let mut columns: Vec<String> = entity
        .columns
        .iter()
        .map(|c| {
            let null = if c.nullable { "" } else { " NOT NULL" };
            format!("{} {}{}", quote_ident(&c.name), c.sql_type, null)
        })
        .collect();
    columns.push(format!("PRIMARY KEY ({})", quote_ident(&entity.key)));
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_qualified(&entity.table, Dialect::DuckDb),
        columns.join(", ")
    )
}

fn bind_values(command: &Command) -> Vec<DuckValue> {
    command.parameters.iter().map(|p| to_duck(&p.value)).collect()
}

fn to_duck(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Boolean(b) => DuckValue::Boolean(*b),
        Value::Integer(i) => DuckValue::BigInt(*i),
        Value::Float(f) => DuckValue::Double(*f),
        Value::String(s) => DuckValue::Text(s.clone()),
    }
}

fn from_duck(ordinal: usize, value: DuckValue) -> DbResult<Value> {
    let unsupported = |type_name: &str| DbError::UnsupportedValue {
        ordinal,
        type_name: type_name.to_string(),
    };
    Ok(match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Boolean(b),
        DuckValue::TinyInt(i) => Value::Integer(i.into()),
        DuckValue::SmallInt(i) => Value::Integer(i.into()),
        DuckValue::Int(i) => Value::Integer(i.into()),
        DuckValue::BigInt(i) => Value::Integer(i),
        DuckValue::UTinyInt(i) => Value::Integer(i.into()),
        DuckValue::USmallInt(i) => Value::Integer(i.into()),
        DuckValue::UInt(i) => Value::Integer(i.into()),
        DuckValue::UBigInt(i) => {
            Value::Integer(i64::try_from(i).map_err(|_| unsupported("UBIGINT out of range"))?)
        }
        DuckValue::HugeInt(i) => {
            Value::Integer(i64::try_from(i).map_err(|_| unsupported("HUGEINT out of range"))?)
        }
        DuckValue::Float(f) => Value::Float(f.into()),
        DuckValue::Double(f) => Value::Float(f),
        DuckValue::Decimal(d) => Value::Float(
            d.to_string()
                .parse()
                .map_err(|_| unsupported("DECIMAL"))?,
        ),
        DuckValue::Text(s) => Value::String(s),
        DuckValue::Enum(s) => Value::String(s),
        other => return Err(unsupported(&format!("{other:?}"))),
    })
}

#[cfg(test)]
#[path = "duckdb_test.rs"]
mod tests;
