//! Runtime values and relational types shared by the compiler and the data layer

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Valid bit widths for integer types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IntBitWidth {
    /// 16-bit (SMALLINT)
    I16,
    /// 32-bit (INTEGER)
    I32,
    /// 64-bit (BIGINT)
    I64,
}

/// Relational type of a column, parameter, or cast target.
///
/// Serialized as its SQL spelling (`"INTEGER"`, `"VARCHAR(20)"`) so catalogs and
/// operator trees stay readable when written as YAML or JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SqlType {
    /// BOOLEAN
    Boolean,
    /// SMALLINT / INTEGER / BIGINT
    Integer { bits: IntBitWidth },
    /// DOUBLE
    Float,
    /// Exact numeric with optional precision and scale
    Decimal {
        precision: Option<u16>,
        scale: Option<u16>,
    },
    /// Character types with optional max length
    String { max_length: Option<u32> },
    /// DATE
    Date,
    /// TIMESTAMP
    Timestamp,
    /// BLOB / BYTEA
    Binary,
    /// Type could not be determined; carries the original spelling
    Unknown(String),
}

impl SqlType {
    /// Returns true if this is a numeric type
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::Integer { .. } | SqlType::Float | SqlType::Decimal { .. }
        )
    }

    /// Returns true if this is a string type
    pub fn is_string(&self) -> bool {
        matches!(self, SqlType::String { .. })
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlType::Boolean => write!(f, "BOOLEAN"),
            SqlType::Integer {
                bits: IntBitWidth::I16,
            } => write!(f, "SMALLINT"),
            SqlType::Integer {
                bits: IntBitWidth::I32,
            } => write!(f, "INTEGER"),
            SqlType::Integer {
                bits: IntBitWidth::I64,
            } => write!(f, "BIGINT"),
            SqlType::Float => write!(f, "DOUBLE"),
            SqlType::Decimal {
                precision: Some(p),
                scale: Some(s),
            } => write!(f, "DECIMAL({p},{s})"),
            SqlType::Decimal {
                precision: Some(p),
                scale: None,
            } => write!(f, "DECIMAL({p})"),
            SqlType::Decimal { .. } => write!(f, "DECIMAL"),
            SqlType::String {
                max_length: Some(n),
            } => write!(f, "VARCHAR({n})"),
            SqlType::String { max_length: None } => write!(f, "VARCHAR"),
            SqlType::Date => write!(f, "DATE"),
            SqlType::Timestamp => write!(f, "TIMESTAMP"),
            SqlType::Binary => write!(f, "BLOB"),
            SqlType::Unknown(s) => write!(f, "{s}"),
        }
    }
}

impl From<String> for SqlType {
    fn from(s: String) -> Self {
        parse_sql_type(&s)
    }
}

impl From<SqlType> for String {
    fn from(ty: SqlType) -> Self {
        ty.to_string()
    }
}

/// Parse a SQL type string into a [`SqlType`].
///
/// Unrecognized spellings are preserved as [`SqlType::Unknown`].
pub fn parse_sql_type(s: &str) -> SqlType {
    let upper = s.trim().to_uppercase();
    match upper.as_str() {
        "BOOL" | "BOOLEAN" => SqlType::Boolean,
        "SMALLINT" | "INT2" => SqlType::Integer {
            bits: IntBitWidth::I16,
        },
        "INT" | "INTEGER" | "INT4" => SqlType::Integer {
            bits: IntBitWidth::I32,
        },
        "BIGINT" | "INT8" | "LONG" => SqlType::Integer {
            bits: IntBitWidth::I64,
        },
        "FLOAT" | "REAL" | "DOUBLE" | "DOUBLE PRECISION" | "FLOAT8" => SqlType::Float,
        "DECIMAL" | "NUMERIC" => SqlType::Decimal {
            precision: None,
            scale: None,
        },
        "VARCHAR" | "TEXT" | "STRING" | "CHAR" | "CHARACTER VARYING" => {
            SqlType::String { max_length: None }
        }
        "DATE" => SqlType::Date,
        "TIMESTAMP" | "DATETIME" | "TIMESTAMPTZ" => SqlType::Timestamp,
        "BLOB" | "BINARY" | "BYTEA" | "VARBINARY" => SqlType::Binary,
        _ => try_parse_parameterized(&upper).unwrap_or_else(|| SqlType::Unknown(s.to_string())),
    }
}

/// Parse `VARCHAR(255)` and `DECIMAL(10,2)` style spellings
fn try_parse_parameterized(upper: &str) -> Option<SqlType> {
    let open = upper.find('(')?;
    let inner = upper.strip_suffix(')')?.get(open + 1..)?;
    let base = upper[..open].trim();
    let args: Vec<&str> = inner.split(',').map(str::trim).collect();

    match base {
        "VARCHAR" | "CHAR" | "CHARACTER VARYING" => Some(SqlType::String {
            max_length: Some(args.first()?.parse().ok()?),
        }),
        "DECIMAL" | "NUMERIC" => Some(SqlType::Decimal {
            precision: Some(args.first()?.parse().ok()?),
            scale: match args.get(1) {
                Some(s) => Some(s.parse().ok()?),
                None => None,
            },
        }),
        _ => None,
    }
}

/// A runtime value: a constant in an operator tree, a bound parameter, or a
/// cell read from a result row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value
    Boolean(bool),
    /// 64-bit integer
    Integer(i64),
    /// Double precision float
    Float(f64),
    /// Text
    String(String),
}

impl Value {
    /// Whether this is SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Relational type used when this value is bound as a parameter
    pub fn sql_type(&self) -> SqlType {
        match self {
            Value::Null => SqlType::Unknown("NULL".to_string()),
            Value::Boolean(_) => SqlType::Boolean,
            Value::Integer(_) => SqlType::Integer {
                bits: IntBitWidth::I64,
            },
            Value::Float(_) => SqlType::Float,
            Value::String(_) => SqlType::String { max_length: None },
        }
    }

    /// Integer payload, if any
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Boolean payload, if any
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// String payload, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert into a JSON value for materialized output
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

// Floats compare by bit pattern so values can key correlation lookups.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::String(s) => s.hash(state),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

#[cfg(test)]
#[path = "value_test.rs"]
mod tests;
