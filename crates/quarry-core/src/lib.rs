//! quarry-core - Core library for Quarry
//!
//! This crate provides the shared types used by every Quarry component:
//! runtime values and SQL types, the entity catalog describing tables and
//! relationships, compiler configuration, and identifier quoting.

pub mod catalog;
pub mod config;
pub mod error;
pub mod sql_utils;
pub mod value;

pub use catalog::{Catalog, ColumnMeta, EntityDef, RelationDef, RelationKind};
pub use config::{Config, Dialect, NormalizerConfig, OptimizerConfig};
pub use error::{CoreError, CoreResult};
pub use value::{parse_sql_type, IntBitWidth, SqlType, Value};
