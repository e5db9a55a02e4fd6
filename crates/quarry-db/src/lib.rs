//! quarry-db - Database layer for Quarry
//!
//! This crate provides [`DuckDbSource`], a [`quarry_compiler::DataSource`]
//! that runs compiled command text against DuckDB, plus helpers to create
//! catalog tables for local runs.

pub mod duckdb;
pub mod error;

pub use duckdb::DuckDbSource;
pub use error::{DbError, DbResult};
