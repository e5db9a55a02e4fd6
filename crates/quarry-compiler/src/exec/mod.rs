//! Execution contract between compiled queries and a data source
//!
//! The compiler never talks to a database itself. A [`DataSource`] runs
//! command text with its parameters and hands back rows; the translation
//! then loads nested collections and materializes output values.

mod memory;

pub use memory::{MemorySource, MemorySourceError};

use crate::error::{DataError, QueryError};
use crate::translate::{Command, CommandTranslation, NestedRows, Translation};
use log::debug;
use quarry_core::Value;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// One result row, values in column order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Value at `ordinal`
    pub fn get(&self, ordinal: usize) -> Result<&Value, QueryError> {
        self.0.get(ordinal).ok_or_else(|| QueryError::Materialize {
            message: format!("row has {} columns, column {ordinal} requested", self.0.len()),
        })
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Values at `ordinals`, used to match child rows to their owner
    pub(crate) fn key(&self, ordinals: &[usize]) -> Result<Vec<Value>, QueryError> {
        ordinals.iter().map(|&i| self.get(i).cloned()).collect()
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Forward-only reader over the rows of one command
pub trait RowCursor {
    /// Next row, or `None` once the result is exhausted
    fn next_row(&mut self) -> Result<Option<Row>, DataError>;
}

/// Runs command text against a store
pub trait DataSource {
    /// Run a query and return a cursor over its rows
    fn query(&self, command: &Command) -> Result<Box<dyn RowCursor + '_>, DataError>;

    /// Run a data-modification command and return the affected row count
    fn execute(&self, command: &Command) -> Result<u64, DataError>;
}

/// Cursor over rows already held in memory
#[derive(Debug)]
pub struct VecCursor {
    rows: std::vec::IntoIter<Row>,
}

impl VecCursor {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl RowCursor for VecCursor {
    fn next_row(&mut self) -> Result<Option<Row>, DataError> {
        Ok(self.rows.next())
    }
}

impl Translation {
    /// Run the query and its nested collections, materializing one value
    /// per row of the top query
    pub fn execute(&self, source: &dyn DataSource) -> Result<Vec<serde_json::Value>, QueryError> {
        let rows = fetch(source, &self.command)?;
        let nested = self.load_nested(source)?;
        rows.iter()
            .map(|row| (self.materializer)(row, &nested))
            .collect()
    }

    /// [`Translation::execute`], deserializing each value into `T`
    pub fn execute_as<T: DeserializeOwned>(
        &self,
        source: &dyn DataSource,
    ) -> Result<Vec<T>, QueryError> {
        self.execute(source)?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(QueryError::from))
            .collect()
    }

    /// Run each child query and group its materialized rows by key, keeping
    /// the order rows arrived in
    fn load_nested(&self, source: &dyn DataSource) -> Result<NestedRows, QueryError> {
        let mut nested = NestedRows::default();
        for child in &self.children {
            let rows = fetch(source, &child.translation.command)?;
            let grandchildren = child.translation.load_nested(source)?;
            let mut groups: HashMap<Vec<Value>, Vec<serde_json::Value>> = HashMap::new();
            for row in &rows {
                let key = row.key(&child.key_ordinals)?;
                let value = (child.translation.materializer)(row, &grandchildren)?;
                groups.entry(key).or_default().push(value);
            }
            debug!("Loaded {} nested rows in {} groups", rows.len(), groups.len());
            nested.push(child.outer_ordinals.clone(), child.null_keys_match, groups);
        }
        Ok(nested)
    }
}

impl CommandTranslation {
    /// Run the command and return the affected row count
    pub fn execute(&self, source: &dyn DataSource) -> Result<u64, QueryError> {
        debug!("Executing: {}", self.command.text);
        Ok(source.execute(&self.command)?)
    }
}

fn fetch(source: &dyn DataSource, command: &Command) -> Result<Vec<Row>, QueryError> {
    debug!("Querying: {}", command.text);
    let mut cursor = source.query(command)?;
    let mut rows = Vec::new();
    while let Some(row) = cursor.next_row()? {
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
#[path = "exec_test.rs"]
mod tests;
