//! In-memory data source serving scripted results

use super::{DataSource, Row, RowCursor, VecCursor};
use crate::error::DataError;
use crate::translate::Command;
use quarry_core::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;

/// Errors raised by [`MemorySource`]
#[derive(Error, Debug)]
pub enum MemorySourceError {
    /// Every scripted response has been consumed
    #[error("no scripted response left for: {0}")]
    Exhausted(String),

    /// The next scripted response is of the other kind
    #[error("next scripted response is {scripted}, but a {requested} was run")]
    WrongKind {
        scripted: &'static str,
        requested: &'static str,
    },

    #[error("memory source lock poisoned")]
    Poisoned,
}

#[derive(Debug)]
enum Scripted {
    Rows(Vec<Row>),
    Count(u64),
}

impl Scripted {
    fn kind(&self) -> &'static str {
        match self {
            Scripted::Rows(_) => "rows",
            Scripted::Count(_) => "count",
        }
    }
}

/// Serves scripted responses in order and records every command it runs
///
/// Each query consumes the next row set; each data-modification command
/// consumes the next affected-row count.
#[derive(Debug, Default)]
pub struct MemorySource {
    responses: Mutex<VecDeque<Scripted>>,
    commands: Mutex<Vec<Command>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the rows of the next query
    pub fn with_rows(mut self, rows: impl IntoIterator<Item = Vec<Value>>) -> Self {
        let rows = rows.into_iter().map(Row::new).collect();
        self.queue().push_back(Scripted::Rows(rows));
        self
    }

    /// Queue the affected-row count of the next command
    pub fn with_count(mut self, count: u64) -> Self {
        self.queue().push_back(Scripted::Count(count));
        self
    }

    /// Commands run so far, in order
    pub fn commands(&self) -> Vec<Command> {
        self.commands
            .lock()
            .map(|commands| commands.clone())
            .unwrap_or_default()
    }

    fn queue(&mut self) -> &mut VecDeque<Scripted> {
        self.responses
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next(&self, command: &Command) -> Result<Scripted, MemorySourceError> {
        self.commands
            .lock()
            .map_err(|_| MemorySourceError::Poisoned)?
            .push(command.clone());
        self.responses
            .lock()
            .map_err(|_| MemorySourceError::Poisoned)?
            .pop_front()
            .ok_or_else(|| MemorySourceError::Exhausted(command.text.clone()))
    }
}

impl DataSource for MemorySource {
    fn query(&self, command: &Command) -> Result<Box<dyn RowCursor + '_>, DataError> {
        match self.next(command).map_err(DataError::new)? {
            Scripted::Rows(rows) => Ok(Box::new(VecCursor::new(rows))),
            other => Err(DataError::new(MemorySourceError::WrongKind {
                scripted: other.kind(),
                requested: "query",
            })),
        }
    }

    fn execute(&self, command: &Command) -> Result<u64, DataError> {
        match self.next(command).map_err(DataError::new)? {
            Scripted::Count(count) => Ok(count),
            other => Err(DataError::new(MemorySourceError::WrongKind {
                scripted: other.kind(),
                requested: "command",
            })),
        }
    }
}
