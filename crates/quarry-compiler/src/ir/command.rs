//! Data-modification commands

use super::{ScopeId, SelectNode, SqlExpr};

/// `DELETE FROM table WHERE key IN (rows)`
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteCommand {
    pub table: String,
    pub key: String,
    /// Select yielding the keys of the affected rows as its only column
    pub rows: SelectNode,
}

/// `UPDATE table SET .. WHERE key IN (rows)`
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCommand {
    pub table: String,
    pub key: String,
    /// Scope standing for the row being updated inside assignments
    pub target: ScopeId,
    pub target_columns: Vec<String>,
    pub assignments: Vec<(String, SqlExpr)>,
    pub rows: SelectNode,
}

/// `INSERT INTO table (columns) source`
#[derive(Debug, Clone, PartialEq)]
pub struct InsertCommand {
    pub table: String,
    pub columns: Vec<String>,
    /// Select whose columns line up with `columns`
    pub source: SelectNode,
}

/// A bound data-modification command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandNode {
    Delete(DeleteCommand),
    Update(UpdateCommand),
    Insert(InsertCommand),
}

impl CommandNode {
    /// The select that drives the command
    pub fn select(&self) -> &SelectNode {
        match self {
            CommandNode::Delete(d) => &d.rows,
            CommandNode::Update(u) => &u.rows,
            CommandNode::Insert(i) => &i.source,
        }
    }

    pub fn select_mut(&mut self) -> &mut SelectNode {
        match self {
            CommandNode::Delete(d) => &mut d.rows,
            CommandNode::Update(u) => &mut u.rows,
            CommandNode::Insert(i) => &mut i.source,
        }
    }

    /// Rebuild the driving select
    pub fn map_select<E>(
        self,
        f: impl FnOnce(SelectNode) -> Result<SelectNode, E>,
    ) -> Result<CommandNode, E> {
        Ok(match self {
            CommandNode::Delete(mut d) => {
                d.rows = f(d.rows)?;
                CommandNode::Delete(d)
            }
            CommandNode::Update(mut u) => {
                u.rows = f(u.rows)?;
                CommandNode::Update(u)
            }
            CommandNode::Insert(mut i) => {
                i.source = f(i.source)?;
                CommandNode::Insert(i)
            }
        })
    }
}
