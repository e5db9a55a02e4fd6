//! Relational IR: selects, row sources, scalar expressions, projectors
//!
//! Produced by the binder, rewritten by the optimizer passes and consumed by
//! the translator. Every column reference names its scope by [`ScopeId`]
//! handle, so passes can splice or merge scopes by remapping handles.

mod command;
mod expr;
mod projector;
mod scope;
mod select;
mod visit;

pub use command::{CommandNode, DeleteCommand, InsertCommand, UpdateCommand};
pub use expr::{AggregateExpr, ColumnExpr, SqlExpr, SqlFunction};
pub use projector::{NestedCollection, Projection, ProjectorExpr};
pub use scope::{ScopeArena, ScopeId, ScopeKind};
pub use select::{ColumnDef, JoinKind, JoinNode, OrderKey, SelectNode, Source};
pub(crate) use select::unique_name;
pub use visit::{remap_scopes, IrRewriter};

/// A bound compilation unit
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// A query returning rows shaped by its projector
    Query(Projection),
    /// A data-modification command
    Command(CommandNode),
}

impl Plan {
    pub fn as_query(&self) -> Option<&Projection> {
        match self {
            Plan::Query(p) => Some(p),
            Plan::Command(_) => None,
        }
    }

    pub fn as_command(&self) -> Option<&CommandNode> {
        match self {
            Plan::Command(c) => Some(c),
            Plan::Query(_) => None,
        }
    }
}
