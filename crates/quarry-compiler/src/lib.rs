//! quarry-compiler: a multi-pass compiler from query operator trees to SQL
//!
//! The pipeline is normalize → secure → bind → optimize → translate. Each
//! stage consumes and produces an immutable tree; the final [`Translation`]
//! holds the command text, its ordered parameters, and a compiled
//! materializer that rebuilds result objects from rows.

pub(crate) mod binder;
pub(crate) mod error;
pub mod exec;
pub mod ir;
pub mod normalize;
pub mod optimize;
pub(crate) mod provider;
pub mod query;
pub mod security;
pub mod translate;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;

pub use binder::Binder;
pub use error::{CompileError, CompileResult, DataError, QueryError};
pub use exec::{DataSource, MemorySource, MemorySourceError, Row, RowCursor, VecCursor};
pub use ir::{CommandNode, Plan, Projection, ProjectorExpr, ScopeArena, ScopeId, SelectNode};
pub use normalize::{normalize, normalize_lambda, MacroDef, MacroRegistry};
pub use optimize::{Optimizer, PassContext, RewritePass};
pub use provider::QueryProvider;
pub use query::{
    AggregateKind, BinOp, ConvertTarget, ElementType, Expr, JoinType, Lambda, QueryNode, SetOpKind,
    SortKey, UnOp,
};
pub use security::SecurityFilters;
pub use translate::{
    ChildTranslation, Command, CommandTranslation, Parameter, ResultShape, ShapeField, Translation,
    TranslatorBuilder,
};
