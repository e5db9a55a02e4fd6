//! CLI command implementations

pub(crate) mod common;
pub(crate) mod compile;
pub(crate) mod delete;
pub(crate) mod passes;
pub(crate) mod run;
pub(crate) mod schema;
