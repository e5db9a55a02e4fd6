//! Translator: optimized IR to command text, parameters and materializers
//!
//! A query becomes one [`Translation`]: the SELECT text for its top select,
//! the ordered parameters bound to its placeholders, a [`ResultShape`] and
//! the materializer compiled from it. Each nested collection becomes a child
//! translation whose rows are matched to parent rows by correlation key.

mod command;
mod materializer;
mod writer;

pub use materializer::{ResultShape, ShapeField};
pub(crate) use materializer::{Materializer, NestedRows};

use crate::error::{CompileError, CompileResult};
use crate::ir::{CommandNode, NestedCollection, OrderKey, Projection, SelectNode, SqlExpr};
use crate::query::BinOp;
use log::debug;
use materializer::{compile, ordinal_of, shape_of};
use quarry_core::{Dialect, SqlType, Value};
use serde::Serialize;
use writer::SqlWriter;

/// A value bound to one placeholder
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    /// Dialect parameter name (`p1`, `@p0`)
    pub name: String,
    pub value: Value,
    pub sql_type: SqlType,
}

/// Command text and its parameters, in placeholder order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub text: String,
    pub parameters: Vec<Parameter>,
}

/// A compiled query
pub struct Translation {
    pub command: Command,
    pub shape: ResultShape,
    /// Secondary queries, indexed by [`ResultShape::Collection`]
    pub children: Vec<ChildTranslation>,
    pub(crate) materializer: Materializer,
}

impl std::fmt::Debug for Translation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Translation")
            .field("command", &self.command)
            .field("shape", &self.shape)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

impl Translation {
    /// Every command this translation runs, parent before children
    pub fn commands(&self) -> Vec<&Command> {
        let mut commands = vec![&self.command];
        for child in &self.children {
            commands.extend(child.translation.commands());
        }
        commands
    }
}

/// A nested collection's secondary query
#[derive(Debug)]
pub struct ChildTranslation {
    pub translation: Translation,
    /// Parent-row ordinals of the correlation values
    pub outer_ordinals: Vec<usize>,
    /// Child-row ordinals of the matching key values
    pub key_ordinals: Vec<usize>,
    /// A parent row with a NULL key owns the child rows with a NULL key
    pub null_keys_match: bool,
}

/// A compiled data-modification command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandTranslation {
    pub command: Command,
}

/// Builds translations for one dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct TranslatorBuilder {
    dialect: Dialect,
}

impl TranslatorBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Translate an optimized query
    pub fn build(&self, projection: Projection) -> CompileResult<Translation> {
        let Projection {
            select, projector, ..
        } = projection;
        let mut nested = Vec::new();
        let shape = shape_of(&projector, &select, &mut nested)?;

        let mut writer = SqlWriter::new(self.dialect);
        let text = writer.select(&select)?;
        let command = Command {
            text,
            parameters: writer.into_parameters(),
        };
        debug!(
            "Translated {} ({} parameters, {} nested)",
            select.scope,
            command.parameters.len(),
            nested.len()
        );

        let children = nested
            .into_iter()
            .map(|collection| self.build_child(&select, collection))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(Translation {
            materializer: compile(&shape),
            command,
            shape,
            children,
        })
    }

    /// Translate an optimized data-modification command
    pub fn build_command(&self, command: CommandNode) -> CompileResult<CommandTranslation> {
        let command = command::render(self.dialect, &command)?;
        Ok(CommandTranslation { command })
    }

    fn build_child(
        &self,
        parent: &SelectNode,
        collection: NestedCollection,
    ) -> CompileResult<ChildTranslation> {
        let NestedCollection {
            projection,
            outer_keys,
            null_keys_match,
        } = collection;
        if outer_keys.len() != projection.keys.len() {
            return Err(CompileError::Translation {
                message: format!(
                    "{} outer keys for {} correlation keys",
                    outer_keys.len(),
                    projection.keys.len()
                ),
            });
        }
        let outer_ordinals = outer_keys
            .iter()
            .map(|key| ordinal_of(key, parent))
            .collect::<CompileResult<Vec<_>>>()?;
        let key_ordinals = projection
            .keys
            .iter()
            .map(|key| ordinal_of(&SqlExpr::Column(key.clone()), &projection.select))
            .collect::<CompileResult<Vec<_>>>()?;
        let projection = correlate(projection, parent, &outer_ordinals, null_keys_match)?;
        Ok(ChildTranslation {
            translation: self.build(projection)?,
            outer_ordinals,
            key_ordinals,
            null_keys_match,
        })
    }
}

/// Restrict child rows to keys some parent row holds, then order them by
/// key so rows of one owner arrive together.
///
/// The restriction is a semi-join against a copy of the parent select
/// reduced to its key column. It is only added for single-column keys, and
/// not when the parent is DISTINCT and paged: reducing its columns would
/// change which rows the limit keeps. Rows with a NULL key are kept only
/// when NULL keys match, as they do for group elements.
fn correlate(
    mut child: Projection,
    parent: &SelectNode,
    outer_ordinals: &[usize],
    null_keys_match: bool,
) -> CompileResult<Projection> {
    let mut key_exprs = Vec::with_capacity(child.keys.len());
    for key in &child.keys {
        let column = child.select.column(&key.name).ok_or_else(|| CompileError::Translation {
            message: format!("correlation key '{}' missing from {}", key.name, child.select.scope),
        })?;
        key_exprs.push(column.expr.clone());
    }

    let paged = parent.limit.is_some() || parent.offset.is_some();
    if let ([key], [outer]) = (key_exprs.as_slice(), outer_ordinals) {
        if !(parent.distinct && paged) {
            let mut owners = parent.clone();
            owners.columns = vec![parent.columns[*outer].clone()];
            if !paged {
                owners.order_by.clear();
            }
            let owned = SqlExpr::In {
                operand: Box::new(key.clone()),
                subquery: Box::new(owners),
            };
            let restriction = if null_keys_match {
                let null_key = SqlExpr::IsNull {
                    operand: Box::new(key.clone()),
                    negated: false,
                };
                SqlExpr::binary(BinOp::Or, owned, null_key)
            } else {
                owned
            };
            child.select.add_predicate(restriction);
        }
    }

    let mut order: Vec<OrderKey> = key_exprs
        .into_iter()
        .map(|expr| OrderKey {
            expr,
            descending: false,
        })
        .collect();
    order.append(&mut child.select.order_by);
    child.select.order_by = order;
    Ok(child)
}

#[cfg(test)]
#[path = "translate_test.rs"]
mod tests;
