//! Row security: per-entity predicates injected above every entity source
//!
//! Predicates are opaque to the compiler. They are wrapped around the leaf as
//! a `Filter`, and the leaf is marked secured so a second pass over the same
//! tree changes nothing.

use crate::error::{CompileError, CompileResult};
use crate::query::{rewrite_lambda, rewrite_node, Lambda, QueryNode, TreeRewriter};
use std::collections::BTreeMap;

/// Registered row predicates, keyed by entity name
#[derive(Debug, Clone, Default)]
pub struct SecurityFilters {
    predicates: BTreeMap<String, Lambda>,
}

impl SecurityFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the row predicate for `entity`; it must take exactly one parameter
    pub fn register(&mut self, entity: impl Into<String>, predicate: Lambda) -> CompileResult<()> {
        let entity = entity.into();
        if predicate.params.len() != 1 {
            return Err(CompileError::SecurityFilter {
                entity,
                message: format!(
                    "predicate must take one parameter, found {}",
                    predicate.params.len()
                ),
            });
        }
        if self.predicates.contains_key(&entity) {
            return Err(CompileError::SecurityFilter {
                entity,
                message: "already registered".to_string(),
            });
        }
        // Sources inside the predicate are trusted as written.
        let predicate = rewrite_lambda(predicate, &mut MarkSecured);
        self.predicates.insert(entity, predicate);
        Ok(())
    }

    /// The predicate registered for `entity`
    pub fn predicate_for(&self, entity: &str) -> Option<&Lambda> {
        self.predicates.get(entity)
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Wrap every unsecured source of a filtered entity in its predicate
    pub fn apply(&self, tree: QueryNode) -> QueryNode {
        if self.is_empty() {
            return tree;
        }
        rewrite_node(tree, &mut Injector { filters: self })
    }

    /// [`SecurityFilters::apply`] for the sources inside a lambda body
    pub fn apply_lambda(&self, lambda: Lambda) -> Lambda {
        if self.is_empty() {
            return lambda;
        }
        rewrite_lambda(lambda, &mut Injector { filters: self })
    }
}

struct Injector<'a> {
    filters: &'a SecurityFilters,
}

impl TreeRewriter for Injector<'_> {
    fn rewrite_node(&mut self, node: QueryNode) -> QueryNode {
        let entity = match &node {
            QueryNode::Source {
                entity,
                secured: false,
            }
            | QueryNode::Related {
                entity,
                secured: false,
                ..
            } => entity,
            _ => return node,
        };
        let Some(predicate) = self.filters.predicate_for(entity).cloned() else {
            return node;
        };
        log::debug!("Injecting row predicate for {}", entity);
        mark_secured(node).filter(predicate)
    }
}

fn mark_secured(node: QueryNode) -> QueryNode {
    match node {
        QueryNode::Source { entity, .. } => QueryNode::Source {
            entity,
            secured: true,
        },
        QueryNode::Related {
            owner,
            relation,
            entity,
            ..
        } => QueryNode::Related {
            owner,
            relation,
            entity,
            secured: true,
        },
        other => other,
    }
}

struct MarkSecured;

impl TreeRewriter for MarkSecured {
    fn rewrite_node(&mut self, node: QueryNode) -> QueryNode {
        mark_secured(node)
    }
}

#[cfg(test)]
#[path = "security_test.rs"]
mod tests;
