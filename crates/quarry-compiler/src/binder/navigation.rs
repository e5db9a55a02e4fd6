//! Relationship navigation, correlated subqueries and nested collections

use super::shape::{GroupInfo, Shape};
use super::{scalar, Binder, Bound, Correlate, Correlation, PendingJoin};
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    remap_scopes, AggregateExpr, ColumnDef, JoinKind, NestedCollection, Projection, ScopeKind,
    SelectNode, Source, SqlExpr,
};
use crate::query::{AggregateKind, BinOp, Expr, Lambda};
use log::trace;
use quarry_core::{RelationDef, RelationKind};
use std::rc::Rc;

/// A sequence an aggregate or existence test ranges over
enum Sequence {
    Query(Bound),
    Group { key: Shape, info: Rc<GroupInfo> },
}

impl<'a> Binder<'a> {
    /// The relationship `name` of an entity-valued owner
    pub(super) fn relation_of(&self, owner: &Shape, name: &str) -> Option<&'a RelationDef> {
        let Shape::Entity { entity, .. } = owner else {
            return None;
        };
        let catalog = self.catalog;
        catalog.entity(entity)?.find_relation(name)
    }

    /// Many-to-one navigation: joins the target table into the select being
    /// built, reusing an earlier join through the same foreign key
    pub(super) fn navigate(&mut self, owner: &Shape, relation: &RelationDef) -> CompileResult<Shape> {
        let Shape::Entity {
            entity, presence, ..
        } = owner
        else {
            return Err(CompileError::binding(format!(
                "navigation '{}' from a non-entity value",
                relation.name
            )));
        };
        let fk = owner
            .entity_field(&relation.foreign_key)
            .cloned()
            .ok_or_else(|| {
                CompileError::binding(format!(
                    "foreign key '{}' of '{entity}'",
                    relation.foreign_key
                ))
            })?;
        let target = self.entity(&relation.target)?;
        let outer = relation.optional || presence.is_some();

        let existing = match self.frames.last() {
            None => {
                return Err(CompileError::binding(format!(
                    "navigation '{entity}.{}' outside a query",
                    relation.name
                )))
            }
            Some(frame) if !frame.allow_joins => {
                return Err(CompileError::binding(format!(
                    "navigation '{entity}.{}' in this position",
                    relation.name
                )))
            }
            Some(frame) => frame
                .joins
                .iter()
                .find(|j| j.table == target.table && j.fk == fk)
                .map(|j| j.scope),
        };
        let scope = match existing {
            Some(scope) => scope,
            None => {
                let scope = self.arena.alloc(ScopeKind::Table);
                trace!("Navigation join {entity}.{} as {scope}", relation.name);
                let join = PendingJoin {
                    kind: if outer {
                        JoinKind::LeftOuter
                    } else {
                        JoinKind::Inner
                    },
                    scope,
                    table: target.table.clone(),
                    columns: target.column_names().into_iter().map(String::from).collect(),
                    predicate: SqlExpr::eq(SqlExpr::column(scope, target.key.clone()), fk.clone()),
                    fk,
                };
                if let Some(frame) = self.frames.last_mut() {
                    frame.joins.push(join);
                }
                scope
            }
        };
        let presence = outer.then(|| SqlExpr::column(scope, target.key.clone()));
        Ok(super::entity_shape(target, scope, presence))
    }

    /// Rows of the relationship `relation` of `owner`, tied to the owner per
    /// the current correlation mode
    pub(super) fn related_leaf(
        &mut self,
        owner: &Shape,
        relation: &str,
        secured: bool,
    ) -> CompileResult<Bound> {
        let Shape::Entity { entity, .. } = owner else {
            return Err(CompileError::binding(format!(
                "relation '{relation}' of a non-entity value"
            )));
        };
        let def = self.entity(entity)?;
        let rel = def.find_relation(relation).ok_or_else(|| {
            CompileError::binding(format!("unknown relation '{relation}' of '{entity}'"))
        })?;
        let target = self.entity(&rel.target)?;
        let (leaf_column, owner_column) = match rel.kind {
            RelationKind::Collection => (&rel.foreign_key, &def.key),
            RelationKind::Reference => (&target.key, &rel.foreign_key),
        };
        let outer = owner.entity_field(owner_column).cloned().ok_or_else(|| {
            CompileError::binding(format!("column '{owner_column}' of '{entity}'"))
        })?;
        let security = self.security;
        let predicate = if secured {
            None
        } else {
            security.predicate_for(&target.name)
        };
        self.entity_leaf(target, predicate, Some((leaf_column.clone(), outer)))
    }

    /// Bind the rows of a nested collection and close it into a placeholder
    pub(super) fn nested(
        &mut self,
        bind: impl FnOnce(&mut Self) -> CompileResult<Bound>,
    ) -> CompileResult<Shape> {
        let bound = self.with_mode(Correlate::Keys, bind)?;
        if has_paging(&bound.select) {
            return Err(CompileError::binding(
                "row limit inside a nested collection".to_string(),
            ));
        }
        let nested = self.nested_collection(bound, false)?;
        Ok(Shape::Nested(Box::new(nested)))
    }

    pub(super) fn nested_collection(
        &mut self,
        bound: Bound,
        null_keys_match: bool,
    ) -> CompileResult<NestedCollection> {
        if !bound.select.free_scopes().is_empty() {
            return Err(CompileError::binding(
                "nested collection referring to its enclosing query".to_string(),
            ));
        }
        let projector = self.finalize(bound.shape)?;
        let mut keys = Vec::with_capacity(bound.correlations.len());
        let mut outer_keys = Vec::with_capacity(bound.correlations.len());
        for c in bound.correlations {
            let key = c.inner.as_column().cloned().ok_or_else(|| CompileError::Translation {
                message: format!("correlation key is not a column: {:?}", c.inner),
            })?;
            keys.push(key);
            outer_keys.push(c.outer);
        }
        Ok(NestedCollection {
            projection: Projection {
                select: bound.select,
                projector,
                keys,
            },
            outer_keys,
            null_keys_match,
        })
    }

    /// Rows of a group: a fresh copy of the rows it was built from, tied to
    /// `outer_keys` (the group key as read at the point of use)
    pub(super) fn group_elements(
        &mut self,
        info: &GroupInfo,
        outer_keys: Vec<SqlExpr>,
        mode: Correlate,
    ) -> CompileResult<Bound> {
        let (copy, map) = self.arena.duplicate(&info.pre);
        let element = info
            .element
            .clone()
            .map_reads(&mut |e| remap_scopes(e, &map));
        let keys = info.keys.iter().map(|k| remap_scopes(k.clone(), &map));
        match mode {
            Correlate::Keys => Ok(Bound {
                select: copy,
                shape: element,
                correlations: keys
                    .zip(outer_keys)
                    .map(|(inner, outer)| Correlation { inner, outer })
                    .collect(),
            }),
            Correlate::Predicate => {
                let keys: Vec<SqlExpr> = keys.collect();
                let input = Bound {
                    select: copy,
                    shape: element,
                    correlations: Vec::new(),
                };
                let (mut layer, shape) = self.derive(input, false);
                for (inner, outer) in keys.into_iter().zip(outer_keys) {
                    layer.select.add_predicate(null_safe_eq(inner, outer));
                }
                Ok(self.finish(layer, Vec::new(), shape))
            }
        }
    }

    fn sequence(&mut self, expr: &Expr) -> CompileResult<Sequence> {
        let shape = match expr {
            Expr::Subquery(node) => return Ok(Sequence::Query(self.bind_node(node)?)),
            Expr::Member { target, name } => {
                let owner = self.bind_expr(target)?;
                if let Some(rel) = self.relation_of(&owner, name) {
                    if rel.kind == RelationKind::Collection {
                        return Ok(Sequence::Query(self.related_leaf(&owner, name, false)?));
                    }
                }
                self.member(owner, name)?
            }
            other => self.bind_expr(other)?,
        };
        match shape {
            Shape::Group { key, info } => Ok(Sequence::Group { key: *key, info }),
            Shape::Nested(_) => Err(CompileError::binding(
                "query over a projected collection".to_string(),
            )),
            _ => Err(CompileError::binding(
                "aggregate or query over a value that is not a sequence".to_string(),
            )),
        }
    }

    /// Rows of a sequence-valued expression, tied to the enclosing query per
    /// the current correlation mode
    pub(super) fn bind_sequence(&mut self, expr: &Expr) -> CompileResult<Bound> {
        match self.sequence(expr)? {
            Sequence::Query(bound) => Ok(bound),
            Sequence::Group { key, info } => {
                let mode = self.correlate_mode();
                self.group_elements(&info, key.reads(), mode)
            }
        }
    }

    /// An aggregate over a sequence: a correlated scalar subquery, or for a
    /// group an aggregate the optimizer may compute in the grouping select
    pub(super) fn bind_aggregate(
        &mut self,
        kind: AggregateKind,
        source: &Expr,
        selector: Option<&Lambda>,
    ) -> CompileResult<Shape> {
        let sequence = self.with_mode(Correlate::Predicate, |b| b.sequence(source))?;
        match sequence {
            Sequence::Query(bound) => {
                if !bound.correlations.is_empty() {
                    return Err(CompileError::binding(
                        "aggregate over a nested collection".to_string(),
                    ));
                }
                let select = self.aggregate_select(bound, kind, selector)?;
                Ok(Shape::Scalar(SqlExpr::Subquery(Box::new(select))))
            }
            Sequence::Group { key, info } => {
                let (arg, _) = self.in_frame(false, |b| {
                    selector
                        .map(|l| {
                            b.bind_scalar_lambda(l, vec![info.element.clone()], "aggregate selector")
                        })
                        .transpose()
                })?;
                let elements = self.group_elements(&info, key.reads(), Correlate::Predicate)?;
                let fallback = self.aggregate_select(elements, kind, selector)?;
                Ok(Shape::Scalar(SqlExpr::AggregateSubquery {
                    group: info.group_scope,
                    aggregate: AggregateExpr::new(kind, arg),
                    subquery: Box::new(fallback),
                }))
            }
        }
    }

    /// `EXISTS (SELECT 1 FROM sequence WHERE predicate)`
    pub(super) fn bind_any(
        &mut self,
        source: &Expr,
        predicate: Option<&Lambda>,
    ) -> CompileResult<Shape> {
        let bound = self.with_mode(Correlate::Predicate, |b| b.bind_sequence(source))?;
        let (layer, shape) = self.derive(bound, false);
        let (filter, joins) = self.in_frame(true, |b| {
            predicate
                .map(|p| b.bind_lambda(p, vec![shape]).and_then(|s| scalar(s, "predicate")))
                .transpose()
        })?;
        let mut select = layer.select;
        if let Some(from) = select.from.take() {
            select.from = Some(super::attach_joins(from, joins));
        }
        if let Some(filter) = filter {
            select.add_predicate(filter);
        }
        select.columns = vec![ColumnDef::new("one", SqlExpr::Literal(1))];
        Ok(Shape::Scalar(SqlExpr::Exists(Box::new(select))))
    }
}

/// `a = b`, also true when both are NULL
fn null_safe_eq(a: SqlExpr, b: SqlExpr) -> SqlExpr {
    let both_null = SqlExpr::binary(
        BinOp::And,
        SqlExpr::IsNull {
            operand: Box::new(a.clone()),
            negated: false,
        },
        SqlExpr::IsNull {
            operand: Box::new(b.clone()),
            negated: false,
        },
    );
    SqlExpr::binary(BinOp::Or, SqlExpr::eq(a, b), both_null)
}

/// Whether `select` or a select on its FROM chain limits or skips rows
fn has_paging(select: &SelectNode) -> bool {
    fn source_has_paging(source: &Source) -> bool {
        match source {
            Source::Table { .. } => false,
            Source::Select(s) => has_paging(s),
            Source::Join(join) => source_has_paging(&join.left) || source_has_paging(&join.right),
            Source::SetOp { left, right, .. } => has_paging(left) || has_paging(right),
        }
    }
    select.limit.is_some()
        || select.offset.is_some()
        || select.from.as_ref().is_some_and(source_has_paging)
}
