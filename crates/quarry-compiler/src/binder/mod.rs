//! Binder: operator tree → relational IR plus projector
//!
//! Nodes bind bottom-up. Every node over an input opens a fresh select
//! whose FROM is the input's select, so each scope is introduced exactly
//! once; the optimizer flattens the layers afterwards. Values flow between
//! layers as [`Shape`]s whose leaves are exposed as output columns by the
//! [`ColumnProjector`], and turned into a [`ProjectorExpr`] only at the top.

mod command;
mod expr;
mod navigation;
mod shape;

use crate::error::{CompileError, CompileResult};
use crate::ir::{
    AggregateExpr, ColumnDef, JoinKind, JoinNode, OrderKey, Projection, ProjectorExpr, ScopeArena,
    ScopeId, ScopeKind, SelectNode, Source, SqlExpr,
};
use crate::query::{AggregateKind, Expr, JoinType, Lambda, QueryNode, SetOpKind};
use crate::security::SecurityFilters;
use log::debug;
use quarry_core::{Catalog, EntityDef, Value};
use shape::{ColumnProjector, GroupInfo, Shape};
use std::rc::Rc;

/// A bound sequence: a select whose rows the shape reads
#[derive(Debug, Clone)]
pub(crate) struct Bound {
    pub select: SelectNode,
    /// Reads columns of `select`
    pub shape: Shape,
    /// Correlation keys of a nested collection under binding
    pub correlations: Vec<Correlation>,
}

/// Equality tying a nested collection's rows to its parent row
#[derive(Debug, Clone)]
pub(crate) struct Correlation {
    /// Over the nested select's columns
    pub inner: SqlExpr,
    /// Over the parent's visible scopes
    pub outer: SqlExpr,
}

/// A select under construction over an input
struct Layer {
    select: SelectNode,
    correlations: Vec<Correlation>,
}

/// A navigation join waiting to be attached to the select being built
#[derive(Debug, Clone)]
struct PendingJoin {
    kind: JoinKind,
    scope: ScopeId,
    table: String,
    columns: Vec<String>,
    predicate: SqlExpr,
    /// Dedup key: target table and foreign key expression
    fk: SqlExpr,
}

/// Navigation joins collected for one select
#[derive(Debug)]
struct JoinFrame {
    joins: Vec<PendingJoin>,
    allow_joins: bool,
}

/// How a collection navigation leaf ties itself to its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Correlate {
    /// Correlated subquery: filter the leaf by the owner's key
    Predicate,
    /// Nested collection: expose the key, match rows after loading
    Keys,
}

/// Converts operator trees into relational IR
pub struct Binder<'a> {
    catalog: &'a Catalog,
    security: &'a SecurityFilters,
    arena: ScopeArena,
    env: Vec<(String, Shape)>,
    frames: Vec<JoinFrame>,
    modes: Vec<Correlate>,
}

impl<'a> Binder<'a> {
    pub fn new(catalog: &'a Catalog, security: &'a SecurityFilters) -> Self {
        Self {
            catalog,
            security,
            arena: ScopeArena::new(),
            env: Vec::new(),
            frames: Vec::new(),
            modes: Vec::new(),
        }
    }

    /// The scope arena, for the optimizer and translator to continue from
    pub fn into_arena(self) -> ScopeArena {
        self.arena
    }

    /// Bind a query into a select and the projector reading its rows
    pub fn bind(&mut self, tree: &QueryNode) -> CompileResult<Projection> {
        debug!("Binding {} query", tree.kind_name());
        let bound = self.bind_node(tree)?;
        let projector = self.finalize(bound.shape)?;
        Ok(Projection::new(bound.select, projector))
    }

    fn entity(&self, name: &str) -> CompileResult<&'a EntityDef> {
        let catalog = self.catalog;
        catalog
            .entity(name)
            .ok_or_else(|| CompileError::binding(format!("unknown entity '{name}'")))
    }

    fn correlate_mode(&self) -> Correlate {
        self.modes.last().copied().unwrap_or(Correlate::Predicate)
    }

    fn with_mode<T>(
        &mut self,
        mode: Correlate,
        f: impl FnOnce(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<T> {
        self.modes.push(mode);
        let result = f(self);
        self.modes.pop();
        result
    }

    /// Bind `params` to `args` for the duration of `f`
    fn with_params<T>(
        &mut self,
        params: &[String],
        args: Vec<Shape>,
        f: impl FnOnce(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<T> {
        if params.len() != args.len() {
            return Err(CompileError::binding(format!(
                "lambda with {} parameters where {} are supplied",
                params.len(),
                args.len()
            )));
        }
        let depth = self.env.len();
        self.env.extend(params.iter().cloned().zip(args));
        let result = f(self);
        self.env.truncate(depth);
        result
    }

    fn bind_lambda(&mut self, lambda: &Lambda, args: Vec<Shape>) -> CompileResult<Shape> {
        self.with_params(&lambda.params, args, |b| b.bind_expr(&lambda.body))
    }

    fn bind_scalar_lambda(
        &mut self,
        lambda: &Lambda,
        args: Vec<Shape>,
        what: &str,
    ) -> CompileResult<SqlExpr> {
        let shape = self.bind_lambda(lambda, args)?;
        scalar(shape, what)
    }

    /// Run `f` with a fresh navigation-join frame and return the joins it added
    fn in_frame<T>(
        &mut self,
        allow_joins: bool,
        f: impl FnOnce(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<(T, Vec<PendingJoin>)> {
        self.frames.push(JoinFrame {
            joins: Vec::new(),
            allow_joins,
        });
        let result = f(self);
        let frame = self.frames.pop();
        Ok((result?, frame.map(|f| f.joins).unwrap_or_default()))
    }

    /// Open a select over `input`. With `keep_order`, the input's ordering is
    /// exposed as columns and carried to the new select.
    fn derive(&mut self, input: Bound, keep_order: bool) -> (Layer, Shape) {
        let Bound {
            mut select,
            shape,
            correlations,
        } = input;
        let order = if keep_order {
            lift_order(&mut select)
        } else {
            Vec::new()
        };
        let mut outer = SelectNode::new(
            self.arena.alloc(ScopeKind::Select),
            Source::Select(Box::new(select)),
        );
        outer.order_by = order;
        (
            Layer {
                select: outer,
                correlations,
            },
            shape,
        )
    }

    /// Close a layer: attach its navigation joins and expose `shape` and the
    /// correlation keys as its columns
    fn finish(&mut self, layer: Layer, joins: Vec<PendingJoin>, shape: Shape) -> Bound {
        let Layer {
            mut select,
            correlations,
        } = layer;
        if let Some(from) = select.from.take() {
            select.from = Some(attach_joins(from, joins));
        }
        let (shape, correlations) = {
            let mut projector = ColumnProjector::new(&mut select);
            let shape = projector.shape(shape);
            let correlations = correlations
                .into_iter()
                .map(|c| Correlation {
                    inner: projector.column(c.inner),
                    outer: c.outer,
                })
                .collect();
            (shape, correlations)
        };
        Bound {
            select,
            shape,
            correlations,
        }
    }

    pub(crate) fn bind_node(&mut self, node: &QueryNode) -> CompileResult<Bound> {
        match node {
            QueryNode::Source { entity, .. } => {
                let def = self.entity(entity)?;
                self.entity_leaf(def, None, None)
            }
            QueryNode::Related {
                owner,
                relation,
                entity,
                secured,
            } => {
                let owner = self.bind_expr(owner)?;
                let bound = self.related_leaf(&owner, relation, *secured)?;
                match &bound.shape {
                    Shape::Entity { entity: e, .. } if e == entity => Ok(bound),
                    _ => Err(CompileError::binding(format!(
                        "relation '{relation}' does not lead to '{entity}'"
                    ))),
                }
            }
            QueryNode::Filter { input, predicate } => {
                let input = self.bind_node(input)?;
                let (mut layer, shape) = self.derive(input, true);
                let (predicate, joins) = self.in_frame(true, |b| {
                    b.bind_scalar_lambda(predicate, vec![shape.clone()], "filter predicate")
                })?;
                layer.select.add_predicate(predicate);
                Ok(self.finish(layer, joins, shape))
            }
            QueryNode::Project { input, selector } => {
                let input = self.bind_node(input)?;
                let (layer, shape) = self.derive(input, true);
                let (shape, joins) =
                    self.in_frame(true, |b| b.bind_lambda(selector, vec![shape]))?;
                Ok(self.finish(layer, joins, shape))
            }
            QueryNode::OrderBy { input, keys } => {
                let input = self.bind_node(input)?;
                let (mut layer, shape) = self.derive(input, false);
                let (order, joins) = self.in_frame(true, |b| {
                    keys.iter()
                        .map(|k| {
                            let expr =
                                b.bind_scalar_lambda(&k.key, vec![shape.clone()], "ordering key")?;
                            Ok(OrderKey {
                                expr,
                                descending: k.descending,
                            })
                        })
                        .collect::<CompileResult<Vec<_>>>()
                })?;
                layer.select.order_by = order;
                Ok(self.finish(layer, joins, shape))
            }
            QueryNode::Take { input, count } => {
                let mut bound = self.bind_node(input)?;
                let count = row_count(count, "take")?;
                let select = &mut bound.select;
                select.limit = Some(select.limit.map_or(count, |l| l.min(count)));
                Ok(bound)
            }
            QueryNode::Skip { input, count } => {
                let mut bound = self.bind_node(input)?;
                let count = row_count(count, "skip")?;
                let select = &mut bound.select;
                select.limit = select.limit.map(|l| l.saturating_sub(count));
                select.offset = Some(select.offset.unwrap_or(0).saturating_add(count));
                Ok(bound)
            }
            QueryNode::Distinct { input } => {
                let input = self.bind_node(input)?;
                let (mut layer, shape) = self.derive(input, false);
                layer.select.distinct = true;
                Ok(self.finish(layer, Vec::new(), shape))
            }
            QueryNode::GroupBy {
                input,
                key,
                element,
            } => self.bind_group_by(input, key, element.as_ref()),
            QueryNode::Aggregate {
                input,
                kind,
                selector,
            } => {
                let input = self.bind_node(input)?;
                if !input.correlations.is_empty() {
                    return Err(CompileError::binding(
                        "aggregate as a nested collection".to_string(),
                    ));
                }
                let select = self.aggregate_select(input, *kind, selector.as_ref())?;
                let column = SqlExpr::column(select.scope, select.columns[0].name.clone());
                Ok(Bound {
                    select,
                    shape: Shape::Scalar(column),
                    correlations: Vec::new(),
                })
            }
            QueryNode::Join {
                kind,
                left,
                right,
                left_key,
                right_key,
                result,
            } => self.bind_join(*kind, left, right, left_key, right_key, result),
            QueryNode::SelectMany {
                input,
                collection,
                result,
                outer,
            } => self.bind_select_many(input, collection, result.as_ref(), *outer),
            QueryNode::SetOp { kind, left, right } => {
                let left = self.bind_node(left)?;
                let right = self.bind_node(right)?;
                self.bind_set_op(*kind, left, right)
            }
        }
    }

    /// `SELECT AGG(selector) FROM input`, the aggregate as its only column
    fn aggregate_select(
        &mut self,
        input: Bound,
        kind: AggregateKind,
        selector: Option<&Lambda>,
    ) -> CompileResult<SelectNode> {
        let (mut layer, shape) = self.derive(input, false);
        let (arg, joins) = self.in_frame(true, |b| {
            selector
                .map(|l| b.bind_scalar_lambda(l, vec![shape], "aggregate selector"))
                .transpose()
        })?;
        if let Some(from) = layer.select.from.take() {
            layer.select.from = Some(attach_joins(from, joins));
        }
        layer.select.columns.push(ColumnDef::new(
            kind.column_name(),
            SqlExpr::Aggregate(AggregateExpr::new(kind, arg)),
        ));
        Ok(layer.select)
    }

    fn bind_group_by(
        &mut self,
        input: &QueryNode,
        key: &Lambda,
        element: Option<&Lambda>,
    ) -> CompileResult<Bound> {
        let input = self.bind_node(input)?;
        if !input.correlations.is_empty() {
            return Err(CompileError::binding(
                "grouping inside a nested collection".to_string(),
            ));
        }
        let (layer, shape) = self.derive(input, false);
        let ((key, element), joins) = self.in_frame(true, |b| {
            let key = b.bind_lambda(key, vec![shape.clone()])?;
            let element = match element {
                Some(l) => b.bind_lambda(l, vec![shape])?,
                None => shape,
            };
            Ok((key, element))
        })?;
        if matches!(key, Shape::Group { .. } | Shape::Nested(_)) {
            return Err(CompileError::binding("grouping by a collection".to_string()));
        }

        let mut pre = layer.select;
        if let Some(from) = pre.from.take() {
            pre.from = Some(attach_joins(from, joins));
        }
        let (key, element) = {
            let mut projector = ColumnProjector::new(&mut pre);
            let key = projector.shape(key);
            (key, projector.shape(element))
        };
        let keys = key.reads();

        let mut grouping = SelectNode::new(
            self.arena.alloc(ScopeKind::Select),
            Source::Select(Box::new(pre.clone())),
        );
        grouping.group_by = keys.clone();
        let key = ColumnProjector::new(&mut grouping).shape(key);
        let info = GroupInfo {
            pre,
            element,
            keys,
            group_scope: grouping.scope,
        };
        Ok(Bound {
            select: grouping,
            shape: Shape::Group {
                key: Box::new(key),
                info: Rc::new(info),
            },
            correlations: Vec::new(),
        })
    }

    fn bind_join(
        &mut self,
        kind: JoinType,
        left: &QueryNode,
        right: &QueryNode,
        left_key: &Lambda,
        right_key: &Lambda,
        result: &Lambda,
    ) -> CompileResult<Bound> {
        let left = self.bind_node(left)?;
        let right = self.bind_node(right)?;
        let (lk, left_joins) =
            self.in_frame(true, |b| b.bind_lambda(left_key, vec![left.shape.clone()]))?;
        let (rk, right_joins) =
            self.in_frame(true, |b| b.bind_lambda(right_key, vec![right.shape.clone()]))?;
        let predicate = self.equate(lk, rk, "join keys")?;

        let outer = kind == JoinType::LeftOuter;
        let right_shape = if outer {
            right.shape.with_presence(self.catalog)
        } else {
            right.shape
        };
        let mut correlations = left.correlations;
        correlations.extend(right.correlations);
        let source = Source::Join(Box::new(JoinNode {
            kind: if outer {
                JoinKind::LeftOuter
            } else {
                JoinKind::Inner
            },
            left: attach_joins(Source::Select(Box::new(left.select)), left_joins),
            right: attach_joins(Source::Select(Box::new(right.select)), right_joins),
            predicate: Some(predicate),
        }));
        let layer = Layer {
            select: SelectNode::new(self.arena.alloc(ScopeKind::Select), source),
            correlations,
        };
        let (shape, joins) =
            self.in_frame(true, |b| b.bind_lambda(result, vec![left.shape, right_shape]))?;
        Ok(self.finish(layer, joins, shape))
    }

    fn bind_select_many(
        &mut self,
        input: &QueryNode,
        collection: &Lambda,
        result: Option<&Lambda>,
        outer: bool,
    ) -> CompileResult<Bound> {
        let input = self.bind_node(input)?;
        let (inner, left_joins) = self.in_frame(true, |b| {
            b.with_mode(Correlate::Predicate, |b| {
                b.with_params(&collection.params, vec![input.shape.clone()], |b| {
                    b.bind_sequence(&collection.body)
                })
            })
        })?;
        let inner_shape = if outer {
            inner.shape.with_presence(self.catalog)
        } else {
            inner.shape
        };
        let source = Source::Join(Box::new(JoinNode {
            kind: if outer {
                JoinKind::OuterApply
            } else {
                JoinKind::CrossApply
            },
            left: attach_joins(Source::Select(Box::new(input.select)), left_joins),
            right: Source::Select(Box::new(inner.select)),
            predicate: None,
        }));
        let layer = Layer {
            select: SelectNode::new(self.arena.alloc(ScopeKind::Select), source),
            correlations: input.correlations,
        };
        let (shape, joins) = self.in_frame(true, |b| match result {
            Some(r) => b.bind_lambda(r, vec![input.shape, inner_shape]),
            None => Ok(inner_shape),
        })?;
        Ok(self.finish(layer, joins, shape))
    }

    fn bind_set_op(
        &mut self,
        kind: SetOpKind,
        left: Bound,
        right: Bound,
    ) -> CompileResult<Bound> {
        if !left.correlations.is_empty() || !right.correlations.is_empty() {
            return Err(CompileError::binding(
                "set operation inside a nested collection".to_string(),
            ));
        }
        if !left.shape.same_layout(&right.shape) {
            return Err(CompileError::binding(
                "set operation over differently shaped operands".to_string(),
            ));
        }
        let left_reads = left.shape.reads();
        let mut names: Vec<String> = Vec::new();
        for read in &left_reads {
            let base = read.as_column().map_or("c", |c| c.name.as_str());
            let name = crate::ir::unique_name(base, |n| names.iter().any(|x| x == n));
            names.push(name);
        }
        let operand = |binder: &mut Self, bound: Bound| {
            let reads = bound.shape.reads();
            let mut inner = bound.select;
            if inner.limit.is_none() && inner.offset.is_none() {
                inner.order_by.clear();
            }
            let mut select = SelectNode::new(
                binder.arena.alloc(ScopeKind::Select),
                Source::Select(Box::new(inner)),
            );
            select.columns = names
                .iter()
                .zip(reads)
                .map(|(n, e)| ColumnDef::new(n.clone(), e))
                .collect();
            select
        };
        let left_shape = left.shape.clone();
        let left_select = operand(self, left);
        let right_select = operand(self, right);

        let scope = self.arena.alloc(ScopeKind::SetOp);
        let source = Source::SetOp {
            scope,
            kind,
            left: Box::new(left_select),
            right: Box::new(right_select),
        };
        let layer = Layer {
            select: SelectNode::new(self.arena.alloc(ScopeKind::Select), source),
            correlations: Vec::new(),
        };
        let mut position = 0;
        let shape = left_shape.map_reads(&mut |_| {
            let read = SqlExpr::column(scope, names[position].clone());
            position += 1;
            read
        });
        Ok(self.finish(layer, Vec::new(), shape))
    }

    /// Turn a shape read from the top select into a projector, loading
    /// groups as nested collections of their elements
    fn finalize(&mut self, shape: Shape) -> CompileResult<ProjectorExpr> {
        Ok(match shape {
            Shape::Scalar(e) => ProjectorExpr::Scalar(e),
            Shape::Construct { type_name, fields } => ProjectorExpr::Construct {
                type_name,
                fields: fields
                    .into_iter()
                    .map(|(n, s)| Ok((n, self.finalize(s)?)))
                    .collect::<CompileResult<_>>()?,
            },
            Shape::Entity {
                entity,
                fields,
                presence,
            } => ProjectorExpr::Entity {
                entity,
                fields: fields
                    .into_iter()
                    .map(|(n, e)| (n, ProjectorExpr::Scalar(e)))
                    .collect(),
                presence,
            },
            Shape::Nested(nested) => ProjectorExpr::Nested(nested),
            Shape::Group { key, info } => {
                let outer_keys = key.reads();
                let elements = self.group_elements(&info, outer_keys, Correlate::Keys)?;
                let elements = self.nested_collection(elements, true)?;
                ProjectorExpr::Construct {
                    type_name: Some("Grouping".to_string()),
                    fields: vec![
                        ("key".to_string(), self.finalize(*key)?),
                        ("elements".to_string(), ProjectorExpr::Nested(Box::new(elements))),
                    ],
                }
            }
        })
    }

    /// Equality of two bound values: scalars directly, entities by key,
    /// constructed objects field by field
    fn equate(&self, left: Shape, right: Shape, what: &str) -> CompileResult<SqlExpr> {
        match (left, right) {
            (Shape::Scalar(l), Shape::Scalar(r)) => Ok(SqlExpr::eq(l, r)),
            (l @ Shape::Entity { .. }, r @ Shape::Entity { .. }) => {
                Ok(SqlExpr::eq(self.entity_key(&l)?, self.entity_key(&r)?))
            }
            (Shape::Construct { fields: lf, .. }, Shape::Construct { fields: rf, .. })
                if lf.len() == rf.len() =>
            {
                let parts = lf
                    .into_iter()
                    .zip(rf)
                    .map(|((_, l), (_, r))| self.equate(l, r, what))
                    .collect::<CompileResult<Vec<_>>>()?;
                SqlExpr::and_all(parts)
                    .ok_or_else(|| CompileError::binding(format!("empty {what}")))
            }
            _ => Err(CompileError::binding(format!("{what} of different shapes"))),
        }
    }

    fn entity_key(&self, shape: &Shape) -> CompileResult<SqlExpr> {
        let Shape::Entity { entity, .. } = shape else {
            return Err(CompileError::binding("key of a non-entity value".to_string()));
        };
        let def = self.entity(entity)?;
        shape
            .entity_field(&def.key)
            .cloned()
            .ok_or_else(|| CompileError::binding(format!("key of entity '{entity}'")))
    }

    /// `SELECT columns FROM table`, filtered by `predicate` over the table's
    /// entity when given, and tied to an owner by `correlation`
    /// (`(leaf column, owner expression)`)
    fn entity_leaf(
        &mut self,
        def: &'a EntityDef,
        predicate: Option<&Lambda>,
        correlation: Option<(String, SqlExpr)>,
    ) -> CompileResult<Bound> {
        let table = self.arena.alloc(ScopeKind::Table);
        let source = Source::Table {
            scope: table,
            table: def.table.clone(),
            columns: def.column_names().into_iter().map(String::from).collect(),
        };
        let mut layer = Layer {
            select: SelectNode::new(self.arena.alloc(ScopeKind::Select), source),
            correlations: Vec::new(),
        };
        let shape = entity_shape(def, table, None);
        let (filter, joins) = self.in_frame(true, |b| {
            predicate
                .map(|p| {
                    b.with_mode(Correlate::Predicate, |b| {
                        b.bind_scalar_lambda(p, vec![shape.clone()], "security predicate")
                    })
                })
                .transpose()
        })?;
        if let Some(filter) = filter {
            layer.select.add_predicate(filter);
        }
        if let Some((column, outer)) = correlation {
            let inner = SqlExpr::column(table, column);
            match self.correlate_mode() {
                Correlate::Predicate => layer.select.add_predicate(SqlExpr::eq(inner, outer)),
                Correlate::Keys => layer.correlations.push(Correlation { inner, outer }),
            }
        }
        Ok(self.finish(layer, joins, shape))
    }
}

/// Entity shape over the columns of a table scope
fn entity_shape(def: &EntityDef, scope: ScopeId, presence: Option<SqlExpr>) -> Shape {
    Shape::Entity {
        entity: def.name.clone(),
        fields: def
            .columns
            .iter()
            .map(|c| (c.name.clone(), SqlExpr::column(scope, c.name.clone())))
            .collect(),
        presence,
    }
}

/// Expose `select`'s ordering as columns and return keys reading them
fn lift_order(select: &mut SelectNode) -> Vec<OrderKey> {
    let order = select.order_by.clone();
    let mut projector = ColumnProjector::new(select);
    order
        .into_iter()
        .map(|k| OrderKey {
            expr: projector.column(k.expr),
            descending: k.descending,
        })
        .collect()
}

fn attach_joins(from: Source, joins: Vec<PendingJoin>) -> Source {
    joins.into_iter().fold(from, |left, join| {
        Source::Join(Box::new(JoinNode {
            kind: join.kind,
            left,
            right: Source::Table {
                scope: join.scope,
                table: join.table,
                columns: join.columns,
            },
            predicate: Some(join.predicate),
        }))
    })
}

fn scalar(shape: Shape, what: &str) -> CompileResult<SqlExpr> {
    match shape {
        Shape::Scalar(e) => Ok(e),
        _ => Err(CompileError::binding(format!("non-scalar {what}"))),
    }
}

/// A take/skip count: a non-negative integer constant
fn row_count(count: &Expr, operator: &str) -> CompileResult<u64> {
    match count.as_constant() {
        Some(Value::Integer(n)) if *n >= 0 => Ok(*n as u64),
        _ => Err(CompileError::binding(format!(
            "{operator} with a count that is not a non-negative constant"
        ))),
    }
}

#[cfg(test)]
#[path = "binder_test.rs"]
mod tests;
