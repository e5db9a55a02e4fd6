//! Redundant-subquery remover: merge a derived table into its parent
//!
//! A select reading from a single derived table absorbs it when doing so
//! cannot change the result: the inner select has no DISTINCT, paging or
//! grouping. The inner predicate is ANDed ahead of the outer one and inner
//! column references are replaced by the expressions they name. Inner
//! ordering survives only when the outer select neither orders nor groups.

use super::{check_resolution, map_plan_select, map_selects_post, PassContext, RewritePass};
use crate::error::CompileResult;
use crate::ir::{Plan, ScopeArena, SelectNode, Source, SqlExpr};
use log::debug;

/// Merges derived tables into the select reading them
pub struct RedundantSubqueryRemover;

impl RewritePass for RedundantSubqueryRemover {
    fn name(&self) -> &'static str {
        "redundant-subquery-remover"
    }

    fn description(&self) -> &'static str {
        "Merges a derived table into its parent when the rows cannot change"
    }

    fn rewrite(&self, plan: Plan, cx: &mut PassContext) -> CompileResult<Plan> {
        let arena = &mut cx.arena;
        let plan = map_plan_select(plan, |select| {
            map_selects_post(select, &mut |s| Ok(merge_child(s, arena)))
        })?;
        check_resolution(&plan, &cx.arena, self.name())?;
        Ok(plan)
    }
}

fn merge_child(mut outer: SelectNode, arena: &mut ScopeArena) -> SelectNode {
    let inner = match outer.from.take() {
        Some(Source::Select(inner)) if can_merge(&outer, &inner) => *inner,
        other => {
            outer.from = other;
            return outer;
        }
    };
    debug!("Merged {} into {}", inner.scope, outer.scope);

    let SelectNode {
        scope: inner_scope,
        from: inner_from,
        columns: inner_columns,
        predicate: inner_predicate,
        order_by: inner_order,
        ..
    } = inner;
    let mut merged = outer.map_columns(|column| {
        if column.scope != inner_scope {
            return SqlExpr::Column(column);
        }
        inner_columns
            .iter()
            .find(|c| c.name == column.name)
            .map(|c| c.expr.clone())
            .unwrap_or(SqlExpr::Column(column))
    });

    if let Some(from) = &inner_from {
        if let [only] = from.scopes().as_slice() {
            arena.redirect(inner_scope, *only);
        }
    }
    merged.from = inner_from;
    merged.predicate = match (inner_predicate, merged.predicate.take()) {
        (Some(inner), Some(outer)) => SqlExpr::and_all([inner, outer]),
        (inner, outer) => inner.or(outer),
    };
    if merged.order_by.is_empty() && !merged.is_grouped() {
        merged.order_by = inner_order;
    }
    merged
}

fn can_merge(outer: &SelectNode, inner: &SelectNode) -> bool {
    if inner.distinct
        || inner.limit.is_some()
        || inner.offset.is_some()
        || inner.is_grouped()
        || inner.from.is_none()
    {
        return false;
    }
    if outer.distinct && !inner.order_by.is_empty() {
        return false;
    }
    // substitution would copy a subquery into every place that reads it
    !inner.columns.iter().any(|c| c.expr.contains_subquery())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        AggregateExpr, ColumnDef, OrderKey, Projection, ProjectorExpr, ScopeId, ScopeKind,
    };
    use crate::query::{AggregateKind, BinOp};
    use crate::test_utils::{derived, table_source};
    use quarry_core::OptimizerConfig;

    fn merge(outer: SelectNode, arena: ScopeArena) -> SelectNode {
        let top = outer.scope;
        let name = outer.columns[0].name.clone();
        let plan = Plan::Query(Projection::new(
            outer,
            ProjectorExpr::Scalar(SqlExpr::column(top, name)),
        ));
        let mut cx = PassContext::new(arena, OptimizerConfig::default());
        let plan = RedundantSubqueryRemover.rewrite(plan, &mut cx).unwrap();
        plan.as_query().unwrap().select.clone()
    }

    fn gt(left: SqlExpr, value: i64) -> SqlExpr {
        SqlExpr::binary(BinOp::Gt, left, SqlExpr::Parameter(value.into()))
    }

    /// users filtered on age, exposing id and age
    fn adults(arena: &mut ScopeArena) -> (ScopeId, SelectNode) {
        let (t, users) = table_source(arena, "users", &["id", "age"]);
        let mut inner = SelectNode::new(arena.alloc(ScopeKind::Select), users);
        inner.add_predicate(gt(SqlExpr::column(t, "age"), 18));
        inner.columns.push(ColumnDef::new("id", SqlExpr::column(t, "id")));
        inner
            .columns
            .push(ColumnDef::new("age", SqlExpr::column(t, "age")));
        (t, inner)
    }

    #[test]
    fn test_filter_over_filter_merges_predicates() {
        let mut arena = ScopeArena::new();
        let (t, inner) = adults(&mut arena);
        let inner_scope = inner.scope;
        let mut outer = derived(&mut arena, inner);
        outer.add_predicate(gt(SqlExpr::column(inner_scope, "id"), 100));
        outer
            .columns
            .push(ColumnDef::new("id", SqlExpr::column(inner_scope, "id")));

        let merged = merge(outer, arena);

        assert!(matches!(merged.from, Some(Source::Table { scope, .. }) if scope == t));
        assert_eq!(merged.columns[0].expr, SqlExpr::column(t, "id"));
        assert_eq!(
            merged.predicate,
            SqlExpr::and_all([
                gt(SqlExpr::column(t, "age"), 18),
                gt(SqlExpr::column(t, "id"), 100),
            ])
        );
    }

    #[test]
    fn test_paged_inner_is_not_merged() {
        let mut arena = ScopeArena::new();
        let (_, mut inner) = adults(&mut arena);
        inner.limit = Some(5);
        let mut outer = derived(&mut arena, inner);
        outer.columns.push(ColumnDef::new(
            "count",
            SqlExpr::Aggregate(AggregateExpr::new(AggregateKind::Count, None)),
        ));

        let kept = merge(outer, arena);
        let Some(Source::Select(inner)) = &kept.from else {
            panic!("paged derived table must survive");
        };
        assert_eq!(inner.limit, Some(5));
    }

    #[test]
    fn test_inner_order_carried_under_paging() {
        let mut arena = ScopeArena::new();
        let (t, mut inner) = adults(&mut arena);
        inner.order_by.push(OrderKey {
            expr: SqlExpr::column(t, "age"),
            descending: true,
        });
        let inner_scope = inner.scope;
        let mut outer = derived(&mut arena, inner);
        outer.limit = Some(3);
        outer
            .columns
            .push(ColumnDef::new("id", SqlExpr::column(inner_scope, "id")));

        let merged = merge(outer, arena);
        assert_eq!(merged.limit, Some(3));
        assert_eq!(merged.order_by.len(), 1);
        assert!(merged.order_by[0].descending);
    }

    #[test]
    fn test_grouped_outer_drops_inner_order() {
        let mut arena = ScopeArena::new();
        let (t, mut inner) = adults(&mut arena);
        inner.order_by.push(OrderKey {
            expr: SqlExpr::column(t, "id"),
            descending: false,
        });
        let inner_scope = inner.scope;
        let mut outer = derived(&mut arena, inner);
        outer.columns.push(ColumnDef::new(
            "total",
            SqlExpr::Aggregate(AggregateExpr::new(
                AggregateKind::Sum,
                Some(SqlExpr::column(inner_scope, "age")),
            )),
        ));

        let merged = merge(outer, arena);
        assert!(matches!(merged.from, Some(Source::Table { .. })));
        assert!(merged.order_by.is_empty());
    }

    #[test]
    fn test_distinct_outer_keeps_ordered_inner() {
        let mut arena = ScopeArena::new();
        let (t, mut inner) = adults(&mut arena);
        inner.order_by.push(OrderKey {
            expr: SqlExpr::column(t, "id"),
            descending: false,
        });
        let inner_scope = inner.scope;
        let mut outer = derived(&mut arena, inner);
        outer.distinct = true;
        outer
            .columns
            .push(ColumnDef::new("age", SqlExpr::column(inner_scope, "age")));

        let kept = merge(outer, arena);
        assert!(matches!(kept.from, Some(Source::Select(_))));
    }
}
