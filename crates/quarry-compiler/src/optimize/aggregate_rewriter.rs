//! Aggregate rewriter: compute group aggregates in the grouping select
//!
//! An aggregate over a group's elements is bound as a pending
//! [`SqlExpr::AggregateSubquery`]. Where the grouping select is reachable
//! through the FROM chain of the select using the aggregate, the aggregate
//! becomes an `agg{n}` column of the grouping select. Elsewhere the
//! equivalent correlated scalar subquery is used instead.

use super::{map_plan_select, map_selects_post, try_map_own_exprs, PassContext, RewritePass};
use crate::error::CompileResult;
use crate::ir::{AggregateExpr, ColumnDef, Plan, ScopeId, SelectNode, Source, SqlExpr};
use log::debug;

/// Lifts group aggregates into their grouping select
pub struct AggregateRewriter;

impl RewritePass for AggregateRewriter {
    fn name(&self) -> &'static str {
        "aggregate-rewriter"
    }

    fn description(&self) -> &'static str {
        "Computes aggregates over groups in the grouping select, or as correlated subqueries"
    }

    fn rewrite(&self, plan: Plan, _cx: &mut PassContext) -> CompileResult<Plan> {
        map_plan_select(plan, |select| map_selects_post(select, &mut lift_aggregates))
    }
}

fn lift_aggregates(mut select: SelectNode) -> CompileResult<SelectNode> {
    let mut from = select.from.take();
    let mut select = try_map_own_exprs(select, &mut |expr| {
        Ok(expr.transform_shallow(&mut |e| match e {
            SqlExpr::AggregateSubquery {
                group,
                aggregate,
                subquery,
            } => match from.as_mut().and_then(|f| find_group(f, group)) {
                Some(grouping) => {
                    let name = aggregate_column(grouping, aggregate);
                    debug!("Lifted group aggregate into {group} as {name}");
                    SqlExpr::column(group, name)
                }
                None => {
                    debug!("Group {group} unreachable; using correlated subquery");
                    SqlExpr::Subquery(subquery)
                }
            },
            other => other,
        }))
    })?;
    select.from = from;
    Ok(select)
}

/// The grouping select `group`, if reachable from `source` without passing
/// through a select whose rows a new column could change
fn find_group(source: &mut Source, group: ScopeId) -> Option<&mut SelectNode> {
    if !reaches_group(source, group) {
        return None;
    }
    match source {
        Source::Select(select) => {
            if select.scope == group {
                Some(&mut **select)
            } else {
                select.from.as_mut().and_then(|f| find_group(f, group))
            }
        }
        Source::Join(join) => {
            if reaches_group(&join.left, group) {
                find_group(&mut join.left, group)
            } else {
                find_group(&mut join.right, group)
            }
        }
        Source::Table { .. } | Source::SetOp { .. } => None,
    }
}

fn reaches_group(source: &Source, group: ScopeId) -> bool {
    match source {
        Source::Select(select) if select.scope == group => true,
        Source::Select(select) if select.is_grouped() || select.distinct => false,
        Source::Select(select) => select
            .from
            .as_ref()
            .is_some_and(|f| reaches_group(f, group)),
        Source::Join(join) => reaches_group(&join.left, group) || reaches_group(&join.right, group),
        Source::Table { .. } | Source::SetOp { .. } => false,
    }
}

/// Column of the grouping select computing `aggregate`, added when missing
fn aggregate_column(grouping: &mut SelectNode, aggregate: AggregateExpr) -> String {
    let expr = SqlExpr::Aggregate(aggregate);
    if let Some(existing) = grouping.columns.iter().find(|c| c.expr == expr) {
        return existing.name.clone();
    }
    let mut n = 0;
    let name = loop {
        let candidate = format!("agg{n}");
        if grouping.column(&candidate).is_none() {
            break candidate;
        }
        n += 1;
    };
    grouping.columns.push(ColumnDef::new(name.clone(), expr));
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ScopeArena;
    use crate::ir::ScopeKind;
    use crate::query::AggregateKind;
    use quarry_core::OptimizerConfig;

    fn grouped(arena: &mut ScopeArena) -> SelectNode {
        let t = arena.alloc(ScopeKind::Table);
        let mut grouping = SelectNode::new(
            arena.alloc(ScopeKind::Select),
            Source::Table {
                scope: t,
                table: "orders".to_string(),
                columns: vec!["user_id".to_string(), "amount".to_string()],
            },
        );
        grouping.group_by = vec![SqlExpr::column(t, "user_id")];
        grouping
            .columns
            .push(ColumnDef::new("user_id", SqlExpr::column(t, "user_id")));
        grouping
    }

    fn pending(group: ScopeId, fallback: SelectNode) -> SqlExpr {
        SqlExpr::AggregateSubquery {
            group,
            aggregate: AggregateExpr::new(AggregateKind::Count, None),
            subquery: Box::new(fallback),
        }
    }

    #[test]
    fn test_reachable_group_gets_agg_column() {
        let mut arena = ScopeArena::new();
        let grouping = grouped(&mut arena);
        let group = grouping.scope;
        let fallback = grouped(&mut arena);
        let mut outer = SelectNode::new(
            arena.alloc(ScopeKind::Select),
            Source::Select(Box::new(grouping)),
        );
        outer.columns.push(ColumnDef::new("n", pending(group, fallback.clone())));
        outer
            .columns
            .push(ColumnDef::new("m", pending(group, fallback)));

        let mut cx = PassContext::new(arena, OptimizerConfig::default());
        let plan = AggregateRewriter
            .rewrite(
                Plan::Query(crate::ir::Projection::new(
                    outer,
                    crate::ir::ProjectorExpr::Scalar(SqlExpr::Null),
                )),
                &mut cx,
            )
            .unwrap();
        let select = &plan.as_query().unwrap().select;

        assert_eq!(select.columns[0].expr, SqlExpr::column(group, "agg0"));
        // identical aggregates share one column
        assert_eq!(select.columns[1].expr, SqlExpr::column(group, "agg0"));
        let Some(Source::Select(grouping)) = &select.from else {
            panic!("grouping select expected");
        };
        assert_eq!(grouping.columns.len(), 2);
        assert!(grouping.has_aggregates());
    }

    #[test]
    fn test_unreachable_group_falls_back_to_subquery() {
        let mut arena = ScopeArena::new();
        let grouping = grouped(&mut arena);
        let fallback = grouped(&mut arena);
        let t = arena.alloc(ScopeKind::Table);
        let mut other = SelectNode::new(
            arena.alloc(ScopeKind::Select),
            Source::Table {
                scope: t,
                table: "users".to_string(),
                columns: vec!["id".to_string()],
            },
        );
        other
            .columns
            .push(ColumnDef::new("n", pending(grouping.scope, fallback.clone())));

        let rewritten = map_selects_post(other, &mut lift_aggregates).unwrap();
        assert_eq!(
            rewritten.columns[0].expr,
            SqlExpr::Subquery(Box::new(fallback))
        );
    }

    #[test]
    fn test_group_on_right_join_side_is_found() {
        let mut arena = ScopeArena::new();
        let grouping = grouped(&mut arena);
        let group = grouping.scope;
        let fallback = grouped(&mut arena);
        let t = arena.alloc(ScopeKind::Table);
        let mut outer = SelectNode::new(
            arena.alloc(ScopeKind::Select),
            Source::Join(Box::new(crate::ir::JoinNode {
                kind: crate::ir::JoinKind::Cross,
                left: Source::Table {
                    scope: t,
                    table: "users".to_string(),
                    columns: vec!["id".to_string()],
                },
                right: Source::Select(Box::new(grouping)),
                predicate: None,
            })),
        );
        outer.columns.push(ColumnDef::new("n", pending(group, fallback)));

        let rewritten = map_selects_post(outer, &mut lift_aggregates).unwrap();
        assert_eq!(rewritten.columns[0].expr, SqlExpr::column(group, "agg0"));
        let Some(Source::Join(join)) = &rewritten.from else {
            panic!("join expected");
        };
        let Source::Select(grouping) = &join.right else {
            panic!("grouping select expected");
        };
        assert!(grouping.has_aggregates());
    }
}
