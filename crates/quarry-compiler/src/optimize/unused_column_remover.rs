//! Unused-column remover: drop derived-table columns nothing reads
//!
//! Removing a column can orphan the columns it read, so the pass repeats
//! until a round removes nothing, bounded by
//! `optimizer.max_unused_column_iterations`.

use super::{command_assignments, for_each_select_mut, PassContext, RewritePass};
use crate::error::CompileResult;
use crate::ir::{ColumnExpr, Plan, ScopeId, SelectNode, Source};
use log::{debug, warn};
use std::collections::HashSet;

/// Removes columns no reference reads
pub struct UnusedColumnRemover;

impl RewritePass for UnusedColumnRemover {
    fn name(&self) -> &'static str {
        "unused-column-remover"
    }

    fn description(&self) -> &'static str {
        "Removes derived-table columns that nothing references, to a fixed point"
    }

    fn rewrite(&self, plan: Plan, cx: &mut PassContext) -> CompileResult<Plan> {
        let mut plan = plan;
        let limit = cx.config.max_unused_column_iterations.max(1);
        for round in 1..=limit {
            let used = used_columns(&plan);
            let removed = match &mut plan {
                Plan::Query(projection) => prune(&mut projection.select, &used, true),
                Plan::Command(command) => prune(command.select_mut(), &used, false),
            };
            debug!("Round {round} removed {removed} unused columns");
            if removed == 0 {
                return Ok(plan);
            }
        }
        warn!("Unused column removal stopped after {limit} rounds");
        Ok(plan)
    }
}

/// Every (scope, column) pair some reference reads
fn used_columns(plan: &Plan) -> HashSet<(ScopeId, String)> {
    let mut used = HashSet::new();
    let mut mark = |c: &ColumnExpr| {
        used.insert((c.scope, c.name.clone()));
    };
    match plan {
        Plan::Query(projection) => {
            projection.select.for_each_column(&mut mark);
            projection
                .projector
                .for_each_read(&mut |read| read.for_each_column(&mut mark));
            projection.keys.iter().for_each(&mut mark);
        }
        Plan::Command(command) => {
            command.select().for_each_column(&mut mark);
            for (_, value) in command_assignments(command).unwrap_or_default() {
                value.for_each_column(&mut mark);
            }
        }
    }
    used
}

/// Remove unread columns from the top select (when `prune_top`) and from
/// every derived table. Returns how many were removed.
fn prune(top: &mut SelectNode, used: &HashSet<(ScopeId, String)>, prune_top: bool) -> usize {
    let mut prunable: HashSet<ScopeId> = HashSet::new();
    if prune_top {
        prunable.insert(top.scope);
    }
    top.for_each_select(&mut |select| {
        if let Some(from) = &select.from {
            derived_tables(from, &mut prunable);
        }
    });

    let mut removed = 0;
    for_each_select_mut(top, &mut |select| {
        // DISTINCT compares whole rows
        if select.distinct || !prunable.contains(&select.scope) {
            return;
        }
        let scope = select.scope;
        let before = select.columns.len();
        let first = select.columns.first().cloned();
        select
            .columns
            .retain(|c| used.contains(&(scope, c.name.clone())));
        if select.columns.is_empty() {
            // a select needs at least one column
            select.columns.extend(first);
        }
        removed += before - select.columns.len();
    });
    removed
}

/// Scopes of selects used directly as derived tables. Set-operation
/// operands are positional and excluded.
fn derived_tables(source: &Source, out: &mut HashSet<ScopeId>) {
    match source {
        Source::Select(select) => {
            out.insert(select.scope);
        }
        Source::Join(join) => {
            derived_tables(&join.left, out);
            derived_tables(&join.right, out);
        }
        Source::Table { .. } | Source::SetOp { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ColumnDef, Projection, ProjectorExpr, ScopeArena, ScopeKind, SqlExpr};
    use crate::query::SetOpKind;
    use crate::test_utils::{derived, table_source};
    use quarry_core::OptimizerConfig;

    fn run(plan: Plan, max: usize) -> Plan {
        let config = OptimizerConfig {
            max_unused_column_iterations: max,
            ..OptimizerConfig::default()
        };
        let mut cx = PassContext::new(ScopeArena::new(), config);
        UnusedColumnRemover.rewrite(plan, &mut cx).unwrap()
    }

    /// top(out = s2.b) over s2(b = s1.a, c = s1.z) over s1(a, z) over users
    fn chain(arena: &mut ScopeArena) -> Plan {
        let (t, users) = table_source(arena, "users", &["id", "name"]);
        let mut s1 = SelectNode::new(arena.alloc(ScopeKind::Select), users);
        s1.columns.push(ColumnDef::new("a", SqlExpr::column(t, "id")));
        s1.columns
            .push(ColumnDef::new("z", SqlExpr::column(t, "name")));
        let s1_scope = s1.scope;
        let mut s2 = derived(arena, s1);
        s2.columns
            .push(ColumnDef::new("b", SqlExpr::column(s1_scope, "a")));
        s2.columns
            .push(ColumnDef::new("c", SqlExpr::column(s1_scope, "z")));
        let s2_scope = s2.scope;
        let mut top = derived(arena, s2);
        top.columns
            .push(ColumnDef::new("out", SqlExpr::column(s2_scope, "b")));
        top.columns
            .push(ColumnDef::new("spare", SqlExpr::column(s2_scope, "b")));
        let top_scope = top.scope;
        Plan::Query(Projection::new(
            top,
            ProjectorExpr::Scalar(SqlExpr::column(top_scope, "out")),
        ))
    }

    fn names(select: &SelectNode) -> Vec<&str> {
        select.columns.iter().map(|c| c.name.as_str()).collect()
    }

    fn child(select: &SelectNode) -> &SelectNode {
        match &select.from {
            Some(Source::Select(child)) => child,
            other => panic!("derived table expected, got {other:?}"),
        }
    }

    #[test]
    fn test_removal_cascades_to_fixed_point() {
        let mut arena = ScopeArena::new();
        let plan = run(chain(&mut arena), 64);
        let top = &plan.as_query().unwrap().select;
        assert_eq!(names(top), vec!["out"]);
        assert_eq!(names(child(top)), vec!["b"]);
        assert_eq!(names(child(child(top))), vec!["a"]);
    }

    #[test]
    fn test_iteration_bound_stops_early() {
        let mut arena = ScopeArena::new();
        let plan = run(chain(&mut arena), 1);
        let top = &plan.as_query().unwrap().select;
        // one round sees every column of s2 and s1 still read
        assert_eq!(names(top), vec!["out"]);
        assert_eq!(names(child(child(top))), vec!["a", "z"]);
    }

    #[test]
    fn test_set_operands_and_distinct_keep_columns() {
        let mut arena = ScopeArena::new();
        let operand = |arena: &mut ScopeArena| {
            let (t, users) = table_source(arena, "users", &["id", "name"]);
            let mut s = SelectNode::new(arena.alloc(ScopeKind::Select), users);
            s.columns.push(ColumnDef::new("id", SqlExpr::column(t, "id")));
            s.columns
                .push(ColumnDef::new("name", SqlExpr::column(t, "name")));
            s
        };
        let left = operand(&mut arena);
        let right = operand(&mut arena);
        let u = arena.alloc(ScopeKind::SetOp);
        let mut distinct = SelectNode::new(
            arena.alloc(ScopeKind::Select),
            Source::SetOp {
                scope: u,
                kind: SetOpKind::Union,
                left: Box::new(left),
                right: Box::new(right),
            },
        );
        distinct.distinct = true;
        distinct
            .columns
            .push(ColumnDef::new("id", SqlExpr::column(u, "id")));
        distinct
            .columns
            .push(ColumnDef::new("name", SqlExpr::column(u, "name")));
        let distinct_scope = distinct.scope;
        let mut top = derived(&mut arena, distinct);
        top.columns
            .push(ColumnDef::new("id", SqlExpr::column(distinct_scope, "id")));
        let top_scope = top.scope;
        let plan = Plan::Query(Projection::new(
            top,
            ProjectorExpr::Scalar(SqlExpr::column(top_scope, "id")),
        ));

        let plan = run(plan, 64);
        let distinct = child(&plan.as_query().unwrap().select);
        assert_eq!(names(distinct), vec!["id", "name"]);
        let Some(Source::SetOp { left, right, .. }) = &distinct.from else {
            panic!("set operation expected");
        };
        assert_eq!(names(left), vec!["id", "name"]);
        assert_eq!(names(right), vec!["id", "name"]);
    }

    #[test]
    fn test_unread_derived_table_keeps_one_column() {
        let mut arena = ScopeArena::new();
        let (t, users) = table_source(&mut arena, "users", &["id", "name"]);
        let mut inner = SelectNode::new(arena.alloc(ScopeKind::Select), users);
        inner.columns.push(ColumnDef::new("id", SqlExpr::column(t, "id")));
        inner
            .columns
            .push(ColumnDef::new("name", SqlExpr::column(t, "name")));
        let mut top = derived(&mut arena, inner);
        top.columns.push(ColumnDef::new("one", SqlExpr::Literal(1)));
        let top_scope = top.scope;
        let plan = Plan::Query(Projection::new(
            top,
            ProjectorExpr::Scalar(SqlExpr::column(top_scope, "one")),
        ));

        let plan = run(plan, 64);
        assert_eq!(names(child(&plan.as_query().unwrap().select)), vec!["id"]);
    }
}
