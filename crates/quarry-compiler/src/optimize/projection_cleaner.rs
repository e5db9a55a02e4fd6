//! Projection cleaner: splice away derived tables that only rename columns
//!
//! A derived table in a FROM clause whose select has no filtering, grouping,
//! ordering, paging or DISTINCT and only reads columns is replaced by its own
//! source; references to its columns become the columns they rename.

use super::{check_resolution, map_plan_select, map_selects_post, PassContext, RewritePass};
use crate::error::CompileResult;
use crate::ir::{
    ColumnDef, ColumnExpr, JoinNode, Plan, ScopeArena, ScopeId, SelectNode, Source, SqlExpr,
};
use log::debug;

/// Removes pure-rename derived tables
pub struct ProjectionCleaner;

impl RewritePass for ProjectionCleaner {
    fn name(&self) -> &'static str {
        "projection-cleaner"
    }

    fn description(&self) -> &'static str {
        "Splices out derived tables that only rename their source's columns"
    }

    fn rewrite(&self, plan: Plan, cx: &mut PassContext) -> CompileResult<Plan> {
        let arena = &mut cx.arena;
        let plan = map_plan_select(plan, |select| {
            map_selects_post(select, &mut |s| Ok(splice_renames(s, arena)))
        })?;
        check_resolution(&plan, &cx.arena, self.name())?;
        Ok(plan)
    }
}

/// Renamed columns of one spliced scope
struct Renames {
    scope: ScopeId,
    columns: Vec<ColumnDef>,
}

fn splice_renames(mut select: SelectNode, arena: &mut ScopeArena) -> SelectNode {
    let Some(from) = select.from.take() else {
        return select;
    };
    let mut renames = Vec::new();
    select.from = Some(splice_source(from, arena, &mut renames));
    if renames.is_empty() {
        return select;
    }
    select.map_columns(|column| substitute(&renames, column))
}

fn splice_source(source: Source, arena: &mut ScopeArena, renames: &mut Vec<Renames>) -> Source {
    match source {
        Source::Select(child) if is_spliceable(&child) => {
            let child = *child;
            match child.from {
                Some(inner) => {
                    if let [only] = inner.scopes().as_slice() {
                        arena.redirect(child.scope, *only);
                    }
                    debug!("Spliced pure rename {}", child.scope);
                    renames.push(Renames {
                        scope: child.scope,
                        columns: child.columns,
                    });
                    inner
                }
                None => Source::Select(Box::new(child)),
            }
        }
        Source::Join(join) => {
            let JoinNode {
                kind,
                left,
                right,
                predicate,
            } = *join;
            let left = splice_source(left, arena, renames);
            // the right side of a lateral join is evaluated per left row
            let right = if kind.is_lateral() {
                right
            } else {
                splice_source(right, arena, renames)
            };
            Source::Join(Box::new(JoinNode {
                kind,
                left,
                right,
                predicate,
            }))
        }
        other => other,
    }
}

fn is_spliceable(select: &SelectNode) -> bool {
    select.is_pure_rename()
        && matches!(select.from, Some(Source::Table { .. }) | Some(Source::Select(_)))
}

fn substitute(renames: &[Renames], column: ColumnExpr) -> SqlExpr {
    renames
        .iter()
        .find(|r| r.scope == column.scope)
        .and_then(|r| r.columns.iter().find(|c| c.name == column.name))
        .map(|c| c.expr.clone())
        .unwrap_or(SqlExpr::Column(column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{JoinKind, Projection, ProjectorExpr, ScopeKind};
    use crate::test_utils::{derived, table_source};
    use quarry_core::OptimizerConfig;

    fn clean(select: SelectNode, arena: ScopeArena) -> (SelectNode, ScopeArena) {
        let top = select.scope;
        let plan = Plan::Query(Projection::new(
            select,
            ProjectorExpr::Scalar(SqlExpr::column(top, "out")),
        ));
        let mut cx = PassContext::new(arena, OptimizerConfig::default());
        let plan = ProjectionCleaner.rewrite(plan, &mut cx).unwrap();
        (plan.as_query().unwrap().select.clone(), cx.into_arena())
    }

    #[test]
    fn test_rename_over_table_is_spliced() {
        let mut arena = ScopeArena::new();
        let (t, users) = table_source(&mut arena, "users", &["id", "name"]);
        let mut rename = SelectNode::new(arena.alloc(ScopeKind::Select), users);
        rename
            .columns
            .push(ColumnDef::new("user_name", SqlExpr::column(t, "name")));
        let rename_scope = rename.scope;
        let mut outer = derived(&mut arena, rename);
        outer.add_predicate(SqlExpr::eq(
            SqlExpr::column(rename_scope, "user_name"),
            SqlExpr::Parameter("ann".into()),
        ));
        outer
            .columns
            .push(ColumnDef::new("out", SqlExpr::column(rename_scope, "user_name")));

        let (outer, arena) = clean(outer, arena);

        assert!(matches!(outer.from, Some(Source::Table { scope, .. }) if scope == t));
        assert_eq!(outer.columns[0].expr, SqlExpr::column(t, "name"));
        assert_eq!(
            outer.predicate,
            Some(SqlExpr::eq(
                SqlExpr::column(t, "name"),
                SqlExpr::Parameter("ann".into())
            ))
        );
        assert_eq!(arena.resolve(rename_scope), t);
    }

    #[test]
    fn test_filtering_select_is_kept() {
        let mut arena = ScopeArena::new();
        let (t, users) = table_source(&mut arena, "users", &["id", "age"]);
        let mut filtered = SelectNode::new(arena.alloc(ScopeKind::Select), users);
        filtered.add_predicate(SqlExpr::binary(
            crate::query::BinOp::Gt,
            SqlExpr::column(t, "age"),
            SqlExpr::Parameter(18i64.into()),
        ));
        filtered
            .columns
            .push(ColumnDef::new("id", SqlExpr::column(t, "id")));
        let inner = filtered.scope;
        let mut outer = derived(&mut arena, filtered);
        outer
            .columns
            .push(ColumnDef::new("out", SqlExpr::column(inner, "id")));

        let (outer, _) = clean(outer, arena);
        assert!(matches!(outer.from, Some(Source::Select(_))));
    }

    #[test]
    fn test_lateral_right_side_is_kept() {
        let mut arena = ScopeArena::new();
        let (u, users) = table_source(&mut arena, "users", &["id"]);
        let (o, orders) = table_source(&mut arena, "orders", &["user_id"]);
        let mut right = SelectNode::new(arena.alloc(ScopeKind::Select), orders);
        right
            .columns
            .push(ColumnDef::new("user_id", SqlExpr::column(o, "user_id")));
        let right_scope = right.scope;
        let mut outer = SelectNode::new(
            arena.alloc(ScopeKind::Select),
            Source::Join(Box::new(JoinNode {
                kind: JoinKind::CrossApply,
                left: users,
                right: Source::Select(Box::new(right)),
                predicate: None,
            })),
        );
        outer
            .columns
            .push(ColumnDef::new("out", SqlExpr::column(right_scope, "user_id")));
        outer
            .columns
            .push(ColumnDef::new("id", SqlExpr::column(u, "id")));

        let (outer, _) = clean(outer, arena);
        let Some(Source::Join(join)) = &outer.from else {
            panic!("join expected");
        };
        assert!(matches!(join.right, Source::Select(_)));
    }
}
