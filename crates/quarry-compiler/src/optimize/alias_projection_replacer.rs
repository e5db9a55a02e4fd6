//! Alias-projection replacer: drop a top select that only renames
//!
//! When the top select of a query merely renames the columns of the derived
//! select beneath it, the projector is rewritten to read the inner columns
//! directly and the inner select becomes the top.

use super::{check_resolution, PassContext, RewritePass};
use crate::error::{CompileError, CompileResult};
use crate::ir::{ColumnExpr, Plan, Source, SqlExpr};
use log::debug;

/// Replaces renaming top selects with their source
pub struct AliasProjectionReplacer;

impl RewritePass for AliasProjectionReplacer {
    fn name(&self) -> &'static str {
        "alias-projection-replacer"
    }

    fn description(&self) -> &'static str {
        "Reads the projector from the select beneath a renaming top select"
    }

    fn rewrite(&self, plan: Plan, cx: &mut PassContext) -> CompileResult<Plan> {
        let Plan::Query(mut projection) = plan else {
            return Ok(plan);
        };
        loop {
            let top = &mut projection.select;
            if !top.is_pure_rename() {
                break;
            }
            let child = match top.from.take() {
                Some(Source::Select(child)) => *child,
                other => {
                    top.from = other;
                    break;
                }
            };
            let scope = top.scope;
            let renames = std::mem::take(&mut top.columns);
            let lookup = |column: ColumnExpr| {
                if column.scope != scope {
                    return SqlExpr::Column(column);
                }
                renames
                    .iter()
                    .find(|c| c.name == column.name)
                    .map(|c| c.expr.clone())
                    .unwrap_or(SqlExpr::Column(column))
            };
            projection.projector = projection
                .projector
                .map_reads(&mut |read| read.map_columns(lookup));
            projection.keys = std::mem::take(&mut projection.keys)
                .into_iter()
                .map(|key| match lookup(key) {
                    SqlExpr::Column(column) => Ok(column),
                    other => Err(CompileError::Translation {
                        message: format!("correlation key renamed to non-column {other:?}"),
                    }),
                })
                .collect::<CompileResult<_>>()?;
            debug!("Replaced renaming top {scope} with {}", child.scope);
            cx.arena.redirect(scope, child.scope);
            projection.select = child;
        }
        let plan = Plan::Query(projection);
        check_resolution(&plan, &cx.arena, self.name())?;
        Ok(plan)
    }
}
