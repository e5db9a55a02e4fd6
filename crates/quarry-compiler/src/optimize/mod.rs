//! Optimizer: ordered rewrite passes over the relational IR
//!
//! Each pass consumes a [`Plan`] and returns a rewritten one. Passes run in
//! a fixed order; configuration may switch individual passes off but never
//! reorders them. Nested collections are optimized as plans of their own
//! after their parent.

mod aggregate_rewriter;
mod alias_projection_replacer;
mod projection_cleaner;
mod rebinder;
mod redundant_subquery_remover;
mod unused_column_remover;

pub use aggregate_rewriter::AggregateRewriter;
pub use alias_projection_replacer::AliasProjectionReplacer;
pub use projection_cleaner::ProjectionCleaner;
pub use rebinder::{check_resolution, Rebinder};
pub use redundant_subquery_remover::RedundantSubqueryRemover;
pub use unused_column_remover::UnusedColumnRemover;

use crate::error::{CompileError, CompileResult};
use crate::ir::{
    AggregateExpr, ColumnDef, CommandNode, JoinNode, OrderKey, Plan, Projection, ScopeArena,
    SelectNode, Source, SqlExpr,
};
use log::{debug, trace, warn};
use quarry_core::OptimizerConfig;

/// A semantics-preserving rewrite of a bound plan
pub trait RewritePass: Send + Sync {
    /// Pass name (used for configuration and logging)
    fn name(&self) -> &'static str;
    /// Human-readable description
    fn description(&self) -> &'static str;
    /// Rewrite the plan
    fn rewrite(&self, plan: Plan, cx: &mut PassContext) -> CompileResult<Plan>;
}

/// State shared by the passes of one compilation
#[derive(Debug)]
pub struct PassContext {
    /// Scope handles of the compilation; passes allocate and redirect here
    pub arena: ScopeArena,
    pub config: OptimizerConfig,
}

impl PassContext {
    pub fn new(arena: ScopeArena, config: OptimizerConfig) -> Self {
        Self { arena, config }
    }

    pub fn into_arena(self) -> ScopeArena {
        self.arena
    }
}

/// Runs the rewrite passes in order
pub struct Optimizer {
    passes: Vec<Box<dyn RewritePass>>,
}

impl Optimizer {
    /// An optimizer with every built-in pass, in pipeline order
    pub fn with_defaults() -> Self {
        Self {
            passes: vec![
                Box::new(AggregateRewriter),
                Box::new(Rebinder),
                Box::new(ProjectionCleaner),
                Box::new(AliasProjectionReplacer),
                Box::new(UnusedColumnRemover),
                Box::new(RedundantSubqueryRemover),
            ],
        }
    }

    /// Pass names in run order
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Pass names with their descriptions, in run order
    pub fn describe(&self) -> Vec<(&'static str, &'static str)> {
        self.passes
            .iter()
            .map(|p| (p.name(), p.description()))
            .collect()
    }

    /// Run every enabled pass over `plan`, then over its nested collections
    pub fn run(&self, plan: Plan, cx: &mut PassContext) -> CompileResult<Plan> {
        let mut plan = plan;
        for pass in &self.passes {
            if cx.config.is_disabled(pass.name()) {
                warn!("Optimizer pass '{}' is disabled", pass.name());
                continue;
            }
            debug!("Running optimizer pass '{}'", pass.name());
            plan = pass.rewrite(plan, cx)?;
            trace!("After '{}': {:#?}", pass.name(), plan);
        }
        match plan {
            Plan::Query(mut projection) => {
                projection.projector = projection.projector.map_nested(&mut |mut nested| {
                    nested.projection = self.run_projection(nested.projection, cx)?;
                    Ok::<_, CompileError>(nested)
                })?;
                Ok(Plan::Query(projection))
            }
            command @ Plan::Command(_) => Ok(command),
        }
    }

    fn run_projection(
        &self,
        projection: Projection,
        cx: &mut PassContext,
    ) -> CompileResult<Projection> {
        match self.run(Plan::Query(projection), cx)? {
            Plan::Query(projection) => Ok(projection),
            Plan::Command(_) => Err(CompileError::Translation {
                message: "optimizer turned a nested query into a command".to_string(),
            }),
        }
    }
}

/// Rebuild the driving select of a plan
pub(crate) fn map_plan_select(
    plan: Plan,
    f: impl FnOnce(SelectNode) -> CompileResult<SelectNode>,
) -> CompileResult<Plan> {
    Ok(match plan {
        Plan::Query(mut projection) => {
            projection.select = f(projection.select)?;
            Plan::Query(projection)
        }
        Plan::Command(command) => Plan::Command(command.map_select(f)?),
    })
}

/// Rebuild every expression a select evaluates itself (columns, predicate,
/// grouping, ordering), leaving its FROM clause alone
pub(crate) fn try_map_own_exprs(
    mut select: SelectNode,
    f: &mut dyn FnMut(SqlExpr) -> CompileResult<SqlExpr>,
) -> CompileResult<SelectNode> {
    select.columns = std::mem::take(&mut select.columns)
        .into_iter()
        .map(|c| Ok(ColumnDef::new(c.name, f(c.expr)?)))
        .collect::<CompileResult<_>>()?;
    select.predicate = select.predicate.take().map(&mut *f).transpose()?;
    select.group_by = std::mem::take(&mut select.group_by)
        .into_iter()
        .map(&mut *f)
        .collect::<CompileResult<_>>()?;
    select.order_by = std::mem::take(&mut select.order_by)
        .into_iter()
        .map(|k| {
            Ok(OrderKey {
                expr: f(k.expr)?,
                descending: k.descending,
            })
        })
        .collect::<CompileResult<_>>()?;
    Ok(select)
}

/// Rebuild a select tree bottom-up: every select below `select` (in its FROM
/// clause and in expression subqueries) is passed to `f` before its parent
pub(crate) fn map_selects_post(
    select: SelectNode,
    f: &mut dyn FnMut(SelectNode) -> CompileResult<SelectNode>,
) -> CompileResult<SelectNode> {
    let mut select = select;
    if let Some(from) = select.from.take() {
        select.from = Some(map_source_selects(from, f)?);
    }
    let select = try_map_own_exprs(select, &mut |e| map_expr_selects(e, f))?;
    f(select)
}

fn map_source_selects(
    source: Source,
    f: &mut dyn FnMut(SelectNode) -> CompileResult<SelectNode>,
) -> CompileResult<Source> {
    Ok(match source {
        Source::Table { .. } => source,
        Source::Select(select) => Source::Select(Box::new(map_selects_post(*select, f)?)),
        Source::Join(join) => {
            let JoinNode {
                kind,
                left,
                right,
                predicate,
            } = *join;
            Source::Join(Box::new(JoinNode {
                kind,
                left: map_source_selects(left, f)?,
                right: map_source_selects(right, f)?,
                predicate: predicate.map(|p| map_expr_selects(p, f)).transpose()?,
            }))
        }
        Source::SetOp {
            scope,
            kind,
            left,
            right,
        } => Source::SetOp {
            scope,
            kind,
            left: Box::new(map_selects_post(*left, f)?),
            right: Box::new(map_selects_post(*right, f)?),
        },
    })
}

/// Rebuild the subqueries inside an expression with [`map_selects_post`]
pub(crate) fn map_expr_selects(
    expr: SqlExpr,
    f: &mut dyn FnMut(SelectNode) -> CompileResult<SelectNode>,
) -> CompileResult<SqlExpr> {
    Ok(match expr {
        SqlExpr::Column(_)
        | SqlExpr::Parameter(_)
        | SqlExpr::Null
        | SqlExpr::Literal(_) => expr,
        SqlExpr::Binary { op, left, right } => SqlExpr::Binary {
            op,
            left: map_boxed_selects(left, f)?,
            right: map_boxed_selects(right, f)?,
        },
        SqlExpr::Unary { op, operand } => SqlExpr::Unary {
            op,
            operand: map_boxed_selects(operand, f)?,
        },
        SqlExpr::Function { function, args } => SqlExpr::Function {
            function,
            args: args
                .into_iter()
                .map(|a| map_expr_selects(a, f))
                .collect::<CompileResult<_>>()?,
        },
        SqlExpr::Case { whens, otherwise } => SqlExpr::Case {
            whens: whens
                .into_iter()
                .map(|(w, t)| Ok((map_expr_selects(w, f)?, map_expr_selects(t, f)?)))
                .collect::<CompileResult<_>>()?,
            otherwise: otherwise.map(|o| map_boxed_selects(o, f)).transpose()?,
        },
        SqlExpr::IsNull { operand, negated } => SqlExpr::IsNull {
            operand: map_boxed_selects(operand, f)?,
            negated,
        },
        SqlExpr::Cast { operand, target } => SqlExpr::Cast {
            operand: map_boxed_selects(operand, f)?,
            target,
        },
        SqlExpr::Like { operand, pattern } => SqlExpr::Like {
            operand: map_boxed_selects(operand, f)?,
            pattern: map_boxed_selects(pattern, f)?,
        },
        SqlExpr::Aggregate(agg) => SqlExpr::Aggregate(AggregateExpr {
            kind: agg.kind,
            arg: agg.arg.map(|a| map_boxed_selects(a, f)).transpose()?,
            distinct: agg.distinct,
        }),
        SqlExpr::AggregateSubquery {
            group,
            aggregate,
            subquery,
        } => SqlExpr::AggregateSubquery {
            group,
            aggregate,
            subquery: Box::new(map_selects_post(*subquery, f)?),
        },
        SqlExpr::Subquery(select) => SqlExpr::Subquery(Box::new(map_selects_post(*select, f)?)),
        SqlExpr::Exists(select) => SqlExpr::Exists(Box::new(map_selects_post(*select, f)?)),
        SqlExpr::In { operand, subquery } => SqlExpr::In {
            operand: map_boxed_selects(operand, f)?,
            subquery: Box::new(map_selects_post(*subquery, f)?),
        },
    })
}

fn map_boxed_selects(
    expr: Box<SqlExpr>,
    f: &mut dyn FnMut(SelectNode) -> CompileResult<SelectNode>,
) -> CompileResult<Box<SqlExpr>> {
    map_expr_selects(*expr, f).map(Box::new)
}

/// Visit every select of a tree mutably, parents before children
pub(crate) fn for_each_select_mut(select: &mut SelectNode, f: &mut dyn FnMut(&mut SelectNode)) {
    f(select);
    if let Some(from) = &mut select.from {
        for_each_source_select_mut(from, f);
    }
    for column in &mut select.columns {
        for_each_expr_select_mut(&mut column.expr, f);
    }
    if let Some(predicate) = &mut select.predicate {
        for_each_expr_select_mut(predicate, f);
    }
    for expr in &mut select.group_by {
        for_each_expr_select_mut(expr, f);
    }
    for key in &mut select.order_by {
        for_each_expr_select_mut(&mut key.expr, f);
    }
}

fn for_each_source_select_mut(source: &mut Source, f: &mut dyn FnMut(&mut SelectNode)) {
    match source {
        Source::Table { .. } => {}
        Source::Select(select) => for_each_select_mut(select, f),
        Source::Join(join) => {
            for_each_source_select_mut(&mut join.left, f);
            for_each_source_select_mut(&mut join.right, f);
            if let Some(predicate) = &mut join.predicate {
                for_each_expr_select_mut(predicate, f);
            }
        }
        Source::SetOp { left, right, .. } => {
            for_each_select_mut(left, f);
            for_each_select_mut(right, f);
        }
    }
}

fn for_each_expr_select_mut(expr: &mut SqlExpr, f: &mut dyn FnMut(&mut SelectNode)) {
    match expr {
        SqlExpr::Column(_) | SqlExpr::Parameter(_) | SqlExpr::Null | SqlExpr::Literal(_) => {}
        SqlExpr::Binary { left, right, .. } => {
            for_each_expr_select_mut(left, f);
            for_each_expr_select_mut(right, f);
        }
        SqlExpr::Unary { operand, .. }
        | SqlExpr::IsNull { operand, .. }
        | SqlExpr::Cast { operand, .. } => for_each_expr_select_mut(operand, f),
        SqlExpr::Like { operand, pattern } => {
            for_each_expr_select_mut(operand, f);
            for_each_expr_select_mut(pattern, f);
        }
        SqlExpr::Function { args, .. } => args
            .iter_mut()
            .for_each(|a| for_each_expr_select_mut(a, f)),
        SqlExpr::Case { whens, otherwise } => {
            for (w, t) in whens {
                for_each_expr_select_mut(w, f);
                for_each_expr_select_mut(t, f);
            }
            if let Some(o) = otherwise {
                for_each_expr_select_mut(o, f);
            }
        }
        SqlExpr::Aggregate(agg) => {
            if let Some(arg) = &mut agg.arg {
                for_each_expr_select_mut(arg, f);
            }
        }
        SqlExpr::AggregateSubquery { subquery, .. } => for_each_select_mut(subquery, f),
        SqlExpr::Subquery(select) | SqlExpr::Exists(select) => for_each_select_mut(select, f),
        SqlExpr::In { operand, subquery } => {
            for_each_expr_select_mut(operand, f);
            for_each_select_mut(subquery, f);
        }
    }
}

/// Update assignments, when the plan is an update
pub(crate) fn command_assignments(command: &CommandNode) -> Option<&[(String, SqlExpr)]> {
    match command {
        CommandNode::Update(update) => Some(&update.assignments),
        _ => None,
    }
}

#[cfg(test)]
#[path = "optimize_test.rs"]
mod tests;
