//! Rebinder: resolve every column reference to exactly one definition
//!
//! A reference must name a scope visible where it is evaluated: a scope of
//! the select's own FROM clause, a scope of an enclosing select (correlation),
//! or the left side of a lateral join. References to scopes nested deeper in
//! the FROM chain are threaded outward by adding pass-through columns to the
//! derived selects in between. Anything else is an error carrying the pass
//! name and the select it was found in.

use super::{try_map_own_exprs, PassContext, RewritePass};
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    AggregateExpr, ColumnDef, ColumnExpr, CommandNode, JoinNode, Plan, Projection, ScopeArena,
    ScopeId, SelectNode, Source, SqlExpr,
};
use log::debug;

const PASS: &str = "rebinder";

/// A visible scope and the names of the columns it defines
type Frame = (ScopeId, Vec<String>);

/// Validates and threads column references
pub struct Rebinder;

impl RewritePass for Rebinder {
    fn name(&self) -> &'static str {
        PASS
    }

    fn description(&self) -> &'static str {
        "Resolves column references, threading them through intermediate selects"
    }

    fn rewrite(&self, plan: Plan, cx: &mut PassContext) -> CompileResult<Plan> {
        let resolver = Resolver {
            arena: &cx.arena,
            pass: PASS,
            threading: true,
        };
        match plan {
            Plan::Query(projection) => {
                let select = resolver.select(projection.select, &[])?;
                let projection = Projection {
                    select,
                    ..projection
                };
                resolver.projection_reads(&projection)?;
                Ok(Plan::Query(projection))
            }
            Plan::Command(command) => {
                let command = command.map_select(|s| resolver.select(s, &[]))?;
                resolver.command(&command)?;
                Ok(Plan::Command(command))
            }
        }
    }
}

/// Check that every column reference of `plan` resolves, without threading.
/// Used after passes that must leave the plan fully resolved.
pub fn check_resolution(plan: &Plan, arena: &ScopeArena, after: &str) -> CompileResult<()> {
    let resolver = Resolver {
        arena,
        pass: after,
        threading: false,
    };
    match plan {
        Plan::Query(projection) => {
            resolver.select(projection.select.clone(), &[])?;
            resolver.projection_reads(projection)
        }
        Plan::Command(command) => {
            command
                .clone()
                .map_select(|s| resolver.select(s, &[]))?;
            resolver.command(command)
        }
    }
}

struct Resolver<'c> {
    arena: &'c ScopeArena,
    pass: &'c str,
    /// Whether references may be threaded through derived selects
    threading: bool,
}

impl Resolver<'_> {
    fn select(&self, select: SelectNode, outer: &[Frame]) -> CompileResult<SelectNode> {
        let mut select = select;
        let mut from = select
            .from
            .take()
            .map(|f| self.source(f, outer))
            .transpose()?;
        let mut frames = outer.to_vec();
        if let Some(from) = &from {
            frames.extend(frames_of(from));
        }
        let context = format!("select {}", select.scope);
        let mut select = try_map_own_exprs(select, &mut |e| {
            self.expr(e, &frames, from.as_mut(), &context)
        })?;
        select.from = from;
        Ok(select)
    }

    fn source(&self, source: Source, outer: &[Frame]) -> CompileResult<Source> {
        Ok(match source {
            Source::Table { .. } => source,
            Source::Select(select) => Source::Select(Box::new(self.select(*select, outer)?)),
            Source::Join(join) => {
                let JoinNode {
                    kind,
                    left,
                    right,
                    predicate,
                } = *join;
                let left = self.source(left, outer)?;
                let mut right_outer = outer.to_vec();
                if kind.is_lateral() {
                    right_outer.extend(frames_of(&left));
                }
                let right = self.source(right, &right_outer)?;
                let mut frames = outer.to_vec();
                frames.extend(frames_of(&left));
                frames.extend(frames_of(&right));
                let predicate = predicate
                    .map(|p| self.expr(p, &frames, None, "join condition"))
                    .transpose()?;
                Source::Join(Box::new(JoinNode {
                    kind,
                    left,
                    right,
                    predicate,
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
                left: Box::new(self.select(*left, outer)?),
                right: Box::new(self.select(*right, outer)?),
            },
        })
    }

    /// Resolve the references of an expression evaluated with `frames`
    /// visible; `from` is the FROM clause references may be threaded through
    fn expr(
        &self,
        expr: SqlExpr,
        frames: &[Frame],
        mut from: Option<&mut Source>,
        context: &str,
    ) -> CompileResult<SqlExpr> {
        let rec = |e: SqlExpr, from: Option<&mut Source>| self.expr(e, frames, from, context);
        Ok(match expr {
            SqlExpr::Column(c) => SqlExpr::Column(self.column(c, frames, from, context)?),
            SqlExpr::Parameter(_) | SqlExpr::Null | SqlExpr::Literal(_) => expr,
            SqlExpr::Binary { op, left, right } => SqlExpr::Binary {
                op,
                left: Box::new(rec(*left, from.as_deref_mut())?),
                right: Box::new(rec(*right, from)?),
            },
            SqlExpr::Unary { op, operand } => SqlExpr::Unary {
                op,
                operand: Box::new(rec(*operand, from)?),
            },
            SqlExpr::Function { function, args } => {
                let mut rebuilt = Vec::with_capacity(args.len());
                for arg in args {
                    rebuilt.push(rec(arg, from.as_deref_mut())?);
                }
                SqlExpr::Function {
                    function,
                    args: rebuilt,
                }
            }
            SqlExpr::Case { whens, otherwise } => {
                let mut rebuilt = Vec::with_capacity(whens.len());
                for (when, then) in whens {
                    let when = rec(when, from.as_deref_mut())?;
                    rebuilt.push((when, rec(then, from.as_deref_mut())?));
                }
                let otherwise = match otherwise {
                    Some(o) => Some(Box::new(rec(*o, from)?)),
                    None => None,
                };
                SqlExpr::Case {
                    whens: rebuilt,
                    otherwise,
                }
            }
            SqlExpr::IsNull { operand, negated } => SqlExpr::IsNull {
                operand: Box::new(rec(*operand, from)?),
                negated,
            },
            SqlExpr::Cast { operand, target } => SqlExpr::Cast {
                operand: Box::new(rec(*operand, from)?),
                target,
            },
            SqlExpr::Like { operand, pattern } => SqlExpr::Like {
                operand: Box::new(rec(*operand, from.as_deref_mut())?),
                pattern: Box::new(rec(*pattern, from)?),
            },
            SqlExpr::Aggregate(agg) => SqlExpr::Aggregate(AggregateExpr {
                kind: agg.kind,
                arg: match agg.arg {
                    Some(a) => Some(Box::new(rec(*a, from)?)),
                    None => None,
                },
                distinct: agg.distinct,
            }),
            // Rendered as its fallback subquery when the aggregate rewriter
            // did not run
            SqlExpr::AggregateSubquery {
                group,
                aggregate,
                subquery,
            } => SqlExpr::AggregateSubquery {
                group,
                aggregate,
                subquery: Box::new(self.select(*subquery, frames)?),
            },
            SqlExpr::Subquery(s) => SqlExpr::Subquery(Box::new(self.select(*s, frames)?)),
            SqlExpr::Exists(s) => SqlExpr::Exists(Box::new(self.select(*s, frames)?)),
            SqlExpr::In { operand, subquery } => SqlExpr::In {
                operand: Box::new(rec(*operand, from)?),
                subquery: Box::new(self.select(*subquery, frames)?),
            },
        })
    }

    fn column(
        &self,
        column: ColumnExpr,
        frames: &[Frame],
        from: Option<&mut Source>,
        context: &str,
    ) -> CompileResult<ColumnExpr> {
        let scope = self.arena.resolve(column.scope);
        let column = ColumnExpr::new(scope, column.name);
        // innermost definition of the scope wins
        if let Some((_, names)) = frames.iter().rev().find(|(s, _)| *s == scope) {
            return match names.iter().filter(|n| **n == column.name).count() {
                1 => Ok(column),
                0 => Err(self.unresolved(&column, context)),
                count => Err(CompileError::AmbiguousColumn {
                    scope: scope.alias(),
                    column: column.name,
                    count,
                }),
            };
        }
        if let Some(from) = from.filter(|_| self.threading) {
            if let Some(threaded) = thread(from, &column) {
                debug!("Threaded {column} outward as {threaded}");
                return Ok(threaded);
            }
        }
        Err(self.unresolved(&column, context))
    }

    fn unresolved(&self, column: &ColumnExpr, context: &str) -> CompileError {
        CompileError::UnresolvedColumn {
            scope: column.scope.alias(),
            column: column.name.clone(),
            pass: self.pass.to_string(),
            context: context.to_string(),
        }
    }

    /// Projector reads and correlation keys must be columns of the top select
    fn projection_reads(&self, projection: &Projection) -> CompileResult<()> {
        let top = &projection.select;
        let frames = [(
            top.scope,
            top.columns.iter().map(|c| c.name.clone()).collect(),
        )];
        let mut result = Ok(());
        projection.projector.for_each_read(&mut |read| {
            read.for_each_column(&mut |c| {
                if result.is_ok() {
                    result = self
                        .column(c.clone(), &frames, None, "projector")
                        .map(|_| ());
                }
            })
        });
        result?;
        for key in &projection.keys {
            self.column(key.clone(), &frames, None, "correlation key")?;
        }
        Ok(())
    }

    fn command(&self, command: &CommandNode) -> CompileResult<()> {
        match command {
            CommandNode::Delete(delete) => self.single_key(&delete.rows, &delete.key),
            CommandNode::Update(update) => {
                self.single_key(&update.rows, &update.key)?;
                let frames = [(update.target, update.target_columns.clone())];
                for (name, value) in &update.assignments {
                    if !update.target_columns.contains(name) {
                        return Err(self.unresolved(
                            &ColumnExpr::new(update.target, name.clone()),
                            "update assignment",
                        ));
                    }
                    self.expr(value.clone(), &frames, None, "update assignment")?;
                }
                Ok(())
            }
            CommandNode::Insert(insert) => {
                if insert.source.columns.len() != insert.columns.len() {
                    return Err(CompileError::Translation {
                        message: format!(
                            "insert into {} lists {} columns but selects {}",
                            insert.table,
                            insert.columns.len(),
                            insert.source.columns.len()
                        ),
                    });
                }
                Ok(())
            }
        }
    }

    fn single_key(&self, rows: &SelectNode, key: &str) -> CompileResult<()> {
        match rows.columns.as_slice() {
            [only] if only.name == key => Ok(()),
            _ => Err(CompileError::Translation {
                message: format!("affected-row select must yield only the key '{key}'"),
            }),
        }
    }
}

/// Scopes a FROM clause makes visible, with their columns
fn frames_of(source: &Source) -> Vec<Frame> {
    source
        .scopes()
        .into_iter()
        .map(|scope| {
            let columns = source
                .columns_of(scope)
                .unwrap_or_default()
                .into_iter()
                .map(String::from)
                .collect();
            (scope, columns)
        })
        .collect()
}

/// Scopes reachable along the FROM chain of `source`
fn chain_scopes(source: &Source, out: &mut Vec<ScopeId>) {
    match source {
        Source::Table { scope, .. } | Source::SetOp { scope, .. } => out.push(*scope),
        Source::Select(select) => {
            out.push(select.scope);
            if let Some(from) = &select.from {
                chain_scopes(from, out);
            }
        }
        Source::Join(join) => {
            chain_scopes(&join.left, out);
            chain_scopes(&join.right, out);
        }
    }
}

/// Expose `target`, defined deeper in `source`'s FROM chain, as a column of
/// the directly visible select leading to it
fn thread(source: &mut Source, target: &ColumnExpr) -> Option<ColumnExpr> {
    match source {
        Source::Select(select) => {
            let mut reachable = Vec::new();
            if let Some(from) = &select.from {
                chain_scopes(from, &mut reachable);
            }
            if !reachable.contains(&target.scope) {
                return None;
            }
            let name = expose(select, target)?;
            Some(ColumnExpr::new(select.scope, name))
        }
        Source::Join(join) => {
            if let Some(found) = thread(&mut join.left, target) {
                return Some(found);
            }
            thread(&mut join.right, target)
        }
        Source::Table { .. } | Source::SetOp { .. } => None,
    }
}

/// Name of a column of `select` yielding `target`, added when missing.
/// Grouped selects pass through only their grouping expressions.
fn expose(select: &mut SelectNode, target: &ColumnExpr) -> Option<String> {
    let from = select.from.as_mut()?;
    let expr = if from.scopes().contains(&target.scope) {
        let defined = from
            .columns_of(target.scope)?
            .contains(&target.name.as_str());
        if !defined {
            return None;
        }
        SqlExpr::Column(target.clone())
    } else {
        SqlExpr::Column(thread(from, target)?)
    };
    if select.is_grouped() && !select.group_by.contains(&expr) {
        return None;
    }
    if let Some(existing) = select.columns.iter().find(|c| c.expr == expr) {
        return Some(existing.name.clone());
    }
    let name = select.unique_name(&target.name);
    select.columns.push(ColumnDef::new(name.clone(), expr));
    Some(name)
}

#[cfg(test)]
#[path = "rebinder_test.rs"]
mod tests;
