//! Deep traversal of relational IR
//!
//! [`IrRewriter`] rebuilds a tree bottom-up with hooks for column
//! references and scope handles; the `for_each_*` methods walk it read-only.

use super::{
    AggregateExpr, ColumnDef, ColumnExpr, JoinNode, OrderKey, ScopeArena, ScopeId, SelectNode,
    Source, SqlExpr,
};
use std::collections::BTreeMap;

/// Hooks applied while rebuilding relational IR
pub trait IrRewriter {
    /// Replace a column reference
    fn column(&mut self, column: ColumnExpr) -> SqlExpr {
        SqlExpr::Column(column)
    }

    /// Replace a scope handle where a scope is defined
    fn scope(&mut self, scope: ScopeId) -> ScopeId {
        scope
    }
}

struct ColumnMapper<F>(F);

impl<F: FnMut(ColumnExpr) -> SqlExpr> IrRewriter for ColumnMapper<F> {
    fn column(&mut self, column: ColumnExpr) -> SqlExpr {
        (self.0)(column)
    }
}

struct ScopeRemapper<'a>(&'a BTreeMap<ScopeId, ScopeId>);

impl IrRewriter for ScopeRemapper<'_> {
    fn column(&mut self, column: ColumnExpr) -> SqlExpr {
        let scope = self.scope(column.scope);
        SqlExpr::Column(ColumnExpr::new(scope, column.name))
    }

    fn scope(&mut self, scope: ScopeId) -> ScopeId {
        self.0.get(&scope).copied().unwrap_or(scope)
    }
}

fn rewrite_box(expr: Box<SqlExpr>, r: &mut dyn IrRewriter) -> Box<SqlExpr> {
    Box::new((*expr).rewrite(r))
}

fn rewrite_select_box(select: Box<SelectNode>, r: &mut dyn IrRewriter) -> Box<SelectNode> {
    Box::new((*select).rewrite(r))
}

impl AggregateExpr {
    fn rewrite(self, r: &mut dyn IrRewriter) -> AggregateExpr {
        AggregateExpr {
            kind: self.kind,
            arg: self.arg.map(|a| rewrite_box(a, r)),
            distinct: self.distinct,
        }
    }
}

impl SqlExpr {
    /// Rebuild this expression, descending into subqueries
    pub fn rewrite(self, r: &mut dyn IrRewriter) -> SqlExpr {
        match self {
            SqlExpr::Column(c) => r.column(c),
            SqlExpr::Parameter(_) | SqlExpr::Null | SqlExpr::Literal(_) => self,
            SqlExpr::Binary { op, left, right } => SqlExpr::Binary {
                op,
                left: rewrite_box(left, r),
                right: rewrite_box(right, r),
            },
            SqlExpr::Unary { op, operand } => SqlExpr::Unary {
                op,
                operand: rewrite_box(operand, r),
            },
            SqlExpr::Function { function, args } => SqlExpr::Function {
                function,
                args: args.into_iter().map(|a| a.rewrite(r)).collect(),
            },
            SqlExpr::Case { whens, otherwise } => SqlExpr::Case {
                whens: whens
                    .into_iter()
                    .map(|(w, t)| (w.rewrite(r), t.rewrite(r)))
                    .collect(),
                otherwise: otherwise.map(|o| rewrite_box(o, r)),
            },
            SqlExpr::IsNull { operand, negated } => SqlExpr::IsNull {
                operand: rewrite_box(operand, r),
                negated,
            },
            SqlExpr::Cast { operand, target } => SqlExpr::Cast {
                operand: rewrite_box(operand, r),
                target,
            },
            SqlExpr::Like { operand, pattern } => SqlExpr::Like {
                operand: rewrite_box(operand, r),
                pattern: rewrite_box(pattern, r),
            },
            SqlExpr::Aggregate(agg) => SqlExpr::Aggregate(agg.rewrite(r)),
            SqlExpr::AggregateSubquery {
                group,
                aggregate,
                subquery,
            } => SqlExpr::AggregateSubquery {
                group: r.scope(group),
                aggregate: aggregate.rewrite(r),
                subquery: rewrite_select_box(subquery, r),
            },
            SqlExpr::Subquery(s) => SqlExpr::Subquery(rewrite_select_box(s, r)),
            SqlExpr::Exists(s) => SqlExpr::Exists(rewrite_select_box(s, r)),
            SqlExpr::In { operand, subquery } => SqlExpr::In {
                operand: rewrite_box(operand, r),
                subquery: rewrite_select_box(subquery, r),
            },
        }
    }

    /// Rebuild bottom-up, passing every rebuilt node through `f`. Selects
    /// nested in the expression (subqueries) are left untouched.
    pub fn transform_shallow(self, f: &mut dyn FnMut(SqlExpr) -> SqlExpr) -> SqlExpr {
        let rebuilt = match self {
            SqlExpr::Binary { op, left, right } => SqlExpr::Binary {
                op,
                left: Box::new((*left).transform_shallow(f)),
                right: Box::new((*right).transform_shallow(f)),
            },
            SqlExpr::Unary { op, operand } => SqlExpr::Unary {
                op,
                operand: Box::new((*operand).transform_shallow(f)),
            },
            SqlExpr::Function { function, args } => SqlExpr::Function {
                function,
                args: args.into_iter().map(|a| a.transform_shallow(f)).collect(),
            },
            SqlExpr::Case { whens, otherwise } => SqlExpr::Case {
                whens: whens
                    .into_iter()
                    .map(|(w, t)| (w.transform_shallow(f), t.transform_shallow(f)))
                    .collect(),
                otherwise: otherwise.map(|o| Box::new((*o).transform_shallow(f))),
            },
            SqlExpr::IsNull { operand, negated } => SqlExpr::IsNull {
                operand: Box::new((*operand).transform_shallow(f)),
                negated,
            },
            SqlExpr::Cast { operand, target } => SqlExpr::Cast {
                operand: Box::new((*operand).transform_shallow(f)),
                target,
            },
            SqlExpr::Like { operand, pattern } => SqlExpr::Like {
                operand: Box::new((*operand).transform_shallow(f)),
                pattern: Box::new((*pattern).transform_shallow(f)),
            },
            SqlExpr::Aggregate(agg) => SqlExpr::Aggregate(AggregateExpr {
                kind: agg.kind,
                arg: agg.arg.map(|a| Box::new((*a).transform_shallow(f))),
                distinct: agg.distinct,
            }),
            SqlExpr::In { operand, subquery } => SqlExpr::In {
                operand: Box::new((*operand).transform_shallow(f)),
                subquery,
            },
            other => other,
        };
        f(rebuilt)
    }

    /// Visit column references outside nested subqueries
    pub fn for_each_shallow_column(&self, f: &mut dyn FnMut(&ColumnExpr)) {
        match self {
            SqlExpr::Column(c) => f(c),
            SqlExpr::Binary { left, right, .. } => {
                left.for_each_shallow_column(f);
                right.for_each_shallow_column(f);
            }
            SqlExpr::Unary { operand, .. }
            | SqlExpr::IsNull { operand, .. }
            | SqlExpr::Cast { operand, .. }
            | SqlExpr::In { operand, .. } => operand.for_each_shallow_column(f),
            SqlExpr::Like { operand, pattern } => {
                operand.for_each_shallow_column(f);
                pattern.for_each_shallow_column(f);
            }
            SqlExpr::Function { args, .. } => {
                args.iter().for_each(|a| a.for_each_shallow_column(f))
            }
            SqlExpr::Case { whens, otherwise } => {
                for (w, t) in whens {
                    w.for_each_shallow_column(f);
                    t.for_each_shallow_column(f);
                }
                if let Some(o) = otherwise {
                    o.for_each_shallow_column(f);
                }
            }
            SqlExpr::Aggregate(agg) => {
                if let Some(a) = &agg.arg {
                    a.for_each_shallow_column(f);
                }
            }
            SqlExpr::Parameter(_)
            | SqlExpr::Null
            | SqlExpr::Literal(_)
            | SqlExpr::AggregateSubquery { .. }
            | SqlExpr::Subquery(_)
            | SqlExpr::Exists(_) => {}
        }
    }

    /// Rebuild with every column reference mapped through `f`
    pub fn map_columns(self, f: impl FnMut(ColumnExpr) -> SqlExpr) -> SqlExpr {
        self.rewrite(&mut ColumnMapper(f))
    }

    /// Visit every column reference, including those inside subqueries
    pub fn for_each_column(&self, f: &mut dyn FnMut(&ColumnExpr)) {
        match self {
            SqlExpr::Column(c) => f(c),
            SqlExpr::Parameter(_) | SqlExpr::Null | SqlExpr::Literal(_) => {}
            SqlExpr::Binary { left, right, .. } => {
                left.for_each_column(f);
                right.for_each_column(f);
            }
            SqlExpr::Unary { operand, .. }
            | SqlExpr::IsNull { operand, .. }
            | SqlExpr::Cast { operand, .. } => operand.for_each_column(f),
            SqlExpr::Like { operand, pattern } => {
                operand.for_each_column(f);
                pattern.for_each_column(f);
            }
            SqlExpr::Function { args, .. } => args.iter().for_each(|a| a.for_each_column(f)),
            SqlExpr::Case { whens, otherwise } => {
                for (w, t) in whens {
                    w.for_each_column(f);
                    t.for_each_column(f);
                }
                if let Some(o) = otherwise {
                    o.for_each_column(f);
                }
            }
            SqlExpr::Aggregate(agg) => {
                if let Some(a) = &agg.arg {
                    a.for_each_column(f);
                }
            }
            SqlExpr::AggregateSubquery {
                aggregate,
                subquery,
                ..
            } => {
                if let Some(a) = &aggregate.arg {
                    a.for_each_column(f);
                }
                subquery.for_each_column(f);
            }
            SqlExpr::Subquery(s) | SqlExpr::Exists(s) => s.for_each_column(f),
            SqlExpr::In { operand, subquery } => {
                operand.for_each_column(f);
                subquery.for_each_column(f);
            }
        }
    }
}

impl SqlExpr {
    /// Whether a subquery appears anywhere in this expression
    pub fn contains_subquery(&self) -> bool {
        let mut found = false;
        for_each_subquery(self, &mut |_| found = true);
        found
    }
}

impl Source {
    /// Rebuild this source, descending into derived tables
    pub fn rewrite(self, r: &mut dyn IrRewriter) -> Source {
        match self {
            Source::Table {
                scope,
                table,
                columns,
            } => Source::Table {
                scope: r.scope(scope),
                table,
                columns,
            },
            Source::Select(s) => Source::Select(rewrite_select_box(s, r)),
            Source::Join(join) => {
                let JoinNode {
                    kind,
                    left,
                    right,
                    predicate,
                } = *join;
                Source::Join(Box::new(JoinNode {
                    kind,
                    left: left.rewrite(r),
                    right: right.rewrite(r),
                    predicate: predicate.map(|p| p.rewrite(r)),
                }))
            }
            Source::SetOp {
                scope,
                kind,
                left,
                right,
            } => Source::SetOp {
                scope: r.scope(scope),
                kind,
                left: rewrite_select_box(left, r),
                right: rewrite_select_box(right, r),
            },
        }
    }

    /// Visit every column reference in join predicates and derived tables
    pub fn for_each_column(&self, f: &mut dyn FnMut(&ColumnExpr)) {
        match self {
            Source::Table { .. } => {}
            Source::Select(s) => s.for_each_column(f),
            Source::Join(join) => {
                join.left.for_each_column(f);
                join.right.for_each_column(f);
                if let Some(p) = &join.predicate {
                    p.for_each_column(f);
                }
            }
            Source::SetOp { left, right, .. } => {
                left.for_each_column(f);
                right.for_each_column(f);
            }
        }
    }

    /// Visit every select reachable from this source, outermost first
    pub fn for_each_select(&self, f: &mut dyn FnMut(&SelectNode)) {
        match self {
            Source::Table { .. } => {}
            Source::Select(s) => s.for_each_select(f),
            Source::Join(join) => {
                join.left.for_each_select(f);
                join.right.for_each_select(f);
                if let Some(p) = &join.predicate {
                    for_each_subquery(p, f);
                }
            }
            Source::SetOp { left, right, .. } => {
                left.for_each_select(f);
                right.for_each_select(f);
            }
        }
    }
}

fn for_each_subquery(expr: &SqlExpr, f: &mut dyn FnMut(&SelectNode)) {
    match expr {
        SqlExpr::Subquery(s) | SqlExpr::Exists(s) => s.for_each_select(f),
        SqlExpr::In { operand, subquery } => {
            for_each_subquery(operand, f);
            subquery.for_each_select(f);
        }
        SqlExpr::AggregateSubquery { subquery, .. } => subquery.for_each_select(f),
        SqlExpr::Binary { left, right, .. } => {
            for_each_subquery(left, f);
            for_each_subquery(right, f);
        }
        SqlExpr::Unary { operand, .. }
        | SqlExpr::IsNull { operand, .. }
        | SqlExpr::Cast { operand, .. } => for_each_subquery(operand, f),
        SqlExpr::Like { operand, pattern } => {
            for_each_subquery(operand, f);
            for_each_subquery(pattern, f);
        }
        SqlExpr::Function { args, .. } => args.iter().for_each(|a| for_each_subquery(a, f)),
        SqlExpr::Case { whens, otherwise } => {
            for (w, t) in whens {
                for_each_subquery(w, f);
                for_each_subquery(t, f);
            }
            if let Some(o) = otherwise {
                for_each_subquery(o, f);
            }
        }
        SqlExpr::Aggregate(agg) => {
            if let Some(a) = &agg.arg {
                for_each_subquery(a, f);
            }
        }
        SqlExpr::Column(_) | SqlExpr::Parameter(_) | SqlExpr::Null | SqlExpr::Literal(_) => {}
    }
}

impl SelectNode {
    /// Rebuild this select and everything beneath it
    pub fn rewrite(mut self, r: &mut dyn IrRewriter) -> SelectNode {
        let scope = r.scope(self.scope);
        let from = self.from.take().map(|f| f.rewrite(r));
        self.rebuild_exprs(scope, from, &mut |e| e.rewrite(r))
    }

    /// Rebuild only this select's own expressions (columns, predicate,
    /// grouping, ordering), leaving its source untouched
    pub fn map_own_exprs(mut self, f: &mut dyn FnMut(SqlExpr) -> SqlExpr) -> SelectNode {
        let scope = self.scope;
        let from = self.from.take();
        self.rebuild_exprs(scope, from, f)
    }

    fn rebuild_exprs(
        self,
        scope: ScopeId,
        from: Option<Source>,
        f: &mut dyn FnMut(SqlExpr) -> SqlExpr,
    ) -> SelectNode {
        SelectNode {
            scope,
            from,
            columns: self
                .columns
                .into_iter()
                .map(|c| ColumnDef::new(c.name, f(c.expr)))
                .collect(),
            predicate: self.predicate.map(|p| f(p)),
            group_by: self.group_by.into_iter().map(|g| f(g)).collect(),
            order_by: self
                .order_by
                .into_iter()
                .map(|o| OrderKey {
                    expr: f(o.expr),
                    descending: o.descending,
                })
                .collect(),
            limit: self.limit,
            offset: self.offset,
            distinct: self.distinct,
        }
    }

    /// Rebuild with every column reference (at any depth) mapped through `f`
    pub fn map_columns(self, f: impl FnMut(ColumnExpr) -> SqlExpr) -> SelectNode {
        self.rewrite(&mut ColumnMapper(f))
    }

    /// Visit this select's own expressions
    pub fn for_each_own_expr(&self, f: &mut dyn FnMut(&SqlExpr)) {
        self.columns.iter().for_each(|c| f(&c.expr));
        if let Some(p) = &self.predicate {
            f(p);
        }
        self.group_by.iter().for_each(|g| f(g));
        self.order_by.iter().for_each(|o| f(&o.expr));
    }

    /// Visit every column reference at any depth
    pub fn for_each_column(&self, f: &mut dyn FnMut(&ColumnExpr)) {
        if let Some(from) = &self.from {
            from.for_each_column(f);
        }
        self.for_each_own_expr(&mut |e| e.for_each_column(f));
    }

    /// Visit this select and every select beneath it (derived tables and
    /// subqueries), outermost first
    pub fn for_each_select(&self, f: &mut dyn FnMut(&SelectNode)) {
        f(self);
        if let Some(from) = &self.from {
            from.for_each_select(f);
        }
        self.for_each_own_expr(&mut |e| for_each_subquery(e, f));
    }

    /// Scopes defined anywhere in this tree
    pub fn defined_scopes(&self) -> Vec<ScopeId> {
        let mut scopes = Vec::new();
        self.for_each_select(&mut |s| {
            scopes.push(s.scope);
            if let Some(from) = &s.from {
                scopes.extend(from.scopes());
            }
        });
        scopes.sort();
        scopes.dedup();
        scopes
    }

    /// Scopes referenced by a column but defined outside this tree
    pub fn free_scopes(&self) -> Vec<ScopeId> {
        let defined = self.defined_scopes();
        let mut free = Vec::new();
        self.for_each_column(&mut |c| {
            if !defined.contains(&c.scope) && !free.contains(&c.scope) {
                free.push(c.scope);
            }
        });
        free
    }
}

impl ScopeArena {
    /// Copy a select tree, giving every scope it defines a fresh handle.
    /// Returns the copy and the old-to-new handle map.
    pub fn duplicate(&mut self, select: &SelectNode) -> (SelectNode, BTreeMap<ScopeId, ScopeId>) {
        let map: BTreeMap<ScopeId, ScopeId> = select
            .defined_scopes()
            .into_iter()
            .map(|s| (s, self.alloc(s.kind())))
            .collect();
        let copy = select.clone().rewrite(&mut ScopeRemapper(&map));
        (copy, map)
    }
}

/// Rebuild an expression with scope handles renamed through `map`
pub fn remap_scopes(expr: SqlExpr, map: &BTreeMap<ScopeId, ScopeId>) -> SqlExpr {
    expr.rewrite(&mut ScopeRemapper(map))
}

#[cfg(test)]
#[path = "visit_test.rs"]
mod tests;
