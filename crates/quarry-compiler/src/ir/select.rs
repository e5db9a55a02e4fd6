//! Select nodes and row sources

use super::{ScopeId, SqlExpr};
use crate::query::SetOpKind;

/// An output column: expression plus output name
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub expr: SqlExpr,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, expr: SqlExpr) -> Self {
        Self {
            name: name.into(),
            expr,
        }
    }
}

/// One ordering key
#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub expr: SqlExpr,
    pub descending: bool,
}

/// Join kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    LeftOuter,
    Cross,
    /// Right side evaluated per left row; rows without matches dropped
    CrossApply,
    /// Right side evaluated per left row; rows without matches kept
    OuterApply,
}

impl JoinKind {
    /// Whether the right side may reference columns of the left side
    pub fn is_lateral(self) -> bool {
        matches!(self, JoinKind::CrossApply | JoinKind::OuterApply)
    }
}

/// Two joined row sources
#[derive(Debug, Clone, PartialEq)]
pub struct JoinNode {
    pub kind: JoinKind,
    pub left: Source,
    pub right: Source,
    pub predicate: Option<SqlExpr>,
}

/// A row source in a FROM clause
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Base table with its column names
    Table {
        scope: ScopeId,
        table: String,
        columns: Vec<String>,
    },
    /// Derived table
    Select(Box<SelectNode>),
    /// Joined sources
    Join(Box<JoinNode>),
    /// Set operation; its columns are the left operand's
    SetOp {
        scope: ScopeId,
        kind: SetOpKind,
        left: Box<SelectNode>,
        right: Box<SelectNode>,
    },
}

impl Source {
    /// Scopes this source makes directly visible, left to right
    pub fn scopes(&self) -> Vec<ScopeId> {
        let mut out = Vec::new();
        self.collect_scopes(&mut out);
        out
    }

    fn collect_scopes(&self, out: &mut Vec<ScopeId>) {
        match self {
            Source::Table { scope, .. } | Source::SetOp { scope, .. } => out.push(*scope),
            Source::Select(select) => out.push(select.scope),
            Source::Join(join) => {
                join.left.collect_scopes(out);
                join.right.collect_scopes(out);
            }
        }
    }

    /// Column names defined by the directly visible scope `scope`
    pub fn columns_of(&self, scope: ScopeId) -> Option<Vec<&str>> {
        match self {
            Source::Table {
                scope: s, columns, ..
            } if *s == scope => Some(columns.iter().map(String::as_str).collect()),
            Source::Select(select) if select.scope == scope => {
                Some(select.columns.iter().map(|c| c.name.as_str()).collect())
            }
            Source::SetOp { scope: s, left, .. } if *s == scope => {
                Some(left.columns.iter().map(|c| c.name.as_str()).collect())
            }
            Source::Join(join) => join
                .left
                .columns_of(scope)
                .or_else(|| join.right.columns_of(scope)),
            _ => None,
        }
    }
}

/// A SELECT: source, output columns, filtering, grouping, ordering, paging
#[derive(Debug, Clone, PartialEq)]
pub struct SelectNode {
    pub scope: ScopeId,
    pub from: Option<Source>,
    pub columns: Vec<ColumnDef>,
    pub predicate: Option<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub distinct: bool,
}

impl SelectNode {
    /// A select over `from` with no columns yet
    pub fn new(scope: ScopeId, from: Source) -> Self {
        Self {
            from: Some(from),
            ..Self::without_source(scope)
        }
    }

    /// A select with no FROM clause (a single row of its columns)
    pub fn without_source(scope: ScopeId) -> Self {
        Self {
            scope,
            from: None,
            columns: Vec::new(),
            predicate: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
        }
    }

    /// Whether this select only renames its source's columns: no filtering,
    /// grouping, ordering, paging or DISTINCT, and plain column reads
    pub fn is_pure_rename(&self) -> bool {
        self.from.is_some()
            && self.predicate.is_none()
            && self.group_by.is_empty()
            && self.order_by.is_empty()
            && self.limit.is_none()
            && self.offset.is_none()
            && !self.distinct
            && self.columns.iter().all(|c| c.expr.as_column().is_some())
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// AND a predicate onto this select's WHERE clause
    pub fn add_predicate(&mut self, predicate: SqlExpr) {
        self.predicate = Some(SqlExpr::and_opt(self.predicate.take(), predicate));
    }

    /// Whether any output column aggregates
    pub fn has_aggregates(&self) -> bool {
        self.columns.iter().any(|c| c.expr.contains_aggregate())
    }

    /// Whether this select collapses its source rows into groups
    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty() || self.has_aggregates()
    }

    /// `base`, or `base1`, `base2`, ... if taken
    pub fn unique_name(&self, base: &str) -> String {
        unique_name(base, |n| self.column(n).is_some())
    }
}

/// First of `base`, `base1`, `base2`, ... for which `taken` is false
pub(crate) fn unique_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|i| format!("{base}{i}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}
