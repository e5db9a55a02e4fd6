//! Relational scalar expressions

use super::{ScopeId, SelectNode};
use crate::query::{AggregateKind, BinOp, UnOp};
use quarry_core::{SqlType, Value};

/// Reference to a column of a visible scope, resolved by handle and name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnExpr {
    pub scope: ScopeId,
    pub name: String,
}

impl ColumnExpr {
    pub fn new(scope: ScopeId, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ColumnExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.scope, self.name)
    }
}

/// Scalar functions with a direct SQL spelling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlFunction {
    Upper,
    Lower,
    Length,
    Trim,
    Abs,
    Round,
    Coalesce,
    Concat,
}

impl SqlFunction {
    /// Map an operator-tree call name to a function
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "upper" => SqlFunction::Upper,
            "lower" => SqlFunction::Lower,
            "length" => SqlFunction::Length,
            "trim" => SqlFunction::Trim,
            "abs" => SqlFunction::Abs,
            "round" => SqlFunction::Round,
            "coalesce" => SqlFunction::Coalesce,
            "concat" => SqlFunction::Concat,
            _ => return None,
        })
    }

    pub fn sql(self) -> &'static str {
        match self {
            SqlFunction::Upper => "UPPER",
            SqlFunction::Lower => "LOWER",
            SqlFunction::Length => "LENGTH",
            SqlFunction::Trim => "TRIM",
            SqlFunction::Abs => "ABS",
            SqlFunction::Round => "ROUND",
            SqlFunction::Coalesce => "COALESCE",
            SqlFunction::Concat => "CONCAT",
        }
    }
}

/// An aggregate call, scoped to the group of the select that evaluates it
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub kind: AggregateKind,
    /// `None` for `COUNT(*)`
    pub arg: Option<Box<SqlExpr>>,
    pub distinct: bool,
}

impl AggregateExpr {
    pub fn new(kind: AggregateKind, arg: Option<SqlExpr>) -> Self {
        Self {
            kind,
            arg: arg.map(Box::new),
            distinct: false,
        }
    }
}

/// Relational scalar expression
#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    /// Column of a visible scope
    Column(ColumnExpr),

    /// Value bound as a command parameter
    Parameter(Value),

    /// `NULL`
    Null,

    /// Integer written into the command text; only for values the compiler
    /// itself produces, never for caller constants
    Literal(i64),

    Binary {
        op: BinOp,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },

    Unary {
        op: UnOp,
        operand: Box<SqlExpr>,
    },

    Function {
        function: SqlFunction,
        args: Vec<SqlExpr>,
    },

    /// `CASE WHEN .. THEN .. [ELSE ..] END`
    Case {
        whens: Vec<(SqlExpr, SqlExpr)>,
        otherwise: Option<Box<SqlExpr>>,
    },

    IsNull {
        operand: Box<SqlExpr>,
        negated: bool,
    },

    Cast {
        operand: Box<SqlExpr>,
        target: SqlType,
    },

    /// `operand LIKE pattern ESCAPE '\'`
    Like {
        operand: Box<SqlExpr>,
        pattern: Box<SqlExpr>,
    },

    /// Aggregate evaluated by the enclosing select
    Aggregate(AggregateExpr),

    /// Aggregate over the rows of a group, pending the aggregate rewriter.
    ///
    /// `aggregate` is expressed in the terms of the grouping select's source;
    /// `subquery` is the equivalent correlated scalar subquery, used when the
    /// grouping select is not reachable from the reference.
    AggregateSubquery {
        group: ScopeId,
        aggregate: AggregateExpr,
        subquery: Box<SelectNode>,
    },

    /// Scalar subquery
    Subquery(Box<SelectNode>),

    /// `EXISTS (subquery)`
    Exists(Box<SelectNode>),

    /// `operand IN (subquery)`
    In {
        operand: Box<SqlExpr>,
        subquery: Box<SelectNode>,
    },
}

impl SqlExpr {
    pub fn column(scope: ScopeId, name: impl Into<String>) -> Self {
        SqlExpr::Column(ColumnExpr::new(scope, name))
    }

    pub fn binary(op: BinOp, left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::binary(BinOp::Eq, left, right)
    }

    /// Conjunction of all predicates, `None` when empty
    pub fn and_all(predicates: impl IntoIterator<Item = SqlExpr>) -> Option<SqlExpr> {
        predicates
            .into_iter()
            .reduce(|acc, p| SqlExpr::binary(BinOp::And, acc, p))
    }

    /// Conjunction of an optional predicate with another
    pub fn and_opt(existing: Option<SqlExpr>, extra: SqlExpr) -> SqlExpr {
        match existing {
            Some(p) => SqlExpr::binary(BinOp::And, p, extra),
            None => extra,
        }
    }

    pub fn as_column(&self) -> Option<&ColumnExpr> {
        match self {
            SqlExpr::Column(c) => Some(c),
            _ => None,
        }
    }

    /// Whether this expression aggregates the rows of the select evaluating it
    /// (subqueries are their own selects and do not count)
    pub fn contains_aggregate(&self) -> bool {
        match self {
            SqlExpr::Aggregate(_) => true,
            SqlExpr::Column(_)
            | SqlExpr::Parameter(_)
            | SqlExpr::Null
            | SqlExpr::Literal(_)
            | SqlExpr::AggregateSubquery { .. }
            | SqlExpr::Subquery(_)
            | SqlExpr::Exists(_) => false,
            SqlExpr::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            SqlExpr::Unary { operand, .. }
            | SqlExpr::IsNull { operand, .. }
            | SqlExpr::Cast { operand, .. }
            | SqlExpr::In { operand, .. } => operand.contains_aggregate(),
            SqlExpr::Like { operand, pattern } => {
                operand.contains_aggregate() || pattern.contains_aggregate()
            }
            SqlExpr::Function { args, .. } => args.iter().any(SqlExpr::contains_aggregate),
            SqlExpr::Case { whens, otherwise } => {
                whens
                    .iter()
                    .any(|(w, t)| w.contains_aggregate() || t.contains_aggregate())
                    || otherwise.as_ref().is_some_and(|o| o.contains_aggregate())
            }
        }
    }
}
