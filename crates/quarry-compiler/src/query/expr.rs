//! Scalar expressions appearing inside operator-tree lambdas

use super::QueryNode;
use quarry_core::{SqlType, Value};
use serde::{Deserialize, Serialize};

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `AND`
    And,
    /// `OR`
    Or,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulo,
    /// `||`
    Concat,
}

impl BinOp {
    /// Whether this operator compares its operands
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq
        )
    }

    /// The operator with its operands swapped (`a < b` is `b > a`)
    pub fn flipped(self) -> BinOp {
        match self {
            BinOp::Lt => BinOp::Gt,
            BinOp::LtEq => BinOp::GtEq,
            BinOp::Gt => BinOp::Lt,
            BinOp::GtEq => BinOp::LtEq,
            other => other,
        }
    }

    /// SQL spelling of the operator
    pub fn sql(self) -> &'static str {
        match self {
            BinOp::Eq => "=",
            BinOp::NotEq => "<>",
            BinOp::Lt => "<",
            BinOp::LtEq => "<=",
            BinOp::Gt => ">",
            BinOp::GtEq => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Plus => "+",
            BinOp::Minus => "-",
            BinOp::Multiply => "*",
            BinOp::Divide => "/",
            BinOp::Modulo => "%",
            BinOp::Concat => "||",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnOp {
    /// Logical `NOT`
    Not,
    /// Arithmetic negation
    Negate,
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateKind {
    /// SQL function name
    pub fn sql(self) -> &'static str {
        match self {
            AggregateKind::Count => "COUNT",
            AggregateKind::Sum => "SUM",
            AggregateKind::Avg => "AVG",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
        }
    }

    /// Output column name used when the aggregate is a query's only column
    pub fn column_name(self) -> &'static str {
        match self {
            AggregateKind::Count => "count",
            AggregateKind::Sum => "sum",
            AggregateKind::Avg => "avg",
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
        }
    }
}

/// Target of a type conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvertTarget {
    /// Lift to the nullable form of the same type (no relational effect)
    Nullable,
    /// Convert to a relational type
    Type(SqlType),
}

/// A lambda: parameter names bound over a body expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Box<Expr>,
}

impl Lambda {
    /// Single-parameter lambda
    pub fn new(param: impl Into<String>, body: Expr) -> Self {
        Self {
            params: vec![param.into()],
            body: Box::new(body),
        }
    }

    /// Two-parameter lambda (join results, select-many results)
    pub fn new2(first: impl Into<String>, second: impl Into<String>, body: Expr) -> Self {
        Self {
            params: vec![first.into(), second.into()],
            body: Box::new(body),
        }
    }
}

/// Scalar expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Reference to a lambda parameter
    Param(String),

    /// Literal value; always bound as a command parameter
    Constant(Value),

    /// Member access: a column, a relationship, a constructed field, or `key` on a grouping
    Member { target: Box<Expr>, name: String },

    /// Binary operation
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Unary operation
    Unary { op: UnOp, operand: Box<Expr> },

    /// Method or function call by name
    Call { function: String, args: Vec<Expr> },

    /// Type conversion
    Convert {
        operand: Box<Expr>,
        target: ConvertTarget,
    },

    /// `test ? if_true : if_false`
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },

    /// Null test
    IsNull { operand: Box<Expr>, negated: bool },

    /// Constructor: a named (or anonymous) object with named fields
    New {
        type_name: Option<String>,
        fields: Vec<(String, Expr)>,
    },

    /// Aggregate over a collection navigation, a grouping, or a query
    Aggregate {
        kind: AggregateKind,
        source: Box<Expr>,
        selector: Option<Lambda>,
    },

    /// Existence test over a collection navigation, a grouping, or a query
    Any {
        source: Box<Expr>,
        predicate: Option<Lambda>,
    },

    /// A query used as a value: a nested collection, or the source of an aggregate
    Subquery(Box<QueryNode>),

    /// Invocation of a registered custom operator
    Macro { name: String, args: Vec<Expr> },
}

impl Expr {
    /// `Param(name)`
    pub fn param(name: impl Into<String>) -> Self {
        Expr::Param(name.into())
    }

    /// `Constant(value)`
    pub fn constant(value: impl Into<Value>) -> Self {
        Expr::Constant(value.into())
    }

    /// `Constant(Null)`
    pub fn null() -> Self {
        Expr::Constant(Value::Null)
    }

    /// `self.name`
    pub fn member(self, name: impl Into<String>) -> Self {
        Expr::Member {
            target: Box::new(self),
            name: name.into(),
        }
    }

    /// `self <op> right`
    pub fn binary(self, op: BinOp, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn eq(self, right: Expr) -> Self {
        self.binary(BinOp::Eq, right)
    }

    pub fn not_eq(self, right: Expr) -> Self {
        self.binary(BinOp::NotEq, right)
    }

    pub fn gt(self, right: Expr) -> Self {
        self.binary(BinOp::Gt, right)
    }

    pub fn lt(self, right: Expr) -> Self {
        self.binary(BinOp::Lt, right)
    }

    pub fn and(self, right: Expr) -> Self {
        self.binary(BinOp::And, right)
    }

    pub fn or(self, right: Expr) -> Self {
        self.binary(BinOp::Or, right)
    }

    /// `NOT self`
    pub fn not(self) -> Self {
        Expr::Unary {
            op: UnOp::Not,
            operand: Box::new(self),
        }
    }

    /// Function call
    pub fn call(function: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            function: function.into(),
            args,
        }
    }

    /// Anonymous constructor
    pub fn new_object<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Expr)>,
        S: Into<String>,
    {
        Expr::New {
            type_name: None,
            fields: fields.into_iter().map(|(n, e)| (n.into(), e)).collect(),
        }
    }

    /// Aggregate over `self`
    pub fn aggregate(self, kind: AggregateKind, selector: Option<Lambda>) -> Self {
        Expr::Aggregate {
            kind,
            source: Box::new(self),
            selector,
        }
    }

    /// `COUNT` over `self`
    pub fn count(self) -> Self {
        self.aggregate(AggregateKind::Count, None)
    }

    /// Existence over `self`
    pub fn any(self, predicate: Option<Lambda>) -> Self {
        Expr::Any {
            source: Box::new(self),
            predicate,
        }
    }

    /// Macro invocation
    pub fn macro_call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Macro {
            name: name.into(),
            args,
        }
    }

    /// The constant payload, if this is a literal
    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            Expr::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// Visit this expression and every sub-expression, pre-order, including
    /// the expressions of nested query nodes
    pub fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Param(_) | Expr::Constant(_) => {}
            Expr::Member { target, .. } => target.walk(f),
            Expr::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::Unary { operand, .. }
            | Expr::Convert { operand, .. }
            | Expr::IsNull { operand, .. } => operand.walk(f),
            Expr::Call { args, .. } | Expr::Macro { args, .. } => {
                args.iter().for_each(|a| a.walk(f));
            }
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                test.walk(f);
                if_true.walk(f);
                if_false.walk(f);
            }
            Expr::New { fields, .. } => fields.iter().for_each(|(_, e)| e.walk(f)),
            Expr::Aggregate {
                source, selector, ..
            } => {
                source.walk(f);
                if let Some(l) = selector {
                    l.body.walk(f);
                }
            }
            Expr::Any { source, predicate } => {
                source.walk(f);
                if let Some(l) = predicate {
                    l.body.walk(f);
                }
            }
            Expr::Subquery(node) => node.walk_exprs(f),
        }
    }
}
