//! Operator tree: the compiler's input IR
//!
//! A query is an immutable tree of [`QueryNode`]s with scalar [`Expr`]s in
//! lambda bodies. Trees are built by the caller (directly, through the
//! builder methods here, or deserialized from JSON) and consumed once by the
//! normalizer. Every later stage produces a new tree.

mod expr;
mod rewrite;

pub use expr::{AggregateKind, BinOp, ConvertTarget, Expr, Lambda, UnOp};
pub use rewrite::{rewrite_expr, rewrite_lambda, rewrite_node, TreeRewriter};

use serde::{Deserialize, Serialize};

/// Join flavor available to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    LeftOuter,
}

/// Set operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetOpKind {
    Union,
    UnionAll,
    Intersect,
    Except,
}

impl SetOpKind {
    /// SQL spelling
    pub fn sql(self) -> &'static str {
        match self {
            SetOpKind::Union => "UNION",
            SetOpKind::UnionAll => "UNION ALL",
            SetOpKind::Intersect => "INTERSECT",
            SetOpKind::Except => "EXCEPT",
        }
    }
}

/// One ordering key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub key: Lambda,
    #[serde(default)]
    pub descending: bool,
}

/// Element type carried by an operator node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementType {
    /// Rows of a catalog entity
    Entity(String),
    /// Constructed objects
    Shape,
    /// Groupings (key plus elements)
    Grouping,
    /// Single values
    Scalar,
    /// Depends on catalog metadata (a navigation's target)
    Unresolved,
}

/// Operator tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryNode {
    /// All rows of an entity's table
    Source {
        entity: String,
        /// Set once a row security predicate has been applied above this leaf
        #[serde(default)]
        secured: bool,
    },

    /// Rows of a collection navigation of an enclosing row (`owner.relation`)
    Related {
        owner: Expr,
        relation: String,
        entity: String,
        #[serde(default)]
        secured: bool,
    },

    /// Rows satisfying a predicate
    Filter {
        input: Box<QueryNode>,
        predicate: Lambda,
    },

    /// Map each row to a new shape
    Project {
        input: Box<QueryNode>,
        selector: Lambda,
    },

    /// Equi-join of two inputs
    Join {
        kind: JoinType,
        left: Box<QueryNode>,
        right: Box<QueryNode>,
        left_key: Lambda,
        right_key: Lambda,
        /// Two-parameter result selector `(left, right) => ...`
        result: Lambda,
    },

    /// Flatten a per-row collection (cross apply, or outer apply when `outer`)
    SelectMany {
        input: Box<QueryNode>,
        collection: Lambda,
        /// Two-parameter result selector; defaults to the collection element
        result: Option<Lambda>,
        #[serde(default)]
        outer: bool,
    },

    /// Group rows by key, optionally projecting the group elements
    GroupBy {
        input: Box<QueryNode>,
        key: Lambda,
        element: Option<Lambda>,
    },

    /// Order rows; the first key is the primary sort
    OrderBy {
        input: Box<QueryNode>,
        keys: Vec<SortKey>,
    },

    /// Reduce the input to a single value
    Aggregate {
        input: Box<QueryNode>,
        kind: AggregateKind,
        selector: Option<Lambda>,
    },

    /// First `count` rows
    Take { input: Box<QueryNode>, count: Expr },

    /// All but the first `count` rows
    Skip { input: Box<QueryNode>, count: Expr },

    /// Duplicate elimination
    Distinct { input: Box<QueryNode> },

    /// Union / intersection / difference of two inputs of the same shape
    SetOp {
        kind: SetOpKind,
        left: Box<QueryNode>,
        right: Box<QueryNode>,
    },
}

impl QueryNode {
    /// All rows of `entity`
    pub fn source(entity: impl Into<String>) -> Self {
        QueryNode::Source {
            entity: entity.into(),
            secured: false,
        }
    }

    /// Rows of `owner.relation`, whose elements are `entity`
    pub fn related(owner: Expr, relation: impl Into<String>, entity: impl Into<String>) -> Self {
        QueryNode::Related {
            owner,
            relation: relation.into(),
            entity: entity.into(),
            secured: false,
        }
    }

    pub fn filter(self, predicate: Lambda) -> Self {
        QueryNode::Filter {
            input: Box::new(self),
            predicate,
        }
    }

    pub fn project(self, selector: Lambda) -> Self {
        QueryNode::Project {
            input: Box::new(self),
            selector,
        }
    }

    /// Order by `key`, or add a secondary key when `self` is already ordered
    pub fn order_by(self, key: Lambda, descending: bool) -> Self {
        let sort = SortKey { key, descending };
        match self {
            QueryNode::OrderBy { input, mut keys } => {
                keys.push(sort);
                QueryNode::OrderBy { input, keys }
            }
            other => QueryNode::OrderBy {
                input: Box::new(other),
                keys: vec![sort],
            },
        }
    }

    pub fn take(self, count: i64) -> Self {
        QueryNode::Take {
            input: Box::new(self),
            count: Expr::constant(count),
        }
    }

    pub fn skip(self, count: i64) -> Self {
        QueryNode::Skip {
            input: Box::new(self),
            count: Expr::constant(count),
        }
    }

    pub fn distinct(self) -> Self {
        QueryNode::Distinct {
            input: Box::new(self),
        }
    }

    pub fn group_by(self, key: Lambda) -> Self {
        QueryNode::GroupBy {
            input: Box::new(self),
            key,
            element: None,
        }
    }

    pub fn aggregate(self, kind: AggregateKind, selector: Option<Lambda>) -> Self {
        QueryNode::Aggregate {
            input: Box::new(self),
            kind,
            selector,
        }
    }

    pub fn count(self) -> Self {
        self.aggregate(AggregateKind::Count, None)
    }

    pub fn set_op(self, kind: SetOpKind, right: QueryNode) -> Self {
        QueryNode::SetOp {
            kind,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn join(
        self,
        kind: JoinType,
        right: QueryNode,
        left_key: Lambda,
        right_key: Lambda,
        result: Lambda,
    ) -> Self {
        QueryNode::Join {
            kind,
            left: Box::new(self),
            right: Box::new(right),
            left_key,
            right_key,
            result,
        }
    }

    pub fn select_many(self, collection: Lambda, result: Option<Lambda>, outer: bool) -> Self {
        QueryNode::SelectMany {
            input: Box::new(self),
            collection,
            result,
            outer,
        }
    }

    /// Use this query as a value inside an enclosing lambda
    pub fn into_expr(self) -> Expr {
        Expr::Subquery(Box::new(self))
    }

    /// Operator name used in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            QueryNode::Source { .. } => "Source",
            QueryNode::Related { .. } => "Related",
            QueryNode::Filter { .. } => "Filter",
            QueryNode::Project { .. } => "Project",
            QueryNode::Join { .. } => "Join",
            QueryNode::SelectMany { .. } => "SelectMany",
            QueryNode::GroupBy { .. } => "GroupBy",
            QueryNode::OrderBy { .. } => "OrderBy",
            QueryNode::Aggregate { .. } => "Aggregate",
            QueryNode::Take { .. } => "Take",
            QueryNode::Skip { .. } => "Skip",
            QueryNode::Distinct { .. } => "Distinct",
            QueryNode::SetOp { .. } => "SetOp",
        }
    }

    /// Element type of the rows this node produces
    pub fn element_type(&self) -> ElementType {
        match self {
            QueryNode::Source { entity, .. } | QueryNode::Related { entity, .. } => {
                ElementType::Entity(entity.clone())
            }
            QueryNode::Filter { input, .. }
            | QueryNode::OrderBy { input, .. }
            | QueryNode::Take { input, .. }
            | QueryNode::Skip { input, .. }
            | QueryNode::Distinct { input } => input.element_type(),
            QueryNode::SetOp { left, .. } => left.element_type(),
            QueryNode::Project { input, selector } => {
                selector_element_type(selector, &[input.element_type()])
            }
            QueryNode::Join {
                left,
                right,
                result,
                ..
            } => selector_element_type(result, &[left.element_type(), right.element_type()]),
            QueryNode::SelectMany {
                input,
                collection,
                result,
                ..
            } => {
                let inner = match collection.body.as_ref() {
                    Expr::Subquery(node) => node.element_type(),
                    _ => ElementType::Unresolved,
                };
                match result {
                    Some(r) => selector_element_type(r, &[input.element_type(), inner]),
                    None => inner,
                }
            }
            QueryNode::GroupBy { .. } => ElementType::Grouping,
            QueryNode::Aggregate { .. } => ElementType::Scalar,
        }
    }

    /// Visit every expression in this tree, pre-order
    pub fn walk_exprs(&self, f: &mut dyn FnMut(&Expr)) {
        match self {
            QueryNode::Source { .. } => {}
            QueryNode::Related { owner, .. } => owner.walk(f),
            QueryNode::Filter { input, predicate } => {
                input.walk_exprs(f);
                predicate.body.walk(f);
            }
            QueryNode::Project { input, selector } => {
                input.walk_exprs(f);
                selector.body.walk(f);
            }
            QueryNode::Join {
                left,
                right,
                left_key,
                right_key,
                result,
                ..
            } => {
                left.walk_exprs(f);
                right.walk_exprs(f);
                left_key.body.walk(f);
                right_key.body.walk(f);
                result.body.walk(f);
            }
            QueryNode::SelectMany {
                input,
                collection,
                result,
                ..
            } => {
                input.walk_exprs(f);
                collection.body.walk(f);
                if let Some(r) = result {
                    r.body.walk(f);
                }
            }
            QueryNode::GroupBy {
                input,
                key,
                element,
            } => {
                input.walk_exprs(f);
                key.body.walk(f);
                if let Some(e) = element {
                    e.body.walk(f);
                }
            }
            QueryNode::OrderBy { input, keys } => {
                input.walk_exprs(f);
                for k in keys {
                    k.key.body.walk(f);
                }
            }
            QueryNode::Aggregate {
                input, selector, ..
            } => {
                input.walk_exprs(f);
                if let Some(s) = selector {
                    s.body.walk(f);
                }
            }
            QueryNode::Take { input, count } | QueryNode::Skip { input, count } => {
                input.walk_exprs(f);
                count.walk(f);
            }
            QueryNode::Distinct { input } => input.walk_exprs(f),
            QueryNode::SetOp { left, right, .. } => {
                left.walk_exprs(f);
                right.walk_exprs(f);
            }
        }
    }
}

fn selector_element_type(selector: &Lambda, inputs: &[ElementType]) -> ElementType {
    match selector.body.as_ref() {
        Expr::Param(p) => selector
            .params
            .iter()
            .position(|name| name == p)
            .and_then(|i| inputs.get(i).cloned())
            .unwrap_or(ElementType::Scalar),
        Expr::New { .. } => ElementType::Shape,
        Expr::Member { .. } => ElementType::Unresolved,
        _ => ElementType::Scalar,
    }
}

#[cfg(test)]
#[path = "query_test.rs"]
mod tests;
