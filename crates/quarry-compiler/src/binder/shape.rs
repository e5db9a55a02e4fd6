//! Binding-time value shapes and the column projector

use crate::ir::{ColumnDef, NestedCollection, ScopeId, SelectNode, SqlExpr};
use quarry_core::Catalog;
use std::rc::Rc;

/// What the binder knows about a grouping: enough to rebuild its element rows
#[derive(Debug, Clone)]
pub(crate) struct GroupInfo {
    /// Select producing one row per element, with key and element columns
    pub pre: SelectNode,
    /// Element shape, reading `pre`'s columns
    pub element: Shape,
    /// Key expressions over `pre`, in the read order of the key shape
    pub keys: Vec<SqlExpr>,
    /// The grouping select over `pre`
    pub group_scope: ScopeId,
}

/// The value an expression denotes while binding
///
/// Leaves are SQL expressions over the scopes visible at the point of use.
/// A group keeps its element rows reachable through [`GroupInfo`].
#[derive(Debug, Clone)]
pub(crate) enum Shape {
    Scalar(SqlExpr),
    Construct {
        type_name: Option<String>,
        fields: Vec<(String, Shape)>,
    },
    Entity {
        entity: String,
        fields: Vec<(String, SqlExpr)>,
        presence: Option<SqlExpr>,
    },
    Group {
        key: Box<Shape>,
        info: Rc<GroupInfo>,
    },
    Nested(Box<NestedCollection>),
}

impl Shape {
    /// Visit every leaf expression in a stable order
    pub fn for_each_read(&self, f: &mut dyn FnMut(&SqlExpr)) {
        match self {
            Shape::Scalar(e) => f(e),
            Shape::Construct { fields, .. } => fields.iter().for_each(|(_, s)| s.for_each_read(f)),
            Shape::Entity {
                fields, presence, ..
            } => {
                fields.iter().for_each(|(_, e)| f(e));
                if let Some(p) = presence {
                    f(p);
                }
            }
            Shape::Group { key, .. } => key.for_each_read(f),
            Shape::Nested(nested) => nested.outer_keys.iter().for_each(|k| f(k)),
        }
    }

    /// Rebuild with every leaf mapped through `f`, in [`Shape::for_each_read`] order
    pub fn map_reads(self, f: &mut dyn FnMut(SqlExpr) -> SqlExpr) -> Shape {
        match self {
            Shape::Scalar(e) => Shape::Scalar(f(e)),
            Shape::Construct { type_name, fields } => Shape::Construct {
                type_name,
                fields: fields
                    .into_iter()
                    .map(|(n, s)| (n, s.map_reads(f)))
                    .collect(),
            },
            Shape::Entity {
                entity,
                fields,
                presence,
            } => {
                let fields = fields.into_iter().map(|(n, e)| (n, f(e))).collect();
                Shape::Entity {
                    entity,
                    fields,
                    presence: presence.map(|p| f(p)),
                }
            }
            Shape::Group { key, info } => Shape::Group {
                key: Box::new(key.map_reads(f)),
                info,
            },
            Shape::Nested(mut nested) => {
                nested.outer_keys = nested.outer_keys.into_iter().map(|k| f(k)).collect();
                Shape::Nested(nested)
            }
        }
    }

    pub fn reads(&self) -> Vec<SqlExpr> {
        let mut out = Vec::new();
        self.for_each_read(&mut |e| out.push(e.clone()));
        out
    }

    /// Entity field by column name
    pub fn entity_field(&self, name: &str) -> Option<&SqlExpr> {
        match self {
            Shape::Entity { fields, .. } => fields.iter().find(|(n, _)| n == name).map(|(_, e)| e),
            _ => None,
        }
    }

    /// Whether two shapes have the same structure, so their reads line up
    /// positionally (set operation operands)
    pub fn same_layout(&self, other: &Shape) -> bool {
        match (self, other) {
            (Shape::Scalar(_), Shape::Scalar(_)) => true,
            (
                Shape::Construct { fields: a, .. },
                Shape::Construct { fields: b, .. },
            ) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((na, sa), (nb, sb))| na == nb && sa.same_layout(sb))
            }
            (
                Shape::Entity {
                    entity: ea,
                    presence: pa,
                    ..
                },
                Shape::Entity {
                    entity: eb,
                    presence: pb,
                    ..
                },
            ) => ea == eb && pa.is_some() == pb.is_some(),
            _ => false,
        }
    }

    /// Mark an entity as possibly absent: its key reads NULL when no row matched
    pub fn with_presence(self, catalog: &Catalog) -> Shape {
        match self {
            Shape::Entity {
                entity,
                fields,
                presence: None,
            } => {
                let key = catalog.entity(&entity).map(|def| def.key.as_str());
                let presence = fields
                    .iter()
                    .find(|(n, _)| Some(n.as_str()) == key)
                    .map(|(_, e)| e.clone());
                Shape::Entity {
                    entity,
                    fields,
                    presence,
                }
            }
            other => other,
        }
    }
}

/// Exposes expressions as output columns of one select, reusing a column
/// that already computes the same expression
pub(crate) struct ColumnProjector<'s> {
    select: &'s mut SelectNode,
}

impl<'s> ColumnProjector<'s> {
    pub fn new(select: &'s mut SelectNode) -> Self {
        Self { select }
    }

    /// Column of the select computing `expr`, added when missing
    pub fn column(&mut self, expr: SqlExpr) -> SqlExpr {
        let scope = self.select.scope;
        if let Some(existing) = self.select.columns.iter().find(|c| c.expr == expr) {
            return SqlExpr::column(scope, existing.name.clone());
        }
        let base = match &expr {
            SqlExpr::Column(c) => c.name.clone(),
            SqlExpr::Aggregate(agg) => agg.kind.column_name().to_string(),
            _ => "c".to_string(),
        };
        let name = self.select.unique_name(&base);
        self.select.columns.push(ColumnDef::new(name.clone(), expr));
        SqlExpr::column(scope, name)
    }

    /// Rebuild `shape` to read columns of the select
    pub fn shape(&mut self, shape: Shape) -> Shape {
        shape.map_reads(&mut |e| self.column(e))
    }
}
