//! Projectors: how output objects are rebuilt from result rows

use super::{ColumnExpr, SelectNode, SqlExpr};

/// Output shape over column reads of a projection's top select
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectorExpr {
    /// One column read
    Scalar(SqlExpr),

    /// Object with named fields
    Construct {
        type_name: Option<String>,
        fields: Vec<(String, ProjectorExpr)>,
    },

    /// Entity row; `presence` reads NULL when an outer join found no row
    Entity {
        entity: String,
        fields: Vec<(String, ProjectorExpr)>,
        presence: Option<SqlExpr>,
    },

    /// Collection loaded by a secondary query
    Nested(Box<NestedCollection>),
}

/// A nested collection placeholder
///
/// Child rows belong to the parent row whose `outer_keys` equal the child
/// projection's `keys`, pairwise.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedCollection {
    pub projection: Projection,
    /// Parent-side key expressions, read from the parent row
    pub outer_keys: Vec<SqlExpr>,
    /// NULL keys match each other. Set for group elements; a relationship
    /// owner with a NULL key has no rows.
    pub null_keys_match: bool,
}

/// A select paired with the projector reading its rows
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub select: SelectNode,
    pub projector: ProjectorExpr,
    /// Correlation key columns of `select` a nested collection is matched on;
    /// empty for a top-level query
    pub keys: Vec<ColumnExpr>,
}

impl ProjectorExpr {
    /// Visit every expression read from the row: scalar leaves, presence
    /// tests, and nested collections' outer keys
    pub fn for_each_read(&self, f: &mut dyn FnMut(&SqlExpr)) {
        match self {
            ProjectorExpr::Scalar(e) => f(e),
            ProjectorExpr::Construct { fields, .. } => {
                fields.iter().for_each(|(_, p)| p.for_each_read(f));
            }
            ProjectorExpr::Entity {
                fields, presence, ..
            } => {
                if let Some(p) = presence {
                    f(p);
                }
                fields.iter().for_each(|(_, p)| p.for_each_read(f));
            }
            ProjectorExpr::Nested(nested) => nested.outer_keys.iter().for_each(|k| f(k)),
        }
    }

    /// Rebuild with every row read mapped through `f`
    pub fn map_reads(self, f: &mut dyn FnMut(SqlExpr) -> SqlExpr) -> ProjectorExpr {
        match self {
            ProjectorExpr::Scalar(e) => ProjectorExpr::Scalar(f(e)),
            ProjectorExpr::Construct { type_name, fields } => ProjectorExpr::Construct {
                type_name,
                fields: fields
                    .into_iter()
                    .map(|(n, p)| (n, p.map_reads(f)))
                    .collect(),
            },
            ProjectorExpr::Entity {
                entity,
                fields,
                presence,
            } => ProjectorExpr::Entity {
                entity,
                presence: presence.map(|p| f(p)),
                fields: fields
                    .into_iter()
                    .map(|(n, p)| (n, p.map_reads(f)))
                    .collect(),
            },
            ProjectorExpr::Nested(mut nested) => {
                nested.outer_keys = nested.outer_keys.into_iter().map(|k| f(k)).collect();
                ProjectorExpr::Nested(nested)
            }
        }
    }

    /// Rebuild every nested collection at this level (not their descendants)
    pub fn map_nested<E>(
        self,
        f: &mut dyn FnMut(NestedCollection) -> Result<NestedCollection, E>,
    ) -> Result<ProjectorExpr, E> {
        Ok(match self {
            ProjectorExpr::Scalar(_) => self,
            ProjectorExpr::Construct { type_name, fields } => ProjectorExpr::Construct {
                type_name,
                fields: fields
                    .into_iter()
                    .map(|(n, p)| Ok((n, p.map_nested(f)?)))
                    .collect::<Result<_, E>>()?,
            },
            ProjectorExpr::Entity {
                entity,
                fields,
                presence,
            } => ProjectorExpr::Entity {
                entity,
                presence,
                fields: fields
                    .into_iter()
                    .map(|(n, p)| Ok((n, p.map_nested(f)?)))
                    .collect::<Result<_, E>>()?,
            },
            ProjectorExpr::Nested(nested) => ProjectorExpr::Nested(Box::new(f(*nested)?)),
        })
    }

    /// Visit nested collections at this level
    pub fn for_each_nested(&self, f: &mut dyn FnMut(&NestedCollection)) {
        match self {
            ProjectorExpr::Scalar(_) => {}
            ProjectorExpr::Construct { fields, .. } | ProjectorExpr::Entity { fields, .. } => {
                fields.iter().for_each(|(_, p)| p.for_each_nested(f));
            }
            ProjectorExpr::Nested(nested) => f(nested),
        }
    }
}

impl Projection {
    pub fn new(select: SelectNode, projector: ProjectorExpr) -> Self {
        Self {
            select,
            projector,
            keys: Vec::new(),
        }
    }

    /// Columns of the top select read by the projector or used as keys
    pub fn read_columns(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let scope = self.select.scope;
        self.projector.for_each_read(&mut |e| {
            e.for_each_column(&mut |c| {
                if c.scope == scope && !names.contains(&c.name) {
                    names.push(c.name.clone());
                }
            })
        });
        for key in &self.keys {
            if key.scope == scope && !names.contains(&key.name) {
                names.push(key.name.clone());
            }
        }
        names
    }
}
