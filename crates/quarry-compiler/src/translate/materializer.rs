//! Result shapes and the materializers compiled from them
//!
//! A projector is resolved once into a [`ResultShape`] of column ordinals,
//! then compiled into a tree of closures. Materializing a row is a walk over
//! those closures with no lookups by name.

use crate::error::{CompileError, CompileResult, QueryError};
use crate::exec::Row;
use crate::ir::{NestedCollection, ProjectorExpr, SelectNode, SqlExpr};
use quarry_core::Value;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// How output values are rebuilt from the columns of a result row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultShape {
    /// The value at one column ordinal
    Scalar { ordinal: usize },

    /// An object with named fields
    Object {
        #[serde(skip_serializing_if = "Option::is_none")]
        type_name: Option<String>,
        fields: Vec<ShapeField>,
    },

    /// An entity row; null when the `presence` column reads NULL
    Entity {
        entity: String,
        fields: Vec<ShapeField>,
        #[serde(skip_serializing_if = "Option::is_none")]
        presence: Option<usize>,
    },

    /// The rows of the child translation at index `child` owned by this row
    Collection { child: usize },
}

/// One named field of an object or entity shape
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapeField {
    pub name: String,
    pub shape: ResultShape,
}

/// Compiled row-to-value function
pub(crate) type Materializer =
    Arc<dyn Fn(&Row, &NestedRows) -> Result<serde_json::Value, QueryError> + Send + Sync>;

/// Materialized child rows, grouped by correlation key, one entry per child
/// translation
#[derive(Debug, Default)]
pub(crate) struct NestedRows {
    children: Vec<ChildRows>,
}

#[derive(Debug)]
struct ChildRows {
    outer_ordinals: Vec<usize>,
    null_keys_match: bool,
    groups: HashMap<Vec<Value>, Vec<serde_json::Value>>,
}

impl NestedRows {
    /// Record the grouped rows of the next child translation
    pub fn push(
        &mut self,
        outer_ordinals: Vec<usize>,
        null_keys_match: bool,
        groups: HashMap<Vec<Value>, Vec<serde_json::Value>>,
    ) {
        self.children.push(ChildRows {
            outer_ordinals,
            null_keys_match,
            groups,
        });
    }

    /// Child rows whose key equals the parent row's correlation values
    fn rows_for(&self, child: usize, row: &Row) -> Result<serde_json::Value, QueryError> {
        let rows = self.children.get(child).ok_or_else(|| QueryError::Materialize {
            message: format!("rows of nested collection {child} were not loaded"),
        })?;
        let key = row.key(&rows.outer_ordinals)?;
        if !rows.null_keys_match && key.iter().any(Value::is_null) {
            return Ok(serde_json::Value::Array(Vec::new()));
        }
        let owned = rows.groups.get(&key).cloned().unwrap_or_default();
        Ok(serde_json::Value::Array(owned))
    }
}

/// Resolve a projector over `top` into a shape. Nested collections are
/// moved into `nested` and referenced by index.
pub(crate) fn shape_of(
    projector: &ProjectorExpr,
    top: &SelectNode,
    nested: &mut Vec<NestedCollection>,
) -> CompileResult<ResultShape> {
    Ok(match projector {
        ProjectorExpr::Scalar(read) => ResultShape::Scalar {
            ordinal: ordinal_of(read, top)?,
        },
        ProjectorExpr::Construct { type_name, fields } => ResultShape::Object {
            type_name: type_name.clone(),
            fields: shape_fields(fields, top, nested)?,
        },
        ProjectorExpr::Entity {
            entity,
            fields,
            presence,
        } => ResultShape::Entity {
            entity: entity.clone(),
            fields: shape_fields(fields, top, nested)?,
            presence: presence.as_ref().map(|p| ordinal_of(p, top)).transpose()?,
        },
        ProjectorExpr::Nested(collection) => {
            nested.push((**collection).clone());
            ResultShape::Collection {
                child: nested.len() - 1,
            }
        }
    })
}

fn shape_fields(
    fields: &[(String, ProjectorExpr)],
    top: &SelectNode,
    nested: &mut Vec<NestedCollection>,
) -> CompileResult<Vec<ShapeField>> {
    fields
        .iter()
        .map(|(name, projector)| {
            Ok(ShapeField {
                name: name.clone(),
                shape: shape_of(projector, top, nested)?,
            })
        })
        .collect()
}

/// Ordinal of the top-select column `read` names
pub(crate) fn ordinal_of(read: &SqlExpr, top: &SelectNode) -> CompileResult<usize> {
    let position = match read {
        SqlExpr::Column(column) if column.scope == top.scope => top
            .columns
            .iter()
            .position(|c| c.name == column.name),
        _ => None,
    };
    position.ok_or_else(|| CompileError::Translation {
        message: format!("projector reads {read:?}, not a column of {}", top.scope),
    })
}

/// Compile a shape into its materializer
pub(crate) fn compile(shape: &ResultShape) -> Materializer {
    match shape {
        ResultShape::Scalar { ordinal } => {
            let ordinal = *ordinal;
            materializer(move |row, _| Ok(row.get(ordinal)?.to_json()))
        }
        ResultShape::Object { fields, .. } => {
            let fields = compile_fields(fields);
            materializer(move |row, nested| build_object(&fields, row, nested))
        }
        ResultShape::Entity {
            fields, presence, ..
        } => {
            let fields = compile_fields(fields);
            let presence = *presence;
            materializer(move |row, nested| {
                if let Some(ordinal) = presence {
                    if row.get(ordinal)?.is_null() {
                        return Ok(serde_json::Value::Null);
                    }
                }
                build_object(&fields, row, nested)
            })
        }
        ResultShape::Collection { child } => {
            let child = *child;
            materializer(move |row, nested| nested.rows_for(child, row))
        }
    }
}

fn materializer(
    f: impl Fn(&Row, &NestedRows) -> Result<serde_json::Value, QueryError> + Send + Sync + 'static,
) -> Materializer {
    Arc::new(f)
}

fn compile_fields(fields: &[ShapeField]) -> Vec<(String, Materializer)> {
    fields
        .iter()
        .map(|f| (f.name.clone(), compile(&f.shape)))
        .collect()
}

fn build_object(
    fields: &[(String, Materializer)],
    row: &Row,
    nested: &NestedRows,
) -> Result<serde_json::Value, QueryError> {
    let mut object = serde_json::Map::with_capacity(fields.len());
    for (name, materialize) in fields {
        object.insert(name.clone(), materialize(row, nested)?);
    }
    Ok(serde_json::Value::Object(object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ColumnDef, ScopeArena, ScopeKind};
    use crate::test_utils::table_source;
    use serde_json::json;

    fn user_select(arena: &mut ScopeArena) -> SelectNode {
        let (t, users) = table_source(arena, "users", &["id", "name"]);
        let mut select = SelectNode::new(arena.alloc(ScopeKind::Select), users);
        select.columns.push(ColumnDef::new("id", SqlExpr::column(t, "id")));
        select
            .columns
            .push(ColumnDef::new("name", SqlExpr::column(t, "name")));
        select
    }

    #[test]
    fn test_entity_fields_resolve_to_ordinals() {
        let mut arena = ScopeArena::new();
        let top = user_select(&mut arena);
        let projector = ProjectorExpr::Entity {
            entity: "User".to_string(),
            fields: vec![
                (
                    "name".to_string(),
                    ProjectorExpr::Scalar(SqlExpr::column(top.scope, "name")),
                ),
                (
                    "id".to_string(),
                    ProjectorExpr::Scalar(SqlExpr::column(top.scope, "id")),
                ),
            ],
            presence: Some(SqlExpr::column(top.scope, "id")),
        };
        let shape = shape_of(&projector, &top, &mut Vec::new()).unwrap();
        let materialize = compile(&shape);

        let row = Row::new(vec![Value::Integer(7), Value::from("ann")]);
        assert_eq!(
            materialize(&row, &NestedRows::default()).unwrap(),
            json!({"name": "ann", "id": 7})
        );
        let missing = Row::new(vec![Value::Null, Value::Null]);
        assert_eq!(
            materialize(&missing, &NestedRows::default()).unwrap(),
            serde_json::Value::Null
        );
    }

    #[test]
    fn test_read_outside_top_is_translation_error() {
        let mut arena = ScopeArena::new();
        let top = user_select(&mut arena);
        let other = arena.alloc(ScopeKind::Select);
        let err = shape_of(
            &ProjectorExpr::Scalar(SqlExpr::column(other, "id")),
            &top,
            &mut Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::Translation { .. }));
    }

    #[test]
    fn test_collection_reads_rows_owned_by_parent_key() {
        let materialize = compile(&ResultShape::Object {
            type_name: None,
            fields: vec![
                ShapeField {
                    name: "id".to_string(),
                    shape: ResultShape::Scalar { ordinal: 0 },
                },
                ShapeField {
                    name: "orders".to_string(),
                    shape: ResultShape::Collection { child: 0 },
                },
            ],
        });
        let mut groups = HashMap::new();
        groups.insert(vec![Value::Integer(1)], vec![json!(10), json!(11)]);
        let mut nested = NestedRows::default();
        nested.push(vec![0], false, groups);

        let owner = Row::new(vec![Value::Integer(1)]);
        let childless = Row::new(vec![Value::Integer(2)]);
        assert_eq!(
            materialize(&owner, &nested).unwrap(),
            json!({"id": 1, "orders": [10, 11]})
        );
        assert_eq!(
            materialize(&childless, &nested).unwrap(),
            json!({"id": 2, "orders": []})
        );
    }

    #[test]
    fn test_short_row_is_materialize_error() {
        let materialize = compile(&ResultShape::Scalar { ordinal: 3 });
        let err = materialize(&Row::new(vec![Value::Integer(1)]), &NestedRows::default())
            .unwrap_err();
        assert!(matches!(err, QueryError::Materialize { .. }));
    }
}
