//! Entity catalog: the tables, keys, columns and relationships the compiler
//! can translate member access against.

use crate::error::{CoreError, CoreResult};
use crate::value::SqlType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A column of an entity's table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnMeta {
    /// Column name (also the member name used in expressions)
    pub name: String,
    /// Relational type
    #[serde(rename = "type")]
    pub sql_type: SqlType,
    /// Whether the column admits NULL
    #[serde(default)]
    pub nullable: bool,
}

/// Relationship cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// Many-to-one: the foreign key lives on the owning entity
    Reference,
    /// One-to-many: the foreign key lives on the target entity
    Collection,
}

/// A navigable relationship from one entity to another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationDef {
    /// Member name used to navigate
    pub name: String,
    /// Target entity name
    pub target: String,
    /// Cardinality
    pub kind: RelationKind,
    /// Foreign key column (on the owner for references, on the target for collections)
    pub foreign_key: String,
    /// For references: whether the foreign key may be NULL (bound as a left outer join)
    #[serde(default)]
    pub optional: bool,
}

/// An entity type mapped to a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityDef {
    /// Entity name referenced by operator trees
    pub name: String,
    /// Backing table (optionally schema-qualified)
    pub table: String,
    /// Primary key column
    pub key: String,
    /// Table columns in declaration order
    #[serde(default)]
    pub columns: Vec<ColumnMeta>,
    /// Navigable relationships
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl EntityDef {
    /// Start an entity definition with no columns
    pub fn new(name: impl Into<String>, table: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            key: key.into(),
            columns: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Add a NOT NULL column
    pub fn column(mut self, name: impl Into<String>, sql_type: SqlType) -> Self {
        self.columns.push(ColumnMeta {
            name: name.into(),
            sql_type,
            nullable: false,
        });
        self
    }

    /// Add a nullable column
    pub fn nullable_column(mut self, name: impl Into<String>, sql_type: SqlType) -> Self {
        self.columns.push(ColumnMeta {
            name: name.into(),
            sql_type,
            nullable: true,
        });
        self
    }

    /// Add a many-to-one relationship through `foreign_key` on this entity
    pub fn reference(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
        optional: bool,
    ) -> Self {
        self.relations.push(RelationDef {
            name: name.into(),
            target: target.into(),
            kind: RelationKind::Reference,
            foreign_key: foreign_key.into(),
            optional,
        });
        self
    }

    /// Add a one-to-many relationship through `foreign_key` on the target entity
    pub fn collection(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relations.push(RelationDef {
            name: name.into(),
            target: target.into(),
            kind: RelationKind::Collection,
            foreign_key: foreign_key.into(),
            optional: false,
        });
        self
    }

    /// Find a column by name
    pub fn find_column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Find a relationship by member name
    pub fn find_relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Column names in declaration order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// On-disk catalog layout
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    entities: Vec<EntityDef>,
}

/// Validated set of entity definitions, keyed by entity name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Catalog {
    entities: BTreeMap<String, EntityDef>,
}

impl Catalog {
    /// Build a catalog, validating keys, columns and relationship targets
    pub fn new(entities: Vec<EntityDef>) -> CoreResult<Self> {
        let mut map = BTreeMap::new();
        for entity in entities {
            if map.contains_key(&entity.name) {
                return Err(invalid(format!("duplicate entity '{}'", entity.name)));
            }
            map.insert(entity.name.clone(), entity);
        }
        let catalog = Self { entities: map };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load a catalog from a YAML file with a top-level `entities:` list
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::CatalogNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        let catalog = Self::from_yaml(&content)?;
        log::debug!(
            "Loaded {} entities from {}",
            catalog.entities.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Parse a catalog from YAML text
    pub fn from_yaml(content: &str) -> CoreResult<Self> {
        let file: CatalogFile = serde_yaml::from_str(content)?;
        Self::new(file.entities)
    }

    /// Look up an entity by name
    pub fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.get(name)
    }

    /// Look up an entity by name, failing with [`CoreError::UnknownEntity`]
    pub fn require(&self, name: &str) -> CoreResult<&EntityDef> {
        self.entity(name).ok_or_else(|| CoreError::UnknownEntity {
            name: name.to_string(),
        })
    }

    /// Iterate entities in name order
    pub fn entities(&self) -> impl Iterator<Item = &EntityDef> {
        self.entities.values()
    }

    fn validate(&self) -> CoreResult<()> {
        for entity in self.entities.values() {
            let mut seen = std::collections::BTreeSet::new();
            for column in &entity.columns {
                if !seen.insert(column.name.as_str()) {
                    return Err(invalid(format!(
                        "entity '{}' declares column '{}' twice",
                        entity.name, column.name
                    )));
                }
            }
            if entity.find_column(&entity.key).is_none() {
                return Err(invalid(format!(
                    "entity '{}' key '{}' is not one of its columns",
                    entity.name, entity.key
                )));
            }
            for relation in &entity.relations {
                if entity.find_column(&relation.name).is_some() {
                    return Err(invalid(format!(
                        "entity '{}' relation '{}' shadows a column",
                        entity.name, relation.name
                    )));
                }
                let target = self.entity(&relation.target).ok_or_else(|| {
                    invalid(format!(
                        "relation '{}.{}' targets unknown entity '{}'",
                        entity.name, relation.name, relation.target
                    ))
                })?;
                let fk_owner = match relation.kind {
                    RelationKind::Reference => entity,
                    RelationKind::Collection => target,
                };
                if fk_owner.find_column(&relation.foreign_key).is_none() {
                    return Err(invalid(format!(
                        "relation '{}.{}' foreign key '{}' is not a column of '{}'",
                        entity.name, relation.name, relation.foreign_key, fk_owner.name
                    )));
                }
                if relation.optional && relation.kind == RelationKind::Collection {
                    return Err(invalid(format!(
                        "collection relation '{}.{}' cannot be optional",
                        entity.name, relation.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn invalid(message: String) -> CoreError {
    CoreError::CatalogInvalid { message }
}

#[cfg(test)]
#[path = "catalog_test.rs"]
mod tests;
