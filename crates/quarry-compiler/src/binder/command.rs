//! Data-modification commands: the rows they touch and the values they write

use super::shape::Shape;
use super::{attach_joins, entity_shape, scalar, Binder, Bound};
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    ColumnDef, CommandNode, DeleteCommand, InsertCommand, ScopeKind, SelectNode, SqlExpr,
    UpdateCommand,
};
use crate::query::{Lambda, QueryNode};
use log::debug;
use quarry_core::EntityDef;

impl<'a> Binder<'a> {
    /// `DELETE` of the entity rows `tree` yields
    pub fn bind_delete(&mut self, tree: &QueryNode) -> CompileResult<CommandNode> {
        debug!("Binding delete over {} query", tree.kind_name());
        let (def, rows) = self.affected_rows(tree, "delete")?;
        Ok(CommandNode::Delete(DeleteCommand {
            table: def.table.clone(),
            key: def.key.clone(),
            rows,
        }))
    }

    /// `UPDATE` of the entity rows `tree` yields; `assignments` maps the
    /// current row to an object of new column values
    pub fn bind_update(
        &mut self,
        tree: &QueryNode,
        assignments: &Lambda,
    ) -> CompileResult<CommandNode> {
        debug!("Binding update over {} query", tree.kind_name());
        let (def, rows) = self.affected_rows(tree, "update")?;
        let target = self.arena.alloc(ScopeKind::Table);
        let row = entity_shape(def, target, None);
        let (values, _) = self.in_frame(false, |b| b.bind_lambda(assignments, vec![row]))?;
        let assignments = columns_of(def, values, "update assignments")?;
        if assignments.is_empty() {
            return Err(CompileError::binding("update without assignments".to_string()));
        }
        if let Some((key, _)) = assignments.iter().find(|(n, _)| *n == def.key) {
            return Err(CompileError::binding(format!(
                "assignment to key column '{key}' of '{}'",
                def.name
            )));
        }
        Ok(CommandNode::Update(UpdateCommand {
            table: def.table.clone(),
            key: def.key.clone(),
            target,
            target_columns: def.column_names().into_iter().map(String::from).collect(),
            assignments,
            rows,
        }))
    }

    /// `INSERT` into `entity` of the objects `selector` builds, once per row
    /// of `source`, or once with no source
    pub fn bind_insert(
        &mut self,
        entity: &str,
        source: Option<&QueryNode>,
        selector: &Lambda,
    ) -> CompileResult<CommandNode> {
        debug!("Binding insert into {entity}");
        let def = self.entity(entity)?;
        let select = match source {
            Some(source) => {
                let input = self.bind_node(source)?;
                if !input.correlations.is_empty() {
                    return Err(CompileError::binding(
                        "insert from a nested collection".to_string(),
                    ));
                }
                let (layer, shape) = self.derive(input, false);
                let (values, joins) =
                    self.in_frame(true, |b| b.bind_lambda(selector, vec![shape]))?;
                let mut select = layer.select;
                if let Some(from) = select.from.take() {
                    select.from = Some(attach_joins(from, joins));
                }
                select.columns = insert_columns(def, values)?;
                select
            }
            None => {
                let (values, _) = self.in_frame(false, |b| b.bind_lambda(selector, Vec::new()))?;
                let mut select = SelectNode::without_source(self.arena.alloc(ScopeKind::Select));
                select.columns = insert_columns(def, values)?;
                select
            }
        };
        Ok(CommandNode::Insert(InsertCommand {
            table: def.table.clone(),
            columns: select.columns.iter().map(|c| c.name.clone()).collect(),
            source: select,
        }))
    }

    /// The entity a command targets and a select of the keys of its rows
    fn affected_rows(
        &mut self,
        tree: &QueryNode,
        command: &str,
    ) -> CompileResult<(&'a EntityDef, SelectNode)> {
        let bound = self.bind_node(tree)?;
        let Shape::Entity { entity, .. } = &bound.shape else {
            return Err(CompileError::binding(format!(
                "{command} over a query that does not yield entity rows"
            )));
        };
        let def = self.entity(entity)?;
        let key = self.entity_key(&bound.shape)?;
        let input = Bound {
            shape: Shape::Scalar(key),
            ..bound
        };
        let (layer, key) = self.derive(input, false);
        let mut rows = layer.select;
        rows.columns = vec![ColumnDef::new(def.key.clone(), scalar(key, "key")?)];
        Ok((def, rows))
    }
}

/// Fields of a constructed object naming columns of `def`
fn columns_of(def: &EntityDef, values: Shape, what: &str) -> CompileResult<Vec<(String, SqlExpr)>> {
    let Shape::Construct { fields, .. } = values else {
        return Err(CompileError::binding(format!(
            "{what} that are not an object of column values"
        )));
    };
    fields
        .into_iter()
        .map(|(name, value)| {
            if def.find_column(&name).is_none() {
                return Err(CompileError::binding(format!(
                    "unknown column '{name}' of '{}'",
                    def.name
                )));
            }
            Ok((name, scalar(value, "column value")?))
        })
        .collect()
}

fn insert_columns(def: &EntityDef, values: Shape) -> CompileResult<Vec<ColumnDef>> {
    let columns = columns_of(def, values, "inserted values")?;
    if columns.is_empty() {
        return Err(CompileError::binding("insert without columns".to_string()));
    }
    Ok(columns
        .into_iter()
        .map(|(name, expr)| ColumnDef::new(name, expr))
        .collect())
}
