//! Data-modification command text

use super::writer::SqlWriter;
use super::Command;
use crate::error::CompileResult;
use crate::ir::CommandNode;
use quarry_core::Dialect;

/// Render a bound command. Assignments and values are parameterized the
/// same way query values are.
pub(crate) fn render(dialect: Dialect, command: &CommandNode) -> CompileResult<Command> {
    match command {
        CommandNode::Delete(delete) => {
            let mut writer = SqlWriter::new(dialect);
            let rows = writer.subquery(&delete.rows)?;
            let text = format!(
                "DELETE FROM {} WHERE {} IN ({rows})",
                writer.table(&delete.table),
                writer.ident(&delete.key)
            );
            Ok(finish(text, writer))
        }
        CommandNode::Update(update) => {
            let mut writer = SqlWriter::new(dialect).with_target(update.target, &update.table);
            let mut assignments = Vec::with_capacity(update.assignments.len());
            for (column, value) in &update.assignments {
                let value = writer.expr(value)?;
                assignments.push(format!("{} = {value}", writer.ident(column)));
            }
            let rows = writer.subquery(&update.rows)?;
            let text = format!(
                "UPDATE {} SET {} WHERE {} IN ({rows})",
                writer.table(&update.table),
                assignments.join(", "),
                writer.ident(&update.key)
            );
            Ok(finish(text, writer))
        }
        CommandNode::Insert(insert) => {
            let mut writer = SqlWriter::new(dialect);
            let columns: Vec<String> = insert.columns.iter().map(|c| writer.ident(c)).collect();
            let source = writer.select(&insert.source)?;
            let text = format!(
                "INSERT INTO {} ({}) {source}",
                writer.table(&insert.table),
                columns.join(", ")
            );
            Ok(finish(text, writer))
        }
    }
}

fn finish(text: String, writer: SqlWriter) -> Command {
    Command {
        text,
        parameters: writer.into_parameters(),
    }
}
