//! Delete command implementation

use anyhow::{Context, Result};
use quarry_db::DuckDbSource;

use crate::cli::{DeleteArgs, GlobalArgs};
use crate::commands::common::{read_tree, ProjectContext};

/// Execute the delete command
pub fn execute(args: &DeleteArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = ProjectContext::load(global)?;
    let tree = read_tree(&args.tree)?;
    let db = DuckDbSource::new(&args.database).context("Failed to connect to database")?;

    let command = ctx
        .provider
        .compile_delete(&tree)
        .with_context(|| format!("Failed to compile delete for {}", args.tree))?;
    ctx.verbose(&command.command.text);

    let affected = command.execute(&db).context("Delete failed")?;
    println!("Deleted {} rows", affected);
    Ok(())
}
