//! Run command implementation

use anyhow::{Context, Result};
use quarry_db::DuckDbSource;

use crate::cli::{GlobalArgs, RunArgs};
use crate::commands::common::{read_tree, ProjectContext};

/// Execute the run command
pub fn execute(args: &RunArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = ProjectContext::load(global)?;
    let tree = read_tree(&args.tree)?;
    let db = DuckDbSource::new(&args.database).context("Failed to connect to database")?;

    if args.create_tables {
        db.create_tables(&ctx.catalog)
            .context("Failed to create catalog tables")?;
    }

    let translation = ctx
        .provider
        .compile(&tree)
        .with_context(|| format!("Failed to compile {}", args.tree))?;
    ctx.verbose(&format!(
        "Running {} command(s) against {}",
        translation.commands().len(),
        args.database
    ));

    let values = translation.execute(&db).context("Query execution failed")?;
    ctx.verbose(&format!("Materialized {} values", values.len()));
    println!("{}", serde_json::to_string_pretty(&values)?);
    Ok(())
}
