//! Schema command implementation

use anyhow::Result;
use quarry_db::duckdb::create_table_sql;

use crate::cli::GlobalArgs;
use crate::commands::common::ProjectContext;

/// Execute the schema command
pub fn execute(global: &GlobalArgs) -> Result<()> {
    let ctx = ProjectContext::load(global)?;
    for entity in ctx.catalog.entities() {
        println!("{};", create_table_sql(entity));
    }
    Ok(())
}
