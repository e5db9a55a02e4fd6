//! Passes command implementation

use anyhow::Result;
use quarry_compiler::Optimizer;

use crate::cli::GlobalArgs;
use crate::commands::common::ProjectContext;

/// Execute the passes command
pub fn execute(global: &GlobalArgs) -> Result<()> {
    let ctx = ProjectContext::load(global)?;
    let optimizer = Optimizer::with_defaults();
    for (i, (name, description)) in optimizer.describe().into_iter().enumerate() {
        let state = if ctx.config.optimizer.is_disabled(name) {
            " (disabled)"
        } else {
            ""
        };
        println!("{}. {}{}: {}", i + 1, name, state, description);
    }
    Ok(())
}
