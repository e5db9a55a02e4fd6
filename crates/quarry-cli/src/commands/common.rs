//! Shared loading for CLI commands: config, catalog, provider and trees

use anyhow::{Context, Result};
use quarry_compiler::{Lambda, MacroDef, MacroRegistry, QueryNode, QueryProvider, SecurityFilters};
use quarry_core::{Catalog, Config, CoreError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::cli::GlobalArgs;

/// One entry of a macros file
#[derive(Debug, Deserialize)]
struct MacroEntry {
    name: String,
    #[serde(flatten)]
    def: MacroDef,
}

/// Loaded project state every command works from
pub(crate) struct ProjectContext {
    pub config: Config,
    pub catalog: Catalog,
    pub provider: QueryProvider,
    verbose: bool,
}

impl ProjectContext {
    pub fn load(global: &GlobalArgs) -> Result<Self> {
        let project_dir = Path::new(&global.project_dir);
        let config = load_config(global, project_dir)?;
        let catalog_path = global
            .catalog
            .as_ref()
            .map(|p| Path::new(p).to_path_buf())
            .unwrap_or_else(|| project_dir.join("catalog.yml"));
        let catalog = Catalog::load(&catalog_path).context("Failed to load catalog")?;

        let mut provider = QueryProvider::new(catalog.clone(), config.clone());
        if let Some(path) = &global.macros {
            provider = provider.with_macros(load_macros(Path::new(path))?);
        }
        if let Some(path) = &global.security {
            provider = provider.with_security(load_security(Path::new(path))?);
        }

        let ctx = Self {
            config,
            catalog,
            provider,
            verbose: global.verbose,
        };
        ctx.verbose(&format!(
            "Loaded {} entities, dialect {}",
            ctx.catalog.entities().count(),
            ctx.config.dialect
        ));
        Ok(ctx)
    }

    /// Print verbose output if enabled
    pub fn verbose(&self, msg: &str) {
        if self.verbose {
            eprintln!("[verbose] {}", msg);
        }
    }
}

/// Explicit config path, else quarry.yml in the project, else defaults
fn load_config(global: &GlobalArgs, project_dir: &Path) -> Result<Config> {
    if let Some(path) = &global.config {
        return Config::load(Path::new(path)).context("Failed to load configuration file");
    }
    match Config::load_from_dir(project_dir) {
        Ok(config) => Ok(config),
        Err(CoreError::ConfigNotFound { .. }) => Ok(Config::default()),
        Err(e) => Err(e).context("Failed to load project configuration"),
    }
}

/// Read an operator tree from a JSON file
pub(crate) fn read_tree(path: &str) -> Result<QueryNode> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read tree: {path}"))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid operator tree JSON: {path}"))
}

fn load_macros(path: &Path) -> Result<MacroRegistry> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read macros: {}", path.display()))?;
    let entries: Vec<MacroEntry> =
        serde_json::from_str(&content).context("Invalid macros JSON")?;
    let mut registry = MacroRegistry::new();
    for entry in entries {
        registry
            .register(entry.name, entry.def)
            .context("Failed to register macro")?;
    }
    Ok(registry)
}

fn load_security(path: &Path) -> Result<SecurityFilters> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read security filters: {}", path.display()))?;
    let filters: BTreeMap<String, Lambda> =
        serde_json::from_str(&content).context("Invalid security filter JSON")?;
    let mut security = SecurityFilters::new();
    for (entity, predicate) in filters {
        security
            .register(entity, predicate)
            .context("Failed to register security filter")?;
    }
    Ok(security)
}
