//! Configuration types and parsing for quarry.yml

use crate::error::{CoreError, CoreResult};
use crate::sql_utils::{quote_bracketed, quote_ident};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Compiler configuration from quarry.yml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Target backend conventions for quoting and parameters
    #[serde(default)]
    pub dialect: Dialect,

    /// Normalizer settings
    #[serde(default)]
    pub normalizer: NormalizerConfig,

    /// Optimizer settings
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

/// Normalizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalizerConfig {
    /// Maximum nesting of macro expansions before expansion stops
    #[serde(default = "default_max_expansion_depth")]
    pub max_expansion_depth: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_expansion_depth: default_max_expansion_depth(),
        }
    }
}

/// Optimizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizerConfig {
    /// Rewrite passes to skip, by name. Pass order never changes.
    #[serde(default)]
    pub disabled_passes: Vec<String>,

    /// Upper bound on unused-column removal rounds
    #[serde(default = "default_max_unused_column_iterations")]
    pub max_unused_column_iterations: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            disabled_passes: Vec::new(),
            max_unused_column_iterations: default_max_unused_column_iterations(),
        }
    }
}

impl OptimizerConfig {
    /// Whether the named pass has been switched off
    pub fn is_disabled(&self, pass: &str) -> bool {
        self.disabled_passes.iter().any(|p| p == pass)
    }
}

fn default_max_expansion_depth() -> usize {
    32
}

fn default_max_unused_column_iterations() -> usize {
    64
}

/// SQL dialect: identifier quoting and parameter placeholder conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// DuckDB (`"ident"`, `$1`)
    #[default]
    DuckDb,
    /// PostgreSQL (`"ident"`, `$1`)
    Postgres,
    /// SQLite (`"ident"`, `?`)
    Sqlite,
    /// SQL Server (`[ident]`, `@p0`)
    SqlServer,
}

impl Dialect {
    /// Quote an identifier for this dialect
    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            Dialect::SqlServer => quote_bracketed(ident),
            _ => quote_ident(ident),
        }
    }

    /// Placeholder text for the parameter at zero-based `index`
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::DuckDb | Dialect::Postgres => format!("${}", index + 1),
            Dialect::Sqlite => "?".to_string(),
            Dialect::SqlServer => format!("@p{index}"),
        }
    }

    /// Parameter name recorded alongside the value
    pub fn parameter_name(&self, index: usize) -> String {
        match self {
            Dialect::SqlServer => format!("@p{index}"),
            _ => format!("p{}", index + 1),
        }
    }

    /// Whether correlated joins are spelled `CROSS APPLY` rather than `LATERAL`
    pub fn uses_apply(&self) -> bool {
        matches!(self, Dialect::SqlServer)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::DuckDb => write!(f, "duckdb"),
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::SqlServer => write!(f, "sqlserver"),
        }
    }
}

impl Config {
    /// Load configuration from a file path
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a directory.
    /// Looks for quarry.yml or quarry.yaml
    pub fn load_from_dir(dir: &Path) -> CoreResult<Self> {
        let yml_path = dir.join("quarry.yml");
        let yaml_path = dir.join("quarry.yaml");

        if yml_path.exists() {
            Self::load(&yml_path)
        } else if yaml_path.exists() {
            Self::load(&yaml_path)
        } else {
            Err(CoreError::ConfigNotFound {
                path: yml_path.display().to_string(),
            })
        }
    }

    /// Validate the configuration
    fn validate(&self) -> CoreResult<()> {
        if self.normalizer.max_expansion_depth == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "normalizer.max_expansion_depth must be at least 1".to_string(),
            });
        }
        if self.optimizer.max_unused_column_iterations == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "optimizer.max_unused_column_iterations must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
