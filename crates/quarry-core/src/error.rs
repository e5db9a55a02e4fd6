//! Error types for quarry-core

use thiserror::Error;

/// Core error type for Quarry
#[derive(Error, Debug)]
pub enum CoreError {
    /// E001: Configuration file not found
    #[error("[E001] Config file not found: {path}")]
    ConfigNotFound { path: String },

    /// E002: Invalid configuration value
    #[error("[E002] Invalid config: {message}")]
    ConfigInvalid { message: String },

    /// E003: Catalog file not found
    #[error("[E003] Catalog file not found: {path}")]
    CatalogNotFound { path: String },

    /// E004: Catalog definitions are inconsistent
    #[error("[E004] Invalid catalog: {message}")]
    CatalogInvalid { message: String },

    /// E005: Unknown entity referenced by name
    #[error("[E005] Unknown entity '{name}'")]
    UnknownEntity { name: String },

    /// E006: IO error with file path context
    #[error("[E006] Failed to read '{path}': {source}")]
    IoWithPath {
        path: String,
        source: std::io::Error,
    },

    /// E007: YAML parse error
    #[error("[E007] YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// E008: JSON serialization/deserialization error
    #[error("[E008] JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;
