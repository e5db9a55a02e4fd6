//! Error types for quarry-compiler

use thiserror::Error;

/// Compilation error type
///
/// These use the `Q` prefix. Binding errors describe queries the compiler
/// cannot express; unresolved and ambiguous columns signal a defect in a
/// rewrite pass and carry enough IR context to find it.
#[derive(Error, Debug)]
pub enum CompileError {
    /// Q001: Operator or expression has no relational translation
    #[error("[Q001] Cannot translate {construct}")]
    Binding { construct: String },

    /// Q002: Column reference resolves to no visible definition
    #[error("[Q002] Unresolved column '{column}' of scope '{scope}' after {pass}: {context}")]
    UnresolvedColumn {
        scope: String,
        column: String,
        pass: String,
        context: String,
    },

    /// Q003: Column reference resolves to several definitions
    #[error("[Q003] Column '{column}' of scope '{scope}' is defined {count} times")]
    AmbiguousColumn {
        scope: String,
        column: String,
        count: usize,
    },

    /// Q004: Custom operator registration rejected
    #[error("[Q004] Invalid macro '{name}': {message}")]
    MacroRegistration { name: String, message: String },

    /// Q005: Row security predicate registration rejected
    #[error("[Q005] Invalid security filter for '{entity}': {message}")]
    SecurityFilter { entity: String, message: String },

    /// Q006: Optimized IR could not be lowered to command text
    #[error("[Q006] Internal translation error: {message}")]
    Translation { message: String },

    /// Q007: Core error propagation
    #[error("[Q007] Core error: {0}")]
    Core(#[from] quarry_core::CoreError),
}

impl CompileError {
    /// Shorthand for [`CompileError::Binding`]
    pub(crate) fn binding(construct: impl Into<String>) -> Self {
        CompileError::Binding {
            construct: construct.into(),
        }
    }
}

/// Result type alias for CompileError
pub type CompileResult<T> = Result<T, CompileError>;

/// An error raised by the data-access collaborator, passed through unchanged
#[derive(Error, Debug)]
#[error(transparent)]
pub struct DataError(Box<dyn std::error::Error + Send + Sync>);

impl DataError {
    /// Wrap a collaborator error
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(err))
    }

    /// Borrow the wrapped error as a concrete type
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    /// Unwrap the collaborator error
    pub fn into_inner(self) -> Box<dyn std::error::Error + Send + Sync> {
        self.0
    }
}

/// Errors surfaced while compiling and running a query
#[derive(Error, Debug)]
pub enum QueryError {
    /// Compilation failed
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The data source failed
    #[error(transparent)]
    Data(#[from] DataError),

    /// Q008: A row did not match the compiled result shape
    #[error("[Q008] Failed to materialize row: {message}")]
    Materialize { message: String },

    /// Q009: Materialized objects did not deserialize into the requested type
    #[error("[Q009] Failed to deserialize result: {0}")]
    Deserialize(#[from] serde_json::Error),
}
