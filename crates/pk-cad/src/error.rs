//! Build and model errors

use pk_core::{CacheError, Cancelled};
use thiserror::Error;

use crate::kernel::KernelError;

/// Feature construction errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    /// Invalid input caught when the feature is declared, before hashing
    #[error("Invalid parameters: {0}")]
    Parameter(String),

    /// The geometry kernel failed during real construction
    #[error("Geometry build failed: {0}")]
    Geometry(#[from] KernelError),

    /// A cache entry disagrees with the requesting feature's kind
    #[error("Cache type mismatch: {0}")]
    TypeMismatch(#[from] CacheError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl BuildError {
    pub fn parameter(kind: &str, message: impl std::fmt::Display) -> Self {
        BuildError::Parameter(format!("{kind}: {message}"))
    }

    /// Type mismatches point at a defect in a hashing scheme and end the session
    pub fn is_fatal(&self) -> bool {
        matches!(self, BuildError::TypeMismatch(_))
    }

    /// Cancellation is an outcome, not a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BuildError::Cancelled(_))
    }
}

/// Result type for feature construction
pub type BuildResult<T> = Result<T, BuildError>;

/// Errors resolving a model request into feature nodes
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Symbol '{0}' is declared twice")]
    DuplicateSymbol(String),

    #[error("Symbol '{symbol}' refers to unknown symbol '{upstream}'")]
    UnknownSymbol { symbol: String, upstream: String },
}
