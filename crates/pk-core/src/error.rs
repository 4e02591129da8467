//! Error types for cache, cancellation and configuration

use thiserror::Error;

use crate::hash::FeatureHash;

/// Cache-related errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// An entry exists for the hash but holds a different kind of feature.
    ///
    /// This means two structurally different features produced the same
    /// hash. It is a defect in a hashing scheme, not a user error.
    #[error("Cache entry {hash} holds '{found}', expected '{expected}'")]
    TypeMismatch {
        hash: FeatureHash,
        expected: &'static str,
        found: &'static str,
    },
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Raised at a cancellation checkpoint of a cancelled rebuild session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Rebuild cancelled")]
pub struct Cancelled;

/// Configuration file errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),
}
