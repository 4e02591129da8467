//! Parametric feature cache core
//!
//! This crate provides:
//! - Deterministic, order-sensitive feature hashing
//! - Parameter values that feed the hash
//! - A content-addressed build cache with at-most-once builds per hash
//! - Cooperative cancellation of rebuild sessions
//! - Configuration shared by the engine and its front-ends

pub mod cache;
pub mod cancel;
pub mod config;
pub mod constants;
pub mod error;
pub mod hash;
pub mod param;

// Re-exports for convenience
pub use cache::{BuildCache, CacheLookup, CacheStats, CacheSummary, EntrySummary, Origin};
pub use cancel::{CancellationRegistry, CancellationToken, SessionId};
pub use config::{CacheConfig, Config, SessionConfig};
pub use error::{CacheError, Cancelled, ConfigError};
pub use hash::{FeatureHash, HashAccumulator, HashInput};
pub use param::{FileStamp, ParamValue};
