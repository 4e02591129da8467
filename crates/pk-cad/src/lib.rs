//! Parametric feature engine
//!
//! This crate provides:
//! - A geometry kernel abstraction with an analytic reference kernel
//! - Lazily built feature nodes keyed by their content hash
//! - Rebuild sessions with cooperative cancellation
//! - A registry of feature kinds and the built-in primitives
//! - Models: ordered symbol tables with rebuild-up-to-cursor

pub mod engine;
pub mod error;
pub mod feature;
pub mod kernel;
pub mod model;
pub mod registry;

// Re-exports for convenience
pub use engine::{Engine, Session};
pub use error::{BuildError, BuildResult, ModelError};
pub use feature::{
    ConstructContext, FeatureBuild, FeatureNode, FeatureOutput, FeatureRef, NodeState,
};
pub use kernel::{
    Aabb, AnalyticKernel, BooleanType, GeometryKernel, KernelError, KernelResult, NullKernel,
    Solid,
};
pub use model::{
    Model, ModelRequest, RebuildEvent, RebuildOutcome, RebuildTarget, Symbol, SymbolRequest,
};
pub use registry::FeatureRegistry;
