//! Geometry kernel trait definitions
//!
//! The engine only needs a small surface from a kernel: primitive creation,
//! booleans, rigid/affine transforms, mesh import and a bounding extent.

use std::path::Path;

use glam::{DMat4, DVec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::bounds::Aabb;

/// Error type for geometry kernel operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Boolean operation failed: {0}")]
    BooleanFailed(String),

    #[error("Kernel not available: {0}")]
    KernelNotAvailable(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("File I/O error: {0}")]
    FileIo(String),

    #[error("Import failed: {0}")]
    Import(String),
}

/// Result type for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

/// An opaque solid produced by a kernel
///
/// The engine only ever copies it around and asks for its extent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solid {
    /// Unique identifier
    pub id: Uuid,
    /// Axis-aligned extent
    pub bounds: Aabb,
    /// Enclosed volume (exact for primitives, estimated after booleans)
    pub volume: f64,
}

impl Solid {
    pub fn new(bounds: Aabb, volume: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            bounds,
            volume,
        }
    }
}

/// Boolean operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BooleanType {
    /// Union (add)
    Union,
    /// Subtraction (cut)
    Cut,
    /// Intersection (common)
    Intersect,
}

impl BooleanType {
    pub const ALL: &'static [BooleanType] =
        &[BooleanType::Union, BooleanType::Cut, BooleanType::Intersect];

    pub fn name(&self) -> &'static str {
        match self {
            BooleanType::Union => "Union",
            BooleanType::Cut => "Cut",
            BooleanType::Intersect => "Intersect",
        }
    }

    /// Parse an operation name as written in model files
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }
}

/// The geometry kernel trait
///
/// Implementations provide the actual geometry operations. Every call is
/// expected to be free of side effects on the feature cache.
pub trait GeometryKernel: Send + Sync {
    /// Get the name of this kernel
    fn name(&self) -> &str;

    /// Check if the kernel is available
    fn is_available(&self) -> bool;

    /// Create a box spanning from `corner` to `corner + size`
    fn create_box(&self, corner: DVec3, size: DVec3) -> KernelResult<Solid>;

    /// Create a sphere primitive
    fn create_sphere(&self, center: DVec3, radius: f64) -> KernelResult<Solid>;

    /// Create a cylinder between the centers of its two caps
    fn create_cylinder(&self, p0: DVec3, p1: DVec3, radius: f64) -> KernelResult<Solid>;

    /// Perform a boolean operation on two solids
    fn boolean(&self, a: &Solid, b: &Solid, op: BooleanType) -> KernelResult<Solid>;

    /// Apply an affine transformation
    fn transform(&self, solid: &Solid, matrix: &DMat4) -> KernelResult<Solid>;

    /// Import a triangle mesh from an STL file
    fn import_stl(&self, path: &Path) -> KernelResult<Solid>;

    /// Bounding extent of a solid
    fn bounds(&self, solid: &Solid) -> KernelResult<Aabb>;
}

/// A null kernel that always returns errors (used when no kernel is available)
#[derive(Debug, Default)]
pub struct NullKernel;

impl NullKernel {
    fn unavailable<T>() -> KernelResult<T> {
        Err(KernelError::KernelNotAvailable(
            "No geometry kernel available".into(),
        ))
    }
}

impl GeometryKernel for NullKernel {
    fn name(&self) -> &str {
        "null"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn create_box(&self, _corner: DVec3, _size: DVec3) -> KernelResult<Solid> {
        Self::unavailable()
    }

    fn create_sphere(&self, _center: DVec3, _radius: f64) -> KernelResult<Solid> {
        Self::unavailable()
    }

    fn create_cylinder(&self, _p0: DVec3, _p1: DVec3, _radius: f64) -> KernelResult<Solid> {
        Self::unavailable()
    }

    fn boolean(&self, _a: &Solid, _b: &Solid, _op: BooleanType) -> KernelResult<Solid> {
        Self::unavailable()
    }

    fn transform(&self, _solid: &Solid, _matrix: &DMat4) -> KernelResult<Solid> {
        Self::unavailable()
    }

    fn import_stl(&self, _path: &Path) -> KernelResult<Solid> {
        Self::unavailable()
    }

    fn bounds(&self, _solid: &Solid) -> KernelResult<Aabb> {
        Self::unavailable()
    }
}
