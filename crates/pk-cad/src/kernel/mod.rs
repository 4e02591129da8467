//! Geometry kernel boundary
//!
//! Real construction of every feature goes through a [`GeometryKernel`].
//! The engine treats the resulting [`Solid`] as an opaque payload.

mod analytic;
mod bounds;
mod traits;

pub use analytic::AnalyticKernel;
pub use bounds::Aabb;
pub use traits::{BooleanType, GeometryKernel, KernelError, KernelResult, NullKernel, Solid};
