//! Axis-aligned bounding box

use glam::{DMat4, DVec3};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner of the bounding box.
    pub min: DVec3,
    /// Maximum corner of the bounding box.
    pub max: DVec3,
}

impl Aabb {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Creates an empty (inverted) bounding box.
    pub fn empty() -> Self {
        Self {
            min: DVec3::splat(f64::INFINITY),
            max: DVec3::splat(f64::NEG_INFINITY),
        }
    }

    pub fn from_center_half_extents(center: DVec3, half_extents: DVec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Creates a bounding box that contains all given points.
    pub fn from_points(points: impl IntoIterator<Item = DVec3>) -> Self {
        points
            .into_iter()
            .fold(Self::empty(), |bbox, point| bbox.expand_to_include(point))
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> DVec3 {
        (self.max - self.min) * 0.5
    }

    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    /// Volume of the box; zero for empty boxes
    pub fn volume(&self) -> f64 {
        if self.is_valid() {
            let size = self.size();
            size.x * size.y * size.z
        } else {
            0.0
        }
    }

    pub fn contains_point(&self, point: DVec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Overlap of two boxes, `None` if they are disjoint
    pub fn intersection(&self, other: &Aabb) -> Option<Aabb> {
        let overlap = Aabb {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        };
        overlap.is_valid().then_some(overlap)
    }

    pub fn expand_to_include(&self, point: DVec3) -> Aabb {
        Aabb {
            min: self.min.min(point),
            max: self.max.max(point),
        }
    }

    /// Transforms the bounding box by the given matrix.
    ///
    /// Returns the axis-aligned box around the transformed corners, which
    /// may be larger than optimal.
    pub fn transform(&self, transform: &DMat4) -> Aabb {
        let corners = [
            DVec3::new(self.min.x, self.min.y, self.min.z),
            DVec3::new(self.max.x, self.min.y, self.min.z),
            DVec3::new(self.min.x, self.max.y, self.min.z),
            DVec3::new(self.max.x, self.max.y, self.min.z),
            DVec3::new(self.min.x, self.min.y, self.max.z),
            DVec3::new(self.max.x, self.min.y, self.max.z),
            DVec3::new(self.min.x, self.max.y, self.max.z),
            DVec3::new(self.max.x, self.max.y, self.max.z),
        ];
        Aabb::from_points(corners.map(|c| transform.transform_point3(c)))
    }

    /// Returns true if the bounding box is valid (non-empty).
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}
