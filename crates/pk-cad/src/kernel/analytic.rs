//! Analytic kernel
//!
//! A lightweight kernel that represents every solid by its bounding box and
//! an enclosed volume. Primitive volumes are exact. Boolean volumes are
//! estimated from the overlap of the operand boxes.

use std::f64::consts::PI;
use std::io::BufReader;
use std::path::Path;

use glam::{DMat4, DVec3};

use super::bounds::Aabb;
use super::traits::{BooleanType, GeometryKernel, KernelError, KernelResult, Solid};

#[derive(Debug, Default)]
pub struct AnalyticKernel;

impl AnalyticKernel {
    pub fn new() -> Self {
        Self
    }

    fn require_finite(what: &str, values: &[f64]) -> KernelResult<()> {
        if values.iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err(KernelError::InvalidInput(format!("{what} must be finite")))
        }
    }

    // Operand overlap used to estimate boolean volumes
    fn overlap_volume(a: &Solid, b: &Solid) -> f64 {
        let boxed = a
            .bounds
            .intersection(&b.bounds)
            .map_or(0.0, |overlap| overlap.volume());
        boxed.min(a.volume).min(b.volume)
    }
}

impl GeometryKernel for AnalyticKernel {
    fn name(&self) -> &str {
        "analytic"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn create_box(&self, corner: DVec3, size: DVec3) -> KernelResult<Solid> {
        Self::require_finite(
            "Box corner and size",
            &[corner.to_array(), size.to_array()].concat(),
        )?;
        let bounds = Aabb::from_points([corner, corner + size]);
        let volume = bounds.volume();
        if volume <= 0.0 {
            return Err(KernelError::InvalidInput(format!(
                "Box size {size} has no volume"
            )));
        }
        Ok(Solid::new(bounds, volume))
    }

    fn create_sphere(&self, center: DVec3, radius: f64) -> KernelResult<Solid> {
        Self::require_finite("Sphere center", &center.to_array())?;
        Self::require_finite("Sphere radius", &[radius])?;
        if radius <= 0.0 {
            return Err(KernelError::InvalidInput(format!(
                "Sphere radius must be positive, got {radius}"
            )));
        }
        let bounds = Aabb::from_center_half_extents(center, DVec3::splat(radius));
        Ok(Solid::new(bounds, 4.0 / 3.0 * PI * radius.powi(3)))
    }

    fn create_cylinder(&self, p0: DVec3, p1: DVec3, radius: f64) -> KernelResult<Solid> {
        Self::require_finite("Cylinder axis", &[p0.to_array(), p1.to_array()].concat())?;
        Self::require_finite("Cylinder radius", &[radius])?;
        let axis = p1 - p0;
        let height = axis.length();
        if height <= 0.0 || radius <= 0.0 {
            return Err(KernelError::InvalidInput(
                "Cylinder needs a positive height and radius".into(),
            ));
        }
        // Cap disc extent along each world axis
        let dir = axis / height;
        let across = |d: f64| (1.0 - d * d).max(0.0).sqrt() * radius;
        let extent = DVec3::new(across(dir.x), across(dir.y), across(dir.z));
        let bounds = Aabb::from_points([p0 - extent, p0 + extent, p1 - extent, p1 + extent]);
        Ok(Solid::new(bounds, PI * radius * radius * height))
    }

    fn boolean(&self, a: &Solid, b: &Solid, op: BooleanType) -> KernelResult<Solid> {
        let overlap = Self::overlap_volume(a, b);
        match op {
            BooleanType::Union => Ok(Solid::new(
                a.bounds.union(&b.bounds),
                a.volume + b.volume - overlap,
            )),
            BooleanType::Cut => {
                let volume = a.volume - overlap;
                if volume <= f64::EPSILON * a.volume.max(1.0) {
                    return Err(KernelError::BooleanFailed(
                        "Cut removes the whole solid".into(),
                    ));
                }
                Ok(Solid::new(a.bounds, volume))
            }
            BooleanType::Intersect => {
                let bounds = a
                    .bounds
                    .intersection(&b.bounds)
                    .filter(|_| overlap > 0.0)
                    .ok_or_else(|| {
                        KernelError::BooleanFailed("Solids do not intersect".into())
                    })?;
                Ok(Solid::new(bounds, overlap))
            }
        }
    }

    fn transform(&self, solid: &Solid, matrix: &DMat4) -> KernelResult<Solid> {
        Self::require_finite("Transformation matrix", &matrix.to_cols_array())?;
        let det = matrix.determinant();
        if det.abs() <= f64::EPSILON {
            return Err(KernelError::InvalidInput(
                "Transformation matrix is singular".into(),
            ));
        }
        Ok(Solid::new(
            solid.bounds.transform(matrix),
            solid.volume * det.abs(),
        ))
    }

    fn import_stl(&self, path: &Path) -> KernelResult<Solid> {
        let file = std::fs::File::open(path)
            .map_err(|e| KernelError::FileIo(format!("{}: {}", path.display(), e)))?;
        let mut reader = BufReader::new(file);
        let mesh = stl_io::read_stl(&mut reader)
            .map_err(|e| KernelError::Import(format!("{}: {}", path.display(), e)))?;

        if mesh.faces.is_empty() {
            return Err(KernelError::Import(format!(
                "{}: mesh has no triangles",
                path.display()
            )));
        }

        let point = |index: usize| {
            let v = mesh.vertices[index];
            DVec3::new(f64::from(v[0]), f64::from(v[1]), f64::from(v[2]))
        };

        // Sum of signed tetrahedra against the origin
        let mut signed = 0.0;
        for face in &mesh.faces {
            let [a, b, c] = face.vertices.map(point);
            signed += a.dot(b.cross(c)) / 6.0;
        }

        let bounds = Aabb::from_points((0..mesh.vertices.len()).map(point));
        tracing::debug!(
            "Imported {} ({} triangles, volume {:.4})",
            path.display(),
            mesh.faces.len(),
            signed.abs()
        );
        Ok(Solid::new(bounds, signed.abs()))
    }

    fn bounds(&self, solid: &Solid) -> KernelResult<Aabb> {
        Ok(solid.bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn write_tetrahedron(path: &Path) {
        let v = |x: f32, y: f32, z: f32| stl_io::Vertex::new([x, y, z]);
        let tri = |a, b, c| stl_io::Triangle {
            normal: stl_io::Normal::new([0.0, 0.0, 0.0]),
            vertices: [a, b, c],
        };
        let o = v(0.0, 0.0, 0.0);
        let x = v(1.0, 0.0, 0.0);
        let y = v(0.0, 1.0, 0.0);
        let z = v(0.0, 0.0, 1.0);
        let triangles = vec![tri(o, y, x), tri(o, x, z), tri(o, z, y), tri(x, y, z)];
        let mut file = std::fs::File::create(path).unwrap();
        stl_io::write_stl(&mut file, triangles.iter()).unwrap();
    }

    #[test]
    fn test_box() {
        let kernel = AnalyticKernel::new();
        let solid = kernel
            .create_box(DVec3::ZERO, DVec3::new(2.0, 3.0, 4.0))
            .unwrap();
        assert_relative_eq!(solid.volume, 24.0);
        assert_eq!(solid.bounds.max, DVec3::new(2.0, 3.0, 4.0));

        // Negative sizes span backwards from the corner
        let back = kernel.create_box(DVec3::ZERO, DVec3::splat(-1.0)).unwrap();
        assert_eq!(back.bounds.min, DVec3::splat(-1.0));

        assert!(kernel.create_box(DVec3::ZERO, DVec3::new(1.0, 0.0, 1.0)).is_err());
        assert!(kernel.create_box(DVec3::ZERO, DVec3::splat(f64::NAN)).is_err());
    }

    #[test]
    fn test_sphere_and_cylinder() {
        let kernel = AnalyticKernel::new();
        let sphere = kernel.create_sphere(DVec3::ONE, 2.0).unwrap();
        assert_relative_eq!(sphere.volume, 32.0 / 3.0 * PI, epsilon = 1e-9);
        assert_eq!(sphere.bounds.min, DVec3::splat(-1.0));
        assert!(kernel.create_sphere(DVec3::ZERO, 0.0).is_err());

        let cyl = kernel
            .create_cylinder(DVec3::ZERO, DVec3::new(0.0, 0.0, 3.0), 1.0)
            .unwrap();
        assert_relative_eq!(cyl.volume, 3.0 * PI, epsilon = 1e-9);
        assert_relative_eq!(cyl.bounds.min.x, -1.0, epsilon = 1e-12);
        assert_relative_eq!(cyl.bounds.max.z, 3.0, epsilon = 1e-12);
        assert_relative_eq!(cyl.bounds.size().z, 3.0, epsilon = 1e-12);
        assert!(kernel.create_cylinder(DVec3::ONE, DVec3::ONE, 1.0).is_err());
    }

    #[test]
    fn test_booleans() {
        let kernel = AnalyticKernel::new();
        let a = kernel.create_box(DVec3::ZERO, DVec3::splat(2.0)).unwrap();
        let b = kernel.create_box(DVec3::ONE, DVec3::splat(2.0)).unwrap();

        let union = kernel.boolean(&a, &b, BooleanType::Union).unwrap();
        assert_relative_eq!(union.volume, 15.0);
        assert_eq!(union.bounds.max, DVec3::splat(3.0));

        let cut = kernel.boolean(&a, &b, BooleanType::Cut).unwrap();
        assert_relative_eq!(cut.volume, 7.0);

        let common = kernel.boolean(&a, &b, BooleanType::Intersect).unwrap();
        assert_relative_eq!(common.volume, 1.0);

        let far = kernel.create_box(DVec3::splat(10.0), DVec3::ONE).unwrap();
        assert!(matches!(
            kernel.boolean(&a, &far, BooleanType::Intersect),
            Err(KernelError::BooleanFailed(_))
        ));
        assert!(matches!(
            kernel.boolean(&a, &a, BooleanType::Cut),
            Err(KernelError::BooleanFailed(_))
        ));
    }

    #[test]
    fn test_transform() {
        let kernel = AnalyticKernel::new();
        let a = kernel.create_box(DVec3::ZERO, DVec3::ONE).unwrap();
        let moved = kernel
            .transform(&a, &DMat4::from_translation(DVec3::new(5.0, 0.0, 0.0)))
            .unwrap();
        assert_eq!(moved.bounds.min, DVec3::new(5.0, 0.0, 0.0));
        assert_relative_eq!(moved.volume, 1.0);
        assert_ne!(moved.id, a.id);

        let scaled = kernel
            .transform(&a, &DMat4::from_scale(DVec3::splat(2.0)))
            .unwrap();
        assert_relative_eq!(scaled.volume, 8.0);

        assert!(kernel.transform(&a, &DMat4::ZERO).is_err());
    }

    #[test]
    fn test_import_stl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tetra.stl");
        write_tetrahedron(&path);

        let kernel = AnalyticKernel::new();
        let solid = kernel.import_stl(&path).unwrap();
        assert_relative_eq!(solid.volume, 1.0 / 6.0, epsilon = 1e-6);
        assert_eq!(solid.bounds.max, DVec3::ONE);

        assert!(matches!(
            kernel.import_stl(&dir.path().join("missing.stl")),
            Err(KernelError::FileIo(_))
        ));
    }
}
