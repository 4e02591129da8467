//! Built-in feature kinds
//!
//! Each kind validates its parameters when it is declared, feeds them into
//! the hash in declaration order and constructs its output through the
//! geometry kernel.

use glam::{DMat4, DQuat, DVec3};
use pk_core::{FileStamp, HashAccumulator, ParamValue};

use super::{ConstructContext, FeatureBuild, FeatureOutput, FeatureRef};
use crate::error::{BuildError, BuildResult};
use crate::kernel::{BooleanType, KernelError};

/// Positional parameter reader with kind-specific error messages
pub struct Args<'a> {
    kind: &'static str,
    params: &'a [ParamValue],
}

impl<'a> Args<'a> {
    pub fn new(kind: &'static str, params: &'a [ParamValue]) -> Self {
        Self { kind, params }
    }

    pub fn error(&self, message: impl std::fmt::Display) -> BuildError {
        BuildError::parameter(self.kind, message)
    }

    /// Require between `min` and `max` parameters
    pub fn expect_count(&self, min: usize, max: usize) -> BuildResult<()> {
        let n = self.params.len();
        if n < min || n > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{min} to {max}")
            };
            return Err(self.error(format!("expected {expected} parameters, got {n}")));
        }
        Ok(())
    }

    fn get(&self, index: usize, name: &str) -> BuildResult<&'a ParamValue> {
        self.params
            .get(index)
            .ok_or_else(|| self.error(format!("missing parameter '{name}'")))
    }

    fn mismatch(&self, name: &str, expected: &str, found: &ParamValue) -> BuildError {
        self.error(format!(
            "parameter '{name}' must be a {expected}, got {}",
            found.kind_name()
        ))
    }

    pub fn vector(&self, index: usize, name: &str) -> BuildResult<DVec3> {
        let value = self.get(index, name)?;
        let v = value
            .as_vector()
            .ok_or_else(|| self.mismatch(name, "vector", value))?;
        if !v.is_finite() {
            return Err(self.error(format!("parameter '{name}' must be finite")));
        }
        Ok(v)
    }

    pub fn number(&self, index: usize, name: &str) -> BuildResult<f64> {
        let value = self.get(index, name)?;
        let n = value
            .as_number()
            .ok_or_else(|| self.mismatch(name, "number", value))?;
        if !n.is_finite() {
            return Err(self.error(format!("parameter '{name}' must be finite")));
        }
        Ok(n)
    }

    pub fn positive(&self, index: usize, name: &str) -> BuildResult<f64> {
        let n = self.number(index, name)?;
        if n <= 0.0 {
            return Err(self.error(format!("parameter '{name}' must be positive, got {n}")));
        }
        Ok(n)
    }

    pub fn choice(&self, index: usize, name: &str) -> BuildResult<&'a str> {
        let value = self.get(index, name)?;
        value
            .as_enum()
            .ok_or_else(|| self.mismatch(name, "choice", value))
    }

    pub fn file(&self, index: usize, name: &str) -> BuildResult<&'a FileStamp> {
        let value = self.get(index, name)?;
        value
            .as_file()
            .ok_or_else(|| self.mismatch(name, "file", value))
    }

    pub fn sequence(&self, index: usize, name: &str) -> BuildResult<&'a [ParamValue]> {
        let value = self.get(index, name)?;
        value
            .as_sequence()
            .ok_or_else(|| self.mismatch(name, "sequence", value))
    }
}

/// Require exactly `count` upstream features
pub fn expect_upstream(
    kind: &'static str,
    upstream: &[FeatureRef],
    count: usize,
) -> BuildResult<Vec<FeatureRef>> {
    if upstream.len() != count {
        return Err(BuildError::parameter(
            kind,
            format!("expected {count} upstream features, got {}", upstream.len()),
        ));
    }
    Ok(upstream.to_vec())
}

fn no_upstream(kind: &'static str, upstream: &[FeatureRef]) -> BuildResult<()> {
    expect_upstream(kind, upstream, 0).map(|_| ())
}

/// Axis-aligned box from a corner `p0` and an edge vector `L`
#[derive(Debug, Clone)]
pub struct BoxFeature {
    pub p0: DVec3,
    pub size: DVec3,
}

impl BoxFeature {
    pub const KIND: &'static str = "Box";

    pub fn new(p0: DVec3, size: DVec3) -> BuildResult<Self> {
        if size.x == 0.0 || size.y == 0.0 || size.z == 0.0 {
            return Err(BuildError::parameter(
                Self::KIND,
                format!("edge vector L = {size} must be nonzero along every axis"),
            ));
        }
        Ok(Self { p0, size })
    }

    pub fn from_params(params: &[ParamValue], upstream: &[FeatureRef]) -> BuildResult<Self> {
        let args = Args::new(Self::KIND, params);
        args.expect_count(2, 2)?;
        no_upstream(Self::KIND, upstream)?;
        Self::new(args.vector(0, "p0")?, args.vector(1, "L")?)
    }
}

impl FeatureBuild for BoxFeature {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn upstream(&self) -> &[FeatureRef] {
        &[]
    }

    fn hash_params(&self, acc: &mut HashAccumulator) {
        acc.combine(&self.p0).combine(&self.size);
    }

    fn construct(&self, ctx: &ConstructContext<'_>) -> BuildResult<FeatureOutput> {
        let solid = ctx.kernel().create_box(self.p0, self.size)?;
        let center = solid.bounds.center();
        Ok(FeatureOutput::new(solid)
            .with_placement(DMat4::from_translation(self.p0))
            .with_point("p0", self.p0)
            .with_point("p1", self.p0 + self.size)
            .with_point("center", center)
            .with_vector("L", self.size))
    }
}

#[derive(Debug, Clone)]
pub struct SphereFeature {
    pub center: DVec3,
    pub radius: f64,
}

impl SphereFeature {
    pub const KIND: &'static str = "Sphere";

    pub fn from_params(params: &[ParamValue], upstream: &[FeatureRef]) -> BuildResult<Self> {
        let args = Args::new(Self::KIND, params);
        args.expect_count(2, 2)?;
        no_upstream(Self::KIND, upstream)?;
        Ok(Self {
            center: args.vector(0, "center")?,
            radius: args.positive(1, "radius")?,
        })
    }
}

impl FeatureBuild for SphereFeature {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn upstream(&self) -> &[FeatureRef] {
        &[]
    }

    fn hash_params(&self, acc: &mut HashAccumulator) {
        acc.combine(&self.center).combine(&self.radius);
    }

    fn construct(&self, ctx: &ConstructContext<'_>) -> BuildResult<FeatureOutput> {
        let solid = ctx.kernel().create_sphere(self.center, self.radius)?;
        Ok(FeatureOutput::new(solid)
            .with_placement(DMat4::from_translation(self.center))
            .with_point("center", self.center))
    }
}

/// Cylinder between the centers of its caps
#[derive(Debug, Clone)]
pub struct CylinderFeature {
    pub p0: DVec3,
    pub p1: DVec3,
    pub radius: f64,
}

impl CylinderFeature {
    pub const KIND: &'static str = "Cylinder";

    pub fn from_params(params: &[ParamValue], upstream: &[FeatureRef]) -> BuildResult<Self> {
        let args = Args::new(Self::KIND, params);
        args.expect_count(3, 3)?;
        no_upstream(Self::KIND, upstream)?;
        let p0 = args.vector(0, "p0")?;
        let p1 = args.vector(1, "p1")?;
        if p0 == p1 {
            return Err(args.error("cap centers p0 and p1 coincide"));
        }
        Ok(Self {
            p0,
            p1,
            radius: args.positive(2, "radius")?,
        })
    }
}

impl FeatureBuild for CylinderFeature {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn upstream(&self) -> &[FeatureRef] {
        &[]
    }

    fn hash_params(&self, acc: &mut HashAccumulator) {
        acc.combine(&self.p0).combine(&self.p1).combine(&self.radius);
    }

    fn construct(&self, ctx: &ConstructContext<'_>) -> BuildResult<FeatureOutput> {
        let solid = ctx.kernel().create_cylinder(self.p0, self.p1, self.radius)?;
        Ok(FeatureOutput::new(solid)
            .with_placement(DMat4::from_translation(self.p0))
            .with_point("p0", self.p0)
            .with_point("p1", self.p1)
            .with_vector("axis", (self.p1 - self.p0).normalize()))
    }
}

/// Rigid transformation of one upstream feature
#[derive(Debug, Clone)]
pub struct TransformFeature {
    pub translation: DVec3,
    pub rotation: Option<(DVec3, f64)>,
    upstream: Vec<FeatureRef>,
}

impl TransformFeature {
    pub const KIND: &'static str = "Transform";

    pub fn from_params(params: &[ParamValue], upstream: &[FeatureRef]) -> BuildResult<Self> {
        let args = Args::new(Self::KIND, params);
        args.expect_count(1, 3)?;
        let upstream = expect_upstream(Self::KIND, upstream, 1)?;
        let translation = args.vector(0, "translation")?;
        let rotation = match params.len() {
            1 => None,
            3 => {
                let axis = args.vector(1, "axis")?;
                if axis.length_squared() == 0.0 {
                    return Err(args.error("rotation axis must be nonzero"));
                }
                Some((axis.normalize(), args.number(2, "angle")?))
            }
            _ => return Err(args.error("rotation needs both an axis and an angle")),
        };
        Ok(Self {
            translation,
            rotation,
            upstream,
        })
    }

    pub fn matrix(&self) -> DMat4 {
        let rotation = self
            .rotation
            .map_or(DQuat::IDENTITY, |(axis, angle)| {
                DQuat::from_axis_angle(axis, angle)
            });
        DMat4::from_rotation_translation(rotation, self.translation)
    }
}

impl FeatureBuild for TransformFeature {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn upstream(&self) -> &[FeatureRef] {
        &self.upstream
    }

    fn hash_params(&self, acc: &mut HashAccumulator) {
        acc.combine(&self.translation)
            .combine(&self.rotation.map(|(axis, _)| axis))
            .combine(&self.rotation.map(|(_, angle)| angle));
    }

    fn construct(&self, ctx: &ConstructContext<'_>) -> BuildResult<FeatureOutput> {
        let base = ctx.upstream_output(0)?;
        let matrix = self.matrix();
        let solid = ctx.kernel().transform(&base.solid, &matrix)?;
        Ok(base.transformed(solid, &matrix))
    }
}

/// Boolean combination of two upstream features
#[derive(Debug, Clone)]
pub struct BooleanFeature {
    pub op: BooleanType,
    upstream: Vec<FeatureRef>,
}

impl BooleanFeature {
    pub const KIND: &'static str = "Boolean";

    pub fn from_params(params: &[ParamValue], upstream: &[FeatureRef]) -> BuildResult<Self> {
        let args = Args::new(Self::KIND, params);
        args.expect_count(1, 1)?;
        let upstream = expect_upstream(Self::KIND, upstream, 2)?;
        let name = args.choice(0, "op")?;
        let op = BooleanType::from_name(name).ok_or_else(|| {
            args.error(format!(
                "unknown operation '{name}', expected Union, Cut or Intersect"
            ))
        })?;
        Ok(Self { op, upstream })
    }
}

impl FeatureBuild for BooleanFeature {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn upstream(&self) -> &[FeatureRef] {
        &self.upstream
    }

    fn hash_params(&self, acc: &mut HashAccumulator) {
        acc.combine(self.op.name());
    }

    fn construct(&self, ctx: &ConstructContext<'_>) -> BuildResult<FeatureOutput> {
        let a = ctx.upstream_output(0)?;
        let b = ctx.upstream_output(1)?;
        ctx.checkpoint()?;
        let solid = ctx.kernel().boolean(&a.solid, &b.solid, self.op)?;
        let mut output = a.clone();
        output.solid = solid;
        Ok(output)
    }
}

/// Mesh imported from a file; the file's modification time is part of the hash
#[derive(Debug, Clone)]
pub struct ImportFeature {
    pub file: FileStamp,
}

impl ImportFeature {
    pub const KIND: &'static str = "Import";

    pub fn from_params(params: &[ParamValue], upstream: &[FeatureRef]) -> BuildResult<Self> {
        let args = Args::new(Self::KIND, params);
        args.expect_count(1, 1)?;
        no_upstream(Self::KIND, upstream)?;
        Ok(Self {
            file: args.file(0, "file")?.clone(),
        })
    }
}

impl FeatureBuild for ImportFeature {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn upstream(&self) -> &[FeatureRef] {
        &[]
    }

    fn hash_params(&self, acc: &mut HashAccumulator) {
        acc.combine(&self.file);
    }

    fn construct(&self, ctx: &ConstructContext<'_>) -> BuildResult<FeatureOutput> {
        if self.file.modified().is_none() {
            return Err(KernelError::FileIo(format!(
                "{} does not exist",
                self.file.path().display()
            ))
            .into());
        }
        let solid = ctx.kernel().import_stl(self.file.path())?;
        let center = solid.bounds.center();
        Ok(FeatureOutput::new(solid).with_point("center", center))
    }
}

/// Places an upstream feature by a sequence of offset rules
///
/// The rules are not fed into the hash, so two placements of the same base
/// share one cache entry and the second one reuses the first one's result.
#[derive(Debug, Clone)]
pub struct PlaceFeature {
    pub rules: Vec<DVec3>,
    upstream: Vec<FeatureRef>,
}

impl PlaceFeature {
    pub const KIND: &'static str = "Place";

    pub fn from_params(params: &[ParamValue], upstream: &[FeatureRef]) -> BuildResult<Self> {
        let args = Args::new(Self::KIND, params);
        args.expect_count(1, 1)?;
        let upstream = expect_upstream(Self::KIND, upstream, 1)?;
        let rules = args
            .sequence(0, "rules")?
            .iter()
            .enumerate()
            .map(|(i, rule)| {
                rule.as_vector()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| args.error(format!("rule #{i} must be a finite offset vector")))
            })
            .collect::<BuildResult<Vec<_>>>()?;
        tracing::warn!(
            "Place: hashes of placement rules missing; placements of the same base share a cache entry"
        );
        Ok(Self { rules, upstream })
    }

    pub fn offset(&self) -> DVec3 {
        self.rules.iter().copied().sum()
    }
}

impl FeatureBuild for PlaceFeature {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn upstream(&self) -> &[FeatureRef] {
        &self.upstream
    }

    fn hash_params(&self, _acc: &mut HashAccumulator) {
        // TODO: feed `rules` once the resulting cache invalidation is approved
    }

    fn construct(&self, ctx: &ConstructContext<'_>) -> BuildResult<FeatureOutput> {
        let base = ctx.upstream_output(0)?;
        let matrix = DMat4::from_translation(self.offset());
        let solid = ctx.kernel().transform(&base.solid, &matrix)?;
        Ok(base.transformed(solid, &matrix))
    }
}
