//! Feature nodes
//!
//! A [`FeatureNode`] wraps one feature definition (its kind, parameters and
//! upstream nodes) and builds it lazily. Every accessor of derived data goes
//! through [`FeatureNode::ensure_built`], so a node nobody queries is never
//! built. Building computes the hash, which forces every upstream node to be
//! built first, and then asks the build cache for that hash.

pub mod kinds;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use glam::{DMat4, DVec3};
use parking_lot::Mutex;
use pk_core::{CancellationToken, FeatureHash, HashAccumulator, Origin};

use crate::engine::Session;
use crate::error::{BuildError, BuildResult};
use crate::kernel::{Aabb, GeometryKernel, Solid};

/// Shared handle to a feature node
pub type FeatureRef = Arc<FeatureNode>;

/// What a feature build produces
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureOutput {
    /// Resulting shape
    pub solid: Solid,
    /// Placement of the feature's local frame
    pub placement: DMat4,
    /// Named reference points other features can attach to
    pub ref_points: BTreeMap<String, DVec3>,
    /// Named reference directions
    pub ref_vectors: BTreeMap<String, DVec3>,
}

impl FeatureOutput {
    pub fn new(solid: Solid) -> Self {
        Self {
            solid,
            placement: DMat4::IDENTITY,
            ref_points: BTreeMap::new(),
            ref_vectors: BTreeMap::new(),
        }
    }

    pub fn with_placement(mut self, placement: DMat4) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_point(mut self, name: &str, point: DVec3) -> Self {
        self.ref_points.insert(name.to_string(), point);
        self
    }

    pub fn with_vector(mut self, name: &str, vector: DVec3) -> Self {
        self.ref_vectors.insert(name.to_string(), vector);
        self
    }

    /// Copy of this output moved by `matrix`
    pub fn transformed(&self, solid: Solid, matrix: &DMat4) -> Self {
        Self {
            solid,
            placement: *matrix * self.placement,
            ref_points: self
                .ref_points
                .iter()
                .map(|(name, p)| (name.clone(), matrix.transform_point3(*p)))
                .collect(),
            ref_vectors: self
                .ref_vectors
                .iter()
                .map(|(name, v)| (name.clone(), matrix.transform_vector3(*v)))
                .collect(),
        }
    }
}

/// Everything real construction may use
pub struct ConstructContext<'a> {
    kind: &'static str,
    kernel: &'a dyn GeometryKernel,
    upstream: &'a [Arc<FeatureOutput>],
    token: &'a CancellationToken,
}

impl<'a> ConstructContext<'a> {
    pub fn new(
        kind: &'static str,
        kernel: &'a dyn GeometryKernel,
        upstream: &'a [Arc<FeatureOutput>],
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            kind,
            kernel,
            upstream,
            token,
        }
    }

    pub fn kernel(&self) -> &dyn GeometryKernel {
        self.kernel
    }

    /// Built output of the `index`-th upstream feature
    pub fn upstream_output(&self, index: usize) -> BuildResult<&FeatureOutput> {
        self.upstream
            .get(index)
            .map(|output| output.as_ref())
            .ok_or_else(|| {
                BuildError::parameter(self.kind, format!("missing upstream feature #{index}"))
            })
    }

    /// Cancellation checkpoint for long constructions
    pub fn checkpoint(&self) -> BuildResult<()> {
        Ok(self.token.checkpoint()?)
    }
}

/// A feature definition: the part every feature kind implements
pub trait FeatureBuild: fmt::Debug + Send + Sync + 'static {
    /// Type tag; also the cache entry tag
    fn kind(&self) -> &'static str;

    /// Upstream features in declaration order
    fn upstream(&self) -> &[FeatureRef];

    /// Feed the parameters, in declaration order, into the hash
    fn hash_params(&self, acc: &mut HashAccumulator);

    /// Real construction. Must not call back into the cache for its own hash.
    fn construct(&self, ctx: &ConstructContext<'_>) -> BuildResult<FeatureOutput>;
}

/// Build state reported by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unbuilt,
    Building,
    Built(Origin),
}

enum Slot {
    Unbuilt,
    Building,
    Built {
        output: Arc<FeatureOutput>,
        origin: Origin,
    },
}

/// A lazily built feature
pub struct FeatureNode {
    def: Box<dyn FeatureBuild>,
    hash: OnceLock<FeatureHash>,
    slot: Mutex<Slot>,
}

impl fmt::Debug for FeatureNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureNode")
            .field("kind", &self.def.kind())
            .field("hash", &self.hash.get())
            .field("state", &self.state())
            .finish()
    }
}

impl FeatureNode {
    pub fn new(def: impl FeatureBuild) -> FeatureRef {
        Self::from_boxed(Box::new(def))
    }

    pub fn from_boxed(def: Box<dyn FeatureBuild>) -> FeatureRef {
        Arc::new(Self {
            def,
            hash: OnceLock::new(),
            slot: Mutex::new(Slot::Unbuilt),
        })
    }

    pub fn kind(&self) -> &'static str {
        self.def.kind()
    }

    pub fn definition(&self) -> &dyn FeatureBuild {
        self.def.as_ref()
    }

    pub fn upstream(&self) -> &[FeatureRef] {
        self.def.upstream()
    }

    pub fn state(&self) -> NodeState {
        match &*self.slot.lock() {
            Slot::Unbuilt => NodeState::Unbuilt,
            Slot::Building => NodeState::Building,
            Slot::Built { origin, .. } => NodeState::Built(*origin),
        }
    }

    pub fn is_built(&self) -> bool {
        matches!(self.state(), NodeState::Built(_))
    }

    /// How the node got its output, once built
    pub fn origin(&self) -> Option<Origin> {
        match self.state() {
            NodeState::Built(origin) => Some(origin),
            _ => None,
        }
    }

    /// The hash, if it has been computed already
    pub fn cached_hash(&self) -> Option<FeatureHash> {
        self.hash.get().copied()
    }

    /// Built output without triggering a build
    pub fn output(&self) -> Option<Arc<FeatureOutput>> {
        match &*self.slot.lock() {
            Slot::Built { output, .. } => Some(Arc::clone(output)),
            _ => None,
        }
    }

    /// Feature hash; builds every upstream feature first
    pub fn hash(&self, session: &Session) -> BuildResult<FeatureHash> {
        if let Some(hash) = self.hash.get() {
            return Ok(*hash);
        }

        let mut acc = HashAccumulator::new(self.def.kind());
        self.def.hash_params(&mut acc);
        for upstream in self.def.upstream() {
            upstream.ensure_built(session)?;
            acc.combine(&upstream.hash(session)?);
        }
        let hash = acc.finish();
        Ok(*self.hash.get_or_init(|| hash))
    }

    /// Build this node unless it is built already
    ///
    /// Either runs real construction or adopts the cached output for the
    /// same hash. A failed or cancelled build leaves the node unbuilt.
    pub fn ensure_built(&self, session: &Session) -> BuildResult<Arc<FeatureOutput>> {
        if let Some(output) = self.output() {
            return Ok(output);
        }
        session.checkpoint()?;

        let hash = self.hash(session)?;
        let upstream = self
            .def
            .upstream()
            .iter()
            .map(|node| node.ensure_built(session))
            .collect::<BuildResult<Vec<_>>>()?;

        {
            let mut slot = self.slot.lock();
            if let Slot::Built { output, .. } = &*slot {
                return Ok(Arc::clone(output));
            }
            *slot = Slot::Building;
        }

        let kind = self.def.kind();
        let ctx = ConstructContext::new(kind, session.kernel(), &upstream, session.token());
        let result = session.cache().get_or_build(hash, kind, || {
            ctx.checkpoint()?;
            session.require_kernel(kind)?;
            self.def.construct(&ctx)
        });

        let mut slot = self.slot.lock();
        match result {
            Ok(lookup) => {
                // First result wins if another session raced us on this node
                if let Slot::Built { output, .. } = &*slot {
                    return Ok(Arc::clone(output));
                }
                tracing::debug!("{} {} built ({:?})", kind, hash, lookup.origin);
                *slot = Slot::Built {
                    output: Arc::clone(&lookup.value),
                    origin: lookup.origin,
                };
                Ok(lookup.value)
            }
            Err(err) => {
                if matches!(*slot, Slot::Building) {
                    *slot = Slot::Unbuilt;
                }
                Err(err)
            }
        }
    }

    /// Resulting shape
    pub fn shape(&self, session: &Session) -> BuildResult<Solid> {
        Ok(self.ensure_built(session)?.solid.clone())
    }

    pub fn bounds(&self, session: &Session) -> BuildResult<Aabb> {
        let output = self.ensure_built(session)?;
        Ok(session.kernel().bounds(&output.solid)?)
    }

    pub fn placement(&self, session: &Session) -> BuildResult<DMat4> {
        Ok(self.ensure_built(session)?.placement)
    }

    pub fn ref_point(&self, session: &Session, name: &str) -> BuildResult<Option<DVec3>> {
        Ok(self.ensure_built(session)?.ref_points.get(name).copied())
    }

    pub fn ref_vector(&self, session: &Session, name: &str) -> BuildResult<Option<DVec3>> {
        Ok(self.ensure_built(session)?.ref_vectors.get(name).copied())
    }
}
