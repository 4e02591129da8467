//! Rebuild engine
//!
//! The [`Engine`] owns the process-wide build cache, the geometry kernel and
//! the cancellation registry. Each rebuild runs inside a [`Session`], which
//! carries the cancellation token into every build call.

use std::sync::Arc;

use pk_core::{
    BuildCache, CancellationRegistry, CancellationToken, Cancelled, Config, SessionConfig,
    SessionId,
};

use crate::error::BuildResult;
use crate::feature::{FeatureOutput, FeatureRef};
use crate::kernel::{GeometryKernel, KernelError};

/// Shared rebuild machinery; cheap to clone
#[derive(Clone)]
pub struct Engine {
    cache: Arc<BuildCache>,
    kernel: Arc<dyn GeometryKernel>,
    cancellations: Arc<CancellationRegistry>,
    config: SessionConfig,
}

impl Engine {
    pub fn new(
        cache: Arc<BuildCache>,
        kernel: Arc<dyn GeometryKernel>,
        config: SessionConfig,
    ) -> Self {
        if !kernel.is_available() {
            tracing::warn!(
                "Geometry kernel '{}' is not available, every build will fail",
                kernel.name()
            );
        }
        Self {
            cache,
            kernel,
            cancellations: Arc::new(CancellationRegistry::new()),
            config,
        }
    }

    /// Engine with a fresh cache built from the configuration
    pub fn from_config(config: &Config, kernel: Arc<dyn GeometryKernel>) -> Self {
        Self::new(
            Arc::new(BuildCache::new(config.cache.clone())),
            kernel,
            config.session.clone(),
        )
    }

    /// Start a rebuild session
    pub fn begin_session(&self) -> Session {
        let token = self.cancellations.begin_session();
        let started_at = self.cache.current_tick();
        tracing::info!("Rebuild session {} started", token.id());
        Session {
            token,
            cache: Arc::clone(&self.cache),
            kernel: Arc::clone(&self.kernel),
            cancellations: Arc::clone(&self.cancellations),
            config: self.config.clone(),
            started_at,
        }
    }

    /// Request cancellation of a running session
    pub fn cancel(&self, session: SessionId) -> bool {
        self.cancellations.cancel(session)
    }

    /// Request cancellation of every running session
    pub fn cancel_all(&self) -> usize {
        self.cancellations.cancel_all()
    }

    pub fn is_cancelled(&self, session: SessionId) -> bool {
        self.cancellations.is_cancelled(session)
    }

    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.cancellations.active_sessions()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &Arc<BuildCache> {
        &self.cache
    }

    pub fn kernel(&self) -> &Arc<dyn GeometryKernel> {
        &self.kernel
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

/// One rebuild pass
///
/// Dropping the session removes it from the cancellation registry.
pub struct Session {
    token: CancellationToken,
    cache: Arc<BuildCache>,
    kernel: Arc<dyn GeometryKernel>,
    cancellations: Arc<CancellationRegistry>,
    config: SessionConfig,
    started_at: u64,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.token.id()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    pub fn kernel(&self) -> &dyn GeometryKernel {
        self.kernel.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        self.token.checkpoint()
    }

    /// Cache tick at session start
    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    /// Fails when the kernel cannot construct geometry
    ///
    /// Checked before real construction so an unavailable kernel never
    /// reaches a feature's `construct`.
    pub fn require_kernel(&self, kind: &str) -> BuildResult<()> {
        if self.kernel.is_available() {
            Ok(())
        } else {
            Err(KernelError::KernelNotAvailable(format!(
                "'{}' kernel cannot build {}",
                self.kernel.name(),
                kind
            ))
            .into())
        }
    }

    /// Build a node (and, through its hash, everything upstream of it)
    pub fn ensure_built(&self, node: &FeatureRef) -> BuildResult<Arc<FeatureOutput>> {
        node.ensure_built(self)
    }

    /// Drop cache entries this session never used
    pub fn prune_unused(&self) -> usize {
        self.cache.retain_used_since(self.started_at + 1)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancellations.end_session(self.token.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;
    use crate::kernel::{AnalyticKernel, NullKernel};
    use crate::registry::FeatureRegistry;
    use glam::DVec3;
    use pk_core::ParamValue;

    fn engine() -> Engine {
        Engine::new(
            Arc::new(BuildCache::default()),
            Arc::new(AnalyticKernel::new()),
            SessionConfig::default(),
        )
    }

    #[test]
    fn test_session_registration() {
        let engine = engine();
        let session = engine.begin_session();
        let id = session.id();
        assert_eq!(engine.active_sessions(), vec![id]);

        assert!(engine.cancel(id));
        assert!(session.is_cancelled());
        assert!(session.checkpoint().is_err());

        drop(session);
        assert!(engine.active_sessions().is_empty());
        assert!(!engine.cancel(id));
    }

    #[test]
    fn test_sessions_share_cache() {
        let engine = engine();
        let a = engine.begin_session();
        let b = engine.begin_session();
        assert!(std::ptr::eq(a.cache(), b.cache()));
        assert!(!b.is_cancelled());
        assert_eq!(engine.cancel_all(), 2);
        assert!(a.is_cancelled() && b.is_cancelled());
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.cache.capacity = Some(4);
        config.session.prune_unused_after_rebuild = true;
        let engine = Engine::from_config(&config, Arc::new(AnalyticKernel::new()));
        assert!(engine.config().prune_unused_after_rebuild);
        assert_eq!(engine.cache().summary().capacity, Some(4));
        assert_eq!(engine.kernel().name(), "analytic");
    }

    #[test]
    fn test_unavailable_kernel_fails_builds() {
        let engine = Engine::new(
            Arc::new(BuildCache::default()),
            Arc::new(NullKernel),
            SessionConfig::default(),
        );
        let node = FeatureRegistry::with_builtins()
            .create(
                "Box",
                &[ParamValue::Vector(DVec3::ZERO), ParamValue::Vector(DVec3::ONE)],
                &[],
            )
            .unwrap();

        let session = engine.begin_session();
        let err = session.ensure_built(&node).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Geometry(KernelError::KernelNotAvailable(ref msg)) if msg.contains("Box")
        ));
        assert!(engine.cache().is_empty());
        assert_eq!(engine.cache().stats().failed_builds, 1);
    }
}
