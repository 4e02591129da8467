//! Models and rebuild orchestration
//!
//! A [`ModelRequest`] is the output of a script front-end: an ordered list
//! of named symbols, each a feature kind with parameters and references to
//! earlier symbols. A [`Model`] resolves it into feature nodes and rebuilds
//! the symbols one after another inside a session.

use std::collections::HashMap;
use std::path::Path;

use pk_core::{FeatureHash, Origin, ParamValue};
use serde::{Deserialize, Serialize};

use crate::engine::Session;
use crate::error::{BuildError, ModelError};
use crate::feature::FeatureRef;
use crate::kernel::Aabb;
use crate::registry::FeatureRegistry;

/// One named feature declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRequest {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub params: Vec<ParamValue>,
    /// Names of earlier symbols, in declaration order
    #[serde(default)]
    pub upstream: Vec<String>,
}

/// A model file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub symbols: Vec<SymbolRequest>,
}

impl ModelRequest {
    pub fn from_ron_str(text: &str) -> Result<Self, ModelError> {
        ron::from_str(text).map_err(|e| ModelError::Parse(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ModelError::Io(e.to_string()))?;
        Self::from_ron_str(&content)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let content = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ModelError::Serialize(e.to_string()))?;
        std::fs::write(path.as_ref(), content).map_err(|e| ModelError::Io(e.to_string()))?;
        Ok(())
    }
}

/// A resolved symbol
///
/// Symbols whose declaration was rejected keep the parameter error so the
/// rebuild can report it against the symbol's name.
#[derive(Debug)]
pub struct Symbol {
    pub name: String,
    pub kind: String,
    pub node: Result<FeatureRef, BuildError>,
}

/// Which symbols a rebuild covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebuildTarget {
    #[default]
    All,
    /// The first `n` symbols (rebuild up to the cursor)
    UpTo(usize),
}

/// Per-symbol notification
#[derive(Debug, Clone, PartialEq)]
pub enum RebuildEvent {
    SymbolBuilt {
        index: usize,
        name: String,
        hash: FeatureHash,
        origin: Origin,
        bounds: Aabb,
    },
    SymbolFailed {
        index: usize,
        name: String,
        error: BuildError,
    },
}

/// Terminal signal of a rebuild
#[derive(Debug, Clone, PartialEq)]
pub enum RebuildOutcome {
    /// Every targeted symbol was processed
    Completed { built: usize, failed: usize },
    /// A failure ended the rebuild before the remaining symbols were reached
    Stopped { built: usize, failed: usize },
    /// The session was cancelled after `completed` symbols
    Cancelled { completed: usize },
    /// A fatal error ended the session
    Aborted(BuildError),
}

impl RebuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RebuildOutcome::Completed { failed: 0, .. })
    }
}

#[derive(Debug, Default)]
pub struct Model {
    symbols: Vec<Symbol>,
    index: HashMap<String, usize>,
}

impl Model {
    /// Resolve a request into unbuilt feature nodes
    pub fn from_request(
        request: &ModelRequest,
        registry: &FeatureRegistry,
    ) -> Result<Self, ModelError> {
        let mut model = Model::default();

        for symbol in &request.symbols {
            if model.index.contains_key(&symbol.name) {
                return Err(ModelError::DuplicateSymbol(symbol.name.clone()));
            }

            let mut upstream = Vec::with_capacity(symbol.upstream.len());
            let mut rejected = None;
            for name in &symbol.upstream {
                let found = model
                    .get(name)
                    .ok_or_else(|| ModelError::UnknownSymbol {
                        symbol: symbol.name.clone(),
                        upstream: name.clone(),
                    })?;
                match &found.node {
                    Ok(node) => upstream.push(node.clone()),
                    Err(_) => {
                        rejected.get_or_insert_with(|| {
                            BuildError::Parameter(format!("upstream symbol '{name}' is invalid"))
                        });
                    }
                }
            }

            let node = match rejected {
                Some(err) => Err(err),
                None => registry.create(&symbol.kind, &symbol.params, &upstream),
            };
            if let Err(err) = &node {
                tracing::warn!("Symbol '{}' rejected: {}", symbol.name, err);
            }

            model.index.insert(symbol.name.clone(), model.symbols.len());
            model.symbols.push(Symbol {
                name: symbol.name.clone(),
                kind: symbol.kind.clone(),
                node,
            });
        }

        Ok(model)
    }

    /// Load and resolve a model file
    pub fn load(path: impl AsRef<Path>, registry: &FeatureRegistry) -> Result<Self, ModelError> {
        Self::from_request(&ModelRequest::load(path)?, registry)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.index.get(name).map(|&i| &self.symbols[i])
    }

    /// Feature node of a symbol that was declared successfully
    pub fn node(&self, name: &str) -> Option<&FeatureRef> {
        self.get(name).and_then(|s| s.node.as_ref().ok())
    }

    /// Build the targeted symbols in order
    ///
    /// Only the targeted symbols and what they depend on are built. One
    /// event is emitted per processed symbol.
    pub fn rebuild(
        &self,
        session: &Session,
        target: RebuildTarget,
        on_event: &mut dyn FnMut(RebuildEvent),
    ) -> RebuildOutcome {
        let count = match target {
            RebuildTarget::All => self.symbols.len(),
            RebuildTarget::UpTo(n) => n.min(self.symbols.len()),
        };
        tracing::info!(
            "Session {}: rebuilding {} of {} symbols",
            session.id(),
            count,
            self.symbols.len()
        );

        let mut built = 0;
        let mut failed = 0;
        for (index, symbol) in self.symbols[..count].iter().enumerate() {
            if session.checkpoint().is_err() {
                tracing::info!("Session {} cancelled after {} symbols", session.id(), index);
                return RebuildOutcome::Cancelled { completed: index };
            }

            let result = symbol.node.clone().and_then(|node| {
                let bounds = node.bounds(session)?;
                let hash = node.hash(session)?;
                Ok((node, hash, bounds))
            });

            match result {
                Ok((node, hash, bounds)) => {
                    built += 1;
                    let origin = node.origin().unwrap_or(Origin::Cached);
                    on_event(RebuildEvent::SymbolBuilt {
                        index,
                        name: symbol.name.clone(),
                        hash,
                        origin,
                        bounds,
                    });
                }
                Err(err) if err.is_cancelled() => {
                    tracing::info!(
                        "Session {} cancelled while building '{}'",
                        session.id(),
                        symbol.name
                    );
                    return RebuildOutcome::Cancelled { completed: index };
                }
                Err(err) if err.is_fatal() => {
                    tracing::error!(
                        "Session {} aborted at '{}': {}",
                        session.id(),
                        symbol.name,
                        err
                    );
                    return RebuildOutcome::Aborted(err);
                }
                Err(err) => {
                    failed += 1;
                    tracing::warn!("Symbol '{}' failed: {}", symbol.name, err);
                    on_event(RebuildEvent::SymbolFailed {
                        index,
                        name: symbol.name.clone(),
                        error: err,
                    });
                    if !session.config().continue_after_failure {
                        tracing::info!(
                            "Session {} stopped at '{}' after {} symbols",
                            session.id(),
                            symbol.name,
                            index + 1
                        );
                        return RebuildOutcome::Stopped { built, failed };
                    }
                }
            }
        }

        if session.config().prune_unused_after_rebuild && count == self.symbols.len() {
            session.prune_unused();
        }
        tracing::info!(
            "Session {} finished: {} built, {} failed",
            session.id(),
            built,
            failed
        );
        RebuildOutcome::Completed { built, failed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::feature::NodeState;
    use crate::kernel::AnalyticKernel;
    use glam::DVec3;
    use pk_core::{BuildCache, SessionConfig};
    use std::sync::Arc;

    const BRACKET: &str = r#"(
        symbols: [
            (name: "base", kind: "Box", params: [Vector((0.0, 0.0, 0.0)), Vector((4.0, 2.0, 1.0))]),
            (name: "hole", kind: "Cylinder", params: [Vector((1.0, 1.0, -1.0)), Vector((1.0, 1.0, 2.0)), Number(0.5)]),
            (name: "body", kind: "Boolean", params: [Enum("Cut")], upstream: ["base", "hole"]),
            (name: "moved", kind: "Transform", params: [Vector((0.0, 0.0, 5.0))], upstream: ["body"]),
        ],
    )"#;

    fn engine(config: SessionConfig) -> Engine {
        Engine::new(
            Arc::new(BuildCache::default()),
            Arc::new(AnalyticKernel::new()),
            config,
        )
    }

    fn request(symbols: Vec<SymbolRequest>) -> ModelRequest {
        ModelRequest { symbols }
    }

    fn symbol(name: &str, kind: &str, params: Vec<ParamValue>, upstream: &[&str]) -> SymbolRequest {
        SymbolRequest {
            name: name.into(),
            kind: kind.into(),
            params,
            upstream: upstream.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn unit_box(name: &str) -> SymbolRequest {
        symbol(
            name,
            "Box",
            vec![ParamValue::Vector(DVec3::ZERO), ParamValue::Vector(DVec3::ONE)],
            &[],
        )
    }

    fn collect(model: &Model, session: &Session, target: RebuildTarget) -> (RebuildOutcome, Vec<RebuildEvent>) {
        let mut events = Vec::new();
        let outcome = model.rebuild(session, target, &mut |event| events.push(event));
        (outcome, events)
    }

    #[test]
    fn test_parse_request() {
        let request = ModelRequest::from_ron_str(BRACKET).unwrap();
        assert_eq!(request.symbols.len(), 4);
        assert_eq!(request.symbols[2].upstream, vec!["base", "hole"]);
        assert!(request.symbols[0].upstream.is_empty());
        assert_eq!(
            request.symbols[3].params,
            vec![ParamValue::Vector(DVec3::new(0.0, 0.0, 5.0))]
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.ron");
        let request = ModelRequest::from_ron_str(BRACKET).unwrap();
        request.save(&path).unwrap();
        assert_eq!(ModelRequest::load(&path).unwrap(), request);

        let model = Model::load(&path, &FeatureRegistry::default()).unwrap();
        assert_eq!(model.len(), 4);
        assert!(model.node("moved").is_some());
    }

    #[test]
    fn test_structural_errors() {
        let registry = FeatureRegistry::default();

        let dup = request(vec![unit_box("a"), unit_box("a")]);
        assert!(matches!(
            Model::from_request(&dup, &registry),
            Err(ModelError::DuplicateSymbol(name)) if name == "a"
        ));

        let forward = request(vec![
            symbol("t", "Transform", vec![ParamValue::Vector(DVec3::X)], &["a"]),
            unit_box("a"),
        ]);
        assert!(matches!(
            Model::from_request(&forward, &registry),
            Err(ModelError::UnknownSymbol { .. })
        ));
    }

    #[test]
    fn test_rebuild_all() {
        let engine = engine(SessionConfig::default());
        let model = Model::from_request(
            &ModelRequest::from_ron_str(BRACKET).unwrap(),
            &FeatureRegistry::default(),
        )
        .unwrap();

        let session = engine.begin_session();
        let (outcome, events) = collect(&model, &session, RebuildTarget::All);
        assert_eq!(outcome, RebuildOutcome::Completed { built: 4, failed: 0 });
        assert!(outcome.is_success());
        assert_eq!(events.len(), 4);

        let RebuildEvent::SymbolBuilt { name, bounds, origin, .. } = &events[3] else {
            panic!("expected a built event, got {:?}", events[3]);
        };
        assert_eq!(name, "moved");
        assert_eq!(*origin, Origin::Built);
        assert_eq!(bounds.min.z, 5.0);
        assert_eq!(engine.cache().len(), 4);
    }

    #[test]
    fn test_rebuild_up_to_cursor_is_lazy() {
        let engine = engine(SessionConfig::default());
        let model = Model::from_request(
            &ModelRequest::from_ron_str(BRACKET).unwrap(),
            &FeatureRegistry::default(),
        )
        .unwrap();

        let session = engine.begin_session();
        let (outcome, events) = collect(&model, &session, RebuildTarget::UpTo(2));
        assert_eq!(outcome, RebuildOutcome::Completed { built: 2, failed: 0 });
        assert_eq!(events.len(), 2);
        assert_eq!(model.node("body").unwrap().state(), NodeState::Unbuilt);
        assert_eq!(model.node("moved").unwrap().state(), NodeState::Unbuilt);
        assert_eq!(engine.cache().len(), 2);

        // A cursor past the end covers everything
        let (outcome, _) = collect(&model, &session, RebuildTarget::UpTo(99));
        assert_eq!(outcome, RebuildOutcome::Completed { built: 4, failed: 0 });
    }

    #[test]
    fn test_failures_are_attributed_and_skipped() {
        let engine = engine(SessionConfig::default());
        let registry = FeatureRegistry::default();
        let model = Model::from_request(
            &request(vec![
                symbol("bad", "Sphere", vec![ParamValue::Vector(DVec3::ZERO), ParamValue::Number(-1.0)], &[]),
                symbol("child", "Transform", vec![ParamValue::Vector(DVec3::X)], &["bad"]),
                unit_box("ok"),
                symbol("far", "Box", vec![ParamValue::Vector(DVec3::splat(10.0)), ParamValue::Vector(DVec3::ONE)], &[]),
                symbol("empty", "Boolean", vec![ParamValue::Enum("Intersect".into())], &["ok", "far"]),
            ]),
            &registry,
        )
        .unwrap();

        let session = engine.begin_session();
        let (outcome, events) = collect(&model, &session, RebuildTarget::All);
        assert_eq!(outcome, RebuildOutcome::Completed { built: 2, failed: 3 });
        assert!(!outcome.is_success());

        let failed: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                RebuildEvent::SymbolFailed { name, error, .. } => Some((name.as_str(), error)),
                _ => None,
            })
            .collect();
        assert_eq!(failed.len(), 3);
        assert_eq!(failed[0].0, "bad");
        assert!(matches!(failed[0].1, BuildError::Parameter(_)));
        assert_eq!(failed[1].0, "child");
        assert_eq!(failed[2].0, "empty");
        assert!(matches!(failed[2].1, BuildError::Geometry(_)));
        // Nothing was cached for the failed boolean
        assert_eq!(engine.cache().len(), 2);
    }

    #[test]
    fn test_stop_after_failure() {
        let engine = engine(SessionConfig {
            continue_after_failure: false,
            ..SessionConfig::default()
        });
        let model = Model::from_request(
            &request(vec![
                symbol("bad", "Torus", vec![], &[]),
                unit_box("ok"),
            ]),
            &FeatureRegistry::default(),
        )
        .unwrap();

        let session = engine.begin_session();
        let (outcome, events) = collect(&model, &session, RebuildTarget::All);
        assert_eq!(outcome, RebuildOutcome::Stopped { built: 0, failed: 1 });
        assert!(!outcome.is_success());
        assert_eq!(events.len(), 1);
        assert_eq!(model.node("ok").unwrap().state(), NodeState::Unbuilt);
    }

    #[test]
    fn test_stopped_rebuild_does_not_prune() {
        let engine = engine(SessionConfig {
            continue_after_failure: false,
            prune_unused_after_rebuild: true,
            ..SessionConfig::default()
        });
        let registry = FeatureRegistry::default();

        let first = Model::from_request(&request(vec![unit_box("a")]), &registry).unwrap();
        let session = engine.begin_session();
        let (outcome, _) = collect(&first, &session, RebuildTarget::All);
        assert!(outcome.is_success());
        drop(session);
        drop(first);
        assert_eq!(engine.cache().len(), 1);

        let second = Model::from_request(
            &request(vec![symbol("bad", "Torus", vec![], &[]), unit_box("a")]),
            &registry,
        )
        .unwrap();
        let session = engine.begin_session();
        let (outcome, _) = collect(&second, &session, RebuildTarget::All);
        assert_eq!(outcome, RebuildOutcome::Stopped { built: 0, failed: 1 });
        assert_eq!(engine.cache().len(), 1);
    }

    #[test]
    fn test_cancelled_before_start() {
        let engine = engine(SessionConfig::default());
        let model = Model::from_request(
            &request(vec![unit_box("a")]),
            &FeatureRegistry::default(),
        )
        .unwrap();

        let session = engine.begin_session();
        engine.cancel(session.id());
        let (outcome, events) = collect(&model, &session, RebuildTarget::All);
        assert_eq!(outcome, RebuildOutcome::Cancelled { completed: 0 });
        assert!(events.is_empty());
        assert!(engine.cache().is_empty());
    }

    #[test]
    fn test_prune_unused_after_rebuild() {
        let engine = engine(SessionConfig {
            prune_unused_after_rebuild: true,
            ..SessionConfig::default()
        });
        let registry = FeatureRegistry::default();

        let first = Model::from_request(&request(vec![unit_box("a")]), &registry).unwrap();
        let session = engine.begin_session();
        collect(&first, &session, RebuildTarget::All);
        drop(session);
        drop(first);
        assert_eq!(engine.cache().len(), 1);

        let second = Model::from_request(
            &request(vec![symbol(
                "s",
                "Sphere",
                vec![ParamValue::Vector(DVec3::ZERO), ParamValue::Number(1.0)],
                &[],
            )]),
            &registry,
        )
        .unwrap();
        let session = engine.begin_session();
        collect(&second, &session, RebuildTarget::All);

        // The box from the first model was not used by this session
        assert_eq!(engine.cache().len(), 1);
        assert_eq!(engine.cache().summary().entries[0].tag, "Sphere");
    }
}
