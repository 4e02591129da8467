//! Feature registry
//!
//! Maps feature kind names to factories. This is the single entry point a
//! script front-end uses to turn (kind, parameters, upstream) requests into
//! feature nodes. Parameters are validated here, before anything is hashed.

use std::collections::BTreeMap;

use pk_core::ParamValue;

use crate::error::{BuildError, BuildResult};
use crate::feature::kinds::{
    BooleanFeature, BoxFeature, CylinderFeature, ImportFeature, PlaceFeature, SphereFeature,
    TransformFeature,
};
use crate::feature::{FeatureBuild, FeatureNode, FeatureRef};

type Factory =
    Box<dyn Fn(&[ParamValue], &[FeatureRef]) -> BuildResult<Box<dyn FeatureBuild>> + Send + Sync>;

pub struct FeatureRegistry {
    factories: BTreeMap<String, Factory>,
}

impl Default for FeatureRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FeatureRegistry {
    /// Registry without any kinds
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with every built-in kind
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register_kind(BoxFeature::KIND, BoxFeature::from_params);
        registry.register_kind(SphereFeature::KIND, SphereFeature::from_params);
        registry.register_kind(CylinderFeature::KIND, CylinderFeature::from_params);
        registry.register_kind(TransformFeature::KIND, TransformFeature::from_params);
        registry.register_kind(BooleanFeature::KIND, BooleanFeature::from_params);
        registry.register_kind(ImportFeature::KIND, ImportFeature::from_params);
        registry.register_kind(PlaceFeature::KIND, PlaceFeature::from_params);
        registry
    }

    /// Register a factory returning a boxed definition
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&[ParamValue], &[FeatureRef]) -> BuildResult<Box<dyn FeatureBuild>>
            + Send
            + Sync
            + 'static,
    {
        if self
            .factories
            .insert(kind.to_string(), Box::new(factory))
            .is_some()
        {
            tracing::debug!("Feature kind '{}' re-registered", kind);
        }
    }

    /// Register a typed constructor
    pub fn register_kind<T, F>(&mut self, kind: &str, constructor: F)
    where
        T: FeatureBuild,
        F: Fn(&[ParamValue], &[FeatureRef]) -> BuildResult<T> + Send + Sync + 'static,
    {
        self.register(kind, move |params, upstream| {
            constructor(params, upstream).map(|def| Box::new(def) as Box<dyn FeatureBuild>)
        });
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kind names, sorted
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Validate the request and wrap it in an unbuilt node
    pub fn create(
        &self,
        kind: &str,
        params: &[ParamValue],
        upstream: &[FeatureRef],
    ) -> BuildResult<FeatureRef> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| BuildError::Parameter(format!("Unknown feature kind '{kind}'")))?;
        let def = factory(params, upstream)?;
        Ok(FeatureNode::from_boxed(def))
    }
}
