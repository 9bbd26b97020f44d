//! Fluent construction of identity maps.
//!
//! # Example
//!
//! ```rust,ignore
//! use batchmap::prelude::*;
//!
//! let map = IdentityMap::builder(schema)
//!     .repository("default", factory, backend)
//!     .scope("account", "account_id", 7)
//!     .config(IdentityMapConfig::new().multi_get_batch_size(500))
//!     .build();
//! ```

use batchmap_core::{Schema, Value};
use batchmap_pool::ConnectionFactory;
use batchmap_query::{QueryBackend, Scope, Selector};
use batchmap_session::{IdentityMap, IdentityMapConfig, RepositoryRegistry};
use std::sync::Arc;

/// Builder for [`IdentityMap`] instances.
///
/// Repositories registered one by one are collected into a private
/// registry; pass a shared one with [`registry`](Self::registry) to reuse
/// it across maps.
#[derive(Debug)]
pub struct IdentityMapBuilder {
    schema: Arc<Schema>,
    registry: Arc<RepositoryRegistry>,
    config: IdentityMapConfig,
    scope: Scope,
    selectors: Vec<(String, Selector)>,
}

impl IdentityMapBuilder {
    /// Start a builder for maps over `schema`.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            registry: Arc::new(RepositoryRegistry::new()),
            config: IdentityMapConfig::default(),
            scope: Scope::new(),
            selectors: Vec::new(),
        }
    }

    /// Use a shared repository registry, replacing any registered so far.
    #[must_use]
    pub fn registry(mut self, registry: Arc<RepositoryRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Register a repository.
    #[must_use]
    pub fn repository(
        mut self,
        name: impl Into<String>,
        factory: Arc<dyn ConnectionFactory>,
        backend: Arc<dyn QueryBackend>,
    ) -> Self {
        let registry = Arc::unwrap_or_clone(self.registry);
        self.registry = Arc::new(registry.register(name, factory, backend));
        self
    }

    #[must_use]
    pub fn config(mut self, config: IdentityMapConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a named scope condition.
    #[must_use]
    pub fn scope(
        mut self,
        name: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.scope.insert(name, field, value);
        self
    }

    /// Start every query for `entity` from `selector`.
    #[must_use]
    pub fn selector(mut self, entity: impl Into<String>, selector: Selector) -> Self {
        self.selectors.push((entity.into(), selector));
        self
    }

    /// Build the map. It belongs to the calling thread.
    pub fn build(self) -> IdentityMap {
        self.selectors.into_iter().fold(
            IdentityMap::new(self.schema, self.registry)
                .with_config(self.config)
                .with_scope(self.scope),
            |map, (entity, selector)| map.with_selector(entity, selector),
        )
    }
}

/// Entry point for [`IdentityMapBuilder`].
pub trait IdentityMapExt {
    /// Start building an identity map over `schema`.
    fn builder(schema: Arc<Schema>) -> IdentityMapBuilder;
}

impl IdentityMapExt for IdentityMap {
    fn builder(schema: Arc<Schema>) -> IdentityMapBuilder {
        IdentityMapBuilder::new(schema)
    }
}
