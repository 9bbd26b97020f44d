//! Repository wiring: where each entity's rows come from.

use batchmap_core::error::SchemaErrorKind;
use batchmap_core::{Error, Result};
use batchmap_pool::ConnectionFactory;
use batchmap_query::QueryBackend;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A named data store: how to get a connection and how to fetch from it.
#[derive(Clone)]
pub struct Repository {
    pub factory: Arc<dyn ConnectionFactory>,
    pub backend: Arc<dyn QueryBackend>,
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository").finish_non_exhaustive()
    }
}

/// Repositories by name, shared across identity maps.
#[derive(Debug, Clone, Default)]
pub struct RepositoryRegistry {
    repositories: HashMap<String, Repository>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a repository, replacing any previous one with the same name.
    #[must_use]
    pub fn register(
        mut self,
        name: impl Into<String>,
        factory: Arc<dyn ConnectionFactory>,
        backend: Arc<dyn QueryBackend>,
    ) -> Self {
        self.repositories
            .insert(name.into(), Repository { factory, backend });
        self
    }

    /// Look up a repository.
    #[allow(clippy::result_large_err)]
    pub fn get(&self, name: &str) -> Result<&Repository> {
        self.repositories.get(name).ok_or_else(|| {
            Error::invalid_schema(
                SchemaErrorKind::UnknownRepository,
                format!("repository {name:?} is not registered"),
            )
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.repositories.contains_key(name)
    }
}
