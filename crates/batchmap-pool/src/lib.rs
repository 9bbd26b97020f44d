//! Connection provider contract for batchmap.
//!
//! The identity map never pools or times out connections itself. It asks a
//! [`ConnectionFactory`] for a handle the first time a repository is used in
//! a unit of work, keeps it in a [`ConnectionManager`] so later checkouts in
//! the same unit of work are idempotent, and hands it back on release.
//!
//! Handles are type-erased: each backend downcasts the [`Connection`] to the
//! concrete client it expects.

use batchmap_core::error::{ConnectionError, ConnectionErrorKind};
use batchmap_core::{Error, Result};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A type-erased, cheaply clonable connection handle.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<dyn Any + Send + Sync>,
}

impl Connection {
    /// Wrap a concrete client.
    pub fn new<T: Any + Send + Sync>(client: T) -> Self {
        Self {
            inner: Arc::new(client),
        }
    }

    /// Wrap an already shared client.
    pub fn from_arc<T: Any + Send + Sync>(client: Arc<T>) -> Self {
        Self { inner: client }
    }

    /// Try to view the handle as a concrete client type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// View the handle as a concrete client type, failing if it is something else.
    #[allow(clippy::result_large_err)]
    pub fn client<T: Any>(&self) -> Result<&T> {
        self.downcast_ref::<T>().ok_or_else(|| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::WrongHandle,
                message: format!(
                    "connection handle is not a {}",
                    std::any::type_name::<T>()
                ),
                source: None,
            })
        })
    }

    /// Whether two handles refer to the same underlying client.
    pub fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Produces and takes back connection handles for one repository.
pub trait ConnectionFactory: Send + Sync {
    /// Hand out a live connection.
    #[allow(clippy::result_large_err)]
    fn checkout(&self) -> Result<Connection>;

    /// Take a connection back.
    #[allow(clippy::result_large_err)]
    fn release(&self, _connection: Connection) -> Result<()> {
        Ok(())
    }
}

/// Closures act as factories; releasing their connections is a no-op.
impl<F> ConnectionFactory for F
where
    F: Fn() -> Result<Connection> + Send + Sync,
{
    fn checkout(&self) -> Result<Connection> {
        self()
    }
}

/// A factory that always hands out the same handle.
#[derive(Debug, Clone)]
pub struct SimpleConnectionFactory {
    connection: Connection,
}

impl SimpleConnectionFactory {
    /// Create a factory around an existing handle.
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

impl ConnectionFactory for SimpleConnectionFactory {
    fn checkout(&self) -> Result<Connection> {
        Ok(self.connection.clone())
    }
}

/// Checkout statistics.
#[derive(Debug, Clone, Default)]
pub struct ManagerStats {
    /// Repositories with a connection currently checked out
    pub checked_out: usize,
    /// Total checkouts performed against factories
    pub total_checkouts: usize,
    /// Total releases performed against factories
    pub total_releases: usize,
}

struct Checkout {
    connection: Connection,
    factory: Arc<dyn ConnectionFactory>,
}

/// Connections checked out by one unit of work, keyed by repository name.
///
/// Dropping the manager releases every connection it still holds.
#[derive(Default)]
pub struct ConnectionManager {
    checkouts: HashMap<String, Checkout>,
    total_checkouts: usize,
    total_releases: usize,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.checkouts.keys().collect();
        names.sort();
        f.debug_struct("ConnectionManager")
            .field("checked_out", &names)
            .finish()
    }
}

impl ConnectionManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the connection for `repository`, checking one out of `factory` on first use.
    #[allow(clippy::result_large_err)]
    pub fn checkout(
        &mut self,
        repository: &str,
        factory: &Arc<dyn ConnectionFactory>,
    ) -> Result<Connection> {
        if let Some(existing) = self.checkouts.get(repository) {
            return Ok(existing.connection.clone());
        }

        let connection = factory.checkout()?;
        tracing::debug!(
            target: "batchmap::pool",
            repository = repository,
            "checked out connection"
        );
        self.total_checkouts += 1;
        self.checkouts.insert(
            repository.to_string(),
            Checkout {
                connection: connection.clone(),
                factory: Arc::clone(factory),
            },
        );
        Ok(connection)
    }

    /// Whether a connection for `repository` is currently held.
    pub fn is_checked_out(&self, repository: &str) -> bool {
        self.checkouts.contains_key(repository)
    }

    /// Release the connection for one repository.
    ///
    /// Returns `false` if nothing was checked out under that name.
    #[allow(clippy::result_large_err)]
    pub fn release(&mut self, repository: &str) -> Result<bool> {
        let Some(checkout) = self.checkouts.remove(repository) else {
            return Ok(false);
        };
        self.total_releases += 1;
        checkout.factory.release(checkout.connection)?;
        tracing::debug!(
            target: "batchmap::pool",
            repository = repository,
            "released connection"
        );
        Ok(true)
    }

    /// Release every held connection.
    ///
    /// All releases are attempted; the first failure is returned.
    #[allow(clippy::result_large_err)]
    pub fn release_all(&mut self) -> Result<()> {
        let mut names: Vec<String> = self.checkouts.keys().cloned().collect();
        names.sort();
        let mut first_error = None;
        for name in names {
            if let Err(e) = self.release(&name) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Get the current checkout statistics.
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            checked_out: self.checkouts.len(),
            total_checkouts: self.total_checkouts,
            total_releases: self.total_releases,
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Err(e) = self.release_all() {
            tracing::warn!(
                target: "batchmap::pool",
                error = %e,
                "failed to release connection on drop"
            );
        }
    }
}
