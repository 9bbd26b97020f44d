//! Table storage and the connection factory that hands it out.

use batchmap_core::{Result, Row};
use batchmap_pool::{Connection, ConnectionFactory};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Rows by table name.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row to `table`.
    pub fn insert(&self, table: &str, row: Row) {
        self.insert_many(table, [row]);
    }

    /// Append rows to `table`.
    pub fn insert_many<I>(&self, table: &str, rows: I)
    where
        I: IntoIterator<Item = Row>,
    {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.entry(table.to_string()).or_default().extend(rows);
    }

    /// A snapshot of the rows of `table`.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.with_rows(table, <[Row]>::to_vec)
    }

    pub fn len(&self, table: &str) -> usize {
        self.with_rows(table, <[Row]>::len)
    }

    /// Remove every row of `table`.
    pub fn truncate(&self, table: &str) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.remove(table);
    }

    pub(crate) fn with_rows<T>(&self, table: &str, f: impl FnOnce(&[Row]) -> T) -> T {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        f(tables.get(table).map_or(&[], Vec::as_slice))
    }
}

/// Hands out connections to one shared [`MemoryRepository`].
#[derive(Debug)]
pub struct MemoryConnectionFactory {
    repository: Arc<MemoryRepository>,
    checkouts: AtomicUsize,
    releases: AtomicUsize,
}

impl MemoryConnectionFactory {
    pub fn new(repository: Arc<MemoryRepository>) -> Self {
        Self {
            repository,
            checkouts: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn repository(&self) -> &Arc<MemoryRepository> {
        &self.repository
    }

    /// Number of connections handed out.
    pub fn checkouts(&self) -> usize {
        self.checkouts.load(Ordering::Relaxed)
    }

    /// Number of connections taken back.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::Relaxed)
    }
}

impl ConnectionFactory for MemoryConnectionFactory {
    fn checkout(&self) -> Result<Connection> {
        self.checkouts.fetch_add(1, Ordering::Relaxed);
        Ok(Connection::from_arc(Arc::clone(&self.repository)))
    }

    fn release(&self, _connection: Connection) -> Result<()> {
        self.releases.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
