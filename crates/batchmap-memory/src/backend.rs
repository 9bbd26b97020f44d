//! `QueryBackend` over a [`MemoryRepository`].

use crate::predicate::Predicate;
use crate::repository::MemoryRepository;
use batchmap_core::{Key, KeyField, Result, Row};
use batchmap_pool::Connection;
use batchmap_query::{FetchPlan, QueryBackend, Selection};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// One fetch as the backend saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchLogEntry {
    /// Entity fetched
    pub entity: String,
    /// Key field for key lookups, `None` for plain fetches
    pub key: Option<KeyField>,
    /// Requested key values, in request order
    pub values: Vec<Key>,
    /// Rendered fetch
    pub description: String,
    /// Rows returned
    pub rows: usize,
}

/// Evaluates fetch plans against in-memory tables and logs every fetch.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    log: Mutex<Vec<FetchLogEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch so far, oldest first.
    pub fn fetches(&self) -> Vec<FetchLogEntry> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Fetches of one entity, oldest first.
    pub fn fetches_for(&self, entity: &str) -> Vec<FetchLogEntry> {
        self.fetches()
            .into_iter()
            .filter(|entry| entry.entity == entity)
            .collect()
    }

    pub fn fetch_count(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    #[allow(clippy::result_large_err)]
    fn run(
        &self,
        connection: &Connection,
        plan: &FetchPlan<'_>,
        keys: Option<(&KeyField, &[Key])>,
    ) -> Result<Vec<Row>> {
        let store = connection.client::<MemoryRepository>()?;
        let predicate = plan
            .filter
            .as_ref()
            .map(|filter| Predicate::compile(filter, plan.entity.name()))
            .transpose()?;
        let wanted: Option<(&KeyField, HashSet<&Key>)> =
            keys.map(|(field, values)| (field, values.iter().collect()));
        let limit = match (keys, plan.limit) {
            (None, Some(limit)) => limit,
            _ => usize::MAX,
        };

        let rows: Vec<Row> = store.with_rows(plan.entity.table_name(), |rows| {
            rows.iter()
                .filter(|row| {
                    wanted
                        .as_ref()
                        .is_none_or(|(field, values)| values.contains(&row.key(field)))
                })
                .filter(|row| predicate.as_ref().is_none_or(|p| p.matches(row)))
                .take(limit)
                .map(|row| project(row, plan.selection))
                .collect()
        });

        let entry = FetchLogEntry {
            entity: plan.entity.name().to_string(),
            key: keys.map(|(field, _)| field.clone()),
            values: keys.map(|(_, values)| values.to_vec()).unwrap_or_default(),
            description: self.describe(plan),
            rows: rows.len(),
        };
        tracing::trace!(
            target: "batchmap::memory",
            fetch = %entry.description,
            rows = entry.rows,
            "memory fetch"
        );
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        Ok(rows)
    }
}

/// Keep the selected fields, renaming aliased ones. Fields the stored row
/// does not carry are left out.
fn project(row: &Row, selection: Option<&Selection>) -> Row {
    let Some(fields) = selection.and_then(Selection::explicit) else {
        return row.clone();
    };
    Row::from_pairs(fields.iter().filter_map(|field| {
        row.get_by_name(field.source())
            .map(|value| (field.name.clone(), value.clone()))
    }))
}

impl QueryBackend for MemoryBackend {
    fn fetch_keys(
        &self,
        connection: &Connection,
        plan: &FetchPlan<'_>,
        key: &KeyField,
        values: &[Key],
    ) -> Result<Vec<Row>> {
        self.run(connection, plan, Some((key, values)))
    }

    fn fetch(&self, connection: &Connection, plan: &FetchPlan<'_>) -> Result<Vec<Row>> {
        self.run(connection, plan, None)
    }

    fn describe(&self, plan: &FetchPlan<'_>) -> String {
        format!("memory: {plan}")
    }
}
