//! The backend seam of the query protocol.
//!
//! A [`QueryBackend`] knows how to turn a [`FetchPlan`] into rows for one
//! kind of data store. Everything else (batching, statistics, scope merge,
//! wrapping rows into records) lives in [`Query`](crate::Query).

use crate::filter::Filter;
use crate::select::Selection;
use batchmap_core::{EntitySchema, Key, KeyField, Result, Row};
use batchmap_pool::Connection;
use std::fmt;

/// Everything a backend needs to issue one fetch.
#[derive(Debug, Clone)]
pub struct FetchPlan<'a> {
    /// Entity being fetched
    pub entity: &'a EntitySchema,
    /// Fields to return; `None` means the backend's default (every field)
    pub selection: Option<&'a Selection>,
    /// Effective filter, with scope conditions already merged in
    pub filter: Option<Filter>,
    /// Row limit for plain fetches
    pub limit: Option<usize>,
}

impl FetchPlan<'_> {
    /// Whether `field` will be present on returned rows.
    pub fn selects(&self, field: &str) -> bool {
        self.selection.is_none_or(|s| s.includes(field))
    }
}

impl fmt::Display for FetchPlan<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let selection = self
            .selection
            .map_or_else(|| "*".to_string(), ToString::to_string);
        write!(f, "SELECT {selection} FROM {}", self.entity.table_name())?;
        if let Some(filter) = &self.filter {
            write!(f, " WHERE {filter}")?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        Ok(())
    }
}

/// Fetch primitives a data store must provide.
pub trait QueryBackend: Send + Sync {
    /// Rows whose `key` matches one of `values`, restricted by the plan.
    ///
    /// `values` is already bounded by the query's batch size. The plan's
    /// limit does not apply to key fetches.
    #[allow(clippy::result_large_err)]
    fn fetch_keys(
        &self,
        connection: &Connection,
        plan: &FetchPlan<'_>,
        key: &KeyField,
        values: &[Key],
    ) -> Result<Vec<Row>>;

    /// Rows matching the plan.
    #[allow(clippy::result_large_err)]
    fn fetch(&self, connection: &Connection, plan: &FetchPlan<'_>) -> Result<Vec<Row>>;

    /// Human-readable rendering of a fetch, for logs.
    fn describe(&self, plan: &FetchPlan<'_>) -> String {
        plan.to_string()
    }
}
