//! Identity map configuration.

use batchmap_query::MULTI_GET_BATCH_SIZE;
use serde::{Deserialize, Serialize};

/// Configuration for [`IdentityMap`](crate::IdentityMap) behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityMapConfig {
    /// Key values sent to a backend per `multi_get` batch.
    pub multi_get_batch_size: usize,
    /// Whether keys requested by a nested `load` that come back empty are
    /// recorded as absent, like keys resolved by finalization. Never applies
    /// to a nested query that carries a filter.
    pub mark_missing_as_absent: bool,
    /// Whether `clear` logs a summary of query statistics.
    pub log_statistics_on_clear: bool,
}

impl Default for IdentityMapConfig {
    fn default() -> Self {
        Self {
            multi_get_batch_size: MULTI_GET_BATCH_SIZE,
            mark_missing_as_absent: true,
            log_statistics_on_clear: false,
        }
    }
}

impl IdentityMapConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `multi_get` batch size (builder pattern).
    #[must_use]
    pub fn multi_get_batch_size(mut self, value: usize) -> Self {
        self.multi_get_batch_size = value;
        self
    }

    /// Set the `mark_missing_as_absent` option (builder pattern).
    #[must_use]
    pub fn mark_missing_as_absent(mut self, value: bool) -> Self {
        self.mark_missing_as_absent = value;
        self
    }

    /// Set the `log_statistics_on_clear` option (builder pattern).
    #[must_use]
    pub fn log_statistics_on_clear(mut self, value: bool) -> Self {
        self.log_statistics_on_clear = value;
        self
    }
}
