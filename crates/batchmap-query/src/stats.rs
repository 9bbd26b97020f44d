//! Per-query fetch statistics.

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::time::Duration;

/// Counters recorded by a single query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStats {
    /// Calls to `multi_get` / `multi_get_raw`
    pub multi_get: u64,
    /// Calls to `execute`
    pub execute: u64,
    /// Rows returned across all calls
    pub records_loaded: u64,
    /// Backend round trips (one per batch for `multi_get`)
    pub datastore_interactions: u64,
    /// Wall time spent in backend round trips
    pub datastore_interaction_time: Duration,
}

impl QueryStats {
    /// Total fetch calls of either kind.
    pub fn fetches(&self) -> u64 {
        self.multi_get + self.execute
    }
}

impl AddAssign<&QueryStats> for QueryStats {
    fn add_assign(&mut self, other: &QueryStats) {
        self.multi_get += other.multi_get;
        self.execute += other.execute;
        self.records_loaded += other.records_loaded;
        self.datastore_interactions += other.datastore_interactions;
        self.datastore_interaction_time += other.datastore_interaction_time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_accumulate() {
        let mut total = QueryStats::default();
        let one = QueryStats {
            multi_get: 2,
            execute: 1,
            records_loaded: 10,
            datastore_interactions: 3,
            datastore_interaction_time: Duration::from_millis(5),
        };
        total += &one;
        total += &one;
        assert_eq!(total.fetches(), 6);
        assert_eq!(total.records_loaded, 20);
        assert_eq!(total.datastore_interaction_time, Duration::from_millis(10));
    }
}
