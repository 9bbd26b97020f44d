//! Query statistics aggregated over an identity map's retained queries.

use batchmap_query::{Query, QueryStats};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::AddAssign;

/// Summed statistics for a group of queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatTotals {
    /// Number of queries summed
    pub query_count: u64,
    #[serde(flatten)]
    pub stats: QueryStats,
}

impl AddAssign<&StatTotals> for StatTotals {
    fn add_assign(&mut self, other: &StatTotals) {
        self.query_count += other.query_count;
        self.stats += &other.stats;
    }
}

/// A read-only summary of the queries an identity map has run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryStatistics {
    by_entity: BTreeMap<String, StatTotals>,
}

impl QueryStatistics {
    /// Sum the statistics of `queries`, grouped by entity name.
    pub fn new<'a, I>(queries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [Query])>,
    {
        let mut by_entity: BTreeMap<String, StatTotals> = BTreeMap::new();
        for (entity, group) in queries {
            let totals = by_entity.entry(entity.to_string()).or_default();
            for query in group {
                totals.query_count += 1;
                totals.stats += query.stats();
            }
        }
        Self { by_entity }
    }

    /// Totals per entity.
    pub fn sum_totals_by_entity(&self) -> &BTreeMap<String, StatTotals> {
        &self.by_entity
    }

    /// Totals for one entity.
    pub fn entity(&self, name: &str) -> Option<&StatTotals> {
        self.by_entity.get(name)
    }

    /// Totals across every entity.
    pub fn sum_totals(&self) -> StatTotals {
        let mut totals = StatTotals::default();
        for entity_totals in self.by_entity.values() {
            totals += entity_totals;
        }
        totals
    }
}
