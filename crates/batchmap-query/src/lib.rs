//! Query protocol for batchmap.
//!
//! `batchmap-query` is the **fetch layer** between the identity map and a
//! data store. It provides:
//!
//! - `Query`, which accumulates selection, filter, limit and track/load
//!   directives for one entity and runs batched key lookups or full fetches
//! - `Filter`, a structured filter sum type with an explicit raw variant
//! - `QueryBackend`, the two fetch primitives a store must implement
//! - `Record`, the wrapper around fetched rows
//! - `Scope`, `Selector` and `QueryStats`
//!
//! Backends only see a `FetchPlan`; batching, statistics and scope merging
//! are handled here.

pub mod backend;
pub mod filter;
pub mod query;
pub mod record;
pub mod scope;
pub mod select;
pub mod selector;
pub mod stats;

pub use backend::{FetchPlan, QueryBackend};
pub use filter::{Filter, Operator, Where};
pub use query::{Configure, Directive, MULTI_GET_BATCH_SIZE, Query, QuerySpec};
pub use record::{MapId, Record, RecordRef};
pub use scope::{Scope, ScopeCondition};
pub use select::{SelectField, Selection};
pub use selector::Selector;
pub use stats::QueryStats;
