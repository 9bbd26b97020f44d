//! Identity map engine for batchmap.
//!
//! `batchmap-session` is the **unit-of-work layer**. An [`IdentityMap`] lives
//! for one request and guarantees a single in-memory record per identity,
//! while collecting the keys that related records will need and fetching
//! them in batches.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: one record instance per identity, plus absent markers
//!   for identities proven not to exist.
//! - **Staging and finalization**: `track` directives stage related keys as
//!   records arrive; [`IdentityMap::finalize`] resolves them to a fixed point.
//! - **Nested loads**: `load` directives fetch related records immediately.
//! - **Scopes**: named conditions ANDed into every query.
//!
//! # Example
//!
//! ```ignore
//! let mut map = IdentityMap::new(schema, repositories);
//!
//! let people = map.load("person", |q| {
//!     q.track(["address"]);
//! })?;
//! map.finalize()?;
//!
//! for person in &people {
//!     let address = map.related(person, "address")?;
//! }
//! ```

pub mod association;
pub mod config;
mod finalize;
#[cfg(test)]
mod fixtures;
pub mod identity_map;
mod index;
mod persistence;
pub mod repository;
mod staging;
pub mod statistics;

pub use association::Related;
pub use config::IdentityMapConfig;
pub use identity_map::IdentityMap;
pub use repository::{Repository, RepositoryRegistry};
pub use statistics::{QueryStatistics, StatTotals};
