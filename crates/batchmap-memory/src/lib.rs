//! In-memory repository and query backend for batchmap.
//!
//! `batchmap-memory` stores rows per table in a [`MemoryRepository`] and
//! serves them through [`MemoryBackend`], which evaluates structured filters,
//! projects selections and applies limits. Every fetch is logged so callers
//! can assert how many round trips a unit of work took and what each one
//! asked for.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(MemoryRepository::new());
//! store.insert("people", Row::from_pairs([("id", 1i64), ("address_id", 10i64)]));
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let registry = RepositoryRegistry::new().register(
//!     "default",
//!     Arc::new(MemoryConnectionFactory::new(Arc::clone(&store))),
//!     backend.clone(),
//! );
//! ```
//!
//! Raw filter fragments are rejected with
//! [`QueryErrorKind::UnsupportedFilter`](batchmap_core::QueryErrorKind).

pub mod backend;
mod predicate;
pub mod repository;

pub use backend::{FetchLogEntry, MemoryBackend};
pub use repository::{MemoryConnectionFactory, MemoryRepository};
