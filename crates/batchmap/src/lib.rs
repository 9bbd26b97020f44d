//! Batchmap - a per-request identity map with batched association loading.
//!
//! Batchmap sits between application code and one or more data stores and
//! provides:
//!
//! - One in-memory record per identity for the lifetime of a unit of work
//! - Batched fetching of related records discovered while loading, instead
//!   of one fetch per record
//! - Named scopes (tenant or account restrictions) ANDed into every query
//! - Per-entity query statistics
//!
//! # Quick Start
//!
//! ```ignore
//! use batchmap::prelude::*;
//!
//! let schema = Arc::new(
//!     Schema::builder()
//!         .entity(
//!             EntitySchema::new("person")
//!                 .identity("id")
//!                 .association(Association::to_one("address", "address", "address_id")),
//!         )
//!         .entity(EntitySchema::new("address").identity("id"))
//!         .build()?,
//! );
//!
//! let mut map = IdentityMap::builder(schema)
//!     .repository("default", factory, backend)
//!     .build();
//!
//! // Stage every person's address while loading people...
//! let people = map.load("person", |q| {
//!     q.filter(Filter::eq("team", "red")).track(["address"]);
//! })?;
//!
//! // ...and fetch them all in one batch.
//! map.finalize()?;
//!
//! for person in &people {
//!     if let Related::One(Some(address)) = map.related(person, "address")? {
//!         println!("{}", address.get("city")?);
//!     }
//! }
//! ```
//!
//! # Crates
//!
//! - `batchmap-core`: values, keys, rows, errors and entity schemas
//! - `batchmap-query`: the query protocol and the `QueryBackend` seam
//! - `batchmap-pool`: connection provider contract
//! - `batchmap-session`: the identity map engine
//! - `batchmap-memory`: an in-memory store and backend

pub mod builder;

pub use builder::{IdentityMapBuilder, IdentityMapExt};

pub use batchmap_core::error::{
    AssociationError, ConnectionError, ConnectionErrorKind, ContextError, FrozenQueryError,
    QueryError, SchemaError, TypeError, UnresolvedIdentityError,
};
pub use batchmap_core::{
    Association, AssociationErrorKind, AssociationKind, Context, EntitySchema, Error, Key,
    KeyField, QueryErrorKind, Result, Row, Schema, SchemaBuilder, SchemaErrorKind, Value,
};
pub use batchmap_pool::{
    Connection, ConnectionFactory, ConnectionManager, ManagerStats, SimpleConnectionFactory,
};
pub use batchmap_query::{
    Configure, Directive, FetchPlan, Filter, MULTI_GET_BATCH_SIZE, MapId, Operator, Query,
    QueryBackend, QuerySpec, QueryStats, Record, RecordRef, Scope, ScopeCondition, SelectField,
    Selection, Selector, Where,
};
pub use batchmap_session::{
    IdentityMap, IdentityMapConfig, QueryStatistics, Related, Repository, RepositoryRegistry,
    StatTotals,
};

/// The in-memory store and backend.
pub mod memory {
    pub use batchmap_memory::{
        FetchLogEntry, MemoryBackend, MemoryConnectionFactory, MemoryRepository,
    };
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        Association,
        AssociationKind,
        Context,
        EntitySchema,
        Error,
        // Query building
        Filter,
        // Identity map
        IdentityMap,
        IdentityMapConfig,
        IdentityMapExt,
        Key,
        KeyField,
        Query,
        QueryBackend,
        Record,
        RecordRef,
        Related,
        RepositoryRegistry,
        Result,
        Row,
        // Schema
        Schema,
        Scope,
        Selector,
        Value,
    };
    pub use std::sync::Arc;
}
