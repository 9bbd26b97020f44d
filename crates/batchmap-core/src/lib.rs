//! Core types for batchmap.
//!
//! This crate provides the building blocks shared by the query protocol and
//! the identity-map engine:
//!
//! - `Value`, `Key` and `KeyField` for field values and (composite) keys
//! - `Row` for raw rows returned by a backend
//! - `EntitySchema`, `Association` and the `Schema` registry
//! - `Error` and `Result`

pub mod error;
pub mod key;
pub mod row;
pub mod schema;
pub mod value;

pub use error::{
    AssociationError, AssociationErrorKind, Error, QueryError, QueryErrorKind, Result,
    SchemaErrorKind,
};
pub use key::{Key, KeyField};
pub use row::{ColumnInfo, Row};
pub use schema::{Association, AssociationKind, Context, EntitySchema, Schema, SchemaBuilder};
pub use value::Value;
