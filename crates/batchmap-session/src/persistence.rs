//! Attaching and detaching records outside of queries.
//!
//! Detaching repairs the secondary indexes in place instead of dropping
//! them, so lookups after a [`reindex`](IdentityMap::reindex) see the
//! record under its new values.

use crate::identity_map::{IdentityMap, Slot};
use batchmap_core::error::UnresolvedIdentityError;
use batchmap_core::{Error, Result};
use batchmap_query::RecordRef;
use std::sync::Arc;

impl IdentityMap {
    /// Add a record built by the caller.
    ///
    /// Every identity must be complete. Returns the resident record, which is
    /// an existing one if the identity was already bound.
    #[allow(clippy::result_large_err)]
    pub fn attach(&mut self, record: RecordRef) -> Result<RecordRef> {
        self.ensure_owner()?;
        self.entity(record.entity_name())?;
        for (field, key) in record.identities()? {
            if !key.is_complete() {
                return Err(Error::UnresolvedIdentity(UnresolvedIdentityError {
                    entity: record.entity_name().to_string(),
                    field: field.to_string(),
                    key: key.to_string(),
                }));
            }
        }
        self.add_record(record)
    }

    /// Remove a record from this map.
    ///
    /// Its identity bindings are dropped (so a later lookup is unresolved
    /// again), it leaves the resident rows and every secondary index, and its
    /// owner is cleared. Returns `false` if the record was not resident.
    #[allow(clippy::result_large_err)]
    pub fn detach(&mut self, record: &RecordRef) -> Result<bool> {
        self.ensure_owner()?;
        let entity = record.entity_name();
        let Some(rows) = self.rows.get_mut(entity) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|r| !Arc::ptr_eq(r, record));
        if rows.len() == before {
            return Ok(false);
        }

        if let Some(bindings) = self.row_keys.get_mut(entity) {
            for slots in bindings.values_mut() {
                slots.retain(|_, slot| match slot {
                    Slot::Present(bound) => !Arc::ptr_eq(bound, record),
                    Slot::Absent => true,
                });
            }
        }
        self.indexes.remove(record);
        record.release(self.id());
        tracing::debug!(target: "batchmap::map", entity, "detached record");
        Ok(true)
    }

    /// Detach and re-add a record so its bindings and index entries reflect
    /// its current values.
    #[allow(clippy::result_large_err)]
    pub fn reindex(&mut self, record: RecordRef) -> Result<RecordRef> {
        self.detach(&record)?;
        self.attach(record)
    }
}
