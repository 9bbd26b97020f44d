//! Secondary indexes over resident records.
//!
//! An index groups the records of one entity type by a non-identity field.
//! It is built on first lookup and kept current as records are added or
//! detached until the map is cleared.

use crate::identity_map::IdentityMap;
use batchmap_core::{Key, KeyField, Result};
use batchmap_query::{Record, RecordRef};
use std::collections::HashMap;
use std::sync::Arc;

type Buckets = HashMap<Key, Vec<RecordRef>>;

#[derive(Debug, Default)]
pub(crate) struct SecondaryIndexes {
    by_entity: HashMap<String, HashMap<KeyField, Buckets>>,
}

impl SecondaryIndexes {
    pub(crate) fn is_built(&self, entity: &str, field: &KeyField) -> bool {
        self.by_entity
            .get(entity)
            .is_some_and(|fields| fields.contains_key(field))
    }

    pub(crate) fn build(&mut self, entity: &str, field: &KeyField, rows: &[RecordRef]) {
        let mut buckets = Buckets::new();
        for record in rows {
            buckets
                .entry(index_key(record, field))
                .or_default()
                .push(Arc::clone(record));
        }
        tracing::trace!(
            target: "batchmap::index",
            entity,
            field = %field,
            buckets = buckets.len(),
            "built index"
        );
        self.by_entity
            .entry(entity.to_string())
            .or_default()
            .insert(field.clone(), buckets);
    }

    pub(crate) fn bucket(&self, entity: &str, field: &KeyField, key: &Key) -> &[RecordRef] {
        self.by_entity
            .get(entity)
            .and_then(|fields| fields.get(field))
            .and_then(|buckets| buckets.get(key))
            .map_or(&[], Vec::as_slice)
    }

    /// Add a record to every index built for its entity.
    pub(crate) fn insert(&mut self, record: &RecordRef) {
        let Some(fields) = self.by_entity.get_mut(record.entity_name()) else {
            return;
        };
        for (field, buckets) in fields {
            buckets
                .entry(index_key(record, field))
                .or_default()
                .push(Arc::clone(record));
        }
    }

    pub(crate) fn remove(&mut self, record: &Record) {
        let Some(fields) = self.by_entity.get_mut(record.entity_name()) else {
            return;
        };
        for (field, buckets) in fields {
            let key = index_key(record, field);
            if let Some(bucket) = buckets.get_mut(&key) {
                bucket.retain(|r| !std::ptr::eq(Arc::as_ptr(r), record));
                if bucket.is_empty() {
                    buckets.remove(&key);
                }
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.by_entity.clear();
    }
}

/// Serialized fields are indexed by their decoded value.
fn index_key(record: &Record, field: &KeyField) -> Key {
    record
        .key(field)
        .unwrap_or_else(|_| record.row().key(field))
}

impl IdentityMap {
    /// Resident records of `entity` whose `field` equals `key`.
    ///
    /// The index for `field` is built from the resident records on first use.
    #[allow(clippy::result_large_err)]
    pub fn index(&mut self, entity: &str, field: &KeyField, key: &Key) -> Result<Vec<RecordRef>> {
        self.ensure_owner()?;
        self.entity(entity)?;
        if !self.indexes.is_built(entity, field) {
            let rows = self.rows.get(entity).map_or(&[][..], Vec::as_slice);
            self.indexes.build(entity, field, rows);
        }
        Ok(self.indexes.bucket(entity, field, key).to_vec())
    }
}
