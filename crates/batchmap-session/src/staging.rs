//! Staging of needed keys and addition of records.

use crate::identity_map::{IdentityMap, Slot};
use batchmap_core::error::{AssociationError, AssociationErrorKind, ContextError, TypeError};
use batchmap_core::{Association, AssociationKind, EntitySchema, Error, Key, KeyField, Result, Value};
use batchmap_query::{Record, RecordRef};
use std::collections::BTreeSet;
use std::sync::Arc;

impl IdentityMap {
    /// Record that `values` of `field` are needed for `entity`.
    ///
    /// Incomplete keys are ignored, as are identity values that are already
    /// resolved and non-identity values that were already fetched.
    #[allow(clippy::result_large_err)]
    pub fn stage<I, K>(&mut self, entity: &str, field: impl Into<KeyField>, values: I) -> Result<()>
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        self.ensure_owner()?;
        let schema = self.entity(entity)?;
        let staged = self.stage_keys(&schema, field.into(), values.into_iter().map(Into::into));
        tracing::trace!(target: "batchmap::stage", entity, staged, "staged");
        Ok(())
    }

    /// Stage keys, returning how many were newly staged.
    pub(crate) fn stage_keys<I>(&mut self, entity: &EntitySchema, field: KeyField, values: I) -> usize
    where
        I: IntoIterator<Item = Key>,
    {
        let arity = field.fields().len();
        let is_identity = entity.is_identity(&field);
        let fresh: Vec<Key> = {
            let bindings = self
                .row_keys
                .get(entity.name())
                .and_then(|bindings| bindings.get(&field));
            let resolved = self
                .staged
                .get(entity.name())
                .and_then(|staged| staged.resolved.get(&field));
            values
                .into_iter()
                .filter(|key| key.is_complete() && key.arity() == arity)
                .filter(|key| {
                    if is_identity {
                        bindings.is_none_or(|b| !b.contains_key(key))
                    } else {
                        resolved.is_none_or(|r| !r.contains(key))
                    }
                })
                .collect()
        };

        let set = self
            .staged
            .entry(entity.name().to_string())
            .or_default()
            .keys
            .entry(field)
            .or_default();
        fresh.into_iter().filter(|key| set.insert(key.clone())).count()
    }

    /// Values of `field` currently staged for `entity`, in key order.
    #[allow(clippy::result_large_err)]
    pub fn get_staged(&self, entity: &str, field: impl Into<KeyField>) -> Result<Vec<Key>> {
        self.ensure_owner()?;
        self.entity(entity)?;
        Ok(self.staged_values(entity, &field.into()))
    }

    pub(crate) fn staged_values(&self, entity: &str, field: &KeyField) -> Vec<Key> {
        self.staged
            .get(entity)
            .and_then(|staged| staged.keys.get(field))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The key field on the target of `association` and the values the
    /// `records` need from it.
    #[allow(clippy::result_large_err)]
    pub(crate) fn stage_for(
        &self,
        association: &Association,
        records: &[RecordRef],
    ) -> Result<(KeyField, BTreeSet<Key>)> {
        let mut keys = BTreeSet::new();
        match association.kind() {
            AssociationKind::ToOne => {
                for record in records {
                    let key = record.key(association.key())?;
                    if key.is_complete() {
                        keys.insert(key);
                    }
                }
                Ok((association.match_key().clone(), keys))
            }
            AssociationKind::ToMany => {
                for record in records {
                    let key = record.key(association.match_key())?;
                    if key.is_complete() {
                        keys.insert(key);
                    }
                }
                Ok((association.key().clone(), keys))
            }
            AssociationKind::ToOneViaArray => {
                let target_key = association.match_key();
                for record in records {
                    for element in array_field(record, association)? {
                        if let Some(key) = target_key.key_from_element(&element) {
                            if key.is_complete() {
                                keys.insert(key);
                            }
                        }
                    }
                }
                Ok((target_key.clone(), keys))
            }
            AssociationKind::ToManyViaArray => Err(Error::Association(AssociationError {
                kind: AssociationErrorKind::Unimplemented,
                entity: records
                    .first()
                    .map(|r| r.entity_name().to_string())
                    .unwrap_or_default(),
                association: association.name().to_string(),
                message: "staging to-many-via-array associations is not supported".to_string(),
            })),
        }
    }

    /// Add a batch of records of one entity type.
    ///
    /// When the batch came from a query with track directives, the keys of
    /// every tracked association are staged and the query is queued on the
    /// target entity so its track configuration is replayed at finalization.
    /// Returns the resident record for each input, in order.
    #[allow(clippy::result_large_err)]
    pub fn add_records(&mut self, records: Vec<RecordRef>) -> Result<Vec<RecordRef>> {
        self.ensure_owner()?;
        let Some(first) = records.first() else {
            return Ok(Vec::new());
        };

        let mut to_stage: Vec<(Arc<EntitySchema>, KeyField, BTreeSet<Key>)> = Vec::new();
        if let Some(origin) = first.origin().cloned() {
            for association in origin.tracked_associations()? {
                let (key, values) = self.stage_for(association, &records)?;
                let target = self.entity(association.entity())?;
                self.staged
                    .entry(target.name().to_string())
                    .or_default()
                    .queue(&origin);
                to_stage.push((target, key, values));
            }
        }

        let mut resident = Vec::with_capacity(records.len());
        for record in records {
            resident.push(self.add_record(record)?);
        }

        for (target, key, values) in to_stage {
            let staged = self.stage_keys(&target, key, values);
            tracing::trace!(
                target: "batchmap::stage",
                entity = target.name(),
                staged,
                "staged tracked keys"
            );
        }
        Ok(resident)
    }

    /// Add one record.
    ///
    /// If any of its identities is already bound to a resident record, that
    /// record is returned and the new one is discarded. Otherwise every
    /// complete identity is bound to it, replacing absent markers, and its
    /// values are unstaged.
    #[allow(clippy::result_large_err)]
    pub fn add_record(&mut self, record: RecordRef) -> Result<RecordRef> {
        self.ensure_owner()?;
        let entity = self.entity(record.entity_name())?;
        let identities: Vec<(KeyField, Key)> = entity
            .identities()
            .iter()
            .map(|field| (field.clone(), record.row().key(field)))
            .collect();

        let existing = identities
            .iter()
            .find_map(|(field, key)| match self.binding(entity.name(), field, key) {
                Some(Slot::Present(existing)) => Some(Arc::clone(existing)),
                _ => None,
            });
        if let Some(existing) = existing {
            if !Arc::ptr_eq(&existing, &record) {
                tracing::warn!(
                    target: "batchmap::map",
                    entity = entity.name(),
                    record = ?record,
                    "discarding record whose identity is already resident"
                );
            }
            return Ok(existing);
        }

        let complete: Vec<(KeyField, Key)> = identities
            .into_iter()
            .filter(|(_, key)| key.is_complete())
            .collect();
        if complete.is_empty()
            && self
                .rows
                .get(entity.name())
                .is_some_and(|rows| rows.iter().any(|r| Arc::ptr_eq(r, &record)))
        {
            return Ok(record);
        }

        if !record.claim(self.id()) {
            return Err(Error::Context(ContextError {
                message: format!(
                    "{} record is owned by another identity map",
                    entity.name()
                ),
            }));
        }

        let mut staged = self.staged.get_mut(entity.name());
        let bindings = self.row_keys.entry(entity.name().to_string()).or_default();
        for (field, key) in complete {
            if let Some(staged) = staged.as_mut() {
                if let Some(set) = staged.keys.get_mut(&field) {
                    set.remove(&key);
                }
            }
            bindings
                .entry(field)
                .or_default()
                .insert(key, Slot::Present(Arc::clone(&record)));
        }

        self.rows
            .entry(entity.name().to_string())
            .or_default()
            .push(Arc::clone(&record));
        self.indexes.insert(&record);
        Ok(record)
    }
}

/// The elements of the array field an association reads keys from.
#[allow(clippy::result_large_err)]
pub(crate) fn array_field(record: &Record, association: &Association) -> Result<Vec<Value>> {
    let KeyField::Single(field) = association.key() else {
        return Err(Error::Association(AssociationError {
            kind: AssociationErrorKind::Unimplemented,
            entity: record.entity_name().to_string(),
            association: association.name().to_string(),
            message: "array associations must read a single array field".to_string(),
        }));
    };
    match record.get(field)? {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        other => Err(Error::Type(TypeError {
            expected: "ARRAY",
            actual: other.type_name().to_string(),
            column: Some(field.clone()),
        })),
    }
}
