//! Resolving associations from resident state.

use crate::identity_map::{IdentityMap, push_unique};
use crate::staging::array_field;
use batchmap_core::{AssociationKind, Key, Result};
use batchmap_query::{Record, RecordRef};

/// The records an association resolves to.
#[derive(Debug, Clone)]
pub enum Related {
    /// A to-one association; `None` when the local key is null or the
    /// target was proven absent.
    One(Option<RecordRef>),
    /// Any association that can yield several records.
    Many(Vec<RecordRef>),
}

impl Related {
    /// The related records as a list, whatever the association kind.
    pub fn into_vec(self) -> Vec<RecordRef> {
        match self {
            Related::One(record) => record.into_iter().collect(),
            Related::Many(records) => records,
        }
    }

    /// The single related record, if this is a to-one result.
    pub fn one(&self) -> Option<&RecordRef> {
        match self {
            Related::One(record) => record.as_ref(),
            Related::Many(_) => None,
        }
    }
}

impl IdentityMap {
    /// Resolve the association `name` of `record` against the records
    /// resident in this map. Nothing is fetched.
    ///
    /// Identity lookups follow [`get`](Self::get): an identity value that was
    /// never staged or loaded is an
    /// [`UnresolvedIdentity`](batchmap_core::Error::UnresolvedIdentity) error.
    #[allow(clippy::result_large_err)]
    pub fn related(&mut self, record: &Record, name: &str) -> Result<Related> {
        self.ensure_owner()?;
        let source = self.entity(record.entity_name())?;
        let association = source.association_named(name)?.clone();
        let target = self.entity(association.entity())?;

        match association.kind() {
            AssociationKind::ToOne => {
                let key = record.key(association.key())?;
                if !key.is_complete() {
                    return Ok(Related::One(None));
                }
                let found = self.all_where(target.name(), association.match_key().clone(), &[key])?;
                Ok(Related::One(found.into_iter().next()))
            }
            AssociationKind::ToMany => {
                let key = record.key(association.match_key())?;
                if !key.is_complete() {
                    return Ok(Related::Many(Vec::new()));
                }
                let found = self.all_where(target.name(), association.key().clone(), &[key])?;
                Ok(Related::Many(found))
            }
            AssociationKind::ToOneViaArray => {
                let match_key = association.match_key();
                let keys: Vec<Key> = array_field(record, &association)?
                    .iter()
                    .filter_map(|element| match_key.key_from_element(element))
                    .filter(Key::is_complete)
                    .collect();
                let mut found = Vec::new();
                for record in self.all_where(target.name(), match_key.clone(), &keys)? {
                    push_unique(&mut found, record);
                }
                Ok(Related::Many(found))
            }
            AssociationKind::ToManyViaArray => {
                let key = record.key(association.match_key())?;
                if !key.is_complete() {
                    return Ok(Related::Many(Vec::new()));
                }
                let mut found = Vec::new();
                for candidate in self.all(target.name())? {
                    if key.contained_in(&array_field(candidate, &association)?) {
                        found.push(RecordRef::clone(candidate));
                    }
                }
                Ok(Related::Many(found))
            }
        }
    }
}
