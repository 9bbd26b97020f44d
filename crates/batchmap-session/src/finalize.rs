//! Finalization: resolving staged keys with batched fetches.

use crate::identity_map::{IdentityMap, push_unique};
use batchmap_core::error::{AssociationError, AssociationErrorKind};
use batchmap_core::{AssociationKind, Error, Key, KeyField, Result};
use batchmap_query::{Query, RecordRef};
use std::collections::BTreeMap;
use std::sync::Arc;

impl IdentityMap {
    /// Resolve every staged key, across all entity types, to a fixed point.
    ///
    /// Resolving one entity's keys can stage keys for others, so passes are
    /// repeated until nothing is staged. A resolved value is never staged
    /// again, so cyclic associations converge.
    #[tracing::instrument(level = "debug", name = "finalize", target = "batchmap::finalize", skip_all)]
    #[allow(clippy::result_large_err)]
    pub fn finalize(&mut self) -> Result<()> {
        self.ensure_owner()?;
        let mut passes = 0usize;
        loop {
            let pending = self.pending_entities();
            if pending.is_empty() {
                break;
            }
            passes += 1;
            for entity in pending {
                self.finalize_entity(&entity, None)?;
            }
        }
        tracing::debug!(target: "batchmap::finalize", passes, "finalized");
        Ok(())
    }

    /// Finalize `entities` first, then anything their resolution staged.
    #[allow(clippy::result_large_err)]
    pub fn finalize_entities(&mut self, entities: &[&str]) -> Result<()> {
        self.ensure_owner()?;
        for entity in entities {
            self.finalize_entity(entity, None)?;
        }
        self.finalize()
    }

    fn pending_entities(&self) -> Vec<String> {
        self.staged
            .iter()
            .filter(|(_, staged)| !staged.is_empty())
            .map(|(entity, _)| entity.clone())
            .collect()
    }

    /// Resolve the keys staged for one entity type.
    ///
    /// Track configurations queued against the entity are replayed onto
    /// `query` (or a fresh query). Keys staged by non-identity fields are
    /// first converted to identity keys with an identity-only fetch. Each
    /// identity's staged values are then fetched in batches, and values that
    /// returned nothing are marked absent. Returns the records newly added.
    #[tracing::instrument(
        level = "debug",
        name = "finalize_entity",
        target = "batchmap::finalize",
        skip(self, query)
    )]
    #[allow(clippy::result_large_err)]
    pub fn finalize_entity(
        &mut self,
        entity: &str,
        query: Option<Query>,
    ) -> Result<Vec<RecordRef>> {
        self.ensure_owner()?;
        let schema = self.entity(entity)?;

        let queued = self
            .staged
            .get_mut(entity)
            .map(|staged| std::mem::take(&mut staged.queries))
            .unwrap_or_default();

        let mut added = Vec::new();
        if self.staged.get(entity).is_none_or(|staged| staged.is_empty()) {
            return Ok(added);
        }

        let mut query = match query {
            Some(query) => query,
            None => self.query(entity)?,
        };

        for origin in &queued {
            for directive in origin.tracks() {
                let Some(configure) = directive.configure() else {
                    continue;
                };
                let association = origin.entity().association_named(directive.association())?;
                if association.entity() != entity {
                    continue;
                }
                configure(&mut query);
                if query.filter_expr().is_some() && association.kind() != AssociationKind::ToMany {
                    let (kind, message) = match association.kind() {
                        AssociationKind::ToManyViaArray => (
                            AssociationErrorKind::Unimplemented,
                            "filtering tracked to-many-via-array associations is not supported"
                                .to_string(),
                        ),
                        other => (
                            AssociationErrorKind::FilteredToOne,
                            format!(
                                "finalizing {entity}: a filter on a tracked {other} association is not supported"
                            ),
                        ),
                    };
                    return Err(Error::Association(AssociationError {
                        kind,
                        entity: origin.entity().name().to_string(),
                        association: association.name().to_string(),
                        message,
                    }));
                }
            }
        }

        let connection = self.connection(schema.repository_name())?;

        let non_identities: Vec<KeyField> = self
            .staged
            .get(entity)
            .map(|staged| {
                staged
                    .keys
                    .iter()
                    .filter(|(field, values)| !values.is_empty() && !schema.is_identity(field))
                    .map(|(field, _)| field.clone())
                    .collect()
            })
            .unwrap_or_default();

        if !non_identities.is_empty() {
            let identity_fields = schema.identity_fields();
            // A filtered fetch only proves which rows match the filter.
            let exhaustive = query.filter_expr().is_none();
            let mut to_stage: BTreeMap<KeyField, Vec<Key>> = BTreeMap::new();
            for field in non_identities {
                let values: Vec<Key> = match self.staged.get_mut(entity) {
                    Some(staged) => {
                        let values = staged.keys.remove(&field).unwrap_or_default();
                        if exhaustive {
                            staged
                                .resolved
                                .entry(field.clone())
                                .or_default()
                                .extend(values.iter().cloned());
                        }
                        values.into_iter().collect()
                    }
                    None => Vec::new(),
                };
                let rows = query.multi_get_raw(
                    &connection,
                    &field,
                    &values,
                    Some(identity_fields.as_slice()),
                )?;
                tracing::debug!(
                    target: "batchmap::finalize",
                    field = %field,
                    values = values.len(),
                    rows = rows.len(),
                    "resolved non-identity keys"
                );
                for row in rows {
                    for identity in schema.identities() {
                        to_stage
                            .entry(identity.clone())
                            .or_default()
                            .push(row.key(identity));
                    }
                }
            }
            for (identity, keys) in to_stage {
                self.stage_keys(&schema, identity, keys);
            }
        }

        for identity in schema.identities() {
            let values = self.staged_values(entity, identity);
            if values.is_empty() {
                continue;
            }

            query.clear_filter();
            let fetched = query.multi_get(&connection, identity, &values, None)?;
            let resident = self.add_records(fetched.clone())?;
            for (record, resident) in fetched.iter().zip(resident) {
                // Only records bound by this call count as added.
                if Arc::ptr_eq(&resident, record) {
                    push_unique(&mut added, resident);
                }
            }

            let missing = self.staged_values(entity, identity);
            let absent = self.mark_absent(entity, identity, missing);
            tracing::debug!(
                target: "batchmap::finalize",
                identity = %identity,
                requested = values.len(),
                fetched = fetched.len(),
                absent,
                "resolved identity keys"
            );
        }

        if query.stats().fetches() > 0 {
            self.retain_query(query);
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use crate::IdentityMapConfig;
    use crate::fixtures::World;
    use batchmap_core::{AssociationErrorKind, Error, Key, Value};
    use batchmap_query::Filter;

    #[test]
    fn tracked_to_one_keys_are_fetched_in_one_batch() {
        let world = World::new();
        let mut map = world.map();
        map.load("person", |q| {
            q.track(["address"]);
        })
        .unwrap();
        assert_eq!(map.get_staged("address", "id").unwrap(), vec![Key::from(10i64)]);

        map.finalize().unwrap();
        assert_eq!(world.requested("address"), vec![vec![10]]);
        assert_eq!(map.all("address").unwrap().len(), 1);
        assert!(map.get_staged("address", "id").unwrap().is_empty());
    }

    #[test]
    fn duplicate_staging_collapses() {
        let world = World::new();
        let mut map = world.map();
        map.stage("address", "id", [11i64]).unwrap();
        map.stage("address", "id", [11i64, 11]).unwrap();
        assert_eq!(map.get_staged("address", "id").unwrap().len(), 1);

        map.finalize().unwrap();
        assert_eq!(world.requested("address"), vec![vec![11]]);
    }

    #[test]
    fn non_identity_keys_resolve_through_identities() {
        let world = World::new();
        let mut map = world.map();
        map.stage("person", "email", ["ada@x.io", "zed@x.io"]).unwrap();
        map.finalize().unwrap();

        let fetches = world.backend.fetches_for("person");
        assert_eq!(fetches.len(), 2);
        assert_eq!(fetches[0].key, Some("email".into()));
        assert!(fetches[0].description.contains("SELECT id FROM person"));
        assert_eq!(fetches[1].key, Some("id".into()));
        assert_eq!(fetches[1].values, vec![Key::from(1i64)]);
        assert!(map.get("person", "id", 1i64).unwrap().is_some());

        map.stage("person", "email", ["ada@x.io", "zed@x.io"]).unwrap();
        assert!(map.get_staged("person", "email").unwrap().is_empty());
        map.finalize().unwrap();
        assert_eq!(world.backend.fetches_for("person").len(), 2);
    }

    #[test]
    fn absent_keys_are_never_fetched_again() {
        let world = World::new();
        let mut map = world.map();
        map.stage("address", "id", [99i64]).unwrap();
        map.finalize().unwrap();
        assert!(map.get("address", "id", 99i64).unwrap().is_none());

        map.stage("address", "id", [99i64]).unwrap();
        map.finalize().unwrap();
        assert_eq!(world.backend.fetches_for("address").len(), 1);
    }

    #[test]
    fn cyclic_tracking_converges() {
        let world = World::new();
        let mut map = world.map();
        map.load("person", |q| {
            q.filter(Filter::eq("id", 1)).track_with("address", |q| {
                q.track(["residents"]);
            });
        })
        .unwrap();
        map.finalize().unwrap();

        // address 10 brings back its residents, then everything is bound
        assert_eq!(map.all("address").unwrap().len(), 1);
        assert_eq!(map.all("person").unwrap().len(), 2);
        assert_eq!(world.backend.fetches_for("address").len(), 1);
        assert_eq!(world.backend.fetches_for("person").len(), 3);
    }

    #[test]
    fn batches_respect_the_configured_size() {
        let world = World::new();
        let mut map = world.map_with(IdentityMapConfig::new().multi_get_batch_size(2));
        map.stage("address", "id", [14i64, 10, 13, 12, 11]).unwrap();
        map.finalize().unwrap();

        assert_eq!(
            world.requested("address"),
            vec![vec![10, 11], vec![12, 13], vec![14]]
        );
        assert_eq!(map.all("address").unwrap().len(), 3);
        assert!(map.get("address", "id", 13i64).unwrap().is_none());
    }

    #[test]
    fn keys_with_null_components_are_not_staged() {
        let world = World::new();
        let mut map = world.map();
        map.stage(
            "person",
            ["account_id", "name"],
            [
                Key::composite(vec![Value::BigInt(1), Value::Text("Ada".into())]),
                Key::composite(vec![Value::BigInt(1), Value::Null]),
                Key::from(1i64),
            ],
        )
        .unwrap();
        assert_eq!(
            map.get_staged("person", ["account_id", "name"]).unwrap().len(),
            1
        );
    }

    #[test]
    fn filtering_a_tracked_to_one_fails_at_finalize() {
        let world = World::new();
        let mut map = world.map();
        map.load("person", |q| {
            q.track_with("address", |q| {
                q.filter(Filter::eq("city", "Oslo"));
            });
        })
        .unwrap();
        match map.finalize() {
            Err(Error::Association(e)) => {
                assert_eq!(e.kind, AssociationErrorKind::FilteredToOne);
                assert_eq!(e.association, "address");
                assert_eq!(e.entity, "person");
            }
            other => panic!("expected a filtered to-one error, got {other:?}"),
        }
    }

    #[test]
    fn filtering_a_tracked_to_many_is_applied() {
        let world = World::new();
        let mut map = world.map();
        map.load("person", |q| {
            q.track_with("pets", |q| {
                q.filter(Filter::eq("kind", "cat"));
            });
        })
        .unwrap();
        map.finalize().unwrap();

        let pets = map.all("pet").unwrap();
        assert_eq!(pets.len(), 2);
        assert!(pets
            .iter()
            .all(|pet| pet.get("kind").unwrap() == Value::Text("cat".into())));
    }

    #[test]
    fn filtered_to_many_fetches_do_not_hide_later_unfiltered_ones() {
        let world = World::new();
        let mut map = world.map();
        map.load("person", |q| {
            q.filter(Filter::eq("id", 1)).track_with("pets", |q| {
                q.filter(Filter::eq("kind", "cat"));
            });
        })
        .unwrap();
        map.finalize().unwrap();
        assert_eq!(map.all("pet").unwrap().len(), 1);

        let people = map
            .load("person", |q| {
                q.filter(Filter::eq("id", 1)).track(["pets"]);
            })
            .unwrap();
        assert_eq!(
            map.get_staged("pet", "owner_id").unwrap(),
            vec![Key::from(1i64)]
        );
        map.finalize().unwrap();

        let pets = map.related(&people[0], "pets").unwrap().into_vec();
        assert_eq!(pets.len(), 2);

        // an unfiltered fetch is remembered
        map.stage("pet", "owner_id", [1i64]).unwrap();
        assert!(map.get_staged("pet", "owner_id").unwrap().is_empty());
    }

    #[test]
    fn tracked_limits_do_not_truncate_key_fetches() {
        let world = World::new();
        let mut map = world.map();
        let people = map
            .load("person", |q| {
                q.filter(Filter::eq("id", 1)).track_with("pets", |q| {
                    q.limit(1);
                });
            })
            .unwrap();
        map.finalize().unwrap();

        let pets = map.related(&people[0], "pets").unwrap().into_vec();
        assert_eq!(pets.len(), 2);
    }

    #[test]
    fn staged_loads_return_only_new_records() {
        let world = World::new();
        let mut map = world.map();
        map.load("address", |q| {
            q.filter(Filter::eq("id", 10));
        })
        .unwrap();
        map.stage("address", "id", [10i64, 11]).unwrap();

        let added = map
            .load("address", |q| {
                q.staged();
            })
            .unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].get("id").unwrap(), Value::BigInt(11));
        assert!(map.finalize_entity("address", None).unwrap().is_empty());
    }

    #[test]
    fn finalize_entities_runs_the_named_types_first() {
        let world = World::new();
        let mut map = world.map();
        map.stage("pet", "id", [100i64]).unwrap();
        map.stage("address", "id", [10i64]).unwrap();
        map.finalize_entities(&["pet"]).unwrap();

        let order: Vec<String> = world
            .backend
            .fetches()
            .into_iter()
            .map(|entry| entry.entity)
            .collect();
        assert_eq!(order, vec!["pet", "address"]);
    }
}
