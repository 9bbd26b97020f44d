//! The identity map: one record instance per identity for a unit of work.
//!
//! The map owns, per entity type:
//!
//! - **rows**: every record added, in insertion order
//! - **bindings**: identity value -> record, or an absent marker once a
//!   fetch proved there is no such row
//! - **staged keys**: values known to be needed but not yet fetched
//! - **secondary indexes**: resident records grouped by a non-identity field
//! - **queries**: the frozen queries that ran, kept for statistics
//!
//! A map is bound to the thread that created it. Every public operation
//! checks this and fails with [`Error::Context`] elsewhere.
//!
//! # Example
//!
//! ```ignore
//! let mut map = IdentityMap::new(schema, repositories);
//!
//! map.load("person", |q| {
//!     q.filter(Filter::eq("team", "red")).track(["address"]);
//! })?;
//! map.finalize()?;
//!
//! let address = map.get("address", "id", 10)?;
//! ```

use crate::config::IdentityMapConfig;
use crate::index::SecondaryIndexes;
use crate::repository::RepositoryRegistry;
use crate::statistics::QueryStatistics;
use batchmap_core::error::{ContextError, SchemaErrorKind, UnresolvedIdentityError};
use batchmap_core::{EntitySchema, Error, Key, KeyField, Result, Schema};
use batchmap_pool::{Connection, ConnectionManager};
use batchmap_query::{
    Directive, MapId, Query, QuerySpec, RecordRef, Scope, ScopeCondition, Selector,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// What an identity value is bound to.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Present(RecordRef),
    Absent,
}

/// Staging state for one entity type.
#[derive(Debug, Default)]
pub(crate) struct Staged {
    /// Needed but unfetched values, per key field
    pub(crate) keys: BTreeMap<KeyField, BTreeSet<Key>>,
    /// Queries whose track directives point at this entity
    pub(crate) queries: Vec<Arc<QuerySpec>>,
    /// Non-identity values already fetched without a filter
    pub(crate) resolved: HashMap<KeyField, HashSet<Key>>,
}

impl Staged {
    pub(crate) fn is_empty(&self) -> bool {
        self.keys.values().all(BTreeSet::is_empty)
    }

    pub(crate) fn queue(&mut self, query: &Arc<QuerySpec>) {
        if !self.queries.iter().any(|q| Arc::ptr_eq(q, query)) {
            self.queries.push(Arc::clone(query));
        }
    }
}

pub(crate) type Bindings = HashMap<KeyField, HashMap<Key, Slot>>;

/// A per-unit-of-work identity map and batched association loader.
pub struct IdentityMap {
    id: MapId,
    owner: ThreadId,
    pub(crate) schema: Arc<Schema>,
    repositories: Arc<RepositoryRegistry>,
    pub(crate) config: IdentityMapConfig,
    scope: Scope,
    selectors: HashMap<String, Selector>,
    connections: ConnectionManager,
    pub(crate) rows: HashMap<String, Vec<RecordRef>>,
    pub(crate) row_keys: HashMap<String, Bindings>,
    pub(crate) staged: BTreeMap<String, Staged>,
    pub(crate) indexes: SecondaryIndexes,
    pub(crate) queries: BTreeMap<String, Vec<Query>>,
}

impl fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: BTreeMap<&str, usize> = self
            .rows
            .iter()
            .map(|(entity, rows)| (entity.as_str(), rows.len()))
            .collect();
        f.debug_struct("IdentityMap")
            .field("id", &self.id)
            .field("rows", &rows)
            .field("scope", &self.scope)
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

impl IdentityMap {
    /// Create an empty map owned by the calling thread.
    pub fn new(schema: Arc<Schema>, repositories: Arc<RepositoryRegistry>) -> Self {
        Self {
            id: MapId::next(),
            owner: thread::current().id(),
            schema,
            repositories,
            config: IdentityMapConfig::default(),
            scope: Scope::new(),
            selectors: HashMap::new(),
            connections: ConnectionManager::new(),
            rows: HashMap::new(),
            row_keys: HashMap::new(),
            staged: BTreeMap::new(),
            indexes: SecondaryIndexes::default(),
            queries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: IdentityMapConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Start every query for `entity` from `selector`.
    #[must_use]
    pub fn with_selector(mut self, entity: impl Into<String>, selector: Selector) -> Self {
        self.selectors.insert(entity.into(), selector);
        self
    }

    pub fn id(&self) -> MapId {
        self.id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &IdentityMapConfig {
        &self.config
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn ensure_owner(&self) -> Result<()> {
        let current = thread::current().id();
        if current == self.owner {
            return Ok(());
        }
        Err(Error::Context(ContextError {
            message: format!(
                "identity map belongs to thread {:?} but was used from {:?}",
                self.owner, current
            ),
        }))
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn entity(&self, name: &str) -> Result<Arc<EntitySchema>> {
        self.schema.entity(name).map(Arc::clone)
    }

    /// Absent markers and resolved keys hold only under the scope they were
    /// fetched with, so the scope is fixed once the map has been used.
    #[allow(clippy::result_large_err)]
    fn ensure_scope_mutable(&self) -> Result<()> {
        self.ensure_owner()?;
        if self.is_clear() {
            return Ok(());
        }
        Err(Error::Context(ContextError {
            message: "can not change the scope of an identity map that has been used"
                .to_string(),
        }))
    }

    /// Replace the scope. Only allowed while the map is clear.
    #[allow(clippy::result_large_err)]
    pub fn set_scope(&mut self, scope: Scope) -> Result<()> {
        self.ensure_scope_mutable()?;
        self.scope = scope;
        Ok(())
    }

    /// Remove one named condition from the scope. Only allowed while the map
    /// is clear.
    #[allow(clippy::result_large_err)]
    pub fn unscope(&mut self, name: &str) -> Result<ScopeCondition> {
        self.ensure_scope_mutable()?;
        self.scope.remove(name).ok_or_else(|| {
            Error::invalid_schema(
                SchemaErrorKind::UnknownScope,
                format!("scope {name:?} is not active"),
            )
        })
    }

    /// Whether nothing has been loaded, staged or queried.
    pub fn is_clear(&self) -> bool {
        self.rows.values().all(Vec::is_empty)
            && self.staged.values().all(Staged::is_empty)
            && self.row_keys.is_empty()
            && self.queries.is_empty()
    }

    /// Drop all loaded, staged and indexed state. Scope, selectors and
    /// configuration are kept, and so are checked out connections.
    #[allow(clippy::result_large_err)]
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_owner()?;
        if self.config.log_statistics_on_clear && !self.queries.is_empty() {
            let totals = self.statistics().sum_totals();
            tracing::info!(
                target: "batchmap::map",
                queries = totals.query_count,
                records_loaded = totals.stats.records_loaded,
                datastore_interactions = totals.stats.datastore_interactions,
                datastore_interaction_time_us =
                    u64::try_from(totals.stats.datastore_interaction_time.as_micros())
                        .unwrap_or(u64::MAX),
                "identity map cleared"
            );
        }
        for record in self.rows.values().flatten() {
            record.release(self.id);
        }
        self.rows.clear();
        self.row_keys.clear();
        self.staged.clear();
        self.indexes.clear();
        self.queries.clear();
        Ok(())
    }

    /// The connection for `repository`, checked out on first use.
    #[allow(clippy::result_large_err)]
    pub fn connection(&mut self, repository: &str) -> Result<Connection> {
        self.ensure_owner()?;
        let registered = self.repositories.get(repository)?;
        self.connections.checkout(repository, &registered.factory)
    }

    /// Release every checked out connection.
    #[allow(clippy::result_large_err)]
    pub fn release_connections(&mut self) -> Result<()> {
        self.ensure_owner()?;
        self.connections.release_all()
    }

    /// Build a query for `entity` with this map's scope, batch size and
    /// selector applied.
    #[allow(clippy::result_large_err)]
    pub fn query(&self, entity: &str) -> Result<Query> {
        self.ensure_owner()?;
        let schema = self.entity(entity)?;
        let backend = Arc::clone(&self.repositories.get(schema.repository_name())?.backend);
        let mut query = Query::new(schema, backend)
            .with_scope(self.scope.clone())
            .with_batch_size(self.config.multi_get_batch_size);
        if let Some(selector) = self.selectors.get(entity) {
            query.apply_selector(selector);
        }
        Ok(query)
    }

    pub(crate) fn retain_query(&mut self, mut query: Query) {
        query.freeze();
        self.queries
            .entry(query.entity().name().to_string())
            .or_default()
            .push(query);
    }

    /// The frozen queries run for `entity`.
    pub fn queries(&self, entity: &str) -> &[Query] {
        self.queries.get(entity).map_or(&[], Vec::as_slice)
    }

    /// Load records of `entity` through a query configured by `configure`.
    ///
    /// A query marked [`staged`](Query::staged) resolves the entity's staged
    /// keys instead. Otherwise the query runs, its records are added (an
    /// already resident identity wins and is returned in place of the fetched
    /// copy), and its load directives are followed.
    #[allow(clippy::result_large_err)]
    pub fn load<F>(&mut self, entity: &str, configure: F) -> Result<Vec<RecordRef>>
    where
        F: FnOnce(&mut Query),
    {
        let mut query = self.query(entity)?;
        configure(&mut query);
        self.load_query(query)
    }

    /// [`load`](Self::load) with a prebuilt query.
    #[tracing::instrument(
        level = "debug",
        name = "load",
        target = "batchmap::map",
        skip_all,
        fields(entity = %query.entity().name())
    )]
    #[allow(clippy::result_large_err)]
    pub fn load_query(&mut self, mut query: Query) -> Result<Vec<RecordRef>> {
        self.ensure_owner()?;
        let entity = Arc::clone(query.entity());

        if query.is_staged() {
            query.clear_filter();
            return self.finalize_entity(entity.name(), Some(query));
        }

        let connection = self.connection(entity.repository_name())?;
        let records = query.execute(&connection)?;
        let added = self.add_records(records)?;
        tracing::debug!(
            target: "batchmap::map",
            records = added.len(),
            "loaded"
        );

        let loads = query.loads().to_vec();
        self.retain_query(query);
        self.subload(&entity, &loads, &added)?;
        Ok(added)
    }

    /// Follow load directives: fetch the associated records not yet resident
    /// in one batch, add them, and recurse into the nested query's own loads.
    #[allow(clippy::result_large_err)]
    pub(crate) fn subload(
        &mut self,
        entity: &EntitySchema,
        loads: &[Directive],
        records: &[RecordRef],
    ) -> Result<()> {
        for directive in loads {
            let association = entity.association_named(directive.association())?.clone();
            let target = self.entity(association.entity())?;
            let (key, values) = self.stage_for(&association, records)?;

            let mut resident: Vec<RecordRef> = Vec::new();
            let mut missing: Vec<Key> = Vec::new();
            for value in values {
                match self.binding(target.name(), &key, &value) {
                    Some(Slot::Present(record)) => push_unique(&mut resident, record.clone()),
                    Some(Slot::Absent) => {}
                    None => missing.push(value),
                }
            }

            let mut query = self.query(target.name())?;
            if let Some(configure) = directive.configure() {
                configure(&mut query);
            }

            let mut loaded = Vec::new();
            if !missing.is_empty() {
                let connection = self.connection(target.repository_name())?;
                let fetched = query.multi_get(&connection, &key, &missing, None)?;
                loaded = self.add_records(fetched)?;
                // Keys filtered out by a configured nested query may still exist.
                if self.config.mark_missing_as_absent
                    && target.is_identity(&key)
                    && query.filter_expr().is_none()
                {
                    self.mark_absent(target.name(), &key, missing);
                }
            }

            tracing::debug!(
                target: "batchmap::map",
                association = association.name(),
                resident = resident.len(),
                loaded = loaded.len(),
                "subload"
            );

            let nested = query.loads().to_vec();
            if query.stats().fetches() > 0 {
                self.retain_query(query);
            }
            for record in resident {
                push_unique(&mut loaded, record);
            }
            self.subload(&target, &nested, &loaded)?;
        }
        Ok(())
    }

    pub(crate) fn binding(&self, entity: &str, field: &KeyField, key: &Key) -> Option<&Slot> {
        self.row_keys.get(entity)?.get(field)?.get(key)
    }

    /// Record `keys` as proven absent, unstaging them. Present bindings are
    /// left alone.
    pub(crate) fn mark_absent<I>(&mut self, entity: &str, field: &KeyField, keys: I) -> usize
    where
        I: IntoIterator<Item = Key>,
    {
        let mut staged = self
            .staged
            .get_mut(entity)
            .and_then(|s| s.keys.get_mut(field));
        let bindings = self
            .row_keys
            .entry(entity.to_string())
            .or_default()
            .entry(field.clone())
            .or_default();
        let mut marked = 0;
        for key in keys {
            if let Some(set) = staged.as_mut() {
                set.remove(&key);
            }
            if !bindings.contains_key(&key) {
                bindings.insert(key, Slot::Absent);
                marked += 1;
            }
        }
        marked
    }

    /// Every resident record of `entity`, in insertion order.
    #[allow(clippy::result_large_err)]
    pub fn all(&self, entity: &str) -> Result<&[RecordRef]> {
        self.ensure_owner()?;
        self.schema.entity(entity)?;
        Ok(self.rows.get(entity).map_or(&[], Vec::as_slice))
    }

    /// Resident records of `entity` whose `field` matches one of `values`.
    ///
    /// Identity fields are looked up directly: absent values contribute
    /// nothing and values never staged or loaded are an error. Other fields
    /// go through a secondary index, built on first use.
    #[allow(clippy::result_large_err)]
    pub fn all_where(
        &mut self,
        entity: &str,
        field: impl Into<KeyField>,
        values: &[Key],
    ) -> Result<Vec<RecordRef>> {
        self.ensure_owner()?;
        let schema = self.entity(entity)?;
        let field = field.into();

        if schema.is_identity(&field) {
            let mut found = Vec::new();
            for value in values {
                if let Some(record) = self.lookup(entity, &field, value)? {
                    found.push(record);
                }
            }
            return Ok(found);
        }

        let mut found = Vec::new();
        for value in values {
            found.extend(self.index(entity, &field, value)?);
        }
        Ok(found)
    }

    /// The record of `entity` whose identity `field` equals `value`.
    ///
    /// Returns `None` for a value proven absent and an
    /// [`UnresolvedIdentity`](Error::UnresolvedIdentity) error for one that
    /// was never resolved.
    #[allow(clippy::result_large_err)]
    pub fn get(
        &self,
        entity: &str,
        field: impl Into<KeyField>,
        value: impl Into<Key>,
    ) -> Result<Option<RecordRef>> {
        self.ensure_owner()?;
        let schema = self.entity(entity)?;
        let field = field.into();
        if !schema.is_identity(&field) {
            return Err(Error::invalid_schema(
                SchemaErrorKind::Invalid,
                format!("{field} is not an identity of {entity}"),
            ));
        }
        self.lookup(entity, &field, &value.into())
    }

    #[allow(clippy::result_large_err)]
    fn lookup(&self, entity: &str, field: &KeyField, key: &Key) -> Result<Option<RecordRef>> {
        match self.binding(entity, field, key) {
            Some(Slot::Present(record)) => Ok(Some(Arc::clone(record))),
            Some(Slot::Absent) => Ok(None),
            None => Err(Error::UnresolvedIdentity(UnresolvedIdentityError {
                entity: entity.to_string(),
                field: field.to_string(),
                key: key.to_string(),
            })),
        }
    }

    /// A summary of the statistics of every retained query.
    #[allow(clippy::result_large_err)]
    pub fn query_statistics(&self) -> Result<QueryStatistics> {
        self.ensure_owner()?;
        Ok(self.statistics())
    }

    fn statistics(&self) -> QueryStatistics {
        QueryStatistics::new(
            self.queries
                .iter()
                .map(|(entity, queries)| (entity.as_str(), queries.as_slice())),
        )
    }
}

pub(crate) fn push_unique(records: &mut Vec<RecordRef>, record: RecordRef) {
    if !records.iter().any(|r| Arc::ptr_eq(r, &record)) {
        records.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::World;
    use batchmap_query::Filter;

    #[test]
    fn load_keeps_one_instance_per_identity() {
        let world = World::new();
        let mut map = world.map();

        let first = map
            .load("person", |q| {
                q.filter(Filter::eq("account_id", 1));
            })
            .unwrap();
        assert_eq!(first.len(), 2);

        let second = map.load("person", |_| {}).unwrap();
        assert_eq!(second.len(), 3);
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert_eq!(map.all("person").unwrap().len(), 3);

        let queries = map.queries("person");
        assert_eq!(queries.len(), 2);
        assert!(queries.iter().all(Query::is_frozen));
    }

    #[test]
    fn get_distinguishes_absent_from_unresolved() {
        let world = World::new();
        let mut map = world.map();
        map.stage("address", "id", [10i64, 99]).unwrap();
        map.finalize().unwrap();

        assert!(map.get("address", "id", 10i64).unwrap().is_some());
        assert!(map.get("address", "id", 99i64).unwrap().is_none());
        assert!(matches!(
            map.get("address", "id", 42i64),
            Err(Error::UnresolvedIdentity(_))
        ));
        assert_eq!(
            map.get("address", "city", "Oslo").unwrap_err().schema_kind(),
            Some(SchemaErrorKind::Invalid)
        );
    }

    #[test]
    fn all_where_uses_identities_and_indexes() {
        let world = World::new();
        let mut map = world.map();
        map.load("address", |_| {}).unwrap();

        let by_id = map
            .all_where("address", "id", &[Key::from(10i64), Key::from(12i64)])
            .unwrap();
        assert_eq!(by_id.len(), 2);

        let in_oslo = map.all_where("address", "city", &[Key::from("Oslo")]).unwrap();
        assert_eq!(in_oslo.len(), 2);
        assert!(map.all_where("address", "city", &[Key::from("Paris")]).unwrap().is_empty());
    }

    #[test]
    fn nested_loads_fetch_missing_targets_once() {
        let world = World::new();
        let mut map = world.map();
        map.load("pet", |q| {
            q.filter(Filter::eq("id", 100));
        })
        .unwrap();

        let people = map
            .load("person", |q| {
                q.filter(Filter::eq("id", 1)).load(["pets"]);
            })
            .unwrap();
        assert_eq!(people.len(), 1);
        assert_eq!(map.all("pet").unwrap().len(), 2);
        // owner_id is not an identity, so the subload asks for it directly
        assert_eq!(world.backend.fetches_for("pet").len(), 2);
    }

    #[test]
    fn nested_loads_mark_missing_identities_absent() {
        let world = World::new();
        world.store.insert(
            "pet",
            batchmap_core::Row::from_pairs([
                ("id", batchmap_core::Value::BigInt(103)),
                ("owner_id", batchmap_core::Value::BigInt(77)),
            ]),
        );
        let mut map = world.map();
        map.load("pet", |q| {
            q.filter(Filter::eq("id", 103)).load(["owner"]);
        })
        .unwrap();
        assert!(map.get("person", "id", 77i64).unwrap().is_none());

        let mut lenient = world.map_with(IdentityMapConfig::new().mark_missing_as_absent(false));
        lenient
            .load("pet", |q| {
                q.filter(Filter::eq("id", 103)).load(["owner"]);
            })
            .unwrap();
        assert!(lenient.get("person", "id", 77i64).is_err());
    }

    #[test]
    fn filtered_nested_loads_leave_missing_keys_unresolved() {
        let world = World::new();
        let mut map = world.map();
        map.load("pet", |q| {
            q.filter(Filter::eq("id", 100)).load_with("owner", |q| {
                q.filter(Filter::eq("name", "Bob"));
            });
        })
        .unwrap();
        assert!(matches!(
            map.get("person", "id", 1i64),
            Err(Error::UnresolvedIdentity(_))
        ));

        map.stage("person", "id", [1i64]).unwrap();
        map.finalize().unwrap();
        assert!(map.get("person", "id", 1i64).unwrap().is_some());
    }

    #[test]
    fn scope_applies_unless_excluded() {
        let world = World::new();
        let mut map = world
            .map()
            .with_scope(Scope::new().with("account", "account_id", 1));

        assert_eq!(map.load("person", |_| {}).unwrap().len(), 2);
        assert_eq!(map.load("pet", |_| {}).unwrap().len(), 3);

        assert!(matches!(map.unscope("account"), Err(Error::Context(_))));
        assert!(matches!(
            map.set_scope(Scope::new()),
            Err(Error::Context(_))
        ));
        assert_eq!(map.scope().len(), 1);

        map.clear().unwrap();
        assert_eq!(
            map.unscope("tenant").unwrap_err().schema_kind(),
            Some(SchemaErrorKind::UnknownScope)
        );
        map.unscope("account").unwrap();
        assert_eq!(map.load("person", |_| {}).unwrap().len(), 3);
    }

    #[test]
    fn selectors_shape_every_query() {
        let world = World::new();
        let mut map = world
            .map()
            .with_selector("person", Selector::new().select(["name"]));
        let people = map.load("person", |_| {}).unwrap();
        assert!(people[0].has_field("id"));
        assert!(people[0].has_field("name"));
        assert!(!people[0].has_field("email"));
    }

    #[test]
    fn clear_releases_records() {
        let world = World::new();
        let mut map = world.map();
        let people = map.load("person", |_| {}).unwrap();
        assert_eq!(people[0].owner(), Some(map.id()));
        assert!(!map.is_clear());

        map.clear().unwrap();
        assert!(map.is_clear());
        assert_eq!(people[0].owner(), None);
        assert!(map.all("person").unwrap().is_empty());
        assert!(map.get("person", "id", 1i64).is_err());
    }

    #[test]
    fn connections_are_checked_out_once_per_map() {
        let world = World::new();
        let mut map = world.map();
        map.load("person", |_| {}).unwrap();
        map.load("address", |_| {}).unwrap();
        assert_eq!(world.factory.checkouts(), 1);

        map.release_connections().unwrap();
        assert_eq!(world.factory.releases(), 1);
        assert!(matches!(
            map.connection("archive"),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn other_threads_are_refused() {
        let world = World::new();
        let map = world.map();
        let refused = thread::scope(|s| {
            s.spawn(|| matches!(map.all("person"), Err(Error::Context(_))))
                .join()
                .unwrap()
        });
        assert!(refused);
        assert!(map.all("person").is_ok());
    }

    #[test]
    fn records_cannot_join_two_maps() {
        let world = World::new();
        let mut first = world.map();
        let mut second = world.map();
        let people = first.load("person", |_| {}).unwrap();
        assert!(matches!(
            second.add_record(Arc::clone(&people[0])),
            Err(Error::Context(_))
        ));
    }

    #[test]
    fn statistics_sum_retained_queries() {
        let world = World::new();
        let mut map = world.map();
        map.load("person", |q| {
            q.track(["address"]);
        })
        .unwrap();
        map.finalize().unwrap();

        let stats = map.query_statistics().unwrap();
        let person = stats.entity("person").unwrap();
        assert_eq!(person.query_count, 1);
        assert_eq!(person.stats.execute, 1);
        assert_eq!(person.stats.records_loaded, 3);

        let address = stats.entity("address").unwrap();
        assert_eq!(address.stats.multi_get, 1);
        assert_eq!(address.stats.records_loaded, 1);

        let total = stats.sum_totals();
        assert_eq!(total.query_count, 2);
        assert_eq!(total.stats.datastore_interactions, 2);
    }
}
