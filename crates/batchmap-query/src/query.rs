//! The query base shared by every backend.
//!
//! A [`Query`] accumulates a specification (selection, filter, limit, track
//! and load directives) against one entity type and runs it through a
//! [`QueryBackend`]. The base handles batching of key lookups, statistics,
//! freezing, merging of scope conditions and wrapping rows into records.

use crate::backend::{FetchPlan, QueryBackend};
use crate::filter::{Filter, Where};
use crate::record::{Record, RecordRef};
use crate::scope::Scope;
use crate::select::{SelectField, Selection};
use crate::selector::Selector;
use crate::stats::QueryStats;
use batchmap_core::error::{FrozenQueryError, SchemaErrorKind};
use batchmap_core::{Association, EntitySchema, Error, Key, KeyField, Result, Row};
use batchmap_pool::Connection;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Default number of key values sent to the backend per `multi_get` batch.
pub const MULTI_GET_BATCH_SIZE: usize = 4_096;

/// A closure that configures a nested query.
pub type Configure = Arc<dyn Fn(&mut Query) + Send + Sync>;

/// A track or load directive: an association name with an optional
/// configuration for the query against the associated entity.
#[derive(Clone)]
pub struct Directive {
    association: String,
    configure: Option<Configure>,
}

impl Directive {
    fn plain(association: impl Into<String>) -> Self {
        Self {
            association: association.into(),
            configure: None,
        }
    }

    pub fn association(&self) -> &str {
        &self.association
    }

    pub fn configure(&self) -> Option<&Configure> {
        self.configure.as_ref()
    }
}

impl fmt::Debug for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directive")
            .field("association", &self.association)
            .field("configured", &self.configure.is_some())
            .finish()
    }
}

/// The specification a query has accumulated.
///
/// Records keep a snapshot of the spec that produced them so the identity
/// map can discover which associations to stage.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    entity: Arc<EntitySchema>,
    selection: Option<Selection>,
    where_clause: Option<Where>,
    limit: Option<usize>,
    tracks: Vec<Directive>,
    loads: Vec<Directive>,
    contexts: Vec<String>,
}

impl QuerySpec {
    fn new(entity: Arc<EntitySchema>) -> Self {
        Self {
            entity,
            selection: None,
            where_clause: None,
            limit: None,
            tracks: Vec::new(),
            loads: Vec::new(),
            contexts: Vec::new(),
        }
    }

    pub fn entity(&self) -> &Arc<EntitySchema> {
        &self.entity
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn where_clause(&self) -> Option<&Where> {
        self.where_clause.as_ref()
    }

    /// The filter expression, if one is set (the staged sentinel is not a filter).
    pub fn filter(&self) -> Option<&Filter> {
        match &self.where_clause {
            Some(Where::Filter(filter)) => Some(filter),
            _ => None,
        }
    }

    /// Whether the query resolves from staged keys only.
    pub fn is_staged(&self) -> bool {
        matches!(self.where_clause, Some(Where::Staged))
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn tracks(&self) -> &[Directive] {
        &self.tracks
    }

    pub fn loads(&self) -> &[Directive] {
        &self.loads
    }

    pub fn contexts(&self) -> &[String] {
        &self.contexts
    }

    /// The associations named by track directives, deduplicated.
    #[allow(clippy::result_large_err)]
    pub fn tracked_associations(&self) -> Result<Vec<&Association>> {
        let mut associations: Vec<&Association> = Vec::new();
        for directive in &self.tracks {
            let association = self.entity.association_named(&directive.association)?;
            if !associations.iter().any(|a| a.name() == association.name()) {
                associations.push(association);
            }
        }
        Ok(associations)
    }
}

/// A read query against one entity type.
pub struct Query {
    spec: QuerySpec,
    scope: Scope,
    backend: Arc<dyn QueryBackend>,
    batch_size: usize,
    stats: QueryStats,
    frozen: bool,
    unknown_context: Option<String>,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("entity", &self.spec.entity.name())
            .field("spec", &self.spec)
            .field("batch_size", &self.batch_size)
            .field("stats", &self.stats)
            .field("frozen", &self.frozen)
            .finish_non_exhaustive()
    }
}

impl Query {
    /// Create an empty query for `entity`.
    pub fn new(entity: Arc<EntitySchema>, backend: Arc<dyn QueryBackend>) -> Self {
        Self {
            spec: QuerySpec::new(entity),
            scope: Scope::new(),
            backend,
            batch_size: MULTI_GET_BATCH_SIZE,
            stats: QueryStats::default(),
            frozen: false,
            unknown_context: None,
        }
    }

    /// Set the scope conditions merged into every fetch.
    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the `multi_get` batch size. Zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Apply the fields and tracked associations of a selector.
    pub fn apply_selector(&mut self, selector: &Selector) -> &mut Self {
        if !selector.select.is_empty() {
            self.select(selector.select.iter().map(String::as_str));
        }
        if !selector.track.is_empty() {
            self.track(selector.track.iter().map(String::as_str));
        }
        self
    }

    fn selection_mut(&mut self) -> &mut Selection {
        let entity = Arc::clone(&self.spec.entity);
        self.spec
            .selection
            .get_or_insert_with(|| Selection::fields(entity.identity_fields()))
    }

    /// Select fields. `"*"` selects every field.
    ///
    /// The first explicit selection also selects the identity fields.
    pub fn select<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fields = fields.into_iter().peekable();
        if fields.peek().is_none() {
            return self;
        }
        let selection = self.selection_mut();
        for field in fields {
            selection.add(SelectField::new(field));
        }
        self
    }

    /// Select `source` exposed under the name `name`.
    pub fn select_as(&mut self, name: impl Into<String>, source: impl Into<String>) -> &mut Self {
        self.selection_mut()
            .add(SelectField::aliased(name, source));
        self
    }

    /// Select every field.
    pub fn select_all(&mut self) -> &mut Self {
        self.spec.selection = Some(Selection::All);
        self
    }

    /// Set the filter, replacing any previous one.
    pub fn filter(&mut self, filter: Filter) -> &mut Self {
        self.spec.where_clause = Some(Where::Filter(filter));
        self
    }

    /// Resolve from the identity map's staged keys instead of filtering.
    pub fn staged(&mut self) -> &mut Self {
        self.spec.where_clause = Some(Where::Staged);
        self
    }

    /// Remove the filter (or the staged sentinel).
    pub fn clear_filter(&mut self) -> &mut Self {
        self.spec.where_clause = None;
        self
    }

    /// Limit the number of rows returned by `execute`.
    pub fn limit(&mut self, limit: usize) -> &mut Self {
        self.spec.limit = Some(limit);
        self
    }

    /// Track associations: their keys are staged when this query's records
    /// are added to an identity map.
    pub fn track<I, S>(&mut self, associations: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in associations {
            push_plain(&mut self.spec.tracks, name.into());
        }
        self
    }

    /// Track one association, configuring the query that later fetches it.
    pub fn track_with<F>(&mut self, association: impl Into<String>, configure: F) -> &mut Self
    where
        F: Fn(&mut Query) + Send + Sync + 'static,
    {
        self.spec.tracks.push(Directive {
            association: association.into(),
            configure: Some(Arc::new(configure)),
        });
        self
    }

    /// Load associations immediately after this query's records are added.
    pub fn load<I, S>(&mut self, associations: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in associations {
            push_plain(&mut self.spec.loads, name.into());
        }
        self
    }

    /// Load one association immediately, configuring the nested query.
    pub fn load_with<F>(&mut self, association: impl Into<String>, configure: F) -> &mut Self
    where
        F: Fn(&mut Query) + Send + Sync + 'static,
    {
        self.spec.loads.push(Directive {
            association: association.into(),
            configure: Some(Arc::new(configure)),
        });
        self
    }

    /// Apply a named context declared on the entity.
    ///
    /// An unknown context makes the next fetch fail.
    pub fn context(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        let entity = Arc::clone(&self.spec.entity);
        match entity.context_named(&name) {
            Ok(context) => {
                self.select(context.select.iter().map(String::as_str));
                self.track(context.track.iter().map(String::as_str));
            }
            Err(_) => {
                self.unknown_context.get_or_insert_with(|| name.clone());
            }
        }
        self.spec.contexts.push(name);
        self
    }

    pub fn entity(&self) -> &Arc<EntitySchema> {
        &self.spec.entity
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.spec.selection()
    }

    pub fn filter_expr(&self) -> Option<&Filter> {
        self.spec.filter()
    }

    pub fn is_staged(&self) -> bool {
        self.spec.is_staged()
    }

    pub fn tracks(&self) -> &[Directive] {
        self.spec.tracks()
    }

    pub fn loads(&self) -> &[Directive] {
        self.spec.loads()
    }

    pub fn contexts(&self) -> &[String] {
        self.spec.contexts()
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn stats(&self) -> &QueryStats {
        &self.stats
    }

    /// See [`QuerySpec::tracked_associations`].
    #[allow(clippy::result_large_err)]
    pub fn tracked_associations(&self) -> Result<Vec<&Association>> {
        self.spec.tracked_associations()
    }

    /// Mark the query as used up. Further fetches fail.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// The plan the backend receives, with scope conditions merged in.
    pub fn plan(&self) -> FetchPlan<'_> {
        FetchPlan {
            entity: &self.spec.entity,
            selection: self.spec.selection.as_ref(),
            filter: self.scope.merge(&self.spec.entity, self.spec.filter()),
            limit: self.spec.limit,
        }
    }

    /// Backend rendering of the current plan.
    pub fn describe(&self) -> String {
        self.backend.describe(&self.plan())
    }

    #[allow(clippy::result_large_err)]
    fn ensure_usable(&self) -> Result<()> {
        if self.frozen {
            return Err(Error::FrozenQuery(FrozenQueryError {
                entity: self.spec.entity.name().to_string(),
            }));
        }
        if let Some(name) = &self.unknown_context {
            return Err(Error::invalid_schema(
                SchemaErrorKind::UnknownContext,
                format!(
                    "context {name:?} is not defined for {}",
                    self.spec.entity.name()
                ),
            ));
        }
        Ok(())
    }

    /// Fetch records whose `key` matches one of `values`.
    ///
    /// `values` is split into batches of at most the batch size, one backend
    /// call each. `select` adds fields for the duration of the call only; the
    /// query's own selection is restored afterwards. Any batch failing fails
    /// the whole call.
    #[allow(clippy::result_large_err)]
    pub fn multi_get(
        &mut self,
        connection: &Connection,
        key: &KeyField,
        values: &[Key],
        select: Option<&[&str]>,
    ) -> Result<Vec<RecordRef>> {
        let rows = self.multi_get_raw(connection, key, values, select)?;
        Ok(self.to_records(rows))
    }

    /// Like [`multi_get`](Self::multi_get) but returns raw rows.
    #[tracing::instrument(
        level = "debug",
        name = "multi_get",
        target = "batchmap::query",
        skip_all,
        fields(entity = %self.spec.entity.name(), key = %key, values = values.len())
    )]
    #[allow(clippy::result_large_err)]
    pub fn multi_get_raw(
        &mut self,
        connection: &Connection,
        key: &KeyField,
        values: &[Key],
        select: Option<&[&str]>,
    ) -> Result<Vec<Row>> {
        self.ensure_usable()?;
        self.stats.multi_get += 1;

        let original = self.spec.selection.clone();
        if let Some(fields) = select {
            self.select(fields.iter().copied());
        }
        let outcome = self.fetch_batches(connection, key, values);
        self.spec.selection = original;

        let rows = outcome?;
        self.stats.records_loaded += rows.len() as u64;
        Ok(rows)
    }

    #[allow(clippy::result_large_err)]
    fn fetch_batches(
        &mut self,
        connection: &Connection,
        key: &KeyField,
        values: &[Key],
    ) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for batch in values.chunks(self.batch_size) {
            let started = Instant::now();
            let fetched = {
                let plan = self.plan();
                tracing::trace!(
                    target: "batchmap::query",
                    batch = batch.len(),
                    fetch = %self.backend.describe(&plan),
                    "fetching batch"
                );
                self.backend.fetch_keys(connection, &plan, key, batch)
            };
            self.record_interaction(started);
            rows.extend(fetched?);
        }
        Ok(rows)
    }

    /// Fetch records matching the current specification.
    #[tracing::instrument(
        level = "debug",
        name = "execute",
        target = "batchmap::query",
        skip_all,
        fields(entity = %self.spec.entity.name())
    )]
    #[allow(clippy::result_large_err)]
    pub fn execute(&mut self, connection: &Connection) -> Result<Vec<RecordRef>> {
        self.ensure_usable()?;
        self.stats.execute += 1;

        let started = Instant::now();
        let fetched = {
            let plan = self.plan();
            tracing::debug!(
                target: "batchmap::query",
                fetch = %self.backend.describe(&plan),
                "executing"
            );
            self.backend.fetch(connection, &plan)
        };
        self.record_interaction(started);

        let rows = fetched?;
        self.stats.records_loaded += rows.len() as u64;
        Ok(self.to_records(rows))
    }

    fn record_interaction(&mut self, started: Instant) {
        self.stats.datastore_interactions += 1;
        self.stats.datastore_interaction_time += started.elapsed();
    }

    /// Wrap rows into records that remember this query's specification.
    pub fn to_records(&self, rows: Vec<Row>) -> Vec<RecordRef> {
        let origin = Arc::new(self.spec.clone());
        rows.into_iter()
            .map(|row| {
                Arc::new(Record::with_origin(
                    Arc::clone(&self.spec.entity),
                    row,
                    Arc::clone(&origin),
                ))
            })
            .collect()
    }
}

fn push_plain(directives: &mut Vec<Directive>, name: String) {
    let exists = directives
        .iter()
        .any(|d| d.configure.is_none() && d.association == name);
    if !exists {
        directives.push(Directive::plain(name));
    }
}
