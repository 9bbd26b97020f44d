//! Loaded records.

use crate::query::QuerySpec;
use batchmap_core::error::SchemaErrorKind;
use batchmap_core::{EntitySchema, Error, Key, KeyField, Result, Row, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared handle to a record. Identity maps hand out clones of these, so
/// two handles to the same identity are `Arc::ptr_eq`.
pub type RecordRef = Arc<Record>;

static NEXT_MAP_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies an identity map for record ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapId(u64);

impl MapId {
    /// Allocate a fresh, process-unique id.
    pub fn next() -> Self {
        MapId(NEXT_MAP_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

/// A row of one entity type, with identity accessors and back-references
/// to the map that owns it and the query that produced it.
pub struct Record {
    entity: Arc<EntitySchema>,
    row: Row,
    origin: Option<Arc<QuerySpec>>,
    /// 0 while detached
    owner: AtomicU64,
    decoded: Mutex<HashMap<String, Value>>,
}

impl Record {
    /// Wrap a row that was not produced by a query.
    pub fn new(entity: Arc<EntitySchema>, row: Row) -> Self {
        Self {
            entity,
            row,
            origin: None,
            owner: AtomicU64::new(0),
            decoded: Mutex::new(HashMap::new()),
        }
    }

    /// Wrap a row produced by the query described by `origin`.
    pub fn with_origin(entity: Arc<EntitySchema>, row: Row, origin: Arc<QuerySpec>) -> Self {
        Self {
            origin: Some(origin),
            ..Self::new(entity, row)
        }
    }

    pub fn entity(&self) -> &Arc<EntitySchema> {
        &self.entity
    }

    pub fn entity_name(&self) -> &str {
        self.entity.name()
    }

    /// The raw row, with serialized fields still encoded.
    pub fn row(&self) -> &Row {
        &self.row
    }

    /// The query that produced this record, if any.
    pub fn origin(&self) -> Option<&Arc<QuerySpec>> {
        self.origin.as_ref()
    }

    /// Whether the field was loaded.
    pub fn has_field(&self, field: &str) -> bool {
        self.row.contains_column(field)
    }

    /// Read a field.
    ///
    /// Serialized fields are decoded from JSON on first access and cached.
    /// Reading a field that was not selected is an error.
    #[allow(clippy::result_large_err)]
    pub fn get(&self, field: &str) -> Result<Value> {
        let raw = self.row.get_by_name(field).ok_or_else(|| {
            Error::invalid_schema(
                SchemaErrorKind::UnknownField,
                format!("field {field:?} not loaded for {}", self.entity.name()),
            )
        })?;

        if !self.entity.is_serialized(field) {
            return Ok(raw.clone());
        }

        let mut decoded = self.decoded.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = decoded.get(field) {
            return Ok(value.clone());
        }
        let value = match raw {
            Value::Text(text) => Value::from_json(serde_json::from_str(text)?),
            Value::Json(json) => Value::from_json(json.clone()),
            other => other.clone(),
        };
        decoded.insert(field.to_string(), value.clone());
        Ok(value)
    }

    /// Read the key for `field`; composite fields yield a tuple.
    #[allow(clippy::result_large_err)]
    pub fn key(&self, field: &KeyField) -> Result<Key> {
        let values = field
            .fields()
            .into_iter()
            .map(|name| self.get(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Key::composite(values))
    }

    /// The record's value for every declared identity.
    #[allow(clippy::result_large_err)]
    pub fn identities(&self) -> Result<Vec<(KeyField, Key)>> {
        self.entity
            .identities()
            .iter()
            .map(|identity| Ok((identity.clone(), self.key(identity)?)))
            .collect()
    }

    /// The map currently owning this record.
    pub fn owner(&self) -> Option<MapId> {
        match self.owner.load(Ordering::Acquire) {
            0 => None,
            id => Some(MapId(id)),
        }
    }

    /// Take ownership for `map`. Fails if another map already owns it.
    pub fn claim(&self, map: MapId) -> bool {
        match self
            .owner
            .compare_exchange(0, map.0, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == map.0,
        }
    }

    /// Give up ownership held by `map`.
    pub fn release(&self, map: MapId) -> bool {
        self.owner
            .compare_exchange(map.0, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = self
            .row
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect();
        f.debug_struct("Record")
            .field("entity", &self.entity.name())
            .field("data", &fields)
            .field("owner", &self.owner())
            .finish_non_exhaustive()
    }
}
