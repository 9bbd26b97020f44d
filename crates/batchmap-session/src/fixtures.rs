//! People, addresses and pets in an in-memory store.

use crate::{IdentityMap, IdentityMapConfig, RepositoryRegistry};
use batchmap_core::{Association, Context, EntitySchema, Row, Schema, Value};
use batchmap_memory::{MemoryBackend, MemoryConnectionFactory, MemoryRepository};
use std::sync::Arc;

pub(crate) struct World {
    pub(crate) store: Arc<MemoryRepository>,
    pub(crate) backend: Arc<MemoryBackend>,
    pub(crate) factory: Arc<MemoryConnectionFactory>,
    pub(crate) schema: Arc<Schema>,
    pub(crate) registry: Arc<RepositoryRegistry>,
}

impl World {
    pub(crate) fn new() -> Self {
        let store = Arc::new(MemoryRepository::new());
        store.insert_many(
            "person",
            [
                person(1, "Ada", Value::BigInt(10), 1, Value::Text("[11, 12]".into())),
                person(2, "Bob", Value::BigInt(10), 1, Value::Null),
                person(3, "Cy", Value::Null, 2, Value::Text("[11]".into())),
            ],
        );
        store.insert_many(
            "address",
            [address(10, "Oslo", 1), address(11, "Rome", 1), address(12, "Oslo", 2)],
        );
        store.insert_many(
            "pet",
            [pet(100, 1, "dog"), pet(101, 1, "cat"), pet(102, 2, "cat")],
        );

        let schema = Schema::builder()
            .entity(
                EntitySchema::new("person")
                    .identity("id")
                    .serialized("prior_address_ids")
                    .association(Association::to_one("address", "address", "address_id"))
                    .association(Association::to_one_via_array(
                        "prior_addresses",
                        "address",
                        "prior_address_ids",
                    ))
                    .association(Association::to_many("pets", "pet", "owner_id"))
                    .context("card", Context::new().select(["name"]).track(["address"])),
            )
            .entity(
                EntitySchema::new("address")
                    .identity("id")
                    .association(Association::to_many("residents", "person", "address_id"))
                    .association(Association::to_many_via_array(
                        "former_residents",
                        "person",
                        "prior_address_ids",
                    )),
            )
            .entity(
                EntitySchema::new("pet")
                    .identity("id")
                    .association(Association::to_one("owner", "person", "owner_id"))
                    .exclude_scope("account"),
            )
            .build()
            .unwrap();

        let backend = Arc::new(MemoryBackend::new());
        let factory = Arc::new(MemoryConnectionFactory::new(Arc::clone(&store)));
        let registry = RepositoryRegistry::new().register(
            "default",
            factory.clone(),
            backend.clone(),
        );
        Self {
            store,
            backend,
            factory,
            schema: Arc::new(schema),
            registry: Arc::new(registry),
        }
    }

    pub(crate) fn map(&self) -> IdentityMap {
        IdentityMap::new(Arc::clone(&self.schema), Arc::clone(&self.registry))
    }

    pub(crate) fn map_with(&self, config: IdentityMapConfig) -> IdentityMap {
        self.map().with_config(config)
    }

    /// Key values each fetch of `entity` asked for.
    pub(crate) fn requested(&self, entity: &str) -> Vec<Vec<i64>> {
        self.backend
            .fetches_for(entity)
            .iter()
            .map(|entry| {
                entry
                    .values
                    .iter()
                    .filter_map(|key| key.values()[0].as_i64())
                    .collect()
            })
            .collect()
    }
}

fn person(id: i64, name: &str, address_id: Value, account_id: i64, prior: Value) -> Row {
    Row::from_pairs([
        ("id", Value::BigInt(id)),
        ("name", Value::Text(name.to_string())),
        ("email", Value::Text(format!("{}@x.io", name.to_lowercase()))),
        ("address_id", address_id),
        ("account_id", Value::BigInt(account_id)),
        ("prior_address_ids", prior),
    ])
}

fn address(id: i64, city: &str, account_id: i64) -> Row {
    Row::from_pairs([
        ("id", Value::BigInt(id)),
        ("city", Value::Text(city.to_string())),
        ("account_id", Value::BigInt(account_id)),
    ])
}

fn pet(id: i64, owner_id: i64, kind: &str) -> Row {
    Row::from_pairs([
        ("id", Value::BigInt(id)),
        ("owner_id", Value::BigInt(owner_id)),
        ("kind", Value::Text(kind.to_string())),
    ])
}
