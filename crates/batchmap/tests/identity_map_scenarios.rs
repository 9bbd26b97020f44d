//! End-to-end identity map behavior against the in-memory store.

use batchmap::memory::{MemoryBackend, MemoryConnectionFactory, MemoryRepository};
use batchmap::prelude::*;
use batchmap::{AssociationErrorKind, QueryErrorKind};

struct Fixture {
    store: Arc<MemoryRepository>,
    backend: Arc<MemoryBackend>,
    schema: Arc<Schema>,
}

impl Fixture {
    fn new() -> Self {
        let schema = Schema::builder()
            .entity(
                EntitySchema::new("person")
                    .table("people")
                    .identity("id")
                    .association(Association::to_one("address", "address", "address_id"))
                    .association(
                        Association::to_many("badges", "badge", ["holder_id", "holder_kind"])
                            .primary_key(["id", "kind"]),
                    )
                    .context(
                        "card",
                        Context::new()
                            .select(["email", "address_id"])
                            .track(["address"]),
                    ),
            )
            .entity(
                EntitySchema::new("address")
                    .table("addresses")
                    .identity("id")
                    .association(Association::to_many("residents", "person", "address_id")),
            )
            .entity(
                EntitySchema::new("badge")
                    .table("badges")
                    .identity(["holder_id", "holder_kind"])
                    .exclude_scope("tenant"),
            )
            .build()
            .unwrap();

        let store = Arc::new(MemoryRepository::new());
        store.insert_many(
            "people",
            [
                person(1, Value::BigInt(10), 1),
                person(2, Value::BigInt(10), 1),
                person(3, Value::Null, 2),
            ],
        );
        store.insert_many(
            "addresses",
            [
                Row::from_pairs([("id", Value::BigInt(10)), ("tenant_id", Value::BigInt(1))]),
                Row::from_pairs([("id", Value::BigInt(20)), ("tenant_id", Value::BigInt(2))]),
            ],
        );
        store.insert(
            "badges",
            Row::from_pairs([
                ("holder_id", Value::BigInt(1)),
                ("holder_kind", Value::Text("staff".into())),
                ("label", Value::Text("gold".into())),
            ]),
        );

        Self {
            store,
            backend: Arc::new(MemoryBackend::new()),
            schema: Arc::new(schema),
        }
    }

    fn map(&self) -> IdentityMap {
        self.map_with(IdentityMapConfig::default())
    }

    fn map_with(&self, config: IdentityMapConfig) -> IdentityMap {
        IdentityMap::builder(Arc::clone(&self.schema))
            .repository(
                "default",
                Arc::new(MemoryConnectionFactory::new(Arc::clone(&self.store))),
                self.backend.clone(),
            )
            .config(config)
            .build()
    }

    fn fetches(&self, entity: &str) -> usize {
        self.backend.fetches_for(entity).len()
    }
}

fn person(id: i64, address_id: Value, tenant_id: i64) -> Row {
    Row::from_pairs([
        ("id", Value::BigInt(id)),
        ("kind", Value::Text("staff".into())),
        ("email", Value::Text(format!("p{id}@example.com"))),
        ("address_id", address_id),
        ("tenant_id", Value::BigInt(tenant_id)),
    ])
}

#[test]
fn shared_addresses_are_fetched_once() {
    let fixture = Fixture::new();
    let mut map = fixture.map();

    let people = map
        .load("person", |q| {
            q.track(["address"]);
        })
        .unwrap();
    map.finalize().unwrap();

    let address_fetches = fixture.backend.fetches_for("address");
    assert_eq!(address_fetches.len(), 1);
    assert_eq!(address_fetches[0].values, vec![Key::from(10i64)]);
    assert_eq!(map.all("address").unwrap().len(), 1);

    let first = map.related(&people[0], "address").unwrap();
    let second = map.related(&people[1], "address").unwrap();
    assert!(Arc::ptr_eq(first.one().unwrap(), second.one().unwrap()));
    assert!(matches!(
        map.related(&people[2], "address").unwrap(),
        Related::One(None)
    ));
    assert_eq!(fixture.fetches("address"), 1);
}

#[test]
fn colliding_records_resolve_to_the_resident_one() {
    let fixture = Fixture::new();
    let mut map = fixture.map();
    let loaded = map.load("person", |_| {}).unwrap();

    let copy = Arc::new(Record::new(
        Arc::clone(fixture.schema.entity("person").unwrap()),
        person(1, Value::BigInt(99), 1),
    ));
    let resident = map.add_record(copy).unwrap();
    assert!(Arc::ptr_eq(&resident, &loaded[0]));
    assert_eq!(resident.get("address_id").unwrap(), Value::BigInt(10));
    assert_eq!(map.all("person").unwrap().len(), 3);
}

#[test]
fn staging_twice_fetches_once() {
    let fixture = Fixture::new();
    let mut map = fixture.map();
    map.stage("address", "id", [20i64]).unwrap();
    map.stage("address", "id", [20i64]).unwrap();
    assert_eq!(map.get_staged("address", "id").unwrap(), vec![Key::from(20i64)]);

    map.finalize().unwrap();
    assert_eq!(fixture.fetches("address"), 1);
    assert!(map.get("address", "id", 20i64).unwrap().is_some());
}

#[test]
fn staging_by_email_resolves_identities_first() {
    let fixture = Fixture::new();
    let mut map = fixture.map();
    map.stage("person", "email", ["p2@example.com"]).unwrap();
    map.finalize().unwrap();

    let fetches = fixture.backend.fetches_for("person");
    assert_eq!(fetches.len(), 2);
    assert_eq!(fetches[0].key, Some(KeyField::single("email")));
    assert_eq!(fetches[1].key, Some(KeyField::single("id")));
    assert_eq!(fetches[1].values, vec![Key::from(2i64)]);

    let found = map
        .all_where("person", "email", &[Key::from("p2@example.com")])
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[test]
fn absent_values_stay_absent_without_refetching() {
    let fixture = Fixture::new();
    let mut map = fixture.map();
    map.stage("address", "id", [404i64]).unwrap();
    map.finalize().unwrap();

    for _ in 0..3 {
        assert!(map.get("address", "id", 404i64).unwrap().is_none());
        map.stage("address", "id", [404i64]).unwrap();
        map.finalize().unwrap();
    }
    assert_eq!(fixture.fetches("address"), 1);
    assert!(map.all_where("address", "id", &[Key::from(404i64)]).unwrap().is_empty());
}

#[test]
fn mutual_tracking_terminates() {
    let fixture = Fixture::new();
    let mut map = fixture.map();
    map.load("person", |q| {
        q.track_with("address", |q| {
            q.track_with("residents", |q| {
                q.track(["address"]);
            });
        });
    })
    .unwrap();
    map.finalize().unwrap();

    assert_eq!(map.all("person").unwrap().len(), 3);
    assert_eq!(map.all("address").unwrap().len(), 1);
    assert!(map.get_staged("person", "address_id").unwrap().is_empty());
    assert!(map.get_staged("address", "id").unwrap().is_empty());
}

#[test]
fn batched_results_match_an_unbatched_fetch() {
    let fixture = Fixture::new();
    for id in 100..137 {
        fixture.store.insert(
            "addresses",
            Row::from_pairs([("id", Value::BigInt(id)), ("tenant_id", Value::BigInt(1))]),
        );
    }
    let wanted: Vec<i64> = (95..140).collect();

    let mut batched = fixture.map_with(IdentityMapConfig::new().multi_get_batch_size(8));
    batched.stage("address", "id", wanted.clone()).unwrap();
    batched.finalize().unwrap();
    assert_eq!(fixture.fetches("address"), 6);

    let mut whole = fixture.map();
    whole.stage("address", "id", wanted).unwrap();
    whole.finalize().unwrap();
    assert_eq!(fixture.fetches("address"), 7);

    let ids = |map: &IdentityMap| {
        let mut ids: Vec<i64> = map
            .all("address")
            .unwrap()
            .iter()
            .filter_map(|r| r.get("id").unwrap().as_i64())
            .collect();
        ids.sort_unstable();
        ids
    };
    assert_eq!(ids(&batched), ids(&whole));
    assert_eq!(ids(&whole).len(), 37);
}

#[test]
fn multi_get_restores_the_selection() {
    let fixture = Fixture::new();
    let mut map = fixture.map();
    let connection = map.connection("default").unwrap();

    let mut query = map.query("person").unwrap();
    query.select(["email"]);
    let before = query.selection().cloned();
    let rows = query
        .multi_get_raw(
            &connection,
            &KeyField::single("id"),
            &[Key::from(1i64), Key::from(2i64)],
            Some(&["tenant_id"][..]),
        )
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].contains_column("tenant_id"));
    assert_eq!(query.selection().cloned(), before);
}

#[test]
fn composite_identities_skip_partial_tuples() {
    let fixture = Fixture::new();
    let mut map = fixture.map();
    map.load("person", |q| {
        q.track(["badges"]);
    })
    .unwrap();
    map.stage(
        "badge",
        ["holder_id", "holder_kind"],
        [
            Key::composite(vec![Value::BigInt(2), Value::Null]),
            Key::composite(vec![Value::Null, Value::Text("staff".into())]),
        ],
    )
    .unwrap();

    // badges is keyed on the badge side, so staging goes through that field
    let staged = map.get_staged("badge", ["holder_id", "holder_kind"]).unwrap();
    assert_eq!(staged.len(), 3);
    map.finalize().unwrap();

    let gold = map
        .get(
            "badge",
            ["holder_id", "holder_kind"],
            Key::composite(vec![Value::BigInt(1), Value::Text("staff".into())]),
        )
        .unwrap();
    assert!(gold.is_some());
    assert!(
        map.get(
            "badge",
            ["holder_id", "holder_kind"],
            Key::composite(vec![Value::BigInt(3), Value::Text("staff".into())]),
        )
        .unwrap()
        .is_none()
    );
}

#[test]
fn filtered_to_one_tracking_is_rejected() {
    let fixture = Fixture::new();
    let mut map = fixture.map();
    map.load("person", |q| {
        q.track_with("address", |q| {
            q.filter(Filter::eq("tenant_id", 1));
        });
    })
    .unwrap();

    let err = map.finalize().unwrap_err();
    assert!(err.is_usage_error());
    match err {
        Error::Association(e) => {
            assert_eq!(e.kind, AssociationErrorKind::FilteredToOne);
            assert_eq!(e.association, "address");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn frozen_queries_refuse_to_run_again() {
    let fixture = Fixture::new();
    let mut map = fixture.map();
    map.load("address", |_| {}).unwrap();

    let connection = map.connection("default").unwrap();
    let queries = map.queries("address");
    assert_eq!(queries.len(), 1);
    assert!(queries[0].is_frozen());

    let mut query = map.query("address").unwrap();
    query.execute(&connection).unwrap();
    query.freeze();
    assert!(matches!(
        query.execute(&connection),
        Err(Error::FrozenQuery(_))
    ));
}

#[test]
fn scopes_restrict_every_query_unless_excluded() {
    let fixture = Fixture::new();
    let mut map = IdentityMap::builder(Arc::clone(&fixture.schema))
        .repository(
            "default",
            Arc::new(MemoryConnectionFactory::new(Arc::clone(&fixture.store))),
            fixture.backend.clone(),
        )
        .scope("tenant", "tenant_id", 2)
        .build();

    assert_eq!(map.load("person", |_| {}).unwrap().len(), 1);
    map.stage("address", "id", [10i64, 20]).unwrap();
    map.finalize().unwrap();
    assert!(map.get("address", "id", 10i64).unwrap().is_none());
    assert!(map.get("address", "id", 20i64).unwrap().is_some());

    assert_eq!(map.load("badge", |_| {}).unwrap().len(), 1);
    assert!(fixture.backend.fetches_for("person")[0]
        .description
        .contains("tenant_id = 2"));
}

#[test]
fn nested_loads_batch_each_level() {
    let fixture = Fixture::new();
    let mut map = fixture.map();
    let addresses = map
        .load("address", |q| {
            q.load_with("residents", |q| {
                q.load(["badges"]);
            });
        })
        .unwrap();

    assert_eq!(addresses.len(), 2);
    assert_eq!(map.all("person").unwrap().len(), 2);
    assert_eq!(map.all("badge").unwrap().len(), 1);
    assert_eq!(fixture.fetches("person"), 1);
    assert_eq!(fixture.fetches("badge"), 1);

    let residents = map.related(&addresses[0], "residents").unwrap().into_vec();
    assert_eq!(residents.len(), 2);
}

#[test]
fn contexts_select_and_track() {
    let fixture = Fixture::new();
    let mut map = fixture.map();
    let people = map
        .load("person", |q| {
            q.context("card");
        })
        .unwrap();
    assert!(people[0].has_field("email"));
    assert!(!people[0].has_field("tenant_id"));
    assert_eq!(map.get_staged("address", "id").unwrap().len(), 1);
}

#[test]
fn unknown_contexts_fail_on_fetch() {
    let fixture = Fixture::new();
    let mut map = fixture.map();
    let err = map
        .load("person", |q| {
            q.context("nonexistent");
        })
        .unwrap_err();
    assert_eq!(err.schema_kind(), Some(batchmap::SchemaErrorKind::UnknownContext));
}

#[test]
fn raw_filters_are_left_to_the_backend() {
    let fixture = Fixture::new();
    let mut map = fixture.map();
    let err = map
        .load("person", |q| {
            q.filter(Filter::raw("age > 30"));
        })
        .unwrap_err();
    assert!(!err.is_usage_error());
    match err {
        Error::Query(e) => assert_eq!(e.kind, QueryErrorKind::UnsupportedFilter),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn statistics_are_summed_per_entity_and_overall() {
    let fixture = Fixture::new();
    let mut map = fixture.map_with(IdentityMapConfig::new().log_statistics_on_clear(true));
    map.load("person", |q| {
        q.track(["address"]);
    })
    .unwrap();
    map.finalize().unwrap();
    map.load("address", |_| {}).unwrap();

    let stats = map.query_statistics().unwrap();
    let address = stats.entity("address").unwrap();
    assert_eq!(address.query_count, 2);
    assert_eq!(address.stats.multi_get, 1);
    assert_eq!(address.stats.execute, 1);
    assert_eq!(address.stats.records_loaded, 3);

    let total = stats.sum_totals();
    assert_eq!(total.query_count, 3);
    assert_eq!(total.stats.records_loaded, 6);
    assert_eq!(total.stats.datastore_interactions, 3);

    let json = serde_json::to_value(stats.sum_totals_by_entity()).unwrap();
    assert_eq!(json["person"]["records_loaded"], 3);

    map.clear().unwrap();
    assert!(map.query_statistics().unwrap().sum_totals_by_entity().is_empty());
}

#[test]
fn maps_are_confined_to_their_thread() {
    let fixture = Fixture::new();
    let mut map = fixture.map();
    map.load("person", |_| {}).unwrap();

    let outcome = std::thread::scope(|s| {
        s.spawn(|| matches!(map.get("person", "id", 1i64), Err(Error::Context(_))))
            .join()
            .unwrap()
    });
    assert!(outcome);
    assert!(map.get("person", "id", 1i64).unwrap().is_some());
}
