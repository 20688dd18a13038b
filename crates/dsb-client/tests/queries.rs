//! Queries, iteration, and ID allocation through the client.

use dsb_client::{
    Client, ClientConfig, Context, DatastoreError, InMemoryDriver, Key, PropertyList, Query, Value,
};

fn seeded() -> Client {
    let client = Client::new(InMemoryDriver::new(), ClientConfig::new("proj"));
    let ctx = Context::background();
    let list = Key::name("List", "inbox");
    let keys: Vec<Key> = (1..=4)
        .map(|id| Key::id("Task", id).with_parent(list.clone()))
        .collect();
    let entities: Vec<PropertyList> = (1..=4i64)
        .map(|p| {
            PropertyList::new()
                .with("priority", p)
                .with("done", p % 2 == 0)
        })
        .collect();
    client.put_multi(&ctx, &keys, &entities).unwrap();
    client
        .put(&ctx, &Key::id("Task", 9), &PropertyList::new().with("priority", 9i64))
        .unwrap();
    client
}

#[test]
fn iterator_is_idempotent_after_done() {
    let client = seeded();
    let ctx = Context::background();
    let query = Query::new("Task").ancestor(Key::name("List", "inbox")).order("-priority");
    let mut it = client.run(&ctx, &query);
    let mut dst = PropertyList::new();

    let mut ids = Vec::new();
    loop {
        match it.next(&mut dst) {
            Ok(key) => {
                assert_eq!(dst.get("priority"), Some(&key.int_id().into()));
                ids.push(key.int_id());
            }
            Err(DatastoreError::Done) => break,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(ids, vec![4, 3, 2, 1]);

    for _ in 0..5 {
        assert_eq!(it.next(&mut dst), Err(DatastoreError::Done));
    }
}

#[test]
fn get_all_appends_and_count_agrees() {
    let client = seeded();
    let ctx = Context::background();
    let query = Query::new("Task").filter("done =", false);

    let mut dst = vec![PropertyList::new().with("marker", true)];
    let keys = client.get_all(&ctx, &query, &mut dst).unwrap();
    // Task 9 has no "done" property and never matches the filter.
    assert_eq!(keys.len(), 2);
    assert_eq!(dst.len(), 3);
    assert!(keys.iter().all(|k| k.int_id() % 2 == 1));
    assert_eq!(client.count(&ctx, &query).unwrap(), 2);
}

#[test]
fn keys_only_query_leaves_entities_empty() {
    let client = seeded();
    let ctx = Context::background();
    let query = Query::new("Task").keys_only().limit(2);
    let results: Vec<(Key, PropertyList)> = client
        .run(&ctx, &query)
        .entities()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, entity)| entity.is_empty()));
}

#[test]
fn malformed_query_fails_on_first_next() {
    let client = seeded();
    let ctx = Context::background();
    let mut it = client.run(&ctx, &Query::new("Task").filter("priority", 1i64));
    assert!(matches!(
        it.next(&mut PropertyList::new()),
        Err(DatastoreError::InvalidArgument(_))
    ));
}

#[test]
fn allocate_ids_reserves_distinct_ids() {
    let client = Client::new(InMemoryDriver::new(), ClientConfig::new("proj"));
    let ctx = Context::background();
    let keys = client
        .allocate_ids(&ctx, &[client.incomplete_key("Task"), client.incomplete_key("Task")])
        .unwrap();
    assert!(keys.iter().all(|k| !k.is_incomplete()));
    assert_ne!(keys[0], keys[1]);

    let err = client.allocate_ids(&ctx, &[Key::id("Task", 5)]).unwrap_err();
    assert!(matches!(err, DatastoreError::InvalidArgument(_)));
}

#[test]
fn ordering_over_mixed_value_types() {
    let client = Client::new(InMemoryDriver::new(), ClientConfig::new("proj"));
    let ctx = Context::background();
    let keys: Vec<Key> = (1..=60).map(|id| Key::id("Reading", id)).collect();
    let entities: Vec<PropertyList> = (1..=60i64)
        .map(|id| match id % 3 {
            0 => PropertyList::new().with("p", id),
            1 => PropertyList::new().with("p", id as f64 - 0.5),
            _ => PropertyList::new().with("p", format!("v{id}")),
        })
        .collect();
    client.put_multi(&ctx, &keys, &entities).unwrap();

    let mut dst = Vec::new();
    let found = client
        .get_all(&ctx, &Query::new("Reading").order("p"), &mut dst)
        .unwrap();
    assert_eq!(found.len(), 60);
    // Numbers come first in numeric order, then strings.
    let numbers: Vec<f64> = dst[..40]
        .iter()
        .map(|e| match e.get("p") {
            Some(Value::Int(n)) => *n as f64,
            Some(Value::Float(f)) => *f,
            other => panic!("expected a number, got {other:?}"),
        })
        .collect();
    assert!(numbers.windows(2).all(|w| w[0] <= w[1]));
    assert!(dst[40..]
        .iter()
        .all(|e| matches!(e.get("p"), Some(Value::String(_)))));
}
