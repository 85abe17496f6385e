use super::*;
use crate::{variables, Argument, Field};
use serde_json::{json, Map};

fn dog_query() -> Document {
    Document::query(
        "GetDog",
        vec![Field::object(
            "dog",
            vec![
                Field::typename(),
                Field::scalar("id"),
                Field::scalar("breed"),
                Field::scalar("displayImage")
            ]
        )
        .arg("breed", Argument::variable("breed"))]
    )
}

fn pug() -> Variables {
    variables! { "breed" => "pug" }
}

fn pug_response() -> Value {
    json!({
        "dog": {
            "__typename": "Dog",
            "id": 1,
            "breed": "pug",
            "displayImage": "pug.jpg"
        }
    })
}

#[test]
fn responses_are_normalized_by_typename_and_id() {
    let mut store = Store::default();
    let changed = store.write(&dog_query(), &pug(), &pug_response()).unwrap();

    assert!(changed.contains(&EntityRef::root()));
    assert!(changed.contains(&EntityRef::new("Dog:1")));

    let dog = store.entity(&EntityRef::new("Dog:1")).unwrap();
    assert_eq!(dog.typename.as_deref(), Some("Dog"));
    assert_eq!(
        dog.fields.get("displayImage"),
        Some(&FieldValue::Scalar(json!("pug.jpg")))
    );

    let root = store.entity(&EntityRef::root()).unwrap();
    assert_eq!(
        root.fields.get(r#"dog({"breed":"pug"})"#),
        Some(&FieldValue::Link(Link::Ref(EntityRef::new("Dog:1"))))
    );

    let read = store.read_query(&dog_query(), &pug());
    assert!(read.complete);
    assert_eq!(read.data, Some(pug_response()));
    assert_eq!(read.dependencies.len(), 2);
}

#[test]
fn equal_rewrites_change_nothing() {
    let mut store = Store::default();
    store.write(&dog_query(), &pug(), &pug_response()).unwrap();

    let changed = store.write(&dog_query(), &pug(), &pug_response()).unwrap();
    assert!(changed.is_empty());

    let mut updated = pug_response();
    updated["dog"]["displayImage"] = json!("pug2.jpg");
    let changed = store.write(&dog_query(), &pug(), &updated).unwrap();
    assert_eq!(changed.into_iter().collect::<Vec<_>>(), vec![EntityRef::new("Dog:1")]);
}

#[test]
fn entities_are_shared_between_queries() {
    let mut store = Store::default();
    store.write(&dog_query(), &pug(), &pug_response()).unwrap();

    let by_id = Document::query(
        "DogById",
        vec![Field::object(
            "dogById",
            vec![Field::typename(), Field::scalar("id"), Field::scalar("displayImage")]
        )
        .arg("id", Argument::literal(1))]
    );
    store
        .write(
            &by_id,
            &Variables::new(),
            &json!({ "dogById": { "__typename": "Dog", "id": 1, "displayImage": "new.jpg" } })
        )
        .unwrap();

    let read = store.read_query(&dog_query(), &pug());
    assert!(read.complete);
    assert_eq!(read.data.unwrap()["dog"]["displayImage"], "new.jpg");
}

#[test]
fn conflicting_typenames_reject_the_whole_write() {
    let mut keys = KeyConfig::default();
    // Ids are only unique per type, so keying by id alone lets a Cat collide with a Dog
    keys.data_id = Some(Arc::new(|_: Option<&str>, object: &Map<String, Value>| {
        object.get("id").map(|id| format!("Animal:{}", id))
    }));
    let mut store = Store::new(keys);
    store.write(&dog_query(), &pug(), &pug_response()).unwrap();

    let cat = json!({
        "dog": { "__typename": "Cat", "id": 1, "breed": "pug", "displayImage": "cat.jpg" }
    });
    let result = store.write(&dog_query(), &pug(), &cat);

    match result {
        Err(QueryError::NormalizationConflict { entity, .. }) => assert_eq!(entity, "Animal:1"),
        other => panic!("expected a conflict, got {:?}", other)
    }
    let read = store.read_query(&dog_query(), &pug());
    assert_eq!(read.data.unwrap()["dog"]["displayImage"], "pug.jpg");
}

#[test]
fn scalars_where_objects_are_selected_conflict() {
    let mut store = Store::default();
    let result = store.write(&dog_query(), &pug(), &json!({ "dog": 5 }));
    assert!(matches!(result, Err(QueryError::NormalizationConflict { .. })));
    assert!(store.is_empty());
}

#[test]
fn evicted_entities_leave_dangling_references() {
    let mut store = Store::default();
    store.write(&dog_query(), &pug(), &pug_response()).unwrap();

    store.evict(&EntityRef::new("Dog:1"));
    let read = store.read_query(&dog_query(), &pug());

    assert!(!read.complete);
    assert!(read.dangling.contains(&EntityRef::new("Dog:1")));
}

#[test]
fn invalidated_entities_make_reads_incomplete_until_rewritten() {
    let mut store = Store::default();
    let query = dog_query();
    store.write(&query, &pug(), &pug_response()).unwrap();

    let fingerprint = Fingerprint::new(&query, &pug());
    let read = store.read_query(&query, &pug());
    store.track(fingerprint.clone(), read.dependencies);

    let dependents = store.invalidate(&EntityRef::new("Dog:1"));
    assert_eq!(dependents.into_iter().collect::<Vec<_>>(), vec![fingerprint]);
    assert!(store.is_stale(&EntityRef::new("Dog:1")));

    let read = store.read_query(&query, &pug());
    assert!(!read.complete);
    assert!(read.data.is_some());

    // Same data, but it now counts as a change because it revalidates the entity
    let changed = store.write(&query, &pug(), &pug_response()).unwrap();
    assert!(changed.contains(&EntityRef::new("Dog:1")));
    assert!(store.read_query(&query, &pug()).complete);
}

#[test]
fn missing_fields_make_reads_incomplete() {
    let mut store = Store::default();
    store
        .write(
            &dog_query(),
            &pug(),
            &json!({ "dog": { "__typename": "Dog", "id": 1, "breed": "pug" } })
        )
        .unwrap();

    let read = store.read_query(&dog_query(), &pug());
    assert!(!read.complete);
    assert_eq!(read.data.unwrap()["dog"]["breed"], "pug");
}

#[test]
fn unkeyed_objects_are_stored_inline() {
    let query = Document::query(
        "Owner",
        vec![Field::object(
            "owner",
            vec![Field::scalar("name"), Field::object("address", vec![Field::scalar("city")])]
        )]
    );
    let response = json!({ "owner": { "name": "Ann", "address": { "city": "Oslo" } } });

    let mut store = Store::default();
    store.write(&query, &Variables::new(), &response).unwrap();

    assert_eq!(store.len(), 1);
    let read = store.read_query(&query, &Variables::new());
    assert!(read.complete);
    assert_eq!(read.data, Some(response));
}

#[test]
fn aliases_and_arguments_are_kept_apart() {
    let query = Document::query(
        "TwoDogs",
        vec![
            Field::object("dog", vec![Field::typename(), Field::scalar("id")])
                .alias("first")
                .arg("breed", Argument::literal("pug")),
            Field::object("dog", vec![Field::typename(), Field::scalar("id")])
                .alias("second")
                .arg("breed", Argument::literal("husky"))
        ]
    );
    let response = json!({
        "first": { "__typename": "Dog", "id": 1 },
        "second": { "__typename": "Dog", "id": 2 }
    });

    let mut store = Store::default();
    store.write(&query, &Variables::new(), &response).unwrap();

    let root = store.entity(&EntityRef::root()).unwrap();
    assert_eq!(root.fields.len(), 2);
    assert_eq!(store.read_query(&query, &Variables::new()).data, Some(response));
}

#[test]
fn lists_of_entities() {
    let query = Document::query(
        "Dogs",
        vec![Field::object("dogs", vec![Field::typename(), Field::scalar("id")])]
    );
    let response = json!({ "dogs": [{ "__typename": "Dog", "id": 1 }, { "__typename": "Dog", "id": 2 }] });

    let mut store = Store::default();
    store.write(&query, &Variables::new(), &response).unwrap();
    store.evict(&EntityRef::new("Dog:1"));
    store.evict(&EntityRef::new("Dog:2"));

    let read = store.read_query(&query, &Variables::new());
    assert!(!read.complete);
    assert_eq!(read.dangling.len(), 2);
}

#[test]
fn gc_removes_unreachable_entities() {
    let mut store = Store::default();
    store.write(&dog_query(), &pug(), &pug_response()).unwrap();

    let mut moved = pug_response();
    moved["dog"]["id"] = json!(2);
    store.write(&dog_query(), &pug(), &moved).unwrap();

    let removed = store.gc();
    assert_eq!(removed.into_iter().collect::<Vec<_>>(), vec![EntityRef::new("Dog:1")]);
    assert!(store.entity(&EntityRef::new("Dog:2")).is_some());
}

#[test]
fn snapshots_hydrate_a_fresh_store() {
    let mut store = Store::default();
    store.write(&dog_query(), &pug(), &pug_response()).unwrap();

    let json = serde_json::to_string(&store.extract()).unwrap();
    let mut restored = Store::default();
    let touched = restored.restore(serde_json::from_str(&json).unwrap());

    assert_eq!(touched.len(), 2);
    let read = restored.read_query(&dog_query(), &pug());
    assert!(read.complete);
    assert_eq!(read.data, Some(pug_response()));
}

#[test]
fn registered_queries_can_be_read_by_fingerprint() {
    let mut store = Store::default();
    let query = Arc::new(dog_query());
    let fingerprint = Fingerprint::new(&query, &pug());

    assert_eq!(store.read(&fingerprint).data, None);
    store.register(fingerprint.clone(), query.clone(), pug());
    store.write(&query, &pug(), &pug_response()).unwrap();
    assert!(store.read(&fingerprint).complete);

    store.forget(&fingerprint);
    assert!(!store.read(&fingerprint).complete);
}

#[test]
fn queries_with_colliding_hashes_are_kept_apart() {
    let mut store = Store::default();
    let query = Arc::new(dog_query());
    let ab = variables! { "breed" => "ab" };
    let ba = variables! { "breed" => "bA" };
    let first = Fingerprint::new(&query, &ab);
    let second = Fingerprint::new(&query, &ba);
    assert_eq!(first.as_u64(), second.as_u64());

    store.register(first.clone(), query.clone(), ab.clone());
    store.register(second.clone(), query.clone(), ba);
    store.write(&query, &ab, &pug_response()).unwrap();

    assert!(store.read(&first).complete);
    assert!(!store.read(&second).complete);
}
