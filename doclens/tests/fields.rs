mod common;

use bson::doc;
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use common::{Person, new_person, person};
use doclens::{
    Fields,
    document::SerdeConverter,
    field::Field,
    memory::InMemoryStore,
    monitor::{ChangeEvent, ChangeHandler, ChangeOperation, CollectionMonitor},
    render,
    store::DocumentStore,
};

#[derive(Debug, Serialize, Deserialize, Fields)]
#[serde(rename_all = "camelCase")]
struct Address {
    street_name: String,
    #[serde(rename = "zip")]
    postal_code: String,
    #[serde(skip)]
    cached: Option<String>,
    r#type: String,
}

#[derive(Debug, Serialize, Deserialize, Fields)]
struct Customer {
    name: String,
    address: Address,
}

#[test]
fn derived_fields_use_the_wire_names() {
    assert_eq!(person::FIELDS, &["_id", "name", "age", "tags"]);
    assert_eq!(person::id().name(), "_id");

    assert_eq!(address::FIELDS, &["streetName", "zip", "type"]);
    assert_eq!(address::street_name().name(), "streetName");
    assert_eq!(address::postal_code().name(), "zip");
    assert_eq!(address::r#type().name(), "type");
}

#[test]
fn derived_fields_compose_into_filters() {
    let zip: Field<String> = customer::address().nested("zip");
    let filter = person::tags().contains("x") & zip.is_in(["1000", "2000"]);

    assert_eq!(
        render::expr(&filter).unwrap(),
        doc! {
            "$and": [
                { "tags": "x" },
                { "address.zip": { "$in": ["1000", "2000"] } },
            ]
        }
    );
}

#[tokio::test]
async fn monitors_observe_collection_writes() {
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(backend.clone());
    let people = store.typed_collection::<Person>();

    let monitor = backend.monitor("people").await;
    let seen: Arc<Mutex<Vec<ChangeEvent>>> = Arc::default();
    let sink = seen.clone();
    let handler: ChangeHandler = Arc::new(move |event: &ChangeEvent| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });
    monitor.attach(handler).await;

    let a = new_person("A", 30, &[]);
    people.insert(a.clone()).await.unwrap();
    assert!(seen.lock().unwrap().is_empty());

    monitor.start().await.unwrap();
    assert!(monitor.is_running());

    let b = new_person("B", 20, &[]);
    people.insert(b.clone()).await.unwrap();
    people.delete(&a.id).await.unwrap();

    monitor.stop().await.unwrap();
    people.delete(&b.id).await.unwrap();

    let events = seen.lock().unwrap().clone();
    assert_eq!(
        events.iter().map(|e| e.operation).collect::<Vec<_>>(),
        vec![ChangeOperation::Insert, ChangeOperation::Delete]
    );
    assert_eq!(
        events[0].decode(&SerdeConverter::<Person>::new()).unwrap().unwrap(),
        b
    );
    assert_eq!(events[1].document_id.as_deref(), Some(a.id.as_str()));
}
