mod common;

use bson::doc;
use pretty_assertions::assert_eq;

use common::{Person, new_person, person};
use doclens::{
    backend::StoreBackend,
    batch::Batch,
    document::{Converter, SerdeConverter, decode, encode},
    error::{DocumentStoreError, DocumentStoreResult},
    failure::{Failure, FailureKind},
    memory::InMemoryStore,
    prelude::WriteSummary,
    store::DocumentStore,
};

fn store() -> DocumentStore<InMemoryStore> {
    DocumentStore::new(InMemoryStore::new())
}

#[test]
fn records_round_trip_through_the_serde_converter() {
    let converter = SerdeConverter::<Person>::new();

    for record in [
        new_person("Person A", 30, &["x", "y"]),
        new_person("", 0, &[]),
        new_person("Ünïcode", -5, &[""]),
    ] {
        let document = converter.to_document(&record).unwrap();
        assert_eq!(document.get_str("_id").unwrap(), record.id.as_str());
        assert_eq!(converter.from_document(document).unwrap(), record);
    }
}

#[test]
fn decode_errors_name_the_missing_field() {
    let converter = SerdeConverter::<Person>::new();
    let error = converter
        .from_document(doc! { "_id": "p-1", "age": 3 })
        .unwrap_err();

    assert_eq!(error.decode_field(), Some("name"));
}

#[tokio::test]
async fn inserted_records_can_be_read_back() {
    let store = store();
    let people = store.typed_collection::<Person>();
    let a = new_person("A", 30, &[]);
    let b = new_person("B", 20, &[]);

    people.insert_many(vec![a.clone(), b.clone()]).await.unwrap();

    assert_eq!(people.get(&a.id).await.unwrap(), Some(a.clone()));
    assert_eq!(people.by_ids([&b.id, &a.id]).await.unwrap(), vec![b.clone(), a.clone()]);
    assert_eq!(people.all().await.unwrap(), vec![a.clone(), b.clone()]);
    assert_eq!(people.count().await.unwrap(), 2);
    assert_eq!(people.count_where(person::age().lt(25)).await.unwrap(), 1);
    assert_eq!(people.find(person::name().eq("A")).await.unwrap(), vec![a]);
}

#[tokio::test]
async fn duplicate_primary_keys_are_classified() {
    let store = store();
    let people = store.typed_collection::<Person>();
    let a = new_person("A", 30, &[]);

    people.insert(a.clone()).await.unwrap();
    let failure = people.insert(a).await.unwrap_err();

    assert_eq!(failure.kind(), FailureKind::DuplicateKey);
}

#[tokio::test]
async fn unique_index_violations_are_classified() {
    let store = store();
    let people = store.typed_collection::<Person>();
    people.add_index(&person::name(), true).await.unwrap();

    people.insert(new_person("A", 30, &[])).await.unwrap();
    let failure = people.insert(new_person("A", 31, &[])).await.unwrap_err();

    assert!(matches!(
        failure,
        Failure::DuplicateKey(DocumentStoreError::Native { code: Some(11000), .. })
    ));
    assert_eq!(people.count().await.unwrap(), 1);
}

#[tokio::test]
async fn updating_a_missing_record_reports_no_match() {
    let store = store();
    let people = store.typed_collection::<Person>();

    let failure = people.update(new_person("A", 30, &[])).await.unwrap_err();
    assert_eq!(failure.kind(), FailureKind::NoMatchingDocument);

    let mut a = new_person("A", 30, &[]);
    people.insert(a.clone()).await.unwrap();
    a.age = 31;
    people.update(a.clone()).await.unwrap();
    assert_eq!(people.get(&a.id).await.unwrap(), Some(a));
}

#[tokio::test]
async fn upsert_is_idempotent() {
    let store = store();
    let people = store.typed_collection::<Person>();
    let a = new_person("A", 30, &["x"]);

    people.upsert(a.clone()).await.unwrap();
    let once = people.all().await.unwrap();

    people.upsert(a.clone()).await.unwrap();
    let twice = people.all().await.unwrap();

    assert_eq!(once, vec![a.clone()]);
    assert_eq!(once, twice);

    let summary = people.upsert_many(vec![a]).await.unwrap();
    assert_eq!(summary, WriteSummary { matched: 1, ..Default::default() });
}

#[tokio::test]
async fn deletes_report_whether_records_existed() {
    let store = store();
    let people = store.typed_collection::<Person>();
    let a = new_person("A", 30, &[]);
    let b = new_person("B", 20, &[]);
    people.insert_many(vec![a.clone(), b.clone()]).await.unwrap();

    assert!(people.delete(&a.id).await.unwrap());
    assert!(!people.delete(&a.id).await.unwrap());
    assert_eq!(people.delete_many([&a.id, &b.id]).await.unwrap(), 1);
    assert_eq!(people.count().await.unwrap(), 0);
}

#[tokio::test]
async fn batches_execute_in_order() {
    let store = store();
    let people = store.typed_collection::<Person>();
    let mut a = new_person("A", 30, &[]);
    let b = new_person("B", 20, &[]);
    let c = new_person("C", 40, &[]);

    let batch = Batch::new().insert(a.clone()).insert(b.clone());
    a.age = 99;
    let batch = batch.update(a.clone()).delete(b.id.clone()).upsert(c.clone());
    assert_eq!(batch.len(), 5);

    let summary = people.execute(&batch).await.unwrap();
    assert_eq!(
        summary,
        WriteSummary {
            inserted: 2,
            matched: 1,
            modified: 1,
            upserted: 1,
            deleted: 1,
        }
    );
    assert_eq!(people.all().await.unwrap(), vec![a, c]);
}

#[tokio::test]
async fn failing_batches_keep_earlier_writes() {
    let store = store();
    let people = store.typed_collection::<Person>();
    let a = new_person("A", 30, &[]);

    let batch = Batch::new().insert(a.clone()).insert(a.clone()).insert(new_person("B", 1, &[]));
    let failure = people.execute(&batch).await.unwrap_err();

    assert_eq!(failure.kind(), FailureKind::DuplicateKey);
    assert_eq!(people.all().await.unwrap(), vec![a]);
}

/// Stores the name under another key and tags as a comma separated string.
struct LegacyPersonConverter;

impl Converter<Person> for LegacyPersonConverter {
    fn to_document(&self, person: &Person) -> DocumentStoreResult<bson::Document> {
        Ok(doc! {
            "_id": encode::value(&person.id)?,
            "full_name": person.name.as_str(),
            "age": person.age,
            "tags": person.tags.join(","),
        })
    }

    fn from_document(&self, document: bson::Document) -> DocumentStoreResult<Person> {
        let tags: Option<String> = decode::optional(&document, "tags")?;

        Ok(Person {
            id: decode::required(&document, "_id")?,
            name: decode::required(&document, "full_name")?,
            age: decode::required(&document, "age")?,
            tags: tags
                .filter(|t| !t.is_empty())
                .map(|t| t.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }
}

#[tokio::test]
async fn custom_converters_shape_the_stored_documents() {
    let store = store();
    let people = store.typed_collection_with::<Person, _>(LegacyPersonConverter);
    let a = new_person("A", 30, &["x", "y"]);

    people.insert(a.clone()).await.unwrap();

    let raw = store.backend().find_documents(None, "people").await.unwrap();
    assert_eq!(
        raw,
        vec![doc! { "_id": a.id.as_str(), "full_name": "A", "age": 30, "tags": "x,y" }]
    );
    assert_eq!(people.get(&a.id).await.unwrap(), Some(a));

    let error = LegacyPersonConverter
        .from_document(doc! { "_id": "p-1", "full_name": "A", "age": "old" })
        .unwrap_err();
    assert_eq!(error.decode_field(), Some("age"));
}
