#![allow(dead_code)]

use async_trait::async_trait;
use bson::Document;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

use doclens::{
    backend::{DocumentCursor, StoreBackend, WriteModel, WriteSummary},
    document::Record,
    error::{DocumentStoreError, DocumentStoreResult},
    failure::SAMPLE_NO_NON_DUPLICATE_CODE,
    id::Id,
    memory::InMemoryStore,
    pipeline::{Pipeline, Stage},
    query::Expr,
    Fields,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Fields)]
pub struct Person {
    #[serde(rename = "_id")]
    pub id: Id<Person>,
    pub name: String,
    pub age: i32,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Record for Person {
    fn id(&self) -> &Id<Self> {
        &self.id
    }

    fn collection_name() -> &'static str {
        "people"
    }
}

pub fn new_person(name: &str, age: i32, tags: &[&str]) -> Person {
    Person {
        id: Id::new(),
        name: name.to_string(),
        age,
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

/// Backend whose `$sample` pipelines fail with the duplicate-sample code a set number of
/// times before succeeding.
#[derive(Debug, Default)]
pub struct FlakySampleBackend {
    pub inner: InMemoryStore,
    pub failures_left: AtomicU32,
    pub sample_calls: AtomicU32,
}

impl FlakySampleBackend {
    pub fn failing(times: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(times),
            ..Default::default()
        }
    }

    pub fn sample_calls(&self) -> u32 {
        self.sample_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreBackend for FlakySampleBackend {
    async fn insert_documents(&self, documents: Vec<(String, Document)>, collection: &str) -> DocumentStoreResult<()> {
        self.inner.insert_documents(documents, collection).await
    }

    async fn replace_documents(
        &self,
        documents: Vec<(String, Document)>,
        collection: &str,
        upsert: bool,
    ) -> DocumentStoreResult<WriteSummary> {
        self.inner.replace_documents(documents, collection, upsert).await
    }

    async fn delete_documents(&self, ids: Vec<String>, collection: &str) -> DocumentStoreResult<u64> {
        self.inner.delete_documents(ids, collection).await
    }

    async fn get_documents(&self, ids: Vec<String>, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        self.inner.get_documents(ids, collection).await
    }

    async fn find_documents(&self, filter: Option<Expr>, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        self.inner.find_documents(filter, collection).await
    }

    async fn count_documents(&self, filter: Option<Expr>, collection: &str) -> DocumentStoreResult<u64> {
        self.inner.count_documents(filter, collection).await
    }

    async fn aggregate(&self, pipeline: Pipeline, collection: &str) -> DocumentStoreResult<DocumentCursor> {
        let samples = pipeline
            .stages()
            .iter()
            .any(|stage| matches!(stage, Stage::Sample(_)));

        if samples {
            self.sample_calls.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();

            if failing {
                return Err(DocumentStoreError::native(
                    Some(SAMPLE_NO_NON_DUPLICATE_CODE),
                    "$sample stage could not find a non-duplicate document",
                ));
            }
        }

        self.inner.aggregate(pipeline, collection).await
    }

    async fn bulk_write(&self, models: Vec<WriteModel>, collection: &str) -> DocumentStoreResult<WriteSummary> {
        self.inner.bulk_write(models, collection).await
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.inner.create_collection(name).await
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.inner.drop_collection(name).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn add_index(&self, collection: &str, field: &str, unique: bool) -> DocumentStoreResult<()> {
        self.inner.add_index(collection, field, unique).await
    }

    async fn drop_index(&self, collection: &str, field: &str) -> DocumentStoreResult<()> {
        self.inner.drop_index(collection, field).await
    }
}
