//! In-memory storage implementation for document stores.
//!
//! This module provides a backend that keeps every collection as an insertion-ordered list of
//! BSON documents behind an async-aware read-write lock. Unique indexes are enforced on every
//! write and violations are reported with the server's duplicate key code, so the typed layer
//! classifies them exactly as it would against MongoDB.

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::StreamExt;
use mea::rwlock::RwLock;
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

use doclens_core::{
    backend::{DocumentCursor, StoreBackend, StoreBackendBuilder, WriteModel, WriteSummary},
    error::{DocumentStoreError, DocumentStoreResult},
    monitor::{ChangeEvent, ChangeOperation},
    pipeline::Pipeline,
    query::Expr,
};

use crate::{
    aggregate,
    evaluator::{DocumentEvaluator, lookup, values_equal},
    monitor::{InMemoryMonitor, Subscribers},
};

const ID_FIELD: &str = "_id";
const DUPLICATE_KEY: i32 = 11000;
const INDEX_NOT_FOUND: i32 = 27;

/// An index declared on a collection field.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Index {
    field: String,
    unique: bool,
}

/// The documents and indexes of one collection.
#[derive(Debug, Clone, Default)]
struct CollectionState {
    documents: Vec<Document>,
    indexes: Vec<Index>,
}

fn document_id(document: &Document) -> Option<&str> {
    document.get_str(ID_FIELD).ok()
}

/// Makes sure `document` carries `id` as its `_id`, first in the document.
fn with_id(id: &str, document: Document) -> Document {
    if document_id(&document) == Some(id) {
        return document;
    }

    let mut keyed = doc! { ID_FIELD: id };
    keyed.extend(document.into_iter().filter(|(key, _)| key != ID_FIELD));
    keyed
}

impl CollectionState {
    fn position(&self, id: &str) -> Option<usize> {
        self.documents
            .iter()
            .position(|document| document_id(document) == Some(id))
    }

    /// Checks `document` against the unique indexes, ignoring the document at `replacing`.
    fn check_unique(&self, collection: &str, document: &Document, replacing: Option<usize>) -> DocumentStoreResult<()> {
        for index in self.indexes.iter().filter(|index| index.unique) {
            let value = lookup(document, &index.field).unwrap_or(&Bson::Null);
            let taken = self.documents.iter().enumerate().any(|(position, existing)| {
                Some(position) != replacing
                    && values_equal(lookup(existing, &index.field).unwrap_or(&Bson::Null), value)
            });

            if taken {
                return Err(duplicate_key(collection, &index.field, value));
            }
        }

        Ok(())
    }

    fn insert(&mut self, collection: &str, id: &str, document: Document) -> DocumentStoreResult<Document> {
        if self.position(id).is_some() {
            return Err(DocumentStoreError::DocumentAlreadyExists(
                id.to_string(),
                collection.to_string(),
            ));
        }

        let document = with_id(id, document);
        self.check_unique(collection, &document, None)?;
        self.documents.push(document.clone());

        Ok(document)
    }

    fn replace(
        &mut self,
        collection: &str,
        id: &str,
        document: Document,
        upsert: bool,
    ) -> DocumentStoreResult<(WriteSummary, Option<ChangeEvent>)> {
        let document = with_id(id, document);

        match self.position(id) {
            Some(position) => {
                self.check_unique(collection, &document, Some(position))?;
                let modified = self.documents[position] != document;
                self.documents[position] = document.clone();

                let summary = WriteSummary {
                    matched: 1,
                    modified: u64::from(modified),
                    ..Default::default()
                };
                let event = modified.then(|| ChangeEvent::new(collection, ChangeOperation::Replace, Some(document)));

                Ok((summary, event))
            }
            None if upsert => {
                self.check_unique(collection, &document, None)?;
                self.documents.push(document.clone());

                let summary = WriteSummary { upserted: 1, ..Default::default() };
                Ok((summary, Some(ChangeEvent::new(collection, ChangeOperation::Insert, Some(document)))))
            }
            None => Ok((WriteSummary::default(), None)),
        }
    }

    fn delete(&mut self, id: &str) -> bool {
        match self.position(id) {
            Some(position) => {
                self.documents.remove(position);
                true
            }
            None => false,
        }
    }
}

fn duplicate_key(collection: &str, field: &str, value: &Bson) -> DocumentStoreError {
    DocumentStoreError::Native {
        code: Some(DUPLICATE_KEY),
        message: format!(
            "E11000 duplicate key error collection: {collection} index: {field}_1 dup key: {{ {field}: {value} }}"
        ),
    }
}

fn delete_event(collection: &str, id: &str) -> ChangeEvent {
    ChangeEvent::new(collection, ChangeOperation::Delete, None).with_document_id(id)
}

type StoreMap = HashMap<String, CollectionState>;

/// Thread-safe in-memory document storage backend.
///
/// This struct implements the [`StoreBackend`] trait to provide a fully functional
/// document store that operates entirely in memory using async-aware read-write locks.
/// Documents keep their insertion order, which is the order unsorted reads return them in.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Performance
///
/// Queries and unique index checks scan all documents in a collection. For small to medium
/// datasets this is typically acceptable; for larger ones use the MongoDB backend.
///
/// # Example
///
/// ```ignore
/// use doclens_memory::InMemoryStore;
/// use doclens::backend::StoreBackend;
/// use bson::doc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryStore::new();
///
///     store
///         .insert_documents(vec![("p-1".into(), doc! { "name": "Alice", "age": 30 })], "people")
///         .await?;
///
///     let docs = store.get_documents(vec!["p-1".into()], "people").await?;
///     assert_eq!(docs.len(), 1);
///
///     Ok(())
/// }
/// ```
#[derive(Default, Clone)]
pub struct InMemoryStore {
    /// collection name -> documents and indexes
    store: Arc<RwLock<StoreMap>>,
    /// collection name -> change subscribers
    monitors: Arc<RwLock<HashMap<String, Arc<Subscribers>>>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish_non_exhaustive()
    }
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for constructing an `InMemoryStore` with collections and indexes
    /// declared up front.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use doclens_memory::InMemoryStore;
    ///
    /// let store = InMemoryStore::builder()
    ///     .unique_index("people", "name")
    ///     .build()
    ///     .await?;
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Returns a monitor over `collection`.
    ///
    /// Monitors of the same collection share their handlers and run state.
    pub async fn monitor(&self, collection: &str) -> InMemoryMonitor {
        let mut monitors = self.monitors.write().await;
        let subscribers = monitors
            .entry(collection.to_string())
            .or_default()
            .clone();

        InMemoryMonitor::new(collection.to_string(), subscribers)
    }

    async fn publish(&self, collection: &str, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }

        let subscribers = self.monitors.read().await.get(collection).cloned();
        if let Some(subscribers) = subscribers {
            subscribers.publish(&events).await;
        }
    }

    async fn snapshot(&self, collection: &str) -> Vec<Document> {
        self.store
            .read()
            .await
            .get(collection)
            .map(|state| state.documents.clone())
            .unwrap_or_default()
    }

    /// Applies write models in order, stopping at the first failure. Events of the models
    /// applied before a failure are still published.
    async fn apply(&self, models: Vec<WriteModel>, collection: &str) -> DocumentStoreResult<WriteSummary> {
        let mut summary = WriteSummary::default();
        let mut events = Vec::new();

        let result = {
            let mut store = self.store.write().await;
            let state = store.entry(collection.to_string()).or_default();

            models.into_iter().try_for_each(|model| -> DocumentStoreResult<()> {
                match model {
                    WriteModel::Insert { id, document } => {
                        let document = state.insert(collection, &id, document)?;
                        summary.inserted += 1;
                        events.push(ChangeEvent::new(collection, ChangeOperation::Insert, Some(document)));
                    }
                    WriteModel::Replace { id, document, upsert } => {
                        let (replaced, event) = state.replace(collection, &id, document, upsert)?;
                        summary += replaced;
                        events.extend(event);
                    }
                    WriteModel::Delete { id } => {
                        if state.delete(&id) {
                            summary.deleted += 1;
                            events.push(delete_event(collection, &id));
                        }
                    }
                }
                Ok(())
            })
        };

        self.publish(collection, events).await;
        result?;

        debug!(collection, ?summary, "applied writes");
        Ok(summary)
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_documents(
        &self,
        documents: Vec<(String, Document)>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        let models = documents
            .into_iter()
            .map(|(id, document)| WriteModel::Insert { id, document })
            .collect();

        self.apply(models, collection).await.map(|_| ())
    }

    async fn replace_documents(
        &self,
        documents: Vec<(String, Document)>,
        collection: &str,
        upsert: bool,
    ) -> DocumentStoreResult<WriteSummary> {
        let models = documents
            .into_iter()
            .map(|(id, document)| WriteModel::Replace { id, document, upsert })
            .collect();

        self.apply(models, collection).await
    }

    async fn delete_documents(&self, ids: Vec<String>, collection: &str) -> DocumentStoreResult<u64> {
        let models = ids.into_iter().map(|id| WriteModel::Delete { id }).collect();

        Ok(self.apply(models, collection).await?.deleted)
    }

    async fn get_documents(
        &self,
        ids: Vec<String>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>> {
        let store = self.store.read().await;
        let Some(state) = store.get(collection) else {
            return Ok(Vec::new());
        };

        Ok(ids
            .iter()
            .filter_map(|id| state.position(id).map(|position| state.documents[position].clone()))
            .collect())
    }

    async fn find_documents(
        &self,
        filter: Option<Expr>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>> {
        let documents = self.snapshot(collection).await;

        match filter {
            Some(filter) => DocumentEvaluator::filter_documents(documents, &filter),
            None => Ok(documents),
        }
    }

    async fn count_documents(&self, filter: Option<Expr>, collection: &str) -> DocumentStoreResult<u64> {
        Ok(self.find_documents(filter, collection).await?.len() as u64)
    }

    async fn aggregate(&self, pipeline: Pipeline, collection: &str) -> DocumentStoreResult<DocumentCursor> {
        let documents = self.snapshot(collection).await;
        let results = aggregate::execute(&pipeline, documents)?;
        debug!(collection, stages = pipeline.len(), results = results.len(), "executed pipeline");

        Ok(futures::stream::iter(results.into_iter().map(Ok)).boxed())
    }

    async fn bulk_write(
        &self,
        models: Vec<WriteModel>,
        collection: &str,
    ) -> DocumentStoreResult<WriteSummary> {
        self.apply(models, collection).await
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.store
            .write()
            .await
            .entry(name.to_string())
            .or_default();

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        let dropped = self.store.write().await.remove(name).is_some();

        if dropped {
            debug!(collection = name, "dropped collection");
            self.publish(name, vec![ChangeEvent::new(name, ChangeOperation::Drop, None)])
                .await;
        }

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names: Vec<String> = self.store.read().await.keys().cloned().collect();
        names.sort();

        Ok(names)
    }

    async fn add_index(
        &self,
        collection: &str,
        field: &str,
        unique: bool,
    ) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        let state = store.entry(collection.to_string()).or_default();

        if unique {
            let mut seen: Vec<&Bson> = Vec::new();
            for document in &state.documents {
                let value = lookup(document, field).unwrap_or(&Bson::Null);
                if seen.iter().any(|existing| values_equal(existing, value)) {
                    return Err(duplicate_key(collection, field, value));
                }
                seen.push(value);
            }
        }

        let index = Index { field: field.to_string(), unique };
        match state.indexes.iter_mut().find(|existing| existing.field == field) {
            Some(existing) => *existing = index,
            None => state.indexes.push(index),
        }
        debug!(collection, field, unique, "created index");

        Ok(())
    }

    async fn drop_index(&self, collection: &str, field: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        let state = store
            .get_mut(collection)
            .ok_or_else(|| DocumentStoreError::CollectionNotFound(collection.to_string()))?;

        let before = state.indexes.len();
        state.indexes.retain(|index| index.field != field);

        if state.indexes.len() == before {
            return Err(DocumentStoreError::Native {
                code: Some(INDEX_NOT_FOUND),
                message: format!("index not found with name [{field}_1]"),
            });
        }

        Ok(())
    }
}

/// Builder for an [`InMemoryStore`] with collections and indexes declared up front.
///
/// # Example
///
/// ```ignore
/// use doclens_memory::InMemoryStoreBuilder;
/// use doclens::backend::StoreBackendBuilder;
///
/// #[tokio::main]
/// async fn main() {
///     let store = InMemoryStoreBuilder::default()
///         .collection("people")
///         .build()
///         .await
///         .unwrap();
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryStoreBuilder {
    collections: Vec<String>,
    indexes: Vec<(String, String, bool)>,
}

impl InMemoryStoreBuilder {
    /// Creates `name` as an empty collection.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collections.push(name.into());
        self
    }

    /// Declares a non-unique index on `field`.
    pub fn index(mut self, collection: impl Into<String>, field: impl Into<String>) -> Self {
        self.indexes.push((collection.into(), field.into(), false));
        self
    }

    /// Declares a unique index on `field`.
    pub fn unique_index(mut self, collection: impl Into<String>, field: impl Into<String>) -> Self {
        self.indexes.push((collection.into(), field.into(), true));
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let store = InMemoryStore::new();

        for name in &self.collections {
            store.create_collection(name).await?;
        }
        for (collection, field, unique) in &self.indexes {
            store.add_index(collection, field, *unique).await?;
        }

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::bson;
    use doclens_core::{
        monitor::{ChangeHandler, CollectionMonitor},
        query::FieldOp,
    };
    use futures::TryStreamExt;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn person(id: &str, name: &str, age: i32) -> (String, Document) {
        (id.to_string(), doc! { "_id": id, "name": name, "age": age })
    }

    #[tokio::test]
    async fn insert_get_and_duplicate_ids() {
        let store = InMemoryStore::new();
        store
            .insert_documents(vec![person("1", "A", 30), person("2", "B", 20)], "people")
            .await
            .unwrap();

        let found = store
            .get_documents(vec!["2".into(), "missing".into(), "1".into()], "people")
            .await
            .unwrap();
        assert_eq!(found, vec![person("2", "B", 20).1, person("1", "A", 30).1]);

        let duplicate = store.insert_documents(vec![person("1", "C", 1)], "people").await;
        assert_eq!(
            duplicate,
            Err(DocumentStoreError::DocumentAlreadyExists("1".into(), "people".into()))
        );
    }

    #[tokio::test]
    async fn unique_indexes_reject_duplicates() {
        let store = InMemoryStore::builder()
            .unique_index("people", "name")
            .build()
            .await
            .unwrap();

        store.insert_documents(vec![person("1", "A", 30)], "people").await.unwrap();

        let result = store.insert_documents(vec![person("2", "A", 31)], "people").await;
        assert!(matches!(result, Err(DocumentStoreError::Native { code: Some(11000), .. })));

        let result = store
            .replace_documents(vec![person("3", "A", 1)], "people", true)
            .await;
        assert!(matches!(result, Err(DocumentStoreError::Native { code: Some(11000), .. })));

        // Replacing a document with its own indexed value is fine.
        let summary = store
            .replace_documents(vec![person("1", "A", 31)], "people", false)
            .await
            .unwrap();
        assert_eq!(summary, WriteSummary { matched: 1, modified: 1, ..Default::default() });
    }

    #[tokio::test]
    async fn unique_index_creation_checks_existing_documents() {
        let store = InMemoryStore::new();
        store
            .insert_documents(vec![person("1", "A", 30), person("2", "A", 20)], "people")
            .await
            .unwrap();

        let result = store.add_index("people", "name", true).await;
        assert!(matches!(result, Err(DocumentStoreError::Native { code: Some(11000), .. })));
        store.add_index("people", "age", true).await.unwrap();
        store.drop_index("people", "age").await.unwrap();

        let result = store.drop_index("people", "age").await;
        assert!(matches!(result, Err(DocumentStoreError::Native { code: Some(27), .. })));
    }

    #[tokio::test]
    async fn replace_and_upsert_counts() {
        let store = InMemoryStore::new();
        store.insert_documents(vec![person("1", "A", 30)], "people").await.unwrap();

        let summary = store
            .replace_documents(vec![person("1", "A", 30), person("2", "B", 20)], "people", false)
            .await
            .unwrap();
        assert_eq!(summary, WriteSummary { matched: 1, ..Default::default() });

        let summary = store
            .replace_documents(vec![person("2", "B", 20)], "people", true)
            .await
            .unwrap();
        assert_eq!(summary, WriteSummary { upserted: 1, ..Default::default() });

        let summary = store
            .replace_documents(vec![person("2", "B", 20)], "people", true)
            .await
            .unwrap();
        assert_eq!(summary, WriteSummary { matched: 1, ..Default::default() });
        assert_eq!(store.count_documents(None, "people").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn bulk_writes_stop_at_the_first_failure() {
        let store = InMemoryStore::new();
        let models = vec![
            WriteModel::Insert { id: "1".into(), document: doc! { "name": "A" } },
            WriteModel::Insert { id: "1".into(), document: doc! { "name": "B" } },
            WriteModel::Insert { id: "2".into(), document: doc! { "name": "C" } },
        ];

        let result = store.bulk_write(models, "people").await;
        assert!(matches!(result, Err(DocumentStoreError::DocumentAlreadyExists(..))));

        let stored = store.find_documents(None, "people").await.unwrap();
        assert_eq!(stored, vec![doc! { "_id": "1", "name": "A" }]);

        let summary = store
            .bulk_write(
                vec![
                    WriteModel::Replace { id: "1".into(), document: doc! { "name": "Z" }, upsert: false },
                    WriteModel::Delete { id: "1".into() },
                    WriteModel::Delete { id: "1".into() },
                ],
                "people",
            )
            .await
            .unwrap();
        assert_eq!(
            summary,
            WriteSummary { matched: 1, modified: 1, deleted: 1, ..Default::default() }
        );
    }

    #[tokio::test]
    async fn find_count_and_aggregate() {
        let store = InMemoryStore::new();
        store
            .insert_documents(vec![person("1", "A", 30), person("2", "B", 20)], "people")
            .await
            .unwrap();

        let adults = Expr::field("age", FieldOp::Gte, bson!(25));
        assert_eq!(store.count_documents(Some(adults.clone()), "people").await.unwrap(), 1);
        assert_eq!(
            store.find_documents(Some(adults), "people").await.unwrap(),
            vec![person("1", "A", 30).1]
        );

        let cursor = store
            .aggregate(Pipeline::new().count("total"), "people")
            .await
            .unwrap();
        let results: Vec<Document> = cursor.try_collect().await.unwrap();
        assert_eq!(results, vec![doc! { "total": 2 }]);

        let results: Vec<Document> = store
            .aggregate(Pipeline::new(), "nothing")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn collections_are_listed_and_dropped() {
        let store = InMemoryStoreBuilder::default()
            .collection("b")
            .collection("a")
            .build()
            .await
            .unwrap();

        assert_eq!(store.list_collections().await.unwrap(), vec!["a", "b"]);
        store.drop_collection("a").await.unwrap();
        store.drop_collection("a").await.unwrap();
        assert_eq!(store.list_collections().await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn monitors_receive_changes_while_running() {
        let store = InMemoryStore::new();
        let monitor = store.monitor("people").await;
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let handler: ChangeHandler = Arc::new(move |event| {
            sink.lock().unwrap().push((event.operation, event.document_id.clone()));
            Ok(())
        });
        monitor.attach(handler).await;

        store.insert_documents(vec![person("0", "Z", 1)], "people").await.unwrap();
        monitor.start().await.unwrap();
        assert!(monitor.is_running());

        store.insert_documents(vec![person("1", "A", 30)], "people").await.unwrap();
        store.replace_documents(vec![person("1", "A", 31)], "people", false).await.unwrap();
        store.delete_documents(vec!["1".into()], "people").await.unwrap();
        store.insert_documents(vec![person("9", "X", 1)], "others").await.unwrap();

        monitor.stop().await.unwrap();
        store.delete_documents(vec!["0".into()], "people").await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (ChangeOperation::Insert, Some("1".to_string())),
                (ChangeOperation::Replace, Some("1".to_string())),
                (ChangeOperation::Delete, Some("1".to_string())),
            ]
        );
    }
}
