//! MongoDB storage implementation for document stores.
//!
//! Filters and pipelines are rendered with the canonical renderer of the core crate, so what
//! runs on the server is exactly what `to_query` prints.

use async_trait::async_trait;
use bson::{Document, doc};
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    Client, Collection as MongoCollection, IndexModel,
    options::{ClientOptions, IndexOptions},
    results::UpdateResult,
};
use std::collections::HashMap;
use tracing::debug;

use doclens_core::{
    backend::{DocumentCursor, StoreBackend, StoreBackendBuilder, WriteModel, WriteSummary},
    error::DocumentStoreResult,
    pipeline::Pipeline,
    query::Expr,
    render,
};

use crate::error::{initialization, native};

const ID_FIELD: &str = "_id";

/// Makes sure `document` carries `id` as its `_id`, first in the document.
fn with_id(id: &str, document: Document) -> Document {
    if document.get_str(ID_FIELD).ok() == Some(id) {
        return document;
    }

    let mut keyed = doc! { ID_FIELD: id };
    keyed.extend(document.into_iter().filter(|(key, _)| key != ID_FIELD));
    keyed
}

fn filter_document(filter: Option<&Expr>) -> DocumentStoreResult<Document> {
    filter.map_or_else(|| Ok(Document::new()), render::expr)
}

/// The name MongoDB gives an ascending single-field index.
fn index_name(field: &str) -> String {
    format!("{field}_1")
}

fn replace_summary(result: &UpdateResult) -> WriteSummary {
    WriteSummary {
        matched: result.matched_count,
        modified: result.modified_count,
        upserted: u64::from(result.upserted_id.is_some()),
        ..Default::default()
    }
}

/// Document store backend over a MongoDB database.
#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }

    async fn replace_one(
        &self,
        collection: &MongoCollection<Document>,
        id: &str,
        document: Document,
        upsert: bool,
    ) -> DocumentStoreResult<WriteSummary> {
        let result = collection
            .replace_one(doc! { ID_FIELD: id }, with_id(id, document))
            .upsert(upsert)
            .await
            .map_err(native)?;

        Ok(replace_summary(&result))
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn insert_documents(
        &self,
        documents: Vec<(String, Document)>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let count = documents.len();
        self.get_collection(collection)
            .insert_many(documents.into_iter().map(|(id, document)| with_id(&id, document)))
            .await
            .map_err(native)?;
        debug!(collection, count, "inserted documents");

        Ok(())
    }

    async fn replace_documents(
        &self,
        documents: Vec<(String, Document)>,
        collection: &str,
        upsert: bool,
    ) -> DocumentStoreResult<WriteSummary> {
        let target = self.get_collection(collection);
        let mut summary = WriteSummary::default();

        for (id, document) in documents {
            summary += self.replace_one(&target, &id, document, upsert).await?;
        }
        debug!(collection, ?summary, "replaced documents");

        Ok(summary)
    }

    async fn delete_documents(&self, ids: Vec<String>, collection: &str) -> DocumentStoreResult<u64> {
        let result = self
            .get_collection(collection)
            .delete_many(doc! { ID_FIELD: { "$in": ids } })
            .await
            .map_err(native)?;

        Ok(result.deleted_count)
    }

    async fn get_documents(
        &self,
        ids: Vec<String>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>> {
        let mut found: HashMap<String, Document> = self
            .get_collection(collection)
            .find(doc! { ID_FIELD: { "$in": ids.clone() } })
            .await
            .map_err(native)?
            .map_err(native)
            .try_filter_map(|document| async move {
                Ok(document
                    .get_str(ID_FIELD)
                    .ok()
                    .map(str::to_string)
                    .map(|id| (id, document)))
            })
            .try_collect()
            .await?;

        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    async fn find_documents(
        &self,
        filter: Option<Expr>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>> {
        let filter = filter_document(filter.as_ref())?;
        debug!(collection, %filter, "find");

        self.get_collection(collection)
            .find(filter)
            .await
            .map_err(native)?
            .map_err(native)
            .try_collect()
            .await
    }

    async fn count_documents(&self, filter: Option<Expr>, collection: &str) -> DocumentStoreResult<u64> {
        let filter = filter_document(filter.as_ref())?;

        self.get_collection(collection)
            .count_documents(filter)
            .await
            .map_err(native)
    }

    async fn aggregate(&self, pipeline: Pipeline, collection: &str) -> DocumentStoreResult<DocumentCursor> {
        let stages = pipeline.to_documents()?;
        let query = render::query_text(collection, &stages, false)?;
        debug!(collection, %query, "aggregate");

        let cursor = self
            .get_collection(collection)
            .aggregate(stages)
            .await
            .map_err(native)?;

        Ok(cursor.map_err(native).boxed())
    }

    async fn bulk_write(
        &self,
        models: Vec<WriteModel>,
        collection: &str,
    ) -> DocumentStoreResult<WriteSummary> {
        let target = self.get_collection(collection);
        let mut summary = WriteSummary::default();

        for model in models {
            match model {
                WriteModel::Insert { id, document } => {
                    target
                        .insert_one(with_id(&id, document))
                        .await
                        .map_err(native)?;
                    summary.inserted += 1;
                }
                WriteModel::Replace { id, document, upsert } => {
                    summary += self.replace_one(&target, &id, document, upsert).await?;
                }
                WriteModel::Delete { id } => {
                    summary.deleted += target
                        .delete_one(doc! { ID_FIELD: id })
                        .await
                        .map_err(native)?
                        .deleted_count;
                }
            }
        }
        debug!(collection, ?summary, "executed bulk write");

        Ok(summary)
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.client
            .database(&self.database)
            .create_collection(name)
            .await
            .map_err(native)
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.get_collection(name)
            .drop()
            .await
            .map_err(native)
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self
            .client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(native)?;
        names.sort();

        Ok(names)
    }

    async fn add_index(
        &self,
        collection: &str,
        field: &str,
        unique: bool,
    ) -> DocumentStoreResult<()> {
        self.get_collection(collection)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { field: 1 })
                    .options(
                        IndexOptions::builder()
                            .name(index_name(field))
                            .unique(unique)
                            .build(),
                    )
                    .build(),
            )
            .await
            .map_err(native)?;

        Ok(())
    }

    async fn drop_index(&self, collection: &str, field: &str) -> DocumentStoreResult<()> {
        self.get_collection(collection)
            .drop_index(index_name(field))
            .await
            .map_err(native)
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

/// Builder for a [`MongoDbStore`] connected through a connection string.
#[derive(Debug, Clone)]
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    app_name: Option<String>,
    max_pool_size: Option<u32>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            app_name: None,
            max_pool_size: None,
        }
    }

    /// Sets the application name reported to the server.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Sets the maximum size of the connection pool.
    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.max_pool_size = Some(size);
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(initialization)?;

        if let Some(app_name) = self.app_name {
            options.app_name = Some(app_name);
        }
        if let Some(max_pool_size) = self.max_pool_size {
            options.max_pool_size = Some(max_pool_size);
        }

        let client = Client::with_options(options).map_err(initialization)?;
        debug!(database = %self.database, "connected");

        Ok(MongoDbStore::new(client, self.database))
    }
}
