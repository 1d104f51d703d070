//! Storage backend abstraction for the document store.
//!
//! This module defines the seam between the typed layer and a concrete database driver.
//! Everything above it (collections, aggregations, batches) speaks [`StoreBackend`] only,
//! so the same typed code runs against the in-memory backend in tests and against MongoDB
//! in production.
//!
//! # Overview
//!
//! - [`StoreBackend`]: the async driver interface over named collections
//! - [`StoreBackendBuilder`]: factory trait for creating backend instances
//! - [`WriteModel`] and [`WriteSummary`]: bulk write requests and their aggregate counts
//! - [`DocumentCursor`]: the lazily delivered result of an aggregation
//!
//! Documents cross this seam in wire form and always carry their primary key under `_id`.
//!
//! # Examples
//!
//! ```ignore
//! use doclens::backend::StoreBackend;
//! use bson::doc;
//!
//! let backend = MyBackendImpl::new();
//! backend
//!     .insert_documents(vec![("p-1".into(), doc! { "_id": "p-1", "name": "Alice" })], "people")
//!     .await?;
//! ```

use async_trait::async_trait;
use bson::Document;
use futures::stream::BoxStream;
use std::{fmt::Debug, ops::AddAssign};

use crate::{error::DocumentStoreResult, pipeline::Pipeline, query::Expr};

/// A lazily delivered sequence of result documents.
///
/// The cursor is not restartable; iterating the results again requires executing the
/// pipeline again.
pub type DocumentCursor = BoxStream<'static, DocumentStoreResult<Document>>;

/// One operation of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    /// Inserts a new document; fails if its `_id` or a unique index is already taken.
    Insert {
        id: String,
        document: Document,
    },
    /// Replaces the document with the given `_id`, inserting it when absent and `upsert`
    /// is set.
    Replace {
        id: String,
        document: Document,
        upsert: bool,
    },
    /// Deletes the document with the given `_id`.
    Delete {
        id: String,
    },
}

impl WriteModel {
    /// The `_id` this operation addresses.
    pub fn id(&self) -> &str {
        match self {
            WriteModel::Insert { id, .. }
            | WriteModel::Replace { id, .. }
            | WriteModel::Delete { id } => id,
        }
    }
}

/// Aggregate counts of a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Documents inserted by insert operations.
    pub inserted: u64,
    /// Documents matched by replace operations.
    pub matched: u64,
    /// Documents actually changed by replace operations.
    pub modified: u64,
    /// Documents inserted by replace operations with `upsert` set.
    pub upserted: u64,
    /// Documents deleted.
    pub deleted: u64,
}

impl AddAssign for WriteSummary {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.matched += other.matched;
        self.modified += other.modified;
        self.upserted += other.upserted;
        self.deleted += other.deleted;
    }
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. Calls are independent and may complete in any order.
///
/// # Error Handling
///
/// Operations return [`DocumentStoreResult<T>`](crate::error::DocumentStoreResult).
/// Failures reported by the database itself should be surfaced as
/// [`DocumentStoreError::Native`](crate::error::DocumentStoreError::Native) carrying the
/// server code, so that they can be classified into a
/// [`Failure`](crate::failure::Failure).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts new documents into a collection.
    ///
    /// # Arguments
    ///
    /// * `documents` - `(_id, document)` pairs to insert
    /// * `collection` - The collection to insert into. Created automatically if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Fails if an `_id` is already present or a unique index would be violated.
    async fn insert_documents(
        &self,
        documents: Vec<(String, Document)>,
        collection: &str,
    ) -> DocumentStoreResult<()>;

    /// Replaces documents by `_id`.
    ///
    /// Documents whose `_id` is absent are skipped, or inserted when `upsert` is set. Skipped
    /// documents are not an error; callers inspect [`WriteSummary::matched`].
    ///
    /// # Arguments
    ///
    /// * `documents` - `(_id, document)` pairs with the new content
    /// * `collection` - The collection containing the documents
    /// * `upsert` - Whether to insert documents that do not exist yet
    async fn replace_documents(
        &self,
        documents: Vec<(String, Document)>,
        collection: &str,
        upsert: bool,
    ) -> DocumentStoreResult<WriteSummary>;

    /// Deletes documents by `_id`, returning how many were removed. Missing ids are skipped.
    async fn delete_documents(&self, ids: Vec<String>, collection: &str) -> DocumentStoreResult<u64>;

    /// Retrieves documents by `_id`. Missing ids are omitted from the result.
    async fn get_documents(
        &self,
        ids: Vec<String>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Retrieves the documents matching `filter`, or every document when there is none.
    async fn find_documents(
        &self,
        filter: Option<Expr>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Counts the documents matching `filter`, or every document when there is none.
    async fn count_documents(&self, filter: Option<Expr>, collection: &str) -> DocumentStoreResult<u64>;

    /// Executes an aggregation pipeline.
    ///
    /// The returned cursor yields result documents in the order the pipeline produces them.
    /// It ends after the first error.
    async fn aggregate(&self, pipeline: Pipeline, collection: &str) -> DocumentStoreResult<DocumentCursor>;

    /// Executes a sequence of write operations in order, stopping at the first failure.
    async fn bulk_write(
        &self,
        models: Vec<WriteModel>,
        collection: &str,
    ) -> DocumentStoreResult<WriteSummary>;

    /// Creates an empty collection.
    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Drops a collection and all its documents.
    ///
    /// # Warning
    ///
    /// This operation is irreversible.
    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Lists the names of all collections in the store.
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Creates an index on a field, enforcing uniqueness when `unique` is set.
    ///
    /// # Errors
    ///
    /// If `unique` is set and existing documents violate the constraint, the backend fails
    /// with a duplicate key error.
    async fn add_index(
        &self,
        collection: &str,
        field: &str,
        unique: bool,
    ) -> DocumentStoreResult<()>;

    /// Removes the index on a field.
    async fn drop_index(&self, collection: &str, field: &str) -> DocumentStoreResult<()>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op, but backends with external connections
    /// should override this.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn insert_documents(
        &self,
        documents: Vec<(String, Document)>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        (*self)
            .insert_documents(documents, collection)
            .await
    }

    async fn replace_documents(
        &self,
        documents: Vec<(String, Document)>,
        collection: &str,
        upsert: bool,
    ) -> DocumentStoreResult<WriteSummary> {
        (*self)
            .replace_documents(documents, collection, upsert)
            .await
    }

    async fn delete_documents(&self, ids: Vec<String>, collection: &str) -> DocumentStoreResult<u64> {
        (*self)
            .delete_documents(ids, collection)
            .await
    }

    async fn get_documents(
        &self,
        ids: Vec<String>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>> {
        (*self)
            .get_documents(ids, collection)
            .await
    }

    async fn find_documents(
        &self,
        filter: Option<Expr>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>> {
        (*self)
            .find_documents(filter, collection)
            .await
    }

    async fn count_documents(&self, filter: Option<Expr>, collection: &str) -> DocumentStoreResult<u64> {
        (*self)
            .count_documents(filter, collection)
            .await
    }

    async fn aggregate(&self, pipeline: Pipeline, collection: &str) -> DocumentStoreResult<DocumentCursor> {
        (*self)
            .aggregate(pipeline, collection)
            .await
    }

    async fn bulk_write(
        &self,
        models: Vec<WriteModel>,
        collection: &str,
    ) -> DocumentStoreResult<WriteSummary> {
        (*self)
            .bulk_write(models, collection)
            .await
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        (*self).create_collection(name).await
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        (*self).drop_collection(name).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        (*self).list_collections().await
    }

    async fn add_index(
        &self,
        collection: &str,
        field: &str,
        unique: bool,
    ) -> DocumentStoreResult<()> {
        (*self)
            .add_index(collection, field, unique)
            .await
    }

    async fn drop_index(&self, collection: &str, field: &str) -> DocumentStoreResult<()> {
        (*self)
            .drop_index(collection, field)
            .await
    }
}

/// Factory for backends that need asynchronous setup, such as opening a connection pool.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
