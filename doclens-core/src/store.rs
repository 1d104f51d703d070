//! Main document store interface.
//!
//! [`DocumentStore`] owns a backend and hands out [`TypedCollection`]s bound to it. It also
//! carries the store-wide defaults collections inherit, such as the retry bound of
//! [`TypedCollection::sample_default`].
//!
//! # Example
//!
//! ```ignore
//! use doclens::store::DocumentStore;
//!
//! let store = DocumentStore::new(backend).with_sample_retries(5);
//! let people = store.typed_collection::<Person>();
//! ```

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    backend::StoreBackend,
    collection::TypedCollection,
    document::{Converter, Record, SerdeConverter},
    error::DocumentStoreResult,
};

/// Default number of extra attempts for a sample that found duplicates.
pub const DEFAULT_SAMPLE_RETRIES: u32 = 3;

/// A document store bound to a specific backend implementation.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
    sample_retries: u32,
}

impl<B: StoreBackend> DocumentStore<B> {
    /// Creates a new document store with the given backend.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            sample_retries: DEFAULT_SAMPLE_RETRIES,
        }
    }

    /// Sets the retry bound collections use for
    /// [`sample_default`](TypedCollection::sample_default).
    pub fn with_sample_retries(mut self, retries: u32) -> Self {
        self.sample_retries = retries;
        self
    }

    /// Returns the default sample retry bound.
    pub fn default_sample_retries(&self) -> u32 {
        self.sample_retries
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Gets the collection of `R`, encoded through its serde implementation.
    ///
    /// The collection name is determined by [`Record::collection_name`].
    pub fn typed_collection<R>(&self) -> TypedCollection<'_, B, R>
    where
        R: Record + Serialize + DeserializeOwned,
    {
        self.typed_collection_with(SerdeConverter::new())
    }

    /// Gets the collection of `R`, encoded with a custom converter.
    pub fn typed_collection_with<R, C>(&self, converter: C) -> TypedCollection<'_, B, R, C>
    where
        R: Record,
        C: Converter<R>,
    {
        TypedCollection::new(
            R::collection_name().to_string(),
            &self.backend,
            converter,
            self.sample_retries,
        )
    }

    /// Creates a new collection with the given name.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection already exists or creation fails.
    pub async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.backend
            .create_collection(name)
            .await
    }

    /// Drops (deletes) a collection with the given name.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection does not exist or deletion fails.
    pub async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.backend.drop_collection(name).await
    }

    /// Lists all collections in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation fails.
    pub async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.backend.list_collections().await
    }

    /// Adds an index to a field in a collection.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection
    /// * `field` - The field to index
    /// * `unique` - Whether the index should enforce uniqueness
    ///
    /// # Errors
    ///
    /// Returns an error if existing documents violate a unique index or the operation fails.
    pub async fn add_index(
        &self,
        collection: &str,
        field: &str,
        unique: bool,
    ) -> DocumentStoreResult<()> {
        self.backend
            .add_index(collection, field, unique)
            .await
    }

    /// Removes an index from a field in a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the index does not exist or the operation fails.
    pub async fn drop_index(&self, collection: &str, field: &str) -> DocumentStoreResult<()> {
        self.backend
            .drop_index(collection, field)
            .await
    }

    /// Shuts down the store and releases backend resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown operation fails.
    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        self.backend.shutdown().await
    }
}
