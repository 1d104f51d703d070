//! Typed collection accessors.
//!
//! A [`TypedCollection`] binds a record type, a converter and a backend to one named
//! collection. Writes return an [`Outcome`] whose failure side is a classified
//! [`Failure`]; reads return a plain [`DocumentStoreResult`].
//!
//! # Example
//!
//! ```ignore
//! use doclens::prelude::*;
//!
//! let people = store.typed_collection::<Person>();
//!
//! let alice = Person { id: Id::new(), name: "Alice".to_string(), age: 30 };
//! match people.insert(alice.clone()).await {
//!     Ok(_) => {}
//!     Err(Failure::DuplicateKey(_)) => println!("already stored"),
//!     Err(other) => return Err(other.into()),
//! }
//!
//! let adults = people.find(person::age().gte(18)).await?;
//! ```

use bson::{Document, doc};
use std::marker::PhantomData;
use tracing::{debug, warn};

use crate::{
    aggregate::Aggregation,
    backend::{StoreBackend, WriteModel, WriteSummary},
    batch::{Batch, BatchOp},
    document::{Converter, ID_FIELD, Record, SerdeConverter},
    error::{DocumentStoreError, DocumentStoreResult},
    failure::{Failure, Outcome, OutcomeExt},
    field::Field,
    id::Id,
    query::Expr,
};

/// A collection of records of type `R`, encoded and decoded with `C`.
#[derive(Debug)]
pub struct TypedCollection<'a, B: StoreBackend, R: Record, C = SerdeConverter<R>> {
    name: String,
    backend: &'a B,
    converter: C,
    sample_retries: u32,
    _marker: PhantomData<fn() -> R>,
}

impl<'a, B: StoreBackend, R: Record, C: Clone> Clone for TypedCollection<'a, B, R, C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            backend: self.backend,
            converter: self.converter.clone(),
            sample_retries: self.sample_retries,
            _marker: PhantomData,
        }
    }
}

impl<'a, B: StoreBackend, R: Record, C: Converter<R>> TypedCollection<'a, B, R, C> {
    pub(crate) fn new(name: String, backend: &'a B, converter: C, sample_retries: u32) -> Self {
        Self {
            name,
            backend,
            converter,
            sample_retries,
            _marker: PhantomData,
        }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the converter used for this collection.
    pub fn converter(&self) -> &C {
        &self.converter
    }

    /// Returns the same collection encoded and decoded with another converter.
    pub fn with_converter<D: Converter<R>>(&self, converter: D) -> TypedCollection<'a, B, R, D> {
        TypedCollection::new(self.name.clone(), self.backend, converter, self.sample_retries)
    }

    /// Returns the same collection with another default retry bound for
    /// [`sample_default`](Self::sample_default).
    pub fn with_sample_retries(mut self, retries: u32) -> Self {
        self.sample_retries = retries;
        self
    }

    /// Encodes a record, making sure the document carries its primary key.
    fn encode(&self, record: &R) -> DocumentStoreResult<(String, Document)> {
        let id = record.id().as_str().to_string();
        let document = self.converter.to_document(record)?;

        if document.contains_key(ID_FIELD) {
            return Ok((id, document));
        }

        let mut with_id = doc! { ID_FIELD: id.as_str() };
        with_id.extend(document);

        Ok((id, with_id))
    }

    fn encode_all<'r>(&self, records: impl IntoIterator<Item = &'r R>) -> DocumentStoreResult<Vec<(String, Document)>> {
        records
            .into_iter()
            .map(|record| self.encode(record))
            .collect()
    }

    fn decode_all(&self, documents: Vec<Document>) -> DocumentStoreResult<Vec<R>> {
        documents
            .into_iter()
            .map(|document| self.converter.from_document(document))
            .collect()
    }

    /// Inserts a single record.
    ///
    /// # Errors
    ///
    /// Fails with [`Failure::DuplicateKey`] if its id or a unique index is already taken.
    pub async fn insert(&self, record: R) -> Outcome<R> {
        let documents = self.encode_all([&record]).classified()?;

        self.backend
            .insert_documents(documents, &self.name)
            .await
            .classified()?;

        Ok(record)
    }

    /// Inserts several records, returning the accepted ones.
    ///
    /// # Errors
    ///
    /// Fails with [`Failure::DuplicateKey`] if an id or a unique index is already taken.
    pub async fn insert_many(&self, records: Vec<R>) -> Outcome<Vec<R>> {
        let documents = self.encode_all(&records).classified()?;

        self.backend
            .insert_documents(documents, &self.name)
            .await
            .classified()?;
        debug!(collection = %self.name, inserted = records.len(), "inserted records");

        Ok(records)
    }

    /// Replaces a stored record.
    ///
    /// # Errors
    ///
    /// Fails with [`Failure::NoMatchingDocument`] if no record with its id is stored.
    pub async fn update(&self, record: R) -> Outcome<R> {
        let summary = self.replace(vec![&record], false).await?;

        if summary.matched == 0 {
            return Err(Failure::classify(DocumentStoreError::DocumentNotFound(
                record.id().to_string(),
                self.name.clone(),
            )));
        }

        Ok(record)
    }

    /// Replaces several stored records; absent ones are skipped and show up as a `matched`
    /// count lower than the number of records.
    pub async fn update_many(&self, records: Vec<R>) -> Outcome<WriteSummary> {
        self.replace(records.iter().collect(), false).await
    }

    /// Replaces a record, inserting it when it is not stored yet.
    pub async fn upsert(&self, record: R) -> Outcome<R> {
        self.replace(vec![&record], true).await?;

        Ok(record)
    }

    /// Replaces several records, inserting the ones not stored yet.
    pub async fn upsert_many(&self, records: Vec<R>) -> Outcome<WriteSummary> {
        self.replace(records.iter().collect(), true).await
    }

    async fn replace(&self, records: Vec<&R>, upsert: bool) -> Outcome<WriteSummary> {
        let documents = self.encode_all(records).classified()?;
        let summary = self
            .backend
            .replace_documents(documents, &self.name, upsert)
            .await
            .classified()?;

        debug!(
            collection = %self.name,
            matched = summary.matched,
            modified = summary.modified,
            upserted = summary.upserted,
            "replaced records"
        );

        Ok(summary)
    }

    /// Deletes a record by id, returning whether it was stored.
    pub async fn delete(&self, id: &Id<R>) -> Outcome<bool> {
        Ok(self.delete_many([id]).await? > 0)
    }

    /// Deletes records by id, returning how many were stored.
    pub async fn delete_many<'i>(&self, ids: impl IntoIterator<Item = &'i Id<R>>) -> Outcome<u64> {
        let ids = ids.into_iter().map(|id| id.as_str().to_string()).collect();

        self.backend
            .delete_documents(ids, &self.name)
            .await
            .classified()
    }

    /// Executes a batch as one bulk write.
    ///
    /// Operations run in order and the write stops at the first failure; operations applied
    /// before it stay applied.
    pub async fn execute(&self, batch: &Batch<R>) -> Outcome<WriteSummary> {
        let models = batch
            .ops()
            .into_iter()
            .map(|op| -> DocumentStoreResult<WriteModel> {
                Ok(match op {
                    BatchOp::Insert(record) => {
                        let (id, document) = self.encode(record)?;
                        WriteModel::Insert { id, document }
                    }
                    BatchOp::Update(record) => {
                        let (id, document) = self.encode(record)?;
                        WriteModel::Replace { id, document, upsert: false }
                    }
                    BatchOp::Upsert(record) => {
                        let (id, document) = self.encode(record)?;
                        WriteModel::Replace { id, document, upsert: true }
                    }
                    BatchOp::Delete(id) => WriteModel::Delete { id: id.as_str().to_string() },
                })
            })
            .collect::<DocumentStoreResult<Vec<_>>>()
            .classified()?;

        let summary = self
            .backend
            .bulk_write(models, &self.name)
            .await
            .classified()?;
        debug!(collection = %self.name, operations = batch.len(), ?summary, "executed batch");

        Ok(summary)
    }

    /// Retrieves a record by id.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentStoreError`] if the backend fails or the document cannot be decoded.
    pub async fn get(&self, id: &Id<R>) -> DocumentStoreResult<Option<R>> {
        Ok(self.by_ids([id]).await?.into_iter().next())
    }

    /// Retrieves records by id. Ids that are not stored are omitted.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentStoreError`] if the backend fails or a document cannot be decoded.
    pub async fn by_ids<'i>(&self, ids: impl IntoIterator<Item = &'i Id<R>>) -> DocumentStoreResult<Vec<R>> {
        let ids = ids.into_iter().map(|id| id.as_str().to_string()).collect();
        let documents = self.backend.get_documents(ids, &self.name).await?;

        self.decode_all(documents)
    }

    /// Retrieves every record.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentStoreError`] if the backend fails or a document cannot be decoded.
    pub async fn all(&self) -> DocumentStoreResult<Vec<R>> {
        let documents = self.backend.find_documents(None, &self.name).await?;

        self.decode_all(documents)
    }

    /// Retrieves the records matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentStoreError`] if the filter is invalid, the backend fails or a
    /// document cannot be decoded.
    pub async fn find(&self, filter: Expr) -> DocumentStoreResult<Vec<R>> {
        let documents = self.backend.find_documents(Some(filter), &self.name).await?;

        self.decode_all(documents)
    }

    /// Counts every record.
    pub async fn count(&self) -> DocumentStoreResult<u64> {
        self.backend.count_documents(None, &self.name).await
    }

    /// Counts the records matching `filter`.
    pub async fn count_where(&self, filter: Expr) -> DocumentStoreResult<u64> {
        self.backend.count_documents(Some(filter), &self.name).await
    }

    /// Creates an index on a field of this collection.
    pub async fn add_index<V>(&self, field: &Field<V>, unique: bool) -> DocumentStoreResult<()> {
        self.backend.add_index(&self.name, field.name(), unique).await
    }

    /// Drops this collection and every record in it.
    pub async fn drop(&self) -> DocumentStoreResult<()> {
        self.backend.drop_collection(&self.name).await
    }
}

impl<'a, B, R, C> TypedCollection<'a, B, R, C>
where
    B: StoreBackend,
    R: Record,
    C: Converter<R> + Clone + 'a,
{
    /// Starts an aggregation over this collection, decoding results as `R`.
    pub fn aggregate(&self) -> Aggregation<'a, B, R, C> {
        Aggregation::new(self.name.clone(), self.backend, self.converter.clone())
    }

    /// Picks `size` random records.
    ///
    /// A sample over a small collection can fail because not enough distinct documents were
    /// found; that failure is retried up to `retries` more times. Other failures are returned
    /// immediately.
    pub async fn sample(&self, size: u64, retries: u32) -> Outcome<Vec<R>> {
        let mut attempt = 0;

        loop {
            match self.aggregate().sample(size).to_vec().await.classified() {
                Err(Failure::SampleNoNonDuplicate(cause)) if attempt < retries => {
                    attempt += 1;
                    warn!(
                        collection = %self.name,
                        size,
                        attempt,
                        retries,
                        error = %cause,
                        "sample found duplicates, retrying"
                    );
                }
                outcome => return outcome,
            }
        }
    }

    /// Picks `size` random records with the collection's default retry bound.
    pub async fn sample_default(&self, size: u64) -> Outcome<Vec<R>> {
        self.sample(size, self.sample_retries).await
    }
}
