//! Typed aggregations: a pipeline bound to a collection, a backend and a result converter.
//!
//! ```ignore
//! let names: Vec<NameOnly> = people
//!     .aggregate()
//!     .match_expr(person::age().gte(18))
//!     .sort([person::name().ascending()])
//!     .project([person::name().include()])
//!     .with_type::<NameOnly>()
//!     .to_vec()
//!     .await?;
//! ```
//!
//! Results are decoded lazily as the backend cursor delivers them. Decoding stops at the
//! first native or decode error, which ends the result sequence.

use futures::{
    Sink, SinkExt, StreamExt, TryStreamExt,
    future::ready,
    stream::BoxStream,
};
use std::{fmt::Display, marker::PhantomData};
use tracing::debug;

use crate::{
    backend::StoreBackend,
    document::{Converter, SerdeConverter},
    error::{DocumentStoreError, DocumentStoreResult},
    expression::{AggExpr, Fragment},
    pipeline::{Pipeline, SortKey},
    query::Expr,
};

/// A pipeline over one collection whose results decode into `T` through `C`.
#[derive(Debug)]
pub struct Aggregation<'a, B: StoreBackend, T, C = SerdeConverter<T>> {
    collection: String,
    backend: &'a B,
    pipeline: Pipeline,
    converter: C,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, B: StoreBackend, T, C: Clone> Clone for Aggregation<'a, B, T, C> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            backend: self.backend,
            pipeline: self.pipeline.clone(),
            converter: self.converter.clone(),
            _marker: PhantomData,
        }
    }
}

impl<'a, B: StoreBackend, T, C: Clone> Aggregation<'a, B, T, C> {
    pub(crate) fn new(collection: String, backend: &'a B, converter: C) -> Self {
        Self {
            collection,
            backend,
            pipeline: Pipeline::new(),
            converter,
            _marker: PhantomData,
        }
    }

    /// Returns the name of the collection this aggregation runs against.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the accumulated pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn with_pipeline(&self, pipeline: Pipeline) -> Self {
        Self {
            collection: self.collection.clone(),
            backend: self.backend,
            pipeline,
            converter: self.converter.clone(),
            _marker: PhantomData,
        }
    }

    /// Appends a `$match` stage.
    pub fn match_expr(&self, expr: Expr) -> Self {
        self.with_pipeline(self.pipeline.match_expr(expr))
    }

    /// Appends a `$project` stage.
    pub fn project(&self, fragments: impl IntoIterator<Item = Fragment>) -> Self {
        self.with_pipeline(self.pipeline.project(fragments))
    }

    /// Appends a `$group` stage.
    pub fn group(
        &self,
        id: impl Into<AggExpr>,
        accumulators: impl IntoIterator<Item = Fragment>,
    ) -> Self {
        self.with_pipeline(self.pipeline.group(id, accumulators))
    }

    /// Appends a `$sort` stage.
    pub fn sort(&self, keys: impl IntoIterator<Item = SortKey>) -> Self {
        self.with_pipeline(self.pipeline.sort(keys))
    }

    /// Appends a `$skip` stage.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidArgument`] if `n` is negative.
    pub fn skip(&self, n: i64) -> DocumentStoreResult<Self> {
        Ok(self.with_pipeline(self.pipeline.skip(n)?))
    }

    /// Appends a `$limit` stage.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidArgument`] if `n` is negative.
    pub fn limit(&self, n: i64) -> DocumentStoreResult<Self> {
        Ok(self.with_pipeline(self.pipeline.limit(n)?))
    }

    /// Appends an `$addFields` stage.
    pub fn add_fields(&self, fragments: impl IntoIterator<Item = Fragment>) -> Self {
        self.with_pipeline(self.pipeline.add_fields(fragments))
    }

    /// Appends a `$sample` stage.
    pub fn sample(&self, size: u64) -> Self {
        self.with_pipeline(self.pipeline.sample(size))
    }

    /// Appends an `$unwind` stage.
    pub fn unwind(&self, field: impl Into<String>) -> Self {
        self.with_pipeline(self.pipeline.unwind(field))
    }

    /// Appends a `$count` stage.
    pub fn count(&self, field: impl Into<String>) -> Self {
        self.with_pipeline(self.pipeline.count(field))
    }

    /// Renders the pipeline as `db.<collection>.aggregate([...])`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidOperand`] if an operand failed to encode.
    pub fn to_query(&self, spaced: bool) -> DocumentStoreResult<String> {
        self.pipeline.to_query(&self.collection, spaced)
    }

    /// Decodes the remaining results as `U` with its serde converter, typically after a
    /// `project` or `group` changed the document shape.
    pub fn with_type<U>(&self) -> Aggregation<'a, B, U, SerdeConverter<U>> {
        self.with_converter(SerdeConverter::new())
    }

    /// Decodes the remaining results with another converter.
    pub fn with_converter<U, D>(&self, converter: D) -> Aggregation<'a, B, U, D> {
        Aggregation {
            collection: self.collection.clone(),
            backend: self.backend,
            pipeline: self.pipeline.clone(),
            converter,
            _marker: PhantomData,
        }
    }
}

impl<'a, B, T, C> Aggregation<'a, B, T, C>
where
    B: StoreBackend,
    T: Send + 'a,
    C: Converter<T> + Clone + 'a,
{
    /// Executes the pipeline and returns the decoded results as a lazy stream.
    ///
    /// The stream ends after the first error it yields.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline cannot be rendered or the backend rejects it.
    pub async fn stream(&self) -> DocumentStoreResult<BoxStream<'a, DocumentStoreResult<T>>> {
        debug!(
            collection = %self.collection,
            stages = self.pipeline.len(),
            "executing aggregation"
        );

        let converter = self.converter.clone();
        let cursor = self
            .backend
            .aggregate(self.pipeline.clone(), &self.collection)
            .await?;

        Ok(cursor
            .map(move |document| document.and_then(|d| converter.from_document(d)))
            .scan(false, |failed, result| {
                if *failed {
                    return ready(None);
                }
                *failed = result.is_err();
                ready(Some(result))
            })
            .boxed())
    }

    /// Executes the pipeline and collects every decoded result.
    ///
    /// # Errors
    ///
    /// Fails with the first native or decode error; no partial result is returned.
    pub async fn to_vec(&self) -> DocumentStoreResult<Vec<T>> {
        self.stream().await?.try_collect().await
    }

    /// Executes the pipeline and sends each decoded result into `sink`, returning how many
    /// were delivered. The sink is closed once the results are exhausted.
    ///
    /// The next document is only pulled from the cursor after the sink accepted the
    /// previous one, so a slow sink pauses the cursor. Results delivered before an error
    /// are not retracted.
    ///
    /// # Errors
    ///
    /// Fails with the first native or decode error, or if the sink rejects a result.
    pub async fn to_stream<S>(&self, mut sink: S) -> DocumentStoreResult<u64>
    where
        S: Sink<T> + Unpin,
        S::Error: Display,
    {
        let mut results = self.stream().await?;
        let mut delivered = 0u64;

        while let Some(result) = results.next().await {
            sink.send(result?).await.map_err(sink_error)?;
            delivered += 1;
        }

        sink.close().await.map_err(sink_error)?;
        debug!(collection = %self.collection, delivered, "aggregation stream exhausted");

        Ok(delivered)
    }
}

fn sink_error(err: impl Display) -> DocumentStoreError {
    DocumentStoreError::Unknown(format!("result sink failed: {err}"))
}
