//! Convenient re-exports of commonly used types from doclens.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use doclens::prelude::*;
//! ```
//!
//! This provides access to:
//! - Records, ids and converters
//! - The field algebra, fragments and pipelines
//! - Store, collections, batches and backends
//! - Error and failure types

pub use doclens_core::{
    aggregate::Aggregation,
    backend::{StoreBackend, StoreBackendBuilder, WriteModel, WriteSummary},
    batch::{Batch, BatchOp},
    collection::TypedCollection,
    document::{Converter, Record, SerdeConverter},
    error::{DocumentStoreError, DocumentStoreResult},
    expression::{AggExpr, Fragment, FragmentValue},
    failure::{Failure, FailureKind, Outcome, OutcomeExt},
    field::Field,
    id::Id,
    monitor::{ChangeEvent, ChangeHandler, ChangeOperation, CollectionMonitor},
    pipeline::{Pipeline, SortKey, Stage},
    query::{Expr, FieldOp, QueryVisitor},
    store::DocumentStore,
};
pub use doclens_macros::Fields;
