//! Main doclens crate providing a typed interface to document databases.
//!
//! This crate is the primary entry point for users of the doclens framework.
//! It re-exports the core types and functionality from the sub-crates and provides
//! convenient access to the storage backends.
//!
//! # Features
//!
//! - **Typed records** - Records carry typed ids and map to wire documents through converters
//! - **Field algebra** - Compose filters and document transforms from typed fields
//! - **Aggregation pipelines** - Immutable pipelines with a canonical, deterministic query text
//! - **Classified failures** - Write outcomes tell duplicate keys and missing documents apart
//! - **Multiple backends** - In-memory for tests, MongoDB for production
//!
//! # Quick Start
//!
//! ```ignore
//! use doclens::{prelude::*, memory::InMemoryStore};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Fields)]
//! pub struct Person {
//!     #[serde(rename = "_id")]
//!     pub id: Id<Person>,
//!     pub name: String,
//!     pub age: i32,
//! }
//!
//! impl Record for Person {
//!     fn id(&self) -> &Id<Self> { &self.id }
//!     fn collection_name() -> &'static str { "people" }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await?);
//!     let people = store.typed_collection::<Person>();
//!
//!     people.insert(Person { id: Id::new(), name: "Alice".to_string(), age: 30 }).await?;
//!
//!     let adults = people
//!         .aggregate()
//!         .match_expr(person::age().gte(18))
//!         .sort([person::name().ascending()])
//!         .to_vec()
//!         .await?;
//!
//!     println!("{}", people.aggregate().match_expr(person::age().gte(18)).to_query(true)?);
//!     // db.people.aggregate([{"$match": {"age": {"$gte": 18}}}])
//!
//!     store.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - `mongodb` - Persistent MongoDB backend (requires the `mongodb` feature)

#[allow(unused_extern_crates)]
extern crate self as doclens;

pub mod prelude;

pub use doclens_core::{
    aggregate, backend, batch, collection, document, error, expression, failure, field, id, monitor,
    pipeline, query, render, store,
};
pub use doclens_macros::Fields;

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use doclens_memory::{InMemoryMonitor, InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use doclens_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
