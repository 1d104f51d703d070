//! In-memory document storage backend for doclens.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development
//! and testing of code that runs against MongoDB in production.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Server matching rules** - Filters follow the same equality and ordering rules as MongoDB
//! - **Aggregation** - Executes every pipeline stage the typed layer can build
//! - **Unique indexes** - Violations surface with the server's duplicate key code
//! - **Change monitoring** - Per-collection monitors observe the store's own writes
//!
//! # Quick Start
//!
//! ```ignore
//! use doclens::{document::Record, id::Id, store::DocumentStore, memory::InMemoryStore};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     #[serde(rename = "_id")]
//!     pub id: Id<User>,
//!     pub name: String,
//! }
//!
//! impl Record for User {
//!     fn id(&self) -> &Id<Self> { &self.id }
//!     fn collection_name() -> &'static str { "users" }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = DocumentStore::new(InMemoryStore::new());
//!     let users = store.typed_collection::<User>();
//!
//!     users.insert(User { id: Id::new(), name: "Alice".to_string() }).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as doclens_memory;

mod aggregate;
pub mod evaluator;
pub mod monitor;
pub mod store;

pub use monitor::InMemoryMonitor;
pub use store::{InMemoryStore, InMemoryStoreBuilder};
