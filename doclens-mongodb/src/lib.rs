//! MongoDB backend implementation for doclens.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait. Filters
//! and aggregation pipelines are sent in the exact form the core renderer produces, and
//! server errors keep their numeric codes so write failures classify correctly.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! doclens = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use doclens::{backend::StoreBackendBuilder, mongodb::MongoDbStore, store::DocumentStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MongoDbStore::builder("mongodb://localhost:27017", "my_database")
//!         .app_name("my-service")
//!         .max_pool_size(16)
//!         .build()
//!         .await?;
//!     let store = DocumentStore::new(backend);
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as doclens_mongodb;

pub mod error;
pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
