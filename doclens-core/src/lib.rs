//! A typed object-document mapping layer over document databases.
//!
//! This crate is the core of the doclens project and provides:
//!
//! - **Identifiers** ([`id`]) - Typed, opaque string identifiers
//! - **Records and converters** ([`document`]) - The mapping between records and wire documents
//! - **Field algebra** ([`field`], [`query`], [`expression`]) - Typed comparisons, boolean
//!   composition and document transforms
//! - **Pipelines** ([`pipeline`], [`render`], [`aggregate`]) - Immutable aggregation pipelines,
//!   their canonical rendering and typed execution
//! - **Collections** ([`collection`], [`batch`]) - Typed CRUD, sampling and bulk writes
//! - **Failures** ([`failure`]) - Classification of write failures
//! - **Store backend abstraction** ([`backend`]) - The seam to concrete database drivers
//! - **Change monitoring** ([`monitor`]) - The per-collection change subscription contract
//! - **Document store** ([`store`]) - Main entry point handing out typed collections
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use doclens::{document::Record, id::Id};
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
//!     fn id(&self) -> &Id<Self> {
//!         &self.id
//!     }
//!
//!     fn collection_name() -> &'static str {
//!         "users"
//!     }
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as doclens_core;

mod chain;

pub mod aggregate;
pub mod backend;
pub mod batch;
pub mod collection;
pub mod document;
pub mod error;
pub mod expression;
pub mod failure;
pub mod field;
pub mod id;
pub mod monitor;
pub mod pipeline;
pub mod query;
pub mod render;
pub mod store;
