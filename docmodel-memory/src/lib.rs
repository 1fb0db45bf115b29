//! In-memory document storage backend for docmodel.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development,
//! testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Open documents** - Stores `bson::Document`s exactly as the model layer hands them over
//! - **Query support** - Dotted-path filtering, multi-key sorting, and pagination
//! - **Unique indexes** - Duplicate keys are rejected, honoring sparse and partial indexes
//! - **Aggregation subset** - `$match` (equality), `$sort`, `$skip`, `$limit` and `$count`
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{memory::InMemoryStore, registry::ModelRegistry, schema::{Schema, object, string}};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ModelRegistry::new(InMemoryStore::new());
//!     let cats = registry.model::<bson::Document>("Cat", Schema::new(object([("name", string())])))?;
//!
//!     cats.create(doc! { "name": "Felix" }).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_memory;

pub mod store;
mod evaluator;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
