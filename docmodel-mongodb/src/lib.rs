//! MongoDB backend implementation for docmodel.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait,
//! enabling persistent document storage with full query support using MongoDB's querying capabilities.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docmodel = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Persistent storage** - Data is persisted to MongoDB Atlas or self-hosted MongoDB
//! - **Full query support** - Filters, multi-key sorts and aggregation pipelines run on the server
//! - **Indexing** - Unique, sparse, partial and TTL indexes declared on models
//! - **Duplicate keys** - Unique index violations surface as `DocumentStoreError::DuplicateKey`
//!
//! # Example
//!
//! ```ignore
//! use docmodel::{backend::StoreBackendBuilder, mongodb::MongoDbStore, registry::ModelRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoDbStore::builder("mongodb://localhost:27017", "my_database")
//!         .build()
//!         .await?;
//!     let registry = ModelRegistry::new(store);
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_mongodb;

pub mod store;
mod query;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
