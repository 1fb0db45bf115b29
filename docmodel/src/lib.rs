//! Main docmodel crate providing schema-validated document models.
//!
//! This crate is the primary entry point for users of the docmodel framework.
//! It re-exports the core types and functionality from the sub-crates and provides
//! convenient access to the storage backends.
//!
//! # Features
//!
//! - **Schema binding** - Describe a document once and get validation, defaults and a typed view
//! - **Enhancement** - Statics, methods, virtuals, indexes and lifecycle hooks on top of the schema
//! - **Stale document detection** - Stored documents are checked against the current schema on load
//! - **Multiple backends** - In-memory and MongoDB storage behind one backend trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{prelude::*, memory::InMemoryStore};
//! use bson::doc;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! #[serde(rename_all = "camelCase")]
//! pub struct Cat {
//!     pub name: String,
//!     pub lives: i32,
//! }
//!
//! struct FindByName;
//!
//! #[async_trait]
//! impl Static<Cat> for FindByName {
//!     const NAME: &'static str = "findByName";
//!     type Args = String;
//!     type Output = Option<HydratedDocument<Cat>>;
//!
//!     async fn call(&self, model: &Model<Cat>, name: String) -> ModelResult<Self::Output> {
//!         model.find_one(Filter::eq("name", name)).await
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ModelRegistry::new(InMemoryStore::new());
//!
//!     let cats = registry
//!         .model::<Cat>(
//!             "Cat",
//!             Schema::new(object([
//!                 ("name", string()),
//!                 ("lives", integer().default(9)),
//!             ])),
//!         )?
//!         .enhance(
//!             ModelOptions::new()
//!                 .collection("cats")
//!                 .with_static(FindByName)
//!                 .index_with(IndexDef::asc("name"), IndexOptions { unique: true, ..Default::default() }),
//!         )?;
//!
//!     cats.sync_indexes().await?;
//!     cats.create(doc! { "name": "Felix" }).await?;
//!
//!     let felix = cats.call::<FindByName>("Felix".into()).await?;
//!     println!("{:?}", felix.map(|cat| cat.data()));
//!
//!     registry.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Identifiers
//!
//! [`object_id::object_id`] is a schema node that accepts an `ObjectId`, its hex string or a
//! populated document carrying `_id`, and always yields an `ObjectId`:
//!
//! ```ignore
//! let posts = registry.model::<bson::Document>(
//!     "BlogPost",
//!     Schema::new(object([
//!         ("title", string()),
//!         ("commenters", object_id().array()),
//!     ])),
//! )?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docmodel_core::{
    backend, binder, document, enhance, error, hooks, index, members, model, object_id, path,
    query, registry, schema, update,
};

// Re-export BSON types for convenience
pub use bson;
pub use async_trait::async_trait;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmodel_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmodel_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
