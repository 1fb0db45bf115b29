//! Schema-validated document models with typed statics, methods, virtuals and lifecycle hooks.
//!
//! This crate is the core of the docmodel project and provides:
//!
//! - **Schemas** ([`schema`]) - Combinators that validate, coerce and default BSON values
//! - **Identifier coercion** ([`object_id`]) - A schema node accepting ids, hex strings and populated references
//! - **Binding** ([`binder`]) - Turning a schema into a registered model with validation and load checks
//! - **Enhancement** ([`enhance`]) - Adding statics, methods, virtuals, indexes and hooks to a bound model
//! - **Models and documents** ([`model`], [`document`]) - The runtime operations hooks attach to
//! - **Lifecycle hooks** ([`hooks`]) - Per-operation pre/post hooks checked against a capability table
//! - **Registry** ([`registry`]) - Name-to-model map owning the storage backend
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing different storage backends
//! - **Query and filtering API** ([`query`]) - Type-safe query construction and filtering
//! - **Error handling** ([`error`]) - Error types and result types per layer
//!
//! # Example
//!
//! ```ignore
//! use docmodel_core::{
//!     registry::ModelRegistry,
//!     schema::{Schema, object, string},
//! };
//! use bson::doc;
//!
//! let registry = ModelRegistry::new(InMemoryStore::new());
//! let schema = Schema::<bson::Document>::new(object([("name", string())]));
//!
//! let cats = registry.model("Cat", schema)?;
//! let felix = cats.create(doc! { "name": "Felix" }).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_core;

pub mod backend;
pub mod binder;
pub mod document;
pub mod enhance;
pub mod error;
pub mod hooks;
pub mod index;
pub mod members;
pub mod model;
pub mod object_id;
pub mod path;
pub mod query;
pub mod registry;
pub mod schema;
pub mod update;
