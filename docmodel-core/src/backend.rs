//! Storage backend abstraction for models.
//!
//! This module defines the traits that abstract over different storage implementations,
//! allowing models to persist to various backends (in-memory, MongoDB, ...).
//!
//! # Overview
//!
//! The [`StoreBackend`] trait provides a unified async interface for all storage operations
//! the model layer needs: document insertion, replacement, retrieval, deletion, querying,
//! updates, counting, aggregation and index and collection management. Implementations are required
//! to be thread-safe (`Send + Sync`) and support concurrent access.
//!
//! Documents cross this boundary as `bson::Document`s that always carry an `ObjectId` under
//! `_id`.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docmodel::backend::StoreBackend;
//! use bson::{doc, oid::ObjectId};
//!
//! let backend = MyBackendImpl::new();
//!
//! let id = ObjectId::new();
//! backend.insert_documents(vec![doc! { "_id": id, "name": "Alice" }], "users").await?;
//! let found = backend.get_documents(vec![id], "users").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Document, oid::ObjectId};
use std::fmt::Debug;

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    index::IndexDef,
    query::{Expr, Query, Sort},
};

/// An update the backend applies to the documents matching a filter.
///
/// Backends apply the update atomically per document, so concurrent updates of the same
/// document do not overwrite each other.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateRequest {
    /// Documents to update. `None` matches every document.
    pub filter: Option<Expr>,
    /// Picks the document a single-document update applies to.
    pub sort: Vec<Sort>,
    /// An update document, see [`apply_update`](crate::update::apply_update).
    pub update: Document,
    /// Update every match instead of the first one.
    pub multi: bool,
    /// Insert a document seeded from the filter's equality terms when nothing matches.
    pub upsert: bool,
}

/// Result of an update or replace operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    /// Id of the document created by an upsert.
    pub upserted_id: Option<ObjectId>,
}

/// Abstract interface for document storage backends.
///
/// Implementers of this trait provide concrete storage strategies for documents. The trait is
/// object safe; models hold their backend as an `Arc<dyn StoreBackend>`.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. The exact concurrency model is implementation-specific but should be
/// documented by the implementer.
///
/// # Error Handling
///
/// Operations return [`DocumentStoreResult<T>`](crate::error::DocumentStoreResult).
/// Writes that would violate a unique index fail with
/// [`DocumentStoreError::DuplicateKey`].
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts new documents into a collection.
    ///
    /// # Arguments
    ///
    /// * `documents` - Documents to insert, each carrying an `ObjectId` `_id`
    /// * `collection` - The name of the collection to insert into. Created automatically if it doesn't exist.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::DocumentAlreadyExists`] when a document with the same `_id` is
    /// already stored.
    async fn insert_documents(
        &self,
        documents: Vec<Document>,
        collection: &str,
    ) -> DocumentStoreResult<()>;

    /// Replaces stored documents entirely, matching them by `_id`.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::DocumentNotFound`] when a document is not stored.
    async fn replace_documents(
        &self,
        documents: Vec<Document>,
        collection: &str,
    ) -> DocumentStoreResult<()>;

    /// Applies an update to the first matching document, or to every match when
    /// `request.multi` is set.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::DuplicateKey`] when the update would break a unique index. Nothing
    /// is written in that case.
    async fn update_documents(
        &self,
        request: UpdateRequest,
        collection: &str,
    ) -> DocumentStoreResult<UpdateResult>;

    /// Applies an update to the first matching document and returns that document, as it was
    /// before the update or, with `return_updated`, after it. `request.multi` is ignored.
    ///
    /// An upsert returns the inserted document with `return_updated` and `None` otherwise.
    async fn find_one_and_update(
        &self,
        request: UpdateRequest,
        return_updated: bool,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>>;

    /// Deletes documents by id and returns how many were removed. Missing ids are skipped.
    async fn delete_documents(
        &self,
        ids: Vec<ObjectId>,
        collection: &str,
    ) -> DocumentStoreResult<u64>;

    /// Retrieves documents by id. Missing ids are omitted and order is not guaranteed.
    async fn get_documents(
        &self,
        ids: Vec<ObjectId>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Queries documents in a collection using a structured query.
    ///
    /// # Arguments
    ///
    /// * `query` - The [`Query`] object specifying filters, sorts, limits, and offsets
    /// * `collection` - The name of the collection to query
    async fn query_documents(
        &self,
        query: Query,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Counts the documents matching `filter`, or every document when `filter` is `None`.
    async fn count_documents(
        &self,
        filter: Option<Expr>,
        collection: &str,
    ) -> DocumentStoreResult<u64>;

    /// Runs an aggregation pipeline.
    ///
    /// Backends may support only a subset of stages and report the rest as
    /// [`DocumentStoreError::Unsupported`].
    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Creates an index. Creating an index that already exists with the same name is a no-op.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::DuplicateKey`] when a unique index cannot be built because
    /// stored documents already collide.
    async fn create_index(&self, index: IndexDef, collection: &str) -> DocumentStoreResult<()>;

    /// Lists the indexes declared on a collection.
    async fn list_indexes(&self, collection: &str) -> DocumentStoreResult<Vec<IndexDef>>;

    /// Creates an empty collection. Creating an existing collection is a no-op.
    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Drops a collection with its documents and indexes.
    ///
    /// # Warning
    ///
    /// This operation is irreversible.
    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Lists the names of all collections in the store.
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op, but backends with external connections
    /// should override this.
    async fn shutdown(&self) -> DocumentStoreResult<()> {
        Ok(())
    }
}

/// Factory for backends that need asynchronous setup.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}

/// Extracts the `_id` of a stored document.
///
/// # Errors
///
/// [`DocumentStoreError::InvalidDocument`] when `_id` is missing or not an `ObjectId`.
pub fn document_id(document: &Document) -> DocumentStoreResult<ObjectId> {
    document
        .get_object_id("_id")
        .map_err(|_| DocumentStoreError::InvalidDocument("document has no ObjectId _id".to_string()))
}
