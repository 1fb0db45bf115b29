//! Error types and result types for the storage and model layers.
//!
//! Storage backends report [`DocumentStoreError`]. The model layer wraps those, together with
//! schema validation, registry and hook registration failures, in [`ModelError`].

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::{hooks::HookError, registry::RegistryError, schema::ValidationError};

/// Errors raised by a storage backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The requested document was not found in the collection.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// A write would violate a unique index.
    /// The first argument is the index name, the second is the collection name.
    #[error("Duplicate key for index {0} in collection {1}")]
    DuplicateKey(String, String),
    /// The document has an invalid structure for storage.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// The backend does not implement the requested feature.
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for backend operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

/// Errors raised by models, documents and the registry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Strict schema parsing rejected the document.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// The storage backend failed.
    #[error(transparent)]
    Store(#[from] DocumentStoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// A hook descriptor is not permitted for its operation.
    #[error(transparent)]
    Hook(#[from] HookError),
    /// An index names a path the schema does not declare.
    #[error("Unknown index path '{path}' on model {model}")]
    UnknownIndexPath { model: String, path: String },
    #[error("Unknown static '{0}'")]
    UnknownStatic(String),
    #[error("Unknown method '{0}'")]
    UnknownMethod(String),
    #[error("Unknown virtual '{0}'")]
    UnknownVirtual(String),
    /// A setter was requested for a virtual registered without one.
    #[error("Virtual '{0}' is readonly")]
    ReadonlyVirtual(String),
    /// A loaded document no longer matches the schema and the registry rejects stale documents.
    #[error("Stored document {id} in {model} failed to parse: {error}")]
    StaleDocument {
        model: String,
        id: String,
        error: ValidationError,
    },
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Raised by user code (hooks, statics, methods).
    #[error("{0}")]
    Custom(String),
}

impl ModelError {
    /// Builds a [`ModelError::Custom`] from any displayable message.
    pub fn custom(message: impl std::fmt::Display) -> Self {
        ModelError::Custom(message.to_string())
    }
}

/// A specialized `Result` type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

impl From<BsonError> for ModelError {
    fn from(err: BsonError) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for ModelError {
    fn from(err: SerdeJsonError) -> Self {
        ModelError::Serialization(err.to_string())
    }
}
