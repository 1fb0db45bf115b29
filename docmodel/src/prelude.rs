//! Convenient re-exports of commonly used types from docmodel.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docmodel::prelude::*;
//! ```
//!
//! This provides access to:
//! - Schema combinators and the identifier helper
//! - The registry, bound models and enhancement options
//! - Models, hydrated documents and their members
//! - Hook descriptors and targets
//! - Store backends, queries and error types

pub use docmodel_core::{
    schema::{
        Schema, ObjectSchema, SchemaNode, SafeParse, ValidationError, ValidationIssue, IssueCode,
        object, string, number, integer, boolean, date, any, enumeration, literal, array, union,
    },
    object_id::object_id,
    registry::{ModelRegistry, ModelRegistryBuilder, RegistryError, StalePolicy},
    binder::BoundModel,
    enhance::ModelOptions,
    model::{Model, UpdateOptions, UpdateResult, DeleteResult, FindOneAndUpdateOptions, ReturnDocument},
    document::{DocumentData, HydratedDocument},
    members::{Static, Method, Virtual, VirtualSetter, VirtualDef},
    hooks::{
        Operation, HookTarget, QueryContext, OperationOutcome, PreHook, PostHook, ErrorHook,
        PreHookDescriptor, PostHookDescriptor, HookError,
    },
    index::{IndexDef, IndexDirection, IndexOptions},
    backend::{StoreBackend, StoreBackendBuilder, UpdateRequest},
    query::{Query, QueryVisitor, Expr, Sort, SortDirection, FieldOp, QueryBuilder, Filter},
    error::{DocumentStoreError, DocumentStoreResult, ModelError, ModelResult},
};

pub use async_trait::async_trait;
