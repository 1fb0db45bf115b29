//! Lifecycle hooks.
//!
//! Hooks run before ([`HookPhase::Pre`]) or after ([`HookPhase::Post`]) a model
//! [`Operation`]. Each operation runs in one of three modes, which decides what a hook sees
//! through its [`HookTarget`]:
//!
//! - **document** mode hands the hook the [`HydratedDocument`] being validated, saved, loaded,
//!   updated or deleted;
//! - **query** mode hands it the [`QueryContext`] of a model-level query, whose filter and
//!   update the hook may rewrite;
//! - **operation** mode (aggregate and insertMany) hands it the pipeline or the batch.
//!
//! A bare descriptor runs in the operation's default mode. A descriptor carrying an
//! [`Applicability`] opts into document mode, query mode or both. Which descriptor shapes an
//! operation accepts is fixed by its [`Capabilities`]; registering a shape the operation does
//! not allow fails with a [`HookError`].
//!
//! | operation | pre flags | post flags | document | query | error handler | sync only |
//! |---|---|---|---|---|---|---|
//! | init | no | yes | yes | no | no | yes |
//! | validate, save, updateOne, deleteOne | yes | yes | yes | yes | yes | no |
//! | query operations | yes | yes | no | yes | yes | no |
//! | aggregate, insertMany | no | no | no | no | no | no |
//!
//! Handlers of one operation and phase run sequentially in registration order. An error from
//! any handler stops the operation; post error handlers of that operation then see the error.

use async_trait::async_trait;
use bson::Document;
use std::{collections::HashMap, fmt, sync::Arc};
use thiserror::Error;

use crate::{
    document::{DocumentData, HydratedDocument},
    error::{ModelError, ModelResult},
    model::{DeleteResult, UpdateResult},
    query::{Expr, Query},
};

/// Operations hooks can attach to, named as the document mapper names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Init,
    Validate,
    Save,
    UpdateOne,
    DeleteOne,
    Count,
    EstimatedDocumentCount,
    CountDocuments,
    DeleteMany,
    Distinct,
    Find,
    FindOne,
    FindOneAndDelete,
    FindOneAndRemove,
    FindOneAndReplace,
    FindOneAndUpdate,
    ReplaceOne,
    UpdateMany,
    Aggregate,
    InsertMany,
}

impl Operation {
    pub const ALL: [Operation; 20] = [
        Operation::Init,
        Operation::Validate,
        Operation::Save,
        Operation::UpdateOne,
        Operation::DeleteOne,
        Operation::Count,
        Operation::EstimatedDocumentCount,
        Operation::CountDocuments,
        Operation::DeleteMany,
        Operation::Distinct,
        Operation::Find,
        Operation::FindOne,
        Operation::FindOneAndDelete,
        Operation::FindOneAndRemove,
        Operation::FindOneAndReplace,
        Operation::FindOneAndUpdate,
        Operation::ReplaceOne,
        Operation::UpdateMany,
        Operation::Aggregate,
        Operation::InsertMany,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Init => "init",
            Operation::Validate => "validate",
            Operation::Save => "save",
            Operation::UpdateOne => "updateOne",
            Operation::DeleteOne => "deleteOne",
            Operation::Count => "count",
            Operation::EstimatedDocumentCount => "estimatedDocumentCount",
            Operation::CountDocuments => "countDocuments",
            Operation::DeleteMany => "deleteMany",
            Operation::Distinct => "distinct",
            Operation::Find => "find",
            Operation::FindOne => "findOne",
            Operation::FindOneAndDelete => "findOneAndDelete",
            Operation::FindOneAndRemove => "findOneAndRemove",
            Operation::FindOneAndReplace => "findOneAndReplace",
            Operation::FindOneAndUpdate => "findOneAndUpdate",
            Operation::ReplaceOne => "replaceOne",
            Operation::UpdateMany => "updateMany",
            Operation::Aggregate => "aggregate",
            Operation::InsertMany => "insertMany",
        }
    }

    /// The descriptor shapes this operation accepts.
    pub const fn capabilities(self) -> Capabilities {
        match self {
            Operation::Init => Capabilities {
                pre_flags: false,
                post_flags: true,
                document: true,
                query: false,
                error_handler: false,
                sync_only: true,
            },
            Operation::Validate | Operation::Save | Operation::UpdateOne | Operation::DeleteOne => {
                Capabilities {
                    pre_flags: true,
                    post_flags: true,
                    document: true,
                    query: true,
                    error_handler: true,
                    sync_only: false,
                }
            }
            Operation::Aggregate | Operation::InsertMany => Capabilities {
                pre_flags: false,
                post_flags: false,
                document: false,
                query: false,
                error_handler: false,
                sync_only: false,
            },
            _ => Capabilities {
                pre_flags: true,
                post_flags: true,
                document: false,
                query: true,
                error_handler: true,
                sync_only: false,
            },
        }
    }

    /// The mode a bare descriptor runs in.
    pub const fn default_mode(self) -> HookMode {
        match self {
            Operation::Init | Operation::Validate | Operation::Save => HookMode::Document,
            Operation::Aggregate | Operation::InsertMany => HookMode::Operation,
            _ => HookMode::Query,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    Pre,
    Post,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookPhase::Pre => "pre",
            HookPhase::Post => "post",
        })
    }
}

/// What an operation hands to its hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookMode {
    Document,
    Query,
    Operation,
}

/// Static record of the hook descriptor shapes an [`Operation`] accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Pre descriptors may carry an [`Applicability`].
    pub pre_flags: bool,
    /// Post descriptors may carry an [`Applicability`].
    pub post_flags: bool,
    /// Applicability may select document mode.
    pub document: bool,
    /// Applicability may select query mode.
    pub query: bool,
    /// Post error handlers are allowed.
    pub error_handler: bool,
    /// Handlers must be synchronous.
    pub sync_only: bool,
}

/// A hook descriptor was rejected at registration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    #[error("{phase} {operation} hooks do not accept document/query flags")]
    FlagsNotAllowed {
        operation: Operation,
        phase: HookPhase,
    },
    #[error("{operation} hooks cannot run as document middleware")]
    DocumentNotAllowed { operation: Operation },
    #[error("{operation} hooks cannot run as query middleware")]
    QueryNotAllowed { operation: Operation },
    #[error("{operation} does not accept post error handlers")]
    ErrorHandlerNotAllowed { operation: Operation },
    #[error("{operation} hooks must be synchronous")]
    AsyncNotAllowed { operation: Operation },
    #[error("{operation} hook enables neither document nor query mode")]
    NoApplicability { operation: Operation },
}

/// Selects the modes a flagged descriptor runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applicability {
    pub document: bool,
    pub query: bool,
}

impl Applicability {
    fn allows(self, mode: HookMode) -> bool {
        match mode {
            HookMode::Document => self.document,
            HookMode::Query => self.query,
            HookMode::Operation => false,
        }
    }
}

/// The state of a model-level query, visible to query-mode hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryContext {
    pub operation: Operation,
    pub model: String,
    pub query: Query,
    /// Update document of update operations.
    pub update: Option<Document>,
    /// Replacement document of replace operations.
    pub replacement: Option<Document>,
    pub upsert: bool,
}

impl QueryContext {
    pub fn new(operation: Operation, model: impl Into<String>, query: Query) -> Self {
        Self {
            operation,
            model: model.into(),
            query,
            update: None,
            replacement: None,
            upsert: false,
        }
    }

    pub fn filter(&self) -> Expr {
        self.query.filter_or_all()
    }

    pub fn set_filter(&mut self, filter: Expr) {
        self.query.filter = Some(filter);
    }

    /// The update document, created empty when the operation has none yet.
    pub fn update_mut(&mut self) -> &mut Document {
        self.update.get_or_insert_with(Document::new)
    }
}

/// The value a hook operates on.
pub enum HookTarget<'a, D> {
    Document(&'a mut HydratedDocument<D>),
    Query(&'a mut QueryContext),
    Aggregate(&'a mut Vec<Document>),
    InsertMany(&'a mut Vec<HydratedDocument<D>>),
}

impl<'a, D> HookTarget<'a, D> {
    /// Borrows the target again for a shorter lifetime, so several hooks can share it.
    pub fn reborrow(&mut self) -> HookTarget<'_, D> {
        match self {
            HookTarget::Document(doc) => HookTarget::Document(&mut **doc),
            HookTarget::Query(query) => HookTarget::Query(&mut **query),
            HookTarget::Aggregate(pipeline) => HookTarget::Aggregate(&mut **pipeline),
            HookTarget::InsertMany(docs) => HookTarget::InsertMany(&mut **docs),
        }
    }

    pub fn mode(&self) -> HookMode {
        match self {
            HookTarget::Document(_) => HookMode::Document,
            HookTarget::Query(_) => HookMode::Query,
            HookTarget::Aggregate(_) | HookTarget::InsertMany(_) => HookMode::Operation,
        }
    }

    pub fn document(&mut self) -> Option<&mut HydratedDocument<D>> {
        match self {
            HookTarget::Document(doc) => Some(&mut **doc),
            _ => None,
        }
    }

    pub fn query(&mut self) -> Option<&mut QueryContext> {
        match self {
            HookTarget::Query(query) => Some(&mut **query),
            _ => None,
        }
    }
}

/// The result of a successful operation, visible to post hooks.
#[derive(Debug)]
pub enum OperationOutcome<D> {
    Unit,
    Count(u64),
    Document(Option<HydratedDocument<D>>),
    Documents(Vec<HydratedDocument<D>>),
    /// Distinct values.
    Values(Vec<bson::Bson>),
    /// Raw aggregation output.
    Raw(Vec<Document>),
    Deleted(DeleteResult),
    Updated(UpdateResult),
}

/// A handler run before an operation.
#[async_trait]
pub trait PreHook<D: DocumentData>: Send + Sync {
    async fn run(&self, target: HookTarget<'_, D>) -> ModelResult<()>;

    /// Whether the handler completes without awaiting. `init` accepts only synchronous
    /// handlers.
    fn is_sync(&self) -> bool {
        false
    }
}

/// A handler run after an operation succeeds.
#[async_trait]
pub trait PostHook<D: DocumentData>: Send + Sync {
    async fn run(
        &self,
        target: HookTarget<'_, D>,
        outcome: &OperationOutcome<D>,
    ) -> ModelResult<()>;

    fn is_sync(&self) -> bool {
        false
    }
}

/// A handler run after an operation fails.
///
/// Returning `Ok(())` keeps the original error. Returning an error replaces it for the
/// remaining handlers and the caller.
#[async_trait]
pub trait ErrorHook<D: DocumentData>: Send + Sync {
    async fn handle(&self, target: HookTarget<'_, D>, error: &ModelError) -> ModelResult<()>;
}

struct SyncPre<F>(F);

#[async_trait]
impl<D, F> PreHook<D> for SyncPre<F>
where
    D: DocumentData,
    F: for<'a> Fn(HookTarget<'a, D>) -> ModelResult<()> + Send + Sync,
{
    async fn run(&self, target: HookTarget<'_, D>) -> ModelResult<()> {
        (self.0)(target)
    }

    fn is_sync(&self) -> bool {
        true
    }
}

struct SyncPost<F>(F);

#[async_trait]
impl<D, F> PostHook<D> for SyncPost<F>
where
    D: DocumentData,
    F: for<'a> Fn(HookTarget<'a, D>, &OperationOutcome<D>) -> ModelResult<()> + Send + Sync,
{
    async fn run(
        &self,
        target: HookTarget<'_, D>,
        outcome: &OperationOutcome<D>,
    ) -> ModelResult<()> {
        (self.0)(target, outcome)
    }

    fn is_sync(&self) -> bool {
        true
    }
}

struct SyncError<F>(F);

#[async_trait]
impl<D, F> ErrorHook<D> for SyncError<F>
where
    D: DocumentData,
    F: for<'a> Fn(HookTarget<'a, D>, &ModelError) -> ModelResult<()> + Send + Sync,
{
    async fn handle(&self, target: HookTarget<'_, D>, error: &ModelError) -> ModelResult<()> {
        (self.0)(target, error)
    }
}

/// A pre hook plus the modes it runs in.
pub struct PreHookDescriptor<D> {
    handler: Arc<dyn PreHook<D>>,
    applicability: Option<Applicability>,
}

impl<D> Clone for PreHookDescriptor<D> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            applicability: self.applicability,
        }
    }
}

impl<D: DocumentData> PreHookDescriptor<D> {
    /// A bare descriptor around a handler.
    pub fn new(handler: impl PreHook<D> + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            applicability: None,
        }
    }

    /// A bare descriptor around a synchronous closure.
    pub fn sync<F>(f: F) -> Self
    where
        F: for<'a> Fn(HookTarget<'a, D>) -> ModelResult<()> + Send + Sync + 'static,
    {
        Self::new(SyncPre(f))
    }

    /// A bare synchronous handler that only acts on document targets.
    pub fn document<F>(f: F) -> Self
    where
        F: Fn(&mut HydratedDocument<D>) -> ModelResult<()> + Send + Sync + 'static,
    {
        Self::sync(move |target: HookTarget<'_, D>| match target {
            HookTarget::Document(doc) => f(doc),
            _ => Ok(()),
        })
    }

    /// A bare synchronous handler that only acts on query targets.
    pub fn query<F>(f: F) -> Self
    where
        F: Fn(&mut QueryContext) -> ModelResult<()> + Send + Sync + 'static,
    {
        Self::sync(move |target: HookTarget<'_, D>| match target {
            HookTarget::Query(query) => f(query),
            _ => Ok(()),
        })
    }

    /// Turns this into a flagged descriptor running in the selected modes.
    pub fn applies_to(mut self, document: bool, query: bool) -> Self {
        self.applicability = Some(Applicability { document, query });
        self
    }

    pub fn applicability(&self) -> Option<Applicability> {
        self.applicability
    }
}

enum PostHandler<D> {
    Success(Arc<dyn PostHook<D>>),
    Error(Arc<dyn ErrorHook<D>>),
}

impl<D> Clone for PostHandler<D> {
    fn clone(&self) -> Self {
        match self {
            PostHandler::Success(handler) => PostHandler::Success(handler.clone()),
            PostHandler::Error(handler) => PostHandler::Error(handler.clone()),
        }
    }
}

/// A post hook or post error handler plus the modes it runs in.
pub struct PostHookDescriptor<D> {
    handler: PostHandler<D>,
    applicability: Option<Applicability>,
}

impl<D> Clone for PostHookDescriptor<D> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            applicability: self.applicability,
        }
    }
}

impl<D: DocumentData> PostHookDescriptor<D> {
    pub fn new(handler: impl PostHook<D> + 'static) -> Self {
        Self {
            handler: PostHandler::Success(Arc::new(handler)),
            applicability: None,
        }
    }

    pub fn sync<F>(f: F) -> Self
    where
        F: for<'a> Fn(HookTarget<'a, D>, &OperationOutcome<D>) -> ModelResult<()>
            + Send
            + Sync
            + 'static,
    {
        Self::new(SyncPost(f))
    }

    /// A bare synchronous handler that only acts on document targets.
    pub fn document<F>(f: F) -> Self
    where
        F: Fn(&mut HydratedDocument<D>, &OperationOutcome<D>) -> ModelResult<()>
            + Send
            + Sync
            + 'static,
    {
        Self::sync(
            move |target: HookTarget<'_, D>, outcome: &OperationOutcome<D>| match target {
                HookTarget::Document(doc) => f(doc, outcome),
                _ => Ok(()),
            },
        )
    }

    /// A bare synchronous handler that only acts on query targets.
    pub fn query<F>(f: F) -> Self
    where
        F: Fn(&mut QueryContext, &OperationOutcome<D>) -> ModelResult<()> + Send + Sync + 'static,
    {
        Self::sync(
            move |target: HookTarget<'_, D>, outcome: &OperationOutcome<D>| match target {
                HookTarget::Query(query) => f(query, outcome),
                _ => Ok(()),
            },
        )
    }

    /// An error handler, run only when the operation fails.
    pub fn error_handler(handler: impl ErrorHook<D> + 'static) -> Self {
        Self {
            handler: PostHandler::Error(Arc::new(handler)),
            applicability: None,
        }
    }

    /// An error handler around a synchronous closure.
    pub fn on_error<F>(f: F) -> Self
    where
        F: for<'a> Fn(HookTarget<'a, D>, &ModelError) -> ModelResult<()> + Send + Sync + 'static,
    {
        Self::error_handler(SyncError(f))
    }

    pub fn applies_to(mut self, document: bool, query: bool) -> Self {
        self.applicability = Some(Applicability { document, query });
        self
    }

    pub fn applicability(&self) -> Option<Applicability> {
        self.applicability
    }

    pub fn is_error_handler(&self) -> bool {
        matches!(self.handler, PostHandler::Error(_))
    }

    fn is_sync(&self) -> bool {
        match &self.handler {
            PostHandler::Success(handler) => handler.is_sync(),
            PostHandler::Error(_) => false,
        }
    }
}

fn applies(operation: Operation, applicability: Option<Applicability>, mode: HookMode) -> bool {
    match applicability {
        None => operation.default_mode() == mode,
        Some(applicability) => applicability.allows(mode),
    }
}

fn check_applicability(
    operation: Operation,
    phase: HookPhase,
    applicability: Option<Applicability>,
) -> Result<(), HookError> {
    let capabilities = operation.capabilities();

    let Some(applicability) = applicability else {
        return Ok(());
    };

    let flags_allowed = match phase {
        HookPhase::Pre => capabilities.pre_flags,
        HookPhase::Post => capabilities.post_flags,
    };

    if !flags_allowed {
        return Err(HookError::FlagsNotAllowed { operation, phase });
    }

    if !applicability.document && !applicability.query {
        return Err(HookError::NoApplicability { operation });
    }

    if applicability.document && !capabilities.document {
        return Err(HookError::DocumentNotAllowed { operation });
    }

    if applicability.query && !capabilities.query {
        return Err(HookError::QueryNotAllowed { operation });
    }

    Ok(())
}

/// The hooks of one model, grouped by operation and kept in registration order.
pub struct HookSet<D> {
    pre: HashMap<Operation, Vec<PreHookDescriptor<D>>>,
    post: HashMap<Operation, Vec<PostHookDescriptor<D>>>,
}

impl<D> Default for HookSet<D> {
    fn default() -> Self {
        Self {
            pre: HashMap::new(),
            post: HashMap::new(),
        }
    }
}

impl<D> Clone for HookSet<D> {
    fn clone(&self) -> Self {
        Self {
            pre: self.pre.clone(),
            post: self.post.clone(),
        }
    }
}

impl<D: DocumentData> HookSet<D> {
    /// Registers a pre hook after checking it against the operation's capabilities.
    ///
    /// # Errors
    ///
    /// A [`HookError`] naming the first capability the descriptor violates.
    pub fn add_pre(
        &mut self,
        operation: Operation,
        descriptor: PreHookDescriptor<D>,
    ) -> Result<(), HookError> {
        check_applicability(operation, HookPhase::Pre, descriptor.applicability)?;

        if operation.capabilities().sync_only && !descriptor.handler.is_sync() {
            return Err(HookError::AsyncNotAllowed { operation });
        }

        tracing::debug!(operation = %operation, phase = "pre", "registering hook");

        self.pre.entry(operation).or_default().push(descriptor);

        Ok(())
    }

    /// Registers a post hook or error handler after checking it against the operation's
    /// capabilities.
    pub fn add_post(
        &mut self,
        operation: Operation,
        descriptor: PostHookDescriptor<D>,
    ) -> Result<(), HookError> {
        let capabilities = operation.capabilities();

        check_applicability(operation, HookPhase::Post, descriptor.applicability)?;

        if descriptor.is_error_handler() && !capabilities.error_handler {
            return Err(HookError::ErrorHandlerNotAllowed { operation });
        }

        if capabilities.sync_only && !descriptor.is_sync() {
            return Err(HookError::AsyncNotAllowed { operation });
        }

        tracing::debug!(operation = %operation, phase = "post", "registering hook");

        self.post.entry(operation).or_default().push(descriptor);

        Ok(())
    }

    /// Number of hooks registered for an operation and phase.
    pub fn len(&self, operation: Operation, phase: HookPhase) -> usize {
        match phase {
            HookPhase::Pre => self.pre.get(&operation).map_or(0, Vec::len),
            HookPhase::Post => self.post.get(&operation).map_or(0, Vec::len),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pre.values().all(Vec::is_empty) && self.post.values().all(Vec::is_empty)
    }

    pub(crate) async fn run_pre(
        &self,
        operation: Operation,
        target: &mut HookTarget<'_, D>,
    ) -> ModelResult<()> {
        let mode = target.mode();

        for descriptor in self.pre.get(&operation).into_iter().flatten() {
            if applies(operation, descriptor.applicability, mode) {
                descriptor.handler.run(target.reborrow()).await?;
            }
        }

        Ok(())
    }

    pub(crate) async fn run_post(
        &self,
        operation: Operation,
        target: &mut HookTarget<'_, D>,
        outcome: &OperationOutcome<D>,
    ) -> ModelResult<()> {
        let mode = target.mode();

        for descriptor in self.post.get(&operation).into_iter().flatten() {
            if !applies(operation, descriptor.applicability, mode) {
                continue;
            }

            if let PostHandler::Success(handler) = &descriptor.handler {
                handler.run(target.reborrow(), outcome).await?;
            }
        }

        Ok(())
    }

    pub(crate) async fn run_error(
        &self,
        operation: Operation,
        target: &mut HookTarget<'_, D>,
        error: ModelError,
    ) -> ModelError {
        let mode = target.mode();
        let mut error = error;

        for descriptor in self.post.get(&operation).into_iter().flatten() {
            if !applies(operation, descriptor.applicability, mode) {
                continue;
            }

            if let PostHandler::Error(handler) = &descriptor.handler {
                if let Err(replacement) = handler.handle(target.reborrow(), &error).await {
                    error = replacement;
                }
            }
        }

        error
    }

    /// Runs the post hooks of a finished operation, or its error handlers when it failed.
    pub(crate) async fn complete<T, F>(
        &self,
        operation: Operation,
        target: &mut HookTarget<'_, D>,
        result: ModelResult<T>,
        outcome: F,
    ) -> ModelResult<T>
    where
        T: Send,
        F: FnOnce(&T) -> OperationOutcome<D> + Send,
    {
        let value = match result {
            Ok(value) => value,
            Err(error) => return Err(self.run_error(operation, target, error).await),
        };

        let outcome = outcome(&value);

        match self.run_post(operation, target, &outcome).await {
            Ok(()) => Ok(value),
            Err(error) => Err(self.run_error(operation, target, error).await),
        }
    }
}
