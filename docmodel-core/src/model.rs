//! Models.
//!
//! A [`Model`] is the runtime handle of one registered document type: its name, collection,
//! schema, hooks, statics, methods, virtuals and index declarations, plus the backend it
//! persists through. Models are cheap to clone; every clone shares the same definition.
//!
//! Model-level operations run their query hooks around the backend call. Hooks see and may
//! rewrite the [`QueryContext`] before the operation executes, and post hooks or error
//! handlers run once it has finished.
//!
//! Updates are applied by the backend and are not validated against the schema, so an update
//! can store a document the schema would reject. Such documents are reported as stale
//! when they are loaded again.

use bson::{Bson, Document, doc, oid::ObjectId, ser::serialize_to_document};
use std::{fmt, future::Future, sync::Arc};

use crate::{
    backend::{StoreBackend, UpdateRequest, document_id},
    document::{DocumentData, HydratedDocument},
    error::{ModelError, ModelResult},
    hooks::{HookSet, HookTarget, Operation, OperationOutcome, QueryContext},
    index::IndexDef,
    members::{Method, MemberTable, Static, Virtual, VirtualEntry},
    path::values_at,
    query::{Expr, Filter, Query},
    schema::Schema,
    update::upsert_seed,
};

pub use crate::backend::UpdateResult;

/// Result of a delete operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOptions {
    /// Insert a document seeded from the filter's equality terms when nothing matches.
    pub upsert: bool,
}

impl UpdateOptions {
    pub fn upsert() -> Self {
        Self { upsert: true }
    }
}

/// Which version of the document `find_one_and_*` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnDocument {
    #[default]
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FindOneAndUpdateOptions {
    pub upsert: bool,
    pub return_document: ReturnDocument,
}

pub(crate) struct ModelInner<D> {
    pub(crate) name: String,
    pub(crate) collection: String,
    pub(crate) schema: Schema<D>,
    pub(crate) backend: Arc<dyn StoreBackend>,
    pub(crate) hooks: HookSet<D>,
    pub(crate) statics: MemberTable,
    pub(crate) methods: MemberTable,
    pub(crate) virtuals: Vec<(String, VirtualEntry<D>)>,
    pub(crate) indexes: Vec<IndexDef>,
}

/// A registered document model.
pub struct Model<D> {
    inner: Arc<ModelInner<D>>,
}

impl<D> Clone for Model<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D> fmt::Debug for Model<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.inner.name)
            .field("collection", &self.inner.collection)
            .field("statics", &self.inner.statics.names())
            .field("methods", &self.inner.methods.names())
            .field(
                "virtuals",
                &self
                    .inner
                    .virtuals
                    .iter()
                    .map(|(name, _)| name.as_str())
                    .collect::<Vec<_>>(),
            )
            .field("indexes", &self.inner.indexes)
            .finish()
    }
}

impl<D> Model<D> {
    pub(crate) fn from_inner(inner: ModelInner<D>) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn inner(&self) -> &ModelInner<D> {
        &self.inner
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn collection_name(&self) -> &str {
        &self.inner.collection
    }

    pub fn schema(&self) -> &Schema<D> {
        &self.inner.schema
    }

    /// Declared indexes, in declaration order. See [`Model::sync_indexes`].
    pub fn indexes(&self) -> &[IndexDef] {
        &self.inner.indexes
    }

    pub fn hooks(&self) -> &HookSet<D> {
        &self.inner.hooks
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.inner.backend
    }

    /// Names of the registered statics, sorted.
    pub fn static_names(&self) -> Vec<String> {
        self.inner.statics.names()
    }

    /// Names of the registered methods, sorted.
    pub fn method_names(&self) -> Vec<String> {
        self.inner.methods.names()
    }

    /// Names of the registered virtuals, in registration order.
    pub fn virtual_names(&self) -> Vec<String> {
        self.inner
            .virtuals
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn has_static(&self, name: &str) -> bool {
        self.inner.statics.contains(name)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.inner.methods.contains(name)
    }

    pub(crate) fn virtual_entry(&self, name: &str) -> Option<&VirtualEntry<D>> {
        self.inner
            .virtuals
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, entry)| entry)
    }

    pub(crate) fn virtual_entries(&self) -> &[(String, VirtualEntry<D>)] {
        &self.inner.virtuals
    }
}

impl<D: DocumentData> Model<D> {
    pub(crate) fn virtual_member<V: Virtual<D>>(&self) -> Option<Arc<V>> {
        self.virtual_entry(V::NAME)?
            .member
            .clone()?
            .downcast::<V>()
            .ok()
    }

    pub(crate) fn method<M: Method<D>>(&self) -> Option<Arc<M>> {
        self.inner.methods.get::<M>(M::NAME)
    }

    /// Invokes a registered static with this model as its receiver.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownStatic`] when `S` was not registered on this model.
    pub async fn call<S: Static<D>>(&self, args: S::Args) -> ModelResult<S::Output> {
        let member = self
            .inner
            .statics
            .get::<S>(S::NAME)
            .ok_or_else(|| ModelError::UnknownStatic(S::NAME.to_string()))?;

        member.call(self, args).await
    }

    /// Creates an unsaved document from raw fields. Nothing is validated until it is saved.
    pub fn new_document(&self, fields: Document) -> HydratedDocument<D> {
        HydratedDocument::from_parts(self.clone(), fields, true)
    }

    /// Creates an unsaved document from the typed view.
    pub fn from_data(&self, data: &D) -> ModelResult<HydratedDocument<D>> {
        Ok(self.new_document(serialize_to_document(data)?))
    }

    /// Creates and saves a document, running the validate and save hooks.
    pub async fn create(&self, fields: Document) -> ModelResult<HydratedDocument<D>> {
        let mut document = self.new_document(fields);
        document.save().await?;
        Ok(document)
    }

    /// Validates and inserts a batch of documents in one backend call.
    ///
    /// The insertMany hooks see the whole batch. Per-document validate hooks run for every
    /// document; save hooks do not run.
    pub async fn insert_many(&self, inputs: Vec<Document>) -> ModelResult<Vec<HydratedDocument<D>>> {
        let mut documents = inputs
            .into_iter()
            .map(|fields| self.new_document(fields))
            .collect::<Vec<_>>();
        let hooks = self.hooks();

        let result = match hooks
            .run_pre(Operation::InsertMany, &mut HookTarget::InsertMany(&mut documents))
            .await
        {
            Ok(()) => self.insert_validated(&mut documents).await,
            Err(error) => Err(error),
        };

        hooks
            .complete(
                Operation::InsertMany,
                &mut HookTarget::InsertMany(&mut documents),
                result,
                |count: &u64| OperationOutcome::Count(*count),
            )
            .await?;

        Ok(documents)
    }

    async fn insert_validated(&self, documents: &mut [HydratedDocument<D>]) -> ModelResult<u64> {
        for document in documents.iter_mut() {
            document.validate().await?;
        }

        let fields = documents
            .iter()
            .map(|document| document.fields().clone())
            .collect::<Vec<_>>();
        let count = fields.len() as u64;

        self.backend()
            .insert_documents(fields, self.collection_name())
            .await?;

        for document in documents.iter_mut() {
            document.mark_persisted();
        }

        Ok(count)
    }

    /// Finds every document matching the query.
    pub async fn find(&self, query: impl Into<Query>) -> ModelResult<Vec<HydratedDocument<D>>> {
        let ctx = QueryContext::new(Operation::Find, self.name(), query.into());

        self.with_query_hooks(
            ctx,
            |ctx| async move {
                let raw = self
                    .backend()
                    .query_documents(ctx.query, self.collection_name())
                    .await?;

                self.hydrate_all(raw).await
            },
            |documents: &Vec<HydratedDocument<D>>| OperationOutcome::Documents(documents.clone()),
        )
        .await
    }

    /// Finds the first document matching `filter`.
    pub async fn find_one(&self, filter: Expr) -> ModelResult<Option<HydratedDocument<D>>> {
        let ctx = QueryContext::new(Operation::FindOne, self.name(), Query::filtered(filter));

        self.with_query_hooks(
            ctx,
            |ctx| async move {
                match self.first_match(ctx.query).await? {
                    Some(fields) => Ok(Some(self.hydrate(fields).await?)),
                    None => Ok(None),
                }
            },
            |document: &Option<HydratedDocument<D>>| OperationOutcome::Document(document.clone()),
        )
        .await
    }

    /// Finds a document by id. Runs the findOne hooks.
    pub async fn find_by_id(&self, id: ObjectId) -> ModelResult<Option<HydratedDocument<D>>> {
        self.find_one(Filter::id(id)).await
    }

    pub async fn count_documents(&self, filter: Expr) -> ModelResult<u64> {
        self.count_with(Operation::CountDocuments, Some(filter)).await
    }

    pub async fn count(&self, filter: Expr) -> ModelResult<u64> {
        self.count_with(Operation::Count, Some(filter)).await
    }

    /// Counts every document in the collection.
    pub async fn estimated_document_count(&self) -> ModelResult<u64> {
        self.count_with(Operation::EstimatedDocumentCount, None).await
    }

    async fn count_with(&self, operation: Operation, filter: Option<Expr>) -> ModelResult<u64> {
        let query = filter.map(Query::filtered).unwrap_or_default();
        let ctx = QueryContext::new(operation, self.name(), query);

        self.with_query_hooks(
            ctx,
            |ctx| async move {
                Ok(self
                    .backend()
                    .count_documents(ctx.query.filter, self.collection_name())
                    .await?)
            },
            |count: &u64| OperationOutcome::Count(*count),
        )
        .await
    }

    /// Distinct values at `path` among documents matching `filter`, in first-seen order.
    ///
    /// Array values are flattened, so `distinct("friends", ..)` yields individual ids.
    pub async fn distinct(&self, path: &str, filter: Expr) -> ModelResult<Vec<Bson>> {
        let ctx = QueryContext::new(Operation::Distinct, self.name(), Query::filtered(filter));

        self.with_query_hooks(
            ctx,
            |ctx| async move {
                let raw = self
                    .backend()
                    .query_documents(ctx.query, self.collection_name())
                    .await?;
                let mut values = Vec::new();

                for document in &raw {
                    for value in values_at(document, path) {
                        let items = match value {
                            Bson::Array(items) => items.clone(),
                            other => vec![other.clone()],
                        };

                        for item in items {
                            if !values.contains(&item) {
                                values.push(item);
                            }
                        }
                    }
                }

                Ok(values)
            },
            |values: &Vec<Bson>| OperationOutcome::Values(values.clone()),
        )
        .await
    }

    /// Applies `update` to the first document matching `filter`.
    pub async fn update_one(
        &self,
        filter: Expr,
        update: Document,
        options: UpdateOptions,
    ) -> ModelResult<UpdateResult> {
        self.update_with(Operation::UpdateOne, filter, update, options)
            .await
    }

    /// Applies `update` to every document matching `filter`.
    pub async fn update_many(
        &self,
        filter: Expr,
        update: Document,
        options: UpdateOptions,
    ) -> ModelResult<UpdateResult> {
        self.update_with(Operation::UpdateMany, filter, update, options)
            .await
    }

    async fn update_with(
        &self,
        operation: Operation,
        filter: Expr,
        update: Document,
        options: UpdateOptions,
    ) -> ModelResult<UpdateResult> {
        let mut ctx = QueryContext::new(operation, self.name(), Query::filtered(filter));
        ctx.update = Some(update);
        ctx.upsert = options.upsert;

        self.with_query_hooks(
            ctx,
            |ctx| async move { self.exec_update(ctx).await },
            |result: &UpdateResult| OperationOutcome::Updated(*result),
        )
        .await
    }

    /// Updates one stored document by id without running query hooks.
    pub(crate) async fn update_by_id(
        &self,
        id: ObjectId,
        update: &Document,
    ) -> ModelResult<UpdateResult> {
        let mut ctx = QueryContext::new(Operation::UpdateOne, self.name(), Filter::id(id).into());
        ctx.update = Some(update.clone());

        self.exec_update(ctx).await
    }

    async fn exec_update(&self, ctx: QueryContext) -> ModelResult<UpdateResult> {
        let request = update_request(ctx);

        Ok(self
            .backend()
            .update_documents(request, self.collection_name())
            .await?)
    }

    /// Inserts a document seeded from the equality terms of `filter`, then shaped by `fill`.
    async fn upsert<F>(&self, filter: &Expr, fill: F) -> ModelResult<ObjectId>
    where
        F: FnOnce(&mut Document) -> ModelResult<()> + Send,
    {
        let mut seed = upsert_seed(Some(filter))?;
        let id = document_id(&seed)?;

        fill(&mut seed)?;

        tracing::debug!(model = %self.name(), id = %id, "upserting document");

        self.backend()
            .insert_documents(vec![seed], self.collection_name())
            .await?;

        Ok(id)
    }

    /// Replaces the first document matching `filter`, keeping its `_id`.
    pub async fn replace_one(
        &self,
        filter: Expr,
        replacement: Document,
        options: UpdateOptions,
    ) -> ModelResult<UpdateResult> {
        let mut ctx = QueryContext::new(Operation::ReplaceOne, self.name(), Query::filtered(filter));
        ctx.replacement = Some(replacement);
        ctx.upsert = options.upsert;

        self.with_query_hooks(
            ctx,
            |ctx| async move {
                let filter = ctx.filter();
                let replacement = ctx.replacement.unwrap_or_default();

                match self.first_match(ctx.query).await? {
                    Some(current) => {
                        let modified = self.replace(&current, replacement).await?;

                        Ok(UpdateResult {
                            matched_count: 1,
                            modified_count: u64::from(modified),
                            upserted_id: None,
                        })
                    }
                    None if ctx.upsert => {
                        let upserted_id = self
                            .upsert(&filter, |seed| replace_fields(seed, replacement))
                            .await?;

                        Ok(UpdateResult {
                            upserted_id: Some(upserted_id),
                            ..UpdateResult::default()
                        })
                    }
                    None => Ok(UpdateResult::default()),
                }
            },
            |result: &UpdateResult| OperationOutcome::Updated(*result),
        )
        .await
    }

    async fn replace(&self, current: &Document, replacement: Document) -> ModelResult<bool> {
        let mut next = doc! { "_id": document_id(current)? };
        replace_fields(&mut next, replacement)?;

        if next == *current {
            return Ok(false);
        }

        self.backend()
            .replace_documents(vec![next], self.collection_name())
            .await?;

        Ok(true)
    }

    /// Deletes the first document matching `filter`.
    pub async fn delete_one(&self, filter: Expr) -> ModelResult<DeleteResult> {
        self.delete_with(Operation::DeleteOne, filter).await
    }

    /// Deletes every document matching `filter`.
    pub async fn delete_many(&self, filter: Expr) -> ModelResult<DeleteResult> {
        self.delete_with(Operation::DeleteMany, filter).await
    }

    async fn delete_with(&self, operation: Operation, filter: Expr) -> ModelResult<DeleteResult> {
        let ctx = QueryContext::new(operation, self.name(), Query::filtered(filter));

        self.with_query_hooks(
            ctx,
            |ctx| async move {
                let mut query = ctx.query;

                if ctx.operation == Operation::DeleteOne {
                    query.limit = Some(1);
                }

                let ids = self
                    .backend()
                    .query_documents(query, self.collection_name())
                    .await?
                    .iter()
                    .map(document_id)
                    .collect::<Result<Vec<_>, _>>()?;

                self.delete_by_ids(ids).await
            },
            |result: &DeleteResult| OperationOutcome::Deleted(*result),
        )
        .await
    }

    /// Deletes stored documents by id without running query hooks.
    pub(crate) async fn delete_by_ids(&self, ids: Vec<ObjectId>) -> ModelResult<DeleteResult> {
        if ids.is_empty() {
            return Ok(DeleteResult::default());
        }

        let deleted_count = self
            .backend()
            .delete_documents(ids, self.collection_name())
            .await?;

        Ok(DeleteResult { deleted_count })
    }

    /// Updates the first document matching `filter` and returns it, as it was before the
    /// update unless `options.return_document` asks for the updated version.
    pub async fn find_one_and_update(
        &self,
        filter: Expr,
        update: Document,
        options: FindOneAndUpdateOptions,
    ) -> ModelResult<Option<HydratedDocument<D>>> {
        let mut ctx = QueryContext::new(
            Operation::FindOneAndUpdate,
            self.name(),
            Query::filtered(filter),
        );
        ctx.update = Some(update);
        ctx.upsert = options.upsert;

        self.with_query_hooks(
            ctx,
            |ctx| async move {
                let fields = self
                    .backend()
                    .find_one_and_update(
                        update_request(ctx),
                        options.return_document == ReturnDocument::After,
                        self.collection_name(),
                    )
                    .await?;

                match fields {
                    Some(fields) => Ok(Some(self.hydrate(fields).await?)),
                    None => Ok(None),
                }
            },
            |document: &Option<HydratedDocument<D>>| OperationOutcome::Document(document.clone()),
        )
        .await
    }

    /// Replaces the first document matching `filter` and returns it. See
    /// [`Model::find_one_and_update`] for `options`.
    pub async fn find_one_and_replace(
        &self,
        filter: Expr,
        replacement: Document,
        options: FindOneAndUpdateOptions,
    ) -> ModelResult<Option<HydratedDocument<D>>> {
        let mut ctx = QueryContext::new(
            Operation::FindOneAndReplace,
            self.name(),
            Query::filtered(filter),
        );
        ctx.replacement = Some(replacement);
        ctx.upsert = options.upsert;

        self.with_query_hooks(
            ctx,
            |ctx| async move {
                let filter = ctx.filter();
                let replacement = ctx.replacement.unwrap_or_default();

                let Some(before) = self.first_match(ctx.query).await? else {
                    if !ctx.upsert {
                        return Ok(None);
                    }

                    let id = self
                        .upsert(&filter, |seed| replace_fields(seed, replacement))
                        .await?;

                    return match options.return_document {
                        ReturnDocument::Before => Ok(None),
                        ReturnDocument::After => self.load_by_id(id).await,
                    };
                };

                self.replace(&before, replacement).await?;

                match options.return_document {
                    ReturnDocument::Before => Ok(Some(self.hydrate(before).await?)),
                    ReturnDocument::After => self.load_by_id(document_id(&before)?).await,
                }
            },
            |document: &Option<HydratedDocument<D>>| OperationOutcome::Document(document.clone()),
        )
        .await
    }

    /// Deletes the first document matching `filter` and returns it.
    pub async fn find_one_and_delete(&self, filter: Expr) -> ModelResult<Option<HydratedDocument<D>>> {
        self.take_one(Operation::FindOneAndDelete, filter).await
    }

    /// Same as [`Model::find_one_and_delete`], running the findOneAndRemove hooks.
    pub async fn find_one_and_remove(&self, filter: Expr) -> ModelResult<Option<HydratedDocument<D>>> {
        self.take_one(Operation::FindOneAndRemove, filter).await
    }

    async fn take_one(
        &self,
        operation: Operation,
        filter: Expr,
    ) -> ModelResult<Option<HydratedDocument<D>>> {
        let ctx = QueryContext::new(operation, self.name(), Query::filtered(filter));

        self.with_query_hooks(
            ctx,
            |ctx| async move {
                let Some(fields) = self.first_match(ctx.query).await? else {
                    return Ok(None);
                };

                self.delete_by_ids(vec![document_id(&fields)?]).await?;

                Ok(Some(self.hydrate(fields).await?))
            },
            |document: &Option<HydratedDocument<D>>| OperationOutcome::Document(document.clone()),
        )
        .await
    }

    /// Runs an aggregation pipeline. The aggregate hooks may rewrite the pipeline.
    pub async fn aggregate(&self, pipeline: Vec<Document>) -> ModelResult<Vec<Document>> {
        let mut pipeline = pipeline;
        let hooks = self.hooks();

        let result = match hooks
            .run_pre(Operation::Aggregate, &mut HookTarget::Aggregate(&mut pipeline))
            .await
        {
            Ok(()) => self
                .backend()
                .aggregate(pipeline.clone(), self.collection_name())
                .await
                .map_err(ModelError::from),
            Err(error) => Err(error),
        };

        hooks
            .complete(
                Operation::Aggregate,
                &mut HookTarget::Aggregate(&mut pipeline),
                result,
                |documents: &Vec<Document>| OperationOutcome::Raw(documents.clone()),
            )
            .await
    }

    /// Creates every declared index on the backend.
    pub async fn sync_indexes(&self) -> ModelResult<()> {
        for index in self.indexes() {
            tracing::debug!(
                model = %self.name(),
                collection = %self.collection_name(),
                index = %index.name(),
                "syncing index"
            );

            self.backend()
                .create_index(index.clone(), self.collection_name())
                .await?;
        }

        Ok(())
    }

    async fn with_query_hooks<T, F, Fut, O>(
        &self,
        mut ctx: QueryContext,
        exec: F,
        outcome: O,
    ) -> ModelResult<T>
    where
        T: Send,
        F: FnOnce(QueryContext) -> Fut + Send,
        Fut: Future<Output = ModelResult<T>> + Send,
        O: FnOnce(&T) -> OperationOutcome<D> + Send,
    {
        let operation = ctx.operation;
        let hooks = self.hooks();

        let result = match hooks
            .run_pre(operation, &mut HookTarget::Query(&mut ctx))
            .await
        {
            Ok(()) => exec(ctx.clone()).await,
            Err(error) => Err(error),
        };

        hooks
            .complete(operation, &mut HookTarget::Query(&mut ctx), result, outcome)
            .await
    }

    async fn first_match(&self, mut query: Query) -> ModelResult<Option<Document>> {
        query.limit = Some(1);

        Ok(self
            .backend()
            .query_documents(query, self.collection_name())
            .await?
            .into_iter()
            .next())
    }

    async fn load_by_id(&self, id: ObjectId) -> ModelResult<Option<HydratedDocument<D>>> {
        let fields = self
            .backend()
            .get_documents(vec![id], self.collection_name())
            .await?
            .into_iter()
            .next();

        match fields {
            Some(fields) => Ok(Some(self.hydrate(fields).await?)),
            None => Ok(None),
        }
    }

    /// Wraps stored fields in a document and runs the init hooks on it.
    pub(crate) async fn hydrate(&self, fields: Document) -> ModelResult<HydratedDocument<D>> {
        let mut document = HydratedDocument::from_parts(self.clone(), fields, false);
        let hooks = self.hooks();
        let mut target = HookTarget::Document(&mut document);

        let result = hooks.run_pre(Operation::Init, &mut target).await;

        hooks
            .complete(Operation::Init, &mut target, result, |_: &()| OperationOutcome::Unit)
            .await?;

        Ok(document)
    }

    async fn hydrate_all(&self, raw: Vec<Document>) -> ModelResult<Vec<HydratedDocument<D>>> {
        let mut documents = Vec::with_capacity(raw.len());

        for fields in raw {
            documents.push(self.hydrate(fields).await?);
        }

        Ok(documents)
    }
}

fn update_request(ctx: QueryContext) -> UpdateRequest {
    UpdateRequest {
        filter: ctx.query.filter,
        sort: ctx.query.sort,
        update: ctx.update.unwrap_or_default(),
        multi: ctx.operation == Operation::UpdateMany,
        upsert: ctx.upsert,
    }
}

/// Copies every field of `replacement` but `_id` into `target`.
fn replace_fields(target: &mut Document, replacement: Document) -> ModelResult<()> {
    for (key, value) in replacement {
        if key == "_id" {
            continue;
        }

        target.insert(key, value);
    }

    Ok(())
}
