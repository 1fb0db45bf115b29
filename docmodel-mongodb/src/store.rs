use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use bson::{Document, doc, oid::ObjectId};
use mongodb::{
    Client, Collection as MongoCollection, IndexModel,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, FindOptions, IndexOptions as MongoIndexOptions, ReturnDocument},
};
use docmodel_core::{
    backend::{StoreBackend, StoreBackendBuilder, UpdateRequest, UpdateResult, document_id},
    error::{DocumentStoreError, DocumentStoreResult},
    index::{IndexDef, IndexOptions},
    query::{Expr, Query, Sort, SortDirection},
};

use crate::query::MongoQueryTranslator;

const DUPLICATE_KEY: i32 = 11000;


/// A [`StoreBackend`] over one MongoDB database.
#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }

    fn filter(filter: Option<&Expr>) -> DocumentStoreResult<Document> {
        Ok(filter
            .map(MongoQueryTranslator::translate)
            .transpose()?
            .unwrap_or_default())
    }

    /// Maps a driver error, recognizing unique index violations.
    fn map_error(error: MongoError, collection: &str) -> DocumentStoreError {
        match duplicate_key_message(&error) {
            Some(message) => DocumentStoreError::DuplicateKey(
                index_name_from_message(&message).unwrap_or_else(|| "unknown".to_string()),
                collection.to_string(),
            ),
            None => DocumentStoreError::Backend(error.to_string()),
        }
    }

    fn index_model(index: &IndexDef) -> DocumentStoreResult<IndexModel> {
        let mut options = MongoIndexOptions::default();

        options.name = Some(index.name());

        if index.options.unique {
            options.unique = Some(true);
        }
        if index.options.sparse {
            options.sparse = Some(true);
        }
        if let Some(filter) = &index.options.partial_filter {
            options.partial_filter_expression = Some(MongoQueryTranslator::translate(filter)?);
        }
        if let Some(seconds) = index.options.expire_after_seconds {
            options.expire_after = Some(Duration::from_secs(seconds));
        }

        Ok(
            IndexModel::builder()
                .keys(index.keys_document())
                .options(options)
                .build()
        )
    }

    fn index_def(model: IndexModel) -> DocumentStoreResult<IndexDef> {
        let mut index = IndexDef::from_keys(&model.keys)?;

        if let Some(options) = model.options {
            index.options = IndexOptions {
                unique: options.unique.unwrap_or(false),
                sparse: options.sparse.unwrap_or(false),
                name: options.name,
                partial_filter: options
                    .partial_filter_expression
                    .as_ref()
                    .and_then(MongoQueryTranslator::equality_filter),
                expire_after_seconds: options.expire_after.map(|ttl| ttl.as_secs()),
            };
        }

        Ok(index)
    }
}

fn duplicate_key_message(error: &MongoError) -> Option<String> {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY => {
            Some(write.message.clone())
        }
        ErrorKind::InsertMany(insert) => insert
            .write_errors
            .as_ref()?
            .iter()
            .find(|write| write.code == DUPLICATE_KEY)
            .map(|write| write.message.clone()),
        ErrorKind::Command(command) if command.code == DUPLICATE_KEY => {
            Some(command.message.clone())
        }
        _ => None,
    }
}

/// Pulls `email_1` out of `E11000 duplicate key error collection: db.users index: email_1 dup key: ...`.
fn index_name_from_message(message: &str) -> Option<String> {
    let (_, rest) = message.split_once("index: ")?;

    rest.split_whitespace()
        .next()
        .map(str::to_string)
}

fn sort_document(sort: &[Sort]) -> Document {
    let mut out = Document::new();

    for key in sort {
        out.insert(
            key.field.clone(),
            match key.direction {
                SortDirection::Asc => 1,
                SortDirection::Desc => -1,
            },
        );
    }

    out
}

/// Limit, skip and sort of a query. A negative limit means something else to the server, so
/// oversized limits are clamped to `i64::MAX`.
fn find_options(query: &Query) -> FindOptions {
    let mut options = FindOptions::default();

    if let Some(limit) = query.limit {
        options.limit = Some(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    if let Some(skip) = query.offset {
        options.skip = Some(skip as u64);
    }
    if !query.sort.is_empty() {
        options.sort = Some(sort_document(&query.sort));
    }

    options
}

/// Moves bare top-level keys of an update document under `$set`; the server treats an update
/// without operators as a replacement.
fn update_modifications(update: Document) -> Document {
    let mut operators = Document::new();
    let mut bare = Document::new();

    for (key, value) in update {
        if key.starts_with('$') {
            operators.insert(key, value);
        } else {
            bare.insert(key, value);
        }
    }

    if bare.is_empty() {
        return operators;
    }

    match operators.get_document_mut("$set") {
        Ok(set) => {
            for (key, value) in bare {
                set.insert(key, value);
            }
        }
        Err(_) => {
            operators.insert("$set", bare);
        }
    }

    operators
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn insert_documents(&self, documents: Vec<Document>, collection: &str) -> DocumentStoreResult<()> {
        if documents.is_empty() {
            return Ok(());
        }

        for document in &documents {
            document_id(document)?;
        }

        self.get_collection(collection)
            .insert_many(documents)
            .await
            .map_err(|e| Self::map_error(e, collection))?;

        Ok(())
    }

    async fn replace_documents(&self, documents: Vec<Document>, collection: &str) -> DocumentStoreResult<()> {
        for document in documents {
            let id = document_id(&document)?;

            let result = self.get_collection(collection)
                .replace_one(doc! { "_id": id }, document)
                .await
                .map_err(|e| Self::map_error(e, collection))?;

            if result.matched_count == 0 {
                return Err(DocumentStoreError::DocumentNotFound(id.to_hex(), collection.to_string()));
            }
        }

        Ok(())
    }

    async fn update_documents(&self, request: UpdateRequest, collection: &str) -> DocumentStoreResult<UpdateResult> {
        let filter = Self::filter(request.filter.as_ref())?;
        let update = update_modifications(request.update);
        let target = self.get_collection(collection);

        let result = if request.multi {
            target.update_many(filter, update).upsert(request.upsert).await
        } else {
            target.update_one(filter, update).upsert(request.upsert).await
        }
        .map_err(|e| Self::map_error(e, collection))?;

        Ok(UpdateResult {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id.and_then(|id| id.as_object_id()),
        })
    }

    async fn find_one_and_update(
        &self,
        request: UpdateRequest,
        return_updated: bool,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>> {
        let filter = Self::filter(request.filter.as_ref())?;
        let update = update_modifications(request.update);

        let mongo_collection = self.get_collection(collection);
        let mut action = mongo_collection
            .find_one_and_update(filter, update)
            .upsert(request.upsert)
            .return_document(if return_updated {
                ReturnDocument::After
            } else {
                ReturnDocument::Before
            });

        if !request.sort.is_empty() {
            action = action.sort(sort_document(&request.sort));
        }

        action
            .await
            .map_err(|e| Self::map_error(e, collection))
    }

    async fn delete_documents(&self, ids: Vec<ObjectId>, collection: &str) -> DocumentStoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        Ok(
            self.get_collection(collection)
                .delete_many(doc! { "_id": { "$in": ids } })
                .await
                .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
                .deleted_count
        )
    }

    async fn get_documents(&self, ids: Vec<ObjectId>, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.get_collection(collection)
            .find(doc! { "_id": { "$in": ids } })
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))
    }

    async fn query_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        self.get_collection(collection)
            .find(MongoQueryTranslator::translate(&query.filter_or_all())?)
            .with_options(find_options(&query))
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))
    }

    async fn count_documents(&self, filter: Option<Expr>, collection: &str) -> DocumentStoreResult<u64> {
        let collection = self.get_collection(collection);

        match filter {
            Some(filter) => collection
                .count_documents(MongoQueryTranslator::translate(&filter)?)
                .await,
            None => collection
                .estimated_document_count()
                .await,
        }
        .map_err(|e| DocumentStoreError::Backend(e.to_string()))
    }

    async fn aggregate(&self, pipeline: Vec<Document>, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        self.get_collection(collection)
            .aggregate(pipeline)
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))
    }

    async fn create_index(&self, index: IndexDef, collection: &str) -> DocumentStoreResult<()> {
        self.get_collection(collection)
            .create_index(Self::index_model(&index)?)
            .await
            .map_err(|e| Self::map_error(e, collection))?;

        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> DocumentStoreResult<Vec<IndexDef>> {
        self.get_collection(collection)
            .list_indexes()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
            .try_collect::<Vec<IndexModel>>()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
            .into_iter()
            .filter(|model| model.keys != doc! { "_id": 1 })
            .map(Self::index_def)
            .collect()
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        let database = self.client.database(&self.database);

        let exists = database
            .list_collection_names()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?
            .iter()
            .any(|existing| existing == name);

        if !exists {
            database
                .create_collection(name)
                .await
                .map_err(|e| DocumentStoreError::Backend(e.to_string()))?;
        }

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.get_collection(name)
            .drop()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self.client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?;

        names.sort();

        Ok(names)
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        self.client.clone().shutdown().await;

        Ok(())
    }
}

/// Connects a [`MongoDbStore`] from a connection string.
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(MongoDbStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            )
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}
