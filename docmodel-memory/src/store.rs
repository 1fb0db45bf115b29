//! In-memory storage implementation for document stores.
//!
//! This module provides a simple in-memory backend that stores documents in insertion order
//! per collection, behind async-safe read-write locks. Declared unique indexes are enforced
//! on every write.

use std::{collections::HashMap, sync::Arc, cmp::Ordering, slice};
use async_trait::async_trait;
use mea::rwlock::RwLock;
use bson::{Bson, Document, oid::ObjectId};

use docmodel_core::{
    backend::{StoreBackend, StoreBackendBuilder, UpdateRequest, UpdateResult, document_id},
    error::{DocumentStoreError, DocumentStoreResult},
    index::IndexDef,
    path::get_path,
    query::{Expr, Filter, Query, Sort, SortDirection},
    update::{apply_update, upsert_seed},
};

use crate::evaluator::{DocumentEvaluator, sort_order, values_equal};

#[derive(Debug, Default)]
struct CollectionData {
    documents: Vec<(ObjectId, Document)>,
    indexes: Vec<IndexDef>,
}

type StoreMap = HashMap<String, CollectionData>;

/// What an update did to the first document it touched.
#[derive(Debug, Default)]
struct Applied {
    result: UpdateResult,
    before: Option<Document>,
    after: Option<Document>,
}


/// Thread-safe in-memory document storage backend.
///
/// This struct implements the [`StoreBackend`] trait to provide a fully functional
/// document store that operates entirely in memory using async-aware read-write locks.
/// Documents are kept in insertion order and identified by their `ObjectId` `_id`.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Indexes
///
/// Indexes are not used to speed up queries; every query scans its collection. Unique
/// indexes are enforced: a write that would store two documents with the same key fails with
/// [`DocumentStoreError::DuplicateKey`] and leaves the collection unchanged.
///
/// # Example
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::StoreBackend;
/// use bson::{doc, oid::ObjectId};
///
/// let store = InMemoryStore::new();
///
/// let id = ObjectId::new();
/// store.insert_documents(vec![doc! { "_id": id, "name": "Alice" }], "users").await?;
///
/// let docs = store.get_documents(vec![id], "users").await?;
/// assert_eq!(docs.len(), 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// The main storage map: collection_name -> documents and indexes
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    ///
    /// ```ignore
    /// let store = InMemoryStore::builder().build().await?;
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }
}

impl CollectionData {
    fn position(&self, id: &ObjectId) -> Option<usize> {
        self.documents
            .iter()
            .position(|(key, _)| key == id)
    }

    /// Fails when `candidate` collides with a stored document other than itself on any
    /// unique index.
    fn check_unique(&self, candidate: &Document, collection: &str) -> DocumentStoreResult<()> {
        self.check_unique_batch(slice::from_ref(candidate), collection)
    }

    /// Fails when writing `batch` over the stored documents with the same ids would leave two
    /// documents sharing a key on a unique index, including two documents of the batch.
    fn check_unique_batch(&self, batch: &[Document], collection: &str) -> DocumentStoreResult<()> {
        let ids = batch
            .iter()
            .map(document_id)
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        for index in self.indexes.iter().filter(|index| index.options.unique) {
            let mut taken = Vec::new();

            for (id, other) in &self.documents {
                if ids.contains(id) {
                    continue;
                }

                if let Some(key) = index_key(index, other)? {
                    taken.push(key);
                }
            }

            for candidate in batch {
                let Some(key) = index_key(index, candidate)? else {
                    continue;
                };

                if taken.iter().any(|other| keys_equal(&key, other)) {
                    return Err(DocumentStoreError::DuplicateKey(
                        index.name(),
                        collection.to_string(),
                    ));
                }

                taken.push(key);
            }
        }

        Ok(())
    }

    /// Positions of the documents matching `filter`, ordered by `sort`, at most `limit` of them.
    fn matching(
        &self,
        filter: Option<&Expr>,
        sort: &[Sort],
        limit: Option<usize>,
    ) -> DocumentStoreResult<Vec<usize>> {
        let mut positions = Vec::new();

        for (position, (_, doc)) in self.documents.iter().enumerate() {
            match filter {
                Some(filter) if !DocumentEvaluator::matches(doc, filter)? => {}
                _ => positions.push(position),
            }
        }

        positions.sort_by(|a, b| compare_documents(&self.documents[*a].1, &self.documents[*b].1, sort));
        positions.truncate(limit.unwrap_or(usize::MAX));

        Ok(positions)
    }

    /// Applies `request` in place. Nothing is written when any updated document fails the
    /// unique checks.
    fn update(&mut self, request: &UpdateRequest, collection: &str) -> DocumentStoreResult<Applied> {
        let limit = (!request.multi).then_some(1);
        let positions = self.matching(request.filter.as_ref(), &request.sort, limit)?;

        let Some(&first) = positions.first() else {
            if !request.upsert {
                return Ok(Applied::default());
            }

            let mut seed = upsert_seed(request.filter.as_ref())?;
            apply_update(&mut seed, &request.update)?;

            let id = document_id(&seed)?;

            if self.position(&id).is_some() {
                return Err(DocumentStoreError::DocumentAlreadyExists(id.to_hex(), collection.to_string()));
            }

            self.check_unique(&seed, collection)?;
            self.documents.push((id, seed.clone()));

            return Ok(Applied {
                result: UpdateResult {
                    upserted_id: Some(id),
                    ..UpdateResult::default()
                },
                before: None,
                after: Some(seed),
            });
        };

        let mut staged = Vec::new();

        for &position in &positions {
            let mut next = self.documents[position].1.clone();

            if apply_update(&mut next, &request.update)? {
                staged.push((position, next));
            }
        }

        let batch = staged
            .iter()
            .map(|(_, doc)| doc.clone())
            .collect::<Vec<_>>();
        self.check_unique_batch(&batch, collection)?;

        let before = self.documents[first].1.clone();
        let result = UpdateResult {
            matched_count: positions.len() as u64,
            modified_count: staged.len() as u64,
            upserted_id: None,
        };

        for (position, doc) in staged {
            self.documents[position].1 = doc;
        }

        Ok(Applied {
            result,
            after: Some(self.documents[first].1.clone()),
            before: Some(before),
        })
    }
}

/// The key a document has in `index`, or `None` when the index skips the document.
fn index_key(index: &IndexDef, document: &Document) -> DocumentStoreResult<Option<Vec<Bson>>> {
    if let Some(filter) = &index.options.partial_filter {
        if !DocumentEvaluator::matches(document, filter)? {
            return Ok(None);
        }
    }

    let values = index
        .paths()
        .map(|path| get_path(document, path).cloned())
        .collect::<Vec<_>>();

    if index.options.sparse && values.iter().all(Option::is_none) {
        return Ok(None);
    }

    Ok(Some(
        values
            .into_iter()
            .map(|value| value.unwrap_or(Bson::Null))
            .collect(),
    ))
}

fn keys_equal(left: &[Bson], right: &[Bson]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right)
            .all(|(a, b)| values_equal(a, b))
}

fn compare_documents(a: &Document, b: &Document, sort: &[Sort]) -> Ordering {
    for key in sort {
        let ordering = sort_order(get_path(a, &key.field), get_path(b, &key.field));
        let ordering = match key.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

fn sort_documents(documents: &mut [Document], sort: &[Sort]) {
    if sort.is_empty() {
        return;
    }

    documents.sort_by(|a, b| compare_documents(a, b, sort));
}

fn stage_error(stage: &str, message: &str) -> DocumentStoreError {
    DocumentStoreError::InvalidDocument(format!("{stage}: {message}"))
}

fn as_count(stage: &str, value: &Bson) -> DocumentStoreResult<usize> {
    match value {
        Bson::Int32(n) if *n >= 0 => Ok(*n as usize),
        Bson::Int64(n) if *n >= 0 => Ok(*n as usize),
        _ => Err(stage_error(stage, "expected a non-negative integer")),
    }
}

/// Runs one pipeline stage. Supports `$match` on equality, `$sort`, `$skip`, `$limit` and
/// `$count`.
fn apply_stage(documents: Vec<Document>, stage: &Document) -> DocumentStoreResult<Vec<Document>> {
    let Some((name, spec)) = stage.iter().next() else {
        return Err(stage_error("pipeline", "empty stage"));
    };

    match name.as_str() {
        "$match" => {
            let spec = spec
                .as_document()
                .ok_or_else(|| stage_error(name, "expected a document"))?;
            let filter = Filter::and(spec.iter().map(|(path, value)| {
                if matches!(value, Bson::Document(inner) if inner.keys().any(|k| k.starts_with('$'))) {
                    Err(DocumentStoreError::Unsupported(format!("operators inside $match at '{path}'")))
                } else {
                    Ok(Filter::eq(path.clone(), value.clone()))
                }
            }).collect::<DocumentStoreResult<Vec<Expr>>>()?);

            DocumentEvaluator::filter_documents(documents.iter(), &filter)
        }
        "$sort" => {
            let spec = spec
                .as_document()
                .ok_or_else(|| stage_error(name, "expected a document"))?;
            let sort = spec
                .iter()
                .map(|(field, direction)| {
                    let direction = match direction {
                        Bson::Int32(-1) | Bson::Int64(-1) => SortDirection::Desc,
                        Bson::Int32(1) | Bson::Int64(1) => SortDirection::Asc,
                        _ => return Err(stage_error("$sort", "direction must be 1 or -1")),
                    };

                    Ok(Sort { field: field.clone(), direction })
                })
                .collect::<DocumentStoreResult<Vec<_>>>()?;

            let mut documents = documents;
            sort_documents(&mut documents, &sort);
            Ok(documents)
        }
        "$skip" => Ok(documents.into_iter().skip(as_count(name, spec)?).collect()),
        "$limit" => Ok(documents.into_iter().take(as_count(name, spec)?).collect()),
        "$count" => {
            let field = spec
                .as_str()
                .ok_or_else(|| stage_error(name, "expected a field name"))?;

            let mut out = Document::new();
            out.insert(field, documents.len() as i64);

            Ok(vec![out])
        }
        other => Err(DocumentStoreError::Unsupported(format!("aggregation stage {other}"))),
    }
}


#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_documents(&self, documents: Vec<Document>, collection: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        let data = store
            .entry(collection.to_string())
            .or_default();
        let start = data.documents.len();

        for doc in documents {
            let id = document_id(&doc)?;

            let checked = if data.position(&id).is_some() {
                Err(DocumentStoreError::DocumentAlreadyExists(id.to_hex(), collection.to_string()))
            } else {
                data.check_unique(&doc, collection)
            };

            if let Err(error) = checked {
                data.documents.truncate(start);
                return Err(error);
            }

            data.documents.push((id, doc));
        }

        Ok(())
    }

    async fn replace_documents(&self, documents: Vec<Document>, collection: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        let data = match store.get_mut(collection) {
            Some(col) => col,
            None => return Err(DocumentStoreError::CollectionNotFound(collection.to_string())),
        };

        let mut positions = Vec::with_capacity(documents.len());

        for doc in &documents {
            let id = document_id(doc)?;
            let position = data
                .position(&id)
                .ok_or_else(|| DocumentStoreError::DocumentNotFound(id.to_hex(), collection.to_string()))?;

            positions.push(position);
        }

        data.check_unique_batch(&documents, collection)?;

        for (position, doc) in positions.into_iter().zip(documents) {
            data.documents[position].1 = doc;
        }

        Ok(())
    }

    async fn update_documents(&self, request: UpdateRequest, collection: &str) -> DocumentStoreResult<UpdateResult> {
        let mut store = self.store.write().await;

        if !request.upsert && !store.contains_key(collection) {
            return Ok(UpdateResult::default());
        }

        let data = store
            .entry(collection.to_string())
            .or_default();

        Ok(data.update(&request, collection)?.result)
    }

    async fn find_one_and_update(
        &self,
        request: UpdateRequest,
        return_updated: bool,
        collection: &str,
    ) -> DocumentStoreResult<Option<Document>> {
        let mut store = self.store.write().await;

        if !request.upsert && !store.contains_key(collection) {
            return Ok(None);
        }

        let data = store
            .entry(collection.to_string())
            .or_default();
        let request = UpdateRequest { multi: false, ..request };
        let applied = data.update(&request, collection)?;

        Ok(if return_updated { applied.after } else { applied.before })
    }

    async fn delete_documents(&self, ids: Vec<ObjectId>, collection: &str) -> DocumentStoreResult<u64> {
        let mut store = self.store.write().await;
        let data = match store.get_mut(collection) {
            Some(col) => col,
            None => return Ok(0),
        };

        let before = data.documents.len();
        data.documents.retain(|(id, _)| !ids.contains(id));

        Ok((before - data.documents.len()) as u64)
    }

    async fn get_documents(&self, ids: Vec<ObjectId>, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        let store = self.store.read().await;
        let data = match store.get(collection) {
            Some(col) => col,
            None => return Ok(vec![]),
        };

        Ok(
            ids
                .iter()
                .filter_map(|id| data.position(id))
                .map(|position| data.documents[position].1.clone())
                .collect()
        )
    }

    async fn query_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        let store = self.store.read().await;
        let data = match store.get(collection) {
            Some(col) => col,
            None => return Ok(vec![]),
        };

        let mut documents = match &query.filter {
            Some(filter) => DocumentEvaluator::filter_documents(
                data.documents.iter().map(|(_, doc)| doc),
                filter,
            )?,
            None => data.documents
                .iter()
                .map(|(_, doc)| doc.clone())
                .collect::<Vec<_>>(),
        };

        sort_documents(&mut documents, &query.sort);

        Ok(
            documents
                .into_iter()
                .skip(query.offset.unwrap_or(0))
                .take(query.limit.unwrap_or(usize::MAX))
                .collect()
        )
    }

    async fn count_documents(&self, filter: Option<Expr>, collection: &str) -> DocumentStoreResult<u64> {
        let store = self.store.read().await;
        let data = match store.get(collection) {
            Some(col) => col,
            None => return Ok(0),
        };

        let Some(filter) = filter else {
            return Ok(data.documents.len() as u64);
        };

        let mut count = 0;

        for (_, doc) in &data.documents {
            if DocumentEvaluator::matches(doc, &filter)? {
                count += 1;
            }
        }

        Ok(count)
    }

    async fn aggregate(&self, pipeline: Vec<Document>, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        let mut documents = {
            let store = self.store.read().await;

            match store.get(collection) {
                Some(data) => data.documents
                    .iter()
                    .map(|(_, doc)| doc.clone())
                    .collect::<Vec<_>>(),
                None => vec![],
            }
        };

        for stage in &pipeline {
            documents = apply_stage(documents, stage)?;
        }

        Ok(documents)
    }

    async fn create_index(&self, index: IndexDef, collection: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        let data = store
            .entry(collection.to_string())
            .or_default();
        let name = index.name();

        if data.indexes.iter().any(|existing| existing.name() == name) {
            return Ok(());
        }

        data.indexes.push(index);

        let collision = data.documents
            .iter()
            .try_for_each(|(_, doc)| data.check_unique(doc, collection));

        if let Err(error) = collision {
            data.indexes.pop();
            return Err(error);
        }

        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> DocumentStoreResult<Vec<IndexDef>> {
        Ok(
            self.store
                .read()
                .await
                .get(collection)
                .map(|data| data.indexes.clone())
                .unwrap_or_default()
        )
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.store
            .write()
            .await
            .entry(name.to_string())
            .or_default();

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;

        if store.remove(name).is_none() {
            return Err(DocumentStoreError::CollectionNotFound(name.to_string()));
        }

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self.store
            .read()
            .await
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();

        Ok(names)
    }
}


/// Builder for constructing [`InMemoryStore`] instances.
///
/// The in-memory store takes no options; the builder exists so it can be constructed
/// through [`StoreBackendBuilder`] like every other backend.
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    ///
    /// This always succeeds and returns a freshly initialized store.
    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docmodel_core::index::IndexOptions;

    fn unique(path: &str) -> IndexDef {
        IndexDef::asc(path).with_options(IndexOptions {
            unique: true,
            ..IndexOptions::default()
        })
    }

    #[tokio::test]
    async fn insert_get_replace_delete() {
        let store = InMemoryStore::builder().build().await.unwrap();
        let id = ObjectId::new();

        store.insert_documents(vec![doc! { "_id": id, "name": "Alice" }], "users").await.unwrap();

        assert!(matches!(
            store.insert_documents(vec![doc! { "_id": id }], "users").await,
            Err(DocumentStoreError::DocumentAlreadyExists(..))
        ));

        store.replace_documents(vec![doc! { "_id": id, "name": "Alicia" }], "users").await.unwrap();

        let docs = store.get_documents(vec![id, ObjectId::new()], "users").await.unwrap();
        assert_eq!(docs, vec![doc! { "_id": id, "name": "Alicia" }]);

        assert!(matches!(
            store.replace_documents(vec![doc! { "_id": ObjectId::new() }], "users").await,
            Err(DocumentStoreError::DocumentNotFound(..))
        ));

        assert_eq!(store.delete_documents(vec![id, ObjectId::new()], "users").await.unwrap(), 1);
        assert_eq!(store.count_documents(None, "users").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn query_sorts_on_several_keys_and_paginates() {
        let store = InMemoryStore::new();
        let docs = [("b", 2), ("a", 2), ("c", 1), ("d", 3)]
            .into_iter()
            .map(|(name, rank)| doc! { "_id": ObjectId::new(), "name": name, "rank": rank })
            .collect::<Vec<_>>();

        store.insert_documents(docs, "items").await.unwrap();

        let query = Query::builder()
            .filter(Filter::lt("rank", 3))
            .sort("rank", SortDirection::Desc)
            .sort("name", SortDirection::Asc)
            .offset(1)
            .limit(5)
            .build();

        let names = store
            .query_documents(query, "items")
            .await
            .unwrap()
            .iter()
            .map(|doc| doc.get_str("name").unwrap().to_string())
            .collect::<Vec<_>>();

        assert_eq!(names, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn unique_indexes_reject_duplicates_atomically() {
        let store = InMemoryStore::new();
        store.create_index(unique("email"), "users").await.unwrap();

        let first = ObjectId::new();
        store.insert_documents(vec![doc! { "_id": first, "email": "a@example.com" }], "users").await.unwrap();

        let result = store
            .insert_documents(
                vec![
                    doc! { "_id": ObjectId::new(), "email": "b@example.com" },
                    doc! { "_id": ObjectId::new(), "email": "a@example.com" },
                ],
                "users",
            )
            .await;

        assert_eq!(
            result,
            Err(DocumentStoreError::DuplicateKey("email_1".to_string(), "users".to_string()))
        );
        assert_eq!(store.count_documents(None, "users").await.unwrap(), 1);

        // Replacing a document with its own key is not a collision.
        store.replace_documents(vec![doc! { "_id": first, "email": "a@example.com", "n": 1 }], "users").await.unwrap();
    }

    #[tokio::test]
    async fn unique_index_creation_fails_on_existing_collisions() {
        let store = InMemoryStore::new();
        store
            .insert_documents(
                vec![
                    doc! { "_id": ObjectId::new(), "email": "a@example.com" },
                    doc! { "_id": ObjectId::new(), "email": "a@example.com" },
                ],
                "users",
            )
            .await
            .unwrap();

        assert!(matches!(
            store.create_index(unique("email"), "users").await,
            Err(DocumentStoreError::DuplicateKey(..))
        ));
        assert!(store.list_indexes("users").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sparse_unique_indexes_skip_missing_keys() {
        let store = InMemoryStore::new();
        let mut index = unique("auth.hash");
        index.options.sparse = true;
        store.create_index(index, "users").await.unwrap();

        store
            .insert_documents(
                vec![doc! { "_id": ObjectId::new() }, doc! { "_id": ObjectId::new() }],
                "users",
            )
            .await
            .unwrap();

        assert_eq!(store.count_documents(None, "users").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn aggregate_supports_the_basic_stages() {
        let store = InMemoryStore::new();
        let docs = (0..5)
            .map(|n| doc! { "_id": ObjectId::new(), "n": n, "even": n % 2 == 0 })
            .collect::<Vec<_>>();
        store.insert_documents(docs, "numbers").await.unwrap();

        let out = store
            .aggregate(
                vec![
                    doc! { "$match": { "even": true } },
                    doc! { "$sort": { "n": -1 } },
                    doc! { "$skip": 1 },
                    doc! { "$limit": 1 },
                ],
                "numbers",
            )
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get_i32("n").unwrap(), 2);

        let count = store
            .aggregate(vec![doc! { "$match": { "even": false } }, doc! { "$count": "odd" }], "numbers")
            .await
            .unwrap();
        assert_eq!(count, vec![doc! { "odd": 2i64 }]);

        assert!(matches!(
            store.aggregate(vec![doc! { "$group": { "_id": "$even" } }], "numbers").await,
            Err(DocumentStoreError::Unsupported(_))
        ));
    }

    fn set_email(email: &str) -> UpdateRequest {
        UpdateRequest {
            update: doc! { "$set": { "email": email } },
            multi: true,
            ..UpdateRequest::default()
        }
    }

    #[tokio::test]
    async fn batch_writes_cannot_share_a_unique_key() {
        let store = InMemoryStore::new();
        store.create_index(unique("email"), "users").await.unwrap();

        let (a, b) = (ObjectId::new(), ObjectId::new());
        store
            .insert_documents(
                vec![
                    doc! { "_id": a, "email": "a@example.com" },
                    doc! { "_id": b, "email": "b@example.com" },
                ],
                "users",
            )
            .await
            .unwrap();

        assert_eq!(
            store.update_documents(set_email("same@example.com"), "users").await,
            Err(DocumentStoreError::DuplicateKey("email_1".to_string(), "users".to_string()))
        );
        assert!(matches!(
            store
                .replace_documents(
                    vec![
                        doc! { "_id": a, "email": "same@example.com" },
                        doc! { "_id": b, "email": "same@example.com" },
                    ],
                    "users",
                )
                .await,
            Err(DocumentStoreError::DuplicateKey(..))
        ));

        let same = store
            .count_documents(Some(Filter::eq("email", "same@example.com")), "users")
            .await
            .unwrap();
        assert_eq!(same, 0);

        // Swapping keys inside one batch is not a collision.
        store
            .replace_documents(
                vec![
                    doc! { "_id": a, "email": "b@example.com" },
                    doc! { "_id": b, "email": "a@example.com" },
                ],
                "users",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn updates_match_modify_and_upsert() {
        let store = InMemoryStore::new();
        let docs = [("b", 2), ("a", 1), ("c", 1)]
            .into_iter()
            .map(|(name, rank)| doc! { "_id": ObjectId::new(), "name": name, "rank": rank })
            .collect::<Vec<_>>();
        store.insert_documents(docs, "items").await.unwrap();

        let result = store
            .update_documents(
                UpdateRequest {
                    filter: Some(Filter::eq("rank", 1)),
                    update: doc! { "$inc": { "rank": 10 } },
                    multi: true,
                    ..UpdateRequest::default()
                },
                "items",
            )
            .await
            .unwrap();
        assert_eq!((result.matched_count, result.modified_count), (2, 2));

        let unchanged = store
            .update_documents(
                UpdateRequest {
                    filter: Some(Filter::eq("name", "b")),
                    update: doc! { "$set": { "rank": 2 } },
                    ..UpdateRequest::default()
                },
                "items",
            )
            .await
            .unwrap();
        assert_eq!((unchanged.matched_count, unchanged.modified_count), (1, 0));

        let upserted = store
            .update_documents(
                UpdateRequest {
                    filter: Some(Filter::eq("name", "d")),
                    update: doc! { "$set": { "rank": 4 } },
                    upsert: true,
                    ..UpdateRequest::default()
                },
                "items",
            )
            .await
            .unwrap();
        let id = upserted.upserted_id.unwrap();

        assert_eq!(
            store.get_documents(vec![id], "items").await.unwrap(),
            vec![doc! { "_id": id, "name": "d", "rank": 4 }]
        );
        assert_eq!(
            store.update_documents(set_email("x"), "missing").await.unwrap(),
            UpdateResult::default()
        );
    }

    #[tokio::test]
    async fn find_one_and_update_follows_the_sort() {
        let store = InMemoryStore::new();
        let docs = [("a", 1), ("b", 3), ("c", 2)]
            .into_iter()
            .map(|(name, rank)| doc! { "_id": ObjectId::new(), "name": name, "rank": rank })
            .collect::<Vec<_>>();
        store.insert_documents(docs, "items").await.unwrap();

        let request = UpdateRequest {
            sort: vec![Sort { field: "rank".to_string(), direction: SortDirection::Desc }],
            update: doc! { "$set": { "top": true } },
            ..UpdateRequest::default()
        };

        let before = store
            .find_one_and_update(request.clone(), false, "items")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before.get_str("name").unwrap(), "b");
        assert!(before.get("top").is_none());

        let after = store
            .find_one_and_update(request, true, "items")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.get_str("name").unwrap(), "b");
        assert!(after.get_bool("top").unwrap());

        assert_eq!(
            store.count_documents(Some(Filter::exists("top")), "items").await.unwrap(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let store = InMemoryStore::new();
        let id = ObjectId::new();
        store.insert_documents(vec![doc! { "_id": id, "n": 0 }], "counters").await.unwrap();

        let tasks = (0..32)
            .map(|_| {
                let store = store.clone();

                tokio::spawn(async move {
                    store
                        .update_documents(
                            UpdateRequest {
                                filter: Some(Filter::id(id)),
                                update: doc! { "$inc": { "n": 1 } },
                                ..UpdateRequest::default()
                            },
                            "counters",
                        )
                        .await
                })
            })
            .collect::<Vec<_>>();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stored = store.get_documents(vec![id], "counters").await.unwrap();
        assert_eq!(stored[0].get_i32("n").unwrap(), 32);
    }
}
