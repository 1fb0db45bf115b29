//! Hydrated documents.
//!
//! A [`HydratedDocument`] is one document of a model: an open `bson::Document` of fields
//! (always carrying an `ObjectId` under `_id`) bound to the model that created or loaded it.
//! The schema is authoritative for shape, not the storage layer, so fields may be read and
//! written freely by dotted path and are only checked when the document is validated or
//! saved. [`HydratedDocument::data`] and [`HydratedDocument::modify`] give a typed view
//! through the model's output type.

use bson::{Bson, Document, de::deserialize_from_bson, oid::ObjectId, ser::serialize_to_document};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;

use crate::{
    error::{DocumentStoreError, ModelError, ModelResult},
    hooks::{HookTarget, Operation, OperationOutcome},
    members::{Method, Virtual, VirtualSetter},
    model::{DeleteResult, Model, UpdateResult},
    path::{get_path, push_path, set_path, unset_path},
    schema::ValidationError,
};

/// Types usable as a model's typed document view.
///
/// Implemented for every `Serialize + DeserializeOwned + Send + Sync + 'static` type;
/// `bson::Document` gives an untyped model.
pub trait DocumentData: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> DocumentData for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A document bound to its model.
pub struct HydratedDocument<D> {
    model: Model<D>,
    id: ObjectId,
    fields: Document,
    is_new: bool,
    stale: Option<ValidationError>,
}

impl<D> Clone for HydratedDocument<D> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            id: self.id,
            fields: self.fields.clone(),
            is_new: self.is_new,
            stale: self.stale.clone(),
        }
    }
}

impl<D> fmt::Debug for HydratedDocument<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HydratedDocument")
            .field("model", &self.model.name())
            .field("fields", &self.fields)
            .field("is_new", &self.is_new)
            .field("stale", &self.stale.is_some())
            .finish()
    }
}

impl<D> HydratedDocument<D> {
    /// Binds `fields` to `model`. A missing or malformed `_id` is replaced by a fresh one.
    pub(crate) fn from_parts(model: Model<D>, mut fields: Document, is_new: bool) -> Self {
        let id = match fields.remove("_id") {
            Some(Bson::ObjectId(id)) => id,
            Some(Bson::String(hex)) => ObjectId::parse_str(&hex).unwrap_or_else(|_| ObjectId::new()),
            _ => ObjectId::new(),
        };

        Self {
            model,
            id,
            fields: with_id(id, fields),
            is_new,
            stale: None,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn model(&self) -> &Model<D> {
        &self.model
    }

    /// Whether the document has not been persisted yet.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// All fields, `_id` included.
    pub fn fields(&self) -> &Document {
        &self.fields
    }

    pub fn into_fields(self) -> Document {
        self.fields
    }

    /// Fields without `_id`, as the schema sees them.
    pub fn schema_fields(&self) -> Document {
        let mut fields = self.fields.clone();
        fields.remove("_id");
        fields
    }

    /// Returns the value at a dotted path.
    pub fn get(&self, path: &str) -> Option<&Bson> {
        get_path(&self.fields, path)
    }

    /// Sets the value at a dotted path, creating intermediate documents.
    ///
    /// # Errors
    ///
    /// Fails when the path targets `_id` or crosses a scalar.
    pub fn set(&mut self, path: &str, value: impl Into<Bson>) -> ModelResult<()> {
        guard_id(path)?;
        Ok(set_path(&mut self.fields, path, value.into())?)
    }

    /// Removes the value at a dotted path, returning it when present.
    pub fn unset(&mut self, path: &str) -> ModelResult<Option<Bson>> {
        guard_id(path)?;
        Ok(unset_path(&mut self.fields, path))
    }

    /// Appends to the array at a dotted path, creating it when missing.
    pub fn push(&mut self, path: &str, value: impl Into<Bson>) -> ModelResult<()> {
        guard_id(path)?;
        Ok(push_path(&mut self.fields, path, value.into())?)
    }

    /// The error attached when this document failed to parse on load.
    pub fn stale_error(&self) -> Option<&ValidationError> {
        self.stale.as_ref()
    }

    pub(crate) fn mark_stale(&mut self, error: ValidationError) {
        self.stale = Some(error);
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.is_new = false;
    }

    /// Replaces every field but `_id`.
    pub(crate) fn replace_fields(&mut self, fields: Document) {
        let mut fields = fields;
        fields.remove("_id");
        self.fields = with_id(self.id, fields);
    }
}

impl<D: DocumentData> HydratedDocument<D> {
    /// Deserializes the value at `path`. `Ok(None)` when the path is missing.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> ModelResult<Option<T>> {
        self.get(path)
            .cloned()
            .map(deserialize_from_bson::<T>)
            .transpose()
            .map_err(ModelError::from)
    }

    /// Deserializes the whole document into the model's output type.
    pub fn data(&self) -> ModelResult<D> {
        Ok(deserialize_from_bson(Bson::Document(self.fields.clone()))?)
    }

    /// Replaces every field but `_id` with the serialized `data`.
    pub fn set_data(&mut self, data: &D) -> ModelResult<()> {
        let fields = serialize_to_document(data)?;
        self.replace_fields(fields);
        Ok(())
    }

    /// Edits the typed view in place.
    ///
    /// ```ignore
    /// user.modify(|user| user.first_name = "Jane".into())?;
    /// ```
    pub fn modify<F>(&mut self, f: F) -> ModelResult<()>
    where
        F: FnOnce(&mut D),
    {
        let mut data = self.data()?;
        f(&mut data);
        self.set_data(&data)
    }

    /// Runs the validate hooks, the schema parse among them.
    ///
    /// On success the fields are replaced with the parsed output (defaults applied,
    /// identifiers coerced, unknown keys handled per the schema).
    pub async fn validate(&mut self) -> ModelResult<()> {
        let model = self.model.clone();
        let hooks = model.hooks();
        let mut target = HookTarget::Document(self);

        let result = hooks.run_pre(Operation::Validate, &mut target).await;

        hooks
            .complete(Operation::Validate, &mut target, result, |_: &()| OperationOutcome::Unit)
            .await
    }

    /// Validates, then inserts the document if it is new or replaces the stored copy.
    pub async fn save(&mut self) -> ModelResult<()> {
        let model = self.model.clone();
        let result = self.persist(&model).await;

        model
            .hooks()
            .complete(
                Operation::Save,
                &mut HookTarget::Document(self),
                result,
                |_: &()| OperationOutcome::Unit,
            )
            .await
    }

    async fn persist(&mut self, model: &Model<D>) -> ModelResult<()> {
        self.validate().await?;

        model
            .hooks()
            .run_pre(Operation::Save, &mut HookTarget::Document(self))
            .await?;

        let backend = model.backend();

        if self.is_new {
            backend
                .insert_documents(vec![self.fields.clone()], model.collection_name())
                .await?;
            self.mark_persisted();
        } else {
            backend
                .replace_documents(vec![self.fields.clone()], model.collection_name())
                .await?;
        }

        Ok(())
    }

    /// Applies `update` to the stored copy of this document. Local fields are left untouched.
    pub async fn update_one(&mut self, update: Document) -> ModelResult<UpdateResult> {
        let model = self.model.clone();
        let hooks = model.hooks();
        let id = self.id;
        let mut target = HookTarget::Document(self);

        let result = match hooks.run_pre(Operation::UpdateOne, &mut target).await {
            Ok(()) => model.update_by_id(id, &update).await,
            Err(error) => Err(error),
        };

        hooks
            .complete(Operation::UpdateOne, &mut target, result, |result: &UpdateResult| {
                OperationOutcome::Updated(*result)
            })
            .await
    }

    /// Deletes the stored copy of this document.
    pub async fn delete_one(&mut self) -> ModelResult<DeleteResult> {
        let model = self.model.clone();
        let hooks = model.hooks();
        let id = self.id;
        let mut target = HookTarget::Document(self);

        let result = match hooks.run_pre(Operation::DeleteOne, &mut target).await {
            Ok(()) => model.delete_by_ids(vec![id]).await,
            Err(error) => Err(error),
        };

        hooks
            .complete(Operation::DeleteOne, &mut target, result, |result: &DeleteResult| {
                OperationOutcome::Deleted(*result)
            })
            .await
    }

    /// Reads a typed virtual.
    pub fn get_virtual<V: Virtual<D>>(&self) -> ModelResult<V::Value> {
        let member = self
            .model
            .virtual_member::<V>()
            .ok_or_else(|| ModelError::UnknownVirtual(V::NAME.to_string()))?;

        member.get(self)
    }

    /// Assigns a typed virtual. Only virtuals with a setter can be assigned.
    ///
    /// ```
    /// use bson::Document;
    /// use docmodel_core::{document::HydratedDocument, error::ModelResult, members::{Virtual, VirtualSetter}};
    ///
    /// struct Nickname;
    ///
    /// impl Virtual<Document> for Nickname {
    ///     const NAME: &'static str = "nickname";
    ///     type Value = String;
    ///
    ///     fn get(&self, document: &HydratedDocument<Document>) -> ModelResult<String> {
    ///         Ok(document.get_as::<String>("name")?.unwrap_or_default())
    ///     }
    /// }
    ///
    /// impl VirtualSetter<Document> for Nickname {
    ///     fn set(&self, document: &mut HydratedDocument<Document>, value: String) -> ModelResult<()> {
    ///         document.set("name", value)
    ///     }
    /// }
    ///
    /// fn rename(document: &mut HydratedDocument<Document>) -> ModelResult<()> {
    ///     document.set_virtual::<Nickname>("Ada".to_string())
    /// }
    /// ```
    ///
    /// A virtual declared with only a getter cannot be assigned:
    ///
    /// ```compile_fail,E0277
    /// use bson::Document;
    /// use docmodel_core::{document::HydratedDocument, error::ModelResult, members::Virtual};
    ///
    /// struct Initials;
    ///
    /// impl Virtual<Document> for Initials {
    ///     const NAME: &'static str = "initials";
    ///     type Value = String;
    ///
    ///     fn get(&self, _: &HydratedDocument<Document>) -> ModelResult<String> {
    ///         Ok(String::new())
    ///     }
    /// }
    ///
    /// fn rename(document: &mut HydratedDocument<Document>) -> ModelResult<()> {
    ///     document.set_virtual::<Initials>("AL".to_string())
    /// }
    /// ```
    pub fn set_virtual<V: VirtualSetter<D>>(&mut self, value: V::Value) -> ModelResult<()> {
        let model = self.model.clone();
        let entry = model
            .virtual_entry(V::NAME)
            .ok_or_else(|| ModelError::UnknownVirtual(V::NAME.to_string()))?;

        if entry.def.is_readonly() {
            return Err(ModelError::ReadonlyVirtual(V::NAME.to_string()));
        }

        let member = model
            .virtual_member::<V>()
            .ok_or_else(|| ModelError::UnknownVirtual(V::NAME.to_string()))?;

        member.set(self, value)
    }

    /// Reads a virtual by name.
    pub fn virtual_value(&self, name: &str) -> ModelResult<Bson> {
        let entry = self
            .model
            .virtual_entry(name)
            .ok_or_else(|| ModelError::UnknownVirtual(name.to_string()))?;

        entry.def.get(self)
    }

    /// Assigns a virtual by name.
    ///
    /// # Errors
    ///
    /// [`ModelError::ReadonlyVirtual`] when the virtual was registered without a setter.
    pub fn set_virtual_value(&mut self, name: &str, value: impl Into<Bson>) -> ModelResult<()> {
        let model = self.model.clone();
        let entry = model
            .virtual_entry(name)
            .ok_or_else(|| ModelError::UnknownVirtual(name.to_string()))?;

        entry
            .def
            .set(self, value.into())
            .unwrap_or_else(|| Err(ModelError::ReadonlyVirtual(name.to_string())))
    }

    /// The fields plus every virtual, computed now.
    pub fn to_bson_with_virtuals(&self) -> ModelResult<Document> {
        let mut out = self.fields.clone();

        for (name, entry) in self.model.virtual_entries() {
            out.insert(name.clone(), entry.def.get(self)?);
        }

        Ok(out)
    }

    /// Invokes a registered method on this document.
    pub async fn call<M: Method<D>>(&mut self, args: M::Args) -> ModelResult<M::Output> {
        let method = self
            .model
            .method::<M>()
            .ok_or_else(|| ModelError::UnknownMethod(M::NAME.to_string()))?;

        method.call(self, args).await
    }
}

fn with_id(id: ObjectId, fields: Document) -> Document {
    let mut out = Document::new();
    out.insert("_id", id);

    for (key, value) in fields {
        out.insert(key, value);
    }

    out
}

fn guard_id(path: &str) -> ModelResult<()> {
    if path == "_id" || path.starts_with("_id.") {
        return Err(DocumentStoreError::InvalidDocument(
            "the _id field is immutable".to_string(),
        )
        .into());
    }

    Ok(())
}
