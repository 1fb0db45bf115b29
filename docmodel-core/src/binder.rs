//! Binding a schema to a model.
//!
//! [`bind`] creates the base model of a schema. The stored shape is an open document; the
//! schema is the only authority on what a valid document looks like. Two interceptors are
//! installed ahead of any user hook:
//!
//! - a pre-validate hook that strictly parses the document and replaces its fields with the
//!   parsed output, so defaults and coercions are persisted and invalid documents never
//!   reach the backend;
//! - a post-init hook that checks every loaded document against the schema and reports the
//!   ones that no longer match according to the registry's [`StalePolicy`].

use bson::{Bson, de::deserialize_from_bson, oid::ObjectId};
use convert_case::{Case, Casing};
use std::{ops::Deref, sync::Arc};

use crate::{
    document::{DocumentData, HydratedDocument},
    error::{ModelError, ModelResult},
    hooks::{HookSet, Operation, PostHookDescriptor, PreHookDescriptor},
    members::MemberTable,
    model::{Model, ModelInner},
    registry::{ModelRegistry, StalePolicy},
    schema::{IssueCode, Schema, ValidationError},
};

/// The base model of a schema, before enhancement.
///
/// Derefs to the registered [`Model`], which is usable as-is.
#[derive(Debug, Clone)]
pub struct BoundModel<D> {
    model: Model<D>,
    registry: ModelRegistry,
}

impl<D> BoundModel<D> {
    pub fn model(&self) -> &Model<D> {
        &self.model
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn into_model(self) -> Model<D> {
        self.model
    }
}

impl<D> Deref for BoundModel<D> {
    type Target = Model<D>;

    fn deref(&self) -> &Self::Target {
        &self.model
    }
}

/// The collection a model uses when none is configured: its name in snake case.
pub fn default_collection_name(model: &str) -> String {
    model.to_case(Case::Snake)
}

/// Creates the base model for `schema`, registers it under `name` and returns it.
pub(crate) fn bind<D: DocumentData>(
    registry: &ModelRegistry,
    name: String,
    schema: Schema<D>,
) -> ModelResult<BoundModel<D>> {
    let mut hooks = HookSet::default();

    hooks.add_pre(Operation::Validate, schema_validation(schema.clone()))?;
    hooks.add_post(
        Operation::Init,
        load_check(name.clone(), schema.clone(), registry.stale_policy()),
    )?;

    let model = Model::from_inner(ModelInner {
        collection: default_collection_name(&name),
        name,
        schema,
        backend: Arc::clone(registry.backend()),
        hooks,
        statics: MemberTable::default(),
        methods: MemberTable::default(),
        virtuals: Vec::new(),
        indexes: Vec::new(),
    });

    registry.replace(model.clone())?;

    Ok(BoundModel {
        model,
        registry: registry.clone(),
    })
}

fn schema_validation<D: DocumentData>(schema: Schema<D>) -> PreHookDescriptor<D> {
    PreHookDescriptor::document(move |document: &mut HydratedDocument<D>| {
        let parsed = schema.parse_document(&document.schema_fields())?;
        document.replace_fields(parsed);
        Ok(())
    })
}

fn load_check<D: DocumentData>(
    model: String,
    schema: Schema<D>,
    policy: StalePolicy,
) -> PostHookDescriptor<D> {
    PostHookDescriptor::document(move |document: &mut HydratedDocument<D>, _| {
        let Err(error) = check(&schema, document) else {
            return Ok(());
        };

        tracing::warn!(
            model = %model,
            id = %document.id(),
            error = %error,
            "stored document failed to parse, a migration is needed"
        );

        match policy {
            StalePolicy::Warn => {
                document.mark_stale(error);
                Ok(())
            }
            StalePolicy::Reject => Err(ModelError::StaleDocument {
                model: model.clone(),
                id: document.id().to_hex(),
                error,
            }),
        }
    })
}

/// Parses a loaded document and deserializes the result, `_id` included, into `D`.
fn check<D: DocumentData>(
    schema: &Schema<D>,
    document: &HydratedDocument<D>,
) -> Result<(), ValidationError> {
    let parsed = schema.parse_document(&document.schema_fields())?;

    typed::<D>(document.id(), parsed).map(drop)
}

fn typed<D: DocumentData>(id: ObjectId, parsed: bson::Document) -> Result<D, ValidationError> {
    let mut fields = bson::doc! { "_id": id };

    for (key, value) in parsed {
        fields.insert(key, value);
    }

    deserialize_from_bson(Bson::Document(fields))
        .map_err(|e| ValidationError::message(IssueCode::Custom, e.to_string()))
}
