//! The model registry.
//!
//! A [`ModelRegistry`] owns the backend models persist through and maps model names to their
//! current definitions. Each name is registered at most once; redefining a model deregisters
//! the previous definition first, so the last definition wins.
//!
//! ```ignore
//! let registry = ModelRegistry::builder()
//!     .backend(InMemoryStore::new())
//!     .stale_policy(StalePolicy::Warn)
//!     .build()?;
//!
//! let users = registry.model::<User>("User", user_schema())?;
//! let users = users.enhance(ModelOptions::new().with_static(FindByEmail))?;
//! ```

use parking_lot::RwLock;
use std::{any::Any, collections::HashMap, fmt, sync::Arc};
use thiserror::Error;

use crate::{
    backend::StoreBackend,
    binder::{BoundModel, bind},
    document::DocumentData,
    error::{DocumentStoreError, DocumentStoreResult, ModelResult},
    model::Model,
    schema::Schema,
};

/// How documents that no longer match their schema are treated when loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePolicy {
    /// Log a warning and attach the validation error to the document.
    #[default]
    Warn,
    /// Fail the load with [`ModelError::StaleDocument`](crate::error::ModelError::StaleDocument).
    Reject,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Model {0} is not registered")]
    NotFound(String),
    #[error("Model {0} is already registered")]
    AlreadyRegistered(String),
    /// The model exists but was registered with a different document type.
    #[error("Model {0} is registered with a different document type")]
    TypeMismatch(String),
}

struct RegistryInner {
    backend: Arc<dyn StoreBackend>,
    stale_policy: StalePolicy,
    models: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

/// Name-to-model map shared by every model it created.
#[derive(Clone)]
pub struct ModelRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("backend", &self.inner.backend)
            .field("stale_policy", &self.inner.stale_policy)
            .field("models", &self.names())
            .finish()
    }
}

impl ModelRegistry {
    /// Creates a registry over `backend` with the default stale policy.
    pub fn new(backend: impl StoreBackend + 'static) -> Self {
        Self::with_backend(Arc::new(backend), StalePolicy::default())
    }

    pub fn builder() -> ModelRegistryBuilder {
        ModelRegistryBuilder::default()
    }

    fn with_backend(backend: Arc<dyn StoreBackend>, stale_policy: StalePolicy) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                backend,
                stale_policy,
                models: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.inner.backend
    }

    pub fn stale_policy(&self) -> StalePolicy {
        self.inner.stale_policy
    }

    /// Binds `schema` to a new model named `name` and registers it.
    ///
    /// Any model already registered under `name` is replaced.
    pub fn model<D: DocumentData>(
        &self,
        name: impl Into<String>,
        schema: Schema<D>,
    ) -> ModelResult<BoundModel<D>> {
        bind(self, name.into(), schema)
    }

    /// Registers a model under its name.
    ///
    /// # Errors
    ///
    /// [`RegistryError::AlreadyRegistered`] when the name is taken.
    pub fn register<D: DocumentData>(&self, model: Model<D>) -> Result<(), RegistryError> {
        let mut models = self.inner.models.write();

        if models.contains_key(model.name()) {
            return Err(RegistryError::AlreadyRegistered(model.name().to_string()));
        }

        tracing::debug!(model = %model.name(), collection = %model.collection_name(), "registering model");

        models.insert(model.name().to_string(), Arc::new(model));

        Ok(())
    }

    /// Removes a model.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] when no model has that name.
    pub fn deregister(&self, name: &str) -> Result<(), RegistryError> {
        match self.inner.models.write().remove(name) {
            Some(_) => {
                tracing::debug!(model = %name, "deregistered model");
                Ok(())
            }
            None => Err(RegistryError::NotFound(name.to_string())),
        }
    }

    /// Deregisters `model`'s name if present, then registers `model`.
    pub(crate) fn replace<D: DocumentData>(&self, model: Model<D>) -> Result<(), RegistryError> {
        match self.deregister(model.name()) {
            Ok(()) | Err(RegistryError::NotFound(_)) => {}
            Err(error) => return Err(error),
        }

        self.register(model)
    }

    /// Looks up the current definition of a model.
    pub fn get<D: DocumentData>(&self, name: &str) -> Result<Model<D>, RegistryError> {
        let entry = self
            .inner
            .models
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        entry
            .downcast::<Model<D>>()
            .map(|model| Model::clone(&model))
            .map_err(|_| RegistryError::TypeMismatch(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.models.read().contains_key(name)
    }

    /// Registered model names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .inner
            .models
            .read()
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Shuts the backend down.
    pub async fn shutdown(&self) -> DocumentStoreResult<()> {
        self.inner.backend.shutdown().await
    }
}

#[derive(Default)]
pub struct ModelRegistryBuilder {
    backend: Option<Arc<dyn StoreBackend>>,
    stale_policy: StalePolicy,
}

impl ModelRegistryBuilder {
    pub fn backend(mut self, backend: impl StoreBackend + 'static) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Uses a backend that is shared with other registries.
    pub fn shared_backend(mut self, backend: Arc<dyn StoreBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    pub fn build(self) -> DocumentStoreResult<ModelRegistry> {
        let backend = self.backend.ok_or_else(|| {
            DocumentStoreError::Initialization("a model registry needs a backend".to_string())
        })?;

        Ok(ModelRegistry::with_backend(backend, self.stale_policy))
    }
}
