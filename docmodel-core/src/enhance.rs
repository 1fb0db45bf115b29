//! Enhancing a bound model.
//!
//! [`ModelOptions`] collects everything a model adds on top of its schema: a collection name,
//! statics, methods, virtuals, indexes and lifecycle hooks. [`BoundModel::enhance`] applies a
//! bundle to the base model and registers the result under the same name, replacing whatever
//! was registered before.
//!
//! ```ignore
//! let users = registry
//!     .model::<User>("User", user_schema())?
//!     .enhance(
//!         ModelOptions::new()
//!             .with_static(FindByEmail)
//!             .with_method(VerifyPassword)
//!             .with_readonly_virtual(FullName)
//!             .with_virtual(Status)
//!             .index_with(IndexDef::asc("email"), IndexOptions { unique: true, ..Default::default() })
//!             .pre(Operation::Save, PreHookDescriptor::document(|user| {
//!                 user.push("history", doc! { "date": DateTime::now(), "action": "update" })
//!             })),
//!     )?;
//! ```

use std::{any::Any, sync::Arc};

use crate::{
    binder::BoundModel,
    document::DocumentData,
    error::{ModelError, ModelResult},
    hooks::{Operation, PostHookDescriptor, PreHookDescriptor},
    index::{IndexDef, IndexOptions},
    members::{MemberTable, Method, Static, Virtual, VirtualDef, VirtualEntry, VirtualSetter},
    model::{Model, ModelInner},
};

/// Additions applied to a bound model by [`BoundModel::enhance`].
pub struct ModelOptions<D> {
    collection: Option<String>,
    statics: MemberTable,
    methods: MemberTable,
    virtuals: Vec<(String, VirtualEntry<D>)>,
    indexes: Vec<IndexDef>,
    pre: Vec<(Operation, PreHookDescriptor<D>)>,
    post: Vec<(Operation, PostHookDescriptor<D>)>,
}

impl<D> Default for ModelOptions<D> {
    fn default() -> Self {
        Self {
            collection: None,
            statics: MemberTable::default(),
            methods: MemberTable::default(),
            virtuals: Vec::new(),
            indexes: Vec::new(),
            pre: Vec::new(),
            post: Vec::new(),
        }
    }
}

impl<D: DocumentData> ModelOptions<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores documents in `name` instead of the snake-cased model name.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    pub fn with_static<S: Static<D>>(mut self, member: S) -> Self {
        self.statics.insert(S::NAME, member);
        self
    }

    pub fn with_method<M: Method<D>>(mut self, member: M) -> Self {
        self.methods.insert(M::NAME, member);
        self
    }

    /// Registers a virtual without a setter.
    pub fn with_readonly_virtual<V: Virtual<D>>(self, member: V) -> Self {
        let member = Arc::new(member);
        let def = VirtualDef::readonly(member.clone());

        self.push_virtual(V::NAME, def, Some(member as Arc<dyn Any + Send + Sync>))
    }

    /// Registers a virtual with a getter and a setter.
    pub fn with_virtual<V: VirtualSetter<D>>(self, member: V) -> Self {
        let member = Arc::new(member);
        let def = VirtualDef::read_write(member.clone());

        self.push_virtual(V::NAME, def, Some(member as Arc<dyn Any + Send + Sync>))
    }

    /// Registers an untyped virtual, reachable by name only.
    pub fn with_virtual_def(self, name: impl Into<String>, def: VirtualDef<D>) -> Self {
        self.push_virtual(name.into(), def, None)
    }

    fn push_virtual(
        mut self,
        name: impl Into<String>,
        def: VirtualDef<D>,
        member: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        let name = name.into();
        let entry = VirtualEntry { def, member };

        self.virtuals.retain(|(key, _)| *key != name);
        self.virtuals.push((name, entry));
        self
    }

    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn index_with(self, index: IndexDef, options: IndexOptions) -> Self {
        self.index(index.with_options(options))
    }

    pub fn pre(mut self, operation: Operation, hook: PreHookDescriptor<D>) -> Self {
        self.pre.push((operation, hook));
        self
    }

    pub fn pre_many(
        mut self,
        operation: Operation,
        hooks: impl IntoIterator<Item = PreHookDescriptor<D>>,
    ) -> Self {
        self.pre.extend(hooks.into_iter().map(|hook| (operation, hook)));
        self
    }

    pub fn post(mut self, operation: Operation, hook: PostHookDescriptor<D>) -> Self {
        self.post.push((operation, hook));
        self
    }

    pub fn post_many(
        mut self,
        operation: Operation,
        hooks: impl IntoIterator<Item = PostHookDescriptor<D>>,
    ) -> Self {
        self.post.extend(hooks.into_iter().map(|hook| (operation, hook)));
        self
    }
}

impl<D: DocumentData> BoundModel<D> {
    /// Applies `options` to the base model and registers the result under the model's name.
    ///
    /// Hooks are appended after the binder's own, in the order they were added. The base
    /// model itself is left untouched, so enhancing twice starts from the same base and the
    /// last enhancement is the one registered.
    ///
    /// # Errors
    ///
    /// - [`ModelError::UnknownIndexPath`] when an index names a path the schema lacks;
    /// - [`ModelError::Hook`] when a hook descriptor is not allowed for its operation.
    pub fn enhance(&self, options: ModelOptions<D>) -> ModelResult<Model<D>> {
        let base = self.model().inner();
        let schema_paths = base.schema.paths();

        for index in &options.indexes {
            if let Some(path) = index
                .paths()
                .find(|path| *path != "_id" && !schema_paths.iter().any(|known| known == path))
            {
                return Err(ModelError::UnknownIndexPath {
                    model: base.name.clone(),
                    path: path.to_string(),
                });
            }
        }

        let mut hooks = base.hooks.clone();

        for (operation, hook) in options.pre {
            hooks.add_pre(operation, hook)?;
        }

        for (operation, hook) in options.post {
            hooks.add_post(operation, hook)?;
        }

        let mut statics = base.statics.clone();
        statics.merge(options.statics);

        let mut methods = base.methods.clone();
        methods.merge(options.methods);

        let mut virtuals = base.virtuals.clone();

        for (name, entry) in options.virtuals {
            virtuals.retain(|(key, _)| *key != name);
            virtuals.push((name, entry));
        }

        let mut indexes = base.indexes.clone();
        indexes.extend(options.indexes);

        let model = Model::from_inner(ModelInner {
            name: base.name.clone(),
            collection: options.collection.unwrap_or_else(|| base.collection.clone()),
            schema: base.schema.clone(),
            backend: base.backend.clone(),
            hooks,
            statics,
            methods,
            virtuals,
            indexes,
        });

        self.registry().replace(model.clone())?;

        tracing::debug!(
            model = %model.name(),
            collection = %model.collection_name(),
            statics = ?model.static_names(),
            methods = ?model.method_names(),
            virtuals = ?model.virtual_names(),
            "enhanced model"
        );

        Ok(model)
    }
}
