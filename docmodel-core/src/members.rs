//! Typed statics, methods and virtuals.
//!
//! Each member is a type implementing one of the traits below. Registration stores the value
//! under its `NAME`; invocation is generic over the member type, so argument and return types
//! are checked at compile time:
//!
//! ```ignore
//! struct FindByEmail;
//!
//! #[async_trait]
//! impl Static<User> for FindByEmail {
//!     const NAME: &'static str = "findByEmail";
//!     type Args = String;
//!     type Output = Option<HydratedDocument<User>>;
//!
//!     async fn call(&self, model: &Model<User>, email: String) -> ModelResult<Self::Output> {
//!         model.find_one(Filter::eq("email", email)).await
//!     }
//! }
//!
//! let user = users.call::<FindByEmail>("john@example.com".into()).await?;
//! ```
//!
//! Virtuals are computed properties. A [`Virtual`] alone is readonly; implementing
//! [`VirtualSetter`] as well makes it assignable. `HydratedDocument::set_virtual` requires
//! `VirtualSetter`, so assigning a readonly virtual is a compile error.

use async_trait::async_trait;
use bson::Bson;
use serde::{Serialize, de::DeserializeOwned};
use std::{any::Any, collections::HashMap, sync::Arc};

use bson::{de::deserialize_from_bson, ser::serialize_to_bson};

use crate::{
    document::{DocumentData, HydratedDocument},
    error::ModelResult,
    model::Model,
};

/// A model-level function. `Model::call` invokes it with the finalized model.
#[async_trait]
pub trait Static<D: DocumentData>: Send + Sync + 'static {
    const NAME: &'static str;
    type Args: Send + 'static;
    type Output: Send + 'static;

    async fn call(&self, model: &Model<D>, args: Self::Args) -> ModelResult<Self::Output>;
}

/// A document-level function. `HydratedDocument::call` invokes it with the document.
#[async_trait]
pub trait Method<D: DocumentData>: Send + Sync + 'static {
    const NAME: &'static str;
    type Args: Send + 'static;
    type Output: Send + 'static;

    async fn call(
        &self,
        document: &mut HydratedDocument<D>,
        args: Self::Args,
    ) -> ModelResult<Self::Output>;
}

/// A computed property of a document.
pub trait Virtual<D: DocumentData>: Send + Sync + 'static {
    const NAME: &'static str;
    type Value: Serialize + DeserializeOwned + Send;

    fn get(&self, document: &HydratedDocument<D>) -> ModelResult<Self::Value>;
}

/// The setter half of a read/write virtual.
pub trait VirtualSetter<D: DocumentData>: Virtual<D> {
    fn set(&self, document: &mut HydratedDocument<D>, value: Self::Value) -> ModelResult<()>;
}

pub type VirtualGetter<D> = Arc<dyn Fn(&HydratedDocument<D>) -> ModelResult<Bson> + Send + Sync>;
pub type VirtualSetterFn<D> =
    Arc<dyn Fn(&mut HydratedDocument<D>, Bson) -> ModelResult<()> + Send + Sync>;

/// Runtime form of a registered virtual, tagged by whether it can be assigned.
pub enum VirtualDef<D> {
    Readonly(VirtualGetter<D>),
    ReadWrite(VirtualGetter<D>, VirtualSetterFn<D>),
}

impl<D> Clone for VirtualDef<D> {
    fn clone(&self) -> Self {
        match self {
            VirtualDef::Readonly(get) => VirtualDef::Readonly(get.clone()),
            VirtualDef::ReadWrite(get, set) => VirtualDef::ReadWrite(get.clone(), set.clone()),
        }
    }
}

impl<D: DocumentData> VirtualDef<D> {
    pub fn readonly<V: Virtual<D>>(member: Arc<V>) -> Self {
        VirtualDef::Readonly(getter(member))
    }

    pub fn read_write<V: VirtualSetter<D>>(member: Arc<V>) -> Self {
        let set_member = member.clone();
        let set: VirtualSetterFn<D> = Arc::new(
            move |document: &mut HydratedDocument<D>, value: Bson| -> ModelResult<()> {
                let value = deserialize_from_bson::<V::Value>(value)?;
                set_member.set(document, value)
            },
        );

        VirtualDef::ReadWrite(getter(member), set)
    }

    pub fn is_readonly(&self) -> bool {
        matches!(self, VirtualDef::Readonly(_))
    }

    pub fn get(&self, document: &HydratedDocument<D>) -> ModelResult<Bson> {
        match self {
            VirtualDef::Readonly(get) | VirtualDef::ReadWrite(get, _) => get(document),
        }
    }

    /// Runs the setter. `None` when the virtual is readonly.
    pub fn set(&self, document: &mut HydratedDocument<D>, value: Bson) -> Option<ModelResult<()>> {
        match self {
            VirtualDef::Readonly(_) => None,
            VirtualDef::ReadWrite(_, set) => Some(set(document, value)),
        }
    }
}

fn getter<D: DocumentData, V: Virtual<D>>(member: Arc<V>) -> VirtualGetter<D> {
    Arc::new(move |document: &HydratedDocument<D>| -> ModelResult<Bson> {
        Ok(serialize_to_bson(&member.get(document)?)?)
    })
}

/// A registered virtual: its runtime definition plus, for typed registrations, the member
/// value used by typed access.
pub(crate) struct VirtualEntry<D> {
    pub(crate) def: VirtualDef<D>,
    pub(crate) member: Option<Arc<dyn Any + Send + Sync>>,
}

impl<D> Clone for VirtualEntry<D> {
    fn clone(&self) -> Self {
        Self {
            def: self.def.clone(),
            member: self.member.clone(),
        }
    }
}

/// Type-erased member storage keyed by name. Later registrations replace earlier ones.
#[derive(Clone, Default)]
pub(crate) struct MemberTable {
    entries: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl MemberTable {
    pub(crate) fn insert<T: Any + Send + Sync>(&mut self, name: &str, member: T) {
        self.entries
            .insert(name.to_string(), Arc::new(member));
    }

    pub(crate) fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.entries
            .get(name)
            .cloned()?
            .downcast::<T>()
            .ok()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Copies every entry of `other` in, replacing same-named entries.
    pub(crate) fn merge(&mut self, other: MemberTable) {
        self.entries.extend(other.entries);
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names = self.entries.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}
