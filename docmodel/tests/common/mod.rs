#![allow(dead_code)]

use std::{
    io,
    sync::{Arc, Mutex},
};

use docmodel::{
    bson::{DateTime, doc, oid::ObjectId},
    memory::InMemoryStore,
    prelude::*,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Invited,
    Active,
    Deleted,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Invited => "invited",
            Status::Active => "active",
            Status::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Login,
    Logout,
    Signup,
    Update,
    StatusChange,
    ChangePassword,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub date: DateTime,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Auth {
    pub hash: String,
    pub salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    #[serde(rename = "_status")]
    pub status: Status,
    pub history: Vec<HistoryEntry>,
    pub friends: Vec<ObjectId>,
}

pub fn user_schema() -> Schema<User> {
    Schema::new(object([
        ("firstName", string()),
        ("lastName", string().optional()),
        ("email", string()),
        (
            "auth",
            object([("hash", string()), ("salt", string())]).optional(),
        ),
        (
            "_status",
            enumeration(["invited", "active", "deleted"]).default("active"),
        ),
        (
            "history",
            object([
                ("date", date()),
                (
                    "action",
                    enumeration([
                        "login",
                        "logout",
                        "signup",
                        "update",
                        "statusChange",
                        "changePassword",
                    ]),
                ),
            ])
            .array(),
        ),
        ("friends", object_id().array().default(docmodel::bson::Bson::Array(vec![]))),
    ]))
}

pub struct FindByEmail;

#[async_trait]
impl Static<User> for FindByEmail {
    const NAME: &'static str = "findByEmail";
    type Args = String;
    type Output = Option<HydratedDocument<User>>;

    async fn call(&self, model: &Model<User>, email: String) -> ModelResult<Self::Output> {
        model.find_one(Filter::eq("email", email)).await
    }
}

pub struct List;

#[async_trait]
impl Static<User> for List {
    const NAME: &'static str = "list";
    type Args = usize;
    type Output = Vec<HydratedDocument<User>>;

    async fn call(&self, model: &Model<User>, page: usize) -> ModelResult<Self::Output> {
        model
            .find(
                Query::builder()
                    .sort("email", SortDirection::Asc)
                    .offset(page * 50)
                    .limit(50)
                    .build(),
            )
            .await
    }
}

pub struct VerifyPassword;

#[async_trait]
impl Method<User> for VerifyPassword {
    const NAME: &'static str = "verifyPassword";
    type Args = String;
    type Output = bool;

    async fn call(
        &self,
        document: &mut HydratedDocument<User>,
        password: String,
    ) -> ModelResult<bool> {
        Ok(document
            .get_as::<Auth>("auth")?
            .is_some_and(|auth| auth.hash == format!("{password}{}", auth.salt)))
    }
}

pub struct SetPassword;

#[async_trait]
impl Method<User> for SetPassword {
    const NAME: &'static str = "setPassword";
    type Args = String;
    type Output = ();

    async fn call(&self, document: &mut HydratedDocument<User>, password: String) -> ModelResult<()> {
        let salt = ObjectId::new().to_hex();

        document.set(
            "auth",
            doc! { "hash": format!("{password}{salt}"), "salt": salt },
        )
    }
}

pub struct FullName;

impl Virtual<User> for FullName {
    const NAME: &'static str = "fullName";
    type Value = String;

    fn get(&self, document: &HydratedDocument<User>) -> ModelResult<String> {
        let first = document.get_as::<String>("firstName")?.unwrap_or_default();

        Ok(match document.get_as::<String>("lastName")? {
            Some(last) => format!("{first} {last}"),
            None => first,
        })
    }
}

pub struct UserStatus;

impl Virtual<User> for UserStatus {
    const NAME: &'static str = "status";
    type Value = Status;

    fn get(&self, document: &HydratedDocument<User>) -> ModelResult<Status> {
        Ok(document
            .get_as::<Status>("_status")?
            .unwrap_or(Status::Active))
    }
}

impl VirtualSetter<User> for UserStatus {
    fn set(&self, document: &mut HydratedDocument<User>, status: Status) -> ModelResult<()> {
        document.set("_status", status.as_str())?;
        document.push("history", doc! { "date": DateTime::now(), "action": "statusChange" })
    }
}

pub fn push_history(action: &'static str) -> PreHookDescriptor<User> {
    PreHookDescriptor::document(move |user: &mut HydratedDocument<User>| {
        user.push("history", doc! { "date": DateTime::now(), "action": action })
    })
}

pub fn user_options() -> ModelOptions<User> {
    ModelOptions::new()
        .collection("users")
        .with_static(FindByEmail)
        .with_static(List)
        .with_method(VerifyPassword)
        .with_method(SetPassword)
        .with_readonly_virtual(FullName)
        .with_virtual(UserStatus)
        .index_with(
            IndexDef::asc("email"),
            IndexOptions {
                unique: true,
                ..Default::default()
            },
        )
        .index(IndexDef::asc("firstName"))
        .index(IndexDef::asc("auth.hash"))
        .index(IndexDef::asc("history.action"))
        .pre(Operation::Save, push_history("update"))
}

pub fn registry() -> ModelRegistry {
    ModelRegistry::new(InMemoryStore::new())
}

pub fn users(registry: &ModelRegistry) -> Model<User> {
    registry
        .model("User", user_schema())
        .unwrap()
        .enhance(user_options())
        .unwrap()
}

pub fn john() -> docmodel::bson::Document {
    doc! {
        "firstName": "John",
        "lastName": "Doe",
        "email": "john.doe@example.com",
        "history": [],
    }
}

/// Collects formatted log output for assertions.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        let logs = self.clone();

        tracing_subscriber::fmt()
            .with_writer(move || logs.clone())
            .with_ansi(false)
            .with_env_filter(EnvFilter::new("docmodel_core=warn"))
            .finish()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
