mod common;

use common::*;
use docmodel::{
    bson::{Bson, Document, doc, oid::ObjectId},
    memory::InMemoryStore,
    prelude::*,
};

#[tokio::test]
async fn methods_read_and_write_document_fields() {
    let registry = registry();
    let users = users(&registry);
    let mut user = users.new_document(john());

    user.call::<SetPassword>("password".into()).await.unwrap();

    assert!(!user.call::<VerifyPassword>("123456".into()).await.unwrap());
    assert!(user.call::<VerifyPassword>("password".into()).await.unwrap());
}

#[tokio::test]
async fn pre_save_hook_appends_history() {
    let registry = registry();
    let users = users(&registry);
    let mut user = users.new_document(john());

    user.save().await.unwrap();
    assert!(!user.is_new());
    assert_eq!(user.data().unwrap().history.len(), 1);

    user.save().await.unwrap();

    let stored = users.find_by_id(user.id()).await.unwrap().unwrap();
    let data = stored.data().unwrap();

    assert!(stored.stale_error().is_none());
    assert_eq!(data.history.len(), 2);
    assert!(data.history.iter().all(|entry| entry.action == Action::Update));
    assert_eq!(data.status, Status::Active);
    assert!(data.friends.is_empty());
}

#[tokio::test]
async fn pre_save_hooks_run_in_registration_order() {
    let registry = registry();
    let users = registry
        .model("User", user_schema())
        .unwrap()
        .enhance(
            user_options()
                .pre(Operation::Save, push_history("signup"))
                .pre_many(Operation::Save, [push_history("login"), push_history("logout")]),
        )
        .unwrap();

    let user = users.create(john()).await.unwrap();
    let actions = user
        .data()
        .unwrap()
        .history
        .into_iter()
        .map(|entry| entry.action)
        .collect::<Vec<_>>();

    assert_eq!(
        actions,
        vec![Action::Update, Action::Signup, Action::Login, Action::Logout]
    );
}

#[tokio::test]
async fn validation_rejects_malformed_documents() {
    let registry = registry();
    let users = users(&registry);
    let mut user = users.new_document(john());

    user.unset("history").unwrap();

    match user.validate().await {
        Err(ModelError::Validation(error)) => {
            assert!(error.to_string().contains("history: Required"));
        }
        other => panic!("expected a validation error, got {other:?}"),
    }

    let result = users
        .create(doc! { "firstName": "Sally", "lastName": "Tester" })
        .await;

    match result {
        Err(ModelError::Validation(error)) => {
            assert!(!error.issues_at("email").is_empty());
            assert!(!error.issues_at("history").is_empty());
        }
        other => panic!("expected a validation error, got {other:?}"),
    }

    assert_eq!(users.count_documents(Filter::all()).await.unwrap(), 0);
}

#[tokio::test]
async fn validation_rejects_a_missing_nested_object() {
    let registry = registry();
    let accounts = registry
        .model::<Document>(
            "Account",
            Schema::new(object([
                ("email", string()),
                ("auth", SchemaNode::from(object([("hash", string()), ("salt", string())]))),
            ])),
        )
        .unwrap();

    let mut account = accounts.new_document(doc! { "email": "a@example.com" });
    let error = account.validate().await.unwrap_err();

    assert!(error.to_string().contains("auth: Required"));
}

#[tokio::test]
async fn stale_documents_load_with_a_warning() {
    let logs = CapturedLogs::default();
    let _guard = tracing::subscriber::set_default(logs.subscriber());

    let registry = registry();
    let users = users(&registry);

    let result = users
        .update_one(
            Filter::eq("email", "sally@example.com"),
            doc! { "firstName": "Sally" },
            UpdateOptions::upsert(),
        )
        .await
        .unwrap();

    assert!(result.upserted_id.is_some());
    assert!(!logs.contents().contains("failed to parse"));

    let sally = users
        .call::<FindByEmail>("sally@example.com".into())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(sally.get("firstName"), Some(&Bson::from("Sally")));
    assert_eq!(sally.id(), result.upserted_id.unwrap());

    let error = sally.stale_error().unwrap();
    assert!(!error.issues_at("history").is_empty());
    assert!(logs.contents().contains("failed to parse"));
}

#[tokio::test]
async fn stale_documents_fail_to_load_under_reject_policy() {
    let registry = ModelRegistry::builder()
        .backend(InMemoryStore::new())
        .stale_policy(StalePolicy::Reject)
        .build()
        .unwrap();
    let users = users(&registry);

    users
        .update_one(
            Filter::eq("email", "sally@example.com"),
            doc! { "firstName": "Sally" },
            UpdateOptions::upsert(),
        )
        .await
        .unwrap();

    let result = users.call::<FindByEmail>("sally@example.com".into()).await;

    assert!(matches!(
        result,
        Err(ModelError::StaleDocument { ref model, .. }) if model == "User"
    ));
}

#[tokio::test]
async fn virtuals_compute_and_assign() {
    let registry = registry();
    let users = users(&registry);
    let mut user = users.new_document(john());

    assert_eq!(user.get_virtual::<FullName>().unwrap(), "John Doe");
    assert_eq!(user.get_virtual::<UserStatus>().unwrap(), Status::Active);

    user.set_virtual::<UserStatus>(Status::Deleted).unwrap();

    assert_eq!(user.get_virtual::<UserStatus>().unwrap(), Status::Deleted);
    assert_eq!(user.virtual_value("status").unwrap(), Bson::from("deleted"));

    let history = user.get_as::<Vec<HistoryEntry>>("history").unwrap().unwrap();
    assert_eq!(history.last().map(|entry| entry.action), Some(Action::StatusChange));

    assert!(matches!(
        user.set_virtual_value("fullName", "Jane Roe"),
        Err(ModelError::ReadonlyVirtual(name)) if name == "fullName"
    ));
    user.set_virtual_value("status", "invited").unwrap();
    assert_eq!(user.get_virtual::<UserStatus>().unwrap(), Status::Invited);

    let rendered = user.to_bson_with_virtuals().unwrap();
    assert_eq!(rendered.get_str("fullName").unwrap(), "John Doe");
    assert_eq!(rendered.get_str("status").unwrap(), "invited");

    assert!(matches!(
        user.virtual_value("nickname"),
        Err(ModelError::UnknownVirtual(_))
    ));
}

#[tokio::test]
async fn statics_query_through_the_model() {
    let registry = registry();
    let users = users(&registry);

    for (first, email) in [("Cleo", "c@example.com"), ("Abe", "a@example.com"), ("Bo", "b@example.com")] {
        users
            .create(doc! { "firstName": first, "email": email, "history": [] })
            .await
            .unwrap();
    }

    let emails = users
        .call::<List>(0)
        .await
        .unwrap()
        .iter()
        .map(|user| user.data().unwrap().email)
        .collect::<Vec<_>>();

    assert_eq!(emails, vec!["a@example.com", "b@example.com", "c@example.com"]);
    assert!(users.call::<List>(1).await.unwrap().is_empty());
    assert!(users.call::<FindByEmail>("z@example.com".into()).await.unwrap().is_none());

    assert!(users.has_static("findByEmail"));
    assert!(users.has_method("verifyPassword"));
    assert_eq!(users.virtual_names(), vec!["fullName", "status"]);
}

#[tokio::test]
async fn unenhanced_models_have_no_members() {
    let registry = registry();
    let plain = registry.model("UnenhancedUser", user_schema()).unwrap();

    assert_eq!(plain.collection_name(), "unenhanced_user");
    assert!(plain.static_names().is_empty());
    assert!(matches!(
        plain.call::<FindByEmail>("a@example.com".into()).await,
        Err(ModelError::UnknownStatic(_))
    ));

    let user = plain.create(john()).await.unwrap();
    assert_eq!(user.data().unwrap().last_name.as_deref(), Some("Doe"));
    assert!(user.data().unwrap().history.is_empty());
}

#[tokio::test]
async fn unique_email_index_rejects_duplicates() {
    let registry = registry();
    let users = users(&registry);

    users.sync_indexes().await.unwrap();
    users.create(john()).await.unwrap();

    let result = users.create(john()).await;

    assert_eq!(
        result.unwrap_err(),
        ModelError::Store(DocumentStoreError::DuplicateKey(
            "email_1".to_string(),
            "users".to_string()
        ))
    );

    let indexes = registry.backend().list_indexes("users").await.unwrap();
    assert_eq!(indexes.len(), 4);
    assert_eq!(users.count(Filter::all()).await.unwrap(), 1);
}

#[tokio::test]
async fn unknown_index_paths_are_rejected() {
    let registry = registry();
    let result = registry
        .model("User", user_schema())
        .unwrap()
        .enhance(ModelOptions::new().index(IndexDef::asc("nickname")));

    assert_eq!(
        result.unwrap_err(),
        ModelError::UnknownIndexPath {
            model: "User".to_string(),
            path: "nickname".to_string(),
        }
    );
}

#[tokio::test]
async fn object_id_arrays_reference_other_models() {
    let registry = registry();
    let people = registry
        .model::<Document>("Person", Schema::new(object([("name", string())])))
        .unwrap()
        .enhance(ModelOptions::new().collection("person"))
        .unwrap();
    let posts = registry
        .model::<Document>(
            "BlogPost",
            Schema::new(object([
                ("title", string()),
                ("description", string()),
                ("commenters", object_id().array()),
            ])),
        )
        .unwrap()
        .enhance(ModelOptions::new().collection("blog-post"))
        .unwrap();

    let ada = people.create(doc! { "name": "Ada" }).await.unwrap();
    let bob = people.create(doc! { "name": "Bob" }).await.unwrap();
    people.create(doc! { "name": "Cy" }).await.unwrap();

    posts
        .create(doc! {
            "title": "Hello",
            "description": "First post",
            "commenters": [ada.id().to_hex(), { "_id": bob.id() }],
        })
        .await
        .unwrap();

    let post = posts.find_one(Filter::all()).await.unwrap().unwrap();
    let commenters = post.get_as::<Vec<ObjectId>>("commenters").unwrap().unwrap();

    assert_eq!(commenters, vec![ada.id(), bob.id()]);

    let found = people
        .find(Filter::any_of(
            "_id",
            commenters.into_iter().map(Bson::from).collect::<Vec<_>>(),
        ))
        .await
        .unwrap();
    assert_eq!(found.len(), 2);

    let invalid = posts
        .create(doc! { "title": "Bad", "description": "", "commenters": ["not-an-id"] })
        .await
        .unwrap_err();
    assert!(invalid.to_string().contains("invalid object id"));
}

#[tokio::test]
async fn collection_names_default_to_snake_case() {
    let registry = registry();

    let default_test = registry
        .model::<Document>("DefaultTest", Schema::new(ObjectSchema::new()))
        .unwrap();
    assert_eq!(default_test.collection_name(), "default_test");

    let custom = registry
        .model::<Document>(
            "CustomUser",
            Schema::new(object([
                ("firstName", string()),
                ("lastName", string().optional()),
            ])),
        )
        .unwrap()
        .enhance(ModelOptions::new().collection("custom-users"))
        .unwrap();
    assert_eq!(custom.collection_name(), "custom-users");
    assert_eq!(
        registry.get::<Document>("CustomUser").unwrap().collection_name(),
        "custom-users"
    );
}

#[tokio::test]
async fn model_operations_run_against_the_backend() {
    let registry = registry();
    let users = users(&registry);

    let inserted = users
        .insert_many(vec![
            john(),
            doc! { "firstName": "Jane", "email": "jane@example.com", "history": [] },
            doc! { "firstName": "Jim", "email": "jim@example.com", "history": [] },
        ])
        .await
        .unwrap();

    assert_eq!(inserted.len(), 3);
    assert!(inserted.iter().all(|user| !user.is_new()));
    assert_eq!(users.count_documents(Filter::eq("_status", "active")).await.unwrap(), 3);

    let updated = users
        .update_one(
            Filter::eq("email", "jim@example.com"),
            doc! { "$set": { "_status": "invited" } },
            UpdateOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        updated,
        UpdateResult {
            matched_count: 1,
            modified_count: 1,
            upserted_id: None,
        }
    );

    assert_eq!(
        users.distinct("_status", Filter::all()).await.unwrap(),
        vec![Bson::from("active"), Bson::from("invited")]
    );

    let jane = users
        .find_one_and_update(
            Filter::eq("email", "jane@example.com"),
            doc! { "$set": { "lastName": "Roe" } },
            FindOneAndUpdateOptions {
                return_document: ReturnDocument::After,
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(jane.get_virtual::<FullName>().unwrap(), "Jane Roe");

    let active = users
        .aggregate(vec![
            doc! { "$match": { "_status": "active" } },
            doc! { "$count": "active" },
        ])
        .await
        .unwrap();
    assert_eq!(active, vec![doc! { "active": 2i64 }]);

    let deleted = users
        .delete_many(Filter::eq("_status", "invited"))
        .await
        .unwrap();
    assert_eq!(deleted.deleted_count, 1);

    let removed = users
        .find_one_and_delete(Filter::eq("email", "john.doe@example.com"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(removed.get_virtual::<FullName>().unwrap(), "John Doe");
    assert_eq!(users.estimated_document_count().await.unwrap(), 1);

    let replaced = users
        .replace_one(
            Filter::eq("email", "jane@example.com"),
            doc! {
                "firstName": "Janet",
                "email": "jane@example.com",
                "_status": "active",
                "history": [],
                "friends": [],
            },
            UpdateOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(replaced.modified_count, 1);

    let janet = users
        .call::<FindByEmail>("jane@example.com".into())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(janet.id(), jane.id());
    assert_eq!(janet.get_virtual::<FullName>().unwrap(), "Janet");

    let mut janet = janet;
    assert_eq!(janet.delete_one().await.unwrap().deleted_count, 1);
    assert_eq!(users.count(Filter::all()).await.unwrap(), 0);
}

#[tokio::test]
async fn document_updates_apply_to_the_stored_copy() {
    let registry = registry();
    let users = users(&registry);
    let mut user = users.create(john()).await.unwrap();

    let result = user
        .update_one(doc! { "$push": { "friends": ObjectId::new() } })
        .await
        .unwrap();
    assert_eq!(result.modified_count, 1);
    assert_eq!(user.data().unwrap().friends.len(), 0);

    let stored = users.find_by_id(user.id()).await.unwrap().unwrap();
    assert_eq!(stored.data().unwrap().friends.len(), 1);

    assert!(user.set("_id", ObjectId::new()).is_err());
}
