mod common;

use std::sync::Arc;

use common::*;
use docmodel::{
    bson::Document,
    memory::InMemoryStore,
    prelude::*,
};

#[tokio::test]
async fn redefining_a_model_replaces_it() {
    let registry = registry();
    let first = users(&registry);

    let second = registry
        .model("User", user_schema())
        .unwrap()
        .enhance(ModelOptions::new().collection("users").with_static(List))
        .unwrap();

    let current = registry.get::<User>("User").unwrap();

    assert!(first.has_static("findByEmail"));
    assert!(second.has_static("list"));
    assert!(current.has_static("list"));
    assert!(!current.has_static("findByEmail"));
    assert!(current.virtual_names().is_empty());
    assert_eq!(registry.names(), vec!["User"]);

    assert!(matches!(
        current.call::<FindByEmail>("john.doe@example.com".into()).await,
        Err(ModelError::UnknownStatic(name)) if name == "findByEmail"
    ));
}

#[test]
fn lookups_check_name_and_type() {
    let registry = registry();
    users(&registry);

    assert_eq!(
        registry.get::<Document>("User").unwrap_err(),
        RegistryError::TypeMismatch("User".to_string())
    );
    assert_eq!(
        registry.get::<User>("Admin").unwrap_err(),
        RegistryError::NotFound("Admin".to_string())
    );
}

#[test]
fn register_and_deregister_are_explicit() {
    let registry = registry();
    let users = users(&registry);

    assert_eq!(
        registry.register(users.clone()),
        Err(RegistryError::AlreadyRegistered("User".to_string()))
    );

    registry.deregister("User").unwrap();
    assert!(!registry.contains("User"));
    assert_eq!(
        registry.deregister("User"),
        Err(RegistryError::NotFound("User".to_string()))
    );

    registry.register(users).unwrap();
    assert!(registry.contains("User"));
}

#[test]
fn builder_requires_a_backend() {
    assert!(matches!(
        ModelRegistry::builder().build(),
        Err(DocumentStoreError::Initialization(_))
    ));
}

#[tokio::test]
async fn registries_can_share_a_backend() {
    let backend: Arc<dyn StoreBackend> = Arc::new(InMemoryStore::new());

    let writer = ModelRegistry::builder()
        .shared_backend(backend.clone())
        .build()
        .unwrap();
    let reader = ModelRegistry::builder()
        .shared_backend(backend)
        .stale_policy(StalePolicy::Reject)
        .build()
        .unwrap();

    users(&writer).create(john()).await.unwrap();

    let found = users(&reader)
        .call::<FindByEmail>("john.doe@example.com".into())
        .await
        .unwrap();

    assert!(found.is_some());
    assert_eq!(reader.stale_policy(), StalePolicy::Reject);
    assert_eq!(
        reader.backend().list_collections().await.unwrap(),
        vec!["users".to_string()]
    );

    writer.shutdown().await.unwrap();
}
