mod common;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use common::*;
use docmodel::{
    bson::doc,
    prelude::*,
};

struct AsyncAudit(Arc<AtomicUsize>);

#[async_trait]
impl PreHook<User> for AsyncAudit {
    async fn run(&self, _target: HookTarget<'_, User>) -> ModelResult<()> {
        tokio::task::yield_now().await;
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl PostHook<User> for AsyncAudit {
    async fn run(
        &self,
        _target: HookTarget<'_, User>,
        _outcome: &OperationOutcome<User>,
    ) -> ModelResult<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

async fn seed(users: &Model<User>) {
    users
        .insert_many(vec![
            john(),
            doc! {
                "firstName": "Dee",
                "email": "dee@example.com",
                "_status": "deleted",
                "history": [],
            },
        ])
        .await
        .unwrap();
}

#[test]
fn hook_capabilities_are_checked_at_enhance_time() {
    let registry = registry();
    let bound = registry.model("User", user_schema()).unwrap();

    assert_eq!(
        bound
            .enhance(
                ModelOptions::new()
                    .pre(Operation::Find, PreHookDescriptor::sync(|_| Ok(())).applies_to(true, false))
            )
            .unwrap_err(),
        ModelError::Hook(HookError::DocumentNotAllowed {
            operation: Operation::Find
        })
    );
    assert_eq!(
        bound
            .enhance(
                ModelOptions::new()
                    .post(Operation::InsertMany, PostHookDescriptor::on_error(|_, _| Ok(())))
            )
            .unwrap_err(),
        ModelError::Hook(HookError::ErrorHandlerNotAllowed {
            operation: Operation::InsertMany
        })
    );
    assert_eq!(
        bound
            .enhance(
                ModelOptions::new()
                    .post(Operation::Init, PostHookDescriptor::new(AsyncAudit(counter())))
            )
            .unwrap_err(),
        ModelError::Hook(HookError::AsyncNotAllowed {
            operation: Operation::Init
        })
    );
    assert_eq!(
        bound
            .enhance(
                ModelOptions::new()
                    .pre(Operation::Save, PreHookDescriptor::sync(|_| Ok(())).applies_to(false, false))
            )
            .unwrap_err(),
        ModelError::Hook(HookError::NoApplicability {
            operation: Operation::Save
        })
    );

    assert!(registry.contains("User"));
    assert!(registry.get::<User>("User").unwrap().static_names().is_empty());
}

#[tokio::test]
async fn async_hooks_are_awaited() {
    let registry = registry();
    let audits = counter();
    let users = registry
        .model("User", user_schema())
        .unwrap()
        .enhance(
            user_options()
                .pre(Operation::Save, PreHookDescriptor::new(AsyncAudit(audits.clone())))
                .post(Operation::Save, PostHookDescriptor::new(AsyncAudit(audits.clone()))),
        )
        .unwrap();

    users.create(john()).await.unwrap();

    assert_eq!(audits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn query_hooks_can_rewrite_filters() {
    let registry = registry();
    let users = registry
        .model("User", user_schema())
        .unwrap()
        .enhance(user_options().pre(
            Operation::Find,
            PreHookDescriptor::query(|query: &mut QueryContext| {
                let filter = query.filter();
                query.set_filter(filter.and(Filter::ne("_status", "deleted")));
                Ok(())
            }),
        ))
        .unwrap();

    seed(&users).await;

    let found = users.find(Filter::all()).await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].data().unwrap().first_name, "John");
    assert_eq!(users.count_documents(Filter::all()).await.unwrap(), 2);
}

#[tokio::test]
async fn post_hooks_see_operation_outcomes() {
    let registry = registry();
    let seen = counter();
    let loads = counter();
    let batch = counter();

    let users = {
        let seen = seen.clone();
        let loads = loads.clone();
        let batch = batch.clone();

        registry
            .model("User", user_schema())
            .unwrap()
            .enhance(
                user_options()
                    .post(
                        Operation::Find,
                        PostHookDescriptor::query(move |_: &mut QueryContext, outcome: &OperationOutcome<User>| {
                            if let OperationOutcome::Documents(documents) = outcome {
                                seen.store(documents.len(), Ordering::SeqCst);
                            }
                            Ok(())
                        }),
                    )
                    .post(
                        Operation::Init,
                        PostHookDescriptor::document(move |_: &mut HydratedDocument<User>, _: &OperationOutcome<User>| {
                            loads.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }),
                    )
                    .pre(
                        Operation::InsertMany,
                        PreHookDescriptor::sync(move |target: HookTarget<'_, User>| {
                            if let HookTarget::InsertMany(documents) = target {
                                batch.store(documents.len(), Ordering::SeqCst);
                            }
                            Ok(())
                        }),
                    ),
            )
            .unwrap()
    };

    seed(&users).await;
    assert_eq!(batch.load(Ordering::SeqCst), 2);
    assert_eq!(loads.load(Ordering::SeqCst), 0);

    users.find(Filter::all()).await.unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn error_handlers_replace_the_error() {
    let registry = registry();
    let users = registry
        .model("User", user_schema())
        .unwrap()
        .enhance(user_options().post(
            Operation::Save,
            PostHookDescriptor::on_error(|_, error: &ModelError| {
                Err(ModelError::custom(format!("save failed: {error}")))
            }),
        ))
        .unwrap();

    let error = users
        .create(doc! { "firstName": "Sally" })
        .await
        .unwrap_err();

    match error {
        ModelError::Custom(message) => assert!(message.starts_with("save failed: Validation failed")),
        other => panic!("expected a custom error, got {other:?}"),
    }
}

#[tokio::test]
async fn flags_select_document_and_query_modes() {
    let registry = registry();
    let both = counter();
    let query_only = counter();

    let users = {
        let both = both.clone();
        let query_only = query_only.clone();

        registry
            .model("User", user_schema())
            .unwrap()
            .enhance(
                user_options()
                    .pre(
                        Operation::UpdateOne,
                        PreHookDescriptor::sync(move |_| {
                            both.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .applies_to(true, true),
                    )
                    .pre(
                        Operation::UpdateOne,
                        PreHookDescriptor::sync(move |_| {
                            query_only.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }),
                    ),
            )
            .unwrap()
    };

    let mut user = users.create(john()).await.unwrap();

    user.update_one(doc! { "$set": { "lastName": "Smith" } })
        .await
        .unwrap();
    users
        .update_one(
            Filter::eq("email", "john.doe@example.com"),
            doc! { "$set": { "lastName": "Doe" } },
            UpdateOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(both.load(Ordering::SeqCst), 2);
    assert_eq!(query_only.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn aggregate_hooks_rewrite_the_pipeline() {
    let registry = registry();
    let users = registry
        .model("User", user_schema())
        .unwrap()
        .enhance(user_options().pre(
            Operation::Aggregate,
            PreHookDescriptor::sync(|target: HookTarget<'_, User>| {
                if let HookTarget::Aggregate(pipeline) = target {
                    pipeline.insert(0, doc! { "$match": { "_status": "active" } });
                }
                Ok(())
            }),
        ))
        .unwrap();

    seed(&users).await;

    let counted = users
        .aggregate(vec![doc! { "$count": "n" }])
        .await
        .unwrap();

    assert_eq!(counted, vec![doc! { "n": 1i64 }]);
}
