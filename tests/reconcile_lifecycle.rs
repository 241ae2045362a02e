//! End-to-end reconciliation passes against the in-memory catalog.

use std::sync::Arc;

use stage_reconciler::config::{
    AwsCredentials, CsvFormat, DirectoryConfig, FileFormatConfig, KmsKey, ReplaceStrategy,
    S3Encryption, S3Storage, StageDesiredState, StageStorage, TriBool,
};
use stage_reconciler::error::{ReconcileError, RemoteError, StageError};
use stage_reconciler::normalize::Normalizer;
use stage_reconciler::planner::{DiffEngine, PlanAction, ReplacementDecision};
use stage_reconciler::reconciler::{
    reconcile_batch, BatchItem, DriftStatus, ReconcileOptions, Reconciler,
};
use stage_reconciler::remote::{CallKind, InMemoryObjectStore, RemoteObjectStore, StageIdentity};

fn s3_with_integration() -> StageDesiredState {
    StageDesiredState::with_storage(
        "analytics",
        "raw",
        "landing",
        StageStorage::S3(S3Storage {
            url: String::from("s3://acme-landing/events/"),
            storage_integration: Some(String::from("s3_int")),
            ..S3Storage::default()
        }),
    )
}

fn s3_with_credentials() -> StageDesiredState {
    s3_with_integration().with_storage_replaced(StageStorage::S3(S3Storage {
        url: String::from("s3://acme-landing/events/"),
        credentials: Some(AwsCredentials {
            aws_key_id: Some(String::from("AKIAEXAMPLE")),
            aws_secret_key: Some(String::from("wJalrXUtnFEMI")),
            ..AwsCredentials::default()
        }),
        ..S3Storage::default()
    }))
}

fn fully_specified() -> StageDesiredState {
    let mut stage = s3_with_integration()
        .with_directory(Some(DirectoryConfig {
            enable: true,
            auto_refresh: TriBool::False,
            refresh_on_create: TriBool::Default,
        }))
        .with_file_format(Some(FileFormatConfig::inline(CsvFormat {
            skip_header: Some(1),
            field_delimiter: Some(String::from("|")),
            null_if: Some(vec![String::from("NULL"), String::new()]),
            ..CsvFormat::default()
        })))
        .with_comment(Some("raw event drops"));
    if let StageStorage::S3(s3) = &mut stage.storage {
        s3.encryption = Some(S3Encryption {
            aws_sse_kms: Some(KmsKey {
                kms_key_id: Some(String::from("alias/landing")),
            }),
            ..S3Encryption::default()
        });
    }
    stage
}

#[tokio::test]
async fn test_second_pass_is_noop_without_mutations() {
    let store = InMemoryObjectStore::new();
    let reconciler = Reconciler::new(&store);

    for desired in [fully_specified(), s3_with_credentials()] {
        let first = reconciler.reconcile(&desired, None).await.unwrap();
        assert_eq!(first.plan.action, PlanAction::Create);

        store.clear_calls();
        let second = reconciler
            .reconcile(&desired, Some(&first.identity))
            .await
            .unwrap();
        assert_eq!(second.plan.action, PlanAction::NoOp);
        assert_eq!(second.decision, ReplacementDecision::NoOp);
        assert_eq!(store.mutation_count(), 0);
        assert_eq!(second.identity, first.identity);

        let previous = first.identity.clone();
        reconciler.destroy(&previous).await.unwrap();
    }
}

#[tokio::test]
async fn test_update_keeps_identity() {
    let store = InMemoryObjectStore::new();
    let reconciler = Reconciler::new(&store);
    let created = reconciler
        .reconcile(&fully_specified(), None)
        .await
        .unwrap();

    let changed = fully_specified().with_comment(Some("curated event drops"));
    let updated = reconciler
        .reconcile(&changed, Some(&created.identity))
        .await
        .unwrap();

    assert_eq!(updated.decision, ReplacementDecision::Update);
    assert_eq!(updated.identity.object_id, created.identity.object_id);
    assert_eq!(store.call_count(CallKind::Drop), 0);
    assert_eq!(store.call_count(CallKind::Create), 1);
}

#[tokio::test]
async fn test_rename_is_applied_in_place() {
    let store = InMemoryObjectStore::new();
    let reconciler = Reconciler::new(&store);
    let created = reconciler
        .reconcile(&s3_with_integration(), None)
        .await
        .unwrap();

    let renamed = s3_with_integration().renamed("landing_v2");
    let outcome = reconciler
        .reconcile(&renamed, Some(&created.identity))
        .await
        .unwrap();

    assert_eq!(outcome.plan.action, PlanAction::Update);
    assert_eq!(outcome.identity.object_id, created.identity.object_id);
    assert!(outcome.identity.name.same_object(&renamed.qualified_name()));
    assert!(store.describe(&created.identity.name).await.is_err());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_switching_to_inline_credentials_replaces() {
    let store = InMemoryObjectStore::new();
    let reconciler = Reconciler::new(&store);
    let created = reconciler
        .reconcile(&s3_with_integration(), None)
        .await
        .unwrap();
    store.clear_calls();

    let replaced = reconciler
        .reconcile(&s3_with_credentials(), Some(&created.identity))
        .await
        .unwrap();

    assert_eq!(replaced.decision, ReplacementDecision::Replace);
    assert_eq!(store.call_count(CallKind::Drop), 1);
    assert_eq!(store.call_count(CallKind::Create), 1);
    assert_ne!(replaced.identity.object_id, created.identity.object_id);
    assert!(replaced.identity.secret_fingerprints.contains_key("credentials"));

    let mutations: Vec<CallKind> = store
        .calls()
        .into_iter()
        .map(|c| c.kind)
        .filter(|k| *k != CallKind::Describe)
        .collect();
    assert_eq!(mutations, vec![CallKind::Drop, CallKind::Create]);
}

#[tokio::test]
async fn test_create_then_drop_when_names_differ() {
    let store = InMemoryObjectStore::new();
    let options = ReconcileOptions::default().with_replace_strategy(ReplaceStrategy::CreateThenDrop);
    let reconciler = Reconciler::with_options(&store, options);
    let created = reconciler
        .reconcile(&s3_with_integration(), None)
        .await
        .unwrap();
    store.clear_calls();

    let mut moved = s3_with_integration().renamed("landing_eu");
    if let StageStorage::S3(s3) = &mut moved.storage {
        s3.url = String::from("s3://acme-landing-eu/events/");
    }
    let outcome = reconciler
        .reconcile(&moved, Some(&created.identity))
        .await
        .unwrap();

    assert_eq!(outcome.plan.action, PlanAction::Replace);
    let mutations: Vec<CallKind> = store
        .calls()
        .into_iter()
        .map(|c| c.kind)
        .filter(|k| *k != CallKind::Describe)
        .collect();
    assert_eq!(mutations, vec![CallKind::Create, CallKind::Drop]);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_observed_after_create_matches_desired() {
    let store = InMemoryObjectStore::new();
    let desired = fully_specified();
    let outcome = Reconciler::new(&store)
        .reconcile(&desired, None)
        .await
        .unwrap();

    let raw = store.describe(&outcome.identity.name).await.unwrap();
    let observed = Normalizer::observed(&raw)
        .unwrap()
        .with_fingerprints(&outcome.identity.secret_fingerprints);
    let remaining: Vec<_> = DiffEngine::new()
        .diff(desired.kind(), &Normalizer::desired(&desired), &observed.view)
        .into_iter()
        .filter(|c| c.is_actionable())
        .collect();
    assert!(remaining.is_empty(), "unexpected changes: {remaining:?}");
}

#[tokio::test]
async fn test_integration_with_credentials_fails_before_any_call() {
    let store = InMemoryObjectStore::new();
    let mut desired = s3_with_integration();
    if let StageStorage::S3(s3) = &mut desired.storage {
        s3.credentials = Some(AwsCredentials {
            aws_key_id: Some(String::from("AKIAEXAMPLE")),
            aws_secret_key: Some(String::from("wJalrXUtnFEMI")),
            ..AwsCredentials::default()
        });
    }

    let err = Reconciler::new(&store)
        .reconcile(&desired, None)
        .await
        .unwrap_err();

    let StageError::Validation(errors) = err else {
        panic!("expected validation error, got {err:?}");
    };
    assert_eq!(errors.len(), 2);
    assert!(errors.has_field("storage.storage_integration"));
    assert!(errors.has_field("storage.credentials"));
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_enabling_directory_is_a_single_alter() {
    let store = InMemoryObjectStore::new();
    let reconciler = Reconciler::new(&store);
    let disabled = s3_with_integration().with_directory(Some(DirectoryConfig::enabled(false)));
    let created = reconciler.reconcile(&disabled, None).await.unwrap();
    assert!(!created.observed.directory_enabled());
    store.clear_calls();

    let enabled = s3_with_integration().with_directory(Some(DirectoryConfig {
        enable: true,
        auto_refresh: TriBool::False,
        refresh_on_create: TriBool::Default,
    }));
    let outcome = reconciler
        .reconcile(&enabled, Some(&created.identity))
        .await
        .unwrap();

    assert_eq!(outcome.decision, ReplacementDecision::Update);
    assert_eq!(store.call_count(CallKind::Alter), 1);
    assert_eq!(store.mutation_count(), 1);
    assert!(outcome.observed.directory_enabled());
    assert_eq!(outcome.identity.object_id, created.identity.object_id);
}

#[tokio::test]
async fn test_out_of_band_delete_is_reported_as_drift() {
    let store = InMemoryObjectStore::new();
    let reconciler = Reconciler::new(&store);
    let created = reconciler
        .reconcile(&s3_with_integration(), None)
        .await
        .unwrap();
    assert!(store.delete_out_of_band(&created.identity.name).is_some());
    store.clear_calls();

    let err = reconciler
        .reconcile(&s3_with_integration(), Some(&created.identity))
        .await
        .unwrap_err();
    assert!(err.is_drift());
    assert_eq!(store.mutation_count(), 0);

    let drift = reconciler
        .check_drift(&s3_with_integration(), Some(&created.identity))
        .await
        .unwrap();
    assert_eq!(drift.status, DriftStatus::Missing);

    let recreating = Reconciler::with_options(
        &store,
        ReconcileOptions::default().with_recreate_missing(true),
    );
    let outcome = recreating
        .reconcile(&s3_with_integration(), Some(&created.identity))
        .await
        .unwrap();
    assert_eq!(outcome.plan.action, PlanAction::Create);
    assert_ne!(outcome.identity.object_id, created.identity.object_id);
}

#[tokio::test]
async fn test_out_of_band_change_is_drift() {
    let store = InMemoryObjectStore::new();
    let reconciler = Reconciler::new(&store);
    let created = reconciler
        .reconcile(&fully_specified(), None)
        .await
        .unwrap();

    assert!(store.mutate_out_of_band(&created.identity.name, |stage| {
        stage.comment = Some(String::from("edited in the console"));
    }));

    let drift = reconciler
        .check_drift(&fully_specified(), Some(&created.identity))
        .await
        .unwrap();
    assert_eq!(drift.status, DriftStatus::Drifted);
    assert_eq!(drift.changes.len(), 1);
    assert_eq!(drift.changes[0].path.as_str(), "comment");
    assert_eq!(store.mutation_count(), 1);
}

#[tokio::test]
async fn test_batch_keeps_input_order() {
    let store = Arc::new(InMemoryObjectStore::new());
    let items: Vec<BatchItem> = ["orders", "customers", "payments"]
        .into_iter()
        .map(|name| {
            let desired = StageDesiredState::internal("analytics", "raw", name);
            BatchItem {
                logical_id: desired.logical_id(),
                desired,
                previous: None,
            }
        })
        .collect();

    let shared: Arc<dyn RemoteObjectStore> = store.clone();
    let results = reconcile_batch(shared, items, ReconcileOptions::default(), 2).await;

    let ids: Vec<&str> = results.iter().map(|r| r.logical_id.as_str()).collect();
    assert_eq!(ids, ["analytics.raw.orders", "analytics.raw.customers", "analytics.raw.payments"]);
    assert!(results.iter().all(|r| r.result.is_ok()));
    assert_eq!(store.len(), 3);
}

fn unavailable() -> RemoteError {
    RemoteError::Unavailable {
        message: String::from("connection reset"),
    }
}

/// Splits a partially applied error into the identity it left and the drops it still owed.
fn partial(err: StageError) -> (Option<StageIdentity>, Vec<StageIdentity>) {
    match err {
        StageError::Reconcile(ReconcileError::PartiallyApplied {
            identity,
            pending_drops,
            ..
        }) => (identity, pending_drops),
        other => panic!("expected a partially applied plan, got {other:?}"),
    }
}

fn mutations(store: &InMemoryObjectStore) -> Vec<CallKind> {
    store
        .calls()
        .into_iter()
        .map(|c| c.kind)
        .filter(|k| *k != CallKind::Describe)
        .collect()
}

#[tokio::test]
async fn test_null_if_lists_converge() {
    let cases = [
        vec![String::new()],
        vec![String::from("a,b")],
        vec![String::from("it's"), String::from("\\N")],
    ];
    for null_if in cases {
        let store = InMemoryObjectStore::new();
        let reconciler = Reconciler::new(&store);
        let desired = s3_with_integration().with_file_format(Some(FileFormatConfig::inline(
            CsvFormat {
                null_if: Some(null_if.clone()),
                ..CsvFormat::default()
            },
        )));

        let created = reconciler.reconcile(&desired, None).await.unwrap();
        store.clear_calls();
        let second = reconciler
            .reconcile(&desired, Some(&created.identity))
            .await
            .unwrap();
        assert_eq!(second.plan.action, PlanAction::NoOp, "null_if {null_if:?}");
        assert_eq!(store.mutation_count(), 0);
    }
}

#[tokio::test]
async fn test_failed_drop_after_create_is_picked_up_next_pass() {
    let store = InMemoryObjectStore::new();
    let options = ReconcileOptions::default().with_replace_strategy(ReplaceStrategy::CreateThenDrop);
    let reconciler = Reconciler::with_options(&store, options);
    let created = reconciler
        .reconcile(&s3_with_integration(), None)
        .await
        .unwrap();

    let mut moved = s3_with_integration().renamed("landing_eu");
    if let StageStorage::S3(s3) = &mut moved.storage {
        s3.url = String::from("s3://acme-landing-eu/events/");
    }
    store.fail_next(CallKind::Drop, unavailable());
    let err = reconciler
        .reconcile(&moved, Some(&created.identity))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let (identity, pending_drops) = partial(err);
    let replacement = identity.unwrap();
    assert_ne!(replacement.object_id, created.identity.object_id);
    assert!(replacement.name.same_object(&moved.qualified_name()));
    assert_eq!(pending_drops.len(), 1);
    assert_eq!(pending_drops[0].object_id, created.identity.object_id);
    assert_eq!(store.len(), 2);

    store.clear_calls();
    let next = reconciler
        .reconcile(&moved, Some(&replacement))
        .await
        .unwrap();
    assert_eq!(next.plan.action, PlanAction::NoOp);
    assert_eq!(next.identity.object_id, replacement.object_id);
    assert_eq!(store.mutation_count(), 0);

    assert!(reconciler.destroy(&pending_drops[0]).await.unwrap());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_failed_create_after_drop_is_recreated_next_pass() {
    let store = InMemoryObjectStore::new();
    let reconciler = Reconciler::new(&store);
    let created = reconciler
        .reconcile(&s3_with_integration(), None)
        .await
        .unwrap();

    let mut moved = s3_with_integration();
    if let StageStorage::S3(s3) = &mut moved.storage {
        s3.url = String::from("s3://acme-landing-eu/events/");
    }
    store.fail_next(CallKind::Create, unavailable());
    let err = reconciler
        .reconcile(&moved, Some(&created.identity))
        .await
        .unwrap_err();
    assert!(!err.is_drift());

    let (identity, pending_drops) = partial(err);
    assert!(identity.is_none());
    assert!(pending_drops.is_empty());
    assert!(store.is_empty());

    store.clear_calls();
    let next = reconciler.reconcile(&moved, None).await.unwrap();
    assert_eq!(next.plan.action, PlanAction::Create);
    assert_eq!(mutations(&store), vec![CallKind::Create]);
}

#[tokio::test]
async fn test_failed_alter_after_rename_keeps_new_name() {
    let store = InMemoryObjectStore::new();
    let reconciler = Reconciler::new(&store);
    let created = reconciler
        .reconcile(&s3_with_integration(), None)
        .await
        .unwrap();

    let desired = s3_with_integration()
        .renamed("landing_v2")
        .with_comment(Some("renamed drops"));
    store.fail_after(
        CallKind::Alter,
        1,
        RemoteError::rejected("alter", "comment too long"),
    );
    let err = reconciler
        .reconcile(&desired, Some(&created.identity))
        .await
        .unwrap_err();

    let (identity, pending_drops) = partial(err);
    let renamed = identity.unwrap();
    assert_eq!(renamed.object_id, created.identity.object_id);
    assert!(renamed.name.same_object(&desired.qualified_name()));
    assert!(pending_drops.is_empty());

    store.clear_calls();
    let next = reconciler
        .reconcile(&desired, Some(&renamed))
        .await
        .unwrap();
    assert_eq!(next.plan.action, PlanAction::Update);
    assert_eq!(next.plan.alter_count(), 1);
    let alters: Vec<Vec<String>> = store
        .calls()
        .into_iter()
        .filter(|c| c.kind == CallKind::Alter)
        .map(|c| c.paths)
        .collect();
    assert_eq!(alters, vec![vec![String::from("comment")]]);
}

#[tokio::test]
async fn test_removing_disabled_directory_block_replaces() {
    let store = InMemoryObjectStore::new();
    let reconciler = Reconciler::new(&store);
    let with_block = s3_with_integration().with_directory(Some(DirectoryConfig::enabled(false)));
    let created = reconciler.reconcile(&with_block, None).await.unwrap();
    assert!(!created.observed.has_directory_empty());
    assert!(!created.observed.directory_enabled());
    store.clear_calls();

    let outcome = reconciler
        .reconcile(&s3_with_integration(), Some(&created.identity))
        .await
        .unwrap();

    assert_eq!(outcome.decision, ReplacementDecision::Replace);
    assert_eq!(mutations(&store), vec![CallKind::Drop, CallKind::Create]);
    assert!(outcome.observed.has_directory_empty());
    assert_ne!(outcome.identity.object_id, created.identity.object_id);
}
