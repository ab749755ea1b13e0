mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tern_core::Error;
use tern_core::api::CapsuleSpec;
use tern_core::change::ResourceState;
use tern_core::cluster::{DryRun, Fault, MemoryCluster, Verb};
use tern_core::config::EngineConfig;
use tern_core::kind::gvk;
use tern_core::pipeline::CapsulePipeline;
use tern_core::request::RequestOptions;
use tern_core::steps::ServiceAccountStep;

use support::*;

fn pipeline_with(config: EngineConfig) -> CapsulePipeline {
    CapsulePipeline::new(Arc::new(config), kinds()).with_step(ServiceAccountStep::new())
}

fn pipeline() -> CapsulePipeline {
    pipeline_with(EngineConfig::default())
}

/// A cluster holding capsule "api" that already owns its service account.
async fn reconciled_cluster() -> Arc<MemoryCluster> {
    let cluster = memory_cluster();
    let capsule = insert_capsule(&cluster, "api", CapsuleSpec::default());
    pipeline()
        .run_capsule(client(&cluster), capsule, RequestOptions::default())
        .await
        .unwrap();
    cluster.clear_operations();
    cluster
}

#[tokio::test]
async fn stale_owned_object_is_reloaded_and_retried() {
    let cluster = reconciled_cluster().await;
    let sa_key = key(&gvk::service_account(), "api");
    cluster.fail_next(Verb::Update, DryRun::All, &sa_key, Fault::Conflict);

    let result = pipeline()
        .run_capsule(
            client(&cluster),
            fetch_capsule(&cluster, "api"),
            RequestOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.output_objects.len(), 1);
    assert_eq!(result.output_objects[0].state, ResourceState::Unchanged);
    let dry_updates = cluster
        .operations()
        .iter()
        .filter(|op| op.verb == Verb::Update && op.dry_run)
        .count();
    assert_eq!(dry_updates, 2);
    assert!(cluster.writes().is_empty());
}

#[tokio::test]
async fn object_taken_over_by_someone_else_fails_precondition() {
    let inner = reconciled_cluster().await;
    let sa_key = key(&gvk::service_account(), "api");
    let raced = AtomicBool::new(false);
    let hooked_key = sa_key.clone();
    let cluster = HookedCluster::new(inner.clone(), move |cluster, verb, key, dry_run| {
        if verb == Verb::Update && dry_run && *key == hooked_key && !raced.swap(true, Ordering::SeqCst) {
            cluster.insert(service_account("api"))?;
        }
        Ok(())
    });

    let err = pipeline()
        .run_capsule(
            cluster,
            fetch_capsule(&inner, "api"),
            RequestOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(err.is_failed_precondition(), "{err}");
    let capsule = fetch_capsule(&inner, "api");
    let status = capsule.status.unwrap();
    assert_eq!(status.errors, vec![err.to_string()]);
    assert_eq!(status.owned_resources.len(), 1, "owned resources are kept");
    assert!(
        inner
            .writes()
            .iter()
            .all(|op| op.verb == Verb::UpdateStatus)
    );
}

#[tokio::test]
async fn endless_conflicts_give_up_after_max_passes() {
    let inner = reconciled_cluster().await;
    let sa_key = key(&gvk::service_account(), "api");
    let hooked_key = sa_key.clone();
    let cluster = HookedCluster::new(inner.clone(), move |cluster, verb, key, dry_run| {
        if verb == Verb::Update && dry_run && *key == hooked_key
            && let Some(live) = cluster.object(key)
        {
            cluster.insert(live)?;
        }
        Ok(())
    });

    let config = EngineConfig {
        max_passes: 3,
        ..Default::default()
    };
    let err = pipeline_with(config)
        .run_capsule(
            cluster,
            fetch_capsule(&inner, "api"),
            RequestOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::RetriesExhausted { passes: 3, .. }),
        "{err}"
    );
    let status = fetch_capsule(&inner, "api").status.unwrap();
    assert_eq!(status.errors.len(), 1);
}

#[tokio::test]
async fn create_conflict_fails_precondition() {
    let cluster = memory_cluster();
    let capsule = insert_capsule(&cluster, "api", CapsuleSpec::default());
    let sa_key = key(&gvk::service_account(), "api");
    cluster.fail_next(Verb::Create, DryRun::All, &sa_key, Fault::Conflict);

    let err = pipeline()
        .run_capsule(client(&cluster), capsule, RequestOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_failed_precondition(), "{err}");
    assert!(cluster.object(&sa_key).is_none());
}

#[tokio::test]
async fn invalid_object_is_reported_not_skipped() {
    let cluster = memory_cluster();
    let capsule = insert_capsule(&cluster, "api", CapsuleSpec::default());
    let sa_key = key(&gvk::service_account(), "api");
    cluster.fail_next(Verb::Create, DryRun::All, &sa_key, Fault::InvalidArgument);

    let err = pipeline()
        .run_capsule(client(&cluster), capsule, RequestOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_invalid_argument(), "{err}");
    let status = fetch_capsule(&cluster, "api").status.unwrap();
    assert_eq!(status.errors, vec![err.to_string()]);
    assert_eq!(status.observed_generation, 0);
}
