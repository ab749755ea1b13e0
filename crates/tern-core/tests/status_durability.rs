mod support;

use std::sync::atomic::{AtomicBool, Ordering};

use tern_core::Error;
use tern_core::api::{CapsuleSpec, EnvReference};
use tern_core::change::ResourceState;
use tern_core::cluster::{DryRun, Fault, Verb};
use tern_core::kind::gvk;
use tern_core::pipeline::CapsulePipeline;
use tern_core::request::RequestOptions;
use tern_core::steps::{DeploymentStep, ServiceAccountStep};

use support::*;

fn spec() -> CapsuleSpec {
    CapsuleSpec {
        image: "registry.example.com/worker:2".to_string(),
        ..Default::default()
    }
}

fn pipeline() -> CapsulePipeline {
    CapsulePipeline::new(config(), kinds())
        .with_step(DeploymentStep::new())
        .with_step(ServiceAccountStep::new())
}

#[tokio::test]
async fn failed_apply_is_recorded_and_retried_next_run() {
    let cluster = memory_cluster();
    let capsule = insert_capsule(&cluster, "worker", spec());
    let deployment_key = key(&gvk::deployment(), "worker");
    cluster.fail_next(Verb::Create, DryRun::No, &deployment_key, Fault::Transport);

    let err = pipeline()
        .run_capsule(client(&cluster), capsule, RequestOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Apply { .. }), "{err}");
    let changes = err.changes().unwrap();
    let deployment = &changes[&deployment_key];
    assert!(!deployment.applied);
    assert!(deployment.error.as_deref().unwrap().contains("could not create"));
    let sa = &changes[&key(&gvk::service_account(), "worker")];
    assert!(sa.applied);
    assert!(cluster.object(&deployment_key).is_none());

    let capsule = fetch_capsule(&cluster, "worker");
    let status = capsule.status.as_ref().unwrap();
    assert_eq!(status.errors.len(), 1);
    let pending = status
        .owned_resources
        .iter()
        .find(|r| r.r#ref.as_ref().is_some_and(|r| r.kind == "Deployment"))
        .unwrap();
    assert_eq!(pending.state, "changePending");
    assert!(pending.message.is_some());

    let result = pipeline()
        .run_capsule(client(&cluster), capsule, RequestOptions::default())
        .await
        .unwrap();
    let states: Vec<ResourceState> = result.output_objects.iter().map(|o| o.state).collect();
    assert_eq!(states, vec![ResourceState::Unchanged, ResourceState::Created]);
    assert!(cluster.object(&deployment_key).is_some());
    let capsule = fetch_capsule(&cluster, "worker");
    assert!(capsule.status.as_ref().unwrap().errors.is_empty());

    // With the error cleared the next run takes the fast path.
    cluster.clear_operations();
    pipeline()
        .run_capsule(client(&cluster), capsule, RequestOptions::default())
        .await
        .unwrap();
    assert!(cluster.writes().is_empty());
}

#[tokio::test]
async fn status_write_drops_entries_from_the_previous_one() {
    let cluster = memory_cluster();
    let capsule = insert_capsule(
        &cluster,
        "worker",
        CapsuleSpec {
            env_from: vec![EnvReference {
                kind: "ConfigMap".to_string(),
                name: "worker-env".to_string(),
            }],
            ..spec()
        },
    );
    pipeline()
        .run_capsule(client(&cluster), capsule, RequestOptions::default())
        .await
        .unwrap();
    let status = fetch_capsule(&cluster, "worker").status.unwrap();
    assert_eq!(status.used_resources.len(), 1);
    assert_eq!(status.owned_resources.len(), 2);

    edit_capsule(&cluster, "worker", |spec| spec.env_from.clear()).await;
    pipeline()
        .run_capsule(
            client(&cluster),
            fetch_capsule(&cluster, "worker"),
            RequestOptions::default(),
        )
        .await
        .unwrap();

    let stored = cluster.object(&capsule_key("worker")).unwrap();
    assert_eq!(stored.data["status"]["usedResources"], serde_json::json!([]));
    assert_eq!(stored.data["status"]["errors"], serde_json::json!([]));
    let status = fetch_capsule(&cluster, "worker").status.unwrap();
    assert!(status.used_resources.is_empty());
    assert_eq!(status.owned_resources.len(), 2);
}

#[tokio::test]
async fn interrupted_commit_leaves_pending_status_behind() {
    let inner = memory_cluster();
    let capsule = insert_capsule(&inner, "worker", spec());
    let crashed = AtomicBool::new(false);
    let cluster = HookedCluster::new(inner.clone(), move |_, verb, key, _| {
        if crashed.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!("connection lost before {key}")));
        }
        if verb == Verb::UpdateStatus {
            crashed.store(true, Ordering::SeqCst);
        }
        Ok(())
    });

    let result = pipeline()
        .run_capsule(cluster, capsule, RequestOptions::default())
        .await;
    assert!(result.is_err());
    assert!(inner.object(&key(&gvk::service_account(), "worker")).is_none());

    let capsule = fetch_capsule(&inner, "worker");
    let status = capsule.status.as_ref().unwrap();
    assert_eq!(status.observed_generation, 0);
    assert_eq!(
        owned_states(&capsule),
        vec![
            ("ServiceAccount".to_string(), "worker".to_string(), "changePending".to_string()),
            ("Deployment".to_string(), "worker".to_string(), "changePending".to_string()),
        ]
    );

    let result = pipeline()
        .run_capsule(client(&inner), capsule, RequestOptions::default())
        .await
        .unwrap();
    assert!(
        result
            .output_objects
            .iter()
            .all(|o| o.state == ResourceState::Created)
    );
    let status = fetch_capsule(&inner, "worker").status.unwrap();
    assert_eq!(status.observed_generation, 1);
}

#[tokio::test]
async fn status_is_written_before_any_mutation() {
    let cluster = memory_cluster();
    let capsule = insert_capsule(&cluster, "worker", spec());

    pipeline()
        .run_capsule(client(&cluster), capsule, RequestOptions::default())
        .await
        .unwrap();

    let writes = cluster.writes();
    assert_eq!(writes.first().map(|op| op.verb), Some(Verb::UpdateStatus));
    assert_eq!(writes.last().map(|op| op.verb), Some(Verb::UpdateStatus));
}
