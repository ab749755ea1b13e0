mod support;

use tern_core::api::{CapsuleScale, CapsuleSpec};
use tern_core::change::ResourceState;
use tern_core::kind::gvk;
use tern_core::pipeline::CapsulePipeline;
use tern_core::request::RequestOptions;
use tern_core::steps::DeploymentStep;

use support::*;

fn pipeline() -> CapsulePipeline {
    CapsulePipeline::new(config(), kinds()).with_step(DeploymentStep::new().without_service())
}

#[tokio::test]
async fn replica_change_waits_for_template_rollout() {
    let cluster = memory_cluster();
    let capsule = insert_capsule(
        &cluster,
        "batch",
        CapsuleSpec {
            image: "batch:1".to_string(),
            scale: CapsuleScale {
                min_instances: 2,
                max_instances: None,
            },
            ..Default::default()
        },
    );
    let pipeline = pipeline();
    pipeline
        .run_capsule(client(&cluster), capsule, RequestOptions::default())
        .await
        .unwrap();
    let deployment_key = key(&gvk::deployment(), "batch");
    let live = cluster.object(&deployment_key).unwrap();
    assert_eq!(live.data["spec"]["replicas"], 2);

    edit_capsule(&cluster, "batch", |spec| {
        spec.image = "batch:2".to_string();
        spec.scale.min_instances = 4;
    })
    .await;

    let result = pipeline
        .run_capsule(
            client(&cluster),
            fetch_capsule(&cluster, "batch"),
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(result.output_objects[0].state, ResourceState::Updated);
    let live = cluster.object(&deployment_key).unwrap();
    assert_eq!(
        live.data["spec"]["template"]["spec"]["containers"][0]["image"],
        "batch:2"
    );
    assert_eq!(live.data["spec"]["replicas"], 2);

    let result = pipeline
        .run_capsule(
            client(&cluster),
            fetch_capsule(&cluster, "batch"),
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(result.output_objects[0].state, ResourceState::Updated);
    let live = cluster.object(&deployment_key).unwrap();
    assert_eq!(live.data["spec"]["replicas"], 4);

    let result = pipeline
        .run_capsule(
            client(&cluster),
            fetch_capsule(&cluster, "batch"),
            RequestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(result.output_objects[0].state, ResourceState::Unchanged);
}

#[tokio::test]
async fn replica_only_change_applies_immediately() {
    let cluster = memory_cluster();
    let capsule = insert_capsule(
        &cluster,
        "batch",
        CapsuleSpec {
            image: "batch:1".to_string(),
            ..Default::default()
        },
    );
    let pipeline = pipeline();
    pipeline
        .run_capsule(client(&cluster), capsule, RequestOptions::default())
        .await
        .unwrap();

    edit_capsule(&cluster, "batch", |spec| spec.scale.min_instances = 3).await;
    pipeline
        .run_capsule(
            client(&cluster),
            fetch_capsule(&cluster, "batch"),
            RequestOptions::default(),
        )
        .await
        .unwrap();

    let live = cluster.object(&key(&gvk::deployment(), "batch")).unwrap();
    assert_eq!(live.data["spec"]["replicas"], 3);
}
