mod support;

use serde_json::json;
use tern_core::api::CapsuleSpec;
use tern_core::cluster::Verb;
use tern_core::pipeline::CapsulePipeline;
use tern_core::request::RequestOptions;
use tern_core::steps::{DeploymentStep, ServiceAccountStep};

use support::*;

#[tokio::test]
async fn mutations_and_status_follow_key_order() {
    let cluster = memory_cluster();
    let capsule = insert_capsule(&cluster, "shop", CapsuleSpec::default());
    let pipeline = CapsulePipeline::new(config(), kinds())
        .with_step(DeploymentStep::new().without_service())
        .with_step(FnStep::new(
            "config",
            set_objects(vec![
                config_map("b", json!({"LEVEL": "debug"})),
                config_map("a", json!({"REGION": "eu"})),
            ]),
        ))
        .with_step(ServiceAccountStep::new());

    let result = pipeline
        .run_capsule(client(&cluster), capsule, RequestOptions::default())
        .await
        .unwrap();

    let expected = vec![
        ("ConfigMap".to_string(), "a".to_string()),
        ("ConfigMap".to_string(), "b".to_string()),
        ("ServiceAccount".to_string(), "shop".to_string()),
        ("Deployment".to_string(), "shop".to_string()),
    ];
    let output: Vec<(String, String)> = result
        .output_objects
        .iter()
        .map(|o| (o.key.kind.clone(), o.key.name.clone()))
        .collect();
    assert_eq!(output, expected);

    let created: Vec<(String, String)> = cluster
        .writes()
        .iter()
        .filter(|op| op.verb == Verb::Create)
        .map(|op| (op.key.kind.clone(), op.key.name.clone()))
        .collect();
    assert_eq!(created, expected);

    let recorded: Vec<(String, String)> = owned_states(&fetch_capsule(&cluster, "shop"))
        .into_iter()
        .map(|(kind, name, _)| (kind, name))
        .collect();
    assert_eq!(recorded, expected);
}

#[tokio::test]
async fn objects_land_in_the_capsule_namespace() {
    let cluster = memory_cluster();
    let capsule = insert_capsule(&cluster, "shop", CapsuleSpec::default());
    let mut elsewhere = config_map("settings", json!({}));
    elsewhere.metadata.namespace = Some("kube-system".to_string());
    let pipeline = CapsulePipeline::new(config(), kinds())
        .with_step(FnStep::new("config", set_objects(vec![elsewhere])));

    pipeline
        .run_capsule(client(&cluster), capsule, RequestOptions::default())
        .await
        .unwrap();

    let stored = cluster
        .object(&key(&tern_core::kind::gvk::config_map(), "settings"))
        .unwrap();
    assert_eq!(stored.metadata.namespace.as_deref(), Some(NAMESPACE));
}
