mod support;

use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
use serde_json::json;
use tern_core::Error;
use tern_core::api::CapsuleSpec;
use tern_core::kind::{GroupVersionKind, gvk};
use tern_core::object::new_object;
use tern_core::pipeline::CapsulePipeline;
use tern_core::request::{CapsuleStrategy, Request, RequestOptions};
use tern_core::steps::ServiceAccountStep;

use support::*;

const OWNER_LABEL: &str = "tern.dev/owned-by-capsule";

async fn request_for(name: &str, reconcile_first: bool) -> Request<CapsuleStrategy> {
    let cluster = memory_cluster();
    insert_capsule(&cluster, name, CapsuleSpec::default());
    if reconcile_first {
        CapsulePipeline::new(config(), kinds())
            .with_step(ServiceAccountStep::new())
            .run_capsule(
                client(&cluster),
                fetch_capsule(&cluster, name),
                RequestOptions::default(),
            )
            .await
            .unwrap();
    }
    let strategy = CapsuleStrategy::new(fetch_capsule(&cluster, name), OWNER_LABEL);
    let mut req = Request::new(client(&cluster), kinds(), strategy, &RequestOptions::default());
    req.load_existing_objects().await.unwrap();
    req.prepare();
    req
}

#[tokio::test]
async fn set_defaults_name_and_forces_namespace() {
    let mut req = request_for("api", false).await;

    let mut cm = new_object(&gvk::config_map(), Some("elsewhere"), "");
    cm.data = json!({"data": {"A": "1"}});
    req.set(cm).unwrap();

    let stored = req.get_new(&gvk::config_map(), "").unwrap();
    assert_eq!(stored.metadata.name.as_deref(), Some("api"));
    assert_eq!(stored.metadata.namespace.as_deref(), Some(NAMESPACE));
    assert_eq!(stored.types.unwrap().kind, "ConfigMap");

    let typed: ConfigMap = req.get_new_as("api").unwrap();
    assert_eq!(typed.data.unwrap()["A"], "1");
}

#[tokio::test]
async fn new_object_has_no_existing_version() {
    let mut req = request_for("api", false).await;
    req.set(service_account("api")).unwrap();

    let err = req.get_existing(&gvk::service_account(), "api").unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("no existing version"), "{err}");

    let err = req.get_new(&gvk::config_map(), "missing").unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn existing_objects_are_loaded_from_status() {
    let mut req = request_for("api", true).await;

    let live: ServiceAccount = req.get_existing_as("api").unwrap();
    assert_eq!(
        live.metadata.labels.unwrap().get(OWNER_LABEL).map(String::as_str),
        Some("api")
    );
    assert_eq!(req.list_existing(&gvk::service_account()).unwrap().len(), 1);
    assert!(req.list_new(&gvk::service_account()).unwrap().is_empty());

    req.delete(&gvk::service_account(), "api").unwrap();
    assert!(req.get_new(&gvk::service_account(), "api").is_err());
    assert!(req.get_existing(&gvk::service_account(), "api").is_ok());
}

#[tokio::test]
async fn later_set_replaces_earlier_one() {
    let mut req = request_for("api", false).await;
    req.set(config_map("b", json!({"V": "1"}))).unwrap();
    req.set(config_map("a", json!({"V": "1"}))).unwrap();
    req.set(config_map("b", json!({"V": "2"}))).unwrap();

    let all: Vec<ConfigMap> = req.list_new_as().unwrap();
    let names: Vec<&str> = all
        .iter()
        .map(|cm| cm.metadata.name.as_deref().unwrap_or_default())
        .collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(all[1].data.as_ref().unwrap()["V"], "2");
}

#[tokio::test]
async fn unregistered_kinds_need_a_version() {
    let mut req = request_for("api", false).await;

    let unversioned = GroupVersionKind::new("example.com", "", "Widget");
    let err = req.key(&unversioned, "w").unwrap_err();
    assert!(matches!(err, Error::UnknownKind { .. }), "{err}");
    assert!(req.list_new(&unversioned).is_err());

    let widget = GroupVersionKind::new("example.com", "v1", "Widget");
    req.set(new_object(&widget, None, "w")).unwrap();
    let stored = req.get_new(&widget, "w").unwrap();
    assert_eq!(stored.metadata.namespace.as_deref(), Some(NAMESPACE));
}

#[tokio::test]
async fn cluster_scoped_kinds_have_no_namespace() {
    let req = request_for("api", false).await;

    let key = req.key(&gvk::namespace(), "team").unwrap();
    assert_eq!(key.namespace, "");
    let key = req.key(&gvk::service_account(), "").unwrap();
    assert_eq!(key.namespace, NAMESPACE);
    assert_eq!(key.name, "api");
}
