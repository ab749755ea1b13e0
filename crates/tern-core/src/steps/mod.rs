//! Built-in steps.

pub mod deployment;
pub mod namespace;
pub mod service_account;

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::api::{ANNOTATION_ROLLOUT, Capsule};
use crate::pipeline::Options;

pub use deployment::DeploymentStep;
pub use namespace::NamespaceStep;
pub use service_account::ServiceAccountStep;

/// Capsule annotations copied onto the pod template.
const DEFAULT_POD_ANNOTATIONS: &[&str] = &[ANNOTATION_ROLLOUT];

pub fn create_pod_annotations(capsule: &Capsule) -> BTreeMap<String, String> {
    let Some(annotations) = capsule.metadata.annotations.as_ref() else {
        return BTreeMap::new();
    };
    DEFAULT_POD_ANNOTATIONS
        .iter()
        .filter_map(|key| {
            annotations
                .get(*key)
                .map(|value| (key.to_string(), value.clone()))
        })
        .collect()
}

/// Checksum over the capsule's environment, so changing it rolls the pods.
///
/// Referenced ConfigMaps and Secrets contribute their data when they are
/// among the proposed objects. `None` when the capsule has no environment.
pub fn env_checksum(capsule: &Capsule, options: &Options) -> Option<String> {
    let spec = &capsule.spec;
    if spec.env.is_empty() && spec.env_from.is_empty() {
        return None;
    }

    let mut sources = Vec::new();
    for reference in &spec.env_from {
        let data = options
            .additional_object(&reference.kind, &reference.name)
            .and_then(|obj| obj.data.get("data").cloned())
            .unwrap_or(Value::Null);
        sources.push(serde_json::json!({
            "kind": reference.kind,
            "name": reference.name,
            "data": data,
        }));
    }
    let value = serde_json::json!({ "env": spec.env, "from": sources });
    Some(hash_json(&value))
}

pub fn hash_json(value: &Value) -> String {
    let normalized = normalize_json(value);
    let bytes = serde_json::to_vec(&normalized).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

fn normalize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, normalize_json(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_json).collect()),
        other => other.clone(),
    }
}
