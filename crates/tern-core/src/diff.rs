//! Field-level differences between two bodies of the same object.

use kube::core::DynamicObject;
use serde::Serialize;
use serde_json::Value;

/// One changed leaf, addressed by a dotted path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
}

/// Metadata the server owns; never part of a preview.
const SERVER_FIELDS: &[&str] = &[
    "managedFields",
    "creationTimestamp",
    "generation",
    "resourceVersion",
    "uid",
    "ownerReferences",
];

/// Changed paths from `from` to `to`, sorted by path. A missing side is an
/// empty object, so creates and deletes list every field.
pub fn compute_diff(from: Option<&DynamicObject>, to: Option<&DynamicObject>) -> Vec<FieldChange> {
    let from = from.map(comparable).unwrap_or(Value::Null);
    let to = to.map(comparable).unwrap_or(Value::Null);
    let mut changes = Vec::new();
    walk("", Some(&from), Some(&to), &mut changes);
    changes.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}

fn comparable(obj: &DynamicObject) -> Value {
    let mut value = serde_json::to_value(obj).unwrap_or(Value::Null);
    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in SERVER_FIELDS {
            metadata.remove(*field);
        }
    }
    if let Some(root) = value.as_object_mut() {
        root.remove("status");
    }
    value
}

fn walk(path: &str, before: Option<&Value>, after: Option<&Value>, out: &mut Vec<FieldChange>) {
    match (before, after) {
        (Some(Value::Object(a)), Some(Value::Object(b))) => {
            let keys: std::collections::BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            for key in keys {
                walk(&join(path, key), a.get(key), b.get(key), out);
            }
        }
        (Some(Value::Null), Some(Value::Object(b))) | (None, Some(Value::Object(b))) => {
            for (key, value) in b {
                walk(&join(path, key), None, Some(value), out);
            }
        }
        (Some(Value::Object(a)), Some(Value::Null)) | (Some(Value::Object(a)), None) => {
            for (key, value) in a {
                walk(&join(path, key), Some(value), None, out);
            }
        }
        (a, b) if a == b => {}
        (a, b) => out.push(FieldChange {
            path: path.to_string(),
            before: a.cloned(),
            after: b.cloned(),
        }),
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::gvk;
    use crate::object::new_object;
    use serde_json::json;

    #[test]
    fn reports_changed_leaves_sorted() {
        let mut a = new_object(&gvk::deployment(), Some("ns"), "web");
        a.metadata.resource_version = Some("1".to_string());
        a.data = json!({"spec": {"replicas": 1, "template": {"image": "a"}}});
        let mut b = a.clone();
        b.metadata.resource_version = Some("2".to_string());
        b.data = json!({"spec": {"replicas": 3, "template": {"image": "a"}, "paused": true}});

        let diff = compute_diff(Some(&a), Some(&b));
        let paths: Vec<&str> = diff.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["spec.paused", "spec.replicas"]);
        assert_eq!(diff[1].before, Some(json!(1)));
        assert_eq!(diff[1].after, Some(json!(3)));
    }

    #[test]
    fn create_lists_every_field() {
        let mut b = new_object(&gvk::service_account(), Some("ns"), "sa");
        b.data = json!({"automountServiceAccountToken": false});
        let diff = compute_diff(None, Some(&b));
        assert!(diff.iter().any(|c| c.path == "metadata.name"));
        assert!(diff.iter().all(|c| c.before.is_none()));
    }

    #[test]
    fn identical_bodies_have_no_diff() {
        let a = new_object(&gvk::config_map(), Some("ns"), "cfg");
        assert!(compute_diff(Some(&a), Some(&a)).is_empty());
    }
}
