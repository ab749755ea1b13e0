//! Object identity and the per-key slots a reconciliation pass works on.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::{DynamicObject, ObjectMeta, TypeMeta};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::kind::GroupVersionKind;

/// Identity of one cluster resource.
///
/// Field order defines the total order used for every walk over keyed maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(gvk: &GroupVersionKind, namespace: &str, name: &str) -> Self {
        Self {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Key of a body that already carries its type meta.
    pub fn from_object(obj: &DynamicObject) -> Result<Self> {
        let types = obj.types.as_ref().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "object '{}' has no apiVersion/kind",
                obj.metadata.name.clone().unwrap_or_default()
            ))
        })?;
        let gvk = GroupVersionKind::from_api_version(&types.api_version, &types.kind);
        Ok(Self::new(
            &gvk,
            obj.metadata.namespace.as_deref().unwrap_or_default(),
            obj.metadata.name.as_deref().unwrap_or_default(),
        ))
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind {
            group: self.group.clone(),
            version: self.version.clone(),
            kind: self.kind.clone(),
        }
    }

    pub fn api_version(&self) -> String {
        self.gvk().api_version()
    }

    pub fn namespace(&self) -> Option<&str> {
        if self.namespace.is_empty() {
            None
        } else {
            Some(&self.namespace)
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.gvk(), self.name)
        } else {
            write!(f, "{}/{}/{}", self.gvk(), self.namespace, self.name)
        }
    }
}

/// The three slots tracked per key during one attempt.
#[derive(Debug, Clone, Default)]
pub struct Object {
    /// Live copy, `None` when not created yet.
    pub current: Option<DynamicObject>,
    /// Desired copy, `None` when marked for deletion.
    pub new: Option<DynamicObject>,
    /// What the server reported `new` becomes, filled by commit.
    pub materialized: Option<DynamicObject>,
}

/// An empty body of the given kind.
pub fn new_object(gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: gvk.api_version(),
            kind: gvk.kind.clone(),
        }),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: namespace.map(str::to_string),
            ..Default::default()
        },
        data: serde_json::json!({}),
    }
}

/// Stamp the key's type meta on a body and drop server bookkeeping the engine
/// never compares or sends.
pub fn normalize(key: &ObjectKey, mut obj: DynamicObject) -> DynamicObject {
    obj.metadata.managed_fields = None;
    obj.types = Some(TypeMeta {
        api_version: key.api_version(),
        kind: key.kind.clone(),
    });
    obj
}

pub fn label<'a>(obj: &'a DynamicObject, key: &str) -> Option<&'a str> {
    obj.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .map(String::as_str)
}

pub fn set_label(obj: &mut DynamicObject, key: &str, value: &str) {
    obj.metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
}

/// Whether `obj` carries the ownership label naming `owner`.
pub fn is_owned_by(obj: &DynamicObject, owned_label: &str, owner: &str) -> bool {
    label(obj, owned_label) == Some(owner)
}

/// Make `owner` the controlling owner of `obj`, replacing any other
/// controller reference.
pub fn set_controller_reference(obj: &mut DynamicObject, owner: OwnerReference) {
    let refs = obj.metadata.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.controller != Some(true) && r.uid != owner.uid);
    refs.push(owner);
}

pub fn resource_version(obj: &DynamicObject) -> Option<&str> {
    obj.metadata.resource_version.as_deref()
}

/// Convert a typed resource into the untyped body the engine stores.
pub fn to_dynamic<T: Serialize>(value: &T) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(value)?)?)
}

/// Convert a stored body back into a typed resource.
pub fn from_dynamic<T: DeserializeOwned>(obj: &DynamicObject) -> Result<T> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}
