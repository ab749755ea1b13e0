//! Owning resource types: Capsules and project environments.
//!
//! Their status is the engine's only durable store. `ownedResources` lists
//! every key touched by the last commit and is read back as the existing
//! object set on the next attempt.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::core::{DynamicObject, ObjectMeta, TypeMeta};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::kind::{GroupVersionKind, gvk};
use crate::object::to_dynamic;

/// Annotation copied from the capsule onto the pod template to force a
/// rollout.
pub const ANNOTATION_ROLLOUT: &str = "tern.dev/rollout";

/// Pod annotation carrying a checksum of the capsule's environment.
pub const ANNOTATION_CHECKSUM_ENV: &str = "tern.dev/config-checksum-env";

/// Label selecting a capsule's pods.
pub const LABEL_CAPSULE: &str = "tern.dev/capsule";

pub const LABEL_PROJECT: &str = "tern.dev/project";
pub const LABEL_ENVIRONMENT: &str = "tern.dev/environment";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capsule {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: CapsuleSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CapsuleStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleSpec {
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// ConfigMaps and Secrets loaded whole into the environment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<CapsuleInterface>,
    #[serde(default)]
    pub scale: CapsuleScale,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvReference {
    /// `ConfigMap` or `Secret`.
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleInterface {
    pub name: String,
    pub port: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleScale {
    #[serde(default = "default_min_instances")]
    pub min_instances: u32,
    /// Set when an autoscaler owns the replica count within `[min, max]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<u32>,
}

fn default_min_instances() -> u32 {
    1
}

impl Default for CapsuleScale {
    fn default() -> Self {
        Self {
            min_instances: default_min_instances(),
            max_instances: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub owned_resources: Vec<OwnedResource>,
    #[serde(default)]
    pub used_resources: Vec<UsedResource>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Reference to a resource, as persisted in status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    /// Needed to find kinds the kind table doesn't know.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<ResourceRef>,
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A resource the capsule reads but does not own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsedResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<ResourceRef>,
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEnvironment {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ProjectEnvironmentSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectEnvironmentStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEnvironmentSpec {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub environment: String,
    /// Namespace to create for the environment; defaults to the resource name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEnvironmentStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub owned_resources: Vec<OwnedResource>,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Set once the engine created the environment's namespace.
    #[serde(default)]
    pub created_namespace: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Common view over the owning resources.
pub trait OwnerResource: Clone + Serialize {
    fn gvk() -> GroupVersionKind;
    fn metadata(&self) -> &ObjectMeta;

    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    fn generation(&self) -> i64 {
        self.metadata().generation.unwrap_or_default()
    }

    /// Untyped body carrying type meta, as sent to the cluster.
    fn to_object(&self) -> Result<DynamicObject> {
        let mut obj = to_dynamic(self)?;
        let gvk = Self::gvk();
        obj.types = Some(TypeMeta {
            api_version: gvk.api_version(),
            kind: gvk.kind,
        });
        Ok(obj)
    }
}

impl OwnerResource for Capsule {
    fn gvk() -> GroupVersionKind {
        gvk::capsule()
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl OwnerResource for ProjectEnvironment {
    fn gvk() -> GroupVersionKind {
        gvk::project_environment()
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl ProjectEnvironment {
    pub fn namespace_name(&self) -> String {
        self.spec
            .namespace
            .clone()
            .unwrap_or_else(|| self.name().to_string())
    }
}
