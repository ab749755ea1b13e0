//! Kind identity and the closed table of kinds the engine knows about.
//!
//! Each entry carries everything the engine needs to treat a kind: how to
//! address it on the API server, how to decide whether two bodies are the
//! same, and whether it scales pods.

use std::fmt;

use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Group, version and kind of a resource. The core group is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Build from an `apiVersion` string such as `apps/v1` or `v1`.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new("", api_version, kind),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn group_kind(&self) -> String {
        if self.group.is_empty() {
            self.kind.clone()
        } else {
            format!("{}.{}", self.kind, self.group)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// How two bodies of the same kind are compared for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Equality {
    /// The whole body, minus bookkeeping the server owns.
    FullObject,
    /// Only the `spec` sub-tree.
    Spec,
}

impl Equality {
    pub fn equal(self, current: &DynamicObject, materialized: &DynamicObject) -> bool {
        match self {
            Equality::Spec => current.data.get("spec") == materialized.data.get("spec"),
            Equality::FullObject => comparable(current) == comparable(materialized),
        }
    }
}

fn comparable(obj: &DynamicObject) -> Value {
    let mut obj = obj.clone();
    obj.metadata.managed_fields = None;
    serde_json::to_value(&obj).unwrap_or(Value::Null)
}

#[derive(Debug, Clone)]
pub struct KindInfo {
    pub gvk: GroupVersionKind,
    pub plural: String,
    pub namespaced: bool,
    pub equality: Equality,
    /// Has `spec.replicas` and `spec.template` with rolling semantics.
    pub scalable: bool,
}

impl KindInfo {
    pub fn namespaced(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        Self {
            gvk: GroupVersionKind::new(group, version, kind),
            plural: plural.to_string(),
            namespaced: true,
            equality: Equality::FullObject,
            scalable: false,
        }
    }

    pub fn cluster(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        Self {
            namespaced: false,
            ..Self::namespaced(group, version, kind, plural)
        }
    }

    pub fn with_equality(mut self, equality: Equality) -> Self {
        self.equality = equality;
        self
    }

    pub fn scalable(mut self) -> Self {
        self.scalable = true;
        self
    }
}

pub mod gvk {
    use super::GroupVersionKind;

    pub fn deployment() -> GroupVersionKind {
        GroupVersionKind::new("apps", "v1", "Deployment")
    }

    pub fn stateful_set() -> GroupVersionKind {
        GroupVersionKind::new("apps", "v1", "StatefulSet")
    }

    pub fn service() -> GroupVersionKind {
        GroupVersionKind::new("", "v1", "Service")
    }

    pub fn service_account() -> GroupVersionKind {
        GroupVersionKind::new("", "v1", "ServiceAccount")
    }

    pub fn config_map() -> GroupVersionKind {
        GroupVersionKind::new("", "v1", "ConfigMap")
    }

    pub fn secret() -> GroupVersionKind {
        GroupVersionKind::new("", "v1", "Secret")
    }

    pub fn namespace() -> GroupVersionKind {
        GroupVersionKind::new("", "v1", "Namespace")
    }

    pub fn capsule() -> GroupVersionKind {
        GroupVersionKind::new("tern.dev", "v1alpha1", "Capsule")
    }

    pub fn project_environment() -> GroupVersionKind {
        GroupVersionKind::new("tern.dev", "v1alpha1", "ProjectEnvironment")
    }
}

/// Lookup table from group+kind to the served version and kind behavior.
#[derive(Debug, Clone)]
pub struct KindTable {
    kinds: Vec<KindInfo>,
}

impl Default for KindTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl KindTable {
    pub fn empty() -> Self {
        Self { kinds: Vec::new() }
    }

    /// The kinds produced by the built-in steps plus the owning resources.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.register(KindInfo::namespaced("", "v1", "ServiceAccount", "serviceaccounts"));
        table.register(KindInfo::namespaced("", "v1", "ConfigMap", "configmaps"));
        table.register(KindInfo::namespaced("", "v1", "Secret", "secrets"));
        table.register(KindInfo::namespaced("", "v1", "Service", "services"));
        table.register(KindInfo::cluster("", "v1", "Namespace", "namespaces"));
        table.register(
            KindInfo::namespaced("apps", "v1", "Deployment", "deployments")
                .with_equality(Equality::Spec)
                .scalable(),
        );
        table.register(
            KindInfo::namespaced("apps", "v1", "StatefulSet", "statefulsets")
                .with_equality(Equality::Spec)
                .scalable(),
        );
        table.register(KindInfo::namespaced(
            "autoscaling",
            "v2",
            "HorizontalPodAutoscaler",
            "horizontalpodautoscalers",
        ));
        table.register(KindInfo::namespaced("batch", "v1", "CronJob", "cronjobs"));
        table.register(KindInfo::namespaced(
            "networking.k8s.io",
            "v1",
            "Ingress",
            "ingresses",
        ));
        table.register(KindInfo::namespaced(
            "cert-manager.io",
            "v1",
            "Certificate",
            "certificates",
        ));
        table.register(
            KindInfo::namespaced(
                "monitoring.coreos.com",
                "v1",
                "ServiceMonitor",
                "servicemonitors",
            )
            .with_equality(Equality::Spec),
        );
        table.register(KindInfo::namespaced(
            "autoscaling.k8s.io",
            "v1",
            "VerticalPodAutoscaler",
            "verticalpodautoscalers",
        ));
        table.register(KindInfo::namespaced("tern.dev", "v1alpha1", "Capsule", "capsules"));
        table.register(KindInfo::cluster(
            "tern.dev",
            "v1alpha1",
            "ProjectEnvironment",
            "projectenvironments",
        ));
        table
    }

    /// Add a kind, replacing any entry with the same group and kind.
    pub fn register(&mut self, info: KindInfo) {
        self.kinds
            .retain(|k| !(k.gvk.group == info.gvk.group && k.gvk.kind == info.gvk.kind));
        self.kinds.push(info);
    }

    /// Find a kind by group and kind.
    ///
    /// An empty group first matches the core group, then any group with that
    /// kind, so status entries written without an apiGroup still resolve.
    pub fn lookup(&self, group: &str, kind: &str) -> Result<&KindInfo> {
        if let Some(info) = self
            .kinds
            .iter()
            .find(|k| k.gvk.group == group && k.gvk.kind == kind)
        {
            return Ok(info);
        }
        if group.is_empty()
            && let Some(info) = self.kinds.iter().find(|k| k.gvk.kind == kind)
        {
            return Ok(info);
        }
        Err(Error::UnknownKind {
            group: group.to_string(),
            kind: kind.to_string(),
        })
    }

    pub fn info(&self, gvk: &GroupVersionKind) -> Result<&KindInfo> {
        self.lookup(&gvk.group, &gvk.kind)
    }

    /// Resolve the served version for a group+kind. A kind the table doesn't
    /// know is accepted as-is when it names a version.
    pub fn resolve(&self, gvk: &GroupVersionKind) -> Result<GroupVersionKind> {
        match self.lookup(&gvk.group, &gvk.kind) {
            Ok(info) => Ok(info.gvk.clone()),
            Err(err) => {
                if gvk.version.is_empty() {
                    Err(err)
                } else {
                    Ok(gvk.clone())
                }
            }
        }
    }

    pub fn equality(&self, gvk: &GroupVersionKind) -> Equality {
        self.info(gvk)
            .map(|info| info.equality)
            .unwrap_or(Equality::FullObject)
    }

    pub fn is_scalable(&self, gvk: &GroupVersionKind) -> bool {
        self.info(gvk).map(|info| info.scalable).unwrap_or(false)
    }

    pub fn is_namespaced(&self, gvk: &GroupVersionKind) -> bool {
        self.info(gvk).map(|info| info.namespaced).unwrap_or(true)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KindInfo> {
        self.kinds.iter()
    }
}
