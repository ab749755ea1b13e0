//! What a concrete request kind supplies to the shared engine.

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use crate::api::{OwnedResource, ResourceRef};
use crate::change::ChangeSet;
use crate::cluster::ClusterClient;
use crate::error::{Error, Result};
use crate::kind::{GroupVersionKind, KindTable};
use crate::object::ObjectKey;

#[async_trait]
pub trait Strategy: Send + Sync {
    fn owner_name(&self) -> &str;

    /// Namespace of the owner, `None` for a cluster-scoped owner.
    fn owner_namespace(&self) -> Option<&str>;

    fn owner_generation(&self) -> i64;

    fn owner_resource_version(&self) -> Option<&str>;

    /// Controller reference stamped on every desired object, `None` when the
    /// owner has not been persisted yet.
    fn owner_reference(&self) -> Option<OwnerReference>;

    /// Label whose value names the owner on every object it manages.
    fn owned_label(&self) -> &str;

    /// Observed generation recorded in the owner's status.
    fn observed_generation(&self) -> i64;

    /// Errors recorded in the owner's status by the last attempt.
    fn last_errors(&self) -> Vec<String>;

    /// References persisted by the last commit.
    fn owned_refs(&self) -> Vec<ResourceRef>;

    /// Key for kind+name as seen by steps. An empty name means the owner's.
    fn key(&self, kinds: &KindTable, gvk: &GroupVersionKind, name: &str) -> Result<ObjectKey>;

    /// Key for a reference read back from status.
    fn ref_key(&self, kinds: &KindTable, r: &ResourceRef) -> Result<ObjectKey>;

    /// Reset per-pass state before steps run.
    fn prepare(&mut self) {}

    /// Persist the per-key outcome of a commit together with `generation`.
    async fn update_status_with_changes(
        &mut self,
        cluster: &dyn ClusterClient,
        changes: &ChangeSet,
        generation: i64,
    ) -> Result<()>;

    /// Record a fatal error, keeping the last persisted resource lists.
    async fn update_status_with_error(
        &mut self,
        cluster: &dyn ClusterClient,
        observed_generation: i64,
        err: &Error,
    ) -> Result<()>;
}

/// Status entries for a change set, in key order.
pub(crate) fn owned_resources(changes: &ChangeSet, with_namespace: bool) -> Vec<OwnedResource> {
    changes
        .iter()
        .map(|(key, change)| OwnedResource {
            r#ref: Some(ResourceRef {
                api_group: (!key.group.is_empty()).then(|| key.group.clone()),
                version: Some(key.version.clone()),
                kind: key.kind.clone(),
                name: key.name.clone(),
                namespace: if with_namespace {
                    key.namespace().map(str::to_string)
                } else {
                    None
                },
            }),
            state: change.status_state().as_str().to_string(),
            message: change.error.clone(),
        })
        .collect()
}

/// Kind identity of a status reference, resolved the way new keys are.
pub(crate) fn ref_gvk(kinds: &KindTable, r: &ResourceRef) -> Result<GroupVersionKind> {
    kinds.resolve(&GroupVersionKind::new(
        r.api_group.as_deref().unwrap_or_default(),
        r.version.as_deref().unwrap_or_default(),
        &r.kind,
    ))
}

pub(crate) fn owned_refs(resources: &[OwnedResource]) -> Vec<ResourceRef> {
    resources.iter().filter_map(|r| r.r#ref.clone()).collect()
}

pub(crate) fn controller_reference(
    gvk: &GroupVersionKind,
    name: &str,
    uid: Option<&str>,
) -> Option<OwnerReference> {
    Some(OwnerReference {
        api_version: gvk.api_version(),
        kind: gvk.kind.clone(),
        name: name.to_string(),
        uid: uid?.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}
