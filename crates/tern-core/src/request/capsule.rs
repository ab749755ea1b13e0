//! Requests reconciling a single Capsule.

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::info;

use super::Request;
use super::strategy::{Strategy, controller_reference, owned_refs, owned_resources, ref_gvk};
use crate::api::{Capsule, CapsuleStatus, OwnerResource, ResourceRef, UsedResource};
use crate::change::ChangeSet;
use crate::cluster::ClusterClient;
use crate::error::{Error, Result};
use crate::kind::{GroupVersionKind, KindTable};
use crate::object::ObjectKey;

pub struct CapsuleStrategy {
    capsule: Capsule,
    owned_label: String,
    used_resources: Vec<UsedResource>,
}

impl CapsuleStrategy {
    pub fn new(capsule: Capsule, owned_label: impl Into<String>) -> Self {
        Self {
            capsule,
            owned_label: owned_label.into(),
            used_resources: Vec::new(),
        }
    }

    pub fn capsule(&self) -> &Capsule {
        &self.capsule
    }

    pub fn used_resources(&self) -> &[UsedResource] {
        &self.used_resources
    }

    fn namespace_for(&self, kinds: &KindTable, gvk: &GroupVersionKind) -> String {
        if kinds.is_namespaced(gvk) {
            self.capsule.namespace().unwrap_or_default().to_string()
        } else {
            String::new()
        }
    }

    async fn write_status(
        &mut self,
        cluster: &dyn ClusterClient,
        status: CapsuleStatus,
    ) -> Result<()> {
        let mut copy = self.capsule.clone();
        copy.status = Some(status);
        let updated = cluster.update_status(&copy.to_object()?).await?;
        copy.metadata.resource_version = updated.metadata.resource_version;
        self.capsule = copy;
        Ok(())
    }
}

#[async_trait]
impl Strategy for CapsuleStrategy {
    fn owner_name(&self) -> &str {
        self.capsule.name()
    }

    fn owner_namespace(&self) -> Option<&str> {
        self.capsule.namespace()
    }

    fn owner_generation(&self) -> i64 {
        self.capsule.generation()
    }

    fn owner_resource_version(&self) -> Option<&str> {
        self.capsule.metadata.resource_version.as_deref()
    }

    fn owner_reference(&self) -> Option<OwnerReference> {
        controller_reference(
            &Capsule::gvk(),
            self.capsule.name(),
            self.capsule.metadata.uid.as_deref(),
        )
    }

    fn owned_label(&self) -> &str {
        &self.owned_label
    }

    fn observed_generation(&self) -> i64 {
        self.capsule
            .status
            .as_ref()
            .map(|s| s.observed_generation)
            .unwrap_or_default()
    }

    fn last_errors(&self) -> Vec<String> {
        self.capsule
            .status
            .as_ref()
            .map(|s| s.errors.clone())
            .unwrap_or_default()
    }

    fn owned_refs(&self) -> Vec<ResourceRef> {
        self.capsule
            .status
            .as_ref()
            .map(|s| owned_refs(&s.owned_resources))
            .unwrap_or_default()
    }

    fn key(&self, kinds: &KindTable, gvk: &GroupVersionKind, name: &str) -> Result<ObjectKey> {
        let gvk = kinds.resolve(gvk)?;
        let name = if name.is_empty() {
            self.capsule.name()
        } else {
            name
        };
        Ok(ObjectKey::new(&gvk, &self.namespace_for(kinds, &gvk), name))
    }

    fn ref_key(&self, kinds: &KindTable, r: &ResourceRef) -> Result<ObjectKey> {
        let gvk = ref_gvk(kinds, r)?;
        Ok(ObjectKey::new(&gvk, &self.namespace_for(kinds, &gvk), &r.name))
    }

    fn prepare(&mut self) {
        self.used_resources.clear();
    }

    async fn update_status_with_changes(
        &mut self,
        cluster: &dyn ClusterClient,
        changes: &ChangeSet,
        generation: i64,
    ) -> Result<()> {
        info!(
            capsule = self.capsule.name(),
            resource_version = self.owner_resource_version().unwrap_or_default(),
            generation,
            "update status with changes"
        );
        let status = CapsuleStatus {
            observed_generation: generation,
            owned_resources: owned_resources(changes, false),
            used_resources: self.used_resources.clone(),
            errors: Vec::new(),
            updated_at: Some(Utc::now()),
        };
        self.write_status(cluster, status).await?;
        info!(
            capsule = self.capsule.name(),
            resource_version = self.owner_resource_version().unwrap_or_default(),
            "updated status with changes"
        );
        Ok(())
    }

    async fn update_status_with_error(
        &mut self,
        cluster: &dyn ClusterClient,
        observed_generation: i64,
        err: &Error,
    ) -> Result<()> {
        info!(
            capsule = self.capsule.name(),
            resource_version = self.owner_resource_version().unwrap_or_default(),
            "update status with error"
        );
        let previous = self.capsule.status.clone().unwrap_or_default();
        let status = CapsuleStatus {
            observed_generation,
            owned_resources: previous.owned_resources,
            used_resources: previous.used_resources,
            errors: vec![err.to_string()],
            updated_at: Some(Utc::now()),
        };
        self.write_status(cluster, status).await
    }
}

impl Request<CapsuleStrategy> {
    /// A copy of the capsule being reconciled.
    pub fn capsule(&self) -> Capsule {
        self.strategy.capsule.clone()
    }

    /// Record a resource the capsule reads but does not own. Reported in the
    /// capsule's status as `usedResources`.
    pub fn mark_used_object(&mut self, resource: UsedResource) {
        self.strategy.used_resources.push(resource);
    }
}
