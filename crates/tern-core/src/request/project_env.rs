//! Requests reconciling a project environment.
//!
//! Environments are cluster-scoped and manage objects across namespaces,
//! so their status references carry a namespace.

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::info;

use super::Request;
use super::strategy::{Strategy, controller_reference, owned_refs, owned_resources, ref_gvk};
use crate::api::{OwnerResource, ProjectEnvironment, ProjectEnvironmentStatus, ResourceRef};
use crate::change::{ChangeSet, ResourceState};
use crate::cluster::ClusterClient;
use crate::error::{Error, Result};
use crate::kind::{GroupVersionKind, KindTable, gvk};
use crate::object::ObjectKey;

pub struct ProjectEnvironmentStrategy {
    environment: ProjectEnvironment,
    owned_label: String,
}

impl ProjectEnvironmentStrategy {
    pub fn new(environment: ProjectEnvironment, owned_label: impl Into<String>) -> Self {
        Self {
            environment,
            owned_label: owned_label.into(),
        }
    }

    pub fn project_environment(&self) -> &ProjectEnvironment {
        &self.environment
    }

    fn created_namespace(&self, changes: &ChangeSet) -> bool {
        let namespace = self.environment.namespace_name();
        let created_now = changes.iter().any(|(key, change)| {
            key.group.is_empty()
                && key.kind == gvk::namespace().kind
                && key.name == namespace
                && change.state == ResourceState::Created
                && change.applied
        });
        let created_before = self
            .environment
            .status
            .as_ref()
            .is_some_and(|s| s.created_namespace);
        created_now || created_before
    }

    async fn write_status(
        &mut self,
        cluster: &dyn ClusterClient,
        status: ProjectEnvironmentStatus,
    ) -> Result<()> {
        let mut copy = self.environment.clone();
        copy.status = Some(status);
        let updated = cluster.update_status(&copy.to_object()?).await?;
        copy.metadata.resource_version = updated.metadata.resource_version;
        self.environment = copy;
        Ok(())
    }
}

#[async_trait]
impl Strategy for ProjectEnvironmentStrategy {
    fn owner_name(&self) -> &str {
        self.environment.name()
    }

    fn owner_namespace(&self) -> Option<&str> {
        None
    }

    fn owner_generation(&self) -> i64 {
        self.environment.generation()
    }

    fn owner_resource_version(&self) -> Option<&str> {
        self.environment.metadata.resource_version.as_deref()
    }

    fn owner_reference(&self) -> Option<OwnerReference> {
        controller_reference(
            &ProjectEnvironment::gvk(),
            self.environment.name(),
            self.environment.metadata.uid.as_deref(),
        )
    }

    fn owned_label(&self) -> &str {
        &self.owned_label
    }

    fn observed_generation(&self) -> i64 {
        self.environment
            .status
            .as_ref()
            .map(|s| s.observed_generation)
            .unwrap_or_default()
    }

    fn last_errors(&self) -> Vec<String> {
        self.environment
            .status
            .as_ref()
            .map(|s| s.errors.clone())
            .unwrap_or_default()
    }

    fn owned_refs(&self) -> Vec<ResourceRef> {
        self.environment
            .status
            .as_ref()
            .map(|s| owned_refs(&s.owned_resources))
            .unwrap_or_default()
    }

    /// Namespaced kinds land in the environment's namespace, cluster-scoped
    /// kinds (the namespace itself) carry none.
    fn key(&self, kinds: &KindTable, gvk: &GroupVersionKind, name: &str) -> Result<ObjectKey> {
        let gvk = kinds.resolve(gvk)?;
        let name = if name.is_empty() {
            self.environment.name()
        } else {
            name
        };
        let namespace = if kinds.is_namespaced(&gvk) {
            self.environment.namespace_name()
        } else {
            String::new()
        };
        Ok(ObjectKey::new(&gvk, &namespace, name))
    }

    fn ref_key(&self, kinds: &KindTable, r: &ResourceRef) -> Result<ObjectKey> {
        let gvk = ref_gvk(kinds, r)?;
        let namespace = if kinds.is_namespaced(&gvk) {
            r.namespace
                .clone()
                .unwrap_or_else(|| self.environment.namespace_name())
        } else {
            String::new()
        };
        Ok(ObjectKey::new(&gvk, &namespace, &r.name))
    }

    async fn update_status_with_changes(
        &mut self,
        cluster: &dyn ClusterClient,
        changes: &ChangeSet,
        generation: i64,
    ) -> Result<()> {
        info!(
            environment = self.environment.name(),
            resource_version = self.owner_resource_version().unwrap_or_default(),
            generation,
            "update status with changes"
        );
        let status = ProjectEnvironmentStatus {
            observed_generation: generation,
            owned_resources: owned_resources(changes, true),
            errors: Vec::new(),
            created_namespace: self.created_namespace(changes),
            updated_at: Some(Utc::now()),
        };
        self.write_status(cluster, status).await
    }

    async fn update_status_with_error(
        &mut self,
        cluster: &dyn ClusterClient,
        observed_generation: i64,
        err: &Error,
    ) -> Result<()> {
        info!(
            environment = self.environment.name(),
            resource_version = self.owner_resource_version().unwrap_or_default(),
            "update status with error"
        );
        let previous = self.environment.status.clone().unwrap_or_default();
        let status = ProjectEnvironmentStatus {
            observed_generation,
            owned_resources: previous.owned_resources,
            errors: vec![err.to_string()],
            created_namespace: previous.created_namespace,
            updated_at: Some(Utc::now()),
        };
        self.write_status(cluster, status).await
    }
}

impl Request<ProjectEnvironmentStrategy> {
    /// A copy of the environment being reconciled.
    pub fn project_environment(&self) -> ProjectEnvironment {
        self.strategy.environment.clone()
    }
}
