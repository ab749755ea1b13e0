//! Boundary to the cluster API.
//!
//! The engine only ever talks to the cluster through [`ClusterClient`]. Every
//! write takes a [`DryRun`] flag so the commit engine can learn what the
//! server would store before deciding anything.

pub mod kubernetes;
pub mod memory;

use async_trait::async_trait;
use kube::core::DynamicObject;

use crate::error::Result;
use crate::kind::GroupVersionKind;
use crate::object::ObjectKey;

pub use kubernetes::KubeCluster;
pub use memory::{Fault, MemoryCluster, Operation, Verb};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DryRun {
    /// Persist the write.
    No,
    /// Validate, default and admit the write without persisting it.
    All,
}

impl DryRun {
    pub fn is_dry_run(self) -> bool {
        matches!(self, DryRun::All)
    }
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch the live object, `Error::NotFound` if absent.
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject>;

    /// List objects of a kind, optionally scoped to a namespace and filtered
    /// by a label selector (`key=value[,key=value]`).
    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;

    async fn create(&self, obj: &DynamicObject, dry_run: DryRun) -> Result<DynamicObject>;

    /// Replace an object. The body's resourceVersion is the precondition.
    async fn update(&self, obj: &DynamicObject, dry_run: DryRun) -> Result<DynamicObject>;

    async fn delete(&self, key: &ObjectKey, dry_run: DryRun) -> Result<()>;

    /// Write the status subresource of an owning resource.
    async fn update_status(&self, owner: &DynamicObject) -> Result<DynamicObject>;
}
