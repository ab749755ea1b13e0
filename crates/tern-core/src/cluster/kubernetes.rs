//! [`ClusterClient`] over a live API server.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::core::{ApiResource, DynamicObject};
use tracing::debug;

use super::{ClusterClient, DryRun};
use crate::error::{Error, Result};
use crate::kind::{GroupVersionKind, KindTable};
use crate::object::ObjectKey;

pub struct KubeCluster {
    client: kube::Client,
    kinds: Arc<KindTable>,
    field_manager: String,
}

impl KubeCluster {
    pub fn new(client: kube::Client, kinds: Arc<KindTable>, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            kinds,
            field_manager: field_manager.into(),
        }
    }

    /// Connect with the ambient kubeconfig or in-cluster service account.
    pub async fn try_default(kinds: Arc<KindTable>, field_manager: &str) -> Result<Self> {
        let client = kube::Client::try_default()
            .await
            .map_err(|e| Error::Transport(format!("could not connect to cluster: {e}")))?;
        Ok(Self::new(client, kinds, field_manager))
    }

    fn api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
        let info = self.kinds.info(gvk)?;
        let version = if gvk.version.is_empty() {
            info.gvk.version.clone()
        } else {
            gvk.version.clone()
        };
        let resource = ApiResource {
            group: info.gvk.group.clone(),
            api_version: GroupVersionKind::new(&info.gvk.group, &version, &info.gvk.kind)
                .api_version(),
            version,
            kind: info.gvk.kind.clone(),
            plural: info.plural.clone(),
        };
        Ok(match namespace {
            Some(ns) if info.namespaced => Api::namespaced_with(self.client.clone(), ns, &resource),
            _ => Api::all_with(self.client.clone(), &resource),
        })
    }

    fn post_params(&self, dry_run: DryRun) -> PostParams {
        PostParams {
            dry_run: dry_run.is_dry_run(),
            field_manager: Some(self.field_manager.clone()),
        }
    }
}

fn api_error(err: kube::Error, key: &ObjectKey) -> Error {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => Error::NotFound(format!("{key}: {}", resp.message)),
            409 if resp.reason == "AlreadyExists" => {
                Error::AlreadyExists(format!("{key}: {}", resp.message))
            }
            409 => Error::Conflict(format!("{key}: {}", resp.message)),
            400 | 422 => Error::InvalidArgument(format!("{key}: {}", resp.message)),
            _ => Error::Transport(format!("{key}: {} ({})", resp.message, resp.code)),
        },
        other => Error::Transport(format!("{key}: {other}")),
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject> {
        debug!(object = %key, "get");
        self.api(&key.gvk(), key.namespace())?
            .get(&key.name)
            .await
            .map_err(|e| api_error(e, key))
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let key = ObjectKey::new(gvk, namespace.unwrap_or_default(), "");
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self
            .api(gvk, namespace)?
            .list(&params)
            .await
            .map_err(|e| api_error(e, &key))?;
        Ok(list.items)
    }

    async fn create(&self, obj: &DynamicObject, dry_run: DryRun) -> Result<DynamicObject> {
        let key = ObjectKey::from_object(obj)?;
        debug!(object = %key, dry_run = dry_run.is_dry_run(), "create");
        self.api(&key.gvk(), key.namespace())?
            .create(&self.post_params(dry_run), obj)
            .await
            .map_err(|e| api_error(e, &key))
    }

    async fn update(&self, obj: &DynamicObject, dry_run: DryRun) -> Result<DynamicObject> {
        let key = ObjectKey::from_object(obj)?;
        debug!(object = %key, dry_run = dry_run.is_dry_run(), "update");
        self.api(&key.gvk(), key.namespace())?
            .replace(&key.name, &self.post_params(dry_run), obj)
            .await
            .map_err(|e| api_error(e, &key))
    }

    async fn delete(&self, key: &ObjectKey, dry_run: DryRun) -> Result<()> {
        debug!(object = %key, dry_run = dry_run.is_dry_run(), "delete");
        let mut params = DeleteParams::background();
        params.dry_run = dry_run.is_dry_run();
        self.api(&key.gvk(), key.namespace())?
            .delete(&key.name, &params)
            .await
            .map_err(|e| api_error(e, key))?;
        Ok(())
    }

    async fn update_status(&self, owner: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::from_object(owner)?;
        debug!(
            object = %key,
            resource_version = ?owner.metadata.resource_version,
            "update status"
        );
        // Replaces the whole status subresource. The body's resourceVersion
        // makes the write conditional.
        let body = serde_json::to_vec(owner)?;
        self.api(&key.gvk(), key.namespace())?
            .replace_status(&key.name, &self.post_params(DryRun::No), body)
            .await
            .map_err(|e| api_error(e, &key))
    }
}
