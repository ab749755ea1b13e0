//! Per-attempt reconciliation state and the facade steps work through.
//!
//! A [`Request`] holds three slots per [`ObjectKey`]: the live copy loaded
//! from the cluster, the desired copy steps write, and the materialized copy
//! commit learns from a dry-run. Every read hands out a clone and every write
//! stores one, so steps never alias request state.

pub mod capsule;
pub mod project_env;
pub mod strategy;

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::core::DynamicObject;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::cluster::ClusterClient;
use crate::error::{Error, Result};
use crate::kind::{GroupVersionKind, KindTable};
use crate::object::{Object, ObjectKey, from_dynamic, normalize, to_dynamic};

pub use capsule::CapsuleStrategy;
pub use project_env::ProjectEnvironmentStrategy;
pub use strategy::Strategy;

/// Caller-chosen behavior for one attempt.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Classify only: no status writes, no persisted mutations.
    pub dry_run: bool,
    /// Take over objects that carry no ownership label for this owner.
    pub force: bool,
    /// Proposed objects steps may consult without them being in the cluster.
    pub additional_objects: Vec<DynamicObject>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestState {
    /// Live copies of everything the owner manages, keyed and normalized.
    pub existing_objects: BTreeMap<ObjectKey, DynamicObject>,
    /// Rebuilt from `existing_objects` at the start of every pass.
    pub new_objects: BTreeMap<ObjectKey, Object>,
    pub observed_generation: i64,
    pub last_errors: Vec<String>,
    pub dry_run: bool,
    pub force: bool,
}

pub struct Request<S> {
    pub(crate) cluster: Arc<dyn ClusterClient>,
    pub(crate) kinds: Arc<KindTable>,
    pub(crate) strategy: S,
    pub(crate) state: RequestState,
}

impl<S: Strategy> Request<S> {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        kinds: Arc<KindTable>,
        strategy: S,
        options: &RequestOptions,
    ) -> Self {
        let state = RequestState {
            observed_generation: strategy.observed_generation(),
            last_errors: strategy.last_errors(),
            dry_run: options.dry_run,
            force: options.force,
            ..Default::default()
        };
        info!(
            owner = strategy.owner_name(),
            generation = strategy.owner_generation(),
            observed_generation = state.observed_generation,
            resource_version = strategy.owner_resource_version().unwrap_or_default(),
            dry_run = state.dry_run,
            force = state.force,
            "created request"
        );
        Self {
            cluster,
            kinds,
            strategy,
            state,
        }
    }

    pub fn state(&self) -> &RequestState {
        &self.state
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn kinds(&self) -> &KindTable {
        &self.kinds
    }

    pub fn is_dry_run(&self) -> bool {
        self.state.dry_run
    }

    /// Key for kind+name in this request. An empty name means the owner's.
    pub fn key(&self, gvk: &GroupVersionKind, name: &str) -> Result<ObjectKey> {
        self.strategy.key(&self.kinds, gvk, name)
    }

    /// The live copy of an owned object.
    pub fn get_existing(&self, gvk: &GroupVersionKind, name: &str) -> Result<DynamicObject> {
        let key = self.key(gvk, name)?;
        let object = self.slot(&key)?;
        object.current.clone().ok_or_else(|| {
            Error::NotFound(format!(
                "object '{}' of type '{}' has no existing version",
                key.name,
                key.gvk()
            ))
        })
    }

    /// The desired copy recorded so far in this pass.
    pub fn get_new(&self, gvk: &GroupVersionKind, name: &str) -> Result<DynamicObject> {
        let key = self.key(gvk, name)?;
        let object = self.slot(&key)?;
        object.new.clone().ok_or_else(|| {
            Error::NotFound(format!(
                "object '{}' of type '{}' has no new version",
                key.name,
                key.gvk()
            ))
        })
    }

    fn slot(&self, key: &ObjectKey) -> Result<&Object> {
        self.state.new_objects.get(key).ok_or_else(|| {
            Error::NotFound(format!(
                "object '{}' of type '{}' not found",
                key.name,
                key.gvk()
            ))
        })
    }

    /// Record the desired body for its key, replacing any earlier one.
    pub fn set(&mut self, mut obj: DynamicObject) -> Result<()> {
        let types = obj.types.as_ref().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "object '{}' has no apiVersion/kind",
                obj.metadata.name.clone().unwrap_or_default()
            ))
        })?;
        let gvk = GroupVersionKind::from_api_version(&types.api_version, &types.kind);
        let key = self.key(&gvk, obj.metadata.name.as_deref().unwrap_or_default())?;

        obj.metadata.name = Some(key.name.clone());
        obj.metadata.namespace = key.namespace().map(str::to_string);
        let obj = normalize(&key, obj);

        self.state.new_objects.entry(key).or_default().new = Some(obj);
        Ok(())
    }

    /// Mark an object for deletion. Its live copy stays readable.
    pub fn delete(&mut self, gvk: &GroupVersionKind, name: &str) -> Result<()> {
        let key = self.key(gvk, name)?;
        if let Some(object) = self.state.new_objects.get_mut(&key) {
            object.new = None;
        }
        Ok(())
    }

    /// Live copies of every owned object of a kind, in key order.
    pub fn list_existing(&self, gvk: &GroupVersionKind) -> Result<Vec<DynamicObject>> {
        let gvk = self.kinds.resolve(gvk)?;
        Ok(self
            .state
            .existing_objects
            .iter()
            .filter(|(key, _)| key.gvk() == gvk)
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    /// Desired copies of every object of a kind, in key order.
    pub fn list_new(&self, gvk: &GroupVersionKind) -> Result<Vec<DynamicObject>> {
        let gvk = self.kinds.resolve(gvk)?;
        Ok(self
            .state
            .new_objects
            .iter()
            .filter(|(key, _)| key.gvk() == gvk)
            .filter_map(|(_, obj)| obj.new.clone())
            .collect())
    }

    pub fn get_existing_as<T>(&self, name: &str) -> Result<T>
    where
        T: k8s_openapi::Resource + DeserializeOwned,
    {
        from_dynamic(&self.get_existing(&gvk_of::<T>(), name)?)
    }

    pub fn get_new_as<T>(&self, name: &str) -> Result<T>
    where
        T: k8s_openapi::Resource + DeserializeOwned,
    {
        from_dynamic(&self.get_new(&gvk_of::<T>(), name)?)
    }

    pub fn list_new_as<T>(&self) -> Result<Vec<T>>
    where
        T: k8s_openapi::Resource + DeserializeOwned,
    {
        self.list_new(&gvk_of::<T>())?
            .iter()
            .map(from_dynamic::<T>)
            .collect()
    }

    pub fn set_typed<T>(&mut self, value: &T) -> Result<()>
    where
        T: k8s_openapi::Resource + Serialize,
    {
        let mut obj = to_dynamic(value)?;
        let gvk = gvk_of::<T>();
        obj.types = Some(kube::core::TypeMeta {
            api_version: gvk.api_version(),
            kind: gvk.kind,
        });
        self.set(obj)
    }

    /// Fetch every object referenced by the owner's status. References to
    /// objects that no longer exist are dropped.
    pub async fn load_existing_objects(&mut self) -> Result<()> {
        for r in self.strategy.owned_refs() {
            let key = self.strategy.ref_key(&self.kinds, &r)?;
            match self.cluster.get(&key).await {
                Ok(obj) => {
                    let obj = normalize(&key, obj);
                    self.state.existing_objects.insert(key, obj);
                }
                Err(err) if err.is_not_found() => {
                    debug!(object = %key, "owned object is gone");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Start a pass: every existing object becomes the current copy of its
    /// key and nothing is desired yet. Returns the pass's input objects.
    pub fn prepare(&mut self) -> Vec<DynamicObject> {
        self.state.new_objects = self
            .state
            .existing_objects
            .iter()
            .map(|(key, obj)| {
                (
                    key.clone(),
                    Object {
                        current: Some(obj.clone()),
                        ..Default::default()
                    },
                )
            })
            .collect();
        self.strategy.prepare();

        self.state
            .existing_objects
            .iter()
            .map(|(key, obj)| normalize(key, obj.clone()))
            .collect()
    }

    /// Record a fatal error on the owner's status.
    pub async fn update_status_with_error(&mut self, err: &Error) -> Result<()> {
        let observed = self.state.observed_generation;
        self.strategy
            .update_status_with_error(&*self.cluster, observed, err)
            .await
    }
}

/// Kind identity of a typed Kubernetes resource.
pub fn gvk_of<T: k8s_openapi::Resource>() -> GroupVersionKind {
    GroupVersionKind::new(T::GROUP, T::VERSION, T::KIND)
}
