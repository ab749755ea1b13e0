#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use kube::core::DynamicObject;

use tern_core::api::{Capsule, CapsuleSpec, OwnerResource, ProjectEnvironment};
use tern_core::cluster::{ClusterClient, DryRun, MemoryCluster, Verb};
use tern_core::config::EngineConfig;
use tern_core::kind::{GroupVersionKind, KindTable, gvk};
use tern_core::object::{ObjectKey, from_dynamic, new_object};
use tern_core::pipeline::{Options, Step};
use tern_core::request::{Request, Strategy};

pub const NAMESPACE: &str = "prod";

pub fn memory_cluster() -> Arc<MemoryCluster> {
    Arc::new(MemoryCluster::with_builtin_defaults())
}

pub fn client(cluster: &Arc<MemoryCluster>) -> Arc<dyn ClusterClient> {
    cluster.clone()
}

pub fn config() -> Arc<EngineConfig> {
    Arc::new(EngineConfig::default())
}

pub fn kinds() -> Arc<KindTable> {
    Arc::new(KindTable::builtin())
}

pub fn capsule_key(name: &str) -> ObjectKey {
    ObjectKey::new(&gvk::capsule(), NAMESPACE, name)
}

pub fn key(gvk: &GroupVersionKind, name: &str) -> ObjectKey {
    ObjectKey::new(gvk, NAMESPACE, name)
}

/// Store a capsule in the cluster and return it as the controller would
/// read it.
pub fn insert_capsule(cluster: &MemoryCluster, name: &str, spec: CapsuleSpec) -> Capsule {
    let mut capsule = Capsule::default();
    capsule.metadata.name = Some(name.to_string());
    capsule.metadata.namespace = Some(NAMESPACE.to_string());
    capsule.spec = spec;
    let stored = cluster.insert(capsule.to_object().unwrap()).unwrap();
    from_dynamic(&stored).unwrap()
}

/// Re-read a capsule, including the status the engine wrote.
pub fn fetch_capsule(cluster: &MemoryCluster, name: &str) -> Capsule {
    from_dynamic(&cluster.object(&capsule_key(name)).unwrap()).unwrap()
}

/// Replace a capsule's spec the way a user edit would, bumping its
/// generation.
pub async fn edit_capsule(cluster: &MemoryCluster, name: &str, edit: impl FnOnce(&mut CapsuleSpec)) {
    let mut capsule = fetch_capsule(cluster, name);
    edit(&mut capsule.spec);
    cluster
        .update(&capsule.to_object().unwrap(), DryRun::No)
        .await
        .unwrap();
}

pub fn insert_environment(cluster: &MemoryCluster, name: &str) -> ProjectEnvironment {
    let mut environment = ProjectEnvironment::default();
    environment.metadata.name = Some(name.to_string());
    environment.spec.project = "shop".to_string();
    environment.spec.environment = "prod".to_string();
    let stored = cluster.insert(environment.to_object().unwrap()).unwrap();
    from_dynamic(&stored).unwrap()
}

pub fn fetch_environment(cluster: &MemoryCluster, name: &str) -> ProjectEnvironment {
    let key = ObjectKey::new(&gvk::project_environment(), "", name);
    from_dynamic(&cluster.object(&key).unwrap()).unwrap()
}

/// `(kind, name, state)` for every owned resource in a capsule's status.
pub fn owned_states(capsule: &Capsule) -> Vec<(String, String, String)> {
    capsule
        .status
        .as_ref()
        .map(|status| {
            status
                .owned_resources
                .iter()
                .filter_map(|r| {
                    let reference = r.r#ref.as_ref()?;
                    Some((
                        reference.kind.clone(),
                        reference.name.clone(),
                        r.state.clone(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn config_map(name: &str, data: serde_json::Value) -> DynamicObject {
    let mut obj = new_object(&gvk::config_map(), None, name);
    obj.data = serde_json::json!({ "data": data });
    obj
}

pub fn service_account(name: &str) -> DynamicObject {
    new_object(&gvk::service_account(), Some(NAMESPACE), name)
}

/// A step backed by a closure.
pub struct FnStep<F> {
    name: &'static str,
    f: F,
}

impl<F> FnStep<F> {
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<S, F> Step<S> for FnStep<F>
where
    S: Strategy,
    F: Fn(&mut Request<S>, &Options) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, req: &mut Request<S>, options: &Options) -> anyhow::Result<()> {
        (self.f)(req, options)
    }
}

/// Step that sets a fixed list of objects, in the given order.
pub fn set_objects(objects: Vec<DynamicObject>) -> impl Fn(&mut Request<tern_core::request::CapsuleStrategy>, &Options) -> anyhow::Result<()> + Send + Sync {
    move |req, _| {
        for obj in &objects {
            req.set(obj.clone())?;
        }
        Ok(())
    }
}

type Hook = Box<dyn Fn(&MemoryCluster, Verb, &ObjectKey, bool) -> tern_core::Result<()> + Send + Sync>;

/// A memory cluster with a hook run before every call. The hook can mutate
/// the cluster (to race the engine) or fail the call.
pub struct HookedCluster {
    pub inner: Arc<MemoryCluster>,
    hook: Hook,
}

impl HookedCluster {
    pub fn new(
        inner: Arc<MemoryCluster>,
        hook: impl Fn(&MemoryCluster, Verb, &ObjectKey, bool) -> tern_core::Result<()>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner,
            hook: Box::new(hook),
        })
    }
}

#[async_trait]
impl ClusterClient for HookedCluster {
    async fn get(&self, key: &ObjectKey) -> tern_core::Result<DynamicObject> {
        (self.hook)(&self.inner, Verb::Get, key, false)?;
        self.inner.get(key).await
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> tern_core::Result<Vec<DynamicObject>> {
        let key = ObjectKey::new(gvk, namespace.unwrap_or_default(), "");
        (self.hook)(&self.inner, Verb::List, &key, false)?;
        self.inner.list(gvk, namespace, label_selector).await
    }

    async fn create(&self, obj: &DynamicObject, dry_run: DryRun) -> tern_core::Result<DynamicObject> {
        let key = ObjectKey::from_object(obj)?;
        (self.hook)(&self.inner, Verb::Create, &key, dry_run.is_dry_run())?;
        self.inner.create(obj, dry_run).await
    }

    async fn update(&self, obj: &DynamicObject, dry_run: DryRun) -> tern_core::Result<DynamicObject> {
        let key = ObjectKey::from_object(obj)?;
        (self.hook)(&self.inner, Verb::Update, &key, dry_run.is_dry_run())?;
        self.inner.update(obj, dry_run).await
    }

    async fn delete(&self, key: &ObjectKey, dry_run: DryRun) -> tern_core::Result<()> {
        (self.hook)(&self.inner, Verb::Delete, key, dry_run.is_dry_run())?;
        self.inner.delete(key, dry_run).await
    }

    async fn update_status(&self, owner: &DynamicObject) -> tern_core::Result<DynamicObject> {
        let key = ObjectKey::from_object(owner)?;
        (self.hook)(&self.inner, Verb::UpdateStatus, &key, false)?;
        self.inner.update_status(owner).await
    }
}
