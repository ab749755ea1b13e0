//! In-process cluster.
//!
//! Keeps objects in memory with the API server behaviors the commit engine
//! depends on: resourceVersion preconditions, server-side defaulting applied
//! to dry-run and real writes alike, generation bumps on spec changes, and a
//! status subresource that plain updates cannot touch. Faults can be injected
//! per verb and key, and every call is recorded.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::DynamicObject;

use super::{ClusterClient, DryRun};
use crate::error::{Error, Result};
use crate::kind::GroupVersionKind;
use crate::object::{ObjectKey, label};

type Defaulter = Box<dyn Fn(&mut DynamicObject) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    Delete,
    UpdateStatus,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub verb: Verb,
    pub key: ObjectKey,
    pub dry_run: bool,
}

impl Operation {
    pub fn is_write(&self) -> bool {
        !self.dry_run && !matches!(self.verb, Verb::Get | Verb::List)
    }
}

/// Failure the cluster can be told to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    AlreadyExists,
    Conflict,
    InvalidArgument,
    Transport,
}

impl Fault {
    fn into_error(self, key: &ObjectKey) -> Error {
        match self {
            Fault::AlreadyExists => Error::AlreadyExists(key.to_string()),
            Fault::Conflict => Error::Conflict(format!(
                "the object has been modified; please apply your changes to the latest version: {key}"
            )),
            Fault::InvalidArgument => Error::InvalidArgument(format!("{key} is invalid")),
            Fault::Transport => Error::Transport(format!("connection reset while handling {key}")),
        }
    }
}

struct Injected {
    verb: Verb,
    dry_run: bool,
    key: StoreKey,
    fault: Fault,
    remaining: Option<usize>,
}

/// Identity inside the store. The version is not part of it: one object is
/// served under every version of its kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct StoreKey {
    group: String,
    kind: String,
    namespace: String,
    name: String,
}

impl From<&ObjectKey> for StoreKey {
    fn from(key: &ObjectKey) -> Self {
        Self {
            group: key.group.clone(),
            kind: key.kind.clone(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        }
    }
}

#[derive(Default)]
struct State {
    objects: BTreeMap<StoreKey, DynamicObject>,
    next_version: u64,
    next_uid: u64,
    operations: Vec<Operation>,
    faults: Vec<Injected>,
}

impl State {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn new_uid(&mut self) -> String {
        self.next_uid += 1;
        format!("00000000-0000-0000-0000-{:012}", self.next_uid)
    }

    fn record(&mut self, verb: Verb, key: &ObjectKey, dry_run: bool) {
        self.operations.push(Operation {
            verb,
            key: key.clone(),
            dry_run,
        });
    }

    fn take_fault(&mut self, verb: Verb, key: &ObjectKey, dry_run: bool) -> Option<Error> {
        let store_key = StoreKey::from(key);
        let idx = self
            .faults
            .iter()
            .position(|f| f.verb == verb && f.dry_run == dry_run && f.key == store_key)?;
        let fault = self.faults[idx].fault;
        match self.faults[idx].remaining.as_mut() {
            Some(remaining) if *remaining <= 1 => {
                self.faults.remove(idx);
            }
            Some(remaining) => *remaining -= 1,
            None => {}
        }
        Some(fault.into_error(key))
    }
}

#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
    defaulters: HashMap<(String, String), Defaulter>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cluster that defaults Deployments the way the API server does for
    /// the fields the built-in steps leave out.
    pub fn with_builtin_defaults() -> Self {
        Self::new().with_defaulter(&crate::kind::gvk::deployment(), default_deployment)
    }

    /// Run `defaulter` on every body of the kind before it is stored or
    /// returned from a dry-run.
    pub fn with_defaulter(
        mut self,
        gvk: &GroupVersionKind,
        defaulter: impl Fn(&mut DynamicObject) + Send + Sync + 'static,
    ) -> Self {
        self.defaulters
            .insert((gvk.group.clone(), gvk.kind.clone()), Box::new(defaulter));
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply_defaults(&self, key: &ObjectKey, obj: &mut DynamicObject) {
        if let Some(defaulter) = self.defaulters.get(&(key.group.clone(), key.kind.clone())) {
            defaulter(obj);
        }
    }

    /// Store an object directly, as if another actor had created it.
    pub fn insert(&self, mut obj: DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::from_object(&obj)?;
        self.apply_defaults(&key, &mut obj);
        let mut state = self.lock();
        if obj.metadata.uid.is_none() {
            obj.metadata.uid = Some(state.new_uid());
        }
        obj.metadata.resource_version = Some(state.bump_version());
        obj.metadata.generation.get_or_insert(1);
        state.objects.insert(StoreKey::from(&key), obj.clone());
        Ok(obj)
    }

    /// Read an object without recording the call.
    pub fn object(&self, key: &ObjectKey) -> Option<DynamicObject> {
        self.lock().objects.get(&StoreKey::from(key)).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.lock().operations.clone()
    }

    /// Persisted mutations only, in call order.
    pub fn writes(&self) -> Vec<Operation> {
        self.lock()
            .operations
            .iter()
            .filter(|op| op.is_write())
            .cloned()
            .collect()
    }

    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }

    /// Fail the next matching call once.
    pub fn fail_next(&self, verb: Verb, dry_run: DryRun, key: &ObjectKey, fault: Fault) {
        self.inject(verb, dry_run, key, fault, Some(1));
    }

    /// Fail every matching call from now on.
    pub fn fail_always(&self, verb: Verb, dry_run: DryRun, key: &ObjectKey, fault: Fault) {
        self.inject(verb, dry_run, key, fault, None);
    }

    fn inject(
        &self,
        verb: Verb,
        dry_run: DryRun,
        key: &ObjectKey,
        fault: Fault,
        remaining: Option<usize>,
    ) {
        self.lock().faults.push(Injected {
            verb,
            dry_run: dry_run.is_dry_run(),
            key: StoreKey::from(key),
            fault,
            remaining,
        });
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject> {
        let mut state = self.lock();
        state.record(Verb::Get, key, false);
        if let Some(err) = state.take_fault(Verb::Get, key, false) {
            return Err(err);
        }
        state
            .objects
            .get(&StoreKey::from(key))
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let selector = parse_selector(label_selector)?;
        let mut state = self.lock();
        state.record(
            Verb::List,
            &ObjectKey::new(gvk, namespace.unwrap_or_default(), ""),
            false,
        );
        Ok(state
            .objects
            .iter()
            .filter(|(k, _)| k.group == gvk.group && k.kind == gvk.kind)
            .filter(|(k, _)| namespace.is_none_or(|ns| k.namespace == ns))
            .filter(|(_, obj)| selector.iter().all(|(l, v)| label(obj, l) == Some(v)))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, obj: &DynamicObject, dry_run: DryRun) -> Result<DynamicObject> {
        let key = ObjectKey::from_object(obj)?;
        let mut created = obj.clone();
        self.apply_defaults(&key, &mut created);

        let mut state = self.lock();
        state.record(Verb::Create, &key, dry_run.is_dry_run());
        if let Some(err) = state.take_fault(Verb::Create, &key, dry_run.is_dry_run()) {
            return Err(err);
        }
        if key.name.is_empty() {
            return Err(Error::InvalidArgument(format!("{key}: name is required")));
        }
        let store_key = StoreKey::from(&key);
        if state.objects.contains_key(&store_key) {
            return Err(Error::AlreadyExists(key.to_string()));
        }

        created.metadata.managed_fields = None;
        created.metadata.resource_version = None;
        created.metadata.generation = Some(1);
        if let Some(data) = created.data.as_object_mut() {
            data.remove("status");
        }
        if dry_run.is_dry_run() {
            return Ok(created);
        }

        created.metadata.uid = Some(state.new_uid());
        created.metadata.creation_timestamp = Some(Time(Utc::now()));
        created.metadata.resource_version = Some(state.bump_version());
        state.objects.insert(store_key, created.clone());
        Ok(created)
    }

    async fn update(&self, obj: &DynamicObject, dry_run: DryRun) -> Result<DynamicObject> {
        let key = ObjectKey::from_object(obj)?;
        let mut updated = obj.clone();
        self.apply_defaults(&key, &mut updated);

        let mut state = self.lock();
        state.record(Verb::Update, &key, dry_run.is_dry_run());
        if let Some(err) = state.take_fault(Verb::Update, &key, dry_run.is_dry_run()) {
            return Err(err);
        }
        let store_key = StoreKey::from(&key);
        let stored = state
            .objects
            .get(&store_key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))?;

        if let Some(rv) = obj.metadata.resource_version.as_deref()
            && Some(rv) != stored.metadata.resource_version.as_deref()
        {
            return Err(Fault::Conflict.into_error(&key));
        }

        updated.metadata.managed_fields = None;
        updated.metadata.uid = stored.metadata.uid.clone();
        updated.metadata.creation_timestamp = stored.metadata.creation_timestamp.clone();
        updated.metadata.resource_version = stored.metadata.resource_version.clone();
        if let Some(data) = updated.data.as_object_mut() {
            match stored.data.get("status") {
                Some(status) => {
                    data.insert("status".to_string(), status.clone());
                }
                None => {
                    data.remove("status");
                }
            }
        }

        let generation = stored.metadata.generation.unwrap_or(1);
        let spec_changed = updated.data.get("spec") != stored.data.get("spec");
        updated.metadata.generation = Some(if spec_changed {
            generation + 1
        } else {
            generation
        });

        if dry_run.is_dry_run() {
            return Ok(updated);
        }
        if updated.data != stored.data || updated.metadata != stored.metadata {
            updated.metadata.resource_version = Some(state.bump_version());
        }
        state.objects.insert(store_key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey, dry_run: DryRun) -> Result<()> {
        let mut state = self.lock();
        state.record(Verb::Delete, key, dry_run.is_dry_run());
        if let Some(err) = state.take_fault(Verb::Delete, key, dry_run.is_dry_run()) {
            return Err(err);
        }
        let store_key = StoreKey::from(key);
        if !state.objects.contains_key(&store_key) {
            return Err(Error::NotFound(key.to_string()));
        }
        if !dry_run.is_dry_run() {
            state.objects.remove(&store_key);
        }
        Ok(())
    }

    async fn update_status(&self, owner: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::from_object(owner)?;
        let mut state = self.lock();
        state.record(Verb::UpdateStatus, &key, false);
        if let Some(err) = state.take_fault(Verb::UpdateStatus, &key, false) {
            return Err(err);
        }
        let store_key = StoreKey::from(&key);
        let mut stored = state
            .objects
            .get(&store_key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))?;

        if let Some(rv) = owner.metadata.resource_version.as_deref()
            && Some(rv) != stored.metadata.resource_version.as_deref()
        {
            return Err(Fault::Conflict.into_error(&key));
        }

        if let Some(data) = stored.data.as_object_mut() {
            match owner.data.get("status") {
                Some(status) => {
                    data.insert("status".to_string(), status.clone());
                }
                None => {
                    data.remove("status");
                }
            }
        }
        stored.metadata.resource_version = Some(state.bump_version());
        state.objects.insert(store_key, stored.clone());
        Ok(stored)
    }
}

fn parse_selector(selector: Option<&str>) -> Result<Vec<(String, String)>> {
    let Some(selector) = selector else {
        return Ok(Vec::new());
    };
    selector
        .split(',')
        .filter(|term| !term.trim().is_empty())
        .map(|term| {
            term.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| {
                    Error::InvalidArgument(format!("unsupported label selector term '{term}'"))
                })
        })
        .collect()
}

/// The subset of Deployment defaulting the API server applies that matters
/// for change detection.
pub fn default_deployment(obj: &mut DynamicObject) {
    let Some(spec) = obj.data.get_mut("spec").and_then(|s| s.as_object_mut()) else {
        return;
    };
    spec.entry("replicas").or_insert(serde_json::json!(1));
    spec.entry("revisionHistoryLimit")
        .or_insert(serde_json::json!(10));
    spec.entry("progressDeadlineSeconds")
        .or_insert(serde_json::json!(600));
    spec.entry("strategy").or_insert(serde_json::json!({
        "type": "RollingUpdate",
        "rollingUpdate": {"maxSurge": "25%", "maxUnavailable": "25%"}
    }));
}
