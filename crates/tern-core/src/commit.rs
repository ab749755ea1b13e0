//! Turning the desired object set into cluster mutations.
//!
//! Commit runs in two phases. The first only issues dry-run writes and reads:
//! every key is classified by what the server says its desired body would
//! become. The second persists the classification to the owner's status,
//! applies the mutations in key order and records the outcome. Both phases
//! visit keys in [`ObjectKey`] order.

use kube::core::DynamicObject;
use tracing::{debug, error, info, warn};

use crate::change::{Change, ChangeSet, ResourceState, has_mutations};
use crate::cluster::DryRun;
use crate::error::{Error, Result};
use crate::object::{ObjectKey, is_owned_by, normalize, set_controller_reference, set_label};
use crate::request::{Request, Strategy};

/// What phase one decided for a single key.
enum Classified {
    Change(Change),
    Skip,
}

impl<S: Strategy> Request<S> {
    /// Classify and, unless dry-running, apply the pass's desired objects.
    ///
    /// `Error::Aborted` asks the caller to rerun the pass: an object was
    /// adopted into the existing set.
    pub async fn commit(&mut self) -> Result<ChangeSet> {
        self.prepare_new_objects();

        let keys: Vec<ObjectKey> = self.state.new_objects.keys().cloned().collect();
        let mut changes = ChangeSet::new();
        for key in keys {
            if let Classified::Change(change) = self.classify(&key).await? {
                changes.insert(key, change);
            }
        }

        let generation = self.strategy.owner_generation();
        if self.state.observed_generation == generation && self.state.last_errors.is_empty() {
            info!(generation, "already at generation");
            if !has_mutations(&changes) {
                info!(generation, "no changes to apply");
                return Ok(changes);
            }
        }

        if self.state.dry_run {
            return Ok(changes);
        }

        let observed = self.state.observed_generation;
        self.strategy
            .update_status_with_changes(&*self.cluster, &changes, observed)
            .await?;

        let mut failures = Vec::new();
        for (key, change) in changes.iter_mut() {
            if !change.state.is_mutation() {
                continue;
            }
            match self.apply_change(key, change.state).await {
                Ok(()) => change.applied = true,
                Err(err) => {
                    warn!(object = %key, error = %err, "apply failed");
                    change.error = Some(err.to_string());
                    failures.push(err.to_string());
                }
            }
        }

        self.strategy
            .update_status_with_changes(&*self.cluster, &changes, generation)
            .await?;
        self.state.observed_generation = generation;
        self.state.last_errors.clear();

        if !failures.is_empty() {
            error!(failed = failures.len(), "error committing changes");
            return Err(Error::Apply {
                message: failures.join("\n"),
                changes: Box::new(changes),
            });
        }
        Ok(changes)
    }

    /// Stamp ownership on every desired body.
    fn prepare_new_objects(&mut self) {
        let owned_label = self.strategy.owned_label().to_string();
        let owner_name = self.strategy.owner_name().to_string();
        let owner_namespace = self.strategy.owner_namespace().map(str::to_string);
        let owner_ref = self.strategy.owner_reference();

        for (key, object) in self.state.new_objects.iter_mut() {
            let Some(new) = object.new.take() else {
                continue;
            };
            let mut new = normalize(key, new);
            set_label(&mut new, &owned_label, &owner_name);
            // A namespaced owner can only control objects in its namespace.
            let may_control = owner_namespace
                .as_deref()
                .is_none_or(|ns| key.namespace == ns);
            if let Some(owner_ref) = &owner_ref
                && may_control
            {
                set_controller_reference(&mut new, owner_ref.clone());
            }
            object.new = Some(new);
        }
    }

    fn is_owned(&self, obj: &DynamicObject) -> bool {
        is_owned_by(obj, self.strategy.owned_label(), self.strategy.owner_name())
    }

    async fn classify(&mut self, key: &ObjectKey) -> Result<Classified> {
        let (current, new) = match self.state.new_objects.get(key) {
            Some(object) => (object.current.clone(), object.new.clone()),
            None => return Ok(Classified::Skip),
        };

        match (current, new) {
            (None, None) => Ok(Classified::Skip),
            (None, Some(new)) => self.classify_create(key, new).await,
            (Some(current), new) => {
                if !(self.state.force || self.is_owned(&current)) {
                    info!(object = %key, "update object skipped, not owned by controller");
                    return Ok(Classified::Change(Change::new(ResourceState::AlreadyExists)));
                }
                let Some(new) = new else {
                    info!(object = %key, "delete object");
                    return Ok(Classified::Change(Change::new(ResourceState::Deleted)));
                };
                self.classify_update(key, current, new).await
            }
        }
    }

    async fn classify_create(&mut self, key: &ObjectKey, new: DynamicObject) -> Result<Classified> {
        match self.cluster.create(&new, DryRun::All).await {
            Ok(materialized) => {
                self.set_materialized(key, normalize(key, materialized));
                info!(object = %key, "create object");
                Ok(Classified::Change(Change::new(ResourceState::Created)))
            }
            Err(err) if err.is_already_exists() || err.is_invalid_argument() => {
                let live = match self.cluster.get(key).await {
                    Ok(live) => live,
                    Err(get_err) if get_err.is_not_found() => {
                        info!(object = %key, error = %err, "configuration is invalid");
                        return Err(err);
                    }
                    Err(get_err) => return Err(get_err),
                };

                if self.state.force || self.is_owned(&live) {
                    info!(object = %key, "object exists but not in status, retrying");
                    self.adopt(key, live);
                    return Err(Error::Aborted(format!(
                        "object '{key}' exists but not in owner status"
                    )));
                }

                info!(object = %key, "create object skipped, not owned by controller");
                Ok(Classified::Change(Change::new(ResourceState::AlreadyExists)))
            }
            Err(err) if err.is_conflict() => Err(Error::FailedPrecondition(format!(
                "new object version available for '{key}'"
            ))),
            Err(err) => Err(err),
        }
    }

    async fn classify_update(
        &mut self,
        key: &ObjectKey,
        current: DynamicObject,
        new: DynamicObject,
    ) -> Result<Classified> {
        let mut body = new;
        body.metadata.resource_version = current.metadata.resource_version.clone();
        if self.state.force && self.state.dry_run {
            body.metadata.owner_references = current.metadata.owner_references.clone();
        }

        debug!(
            object = %key,
            resource_version = current.metadata.resource_version.as_deref().unwrap_or_default(),
            "generating materialized version"
        );
        let materialized = match self.cluster.update(&body, DryRun::All).await {
            Ok(materialized) => normalize(key, materialized),
            Err(err) if err.is_conflict() => {
                let live = match self.cluster.get(key).await {
                    Ok(live) => live,
                    Err(get_err) if get_err.is_not_found() => {
                        info!(object = %key, error = %err, "configuration is invalid");
                        return Err(err);
                    }
                    Err(get_err) => return Err(get_err),
                };
                if self.is_owned(&live) {
                    info!(object = %key, "current version changed, retrying");
                    self.adopt(key, live);
                    return Err(Error::Aborted(format!("object '{key}' reloaded")));
                }
                return Err(Error::FailedPrecondition(format!(
                    "newer version of '{key}' exists that is not owned by '{}'",
                    self.strategy.owner_name()
                )));
            }
            Err(err) => return Err(err),
        };

        if self.kinds.equality(&key.gvk()).equal(&current, &materialized) {
            info!(object = %key, "update object skipped, not changed");
            return Ok(Classified::Change(Change::new(ResourceState::Unchanged)));
        }

        self.set_materialized(key, materialized);
        info!(object = %key, "update object");
        Ok(Classified::Change(Change::new(ResourceState::Updated)))
    }

    fn set_materialized(&mut self, key: &ObjectKey, materialized: DynamicObject) {
        if let Some(object) = self.state.new_objects.get_mut(key) {
            object.materialized = Some(materialized);
        }
    }

    fn adopt(&mut self, key: &ObjectKey, live: DynamicObject) {
        self.state
            .existing_objects
            .insert(key.clone(), normalize(key, live));
    }

    async fn apply_change(&self, key: &ObjectKey, state: ResourceState) -> Result<()> {
        let Some(object) = self.state.new_objects.get(key) else {
            return Ok(());
        };
        let gvk = key.gvk();

        match state {
            ResourceState::Updated => {
                let (Some(current), Some(new)) = (&object.current, &object.new) else {
                    return Ok(());
                };
                let mut body = new.clone();
                // Template changes roll out with the current replica count. The
                // new count lands on a later pass so it scales the new pods.
                if self.kinds.is_scalable(&gvk)
                    && let Some(materialized) = &object.materialized
                    && template(current) != template(materialized)
                {
                    keep_current_replicas(&mut body, current);
                    info!(object = %key, "deferring replica change until template is rolled out");
                }
                body.metadata.resource_version = current.metadata.resource_version.clone();
                info!(object = %key, "update object");
                self.cluster
                    .update(&body, DryRun::No)
                    .await
                    .map_err(|err| with_context(err, &format!("could not update {gvk}")))?;
            }
            ResourceState::Created => {
                let Some(new) = &object.new else {
                    return Ok(());
                };
                info!(object = %key, "create object");
                self.cluster
                    .create(new, DryRun::No)
                    .await
                    .map_err(|err| with_context(err, &format!("could not create {gvk}")))?;
            }
            ResourceState::Deleted => {
                info!(object = %key, "delete object");
                match self.cluster.delete(key, DryRun::No).await {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {
                        debug!(object = %key, "object already deleted");
                    }
                    Err(err) => return Err(with_context(err, &format!("could not delete {gvk}"))),
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn template(obj: &DynamicObject) -> Option<&serde_json::Value> {
    obj.data.get("spec").and_then(|spec| spec.get("template"))
}

fn keep_current_replicas(body: &mut DynamicObject, current: &DynamicObject) {
    let replicas = current
        .data
        .get("spec")
        .and_then(|spec| spec.get("replicas"))
        .cloned();
    if let Some(spec) = body.data.get_mut("spec").and_then(|s| s.as_object_mut()) {
        match replicas {
            Some(replicas) => {
                spec.insert("replicas".to_string(), replicas);
            }
            None => {
                spec.remove("replicas");
            }
        }
    }
}

/// Prefix an error's message while keeping its category.
fn with_context(err: Error, context: &str) -> Error {
    match err {
        Error::NotFound(msg) => Error::NotFound(format!("{context}: {msg}")),
        Error::AlreadyExists(msg) => Error::AlreadyExists(format!("{context}: {msg}")),
        Error::Conflict(msg) => Error::Conflict(format!("{context}: {msg}")),
        Error::InvalidArgument(msg) => Error::InvalidArgument(format!("{context}: {msg}")),
        Error::Transport(msg) => Error::Transport(format!("{context}: {msg}")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment(spec: serde_json::Value) -> DynamicObject {
        let mut obj = crate::object::new_object(&crate::kind::gvk::deployment(), Some("ns"), "web");
        obj.data = json!({ "spec": spec });
        obj
    }

    #[test]
    fn replicas_follow_current_body() {
        let current = deployment(json!({"replicas": 2, "template": {}}));
        let mut body = deployment(json!({"replicas": 5, "template": {"x": 1}}));
        keep_current_replicas(&mut body, &current);
        assert_eq!(body.data["spec"]["replicas"], 2);
        assert_eq!(body.data["spec"]["template"]["x"], 1);
    }

    #[test]
    fn context_keeps_error_category() {
        let err = with_context(Error::Conflict("stale".into()), "could not update x");
        assert!(err.is_conflict());
        assert_eq!(err.to_string(), "conflict: could not update x: stale");
    }
}
