//! The reconciliation loop and the pipelines built on it.
//!
//! A pipeline owns an ordered list of steps. Running it loads the owner's
//! existing objects once, then repeats a pass (prepare, run every step,
//! commit) until commit returns anything but a retry signal.

use std::sync::Arc;

use kube::core::DynamicObject;
use tracing::{debug, error, info, warn};

use crate::api::{Capsule, ProjectEnvironment};
use crate::change::ResourceState;
use crate::cluster::ClusterClient;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::kind::KindTable;
use crate::object::ObjectKey;
use crate::request::{
    CapsuleStrategy, ProjectEnvironmentStrategy, Request, RequestOptions, Strategy,
};

/// Inputs shared by every step of one run.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Objects proposed alongside the owner but not necessarily in the
    /// cluster yet.
    pub additional_objects: Vec<DynamicObject>,
}

impl Options {
    /// A proposed object by kind and name.
    pub fn additional_object(&self, kind: &str, name: &str) -> Option<&DynamicObject> {
        self.additional_objects.iter().find(|obj| {
            obj.types.as_ref().is_some_and(|t| t.kind == kind)
                && obj.metadata.name.as_deref() == Some(name)
        })
    }
}

/// A desired-state builder. Steps read and write the request's object sets
/// and never talk to the cluster.
pub trait Step<S: Strategy>: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, req: &mut Request<S>, options: &Options) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct OutputObject {
    pub key: ObjectKey,
    /// Materialized body, else the desired one, else the live one for deletes.
    pub object: DynamicObject,
    pub state: ResourceState,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    pub input_objects: Vec<DynamicObject>,
    pub output_objects: Vec<OutputObject>,
}

/// Run `steps` against `req` until the pass commits, then report.
///
/// Fatal errors are recorded on the owner's status unless dry-running.
pub async fn execute_request<S: Strategy>(
    req: &mut Request<S>,
    steps: &[Box<dyn Step<S>>],
    options: &Options,
    max_passes: u32,
) -> Result<PipelineResult> {
    match execute_request_inner(req, steps, options, max_passes).await {
        Ok(result) => Ok(result),
        Err(err) => {
            if !req.is_dry_run() {
                req.update_status_with_error(&err).await?;
            }
            Err(err)
        }
    }
}

async fn execute_request_inner<S: Strategy>(
    req: &mut Request<S>,
    steps: &[Box<dyn Step<S>>],
    options: &Options,
    max_passes: u32,
) -> Result<PipelineResult> {
    req.load_existing_objects().await?;

    let mut last_retry = String::new();
    for pass in 1..=max_passes {
        let input_objects = req.prepare();
        debug!(
            pass,
            existing_objects = req.state().existing_objects.len(),
            "run steps"
        );

        for step in steps {
            step.apply(req, options).map_err(|source| Error::Step {
                name: step.name().to_string(),
                source,
            })?;
        }

        let changes = match req.commit().await {
            Ok(changes) => changes,
            Err(Error::Aborted(reason)) => {
                warn!(pass, reason = %reason, "retry running steps");
                last_retry = reason;
                continue;
            }
            Err(err) => {
                error!(error = %err, "error committing changes");
                return Err(err);
            }
        };

        let output_objects = changes
            .iter()
            .filter_map(|(key, change)| {
                let object = req.state().new_objects.get(key)?;
                let body = object
                    .materialized
                    .as_ref()
                    .or(object.new.as_ref())
                    .or(object.current.as_ref())?;
                Some(OutputObject {
                    key: key.clone(),
                    object: body.clone(),
                    state: change.state,
                })
            })
            .collect();

        info!(pass, "reconciled");
        return Ok(PipelineResult {
            input_objects,
            output_objects,
        });
    }

    Err(Error::RetriesExhausted {
        passes: max_passes,
        last: last_retry,
    })
}

/// Reconciles Capsules.
pub struct CapsulePipeline {
    config: Arc<EngineConfig>,
    kinds: Arc<KindTable>,
    steps: Vec<Box<dyn Step<CapsuleStrategy>>>,
}

impl CapsulePipeline {
    pub fn new(config: Arc<EngineConfig>, kinds: Arc<KindTable>) -> Self {
        Self {
            config,
            kinds,
            steps: Vec::new(),
        }
    }

    pub fn add_step(&mut self, step: impl Step<CapsuleStrategy> + 'static) {
        self.steps.push(Box::new(step));
    }

    pub fn with_step(mut self, step: impl Step<CapsuleStrategy> + 'static) -> Self {
        self.add_step(step);
        self
    }

    pub fn steps(&self) -> &[Box<dyn Step<CapsuleStrategy>>] {
        &self.steps
    }

    fn request(
        &self,
        cluster: Arc<dyn ClusterClient>,
        capsule: Capsule,
        options: &RequestOptions,
    ) -> Request<CapsuleStrategy> {
        let strategy = CapsuleStrategy::new(capsule, &self.config.labels.capsule_owner);
        Request::new(cluster, self.kinds.clone(), strategy, options)
    }

    pub async fn run_capsule(
        &self,
        cluster: Arc<dyn ClusterClient>,
        capsule: Capsule,
        options: RequestOptions,
    ) -> Result<PipelineResult> {
        let mut req = self.request(cluster, capsule, &options);
        let step_options = Options {
            additional_objects: options.additional_objects,
        };
        execute_request(&mut req, &self.steps, &step_options, self.config.max_passes).await
    }

    /// Delete everything the capsule owns by running without steps.
    pub async fn delete_capsule(
        &self,
        cluster: Arc<dyn ClusterClient>,
        capsule: Capsule,
        options: RequestOptions,
    ) -> Result<PipelineResult> {
        let mut req = self.request(cluster, capsule, &options);
        let step_options = Options {
            additional_objects: options.additional_objects,
        };
        execute_request(&mut req, &[], &step_options, self.config.max_passes).await
    }
}

/// Reconciles project environments.
pub struct ProjectEnvironmentPipeline {
    config: Arc<EngineConfig>,
    kinds: Arc<KindTable>,
    steps: Vec<Box<dyn Step<ProjectEnvironmentStrategy>>>,
}

impl ProjectEnvironmentPipeline {
    pub fn new(config: Arc<EngineConfig>, kinds: Arc<KindTable>) -> Self {
        Self {
            config,
            kinds,
            steps: Vec::new(),
        }
    }

    pub fn add_step(&mut self, step: impl Step<ProjectEnvironmentStrategy> + 'static) {
        self.steps.push(Box::new(step));
    }

    pub fn with_step(mut self, step: impl Step<ProjectEnvironmentStrategy> + 'static) -> Self {
        self.add_step(step);
        self
    }

    pub fn steps(&self) -> &[Box<dyn Step<ProjectEnvironmentStrategy>>] {
        &self.steps
    }

    pub async fn run_project_environment(
        &self,
        cluster: Arc<dyn ClusterClient>,
        environment: ProjectEnvironment,
        options: RequestOptions,
    ) -> Result<PipelineResult> {
        let strategy =
            ProjectEnvironmentStrategy::new(environment, &self.config.labels.project_owner);
        let mut req = Request::new(cluster, self.kinds.clone(), strategy, &options);
        let step_options = Options {
            additional_objects: options.additional_objects,
        };
        execute_request(&mut req, &self.steps, &step_options, self.config.max_passes).await
    }
}
