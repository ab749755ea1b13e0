//! Deployment (and Service) for a capsule.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapEnvSource, Container, ContainerPort, EnvFromSource, EnvVar, PodSpec,
    PodTemplateSpec, SecretEnvSource, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{create_pod_annotations, env_checksum};
use crate::api::{ANNOTATION_CHECKSUM_ENV, Capsule, LABEL_CAPSULE, ResourceRef, UsedResource};
use crate::pipeline::{Options, Step};
use crate::request::{CapsuleStrategy, Request};

pub struct DeploymentStep {
    service: bool,
}

impl DeploymentStep {
    pub fn new() -> Self {
        Self { service: true }
    }

    /// Skip the Service even when the capsule has interfaces.
    pub fn without_service(mut self) -> Self {
        self.service = false;
        self
    }
}

impl Default for DeploymentStep {
    fn default() -> Self {
        Self::new()
    }
}

impl Step<CapsuleStrategy> for DeploymentStep {
    fn name(&self) -> &str {
        "deployment"
    }

    fn apply(&self, req: &mut Request<CapsuleStrategy>, options: &Options) -> anyhow::Result<()> {
        let capsule = req.capsule();

        let current = match req.get_existing_as::<Deployment>("") {
            Ok(current) => Some(current),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };

        for reference in &capsule.spec.env_from {
            let state = if options
                .additional_object(&reference.kind, &reference.name)
                .is_some()
            {
                "proposed"
            } else {
                "referenced"
            };
            req.mark_used_object(UsedResource {
                r#ref: Some(ResourceRef {
                    api_group: None,
                    version: None,
                    kind: reference.kind.clone(),
                    name: reference.name.clone(),
                    namespace: None,
                }),
                state: state.to_string(),
                message: None,
            });
        }

        let deployment = create_deployment(&capsule, current.as_ref(), options)?;

        if self.service && !capsule.spec.interfaces.is_empty() {
            req.set_typed(&create_service(&capsule))?;
        }
        req.set_typed(&deployment)?;
        Ok(())
    }
}

fn create_deployment(
    capsule: &Capsule,
    current: Option<&Deployment>,
    options: &Options,
) -> anyhow::Result<Deployment> {
    let name = capsule.metadata.name.clone().unwrap_or_default();
    let spec = &capsule.spec;

    let mut pod_annotations = create_pod_annotations(capsule);
    if let Some(checksum) = env_checksum(capsule, options) {
        pod_annotations.insert(ANNOTATION_CHECKSUM_ENV.to_string(), checksum);
    }

    let env: Vec<EnvVar> = spec
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    let env_from: Vec<EnvFromSource> = spec
        .env_from
        .iter()
        .filter_map(|reference| match reference.kind.as_str() {
            "ConfigMap" => Some(EnvFromSource {
                config_map_ref: Some(ConfigMapEnvSource {
                    name: reference.name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            "Secret" => Some(EnvFromSource {
                secret_ref: Some(SecretEnvSource {
                    name: reference.name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            _ => None,
        })
        .collect();

    let ports: Vec<ContainerPort> = spec
        .interfaces
        .iter()
        .map(|interface| ContainerPort {
            name: Some(interface.name.clone()),
            container_port: interface.port,
            ..Default::default()
        })
        .collect();

    let container = Container {
        name: name.clone(),
        image: Some(spec.image.clone()),
        command: spec.command.clone().map(|command| vec![command]),
        args: (!spec.args.is_empty()).then(|| spec.args.clone()),
        env: (!env.is_empty()).then_some(env),
        env_from: (!env_from.is_empty()).then_some(env_from),
        ports: (!ports.is_empty()).then_some(ports),
        ..Default::default()
    };

    let selector = pods_selector(capsule, current);
    let mut pod_labels = selector.clone();
    pod_labels.insert(LABEL_CAPSULE.to_string(), name.clone());

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: capsule.metadata.namespace.clone(),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas(capsule, current)?),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    annotations: (!pod_annotations.is_empty()).then_some(pod_annotations),
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    node_selector: (!spec.node_selector.is_empty())
                        .then(|| spec.node_selector.clone()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// The minimum instance count, or the current count clamped to the
/// autoscaling range when one is set.
fn replicas(capsule: &Capsule, current: Option<&Deployment>) -> anyhow::Result<i32> {
    let scale = &capsule.spec.scale;
    let min = scale.min_instances;
    let count = match scale.max_instances {
        None => min,
        Some(max) => match current.and_then(|d| d.spec.as_ref()).and_then(|s| s.replicas) {
            Some(current) => u32::try_from(current).unwrap_or(0).clamp(min, max.max(min)),
            None => min,
        },
    };
    i32::try_from(count)
        .map_err(|_| anyhow::anyhow!("{count} instances exceeds the maximum replica count"))
}

/// Selectors are immutable, so an existing plain selector is kept.
fn pods_selector(capsule: &Capsule, current: Option<&Deployment>) -> BTreeMap<String, String> {
    if let Some(selector) = current
        .and_then(|d| d.spec.as_ref())
        .map(|s| &s.selector)
        && selector.match_expressions.as_ref().is_none_or(|e| e.is_empty())
        && let Some(labels) = selector.match_labels.as_ref()
        && !labels.is_empty()
    {
        return labels.clone();
    }
    BTreeMap::from([(
        LABEL_CAPSULE.to_string(),
        capsule.metadata.name.clone().unwrap_or_default(),
    )])
}

fn create_service(capsule: &Capsule) -> Service {
    let name = capsule.metadata.name.clone().unwrap_or_default();
    let selector = BTreeMap::from([(LABEL_CAPSULE.to_string(), name.clone())]);
    Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: capsule.metadata.namespace.clone(),
            labels: Some(selector.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(
                capsule
                    .spec
                    .interfaces
                    .iter()
                    .map(|interface| ServicePort {
                        name: Some(interface.name.clone()),
                        port: interface.port,
                        target_port: Some(IntOrString::String(interface.name.clone())),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}
