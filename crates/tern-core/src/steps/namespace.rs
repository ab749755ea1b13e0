use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::api::{LABEL_ENVIRONMENT, LABEL_PROJECT};
use crate::pipeline::{Options, Step};
use crate::request::{ProjectEnvironmentStrategy, Request};

/// The namespace a project environment's workloads run in.
#[derive(Debug, Clone, Default)]
pub struct NamespaceStep;

impl NamespaceStep {
    pub fn new() -> Self {
        Self
    }
}

impl Step<ProjectEnvironmentStrategy> for NamespaceStep {
    fn name(&self) -> &str {
        "namespace"
    }

    fn apply(
        &self,
        req: &mut Request<ProjectEnvironmentStrategy>,
        _options: &Options,
    ) -> anyhow::Result<()> {
        let environment = req.project_environment();
        let mut labels = BTreeMap::new();
        if !environment.spec.project.is_empty() {
            labels.insert(LABEL_PROJECT.to_string(), environment.spec.project.clone());
        }
        if !environment.spec.environment.is_empty() {
            labels.insert(
                LABEL_ENVIRONMENT.to_string(),
                environment.spec.environment.clone(),
            );
        }

        req.set_typed(&Namespace {
            metadata: ObjectMeta {
                name: Some(environment.namespace_name()),
                labels: (!labels.is_empty()).then_some(labels),
                ..Default::default()
            },
            ..Default::default()
        })?;
        Ok(())
    }
}
