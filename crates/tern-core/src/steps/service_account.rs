use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::pipeline::{Options, Step};
use crate::request::{CapsuleStrategy, Request};

/// A ServiceAccount for the capsule's pods.
#[derive(Debug, Clone, Default)]
pub struct ServiceAccountStep {
    name: Option<String>,
}

impl ServiceAccountStep {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `name` instead of the capsule name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

impl Step<CapsuleStrategy> for ServiceAccountStep {
    fn name(&self) -> &str {
        "service-account"
    }

    fn apply(&self, req: &mut Request<CapsuleStrategy>, _options: &Options) -> anyhow::Result<()> {
        let capsule = req.capsule();
        let name = self
            .name
            .clone()
            .or_else(|| capsule.metadata.name.clone())
            .unwrap_or_default();

        req.set_typed(&ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: capsule.metadata.namespace.clone(),
                ..Default::default()
            },
            ..Default::default()
        })?;

        let mut deployment = match req.get_new_as::<Deployment>("") {
            Ok(deployment) => deployment,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        if let Some(pod) = deployment
            .spec
            .as_mut()
            .and_then(|spec| spec.template.spec.as_mut())
        {
            pod.service_account_name = Some(name);
        }
        req.set_typed(&deployment)?;
        Ok(())
    }
}
