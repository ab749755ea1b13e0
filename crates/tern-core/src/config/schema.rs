//! tern.toml schema.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_PASSES: u32 = 10;
pub const DEFAULT_FIELD_MANAGER: &str = "tern";
pub const DEFAULT_CAPSULE_OWNER_LABEL: &str = "tern.dev/owned-by-capsule";
pub const DEFAULT_PROJECT_OWNER_LABEL: &str = "tern.dev/owned-by-project";

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on whole-pass retries within one attempt.
    pub max_passes: u32,
    /// Field manager sent with every write.
    pub field_manager: String,
    pub labels: LabelConfig,
    pub steps: StepConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            labels: LabelConfig::default(),
            steps: StepConfig::default(),
        }
    }
}

/// Ownership marker labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub capsule_owner: String,
    pub project_owner: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            capsule_owner: DEFAULT_CAPSULE_OWNER_LABEL.to_string(),
            project_owner: DEFAULT_PROJECT_OWNER_LABEL.to_string(),
        }
    }
}

/// Toggles for the built-in steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    pub service_account: bool,
    pub deployment: bool,
    pub service: bool,
    pub namespace: bool,
    /// Name of the ServiceAccount; the capsule name when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            service_account: true,
            deployment: true,
            service: true,
            namespace: true,
            service_account_name: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_passes == 0 {
            anyhow::bail!("max_passes must be at least 1");
        }
        if self.field_manager.trim().is_empty() {
            anyhow::bail!("field_manager must not be empty");
        }
        if self.labels.capsule_owner.trim().is_empty() {
            anyhow::bail!("labels.capsule_owner must not be empty");
        }
        if self.labels.project_owner.trim().is_empty() {
            anyhow::bail!("labels.project_owner must not be empty");
        }
        if let Some(name) = &self.steps.service_account_name
            && name.trim().is_empty()
        {
            anyhow::bail!("steps.service_account_name must not be empty when set");
        }
        Ok(())
    }
}
