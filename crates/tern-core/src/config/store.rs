//! Config store for loading and saving tern.toml.

use std::path::{Path, PathBuf};

use anyhow::Context;

use super::{EngineConfig, parser};

pub const CONFIG_FILE_NAME: &str = "tern.toml";

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    /// Store at `$XDG_CONFIG_HOME/tern/tern.toml` (platform equivalent).
    pub fn from_default_location() -> anyhow::Result<Self> {
        let global_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
            .join("tern");
        Ok(Self::from_dir(global_dir))
    }

    pub fn from_dir(dir: PathBuf) -> Self {
        Self::from_path(dir.join(CONFIG_FILE_NAME))
    }

    pub fn from_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// An explicit path wins over the default location.
    pub fn resolve(explicit: Option<PathBuf>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Ok(Self::from_path(path)),
            None => Self::from_default_location(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn load(&self) -> anyhow::Result<EngineConfig> {
        if !self.config_path.exists() {
            return Ok(EngineConfig::new());
        }
        parser::parse_tern_toml(&self.config_path)
    }

    pub fn save(&self, config: &EngineConfig) -> anyhow::Result<()> {
        config.validate()?;
        let content = parser::to_toml(config).context("Failed to serialize config to TOML")?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(&self.config_path, content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })?;
        Ok(())
    }
}
