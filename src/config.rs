//! sessiond configuration (`agents/sessiond.toml`)

use crate::pool::PoolConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Location of the config file, relative to the project root
pub const CONFIG_FILE: &str = "agents/sessiond.toml";

/// Index database settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexConfig {
    /// SQLite database path, relative to the project root
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

fn default_database() -> PathBuf {
    PathBuf::from("agents/sessions.db")
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessiondConfig {
    /// Project the index records are attached to when none is given explicitly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub index: IndexConfig,
}

impl SessiondConfig {
    /// Load config from agents/sessiond.toml, falling back to defaults when absent
    pub fn load(project_root: &Path) -> anyhow::Result<Self> {
        let config_path = project_root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: SessiondConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid config in {}", config_path.display()))?;
        Ok(config)
    }

    pub fn save(&self, project_root: &Path) -> anyhow::Result<()> {
        let config_path = project_root.join(CONFIG_FILE);
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Absolute path of the index database
    pub fn database_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.index.database)
    }
}
