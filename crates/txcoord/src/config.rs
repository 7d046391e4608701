//! Coordinator configuration, parsed from YAML.
//!
//! ```yaml
//! root_path: /appscale/apps
//! tx_timeout_secs: 30
//! lock_timeout_secs: 30
//! gc_interval_secs: 30
//! gc_poll_interval_millis: 1000
//! connect_timeout_millis: 5000
//! id_block_size: 10
//! max_create_attempts: 2
//! ```
//!
//! Every field is optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Namespace root; each application lives at `<root_path>/<app>`
    pub root_path: String,
    /// Age after which an unreleased transaction is rolled back by GC
    pub tx_timeout_secs: u64,
    /// Intended bound on lock hold time, enforced through `tx_timeout_secs`
    pub lock_timeout_secs: u64,
    /// Minimum time between GC passes for one application
    pub gc_interval_secs: u64,
    pub gc_poll_interval_millis: u64,
    pub connect_timeout_millis: u64,
    pub id_block_size: u64,
    /// Attempts for "create node, create missing parents, try again"
    pub max_create_attempts: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            root_path: "/appscale/apps".to_string(),
            tx_timeout_secs: 30,
            lock_timeout_secs: 30,
            gc_interval_secs: 30,
            gc_poll_interval_millis: 1000,
            connect_timeout_millis: 5000,
            id_block_size: 10,
            max_create_attempts: 2,
        }
    }
}

impl CoordinatorConfig {
    /// Load and validate configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).with_context(|| {
            format!("Failed to read config file: {}", path.as_ref().display())
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: CoordinatorConfig = serde_yaml_ng::from_str(content)
            .with_context(|| "Failed to parse coordinator configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.root_path.starts_with('/') || self.root_path.len() < 2 {
            anyhow::bail!("root_path must be an absolute, non-root path: {}", self.root_path);
        }
        if self.root_path.ends_with('/') {
            anyhow::bail!("root_path must not end with '/': {}", self.root_path);
        }
        if self.gc_poll_interval_millis == 0 {
            anyhow::bail!("gc_poll_interval_millis must be greater than 0");
        }
        if self.id_block_size == 0 {
            anyhow::bail!("id_block_size must be greater than 0");
        }
        if self.max_create_attempts < 2 {
            anyhow::bail!("max_create_attempts must be at least 2");
        }
        Ok(())
    }

    #[must_use]
    pub fn tx_timeout(&self) -> Duration {
        Duration::from_secs(self.tx_timeout_secs)
    }

    #[must_use]
    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    #[must_use]
    pub fn gc_poll_interval(&self) -> Duration {
        Duration::from_millis(self.gc_poll_interval_millis)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_millis)
    }
}
