use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Orchestrator configuration, loaded from a YAML file.
/// All fields have defaults so a partial (or absent) config file works.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Base URL of the external execution service.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Stage-status poll cadence in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Pending-approvals poll cadence in milliseconds. Independent of the
    /// stage poll.
    #[serde(default = "default_poll_interval_ms")]
    pub approval_poll_interval_ms: u64,
    /// Delay before a sub-task breakdown starts executing on its own.
    #[serde(default = "default_auto_start_delay_ms")]
    pub auto_start_delay_ms: u64,
    /// Immediate re-attempts after a failed poll fetch within one cycle.
    #[serde(default = "default_poll_retry_limit")]
    pub poll_retry_limit: u32,
    /// Directory for the structured JSONL event log. Defaults to
    /// `~/.resolution-agent/logs`.
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
            approval_poll_interval_ms: default_poll_interval_ms(),
            auto_start_delay_ms: default_auto_start_delay_ms(),
            poll_retry_limit: default_poll_retry_limit(),
            logs_dir: None,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8787".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_auto_start_delay_ms() -> u64 {
    3000
}

fn default_poll_retry_limit() -> u32 {
    1
}

impl OrchestratorConfig {
    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Loads the config file when present, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn approval_poll_interval(&self) -> Duration {
        Duration::from_millis(self.approval_poll_interval_ms)
    }

    pub fn auto_start_delay(&self) -> Duration {
        Duration::from_millis(self.auto_start_delay_ms)
    }

    /// Resolved logs directory.
    pub fn resolved_logs_dir(&self) -> PathBuf {
        if let Some(dir) = &self.logs_dir {
            return dir.clone();
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".resolution-agent")
            .join("logs")
    }
}
