use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use vigil::{Severity, StageId};

fn default_threshold() -> Severity {
    Severity::Medium
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_concurrency() -> usize {
    4
}

/// One configured scan stage: which external tool to run and when its
/// findings fail the stage.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    pub stage: StageId,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_threshold")]
    pub threshold: Severity,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Where alerts go. Absent means alerting is disabled for this config.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
}

/// The whole run configuration. Relative paths are resolved against the
/// directory containing the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub policy: PathBuf,
    pub artifacts: PathBuf,
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub tracker: Option<TrackerConfig>,
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: RunConfig =
            serde_yaml::from_str(&text).context("failed to parse run configuration")?;

        if let Some(dir) = path.parent() {
            config.policy = resolve(dir, &config.policy);
            config.artifacts = resolve(dir, &config.artifacts);
        }
        Ok(config)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
