//! CLI configuration management.

use anyhow::{Context, anyhow, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// CLI configuration. Command-line flags take precedence.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CliConfig {
    /// Default job parallelism for `run`.
    #[serde(default)]
    pub max_parallel: Option<usize>,
    /// Parent directory for job workspaces.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Directory receiving one JSON report per run.
    #[serde(default)]
    pub report_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl CliConfig {
    /// Load configuration from file.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> anyhow::Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "tollgate", "tollgate")
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Set a configuration value. An empty value clears optional keys.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let value = value.trim();
        match key {
            "max_parallel" => {
                self.max_parallel = if value.is_empty() {
                    None
                } else {
                    let n: usize = value
                        .parse()
                        .with_context(|| format!("Invalid max_parallel: {}", value))?;
                    if n == 0 {
                        bail!("max_parallel must be at least 1");
                    }
                    Some(n)
                };
            }
            "workspace_root" => self.workspace_root = non_empty(value).map(PathBuf::from),
            "report_dir" => self.report_dir = non_empty(value).map(PathBuf::from),
            "log_format" => {
                self.log_format = LogFormat::from_str(value, true)
                    .map_err(|_| anyhow!("Invalid log format: {}", value))?;
            }
            _ => bail!("Unknown config key: {}", key),
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() { None } else { Some(value) }
}
