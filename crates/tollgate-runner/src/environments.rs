//! Host execution backend.
//!
//! Each provisioned environment is a fresh scratch directory on the host.
//! Commands run through `sh -c` inside it and the directory is removed on
//! release.

use crate::shell::ShellCommand;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tollgate_core::ids::EnvironmentId;
use tollgate_core::ports::{
    CommandOutput, CommandSpec, EnvironmentHandle, EnvironmentSpec, ExecutionBackend,
};
use tollgate_core::{Error, Result};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct HostBackendConfig {
    /// Parent of per-job scratch directories. System temp dir if unset.
    pub workspace_root: Option<PathBuf>,
    pub shell: String,
}

impl Default for HostBackendConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            shell: "sh".to_string(),
        }
    }
}

struct HostEnvironment {
    dir: TempDir,
    env: BTreeMap<String, String>,
}

/// Runs jobs directly on the host.
pub struct HostBackend {
    config: HostBackendConfig,
    environments: Mutex<HashMap<EnvironmentId, HostEnvironment>>,
}

impl HostBackend {
    pub fn new(config: HostBackendConfig) -> Self {
        Self {
            config,
            environments: Mutex::new(HashMap::new()),
        }
    }

    /// Number of environments provisioned and not yet released.
    pub async fn active(&self) -> usize {
        self.environments.lock().await.len()
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new(HostBackendConfig::default())
    }
}

/// Job names are free-form; keep them to one path component.
fn path_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl ExecutionBackend for HostBackend {
    async fn provision(&self, spec: &EnvironmentSpec) -> Result<EnvironmentHandle> {
        if let Some(image) = &spec.image {
            warn!(job = %spec.job_name, image = %image, "Host backend ignores job image");
        }

        let prefix = format!("tollgate-{}-", path_safe(&spec.job_name));
        let dir = match &self.config.workspace_root {
            Some(root) => {
                tokio::fs::create_dir_all(root).await.map_err(|e| {
                    Error::EnvironmentProvision(format!("Failed to create workspace root: {}", e))
                })?;
                tempfile::Builder::new().prefix(&prefix).tempdir_in(root)
            }
            None => tempfile::Builder::new().prefix(&prefix).tempdir(),
        }
        .map_err(|e| Error::EnvironmentProvision(format!("Failed to create workspace: {}", e)))?;

        let id = EnvironmentId::new();
        let workdir = dir.path().to_path_buf();
        info!(env = %id, job = %spec.job_name, workspace = %workdir.display(), "Provisioned host environment");

        self.environments.lock().await.insert(
            id,
            HostEnvironment {
                dir,
                env: spec.env.clone(),
            },
        );

        Ok(EnvironmentHandle {
            id,
            workdir: Some(workdir),
        })
    }

    async fn execute(
        &self,
        handle: &EnvironmentHandle,
        command: &CommandSpec,
    ) -> Result<CommandOutput> {
        let (workdir, mut env) = {
            let environments = self.environments.lock().await;
            let environment = environments.get(&handle.id).ok_or_else(|| {
                Error::Internal(format!("Unknown environment: {}", handle.id))
            })?;
            (environment.dir.path().to_path_buf(), environment.env.clone())
        };
        env.extend(command.env.clone());

        let shell = ShellCommand {
            shell: self.config.shell.clone(),
            command: command.command.clone(),
            workdir,
            env,
            label: command.label.clone(),
        };
        shell.run().await
    }

    async fn release(&self, handle: EnvironmentHandle) -> Result<()> {
        let environment = self.environments.lock().await.remove(&handle.id);
        match environment {
            Some(environment) => {
                info!(env = %handle.id, "Releasing host environment");
                environment.dir.close()?;
                Ok(())
            }
            None => Err(Error::Internal(format!(
                "Unknown environment: {}",
                handle.id
            ))),
        }
    }
}
