//! Test helpers: a scripted execution backend and engine wiring.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tollgate_core::ids::EnvironmentId;
use tollgate_core::pipeline::Pipeline;
use tollgate_core::ports::{
    CommandOutput, CommandSpec, EnvironmentHandle, EnvironmentSpec, ExecutionBackend,
};
use tollgate_core::{Error, Result};
use tollgate_runner::StepExecutor;
use tollgate_scheduler::{Engine, MemorySink};

#[derive(Default)]
struct State {
    /// Live environments and the job that owns each.
    live: HashMap<EnvironmentId, String>,
    max_live: usize,
    provisioned: Vec<String>,
    released: Vec<String>,
    executed: Vec<(String, String)>,
}

/// Backend that never spawns processes.
///
/// Commands are interpreted: `exit N` exits with `N`, `sleep N` waits `N`
/// seconds on the tokio clock then exits 0, anything else exits 0.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<State>>,
    unprovisionable: Arc<HashSet<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to provision environments for the named jobs.
    pub fn failing_provision(jobs: &[&str]) -> Self {
        Self {
            state: Arc::default(),
            unprovisionable: Arc::new(jobs.iter().map(|j| j.to_string()).collect()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Jobs in provisioning order.
    pub fn provisioned(&self) -> Vec<String> {
        self.state().provisioned.clone()
    }

    pub fn released(&self) -> Vec<String> {
        self.state().released.clone()
    }

    /// Environments provisioned but not yet released.
    pub fn live(&self) -> usize {
        self.state().live.len()
    }

    /// Highest number of simultaneously live environments.
    pub fn max_live(&self) -> usize {
        self.state().max_live
    }

    /// Commands executed for `job`, in order.
    pub fn commands_for(&self, job: &str) -> Vec<String> {
        self.state()
            .executed
            .iter()
            .filter(|(j, _)| j == job)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    async fn provision(&self, spec: &EnvironmentSpec) -> Result<EnvironmentHandle> {
        if self.unprovisionable.contains(&spec.job_name) {
            return Err(Error::EnvironmentProvision(format!(
                "no capacity for {}",
                spec.job_name
            )));
        }

        let id = EnvironmentId::new();
        let mut state = self.state();
        state.live.insert(id, spec.job_name.clone());
        state.max_live = state.max_live.max(state.live.len());
        state.provisioned.push(spec.job_name.clone());
        Ok(EnvironmentHandle { id, workdir: None })
    }

    async fn execute(
        &self,
        handle: &EnvironmentHandle,
        command: &CommandSpec,
    ) -> Result<CommandOutput> {
        {
            let mut state = self.state();
            let job = state
                .live
                .get(&handle.id)
                .cloned()
                .ok_or_else(|| Error::Internal(format!("Unknown environment: {}", handle.id)))?;
            state.executed.push((job, command.command.clone()));
        }

        let exit_code = match command.command.split_once(' ') {
            Some(("exit", code)) => code
                .trim()
                .parse()
                .map_err(|_| Error::Internal(format!("bad exit code: {}", code)))?,
            Some(("sleep", secs)) => {
                let secs: u64 = secs
                    .trim()
                    .parse()
                    .map_err(|_| Error::Internal(format!("bad duration: {}", secs)))?;
                tokio::time::sleep(Duration::from_secs(secs)).await;
                0
            }
            _ => 0,
        };

        Ok(CommandOutput {
            exit_code,
            output: String::new(),
        })
    }

    async fn release(&self, handle: EnvironmentHandle) -> Result<()> {
        let mut state = self.state();
        let job = state
            .live
            .remove(&handle.id)
            .ok_or_else(|| Error::Internal(format!("Unknown environment: {}", handle.id)))?;
        state.released.push(job);
        Ok(())
    }
}

/// Engine running `pipeline` on `backend`, publishing to the returned sink.
pub fn engine_for(pipeline: Pipeline, backend: ScriptedBackend) -> (Engine, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let executor = StepExecutor::new(Arc::new(backend));
    let engine = Engine::new(pipeline, Arc::new(executor))
        .unwrap_or_else(|e| panic!("fixture pipeline is invalid: {}", e))
        .with_sink(sink.clone());
    (engine, sink)
}
