//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the gating/dispatch core and
//! external adapters: the execution backend that runs commands, the job
//! runner the dispatcher hands jobs to, and the sinks that receive results.

use crate::ids::EnvironmentId;
use crate::pipeline::JobDefinition;
use crate::result::{JobResult, RunResult};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::watch;

/// What a job asks of its execution environment.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSpec {
    pub job_name: String,
    pub image: Option<String>,
    pub env: BTreeMap<String, String>,
}

/// An exclusively owned, provisioned environment. `release` consumes it.
#[derive(Debug)]
pub struct EnvironmentHandle {
    pub id: EnvironmentId,
    pub workdir: Option<PathBuf>,
}

/// A resolved command to run inside an environment.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub label: String,
    pub command: String,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
}

/// Provides process execution.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Provision a fresh environment.
    async fn provision(&self, spec: &EnvironmentSpec) -> Result<EnvironmentHandle>;

    /// Execute a command, returning its exit code and captured output.
    async fn execute(&self, handle: &EnvironmentHandle, command: &CommandSpec)
    -> Result<CommandOutput>;

    /// Tear the environment down.
    async fn release(&self, handle: EnvironmentHandle) -> Result<()>;
}

/// Runs one job to completion.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, job: &JobDefinition, cancel: CancelSignal) -> JobResult;
}

/// Receives finished runs. Publishing the same event twice must not
/// duplicate the report.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn publish(&self, result: &RunResult) -> Result<()>;
}

/// Receiving side of a run-level cancellation.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

/// Sending side of a run-level cancellation.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelSignal(rx))
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal(self.0.subscribe())
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the
    /// handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
