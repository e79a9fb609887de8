//! Job execution.
//!
//! A job runs inside one freshly provisioned environment. Steps run in
//! declaration order and the first failure stops the job. The job timeout
//! and cancellation cover provisioning as well as the steps. The environment
//! is released on every path out of [`StepExecutor::run_job`].

use crate::actions::{ActionRegistry, ResolvedAction};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tollgate_core::pipeline::{JobDefinition, StepAction, StepDefinition};
use tollgate_core::ports::{
    CancelSignal, CommandSpec, EnvironmentHandle, EnvironmentSpec, ExecutionBackend, JobRunner,
};
use tollgate_core::result::{FailureReason, JobResult, JobStatus, StepRecord};
use tracing::{debug, error, info, warn};

/// Runs jobs against an [`ExecutionBackend`].
pub struct StepExecutor {
    backend: Arc<dyn ExecutionBackend>,
    actions: ActionRegistry,
}

/// Where the step loop ended up.
enum StepsOutcome {
    Passed,
    Stopped {
        index: usize,
        label: String,
        reason: FailureReason,
    },
    /// Timed out or cancelled while a step was running.
    Interrupted(FailureReason),
}

/// Progress visible after the step loop is interrupted.
#[derive(Default)]
struct Progress {
    current: usize,
    records: Vec<StepRecord>,
}

impl StepExecutor {
    pub fn new(backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            backend,
            actions: ActionRegistry::new(),
        }
    }

    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    async fn run_steps(
        &self,
        job: &JobDefinition,
        handle: &EnvironmentHandle,
        progress: &mut Progress,
    ) -> StepsOutcome {
        for (index, step) in job.steps.iter().enumerate() {
            progress.current = index;
            info!(job = %job.name, step = %step.label, index, "Executing step");

            let command = match self.resolve(step) {
                Ok(Some(command)) => command,
                Ok(None) => {
                    progress.records.push(StepRecord {
                        label: step.label.clone(),
                        exit_code: 0,
                        duration_ms: 0,
                    });
                    continue;
                }
                Err(reason) => {
                    error!(job = %job.name, step = %step.label, reason = %reason, "Step could not be resolved");
                    return StepsOutcome::Stopped {
                        index,
                        label: step.label.clone(),
                        reason,
                    };
                }
            };

            let start = Instant::now();
            let output = self.backend.execute(handle, &command).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match output {
                Ok(output) => {
                    progress.records.push(StepRecord {
                        label: step.label.clone(),
                        exit_code: output.exit_code,
                        duration_ms,
                    });
                    if output.exit_code != 0 {
                        error!(job = %job.name, step = %step.label, exit_code = output.exit_code, "Step failed");
                        return StepsOutcome::Stopped {
                            index,
                            label: step.label.clone(),
                            reason: FailureReason::StepExited {
                                exit_code: output.exit_code,
                            },
                        };
                    }
                    info!(job = %job.name, step = %step.label, duration_ms, "Step completed successfully");
                }
                Err(e) => {
                    error!(job = %job.name, step = %step.label, error = %e, "Step errored");
                    return StepsOutcome::Stopped {
                        index,
                        label: step.label.clone(),
                        reason: FailureReason::StepError {
                            message: e.to_string(),
                        },
                    };
                }
            }
        }
        StepsOutcome::Passed
    }

    /// Release an environment whose provisioning outlived the job.
    fn reap(&self, job: &str, provisioning: JoinHandle<tollgate_core::Result<EnvironmentHandle>>) {
        let backend = Arc::clone(&self.backend);
        let job = job.to_string();
        tokio::spawn(async move {
            if let Ok(Ok(handle)) = provisioning.await {
                debug!(job = %job, env = %handle.id, "Releasing environment provisioned after interruption");
                if let Err(e) = backend.release(handle).await {
                    warn!(job = %job, error = %e, "Failed to release environment");
                }
            }
        });
    }

    /// `Ok(None)` means the step has nothing to execute.
    fn resolve(&self, step: &StepDefinition) -> Result<Option<CommandSpec>, FailureReason> {
        let (command, mut env) = match &step.action {
            StepAction::Command(command) => (command.clone(), BTreeMap::new()),
            StepAction::Uses { action, with } => match self.actions.resolve(action, with) {
                Ok(ResolvedAction::Noop) => return Ok(None),
                Ok(ResolvedAction::Command { command, env }) => (command, env),
                Err(e) => {
                    return Err(FailureReason::ActionResolution {
                        message: e.to_string(),
                    });
                }
            },
        };
        env.extend(step.env.clone());

        Ok(Some(CommandSpec {
            label: step.label.clone(),
            command,
            env,
        }))
    }
}

async fn deadline(timeout_minutes: Option<u32>) {
    match timeout_minutes {
        Some(minutes) => tokio::time::sleep(Duration::from_secs(u64::from(minutes) * 60)).await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl JobRunner for StepExecutor {
    async fn run_job(&self, job: &JobDefinition, mut cancel: CancelSignal) -> JobResult {
        if cancel.is_cancelled() {
            return JobResult::aborted(job.name.clone(), JobStatus::Cancelled, FailureReason::Cancelled);
        }

        let spec = EnvironmentSpec {
            job_name: job.name.clone(),
            image: job.image.clone(),
            env: job.env.clone(),
        };

        // The job's time budget includes waiting for its environment.
        let timer = deadline(job.timeout_minutes);
        tokio::pin!(timer);

        let mut provisioning = {
            let backend = Arc::clone(&self.backend);
            tokio::spawn(async move { backend.provision(&spec).await })
        };
        let provisioned = tokio::select! {
            joined = &mut provisioning => {
                let provisioned = match joined {
                    Ok(provisioned) => provisioned.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                provisioned.map_err(|message| {
                    error!(job = %job.name, error = %message, "Failed to provision environment");
                    (JobStatus::Failed, FailureReason::Provision { message })
                })
            }
            _ = &mut timer => {
                let minutes = job.timeout_minutes.unwrap_or_default();
                warn!(job = %job.name, minutes, "Job timed out awaiting its environment");
                Err((JobStatus::TimedOut, FailureReason::Timeout { minutes }))
            }
            _ = cancel.cancelled() => {
                warn!(job = %job.name, "Job cancelled awaiting its environment");
                Err((JobStatus::Cancelled, FailureReason::Cancelled))
            }
        };
        let handle = match provisioned {
            Ok(handle) => handle,
            Err((status, reason)) => {
                if !matches!(reason, FailureReason::Provision { .. }) {
                    self.reap(&job.name, provisioning);
                }
                return JobResult::aborted(job.name.clone(), status, reason);
            }
        };

        info!(job = %job.name, env = %handle.id, steps = job.steps.len(), "Starting job execution");
        let mut progress = Progress::default();

        let outcome = tokio::select! {
            outcome = self.run_steps(job, &handle, &mut progress) => outcome,
            _ = &mut timer => {
                let minutes = job.timeout_minutes.unwrap_or_default();
                warn!(job = %job.name, minutes, "Job timed out");
                StepsOutcome::Interrupted(FailureReason::Timeout { minutes })
            }
            _ = cancel.cancelled() => {
                warn!(job = %job.name, "Job cancelled");
                StepsOutcome::Interrupted(FailureReason::Cancelled)
            }
        };

        if let Err(e) = self.backend.release(handle).await {
            warn!(job = %job.name, error = %e, "Failed to release environment");
        }

        match outcome {
            StepsOutcome::Passed => {
                info!(job = %job.name, "Job passed");
                JobResult::passed(job.name.clone(), progress.records)
            }
            StepsOutcome::Stopped {
                index,
                label,
                reason,
            } => JobResult::stopped_at(
                job.name.clone(),
                JobStatus::Failed,
                index,
                label,
                reason,
                progress.records,
            ),
            StepsOutcome::Interrupted(reason) => {
                let status = match reason {
                    FailureReason::Timeout { .. } => JobStatus::TimedOut,
                    _ => JobStatus::Cancelled,
                };
                let label = job
                    .steps
                    .get(progress.current)
                    .map(|s| s.label.clone())
                    .unwrap_or_default();
                JobResult::stopped_at(
                    job.name.clone(),
                    status,
                    progress.current,
                    label,
                    reason,
                    progress.records,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tollgate_core::condition::GateCondition;
    use tollgate_core::ids::EnvironmentId;
    use tollgate_core::pipeline::ActionRef;
    use tollgate_core::ports::{CommandOutput, cancel_pair};
    use tollgate_core::{Error, Result};

    /// Backend that interprets commands as `exit N` or `sleep N` (seconds).
    #[derive(Default)]
    struct FakeBackend {
        fail_provision: bool,
        /// Seconds each provisioning takes.
        provision_secs: u64,
        executed: Mutex<Vec<String>>,
        provisioned: AtomicUsize,
        released: AtomicUsize,
    }

    #[async_trait]
    impl ExecutionBackend for FakeBackend {
        async fn provision(&self, _spec: &EnvironmentSpec) -> Result<EnvironmentHandle> {
            if self.fail_provision {
                return Err(Error::EnvironmentProvision("no capacity".to_string()));
            }
            tokio::time::sleep(Duration::from_secs(self.provision_secs)).await;
            self.provisioned.fetch_add(1, Ordering::SeqCst);
            Ok(EnvironmentHandle {
                id: EnvironmentId::new(),
                workdir: None,
            })
        }

        async fn execute(
            &self,
            _handle: &EnvironmentHandle,
            command: &CommandSpec,
        ) -> Result<CommandOutput> {
            self.executed.lock().unwrap().push(command.command.clone());
            let exit_code = match command.command.split_once(' ') {
                Some(("exit", code)) => code.parse().unwrap(),
                Some(("sleep", secs)) => {
                    tokio::time::sleep(Duration::from_secs(secs.parse().unwrap())).await;
                    0
                }
                _ => 0,
            };
            Ok(CommandOutput {
                exit_code,
                output: String::new(),
            })
        }

        async fn release(&self, _handle: EnvironmentHandle) -> Result<()> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn job(steps: &[(&str, &str)]) -> JobDefinition {
        JobDefinition::new("build-test", GateCondition::not_draft(), steps)
    }

    fn executor(backend: &Arc<FakeBackend>) -> StepExecutor {
        StepExecutor::new(backend.clone())
    }

    #[tokio::test]
    async fn test_all_steps_pass() {
        let backend = Arc::new(FakeBackend::default());
        let result = executor(&backend)
            .run_job(&job(&[("build", "exit 0"), ("test", "exit 0")]), CancelSignal::never())
            .await;

        assert_eq!(result.status, JobStatus::Passed);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(backend.provisioned.load(Ordering::SeqCst), 1);
        assert_eq!(backend.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fail_fast() {
        let backend = Arc::new(FakeBackend::default());
        let result = executor(&backend)
            .run_job(
                &job(&[("a", "exit 0"), ("b", "exit 2"), ("c", "exit 0")]),
                CancelSignal::never(),
            )
            .await;

        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.failing_step_index, Some(1));
        assert_eq!(result.failing_step_label.as_deref(), Some("b"));
        assert_eq!(result.reason, Some(FailureReason::StepExited { exit_code: 2 }));
        assert_eq!(*backend.executed.lock().unwrap(), vec!["exit 0", "exit 2"]);
        assert_eq!(backend.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_environment() {
        let backend = Arc::new(FakeBackend::default());
        let mut definition = job(&[("quick", "exit 0"), ("hang", "sleep 3600"), ("never", "exit 0")]);
        definition.timeout_minutes = Some(1);

        let result = executor(&backend)
            .run_job(&definition, CancelSignal::never())
            .await;

        assert_eq!(result.status, JobStatus::TimedOut);
        assert_eq!(result.failing_step_index, Some(1));
        assert_eq!(result.failing_step_label.as_deref(), Some("hang"));
        assert_eq!(result.reason, Some(FailureReason::Timeout { minutes: 1 }));
        assert_eq!(backend.released.load(Ordering::SeqCst), 1);
        assert_eq!(backend.executed.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_releases_environment() {
        let backend = Arc::new(FakeBackend::default());
        let (handle, signal) = cancel_pair();
        let exec = executor(&backend);
        let definition = job(&[("hang", "sleep 3600")]);

        let run = exec.run_job(&definition, signal);
        let cancel = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            handle.cancel();
        };
        let (result, ()) = tokio::join!(run, cancel);

        assert_eq!(result.status, JobStatus::Cancelled);
        assert_eq!(result.failing_step_index, Some(0));
        assert_eq!(backend.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provision_failure() {
        let backend = Arc::new(FakeBackend {
            fail_provision: true,
            ..Default::default()
        });
        let result = executor(&backend)
            .run_job(&job(&[("a", "exit 0")]), CancelSignal::never())
            .await;

        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.failing_step_index, None);
        assert!(matches!(result.reason, Some(FailureReason::Provision { .. })));
        assert!(backend.executed.lock().unwrap().is_empty());
        assert_eq!(backend.released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_action_fails_without_executing() {
        let backend = Arc::new(FakeBackend::default());
        let mut definition = job(&[("first", "exit 0")]);
        definition.steps.push(StepDefinition {
            label: "deploy".to_string(),
            action: StepAction::Uses {
                action: ActionRef::parse("acme/deploy@v1").unwrap(),
                with: BTreeMap::new(),
            },
            env: BTreeMap::new(),
        });

        let result = executor(&backend)
            .run_job(&definition, CancelSignal::never())
            .await;

        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.failing_step_index, Some(1));
        assert!(matches!(
            result.reason,
            Some(FailureReason::ActionResolution { .. })
        ));
        assert_eq!(backend.executed.lock().unwrap().len(), 1);
        assert_eq!(backend.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_checkout_is_recorded_but_not_executed() {
        let backend = Arc::new(FakeBackend::default());
        let mut definition = job(&[]);
        definition.steps.push(StepDefinition {
            label: "checkout".to_string(),
            action: StepAction::Uses {
                action: ActionRef::parse("actions/checkout@v4").unwrap(),
                with: BTreeMap::new(),
            },
            env: BTreeMap::new(),
        });

        let result = executor(&backend)
            .run_job(&definition, CancelSignal::never())
            .await;

        assert_eq!(result.status, JobStatus::Passed);
        assert_eq!(result.steps.len(), 1);
        assert!(backend.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_already_cancelled_never_provisions() {
        let backend = Arc::new(FakeBackend::default());
        let (handle, signal) = cancel_pair();
        handle.cancel();

        let result = executor(&backend)
            .run_job(&job(&[("a", "exit 0")]), signal)
            .await;

        assert_eq!(result.status, JobStatus::Cancelled);
        assert_eq!(backend.provisioned.load(Ordering::SeqCst), 0);
    }

    fn slow_backend(provision_secs: u64) -> Arc<FakeBackend> {
        Arc::new(FakeBackend {
            provision_secs,
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_covers_provisioning() {
        let backend = slow_backend(3600);
        let mut definition = job(&[("a", "exit 0")]);
        definition.timeout_minutes = Some(1);

        let start = Instant::now();
        let result = executor(&backend)
            .run_job(&definition, CancelSignal::never())
            .await;

        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(result.status, JobStatus::TimedOut);
        assert_eq!(result.failing_step_index, None);
        assert_eq!(result.reason, Some(FailureReason::Timeout { minutes: 1 }));
        assert!(backend.executed.lock().unwrap().is_empty());

        // The late environment is released once it arrives.
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(backend.provisioned.load(Ordering::SeqCst), 1);
        assert_eq!(backend.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_covers_provisioning() {
        let backend = slow_backend(3600);
        let (handle, signal) = cancel_pair();
        let exec = executor(&backend);
        let definition = job(&[("a", "exit 0")]);

        let start = Instant::now();
        let run = exec.run_job(&definition, signal);
        let cancel = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            handle.cancel();
        };
        let (result, ()) = tokio::join!(run, cancel);

        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(result.status, JobStatus::Cancelled);
        assert_eq!(result.reason, Some(FailureReason::Cancelled));
        assert!(backend.executed.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(backend.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provisioning_time_counts_against_timeout() {
        let backend = slow_backend(40);
        let mut definition = job(&[("work", "sleep 40")]);
        definition.timeout_minutes = Some(1);

        let result = executor(&backend)
            .run_job(&definition, CancelSignal::never())
            .await;

        assert_eq!(result.status, JobStatus::TimedOut);
        assert_eq!(result.failing_step_index, Some(0));
        assert_eq!(backend.released.load(Ordering::SeqCst), 1);
    }
}
