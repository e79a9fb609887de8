//! Concurrent job dispatch.
//!
//! Runnable jobs are spawned onto a `JoinSet` as soon as every job they
//! need has passed, bounded by an optional semaphore. Results come back in
//! declaration order regardless of completion order.

use crate::graph::{JobPlan, PlanDecision};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tollgate_core::pipeline::JobDefinition;
use tollgate_core::ports::{CancelSignal, JobRunner};
use tollgate_core::result::{FailureReason, JobResult, JobStatus};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherConfig {
    /// Maximum jobs in flight; `None` is unbounded.
    pub max_parallel: Option<usize>,
}

pub struct Dispatcher {
    runner: Arc<dyn JobRunner>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(runner: Arc<dyn JobRunner>, config: DispatcherConfig) -> Self {
        Self { runner, config }
    }

    /// Run every planned job and return one result per job in plan order.
    pub async fn run(&self, plan: Vec<JobPlan>, cancel: CancelSignal) -> Vec<JobResult> {
        let order: Vec<String> = plan.iter().map(|p| p.job.name.clone()).collect();
        let mut results: HashMap<String, JobResult> = HashMap::new();
        let mut pending: Vec<Arc<JobDefinition>> = Vec::new();

        for entry in plan {
            match entry.decision {
                PlanDecision::Run => pending.push(entry.job),
                PlanDecision::Skip(reason) => {
                    debug!(job = %entry.job.name, reason = %reason, "Job skipped");
                    results.insert(
                        entry.job.name.clone(),
                        JobResult::skipped(entry.job.name.clone(), reason),
                    );
                }
            }
        }

        let semaphore = self
            .config
            .max_parallel
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        let mut join_set: JoinSet<JobResult> = JoinSet::new();
        let mut running: HashMap<Id, String> = HashMap::new();
        let mut started: HashSet<String> = HashSet::new();

        loop {
            if cancel.is_cancelled() {
                for job in pending.drain(..) {
                    warn!(job = %job.name, "Job cancelled before start");
                    results.insert(
                        job.name.clone(),
                        JobResult::aborted(
                            job.name.clone(),
                            JobStatus::Cancelled,
                            FailureReason::Cancelled,
                        ),
                    );
                }
            }

            let mut still_pending = Vec::with_capacity(pending.len());
            for job in pending.drain(..) {
                match readiness(&job, &results) {
                    Readiness::Waiting => still_pending.push(job),
                    Readiness::Blocked(dep) => {
                        info!(
                            job = %job.name,
                            dependency = %dep,
                            "Job skipped, dependency did not pass"
                        );
                        results.insert(
                            job.name.clone(),
                            JobResult::skipped(
                                job.name.clone(),
                                FailureReason::DependencyFailed { job: dep },
                            ),
                        );
                    }
                    Readiness::Ready => {
                        info!(job = %job.name, "Dispatching job");
                        started.insert(job.name.clone());
                        let name = job.name.clone();
                        let handle = join_set.spawn(run_one(
                            Arc::clone(&self.runner),
                            job,
                            semaphore.clone(),
                            cancel.clone(),
                        ));
                        running.insert(handle.id(), name);
                    }
                }
            }
            pending = still_pending;

            if join_set.is_empty() {
                break;
            }

            match join_set.join_next_with_id().await {
                Some(Ok((id, result))) => {
                    running.remove(&id);
                    info!(job = %result.job_name, status = %result.status, "Job finished");
                    results.insert(result.job_name.clone(), result);
                }
                Some(Err(e)) => {
                    let name = running.remove(&e.id()).unwrap_or_default();
                    error!(job = %name, error = %e, "Job task failed");
                    results.insert(
                        name.clone(),
                        JobResult::aborted(
                            name,
                            JobStatus::Failed,
                            FailureReason::StepError {
                                message: e.to_string(),
                            },
                        ),
                    );
                }
                None => break,
            }
        }

        // Unreachable for an acyclic graph; keeps every job accounted for.
        for job in pending {
            results.insert(
                job.name.clone(),
                JobResult::skipped(
                    job.name.clone(),
                    FailureReason::DependencyFailed {
                        job: job.needs.first().cloned().unwrap_or_default(),
                    },
                ),
            );
        }

        debug!(dispatched = started.len(), total = order.len(), "Dispatch complete");

        order
            .into_iter()
            .filter_map(|name| results.remove(&name))
            .collect()
    }
}

enum Readiness {
    Ready,
    Waiting,
    Blocked(String),
}

fn readiness(job: &JobDefinition, results: &HashMap<String, JobResult>) -> Readiness {
    let mut waiting = false;
    for dep in &job.needs {
        match results.get(dep) {
            Some(r) if r.status == JobStatus::Passed => {}
            Some(_) => return Readiness::Blocked(dep.clone()),
            None => waiting = true,
        }
    }
    if waiting {
        Readiness::Waiting
    } else {
        Readiness::Ready
    }
}

async fn run_one(
    runner: Arc<dyn JobRunner>,
    job: Arc<JobDefinition>,
    semaphore: Option<Arc<Semaphore>>,
    mut cancel: CancelSignal,
) -> JobResult {
    let _permit = match semaphore {
        Some(sem) => {
            let acquired = tokio::select! {
                permit = sem.acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => None,
            };
            match acquired {
                Some(permit) => Some(permit),
                None => {
                    return JobResult::aborted(
                        job.name.clone(),
                        JobStatus::Cancelled,
                        FailureReason::Cancelled,
                    );
                }
            }
        }
        None => None,
    };

    if cancel.is_cancelled() {
        return JobResult::aborted(job.name.clone(), JobStatus::Cancelled, FailureReason::Cancelled);
    }

    runner.run_job(&job, cancel).await
}
