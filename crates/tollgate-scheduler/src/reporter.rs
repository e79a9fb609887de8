//! Run result aggregation.
//!
//! A run whose jobs were all skipped is `Passed` even though nothing
//! executed; a draft pull request therefore reports green.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tollgate_core::Result;
use tollgate_core::event::Event;
use tollgate_core::ports::ReportSink;
use tollgate_core::result::{JobResult, RunResult, RunStatus};
use tracing::{info, warn};

/// Aggregate job results into the terminal run record. Pure.
pub fn report(event: &Event, admitted: bool, job_results: &[JobResult]) -> RunResult {
    let job_results = if admitted {
        job_results.to_vec()
    } else {
        Vec::new()
    };

    let status = if job_results.iter().any(|r| r.status.is_failure()) {
        RunStatus::Failed
    } else {
        RunStatus::Passed
    };

    RunResult {
        event: event.clone(),
        admitted,
        status,
        job_results,
    }
}

/// Keeps the latest report per event in memory.
#[derive(Default)]
pub struct MemorySink {
    reports: RwLock<HashMap<String, RunResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, event: &Event) -> Option<RunResult> {
        self.reports.read().await.get(&event.idempotency_key()).cloned()
    }

    pub async fn len(&self) -> usize {
        self.reports.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.reports.read().await.is_empty()
    }
}

#[async_trait]
impl ReportSink for MemorySink {
    async fn publish(&self, result: &RunResult) -> Result<()> {
        self.reports
            .write()
            .await
            .insert(result.event.idempotency_key(), result.clone());
        Ok(())
    }
}

/// Emits one structured log line per run and one per non-passing job.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl ReportSink for LogSink {
    async fn publish(&self, result: &RunResult) -> Result<()> {
        info!(
            event = %result.event,
            admitted = result.admitted,
            status = ?result.status,
            jobs = result.job_results.len(),
            "Run finished"
        );
        for job in result.failures() {
            warn!(
                job = %job.job_name,
                status = %job.status,
                step_index = ?job.failing_step_index,
                step = ?job.failing_step_label,
                reason = ?job.reason,
                "Job did not pass"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tollgate_core::event::EventKind;
    use tollgate_core::result::{FailureReason, JobStatus};

    fn failed(name: &str, status: JobStatus) -> JobResult {
        JobResult::stopped_at(
            name,
            status,
            1,
            "test",
            FailureReason::StepExited { exit_code: 101 },
            vec![],
        )
    }

    #[test]
    fn test_not_admitted_drops_results() {
        let result = report(
            &Event::push("feature-x"),
            false,
            &[JobResult::passed("build-test", vec![])],
        );
        assert!(!result.admitted);
        assert!(result.job_results.is_empty());
        assert_eq!(result.status, RunStatus::Passed);
    }

    #[test]
    fn test_any_failure_fails_the_run() {
        for status in [JobStatus::Failed, JobStatus::TimedOut, JobStatus::Cancelled] {
            let result = report(
                &Event::push("main"),
                true,
                &[JobResult::passed("build-test", vec![]), failed("clippy", status)],
            );
            assert_eq!(result.status, RunStatus::Failed, "{:?}", status);
        }
    }

    #[test]
    fn test_completion_order_does_not_matter() {
        let a = JobResult::passed("build-test", vec![]);
        let b = failed("clippy", JobStatus::Failed);
        let event = Event::push("main");
        assert_eq!(
            report(&event, true, &[a.clone(), b.clone()]).status,
            report(&event, true, &[b, a]).status
        );
    }

    #[test]
    fn test_all_skipped_is_passed() {
        let event = Event::pull_request(EventKind::PullRequestSynchronized, "feature-y", true);
        let result = report(
            &event,
            true,
            &[
                JobResult::skipped("build-test", FailureReason::ConditionUnmet),
                JobResult::skipped("clippy", FailureReason::ConditionUnmet),
            ],
        );
        assert_eq!(result.status, RunStatus::Passed);
        assert_eq!(result.executed().count(), 0);
    }

    #[test]
    fn test_report_is_idempotent() {
        let event = Event::push("main").with_sha("abc");
        let jobs = [JobResult::passed("a", vec![]), failed("b", JobStatus::TimedOut)];
        let first = report(&event, true, &jobs);
        let second = report(&event, true, &jobs);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_memory_sink_is_idempotent_per_event() {
        let sink = MemorySink::new();
        let event = Event::push("main").with_delivery_id("d-1");
        let result = report(&event, true, &[JobResult::passed("a", vec![])]);

        sink.publish(&result).await.unwrap();
        sink.publish(&result).await.unwrap();

        assert_eq!(sink.len().await, 1);
        assert_eq!(sink.get(&event).await, Some(result));
    }
}
