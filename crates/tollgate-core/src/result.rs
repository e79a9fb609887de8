//! Job and run outcome types.

use crate::event::Event;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Passed,
    Failed,
    Skipped,
    TimedOut,
    Cancelled,
}

impl JobStatus {
    /// Statuses that make the whole run fail.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::TimedOut | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Passed => "passed",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
            JobStatus::TimedOut => "timed out",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Why a job did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureReason {
    StepExited { exit_code: i32 },
    ActionResolution { message: String },
    StepError { message: String },
    Provision { message: String },
    Timeout { minutes: u32 },
    Cancelled,
    ConditionUnmet,
    DependencyFailed { job: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::StepExited { exit_code } => write!(f, "exited with code {}", exit_code),
            FailureReason::ActionResolution { message } => {
                write!(f, "action resolution failed: {}", message)
            }
            FailureReason::StepError { message } => write!(f, "step error: {}", message),
            FailureReason::Provision { message } => {
                write!(f, "environment provisioning failed: {}", message)
            }
            FailureReason::Timeout { minutes } => write!(f, "timed out after {} min", minutes),
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::ConditionUnmet => write!(f, "condition not met"),
            FailureReason::DependencyFailed { job } => write!(f, "dependency {} did not pass", job),
        }
    }
}

/// Record of one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct StepRecord {
    pub label: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Outcome of one job. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct JobResult {
    pub job_name: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_step_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_step_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
}

impl JobResult {
    pub fn passed(job_name: impl Into<String>, steps: Vec<StepRecord>) -> Self {
        Self {
            job_name: job_name.into(),
            status: JobStatus::Passed,
            failing_step_index: None,
            failing_step_label: None,
            reason: None,
            steps,
        }
    }

    pub fn skipped(job_name: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            job_name: job_name.into(),
            status: JobStatus::Skipped,
            failing_step_index: None,
            failing_step_label: None,
            reason: Some(reason),
            steps: vec![],
        }
    }

    /// A job that stopped at `index` (the step being run at the time).
    pub fn stopped_at(
        job_name: impl Into<String>,
        status: JobStatus,
        index: usize,
        label: impl Into<String>,
        reason: FailureReason,
        steps: Vec<StepRecord>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            status,
            failing_step_index: Some(index),
            failing_step_label: Some(label.into()),
            reason: Some(reason),
            steps,
        }
    }

    /// A job that never reached a step.
    pub fn aborted(job_name: impl Into<String>, status: JobStatus, reason: FailureReason) -> Self {
        Self {
            job_name: job_name.into(),
            status,
            failing_step_index: None,
            failing_step_label: None,
            reason: Some(reason),
            steps: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Passed => 0,
            RunStatus::Failed => 1,
        }
    }
}

/// Terminal record of one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct RunResult {
    pub event: Event,
    pub admitted: bool,
    pub status: RunStatus,
    pub job_results: Vec<JobResult>,
}

impl RunResult {
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    /// Jobs that actually ran (not skipped).
    pub fn executed(&self) -> impl Iterator<Item = &JobResult> {
        self.job_results
            .iter()
            .filter(|r| r.status != JobStatus::Skipped)
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobResult> {
        self.job_results.iter().filter(|r| r.status.is_failure())
    }
}
