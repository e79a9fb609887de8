//! Test fixtures for pipelines, events and trigger payloads.

use serde_json::{Value, json};
use tollgate_core::condition::GateCondition;
use tollgate_core::event::{Event, EventKind};
use tollgate_core::pipeline::{JobDefinition, Pipeline, PipelineConfig, TriggerRule};
use tollgate_scheduler::RawTrigger;

/// Factory for test pipelines.
pub struct PipelineFixture;

impl PipelineFixture {
    /// Push to `main` plus the pull-request lifecycle, with draft-gated
    /// `build-test` and `clippy` jobs.
    pub fn gated() -> Pipeline {
        Self::with_jobs(vec![
            JobDefinition::new(
                "build-test",
                GateCondition::not_draft(),
                &[("build", "exit 0"), ("test", "exit 0")],
            ),
            JobDefinition::new(
                "clippy",
                GateCondition::not_draft(),
                &[("clippy", "exit 0")],
            ),
        ])
    }

    /// The gated triggers around arbitrary jobs.
    pub fn with_jobs(jobs: Vec<JobDefinition>) -> Pipeline {
        Pipeline {
            name: "ci".to_string(),
            triggers: vec![
                TriggerRule::new([EventKind::Push], vec!["main".to_string()]),
                TriggerRule::new(EventKind::PULL_REQUEST, vec![]),
            ],
            jobs,
            concurrency: None,
            max_parallel: None,
        }
    }

    /// Parse and compile a YAML pipeline.
    pub fn from_yaml(yaml: &str) -> Pipeline {
        PipelineConfig::from_yaml_str(yaml)
            .and_then(|c| c.compile())
            .unwrap_or_else(|e| panic!("fixture pipeline is invalid: {}", e))
    }
}

/// Factory for canonical events.
pub struct EventFixture;

impl EventFixture {
    pub fn push_main() -> Event {
        Event::push("main").with_sha("a1b2c3")
    }

    pub fn push_feature() -> Event {
        Event::push("feature-x")
    }

    pub fn draft_pull_request() -> Event {
        Event::pull_request(EventKind::PullRequestSynchronized, "feature-y", true)
    }

    pub fn ready_pull_request() -> Event {
        Event::pull_request(EventKind::PullRequestReadyForReview, "main", false)
    }
}

/// Factory for raw trigger payloads.
pub struct TriggerFixture;

impl TriggerFixture {
    pub fn canonical(event: &str, branch: &str, draft: bool) -> RawTrigger {
        RawTrigger::new(json!({
            "event": event,
            "branch": branch,
            "draft": draft,
        }))
    }

    pub fn webhook_push(branch: &str, sha: &str) -> RawTrigger {
        RawTrigger::new(json!({
            "ref": format!("refs/heads/{}", branch),
            "after": sha,
        }))
        .with_event_name("push")
    }

    pub fn webhook_pull_request(action: &str, base: &str, draft: bool) -> RawTrigger {
        RawTrigger::new(Self::pull_request_body(action, base, draft)).with_event_name("pull_request")
    }

    pub fn pull_request_body(action: &str, base: &str, draft: bool) -> Value {
        json!({
            "action": action,
            "number": 42,
            "pull_request": {
                "draft": draft,
                "base": { "ref": base },
                "head": { "ref": "feature-y", "sha": "d4e5f6" },
            },
        })
    }
}
