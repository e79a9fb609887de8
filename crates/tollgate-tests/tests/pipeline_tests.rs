//! End-to-end gating and dispatch tests against the scripted backend.
//!
//! Run with: `cargo test -p tollgate-tests --test pipeline_tests`

use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use tollgate_core::Error;
use tollgate_core::condition::GateCondition;
use tollgate_core::event::{Event, EventKind};
use tollgate_core::pipeline::JobDefinition;
use tollgate_core::result::{FailureReason, JobStatus, RunResult, RunStatus};
use tollgate_scheduler::RawTrigger;
use tokio_test::{assert_err, assert_ok};
use tollgate_tests::{
    EventFixture, PipelineFixture, ScriptedBackend, TriggerFixture, engine_for, init_test_logging,
};

fn statuses(result: &RunResult) -> Vec<(String, JobStatus)> {
    result
        .job_results
        .iter()
        .map(|r| (r.job_name.clone(), r.status))
        .collect()
}

#[tokio::test]
async fn test_push_to_main_runs_both_jobs() {
    init_test_logging();
    let backend = ScriptedBackend::new();
    let (engine, sink) = engine_for(PipelineFixture::gated(), backend.clone());

    let raw = TriggerFixture::webhook_push("main", "a1b2c3");
    let result = assert_ok!(engine.handle(&raw).await);

    assert!(result.admitted);
    assert_eq!(result.status, RunStatus::Passed);
    assert_eq!(result.status.exit_code(), 0);
    assert_eq!(
        statuses(&result),
        vec![
            ("build-test".to_string(), JobStatus::Passed),
            ("clippy".to_string(), JobStatus::Passed),
        ]
    );
    assert_eq!(backend.provisioned().len(), 2);
    assert_eq!(backend.live(), 0);
    assert_eq!(sink.get(&result.event).await, Some(result));
}

#[tokio::test]
async fn test_draft_pull_request_skips_all_jobs() {
    let backend = ScriptedBackend::new();
    let (engine, _sink) = engine_for(PipelineFixture::gated(), backend.clone());

    let raw = TriggerFixture::canonical("pull_request_synchronized", "feature-y", true);
    let result = assert_ok!(engine.handle(&raw).await);

    assert!(result.admitted);
    assert_eq!(result.status, RunStatus::Passed);
    assert_eq!(
        statuses(&result),
        vec![
            ("build-test".to_string(), JobStatus::Skipped),
            ("clippy".to_string(), JobStatus::Skipped),
        ]
    );
    assert!(
        result
            .job_results
            .iter()
            .all(|r| r.reason == Some(FailureReason::ConditionUnmet))
    );
    assert!(backend.provisioned().is_empty());
}

#[tokio::test]
async fn test_ready_for_review_webhook_runs_jobs() {
    let backend = ScriptedBackend::new();
    let (engine, _sink) = engine_for(PipelineFixture::gated(), backend.clone());

    let raw = TriggerFixture::webhook_pull_request("ready_for_review", "main", false);
    let result = assert_ok!(engine.handle(&raw).await);

    assert_eq!(result.event.kind(), EventKind::PullRequestReadyForReview);
    assert_eq!(result.event.sha(), Some("d4e5f6"));
    assert_eq!(result.executed().count(), 2);
}

#[tokio::test]
async fn test_unmatched_branch_is_not_admitted() {
    let backend = ScriptedBackend::new();
    let (engine, sink) = engine_for(PipelineFixture::gated(), backend.clone());

    let result = engine.handle_event(EventFixture::push_feature()).await;

    assert!(!result.admitted);
    assert!(result.job_results.is_empty());
    assert_eq!(result.status, RunStatus::Passed);
    assert!(backend.provisioned().is_empty());
    assert_eq!(sink.len().await, 1);
}

#[tokio::test]
async fn test_malformed_triggers_are_rejected() {
    let (engine, sink) = engine_for(PipelineFixture::gated(), ScriptedBackend::new());

    let closed = TriggerFixture::webhook_pull_request("closed", "main", false);
    let tag = RawTrigger::new(json!({"ref": "refs/tags/v1.0.0"}))
        .with_event_name("push");

    for raw in [closed, tag] {
        let err = assert_err!(engine.handle(&raw).await);
        assert!(matches!(err, Error::MalformedTrigger(_)), "{:?}", err);
        assert!(err.is_fatal_to_run());
    }
    assert!(sink.is_empty().await);
}

#[tokio::test]
async fn test_fail_fast_stops_at_first_failing_step() {
    let pipeline = PipelineFixture::with_jobs(vec![JobDefinition::new(
        "build-test",
        GateCondition::not_draft(),
        &[("A", "exit 0"), ("B", "exit 1"), ("C", "exit 0")],
    )]);
    let backend = ScriptedBackend::new();
    let (engine, _sink) = engine_for(pipeline, backend.clone());

    let result = engine.handle_event(EventFixture::push_main()).await;
    let job = &result.job_results[0];

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.status.exit_code(), 1);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failing_step_index, Some(1));
    assert_eq!(job.failing_step_label.as_deref(), Some("B"));
    assert_eq!(backend.commands_for("build-test"), vec!["exit 0", "exit 1"]);
    assert_eq!(backend.released(), vec!["build-test"]);
}

#[tokio::test(start_paused = true)]
async fn test_failure_fails_run_regardless_of_completion_order() {
    for (build_delay, clippy_delay) in [(1, 30), (30, 1)] {
        let build_wait = format!("sleep {}", build_delay);
        let clippy_wait = format!("sleep {}", clippy_delay);
        let pipeline = PipelineFixture::with_jobs(vec![
            JobDefinition::new(
                "build-test",
                GateCondition::not_draft(),
                &[("wait", build_wait.as_str()), ("test", "exit 101")],
            ),
            JobDefinition::new(
                "clippy",
                GateCondition::not_draft(),
                &[("wait", clippy_wait.as_str()), ("clippy", "exit 0")],
            ),
        ]);
        let (engine, _sink) = engine_for(pipeline, ScriptedBackend::new());

        let result = engine.handle_event(EventFixture::push_main()).await;

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(
            statuses(&result),
            vec![
                ("build-test".to_string(), JobStatus::Failed),
                ("clippy".to_string(), JobStatus::Passed),
            ]
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_releases_environment() {
    let mut job = JobDefinition::new(
        "build-test",
        GateCondition::not_draft(),
        &[("hang", "sleep 7200")],
    );
    job.timeout_minutes = Some(30);
    let backend = ScriptedBackend::new();
    let (engine, _sink) = engine_for(PipelineFixture::with_jobs(vec![job]), backend.clone());

    let result = engine.handle_event(EventFixture::push_main()).await;
    let job = &result.job_results[0];

    assert_eq!(job.status, JobStatus::TimedOut);
    assert_eq!(job.reason, Some(FailureReason::Timeout { minutes: 30 }));
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(backend.live(), 0);
    assert_eq!(backend.released(), vec!["build-test"]);
}

#[tokio::test]
async fn test_provision_failure_does_not_affect_siblings() {
    let backend = ScriptedBackend::failing_provision(&["clippy"]);
    let (engine, _sink) = engine_for(PipelineFixture::gated(), backend.clone());

    let result = engine.handle_event(EventFixture::push_main()).await;
    let clippy = &result.job_results[1];

    assert_eq!(result.job_results[0].status, JobStatus::Passed);
    assert_eq!(clippy.status, JobStatus::Failed);
    assert_eq!(clippy.failing_step_index, None);
    assert!(matches!(
        clippy.reason,
        Some(FailureReason::Provision { .. })
    ));
    assert_eq!(backend.provisioned(), vec!["build-test"]);
    assert_eq!(result.status, RunStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_max_parallel_bounds_live_environments() {
    let pipeline = PipelineFixture::from_yaml(
        r#"
triggers:
  - events: [push]
    branches: [main]
max_parallel: 1
jobs:
  - name: one
    steps:
      - { name: work, run: sleep 5 }
  - name: two
    steps:
      - { name: work, run: sleep 5 }
  - name: three
    steps:
      - { name: work, run: sleep 5 }
"#,
    );
    let backend = ScriptedBackend::new();
    let (engine, _sink) = engine_for(pipeline, backend.clone());

    let result = engine.handle_event(EventFixture::push_main()).await;

    assert_eq!(result.status, RunStatus::Passed);
    assert_eq!(backend.max_live(), 1);
    assert_eq!(backend.provisioned().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_jobs_overlap() {
    let pipeline = PipelineFixture::with_jobs(vec![
        JobDefinition::new("a", GateCondition::always(), &[("work", "sleep 5")]),
        JobDefinition::new("b", GateCondition::always(), &[("work", "sleep 5")]),
    ]);
    let backend = ScriptedBackend::new();
    let (engine, _sink) = engine_for(pipeline, backend.clone());

    engine.handle_event(EventFixture::push_main()).await;
    assert_eq!(backend.max_live(), 2);
}

#[tokio::test]
async fn test_needs_orders_and_skips_dependents() {
    let yaml = |build_exit: u8| {
        format!(
            r#"
triggers:
  - events: [push]
jobs:
  - name: deploy
    needs: [build-test]
    steps:
      - {{ name: ship, run: exit 0 }}
  - name: build-test
    steps:
      - {{ name: test, run: exit {} }}
"#,
            build_exit
        )
    };

    let backend = ScriptedBackend::new();
    let (engine, _sink) = engine_for(PipelineFixture::from_yaml(&yaml(0)), backend.clone());
    let result = engine.handle_event(EventFixture::push_main()).await;
    assert_eq!(result.status, RunStatus::Passed);
    assert_eq!(backend.provisioned(), vec!["build-test", "deploy"]);

    let backend = ScriptedBackend::new();
    let (engine, _sink) = engine_for(PipelineFixture::from_yaml(&yaml(1)), backend.clone());
    let result = engine.handle_event(EventFixture::push_main()).await;
    assert_eq!(
        statuses(&result),
        vec![
            ("deploy".to_string(), JobStatus::Skipped),
            ("build-test".to_string(), JobStatus::Failed),
        ]
    );
    assert_eq!(
        result.job_results[0].reason,
        Some(FailureReason::DependencyFailed {
            job: "build-test".to_string()
        })
    );
    assert_eq!(backend.provisioned(), vec!["build-test"]);
}

#[tokio::test(start_paused = true)]
async fn test_newer_push_cancels_in_progress_run() {
    let pipeline = PipelineFixture::from_yaml(
        r#"
triggers:
  - events: [push]
    branches: [main]
concurrency:
  group: "ci-${branch}"
  cancel_in_progress: true
jobs:
  - name: quick
    steps:
      - { name: lint, run: exit 0 }
  - name: slow
    steps:
      - { name: test, run: sleep 600 }
"#,
    );
    let backend = ScriptedBackend::new();
    let (engine, sink) = engine_for(pipeline, backend.clone());

    let first = engine.handle_event(Event::push("main").with_sha("old"));
    let second = async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        engine
            .handle_event(Event::push("main").with_sha("new"))
            .await
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(
        statuses(&first),
        vec![
            ("quick".to_string(), JobStatus::Passed),
            ("slow".to_string(), JobStatus::Cancelled),
        ]
    );
    assert_eq!(first.status, RunStatus::Failed);
    assert_eq!(second.status, RunStatus::Passed);
    assert_eq!(backend.live(), 0);
    assert_eq!(sink.len().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_redelivered_trigger_reports_once() {
    let (engine, sink) = engine_for(PipelineFixture::gated(), ScriptedBackend::new());
    let raw = TriggerFixture::webhook_push("main", "a1b2c3").with_delivery_id("delivery-1");

    let first = assert_ok!(engine.handle(&raw).await);
    let second = assert_ok!(engine.handle(&raw).await);

    assert_eq!(first, second);
    assert_eq!(sink.len().await, 1);
}
