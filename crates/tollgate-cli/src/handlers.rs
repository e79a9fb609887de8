//! Command handlers.

use crate::config::CliConfig;
use crate::sink::{ConsoleSink, JsonFileSink};
use anyhow::Context;
use console::style;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tollgate_core::Error;
use tollgate_core::pipeline::{Pipeline, PipelineConfig};
use tollgate_core::result::RunStatus;
use tollgate_runner::{HostBackend, HostBackendConfig, StepExecutor};
use tollgate_scheduler::{Engine, JobGraph, LogSink, RawTrigger};

pub const STARTER_PIPELINE: &str = r#"# Tollgate pipeline.
#
# `checkout` does not fetch sources. The host backend runs each job in an
# empty scratch directory, so the cargo steps below need a checkout step
# of your own (for example `run: git clone "$REPO_URL" .`) before they
# can pass under `tollgate run`.
name: ci

triggers:
  - events: [push]
    branches: [main]
  - events: [pull_request]

concurrency:
  group: "ci-${branch}"
  cancel_in_progress: true

jobs:
  - name: build-test
    if: github.event.pull_request.draft == false
    timeout_minutes: 30
    env:
      CARGO_TERM_COLOR: always
    steps:
      - name: checkout
        uses: actions/checkout@v4
      - name: toolchain
        uses: dtolnay/rust-toolchain@stable
      - name: build
        run: cargo build --verbose
      - name: test
        run: cargo test --verbose

  - name: clippy
    if: github.event.pull_request.draft == false
    timeout_minutes: 30
    steps:
      - name: checkout
        uses: actions/checkout@v4
      - name: toolchain
        uses: dtolnay/rust-toolchain@stable
        with:
          components: clippy
      - name: clippy
        run: cargo clippy --all-targets -- -D warnings
"#;

/// Write a starter pipeline.
pub async fn init(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        println!("{} {} already exists", style("!").yellow(), path.display());
        return Ok(());
    }

    tokio::fs::write(path, STARTER_PIPELINE).await?;
    println!("{} Created {}", style("✓").green(), path.display());
    Ok(())
}

fn load_pipeline(path: &Path) -> Result<Pipeline, Error> {
    let pipeline = PipelineConfig::from_file(path)?.compile()?;
    JobGraph::build(&pipeline.jobs)?;
    Ok(pipeline)
}

/// Validate a pipeline configuration.
pub async fn validate(path: &Path) -> anyhow::Result<()> {
    let pipeline = load_pipeline(path)?;

    println!(
        "{} Pipeline \"{}\" is valid",
        style("✓").green(),
        pipeline.name
    );
    println!("  Triggers: {}", pipeline.triggers.len());
    for rule in &pipeline.triggers {
        let kinds: Vec<_> = rule.kinds.iter().map(|k| k.as_str()).collect();
        let branches = if rule.branches.is_empty() {
            "any branch".to_string()
        } else {
            rule.branches.join(", ")
        };
        println!("    - {} on {}", kinds.join(", "), branches);
    }
    println!("  Jobs: {}", pipeline.jobs.len());
    for job in &pipeline.jobs {
        println!(
            "    - {} ({} steps, if {})",
            job.name,
            job.steps.len(),
            job.condition
        );
    }

    Ok(())
}

/// Print the configuration JSON schema.
pub fn schema() -> anyhow::Result<()> {
    let schema = schemars::schema_for!(PipelineConfig);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

pub struct RunArgs {
    pub config: PathBuf,
    pub trigger: PathBuf,
    pub event_name: Option<String>,
    pub max_parallel: Option<usize>,
    pub report: Option<PathBuf>,
}

fn read_trigger(path: &Path) -> Result<serde_json::Value, Error> {
    let content = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| Error::MalformedTrigger(format!("cannot read stdin: {}", e)))?;
        buf
    } else {
        std::fs::read_to_string(path).map_err(|e| {
            Error::MalformedTrigger(format!("cannot read {}: {}", path.display(), e))
        })?
    };
    serde_json::from_str(&content).map_err(|e| Error::MalformedTrigger(e.to_string()))
}

/// Gate and run the pipeline for one trigger.
pub async fn run(config: &CliConfig, args: RunArgs) -> anyhow::Result<RunStatus> {
    let pipeline = load_pipeline(&args.config)?;

    let mut raw = RawTrigger::new(read_trigger(&args.trigger)?);
    if let Some(name) = args.event_name {
        raw = raw.with_event_name(name);
    }

    let backend = HostBackend::new(HostBackendConfig {
        workspace_root: config.workspace_root.clone(),
        ..Default::default()
    });
    let executor = StepExecutor::new(Arc::new(backend));

    let mut engine = Engine::new(pipeline, Arc::new(executor))?
        .with_max_parallel(args.max_parallel.or(config.max_parallel))
        .with_sink(Arc::new(LogSink))
        .with_sink(Arc::new(ConsoleSink));

    if let Some(path) = args.report {
        engine = engine.with_sink(Arc::new(JsonFileSink::file(path)));
    } else if let Some(dir) = &config.report_dir {
        engine = engine.with_sink(Arc::new(JsonFileSink::directory(dir)));
    }

    let result = engine.handle(&raw).await?;
    Ok(result.status)
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> anyhow::Result<()> {
    println!("Current configuration:");
    println!(
        "  max_parallel: {}",
        config
            .max_parallel
            .map(|n| n.to_string())
            .unwrap_or_else(|| "(unbounded)".to_string())
    );
    println!(
        "  workspace_root: {}",
        config
            .workspace_root
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(system temp)".to_string())
    );
    println!("  log_format: {:?}", config.log_format);
    println!(
        "  report_dir: {}",
        config
            .report_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not set)".to_string())
    );

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }

    Ok(())
}

/// Set configuration.
pub fn set_config(key: &str, value: &str) -> anyhow::Result<()> {
    let mut config = CliConfig::load().unwrap_or_default();
    config.set(key, value)?;
    config
        .save()
        .with_context(|| format!("saving {}", key))?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tollgate_core::event::Event;
    use tollgate_core::event::EventKind;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn args(config: PathBuf, trigger: PathBuf) -> RunArgs {
        RunArgs {
            config,
            trigger,
            event_name: None,
            max_parallel: None,
            report: None,
        }
    }

    #[test]
    fn test_starter_pipeline_gates_drafts() {
        let pipeline = PipelineConfig::from_yaml_str(STARTER_PIPELINE)
            .unwrap()
            .compile()
            .unwrap();
        assert_eq!(pipeline.jobs.len(), 2);
        assert!(STARTER_PIPELINE.starts_with("# Tollgate pipeline."));
        assert!(STARTER_PIPELINE.contains("`checkout` does not fetch sources"));

        let draft = Event::pull_request(EventKind::PullRequestSynchronized, "feature-y", true);
        assert!(pipeline.jobs.iter().all(|j| !j.condition.evaluate(&draft)));
        assert!(
            pipeline
                .jobs
                .iter()
                .all(|j| j.condition.evaluate(&Event::push("main")))
        );
    }

    #[tokio::test]
    async fn test_init_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "tollgate.yaml", "custom");
        init(&path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "custom");
    }

    #[tokio::test]
    async fn test_run_reports_failure_and_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let config = write(
            dir.path(),
            "tollgate.yaml",
            r#"
triggers:
  - events: [push]
    branches: [main]
jobs:
  - name: ok
    steps:
      - name: pass
        run: "true"
  - name: broken
    steps:
      - name: fail
        run: exit 3
"#,
        );
        let trigger = write(
            dir.path(),
            "push.json",
            r#"{"event": "push", "branch": "main"}"#,
        );
        let report = dir.path().join("out").join("report.json");

        let mut run_args = args(config, trigger);
        run_args.report = Some(report.clone());
        let status = run(&CliConfig::default(), run_args).await.unwrap();

        assert_eq!(status, RunStatus::Failed);
        let written = std::fs::read_to_string(report).unwrap();
        assert!(written.contains("\"broken\""));
    }

    #[tokio::test]
    async fn test_run_with_malformed_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let config = write(dir.path(), "tollgate.yaml", STARTER_PIPELINE);
        let trigger = write(dir.path(), "bad.json", r#"{"branch": "main"}"#);

        let err = run(&CliConfig::default(), args(config, trigger))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::MalformedTrigger(_))
        ));
    }

    #[tokio::test]
    async fn test_unadmitted_event_passes() {
        let dir = tempfile::tempdir().unwrap();
        let config = write(dir.path(), "tollgate.yaml", STARTER_PIPELINE);
        let trigger = write(
            dir.path(),
            "push.json",
            r#"{"ref": "refs/heads/feature-x", "after": "abc"}"#,
        );

        let mut run_args = args(config, trigger);
        run_args.event_name = Some("push".to_string());
        let status = run(&CliConfig::default(), run_args).await.unwrap();
        assert_eq!(status, RunStatus::Passed);
    }

    #[test]
    fn test_missing_config_is_a_configuration_error() {
        let err = load_pipeline(Path::new("/nonexistent/tollgate.yaml")).unwrap_err();
        assert!(err.is_fatal_to_run());
    }
}
