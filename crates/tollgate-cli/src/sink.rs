//! Report sinks used by the command line.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use console::style;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tollgate_core::ports::ReportSink;
use tollgate_core::result::{JobStatus, RunResult};
use tollgate_core::{Error, Result};

/// On-disk report envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReportFile {
    pub generated_at: DateTime<Utc>,
    pub tool_version: String,
    pub run: RunResult,
}

/// Writes each run to a JSON file. Republishing overwrites.
pub struct JsonFileSink {
    target: Target,
}

enum Target {
    File(PathBuf),
    /// One file per event, named by its idempotency key.
    Directory(PathBuf),
}

impl JsonFileSink {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            target: Target::File(path.into()),
        }
    }

    pub fn directory(dir: impl Into<PathBuf>) -> Self {
        Self {
            target: Target::Directory(dir.into()),
        }
    }

    fn path_for(&self, result: &RunResult) -> PathBuf {
        match &self.target {
            Target::File(path) => path.clone(),
            Target::Directory(dir) => dir.join(format!(
                "{}.json",
                file_stem(&result.event.idempotency_key())
            )),
        }
    }
}

fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn write_json(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

#[async_trait]
impl ReportSink for JsonFileSink {
    async fn publish(&self, result: &RunResult) -> Result<()> {
        let file = ReportFile {
            generated_at: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            run: result.clone(),
        };
        let contents = serde_json::to_vec_pretty(&file)?;
        let path = self.path_for(result);
        write_json(&path, &contents)
            .await
            .map_err(|e| Error::Sink(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), "Report written");
        Ok(())
    }
}

/// Prints a human-readable summary to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

#[async_trait]
impl ReportSink for ConsoleSink {
    async fn publish(&self, result: &RunResult) -> Result<()> {
        println!("{}", render(result));
        Ok(())
    }
}

/// Summary text for a finished run.
pub fn render(result: &RunResult) -> String {
    let mut out = String::new();

    if !result.admitted {
        out.push_str(&format!(
            "{} {} not admitted by any trigger",
            style("i").blue(),
            result.event
        ));
        return out;
    }

    out.push_str(&format!("Run for {}\n", style(&result.event).bold()));
    for job in &result.job_results {
        let marker = match job.status {
            JobStatus::Passed => style("✓").green(),
            JobStatus::Skipped => style("-").dim(),
            JobStatus::Failed | JobStatus::TimedOut => style("✗").red(),
            JobStatus::Cancelled => style("!").yellow(),
        };
        out.push_str(&format!("  {} {} ({})", marker, job.job_name, job.status));
        if let Some(label) = &job.failing_step_label {
            out.push_str(&format!(" at step {}", label));
        }
        if let Some(reason) = &job.reason {
            out.push_str(&format!(": {}", reason));
        }
        out.push('\n');
    }

    let status = if result.passed() {
        style("passed").green().bold()
    } else {
        style("failed").red().bold()
    };
    out.push_str(&format!("Run {}", status));
    out
}
