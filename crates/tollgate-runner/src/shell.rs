//! Shell command execution with line-by-line output capture.

use std::collections::BTreeMap;
use directories::BaseDirs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tollgate_core::ports::CommandOutput;
use tollgate_core::{Error, Result};
use tracing::{debug, info};

/// Output line from a running command.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Variables passed through from the host when the environment is cleared.
const PASSTHROUGH_VARS: &[&str] = &[
    "PATH",
    "LANG",
    "TERM",
    "CARGO_HOME",
    "RUSTUP_HOME",
    "RUSTUP_TOOLCHAIN",
];

/// Toolchain homes that default to a directory under the user's home.
const TOOLCHAIN_HOMES: &[(&str, &str)] = &[("CARGO_HOME", ".cargo"), ("RUSTUP_HOME", ".rustup")];

/// Host variables a step inherits.
///
/// Steps run with `HOME` set to their workdir, so toolchain homes left
/// implicit on the host are spelled out against the host's home directory.
fn inherited_env(
    lookup: impl Fn(&str) -> Option<String>,
    host_home: Option<&Path>,
) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = PASSTHROUGH_VARS
        .iter()
        .filter_map(|key| lookup(key).map(|value| (key.to_string(), value)))
        .collect();

    if let Some(home) = host_home {
        for (key, dir) in TOOLCHAIN_HOMES {
            env.entry(key.to_string())
                .or_insert_with(|| home.join(dir).to_string_lossy().into_owned());
        }
    }
    env
}

fn host_env() -> BTreeMap<String, String> {
    let home = BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
    inherited_env(|key| std::env::var(key).ok(), home.as_deref())
}

/// A command to run through `sh -c` in a working directory.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    pub shell: String,
    pub command: String,
    pub workdir: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Label used in log fields.
    pub label: String,
}

impl ShellCommand {
    pub fn new(command: impl Into<String>, workdir: PathBuf) -> Self {
        Self {
            shell: "sh".to_string(),
            command: command.into(),
            workdir,
            env: BTreeMap::new(),
            label: String::new(),
        }
    }

    /// Run to completion. Dropping the returned future kills the process.
    pub async fn run(&self) -> Result<CommandOutput> {
        info!(step = %self.label, command = %self.command, workdir = %self.workdir.display(), "Executing shell command");

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.workdir)
            .env_clear()
            .envs(host_env())
            .env("HOME", &self.workdir)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to spawn process: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("stderr not captured".to_string()))?;

        let (tx, rx) = mpsc::channel(256);
        let (status, _, _, output) = tokio::join!(
            child.wait(),
            pump(stdout, OutputStream::Stdout, tx.clone()),
            pump(stderr, OutputStream::Stderr, tx),
            collect(rx, &self.label),
        );

        let status =
            status.map_err(|e| Error::Internal(format!("Failed to wait for process: {}", e)))?;
        let exit_code = status.code().unwrap_or(-1);
        debug!(step = %self.label, exit_code, "Command completed");

        Ok(CommandOutput { exit_code, output })
    }
}

async fn pump<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut line_number = 0u32;

    while let Ok(Some(content)) = lines.next_line().await {
        line_number += 1;
        let line = OutputLine {
            stream,
            content,
            line_number,
        };
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

async fn collect(mut rx: mpsc::Receiver<OutputLine>, label: &str) -> String {
    let mut output = String::new();
    while let Some(line) = rx.recv().await {
        debug!(step = %label, stream = ?line.stream, line = line.line_number, "{}", line.content);
        output.push_str(&line.content);
        output.push('\n');
    }
    output
}
