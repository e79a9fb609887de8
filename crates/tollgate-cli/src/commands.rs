//! CLI command definitions.

use clap::{Subcommand, ValueEnum};
use std::num::NonZeroUsize;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter pipeline configuration
    Init {
        /// Where to write it
        #[arg(default_value = "tollgate.yaml")]
        path: PathBuf,
    },

    /// Validate pipeline configuration
    Validate {
        /// Path to pipeline file
        #[arg(default_value = "tollgate.yaml")]
        path: PathBuf,
    },

    /// Gate and run a pipeline for one trigger
    Run {
        /// Path to pipeline file
        #[arg(short, long, default_value = "tollgate.yaml")]
        config: PathBuf,

        /// Trigger payload (JSON), `-` for stdin
        #[arg(short, long)]
        trigger: PathBuf,

        /// Webhook event name when the payload is a raw webhook body
        #[arg(long, value_enum)]
        event_name: Option<WebhookEvent>,

        /// Maximum number of jobs in flight (at least 1)
        #[arg(long)]
        max_parallel: Option<NonZeroUsize>,

        /// Write the run result as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the pipeline configuration JSON schema
    Schema,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum WebhookEvent {
    Push,
    PullRequest,
}

impl WebhookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::Push => "push",
            WebhookEvent::PullRequest => "pull_request",
        }
    }
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
