//! Error types for Tollgate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Trigger errors
    #[error("Malformed trigger: {0}")]
    MalformedTrigger(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    // Job errors
    #[error("Step {index} ({label}) exited with code {exit_code}")]
    StepExecution {
        index: usize,
        label: String,
        exit_code: i32,
    },

    #[error("Job timeout after {minutes} minutes")]
    Timeout { minutes: u32 },

    #[error("Failed to provision environment: {0}")]
    EnvironmentProvision(String),

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Run cancelled: {reason}")]
    Cancelled { reason: String },

    // Infrastructure errors
    #[error("Report sink error: {0}")]
    Sink(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors that reject a run before any job starts.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, Error::MalformedTrigger(_) | Error::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}
