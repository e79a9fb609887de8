//! Canonical trigger events.
//!
//! An [`Event`] is what every raw trigger payload is normalized into before
//! gating. It is immutable once constructed: fields are private and only
//! exposed through accessors.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of incoming trigger.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequestOpened,
    PullRequestReopened,
    PullRequestSynchronized,
    PullRequestReadyForReview,
}

impl EventKind {
    /// All pull-request lifecycle kinds.
    pub const PULL_REQUEST: [EventKind; 4] = [
        EventKind::PullRequestOpened,
        EventKind::PullRequestReopened,
        EventKind::PullRequestSynchronized,
        EventKind::PullRequestReadyForReview,
    ];

    pub fn is_pull_request(&self) -> bool {
        !matches!(self, EventKind::Push)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequestOpened => "pull_request_opened",
            EventKind::PullRequestReopened => "pull_request_reopened",
            EventKind::PullRequestSynchronized => "pull_request_synchronized",
            EventKind::PullRequestReadyForReview => "pull_request_ready_for_review",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "push" => Ok(EventKind::Push),
            "pull_request_opened" => Ok(EventKind::PullRequestOpened),
            "pull_request_reopened" => Ok(EventKind::PullRequestReopened),
            "pull_request_synchronized" | "pull_request_synchronize" => {
                Ok(EventKind::PullRequestSynchronized)
            }
            "pull_request_ready_for_review" => Ok(EventKind::PullRequestReadyForReview),
            other => Err(format!("unknown event kind: {}", other)),
        }
    }
}

/// A normalized trigger event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    kind: EventKind,
    branch: String,
    is_draft: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delivery_id: Option<String>,
}

impl Event {
    /// Build an event. Push events carry no draft concept, so the flag is
    /// forced to `false` for them.
    pub fn new(kind: EventKind, branch: impl Into<String>, is_draft: bool) -> Self {
        Self {
            kind,
            branch: branch.into(),
            is_draft: kind.is_pull_request() && is_draft,
            sha: None,
            delivery_id: None,
        }
    }

    pub fn push(branch: impl Into<String>) -> Self {
        Self::new(EventKind::Push, branch, false)
    }

    pub fn pull_request(kind: EventKind, branch: impl Into<String>, is_draft: bool) -> Self {
        Self::new(kind, branch, is_draft)
    }

    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }

    pub fn with_delivery_id(mut self, id: impl Into<String>) -> Self {
        self.delivery_id = Some(id.into());
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn is_draft(&self) -> bool {
        self.is_draft
    }

    pub fn sha(&self) -> Option<&str> {
        self.sha.as_deref()
    }

    pub fn delivery_id(&self) -> Option<&str> {
        self.delivery_id.as_deref()
    }

    /// Key under which reports for this event are deduplicated.
    pub fn idempotency_key(&self) -> String {
        match &self.delivery_id {
            Some(id) => id.clone(),
            None => format!(
                "{}:{}:{}:{}",
                self.kind,
                self.branch,
                self.is_draft,
                self.sha.as_deref().unwrap_or("-")
            ),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.kind, self.branch)?;
        if self.is_draft {
            write!(f, " (draft)")?;
        }
        Ok(())
    }
}
