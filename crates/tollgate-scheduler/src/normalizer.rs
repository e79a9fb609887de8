//! Raw trigger normalization.
//!
//! Accepts either the canonical payload
//! (`{"event": "push", "branch": "main", "draft": false}`) or a hosting
//! webhook body together with its event name (`push` / `pull_request`).

use serde_json::Value;
use thiserror::Error;
use tollgate_core::Error;
use tollgate_core::event::{Event, EventKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("trigger payload must be a JSON object")]
    NotAnObject,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` has the wrong type")]
    WrongType(&'static str),
    #[error("unsupported event `{0}`")]
    UnsupportedEvent(String),
    #[error("unsupported pull request action `{0}`")]
    UnsupportedAction(String),
    #[error("ref `{0}` is not a branch")]
    NotABranch(String),
}

impl From<NormalizeError> for Error {
    fn from(err: NormalizeError) -> Self {
        Error::MalformedTrigger(err.to_string())
    }
}

/// Opaque trigger as delivered by the hosting system.
#[derive(Debug, Clone)]
pub struct RawTrigger {
    /// Hosting-system event name, if delivered out of band (e.g. a header).
    pub event_name: Option<String>,
    pub delivery_id: Option<String>,
    pub payload: Value,
}

impl RawTrigger {
    pub fn new(payload: Value) -> Self {
        Self {
            event_name: None,
            delivery_id: None,
            payload,
        }
    }

    pub fn with_event_name(mut self, name: impl Into<String>) -> Self {
        self.event_name = Some(name.into());
        self
    }

    pub fn with_delivery_id(mut self, id: impl Into<String>) -> Self {
        self.delivery_id = Some(id.into());
        self
    }
}

/// Convert a raw trigger into a canonical [`Event`].
pub fn normalize(raw: &RawTrigger) -> Result<Event, Error> {
    let event = normalize_inner(raw)?;
    Ok(match &raw.delivery_id {
        Some(id) => event.with_delivery_id(id.clone()),
        None => event,
    })
}

fn normalize_inner(raw: &RawTrigger) -> Result<Event, NormalizeError> {
    if !raw.payload.is_object() {
        return Err(NormalizeError::NotAnObject);
    }

    if raw.payload.get("event").is_some() {
        return canonical(&raw.payload);
    }

    match raw.event_name.as_deref() {
        Some("push") => webhook_push(&raw.payload),
        Some("pull_request") => webhook_pull_request(&raw.payload),
        Some(other) => Err(NormalizeError::UnsupportedEvent(other.to_string())),
        None => Err(NormalizeError::MissingField("event")),
    }
}

fn required_str<'a>(value: &'a Value, pointer: &str, name: &'static str) -> Result<&'a str, NormalizeError> {
    match value.pointer(pointer) {
        None | Some(Value::Null) => Err(NormalizeError::MissingField(name)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(NormalizeError::MissingField(name)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(NormalizeError::WrongType(name)),
    }
}

fn optional_str(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

fn optional_bool(value: &Value, pointer: &str, name: &'static str) -> Result<bool, NormalizeError> {
    match value.pointer(pointer) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(NormalizeError::WrongType(name)),
    }
}

fn attach_sha(event: Event, sha: Option<String>) -> Event {
    match sha {
        Some(sha) => event.with_sha(sha),
        None => event,
    }
}

fn canonical(payload: &Value) -> Result<Event, NormalizeError> {
    let kind_name = required_str(payload, "/event", "event")?;
    let kind = kind_name
        .parse::<EventKind>()
        .map_err(|_| NormalizeError::UnsupportedEvent(kind_name.to_string()))?;
    let branch = required_str(payload, "/branch", "branch")?;
    let draft = optional_bool(payload, "/draft", "draft")?;

    let event = Event::new(kind, branch, draft);
    let event = attach_sha(event, optional_str(payload, "/sha"));
    Ok(match optional_str(payload, "/delivery_id") {
        Some(id) => event.with_delivery_id(id),
        None => event,
    })
}

fn webhook_push(payload: &Value) -> Result<Event, NormalizeError> {
    let git_ref = required_str(payload, "/ref", "ref")?;
    let branch = if let Some(branch) = git_ref.strip_prefix("refs/heads/") {
        branch
    } else if git_ref.starts_with("refs/") {
        return Err(NormalizeError::NotABranch(git_ref.to_string()));
    } else {
        git_ref
    };

    Ok(attach_sha(Event::push(branch), optional_str(payload, "/after")))
}

fn webhook_pull_request(payload: &Value) -> Result<Event, NormalizeError> {
    let action = required_str(payload, "/action", "action")?;
    let kind = match action {
        "opened" => EventKind::PullRequestOpened,
        "reopened" => EventKind::PullRequestReopened,
        "synchronize" => EventKind::PullRequestSynchronized,
        "ready_for_review" => EventKind::PullRequestReadyForReview,
        other => return Err(NormalizeError::UnsupportedAction(other.to_string())),
    };
    let branch = required_str(payload, "/pull_request/base/ref", "pull_request.base.ref")?;
    let draft = optional_bool(payload, "/pull_request/draft", "pull_request.draft")?;

    Ok(attach_sha(
        Event::pull_request(kind, branch, draft),
        optional_str(payload, "/pull_request/head/sha"),
    ))
}
