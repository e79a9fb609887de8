//! Per-job gate conditions.
//!
//! A condition is a conjunction of clauses joined by `&&`:
//!
//! - `always()` / `true`
//! - `draft == false`, `draft != true`, `!draft`, `draft`
//! - `event == push`, `event != pull_request_opened`
//! - `branch == main`, `branch != 'release'`
//!
//! `github.event.pull_request.draft` is accepted wherever `draft` is, and the
//! whole expression may be wrapped in `${{ ... }}`.

use crate::event::{Event, EventKind};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConditionParseError {
    #[error("empty clause in condition `{0}`")]
    EmptyClause(String),
    #[error("unknown operand `{0}`")]
    UnknownOperand(String),
    #[error("expected `true` or `false`, got `{0}`")]
    NotABoolean(String),
    #[error("invalid event kind `{0}`")]
    InvalidKind(String),
    #[error("cannot parse clause `{0}`")]
    Unparseable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    Always,
    DraftIs(bool),
    KindIs(EventKind),
    KindIsNot(EventKind),
    BranchIs(String),
    BranchIsNot(String),
}

impl Clause {
    fn evaluate(&self, event: &Event) -> bool {
        match self {
            Clause::Always => true,
            Clause::DraftIs(expected) => event.is_draft() == *expected,
            Clause::KindIs(kind) => event.kind() == *kind,
            Clause::KindIsNot(kind) => event.kind() != *kind,
            Clause::BranchIs(branch) => event.branch() == branch,
            Clause::BranchIsNot(branch) => event.branch() != branch,
        }
    }
}

/// Boolean predicate over an [`Event`], attached to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateCondition {
    source: String,
    clauses: Vec<Clause>,
}

impl GateCondition {
    /// The condition that always holds.
    pub fn always() -> Self {
        Self {
            source: "always()".to_string(),
            clauses: vec![Clause::Always],
        }
    }

    /// "The pull request is not in draft state". Vacuously true for pushes.
    pub fn not_draft() -> Self {
        Self {
            source: "draft == false".to_string(),
            clauses: vec![Clause::DraftIs(false)],
        }
    }

    pub fn parse(expr: &str) -> Result<Self, ConditionParseError> {
        let body = strip_template(expr.trim());
        let clauses = body
            .split("&&")
            .map(|raw| parse_clause(raw, expr))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: expr.trim().to_string(),
            clauses,
        })
    }

    pub fn evaluate(&self, event: &Event) -> bool {
        self.clauses.iter().all(|c| c.evaluate(event))
    }

    /// True if this condition inspects the draft flag.
    pub fn gates_on_draft(&self) -> bool {
        self.clauses.iter().any(|c| matches!(c, Clause::DraftIs(_)))
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl Default for GateCondition {
    fn default() -> Self {
        Self::always()
    }
}

impl fmt::Display for GateCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn strip_template(expr: &str) -> &str {
    expr.strip_prefix("${{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(expr)
}

fn unquote(value: &str) -> &str {
    let v = value.trim();
    v.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| v.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .unwrap_or(v)
}

fn is_draft_operand(operand: &str) -> bool {
    matches!(operand, "draft" | "github.event.pull_request.draft")
}

fn parse_bool(value: &str) -> Result<bool, ConditionParseError> {
    match unquote(value) {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ConditionParseError::NotABoolean(other.to_string())),
    }
}

fn parse_clause(raw: &str, whole: &str) -> Result<Clause, ConditionParseError> {
    let clause = raw.trim();
    if clause.is_empty() {
        return Err(ConditionParseError::EmptyClause(whole.to_string()));
    }

    match clause {
        "always()" | "always" | "true" => return Ok(Clause::Always),
        _ => {}
    }

    if let Some(operand) = clause.strip_prefix('!') {
        let operand = operand.trim();
        if is_draft_operand(operand) {
            return Ok(Clause::DraftIs(false));
        }
        return Err(ConditionParseError::UnknownOperand(operand.to_string()));
    }

    if is_draft_operand(clause) {
        return Ok(Clause::DraftIs(true));
    }

    let (lhs, rhs, negated) = if let Some((l, r)) = clause.split_once("==") {
        (l.trim(), r.trim(), false)
    } else if let Some((l, r)) = clause.split_once("!=") {
        (l.trim(), r.trim(), true)
    } else {
        return Err(ConditionParseError::Unparseable(clause.to_string()));
    };

    if is_draft_operand(lhs) {
        let value = parse_bool(rhs)?;
        return Ok(Clause::DraftIs(value != negated));
    }

    match lhs {
        "event" => {
            let kind = unquote(rhs)
                .parse::<EventKind>()
                .map_err(|_| ConditionParseError::InvalidKind(rhs.to_string()))?;
            Ok(if negated {
                Clause::KindIsNot(kind)
            } else {
                Clause::KindIs(kind)
            })
        }
        "branch" => {
            let branch = unquote(rhs).to_string();
            Ok(if negated {
                Clause::BranchIsNot(branch)
            } else {
                Clause::BranchIs(branch)
            })
        }
        other => Err(ConditionParseError::UnknownOperand(other.to_string())),
    }
}
