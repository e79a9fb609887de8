//! Pipeline configuration types.
//!
//! [`PipelineConfig`] is the user-authored YAML/JSON document. It is compiled
//! once into a validated [`Pipeline`], which is read-only for the lifetime of
//! every run that uses it.

use crate::condition::GateCondition;
use crate::event::{Event, EventKind};
use crate::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub concurrency: Option<ConcurrencyConfig>,
    #[serde(default)]
    pub max_parallel: Option<usize>,
    pub jobs: Vec<JobConfig>,
}

fn default_name() -> String {
    "pipeline".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    /// Event kinds, or `pull_request` for every pull-request lifecycle kind.
    pub events: Vec<String>,
    #[serde(default)]
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ConcurrencyConfig {
    /// Group name; `${branch}` and `${event}` are substituted per event.
    pub group: String,
    #[serde(default)]
    pub cancel_in_progress: bool,
}

impl ConcurrencyConfig {
    pub fn group_for(&self, event: &Event) -> String {
        self.group
            .replace("${branch}", event.branch())
            .replace("${event}", event.kind().as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub name: String,
    #[serde(default, rename = "if", alias = "condition")]
    pub condition: Option<String>,
    pub steps: Vec<StepConfig>,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    #[serde(alias = "name")]
    pub label: String,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default)]
    pub with: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Compiled trigger filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRule {
    pub kinds: BTreeSet<EventKind>,
    /// Branch names or glob patterns; empty matches any branch.
    pub branches: Vec<String>,
}

impl TriggerRule {
    pub fn new(kinds: impl IntoIterator<Item = EventKind>, branches: Vec<String>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            branches,
        }
    }
}

/// Reference to a reusable action: `[owner/]name[@version]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRef {
    pub owner: Option<String>,
    pub name: String,
    pub version: Option<String>,
}

impl ActionRef {
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        let (path, version) = match reference.split_once('@') {
            Some((p, v)) => (p, Some(v.to_string())),
            None => (reference, None),
        };
        let (owner, name) = match path.rsplit_once('/') {
            Some((o, n)) => (Some(o.to_string()), n),
            None => (None, path),
        };
        if name.is_empty() || version.as_deref() == Some("") {
            return Err(Error::Configuration(format!(
                "invalid action reference: {}",
                reference
            )));
        }
        Ok(Self {
            owner,
            name: name.to_string(),
            version,
        })
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(owner) = &self.owner {
            write!(f, "{}/", owner)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, "@{}", version)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Inline shell command.
    Command(String),
    /// Reusable action with parameters.
    Uses {
        action: ActionRef,
        with: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDefinition {
    pub label: String,
    pub action: StepAction,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub name: String,
    pub condition: GateCondition,
    pub steps: Vec<StepDefinition>,
    pub timeout_minutes: Option<u32>,
    pub needs: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub image: Option<String>,
}

impl JobDefinition {
    /// Shorthand for a job with only inline commands.
    pub fn new(name: impl Into<String>, condition: GateCondition, commands: &[(&str, &str)]) -> Self {
        Self {
            name: name.into(),
            condition,
            steps: commands
                .iter()
                .map(|(label, cmd)| StepDefinition {
                    label: label.to_string(),
                    action: StepAction::Command(cmd.to_string()),
                    env: BTreeMap::new(),
                })
                .collect(),
            timeout_minutes: None,
            needs: vec![],
            env: BTreeMap::new(),
            image: None,
        }
    }
}

/// Validated, read-only pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: String,
    pub triggers: Vec<TriggerRule>,
    pub jobs: Vec<JobDefinition>,
    pub concurrency: Option<ConcurrencyConfig>,
    pub max_parallel: Option<usize>,
}

impl PipelineConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Validate and compile into a [`Pipeline`].
    pub fn compile(&self) -> Result<Pipeline> {
        let triggers = self
            .triggers
            .iter()
            .map(compile_trigger)
            .collect::<Result<Vec<_>>>()?;

        if self.jobs.is_empty() {
            return Err(Error::Configuration("pipeline defines no jobs".to_string()));
        }
        if self.max_parallel == Some(0) {
            return Err(Error::Configuration(
                "max_parallel must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for job in &self.jobs {
            if job.name.trim().is_empty() {
                return Err(Error::Configuration("job name must not be empty".to_string()));
            }
            if !seen.insert(job.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate job name: {}",
                    job.name
                )));
            }
        }

        let jobs = self
            .jobs
            .iter()
            .map(|job| compile_job(job, &seen))
            .collect::<Result<Vec<_>>>()?;

        Ok(Pipeline {
            name: self.name.clone(),
            triggers,
            jobs,
            concurrency: self.concurrency.clone(),
            max_parallel: self.max_parallel,
        })
    }
}

fn compile_trigger(trigger: &TriggerConfig) -> Result<TriggerRule> {
    if trigger.events.is_empty() {
        return Err(Error::Configuration(
            "trigger must list at least one event".to_string(),
        ));
    }

    let mut kinds = BTreeSet::new();
    for name in &trigger.events {
        if name == "pull_request" {
            kinds.extend(EventKind::PULL_REQUEST);
        } else {
            kinds.insert(name.parse::<EventKind>().map_err(Error::Configuration)?);
        }
    }

    Ok(TriggerRule {
        kinds,
        branches: trigger.branches.clone(),
    })
}

fn compile_job(job: &JobConfig, known: &HashSet<&str>) -> Result<JobDefinition> {
    let condition = match &job.condition {
        Some(expr) => GateCondition::parse(expr)
            .map_err(|e| Error::Configuration(format!("job {}: {}", job.name, e)))?,
        None => GateCondition::always(),
    };

    if job.steps.is_empty() {
        return Err(Error::Configuration(format!("job {} has no steps", job.name)));
    }
    if job.timeout_minutes == Some(0) {
        return Err(Error::Configuration(format!(
            "job {}: timeout_minutes must be positive",
            job.name
        )));
    }
    for dep in &job.needs {
        if !known.contains(dep.as_str()) {
            return Err(Error::Configuration(format!(
                "job {} needs unknown job {}",
                job.name, dep
            )));
        }
    }

    let steps = job
        .steps
        .iter()
        .map(|step| compile_step(&job.name, step))
        .collect::<Result<Vec<_>>>()?;

    Ok(JobDefinition {
        name: job.name.clone(),
        condition,
        steps,
        timeout_minutes: job.timeout_minutes,
        needs: job.needs.clone(),
        env: job.env.clone(),
        image: job.image.clone(),
    })
}

fn compile_step(job: &str, step: &StepConfig) -> Result<StepDefinition> {
    let action = match (&step.run, &step.uses) {
        (Some(cmd), None) => StepAction::Command(cmd.clone()),
        (None, Some(reference)) => StepAction::Uses {
            action: ActionRef::parse(reference)?,
            with: step.with.clone(),
        },
        _ => {
            return Err(Error::Configuration(format!(
                "job {} step {}: exactly one of `run` or `uses` is required",
                job, step.label
            )));
        }
    };

    Ok(StepDefinition {
        label: step.label.clone(),
        action,
        env: step.env.clone(),
    })
}
