//! Job graph construction and per-event job selection.
//!
//! Jobs are independent unless they declare `needs`. Declaration order is
//! kept for reporting even though execution may be concurrent.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tollgate_core::event::Event;
use tollgate_core::pipeline::JobDefinition;
use tollgate_core::result::FailureReason;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("pipeline defines no jobs")]
    Empty,
    #[error("duplicate job name: {0}")]
    DuplicateJob(String),
    #[error("job {job} needs unknown job {dependency}")]
    UnknownDependency { job: String, dependency: String },
    #[error("dependency cycle through job {0}")]
    CycleDetected(String),
}

impl From<GraphError> for tollgate_core::Error {
    fn from(err: GraphError) -> Self {
        tollgate_core::Error::Configuration(err.to_string())
    }
}

/// Whether a job runs for a given event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanDecision {
    Run,
    Skip(FailureReason),
}

/// A job paired with its decision for one event.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub job: Arc<JobDefinition>,
    pub decision: PlanDecision,
}

impl JobPlan {
    pub fn runs(&self) -> bool {
        self.decision == PlanDecision::Run
    }
}

/// Read-only graph of the pipeline's jobs.
#[derive(Debug)]
pub struct JobGraph {
    graph: DiGraph<Arc<JobDefinition>, ()>,
    declared: Vec<NodeIndex>,
    topo: Vec<NodeIndex>,
    name_to_index: HashMap<String, NodeIndex>,
}

impl JobGraph {
    pub fn build(jobs: &[JobDefinition]) -> Result<Self, GraphError> {
        if jobs.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();
        let mut declared = Vec::with_capacity(jobs.len());

        for job in jobs {
            if name_to_index.contains_key(&job.name) {
                return Err(GraphError::DuplicateJob(job.name.clone()));
            }
            let idx = graph.add_node(Arc::new(job.clone()));
            name_to_index.insert(job.name.clone(), idx);
            declared.push(idx);
        }

        for job in jobs {
            let job_idx = name_to_index[&job.name];
            for dep in &job.needs {
                let dep_idx =
                    name_to_index
                        .get(dep)
                        .ok_or_else(|| GraphError::UnknownDependency {
                            job: job.name.clone(),
                            dependency: dep.clone(),
                        })?;
                graph.add_edge(*dep_idx, job_idx, ());
            }
        }

        let topo = toposort(&graph, None)
            .map_err(|cycle| GraphError::CycleDetected(graph[cycle.node_id()].name.clone()))?;

        Ok(Self {
            graph,
            declared,
            topo,
            name_to_index,
        })
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    /// Jobs in declaration order.
    pub fn jobs(&self) -> impl Iterator<Item = &Arc<JobDefinition>> {
        self.declared.iter().map(|&idx| &self.graph[idx])
    }

    pub fn get(&self, name: &str) -> Option<&Arc<JobDefinition>> {
        self.name_to_index.get(name).map(|&idx| &self.graph[idx])
    }

    /// Jobs that must pass before `name` may start.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Jobs waiting on `name`.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
        self.name_to_index
            .get(name)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, direction)
                    .map(|n| self.graph[n].name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Jobs whose condition holds for the event, in declaration order.
    pub fn select_jobs(&self, event: &Event) -> Vec<Arc<JobDefinition>> {
        self.jobs()
            .filter(|job| job.condition.evaluate(event))
            .cloned()
            .collect()
    }

    /// Decide every job for the event, in declaration order.
    ///
    /// A job is skipped when its own condition fails or when any job it
    /// needs is skipped.
    pub fn plan(&self, event: &Event) -> Vec<JobPlan> {
        let mut decisions: HashMap<NodeIndex, PlanDecision> = HashMap::new();

        for &idx in &self.topo {
            let job = &self.graph[idx];
            let decision = if !job.condition.evaluate(event) {
                PlanDecision::Skip(FailureReason::ConditionUnmet)
            } else {
                let mut deps: Vec<NodeIndex> = self
                    .graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .collect();
                deps.sort();
                deps.into_iter()
                    .find(|dep| decisions.get(dep) != Some(&PlanDecision::Run))
                    .map(|dep| {
                        PlanDecision::Skip(FailureReason::DependencyFailed {
                            job: self.graph[dep].name.clone(),
                        })
                    })
                    .unwrap_or(PlanDecision::Run)
            };
            decisions.insert(idx, decision);
        }

        self.declared
            .iter()
            .map(|idx| JobPlan {
                job: Arc::clone(&self.graph[*idx]),
                decision: decisions.remove(idx).unwrap_or(PlanDecision::Run),
            })
            .collect()
    }
}
