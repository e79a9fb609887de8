//! End-to-end run orchestration.
//!
//! normalize → admit → plan → dispatch → report → publish.

use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::graph::JobGraph;
use crate::normalizer::{RawTrigger, normalize};
use crate::reporter::report;
use crate::supersession::SupersessionRegistry;
use crate::triggers::TriggerMatcher;
use futures::future::join_all;
use std::sync::Arc;
use tollgate_core::Result;
use tollgate_core::event::Event;
use tollgate_core::pipeline::Pipeline;
use tollgate_core::ports::{JobRunner, ReportSink};
use tollgate_core::result::RunResult;
use tracing::{error, info};

/// The gating and dispatch engine for one pipeline.
pub struct Engine {
    pipeline: Arc<Pipeline>,
    graph: JobGraph,
    runner: Arc<dyn JobRunner>,
    dispatch: DispatcherConfig,
    sinks: Vec<Arc<dyn ReportSink>>,
    supersession: Arc<SupersessionRegistry>,
    trigger_matcher: TriggerMatcher,
}

impl Engine {
    pub fn new(pipeline: Pipeline, runner: Arc<dyn JobRunner>) -> Result<Self> {
        let graph = JobGraph::build(&pipeline.jobs)?;
        let dispatch = DispatcherConfig {
            max_parallel: pipeline.max_parallel,
        };

        Ok(Self {
            pipeline: Arc::new(pipeline),
            graph,
            runner,
            dispatch,
            sinks: Vec::new(),
            supersession: Arc::new(SupersessionRegistry::new()),
            trigger_matcher: TriggerMatcher::new(),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Override the pipeline's parallelism limit.
    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        if max_parallel.is_some() {
            self.dispatch.max_parallel = max_parallel;
        }
        self
    }

    /// Share a supersession registry between engines.
    pub fn with_supersession(mut self, registry: Arc<SupersessionRegistry>) -> Self {
        self.supersession = registry;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }

    pub fn supersession(&self) -> &Arc<SupersessionRegistry> {
        &self.supersession
    }

    /// Process a raw trigger. Only a malformed trigger is an error; job
    /// failures are reported in the returned [`RunResult`].
    pub async fn handle(&self, raw: &RawTrigger) -> Result<RunResult> {
        let event = normalize(raw)?;
        Ok(self.handle_event(event).await)
    }

    pub async fn handle_event(&self, event: Event) -> RunResult {
        let admitted = self
            .trigger_matcher
            .admits(&event, &self.pipeline.triggers);

        if !admitted {
            info!(event = %event, pipeline = %self.pipeline.name, "Event not admitted");
            let result = report(&event, false, &[]);
            self.publish(&result).await;
            return result;
        }

        let (group, cancel_in_progress) = match &self.pipeline.concurrency {
            Some(c) => (c.group_for(&event), c.cancel_in_progress),
            None => (event.branch().to_string(), false),
        };
        let (run_id, cancel) = self.supersession.begin(&group, cancel_in_progress).await;
        info!(run = %run_id, event = %event, group = %group, "Run admitted");

        let plan = self.graph.plan(&event);
        let dispatcher = Dispatcher::new(Arc::clone(&self.runner), self.dispatch);
        let job_results = dispatcher.run(plan, cancel).await;

        self.supersession.finish(&group, run_id).await;

        let result = report(&event, true, &job_results);
        info!(run = %run_id, status = ?result.status, "Run complete");
        self.publish(&result).await;
        result
    }

    async fn publish(&self, result: &RunResult) {
        let outcomes = join_all(self.sinks.iter().map(|sink| sink.publish(result))).await;
        for e in outcomes.into_iter().filter_map(|r| r.err()) {
            error!(error = %e, "Failed to publish run result");
        }
    }
}
