//! Trigger gating and job dispatch for Tollgate.

pub mod dispatcher;
pub mod engine;
pub mod graph;
pub mod normalizer;
pub mod reporter;
pub mod supersession;
pub mod triggers;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use engine::Engine;
pub use graph::{GraphError, JobGraph, JobPlan, PlanDecision};
pub use normalizer::{RawTrigger, normalize};
pub use reporter::{LogSink, MemorySink, report};
pub use supersession::SupersessionRegistry;
pub use triggers::{TriggerMatcher, admit};
