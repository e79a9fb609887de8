//! Integration test infrastructure for Tollgate.
//!
//! Provides pipeline and trigger fixtures plus a scripted execution backend
//! so the whole gate → dispatch → report path can run without spawning
//! processes.
//!
//! # Usage
//!
//! ```ignore
//! use tollgate_tests::{PipelineFixture, ScriptedBackend, engine_for};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let backend = ScriptedBackend::new();
//!     let engine = engine_for(PipelineFixture::gated(), backend.clone());
//!     // engine.handle(...)
//! }
//! ```

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,tollgate_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
