//! Step execution engine for Tollgate.

pub mod actions;
pub mod environments;
pub mod executor;
pub mod shell;

pub use actions::{ActionRegistry, ResolvedAction};
pub use environments::{HostBackend, HostBackendConfig};
pub use executor::StepExecutor;
pub use shell::{OutputLine, OutputStream, ShellCommand};
