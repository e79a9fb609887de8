//! Tollgate Core
//!
//! Core domain types, traits, and error handling for Tollgate.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used by the scheduler, the runner and the CLI.

pub mod condition;
pub mod error;
pub mod event;
pub mod ids;
pub mod pipeline;
pub mod ports;
pub mod result;

pub use error::{Error, Result};
pub use ids::*;
