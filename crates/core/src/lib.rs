//! peel-core
//!
//! Core library for turning a monolithic firmware image into a browsable
//! filesystem tree by peeling nested containers off it one stage at a time.
//!
//! The stages themselves are thin: signature scanning, decompression and
//! container unpacking are delegated to external tools behind
//! [`exec::CommandRunner`]. What lives here is the sequencing, the fallback
//! policy for scanner misses, and the version-to-flag compatibility table.
//! Frontends (the CLI) only parse arguments and map outcomes to exit codes.

pub mod audit;
pub mod components;
pub mod config;
pub mod error;
pub mod exec;
pub mod filesystem;
pub mod layout;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod rules;
pub mod signature;
pub mod slicer;
pub mod tools;
pub mod version;

pub use audit::{AuditLog, LogLevel};
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{Pipeline, RunOutcome};

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
