//! Run Boolean operations on surface meshes through external engines.
//!
//! A [`orchestrator::JobController`] owns at most one job at a time. It stages
//! both operands into the format the chosen engine reads, runs the engine as a
//! separate process, and converts the raw output into a named result in the
//! canonical format. Jobs can be cancelled at any point; progress is reported
//! through [`model::JobEvent`]s.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod registry;
mod text_summary;

pub use error::JobError;
