//! Application-level orchestration.
//!
//! This module owns the job lifecycle (submit/cancel/acknowledge) and the
//! post-run step that converts and names results. CLI layers call into it and
//! react to the events it emits.

mod controller;
mod finalize;
mod naming;

pub use controller::{ControllerParts, JobController, JobRecord};
pub use finalize::ResultFinalizer;
pub use naming::NamingCounters;
