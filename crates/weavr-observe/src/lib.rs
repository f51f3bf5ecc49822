//! Structured logging setup for the scheduler core.
//!
//! - `tracing_setup` -- global subscriber initialization (`init_tracing`).
//! - `workflow_attrs` -- span field name constants for run/step tagging.

pub mod tracing_setup;
pub mod workflow_attrs;
