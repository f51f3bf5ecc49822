//! Workflow engine core: parsing, DAG execution, and durable scheduling.
//!
//! - `definition` -- YAML parsing, validation, filesystem load
//! - `dag` -- DAG builder, cycle detection, parallel wave computation
//! - `interpolation` -- `{{ expr }}` template resolution over a run context
//! - `memory` -- memory-block assembly sub-phase
//! - `registry` -- the plugin registry and built-in actions
//! - `retry` -- per-step retry handler (linear backoff)
//! - `executor` -- wave-based parallel DAG executor
//! - `scheduler` -- trigger scheduler (cron, webhook, catch-up, pause/resume)
//! - `worker` -- run queue worker pool

pub mod dag;
pub mod definition;
pub mod executor;
pub mod interpolation;
pub mod memory;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod worker;
