//! Scheduler core: definition parsing, DAG execution, trigger scheduling,
//! and the repository trait the infra layer implements.
//!
//! - `workflow` -- the engine itself: `dag`, `definition`, `interpolation`,
//!   `memory`, `registry`, `retry`, `executor`, `scheduler`, `worker`.
//! - `repository` -- the `SchedulerStore` trait, implemented by
//!   `weavr-infra`'s SQLite store.

pub mod repository;
pub mod workflow;
