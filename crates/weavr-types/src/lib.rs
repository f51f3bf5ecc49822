//! Shared domain types for the Weavr workflow scheduler core.
//!
//! - `workflow` -- the declarative document model (`Workflow`, `Step`,
//!   `MemoryBlock`, `Trigger`) and the durable store row types
//!   (`QueueRecord`, `ScheduleRecord`, `HistoryRecord`, `TokenUsageRecord`).
//! - `config` -- `SchedulerConfig`, the deserialized shape of
//!   `<home>/.weavr/config.yaml`.
//! - `error` -- shared error kinds surfaced across crate boundaries.

pub mod config;
pub mod error;
pub mod workflow;
