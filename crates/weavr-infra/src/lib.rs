//! Infrastructure layer for the Weavr scheduler core.
//!
//! Implements the repository and boundary traits defined in
//! `weavr-core`: SQLite-backed durable storage (`sqlite`), the
//! `<home>/.weavr/config.yaml` loader (`config`), an HTTP-backed
//! `MemoryFetcher` (`memory_fetcher`), and a filesystem-watch
//! `TriggerDescriptor` (`file_trigger`).

pub mod config;
pub mod file_trigger;
pub mod memory_fetcher;
pub mod sqlite;
