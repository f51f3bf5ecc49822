//! SQLite storage layer.
//!
//! `SqliteSchedulerStore` backed by a split read/write connection pool
//! in WAL mode.

pub mod pool;
pub mod store;
