//! Shared error kinds surfaced across crate boundaries.
//!
//! Each component in `weavr-core`/`weavr-infra` defines its own narrower
//! `thiserror` enum; `RepositoryError` here is the one error type that
//! crosses the core/infra boundary through the `SchedulerStore` trait,
//! split into a query-failure and a not-found variant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("store query failed: {0}")]
    Query(String),

    #[error("not found: {0}")]
    NotFound(String),
}
