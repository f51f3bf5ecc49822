//! Scheduler store trait definition.
//!
//! Defines the storage interface for the durable run queue, schedule
//! state, completed-run history, and token-usage accounting. The
//! infra layer (`weavr-infra`) implements this trait with SQLite
//! persistence using a split reader/writer pool.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait
//! macro).

use chrono::{DateTime, Utc};
use weavr_types::error::RepositoryError;
use weavr_types::workflow::{
    CompletedRun, HistoryQuery, HistoryRecord, QueueRecord, QueueStatus, ScheduleRecord,
    ScheduleState, TokenUsageQuery, TokenUsageRecord,
};
use uuid::Uuid;

/// Input to `SchedulerStore::enqueue_run`.
#[derive(Debug, Clone)]
pub struct EnqueueInput {
    pub workflow_name: String,
    pub trigger_type: String,
    pub trigger_data: serde_json::Value,
    pub workflow_content: String,
    /// For cron catch-up runs, the original minute-boundary fire time;
    /// otherwise `None` (defaults to enqueue time).
    pub scheduled_for: Option<DateTime<Utc>>,
}

pub trait SchedulerStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Queue
    // -----------------------------------------------------------------------

    /// Insert a new queue row with `status = queued`, `attempts = 0`,
    /// `next_attempt_at = now`.
    fn enqueue_run(
        &self,
        input: EnqueueInput,
    ) -> impl std::future::Future<Output = Result<QueueRecord, RepositoryError>> + Send;

    /// In a single transaction, select the `limit` oldest queued rows
    /// whose `next_attempt_at <= now`, transition them to `running`, set
    /// `started_at = now`, and increment `attempts`. Rows whose status is
    /// no longer `queued` by claim time (concurrent claim race) are
    /// silently skipped, not returned.
    fn claim_next_runs(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<QueueRecord>, RepositoryError>> + Send;

    /// Terminal transition: `completed` or `failed`.
    fn mark_run_completed(
        &self,
        id: Uuid,
        status: QueueStatus,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Return a run to `queued` with a new `next_attempt_at` (queue-level
    /// retry).
    fn reschedule_run(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Rows left in `running` status, for startup crash recovery (open
    /// Question).
    fn list_stale_running(
        &self,
        older_than: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<QueueRecord>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Schedules
    // -----------------------------------------------------------------------

    fn upsert_schedule(
        &self,
        schedule: &ScheduleRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn set_schedule_last_run(
        &self,
        id: &str,
        last_run_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_schedule(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<ScheduleRecord>, RepositoryError>> + Send;

    fn set_schedule_status(
        &self,
        id: &str,
        status: ScheduleState,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn list_schedules_for_workflow(
        &self,
        workflow_name: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ScheduleRecord>, RepositoryError>> + Send;

    fn delete_schedules_for_workflow(
        &self,
        workflow_name: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // History / usage
    // -----------------------------------------------------------------------

    /// Atomic insert of a history row plus its logs and step rows (single
    /// transaction).
    fn save_completed_run(
        &self,
        completed: &CompletedRun,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_run_history(
        &self,
        query: &HistoryQuery,
    ) -> impl std::future::Future<Output = Result<Vec<HistoryRecord>, RepositoryError>> + Send;

    fn get_run_by_id(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<HistoryRecord>, RepositoryError>> + Send;

    fn track_token_usage(
        &self,
        record: &TokenUsageRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_token_usage(
        &self,
        query: &TokenUsageQuery,
    ) -> impl std::future::Future<Output = Result<Vec<TokenUsageRecord>, RepositoryError>> + Send;

    /// Delete history/tokens older than `daysToKeep`, cascading logs and
    /// steps.
    fn cleanup_old_data(
        &self,
        days_to_keep: u32,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
