//! Run queue worker pool.
//!
//! A single polling loop, owned by whatever embeds the Trigger Scheduler,
//! that claims queued runs up to `maxConcurrency`, drives each through the
//! [`Executor`], and reports completion. Queue-level retry here is
//! exponential backoff rooted at `retryDelayMs` — a separate outer loop
//! from the per-step linear backoff in `retry.rs`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use weavr_types::config::SchedulerConfig;
use weavr_types::workflow::{
    CompletedRun, HistoryRecord, HistoryStatus, QueueRecord, QueueStatus, RunStatus, RunStepRow,
};

use crate::repository::store::SchedulerStore;

use super::definition;
use super::executor::{Executor, RunOutcome};
use super::scheduler::SchedulerEvents;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("claim race: run already taken by another worker")]
    ClaimRace,
    #[error("transient failure: {cause}")]
    Transient { cause: String },
}

/// Polls `store` for claimable runs and drives them through `executor`.
///
/// Generic over the store implementation rather than `Arc<dyn
/// SchedulerStore>` because `SchedulerStore` uses native async-fn-in-trait
/// (not object-safe); a process wires up exactly one concrete store, so
/// this costs nothing in practice.
pub struct RunQueueWorker<S: SchedulerStore> {
    store: Arc<S>,
    executor: Arc<Executor>,
    config: SchedulerConfig,
    events: Option<Arc<dyn SchedulerEvents>>,
    active: Arc<AtomicU32>,
}

impl<S: SchedulerStore + 'static> RunQueueWorker<S> {
    pub fn new(
        store: Arc<S>,
        executor: Arc<Executor>,
        config: SchedulerConfig,
        events: Option<Arc<dyn SchedulerEvents>>,
    ) -> Self {
        Self {
            store,
            executor,
            config,
            events,
            active: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Runs the poll loop until `shutdown` is cancelled. In-flight runs are
    /// not awaited on shutdown; their queue rows stay `running` and are
    /// recovered on next startup (stale-running recovery policy).
    pub async fn run(&self, shutdown: tokio_util::sync::CancellationToken) {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
            self.poll_once().await;
        }
    }

    /// One polling tick: claim as much spare concurrency as available and
    /// spawn each claimed run on its own task.
    pub async fn poll_once(&self) {
        let active = self.active.load(Ordering::SeqCst);
        let available = self.config.max_concurrency.saturating_sub(active);
        if available == 0 {
            return;
        }

        let claimed = match self.store.claim_next_runs(available).await {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(error = %err, "failed to claim queued runs");
                return;
            }
        };

        for record in claimed {
            self.active.fetch_add(1, Ordering::SeqCst);
            let store = self.store.clone();
            let executor = self.executor.clone();
            let config = self.config.clone();
            let events = self.events.clone();
            let active = self.active.clone();
            tokio::spawn(async move {
                Self::drive(&store, &executor, &config, &events, record).await;
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }

    async fn drive(
        store: &Arc<S>,
        executor: &Arc<Executor>,
        config: &SchedulerConfig,
        events: &Option<Arc<dyn SchedulerEvents>>,
        record: QueueRecord,
    ) {
        let workflow = match definition::parse(&record.workflow_content, &record.workflow_name) {
            Ok(workflow) => workflow,
            Err(err) => {
                Self::terminal(
                    store,
                    events,
                    &record,
                    QueueStatus::Failed,
                    HistoryStatus::Failed,
                    None,
                    Some(err.to_string()),
                )
                .await;
                return;
            }
        };

        let outcome = executor
            .run(&workflow, record.id, record.trigger_data.clone())
            .await;

        match outcome.status {
            RunStatus::Success => {
                Self::terminal(
                    store,
                    events,
                    &record,
                    QueueStatus::Completed,
                    HistoryStatus::Success,
                    Some(&outcome),
                    None,
                )
                .await;
            }
            _ => {
                let error = outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "run failed".to_string());
                if record.attempts < config.max_attempts {
                    let delay_ms = config
                        .retry_delay_ms
                        .saturating_mul(1u64 << record.attempts.saturating_sub(1).min(31));
                    let next_attempt_at =
                        Utc::now() + chrono::Duration::milliseconds(delay_ms as i64);
                    if let Err(err) = store
                        .reschedule_run(record.id, next_attempt_at, Some(&error))
                        .await
                    {
                        tracing::warn!(error = %err, run_id = %record.id, "failed to reschedule run");
                    }
                } else {
                    Self::terminal(
                        store,
                        events,
                        &record,
                        QueueStatus::Failed,
                        HistoryStatus::Failed,
                        Some(&outcome),
                        Some(error),
                    )
                    .await;
                }
            }
        }
    }

    /// Shared terminal-transition path: marks the queue row terminal,
    /// writes the history/logs/step rows atomically, and fires the
    /// completion callback. Used both for executed runs and for runs that
    /// never made it past parsing.
    async fn terminal(
        store: &Arc<S>,
        events: &Option<Arc<dyn SchedulerEvents>>,
        record: &QueueRecord,
        queue_status: QueueStatus,
        history_status: HistoryStatus,
        outcome: Option<&RunOutcome>,
        fallback_error: Option<String>,
    ) {
        let error = outcome.and_then(|o| o.error.clone()).or(fallback_error);

        if let Err(err) = store
            .mark_run_completed(record.id, queue_status, error.as_deref())
            .await
        {
            tracing::warn!(error = %err, run_id = %record.id, "failed to mark run completed");
        }

        let started_at = outcome.map(|o| o.started_at).unwrap_or(record.created_at);
        let completed_at = outcome.map(|o| o.completed_at).unwrap_or_else(Utc::now);
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0);

        let logs = outcome.map(|o| o.logs.clone()).unwrap_or_default();
        let steps: Vec<RunStepRow> = outcome
            .map(|o| {
                o.steps
                    .values()
                    .map(|s| RunStepRow {
                        run_id: record.id,
                        step_id: s.id.clone(),
                        status: s.status,
                        duration_ms: s.duration_ms,
                        error: s.error.clone(),
                        output: s.output.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let history = HistoryRecord {
            id: record.id,
            workflow_name: record.workflow_name.clone(),
            status: history_status,
            started_at,
            completed_at,
            duration_ms,
            error: error.clone(),
            trigger_type: Some(record.trigger_type.clone()),
            trigger_data: Some(record.trigger_data.clone()),
            created_at: record.created_at,
        };

        let completed = CompletedRun {
            history,
            logs,
            steps,
        };
        if let Err(err) = store.save_completed_run(&completed).await {
            tracing::warn!(error = %err, run_id = %record.id, "failed to save completed run history");
        }

        if let Some(events) = events {
            let status_label = match history_status {
                HistoryStatus::Success => "success",
                HistoryStatus::Failed => "failed",
            };
            events.on_workflow_completed(&record.workflow_name, record.id, status_label, error.as_deref());
        }
    }
}
