//! Trigger Manager and Trigger Scheduler.
//!
//! Two cooperating pieces live in this module:
//!
//! - [`TriggerManager`] owns the lifecycle of plugin-defined long-poll
//!   trigger sources: `setup`/`teardown` through the registry's
//!   [`TriggerDescriptor`], keyed by the stable `scheduleId` and
//!   idempotent on re-registration.
//! - [`TriggerScheduler`] is the process's single in-memory map of
//!   scheduled workflows (owned exclusively by this struct): it
//!   loads workflow files, installs cron jobs via
//!   `tokio-cron-scheduler`, matches inbound webhook/GitHub events, runs
//!   missed-tick catch-up with `croner`, and delegates plugin triggers to
//!   the `TriggerManager`.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use weavr_types::config::SchedulerConfig;
use weavr_types::error::RepositoryError;
use weavr_types::workflow::{ScheduleRecord, ScheduleState, Trigger};

use crate::repository::store::{EnqueueInput, SchedulerStore};

use super::definition::{self, ParseError};
use super::registry::{ActionError, EmitFn, PluginRegistry, TriggerHandle};

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid schedule: {0}")]
    ScheduleInvalid(String),

    #[error("trigger setup failed: {0}")]
    Setup(String),

    #[error("store error: {0}")]
    Store(#[from] RepositoryError),

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("unknown schedule '{0}'")]
    UnknownSchedule(String),
}

impl From<ActionError> for TriggerError {
    fn from(err: ActionError) -> Self {
        TriggerError::Setup(err.to_string())
    }
}

/// Callbacks a gateway registers to observe scheduler/executor activity
/// (the scheduler's callback hooks). All methods default to no-ops so a caller only
/// overrides what it needs.
pub trait SchedulerEvents: Send + Sync {
    fn on_workflow_triggered(&self, _workflow_name: &str, _run_id: Uuid) {}
    fn on_workflow_completed(
        &self,
        _workflow_name: &str,
        _run_id: Uuid,
        _status: &str,
        _error: Option<&str>,
    ) {
    }
    fn on_step_start(&self, _run_id: Uuid, _step_id: &str) {}
    fn on_step_complete(&self, _run_id: Uuid, _step_id: &str) {}
    fn on_log(&self, _run_id: Uuid, _message: &str) {}
}

/// Result of dispatching an inbound webhook/GitHub event: which
/// workflows fired and the run ids that were enqueued for them.
#[derive(Debug, Default, Clone)]
pub struct DispatchResult {
    pub triggered: Vec<String>,
    pub run_ids: Vec<Uuid>,
}

// ---------------------------------------------------------------------------
// TriggerManager
// ---------------------------------------------------------------------------

/// Owns the lifecycle of plugin-defined long-poll trigger sources.
/// Stable across a `TriggerScheduler`'s in-memory cron/webhook map --
/// this piece only knows about `scheduleId -> TriggerHandle`.
pub struct TriggerManager {
    registry: Arc<PluginRegistry>,
    handles: DashMap<String, Box<dyn TriggerHandle>>,
}

impl TriggerManager {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            handles: DashMap::new(),
        }
    }

    /// Set up a plugin trigger under `schedule_id`. Idempotent: any
    /// prior handle registered under the same id is torn down first.
    pub async fn setup_trigger(
        &self,
        schedule_id: String,
        plugin_type: &str,
        config: &Value,
        emit: EmitFn,
    ) -> Result<(), TriggerError> {
        self.teardown_existing(&schedule_id).await;
        let descriptor = self
            .registry
            .get_trigger(plugin_type)
            .map_err(|e| TriggerError::Setup(e.to_string()))?;
        let handle = descriptor.setup(config, emit).await?;
        self.handles.insert(schedule_id, handle);
        Ok(())
    }

    async fn teardown_existing(&self, schedule_id: &str) {
        if let Some((_, handle)) = self.handles.remove(schedule_id) {
            handle.teardown().await;
        }
    }

    /// Tear down and forget the trigger registered under `schedule_id`,
    /// if any.
    pub async fn stop_trigger(&self, schedule_id: &str) {
        self.teardown_existing(schedule_id).await;
    }

    /// Tear down every registered plugin trigger.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.handles.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.teardown_existing(&id).await;
        }
    }

    pub fn active_count(&self) -> usize {
        self.handles.len()
    }
}

// ---------------------------------------------------------------------------
// TriggerScheduler
// ---------------------------------------------------------------------------

/// One entry in the scheduler's in-memory map of scheduled workflows
/// (owned by the Trigger Scheduler; all reads/writes happen on the
/// scheduler's task).
#[derive(Clone)]
struct ScheduledEntry {
    workflow_name: String,
    workflow_content: String,
    trigger: Trigger,
    status: ScheduleState,
    cron_job_id: Option<Uuid>,
    cron_expr: Option<String>,
}

/// Loads workflow files, installs triggers, dispatches inbound events,
/// and performs cron catch-up. Generic over the store implementation for
/// the same reason as [`super::worker::RunQueueWorker`].
pub struct TriggerScheduler<S: SchedulerStore> {
    store: Arc<S>,
    registry: Arc<PluginRegistry>,
    config: SchedulerConfig,
    events: Option<Arc<dyn SchedulerEvents>>,
    cron: Arc<RwLock<Option<JobScheduler>>>,
    entries: DashMap<String, ScheduledEntry>,
    trigger_manager: TriggerManager,
}

impl<S: SchedulerStore + 'static> TriggerScheduler<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<PluginRegistry>,
        config: SchedulerConfig,
        events: Option<Arc<dyn SchedulerEvents>>,
    ) -> Self {
        let trigger_manager = TriggerManager::new(registry.clone());
        Self {
            store,
            registry,
            config,
            events,
            cron: Arc::new(RwLock::new(None)),
            entries: DashMap::new(),
            trigger_manager,
        }
    }

    /// Starts the underlying `tokio-cron-scheduler`. Must be called
    /// before any `cron.schedule` trigger is installed.
    pub async fn start(&self) -> Result<(), TriggerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| TriggerError::Setup(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| TriggerError::Setup(e.to_string()))?;
        *self.cron.write().await = Some(scheduler);
        Ok(())
    }

    /// Tears down every cron job and plugin trigger (process-level
    /// shutdown calls `stopAll`).
    pub async fn stop_all(&self) {
        self.trigger_manager.stop_all().await;
        let mut guard = self.cron.write().await;
        if let Some(mut scheduler) = guard.take() {
            let _ = scheduler.shutdown().await;
        }
        self.entries.clear();
    }

    /// Load-and-schedule: parses every workflow file in `dir` and
    /// installs each of its declared triggers.
    pub async fn load_and_schedule(&self, dir: &Path) -> Result<usize, TriggerError> {
        let workflows = definition::load_dir(dir)?;
        let mut count = 0;
        for workflow in &workflows {
            let content = definition::serialize(workflow)?;
            for (index, trigger) in workflow.triggers.iter().enumerate() {
                if let Err(err) = self
                    .schedule_trigger(&workflow.name, &content, index, trigger.clone())
                    .await
                {
                    tracing::warn!(
                        workflow = %workflow.name,
                        trigger_index = index,
                        error = %err,
                        "failed to schedule trigger, skipping"
                    );
                    continue;
                }
                count += 1;
            }
        }
        Ok(count)
    }

    /// Install a single trigger for `workflow_name` at `index`.
    pub async fn schedule_trigger(
        &self,
        workflow_name: &str,
        workflow_content: &str,
        index: usize,
        trigger: Trigger,
    ) -> Result<(), TriggerError> {
        let schedule_id = ScheduleRecord::make_id(workflow_name, trigger.type_name(), index);

        match &trigger {
            Trigger::CronSchedule {
                expression,
                timezone,
            } => {
                self.install_cron(
                    schedule_id,
                    workflow_name.to_string(),
                    workflow_content.to_string(),
                    expression.clone(),
                    timezone.clone(),
                )
                .await
            }
            Trigger::HttpWebhook { .. } | Trigger::EmailInbound { .. } => {
                self.install_passive(schedule_id, workflow_name, workflow_content, trigger)
                    .await
            }
            Trigger::Plugin { plugin_type, config } => {
                self.install_plugin(
                    schedule_id,
                    workflow_name.to_string(),
                    workflow_content.to_string(),
                    plugin_type.clone(),
                    config.clone(),
                )
                .await
            }
        }
    }

    // -----------------------------------------------------------------
    // cron.schedule
    // -----------------------------------------------------------------

    async fn install_cron(
        &self,
        schedule_id: String,
        workflow_name: String,
        workflow_content: String,
        expression: String,
        timezone: Option<String>,
    ) -> Result<(), TriggerError> {
        let cron_expr = normalize_cron(&expression)
            .map_err(|e| TriggerError::ScheduleInvalid(e.to_string()))?;
        cron_expr
            .parse::<croner::Cron>()
            .map_err(|e| TriggerError::ScheduleInvalid(e.to_string()))?;

        let existing = self.store.get_schedule(&schedule_id).await?;
        let last_run_at = existing.and_then(|s| s.last_run_at);

        let record = ScheduleRecord {
            id: schedule_id.clone(),
            workflow_name: workflow_name.clone(),
            trigger_type: "cron.schedule".to_string(),
            cron_expression: Some(cron_expr.clone()),
            timezone: timezone.clone(),
            last_run_at,
            status: ScheduleState::Active,
        };
        self.store.upsert_schedule(&record).await?;

        if let Some(last) = last_run_at {
            self.catch_up(&schedule_id, &workflow_name, &workflow_content, &cron_expr, last)
                .await;
        }

        let job_id = self
            .spawn_cron_job(&schedule_id, &workflow_name, &workflow_content, &cron_expr)
            .await?;

        self.entries.insert(
            schedule_id,
            ScheduledEntry {
                workflow_name,
                workflow_content,
                trigger: Trigger::CronSchedule { expression, timezone },
                status: ScheduleState::Active,
                cron_job_id: Some(job_id),
                cron_expr: Some(cron_expr),
            },
        );
        Ok(())
    }

    async fn spawn_cron_job(
        &self,
        schedule_id: &str,
        workflow_name: &str,
        workflow_content: &str,
        cron_expr: &str,
    ) -> Result<Uuid, TriggerError> {
        let guard = self.cron.read().await;
        let scheduler = guard
            .as_ref()
            .ok_or_else(|| TriggerError::Setup("cron scheduler not started".to_string()))?;

        let store = self.store.clone();
        let events = self.events.clone();
        let sid = schedule_id.to_string();
        let wf_name = workflow_name.to_string();
        let wf_content = workflow_content.to_string();
        let expr = cron_expr.to_string();

        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let store = store.clone();
            let events = events.clone();
            let sid = sid.clone();
            let wf_name = wf_name.clone();
            let wf_content = wf_content.clone();
            let expr = expr.clone();
            Box::pin(async move {
                Self::fire_cron(&store, &events, &sid, &wf_name, &wf_content, &expr).await;
            })
        })
        .map_err(|e| TriggerError::ScheduleInvalid(e.to_string()))?;

        let job_id = job.guid();
        scheduler
            .add(job)
            .await
            .map_err(|e| TriggerError::Setup(e.to_string()))?;
        Ok(job_id)
    }

    async fn fire_cron(
        store: &Arc<S>,
        events: &Option<Arc<dyn SchedulerEvents>>,
        schedule_id: &str,
        workflow_name: &str,
        workflow_content: &str,
        expression: &str,
    ) {
        let now = Utc::now();
        let trigger_data = serde_json::json!({
            "type": "cron",
            "expression": expression,
            "scheduledFor": now.to_rfc3339(),
        });

        match store
            .enqueue_run(EnqueueInput {
                workflow_name: workflow_name.to_string(),
                trigger_type: "cron.schedule".to_string(),
                trigger_data,
                workflow_content: workflow_content.to_string(),
                scheduled_for: Some(now),
            })
            .await
        {
            Ok(record) => {
                if let Some(ev) = events {
                    ev.on_workflow_triggered(workflow_name, record.id);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, workflow = %workflow_name, "failed to enqueue cron run");
            }
        }

        if let Err(err) = store.set_schedule_last_run(schedule_id, now).await {
            tracing::warn!(error = %err, schedule_id = %schedule_id, "failed to persist schedule last_run_at");
        }
    }

    /// Enumerate and enqueue missed ticks in `(last_run_at, now]`,
    /// clamped to `catchUpWindowMs` and capped at `maxCatchUpRuns`.
    async fn catch_up(
        &self,
        schedule_id: &str,
        workflow_name: &str,
        workflow_content: &str,
        cron_expr: &str,
        last_run_at: DateTime<Utc>,
    ) {
        let now = Utc::now();
        let window_start = now - chrono::Duration::milliseconds(self.config.catch_up_window_ms);
        let from = last_run_at.max(window_start);

        let Ok(cron) = cron_expr.parse::<croner::Cron>() else {
            return;
        };

        let mut missed: Vec<DateTime<Utc>> = Vec::new();
        for next in cron.iter_after(from) {
            if next >= now || missed.len() >= self.config.max_catch_up_runs as usize {
                break;
            }
            missed.push(next);
        }

        if missed.is_empty() {
            return;
        }

        for fire_time in &missed {
            let trigger_data = serde_json::json!({
                "type": "cron",
                "expression": cron_expr,
                "scheduledFor": fire_time.to_rfc3339(),
            });
            if let Err(err) = self
                .store
                .enqueue_run(EnqueueInput {
                    workflow_name: workflow_name.to_string(),
                    trigger_type: "cron.schedule".to_string(),
                    trigger_data,
                    workflow_content: workflow_content.to_string(),
                    scheduled_for: Some(*fire_time),
                })
                .await
            {
                tracing::warn!(error = %err, workflow = %workflow_name, "failed to enqueue catch-up run");
            }
        }

        if let Some(newest) = missed.last() {
            if let Err(err) = self.store.set_schedule_last_run(schedule_id, *newest).await {
                tracing::warn!(error = %err, schedule_id = %schedule_id, "failed to advance schedule last_run_at after catch-up");
            }
        }
    }

    // -----------------------------------------------------------------
    // http.webhook / email.inbound -- no background job
    // -----------------------------------------------------------------

    async fn install_passive(
        &self,
        schedule_id: String,
        workflow_name: &str,
        workflow_content: &str,
        trigger: Trigger,
    ) -> Result<(), TriggerError> {
        let record = ScheduleRecord {
            id: schedule_id.clone(),
            workflow_name: workflow_name.to_string(),
            trigger_type: trigger.type_name().to_string(),
            cron_expression: None,
            timezone: None,
            last_run_at: None,
            status: ScheduleState::Active,
        };
        self.store.upsert_schedule(&record).await?;

        self.entries.insert(
            schedule_id,
            ScheduledEntry {
                workflow_name: workflow_name.to_string(),
                workflow_content: workflow_content.to_string(),
                trigger,
                status: ScheduleState::Active,
                cron_job_id: None,
                cron_expr: None,
            },
        );
        Ok(())
    }

    /// Dispatch an inbound webhook body to every active schedule whose
    /// path matches.
    pub async fn trigger_webhook(&self, path: &str, data: Value) -> DispatchResult {
        let mut result = DispatchResult::default();
        let matches: Vec<(String, ScheduledEntry)> = self
            .entries
            .iter()
            .filter(|e| e.status == ScheduleState::Active)
            .filter(|e| webhook_path_matches(&e.trigger, path))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (_, entry) in matches {
            let trigger_data = serde_json::json!({
                "type": entry.trigger.type_name(),
                "path": path,
                "data": data.clone(),
            });
            match self
                .store
                .enqueue_run(EnqueueInput {
                    workflow_name: entry.workflow_name.clone(),
                    trigger_type: entry.trigger.type_name().to_string(),
                    trigger_data,
                    workflow_content: entry.workflow_content.clone(),
                    scheduled_for: None,
                })
                .await
            {
                Ok(record) => {
                    if let Some(ev) = &self.events {
                        ev.on_workflow_triggered(&entry.workflow_name, record.id);
                    }
                    result.triggered.push(entry.workflow_name.clone());
                    result.run_ids.push(record.id);
                }
                Err(err) => {
                    tracing::warn!(error = %err, workflow = %entry.workflow_name, "failed to enqueue webhook run");
                }
            }
        }
        result
    }

    /// Dispatch a parsed GitHub event to every active schedule whose
    /// plugin trigger type and config (`repo`/`branch`/`events`) match
    ///
    pub async fn trigger_github_event(&self, event_type: &str, payload: Value) -> DispatchResult {
        let mut result = DispatchResult::default();
        let matches: Vec<ScheduledEntry> = self
            .entries
            .iter()
            .filter(|e| e.status == ScheduleState::Active)
            .filter(|e| github_event_matches(&e.trigger, event_type, &payload))
            .map(|e| e.value().clone())
            .collect();

        for entry in matches {
            let trigger_data = serde_json::json!({
                "type": format!("github.{event_type}"),
                "event": event_type,
                "payload": payload.clone(),
            });
            match self
                .store
                .enqueue_run(EnqueueInput {
                    workflow_name: entry.workflow_name.clone(),
                    trigger_type: format!("github.{event_type}"),
                    trigger_data,
                    workflow_content: entry.workflow_content.clone(),
                    scheduled_for: None,
                })
                .await
            {
                Ok(record) => {
                    if let Some(ev) = &self.events {
                        ev.on_workflow_triggered(&entry.workflow_name, record.id);
                    }
                    result.triggered.push(entry.workflow_name.clone());
                    result.run_ids.push(record.id);
                }
                Err(err) => {
                    tracing::warn!(error = %err, workflow = %entry.workflow_name, "failed to enqueue github event run");
                }
            }
        }
        result
    }

    // -----------------------------------------------------------------
    // Plugin (custom long-poll) triggers -- delegated to TriggerManager
    // -----------------------------------------------------------------

    async fn install_plugin(
        &self,
        schedule_id: String,
        workflow_name: String,
        workflow_content: String,
        plugin_type: String,
        config: serde_json::Map<String, Value>,
    ) -> Result<(), TriggerError> {
        let record = ScheduleRecord {
            id: schedule_id.clone(),
            workflow_name: workflow_name.clone(),
            trigger_type: plugin_type.clone(),
            cron_expression: None,
            timezone: None,
            last_run_at: None,
            status: ScheduleState::Active,
        };
        self.store.upsert_schedule(&record).await?;

        let emit = self.make_emit(workflow_name.clone(), workflow_content.clone(), plugin_type.clone());
        let config_value = Value::Object(config.clone());
        self.trigger_manager
            .setup_trigger(schedule_id.clone(), &plugin_type, &config_value, emit)
            .await?;

        self.entries.insert(
            schedule_id,
            ScheduledEntry {
                workflow_name,
                workflow_content,
                trigger: Trigger::Plugin { plugin_type, config },
                status: ScheduleState::Active,
                cron_job_id: None,
                cron_expr: None,
            },
        );
        Ok(())
    }

    /// Build the `emit` callback handed to a plugin's `setup`: wraps a
    /// fired event into `{ type, ...payload }` and enqueues it through
    /// the store.
    fn make_emit(&self, workflow_name: String, workflow_content: String, trigger_type: String) -> EmitFn {
        let store = self.store.clone();
        let events = self.events.clone();
        Arc::new(move |payload: Value| {
            let store = store.clone();
            let events = events.clone();
            let workflow_name = workflow_name.clone();
            let workflow_content = workflow_content.clone();
            let trigger_type = trigger_type.clone();
            Box::pin(async move {
                let mut envelope = serde_json::Map::new();
                envelope.insert("type".to_string(), Value::String(trigger_type.clone()));
                match payload {
                    Value::Object(map) => {
                        for (k, v) in map {
                            envelope.insert(k, v);
                        }
                    }
                    other => {
                        envelope.insert("payload".to_string(), other);
                    }
                }

                match store
                    .enqueue_run(EnqueueInput {
                        workflow_name: workflow_name.clone(),
                        trigger_type: trigger_type.clone(),
                        trigger_data: Value::Object(envelope),
                        workflow_content: workflow_content.clone(),
                        scheduled_for: None,
                    })
                    .await
                {
                    Ok(record) => {
                        if let Some(ev) = &events {
                            ev.on_workflow_triggered(&workflow_name, record.id);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, workflow = %workflow_name, "failed to enqueue run from plugin trigger");
                    }
                }
            })
        })
    }

    // -----------------------------------------------------------------
    // Pause / Resume / Unschedule
    // -----------------------------------------------------------------

    /// Pause every trigger belonging to `workflow_name`: stops cron jobs
    /// and tears down plugin trigger handles, leaving the schedule rows
    /// (and their `last_run_at`) intact for catch-up on resume.
    pub async fn pause(&self, workflow_name: &str) -> Result<(), TriggerError> {
        for id in self.ids_for_workflow(workflow_name) {
            self.pause_one(&id).await?;
        }
        Ok(())
    }

    async fn pause_one(&self, schedule_id: &str) -> Result<(), TriggerError> {
        if let Some(mut entry) = self.entries.get_mut(schedule_id) {
            if let Some(job_id) = entry.cron_job_id.take() {
                if let Some(scheduler) = self.cron.read().await.as_ref() {
                    let _ = scheduler.remove(&job_id).await;
                }
            }
            if matches!(entry.trigger, Trigger::Plugin { .. }) {
                entry.status = ScheduleState::Paused;
            } else {
                entry.status = ScheduleState::Paused;
            }
        } else {
            return Err(TriggerError::UnknownSchedule(schedule_id.to_string()));
        }

        if self
            .entries
            .get(schedule_id)
            .map(|e| matches!(e.trigger, Trigger::Plugin { .. }))
            .unwrap_or(false)
        {
            self.trigger_manager.stop_trigger(schedule_id).await;
        }

        self.store
            .set_schedule_status(schedule_id, ScheduleState::Paused)
            .await?;
        Ok(())
    }

    /// Resume every trigger belonging to `workflow_name`: re-installs
    /// cron jobs (running catch-up against the persisted `last_run_at`
    /// first, bounded by the catch-up window so a long pause doesn't
    /// thundering-herd) or re-invokes plugin `setup`.
    pub async fn resume(&self, workflow_name: &str) -> Result<(), TriggerError> {
        for id in self.ids_for_workflow(workflow_name) {
            self.resume_one(&id).await?;
        }
        Ok(())
    }

    async fn resume_one(&self, schedule_id: &str) -> Result<(), TriggerError> {
        let entry = self
            .entries
            .get(schedule_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TriggerError::UnknownSchedule(schedule_id.to_string()))?;

        match &entry.trigger {
            Trigger::CronSchedule { .. } => {
                let cron_expr = entry
                    .cron_expr
                    .clone()
                    .ok_or_else(|| TriggerError::ScheduleInvalid("missing cron expression".to_string()))?;

                if let Some(record) = self.store.get_schedule(schedule_id).await? {
                    if let Some(last) = record.last_run_at {
                        self.catch_up(
                            schedule_id,
                            &entry.workflow_name,
                            &entry.workflow_content,
                            &cron_expr,
                            last,
                        )
                        .await;
                    }
                }

                let job_id = self
                    .spawn_cron_job(schedule_id, &entry.workflow_name, &entry.workflow_content, &cron_expr)
                    .await?;
                if let Some(mut e) = self.entries.get_mut(schedule_id) {
                    e.cron_job_id = Some(job_id);
                    e.status = ScheduleState::Active;
                }
            }
            Trigger::Plugin { plugin_type, config } => {
                let emit = self.make_emit(
                    entry.workflow_name.clone(),
                    entry.workflow_content.clone(),
                    plugin_type.clone(),
                );
                let config_value = Value::Object(config.clone());
                self.trigger_manager
                    .setup_trigger(schedule_id.to_string(), plugin_type, &config_value, emit)
                    .await?;
                if let Some(mut e) = self.entries.get_mut(schedule_id) {
                    e.status = ScheduleState::Active;
                }
            }
            Trigger::HttpWebhook { .. } | Trigger::EmailInbound { .. } => {
                if let Some(mut e) = self.entries.get_mut(schedule_id) {
                    e.status = ScheduleState::Active;
                }
            }
        }

        self.store
            .set_schedule_status(schedule_id, ScheduleState::Active)
            .await?;
        Ok(())
    }

    /// Remove every trigger belonging to `workflow_name` entirely:
    /// stops jobs/handles, drops in-memory entries, deletes schedule
    /// rows.
    pub async fn unschedule(&self, workflow_name: &str) -> Result<(), TriggerError> {
        for id in self.ids_for_workflow(workflow_name) {
            if let Some((_, entry)) = self.entries.remove(&id) {
                if let Some(job_id) = entry.cron_job_id {
                    if let Some(scheduler) = self.cron.read().await.as_ref() {
                        let _ = scheduler.remove(&job_id).await;
                    }
                }
                if matches!(entry.trigger, Trigger::Plugin { .. }) {
                    self.trigger_manager.stop_trigger(&id).await;
                }
            }
        }
        self.store.delete_schedules_for_workflow(workflow_name).await?;
        Ok(())
    }

    fn ids_for_workflow(&self, workflow_name: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.workflow_name == workflow_name)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn scheduled_workflow_count(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.workflow_name.clone())
            .collect::<std::collections::HashSet<_>>()
            .len()
    }
}

// ---------------------------------------------------------------------------
// Matching helpers
// ---------------------------------------------------------------------------

/// Normalize a cron expression to the 6-field (seconds-first) form
/// `tokio-cron-scheduler`/`croner` expect: a bare 5-field expression gets
/// `"0 "` prepended, a 6-field expression passes through unchanged.
fn normalize_cron(expression: &str) -> Result<String, TriggerError> {
    let trimmed = expression.trim();
    let fields = trimmed.split_whitespace().count();
    match fields {
        5 => Ok(format!("0 {trimmed}")),
        6 => Ok(trimmed.to_string()),
        _ => Err(TriggerError::ScheduleInvalid(format!(
            "expected a 5- or 6-field cron expression, got '{expression}'"
        ))),
    }
}

/// Webhook path matching: exact match, or match with a single leading
/// slash added to either side.
fn webhook_path_matches(trigger: &Trigger, incoming: &str) -> bool {
    let configured = match trigger {
        Trigger::HttpWebhook { path, .. } => path.as_str(),
        Trigger::EmailInbound { path, .. } => path.as_deref().unwrap_or("email"),
        _ => return false,
    };
    path_equivalent(configured, incoming)
}

fn path_equivalent(configured: &str, incoming: &str) -> bool {
    if configured == incoming {
        return true;
    }
    if format!("/{configured}") == incoming {
        return true;
    }
    if configured == format!("/{incoming}") {
        return true;
    }
    false
}

/// GitHub event matching: `triggerType` equals the fired event, plus
/// optional `config.repo`, `config.branch` (push), or `config.events`
/// allow-list (pull_request).
fn github_event_matches(trigger: &Trigger, event_type: &str, payload: &Value) -> bool {
    let Trigger::Plugin { plugin_type, config } = trigger else {
        return false;
    };
    if plugin_type != event_type {
        return false;
    }

    if let Some(repo) = config.get("repo").and_then(Value::as_str) {
        let payload_repo = payload
            .get("repository")
            .and_then(|r| r.get("full_name"))
            .and_then(Value::as_str);
        if payload_repo != Some(repo) {
            return false;
        }
    }

    if event_type == "push" {
        if let Some(branch) = config.get("branch").and_then(Value::as_str) {
            let payload_branch = payload
                .get("ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix("refs/heads/"));
            if payload_branch != Some(branch) {
                return false;
            }
        }
    }

    if event_type == "pull_request" {
        if let Some(events) = config.get("events").and_then(Value::as_array) {
            let action = payload.get("action").and_then(Value::as_str).unwrap_or("");
            if !events.iter().any(|e| e.as_str() == Some(action)) {
                return false;
            }
        }
    }

    true
}
