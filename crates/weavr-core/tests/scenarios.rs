//! End-to-end scenario coverage spanning parser, DAG executor, worker
//! pool, and trigger scheduler together, against an in-memory store.
//! Complements the per-module unit tests with the cross-module paths a
//! single module's test block can't exercise on its own.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use weavr_core::repository::store::{EnqueueInput, SchedulerStore};
use weavr_core::workflow::definition;
use weavr_core::workflow::executor::Executor;
use weavr_core::workflow::memory::{MemoryError, MemoryFetcher};
use weavr_core::workflow::registry::{Action, ActionError, ActionResult, PluginRegistry};
use weavr_core::workflow::worker::RunQueueWorker;
use weavr_core::workflow::scheduler::TriggerScheduler;
use weavr_types::config::SchedulerConfig;
use weavr_types::error::RepositoryError;
use weavr_types::workflow::{
    CompletedRun, HistoryQuery, HistoryRecord, HistoryStatus, QueueRecord, QueueStatus, RunStatus,
    ScheduleRecord, ScheduleState, TokenUsageQuery, TokenUsageRecord,
};

/// Minimal in-memory `SchedulerStore`, enough to drive the worker and
/// trigger scheduler across a full poll/claim/complete cycle.
#[derive(Default)]
struct MemStore {
    queue: Mutex<Vec<QueueRecord>>,
    history: Mutex<Vec<CompletedRun>>,
    schedules: DashMap<String, ScheduleRecord>,
}

impl SchedulerStore for MemStore {
    async fn enqueue_run(&self, input: EnqueueInput) -> Result<QueueRecord, RepositoryError> {
        let now = Utc::now();
        let record = QueueRecord {
            id: Uuid::new_v4(),
            workflow_name: input.workflow_name,
            trigger_type: input.trigger_type,
            trigger_data: input.trigger_data,
            workflow_content: input.workflow_content,
            status: QueueStatus::Queued,
            attempts: 0,
            next_attempt_at: input.scheduled_for.unwrap_or(now),
            created_at: now,
            started_at: None,
            completed_at: None,
            scheduled_for: input.scheduled_for,
            error: None,
        };
        self.queue.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn claim_next_runs(&self, limit: u32) -> Result<Vec<QueueRecord>, RepositoryError> {
        let now = Utc::now();
        let mut queue = self.queue.lock().unwrap();
        let mut claimed = Vec::new();
        for record in queue.iter_mut() {
            if claimed.len() as u32 >= limit {
                break;
            }
            if record.status == QueueStatus::Queued && record.next_attempt_at <= now {
                record.status = QueueStatus::Running;
                record.started_at = Some(now);
                record.attempts += 1;
                claimed.push(record.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_run_completed(
        &self,
        id: Uuid,
        status: QueueStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut queue = self.queue.lock().unwrap();
        if let Some(record) = queue.iter_mut().find(|r| r.id == id) {
            record.status = status;
            record.completed_at = Some(Utc::now());
            record.error = error.map(String::from);
        }
        Ok(())
    }

    async fn reschedule_run(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut queue = self.queue.lock().unwrap();
        if let Some(record) = queue.iter_mut().find(|r| r.id == id) {
            record.status = QueueStatus::Queued;
            record.next_attempt_at = next_attempt_at;
            record.error = error.map(String::from);
        }
        Ok(())
    }

    async fn list_stale_running(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<QueueRecord>, RepositoryError> {
        let queue = self.queue.lock().unwrap();
        Ok(queue
            .iter()
            .filter(|r| r.status == QueueStatus::Running && r.started_at.map(|s| s < older_than).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn upsert_schedule(&self, schedule: &ScheduleRecord) -> Result<(), RepositoryError> {
        self.schedules.insert(schedule.id.clone(), schedule.clone());
        Ok(())
    }

    async fn set_schedule_last_run(
        &self,
        id: &str,
        last_run_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        if let Some(mut entry) = self.schedules.get_mut(id) {
            entry.last_run_at = Some(last_run_at);
        }
        Ok(())
    }

    async fn get_schedule(&self, id: &str) -> Result<Option<ScheduleRecord>, RepositoryError> {
        Ok(self.schedules.get(id).map(|e| e.clone()))
    }

    async fn set_schedule_status(
        &self,
        id: &str,
        status: ScheduleState,
    ) -> Result<(), RepositoryError> {
        if let Some(mut entry) = self.schedules.get_mut(id) {
            entry.status = status;
        }
        Ok(())
    }

    async fn list_schedules_for_workflow(
        &self,
        workflow_name: &str,
    ) -> Result<Vec<ScheduleRecord>, RepositoryError> {
        Ok(self
            .schedules
            .iter()
            .filter(|e| e.workflow_name == workflow_name)
            .map(|e| e.clone())
            .collect())
    }

    async fn delete_schedules_for_workflow(&self, workflow_name: &str) -> Result<(), RepositoryError> {
        self.schedules.retain(|_, v| v.workflow_name != workflow_name);
        Ok(())
    }

    async fn save_completed_run(&self, completed: &CompletedRun) -> Result<(), RepositoryError> {
        self.history.lock().unwrap().push(completed.clone());
        Ok(())
    }

    async fn get_run_history(&self, _query: &HistoryQuery) -> Result<Vec<HistoryRecord>, RepositoryError> {
        Ok(self.history.lock().unwrap().iter().map(|c| c.history.clone()).collect())
    }

    async fn get_run_by_id(&self, id: Uuid) -> Result<Option<HistoryRecord>, RepositoryError> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.history.id == id)
            .map(|c| c.history.clone()))
    }

    async fn track_token_usage(&self, _record: &TokenUsageRecord) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn get_token_usage(&self, _query: &TokenUsageQuery) -> Result<Vec<TokenUsageRecord>, RepositoryError> {
        Ok(Vec::new())
    }

    async fn cleanup_old_data(&self, _days_to_keep: u32) -> Result<(), RepositoryError> {
        Ok(())
    }
}

struct NoopFetcher;
impl MemoryFetcher for NoopFetcher {
    fn fetch_url<'a>(
        &'a self,
        _url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, MemoryError>> + Send + 'a>> {
        Box::pin(async { Ok(String::new()) })
    }
    fn web_search<'a>(
        &'a self,
        _query: &'a str,
        _max_results: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, MemoryError>> + Send + 'a>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

/// A plugin action that fails on its first two calls and succeeds on
/// the third, used to prove per-step retry actually re-invokes the
/// action rather than just re-reading a cached failure.
struct FlakyAction {
    calls: std::sync::atomic::AtomicU32,
}

impl Action for FlakyAction {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn execute<'a>(&'a self, _config: &'a Value, _ctx: &'a Value) -> Pin<Box<dyn Future<Output = ActionResult> + Send + 'a>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            if call < 3 {
                Err(ActionError::ExecutionFailed(format!("flaky failure #{call}")))
            } else {
                Ok(serde_json::json!({ "call": call }))
            }
        })
    }
}

#[tokio::test]
async fn linear_chain_parses_and_executes_through_the_full_pipeline() {
    let yaml = r#"
name: greeting
steps:
  - id: a
    action: transform
    config:
      template: "{{ trigger.x }}"
  - id: b
    action: transform
    config:
      template: "{{ steps.a }}!"
    depends_on: [a]
  - id: c
    action: transform
    config:
      template: "{{ steps.b }}?"
    depends_on: [b]
"#;
    let workflow = definition::parse(yaml, "greeting").unwrap();
    let executor = Executor::new(Arc::new(PluginRegistry::with_builtins()), Arc::new(NoopFetcher));
    let outcome = executor.run(&workflow, Uuid::new_v4(), serde_json::json!({ "x": "hi" })).await;

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.steps["a"].output, Some(Value::String("hi".into())));
    assert_eq!(outcome.steps["b"].output, Some(Value::String("hi!".into())));
    assert_eq!(outcome.steps["c"].output, Some(Value::String("hi!?".into())));
}

#[tokio::test]
async fn cyclic_dependencies_rejected_at_parse_time() {
    let yaml = r#"
name: cyclic
steps:
  - id: a
    action: transform
    config: { template: "x" }
    depends_on: [b]
  - id: b
    action: transform
    config: { template: "y" }
    depends_on: [a]
"#;
    let err = definition::parse(yaml, "cyclic").unwrap_err();
    assert!(err.to_string().contains("cycle") || err.to_string().contains("cyclic"));
}

#[tokio::test]
async fn per_step_retry_invokes_the_action_exactly_three_times() {
    let yaml = r#"
name: flaky-workflow
steps:
  - id: a
    action: flaky
    config: {}
    retry:
      attempts: 3
      delay_ms: 10
"#;
    let workflow = definition::parse(yaml, "flaky-workflow").unwrap();
    let registry = PluginRegistry::with_builtins();
    let flaky = Arc::new(FlakyAction { calls: std::sync::atomic::AtomicU32::new(0) });
    registry.register(flaky.clone()).unwrap();

    let executor = Executor::new(Arc::new(registry), Arc::new(NoopFetcher));
    let outcome = executor.run(&workflow, Uuid::new_v4(), Value::Null).await;

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(flaky.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
}

#[tokio::test]
async fn queue_level_retry_backs_off_exponentially_then_goes_terminal() {
    let store = Arc::new(MemStore::default());
    store
        .enqueue_run(EnqueueInput {
            workflow_name: "always-fails".to_string(),
            trigger_type: "manual".to_string(),
            trigger_data: Value::Null,
            workflow_content: "name: always-fails\nsteps:\n  - id: a\n    action: plugin.nope\n".to_string(),
            scheduled_for: None,
        })
        .await
        .unwrap();

    let mut config = SchedulerConfig::default();
    config.max_attempts = 3;
    config.retry_delay_ms = 5000;
    let executor = Arc::new(Executor::new(Arc::new(PluginRegistry::with_builtins()), Arc::new(NoopFetcher)));
    let worker = RunQueueWorker::new(store.clone(), executor, config, None);

    // Attempt 1: claim -> fail -> reschedule ~5s out.
    worker.poll_once().await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let run_id = {
        let queue = store.queue.lock().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].status, QueueStatus::Queued);
        assert_eq!(queue[0].attempts, 1);
        let delay = (queue[0].next_attempt_at - Utc::now()).num_milliseconds();
        assert!(delay > 3000 && delay <= 5000, "expected ~5s backoff, got {delay}ms");
        queue[0].id
    };

    // Fast-forward past the backoff window so the next poll can claim it.
    {
        let mut queue = store.queue.lock().unwrap();
        let record = queue.iter_mut().find(|r| r.id == run_id).unwrap();
        record.next_attempt_at = Utc::now();
    }

    // Attempt 2: claim -> fail -> reschedule ~10s out.
    worker.poll_once().await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    {
        let queue = store.queue.lock().unwrap();
        assert_eq!(queue[0].status, QueueStatus::Queued);
        assert_eq!(queue[0].attempts, 2);
        let delay = (queue[0].next_attempt_at - Utc::now()).num_milliseconds();
        assert!(delay > 8000 && delay <= 10000, "expected ~10s backoff, got {delay}ms");
    }

    {
        let mut queue = store.queue.lock().unwrap();
        let record = queue.iter_mut().find(|r| r.id == run_id).unwrap();
        record.next_attempt_at = Utc::now();
    }

    // Attempt 3: claim -> fail -> attempts == max_attempts, terminal.
    worker.poll_once().await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let history = store.history.lock().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].history.status, HistoryStatus::Failed);
    let queue = store.queue.lock().unwrap();
    assert_eq!(queue[0].status, QueueStatus::Failed);
    assert_eq!(queue[0].attempts, 3);
}

#[tokio::test]
async fn cron_catch_up_enqueues_missed_ticks_on_schedule_install() {
    let store = Arc::new(MemStore::default());
    let scheduler = TriggerScheduler::new(
        store.clone(),
        Arc::new(PluginRegistry::with_builtins()),
        SchedulerConfig::default(),
        None,
    );
    scheduler.start().await.unwrap();

    let schedule_id = "catchup-demo::cron.schedule::0".to_string();
    let three_minutes_ago = Utc::now() - chrono::Duration::minutes(3) - chrono::Duration::seconds(5);
    store
        .upsert_schedule(&ScheduleRecord {
            id: schedule_id.clone(),
            workflow_name: "catchup-demo".to_string(),
            trigger_type: "cron.schedule".to_string(),
            cron_expression: Some("0 */1 * * * *".to_string()),
            timezone: None,
            last_run_at: Some(three_minutes_ago),
            status: ScheduleState::Active,
        })
        .await
        .unwrap();

    let workflow = definition::parse("name: catchup-demo\nsteps: []\n", "catchup-demo").unwrap();
    let content = definition::serialize(&workflow).unwrap();
    scheduler
        .schedule_trigger(
            "catchup-demo",
            &content,
            0,
            weavr_types::workflow::Trigger::CronSchedule {
                expression: "*/1 * * * *".to_string(),
                timezone: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(store.queue.lock().unwrap().len(), 3);
    let record = store.get_schedule(&schedule_id).await.unwrap().unwrap();
    assert!(record.last_run_at.unwrap() > three_minutes_ago);

    scheduler.stop_all().await;
}

#[tokio::test]
async fn webhook_path_matching_accepts_and_rejects_expected_paths() {
    let store = Arc::new(MemStore::default());
    let scheduler = TriggerScheduler::new(
        store.clone(),
        Arc::new(PluginRegistry::with_builtins()),
        SchedulerConfig::default(),
        None,
    );

    let yaml = r#"
name: order-intake
triggers:
  - type: http.webhook
    path: orders
steps:
  - id: a
    action: transform
    config:
      template: "{{ trigger.data }}"
"#;
    let workflow = definition::parse(yaml, "order-intake").unwrap();
    let content = definition::serialize(&workflow).unwrap();
    scheduler
        .schedule_trigger(&workflow.name, &content, 0, workflow.triggers[0].clone())
        .await
        .unwrap();

    let matches_bare = scheduler.trigger_webhook("orders", Value::Null).await;
    assert_eq!(matches_bare.triggered, vec!["order-intake".to_string()]);

    let matches_slash = scheduler.trigger_webhook("/orders", Value::Null).await;
    assert_eq!(matches_slash.triggered, vec!["order-intake".to_string()]);

    let no_match_prefix = scheduler.trigger_webhook("order", Value::Null).await;
    assert!(no_match_prefix.triggered.is_empty());

    let no_match_suffix = scheduler.trigger_webhook("/orders/new", Value::Null).await;
    assert!(no_match_suffix.triggered.is_empty());
}
