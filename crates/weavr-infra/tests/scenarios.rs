//! End-to-end scenario coverage against a real (tempfile-backed) SQLite
//! store, exercising paths the in-memory fixtures in `weavr-core`'s own
//! scenario tests can't: concurrent claim races through an actual
//! writer-pool transaction, and persisted history round-trips.

use std::sync::Arc;

use chrono::Utc;

use weavr_core::repository::store::{EnqueueInput, SchedulerStore};
use weavr_core::workflow::definition;
use weavr_core::workflow::executor::Executor;
use weavr_core::workflow::memory::MemoryFetcher;
use weavr_core::workflow::registry::PluginRegistry;
use weavr_core::workflow::scheduler::TriggerScheduler;
use weavr_core::workflow::worker::RunQueueWorker;
use weavr_infra::memory_fetcher::HttpMemoryFetcher;
use weavr_infra::sqlite::pool::DatabasePool;
use weavr_infra::sqlite::store::SqliteSchedulerStore;
use weavr_types::config::SchedulerConfig;
use weavr_types::workflow::{HistoryStatus, QueueStatus, ScheduleRecord, ScheduleState};

async fn test_store() -> Arc<SqliteSchedulerStore> {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("scenarios.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    // leak the tempdir so the file survives for the test's lifetime
    std::mem::forget(dir);
    Arc::new(SqliteSchedulerStore::new(DatabasePool::new(&url).await.unwrap()))
}

/// Ten concurrent claimers racing against a single queued row must
/// agree on exactly one winner, enforced by the writer pool's single
/// connection plus the conditional `UPDATE ... WHERE status =
/// 'queued'`.
#[tokio::test]
async fn at_most_once_claim_holds_under_concurrent_claimers() {
    let store = test_store().await;
    store
        .enqueue_run(EnqueueInput {
            workflow_name: "contended".to_string(),
            trigger_type: "manual".to_string(),
            trigger_data: serde_json::Value::Null,
            workflow_content: "name: contended\nsteps: []\n".to_string(),
            scheduled_for: None,
        })
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move { store.claim_next_runs(1).await.unwrap() }));
    }

    let mut total_claimed = 0;
    for task in tasks {
        total_claimed += task.await.unwrap().len();
    }

    assert_eq!(total_claimed, 1, "exactly one claimer should have won the race");
}

/// A successful run driven through the real worker pool and SQLite
/// store: claimed, executed, marked completed, and its history is
/// durably readable back by id.
#[tokio::test]
async fn successful_run_persists_history_through_real_store() {
    let store = test_store().await;
    let yaml = r#"
name: greeting
steps:
  - id: a
    action: transform
    config:
      template: "{{ trigger.x }}"
"#;
    store
        .enqueue_run(EnqueueInput {
            workflow_name: "greeting".to_string(),
            trigger_type: "manual".to_string(),
            trigger_data: serde_json::json!({ "x": "hi" }),
            workflow_content: yaml.to_string(),
            scheduled_for: None,
        })
        .await
        .unwrap();

    let fetcher: Arc<dyn MemoryFetcher> = Arc::new(HttpMemoryFetcher::new());
    let executor = Arc::new(Executor::new(Arc::new(PluginRegistry::with_builtins()), fetcher));
    let worker = RunQueueWorker::new(store.clone(), executor, SchedulerConfig::default(), None);

    worker.poll_once().await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let history = store
        .get_run_history(&weavr_types::workflow::HistoryQuery {
            page: 1,
            limit: 10,
            days: None,
            status: None,
            workflow_name: None,
        })
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Success);
    assert_eq!(history[0].workflow_name, "greeting");

    let by_id = store.get_run_by_id(history[0].id).await.unwrap();
    assert!(by_id.is_some());
}

/// Against the real store: a cron schedule installed with a
/// `last_run_at` three minutes in the past enqueues its missed ticks and
/// advances `last_run_at`, with every enqueued row durably visible via
/// `claim_next_runs`.
#[tokio::test]
async fn cron_catch_up_enqueues_durable_rows_claimable_afterward() {
    let store = test_store().await;
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

    let claimed = store.claim_next_runs(10).await.unwrap();
    assert_eq!(claimed.len(), 3);
    assert!(claimed.iter().all(|r| r.status == QueueStatus::Running));

    let record = store.get_schedule(&schedule_id).await.unwrap().unwrap();
    assert!(record.last_run_at.unwrap() > three_minutes_ago);

    scheduler.stop_all().await;
}
