//! SQLite implementation of `SchedulerStore`.
//!
//! Row structs with `from_row`/`into_*` conversions. `claim_next_runs` runs
//! its select-then-conditional-update inside a single transaction on
//! the writer pool so a concurrent claim race loses the `UPDATE ...
//! WHERE status = 'queued'` and is silently skipped, per the trait's
//! documented at-most-once contract.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Row, Transaction};
use uuid::Uuid;

use weavr_types::error::RepositoryError;
use weavr_types::workflow::{
    CompletedRun, HistoryQuery, HistoryRecord, HistoryStatus, LogLevel, QueueRecord, QueueStatus,
    RunLog, RunStepRow, ScheduleRecord, ScheduleState, StepStatus, TokenUsageQuery,
    TokenUsageRecord,
};
use weavr_core::repository::store::{EnqueueInput, SchedulerStore};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `SchedulerStore`.
pub struct SqliteSchedulerStore {
    pool: DatabasePool,
}

impl SqliteSchedulerStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn qerr(err: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(err.to_string())
}

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID '{s}': {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime '{s}': {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_status(s: &str) -> Result<QueueStatus, RepositoryError> {
    serde_json::from_value(Value::String(s.to_string()))
        .map_err(|_| RepositoryError::Query(format!("invalid queue status '{s}'")))
}

fn status_str(status: QueueStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "queued".to_string())
}

fn parse_schedule_state(s: &str) -> Result<ScheduleState, RepositoryError> {
    serde_json::from_value(Value::String(s.to_string()))
        .map_err(|_| RepositoryError::Query(format!("invalid schedule status '{s}'")))
}

fn schedule_state_str(status: ScheduleState) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "active".to_string())
}

fn parse_history_status(s: &str) -> Result<HistoryStatus, RepositoryError> {
    serde_json::from_value(Value::String(s.to_string()))
        .map_err(|_| RepositoryError::Query(format!("invalid history status '{s}'")))
}

fn history_status_str(status: HistoryStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "failed".to_string())
}

fn parse_step_status(s: &str) -> Result<StepStatus, RepositoryError> {
    serde_json::from_value(Value::String(s.to_string()))
        .map_err(|_| RepositoryError::Query(format!("invalid step status '{s}'")))
}

fn step_status_str(status: StepStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "failed".to_string())
}

fn parse_log_level(s: &str) -> Result<LogLevel, RepositoryError> {
    serde_json::from_value(Value::String(s.to_string()))
        .map_err(|_| RepositoryError::Query(format!("invalid log level '{s}'")))
}

fn log_level_str(level: LogLevel) -> String {
    serde_json::to_value(level)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "info".to_string())
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

struct QueueRunRow {
    id: String,
    workflow_name: String,
    trigger_type: String,
    trigger_data: String,
    workflow_content: String,
    status: String,
    attempts: i64,
    next_attempt_at: String,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    scheduled_for: Option<String>,
    error: Option<String>,
}

impl QueueRunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_name: row.try_get("workflow_name")?,
            trigger_type: row.try_get("trigger_type")?,
            trigger_data: row.try_get("trigger_data")?,
            workflow_content: row.try_get("workflow_content")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            scheduled_for: row.try_get("scheduled_for")?,
            error: row.try_get("error")?,
        })
    }

    fn into_record(self) -> Result<QueueRecord, RepositoryError> {
        Ok(QueueRecord {
            id: parse_uuid(&self.id)?,
            workflow_name: self.workflow_name,
            trigger_type: self.trigger_type,
            trigger_data: serde_json::from_str(&self.trigger_data)
                .map_err(|e| RepositoryError::Query(format!("invalid trigger_data: {e}")))?,
            workflow_content: self.workflow_content,
            status: parse_status(&self.status)?,
            attempts: self.attempts as u32,
            next_attempt_at: parse_datetime(&self.next_attempt_at)?,
            created_at: parse_datetime(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            scheduled_for: self.scheduled_for.as_deref().map(parse_datetime).transpose()?,
            error: self.error,
        })
    }
}

struct ScheduleRow {
    id: String,
    workflow_name: String,
    trigger_type: String,
    cron_expression: Option<String>,
    timezone: Option<String>,
    last_run_at: Option<String>,
    status: String,
}

impl ScheduleRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_name: row.try_get("workflow_name")?,
            trigger_type: row.try_get("trigger_type")?,
            cron_expression: row.try_get("cron_expression")?,
            timezone: row.try_get("timezone")?,
            last_run_at: row.try_get("last_run_at")?,
            status: row.try_get("status")?,
        })
    }

    fn into_record(self) -> Result<ScheduleRecord, RepositoryError> {
        Ok(ScheduleRecord {
            id: self.id,
            workflow_name: self.workflow_name,
            trigger_type: self.trigger_type,
            cron_expression: self.cron_expression,
            timezone: self.timezone,
            last_run_at: self.last_run_at.as_deref().map(parse_datetime).transpose()?,
            status: parse_schedule_state(&self.status)?,
        })
    }
}

struct HistoryRow {
    id: String,
    workflow_name: String,
    status: String,
    started_at: String,
    completed_at: String,
    duration_ms: i64,
    error: Option<String>,
    trigger_type: Option<String>,
    trigger_data: Option<String>,
    created_at: String,
}

impl HistoryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_name: row.try_get("workflow_name")?,
            status: row.try_get("status")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            duration_ms: row.try_get("duration_ms")?,
            error: row.try_get("error")?,
            trigger_type: row.try_get("trigger_type")?,
            trigger_data: row.try_get("trigger_data")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_record(self) -> Result<HistoryRecord, RepositoryError> {
        Ok(HistoryRecord {
            id: parse_uuid(&self.id)?,
            workflow_name: self.workflow_name,
            status: parse_history_status(&self.status)?,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: parse_datetime(&self.completed_at)?,
            duration_ms: self.duration_ms,
            error: self.error,
            trigger_type: self.trigger_type,
            trigger_data: self
                .trigger_data
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| RepositoryError::Query(format!("invalid trigger_data: {e}")))?,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

struct LogRow {
    run_id: String,
    timestamp: String,
    level: String,
    step_id: Option<String>,
    message: String,
}

impl LogRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            run_id: row.try_get("run_id")?,
            timestamp: row.try_get("timestamp")?,
            level: row.try_get("level")?,
            step_id: row.try_get("step_id")?,
            message: row.try_get("message")?,
        })
    }

    fn into_record(self) -> Result<RunLog, RepositoryError> {
        Ok(RunLog {
            run_id: parse_uuid(&self.run_id)?,
            timestamp: parse_datetime(&self.timestamp)?,
            level: parse_log_level(&self.level)?,
            step_id: self.step_id,
            message: self.message,
        })
    }
}

struct StepRow {
    run_id: String,
    step_id: String,
    status: String,
    duration_ms: Option<i64>,
    error: Option<String>,
    output: Option<String>,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            run_id: row.try_get("run_id")?,
            step_id: row.try_get("step_id")?,
            status: row.try_get("status")?,
            duration_ms: row.try_get("duration_ms")?,
            error: row.try_get("error")?,
            output: row.try_get("output")?,
        })
    }

    fn into_record(self) -> Result<RunStepRow, RepositoryError> {
        Ok(RunStepRow {
            run_id: parse_uuid(&self.run_id)?,
            step_id: self.step_id,
            status: parse_step_status(&self.status)?,
            duration_ms: self.duration_ms,
            error: self.error,
            output: self
                .output
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| RepositoryError::Query(format!("invalid step output: {e}")))?,
        })
    }
}

struct TokenUsageRow {
    timestamp: String,
    input_tokens: i64,
    output_tokens: i64,
    model: Option<String>,
    workflow_name: Option<String>,
    run_id: Option<String>,
}

impl TokenUsageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            timestamp: row.try_get("timestamp")?,
            input_tokens: row.try_get("input_tokens")?,
            output_tokens: row.try_get("output_tokens")?,
            model: row.try_get("model")?,
            workflow_name: row.try_get("workflow_name")?,
            run_id: row.try_get("run_id")?,
        })
    }

    fn into_record(self) -> Result<TokenUsageRecord, RepositoryError> {
        Ok(TokenUsageRecord {
            timestamp: parse_datetime(&self.timestamp)?,
            input_tokens: self.input_tokens as u64,
            output_tokens: self.output_tokens as u64,
            model: self.model,
            workflow_name: self.workflow_name,
            run_id: self.run_id.as_deref().map(parse_uuid).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// SchedulerStore impl
// ---------------------------------------------------------------------------

impl SchedulerStore for SqliteSchedulerStore {
    async fn enqueue_run(&self, input: EnqueueInput) -> Result<QueueRecord, RepositoryError> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let trigger_data_json = serde_json::to_string(&input.trigger_data)
            .map_err(|e| RepositoryError::Query(format!("serialize trigger_data: {e}")))?;

        sqlx::query(
            r#"INSERT INTO queue_runs
               (id, workflow_name, trigger_type, trigger_data, workflow_content,
                status, attempts, next_attempt_at, created_at, scheduled_for)
               VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?)"#,
        )
        .bind(id.to_string())
        .bind(&input.workflow_name)
        .bind(&input.trigger_type)
        .bind(&trigger_data_json)
        .bind(&input.workflow_content)
        .bind(status_str(QueueStatus::Queued))
        .bind(format_datetime(&now))
        .bind(format_datetime(&now))
        .bind(input.scheduled_for.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(qerr)?;

        Ok(QueueRecord {
            id,
            workflow_name: input.workflow_name,
            trigger_type: input.trigger_type,
            trigger_data: input.trigger_data,
            workflow_content: input.workflow_content,
            status: QueueStatus::Queued,
            attempts: 0,
            next_attempt_at: now,
            created_at: now,
            started_at: None,
            completed_at: None,
            scheduled_for: input.scheduled_for,
            error: None,
        })
    }

    async fn claim_next_runs(&self, limit: u32) -> Result<Vec<QueueRecord>, RepositoryError> {
        let mut tx: Transaction<'_, sqlx::Sqlite> = self.pool.writer.begin().await.map_err(qerr)?;
        let now = Utc::now();

        let candidate_ids: Vec<String> = sqlx::query(
            "SELECT id FROM queue_runs WHERE status = ? AND next_attempt_at <= ? ORDER BY next_attempt_at ASC LIMIT ?",
        )
        .bind(status_str(QueueStatus::Queued))
        .bind(format_datetime(&now))
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(qerr)?
        .iter()
        .map(|row| row.try_get::<String, _>("id"))
        .collect::<Result<Vec<_>, _>>()
        .map_err(qerr)?;

        let mut claimed = Vec::new();
        for id in candidate_ids {
            let result = sqlx::query(
                "UPDATE queue_runs SET status = ?, started_at = ?, attempts = attempts + 1 WHERE id = ? AND status = ?",
            )
            .bind(status_str(QueueStatus::Running))
            .bind(format_datetime(&now))
            .bind(&id)
            .bind(status_str(QueueStatus::Queued))
            .execute(&mut *tx)
            .await
            .map_err(qerr)?;

            if result.rows_affected() == 0 {
                continue;
            }

            let row = sqlx::query("SELECT * FROM queue_runs WHERE id = ?")
                .bind(&id)
                .fetch_one(&mut *tx)
                .await
                .map_err(qerr)?;
            claimed.push(QueueRunRow::from_row(&row).map_err(qerr)?.into_record()?);
        }

        tx.commit().await.map_err(qerr)?;
        Ok(claimed)
    }

    async fn mark_run_completed(
        &self,
        id: Uuid,
        status: QueueStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE queue_runs SET status = ?, completed_at = ?, error = ? WHERE id = ?",
        )
        .bind(status_str(status))
        .bind(format_datetime(&Utc::now()))
        .bind(error)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(qerr)?;
        Ok(())
    }

    async fn reschedule_run(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE queue_runs SET status = ?, next_attempt_at = ?, error = ? WHERE id = ?",
        )
        .bind(status_str(QueueStatus::Queued))
        .bind(format_datetime(&next_attempt_at))
        .bind(error)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(qerr)?;
        Ok(())
    }

    async fn list_stale_running(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<QueueRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM queue_runs WHERE status = ? AND started_at <= ? ORDER BY started_at ASC",
        )
        .bind(status_str(QueueStatus::Running))
        .bind(format_datetime(&older_than))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(qerr)?;

        rows.iter()
            .map(|row| QueueRunRow::from_row(row).map_err(qerr)?.into_record())
            .collect()
    }

    async fn upsert_schedule(&self, schedule: &ScheduleRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO schedules (id, workflow_name, trigger_type, cron_expression, timezone, last_run_at, status)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 workflow_name = excluded.workflow_name,
                 trigger_type = excluded.trigger_type,
                 cron_expression = excluded.cron_expression,
                 timezone = excluded.timezone,
                 status = excluded.status"#,
        )
        .bind(&schedule.id)
        .bind(&schedule.workflow_name)
        .bind(&schedule.trigger_type)
        .bind(&schedule.cron_expression)
        .bind(&schedule.timezone)
        .bind(schedule.last_run_at.as_ref().map(format_datetime))
        .bind(schedule_state_str(schedule.status))
        .execute(&self.pool.writer)
        .await
        .map_err(qerr)?;
        Ok(())
    }

    async fn set_schedule_last_run(
        &self,
        id: &str,
        last_run_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE schedules SET last_run_at = ? WHERE id = ?")
            .bind(format_datetime(&last_run_at))
            .bind(id)
            .execute(&self.pool.writer)
            .await
            .map_err(qerr)?;
        Ok(())
    }

    async fn get_schedule(&self, id: &str) -> Result<Option<ScheduleRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM schedules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(qerr)?;

        match row {
            Some(row) => Ok(Some(ScheduleRow::from_row(&row).map_err(qerr)?.into_record()?)),
            None => Ok(None),
        }
    }

    async fn set_schedule_status(
        &self,
        id: &str,
        status: ScheduleState,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE schedules SET status = ? WHERE id = ?")
            .bind(schedule_state_str(status))
            .bind(id)
            .execute(&self.pool.writer)
            .await
            .map_err(qerr)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_schedules_for_workflow(
        &self,
        workflow_name: &str,
    ) -> Result<Vec<ScheduleRecord>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM schedules WHERE workflow_name = ?")
            .bind(workflow_name)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(qerr)?;

        rows.iter()
            .map(|row| ScheduleRow::from_row(row).map_err(qerr)?.into_record())
            .collect()
    }

    async fn delete_schedules_for_workflow(
        &self,
        workflow_name: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM schedules WHERE workflow_name = ?")
            .bind(workflow_name)
            .execute(&self.pool.writer)
            .await
            .map_err(qerr)?;
        Ok(())
    }

    async fn save_completed_run(&self, completed: &CompletedRun) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(qerr)?;
        let history = &completed.history;

        let trigger_data_json = history
            .trigger_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("serialize trigger_data: {e}")))?;

        sqlx::query(
            r#"INSERT INTO run_history
               (id, workflow_name, status, started_at, completed_at, duration_ms,
                error, trigger_type, trigger_data, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(history.id.to_string())
        .bind(&history.workflow_name)
        .bind(history_status_str(history.status))
        .bind(format_datetime(&history.started_at))
        .bind(format_datetime(&history.completed_at))
        .bind(history.duration_ms)
        .bind(&history.error)
        .bind(&history.trigger_type)
        .bind(&trigger_data_json)
        .bind(format_datetime(&history.created_at))
        .execute(&mut *tx)
        .await
        .map_err(qerr)?;

        for log in &completed.logs {
            sqlx::query(
                "INSERT INTO run_logs (run_id, timestamp, level, step_id, message) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(log.run_id.to_string())
            .bind(format_datetime(&log.timestamp))
            .bind(log_level_str(log.level))
            .bind(&log.step_id)
            .bind(&log.message)
            .execute(&mut *tx)
            .await
            .map_err(qerr)?;
        }

        for step in &completed.steps {
            let output_json = step
                .output
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| RepositoryError::Query(format!("serialize step output: {e}")))?;

            sqlx::query(
                "INSERT INTO run_steps (run_id, step_id, status, duration_ms, error, output) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(step.run_id.to_string())
            .bind(&step.step_id)
            .bind(step_status_str(step.status))
            .bind(step.duration_ms)
            .bind(&step.error)
            .bind(&output_json)
            .execute(&mut *tx)
            .await
            .map_err(qerr)?;
        }

        tx.commit().await.map_err(qerr)?;
        Ok(())
    }

    async fn get_run_history(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<HistoryRecord>, RepositoryError> {
        let mut sql = String::from("SELECT * FROM run_history WHERE 1 = 1");
        if query.workflow_name.is_some() {
            sql.push_str(" AND workflow_name = ?");
        }
        if query.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if query.days.is_some() {
            sql.push_str(" AND started_at >= ?");
        }
        sql.push_str(" ORDER BY started_at DESC LIMIT ? OFFSET ?");

        let mut q = sqlx::query(&sql);
        if let Some(name) = &query.workflow_name {
            q = q.bind(name);
        }
        if let Some(status) = query.status {
            q = q.bind(history_status_str(status));
        }
        if let Some(days) = query.days {
            let cutoff = Utc::now() - chrono::Duration::days(days as i64);
            q = q.bind(format_datetime(&cutoff));
        }
        let limit = if query.limit == 0 { 50 } else { query.limit };
        let offset = query.page.saturating_mul(limit);
        q = q.bind(limit as i64).bind(offset as i64);

        let rows = q.fetch_all(&self.pool.reader).await.map_err(qerr)?;
        rows.iter()
            .map(|row| HistoryRow::from_row(row).map_err(qerr)?.into_record())
            .collect()
    }

    async fn get_run_by_id(&self, id: Uuid) -> Result<Option<HistoryRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM run_history WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(qerr)?;

        match row {
            Some(row) => Ok(Some(HistoryRow::from_row(&row).map_err(qerr)?.into_record()?)),
            None => Ok(None),
        }
    }

    async fn track_token_usage(&self, record: &TokenUsageRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO token_usage (timestamp, input_tokens, output_tokens, model, workflow_name, run_id) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(format_datetime(&record.timestamp))
        .bind(record.input_tokens as i64)
        .bind(record.output_tokens as i64)
        .bind(&record.model)
        .bind(&record.workflow_name)
        .bind(record.run_id.map(|id| id.to_string()))
        .execute(&self.pool.writer)
        .await
        .map_err(qerr)?;
        Ok(())
    }

    async fn get_token_usage(
        &self,
        query: &TokenUsageQuery,
    ) -> Result<Vec<TokenUsageRecord>, RepositoryError> {
        let mut sql = String::from("SELECT * FROM token_usage WHERE 1 = 1");
        if query.workflow_name.is_some() {
            sql.push_str(" AND workflow_name = ?");
        }
        if query.days.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        sql.push_str(" ORDER BY timestamp DESC");

        let mut q = sqlx::query(&sql);
        if let Some(name) = &query.workflow_name {
            q = q.bind(name);
        }
        if let Some(days) = query.days {
            let cutoff = Utc::now() - chrono::Duration::days(days as i64);
            q = q.bind(format_datetime(&cutoff));
        }

        let rows = q.fetch_all(&self.pool.reader).await.map_err(qerr)?;
        rows.iter()
            .map(|row| TokenUsageRow::from_row(row).map_err(qerr)?.into_record())
            .collect()
    }

    async fn cleanup_old_data(&self, days_to_keep: u32) -> Result<(), RepositoryError> {
        let cutoff = Utc::now() - chrono::Duration::days(days_to_keep as i64);
        let cutoff_str = format_datetime(&cutoff);

        sqlx::query("DELETE FROM run_history WHERE started_at < ?")
            .bind(&cutoff_str)
            .execute(&self.pool.writer)
            .await
            .map_err(qerr)?;

        sqlx::query("DELETE FROM token_usage WHERE timestamp < ?")
            .bind(&cutoff_str)
            .execute(&self.pool.writer)
            .await
            .map_err(qerr)?;

        Ok(())
    }
}
