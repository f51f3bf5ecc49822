//! Wave-based DAG executor for a single claimed run.
//!
//! Builds the dependency graph with [`dag::build_execution_plan`], assembles
//! the memory context once up front, then drives each wave of ready steps
//! concurrently with a [`tokio::task::JoinSet`] and a join barrier before the
//! next wave.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use weavr_types::workflow::{LogLevel, RunLog, RunStatus, StepResult, StepStatus, Workflow};

use super::dag::build_execution_plan;
use super::interpolation::{self, interpolate_value};
use super::memory::{self, MemoryFetcher};
use super::registry::{ActionError, PluginRegistry};
use super::retry;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("circular dependency among steps (validator should have caught this)")]
    CircularDependency,
    #[error("step '{step_id}' failed: {cause}")]
    StepFailed { step_id: String, cause: String },
    #[error("memory source '{source_id}' in block '{block_id}' failed: {cause}")]
    MemorySourceFailed {
        block_id: String,
        source_id: String,
        cause: String,
    },
    #[error("unknown action '{name}' referenced by step '{step_id}'")]
    UnknownAction { step_id: String, name: String },
}

/// Result of running one [`Workflow`] to completion (or failure).
///
/// Carries everything the worker pool needs to persist a `CompletedRun`
/// without the executor depending on the store traits directly.
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub steps: HashMap<String, StepResult>,
    pub error: Option<String>,
    pub memory: Option<Value>,
    pub logs: Vec<RunLog>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Executes one workflow run at a time. Stateless beyond its registry and
/// memory fetcher — safe to share across concurrently executing runs.
pub struct Executor {
    registry: Arc<PluginRegistry>,
    fetcher: Arc<dyn MemoryFetcher>,
}

impl Executor {
    pub fn new(registry: Arc<PluginRegistry>, fetcher: Arc<dyn MemoryFetcher>) -> Self {
        Self { registry, fetcher }
    }

    /// Runs `workflow` to completion under `run_id`, never returning an
    /// `Err` — a failed run is represented by `RunOutcome::status ==
    /// RunStatus::Failed` -- exceptions become typed outcomes at this
    /// boundary rather than propagating.
    pub async fn run(&self, workflow: &Workflow, run_id: Uuid, trigger_data: Value) -> RunOutcome {
        let started_at = Utc::now();
        let mut logs: Vec<RunLog> = Vec::new();
        let mut steps: HashMap<String, StepResult> = workflow
            .steps
            .iter()
            .map(|s| (s.id.clone(), StepResult::pending(&s.id)))
            .collect();

        let env_value = serde_json::to_value(&workflow.env).unwrap_or(Value::Null);
        let mut base_ctx = serde_json::json!({
            "trigger": trigger_data,
            "steps": {},
            "env": env_value,
        });
        if let (Value::Object(map), Value::Object(now_map)) =
            (&mut base_ctx, interpolation::now_context())
        {
            for (k, v) in now_map {
                map.insert(k, v);
            }
        }

        let memory_value = if workflow.memory.is_empty() {
            None
        } else {
            Some(self.assemble_memory(workflow, &base_ctx, run_id, &mut logs).await)
        };
        if let Some(mem) = &memory_value {
            if let Value::Object(map) = &mut base_ctx {
                map.insert("memory".to_string(), mem.clone());
            }
        }

        let waves = match build_execution_plan(&workflow.steps) {
            Ok(waves) => waves,
            Err(_) => {
                let completed_at = Utc::now();
                return RunOutcome {
                    run_id,
                    status: RunStatus::Failed,
                    steps,
                    error: Some(ExecutorError::CircularDependency.to_string()),
                    memory: memory_value,
                    logs,
                    started_at,
                    completed_at,
                };
            }
        };

        let mut run_error: Option<String> = None;

        'waves: for wave in &waves {
            let mut join_set = tokio::task::JoinSet::new();
            for step in wave {
                let step_id = step.id.clone();
                let action_name = step.action.clone();
                let config = Value::Object(step.config.clone());
                let retry_cfg = step.retry.clone();
                let ctx = base_ctx.clone();
                let registry = self.registry.clone();

                steps.insert(
                    step_id.clone(),
                    StepResult {
                        status: StepStatus::Running,
                        started_at: Some(Utc::now()),
                        ..StepResult::pending(&step_id)
                    },
                );

                join_set.spawn(async move {
                    let outcome = Self::run_step_with_retry(
                        registry,
                        step_id.clone(),
                        action_name,
                        config,
                        retry_cfg,
                        ctx,
                    )
                    .await;
                    (step_id, outcome)
                });
            }

            let mut wave_failure: Option<(String, String)> = None;
            while let Some(joined) = join_set.join_next().await {
                let (step_id, outcome) = match joined {
                    Ok(pair) => pair,
                    Err(join_err) => {
                        let msg = format!("task panicked: {join_err}");
                        steps.insert(
                            "__join__".to_string(),
                            StepResult::pending("__join__"),
                        );
                        wave_failure.get_or_insert(("__join__".to_string(), msg));
                        continue;
                    }
                };
                let completed_at = Utc::now();
                match outcome {
                    Ok(output) => {
                        let result = steps.get(&step_id).cloned();
                        let started = result.and_then(|r| r.started_at).unwrap_or(completed_at);
                        let duration_ms = (completed_at - started).num_milliseconds().max(0);
                        steps.insert(
                            step_id.clone(),
                            StepResult {
                                id: step_id.clone(),
                                status: StepStatus::Completed,
                                started_at: Some(started),
                                completed_at: Some(completed_at),
                                duration_ms: Some(duration_ms),
                                output: Some(output),
                                error: None,
                            },
                        );
                    }
                    Err(cause) => {
                        let result = steps.get(&step_id).cloned();
                        let started = result.and_then(|r| r.started_at).unwrap_or(completed_at);
                        let duration_ms = (completed_at - started).num_milliseconds().max(0);
                        steps.insert(
                            step_id.clone(),
                            StepResult {
                                id: step_id.clone(),
                                status: StepStatus::Failed,
                                started_at: Some(started),
                                completed_at: Some(completed_at),
                                duration_ms: Some(duration_ms),
                                output: None,
                                error: Some(cause.clone()),
                            },
                        );
                        logs.push(RunLog {
                            run_id,
                            timestamp: completed_at,
                            level: LogLevel::Error,
                            step_id: Some(step_id.clone()),
                            message: cause.clone(),
                        });
                        wave_failure.get_or_insert((step_id, cause));
                    }
                }
            }

            if let Some((step_id, cause)) = wave_failure {
                run_error = Some(
                    ExecutorError::StepFailed {
                        step_id: step_id.clone(),
                        cause,
                    }
                    .to_string(),
                );
                break 'waves;
            }

            // Fold this wave's completed outputs into the base context so
            // the next wave's interpolation sees them under `steps`.
            if let Value::Object(ctx_map) = &mut base_ctx {
                if let Some(Value::Object(steps_map)) = ctx_map.get_mut("steps") {
                    for step in wave {
                        if let Some(result) = steps.get(&step.id) {
                            if let Some(output) = &result.output {
                                steps_map.insert(step.id.clone(), output.clone());
                            }
                        }
                    }
                }
            }
        }

        let completed_at = Utc::now();
        let status = if run_error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Success
        };

        RunOutcome {
            run_id,
            status,
            steps,
            error: run_error,
            memory: memory_value,
            logs,
            started_at,
            completed_at,
        }
    }

    async fn run_step_with_retry(
        registry: Arc<PluginRegistry>,
        step_id: String,
        action_name: String,
        config: Value,
        retry_cfg: weavr_types::workflow::RetryConfig,
        ctx: Value,
    ) -> Result<Value, String> {
        let action = match registry.get(&action_name) {
            Ok(action) => action,
            Err(_) => {
                return Err(ExecutorError::UnknownAction {
                    step_id,
                    name: action_name,
                }
                .to_string());
            }
        };

        let interpolated_config = interpolate_value(&config, &ctx);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match action.execute(&interpolated_config, &ctx).await {
                Ok(output) => return Ok(output),
                Err(err) => {
                    if retry::should_retry(&retry_cfg, attempt) {
                        tokio::time::sleep(retry::next_delay(&retry_cfg, attempt)).await;
                        continue;
                    }
                    return Err(format_action_error(&step_id, err));
                }
            }
        }
    }

    async fn assemble_memory(
        &self,
        workflow: &Workflow,
        ctx: &Value,
        run_id: Uuid,
        logs: &mut Vec<RunLog>,
    ) -> Value {
        let start = Instant::now();
        let mut blocks = serde_json::Map::new();
        let mut sources = serde_json::Map::new();

        for block in &workflow.memory {
            let mut block_logs = Vec::new();
            let assembled =
                memory::assemble_block(block, ctx, self.fetcher.as_ref(), &mut block_logs).await;
            for log in block_logs {
                logs.push(RunLog {
                    run_id,
                    timestamp: Utc::now(),
                    level: LogLevel::Warn,
                    step_id: None,
                    message: format!("[memory:{}] {}", log.block_id, log.message),
                });
            }
            blocks.insert(block.id.clone(), Value::String(assembled.text));
            let mut source_map = serde_json::Map::new();
            for (k, v) in assembled.sources {
                source_map.insert(k, Value::String(v));
            }
            sources.insert(block.id.clone(), Value::Object(source_map));
        }

        tracing::debug!(
            workflow.run_id = %run_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "assembled memory context"
        );

        serde_json::json!({ "blocks": blocks, "sources": sources })
    }
}

fn format_action_error(step_id: &str, err: ActionError) -> String {
    ExecutorError::StepFailed {
        step_id: step_id.to_string(),
        cause: err.to_string(),
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::memory::MemoryError;
    use weavr_types::workflow::{MemoryBlock, MemorySource, MemorySourceKind, RetryConfig, Step};
    use std::future::Future;
    use std::pin::Pin;

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

    fn step(id: &str, action: &str, template: &str, depends_on: Vec<&str>) -> Step {
        let mut config = serde_json::Map::new();
        config.insert("template".to_string(), Value::String(template.to_string()));
        Step {
            id: id.to_string(),
            action: action.to_string(),
            config,
            depends_on: depends_on.into_iter().map(String::from).collect(),
            retry: RetryConfig::default(),
        }
    }

    fn workflow_with_steps(steps: Vec<Step>) -> Workflow {
        Workflow {
            name: "test".to_string(),
            description: None,
            env: Default::default(),
            triggers: vec![],
            memory: vec![],
            steps,
        }
    }

    #[tokio::test]
    async fn s1_linear_dag_chains_outputs() {
        let steps = vec![
            step("a", "transform", "{{ trigger.x }}", vec![]),
            step("b", "transform", "{{ steps.a }}!", vec!["a"]),
            step("c", "transform", "{{ steps.b }}?", vec!["b"]),
        ];
        let workflow = workflow_with_steps(steps);
        let executor = Executor::new(
            Arc::new(PluginRegistry::with_builtins()),
            Arc::new(NoopFetcher),
        );
        let outcome = executor
            .run(&workflow, Uuid::new_v4(), serde_json::json!({ "x": "hi" }))
            .await;

        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.steps["a"].output, Some(Value::String("hi".into())));
        assert_eq!(outcome.steps["b"].output, Some(Value::String("hi!".into())));
        assert_eq!(outcome.steps["c"].output, Some(Value::String("hi!?".into())));
    }

    #[tokio::test]
    async fn s2_diamond_wave_runs_siblings_concurrently() {
        let steps = vec![
            step("a", "transform", "{{ trigger.x }}", vec![]),
            step("b", "transform", "{{ steps.a }}-b", vec!["a"]),
            step("c", "transform", "{{ steps.a }}-c", vec!["a"]),
            step("d", "transform", "{{ steps.b }}+{{ steps.c }}", vec!["b", "c"]),
        ];
        let workflow = workflow_with_steps(steps);
        let executor = Executor::new(
            Arc::new(PluginRegistry::with_builtins()),
            Arc::new(NoopFetcher),
        );
        let outcome = executor
            .run(&workflow, Uuid::new_v4(), serde_json::json!({ "x": "v" }))
            .await;

        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(
            outcome.steps["d"].output,
            Some(Value::String("v-b+v-c".into()))
        );
        let b_start = outcome.steps["b"].started_at.unwrap();
        let c_start = outcome.steps["c"].started_at.unwrap();
        assert!((b_start - c_start).num_milliseconds().abs() < 50);
    }

    #[tokio::test]
    async fn unknown_action_fails_the_run() {
        let steps = vec![step("a", "plugin.missing", "x", vec![])];
        let workflow = workflow_with_steps(steps);
        let executor = Executor::new(
            Arc::new(PluginRegistry::with_builtins()),
            Arc::new(NoopFetcher),
        );
        let outcome = executor
            .run(&workflow, Uuid::new_v4(), Value::Null)
            .await;

        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.error.unwrap().contains("unknown action"));
    }

    #[tokio::test]
    async fn failing_step_aborts_remaining_waves() {
        let mut config = serde_json::Map::new();
        config.insert("if".to_string(), Value::String("false".to_string()));
        let mut fail_step = step("a", "condition", "", vec![]);
        fail_step.config = config;
        // `condition` always succeeds, so simulate a genuine step failure via
        // an unregistered action instead to exercise the abort path.
        let steps = vec![
            step("a", "plugin.unregistered", "x", vec![]),
            step("b", "transform", "{{ steps.a }}", vec!["a"]),
        ];
        let workflow = workflow_with_steps(steps);
        let executor = Executor::new(
            Arc::new(PluginRegistry::with_builtins()),
            Arc::new(NoopFetcher),
        );
        let outcome = executor
            .run(&workflow, Uuid::new_v4(), Value::Null)
            .await;

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.steps["b"].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn memory_block_is_available_to_steps() {
        let block = MemoryBlock {
            id: "ctx".to_string(),
            sources: vec![MemorySource {
                id: "s1".to_string(),
                label: None,
                max_chars: None,
                kind: MemorySourceKind::Text {
                    text: "hello memory".to_string(),
                },
            }],
            template: None,
            separator: "\n\n".to_string(),
            dedupe: false,
            max_chars: None,
        };
        let steps = vec![step(
            "a",
            "transform",
            "{{ memory.blocks.ctx }}",
            vec![],
        )];
        let mut workflow = workflow_with_steps(steps);
        workflow.memory = vec![block];
        let executor = Executor::new(
            Arc::new(PluginRegistry::with_builtins()),
            Arc::new(NoopFetcher),
        );
        let outcome = executor
            .run(&workflow, Uuid::new_v4(), Value::Null)
            .await;

        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(
            outcome.steps["a"].output,
            Some(Value::String("hello memory".into()))
        );
    }
}
