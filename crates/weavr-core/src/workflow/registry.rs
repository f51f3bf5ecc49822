//! Plugin registry and built-in actions.
//!
//! Actions are registered dynamically by name rather than matched on a
//! closed enum, so the executor's dispatch loop stays fixed while the
//! set of available actions grows. Four actions (`transform`, `log`,
//! `delay`, `condition`) are always present; anything else must be
//! registered before a workflow referencing it can run.
//!
//! Async trait methods need to be called through `Arc<dyn Action>`, so
//! unlike the repository traits elsewhere in this crate (native
//! async-fn-in-trait, used only behind a single concrete
//! implementation) `Action::execute` hand-rolls a boxed future the way
//! the `async_trait` macro would expand it, to stay object-safe.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;

use super::interpolation::interpolate_value;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("invalid config for action: {0}")]
    InvalidConfig(String),

    #[error("action execution failed: {0}")]
    ExecutionFailed(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("action '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("unknown trigger type '{0}'")]
    UnknownTrigger(String),
}

pub type ActionResult = Result<Value, ActionError>;
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A dynamically dispatched workflow action. `config` is the step's
/// already-interpolated config map; `ctx` is the full run context
/// (trigger/steps/env/memory/now), provided for actions that need to
/// resolve nested expressions themselves (e.g. `condition`).
pub trait Action: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute<'a>(&'a self, config: &'a Value, ctx: &'a Value) -> BoxFuture<'a, ActionResult>;

    /// JSON schema for this action's `config` shape, surfaced to callers
    /// that want to validate a step before a run (e.g. a workflow editor).
    /// Defaults to "accept anything" for actions that don't define one.
    fn config_schema(&self) -> Value {
        serde_json::json!({})
    }
}

/// Callback a `TriggerDescriptor` invokes to hand a fired event to the
/// Trigger Manager's enqueue path. The manager wraps this closure
/// around `{ type, ...payload }` envelope construction before the plugin
/// ever sees it.
pub type EmitFn = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// A running trigger's teardown handle. Dropped/invoked by the Trigger
/// Manager on `stopTrigger`/`stopAll` or before a re-registration of the
/// same schedule id (idempotent on re-registration).
pub trait TriggerHandle: Send + Sync {
    fn teardown<'a>(&'a self) -> BoxFuture<'a, ()>;
}

/// A plugin-defined long-poll trigger source. `setup` is handed
/// the trigger's already-validated config plus an `emit` callback, and
/// returns a handle the Trigger Manager tears down on unregistration.
pub trait TriggerDescriptor: Send + Sync {
    fn name(&self) -> &'static str;

    fn setup<'a>(
        &'a self,
        config: &'a Value,
        emit: EmitFn,
    ) -> BoxFuture<'a, Result<Box<dyn TriggerHandle>, ActionError>>;

    /// JSON schema for this trigger's `config` shape. Defaults to "accept
    /// anything" for triggers that don't define one.
    fn config_schema(&self) -> Value {
        serde_json::json!({})
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    actions: DashMap<String, Arc<dyn Action>>,
    triggers: DashMap<String, Arc<dyn TriggerDescriptor>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            actions: DashMap::new(),
            triggers: DashMap::new(),
        }
    }

    /// Register the four built-in actions plus anything already added.
    /// Called once at startup before any plugin registration, so a
    /// workflow author can never shadow a built-in by accident.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry
            .register(Arc::new(TransformAction))
            .expect("builtin registration cannot collide");
        registry
            .register(Arc::new(LogAction))
            .expect("builtin registration cannot collide");
        registry
            .register(Arc::new(DelayAction))
            .expect("builtin registration cannot collide");
        registry
            .register(Arc::new(ConditionAction))
            .expect("builtin registration cannot collide");
        registry
    }

    /// Register a new action. Rejects re-registration under the same
    /// name, including attempts to shadow a built-in.
    pub fn register(&self, action: Arc<dyn Action>) -> Result<(), RegistryError> {
        let name = action.name().to_string();
        if self.actions.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.actions.insert(name, action);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Action>, RegistryError> {
        self.actions
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::UnknownAction(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Register a plugin trigger descriptor. Rejects re-registration
    /// under the same name, mirroring `register`'s action-side policy.
    pub fn register_trigger(
        &self,
        descriptor: Arc<dyn TriggerDescriptor>,
    ) -> Result<(), RegistryError> {
        let name = descriptor.name().to_string();
        if self.triggers.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.triggers.insert(name, descriptor);
        Ok(())
    }

    pub fn get_trigger(&self, name: &str) -> Result<Arc<dyn TriggerDescriptor>, RegistryError> {
        self.triggers
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::UnknownTrigger(name.to_string()))
    }

    pub fn contains_trigger(&self, name: &str) -> bool {
        self.triggers.contains_key(name)
    }
}

#[derive(schemars::JsonSchema)]
struct TransformConfig {
    template: Option<Value>,
    value: Option<Value>,
}

/// Renders `config.template` (or `config.value`) against `ctx` and
/// returns it as the step's output under `result`.
struct TransformAction;

impl Action for TransformAction {
    fn name(&self) -> &'static str {
        "transform"
    }

    fn execute<'a>(&'a self, config: &'a Value, ctx: &'a Value) -> BoxFuture<'a, ActionResult> {
        Box::pin(async move {
            let template = config
                .get("template")
                .or_else(|| config.get("value"))
                .ok_or_else(|| {
                    ActionError::InvalidConfig("transform requires 'template' or 'value'".into())
                })?;
            Ok(interpolate_value(template, ctx))
        })
    }

    fn config_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(TransformConfig)).unwrap_or_default()
    }
}

#[derive(schemars::JsonSchema)]
struct LogConfig {
    message: Option<String>,
    level: Option<String>,
}

/// Emits a `tracing` event at `config.level` (default `info`) with
/// `config.message` interpolated against the run context. Useful as a
/// workflow's own checkpoint marker independent of the run history
/// store.
struct LogAction;

impl Action for LogAction {
    fn name(&self) -> &'static str {
        "log"
    }

    fn execute<'a>(&'a self, config: &'a Value, ctx: &'a Value) -> BoxFuture<'a, ActionResult> {
        Box::pin(async move {
            let message = config
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let rendered = interpolate_value(&Value::String(message.to_string()), ctx);
            let rendered = rendered.as_str().unwrap_or_default();

            match config.get("level").and_then(Value::as_str).unwrap_or("info") {
                "error" => tracing::error!(message = rendered, "workflow log step"),
                "warn" => tracing::warn!(message = rendered, "workflow log step"),
                "debug" => tracing::debug!(message = rendered, "workflow log step"),
                _ => tracing::info!(message = rendered, "workflow log step"),
            }

            Ok(serde_json::json!({ "logged": rendered }))
        })
    }

    fn config_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(LogConfig)).unwrap_or_default()
    }
}

#[derive(schemars::JsonSchema)]
struct DelayConfig {
    ms: Option<u64>,
}

/// Sleeps for `config.ms` milliseconds, then resolves with `{ delayed: ms }`.
struct DelayAction;

impl Action for DelayAction {
    fn name(&self) -> &'static str {
        "delay"
    }

    fn execute<'a>(&'a self, config: &'a Value, _ctx: &'a Value) -> BoxFuture<'a, ActionResult> {
        Box::pin(async move {
            let ms = config.get("ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            Ok(serde_json::json!({ "delayed": ms }))
        })
    }

    fn config_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(DelayConfig)).unwrap_or_default()
    }
}

#[derive(schemars::JsonSchema)]
struct ConditionConfig {
    r#if: Value,
}

/// Evaluates `config.if` (an expression path resolved against `ctx`, or
/// a literal already resolved by the caller) for truthiness. The
/// executor uses `result` to decide whether to continue down this
/// branch or skip its remaining dependents.
struct ConditionAction;

impl Action for ConditionAction {
    fn name(&self) -> &'static str {
        "condition"
    }

    fn execute<'a>(&'a self, config: &'a Value, ctx: &'a Value) -> BoxFuture<'a, ActionResult> {
        Box::pin(async move {
            let expr = config.get("if").ok_or_else(|| {
                ActionError::InvalidConfig("condition requires an 'if' field".into())
            })?;
            let resolved = interpolate_value(expr, ctx);
            Ok(serde_json::json!({ "result": is_truthy(&resolved) }))
        })
    }

    fn config_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(ConditionConfig)).unwrap_or_default()
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !matches!(s.as_str(), "" | "false" | "0"),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builtins_are_all_registered() {
        let registry = PluginRegistry::with_builtins();
        assert!(registry.contains("transform"));
        assert!(registry.contains("log"));
        assert!(registry.contains("delay"));
        assert!(registry.contains("condition"));
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let registry = PluginRegistry::with_builtins();
        let err = registry.register(Arc::new(TransformAction)).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn unknown_action_lookup_fails() {
        let registry = PluginRegistry::with_builtins();
        assert!(registry.get("does-not-exist").is_err());
    }

    #[tokio::test]
    async fn builtin_config_schemas_describe_their_fields() {
        let registry = PluginRegistry::with_builtins();
        let schema = registry.get("delay").unwrap().config_schema();
        assert!(schema["properties"]["ms"].is_object());

        let schema = registry.get("condition").unwrap().config_schema();
        assert!(schema["properties"]["if"].is_object());
    }

    #[tokio::test]
    async fn transform_interpolates_template() {
        let registry = PluginRegistry::with_builtins();
        let action = registry.get("transform").unwrap();
        let ctx = serde_json::json!({"trigger": {"name": "acme"}});
        let config = serde_json::json!({"template": "hello {{ trigger.name }}"});
        let output = action.execute(&config, &ctx).await.unwrap();
        assert_eq!(output, "hello acme");
    }

    #[tokio::test]
    async fn condition_evaluates_truthiness() {
        let registry = PluginRegistry::with_builtins();
        let action = registry.get("condition").unwrap();
        let ctx = serde_json::json!({"trigger": {"flag": true}});
        let config = serde_json::json!({"if": "{{ trigger.flag }}"});
        let output = action.execute(&config, &ctx).await.unwrap();
        assert_eq!(output["result"], true);
    }

    #[tokio::test]
    async fn condition_missing_if_is_invalid_config() {
        let registry = PluginRegistry::with_builtins();
        let action = registry.get("condition").unwrap();
        let err = action
            .execute(&serde_json::json!({}), &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidConfig(_)));
    }

    #[test]
    fn is_truthy_treats_empty_false_and_zero_strings_as_falsy() {
        assert!(!is_truthy(&Value::String("".to_string())));
        assert!(!is_truthy(&Value::String("false".to_string())));
        assert!(!is_truthy(&Value::String("0".to_string())));
        assert!(is_truthy(&Value::String("no".to_string())));
        assert!(is_truthy(&Value::String("0.0".to_string())));
    }

    #[tokio::test]
    async fn delay_sleeps_for_configured_duration() {
        let registry = PluginRegistry::with_builtins();
        let action = registry.get("delay").unwrap();
        let config = serde_json::json!({"ms": 5});
        let start = std::time::Instant::now();
        action.execute(&config, &Value::Null).await.unwrap();
        assert!(start.elapsed().as_millis() >= 5);
    }

    struct StubHandle;

    impl TriggerHandle for StubHandle {
        fn teardown<'a>(&'a self) -> BoxFuture<'a, ()> {
            Box::pin(async {})
        }
    }

    struct StubTrigger;

    impl TriggerDescriptor for StubTrigger {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn setup<'a>(
            &'a self,
            _config: &'a Value,
            _emit: EmitFn,
        ) -> BoxFuture<'a, Result<Box<dyn TriggerHandle>, ActionError>> {
            Box::pin(async move { Ok(Box::new(StubHandle) as Box<dyn TriggerHandle>) })
        }
    }

    #[tokio::test]
    async fn trigger_descriptors_register_and_lookup() {
        let registry = PluginRegistry::with_builtins();
        registry.register_trigger(Arc::new(StubTrigger)).unwrap();
        assert!(registry.contains_trigger("stub"));
        assert!(registry.get_trigger("stub").is_ok());
        assert!(registry.get_trigger("missing").is_err());
    }

    #[tokio::test]
    async fn duplicate_trigger_registration_rejected() {
        let registry = PluginRegistry::with_builtins();
        registry.register_trigger(Arc::new(StubTrigger)).unwrap();
        let err = registry.register_trigger(Arc::new(StubTrigger)).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
    }
}
