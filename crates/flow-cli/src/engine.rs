//! The orchestrator that wires the leaf/mid components — the flow runtime,
//! step executors, the delayed-task scheduler, the event hub, and the
//! health checker — into one running engine (§9).
//!
//! `flow-core` only knows how to fold commands into event cascades; it has
//! no notion of HTTP, timers, or fan-out. Something has to watch a command's
//! cascade for `work_started`/`retry_scheduled` and turn those into real
//! side effects, then feed the side effect's outcome back in as the next
//! command. That something lives here rather than in `flow-core` itself,
//! because it depends on every leaf crate (`flow-executors`, `flow-
//! scheduler`, `flow-hub`, `flow-health`) and `flow-core` cannot depend on
//! its own dependents.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;

use flow_core::errors::{AggregateError, PlanError};
use flow_core::event::types::flow as flow_ev;
use flow_core::event::{AggregateKind, AggregateRef, EventStore, StoredEvent};
use flow_core::model::{FlowId, FlowStatus, Step, StepId, StepKind, WorkConfig, WorkToken};
use flow_core::runtime::{handle_engine_command, EngineCommand, FlowCommand};
use flow_core::{build_plan, Aggregator, FlowState};

use flow_executors::{DispatchOutcome, ExecutorRegistry, HttpExecutor, ScriptExecutor, WorkOutcome};
use flow_health::{HealthCheckConfig, HealthChecker};
use flow_hub::{EventHub, HubEnvelope};
use flow_scheduler::{PathKey, Scheduler};
use flow_script::ScriptRuntime;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Bookkeeping for a child flow started to satisfy a parent's `kind: Flow`
/// step: which work item on the parent to resolve, and how to translate the
/// child's result attributes back into the parent's namespace.
struct ChildLink {
    parent: FlowId,
    parent_step: StepId,
    parent_token: WorkToken,
    output_map: IndexMap<String, String>,
}

struct RetryTask {
    flow_id: FlowId,
    step_id: StepId,
    token: WorkToken,
}

fn retry_key(flow_id: &FlowId, step_id: &StepId, token: &WorkToken) -> PathKey {
    PathKey::from_parts(&["retry", flow_id.0.as_str(), step_id.0.as_str(), token.0.as_str()])
}

fn flow_prefix(flow_id: &FlowId) -> PathKey {
    PathKey::from_parts(&["retry", flow_id.0.as_str()])
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The assembled engine. Generic over the event store so the same
/// orchestration runs against the in-memory store in tests and the
/// Postgres-backed one (`flow-persistence::pg`) in a real deployment.
pub struct Engine<S: EventStore + 'static> {
    aggregator: Arc<Aggregator<S>>,
    hub: Arc<EventHub>,
    scripts: Arc<ScriptRuntime>,
    health: Arc<HealthChecker<S>>,
    executors: DashMap<FlowId, Arc<ExecutorRegistry>>,
    child_links: DashMap<FlowId, ChildLink>,
    scheduler: Scheduler<RetryTask>,
    retry_defaults: WorkConfig,
    webhook_base_url: Option<String>,
}

impl<S: EventStore + 'static> Engine<S> {
    /// Assembles an engine over `store`: wires the scheduler, hub, health
    /// checker, and script runtime together as distinct crates rather than
    /// fields of one compile-time-typed builder, since the catalog this
    /// engine runs against is dynamic.
    pub fn new(store: Arc<S>, retry_defaults: WorkConfig, webhook_base_url: Option<String>) -> (Arc<Self>, tokio::sync::mpsc::UnboundedReceiver<(PathKey, RetryTask)>) {
        let aggregator = Arc::new(Aggregator::new(store));
        let hub = Arc::new(EventHub::new());
        let scripts = Arc::new(ScriptRuntime::new());
        let health = Arc::new(HealthChecker::new(Arc::clone(&aggregator), HealthCheckConfig::default()));

        let (retry_tx, retry_rx) = tokio::sync::mpsc::unbounded_channel();
        let scheduler = Scheduler::spawn(move |key, task| {
            let _ = retry_tx.send((key, task));
        });

        let engine = Arc::new(Self {
            aggregator,
            hub,
            scripts,
            health,
            executors: DashMap::new(),
            child_links: DashMap::new(),
            scheduler,
            retry_defaults,
            webhook_base_url,
        });
        (engine, retry_rx)
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// Runs the health-check poller and the retry-firing loop until the
    /// process is torn down. Intended to be spawned once, alongside whatever
    /// else the host binary does with the engine.
    pub async fn run(self: Arc<Self>, mut retry_rx: tokio::sync::mpsc::UnboundedReceiver<(PathKey, RetryTask)>) {
        let health_task = tokio::spawn(Arc::clone(&self.health).run());
        while let Some((_key, task)) = retry_rx.recv().await {
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = engine.fire_retry(task).await {
                    tracing::warn!(error = ?e, "retry firing failed");
                }
            });
        }
        health_task.abort();
    }

    pub async fn register_step(&self, step: Step) -> Result<(), EngineError> {
        self.aggregator.execute_engine(&AggregateRef::engine(), |s| handle_engine_command(s, EngineCommand::RegisterStep(step.clone()), now_ms()))?;
        Ok(())
    }

    fn catalog(&self) -> Result<IndexMap<StepId, Step>, EngineError> {
        Ok(self.aggregator.read_engine(&AggregateRef::engine())?.steps)
    }

    /// Builds a plan backward from `goals` against the current catalog and
    /// starts a new top-level flow.
    pub async fn start_flow(&self, goals: Vec<StepId>, init: Value, metadata: Value) -> Result<FlowState, EngineError> {
        self.start_flow_inner(goals, init, metadata, None).await
    }

    fn start_flow_inner<'a>(
        &'a self,
        goals: Vec<StepId>,
        init: Value,
        metadata: Value,
        parent: Option<FlowId>,
    ) -> Pin<Box<dyn Future<Output = Result<FlowState, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            let catalog = self.catalog()?;
            let plan = build_plan(&catalog, &goals)?;
            let flow_id: FlowId = Uuid::new_v4().to_string().into();
            let agg = AggregateRef::flow(&flow_id);

            self.aggregator.execute_engine(&AggregateRef::engine(), |s| {
                handle_engine_command(s, EngineCommand::FlowActivated { flow_id: flow_id.clone(), parent: parent.clone() }, now_ms())
            })?;

            let (state, events) = self.aggregator.execute_flow_traced(&agg, now_ms(), |s| {
                flow_core::runtime::handle_command(
                    s,
                    FlowCommand::Start { plan: plan.clone(), init: init.clone(), metadata: metadata.clone() },
                    now_ms(),
                    self.scripts.as_ref(),
                    &flow_core::retry::DefaultRetryPolicy,
                    &self.retry_defaults,
                )
            })?;

            self.publish_flow_events(&flow_id, &events);
            let state = self.react(&flow_id, state, &events).await?;
            self.maybe_deactivate(&flow_id, &state)?;
            Ok(state)
        })
    }

    /// External entry point for an asynchronous HTTP step's webhook
    /// callback (§6.1): the HTTP/WebSocket surface that receives the POST is
    /// out of scope, but applying its result to the flow is the engine's
    /// job, not the surface's.
    pub async fn webhook_completed(&self, flow_id: FlowId, step_id: StepId, token: WorkToken, outcome: WorkOutcome) -> Result<FlowState, EngineError> {
        self.apply_outcome(flow_id, step_id, token, outcome).await
    }

    fn apply_outcome<'a>(
        &'a self,
        flow_id: FlowId,
        step_id: StepId,
        token: WorkToken,
        outcome: WorkOutcome,
    ) -> Pin<Box<dyn Future<Output = Result<FlowState, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            let cmd = match outcome {
                WorkOutcome::Succeeded { outputs } => FlowCommand::WorkSucceeded { step_id, token, outputs },
                WorkOutcome::Failed { error } => FlowCommand::WorkFailed { step_id, token, error },
                WorkOutcome::NotCompleted { error } => FlowCommand::WorkNotCompleted { step_id, token, error },
            };
            self.advance(flow_id, cmd).await
        })
    }

    fn advance<'a>(&'a self, flow_id: FlowId, cmd: FlowCommand) -> Pin<Box<dyn Future<Output = Result<FlowState, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            let agg = AggregateRef::flow(&flow_id);
            let (state, events) = self.aggregator.execute_flow_traced(&agg, now_ms(), |s| {
                flow_core::runtime::handle_command(s, cmd.clone(), now_ms(), self.scripts.as_ref(), &flow_core::retry::DefaultRetryPolicy, &self.retry_defaults)
            })?;
            self.publish_flow_events(&flow_id, &events);
            let state = self.react(&flow_id, state, &events).await?;
            self.maybe_deactivate(&flow_id, &state)?;

            if state.is_terminal() {
                if let Some((_, link)) = self.child_links.remove(&flow_id) {
                    self.resolve_parent(link, &state).await?;
                }
            }
            Ok(state)
        })
    }

    /// Drives the side effects a command's cascade asked for: dispatching a
    /// `work_started` to an executor (or composing a child flow) and
    /// scheduling a `retry_scheduled`. Re-reads the flow's plan from
    /// `state` rather than the catalog, since a plan snapshots its steps by
    /// value at the moment the flow started.
    async fn react(&self, flow_id: &FlowId, mut state: FlowState, events: &[StoredEvent]) -> Result<FlowState, EngineError> {
        for event in events {
            match event.event_type.as_str() {
                t if t == flow_ev::WORK_STARTED => {
                    let step_id: StepId = event.data["step_id"].as_str().unwrap_or_default().into();
                    let token: WorkToken = event.data["token"].as_str().unwrap_or_default().into();
                    let inputs = event.data.get("inputs").cloned().unwrap_or(Value::Null);
                    let Some(step) = state.plan.as_ref().and_then(|p| p.step(&step_id)).cloned() else { continue };

                    if step.kind == StepKind::Flow {
                        self.start_child_flow(flow_id.clone(), step_id, token, &step, inputs).await?;
                        // A child flow resolves its parent's work item
                        // asynchronously once it finishes, so `state` is not
                        // re-read here.
                    } else {
                        let outcome = self.dispatch(flow_id, &step, &token.0, &inputs).await;
                        if let Some(outcome) = outcome {
                            state = self.apply_outcome_for(flow_id.clone(), step_id, token, outcome).await?;
                        }
                    }
                }
                t if t == flow_ev::RETRY_SCHEDULED => {
                    let step_id: StepId = event.data["step_id"].as_str().unwrap_or_default().into();
                    let token: WorkToken = event.data["token"].as_str().unwrap_or_default().into();
                    let next_retry_at = event.data.get("next_retry_at").and_then(Value::as_i64).unwrap_or(now_ms());
                    let delay_ms = (next_retry_at - now_ms()).max(0) as u64;
                    let retry_count = event.data.get("retry_count").and_then(Value::as_u64).unwrap_or(0) as u32;

                    if let Some(step) = state.plan.as_ref().and_then(|p| p.step(&step_id)) {
                        let effective = flow_policies::effective_work_config(step.work_config.as_ref(), &self.retry_defaults);
                        let decision = flow_policies::decide_retry(&effective, retry_count.saturating_sub(1));
                        tracing::debug!(flow_id = %flow_id, step_id = %step_id, token = %token, ?decision, "retry scheduled");
                    }

                    let key = retry_key(flow_id, &step_id, &token);
                    self.scheduler.schedule(key, Instant::now() + Duration::from_millis(delay_ms), RetryTask { flow_id: flow_id.clone(), step_id, token });
                }
                _ => {}
            }
        }
        Ok(state)
    }

    async fn apply_outcome_for(&self, flow_id: FlowId, step_id: StepId, token: WorkToken, outcome: WorkOutcome) -> Result<FlowState, EngineError> {
        let cmd = match outcome {
            WorkOutcome::Succeeded { outputs } => FlowCommand::WorkSucceeded { step_id, token, outputs },
            WorkOutcome::Failed { error } => FlowCommand::WorkFailed { step_id, token, error },
            WorkOutcome::NotCompleted { error } => FlowCommand::WorkNotCompleted { step_id, token, error },
        };
        self.advance(flow_id, cmd).await
    }

    async fn dispatch(&self, flow_id: &FlowId, step: &Step, token: &str, inputs: &Value) -> Option<WorkOutcome> {
        let registry = self.executor_for(flow_id);
        let webhook_url = self.webhook_base_url.as_ref().map(|base| format!("{base}/webhooks/{}/{}/{}", flow_id.0, step.id.0, token));
        match registry.dispatch(step, token, inputs, webhook_url.as_deref()).await {
            DispatchOutcome::Resolved(outcome) => Some(outcome),
            DispatchOutcome::AwaitingWebhook => None,
        }
    }

    fn executor_for(&self, flow_id: &FlowId) -> Arc<ExecutorRegistry> {
        Arc::clone(
            self.executors
                .entry(flow_id.clone())
                .or_insert_with(|| {
                    Arc::new(ExecutorRegistry::new(Arc::new(HttpExecutor::new(flow_id.0.clone())), Arc::new(ScriptExecutor::new(Arc::clone(&self.scripts)))))
                })
                .value(),
        )
    }

    /// Starts a child flow for a `kind: Flow` step, mapping the parent's
    /// resolved inputs into the child's `init` via `FlowSpec.input_map`
    /// (parent attribute name -> child attribute name). The child's
    /// completion is applied back to this work item by [`Self::advance`]
    /// when the child reaches a terminal status.
    fn start_child_flow<'a>(
        &'a self,
        parent: FlowId,
        parent_step: StepId,
        parent_token: WorkToken,
        step: &'a Step,
        inputs: Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move {
            let spec = step.flow.clone().expect("kind Flow step must carry a FlowSpec (validated at registration)");
            let mut child_init = serde_json::Map::new();
            if let Value::Object(map) = &inputs {
                for (parent_attr, child_attr) in &spec.input_map {
                    if let Some(v) = map.get(parent_attr) {
                        child_init.insert(child_attr.clone(), v.clone());
                    }
                }
            }

            let catalog = self.catalog()?;
            let plan = build_plan(&catalog, &spec.goals)?;
            let child_id: FlowId = Uuid::new_v4().to_string().into();
            let agg = AggregateRef::flow(&child_id);

            self.aggregator.execute_engine(&AggregateRef::engine(), |s| {
                handle_engine_command(s, EngineCommand::FlowActivated { flow_id: child_id.clone(), parent: Some(parent.clone()) }, now_ms())
            })?;

            self.child_links.insert(child_id.clone(), ChildLink { parent, parent_step, parent_token, output_map: spec.output_map.clone() });

            let (state, events) = self.aggregator.execute_flow_traced(&agg, now_ms(), |s| {
                flow_core::runtime::handle_command(
                    s,
                    FlowCommand::Start { plan: plan.clone(), init: Value::Object(child_init.clone()), metadata: Value::Null },
                    now_ms(),
                    self.scripts.as_ref(),
                    &flow_core::retry::DefaultRetryPolicy,
                    &self.retry_defaults,
                )
            })?;
            self.publish_flow_events(&child_id, &events);
            let state = self.react(&child_id, state, &events).await?;
            self.maybe_deactivate(&child_id, &state)?;

            if state.is_terminal() {
                if let Some((_, link)) = self.child_links.remove(&child_id) {
                    self.resolve_parent(link, &state).await?;
                }
            }
            Ok(())
        })
    }

    /// Translates a terminated child flow's result back onto the parent's
    /// waiting work item via `FlowSpec.output_map` (child attribute name ->
    /// parent attribute name).
    async fn resolve_parent(&self, link: ChildLink, child_state: &FlowState) -> Result<(), EngineError> {
        let outcome = match child_state.status {
            FlowStatus::Completed => {
                let mut outputs = serde_json::Map::new();
                for (child_attr, parent_attr) in &link.output_map {
                    if let Some(v) = child_state.attributes.get(child_attr) {
                        outputs.insert(parent_attr.clone(), v.value.clone());
                    }
                }
                WorkOutcome::Succeeded { outputs: Value::Object(outputs) }
            }
            FlowStatus::Failed => WorkOutcome::Failed { error: child_state.error.clone().unwrap_or_else(|| "child flow failed".to_string()) },
            FlowStatus::Active => return Ok(()),
        };
        self.apply_outcome(link.parent, link.parent_step, link.parent_token, outcome).await?;
        Ok(())
    }

    async fn fire_retry(&self, task: RetryTask) -> Result<(), EngineError> {
        let agg = AggregateRef::flow(&task.flow_id);
        let state = self.aggregator.read_flow(&agg)?;
        let Some(exec) = state.executions.get(&task.step_id) else { return Ok(()) };
        let Some(work) = exec.work_items.get(&task.token) else { return Ok(()) };
        if work.is_terminal() {
            return Ok(());
        }
        let Some(step) = state.plan.as_ref().and_then(|p| p.step(&task.step_id)).cloned() else { return Ok(()) };
        let inputs = work.inputs.clone().unwrap_or(Value::Null);

        let outcome = self.dispatch(&task.flow_id, &step, &task.token.0, &inputs).await;
        if let Some(outcome) = outcome {
            self.apply_outcome(task.flow_id, task.step_id, task.token, outcome).await?;
        }
        Ok(())
    }

    fn maybe_deactivate(&self, flow_id: &FlowId, state: &FlowState) -> Result<(), EngineError> {
        if !state.is_deactivation_eligible() {
            return Ok(());
        }
        self.scheduler.cancel_prefix(&flow_prefix(flow_id));
        match self.aggregator.execute_engine(&AggregateRef::engine(), |s| handle_engine_command(s, EngineCommand::FlowDeactivated { flow_id: flow_id.clone() }, now_ms())) {
            Ok(_) => {
                self.executors.remove(flow_id);
                Ok(())
            }
            // Already deactivated by a previous pass over the same cascade;
            // not an error worth propagating.
            Err(AggregateError::Command(flow_core::errors::CommandError::FlowNotActive(_))) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn publish_flow_events(&self, flow_id: &FlowId, events: &[StoredEvent]) {
        for event in events {
            self.hub.publish(HubEnvelope::from_stored(AggregateKind::Flow, &flow_id.0, event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::event::InMemoryEventStore;
    use flow_core::model::{AttributeDecl, AttributeRole, AttributeType, ScriptLanguage, ScriptSpec};
    use serde_json::json;

    fn script_step(id: &str, input: &str, output: &str, source: &str) -> Step {
        let mut attributes = IndexMap::new();
        attributes.insert(input.to_string(), AttributeDecl { role: AttributeRole::Required, ty: AttributeType::Number, default: None, for_each: false });
        attributes.insert(output.to_string(), AttributeDecl { role: AttributeRole::Output, ty: AttributeType::Number, default: None, for_each: false });
        Step {
            id: id.into(),
            name: id.to_string(),
            version: 1,
            kind: StepKind::Script,
            attributes,
            predicate: None,
            http: None,
            script: Some(ScriptSpec { language: ScriptLanguage::Expression, source: source.to_string() }),
            flow: None,
            work_config: None,
            memoizable: false,
            labels: IndexMap::new(),
        }
    }

    fn test_engine() -> Arc<Engine<InMemoryEventStore>> {
        let store = Arc::new(InMemoryEventStore::new());
        let (engine, _rx) = Engine::new(store, WorkConfig { max_retries: 0, initial_backoff_ms: 0, max_backoff_ms: 0, backoff_type: flow_core::model::BackoffType::Fixed }, None);
        engine
    }

    #[tokio::test]
    async fn start_flow_runs_a_script_chain_to_completion() {
        let engine = test_engine();
        engine.register_step(script_step("double", "n", "doubled", "(object \"doubled\" (* n 2))")).await.unwrap();
        engine.register_step(script_step("triple", "doubled", "tripled", "(object \"tripled\" (* doubled 3))")).await.unwrap();

        let state = engine.start_flow(vec!["triple".into()], json!({"n": 2}), Value::Null).await.unwrap();

        assert_eq!(state.status, FlowStatus::Completed);
        assert_eq!(state.attributes["doubled"].value, json!(4.0));
        assert_eq!(state.attributes["tripled"].value, json!(12.0));
    }

    #[tokio::test]
    async fn completed_flow_is_deactivated_in_the_engine_catalog() {
        let engine = test_engine();
        engine.register_step(script_step("double", "n", "doubled", "(object \"doubled\" (* n 2))")).await.unwrap();
        let state = engine.start_flow(vec!["double".into()], json!({"n": 5}), Value::Null).await.unwrap();

        let engine_state = engine.aggregator.read_engine(&AggregateRef::engine()).unwrap();
        assert!(!engine_state.active.contains_key(&state.id));
    }

    #[tokio::test]
    async fn missing_required_input_fails_the_step_not_the_process() {
        let engine = test_engine();
        engine.register_step(script_step("double", "n", "doubled", "(object \"doubled\" (* n 2))")).await.unwrap();

        let state = engine.start_flow(vec!["double".into()], Value::Null, Value::Null).await.unwrap();
        assert_eq!(state.status, FlowStatus::Failed);
    }

    #[tokio::test]
    async fn child_flow_composition_maps_attributes_across_the_boundary() {
        let engine = test_engine();
        engine.register_step(script_step("child_double", "value", "result", "(object \"result\" (* value 2))")).await.unwrap();

        let mut input_map = IndexMap::new();
        input_map.insert("n".to_string(), "value".to_string());
        let mut output_map = IndexMap::new();
        output_map.insert("result".to_string(), "n_doubled".to_string());

        let mut attributes = IndexMap::new();
        attributes.insert("n".to_string(), AttributeDecl { role: AttributeRole::Required, ty: AttributeType::Number, default: None, for_each: false });
        attributes.insert("n_doubled".to_string(), AttributeDecl { role: AttributeRole::Output, ty: AttributeType::Number, default: None, for_each: false });
        let parent_step = Step {
            id: "delegate".into(),
            name: "delegate".to_string(),
            version: 1,
            kind: StepKind::Flow,
            attributes,
            predicate: None,
            http: None,
            script: None,
            flow: Some(flow_core::model::FlowSpec { goals: vec!["child_double".into()], input_map, output_map }),
            work_config: None,
            memoizable: false,
            labels: IndexMap::new(),
        };
        engine.register_step(parent_step).await.unwrap();

        let state = engine.start_flow(vec!["delegate".into()], json!({"n": 7}), Value::Null).await.unwrap();
        assert_eq!(state.status, FlowStatus::Completed);
        assert_eq!(state.attributes["n_doubled"].value, json!(14.0));
    }
}
