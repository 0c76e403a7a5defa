//! The flow dispatch loop (§4.3): command handling plus the reactive
//! cascade (predicate evaluation, input resolution, fan-out, step
//! completion aggregation, goal resolution) that runs inside a single
//! `Execute` until it reaches a fixpoint.

use std::collections::{BTreeMap, HashMap};

use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::CommandError;
use crate::event::types::flow as ev;
use crate::event::NewEvent;
use crate::model::{ExecutionPlan, FlowState, FlowStatus, Step, StepExecStatus, StepId, WorkConfig, WorkStatus, WorkToken};
use crate::retry::RetryPolicy;

use super::apply::apply_flow_event;
use super::predicate::PredicateEvaluator;

#[derive(Clone)]
pub enum FlowCommand {
    Start { plan: ExecutionPlan, init: Value, metadata: Value },
    WorkSucceeded { step_id: StepId, token: WorkToken, outputs: Value },
    WorkNotCompleted { step_id: StepId, token: WorkToken, error: String },
    WorkFailed { step_id: StepId, token: WorkToken, error: String },
}

/// Handles one command against `state`, returning the full, ordered cascade
/// of events to append in a single transaction. Pure given its inputs: the
/// same `(state, cmd)` always produces the same event cascade, which is
/// what lets the aggregator safely retry on an optimistic-concurrency
/// conflict.
pub fn handle_command(
    state: &FlowState,
    cmd: FlowCommand,
    now_ms: i64,
    predicate: &dyn PredicateEvaluator,
    retry: &dyn RetryPolicy,
    engine_retry_defaults: &WorkConfig,
) -> Result<Vec<NewEvent>, CommandError> {
    let mut working = state.clone();
    let mut events = Vec::new();

    match cmd {
        FlowCommand::Start { plan, init, metadata } => {
            if working.plan.is_some() {
                return Err(CommandError::AlreadyStarted);
            }
            raise(&mut working, &mut events, ev::FLOW_STARTED, json!({"plan": plan, "init": init, "metadata": metadata, "started_at": now_ms}));
        }
        FlowCommand::WorkSucceeded { step_id, token, outputs } => {
            let w = find_work(&working, &step_id, &token)?;
            if w.is_terminal() {
                return Err(CommandError::WorkAlreadyTerminal(token.0.clone()));
            }
            raise(
                &mut working,
                &mut events,
                ev::WORK_SUCCEEDED,
                json!({"step_id": step_id.0, "token": token.0, "outputs": outputs, "at": now_ms}),
            );
            if let Value::Object(map) = &outputs {
                for (k, v) in map {
                    if !working.attributes.contains_key(k) {
                        raise(
                            &mut working,
                            &mut events,
                            ev::ATTRIBUTE_SET,
                            json!({"name": k, "value": v, "producing_step": step_id.0, "at": now_ms}),
                        );
                    }
                }
            }
        }
        FlowCommand::WorkNotCompleted { step_id, token, error } => {
            let w = find_work(&working, &step_id, &token)?;
            if w.is_terminal() {
                return Err(CommandError::WorkAlreadyTerminal(token.0.clone()));
            }
            let current_retry_count = w.retry_count;
            let step = working.plan.as_ref().unwrap().step(&step_id).ok_or_else(|| CommandError::UnknownStep(step_id.0.clone()))?;
            let cfg = step.work_config.clone().unwrap_or_else(|| engine_retry_defaults.clone());

            raise(&mut working, &mut events, ev::WORK_NOT_COMPLETED, json!({"step_id": step_id.0, "token": token.0, "error": error, "at": now_ms}));

            if retry.should_retry(&cfg, current_retry_count) {
                let delay = retry.next_delay_ms(&cfg, current_retry_count);
                let next_retry_at = now_ms + delay as i64;
                raise(
                    &mut working,
                    &mut events,
                    ev::RETRY_SCHEDULED,
                    json!({
                        "step_id": step_id.0,
                        "token": token.0,
                        "retry_count": current_retry_count + 1,
                        "next_retry_at": next_retry_at,
                        "error": error,
                    }),
                );
            } else {
                raise(&mut working, &mut events, ev::WORK_FAILED, json!({"step_id": step_id.0, "token": token.0, "error": error, "at": now_ms}));
            }
        }
        FlowCommand::WorkFailed { step_id, token, error } => {
            let w = find_work(&working, &step_id, &token)?;
            if w.is_terminal() {
                return Err(CommandError::WorkAlreadyTerminal(token.0.clone()));
            }
            raise(&mut working, &mut events, ev::WORK_FAILED, json!({"step_id": step_id.0, "token": token.0, "error": error, "at": now_ms}));
        }
    }

    loop {
        let next = dispatch_pass(&working, now_ms, predicate)?;
        if next.is_empty() {
            break;
        }
        for (t, d) in next {
            raise(&mut working, &mut events, t, d);
        }
    }

    Ok(events)
}

fn raise(working: &mut FlowState, events: &mut Vec<NewEvent>, event_type: &str, data: Value) {
    apply_flow_event(working, event_type, &data);
    events.push(NewEvent { event_type: event_type.to_string(), data });
}

fn find_work<'a>(state: &'a FlowState, step_id: &StepId, token: &WorkToken) -> Result<&'a crate::model::WorkState, CommandError> {
    let exec = state.executions.get(step_id).ok_or_else(|| CommandError::UnknownStep(step_id.0.clone()))?;
    exec.work_items.get(token).ok_or_else(|| CommandError::UnknownWorkToken(token.0.clone(), step_id.0.clone()))
}

/// One reactive pass: step-completion aggregation takes priority (it may
/// free attributes new dispatches need), then new-step dispatch, then goal
/// resolution. Each category is tried in order and, if it produced
/// anything, returned immediately so the caller re-folds before evaluating
/// the next category against fresher state.
fn dispatch_pass(state: &FlowState, now_ms: i64, predicate: &dyn PredicateEvaluator) -> Result<Vec<(&'static str, Value)>, CommandError> {
    let Some(plan) = state.plan.as_ref() else { return Ok(vec![]) };

    if let Some(out) = step_completion_pass(state, plan, now_ms) {
        return Ok(out);
    }

    if state.status == FlowStatus::Active {
        let out = new_dispatch_pass(state, plan, now_ms, predicate)?;
        if !out.is_empty() {
            return Ok(out);
        }
    }

    if state.status == FlowStatus::Active {
        if let Some(out) = goal_resolution_pass(state, plan, now_ms) {
            return Ok(out);
        }
    }

    Ok(vec![])
}

fn step_completion_pass(state: &FlowState, plan: &ExecutionPlan, now_ms: i64) -> Option<Vec<(&'static str, Value)>> {
    for step in &plan.steps {
        let exec = state.executions.get(&step.id)?;
        if exec.status != StepExecStatus::Active || exec.work_items.is_empty() || !exec.all_work_terminal() {
            continue;
        }
        // Partial-failure tolerance: a step with a `for_each` input fans out
        // to independent per-element work items, so a minority of element
        // failures does not sink the whole step — only a total wipeout does.
        // A step with no `for_each` input has exactly one work item, so
        // "tolerant" and "intolerant" coincide there.
        let tolerant = step.inputs().any(|(_, d)| d.for_each);
        let succeeded: Vec<_> = exec.work_items.values().filter(|w| w.status == WorkStatus::Succeeded).collect();

        if succeeded.is_empty() {
            let error = exec.work_items.values().filter_map(|w| w.error.clone()).last().unwrap_or_else(|| "all work items failed".to_string());
            return Some(vec![(ev::STEP_FAILED, json!({"step_id": step.id.0, "error": error, "at": now_ms}))]);
        }
        if !tolerant && succeeded.len() < exec.work_items.len() {
            let error = exec.work_items.values().filter_map(|w| w.error.clone()).next().unwrap_or_else(|| "work item failed".to_string());
            return Some(vec![(ev::STEP_FAILED, json!({"step_id": step.id.0, "error": error, "at": now_ms}))]);
        }

        let mut outputs: BTreeMap<String, Value> = BTreeMap::new();
        for (name, _) in step.outputs() {
            if tolerant {
                let arr: Vec<Value> = exec
                    .work_items
                    .values()
                    .filter(|w| w.status == WorkStatus::Succeeded)
                    .filter_map(|w| w.outputs.as_ref().and_then(|o| o.get(name)).cloned())
                    .collect();
                outputs.insert(name.clone(), Value::Array(arr));
            } else if let Some(v) = succeeded.first().and_then(|w| w.outputs.as_ref()).and_then(|o| o.get(name)).cloned() {
                outputs.insert(name.clone(), v);
            }
        }
        let duration_ms = exec.started_at.map(|s| now_ms - s).unwrap_or(0);
        return Some(vec![(ev::STEP_COMPLETED, json!({"step_id": step.id.0, "outputs": outputs, "duration_ms": duration_ms, "at": now_ms}))]);
    }
    None
}

fn new_dispatch_pass(
    state: &FlowState,
    plan: &ExecutionPlan,
    now_ms: i64,
    predicate: &dyn PredicateEvaluator,
) -> Result<Vec<(&'static str, Value)>, CommandError> {
    let mut out = Vec::new();
    for step in &plan.steps {
        let Some(exec) = state.executions.get(&step.id) else { continue };
        if exec.status != StepExecStatus::Pending || !inputs_ready(state, step) {
            continue;
        }
        let inputs = resolve_inputs(state, step);

        if let Some(pred) = &step.predicate {
            match predicate.evaluate(pred, &inputs) {
                Ok(true) => {}
                Ok(false) => {
                    out.push((ev::STEP_SKIPPED, json!({"step_id": step.id.0, "reason": "predicate false", "at": now_ms})));
                    continue;
                }
                Err(e) => {
                    // Predicate evaluation failure is a Permanent error
                    // (§7): it propagates as a step failure, not a retry.
                    out.push((ev::STEP_FAILED, json!({"step_id": step.id.0, "error": format!("predicate evaluation failed: {e}"), "at": now_ms})));
                    continue;
                }
            }
        }

        out.push((ev::STEP_STARTED, json!({"step_id": step.id.0, "inputs": inputs.clone(), "at": now_ms})));
        for (token, work_inputs) in fan_out(step, &inputs) {
            out.push((ev::WORK_STARTED, json!({"step_id": step.id.0, "token": token, "inputs": work_inputs, "at": now_ms})));
        }
    }
    Ok(out)
}

fn goal_resolution_pass(state: &FlowState, plan: &ExecutionPlan, now_ms: i64) -> Option<Vec<(&'static str, Value)>> {
    let all_complete = plan.goals.iter().all(|g| matches!(state.executions.get(g).map(|e| e.status), Some(StepExecStatus::Completed)));
    if all_complete {
        let mut result = BTreeMap::new();
        for g in &plan.goals {
            if let Some(exec) = state.executions.get(g) {
                for (k, v) in &exec.outputs {
                    result.insert(k.clone(), v.clone());
                }
            }
        }
        return Some(vec![(ev::FLOW_COMPLETED, json!({"result": result, "at": now_ms}))]);
    }

    if let Some(unreachable) = find_unreachable_goal(state, plan) {
        return Some(vec![(ev::FLOW_FAILED, json!({"error": format!("goal '{}' is unreachable", unreachable.0), "at": now_ms}))]);
    }
    None
}

/// A step is "alive" while it can still possibly reach `completed`. Fails
/// and skips are dead immediately; a pending/active step dies once every
/// producer of one of its still-unset required inputs is dead. Fixpoint
/// over the (acyclic, so finite) plan graph.
fn find_unreachable_goal<'a>(state: &FlowState, plan: &'a ExecutionPlan) -> Option<&'a StepId> {
    let mut alive: HashMap<&StepId, bool> = plan
        .steps
        .iter()
        .map(|s| {
            let dead = matches!(state.executions.get(&s.id).map(|e| e.status), Some(StepExecStatus::Failed) | Some(StepExecStatus::Skipped));
            (&s.id, !dead)
        })
        .collect();

    loop {
        let mut changed = false;
        for step in &plan.steps {
            if !*alive.get(&step.id).unwrap_or(&false) {
                continue;
            }
            for (attr, decl) in step.required_inputs() {
                if state.attributes.contains_key(attr) {
                    continue;
                }
                let Some(entry) = plan.attributes.get(attr) else { continue };
                if entry.providers.is_empty() {
                    continue; // supplied by init; not attainable via a producer in this plan.
                }
                let still_viable = entry.providers.iter().any(|p| *alive.get(p).unwrap_or(&false));
                if !still_viable {
                    alive.insert(&step.id, false);
                    changed = true;
                }
                let _ = decl;
            }
        }
        if !changed {
            break;
        }
    }

    plan.goals.iter().find(|g| {
        let status = state.executions.get(*g).map(|e| e.status);
        matches!(status, Some(StepExecStatus::Pending) | Some(StepExecStatus::Active)) && !*alive.get(*g).unwrap_or(&true)
    })
}

fn inputs_ready(state: &FlowState, step: &Step) -> bool {
    for (name, decl) in step.inputs() {
        match state.attributes.get(name) {
            Some(v) => {
                if decl.for_each && !v.value.is_array() {
                    return false;
                }
            }
            None => {
                if decl.role == crate::model::AttributeRole::Required {
                    return false;
                }
            }
        }
    }
    true
}

fn resolve_inputs(state: &FlowState, step: &Step) -> Value {
    let mut map = serde_json::Map::new();
    for (name, decl) in step.inputs() {
        if let Some(v) = state.attributes.get(name) {
            map.insert(name.clone(), v.value.clone());
        } else if let Some(default) = &decl.default {
            map.insert(name.clone(), default.clone());
        }
        // else: optional, missing, no default -> omitted entirely.
    }
    Value::Object(map)
}

fn fan_out(step: &Step, inputs: &Value) -> Vec<(String, Value)> {
    let for_each_attr = step.inputs().find(|(name, d)| d.for_each && inputs.get(*name).map(Value::is_array).unwrap_or(false)).map(|(n, _)| n.clone());

    let Some(attr) = for_each_attr else {
        return vec![(Uuid::new_v4().to_string(), inputs.clone())];
    };

    let elements = inputs.get(&attr).and_then(Value::as_array).cloned().unwrap_or_default();
    elements
        .into_iter()
        .map(|element| {
            let mut item = inputs.clone();
            if let Value::Object(map) = &mut item {
                map.insert(attr.clone(), element);
            }
            (Uuid::new_v4().to_string(), item)
        })
        .collect()
}
