//! Pure event appliers for [`FlowState`] (§4.1's "at-most-one applier"
//! contract): `(state, event) -> state`. Used identically for replay
//! (folding a stored log from scratch) and for simulating the cascade of
//! events a command raises before they are appended (see
//! [`super::dispatch::handle_command`]) — this identity is what guarantees
//! that replaying a log deterministically reproduces the same projection.
//!
//! Unknown event types are ignored, per the forward-compatibility rule.

use serde_json::Value;

use crate::model::{
    AttributeValue, ExecutionPlan, FlowState, FlowStatus, StepExecStatus, StepExecution, WorkState, WorkStatus, WorkToken,
};

use super::super::event::types::flow as ev;

pub fn apply_flow_event(state: &mut FlowState, event_type: &str, data: &Value) {
    match event_type {
        t if t == ev::FLOW_STARTED => apply_flow_started(state, data),
        t if t == ev::ATTRIBUTE_SET => apply_attribute_set(state, data),
        t if t == ev::STEP_STARTED => apply_step_started(state, data),
        t if t == ev::WORK_STARTED => apply_work_started(state, data),
        t if t == ev::STEP_SKIPPED => apply_step_skipped(state, data),
        t if t == ev::WORK_SUCCEEDED => apply_work_succeeded(state, data),
        t if t == ev::WORK_NOT_COMPLETED => apply_work_not_completed(state, data),
        t if t == ev::WORK_FAILED => apply_work_failed(state, data),
        t if t == ev::RETRY_SCHEDULED => apply_retry_scheduled(state, data),
        t if t == ev::STEP_COMPLETED => apply_step_completed(state, data),
        t if t == ev::STEP_FAILED => apply_step_failed(state, data),
        t if t == ev::FLOW_COMPLETED => apply_flow_completed(state, data),
        t if t == ev::FLOW_FAILED => apply_flow_failed(state, data),
        _ => {} // forward compatibility: unrecognized types are ignored.
    }
}

fn s(data: &Value, field: &str) -> String {
    data.get(field).and_then(Value::as_str).unwrap_or_default().to_string()
}
fn i(data: &Value, field: &str) -> i64 {
    data.get(field).and_then(Value::as_i64).unwrap_or(0)
}

fn apply_flow_started(state: &mut FlowState, data: &Value) {
    let plan: ExecutionPlan = serde_json::from_value(data["plan"].clone()).expect("flow_started.plan must deserialize");
    let init = data.get("init").cloned().unwrap_or(Value::Object(Default::default()));
    state.metadata = data.get("metadata").cloned().unwrap_or(Value::Null);
    state.started_at = Some(i(data, "started_at"));
    state.status = FlowStatus::Active;

    if let Value::Object(map) = init {
        for (k, v) in map {
            state.attributes.entry(k).or_insert(AttributeValue { value: v, producing_step: crate::model::PROVENANCE_INIT.to_string() });
        }
    }
    for step in &plan.steps {
        state.executions.entry(step.id.clone()).or_insert_with(StepExecution::pending);
    }
    state.plan = Some(plan);
}

fn apply_attribute_set(state: &mut FlowState, data: &Value) {
    let name = s(data, "name");
    // First-writer-wins: a later attribute_set for an already-set name is a
    // logic error upstream, but the applier stays defensive and keeps the
    // existing value regardless.
    state.attributes.entry(name).or_insert(AttributeValue {
        value: data.get("value").cloned().unwrap_or(Value::Null),
        producing_step: s(data, "producing_step"),
    });
}

fn apply_step_started(state: &mut FlowState, data: &Value) {
    let step_id = s(data, "step_id").into();
    if let Some(exec) = state.executions.get_mut(&step_id) {
        exec.status = StepExecStatus::Active;
        exec.inputs = data.get("inputs").cloned().unwrap_or(Value::Null);
        exec.started_at = Some(i(data, "at"));
    }
}

fn apply_work_started(state: &mut FlowState, data: &Value) {
    let step_id = s(data, "step_id").into();
    let token: WorkToken = s(data, "token").into();
    if let Some(exec) = state.executions.get_mut(&step_id) {
        exec.work_items.insert(token.clone(), WorkState::new_active(token, data.get("inputs").cloned()));
    }
}

fn apply_step_skipped(state: &mut FlowState, data: &Value) {
    let step_id = s(data, "step_id").into();
    if let Some(exec) = state.executions.get_mut(&step_id) {
        exec.status = StepExecStatus::Skipped;
        exec.completed_at = Some(i(data, "at"));
        exec.error = Some(s(data, "reason"));
    }
}

fn apply_work_succeeded(state: &mut FlowState, data: &Value) {
    let step_id = s(data, "step_id").into();
    let token: WorkToken = s(data, "token").into();
    if let Some(exec) = state.executions.get_mut(&step_id) {
        if let Some(w) = exec.work_items.get_mut(&token) {
            w.status = WorkStatus::Succeeded;
            w.outputs = Some(data.get("outputs").cloned().unwrap_or(Value::Null));
        }
    }
}

fn apply_work_not_completed(state: &mut FlowState, data: &Value) {
    let step_id = s(data, "step_id").into();
    let token: WorkToken = s(data, "token").into();
    if let Some(exec) = state.executions.get_mut(&step_id) {
        if let Some(w) = exec.work_items.get_mut(&token) {
            w.status = WorkStatus::NotCompleted;
            w.error = Some(s(data, "error"));
        }
    }
}

fn apply_work_failed(state: &mut FlowState, data: &Value) {
    let step_id = s(data, "step_id").into();
    let token: WorkToken = s(data, "token").into();
    if let Some(exec) = state.executions.get_mut(&step_id) {
        if let Some(w) = exec.work_items.get_mut(&token) {
            w.status = WorkStatus::Failed;
            w.error = Some(s(data, "error"));
        }
    }
}

fn apply_retry_scheduled(state: &mut FlowState, data: &Value) {
    let step_id = s(data, "step_id").into();
    let token: WorkToken = s(data, "token").into();
    if let Some(exec) = state.executions.get_mut(&step_id) {
        if let Some(w) = exec.work_items.get_mut(&token) {
            w.status = WorkStatus::Active;
            w.retry_count = data.get("retry_count").and_then(Value::as_u64).unwrap_or(0) as u32;
            w.next_retry_at = Some(i(data, "next_retry_at"));
            w.error = Some(s(data, "error"));
        }
    }
}

fn apply_step_completed(state: &mut FlowState, data: &Value) {
    let step_id = s(data, "step_id").into();
    if let Some(exec) = state.executions.get_mut(&step_id) {
        exec.status = StepExecStatus::Completed;
        exec.completed_at = Some(i(data, "at"));
        exec.duration_ms = Some(i(data, "duration_ms"));
        if let Value::Object(outs) = data.get("outputs").cloned().unwrap_or(Value::Object(Default::default())) {
            exec.outputs = outs.into_iter().collect();
        }
    }
}

fn apply_step_failed(state: &mut FlowState, data: &Value) {
    let step_id = s(data, "step_id").into();
    if let Some(exec) = state.executions.get_mut(&step_id) {
        exec.status = StepExecStatus::Failed;
        exec.completed_at = Some(i(data, "at"));
        exec.error = Some(s(data, "error"));
    }
}

fn apply_flow_completed(state: &mut FlowState, data: &Value) {
    state.status = FlowStatus::Completed;
    state.completed_at = Some(i(data, "at"));
}

fn apply_flow_failed(state: &mut FlowState, data: &Value) {
    state.status = FlowStatus::Failed;
    state.completed_at = Some(i(data, "at"));
    state.error = Some(s(data, "error"));
    state.error_state = Some(s(data, "error"));
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::model::FlowId;
    use proptest::prelude::*;
    use serde_json::json;

    fn attribute_set_event(name: &str, value: i64, producing_step: &str) -> (String, Value) {
        (ev::ATTRIBUTE_SET.to_string(), json!({"name": name, "value": value, "producing_step": producing_step}))
    }

    proptest! {
        /// Testable property: first-writer-wins. Whichever `attribute_set`
        /// for a given name is applied first determines the final value and
        /// provenance, no matter how many more arrive after it.
        #[test]
        fn attribute_set_is_first_writer_wins(
            first_value in any::<i64>(),
            later_values in prop::collection::vec(any::<i64>(), 0..8),
        ) {
            let mut state = FlowState::new(FlowId::from("f1"));
            let (t, d) = attribute_set_event("x", first_value, "step_a");
            apply_flow_event(&mut state, &t, &d);
            for v in later_values {
                let (t, d) = attribute_set_event("x", v, "step_b");
                apply_flow_event(&mut state, &t, &d);
            }
            prop_assert_eq!(state.attributes["x"].value, json!(first_value));
            prop_assert_eq!(state.attributes["x"].producing_step.clone(), "step_a".to_string());
        }

        /// Replay is deterministic: folding the same ordered event log into
        /// two fresh states always produces identical states.
        #[test]
        fn replay_is_deterministic(values in prop::collection::vec(any::<i64>(), 0..16)) {
            let events: Vec<(String, Value)> = values
                .iter()
                .enumerate()
                .map(|(i, v)| attribute_set_event(&format!("attr{i}"), *v, "step"))
                .collect();

            let mut a = FlowState::new(FlowId::from("f1"));
            let mut b = FlowState::new(FlowId::from("f1"));
            for (t, d) in &events {
                apply_flow_event(&mut a, t, d);
            }
            for (t, d) in &events {
                apply_flow_event(&mut b, t, d);
            }
            prop_assert_eq!(a, b);
        }

        /// Unrecognized event types are ignored rather than panicking or
        /// mutating state, per the forward-compatibility rule.
        #[test]
        fn unknown_event_types_are_ignored(suffix in "[a-z_]{1,20}", payload in any::<i64>()) {
            let type_name = format!("unrecognized_{suffix}");
            prop_assume!(!ev::ALL.contains(&type_name.as_str()));
            let mut state = FlowState::new(FlowId::from("f1"));
            let before = state.clone();
            apply_flow_event(&mut state, &type_name, &json!({"v": payload}));
            prop_assert_eq!(state, before);
        }
    }
}
