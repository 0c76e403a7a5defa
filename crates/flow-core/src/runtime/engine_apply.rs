//! Pure event appliers for [`EngineState`] (the Engine Core aggregate,
//! §4.7), mirroring [`super::apply::apply_flow_event`]'s at-most-one-applier
//! contract: unknown event types are ignored for forward compatibility.

use serde_json::Value;

use crate::model::{ActiveFlowEntry, DeactivatedEntry, EngineState, HealthEntry, HealthStatus, Step, DEACTIVATED_WINDOW};

use crate::event::types::engine as ev;

pub fn apply_engine_event(state: &mut EngineState, event_type: &str, data: &Value) {
    match event_type {
        t if t == ev::STEP_REGISTERED => apply_step_registered(state, data),
        t if t == ev::STEP_UPDATED => apply_step_updated(state, data),
        t if t == ev::STEP_UNREGISTERED => apply_step_unregistered(state, data),
        t if t == ev::STEP_HEALTH_CHANGED => apply_step_health_changed(state, data),
        t if t == ev::FLOW_ACTIVATED => apply_flow_activated(state, data),
        t if t == ev::FLOW_DEACTIVATED => apply_flow_deactivated(state, data),
        t if t == ev::FLOW_ARCHIVING => apply_flow_archiving(state, data),
        t if t == ev::FLOW_ARCHIVED => apply_flow_archived(state, data),
        _ => {}
    }
}

fn s(data: &Value, field: &str) -> String {
    data.get(field).and_then(Value::as_str).unwrap_or_default().to_string()
}
fn i(data: &Value, field: &str) -> i64 {
    data.get(field).and_then(Value::as_i64).unwrap_or(0)
}

fn apply_step_registered(state: &mut EngineState, data: &Value) {
    let step: Step = serde_json::from_value(data["step"].clone()).expect("step_registered.step must deserialize");
    state.health.entry(step.id.clone()).or_insert_with(HealthEntry::default);
    state.steps.insert(step.id.clone(), step);
}

fn apply_step_updated(state: &mut EngineState, data: &Value) {
    let step: Step = serde_json::from_value(data["step"].clone()).expect("step_updated.step must deserialize");
    state.steps.insert(step.id.clone(), step);
}

fn apply_step_unregistered(state: &mut EngineState, data: &Value) {
    let id = s(data, "step_id").into();
    state.steps.shift_remove(&id);
    state.health.shift_remove(&id);
}

fn apply_step_health_changed(state: &mut EngineState, data: &Value) {
    let id = s(data, "step_id").into();
    let status = match s(data, "status").as_str() {
        "healthy" => HealthStatus::Healthy,
        "unhealthy" => HealthStatus::Unhealthy,
        _ => HealthStatus::Unknown,
    };
    let error = data.get("error").and_then(Value::as_str).map(str::to_string);
    state.health.insert(id, HealthEntry { status, error });
}

fn apply_flow_activated(state: &mut EngineState, data: &Value) {
    let id = s(data, "flow_id").into();
    let parent = data.get("parent").and_then(Value::as_str).map(|p| p.into());
    state.active.insert(id, ActiveFlowEntry { parent, activated_at: i(data, "at") });
}

fn apply_flow_deactivated(state: &mut EngineState, data: &Value) {
    let id = s(data, "flow_id").into();
    state.active.shift_remove(&id);
    state.deactivated.push_back(DeactivatedEntry { flow_id: id, at: i(data, "at") });
    while state.deactivated.len() > DEACTIVATED_WINDOW {
        state.deactivated.pop_front();
    }
}

fn apply_flow_archiving(state: &mut EngineState, data: &Value) {
    let id = s(data, "flow_id").into();
    state.deactivated.retain(|e| e.flow_id != id);
    state.archiving.insert(id, i(data, "lease_start"));
}

fn apply_flow_archived(state: &mut EngineState, data: &Value) {
    let id: crate::model::FlowId = s(data, "flow_id").into();
    state.archiving.shift_remove(&id);
}
