//! Command handling for the Engine Core aggregate (§4.7): catalog
//! registration, health transitions, and the active/deactivated/archiving
//! flow-set bookkeeping that backs the archiver's external hand-off.

use serde_json::{json, Value};

use crate::errors::CommandError;
use crate::event::types::engine as ev;
use crate::event::NewEvent;
use crate::model::{EngineState, FlowId, HealthStatus, Step, StepId};

use super::engine_apply::apply_engine_event;

#[derive(Clone)]
pub enum EngineCommand {
    RegisterStep(Step),
    UpdateStep(Step),
    UnregisterStep(StepId),
    HealthChanged { step_id: StepId, status: HealthStatus, error: Option<String> },
    FlowActivated { flow_id: FlowId, parent: Option<FlowId> },
    FlowDeactivated { flow_id: FlowId },
    /// Reserves a deactivated flow for archival with a lease starting now;
    /// leases older than the archiver's timeout may be reclaimed by a fresh
    /// `FlowArchiving` for the same flow (the archiver is an external
    /// collaborator — this aggregate only records the reservation).
    FlowArchiving { flow_id: FlowId },
    FlowArchived { flow_id: FlowId },
}

pub fn handle_engine_command(state: &EngineState, cmd: EngineCommand, now_ms: i64) -> Result<Vec<NewEvent>, CommandError> {
    let mut working = state.clone();
    let mut events = Vec::new();

    match cmd {
        EngineCommand::RegisterStep(step) => {
            step.validate()?;
            if working.steps.contains_key(&step.id) {
                return Err(CommandError::StepAlreadyRegistered(step.id.0.clone()));
            }
            raise(&mut working, &mut events, ev::STEP_REGISTERED, json!({"step": step}));
        }
        EngineCommand::UpdateStep(step) => {
            step.validate()?;
            if !working.steps.contains_key(&step.id) {
                return Err(CommandError::StepNotRegistered(step.id.0.clone()));
            }
            raise(&mut working, &mut events, ev::STEP_UPDATED, json!({"step": step}));
        }
        EngineCommand::UnregisterStep(step_id) => {
            if !working.steps.contains_key(&step_id) {
                return Err(CommandError::StepNotRegistered(step_id.0.clone()));
            }
            raise(&mut working, &mut events, ev::STEP_UNREGISTERED, json!({"step_id": step_id.0}));
        }
        EngineCommand::HealthChanged { step_id, status, error } => {
            if !working.steps.contains_key(&step_id) {
                return Err(CommandError::StepNotRegistered(step_id.0.clone()));
            }
            let current = working.health.get(&step_id).map(|h| h.status);
            // Only emitted on a transition (§4.7): re-probing the same
            // status is a no-op, not a fresh event.
            if current != Some(status) {
                let status_str = match status {
                    HealthStatus::Unknown => "unknown",
                    HealthStatus::Healthy => "healthy",
                    HealthStatus::Unhealthy => "unhealthy",
                };
                raise(&mut working, &mut events, ev::STEP_HEALTH_CHANGED, json!({"step_id": step_id.0, "status": status_str, "error": error}));
            }
        }
        EngineCommand::FlowActivated { flow_id, parent } => {
            if working.active.contains_key(&flow_id) {
                return Err(CommandError::FlowAlreadyActive(flow_id.0.clone()));
            }
            raise(&mut working, &mut events, ev::FLOW_ACTIVATED, json!({"flow_id": flow_id.0, "parent": parent.map(|p| p.0), "at": now_ms}));
        }
        EngineCommand::FlowDeactivated { flow_id } => {
            if !working.active.contains_key(&flow_id) {
                return Err(CommandError::FlowNotActive(flow_id.0.clone()));
            }
            raise(&mut working, &mut events, ev::FLOW_DEACTIVATED, json!({"flow_id": flow_id.0, "at": now_ms}));
        }
        EngineCommand::FlowArchiving { flow_id } => {
            let already_deactivated = working.deactivated.iter().any(|e| e.flow_id == flow_id);
            if !already_deactivated && !working.archiving.contains_key(&flow_id) {
                return Err(CommandError::FlowNotDeactivated(flow_id.0.clone()));
            }
            raise(&mut working, &mut events, ev::FLOW_ARCHIVING, json!({"flow_id": flow_id.0, "lease_start": now_ms}));
        }
        EngineCommand::FlowArchived { flow_id } => {
            if !working.archiving.contains_key(&flow_id) {
                return Err(CommandError::NoArchivingLease(flow_id.0.clone()));
            }
            raise(&mut working, &mut events, ev::FLOW_ARCHIVED, json!({"flow_id": flow_id.0, "at": now_ms}));
        }
    }

    Ok(events)
}

fn raise(working: &mut EngineState, events: &mut Vec<NewEvent>, event_type: &str, data: Value) {
    apply_engine_event(working, event_type, &data);
    events.push(NewEvent { event_type: event_type.to_string(), data });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeDecl, AttributeRole, AttributeType, HttpSpec, StepKind};
    use indexmap::IndexMap;

    fn step(id: &str) -> Step {
        Step {
            id: id.into(),
            name: id.into(),
            version: 1,
            kind: StepKind::Sync,
            attributes: IndexMap::from([(
                "out".to_string(),
                AttributeDecl { role: AttributeRole::Output, ty: AttributeType::String, default: None, for_each: false },
            )]),
            predicate: None,
            http: Some(HttpSpec { endpoint: "http://x".into(), timeout_ms: 1000, health_check: None }),
            script: None,
            flow: None,
            work_config: None,
            memoizable: false,
            labels: IndexMap::new(),
        }
    }

    #[test]
    fn register_then_duplicate_register_rejected() {
        let state = EngineState::default();
        let events = handle_engine_command(&state, EngineCommand::RegisterStep(step("s1")), 0).unwrap();
        assert_eq!(events.len(), 1);

        let mut next = state.clone();
        apply_engine_event(&mut next, &events[0].event_type, &events[0].data);
        let err = handle_engine_command(&next, EngineCommand::RegisterStep(step("s1")), 0).unwrap_err();
        assert!(matches!(err, CommandError::StepAlreadyRegistered(_)));
    }

    #[test]
    fn health_changed_is_a_no_op_without_a_transition() {
        let mut state = EngineState::default();
        let events = handle_engine_command(&state, EngineCommand::RegisterStep(step("s1")), 0).unwrap();
        apply_engine_event(&mut state, &events[0].event_type, &events[0].data);

        let first = handle_engine_command(
            &state,
            EngineCommand::HealthChanged { step_id: "s1".into(), status: HealthStatus::Healthy, error: None },
            0,
        )
        .unwrap();
        assert_eq!(first.len(), 1);
        apply_engine_event(&mut state, &first[0].event_type, &first[0].data);

        let second = handle_engine_command(
            &state,
            EngineCommand::HealthChanged { step_id: "s1".into(), status: HealthStatus::Healthy, error: None },
            0,
        )
        .unwrap();
        assert!(second.is_empty());
    }
}
