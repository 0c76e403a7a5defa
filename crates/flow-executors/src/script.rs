//! Embedded script dispatch (§6.1, §4.6): resolves synchronously against the
//! shared compiled-artifact cache, so unlike HTTP dispatch there is no
//! transient outcome — a script either produces outputs or fails.

use std::sync::Arc;

use async_trait::async_trait;
use flow_core::model::Step;
use flow_script::ScriptRuntime;
use serde_json::Value;

use crate::{DispatchOutcome, StepExecutor, WorkOutcome};

/// Takes the runtime behind an `Arc` rather than owning it so a host can
/// share one compiled-artifact cache across every flow's executor instead of
/// recompiling the same script per flow.
pub struct ScriptExecutor {
    runtime: Arc<ScriptRuntime>,
}

impl ScriptExecutor {
    pub fn new(runtime: Arc<ScriptRuntime>) -> Self {
        Self { runtime }
    }
}

impl Default for ScriptExecutor {
    fn default() -> Self {
        Self::new(Arc::new(ScriptRuntime::new()))
    }
}

#[async_trait]
impl StepExecutor for ScriptExecutor {
    async fn dispatch(&self, step: &Step, _token: &str, inputs: &Value, _webhook_url: Option<&str>) -> DispatchOutcome {
        let Some(spec) = &step.script else {
            return DispatchOutcome::Resolved(WorkOutcome::Failed {
                error: format!("step '{}' has no script spec but was routed to the script executor", step.id),
            });
        };

        let arg_names: Vec<String> = step.inputs().map(|(name, _)| name.clone()).collect();
        let outcome = match self.runtime.execute(spec.language, &spec.source, &arg_names, inputs) {
            Ok(outputs) => WorkOutcome::Succeeded { outputs },
            Err(e) => WorkOutcome::Failed { error: e.to_string() },
        };
        DispatchOutcome::Resolved(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::model::{AttributeDecl, AttributeRole, AttributeType, ScriptLanguage, ScriptSpec, StepKind};
    use indexmap::IndexMap;
    use serde_json::json;

    fn script_step(source: &str) -> Step {
        let mut attributes = IndexMap::new();
        attributes.insert(
            "a".to_string(),
            AttributeDecl { ty: AttributeType::Number, role: AttributeRole::Required, default: None, for_each: false },
        );
        attributes.insert(
            "sum".to_string(),
            AttributeDecl { ty: AttributeType::Number, role: AttributeRole::Output, default: None, for_each: false },
        );
        Step {
            id: "double".into(),
            name: "double".into(),
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

    #[tokio::test]
    async fn script_dispatch_resolves_immediately() {
        let executor = ScriptExecutor::default();
        let step = script_step("(object \"sum\" (* a 2))");
        let outcome = executor.dispatch(&step, "tok-1", &json!({"a": 4}), None).await;
        assert_eq!(outcome, DispatchOutcome::Resolved(WorkOutcome::Succeeded { outputs: json!({"sum": 8.0}) }));
    }
}
