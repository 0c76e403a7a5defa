use serde_json::Value;

use crate::model::PredicateSpec;

/// Evaluates a step's `predicate` against its resolved inputs. Implemented
/// by `flow-script`'s engines; kept as a trait here so the flow dispatch
/// loop has no dependency on the script evaluator crates (mirrors
/// [`crate::retry::RetryPolicy`]'s layering).
pub trait PredicateEvaluator: Send + Sync {
    fn evaluate(&self, predicate: &PredicateSpec, inputs: &Value) -> Result<bool, String>;
}

/// Evaluator that always returns `true`; used for steps with no predicate
/// and in tests that do not exercise script evaluation.
pub struct AlwaysTrue;

impl PredicateEvaluator for AlwaysTrue {
    fn evaluate(&self, _predicate: &PredicateSpec, _inputs: &Value) -> Result<bool, String> {
        Ok(true)
    }
}
