//! flow-script: the three script engines a step's `predicate` or `script`
//! block can select between (§4.6) — a pure Lisp-family expression language,
//! a sandboxed imperative language, and a JSON-path matcher — plus the
//! compiled-artifact cache shared by all three and a bridge into
//! `flow_core::runtime::PredicateEvaluator`.

pub mod cache;
pub mod engine;
pub mod expression;
pub mod imperative;
pub mod jsonpath;

use flow_core::model::{PredicateSpec, ScriptLanguage};
use flow_core::runtime::PredicateEvaluator;
use serde_json::Value;

pub use cache::CompileCache;
pub use engine::{CompiledScript, ScriptDiagnostics, ScriptEngine, ScriptError};
pub use expression::ExpressionEngine;
pub use imperative::ImperativeEngine;
pub use jsonpath::JsonPathEngine;

/// Selects among the three engines by `ScriptLanguage`, each with its own
/// compiled-artifact cache, and executes/validates scripts routed to it.
pub struct ScriptRuntime {
    expression: ExpressionEngine,
    imperative: ImperativeEngine,
    jsonpath: JsonPathEngine,
}

impl ScriptRuntime {
    pub fn new() -> Self {
        Self { expression: ExpressionEngine::new(), imperative: ImperativeEngine::new(), jsonpath: JsonPathEngine::new() }
    }

    fn engine_for(&self, language: ScriptLanguage) -> &dyn ScriptEngine {
        match language {
            ScriptLanguage::Expression => &self.expression,
            ScriptLanguage::Imperative => &self.imperative,
            ScriptLanguage::JsonPath => &self.jsonpath,
        }
    }

    pub fn validate(&self, language: ScriptLanguage, source: &str) -> Result<ScriptDiagnostics, ScriptError> {
        self.engine_for(language).validate(source)
    }

    pub fn compile(
        &self,
        language: ScriptLanguage,
        source: &str,
        arg_names: &[String],
    ) -> Result<std::sync::Arc<dyn CompiledScript>, ScriptError> {
        self.engine_for(language).compile(source, arg_names)
    }

    pub fn execute(&self, language: ScriptLanguage, source: &str, arg_names: &[String], inputs: &Value) -> Result<Value, ScriptError> {
        self.compile(language, source, arg_names)?.execute(inputs)
    }

    pub fn evaluate_predicate(&self, language: ScriptLanguage, source: &str, inputs: &Value) -> Result<bool, ScriptError> {
        self.compile(language, source, &[])?.evaluate_predicate(inputs)
    }
}

impl Default for ScriptRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl PredicateEvaluator for ScriptRuntime {
    fn evaluate(&self, predicate: &PredicateSpec, inputs: &Value) -> Result<bool, String> {
        self.evaluate_predicate(predicate.language, &predicate.source, inputs).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn routes_to_the_engine_named_by_the_predicate_language() {
        let runtime = ScriptRuntime::new();
        let predicate = PredicateSpec { language: ScriptLanguage::Expression, source: "(> x 3)".into() };
        assert!(runtime.evaluate(&predicate, &json!({"x": 10})).unwrap());

        let predicate = PredicateSpec { language: ScriptLanguage::JsonPath, source: "$.attributes.score".into() };
        assert!(runtime.evaluate(&predicate, &json!({"attributes": {"score": 1}})).unwrap());

        let predicate = PredicateSpec { language: ScriptLanguage::Imperative, source: "x > 3".into() };
        assert!(runtime.evaluate(&predicate, &json!({"x": 10})).unwrap());
    }

    #[test]
    fn execute_dispatches_to_the_expression_engine_and_returns_an_object() {
        let runtime = ScriptRuntime::new();
        let out = runtime
            .execute(ScriptLanguage::Expression, "(object \"sum\" (+ a b))", &["a".into(), "b".into()], &json!({"a": 1, "b": 2}))
            .unwrap();
        assert_eq!(out, json!({"sum": 3.0}));
    }
}
