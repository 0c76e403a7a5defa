//! The pure Lisp-family expression language (§4.6): no variables beyond the
//! resolved step inputs, no loops, no side effects — every script is either
//! a boolean predicate or an `(object ...)` producing the step's outputs.

mod eval;
mod parser;

use serde_json::Value;

use crate::cache::CompileCache;
use crate::engine::{CompiledScript, ScriptDiagnostics, ScriptEngine, ScriptError};
use parser::Sexpr;

pub struct ExpressionEngine {
    cache: CompileCache,
}

impl ExpressionEngine {
    pub fn new() -> Self {
        Self { cache: CompileCache::new() }
    }
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for ExpressionEngine {
    fn validate(&self, source: &str) -> Result<ScriptDiagnostics, ScriptError> {
        parser::parse(source)?;
        Ok(ScriptDiagnostics::default())
    }

    fn compile(&self, source: &str, arg_names: &[String]) -> Result<std::sync::Arc<dyn CompiledScript>, ScriptError> {
        let source = source.to_string();
        self.cache.get_or_compile(&source, arg_names, || {
            let expr = parser::parse(&source)?;
            Ok(std::sync::Arc::new(CompiledExpression { expr }) as std::sync::Arc<dyn CompiledScript>)
        })
    }
}

struct CompiledExpression {
    expr: Sexpr,
}

impl CompiledScript for CompiledExpression {
    fn execute(&self, inputs: &Value) -> Result<Value, ScriptError> {
        let out = eval::eval(&self.expr, inputs)?;
        if out.is_object() {
            Ok(out)
        } else {
            Err(ScriptError::NotAnOutputObject)
        }
    }

    fn evaluate_predicate(&self, inputs: &Value) -> Result<bool, ScriptError> {
        let out = eval::eval(&self.expr, inputs)?;
        out.as_bool().ok_or(ScriptError::NotABoolean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compiles_once_and_reuses_the_cached_artifact() {
        let engine = ExpressionEngine::new();
        let args = vec!["x".to_string()];
        let a = engine.compile("(object \"doubled\" (* x 2))", &args).unwrap();
        let b = engine.compile("(object \"doubled\" (* x 2))", &args).unwrap();
        assert!(std::sync::Arc::ptr_eq(&a, &b));
        assert_eq!(a.execute(&json!({"x": 5})).unwrap(), json!({"doubled": 10.0}));
    }

    #[test]
    fn predicate_script_must_yield_a_boolean() {
        let engine = ExpressionEngine::new();
        let compiled = engine.compile("(> x 3)", &[]).unwrap();
        assert!(compiled.evaluate_predicate(&json!({"x": 4})).unwrap());
        assert!(!compiled.evaluate_predicate(&json!({"x": 1})).unwrap());
    }
}
