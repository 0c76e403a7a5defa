//! The JSON-path matcher (§4.6): no computation, just path selection against
//! resolved inputs. A predicate is true when the path selects at least one
//! node; extraction wraps the match (or matches) in a single `value` output
//! attribute.

use serde_json::Value;

use crate::cache::CompileCache;
use crate::engine::{CompiledScript, ScriptDiagnostics, ScriptEngine, ScriptError};

pub struct JsonPathEngine {
    cache: CompileCache,
}

impl JsonPathEngine {
    pub fn new() -> Self {
        Self { cache: CompileCache::new() }
    }
}

impl Default for JsonPathEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for JsonPathEngine {
    fn validate(&self, source: &str) -> Result<ScriptDiagnostics, ScriptError> {
        jsonpath_lib::select(&Value::Null, source).map_err(|e| ScriptError::Parse(e.to_string()))?;
        Ok(ScriptDiagnostics::default())
    }

    fn compile(&self, source: &str, arg_names: &[String]) -> Result<std::sync::Arc<dyn CompiledScript>, ScriptError> {
        let source = source.to_string();
        self.cache.get_or_compile(&source, arg_names, || {
            jsonpath_lib::select(&Value::Null, &source).map_err(|e| ScriptError::Compile(e.to_string()))?;
            Ok(std::sync::Arc::new(CompiledJsonPath { path: source }) as std::sync::Arc<dyn CompiledScript>)
        })
    }
}

struct CompiledJsonPath {
    path: String,
}

impl CompiledJsonPath {
    fn select<'a>(&self, inputs: &'a Value) -> Result<Vec<&'a Value>, ScriptError> {
        jsonpath_lib::select(inputs, &self.path).map_err(|e| ScriptError::Eval(format!("path '{}' failed: {e}", self.path)))
    }
}

impl CompiledScript for CompiledJsonPath {
    fn execute(&self, inputs: &Value) -> Result<Value, ScriptError> {
        let matches = self.select(inputs)?;
        let value = match matches.len() {
            0 => Value::Null,
            1 => matches[0].clone(),
            _ => Value::Array(matches.into_iter().cloned().collect()),
        };
        Ok(serde_json::json!({ "value": value }))
    }

    fn evaluate_predicate(&self, inputs: &Value) -> Result<bool, ScriptError> {
        Ok(!self.select(inputs)?.is_empty())
    }
}
