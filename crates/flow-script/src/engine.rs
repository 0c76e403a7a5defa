//! The shared contract all three evaluators implement (§4.6): `validate`,
//! `compile`, and execution against a step's resolved inputs, either as a
//! full output mapping or as a predicate's boolean result.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("compile error: {0}")]
    Compile(String),
    #[error("evaluation error: {0}")]
    Eval(String),
    #[error("script did not produce an object of outputs")]
    NotAnOutputObject,
    #[error("script did not produce a boolean predicate result")]
    NotABoolean,
}

/// Non-fatal information surfaced alongside a successful `validate` — a
/// result type that carries auxiliary signals rather than discarding them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptDiagnostics {
    pub warnings: Vec<String>,
}

/// A compiled, cacheable artifact. Evaluators never abort the flow runtime
/// (§4.6) — every failure mode is a typed `ScriptError`, not a panic.
pub trait CompiledScript: Send + Sync {
    /// Evaluates the script against resolved `inputs`, returning the output
    /// attribute mapping (must be a JSON object).
    fn execute(&self, inputs: &Value) -> Result<Value, ScriptError>;

    /// Evaluates the script as a step predicate.
    fn evaluate_predicate(&self, inputs: &Value) -> Result<bool, ScriptError>;
}

pub trait ScriptEngine: Send + Sync {
    fn validate(&self, source: &str) -> Result<ScriptDiagnostics, ScriptError>;

    /// Compiles `source`, consulting/populating this engine's LRU keyed by
    /// `sha256(source || sorted arg_names)` (§4.6).
    fn compile(&self, source: &str, arg_names: &[String]) -> Result<std::sync::Arc<dyn CompiledScript>, ScriptError>;
}
