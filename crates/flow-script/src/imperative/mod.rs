//! The sandboxed imperative language (§4.6), backed by `rhai`. Scripts may
//! branch and loop but cannot touch the OS, the filesystem, or spawn
//! processes — none of those are exposed by `rhai`'s standard package, and
//! `eval`/module loading are disabled explicitly on top of that so a script
//! cannot bootstrap its way around the restriction.

use std::sync::{Arc, Mutex};

use rhai::{Dynamic, Engine, Scope, AST};
use serde_json::Value;

use crate::cache::CompileCache;
use crate::engine::{CompiledScript, ScriptDiagnostics, ScriptEngine, ScriptError};

const POOL_SIZE: usize = 4;

fn sandboxed_engine() -> Engine {
    let mut engine = Engine::new();
    engine.disable_symbol("eval");
    engine.disable_symbol("import");
    engine.set_max_operations(500_000);
    engine.set_max_expr_depths(64, 64);
    engine
}

/// A small fixed-size pool of pre-initialized interpreters, avoiding the cost
/// of rebuilding the standard package on every script execution.
struct EnginePool {
    engines: Mutex<Vec<Engine>>,
}

impl EnginePool {
    fn new() -> Self {
        let engines = (0..POOL_SIZE).map(|_| sandboxed_engine()).collect();
        Self { engines: Mutex::new(engines) }
    }

    fn with<R>(&self, f: impl FnOnce(&Engine) -> R) -> R {
        let engine = {
            let mut pool = self.engines.lock().expect("rhai engine pool mutex poisoned");
            pool.pop()
        };
        let engine = engine.unwrap_or_else(sandboxed_engine);
        let result = f(&engine);
        self.engines.lock().expect("rhai engine pool mutex poisoned").push(engine);
        result
    }
}

pub struct ImperativeEngine {
    pool: Arc<EnginePool>,
    cache: CompileCache,
}

impl ImperativeEngine {
    pub fn new() -> Self {
        Self { pool: Arc::new(EnginePool::new()), cache: CompileCache::new() }
    }
}

impl Default for ImperativeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for ImperativeEngine {
    fn validate(&self, source: &str) -> Result<ScriptDiagnostics, ScriptError> {
        self.pool.with(|engine| {
            engine.compile(source).map(|_| ScriptDiagnostics::default()).map_err(|e| ScriptError::Parse(e.to_string()))
        })
    }

    fn compile(&self, source: &str, arg_names: &[String]) -> Result<std::sync::Arc<dyn CompiledScript>, ScriptError> {
        let source = source.to_string();
        let pool = Arc::clone(&self.pool);
        self.cache.get_or_compile(&source, arg_names, || {
            let ast = pool.with(|engine| engine.compile(&source).map_err(|e| ScriptError::Compile(e.to_string())))?;
            Ok(std::sync::Arc::new(CompiledImperative { ast, pool: Arc::clone(&pool) }) as std::sync::Arc<dyn CompiledScript>)
        })
    }
}

struct CompiledImperative {
    ast: AST,
    pool: Arc<EnginePool>,
}

impl CompiledImperative {
    fn run(&self, inputs: &Value) -> Result<Dynamic, ScriptError> {
        self.pool.with(|engine| {
            let mut scope = Scope::new();
            if let Value::Object(map) = inputs {
                for (key, value) in map {
                    let dynamic = rhai::serde::to_dynamic(value.clone())
                        .map_err(|e| ScriptError::Eval(format!("failed to bind input '{key}': {e}")))?;
                    scope.push_dynamic(key.clone(), dynamic);
                }
            }
            engine.eval_ast_with_scope::<Dynamic>(&mut scope, &self.ast).map_err(|e| ScriptError::Eval(e.to_string()))
        })
    }
}

impl CompiledScript for CompiledImperative {
    fn execute(&self, inputs: &Value) -> Result<Value, ScriptError> {
        let result = self.run(inputs)?;
        let value: Value = rhai::serde::from_dynamic(&result).map_err(|e| ScriptError::Eval(e.to_string()))?;
        if value.is_object() {
            Ok(value)
        } else {
            Err(ScriptError::NotAnOutputObject)
        }
    }

    fn evaluate_predicate(&self, inputs: &Value) -> Result<bool, ScriptError> {
        let result = self.run(inputs)?;
        result.as_bool().map_err(|_| ScriptError::NotABoolean)
    }
}
