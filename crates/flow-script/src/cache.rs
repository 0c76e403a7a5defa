//! Content-addressed compiled-artifact LRU, shared across flows within one
//! evaluator instance (§4.6). Keyed by `sha256(source || sorted arg names)`
//! via `flow_core::hashing::script_cache_key`.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;

use lru::LruCache;

use flow_core::hashing::script_cache_key;

use crate::engine::CompiledScript;

const DEFAULT_CAPACITY: usize = 256;

pub struct CompileCache {
    inner: Mutex<LruCache<String, Arc<dyn CompiledScript>>>,
}

impl CompileCache {
    pub fn new() -> Self {
        Self { inner: Mutex::new(LruCache::new(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap())) }
    }

    pub fn get_or_compile<F>(&self, source: &str, arg_names: &[String], compile: F) -> Result<Arc<dyn CompiledScript>, crate::engine::ScriptError>
    where
        F: FnOnce() -> Result<Arc<dyn CompiledScript>, crate::engine::ScriptError>,
    {
        let key = script_cache_key(source, arg_names);
        if let Some(hit) = self.inner.lock().expect("compile cache mutex poisoned").get(&key) {
            return Ok(hit.clone());
        }
        let compiled = compile()?;
        self.inner.lock().expect("compile cache mutex poisoned").put(key, compiled.clone());
        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("compile cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CompileCache {
    fn default() -> Self {
        Self::new()
    }
}
