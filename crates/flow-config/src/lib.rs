//! flow-config: the env-var configuration loader (§6.5). Numerics fall back
//! silently to documented defaults on a bad value; enum/boolean-style
//! options fail fast at startup instead, the same split the rest of the
//! workspace's `.env`-plus-`once_cell::Lazy` loader follows for database
//! configuration — just generalized to every option this engine runtime
//! reads, with everything outside its direct scope kept as a raw pass-
//! through bag rather than silently dropped.

use std::collections::HashMap;
use std::env;

use dotenvy::dotenv;
use once_cell::sync::Lazy;
use thiserror::Error;

use flow_core::model::BackoffType;

static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv();
});

pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be one of {allowed:?}, got '{value}'")]
    InvalidEnum { var: &'static str, value: String, allowed: &'static [&'static str] },
    #[error("{var} must be a boolean ('true'/'false'), got '{value}'")]
    InvalidBool { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct RetryDefaults {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_type: BackoffType,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub webhook_base_url: Option<String>,
    pub step_timeout_ms: u64,
    pub flow_cache_size: usize,
    pub retry: RetryDefaults,
    pub log_level: String,
    pub shutdown_timeout_ms: u64,
    /// Every recognized-by-name-only variable this crate does not itself
    /// interpret (`ENGINE_REDIS_*`, `FLOW_REDIS_*`, and anything else a
    /// future collaborator needs) — passed through verbatim rather than
    /// silently dropped.
    pub raw: RawSettings,
}

#[derive(Debug, Clone, Default)]
pub struct RawSettings(HashMap<String, String>);

impl RawSettings {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

const PASSTHROUGH_PREFIXES: &[&str] = &["ENGINE_REDIS_", "FLOW_REDIS_"];

const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_FLOW_CACHE_SIZE: usize = 256;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const VALID_BACKOFF_TYPES: &[&str] = &["fixed", "linear", "exponential"];

fn numeric_with_fallback<T: std::str::FromStr>(var: &str, default: T) -> T {
    match env::var(var) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(var, raw, "invalid numeric config value, falling back to default");
            default
        }),
        Err(_) => default,
    }
}

fn backoff_type_from_env(var: &str, default: BackoffType) -> Result<BackoffType, ConfigError> {
    match env::var(var) {
        Ok(raw) => match raw.as_str() {
            "fixed" => Ok(BackoffType::Fixed),
            "linear" => Ok(BackoffType::Linear),
            "exponential" => Ok(BackoffType::Exponential),
            other => Err(ConfigError::InvalidEnum { var: "RETRY_BACKOFF_TYPE", value: other.to_string(), allowed: VALID_BACKOFF_TYPES }),
        },
        Err(_) => Ok(default),
    }
}

fn log_level_from_env() -> Result<String, ConfigError> {
    match env::var("LOG_LEVEL") {
        Ok(raw) => {
            if VALID_LOG_LEVELS.contains(&raw.as_str()) {
                Ok(raw)
            } else {
                Err(ConfigError::InvalidEnum { var: "LOG_LEVEL", value: raw, allowed: VALID_LOG_LEVELS })
            }
        }
        Err(_) => Ok("info".to_string()),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Lazy::force(&DOTENV_LOADED);

        let api = ApiConfig {
            host: env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: numeric_with_fallback("API_PORT", 8080u16),
        };

        let retry = RetryDefaults {
            max_retries: numeric_with_fallback("RETRY_MAX_RETRIES", 3u32),
            initial_backoff_ms: numeric_with_fallback("RETRY_INITIAL_BACKOFF", 100u64),
            max_backoff_ms: numeric_with_fallback("RETRY_MAX_BACKOFF", 30_000u64),
            backoff_type: backoff_type_from_env("RETRY_BACKOFF_TYPE", BackoffType::Exponential)?,
        };

        let raw = RawSettings(
            env::vars().filter(|(k, _)| PASSTHROUGH_PREFIXES.iter().any(|prefix| k.starts_with(prefix))).collect(),
        );

        Ok(Self {
            api,
            webhook_base_url: env::var("WEBHOOK_BASE_URL").ok(),
            step_timeout_ms: numeric_with_fallback("STEP_TIMEOUT", DEFAULT_STEP_TIMEOUT_MS),
            flow_cache_size: numeric_with_fallback("FLOW_CACHE_SIZE", DEFAULT_FLOW_CACHE_SIZE),
            retry,
            log_level: log_level_from_env()?,
            shutdown_timeout_ms: numeric_with_fallback("SHUTDOWN_TIMEOUT", DEFAULT_SHUTDOWN_TIMEOUT_MS),
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_known_vars() {
        for var in [
            "API_HOST",
            "API_PORT",
            "RETRY_MAX_RETRIES",
            "RETRY_INITIAL_BACKOFF",
            "RETRY_MAX_BACKOFF",
            "RETRY_BACKOFF_TYPE",
            "WEBHOOK_BASE_URL",
            "STEP_TIMEOUT",
            "FLOW_CACHE_SIZE",
            "LOG_LEVEL",
            "SHUTDOWN_TIMEOUT",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_known_vars();
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.api.port, 8080);
        assert_eq!(cfg.step_timeout_ms, DEFAULT_STEP_TIMEOUT_MS);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn bad_numeric_falls_back_silently() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_known_vars();
        env::set_var("STEP_TIMEOUT", "not-a-number");
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.step_timeout_ms, DEFAULT_STEP_TIMEOUT_MS);
        env::remove_var("STEP_TIMEOUT");
    }

    #[test]
    fn bad_backoff_type_fails_fast() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_known_vars();
        env::set_var("RETRY_BACKOFF_TYPE", "quadratic");
        let err = AppConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnum { var: "RETRY_BACKOFF_TYPE", .. }));
        env::remove_var("RETRY_BACKOFF_TYPE");
    }

    #[test]
    fn bad_log_level_fails_fast() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_known_vars();
        env::set_var("LOG_LEVEL", "verbose");
        let err = AppConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnum { var: "LOG_LEVEL", .. }));
        env::remove_var("LOG_LEVEL");
    }
}
