//! flow-policies: auditable retry policy decisions.
//!
//! `flow-core::retry` owns the backoff arithmetic (§4.4); this crate wraps it
//! with a deterministic, hashable record of *which* parameters produced a
//! given decision, so a step's effective retry behavior (engine defaults
//! merged with its own `work_config` override) can be audited after the fact
//! instead of re-derived by eye from two configs.

use flow_core::hashing::{hash_str, to_canonical_json};
use flow_core::model::WorkConfig;
use flow_core::retry::{compute_backoff, DefaultRetryPolicy, RetryPolicy};
use serde::{Deserialize, Serialize};

/// The `work_config` actually in force for one step: the step's own override
/// if it declared one, else the engine-wide default.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EffectiveWorkConfig {
    pub config: WorkConfig,
    pub source: ConfigSource,
    /// Stable hash of the canonical JSON of `config`, for comparing two
    /// effective configs without comparing every field by hand.
    pub params_hash: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    StepOverride,
    EngineDefault,
}

pub fn effective_work_config(step_override: Option<&WorkConfig>, engine_default: &WorkConfig) -> EffectiveWorkConfig {
    let (config, source) = match step_override {
        Some(c) => (c.clone(), ConfigSource::StepOverride),
        None => (engine_default.clone(), ConfigSource::EngineDefault),
    };
    let params_hash = params_hash(&config);
    EffectiveWorkConfig { config, source, params_hash }
}

pub fn params_hash(config: &WorkConfig) -> String {
    let v = serde_json::to_value(config).expect("WorkConfig always serializes");
    hash_str(&to_canonical_json(&v))
}

/// A single retry/no-retry decision, with the reasoning that produced it
/// attached.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay_ms: Option<u64>,
    pub retry_count_before: u32,
    pub params_hash: String,
}

/// Decides and records a retry decision for a work item currently at
/// `retry_count_before`, given the step's effective config.
pub fn decide_retry(effective: &EffectiveWorkConfig, retry_count_before: u32) -> RetryDecision {
    let policy = DefaultRetryPolicy;
    let should_retry = policy.should_retry(&effective.config, retry_count_before);
    let delay_ms = should_retry.then(|| compute_backoff(&effective.config, retry_count_before));
    RetryDecision { should_retry, delay_ms, retry_count_before, params_hash: effective.params_hash.clone() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::model::BackoffType;

    fn cfg(backoff_type: BackoffType) -> WorkConfig {
        WorkConfig { max_retries: 2, initial_backoff_ms: 50, max_backoff_ms: 500, backoff_type }
    }

    #[test]
    fn step_override_takes_precedence_over_engine_default() {
        let over = cfg(BackoffType::Fixed);
        let default = cfg(BackoffType::Exponential);
        let effective = effective_work_config(Some(&over), &default);
        assert_eq!(effective.source, ConfigSource::StepOverride);
        assert_eq!(effective.config.backoff_type, BackoffType::Fixed);
    }

    #[test]
    fn missing_override_falls_back_to_engine_default() {
        let default = cfg(BackoffType::Linear);
        let effective = effective_work_config(None, &default);
        assert_eq!(effective.source, ConfigSource::EngineDefault);
    }

    #[test]
    fn same_config_hashes_identically() {
        let a = effective_work_config(None, &cfg(BackoffType::Fixed));
        let b = effective_work_config(None, &cfg(BackoffType::Fixed));
        assert_eq!(a.params_hash, b.params_hash);
    }

    #[test]
    fn decision_matches_budget_and_formula() {
        let effective = effective_work_config(None, &cfg(BackoffType::Exponential));
        let d0 = decide_retry(&effective, 0);
        assert!(d0.should_retry);
        assert_eq!(d0.delay_ms, Some(50));

        let d_exhausted = decide_retry(&effective, 2);
        assert!(!d_exhausted.should_retry);
        assert_eq!(d_exhausted.delay_ms, None);
    }
}
