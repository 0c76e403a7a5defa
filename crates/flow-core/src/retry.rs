//! Retry delay computation (§4.4). Defined here as a pluggable trait rather
//! than a concrete dependency on `flow-policies` so the flow dispatch loop
//! stays free of a reverse dependency on the crate that audits/wraps it —
//! the same layering used for [`crate::runtime::PredicateEvaluator`].
//! `flow-policies::DefaultRetryPolicy` wraps [`compute_backoff`] with a
//! `params_hash`-style audit trail; this module owns the actual arithmetic
//! so both crates agree on it and so the backoff formula itself can be
//! unit-tested here directly, independent of the audit wrapper.

use crate::model::{BackoffType, WorkConfig};

pub trait RetryPolicy: Send + Sync {
    /// Whether a work item currently at `retry_count` (0-based, the number
    /// of retries already scheduled) is eligible for one more retry.
    fn should_retry(&self, cfg: &WorkConfig, retry_count: u32) -> bool {
        cfg.max_retries < 0 || (retry_count as i64) < cfg.max_retries
    }

    /// The delay before the next retry, given the retry count *before*
    /// incrementing.
    fn next_delay_ms(&self, cfg: &WorkConfig, retry_count: u32) -> u64;
}

/// The formula of §4.4, with no additional bookkeeping.
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {
    fn next_delay_ms(&self, cfg: &WorkConfig, retry_count: u32) -> u64 {
        compute_backoff(cfg, retry_count)
    }
}

/// `delay == min(backoff(initial, retry_count, type), max)`, exactly per
/// §4.4: the raw per-type formula, capped at `max_backoff_ms`.
pub fn compute_backoff(cfg: &WorkConfig, retry_count: u32) -> u64 {
    let raw = match cfg.backoff_type {
        BackoffType::Fixed => cfg.initial_backoff_ms,
        BackoffType::Linear => cfg.initial_backoff_ms.saturating_mul(retry_count as u64 + 1),
        BackoffType::Exponential => {
            let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
            cfg.initial_backoff_ms.saturating_mul(factor)
        }
    };
    raw.min(cfg.max_backoff_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(backoff_type: BackoffType) -> WorkConfig {
        WorkConfig { max_retries: 3, initial_backoff_ms: 100, max_backoff_ms: 1000, backoff_type }
    }

    #[test]
    fn exponential_matches_scenario_s3() {
        let c = cfg(BackoffType::Exponential);
        assert_eq!(compute_backoff(&c, 0), 100);
        assert_eq!(compute_backoff(&c, 1), 200);
        assert_eq!(compute_backoff(&c, 2), 400);
    }

    #[test]
    fn fixed_is_constant() {
        let c = cfg(BackoffType::Fixed);
        assert_eq!(compute_backoff(&c, 0), 100);
        assert_eq!(compute_backoff(&c, 5), 100);
    }

    #[test]
    fn linear_scales_by_retry_count_plus_one() {
        let c = cfg(BackoffType::Linear);
        assert_eq!(compute_backoff(&c, 0), 100);
        assert_eq!(compute_backoff(&c, 1), 200);
        assert_eq!(compute_backoff(&c, 2), 300);
    }

    #[test]
    fn capped_at_max_backoff() {
        let c = cfg(BackoffType::Exponential);
        assert_eq!(compute_backoff(&c, 10), 1000);
    }

    #[test]
    fn unbounded_retries_when_max_retries_negative() {
        let mut c = cfg(BackoffType::Fixed);
        c.max_retries = -1;
        let policy = DefaultRetryPolicy;
        assert!(policy.should_retry(&c, 1_000_000));
    }

    #[test]
    fn should_retry_respects_budget() {
        let c = cfg(BackoffType::Fixed);
        let policy = DefaultRetryPolicy;
        assert!(policy.should_retry(&c, 2));
        assert!(!policy.should_retry(&c, 3));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn backoff_type() -> impl Strategy<Value = BackoffType> {
        prop_oneof![Just(BackoffType::Fixed), Just(BackoffType::Linear), Just(BackoffType::Exponential)]
    }

    proptest! {
        /// The result is always the raw formula capped at `max_backoff_ms`,
        /// for any config and any retry count.
        #[test]
        fn never_exceeds_max_backoff(
            backoff_type in backoff_type(),
            initial_backoff_ms in 0u64..100_000,
            max_backoff_ms in 0u64..100_000,
            retry_count in 0u32..64,
        ) {
            let cfg = WorkConfig { max_retries: 3, initial_backoff_ms, max_backoff_ms, backoff_type };
            let delay = compute_backoff(&cfg, retry_count);
            prop_assert!(delay <= max_backoff_ms);
        }

        /// Fixed backoff never depends on the retry count.
        #[test]
        fn fixed_backoff_is_retry_count_invariant(
            initial_backoff_ms in 0u64..100_000,
            max_backoff_ms in 0u64..100_000,
            retry_count in 0u32..64,
        ) {
            let cfg = WorkConfig { max_retries: 3, initial_backoff_ms, max_backoff_ms, backoff_type: BackoffType::Fixed };
            let delay = compute_backoff(&cfg, retry_count);
            prop_assert_eq!(delay, initial_backoff_ms.min(max_backoff_ms));
        }

        /// Linear and exponential backoff are both non-decreasing in the
        /// retry count, before the cap is applied.
        #[test]
        fn linear_and_exponential_are_monotonic(
            backoff_type in prop_oneof![Just(BackoffType::Linear), Just(BackoffType::Exponential)],
            initial_backoff_ms in 1u64..10_000,
            retry_count in 0u32..20,
        ) {
            let cfg = WorkConfig { max_retries: 3, initial_backoff_ms, max_backoff_ms: u64::MAX, backoff_type };
            let a = compute_backoff(&cfg, retry_count);
            let b = compute_backoff(&cfg, retry_count + 1);
            prop_assert!(b >= a);
        }

        /// A negative `max_retries` always permits another retry, for any
        /// retry count that actually fits in the budget type.
        #[test]
        fn unbounded_retries_always_allowed(retry_count in 0u32..u32::MAX) {
            let cfg = WorkConfig { max_retries: -1, initial_backoff_ms: 10, max_backoff_ms: 10, backoff_type: BackoffType::Fixed };
            prop_assert!(DefaultRetryPolicy.should_retry(&cfg, retry_count));
        }
    }
}
