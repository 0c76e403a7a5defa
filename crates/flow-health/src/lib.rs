//! flow-health: the background poller that probes HTTP step endpoints and
//! emits `step_health_changed` only on a status transition (§4.7, §6). The
//! transient-vs-permanent judgment applied to a probe failure mirrors
//! `flow-persistence::pg::with_retry`'s classification of a connection
//! error as worth retrying rather than fatal — a single failed probe just
//! marks the step unhealthy; it never tears anything down.

use std::sync::Arc;
use std::time::Duration;

use flow_core::event::{AggregateRef, EventStore};
use flow_core::model::{HealthStatus, Step};
use flow_core::runtime::EngineCommand;
use flow_core::Aggregator;

/// Per-step polling configuration; the engine default can be overridden by a
/// step's own `http.health_check` interval/timeout if one is ever needed,
/// but today both are process-wide (§6.5 `STEP_TIMEOUT` drives `timeout`).
#[derive(Debug, Clone, Copy)]
pub struct HealthCheckConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(30), timeout: Duration::from_secs(5) }
    }
}

pub struct HealthChecker<S: EventStore> {
    aggregator: Arc<Aggregator<S>>,
    client: reqwest::Client,
    config: HealthCheckConfig,
}

impl<S: EventStore + 'static> HealthChecker<S> {
    pub fn new(aggregator: Arc<Aggregator<S>>, config: HealthCheckConfig) -> Self {
        Self { aggregator, client: reqwest::Client::new(), config }
    }

    /// Probes every catalog step with an HTTP `health_check` endpoint once,
    /// emitting `HealthChanged` commands only for steps whose observed
    /// status differs from what the engine projection currently records.
    pub async fn poll_once(&self) -> Result<(), flow_core::errors::AggregateError> {
        let snapshot = self.aggregator.read_engine(&AggregateRef::engine())?;

        for step in snapshot.steps.values() {
            let Some(health_check) = step.http.as_ref().and_then(|h| h.health_check.as_ref()) else {
                continue;
            };
            let observed = self.probe(health_check).await;
            let current = snapshot.health.get(&step.id).map(|e| e.status).unwrap_or(HealthStatus::Unknown);
            if observed.0 == current {
                continue;
            }
            self.report_transition(step, observed).await?;
        }
        Ok(())
    }

    async fn probe(&self, url: &str) -> (HealthStatus, Option<String>) {
        match self.client.get(url).timeout(self.config.timeout).send().await {
            Ok(resp) if resp.status().is_success() => (HealthStatus::Healthy, None),
            Ok(resp) => (HealthStatus::Unhealthy, Some(format!("health check returned {}", resp.status()))),
            Err(e) => (HealthStatus::Unhealthy, Some(e.to_string())),
        }
    }

    async fn report_transition(&self, step: &Step, (status, error): (HealthStatus, Option<String>)) -> Result<(), flow_core::errors::AggregateError> {
        let step_id = step.id.clone();
        tracing::info!(step = %step_id, ?status, "step health transition");
        self.aggregator.execute_engine(&AggregateRef::engine(), |state| {
            flow_core::runtime::handle_engine_command(
                state,
                EngineCommand::HealthChanged { step_id: step_id.clone(), status, error: error.clone() },
                now_ms(),
            )
        })?;
        Ok(())
    }

    /// Runs `poll_once` on `config.interval` until the process is torn down.
    /// Intended to be spawned as its own tokio task by the binary that owns
    /// the engine lifecycle.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                tracing::warn!(error = ?e, "health poll cycle failed");
            }
        }
    }
}

fn now_ms() -> i64 {
    chrono_now_ms()
}

// Isolated behind a function so a future swap to an injected clock (for
// deterministic tests) only touches this one line.
fn chrono_now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::event::InMemoryEventStore;
    use flow_core::model::{AttributeDecl, AttributeRole, AttributeType, HttpSpec, StepKind};
    use indexmap::IndexMap;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn step_with_health_check(id: &str, endpoint: &str) -> Step {
        Step {
            id: id.into(),
            name: id.into(),
            version: 1,
            kind: StepKind::Sync,
            attributes: IndexMap::from([(
                "out".to_string(),
                AttributeDecl { role: AttributeRole::Output, ty: AttributeType::String, default: None, for_each: false },
            )]),
            predicate: None,
            http: Some(HttpSpec { endpoint: endpoint.into(), timeout_ms: 1000, health_check: Some(endpoint.into()) }),
            script: None,
            flow: None,
            work_config: None,
            memoizable: false,
            labels: IndexMap::new(),
        }
    }

    async fn registered_checker(endpoint: &str) -> (Arc<Aggregator<InMemoryEventStore>>, AggregateRef) {
        let store = Arc::new(InMemoryEventStore::new());
        let aggregator = Arc::new(Aggregator::new(store));
        let agg = AggregateRef::engine();
        aggregator
            .execute_engine(&agg, |s| flow_core::runtime::handle_engine_command(s, EngineCommand::RegisterStep(step_with_health_check("s1", endpoint)), 0))
            .unwrap();
        (aggregator, agg)
    }

    #[tokio::test]
    async fn healthy_response_transitions_unknown_to_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let (aggregator, agg) = registered_checker(&server.uri()).await;
        let checker = HealthChecker::new(aggregator.clone(), HealthCheckConfig::default());
        checker.poll_once().await.unwrap();

        let state = aggregator.read_engine(&agg).unwrap();
        let entry = state.health.get(&"s1".into()).unwrap();
        assert_eq!(entry.status, HealthStatus::Healthy);
        assert!(entry.error.is_none());
    }

    #[tokio::test]
    async fn server_error_response_transitions_to_unhealthy_with_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

        let (aggregator, agg) = registered_checker(&server.uri()).await;
        let checker = HealthChecker::new(aggregator.clone(), HealthCheckConfig::default());
        checker.poll_once().await.unwrap();

        let state = aggregator.read_engine(&agg).unwrap();
        let entry = state.health.get(&"s1".into()).unwrap();
        assert_eq!(entry.status, HealthStatus::Unhealthy);
        assert!(entry.error.is_some());
    }

    #[tokio::test]
    async fn repeated_poll_with_unchanged_status_emits_no_new_event() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let (aggregator, agg) = registered_checker(&server.uri()).await;
        let checker = HealthChecker::new(aggregator.clone(), HealthCheckConfig::default());
        checker.poll_once().await.unwrap();
        let seq_after_first = aggregator.store().last_sequence(&agg).unwrap();

        checker.poll_once().await.unwrap();
        let seq_after_second = aggregator.store().last_sequence(&agg).unwrap();

        assert_eq!(seq_after_first, seq_after_second, "no transition means no new health_changed event");
    }

    #[tokio::test]
    async fn transport_failure_is_treated_as_unhealthy_not_fatal() {
        let (aggregator, agg) = registered_checker("http://127.0.0.1:1").await;
        let checker = HealthChecker::new(aggregator.clone(), HealthCheckConfig::default());
        checker.poll_once().await.unwrap();

        let state = aggregator.read_engine(&agg).unwrap();
        let entry = state.health.get(&"s1".into()).unwrap();
        assert_eq!(entry.status, HealthStatus::Unhealthy);
    }
}
