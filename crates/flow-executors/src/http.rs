//! HTTP synchronous and asynchronous dispatch (§6.1): a step invocation is a
//! POST of `{ arguments, metadata }`; the status-code-to-outcome mapping is
//! fixed and does not depend on the response body beyond the `success` flag.

use std::time::Duration;

use async_trait::async_trait;
use flow_core::model::{Step, StepKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{DispatchOutcome, StepExecutor, WorkOutcome};

#[derive(Serialize)]
struct InvocationRequest<'a> {
    arguments: &'a Value,
    metadata: InvocationMetadata<'a>,
}

#[derive(Serialize)]
struct InvocationMetadata<'a> {
    flow_id: &'a str,
    step_id: &'a str,
    token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_url: Option<&'a str>,
}

#[derive(Deserialize)]
struct InvocationResponse {
    success: bool,
    #[serde(default)]
    outputs: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpExecutor {
    client: reqwest::Client,
    flow_id: String,
}

impl HttpExecutor {
    pub fn new(flow_id: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), flow_id: flow_id.into() }
    }

    fn classify(status: reqwest::StatusCode, body: Option<InvocationResponse>) -> WorkOutcome {
        if status.is_server_error() {
            return WorkOutcome::NotCompleted { error: format!("step service returned {status}") };
        }
        if status.is_client_error() {
            let error = body.and_then(|b| b.error).unwrap_or_else(|| format!("step service returned {status}"));
            return WorkOutcome::Failed { error };
        }
        match body {
            Some(InvocationResponse { success: true, outputs: Some(outputs), .. }) => WorkOutcome::Succeeded { outputs },
            Some(InvocationResponse { success: true, outputs: None, .. }) => {
                WorkOutcome::Succeeded { outputs: Value::Object(Default::default()) }
            }
            Some(InvocationResponse { success: false, error, .. }) => {
                WorkOutcome::Failed { error: error.unwrap_or_else(|| "step reported failure".to_string()) }
            }
            None => WorkOutcome::NotCompleted { error: "step response body was not valid JSON".to_string() },
        }
    }
}

#[async_trait]
impl StepExecutor for HttpExecutor {
    async fn dispatch(&self, step: &Step, token: &str, inputs: &Value, webhook_url: Option<&str>) -> DispatchOutcome {
        let Some(http) = &step.http else {
            return DispatchOutcome::Resolved(WorkOutcome::Failed {
                error: format!("step '{}' has no http spec but was routed to the http executor", step.id),
            });
        };

        let request = InvocationRequest {
            arguments: inputs,
            metadata: InvocationMetadata { flow_id: &self.flow_id, step_id: step.id.as_str(), token, webhook_url },
        };

        let response = self
            .client
            .post(&http.endpoint)
            .timeout(Duration::from_millis(http.timeout_ms))
            .json(&request)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(step = %step.id, error = %e, "step invocation transport error");
                return DispatchOutcome::Resolved(WorkOutcome::NotCompleted { error: e.to_string() });
            }
        };

        let status = response.status();
        let body = response.json::<InvocationResponse>().await.ok();
        let outcome = Self::classify(status, body);

        if step.kind == StepKind::Async && webhook_url.is_some() && status.is_success() {
            DispatchOutcome::AwaitingWebhook
        } else {
            DispatchOutcome::Resolved(outcome)
        }
    }
}
