//! flow-executors: the step executor dispatch table (§6.1) — HTTP
//! synchronous, HTTP asynchronous with webhook callback, embedded script,
//! and child-flow composition — keyed by `Step.kind`.

mod http;
mod script;

use std::sync::Arc;

use async_trait::async_trait;
use flow_core::model::{Step, StepKind};
use serde_json::Value;

pub use http::HttpExecutor;
pub use script::ScriptExecutor;

/// The neutral result of dispatching one step invocation, mirroring the
/// three-way classification the flow runtime folds into `WorkStatus`
/// (§6.1, §4.3): a step either produced outputs, failed outright, or hit a
/// transient condition worth retrying.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkOutcome {
    Succeeded { outputs: Value },
    Failed { error: String },
    NotCompleted { error: String },
}

/// For asynchronous dispatch, the initial HTTP round-trip only acknowledges
/// receipt; the real outcome arrives later via a webhook POST. A synchronous
/// dispatch always resolves immediately.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Resolved(WorkOutcome),
    AwaitingWebhook,
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Dispatches one invocation of `step` with resolved `inputs`. `token`
    /// and `webhook_url` are carried in the request metadata (§6.1) so an
    /// async step's later webhook POST can be correlated back to this work
    /// item; `webhook_url` is `None` for synchronous dispatch.
    async fn dispatch(&self, step: &Step, token: &str, inputs: &Value, webhook_url: Option<&str>) -> DispatchOutcome;
}

/// Routes a step to the executor registered for its `kind`: a plain
/// dispatch table keyed by `Step.kind` (§6.1), rather than a trait-object
/// hierarchy with one implementation per kind.
pub struct ExecutorRegistry {
    http: Arc<HttpExecutor>,
    script: Arc<ScriptExecutor>,
}

impl ExecutorRegistry {
    pub fn new(http: Arc<HttpExecutor>, script: Arc<ScriptExecutor>) -> Self {
        Self { http, script }
    }

    /// `kind: Flow` is not dispatched here: child-flow composition is
    /// resolved by the flow runtime itself via `FlowSpec.input_map` /
    /// `output_map`, not by an HTTP or script call (§4.3's goal resolution
    /// treats a flow-step's completion as the child flow's own goal
    /// satisfaction).
    pub async fn dispatch(&self, step: &Step, token: &str, inputs: &Value, webhook_url: Option<&str>) -> DispatchOutcome {
        match step.kind {
            StepKind::Sync | StepKind::Async => self.http.dispatch(step, token, inputs, webhook_url).await,
            StepKind::Script => self.script.dispatch(step, token, inputs, webhook_url).await,
            StepKind::Flow => DispatchOutcome::Resolved(WorkOutcome::Failed {
                error: format!("step '{}' has kind Flow, which the flow runtime composes directly", step.id),
            }),
        }
    }
}
