use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::StepId;
use crate::errors::ValidationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Sync,
    Async,
    Script,
    Flow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeRole {
    Required,
    Optional,
    Output,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Null,
    Any,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeDecl {
    pub role: AttributeRole,
    #[serde(rename = "type")]
    pub ty: AttributeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub for_each: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptLanguage {
    /// Lisp-family pure expression language.
    Expression,
    /// Sandboxed, Turing-complete-minus-I/O imperative language.
    Imperative,
    /// JSON-path predicate/extraction matcher.
    JsonPath,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredicateSpec {
    pub language: ScriptLanguage,
    pub source: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpSpec {
    pub endpoint: String,
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScriptSpec {
    pub language: ScriptLanguage,
    pub source: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowSpec {
    pub goals: Vec<StepId>,
    pub input_map: IndexMap<String, String>,
    pub output_map: IndexMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    Fixed,
    Linear,
    Exponential,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkConfig {
    /// Negative value means unbounded retries.
    pub max_retries: i64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_type: BackoffType,
}

impl Default for WorkConfig {
    fn default() -> Self {
        Self { max_retries: 0, initial_backoff_ms: 0, max_backoff_ms: 0, backoff_type: BackoffType::Fixed }
    }
}

/// Catalog entry: a unit of dispatchable work with declared typed
/// inputs/outputs. Registered/updated/unregistered only through Engine Core
/// commands — this struct itself is a plain value, snapshotted by value into
/// every [`crate::model::plan::ExecutionPlan`] that references it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub name: String,
    pub version: u32,
    pub kind: StepKind,
    pub attributes: IndexMap<String, AttributeDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<PredicateSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<ScriptSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<FlowSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_config: Option<WorkConfig>,
    #[serde(default)]
    pub memoizable: bool,
    #[serde(default)]
    pub labels: IndexMap<String, String>,
}

impl Step {
    pub fn outputs(&self) -> impl Iterator<Item = (&String, &AttributeDecl)> {
        self.attributes.iter().filter(|(_, decl)| decl.role == AttributeRole::Output)
    }

    pub fn required_inputs(&self) -> impl Iterator<Item = (&String, &AttributeDecl)> {
        self.attributes.iter().filter(|(_, decl)| decl.role == AttributeRole::Required)
    }

    pub fn optional_inputs(&self) -> impl Iterator<Item = (&String, &AttributeDecl)> {
        self.attributes.iter().filter(|(_, decl)| decl.role == AttributeRole::Optional)
    }

    pub fn inputs(&self) -> impl Iterator<Item = (&String, &AttributeDecl)> {
        self.attributes.iter().filter(|(_, decl)| decl.role != AttributeRole::Output)
    }

    /// Validates the structural invariants from the catalog section of the
    /// spec. Does not check cross-step invariants (those belong to the plan
    /// builder).
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.outputs().count() == 0 {
            return Err(ValidationError::new(format!("step '{}' declares no output attribute", self.id)));
        }
        for (name, decl) in &self.attributes {
            if decl.role == AttributeRole::Required && decl.default.is_some() {
                return Err(ValidationError::new(format!(
                    "step '{}' attribute '{name}' is required but declares a default",
                    self.id
                )));
            }
            if decl.for_each && !matches!(decl.ty, AttributeType::Array) {
                return Err(ValidationError::new(format!(
                    "step '{}' attribute '{name}' is for_each but not typed as array",
                    self.id
                )));
            }
        }
        match self.kind {
            StepKind::Sync | StepKind::Async => {
                if self.http.is_none() {
                    return Err(ValidationError::new(format!("step '{}' of kind {:?} requires http", self.id, self.kind)));
                }
            }
            StepKind::Script => {
                if self.script.is_none() {
                    return Err(ValidationError::new(format!("step '{}' of kind script requires script", self.id)));
                }
            }
            StepKind::Flow => {
                if self.flow.is_none() {
                    return Err(ValidationError::new(format!("step '{}' of kind flow requires flow", self.id)));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_step(id: &str) -> Step {
        Step {
            id: id.into(),
            name: id.into(),
            version: 1,
            kind: StepKind::Sync,
            attributes: IndexMap::from([(
                "greeting".to_string(),
                AttributeDecl { role: AttributeRole::Output, ty: AttributeType::String, default: None, for_each: false },
            )]),
            predicate: None,
            http: Some(HttpSpec { endpoint: "http://x".into(), timeout_ms: 1000, health_check: None }),
            script: None,
            flow: None,
            work_config: None,
            memoizable: false,
            labels: IndexMap::new(),
        }
    }

    #[test]
    fn rejects_step_without_outputs() {
        let mut s = http_step("s1");
        s.attributes.clear();
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_required_with_default() {
        let mut s = http_step("s1");
        s.attributes.insert(
            "name".into(),
            AttributeDecl { role: AttributeRole::Required, ty: AttributeType::String, default: Some(Value::String("x".into())), for_each: false },
        );
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_for_each_non_array() {
        let mut s = http_step("s1");
        s.attributes.insert(
            "n".into(),
            AttributeDecl { role: AttributeRole::Optional, ty: AttributeType::Number, default: None, for_each: true },
        );
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_async_without_http() {
        let mut s = http_step("s1");
        s.kind = StepKind::Async;
        s.http = None;
        assert!(s.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_sync_step() {
        assert!(http_step("s1").validate().is_ok());
    }
}
