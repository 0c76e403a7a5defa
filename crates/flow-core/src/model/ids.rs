use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a catalog [`Step`](super::step::Step). Steps are
/// addressed by this id everywhere in the projections and event payloads —
/// never by catalog index, since the catalog is itself event-sourced and
/// entries can be unregistered.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl From<&str> for StepId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StepId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for StepId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of a flow aggregate. A `uuid` string in practice; kept as a
/// newtype so flow and step identifiers can never be swapped by accident at
/// a call site.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(pub String);

impl From<&str> for FlowId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FlowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique token identifying one work-item instance of a step execution.
/// Retries reuse the same token; a `for_each` fan-out mints one token per
/// array element.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkToken(pub String);

impl From<&str> for WorkToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for WorkToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
