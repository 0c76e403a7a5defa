//! Error taxonomy for the engine runtime.
//!
//! Five classes, matching the error-handling design: `Validation` (reject,
//! no state change), `Transient` (convert work to `not_completed`, retry),
//! `Permanent` (convert work to `failed`), `Conflict` (optimistic-concurrency
//! append, retried internally and only surfaced once the retry budget is
//! exhausted), `Fatal` (the aggregate is quarantined, the rest of the engine
//! continues).

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    Validation,
    Transient,
    Permanent,
    Conflict,
    Fatal,
}

/// Raised by catalog/plan validation. No state change accompanies it.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Raised while resolving/planning backward from goals.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanError {
    #[error("unknown goal step '{0}'")]
    UnknownGoal(String),
    #[error("cyclic dependency detected among steps: {0:?}")]
    ErrCyclicPlan(Vec<String>),
    #[error("no producer for required attribute '{attribute}' consumed by step '{consumer}'")]
    MissingProducer { attribute: String, consumer: String },
    #[error("step '{0}' declares a for_each input whose provider does not emit an array")]
    ForEachProviderNotArray(String),
}

/// Raised by a command handler while computing events to raise inside a
/// single `Execute`. Returning this aborts the transaction: no events are
/// appended.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandError {
    #[error("flow is already terminal")]
    FlowTerminal,
    #[error("flow already started")]
    AlreadyStarted,
    #[error("unknown step '{0}' in plan")]
    UnknownStep(String),
    #[error("unknown work token '{0}' for step '{1}'")]
    UnknownWorkToken(String, String),
    #[error("work token '{0}' already terminal")]
    WorkAlreadyTerminal(String),
    #[error("predicate evaluation failed: {0}")]
    PredicateError(String),
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),
    #[error("step '{0}' is already registered")]
    StepAlreadyRegistered(String),
    #[error("step '{0}' is not registered")]
    StepNotRegistered(String),
    #[error("flow '{0}' is already active")]
    FlowAlreadyActive(String),
    #[error("flow '{0}' is not active")]
    FlowNotActive(String),
    #[error("flow '{0}' is not deactivated")]
    FlowNotDeactivated(String),
    #[error("flow '{0}' has no archiving lease")]
    NoArchivingLease(String),
}

/// Raised by the event store.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreError {
    #[error("optimistic-concurrency conflict on aggregate {0}")]
    Conflict(String),
    #[error("aggregate {0} not found")]
    NotFound(String),
    #[error("aggregate {0} is hibernated")]
    Hibernated(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Raised by [`crate::aggregate::Aggregator::execute`].
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateError {
    #[error("command rejected: {0}")]
    Command(#[from] CommandError),
    #[error("concurrent write retry budget exhausted")]
    ConcurrentWrite,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl AggregateError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AggregateError::Command(CommandError::Validation(_)) => ErrorClass::Validation,
            AggregateError::Command(_) => ErrorClass::Permanent,
            AggregateError::ConcurrentWrite => ErrorClass::Conflict,
            AggregateError::Store(StoreError::Conflict(_)) => ErrorClass::Conflict,
            AggregateError::Store(_) => ErrorClass::Fatal,
        }
    }
}
