//! flow-cli: assembles the runtime (`flow-core`) with its executors,
//! scheduler, hub, and health checker into one running engine, and ships a
//! thin demo binary that exercises it end-to-end (§1, §9). Not an HTTP API
//! or a flag-rich CLI — those are explicitly out of scope; this is a
//! development smoke-test binary for the engine.

pub mod engine;

pub use engine::{Engine, EngineError};
