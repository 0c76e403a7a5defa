//! flow-scheduler: keyed delayed-task scheduler
//!
//! An in-process min-heap of one-shot tasks addressed by a [`PathKey`]
//! (a sequence of path segments such as `["retry", flow_id, step_id, token]`).
//! Scheduling at a key that already has a pending task replaces it; cancelling
//! by exact key or by path prefix removes pending tasks without a full scan.
//!
//! This has no counterpart in the synchronous engine this workspace grew out
//! of — the in-memory event store there explicitly documents needing a
//! `Mutex`/`RwLock` wrapper to become safe for concurrent, multi-threaded use.
//! `flow-scheduler` picks up that shape (a shared structure behind a
//! `Mutex` + `Condvar`, one worker thread, no polling loop) for the runtime's
//! one genuinely time-driven component: retry backoff and step timeouts.

mod clock;
mod delay_queue;
mod key;
mod scheduler;

pub use clock::{Clock, SystemClock};
pub use delay_queue::DelayQueue;
pub use key::PathKey;
pub use scheduler::Scheduler;
