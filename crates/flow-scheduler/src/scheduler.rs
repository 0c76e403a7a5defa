use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::delay_queue::DelayQueue;
use crate::key::PathKey;

/// No task is ever due further out than this; it just bounds how long the
/// worker thread blocks when the queue is empty so `shutdown` is noticed
/// promptly.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

struct Shared<T> {
    queue: Mutex<DelayQueue<T>>,
    cvar: Condvar,
    closed: Mutex<bool>,
}

/// In-process scheduler for one-shot delayed tasks, keyed by [`PathKey`].
///
/// A single background thread sleeps until the next task's deadline (or is
/// woken early by `schedule`/`cancel`), fires every task that is due, and
/// goes back to sleep until the new head. There is no polling: the condvar
/// wait is always parameterized by the distance to the current head.
pub struct Scheduler<T> {
    shared: Arc<Shared<T>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Scheduler<T> {
    /// Start the worker thread. `on_fire` is invoked once per due task, from
    /// the worker thread, outside the queue lock.
    pub fn spawn<F>(on_fire: F) -> Self
    where
        F: Fn(PathKey, T) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            queue: Mutex::new(DelayQueue::new()),
            cvar: Condvar::new(),
            closed: Mutex::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("flow-scheduler".into())
            .spawn(move || Self::run(worker_shared, on_fire))
            .expect("failed to spawn flow-scheduler worker thread");

        Self { shared, worker: Some(worker) }
    }

    fn run<F>(shared: Arc<Shared<T>>, on_fire: F)
    where
        F: Fn(PathKey, T) + Send + 'static,
    {
        loop {
            if *shared.closed.lock().unwrap() {
                return;
            }

            let due = {
                let mut queue = shared.queue.lock().unwrap();
                queue.drain_due(Instant::now())
            };

            if !due.is_empty() {
                for (key, payload) in due {
                    trace!(key = %key, "scheduler firing task");
                    on_fire(key, payload);
                }
                continue;
            }

            let wait_for = {
                let queue = shared.queue.lock().unwrap();
                match queue.next_deadline() {
                    Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                    None => IDLE_WAIT,
                }
            };

            let guard = shared.closed.lock().unwrap();
            if *guard {
                return;
            }
            let _ = shared.cvar.wait_timeout(guard, wait_for).unwrap();
        }
    }

    pub fn schedule(&self, key: PathKey, due: Instant, payload: T) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.schedule(key, due, payload);
        }
        self.shared.cvar.notify_one();
    }

    pub fn cancel(&self, key: &PathKey) -> Option<T> {
        let mut queue = self.shared.queue.lock().unwrap();
        queue.cancel(key)
    }

    pub fn cancel_prefix(&self, prefix: &PathKey) -> usize {
        let mut queue = self.shared.queue.lock().unwrap();
        queue.cancel_prefix(prefix)
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        *self.shared.closed.lock().unwrap() = true;
        self.shared.cvar.notify_all();
        if let Some(handle) = self.worker.take() {
            debug!("waiting for flow-scheduler worker to stop");
            let _ = handle.join();
        }
    }
}

impl<T> Drop for Scheduler<T> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown_inner();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn fires_scheduled_task_once() {
        let (tx, rx) = mpsc::channel();
        let scheduler = Scheduler::spawn(move |key, payload: &'static str| {
            tx.send((key, payload)).unwrap();
        });

        scheduler.schedule(
            PathKey::from_parts(&["retry", "flow-1", "step-a", "tok-1"]),
            Instant::now() + Duration::from_millis(10),
            "fired",
        );

        let (key, payload) = rx.recv_timeout(Duration::from_secs(2)).expect("task should fire");
        assert_eq!(payload, "fired");
        assert_eq!(key, PathKey::from_parts(&["retry", "flow-1", "step-a", "tok-1"]));
        scheduler.shutdown();
    }

    #[test]
    fn cancel_before_due_prevents_firing() {
        let (tx, rx) = mpsc::channel::<&'static str>();
        let scheduler = Scheduler::spawn(move |_key, payload| {
            tx.send(payload).unwrap();
        });

        let key = PathKey::from_parts(&["retry", "flow-2", "step-a", "tok-1"]);
        scheduler.schedule(key.clone(), Instant::now() + Duration::from_millis(50), "should-not-fire");
        assert!(scheduler.cancel(&key).is_some());

        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
        scheduler.shutdown();
    }
}
