use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use crate::key::PathKey;

/// A keyed min-heap of delayed tasks.
///
/// `schedule` with a key that is already present replaces the pending task at
/// that key (the old one never fires). Cancellation by exact key or by
/// prefix removes tasks without requiring a heap rebuild: stale heap entries
/// are recognized and discarded lazily at drain time, which keeps every
/// public operation `O(log n)` except `cancel_prefix`, which is `O(n)` in the
/// number of currently-live keys.
///
/// This is a pure, non-threaded data structure; [`crate::Scheduler`] wraps it
/// with the `Mutex`/`Condvar` machinery needed to wake a worker thread at the
/// next deadline.
#[derive(Debug)]
pub struct DelayQueue<T> {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    seq_to_key: HashMap<u64, PathKey>,
    entries: HashMap<PathKey, (u64, Instant, T)>,
    next_seq: u64,
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq_to_key: HashMap::new(),
            entries: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<T> DelayQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace the task scheduled at `key`, due at `due`.
    pub fn schedule(&mut self, key: PathKey, due: Instant, payload: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.seq_to_key.insert(seq, key.clone());
        self.entries.insert(key, (seq, due, payload));
        self.heap.push(Reverse((due, seq)));
    }

    /// Remove the task at `key`, if any, returning its payload.
    pub fn cancel(&mut self, key: &PathKey) -> Option<T> {
        self.entries.remove(key).map(|(_, _, payload)| payload)
    }

    /// Remove every task whose key equals `prefix` or nests under it.
    /// Returns the number of tasks removed.
    pub fn cancel_prefix(&mut self, prefix: &PathKey) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| !k.starts_with(prefix));
        before - self.entries.len()
    }

    /// The instant the next live task is due, if the queue is non-empty.
    /// Note the heap may hold stale (already-cancelled/replaced) entries
    /// ahead of the real head; this walks past those without removing them
    /// so the caller gets an accurate deadline without mutating state.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap
            .iter()
            .filter(|Reverse((_, seq))| self.is_current(*seq))
            .map(|Reverse((due, _))| *due)
            .min()
    }

    fn is_current(&self, seq: u64) -> bool {
        self.seq_to_key
            .get(&seq)
            .and_then(|key| self.entries.get(key))
            .map(|(cur_seq, _, _)| *cur_seq == seq)
            .unwrap_or(false)
    }

    /// Pop every task due at or before `now`, in (due, insertion-order) order.
    pub fn drain_due(&mut self, now: Instant) -> Vec<(PathKey, T)> {
        let mut fired = Vec::new();
        while let Some(&Reverse((due, seq))) = self.heap.peek() {
            if due > now {
                break;
            }
            self.heap.pop();
            if let Some(key) = self.seq_to_key.remove(&seq) {
                let current = self
                    .entries
                    .get(&key)
                    .map(|(cur_seq, _, _)| *cur_seq == seq)
                    .unwrap_or(false);
                if current {
                    if let Some((_, _, payload)) = self.entries.remove(&key) {
                        fired.push((key, payload));
                    }
                }
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(ms: u64, base: Instant) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn fires_in_due_then_fifo_order() {
        let base = Instant::now();
        let mut q = DelayQueue::new();
        q.schedule(PathKey::from_parts(&["a"]), at(10, base), "a");
        q.schedule(PathKey::from_parts(&["b"]), at(5, base), "b");
        q.schedule(PathKey::from_parts(&["c"]), at(5, base), "c");

        let fired = q.drain_due(at(10, base));
        let payloads: Vec<_> = fired.iter().map(|(_, p)| *p).collect();
        assert_eq!(payloads, vec!["b", "c", "a"]);
    }

    #[test]
    fn replace_by_key_drops_the_old_task() {
        let base = Instant::now();
        let mut q = DelayQueue::new();
        q.schedule(PathKey::from_parts(&["retry", "f1"]), at(5, base), "first");
        q.schedule(PathKey::from_parts(&["retry", "f1"]), at(20, base), "second");

        // Nothing should fire at the original (now-discarded) due time.
        assert!(q.drain_due(at(5, base)).is_empty());
        let fired = q.drain_due(at(20, base));
        assert_eq!(fired, vec![(PathKey::from_parts(&["retry", "f1"]), "second")]);
    }

    #[test]
    fn cancel_prefix_removes_nested_keys_only() {
        let base = Instant::now();
        let mut q = DelayQueue::new();
        q.schedule(PathKey::from_parts(&["retry", "f1", "s1", "t1"]), at(5, base), 1);
        q.schedule(PathKey::from_parts(&["retry", "f1", "s2", "t1"]), at(5, base), 2);
        q.schedule(PathKey::from_parts(&["retry", "f2", "s1", "t1"]), at(5, base), 3);

        let removed = q.cancel_prefix(&PathKey::from_parts(&["retry", "f1"]));
        assert_eq!(removed, 2);
        let fired = q.drain_due(at(5, base));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].1, 3);
    }

    #[test]
    fn next_deadline_ignores_stale_entries() {
        let base = Instant::now();
        let mut q = DelayQueue::new();
        let k = PathKey::from_parts(&["retry", "f1"]);
        q.schedule(k.clone(), at(5, base), "first");
        q.schedule(k, at(50, base), "second");
        assert_eq!(q.next_deadline(), Some(at(50, base)));
    }
}
