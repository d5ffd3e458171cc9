//! Deferred offline events (S4.1 resume contract, I3 "no flapping").
//!
//! A last-window disconnect doesn't publish `x` on the spot; it schedules a
//! deadline the resume grace period out and lets a resume cancel it, the
//! same shape as the custom-status expiry queue (S9 Design Notes): a
//! min-heap drained by the Liveness Monitor sweep, with stale entries left
//! in place and filtered out at drain time rather than removed eagerly.
//!
//! Cancellation is epoch-based rather than heap-removal: each login for a
//! username bumps that username's epoch counter, and a scheduled entry only
//! fires if the epoch it captured at schedule time still matches.

use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    deadline: Instant,
    username: String,
    epoch: u64,
    ts: i64,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline)
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A deferred offline whose grace window has elapsed. The caller still has
/// to check the username's current epoch before publishing (see module docs).
pub struct DueOffline {
    pub username: String,
    pub epoch: u64,
    pub ts: i64,
}

/// Min-heap of (deadline, username, epoch) pending offline events.
#[derive(Default)]
pub struct PendingOfflineQueue {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
}

impl PendingOfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, username: String, epoch: u64, ts: i64, deadline: Instant) {
        self.heap.lock().push(Reverse(Entry { deadline, username, epoch, ts }));
    }

    /// Pop every entry whose deadline has elapsed as of `now`.
    pub fn drain_due(&self, now: Instant) -> Vec<DueOffline> {
        let mut heap = self.heap.lock();
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = heap.peek() {
            if entry.deadline > now {
                break;
            }
            let Reverse(entry) = heap.pop().unwrap();
            due.push(DueOffline { username: entry.username, epoch: entry.epoch, ts: entry.ts });
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn drains_only_elapsed_deadlines() {
        let queue = PendingOfflineQueue::new();
        let now = Instant::now();
        queue.schedule("alice".into(), 1, 0, now);
        queue.schedule("bob".into(), 1, 0, now + Duration::from_secs(60));

        let due = queue.drain_due(now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].username, "alice");

        assert!(queue.drain_due(now).is_empty());
    }
}
