//! Expiring custom status (S4.2, S9 Design Notes: "Model as a priority queue
//! keyed by deadline, drained by the Liveness Monitor sweep").

use crate::session::ConnectionId;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    deadline: Instant,
    connection_id: ConnectionId,
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

/// A connection whose custom status just reached its deadline.
pub struct ExpiredCustomStatus {
    pub connection_id: ConnectionId,
}

/// Min-heap of (deadline, connection) pairs. A connection may only hold one
/// pending deadline at a time; superseding it (a later `ss` or an explicit
/// `clr`) leaves the stale heap entry in place — it is filtered out at drain
/// time by comparing against the connection's *current* custom status.
#[derive(Default)]
pub struct CustomStatusExpiryQueue {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
}

impl CustomStatusExpiryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, connection_id: ConnectionId, deadline: Instant) {
        self.heap.lock().push(Reverse(Entry { deadline, connection_id }));
    }

    /// Pop every entry whose deadline has elapsed as of `now`.
    pub fn drain_expired(&self, now: Instant) -> Vec<ExpiredCustomStatus> {
        let mut heap = self.heap.lock();
        let mut expired = Vec::new();
        while let Some(Reverse(entry)) = heap.peek() {
            if entry.deadline > now {
                break;
            }
            let Reverse(entry) = heap.pop().unwrap();
            expired.push(ExpiredCustomStatus { connection_id: entry.connection_id });
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn drains_only_elapsed_deadlines() {
        let queue = CustomStatusExpiryQueue::new();
        let now = Instant::now();
        queue.schedule(1, now);
        queue.schedule(2, now + Duration::from_secs(60));

        let expired = queue.drain_expired(now);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].connection_id, 1);

        let still_empty = queue.drain_expired(now);
        assert!(still_empty.is_empty());
    }
}
