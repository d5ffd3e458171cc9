//! Multi-window status aggregation (S4.2): when a username holds more than
//! one Connection, the aggregated view is the window with the
//! highest-priority activity; earliest window (by connection id, which is
//! assigned monotonically) wins ties.

use crate::codec::{Activity, Status};
use crate::session::ConnectionId;

/// A single window's published-state snapshot, as seen by the aggregator.
#[derive(Debug, Clone, Copy)]
pub struct WindowSnapshot {
    pub connection_id: ConnectionId,
    pub status: Status,
    pub activity: Activity,
}

/// Pick the aggregated window among a username's live Connections. Returns
/// `None` for an empty Window Set.
pub fn aggregate_windows(windows: &[WindowSnapshot]) -> Option<WindowSnapshot> {
    windows
        .iter()
        .copied()
        .max_by_key(|w| (w.activity.priority(), std::cmp::Reverse(w.connection_id)))
}
