/*!
 * In-process event channel for request progress and state.
 *
 * Events fan out over a broadcast channel keyed by request id; delivery is
 * at-least-once and ordered per publisher. The SSE layer and tests
 * subscribe here.
 */

use serde::Serialize;
use tokio::sync::broadcast;

use crate::database::RequestStatus;

/// Capacity of the broadcast buffer; slow subscribers lag, they never block
const CHANNEL_CAPACITY: usize = 256;

/// An event concerning one translation request
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestEvent {
    /// Progress advanced
    Progress {
        /// Request the event belongs to
        request_id: i64,
        /// Percentage, monotonic per request
        progress: i64,
    },
    /// Status transition happened
    StatusChanged {
        /// Request the event belongs to
        request_id: i64,
        /// The new status
        status: RequestStatus,
    },
    /// A log entry was appended
    Log {
        /// Request the event belongs to
        request_id: i64,
        /// Severity
        level: String,
        /// Message body
        message: String,
    },
}

impl RequestEvent {
    /// Request id the event belongs to
    pub fn request_id(&self) -> i64 {
        match self {
            RequestEvent::Progress { request_id, .. }
            | RequestEvent::StatusChanged { request_id, .. }
            | RequestEvent::Log { request_id, .. } => *request_id,
        }
    }
}

/// Broadcast bus for request events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RequestEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create the bus
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event; a missing subscriber is not an error
    pub fn publish(&self, event: RequestEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all request events
    pub fn subscribe(&self) -> broadcast::Receiver<RequestEvent> {
        self.tx.subscribe()
    }
}
