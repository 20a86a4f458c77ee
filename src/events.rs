//! Notification surface.
//!
//! Every externally visible outcome (connection lifecycle, ping progress,
//! data-exchange ticks, value changes, directory mutations) is published
//! as a [`LinkEvent`] on an [`EventBus`]. Failures surface here as events,
//! never as panics or errors crossing the public boundary.

use tokio::sync::broadcast;
use tracing::debug;

use crate::value::PlcValue;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 128;

/// Notifications published by the link layer.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A connect retry is beginning.
    ConnectionAttempt {
        /// 1-based attempt index.
        attempt: u32,
        /// Total attempts the cycle will make.
        max_attempts: u32,
    },
    /// One connect retry failed.
    ConnectionAttemptFailed {
        /// Address of the controller.
        address: String,
        /// Failure description.
        reason: String,
    },
    /// The transport reports an open connection.
    Connected {
        /// Address of the controller.
        address: String,
    },
    /// All connect retries were exhausted.
    ConnectionFailed {
        /// Address of the controller.
        address: String,
        /// Number of attempts made.
        attempts: u32,
    },
    /// A connect cycle was cancelled mid-flight.
    ConnectionCancelled {
        /// Address of the controller.
        address: String,
    },
    /// The connection was closed on request.
    Disconnected {
        /// Address of the controller.
        address: String,
    },
    /// A disconnect was requested while not connected.
    AlreadyDisconnected {
        /// Address of the controller.
        address: String,
    },
    /// Closing the transport failed.
    DisconnectionFailed {
        /// Address of the controller.
        address: String,
        /// Failure description.
        reason: String,
    },
    /// The monitoring loop detected a dropped connection.
    ConnectionLost {
        /// Address of the controller.
        address: String,
    },
    /// One action-execution tick completed.
    DataUpdated {
        /// Address of the controller.
        address: String,
    },
    /// A ping attempt is beginning.
    PingAttempt {
        /// Address being probed.
        address: String,
        /// 1-based attempt index.
        attempt: u32,
        /// Total attempts the ping will make.
        max_attempts: u32,
    },
    /// A ping attempt got no reply.
    PingAttemptFailed {
        /// Address being probed.
        address: String,
        /// 1-based attempt index.
        attempt: u32,
        /// Total attempts the ping will make.
        max_attempts: u32,
    },
    /// A ping operation finished.
    PingCompleted {
        /// Address being probed.
        address: String,
        /// Whether any attempt succeeded.
        success: bool,
    },
    /// A ping operation was cancelled.
    PingCancelled {
        /// Address being probed.
        address: String,
    },
    /// A registered action failed; the remaining actions still ran.
    ActionFailed {
        /// Name of the failing action.
        action: String,
        /// Failure description.
        reason: String,
    },
    /// A data item's cached value changed.
    ValueChanged {
        /// Name of the item.
        item: String,
        /// The new value.
        value: PlcValue,
    },
    /// A controller entry was added to the directory.
    PlcAdded {
        /// Name of the entry.
        name: String,
    },
    /// A controller entry was removed from the directory.
    PlcRemoved {
        /// Name of the entry.
        name: String,
    },
    /// A controller entry was updated.
    PlcUpdated {
        /// Name of the entry.
        name: String,
        /// Which field changed.
        field: &'static str,
    },
}

/// Broadcast bus carrying [`LinkEvent`]s to any number of subscribers.
///
/// Emitting is non-blocking and never fails: events published while no
/// subscriber is listening are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LinkEvent>,
}

impl EventBus {
    /// Creates a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribes to all events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event to all current subscribers.
    pub fn emit(&self, event: LinkEvent) {
        debug!(event = ?event, "link event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
