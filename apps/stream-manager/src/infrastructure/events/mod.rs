//! Connection Event Broadcast
//!
//! Lifecycle events for stream connections, distributed over a tokio
//! broadcast channel so any number of observers can follow connection
//! state without touching the registry.
//!
//! Sending with no active receivers is not an error; the event is dropped.

use tokio::sync::broadcast;

use crate::domain::streaming::StreamKey;

// =============================================================================
// Events
// =============================================================================

/// Connection lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Receive task spawned.
    Started {
        /// Affected stream.
        key: StreamKey,
    },
    /// Socket open and handshake frames sent.
    Connected {
        /// Affected stream.
        key: StreamKey,
    },
    /// Waiting before the next reconnect attempt.
    Reconnecting {
        /// Affected stream.
        key: StreamKey,
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// Network connection lost; the stream has stopped.
    ConnectionLost {
        /// Affected stream.
        key: StreamKey,
        /// Cause of the loss.
        reason: String,
    },
    /// Stopped on request.
    Stopped {
        /// Affected stream.
        key: StreamKey,
    },
}

impl ConnectionEvent {
    /// Stream the event refers to.
    #[must_use]
    pub const fn key(&self) -> &StreamKey {
        match self {
            Self::Started { key }
            | Self::Connected { key }
            | Self::Reconnecting { key, .. }
            | Self::ConnectionLost { key, .. }
            | Self::Stopped { key } => key,
        }
    }
}

// =============================================================================
// Event Hub
// =============================================================================

/// Fan-out hub for connection events.
///
/// # Example
///
/// ```rust
/// use stream_manager::infrastructure::events::EventHub;
///
/// let hub = EventHub::new(16);
/// let mut rx = hub.subscribe();
/// assert_eq!(hub.receiver_count(), 1);
/// # drop(rx.try_recv());
/// ```
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventHub {
    /// Create a hub with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of receivers, or `None` if there are none.
    pub fn publish(&self, event: ConnectionEvent) -> Option<usize> {
        self.tx.send(event).ok()
    }

    /// Get a new receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.tx.subscribe()
    }

    /// Get the number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(1_024)
    }
}
