//! Connection lifecycle notifications.
//!
//! Every transition the connection actor makes is published as a
//! [`ConnectionEvent`] on the [`StatusBus`], a `tokio` broadcast channel any
//! number of observers may subscribe to.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::Role;

/// Lifecycle event emitted by the connection actor.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// A transport reported open.
    Connected {
        /// Role of the transport.
        role: Role,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A transport closed and its slot was cleared.
    Disconnected {
        /// Role of the transport.
        role: Role,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// Opening a transport failed, either at construction or on the wire.
    ConnectFailed {
        /// Role of the transport.
        role: Role,
        /// Failure description.
        reason: String,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A reconnect timer was armed.
    ReconnectScheduled {
        /// Attempt counter at scheduling time.
        attempt: u32,
        /// Jittered wait in milliseconds.
        delay_ms: u64,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// The attempt ceiling was reached; no more reconnects will be scheduled.
    ReconnectAbandoned {
        /// Attempts made before giving up.
        attempts: u32,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// Both transports became ready and every room was replayed.
    Resubscribed {
        /// Number of join frames sent.
        rooms: usize,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },

    /// The application called `disconnect`.
    ClientDisconnected {
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl ConnectionEvent {
    /// Returns the role this event concerns, if any.
    #[must_use]
    pub const fn role(&self) -> Option<Role> {
        match self {
            Self::Connected { role, .. }
            | Self::Disconnected { role, .. }
            | Self::ConnectFailed { role, .. } => Some(*role),
            Self::ReconnectScheduled { .. }
            | Self::ReconnectAbandoned { .. }
            | Self::Resubscribed { .. }
            | Self::ClientDisconnected { .. } => None,
        }
    }

    /// Returns the event timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Connected { timestamp, .. }
            | Self::Disconnected { timestamp, .. }
            | Self::ConnectFailed { timestamp, .. }
            | Self::ReconnectScheduled { timestamp, .. }
            | Self::ReconnectAbandoned { timestamp, .. }
            | Self::Resubscribed { timestamp, .. }
            | Self::ClientDisconnected { timestamp } => *timestamp,
        }
    }

    /// Returns the snake_case event name, matching the serialized
    /// `event_type` tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::ReconnectScheduled { .. } => "reconnect_scheduled",
            Self::ReconnectAbandoned { .. } => "reconnect_abandoned",
            Self::Resubscribed { .. } => "resubscribed",
            Self::ClientDisconnected { .. } => "client_disconnected",
        }
    }
}

/// Broadcast bus for [`ConnectionEvent`]s.
///
/// Lagging receivers lose the oldest events. Publishing with no receivers
/// drops the event.
#[derive(Debug, Clone)]
pub struct StatusBus {
    sender: broadcast::Sender<ConnectionEvent>,
}

impl StatusBus {
    /// Creates a bus buffering up to `capacity` events (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes `event`, returning how many observers received it.
    pub fn publish(&self, event: ConnectionEvent) -> usize {
        tracing::trace!(event = event.kind(), role = ?event.role(), "connection status");
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns a receiver for every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.sender.subscribe()
    }
}
