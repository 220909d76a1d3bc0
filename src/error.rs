//! Client error types.
//!
//! [`ClientError`] is the central error type for the relay. Almost every
//! failure inside the connection actor is absorbed (logged and retried), so
//! these variants mostly surface from configuration, transport construction,
//! and calls made after the actor has stopped.

/// Errors produced by the stream relay.
///
/// # Recovery
///
/// | Variant          | Raised by                   | Recovered by               |
/// |------------------|-----------------------------|----------------------------|
/// | `Config`         | [`crate::config`]           | caller (fatal at startup)  |
/// | `InvalidUrl`     | transport construction      | reconnect backoff          |
/// | `Connect`        | transport driver            | reconnect backoff          |
/// | `Send`           | [`crate::ws::TransportHandle`] | next resubscribe        |
/// | `MalformedFrame` | message router              | frame dropped              |
/// | `NoRuntime`      | client / transport startup  | caller                     |
/// | `ActorStopped`   | [`crate::service::Client`]  | caller                     |
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Configuration is missing or invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The endpoint URL cannot be used to open a socket.
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    /// Establishing the socket failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// An outbound frame could not be queued on a transport.
    #[error("send failed: {0}")]
    Send(String),

    /// An inbound frame is not valid JSON for the wire format.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    /// A socket or the actor was started outside a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// The connection actor is no longer running.
    #[error("connection actor stopped")]
    ActorStopped,
}

impl ClientError {
    /// Returns `true` if the failure is handled by scheduling a reconnect.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::InvalidUrl(_) | Self::Connect(_))
    }
}
