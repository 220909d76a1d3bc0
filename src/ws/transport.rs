//! Socket abstraction consumed by the connection actor.
//!
//! A [`Transport`] opens one socket per call and reports its lifecycle back
//! through an [`EventSink`]. The actor keeps the returned [`TransportHandle`]
//! in the slot for its [`Role`]; the driver side keeps the matching
//! [`HandleLink`] to drain outbound frames and publish the ready state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;

use crate::domain::Role;
use crate::error::ClientError;

/// Socket ready state, mirroring the browser `WebSocket.readyState` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ReadyState {
    /// Handshake in progress.
    Connecting = 0,
    /// Frames may be sent.
    Open = 1,
    /// Close requested, not yet confirmed.
    Closing = 2,
    /// Socket is gone.
    Closed = 3,
}

impl ReadyState {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug, Clone)]
struct ReadyCell(Arc<AtomicU8>);

impl ReadyCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ReadyState::Connecting as u8)))
    }

    fn get(&self) -> ReadyState {
        ReadyState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ReadyState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Frame queued for the socket driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Text frame to write.
    Text(String),
    /// Close the socket.
    Close,
}

/// Actor-side handle to one socket.
///
/// Cheap to clone; all clones address the same socket.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    role: Role,
    epoch: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: ReadyCell,
}

impl TransportHandle {
    /// Creates a handle in the `Connecting` state together with the driver
    /// side that owns the outbound queue.
    #[must_use]
    pub fn new(role: Role, epoch: u64) -> (Self, HandleLink) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let state = ReadyCell::new();
        let handle = Self {
            role,
            epoch,
            outbound,
            state: state.clone(),
        };
        let link = HandleLink {
            outbound: outbound_rx,
            state,
        };
        (handle, link)
    }

    /// Returns the role this socket serves.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Returns the epoch assigned when the socket was opened.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns the current ready state.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    /// Returns `true` if frames may be sent.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Queues a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Send`] if the socket is not open or its driver
    /// has exited.
    pub fn send(&self, text: String) -> Result<(), ClientError> {
        if !self.is_open() {
            return Err(ClientError::Send(format!(
                "{} socket is {:?}",
                self.role,
                self.ready_state()
            )));
        }
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| ClientError::Send(format!("{} socket driver exited", self.role)))
    }

    /// Requests the socket to close. Safe to call more than once.
    pub fn close(&self) {
        if self.ready_state() == ReadyState::Closed {
            return;
        }
        self.state.set(ReadyState::Closing);
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Driver-side counterpart of a [`TransportHandle`].
#[derive(Debug)]
pub struct HandleLink {
    outbound: mpsc::UnboundedReceiver<Outbound>,
    state: ReadyCell,
}

impl HandleLink {
    /// Waits for the next queued frame. Returns `None` once every handle
    /// clone has been dropped.
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Returns a queued frame without waiting.
    pub fn try_next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }

    /// Returns the current ready state.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    /// Publishes a new ready state to every handle clone.
    pub fn set_state(&self, state: ReadyState) {
        self.state.set(state);
    }
}

/// What happened on a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// Handshake completed.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The socket reported an error. A `Closed` always follows.
    Error(String),
    /// The socket is gone.
    Closed,
}

/// Socket event tagged with the socket's role and epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    /// Role of the socket.
    pub role: Role,
    /// Epoch of the socket.
    pub epoch: u64,
    /// Event payload.
    pub kind: TransportEventKind,
}

/// Channel end through which a driver reports socket events.
///
/// Dropping the sink without calling [`EventSink::closed`] still reports
/// `Closed`, so a driver that exits early (or panics) never leaves its slot
/// occupied.
#[derive(Debug)]
pub struct EventSink {
    role: Role,
    epoch: u64,
    tx: mpsc::UnboundedSender<TransportEvent>,
    closed: bool,
}

impl EventSink {
    /// Creates a sink for the socket `(role, epoch)`.
    #[must_use]
    pub const fn new(role: Role, epoch: u64, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            role,
            epoch,
            tx,
            closed: false,
        }
    }

    /// Returns the role of the socket this sink reports for.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Returns the epoch of the socket this sink reports for.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    fn emit(&self, kind: TransportEventKind) {
        let _ = self.tx.send(TransportEvent {
            role: self.role,
            epoch: self.epoch,
            kind,
        });
    }

    /// Reports a completed handshake.
    pub fn opened(&self) {
        self.emit(TransportEventKind::Opened);
    }

    /// Reports an inbound text frame.
    pub fn frame(&self, text: String) {
        self.emit(TransportEventKind::Frame(text));
    }

    /// Reports a socket error.
    pub fn error(&self, reason: impl Into<String>) {
        self.emit(TransportEventKind::Error(reason.into()));
    }

    /// Reports that the socket is gone. Consumes the sink.
    pub fn closed(mut self) {
        self.closed = true;
        self.emit(TransportEventKind::Closed);
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        if !self.closed {
            self.emit(TransportEventKind::Closed);
        }
    }
}

/// Opens sockets for the connection actor.
pub trait Transport: Send + Sync + fmt::Debug + 'static {
    /// Starts opening a socket to `url` and returns its handle immediately.
    ///
    /// Lifecycle and frames are reported through `events`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot even be constructed (for
    /// example an unusable URL). The actor treats this like a close and
    /// schedules a reconnect.
    fn open(&self, url: &str, events: EventSink) -> Result<TransportHandle, ClientError>;
}
