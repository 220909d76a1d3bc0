//! Public client facade.
//!
//! [`Client`] is a cheap, cloneable handle to the connection actor. Room
//! and lifecycle calls are forwarded as [`Command`]s; listener registration
//! goes straight to the shared [`EventBus`] so it works even while the
//! sockets are down.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::ClientConfig;
use crate::domain::{ConnectionEvent, EventBus, ListenerId, StatusBus};
use crate::error::ClientError;
use crate::ws::connection::{self, ClientSnapshot, Command, ConnectionManager};
use crate::ws::{Transport, TransportHandle, TungsteniteTransport};

/// Resilient two-socket subscription client.
///
/// Construction spawns the connection actor on the current tokio runtime
/// and starts connecting immediately. The actor stops after
/// [`Client::shutdown`] or once every clone of the client is dropped.
#[derive(Debug, Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    listeners: EventBus,
    status: StatusBus,
}

impl Client {
    /// Connects to `url` with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoRuntime`] outside a tokio runtime, or
    /// [`ClientError::Config`] if `url` is empty.
    pub fn new(url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_config(ClientConfig::new(url))
    }

    /// Connects using `config` and the `tokio-tungstenite` transport.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if `config` fails validation, or
    /// [`ClientError::NoRuntime`] outside a tokio runtime.
    pub fn with_config(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = TungsteniteTransport::new(config.connect_timeout);
        Self::with_transport(config, transport)
    }

    /// Connects using `config` and a caller-supplied transport.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if `config` fails validation, or
    /// [`ClientError::NoRuntime`] outside a tokio runtime.
    pub fn with_transport(
        config: ClientConfig,
        transport: impl Transport,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let listeners = EventBus::new();
        let status = StatusBus::new(config.status_bus_capacity);
        let (manager, inbox) = ConnectionManager::new(
            &config,
            Arc::new(transport),
            listeners.clone(),
            status.clone(),
        );
        let (commands, commands_rx) = mpsc::unbounded_channel();
        // Detached: the actor exits on its own when `commands` closes.
        drop(connection::spawn(manager, inbox, commands_rx));

        tracing::info!(url = %config.url, "stream client started");
        Ok(Self {
            commands,
            listeners,
            status,
        })
    }

    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::ActorStopped)
    }

    /// Subscribes to `room`. Sent now if its socket is ready, otherwise on
    /// the next full resubscribe.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ActorStopped`] after shutdown.
    pub fn join(&self, room: impl Into<String>) -> Result<(), ClientError> {
        self.send(Command::Join(room.into()))
    }

    /// Unsubscribes from `room`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ActorStopped`] after shutdown.
    pub fn leave(&self, room: impl Into<String>) -> Result<(), ClientError> {
        self.send(Command::Leave(room.into()))
    }

    /// Registers `listener` for payloads on `topic`.
    pub fn on<F>(&self, topic: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.listeners.on(topic, listener)
    }

    /// Removes the registration `id` from `topic`. Returns `true` if it
    /// existed.
    pub fn off(&self, topic: &str, id: ListenerId) -> bool {
        self.listeners.off(topic, id)
    }

    /// Opens sockets for any empty slot.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ActorStopped`] after shutdown.
    pub fn connect(&self) -> Result<(), ClientError> {
        self.send(Command::Connect)
    }

    /// Closes both sockets, cancels pending reconnects, and forgets rooms
    /// and seen transactions. Call [`Client::connect`] to start again.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ActorStopped`] after shutdown.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.send(Command::Disconnect)
    }

    /// Returns the main socket handle, if one is present.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ActorStopped`] after shutdown.
    pub async fn primary_handle(&self) -> Result<Option<TransportHandle>, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::PrimaryHandle(tx))?;
        rx.await.map_err(|_| ClientError::ActorStopped)
    }

    /// Returns a snapshot of the actor state.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ActorStopped`] after shutdown.
    pub async fn snapshot(&self) -> Result<ClientSnapshot, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| ClientError::ActorStopped)
    }

    /// Subscribes to connection lifecycle events.
    #[must_use]
    pub fn status(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.status.subscribe()
    }

    /// Disconnects and stops the actor. Hosts call this on process
    /// teardown.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ActorStopped`] if the actor had already
    /// stopped.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx))?;
        rx.await.map_err(|_| ClientError::ActorStopped)
    }
}
