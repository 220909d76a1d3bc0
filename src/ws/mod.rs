//! WebSocket layer: transports, wire frames, routing and the connection
//! actor.
//!
//! Two sockets ("main" and "transaction") are opened against the same
//! endpoint. Rooms are routed to one of them by name, and every inbound
//! data frame is deduplicated and fanned out to local listeners.

pub mod connection;
pub mod messages;
pub mod router;
pub mod subscription;
pub mod transport;
pub mod tungstenite;

pub use connection::{ClientSnapshot, ConnectionManager};
pub use messages::{ControlFrame, InboundFrame};
pub use router::{MessageRouter, RouteOutcome};
pub use subscription::SubscriptionRegistry;
pub use transport::{
    EventSink, HandleLink, Outbound, ReadyState, Transport, TransportEvent, TransportEventKind,
    TransportHandle,
};
pub use tungstenite::TungsteniteTransport;
