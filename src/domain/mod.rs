//! Domain layer: topic rules, listener registry, dedup and backoff state.
//!
//! Everything here is transport-agnostic. The connection actor in
//! [`crate::ws`] owns instances of these types and drives them from socket
//! and timer events.

pub mod backoff;
pub mod connection_event;
pub mod dedup_cache;
pub mod event_bus;
pub mod topic;

pub use backoff::ReconnectPolicy;
pub use connection_event::{ConnectionEvent, StatusBus};
pub use dedup_cache::DedupCache;
pub use event_bus::{EventBus, Listener, ListenerId};
pub use topic::Role;
