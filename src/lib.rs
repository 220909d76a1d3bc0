//! # stream-relay
//!
//! Resilient real-time subscription client for room-based data streams.
//!
//! The client keeps two persistent WebSocket connections ("main" and
//! "transaction") to the same endpoint, reconnects them with capped
//! exponential backoff and jitter, replays room subscriptions once both are
//! ready, suppresses duplicate transaction-tagged messages, and republishes
//! every payload to local listeners keyed by topic.
//!
//! ## Architecture
//!
//! ```text
//! Application
//!     │  join / leave / on / off / disconnect
//!     ├── Client (service/)
//!     │
//!     ├── ConnectionManager actor (ws/)
//!     │     ├── Transport slots: main, transaction
//!     │     ├── SubscriptionRegistry
//!     │     └── MessageRouter + DedupCache
//!     │
//!     ├── EventBus (domain/)      ── topic listeners
//!     └── StatusBus (domain/)     ── lifecycle events
//! ```
//!
//! ## Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), stream_relay::error::ClientError> {
//! use stream_relay::service::Client;
//!
//! let client = Client::new("wss://datastream.example/stream")?;
//! client.join("latest")?;
//! client.on("latest", |data| println!("latest update: {data}"));
//! // ...
//! client.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod ws;
