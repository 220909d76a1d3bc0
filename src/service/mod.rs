//! Service layer: the public client facade over the connection actor.

pub mod client;

pub use client::Client;
