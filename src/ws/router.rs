//! Inbound frame routing with transaction dedup.
//!
//! [`MessageRouter`] turns a raw text frame into the list of local topics
//! its payload must be emitted on. It owns the [`DedupCache`] so duplicate
//! suppression and routing happen in one step.

use serde_json::Value;

use super::messages::InboundFrame;
use crate::domain::DedupCache;
use crate::domain::topic::{is_price_topic, price_by_token_topic};
use crate::error::ClientError;

/// Result of routing one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Not a data frame.
    Ignored,
    /// Carries a transaction id that was already delivered.
    Duplicate {
        /// The repeated transaction id.
        tx: String,
    },
    /// Emit `payload` on every topic in `topics`, in order.
    Deliver {
        /// Derived per-token topic first (if any), then the frame's room.
        topics: Vec<String>,
        /// The frame's `data` object.
        payload: Value,
    },
}

/// Parses, deduplicates and fans out inbound frames.
#[derive(Debug)]
pub struct MessageRouter {
    seen: DedupCache,
}

impl MessageRouter {
    /// Creates a router whose dedup cache holds at most `dedup_capacity`
    /// ids (`0` = unbounded).
    #[must_use]
    pub fn new(dedup_capacity: usize) -> Self {
        Self {
            seen: DedupCache::new(dedup_capacity),
        }
    }

    /// Routes one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MalformedFrame`] if the frame is not valid
    /// JSON, or is a data frame without a `room`. The caller drops it.
    pub fn route(&mut self, text: &str) -> Result<RouteOutcome, ClientError> {
        let frame = InboundFrame::parse(text)?;
        if !frame.is_message() {
            return Ok(RouteOutcome::Ignored);
        }
        let Some(room) = frame.room.clone() else {
            return Err(ClientError::MalformedFrame(
                <serde_json::Error as serde::de::Error>::missing_field("room"),
            ));
        };

        if let Some(tx) = frame.tx()
            && !self.seen.insert(&tx)
        {
            return Ok(RouteOutcome::Duplicate { tx });
        }

        let mut topics = Vec::with_capacity(2);
        if is_price_topic(&room)
            && let Some(token) = frame.token()
        {
            topics.push(price_by_token_topic(&token));
        }
        topics.push(room);

        Ok(RouteOutcome::Deliver {
            topics,
            payload: frame.data,
        })
    }

    /// Returns the number of transaction ids currently remembered.
    #[must_use]
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Forgets every remembered transaction id.
    pub fn clear(&mut self) {
        self.seen.clear();
    }
}
