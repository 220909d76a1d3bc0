//! Topic naming rules and transport roles.
//!
//! A topic's [`Role`] is derived purely from its name, so the same room is
//! always joined, left and replayed on the same socket.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Substring that routes a topic to the transaction socket.
pub const TRANSACTION_MARKER: &str = "transaction";

/// Substring that marks a price-class topic.
pub const PRICE_MARKER: &str = "price:";

/// Prefix of the per-token topic derived from price-class frames.
pub const PRICE_BY_TOKEN_PREFIX: &str = "price-by-token:";

/// One of the two parallel socket connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Carries every topic without the transaction marker.
    Main,
    /// Carries topics whose name contains [`TRANSACTION_MARKER`].
    Transaction,
}

impl Role {
    /// Both roles, in slot order.
    pub const ALL: [Self; 2] = [Self::Main, Self::Transaction];

    /// Returns the role whose socket carries `topic`.
    #[must_use]
    pub fn for_topic(topic: &str) -> Self {
        if topic.contains(TRANSACTION_MARKER) {
            Self::Transaction
        } else {
            Self::Main
        }
    }

    /// Returns the slot index for this role.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Main => 0,
            Self::Transaction => 1,
        }
    }

    /// Returns the lowercase role name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Transaction => "transaction",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns `true` if `topic` is a price-class topic.
#[must_use]
pub fn is_price_topic(topic: &str) -> bool {
    topic.contains(PRICE_MARKER)
}

/// Builds the per-token topic name for `token`.
#[must_use]
pub fn price_by_token_topic(token: &str) -> String {
    format!("{PRICE_BY_TOKEN_PREFIX}{token}")
}
