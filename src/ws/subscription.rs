//! Durable room subscription set.
//!
//! Tracks which rooms the application wants active so they can be replayed
//! after every reconnect. Each room is bound to a [`Role`] by its name.

use std::collections::HashSet;

use crate::domain::Role;

/// Set of rooms the client wants joined, independent of socket state.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    rooms: HashSet<String>,
}

impl SubscriptionRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `room`. Returns `true` if it was not already present.
    pub fn join(&mut self, room: &str) -> bool {
        self.rooms.insert(room.to_string())
    }

    /// Removes `room`. Returns `true` if it was present.
    pub fn leave(&mut self, room: &str) -> bool {
        self.rooms.remove(room)
    }

    /// Returns every room paired with the role whose socket carries it.
    pub fn targets(&self) -> impl Iterator<Item = (Role, &str)> {
        self.rooms
            .iter()
            .map(|room| (Role::for_topic(room), room.as_str()))
    }

    /// Returns the registered rooms in sorted order.
    #[must_use]
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.rooms.iter().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Removes every room.
    pub fn clear(&mut self) {
        self.rooms.clear();
    }
}
