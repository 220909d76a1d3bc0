//! Topic-keyed listener registry for application code.
//!
//! [`EventBus`] maps a topic name to an ordered sequence of listener
//! callbacks. The connection actor calls [`EventBus::emit`] for every routed
//! payload; application code registers with [`EventBus::on`] and removes
//! registrations with [`EventBus::off`]. Closures have no identity, so
//! every registration is named by the [`ListenerId`] that `on` returns.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Handle for one listener registration (UUID v4).
///
/// Registering the same closure twice yields two ids, removed independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(uuid::Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback invoked with the payload of every message on a topic.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

type ListenerTable = HashMap<String, Vec<(ListenerId, Listener)>>;

/// Multi-listener registry keyed by topic name.
///
/// Cloning is cheap: all clones share the same table.
///
/// # Concurrency
///
/// The table sits behind a mutex that is never held while a listener runs,
/// so listeners may call `on`/`off` from inside their own invocation.
#[derive(Clone, Default)]
pub struct EventBus {
    table: Arc<Mutex<ListenerTable>>,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ListenerTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `listener` to the sequence for `topic`.
    ///
    /// Registering the same closure twice registers it twice; each call
    /// returns its own [`ListenerId`].
    pub fn on<F>(&self, topic: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.lock()
            .entry(topic.into())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Removes the registration `id` from `topic`.
    ///
    /// The topic entry is pruned once its sequence is empty. Returns `true`
    /// if a registration was removed.
    pub fn off(&self, topic: &str, id: ListenerId) -> bool {
        let mut table = self.lock();
        let Some(listeners) = table.get_mut(topic) else {
            return false;
        };
        let Some(pos) = listeners.iter().position(|(lid, _)| *lid == id) else {
            return false;
        };
        listeners.remove(pos);
        if listeners.is_empty() {
            table.remove(topic);
        }
        true
    }

    /// Invokes every listener currently registered for `topic`, in
    /// registration order.
    ///
    /// A panicking listener is logged and skipped; the remaining listeners
    /// still run. Returns the number of listeners invoked.
    pub fn emit(&self, topic: &str, payload: &Value) -> usize {
        let snapshot: Vec<(ListenerId, Listener)> = match self.lock().get(topic) {
            Some(listeners) => listeners
                .iter()
                .map(|(id, l)| (*id, Arc::clone(l)))
                .collect(),
            None => return 0,
        };

        for (id, listener) in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(payload))).is_err() {
                tracing::error!(topic, listener_id = %id, "listener panicked");
            }
        }
        snapshot.len()
    }

    /// Returns the number of registrations for `topic`.
    #[must_use]
    pub fn listener_count(&self, topic: &str) -> usize {
        self.lock().get(topic).map_or(0, Vec::len)
    }

    /// Returns every topic that has at least one listener.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.lock().len())
            .finish()
    }
}
