//! Connection actor: both sockets, reconnect backoff and room replay.
//!
//! [`ConnectionManager`] owns every piece of mutable client state: the two
//! transport slots, the shared reconnect counter, the room registry and the
//! message router. It is driven from a single task ([`spawn`]) that selects
//! over application commands, socket events and reconnect timers, so none
//! of that state needs a lock.
//!
//! ```text
//! Client ──Command──┐
//! sockets ──Event───┼──> run loop ──> ConnectionManager ──emit──> EventBus
//! timers ──Due──────┘                        └──publish──> StatusBus
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};

use super::messages::ControlFrame;
use super::router::{MessageRouter, RouteOutcome};
use super::subscription::SubscriptionRegistry;
use super::transport::{
    EventSink, ReadyState, Transport, TransportEvent, TransportEventKind, TransportHandle,
};
use crate::config::ClientConfig;
use crate::domain::{ConnectionEvent, EventBus, ReconnectPolicy, Role, StatusBus};
use crate::error::ClientError;

/// Requests from the application to the actor.
#[derive(Debug)]
pub enum Command {
    /// Register a room and join it if its socket is open.
    Join(String),
    /// Unregister a room and leave it if its socket is open.
    Leave(String),
    /// Open sockets for every empty slot.
    Connect,
    /// Close both sockets and forget rooms and transaction ids.
    Disconnect,
    /// Reply with a clone of the main socket handle.
    PrimaryHandle(oneshot::Sender<Option<TransportHandle>>),
    /// Reply with a state snapshot.
    Snapshot(oneshot::Sender<ClientSnapshot>),
    /// Disconnect, reply, and stop the actor.
    Shutdown(oneshot::Sender<()>),
}

/// Point-in-time view of the actor state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientSnapshot {
    /// Ready state of the main socket (`None` = slot empty).
    pub main: Option<ReadyState>,
    /// Ready state of the transaction socket (`None` = slot empty).
    pub transaction: Option<ReadyState>,
    /// Shared reconnect attempt counter.
    pub reconnect_attempts: u32,
    /// Reconnect timers currently armed.
    pub pending_reconnects: usize,
    /// Registered rooms, sorted.
    pub rooms: Vec<String>,
    /// Transaction ids remembered for dedup.
    pub seen_transactions: usize,
}

#[derive(Debug)]
struct Slot {
    handle: TransportHandle,
    /// Set once the actor has processed this socket's `Opened` event.
    opened: bool,
}

impl Slot {
    fn is_ready(&self) -> bool {
        self.opened && self.handle.is_open()
    }
}

#[derive(Debug, Default)]
struct Slots {
    main: Option<Slot>,
    transaction: Option<Slot>,
}

impl Slots {
    const fn get(&self, role: Role) -> Option<&Slot> {
        match role {
            Role::Main => self.main.as_ref(),
            Role::Transaction => self.transaction.as_ref(),
        }
    }

    const fn get_mut(&mut self, role: Role) -> &mut Option<Slot> {
        match role {
            Role::Main => &mut self.main,
            Role::Transaction => &mut self.transaction,
        }
    }

    fn is_full(&self) -> bool {
        self.main.is_some() && self.transaction.is_some()
    }

    fn all_ready(&self) -> bool {
        Role::ALL
            .iter()
            .all(|role| self.get(*role).is_some_and(Slot::is_ready))
    }
}

/// Receiving ends the run loop polls besides the command channel.
#[derive(Debug)]
pub struct ActorInbox {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    timers: mpsc::UnboundedReceiver<u64>,
}

/// Owner of both sockets and all subscription state.
#[derive(Debug)]
pub struct ConnectionManager {
    url: String,
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    slots: Slots,
    next_epoch: u64,
    attempts: u32,
    subscriptions: SubscriptionRegistry,
    router: MessageRouter,
    listeners: EventBus,
    status: StatusBus,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    timer_tx: mpsc::UnboundedSender<u64>,
    timers: Vec<AbortHandle>,
    /// Bumped by `disconnect`; firings tagged with an older value are void.
    timer_generation: u64,
}

impl ConnectionManager {
    /// Creates a manager with empty slots, plus the inbox its run loop polls.
    #[must_use]
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        listeners: EventBus,
        status: StatusBus,
    ) -> (Self, ActorInbox) {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (timer_tx, timers) = mpsc::unbounded_channel();
        let manager = Self {
            url: config.url.clone(),
            transport,
            policy: config.reconnect,
            slots: Slots::default(),
            next_epoch: 0,
            attempts: 0,
            subscriptions: SubscriptionRegistry::new(),
            router: MessageRouter::new(config.dedup_capacity),
            listeners,
            status,
            events_tx,
            timer_tx,
            timers: Vec::new(),
            timer_generation: 0,
        };
        (manager, ActorInbox { events, timers })
    }

    /// Opens a socket for every empty slot. No-op when both are occupied.
    ///
    /// A socket that cannot be constructed is reported and answered with a
    /// single reconnect, exactly like a close.
    pub fn connect(&mut self) {
        if self.slots.is_full() {
            tracing::debug!("both sockets present, connect is a no-op");
            return;
        }

        let mut failed = false;
        for role in Role::ALL {
            if self.slots.get(role).is_some() {
                continue;
            }
            self.next_epoch = self.next_epoch.wrapping_add(1);
            let epoch = self.next_epoch;
            let sink = EventSink::new(role, epoch, self.events_tx.clone());

            match self.transport.open(&self.url, sink) {
                Ok(handle) => {
                    tracing::debug!(%role, epoch, url = %self.url, "opening socket");
                    *self.slots.get_mut(role) = Some(Slot {
                        handle,
                        opened: false,
                    });
                }
                Err(e) => {
                    tracing::warn!(%role, error = %e, "error connecting to socket");
                    self.status.publish(ConnectionEvent::ConnectFailed {
                        role,
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    failed |= e.is_retryable();
                }
            }
        }

        if failed {
            self.schedule_reconnect();
        }
    }

    /// Applies one socket event. Events from a socket that no longer owns
    /// its role's slot are ignored.
    pub fn handle_event(&mut self, event: TransportEvent) {
        let TransportEvent { role, epoch, kind } = event;
        if self.slot_epoch(role) != Some(epoch) {
            tracing::trace!(%role, epoch, "ignoring event from retired socket");
            return;
        }

        match kind {
            TransportEventKind::Opened => self.on_open(role),
            TransportEventKind::Closed => self.on_close(role),
            TransportEventKind::Frame(text) => self.dispatch(role, &text),
            TransportEventKind::Error(reason) => {
                let err = ClientError::Connect(reason);
                tracing::warn!(%role, error = %err, "socket error");
                self.status.publish(ConnectionEvent::ConnectFailed {
                    role,
                    reason: err.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
    }

    fn on_open(&mut self, role: Role) {
        if let Some(slot) = self.slots.get_mut(role) {
            slot.opened = true;
        }
        self.attempts = 0;
        tracing::info!(%role, "connected to {role} socket");
        self.status.publish(ConnectionEvent::Connected {
            role,
            timestamp: Utc::now(),
        });
        self.resubscribe_all();
    }

    fn on_close(&mut self, role: Role) {
        *self.slots.get_mut(role) = None;
        tracing::info!(%role, "disconnected from {role} socket");
        self.status.publish(ConnectionEvent::Disconnected {
            role,
            timestamp: Utc::now(),
        });
        self.schedule_reconnect();
    }

    fn dispatch(&mut self, role: Role, text: &str) {
        match self.router.route(text) {
            Ok(RouteOutcome::Deliver { topics, payload }) => {
                for topic in &topics {
                    self.listeners.emit(topic, &payload);
                }
            }
            Ok(RouteOutcome::Duplicate { tx }) => {
                tracing::trace!(%role, tx, "suppressing duplicate transaction");
            }
            Ok(RouteOutcome::Ignored) => {}
            Err(e) => {
                tracing::warn!(%role, error = %e, "error processing message");
            }
        }
    }

    /// Arms a reconnect timer using the current attempt counter, unless the
    /// policy's attempt ceiling has been reached.
    fn schedule_reconnect(&mut self) {
        self.timers.retain(|t| !t.is_finished());

        if self.policy.exhausted(self.attempts) {
            tracing::error!(attempts = self.attempts, "reconnect attempts exhausted, giving up");
            self.status.publish(ConnectionEvent::ReconnectAbandoned {
                attempts: self.attempts,
                timestamp: Utc::now(),
            });
            return;
        }

        let delay = self.policy.delay_for(self.attempts, &mut rand::rng());
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        tracing::info!(attempt = self.attempts, delay_ms, "reconnecting to socket server");
        self.status.publish(ConnectionEvent::ReconnectScheduled {
            attempt: self.attempts,
            delay_ms,
            timestamp: Utc::now(),
        });

        let due = self.timer_tx.clone();
        let generation = self.timer_generation;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = due.send(generation);
        });
        self.timers.push(task.abort_handle());
    }

    /// Handles a timer firing from the run loop. Firings armed before the
    /// last `disconnect` are dropped, even if already queued.
    pub fn on_timer_fired(&mut self, generation: u64) {
        if generation != self.timer_generation {
            tracing::debug!(generation, "ignoring reconnect armed before disconnect");
            return;
        }
        self.on_reconnect_due();
    }

    /// Counts one reconnect attempt and reopens any empty slot.
    pub fn on_reconnect_due(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
        self.connect();
    }

    /// Registers `room` and joins it now if its socket is ready.
    pub fn join(&mut self, room: &str) {
        self.subscriptions.join(room);
        self.send_control(&ControlFrame::join(room));
    }

    /// Unregisters `room` and leaves it now if its socket is ready.
    pub fn leave(&mut self, room: &str) {
        self.subscriptions.leave(room);
        self.send_control(&ControlFrame::leave(room));
    }

    /// Sends `frame` on the socket its room maps to. Returns `false` when
    /// the socket is absent or not ready; the frame is then left to the
    /// next replay.
    fn send_control(&self, frame: &ControlFrame) -> bool {
        let role = Role::for_topic(&frame.room);
        let Some(slot) = self.slots.get(role).filter(|s| s.is_ready()) else {
            tracing::debug!(%role, room = %frame.room, "socket not ready, deferring");
            return false;
        };
        match frame.to_text().and_then(|text| slot.handle.send(text)) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%role, room = %frame.room, error = %e, "control frame not sent");
                false
            }
        }
    }

    /// Replays a join for every registered room, only when both sockets
    /// are ready.
    fn resubscribe_all(&mut self) {
        if !self.slots.all_ready() {
            tracing::debug!("waiting for both sockets before resubscribing");
            return;
        }

        let rooms = self
            .subscriptions
            .targets()
            .filter(|(_, room)| self.send_control(&ControlFrame::join(*room)))
            .count();
        tracing::debug!(rooms, "resubscribed to rooms");
        self.status.publish(ConnectionEvent::Resubscribed {
            rooms,
            timestamp: Utc::now(),
        });
    }

    /// Closes both sockets, cancels pending reconnects, and clears rooms and
    /// remembered transaction ids.
    pub fn disconnect(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        self.timer_generation = self.timer_generation.wrapping_add(1);
        for role in Role::ALL {
            if let Some(slot) = self.slots.get_mut(role).take() {
                slot.handle.close();
            }
        }
        self.subscriptions.clear();
        self.router.clear();
        tracing::info!("client disconnected");
        self.status.publish(ConnectionEvent::ClientDisconnected {
            timestamp: Utc::now(),
        });
    }

    /// Returns a clone of the main socket handle, if present.
    #[must_use]
    pub fn primary_handle(&self) -> Option<TransportHandle> {
        self.slots.get(Role::Main).map(|s| s.handle.clone())
    }

    /// Returns the epoch of the socket occupying `role`'s slot.
    #[must_use]
    pub fn slot_epoch(&self, role: Role) -> Option<u64> {
        self.slots.get(role).map(|s| s.handle.epoch())
    }

    /// Returns the shared reconnect attempt counter.
    #[must_use]
    pub const fn reconnect_attempts(&self) -> u32 {
        self.attempts
    }

    /// Captures the current state.
    #[must_use]
    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            main: self.slots.get(Role::Main).map(|s| s.handle.ready_state()),
            transaction: self
                .slots
                .get(Role::Transaction)
                .map(|s| s.handle.ready_state()),
            reconnect_attempts: self.attempts,
            pending_reconnects: self.timers.iter().filter(|t| !t.is_finished()).count(),
            rooms: self.subscriptions.rooms(),
            seen_transactions: self.router.seen_count(),
        }
    }

    /// Applies one application command. `Shutdown` is handled by the run
    /// loop.
    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::Join(room) => self.join(&room),
            Command::Leave(room) => self.leave(&room),
            Command::Connect => {
                // A manual connect starts a fresh backoff sequence.
                self.attempts = 0;
                self.connect();
            }
            Command::Disconnect => self.disconnect(),
            Command::PrimaryHandle(reply) => {
                let _ = reply.send(self.primary_handle());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown(reply) => {
                self.disconnect();
                let _ = reply.send(());
            }
        }
    }
}

/// Spawns the run loop for `manager`.
///
/// The loop connects immediately and stops after a `Shutdown` command or
/// once every command sender has been dropped; either way both sockets are
/// closed and pending reconnects cancelled.
pub fn spawn(
    manager: ConnectionManager,
    inbox: ActorInbox,
    commands: mpsc::UnboundedReceiver<Command>,
) -> JoinHandle<()> {
    tokio::spawn(run(manager, inbox, commands))
}

async fn run(
    mut manager: ConnectionManager,
    mut inbox: ActorInbox,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    manager.connect();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Shutdown(reply)) => {
                    manager.disconnect();
                    let _ = reply.send(());
                    break;
                }
                Some(command) => manager.handle_command(command),
                None => {
                    manager.disconnect();
                    break;
                }
            },
            Some(event) = inbox.events.recv() => manager.handle_event(event),
            Some(generation) = inbox.timers.recv() => manager.on_timer_fired(generation),
        }
    }

    tracing::debug!("connection actor stopped");
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::{Value, json};
    use tokio::sync::broadcast;

    use super::*;
    use crate::ws::transport::{HandleLink, Outbound};

    /// In-memory transport: keeps each socket's driver side so tests can
    /// open it, read what was sent, and feed frames.
    #[derive(Debug, Default)]
    struct FakeTransport {
        links: Mutex<HashMap<(Role, u64), HandleLink>>,
        sinks: Mutex<Vec<EventSink>>,
        refuse: AtomicBool,
        opens: AtomicUsize,
    }

    impl Transport for FakeTransport {
        fn open(&self, url: &str, events: EventSink) -> Result<TransportHandle, ClientError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ClientError::InvalidUrl(url.to_string()));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            let (handle, link) = TransportHandle::new(events.role(), events.epoch());
            self.links
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert((events.role(), events.epoch()), link);
            self.sinks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(events);
            Ok(handle)
        }
    }

    struct Harness {
        manager: ConnectionManager,
        inbox: ActorInbox,
        fake: Arc<FakeTransport>,
        listeners: EventBus,
        status: broadcast::Receiver<ConnectionEvent>,
    }

    fn config() -> ClientConfig {
        ClientConfig::new("ws://stream.test/ws").reconnect(ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            jitter_factor: 0.5,
            max_attempts: None,
        })
    }

    fn harness_with(config: &ClientConfig) -> Harness {
        let fake = Arc::new(FakeTransport::default());
        let listeners = EventBus::new();
        let bus = StatusBus::new(64);
        let status = bus.subscribe();
        let transport: Arc<dyn Transport> = Arc::clone(&fake) as Arc<dyn Transport>;
        let (manager, inbox) = ConnectionManager::new(config, transport, listeners.clone(), bus);
        Harness {
            manager,
            inbox,
            fake,
            listeners,
            status,
        }
    }

    fn harness() -> Harness {
        harness_with(&config())
    }

    impl Harness {
        fn epoch(&self, role: Role) -> u64 {
            let Some(epoch) = self.manager.slot_epoch(role) else {
                panic!("no socket in {role} slot");
            };
            epoch
        }

        fn with_link<T>(&self, role: Role, f: impl FnOnce(&mut HandleLink) -> T) -> T {
            let epoch = self.epoch(role);
            let mut links = self
                .fake
                .links
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let Some(link) = links.get_mut(&(role, epoch)) else {
                panic!("no link for {role}/{epoch}");
            };
            f(link)
        }

        fn event(&mut self, role: Role, kind: TransportEventKind) {
            let epoch = self.epoch(role);
            self.manager
                .handle_event(TransportEvent { role, epoch, kind });
        }

        fn open(&mut self, role: Role) {
            self.with_link(role, |link| link.set_state(ReadyState::Open));
            self.event(role, TransportEventKind::Opened);
        }

        fn close(&mut self, role: Role) {
            self.with_link(role, |link| link.set_state(ReadyState::Closed));
            self.event(role, TransportEventKind::Closed);
        }

        fn frame(&mut self, role: Role, text: &str) {
            self.event(role, TransportEventKind::Frame(text.to_string()));
        }

        fn sent(&self, role: Role) -> Vec<String> {
            self.with_link(role, |link| {
                std::iter::from_fn(|| link.try_next_outbound())
                    .map(|out| match out {
                        Outbound::Text(text) => text,
                        Outbound::Close => "<close>".to_string(),
                    })
                    .collect()
            })
        }

        fn statuses(&mut self) -> Vec<ConnectionEvent> {
            std::iter::from_fn(|| self.status.try_recv().ok()).collect()
        }
    }

    fn join_frame(room: &str) -> String {
        format!(r#"{{"type":"join","room":"{room}"}}"#)
    }

    fn counter(bus: &EventBus, topic: &str) -> Arc<Mutex<Vec<Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.on(topic, move |v| {
            sink.lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(v.clone());
        });
        seen
    }

    fn received(seen: &Arc<Mutex<Vec<Value>>>) -> Vec<Value> {
        seen.lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    #[tokio::test]
    async fn connect_opens_one_socket_per_role_and_is_idempotent() {
        let mut h = harness();
        h.manager.connect();
        assert_eq!(h.fake.opens.load(Ordering::SeqCst), 2);
        assert_ne!(h.epoch(Role::Main), h.epoch(Role::Transaction));

        h.manager.connect();
        assert_eq!(h.fake.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rooms_joined_early_are_replayed_once_when_both_ready() {
        let mut h = harness();
        h.manager.connect();
        h.manager.join("latest");
        h.manager.join("transaction:abc");
        assert!(h.sent(Role::Main).is_empty());

        h.open(Role::Main);
        assert!(h.sent(Role::Main).is_empty(), "partial readiness must not replay");
        assert!(h.sent(Role::Transaction).is_empty());

        h.open(Role::Transaction);
        assert_eq!(h.sent(Role::Main), vec![join_frame("latest")]);
        assert_eq!(
            h.sent(Role::Transaction),
            vec![join_frame("transaction:abc")]
        );
        assert!(h.statuses().iter().any(|e| matches!(
            e,
            ConnectionEvent::Resubscribed { rooms: 2, .. }
        )));
    }

    #[tokio::test]
    async fn join_and_leave_send_immediately_when_open() {
        let mut h = harness();
        h.manager.connect();
        h.open(Role::Main);
        h.open(Role::Transaction);

        h.manager.join("latest");
        assert_eq!(h.sent(Role::Main), vec![join_frame("latest")]);

        h.manager.leave("latest");
        assert_eq!(
            h.sent(Role::Main),
            vec![r#"{"type":"leave","room":"latest"}"#.to_string()]
        );
        assert!(h.manager.snapshot().rooms.is_empty());
    }

    #[tokio::test]
    async fn join_on_open_socket_works_before_other_is_ready() {
        let mut h = harness();
        h.manager.connect();
        h.open(Role::Main);

        h.manager.join("latest");
        h.manager.join("transaction:abc");
        assert_eq!(h.sent(Role::Main), vec![join_frame("latest")]);
        assert!(h.sent(Role::Transaction).is_empty());
    }

    #[tokio::test]
    async fn main_close_defers_replay_until_main_reopens() {
        let mut h = harness();
        h.manager.connect();
        h.manager.join("latest");
        h.manager.join("transaction:abc");
        h.open(Role::Main);
        h.open(Role::Transaction);
        h.sent(Role::Main);
        h.sent(Role::Transaction);

        h.close(Role::Main);
        assert!(h.manager.slot_epoch(Role::Main).is_none());
        assert!(h.sent(Role::Transaction).is_empty());

        h.manager.on_reconnect_due();
        // Only the empty slot is refilled.
        assert_eq!(h.fake.opens.load(Ordering::SeqCst), 3);
        assert!(h.sent(Role::Transaction).is_empty());

        h.open(Role::Main);
        assert_eq!(h.sent(Role::Main), vec![join_frame("latest")]);
        assert_eq!(
            h.sent(Role::Transaction),
            vec![join_frame("transaction:abc")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_arms_timer_that_reconnects() {
        let mut h = harness();
        h.manager.connect();
        h.open(Role::Main);
        h.open(Role::Transaction);
        h.statuses();

        h.close(Role::Transaction);
        let events = h.statuses();
        let Some(delay_ms) = events.iter().find_map(|e| match e {
            ConnectionEvent::ReconnectScheduled {
                attempt: 0,
                delay_ms,
                ..
            } => Some(*delay_ms),
            _ => None,
        }) else {
            panic!("expected a scheduled reconnect, got {events:?}");
        };
        assert!((100..=150).contains(&delay_ms), "delay {delay_ms}");
        assert_eq!(h.manager.snapshot().pending_reconnects, 1);

        let Some(generation) = h.inbox.timers.recv().await else {
            panic!("timer never fired");
        };
        h.manager.on_timer_fired(generation);
        assert_eq!(h.manager.reconnect_attempts(), 1);
        assert!(h.manager.slot_epoch(Role::Transaction).is_some());
    }

    #[tokio::test]
    async fn backoff_grows_across_failures_and_resets_on_open() {
        let mut h = harness();
        h.manager.connect();

        let mut scheduled = Vec::new();
        for _ in 0..4 {
            h.close(Role::Main);
            for e in h.statuses() {
                if let ConnectionEvent::ReconnectScheduled {
                    attempt, delay_ms, ..
                } = e
                {
                    scheduled.push((attempt, delay_ms));
                }
            }
            h.manager.on_reconnect_due();
        }
        let attempts: Vec<u32> = scheduled.iter().map(|(a, _)| *a).collect();
        assert_eq!(attempts, vec![0, 1, 2, 3]);
        for ((attempt, delay_ms), floor) in scheduled.iter().zip([100u64, 200, 400, 400]) {
            assert!(
                *delay_ms >= floor && *delay_ms <= floor + floor / 2,
                "attempt {attempt}: {delay_ms}ms outside [{floor}, {}]",
                floor + floor / 2
            );
        }

        h.open(Role::Main);
        assert_eq!(h.manager.reconnect_attempts(), 0);
        h.statuses();
        h.close(Role::Main);
        assert!(h.statuses().iter().any(|e| matches!(
            e,
            ConnectionEvent::ReconnectScheduled { attempt: 0, .. }
        )));
    }

    #[tokio::test]
    async fn duplicate_transactions_are_delivered_once_across_sockets() {
        let mut h = harness();
        h.manager.connect();
        h.open(Role::Main);
        h.open(Role::Transaction);
        let seen = counter(&h.listeners, "transaction:abc");

        let raw = r#"{"type":"message","room":"transaction:abc","data":{"tx":"abc","n":1}}"#;
        h.frame(Role::Transaction, raw);
        h.frame(
            Role::Main,
            r#"{"type":"message","room":"transaction:abc","data":{"tx":"abc","n":2}}"#,
        );
        h.frame(Role::Transaction, raw);

        assert_eq!(received(&seen), vec![json!({"tx": "abc", "n": 1})]);
        assert_eq!(h.manager.snapshot().seen_transactions, 1);
    }

    #[tokio::test]
    async fn latest_room_scenario() {
        let mut h = harness();
        h.manager.connect();
        h.manager.join("latest");
        h.open(Role::Main);
        h.open(Role::Transaction);
        let seen = counter(&h.listeners, "latest");

        h.frame(
            Role::Main,
            r#"{"type":"message","room":"latest","data":{"value":1}}"#,
        );
        assert_eq!(received(&seen), vec![json!({"value": 1})]);
    }

    #[tokio::test]
    async fn price_frame_fans_out_to_token_topic() {
        let mut h = harness();
        h.manager.connect();
        h.open(Role::Main);
        let primary = counter(&h.listeners, "price:So111");
        let by_token = counter(&h.listeners, "price-by-token:So111");

        h.frame(
            Role::Main,
            r#"{"type":"message","room":"price:So111","data":{"token":"So111","price":3}}"#,
        );
        assert_eq!(received(&primary).len(), 1);
        assert_eq!(received(&by_token).len(), 1);

        h.frame(
            Role::Main,
            r#"{"type":"message","room":"latest","data":{"token":"So111"}}"#,
        );
        assert_eq!(received(&by_token).len(), 1);
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_without_side_effects() {
        let mut h = harness();
        h.manager.connect();
        h.open(Role::Main);
        let seen = counter(&h.listeners, "latest");

        h.frame(Role::Main, "{broken");
        h.frame(
            Role::Main,
            r#"{"type":"message","room":"latest","data":{"value":2}}"#,
        );
        assert_eq!(received(&seen), vec![json!({"value": 2})]);
        assert!(h.manager.slot_epoch(Role::Main).is_some());
    }

    #[tokio::test]
    async fn disconnect_clears_state_and_cancels_reconnects() {
        let mut h = harness();
        h.manager.connect();
        h.manager.join("latest");
        h.open(Role::Main);
        h.open(Role::Transaction);
        h.frame(
            Role::Main,
            r#"{"type":"message","room":"latest","data":{"tx":"t1"}}"#,
        );
        let main_epoch = h.epoch(Role::Main);
        h.close(Role::Transaction);
        assert_eq!(h.manager.snapshot().pending_reconnects, 1);

        h.manager.disconnect();
        let snap = h.manager.snapshot();
        assert_eq!(snap.main, None);
        assert_eq!(snap.transaction, None);
        assert!(snap.rooms.is_empty());
        assert_eq!(snap.seen_transactions, 0);
        assert_eq!(snap.pending_reconnects, 0);
        assert!(h.manager.primary_handle().is_none());

        // The retired main socket reporting its close must not reconnect.
        h.statuses();
        h.manager.handle_event(TransportEvent {
            role: Role::Main,
            epoch: main_epoch,
            kind: TransportEventKind::Closed,
        });
        assert!(h.statuses().is_empty());

        // Join with no sockets is latent.
        h.manager.join("latest");
        assert_eq!(h.manager.snapshot().rooms, vec!["latest"]);
        assert_eq!(h.fake.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disconnect_closes_live_sockets() {
        let mut h = harness();
        h.manager.connect();
        h.open(Role::Main);
        let main_epoch = h.epoch(Role::Main);

        h.manager.disconnect();
        let links = h
            .fake
            .links
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(link) = links.get(&(Role::Main, main_epoch)) else {
            panic!("main link missing");
        };
        assert_eq!(link.ready_state(), ReadyState::Closing);
    }

    #[tokio::test]
    async fn construction_failure_schedules_single_reconnect() {
        let mut h = harness();
        h.fake.refuse.store(true, Ordering::SeqCst);
        h.manager.connect();

        let events = h.statuses();
        let failures = events
            .iter()
            .filter(|e| matches!(e, ConnectionEvent::ConnectFailed { .. }))
            .count();
        let scheduled = events
            .iter()
            .filter(|e| matches!(e, ConnectionEvent::ReconnectScheduled { .. }))
            .count();
        assert_eq!(failures, 2);
        assert_eq!(scheduled, 1);
        assert!(h.manager.slot_epoch(Role::Main).is_none());

        h.fake.refuse.store(false, Ordering::SeqCst);
        h.manager.on_reconnect_due();
        assert!(h.manager.slot_epoch(Role::Main).is_some());
        assert!(h.manager.slot_epoch(Role::Transaction).is_some());
    }

    #[tokio::test]
    async fn attempt_ceiling_abandons_reconnect() {
        let mut h = harness_with(&config().max_reconnect_attempts(Some(2)));
        h.fake.refuse.store(true, Ordering::SeqCst);
        h.manager.connect();
        h.manager.on_reconnect_due();
        h.manager.on_reconnect_due();

        let events = h.statuses();
        assert!(events.iter().any(|e| matches!(
            e,
            ConnectionEvent::ReconnectAbandoned { attempts: 2, .. }
        )));
        let scheduled = events
            .iter()
            .filter(|e| matches!(e, ConnectionEvent::ReconnectScheduled { .. }))
            .count();
        assert_eq!(scheduled, 2);
    }

    #[tokio::test]
    async fn socket_error_is_reported_without_reconnect() {
        let mut h = harness();
        h.manager.connect();
        h.statuses();

        h.event(Role::Main, TransportEventKind::Error("reset".to_string()));
        let events = h.statuses();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events.first(),
            Some(ConnectionEvent::ConnectFailed {
                role: Role::Main,
                ..
            })
        ));
        assert!(h.manager.slot_epoch(Role::Main).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_voids_reconnect_already_queued() {
        let mut h = harness();
        h.manager.connect();
        h.open(Role::Main);
        h.open(Role::Transaction);
        h.close(Role::Main);

        // Let the timer fire so its firing sits in the inbox.
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.manager.disconnect();
        let Ok(generation) = h.inbox.timers.try_recv() else {
            panic!("expected a queued timer firing");
        };
        let opens = h.fake.opens.load(Ordering::SeqCst);

        h.manager.on_timer_fired(generation);
        assert_eq!(h.fake.opens.load(Ordering::SeqCst), opens);
        assert_eq!(h.manager.reconnect_attempts(), 0);
        let snap = h.manager.snapshot();
        assert_eq!(snap.main, None);
        assert_eq!(snap.transaction, None);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_armed_after_reconnecting_still_fire() {
        let mut h = harness();
        h.manager.connect();
        h.manager.disconnect();
        h.manager.handle_command(Command::Connect);
        h.close(Role::Main);

        let Some(generation) = h.inbox.timers.recv().await else {
            panic!("timer never fired");
        };
        h.manager.on_timer_fired(generation);
        assert_eq!(h.manager.reconnect_attempts(), 1);
        assert!(h.manager.slot_epoch(Role::Main).is_some());
    }

    #[tokio::test]
    async fn manual_connect_after_giving_up_resets_attempts() {
        let mut h = harness_with(&config().max_reconnect_attempts(Some(1)));
        h.fake.refuse.store(true, Ordering::SeqCst);
        h.manager.connect();
        h.manager.on_reconnect_due();
        assert!(h.statuses().iter().any(|e| matches!(
            e,
            ConnectionEvent::ReconnectAbandoned { attempts: 1, .. }
        )));

        h.manager.handle_command(Command::Connect);
        assert_eq!(h.manager.reconnect_attempts(), 0);
        let events = h.statuses();
        assert!(
            events.iter().any(|e| matches!(
                e,
                ConnectionEvent::ReconnectScheduled { attempt: 0, .. }
            )),
            "expected a fresh reconnect, got {events:?}"
        );
    }

    #[tokio::test]
    async fn primary_handle_is_main_socket() {
        let mut h = harness();
        assert!(h.manager.primary_handle().is_none());
        h.manager.connect();
        let Some(handle) = h.manager.primary_handle() else {
            panic!("expected main handle");
        };
        assert_eq!(handle.role(), Role::Main);
        assert_eq!(handle.epoch(), h.epoch(Role::Main));
    }

    #[tokio::test]
    async fn run_loop_connects_and_stops_on_shutdown() {
        let fake = Arc::new(FakeTransport::default());
        let transport: Arc<dyn Transport> = Arc::clone(&fake) as Arc<dyn Transport>;
        let (manager, inbox) =
            ConnectionManager::new(&config(), transport, EventBus::new(), StatusBus::new(8));
        let (tx, rx) = mpsc::unbounded_channel();
        let task = spawn(manager, inbox, rx);

        let (snap_tx, snap_rx) = oneshot::channel();
        assert!(tx.send(Command::Snapshot(snap_tx)).is_ok());
        let Ok(snap) = snap_rx.await else {
            panic!("actor did not answer");
        };
        assert_eq!(snap.main, Some(ReadyState::Connecting));
        assert_eq!(snap.transaction, Some(ReadyState::Connecting));

        let (done_tx, done_rx) = oneshot::channel();
        assert!(tx.send(Command::Shutdown(done_tx)).is_ok());
        assert!(done_rx.await.is_ok());
        assert!(task.await.is_ok());
    }
}
