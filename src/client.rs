//! `PresenceClient` – the synchronization core.
//!
//! ## Usage
//!
//! ```no_run
//! use world_presence::{MovementFlags, PresenceClient, PresenceConfig, Vec3};
//!
//! # async fn run() {
//! let client = PresenceClient::new(PresenceConfig::socket("ws://localhost:8080/presence"));
//!
//! let _players = client.on_players_update(|snapshot| {
//!     println!("{} players nearby", snapshot.len());
//! });
//!
//! if !client.connect().await {
//!     // single-player mode
//! }
//!
//! // Every simulation tick:
//! client.broadcast_position(Vec3::new(1.0, 0.0, 2.0), 0.5, MovementFlags::new(true, false));
//!
//! client.disconnect();
//! # }
//! ```
//!
//! ## Timers
//!
//! | Timer              | Period          | Effect                                   |
//! |--------------------|-----------------|------------------------------------------|
//! | heartbeat          | 30 s            | bare `player_update`, keeps link open    |
//! | broadcast fallback | 1 s             | resend local state if it changed unsent  |
//! | eviction (per id)  | inactivity      | drop peers that went silent              |
//!
//! All table mutation happens under one mutex. Callbacks run after it is
//! released, so they may call back into the client.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use rand::Rng;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::PresenceConfig;
use crate::consumer::SpatialAudioSink;
use crate::error::{PresenceError, Result};
use crate::protocol::{now_ms, Message, MessageType};
use crate::roster::{PlayerSnapshot, Roster, Staleness, Upsert};
use crate::transport::{self, EventReceiver, Link, LinkContext, Transport, TransportEvent};
use crate::types::{ActionKind, MovementFlags, PlayerAction, PlayerState, Vec3, Zone};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(1);
/// Minimum planar movement (world units) worth telling peers about.
pub const BROADCAST_EPSILON: f32 = 0.05;

// ---------------------------------------------------------------------------
// Subscribers
// ---------------------------------------------------------------------------

type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;
type ConnectionCallback = Arc<dyn Fn(bool) + Send + Sync>;
type PlayersCallback = Arc<dyn Fn(&PlayerSnapshot) + Send + Sync>;
type ActionCallback = Arc<dyn Fn(&str, &PlayerAction) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Message,
    Connection,
    Players,
    Action,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    message: Vec<(u64, MessageCallback)>,
    connection: Vec<(u64, ConnectionCallback)>,
    players: Vec<(u64, PlayersCallback)>,
    action: Vec<(u64, ActionCallback)>,
}

impl Subscribers {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove(&mut self, channel: Channel, id: u64) {
        match channel {
            Channel::Message => self.message.retain(|(i, _)| *i != id),
            Channel::Connection => self.connection.retain(|(i, _)| *i != id),
            Channel::Players => self.players.retain(|(i, _)| *i != id),
            Channel::Action => self.action.retain(|(i, _)| *i != id),
        }
    }
}

/// Registration handle returned by the `on_*` methods.
///
/// Dropping it keeps the callback registered; call [`unsubscribe`] to stop.
///
/// [`unsubscribe`]: Subscription::unsubscribe
pub struct Subscription {
    id: u64,
    channel: Channel,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(subs) = self.subscribers.upgrade() {
            subs.lock().remove(self.channel, self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Client state
// ---------------------------------------------------------------------------

struct ClientState {
    roster: Roster,
    connected: bool,
    link: Option<Box<dyn Link>>,
    pump: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    broadcaster: Option<JoinHandle<()>>,
    eviction: HashMap<String, JoinHandle<()>>,
    /// Latest observed local state.
    local: PlayerState,
    /// Position of the last state actually sent.
    baseline: Vec3,
    /// Last full state actually sent.
    last_sent: Option<PlayerState>,
    /// Local state changed since the last send.
    pending: bool,
    /// The host has supplied local state at least once.
    observed: bool,
}

impl ClientState {
    fn stop_timers(&mut self) {
        if let Some(h) = self.heartbeat.take() {
            h.abort();
        }
        if let Some(h) = self.broadcaster.take() {
            h.abort();
        }
    }

    fn stop_evictions(&mut self) {
        for (_, h) in self.eviction.drain() {
            h.abort();
        }
    }

    fn mark_local_changed(&mut self) {
        self.observed = true;
        self.refresh_pending();
    }

    /// Position is excluded: movement goes out only through the
    /// threshold check in `broadcast_position`.
    fn refresh_pending(&mut self) {
        let reference = match &self.last_sent {
            Some(sent) => sent.clone(),
            None => PlayerState::new(self.local.id.clone(), self.local.display_name.clone()),
        };
        let mut candidate = self.local.clone();
        candidate.position = reference.position;
        self.pending = !reference.same_presence(&candidate);
    }

    /// Stamp and record the local state as sent; returns the envelope.
    fn take_update(&mut self) -> Message {
        self.local.last_update = now_ms();
        self.baseline = self.local.position;
        self.last_sent = Some(self.local.clone());
        self.pending = false;
        Message::update(self.local.clone())
    }
}

impl Drop for ClientState {
    fn drop(&mut self) {
        self.stop_timers();
        self.stop_evictions();
        if let Some(h) = self.pump.take() {
            h.abort();
        }
    }
}

struct Inner {
    config: PresenceConfig,
    local_id: String,
    transport: Option<Box<dyn Transport>>,
    disabled_reason: String,
    state: Mutex<ClientState>,
    subscribers: Arc<Mutex<Subscribers>>,
    audio: Mutex<Option<Arc<dyn SpatialAudioSink>>>,
    /// Runtime timers are spawned on; captured at construction or connect.
    runtime: Mutex<Option<Handle>>,
}

// ---------------------------------------------------------------------------
// PresenceClient
// ---------------------------------------------------------------------------

/// Presence synchronization client. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PresenceClient {
    inner: Arc<Inner>,
}

impl PresenceClient {
    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Build a client using the provider named in `config`.
    ///
    /// A config without the provider's address or credentials still yields a
    /// working client; `connect` will return `false`.
    pub fn new(config: PresenceConfig) -> Self {
        match transport::from_config(&config) {
            Ok(t) => Self::build(config, Some(t), String::new()),
            Err(e) => Self::build(config, None, e.to_string()),
        }
    }

    /// Build a client over an explicit transport.
    pub fn with_transport(config: PresenceConfig, transport: impl Transport + 'static) -> Self {
        Self::build(config, Some(Box::new(transport)), String::new())
    }

    fn build(
        config: PresenceConfig,
        transport: Option<Box<dyn Transport>>,
        disabled_reason: String,
    ) -> Self {
        let local_id = generate_local_id();
        let local = PlayerState::new(local_id.clone(), config.display_name.clone());
        let state = ClientState {
            roster: Roster::new(local_id.clone()),
            connected: false,
            link: None,
            pump: None,
            heartbeat: None,
            broadcaster: None,
            eviction: HashMap::new(),
            local,
            baseline: Vec3::zero(),
            last_sent: None,
            pending: false,
            observed: false,
        };

        Self {
            inner: Arc::new(Inner {
                config,
                local_id,
                transport,
                disabled_reason,
                state: Mutex::new(state),
                subscribers: Arc::new(Mutex::new(Subscribers::default())),
                audio: Mutex::new(None),
                runtime: Mutex::new(Handle::try_current().ok()),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn local_id(&self) -> &str {
        &self.inner.local_id
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    /// Copy of the remote player table.
    pub fn players(&self) -> PlayerSnapshot {
        self.inner.state.lock().roster.snapshot()
    }

    pub fn player(&self, id: &str) -> Option<PlayerState> {
        self.inner.state.lock().roster.get(id).cloned()
    }

    pub fn player_count(&self) -> usize {
        self.inner.state.lock().roster.len()
    }

    /// Latest observed local state (not necessarily sent yet).
    pub fn local_state(&self) -> PlayerState {
        self.inner.state.lock().local.clone()
    }

    // -----------------------------------------------------------------------
    // Connection
    // -----------------------------------------------------------------------

    /// Connect through the configured provider.
    ///
    /// `false` means multiplayer is unavailable (disabled or unreachable);
    /// the host should carry on in single-player mode.
    pub async fn connect(&self) -> bool {
        match self.try_connect().await {
            Ok(()) => true,
            Err(PresenceError::Disabled(reason)) => {
                info!("Multiplayer disabled: {}", reason);
                false
            }
            Err(e) => {
                warn!("Multiplayer unavailable: {}", e);
                false
            }
        }
    }

    /// As [`connect`](Self::connect), but reports why it failed.
    pub async fn try_connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let transport = self
            .inner
            .transport
            .as_ref()
            .ok_or_else(|| PresenceError::Disabled(self.inner.disabled_reason.clone()))?;

        let (events, rx) = mpsc::unbounded_channel();
        let ctx = LinkContext {
            local_id: self.inner.local_id.clone(),
            events,
        };
        let link = transport.open(ctx).await?;
        let runtime = Handle::current();
        *self.inner.runtime.lock() = Some(runtime.clone());

        info!(
            "Presence connected via {} as '{}'",
            transport.name(),
            self.inner.local_id
        );

        {
            let mut st = self.inner.state.lock();
            if let Some(old) = st.link.replace(link) {
                old.close();
            }
            if let Some(old) = st.pump.take() {
                old.abort();
            }
            st.pump = Some(spawn_pump(&runtime, &self.inner, rx));
        }
        self.inner.connection_up();
        Ok(())
    }

    /// Leave: say goodbye, close the transport, stop every timer, forget all
    /// peers. Safe to call at any time, including before `connect`.
    pub fn disconnect(&self) {
        let (was_connected, link) = {
            let mut st = self.inner.state.lock();
            let was_connected = st.connected;
            let link = st.link.take();

            if let (true, Some(link)) = (was_connected, &link) {
                let goodbye = Message::action(
                    self.inner.local_id.clone(),
                    PlayerAction::new(ActionKind::Disconnect, None),
                );
                match goodbye.encode() {
                    Ok(frame) => {
                        if let Err(e) = link.send(Bytes::from(frame)) {
                            debug!("Goodbye not sent: {}", e);
                        }
                    }
                    Err(e) => debug!("Goodbye not encoded: {}", e),
                }
            }

            st.connected = false;
            st.stop_timers();
            st.stop_evictions();
            if let Some(pump) = st.pump.take() {
                pump.abort();
            }
            st.roster.clear();
            st.baseline = Vec3::zero();
            st.last_sent = None;
            st.refresh_pending();

            (was_connected, link)
        };

        if let Some(link) = link {
            link.close();
        }
        if was_connected {
            info!("Presence disconnected");
            self.inner.notify_connection(false);
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Report the local player's latest pose. Call every simulation tick.
    ///
    /// Sends only when connected and the planar position moved at least
    /// [`BROADCAST_EPSILON`] on either axis since the last *sent* position.
    /// Returns whether an update went out.
    pub fn broadcast_position(
        &self,
        position: Vec3,
        orientation: f32,
        movement: MovementFlags,
    ) -> bool {
        let msg = {
            let mut st = self.inner.state.lock();
            if !st.connected {
                return false;
            }
            st.local.position = position;
            st.local.orientation = orientation;
            st.local.movement = movement;
            st.mark_local_changed();

            let (dx, dz) = position.planar_delta(&st.baseline);
            if dx < BROADCAST_EPSILON && dz < BROADCAST_EPSILON {
                return false;
            }
            st.take_update()
        };
        self.inner.send(&msg)
    }

    /// Move the local player to another zone. Goes out on the next
    /// broadcast.
    pub fn set_zone(&self, zone: Zone) {
        let mut st = self.inner.state.lock();
        st.local.zone = zone;
        st.mark_local_changed();
    }

    /// Set or clear the local emote tag. Goes out on the next broadcast.
    pub fn set_emote(&self, emote: Option<String>) {
        let mut st = self.inner.state.lock();
        st.local.emote = emote;
        st.mark_local_changed();
    }

    /// Send a discrete action to every peer. `false` when not connected.
    pub fn send_action(&self, kind: ActionKind, data: Option<serde_json::Value>) -> bool {
        if !self.is_connected() {
            return false;
        }
        let msg = Message::action(self.inner.local_id.clone(), PlayerAction::new(kind, data));
        self.inner.send(&msg)
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Message-dispatch entry point. Transports call this through the pump;
    /// hosts may call it directly.
    pub fn handle_message(&self, msg: Message) {
        self.inner.dispatch(msg);
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Every accepted inbound envelope.
    pub fn on_message(&self, cb: impl Fn(&Message) + Send + Sync + 'static) -> Subscription {
        let mut subs = self.inner.subscribers.lock();
        let id = subs.next();
        subs.message.push((id, Arc::new(cb)));
        self.subscription(id, Channel::Message)
    }

    /// `true` when the link comes up, `false` when it drops or is closed.
    pub fn on_connection_change(
        &self,
        cb: impl Fn(bool) + Send + Sync + 'static,
    ) -> Subscription {
        let mut subs = self.inner.subscribers.lock();
        let id = subs.next();
        subs.connection.push((id, Arc::new(cb)));
        self.subscription(id, Channel::Connection)
    }

    /// A fresh copy of the table after every change.
    pub fn on_players_update(
        &self,
        cb: impl Fn(&PlayerSnapshot) + Send + Sync + 'static,
    ) -> Subscription {
        let mut subs = self.inner.subscribers.lock();
        let id = subs.next();
        subs.players.push((id, Arc::new(cb)));
        self.subscription(id, Channel::Players)
    }

    /// Remote actions with the sender's id. Delivered once, never stored.
    pub fn on_action(
        &self,
        cb: impl Fn(&str, &PlayerAction) + Send + Sync + 'static,
    ) -> Subscription {
        let mut subs = self.inner.subscribers.lock();
        let id = subs.next();
        subs.action.push((id, Arc::new(cb)));
        self.subscription(id, Channel::Action)
    }

    fn subscription(&self, id: u64, channel: Channel) -> Subscription {
        Subscription {
            id,
            channel,
            subscribers: Arc::downgrade(&self.inner.subscribers),
        }
    }

    // -----------------------------------------------------------------------
    // Spatial audio forwarding
    // -----------------------------------------------------------------------

    pub fn set_audio_sink(&self, sink: Option<Arc<dyn SpatialAudioSink>>) {
        *self.inner.audio.lock() = sink;
    }

    pub fn update_player_position(&self, id: &str, position: Vec3) {
        if let Some(sink) = self.inner.audio.lock().clone() {
            sink.update_player_position(id, position);
        }
    }

    pub fn update_listener_position(&self, position: Vec3, rotation: f32) {
        if let Some(sink) = self.inner.audio.lock().clone() {
            sink.update_listener_position(position, rotation);
        }
    }
}

// ---------------------------------------------------------------------------
// Core behaviour
// ---------------------------------------------------------------------------

impl Inner {
    fn send(&self, msg: &Message) -> bool {
        let frame = match msg.encode() {
            Ok(f) => Bytes::from(f),
            Err(e) => {
                warn!("Failed to encode {}: {}", msg.kind, e);
                return false;
            }
        };
        let st = self.state.lock();
        match &st.link {
            Some(link) => match link.send(frame) {
                Ok(()) => true,
                Err(e) => {
                    debug!("Dropped outbound {}: {}", msg.kind, e);
                    false
                }
            },
            None => false,
        }
    }

    fn dispatch(self: &Arc<Self>, msg: Message) {
        if msg.player_id == self.local_id {
            trace!("Ignoring own {}", msg.kind);
            return;
        }

        match msg.kind {
            MessageType::PlayerUpdate | MessageType::PlayerJoin | MessageType::SyncResponse => {
                match msg.state() {
                    Some(state) if state.id == self.local_id => {
                        trace!("Ignoring echo of own state");
                    }
                    Some(state) => {
                        let snapshot = {
                            let mut st = self.state.lock();
                            if st.roster.upsert(state.clone(), now_ms()) == Upsert::Inserted {
                                debug!("Player '{}' appeared", state.id);
                            }
                            self.arm_eviction(&mut st, &state.id);
                            st.roster.snapshot()
                        };
                        self.notify_message(&msg);
                        self.notify_players(&snapshot);
                    }
                    None => {
                        // Heartbeat: liveness only.
                        {
                            let mut st = self.state.lock();
                            if st.roster.touch(&msg.player_id, now_ms()) {
                                self.arm_eviction(&mut st, &msg.player_id);
                            }
                        }
                        self.notify_message(&msg);
                    }
                }
            }

            MessageType::PlayerAction => {
                self.notify_message(&msg);
                if let Some(action) = msg.player_action() {
                    self.notify_action(&msg.player_id, action);
                }
            }

            MessageType::PlayerLeave => {
                self.notify_message(&msg);
                if let Some(snapshot) = self.remove_player(&msg.player_id) {
                    debug!("Player '{}' left", msg.player_id);
                    self.notify_players(&snapshot);
                }
            }

            MessageType::SyncRequest => {
                self.notify_message(&msg);
                let reply = {
                    let st = self.state.lock();
                    (st.connected && st.observed)
                        .then(|| Message::sync_response(self.local_id.clone(), st.local.clone()))
                };
                if let Some(reply) = reply {
                    self.send(&reply);
                }
            }
        }
    }

    /// Idempotent removal shared by `player_leave` and eviction. Returns the
    /// new snapshot only when something was actually removed.
    fn remove_player(&self, id: &str) -> Option<PlayerSnapshot> {
        let mut st = self.state.lock();
        let removed = st.roster.remove(id)?;
        if let Some(h) = st.eviction.remove(&removed.id) {
            h.abort();
        }
        Some(st.roster.snapshot())
    }

    /// (Re)start the inactivity timer for `id` with the configured timeout.
    fn arm_eviction(self: &Arc<Self>, st: &mut ClientState, id: &str) {
        if let Some(old) = st.eviction.remove(id) {
            old.abort();
        }
        let Some(runtime) = self.runtime() else {
            debug!("No runtime; '{}' will not be evicted for inactivity", id);
            return;
        };
        let handle = spawn_eviction(
            &runtime,
            Arc::downgrade(self),
            id.to_string(),
            self.config.inactivity_timeout(),
        );
        st.eviction.insert(id.to_string(), handle);
    }

    fn runtime(&self) -> Option<Handle> {
        let stored = self.runtime.lock().clone();
        stored.or_else(|| Handle::try_current().ok())
    }

    /// Eviction timer fired. Returns how much longer to wait if the player
    /// was heard from in the meantime.
    fn evict_if_stale(&self, id: &str) -> Option<Duration> {
        let snapshot = {
            let mut st = self.state.lock();
            match st.roster.evict_if_stale(id, self.config.inactivity_timeout()) {
                Staleness::Fresh(remaining) => return Some(remaining),
                Staleness::Missing => {
                    st.eviction.remove(id);
                    return None;
                }
                Staleness::Evicted(_) => {
                    st.eviction.remove(id);
                    st.roster.snapshot()
                }
            }
        };
        info!("Evicted silent player '{}'", id);
        self.notify_players(&snapshot);
        None
    }

    fn connection_up(self: &Arc<Self>) {
        let changed = {
            let mut st = self.state.lock();
            let changed = !st.connected;
            st.connected = true;
            match self.runtime() {
                Some(runtime) => {
                    if st.heartbeat.is_none() {
                        st.heartbeat = Some(spawn_heartbeat(&runtime, Arc::downgrade(self)));
                    }
                    if st.broadcaster.is_none() {
                        st.broadcaster = Some(spawn_broadcaster(&runtime, Arc::downgrade(self)));
                    }
                }
                None => warn!("No runtime; heartbeat and broadcast timers not started"),
            }
            changed
        };
        if changed {
            self.notify_connection(true);
        }
    }

    fn connection_lost(&self, reason: &str) {
        let changed = {
            let mut st = self.state.lock();
            let changed = st.connected;
            st.connected = false;
            st.stop_timers();
            changed
        };
        if changed {
            warn!("Presence connection lost: {}", reason);
            self.notify_connection(false);
        }
    }

    fn heartbeat(&self) {
        self.send(&Message::heartbeat(self.local_id.clone()));
    }

    /// Fallback tick: push local state that changed but was never sent.
    fn flush_pending(&self) {
        let msg = {
            let mut st = self.state.lock();
            if !st.connected || !st.pending {
                return;
            }
            st.take_update()
        };
        self.send(&msg);
    }

    // -----------------------------------------------------------------------
    // Notification (never under the state lock)
    // -----------------------------------------------------------------------

    fn notify_message(&self, msg: &Message) {
        let cbs: Vec<_> = self
            .subscribers
            .lock()
            .message
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in cbs {
            cb(msg);
        }
    }

    fn notify_connection(&self, connected: bool) {
        let cbs: Vec<_> = self
            .subscribers
            .lock()
            .connection
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in cbs {
            cb(connected);
        }
    }

    fn notify_players(&self, snapshot: &PlayerSnapshot) {
        let cbs: Vec<_> = self
            .subscribers
            .lock()
            .players
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in cbs {
            cb(snapshot);
        }
    }

    fn notify_action(&self, player_id: &str, action: &PlayerAction) {
        let cbs: Vec<_> = self
            .subscribers
            .lock()
            .action
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in cbs {
            cb(player_id, action);
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Drain provider events into the client. Holds only a weak reference.
fn spawn_pump(runtime: &Handle, inner: &Arc<Inner>, mut rx: EventReceiver) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    let span = tracing::debug_span!("presence_pump", local_id = %inner.local_id);
    runtime.spawn(
        async move {
            while let Some(event) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                match event {
                    TransportEvent::Inbound(msg) => inner.dispatch(msg),
                    TransportEvent::Lost { reason } => inner.connection_lost(&reason),
                    TransportEvent::Restored => inner.connection_up(),
                }
            }
            trace!("Event pump finished");
        }
        .instrument(span),
    )
}

fn spawn_heartbeat(runtime: &Handle, weak: Weak<Inner>) -> JoinHandle<()> {
    runtime.spawn(async move {
        let start = tokio::time::Instant::now() + HEARTBEAT_INTERVAL;
        let mut ticker = tokio::time::interval_at(start, HEARTBEAT_INTERVAL);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            inner.heartbeat();
        }
    })
}

fn spawn_broadcaster(runtime: &Handle, weak: Weak<Inner>) -> JoinHandle<()> {
    runtime.spawn(async move {
        let start = tokio::time::Instant::now() + BROADCAST_INTERVAL;
        let mut ticker = tokio::time::interval_at(start, BROADCAST_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            inner.flush_pending();
        }
    })
}

fn spawn_eviction(
    runtime: &Handle,
    weak: Weak<Inner>,
    id: String,
    timeout: Duration,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        let mut wait = timeout;
        loop {
            tokio::time::sleep(wait).await;
            let Some(inner) = weak.upgrade() else { return };
            match inner.evict_if_stale(&id) {
                // Heard from since arming; wait out the remainder, then one
                // more millisecond so "silent for longer than" holds.
                Some(remaining) => wait = remaining + Duration::from_millis(1),
                None => return,
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `player_<epoch ms>_<9 random base36 chars>`
fn generate_local_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..9)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("player_{}_{}", now_ms(), suffix)
}
