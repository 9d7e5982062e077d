//! Presence consumers – the read-only side of the client.
//!
//! Rendering and spatial audio subscribe to snapshots and never write back
//! into the sync core. This module holds the pieces of that contract that
//! are not rendering itself:
//!
//! - [`SpatialAudioSink`]: where positions are forwarded for 3D panning.
//! - [`SpatialAudioBridge`]: keeps a sink in step with the player table.
//! - [`visible_in_zone`]: presentation-side zone filtering.
//! - [`EmoteBoard`]: the 3 second emote display window.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::client::{PresenceClient, Subscription};
use crate::roster::PlayerSnapshot;
use crate::types::{PlayerState, Vec3, Zone};

/// How long an emote stays on screen after it first appears.
pub const EMOTE_DISPLAY_WINDOW: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// Spatial audio
// ---------------------------------------------------------------------------

/// The audio subsystem's panner positioning. Pure forwarding, no sync
/// semantics.
pub trait SpatialAudioSink: Send + Sync {
    fn update_player_position(&self, id: &str, position: Vec3);

    fn update_listener_position(&self, position: Vec3, rotation: f32);

    /// A player left; release its panner.
    fn remove_player(&self, _id: &str) {}
}

/// Forwards every remote position in each snapshot to a sink.
pub struct SpatialAudioBridge {
    subscription: Subscription,
}

impl SpatialAudioBridge {
    pub fn attach(client: &PresenceClient, sink: Arc<dyn SpatialAudioSink>) -> Self {
        let known: Mutex<HashSet<String>> = Mutex::new(HashSet::new());

        let subscription = client.on_players_update(move |snapshot: &PlayerSnapshot| {
            let mut known = known.lock();
            for (id, player) in snapshot {
                sink.update_player_position(id, player.position);
            }
            known.retain(|id| {
                let present = snapshot.contains_key(id);
                if !present {
                    sink.remove_player(id);
                }
                present
            });
            known.extend(snapshot.keys().cloned());
        });

        Self { subscription }
    }

    pub fn detach(self) {
        self.subscription.unsubscribe();
    }
}

// ---------------------------------------------------------------------------
// Zones
// ---------------------------------------------------------------------------

/// Players a viewer in `zone` should see.
pub fn visible_in_zone(snapshot: &PlayerSnapshot, zone: Zone) -> Vec<&PlayerState> {
    let mut visible: Vec<_> = snapshot.values().filter(|p| p.zone == zone).collect();
    visible.sort_by(|a, b| a.id.cmp(&b.id));
    visible
}

// ---------------------------------------------------------------------------
// Emotes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ShownEmote {
    tag: String,
    since: Instant,
}

/// Tracks which emotes are on screen.
///
/// The sync core forwards the latest `emote` value verbatim, so a tag can
/// ride along on many updates. An emote starts showing when a player's tag
/// changes and stops after [`EMOTE_DISPLAY_WINDOW`].
#[derive(Debug, Default)]
pub struct EmoteBoard {
    last_tag: HashMap<String, Option<String>>,
    shown: HashMap<String, ShownEmote>,
}

impl EmoteBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, snapshot: &PlayerSnapshot) {
        let now = Instant::now();
        for (id, player) in snapshot {
            let previous = self.last_tag.insert(id.clone(), player.emote.clone());
            let changed = previous.as_ref() != Some(&player.emote);
            if let (true, Some(tag)) = (changed, &player.emote) {
                self.shown.insert(
                    id.clone(),
                    ShownEmote {
                        tag: tag.clone(),
                        since: now,
                    },
                );
            }
        }
        self.last_tag.retain(|id, _| snapshot.contains_key(id));
        self.shown.retain(|id, _| snapshot.contains_key(id));
    }

    /// The emote `id` is currently showing, if its window is still open.
    pub fn active(&self, id: &str) -> Option<&str> {
        self.shown
            .get(id)
            .filter(|e| e.since.elapsed() < EMOTE_DISPLAY_WINDOW)
            .map(|e| e.tag.as_str())
    }

    /// Drop expired emotes.
    pub fn prune(&mut self) {
        self.shown
            .retain(|_, e| e.since.elapsed() < EMOTE_DISPLAY_WINDOW);
    }

    pub fn active_count(&self) -> usize {
        self.shown
            .values()
            .filter(|e| e.since.elapsed() < EMOTE_DISPLAY_WINDOW)
            .count()
    }
}
