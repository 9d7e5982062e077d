//! `Roster` – local mirror of remote player presence.
//!
//! The roster answers:
//! - "Who else is here right now?"
//! - "When did we last hear from player X?"
//! - "Has player X gone quiet for longer than the timeout?"
//!
//! The roster is NOT thread-safe by itself. `PresenceClient` keeps it behind
//! its state mutex and hands consumers copies via [`Roster::snapshot`].

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::PlayerState;

/// Copy of the roster handed to consumers.
pub type PlayerSnapshot = HashMap<String, PlayerState>;

#[derive(Debug, Clone)]
struct RosterEntry {
    state: PlayerState,
    /// Monotonic receive time, drives eviction.
    seen: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    /// The state belongs to the local player and was not stored.
    Rejected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Staleness {
    /// Silent past the timeout and removed.
    Evicted(PlayerState),
    /// Heard from recently; check again after the remaining time.
    Fresh(Duration),
    /// Already gone.
    Missing,
}

/// Remote players keyed by id. Never contains the local id.
#[derive(Debug)]
pub struct Roster {
    local_id: String,
    players: HashMap<String, RosterEntry>,
}

impl Roster {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            players: HashMap::new(),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Insert or overwrite the entry for `state.id`, stamping `last_update`.
    pub fn upsert(&mut self, mut state: PlayerState, now_ms: i64) -> Upsert {
        if state.id == self.local_id {
            return Upsert::Rejected;
        }
        state.last_update = now_ms;
        let seen = Instant::now();

        match self.players.get_mut(&state.id) {
            Some(entry) => {
                entry.state = state;
                entry.seen = seen;
                Upsert::Updated
            }
            None => {
                self.players
                    .insert(state.id.clone(), RosterEntry { state, seen });
                Upsert::Inserted
            }
        }
    }

    /// Refresh liveness of a known player without changing its state.
    pub fn touch(&mut self, id: &str, now_ms: i64) -> bool {
        match self.players.get_mut(id) {
            Some(entry) => {
                entry.state.last_update = now_ms;
                entry.seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove `id` if present. Removing an unknown id is a no-op.
    pub fn remove(&mut self, id: &str) -> Option<PlayerState> {
        self.players.remove(id).map(|e| e.state)
    }

    /// Remove `id` only if it has been silent for more than `timeout`.
    pub fn evict_if_stale(&mut self, id: &str, timeout: Duration) -> Staleness {
        let Some(entry) = self.players.get(id) else {
            return Staleness::Missing;
        };
        let silent = entry.seen.elapsed();
        if silent > timeout {
            match self.players.remove(id) {
                Some(e) => Staleness::Evicted(e.state),
                None => Staleness::Missing,
            }
        } else {
            Staleness::Fresh(timeout - silent)
        }
    }

    /// Clear all state (e.g. after disconnect).
    pub fn clear(&mut self) {
        self.players.clear();
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get(&self, id: &str) -> Option<&PlayerState> {
        self.players.get(id).map(|e| &e.state)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.players.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.players.keys().cloned().collect()
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.players
            .iter()
            .map(|(id, e)| (id.clone(), e.state.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vec3;

    fn player(id: &str, x: f32) -> PlayerState {
        let mut s = PlayerState::new(id, id.to_uppercase());
        s.position = Vec3::new(x, 0.0, 0.0);
        s
    }

    #[test]
    fn upsert_inserts_then_updates_in_place() {
        let mut roster = Roster::new("me");
        assert_eq!(roster.upsert(player("p1", 1.0), 10), Upsert::Inserted);
        assert_eq!(roster.upsert(player("p1", 2.0), 20), Upsert::Updated);
        assert_eq!(roster.len(), 1);

        let p1 = roster.get("p1").unwrap();
        assert_eq!(p1.position.x, 2.0);
        assert_eq!(p1.last_update, 20);
    }

    #[test]
    fn local_player_is_never_stored() {
        let mut roster = Roster::new("me");
        assert_eq!(roster.upsert(player("me", 1.0), 10), Upsert::Rejected);
        assert!(roster.is_empty());
    }

    #[test]
    fn double_remove_is_harmless() {
        let mut roster = Roster::new("me");
        roster.upsert(player("p1", 1.0), 10);
        assert!(roster.remove("p1").is_some());
        assert!(roster.remove("p1").is_none());
        assert!(roster.remove("never-seen").is_none());
    }

    #[test]
    fn touch_only_refreshes_known_players() {
        let mut roster = Roster::new("me");
        assert!(!roster.touch("p1", 5));
        roster.upsert(player("p1", 1.0), 10);
        assert!(roster.touch("p1", 50));
        assert_eq!(roster.get("p1").unwrap().last_update, 50);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let mut roster = Roster::new("me");
        roster.upsert(player("p1", 1.0), 10);
        let mut snap = roster.snapshot();
        snap.get_mut("p1").unwrap().position.x = 99.0;
        snap.remove("p1");
        assert_eq!(roster.get("p1").unwrap().position.x, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn evict_if_stale_respects_timeout() {
        let timeout = Duration::from_millis(1_000);
        let mut roster = Roster::new("me");
        roster.upsert(player("p1", 1.0), 0);

        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(
            roster.evict_if_stale("p1", timeout),
            Staleness::Fresh(Duration::from_millis(600))
        );

        tokio::time::advance(Duration::from_millis(600)).await;
        // Exactly at the timeout is still fresh.
        assert!(matches!(
            roster.evict_if_stale("p1", timeout),
            Staleness::Fresh(_)
        ));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(matches!(
            roster.evict_if_stale("p1", timeout),
            Staleness::Evicted(_)
        ));
        assert_eq!(roster.evict_if_stale("p1", timeout), Staleness::Missing);
    }

    #[test]
    fn clear_empties_everything() {
        let mut roster = Roster::new("me");
        roster.upsert(player("p1", 1.0), 10);
        roster.upsert(player("p2", 2.0), 10);
        roster.clear();
        assert!(roster.is_empty());
        assert!(roster.ids().is_empty());
    }
}
