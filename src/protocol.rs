//! Presence wire protocol.
//!
//! This module owns **every message that crosses the transport boundary**
//! between peers, whichever provider carries it.
//!
//! ## Envelope
//!
//! ```text
//! { "type": "player_update", "playerId": "player_…", "data": { … }, "timestamp": 1712345678901 }
//! ```
//!
//! | `type`          | `data`                  |
//! |-----------------|-------------------------|
//! | `player_update` | `PlayerState` (omitted for heartbeats) |
//! | `player_join`   | `PlayerState`           |
//! | `sync_response` | `PlayerState`           |
//! | `player_action` | `PlayerAction`          |
//! | `player_leave`  | *(ignored)*             |
//! | `sync_request`  | *(ignored)*             |
//!
//! ## Design rules
//!
//! 1. `data` is a tagged union selected by `type`. Decoding reads the raw
//!    envelope first, then picks the payload type; a mismatch is an error.
//! 2. Field names are camelCase JSON.
//! 3. Every state message carries the full `PlayerState`, never a delta.
//! 4. `timestamp` is wall-clock epoch milliseconds at the sender.

use serde::{Deserialize, Serialize};

use crate::error::PresenceError;
use crate::types::{PlayerAction, PlayerState};

/// Wall-clock epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Message kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    PlayerUpdate,
    PlayerAction,
    PlayerJoin,
    PlayerLeave,
    SyncRequest,
    SyncResponse,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageType::PlayerUpdate => "player_update",
            MessageType::PlayerAction => "player_action",
            MessageType::PlayerJoin => "player_join",
            MessageType::PlayerLeave => "player_leave",
            MessageType::SyncRequest => "sync_request",
            MessageType::SyncResponse => "sync_response",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Typed `data` of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    State(PlayerState),
    Action(PlayerAction),
}

/// A decoded envelope. Switch on `kind` before touching `data`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawEnvelope")]
pub struct Message {
    pub kind: MessageType,
    pub player_id: String,
    pub data: Option<Payload>,
    pub timestamp: i64,
}

/// Envelope as it sits on the wire, `data` still untyped.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: MessageType,
    player_id: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    timestamp: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope<'a> {
    #[serde(rename = "type")]
    kind: MessageType,
    player_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Payload>,
    timestamp: i64,
}

impl TryFrom<RawEnvelope> for Message {
    type Error = PresenceError;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        let data = match (raw.kind, raw.data) {
            (_, None) | (_, Some(serde_json::Value::Null)) => {
                if raw.kind == MessageType::PlayerAction {
                    return Err(PresenceError::PayloadMismatch(raw.kind));
                }
                None
            }
            (
                MessageType::PlayerUpdate | MessageType::PlayerJoin | MessageType::SyncResponse,
                Some(v),
            ) => Some(Payload::State(
                serde_json::from_value(v)
                    .map_err(|_| PresenceError::PayloadMismatch(raw.kind))?,
            )),
            (MessageType::PlayerAction, Some(v)) => Some(Payload::Action(
                serde_json::from_value(v)
                    .map_err(|_| PresenceError::PayloadMismatch(raw.kind))?,
            )),
            (MessageType::PlayerLeave | MessageType::SyncRequest, Some(_)) => None,
        };

        Ok(Message {
            kind: raw.kind,
            player_id: raw.player_id,
            data,
            timestamp: raw.timestamp,
        })
    }
}

impl Serialize for Message {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireEnvelope {
            kind: self.kind,
            player_id: &self.player_id,
            data: self.data.as_ref(),
            timestamp: self.timestamp,
        }
        .serialize(serializer)
    }
}

impl Message {
    fn new(kind: MessageType, player_id: impl Into<String>, data: Option<Payload>) -> Self {
        Self {
            kind,
            player_id: player_id.into(),
            data,
            timestamp: now_ms(),
        }
    }

    pub fn update(state: PlayerState) -> Self {
        Self::new(
            MessageType::PlayerUpdate,
            state.id.clone(),
            Some(Payload::State(state)),
        )
    }

    /// Bare `player_update` with no data. Keeps idle transports open.
    pub fn heartbeat(player_id: impl Into<String>) -> Self {
        Self::new(MessageType::PlayerUpdate, player_id, None)
    }

    pub fn join(state: PlayerState) -> Self {
        Self::new(
            MessageType::PlayerJoin,
            state.id.clone(),
            Some(Payload::State(state)),
        )
    }

    pub fn leave(player_id: impl Into<String>) -> Self {
        Self::new(MessageType::PlayerLeave, player_id, None)
    }

    pub fn action(player_id: impl Into<String>, action: PlayerAction) -> Self {
        Self::new(
            MessageType::PlayerAction,
            player_id,
            Some(Payload::Action(action)),
        )
    }

    pub fn sync_request(player_id: impl Into<String>) -> Self {
        Self::new(MessageType::SyncRequest, player_id, None)
    }

    pub fn sync_response(player_id: impl Into<String>, state: PlayerState) -> Self {
        Self::new(
            MessageType::SyncResponse,
            player_id,
            Some(Payload::State(state)),
        )
    }

    pub fn state(&self) -> Option<&PlayerState> {
        match &self.data {
            Some(Payload::State(s)) => Some(s),
            _ => None,
        }
    }

    pub fn player_action(&self) -> Option<&PlayerAction> {
        match &self.data {
            Some(Payload::Action(a)) => Some(a),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PresenceError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PresenceError> {
        let raw: RawEnvelope = serde_json::from_slice(bytes)?;
        Message::try_from(raw)
    }
}

// ---------------------------------------------------------------------------
// Hosted relay membership notices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemberEvent {
    MemberAdded,
    MemberRemoved,
}

/// Membership change published on a channel's `members` subject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberNotice {
    pub event: MemberEvent,
    pub id: String,
}

// ---------------------------------------------------------------------------
// Subject helpers
// ---------------------------------------------------------------------------

/// Relay subjects used by the hosted pub/sub provider.
pub mod subjects {
    pub const ROOT: &str = "presence";
    pub const DEFAULT_REGION: &str = "global";

    /// `presence.<region>.<channel>`
    pub fn namespace(region: &str, channel: &str) -> String {
        format!("{}.{}.{}", ROOT, region, channel)
    }

    pub fn events(namespace: &str) -> String {
        format!("{}.events", namespace)
    }

    pub fn members(namespace: &str) -> String {
        format!("{}.members", namespace)
    }
}
