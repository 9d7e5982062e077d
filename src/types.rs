//! Core presence types shared across all modules.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Basic math
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Displacement on the ground plane (`x`, `z`) from `other` to `self`.
    pub fn planar_delta(&self, other: &Vec3) -> (f32, f32) {
        ((self.x - other.x).abs(), (self.z - other.z).abs())
    }
}

impl From<[f32; 3]> for Vec3 {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Zones
// ---------------------------------------------------------------------------

/// One of the two logical spaces a player can be in.
///
/// Visibility by zone is a presentation concern; the sync core replicates
/// every peer regardless of zone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    #[default]
    Dev,
    Art,
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Zone::Dev => f.write_str("dev"),
            Zone::Art => f.write_str("art"),
        }
    }
}

// ---------------------------------------------------------------------------
// Player state
// ---------------------------------------------------------------------------

/// Advisory movement flags, used for animation only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MovementFlags {
    #[serde(default)]
    pub is_moving: bool,
    #[serde(default)]
    pub is_sprinting: bool,
}

impl MovementFlags {
    pub fn new(is_moving: bool, is_sprinting: bool) -> Self {
        Self {
            is_moving,
            is_sprinting,
        }
    }

    pub fn idle() -> Self {
        Self::default()
    }
}

/// Full presence state of one participant.
///
/// Every update carries the complete state, never a delta.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    pub position: Vec3,
    /// Heading in radians.
    #[serde(default)]
    pub orientation: f32,
    #[serde(default)]
    pub zone: Zone,
    #[serde(flatten)]
    pub movement: MovementFlags,
    /// Short-lived emote tag. Consumers clear it after the display window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emote: Option<String>,
    /// Epoch milliseconds of the most recent state for this player.
    #[serde(default)]
    pub last_update: i64,
}

impl PlayerState {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            position: Vec3::zero(),
            orientation: 0.0,
            zone: Zone::default(),
            movement: MovementFlags::idle(),
            emote: None,
            last_update: 0,
        }
    }

    /// True when everything but `last_update` matches `other`.
    pub fn same_presence(&self, other: &PlayerState) -> bool {
        self.id == other.id
            && self.display_name == other.display_name
            && self.position == other.position
            && self.orientation == other.orientation
            && self.zone == other.zone
            && self.movement == other.movement
            && self.emote == other.emote
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Wave,
    Emote,
    Disconnect,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Wave => f.write_str("wave"),
            ActionKind::Emote => f.write_str("emote"),
            ActionKind::Disconnect => f.write_str("disconnect"),
        }
    }
}

/// A discrete fire-and-forget event. Delivered once, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl PlayerAction {
    pub fn new(kind: ActionKind, data: Option<serde_json::Value>) -> Self {
        Self { kind, data }
    }
}
