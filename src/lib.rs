//! World Presence
//!
//! Real-time presence synchronization for a shared 3D space: who else is
//! here, where they stand, and what they just did.
//!
//! ## Architecture
//!
//! ```text
//! PresenceClient  (client.rs)     ← throttling, timers, subscriptions
//!   ├── Roster  (roster.rs)       ← remote player table
//!   └── dyn Transport  (transport/)
//!         ├── SocketTransport     ← one WebSocket to a presence server
//!         ├── PubSubTransport     ← channel on a NATS relay
//!         └── MemoryTransport     ← in-process, for tests
//!
//! consumer.rs  ← read-only side: spatial audio, zone filter, emotes
//! ```
//!
//! Every peer is equal. There is no authority; each client owns its own
//! state and mirrors everyone else's from the envelopes they publish.

// Wire and configuration types are always available (no client feature needed).
pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

// Runtime modules require the `client` feature.
#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "client")]
pub mod consumer;
#[cfg(feature = "client")]
pub mod roster;
#[cfg(feature = "client")]
pub mod transport;

// Convenience re-exports (client only)
#[cfg(feature = "client")]
pub use client::{PresenceClient, Subscription};
#[cfg(feature = "client")]
pub use consumer::{visible_in_zone, EmoteBoard, SpatialAudioBridge, SpatialAudioSink};
#[cfg(feature = "client")]
pub use roster::PlayerSnapshot;
#[cfg(feature = "client")]
pub use transport::{MemoryTransport, PubSubTransport, SocketTransport, Transport};
pub use config::{PresenceConfig, ProviderKind};
pub use error::{PresenceError, Result};
pub use protocol::{Message, MessageType};
pub use types::{ActionKind, MovementFlags, PlayerAction, PlayerState, Vec3, Zone};
