//! Error type for the presence layer.
//!
//! Nothing here crosses the public client boundary as a failure of the host
//! application: `connect` folds these into `false`, inbound decode errors are
//! logged and the frame dropped.

use crate::protocol::MessageType;

#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    /// Provider credentials or address absent. Multiplayer is simply off.
    #[error("multiplayer disabled: {0}")]
    Disabled(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("payload does not match message type `{0}`")]
    PayloadMismatch(MessageType),

    #[error("not connected")]
    NotConnected,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T, E = PresenceError> = std::result::Result<T, E>;
