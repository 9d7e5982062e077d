//! Client configuration.
//!
//! Layered through the `config` crate: built-in defaults, then an optional
//! TOML file, then `PRESENCE_*` environment variables.
//!
//! | Key                      | Default    | Description                          |
//! |--------------------------|------------|--------------------------------------|
//! | `provider`               | `socket`   | `socket` or `pubsub`                 |
//! | `address`                | *(none)*   | WebSocket URL or relay URL           |
//! | `channel_credentials`    | *(none)*   | Relay token (pub/sub only)           |
//! | `cluster_region`         | *(none)*   | Relay subject region (pub/sub only)  |
//! | `channel_name`           | `presence` | Shared channel / room name           |
//! | `display_name`           | `Player`   | Advertised display name              |
//! | `inactivity_timeout_ms`  | `60000`    | Silent-peer eviction timeout         |
//!
//! A configuration without the provider's address or credentials is valid:
//! it means multiplayer is disabled.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PresenceError, Result};

pub const DEFAULT_INACTIVITY_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_CHANNEL_NAME: &str = "presence";
pub const DEFAULT_DISPLAY_NAME: &str = "Player";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Socket,
    Pubsub,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub channel_credentials: Option<String>,
    #[serde(default)]
    pub cluster_region: Option<String>,
    #[serde(default = "default_channel_name")]
    pub channel_name: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,
}

fn default_channel_name() -> String {
    DEFAULT_CHANNEL_NAME.into()
}

fn default_display_name() -> String {
    DEFAULT_DISPLAY_NAME.into()
}

fn default_inactivity_timeout_ms() -> u64 {
    DEFAULT_INACTIVITY_TIMEOUT_MS
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Socket,
            address: None,
            channel_credentials: None,
            cluster_region: None,
            channel_name: default_channel_name(),
            display_name: default_display_name(),
            inactivity_timeout_ms: DEFAULT_INACTIVITY_TIMEOUT_MS,
        }
    }
}

impl PresenceConfig {
    /// Direct-socket configuration pointing at `address`.
    pub fn socket(address: impl Into<String>) -> Self {
        Self {
            provider: ProviderKind::Socket,
            address: Some(address.into()),
            ..Default::default()
        }
    }

    /// Hosted pub/sub configuration.
    pub fn pubsub(address: impl Into<String>, credentials: impl Into<String>) -> Self {
        Self {
            provider: ProviderKind::Pubsub,
            address: Some(address.into()),
            channel_credentials: Some(credentials.into()),
            ..Default::default()
        }
    }

    /// Load defaults, then `file` if given, then `PRESENCE_*` env vars.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let cfg = builder
            .add_source(config::Environment::with_prefix("PRESENCE").try_parsing(true))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// Parse a TOML document (no environment overlay).
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    /// `Err(Disabled)` when the selected provider lacks what it needs.
    pub fn check_enabled(&self) -> Result<()> {
        let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        match self.provider {
            ProviderKind::Socket if !has(&self.address) => Err(PresenceError::Disabled(
                "no socket address configured".into(),
            )),
            ProviderKind::Pubsub if !has(&self.address) => Err(PresenceError::Disabled(
                "no relay address configured".into(),
            )),
            ProviderKind::Pubsub if !has(&self.channel_credentials) => Err(
                PresenceError::Disabled("no channel credentials configured".into()),
            ),
            _ => Ok(()),
        }
    }
}
