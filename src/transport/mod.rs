//! Transport providers – the narrow send/receive contract under the client.
//!
//! ## Threading model
//!
//! ```text
//! PresenceClient                    │  Provider task (Tokio)
//! ───────────────────────────────── │ ──────────────────────────────
//! connect()                         │
//!   → Transport::open(ctx)          │   dial socket / relay
//!   ← Box<dyn Link>                 │   spawn I/O loop
//!                                   │
//! send(msg) → link.send(bytes)      │   outbound rx → socket / publish
//!                                   │
//! pump task ← events rx             │   frame → decode → Inbound(msg)
//!                                   │   close  → Lost { reason }
//! ```
//!
//! Providers decode inbound frames themselves. A frame that fails to decode
//! is logged and dropped; the connection stays open. The client never sees a
//! transport library type.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::config::{PresenceConfig, ProviderKind};
use crate::error::{PresenceError, Result};
use crate::protocol::{subjects, Message};

pub mod memory;
pub mod pubsub;
pub mod socket;

pub use memory::MemoryTransport;
pub use pubsub::PubSubTransport;
pub use socket::SocketTransport;

// ---------------------------------------------------------------------------
// Events (provider → client)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A decoded envelope, real or synthesised by the provider.
    Inbound(Message),
    /// The connection dropped. Heartbeat and broadcast must stop.
    Lost { reason: String },
    /// The provider re-established the connection on its own.
    Restored,
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// What a provider gets when it is opened.
#[derive(Debug, Clone)]
pub struct LinkContext {
    /// Identity of the local player, for handshakes and echo filtering.
    pub local_id: String,
    pub events: EventSender,
}

// ---------------------------------------------------------------------------
// Provider contract
// ---------------------------------------------------------------------------

/// Outbound half of an open connection.
pub trait Link: Send + Sync {
    /// Queue one encoded envelope. Never blocks.
    fn send(&self, frame: Bytes) -> Result<()>;
    /// Close the connection after already-queued frames.
    fn close(&self);
}

/// A way of reaching other peers.
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Establish the connection. Resolves once the connection is usable;
    /// inbound traffic then flows through `ctx.events`.
    fn open(&self, ctx: LinkContext) -> BoxFuture<'static, Result<Box<dyn Link>>>;
}

/// Build the provider selected by `config`.
///
/// Returns [`PresenceError::Disabled`] when the provider's address or
/// credentials are missing.
pub fn from_config(config: &PresenceConfig) -> Result<Box<dyn Transport>> {
    config.check_enabled()?;
    let address = config.address.clone().unwrap_or_default();

    match config.provider {
        ProviderKind::Socket => Ok(Box::new(SocketTransport::new(address))),
        ProviderKind::Pubsub => {
            let region = config
                .cluster_region
                .as_deref()
                .unwrap_or(subjects::DEFAULT_REGION);
            Ok(Box::new(PubSubTransport::new(
                address,
                config.channel_credentials.clone().unwrap_or_default(),
                subjects::namespace(region, &config.channel_name),
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Shared plumbing for task-backed providers
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Bytes),
    Close,
}

/// `Link` backed by the outbound queue of a provider task.
pub(crate) struct ChannelLink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelLink {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Link for ChannelLink {
    fn send(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(Outbound::Frame(frame))
            .map_err(|_| PresenceError::Transport("connection task has exited".into()))
    }

    fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// Decode one inbound frame and hand it to the client.
///
/// Errors are logged and swallowed; the connection stays up.
pub(crate) fn deliver(events: &EventSender, frame: &[u8], source: &str) {
    match Message::decode(frame) {
        Ok(msg) => {
            let _ = events.send(TransportEvent::Inbound(msg));
        }
        Err(e) => log::warn!("[{}] Dropping undecodable frame: {}", source, e),
    }
}
