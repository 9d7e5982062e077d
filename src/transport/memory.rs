//! In-process provider.
//!
//! Records every outbound envelope and lets the owner inject inbound traffic
//! and connection drops. Used by the test suite and by hosts that want to
//! drive the client without a network.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use super::{deliver, EventSender, Link, LinkContext, Transport, TransportEvent};
use crate::error::{PresenceError, Result};
use crate::protocol::{Message, MessageType};

#[derive(Default)]
struct Shared {
    sent: Vec<Message>,
    events: Option<EventSender>,
    refuse: bool,
    opens: usize,
    closed: bool,
}

/// Cloneable handle; every clone sees the same link.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose `open` always fails, like a refused connection.
    pub fn refusing() -> Self {
        let t = Self::default();
        t.shared.lock().refuse = true;
        t
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn sent(&self) -> Vec<Message> {
        self.shared.lock().sent.clone()
    }

    pub fn sent_of(&self, kind: MessageType) -> Vec<Message> {
        self.shared
            .lock()
            .sent
            .iter()
            .filter(|m| m.kind == kind)
            .cloned()
            .collect()
    }

    pub fn clear_sent(&self) {
        self.shared.lock().sent.clear();
    }

    pub fn open_count(&self) -> usize {
        self.shared.lock().opens
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    // ------------------------------------------------------------------
    // Injection
    // ------------------------------------------------------------------

    /// Deliver `msg` as if it arrived from the network.
    pub fn inject(&self, msg: Message) -> bool {
        self.emit(TransportEvent::Inbound(msg))
    }

    /// Deliver raw bytes through the same decode path real providers use.
    pub fn inject_frame(&self, frame: &[u8]) -> bool {
        match &self.shared.lock().events {
            Some(events) => {
                deliver(events, frame, "memory");
                true
            }
            None => false,
        }
    }

    pub fn drop_connection(&self, reason: &str) -> bool {
        self.emit(TransportEvent::Lost {
            reason: reason.to_string(),
        })
    }

    pub fn restore_connection(&self) -> bool {
        self.emit(TransportEvent::Restored)
    }

    fn emit(&self, event: TransportEvent) -> bool {
        match &self.shared.lock().events {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }
}

impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(&self, ctx: LinkContext) -> BoxFuture<'static, Result<Box<dyn Link>>> {
        let shared = self.shared.clone();
        Box::pin(async move {
            let mut s = shared.lock();
            if s.refuse {
                return Err(PresenceError::Transport("connection refused".into()));
            }
            s.opens += 1;
            s.closed = false;
            s.events = Some(ctx.events);
            drop(s);
            Ok(Box::new(MemoryLink { shared }) as Box<dyn Link>)
        })
    }
}

struct MemoryLink {
    shared: Arc<Mutex<Shared>>,
}

impl Link for MemoryLink {
    fn send(&self, frame: Bytes) -> Result<()> {
        let mut s = self.shared.lock();
        if s.closed {
            return Err(PresenceError::NotConnected);
        }
        s.sent.push(Message::decode(&frame)?);
        Ok(())
    }

    fn close(&self) {
        let mut s = self.shared.lock();
        s.closed = true;
        s.events = None;
    }
}
