//! Hosted pub/sub provider: a channel on a NATS relay.
//!
//! ## Subjects
//!
//! | Subject                               | Carries                     |
//! |---------------------------------------|-----------------------------|
//! | `presence.<region>.<channel>.events`  | presence envelopes          |
//! | `presence.<region>.<channel>.members` | `MemberNotice` JSON         |
//!
//! The relay echoes our own publishes back; the client drops them by id.
//!
//! Membership notices are translated into synthetic `player_leave`
//! envelopes, so departures reported by the relay take the same removal path
//! as departures reported by peers.

use async_nats::{Client, ConnectOptions, Event};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;

use super::{
    deliver, ChannelLink, EventSender, Link, LinkContext, Outbound, Transport, TransportEvent,
};
use crate::error::{PresenceError, Result};
use crate::protocol::{subjects, MemberEvent, MemberNotice, Message};

pub struct PubSubTransport {
    address: String,
    credentials: String,
    namespace: String,
}

impl PubSubTransport {
    pub fn new(
        address: impl Into<String>,
        credentials: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            credentials: credentials.into(),
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl Transport for PubSubTransport {
    fn name(&self) -> &'static str {
        "pubsub"
    }

    fn open(&self, ctx: LinkContext) -> BoxFuture<'static, Result<Box<dyn Link>>> {
        let address = self.address.clone();
        let credentials = self.credentials.clone();
        let namespace = self.namespace.clone();

        Box::pin(async move {
            log::info!("[pubsub] Connecting to {} (channel={})", address, namespace);

            let lifecycle = ctx.events.clone();
            let client = ConnectOptions::with_token(credentials)
                .name(format!("presence-{}", ctx.local_id))
                .event_callback(move |event| {
                    let lifecycle = lifecycle.clone();
                    async move { relay_lifecycle(&lifecycle, event) }
                })
                .connect(address.as_str())
                .await
                .map_err(|e| PresenceError::Transport(format!("relay connect failed: {}", e)))?;

            let events_subject = subjects::events(&namespace);
            let members_subject = subjects::members(&namespace);

            let mut event_sub = client
                .subscribe(events_subject.clone())
                .await
                .map_err(|e| PresenceError::Transport(format!("subscribe failed: {}", e)))?;
            let mut member_sub = client
                .subscribe(members_subject.clone())
                .await
                .map_err(|e| PresenceError::Transport(format!("subscribe failed: {}", e)))?;

            log::info!("[pubsub] Subscribed to {}", events_subject);

            announce(&client, &members_subject, MemberEvent::MemberAdded, &ctx.local_id).await;
            let hello = Message::sync_request(&ctx.local_id).encode()?;
            publish(&client, &events_subject, Bytes::from(hello)).await;

            let (link, mut outbound) = ChannelLink::new();
            let events = ctx.events;
            let local_id = ctx.local_id;

            tokio::spawn(async move {
                let reason = loop {
                    tokio::select! {
                        msg = event_sub.next() => match msg {
                            Some(msg) => deliver(&events, &msg.payload, "pubsub"),
                            None => break "relay closed the events subscription",
                        },

                        msg = member_sub.next() => match msg {
                            Some(msg) => on_member_notice(&events, &msg.payload, &local_id),
                            None => break "relay closed the members subscription",
                        },

                        out = outbound.recv() => match out {
                            Some(Outbound::Frame(bytes)) => publish(&client, &events_subject, bytes).await,
                            Some(Outbound::Close) | None => {
                                announce(&client, &members_subject, MemberEvent::MemberRemoved, &local_id).await;
                                if let Err(e) = client.flush().await {
                                    log::debug!("[pubsub] Flush on close failed: {}", e);
                                }
                                log::info!("[pubsub] Closed by client");
                                return;
                            }
                        },
                    }
                };

                log::warn!("[pubsub] Connection lost: {}", reason);
                let _ = events.send(TransportEvent::Lost {
                    reason: reason.to_string(),
                });
            });

            Ok(Box::new(link) as Box<dyn Link>)
        })
    }
}

/// Map relay connection events onto the client's connection-state path.
fn relay_lifecycle(events: &EventSender, event: Event) {
    match event {
        Event::Disconnected => {
            let _ = events.send(TransportEvent::Lost {
                reason: "relay disconnected".into(),
            });
        }
        Event::Connected => {
            let _ = events.send(TransportEvent::Restored);
        }
        other => log::debug!("[pubsub] Relay event: {:?}", other),
    }
}

/// Turn a membership notice into the envelope the client already handles.
fn on_member_notice(events: &EventSender, payload: &[u8], local_id: &str) {
    let notice: MemberNotice = match serde_json::from_slice(payload) {
        Ok(n) => n,
        Err(e) => {
            log::warn!("[pubsub] Dropping undecodable member notice: {}", e);
            return;
        }
    };
    if notice.id == local_id {
        return;
    }
    match notice.event {
        MemberEvent::MemberRemoved => {
            let _ = events.send(TransportEvent::Inbound(Message::leave(notice.id)));
        }
        MemberEvent::MemberAdded => log::debug!("[pubsub] Member joined: {}", notice.id),
    }
}

async fn announce(client: &Client, subject: &str, event: MemberEvent, id: &str) {
    let notice = MemberNotice {
        event,
        id: id.to_string(),
    };
    match serde_json::to_vec(&notice) {
        Ok(payload) => publish(client, subject, Bytes::from(payload)).await,
        Err(e) => log::warn!("[pubsub] Failed to serialise member notice: {}", e),
    }
}

/// Errors are logged and swallowed.
async fn publish(client: &Client, subject: &str, payload: Bytes) {
    if let Err(e) = client.publish(subject.to_string(), payload).await {
        log::warn!("[pubsub] Failed to publish to {}: {}", subject, e);
    }
}
