//! Direct-socket provider: one WebSocket to a presence server.
//!
//! On open the provider immediately sends a `sync_request` so the server can
//! push the current world state. Text and binary frames are both accepted;
//! outbound envelopes go out as text.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::{deliver, ChannelLink, Link, LinkContext, Outbound, Transport, TransportEvent};
use crate::error::{PresenceError, Result};
use crate::protocol::Message;

pub struct SocketTransport {
    address: String,
}

impl SocketTransport {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Transport for SocketTransport {
    fn name(&self) -> &'static str {
        "socket"
    }

    fn open(&self, ctx: LinkContext) -> BoxFuture<'static, Result<Box<dyn Link>>> {
        let address = self.address.clone();
        Box::pin(async move {
            install_crypto_provider();
            log::info!("[socket] Connecting to {}", address);

            let (ws, _response) = tokio_tungstenite::connect_async(address.as_str())
                .await
                .map_err(|e| PresenceError::Transport(format!("connect {}: {}", address, e)))?;
            let (mut sink, mut stream) = ws.split();

            let hello = Message::sync_request(&ctx.local_id).encode()?;
            sink.send(to_ws(Bytes::from(hello)))
                .await
                .map_err(|e| PresenceError::Transport(format!("sync_request: {}", e)))?;

            log::info!("[socket] Connected");

            let (link, mut outbound) = ChannelLink::new();
            let events = ctx.events;

            tokio::spawn(async move {
                let reason = loop {
                    tokio::select! {
                        frame = stream.next() => match frame {
                            Some(Ok(WsMessage::Text(text))) => deliver(&events, text.as_bytes(), "socket"),
                            Some(Ok(WsMessage::Binary(bytes))) => deliver(&events, &bytes, "socket"),
                            Some(Ok(WsMessage::Close(_))) | None => break "server closed connection".to_string(),
                            // Ping/pong are answered by tungstenite.
                            Some(Ok(_)) => {}
                            Some(Err(e)) => break format!("socket error: {}", e),
                        },

                        out = outbound.recv() => match out {
                            Some(Outbound::Frame(bytes)) => {
                                if let Err(e) = sink.send(to_ws(bytes)).await {
                                    break format!("send failed: {}", e);
                                }
                            }
                            Some(Outbound::Close) | None => {
                                let _ = sink.send(WsMessage::Close(None)).await;
                                let _ = sink.close().await;
                                log::info!("[socket] Closed by client");
                                return;
                            }
                        },
                    }
                };

                log::warn!("[socket] Connection lost: {}", reason);
                let _ = events.send(TransportEvent::Lost { reason });
            });

            Ok(Box::new(link) as Box<dyn Link>)
        })
    }
}

fn to_ws(frame: Bytes) -> WsMessage {
    match String::from_utf8(frame.to_vec()) {
        Ok(text) => WsMessage::Text(text.into()),
        Err(e) => WsMessage::Binary(Bytes::from(e.into_bytes())),
    }
}

/// `wss://` needs a process-wide rustls provider; installing twice is fine.
fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_frames_go_out_as_text() {
        let frame = Message::leave("p1").encode().unwrap();
        assert!(matches!(to_ws(Bytes::from(frame)), WsMessage::Text(_)));
    }

    #[test]
    fn non_utf8_frames_go_out_as_binary() {
        let frame = Bytes::from_static(&[0xff, 0xfe, 0x00]);
        assert!(matches!(to_ws(frame), WsMessage::Binary(_)));
    }
}
