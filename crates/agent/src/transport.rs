// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The bidirectional command stream, agent side (spec §4.5, §4.9
//! `Connecting`): "open the bidirectional stream, send `ConnectRequest`,
//! await `ConnectAck(accepted=true)`. On failure, reconnect with
//! exponential backoff (initial 5s, cap ~30s)."

use async_trait::async_trait;
use fc_wire::{AgentMessage, ControllerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::AgentError;

/// Inbound events the transport surfaces to [`AgentCore`](crate::core::AgentCore).
#[derive(Debug)]
pub enum TransportEvent {
    Connected { server_version: String },
    Message(ControllerMessage),
    Disconnected { reason: String },
}

/// Abstracts the agent<->controller stream so [`AgentCore`] is testable
/// without a real socket (spec §4.9's "open the bidirectional stream").
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Opens the stream and performs the `Connect`/`ConnectAck` handshake
    /// (spec §4.5). Returns a sender for outbound agent messages and a
    /// receiver of inbound [`TransportEvent`]s.
    async fn connect(
        &self,
        request: fc_wire::ConnectRequest,
    ) -> Result<(mpsc::UnboundedSender<AgentMessage>, mpsc::UnboundedReceiver<TransportEvent>), AgentError>;
}

/// `tokio-tungstenite`-backed implementation speaking the `fc-wire` JSON
/// frame protocol over a WebSocket (spec §4.5 "the stream" — the controller
/// side accepts this same protocol in `fleetd`'s WebSocket server).
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(controller_url: &str) -> Self {
        let url = if let Some(rest) = controller_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = controller_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            controller_url.to_string()
        };
        Self { url: format!("{url}/v1/stream") }
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn connect(
        &self,
        request: fc_wire::ConnectRequest,
    ) -> Result<(mpsc::UnboundedSender<AgentMessage>, mpsc::UnboundedReceiver<TransportEvent>), AgentError> {
        let (ws_stream, _resp) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| AgentError::Connect(format!("websocket connect to {} failed: {e}", self.url)))?;

        let (mut sink, mut stream) = ws_stream.split();

        let connect_msg = AgentMessage::Connect(request);
        let frame = serde_json::to_string(&connect_msg)
            .map_err(|e| AgentError::Protocol(format!("failed to encode connect request: {e}")))?;
        sink.send(WsMessage::Text(frame.into()))
            .await
            .map_err(|e| AgentError::Connect(format!("failed to send connect request: {e}")))?;

        let ack = loop {
            match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let msg: ControllerMessage = serde_json::from_str(&text)
                        .map_err(|e| AgentError::Protocol(format!("malformed controller message: {e}")))?;
                    break msg;
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(AgentError::Connect(format!("stream error awaiting ack: {e}"))),
                None => return Err(AgentError::Connect("stream closed before ack".into())),
            }
        };

        let server_version = match ack {
            ControllerMessage::ConnectAck { accepted: true, server_version, .. } => server_version,
            ControllerMessage::ConnectAck { accepted: false, message, .. } => {
                return Err(AgentError::Connect(format!("controller rejected connect: {message}")));
            }
            other => return Err(AgentError::Protocol(format!("expected connect_ack, got {other:?}"))),
        };

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<AgentMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Surfaced first so `AgentCore` sees `Connected` before anything the
        // controller sends next, even though the handshake already happened
        // above (the version has nowhere else to ride on this API shape).
        let _ = in_tx.send(TransportEvent::Connected { server_version });

        let in_tx_for_write = in_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let frame = match serde_json::to_string(&msg) {
                    Ok(f) => f,
                    Err(e) => {
                        let _ = in_tx_for_write.send(TransportEvent::Disconnected {
                            reason: format!("failed to encode outbound message: {e}"),
                        });
                        break;
                    }
                };
                if let Err(e) = sink.send(WsMessage::Text(frame.into())).await {
                    let _ = in_tx_for_write.send(TransportEvent::Disconnected {
                        reason: format!("write failed: {e}"),
                    });
                    break;
                }
            }
        });

        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ControllerMessage>(&text) {
                        Ok(msg) => {
                            if in_tx.send(TransportEvent::Message(msg)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = in_tx.send(TransportEvent::Disconnected {
                                reason: format!("malformed frame: {e}"),
                            });
                            break;
                        }
                    },
                    Some(Ok(WsMessage::Close(_))) | None => {
                        let _ = in_tx.send(TransportEvent::Disconnected { reason: "stream closed".into() });
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = in_tx.send(TransportEvent::Disconnected { reason: e.to_string() });
                        break;
                    }
                }
            }
        });

        Ok((out_tx, in_rx))
    }
}
