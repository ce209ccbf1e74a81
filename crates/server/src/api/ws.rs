//! WebSocket binding of the relay's client channel.
//!
//! Text frames carry JSON intents (`start`, `stop`); binary frames are media
//! chunks, acknowledged by a per-connection sequence number starting at 1.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use relay_core::{
    AckToken, ChannelEvent, ErrorPayload, PeerInfo, RelayServer, ServerMessage, SessionConfig,
};

use super::middleware::PeerAddr;
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DECODE_ERRORS, WS_MEDIA_BYTES,
    WS_MESSAGES_RECEIVED, WS_MESSAGES_SENT,
};
use crate::state::AppState;

const INTENT_BUFFER: usize = 64;
const OUTBOUND_BUFFER: usize = 256;

/// JSON intent sent by the client in a text frame.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum ClientFrame {
    Start {
        #[serde(default)]
        ack: Option<u64>,
        #[serde(default)]
        data: SessionConfig,
    },
    Stop {
        #[serde(default)]
        ack: Option<u64>,
    },
}

impl From<ClientFrame> for ChannelEvent {
    fn from(frame: ClientFrame) -> Self {
        match frame {
            ClientFrame::Start { ack, data } => ChannelEvent::Start {
                config: data,
                ack: ack.map(AckToken::Request),
            },
            ClientFrame::Stop { ack } => ChannelEvent::Stop {
                ack: ack.map(AckToken::Request),
            },
        }
    }
}

/// JSON notification sent to the client in a text frame.
#[derive(Debug, Serialize)]
#[serde(tag = "event")]
enum ServerFrame<'a> {
    #[serde(rename = "error")]
    Error { data: &'a ErrorPayload },
    #[serde(rename = "ffmpegOutput")]
    FfmpegOutput { data: &'a str },
    #[serde(rename = "ack")]
    Ack {
        ack: u64,
        error: Option<&'a ErrorPayload>,
    },
    #[serde(rename = "binarystreamAck")]
    BinaryStreamAck {
        seq: u64,
        error: Option<&'a ErrorPayload>,
    },
}

impl<'a> From<&'a ServerMessage> for ServerFrame<'a> {
    fn from(message: &'a ServerMessage) -> Self {
        match message {
            ServerMessage::Error(payload) => ServerFrame::Error { data: payload },
            ServerMessage::FfmpegOutput { text } => ServerFrame::FfmpegOutput { data: text },
            ServerMessage::Ack {
                token: AckToken::Request(ack),
                error,
            } => ServerFrame::Ack {
                ack: *ack,
                error: error.as_ref(),
            },
            ServerMessage::Ack {
                token: AckToken::Binary(seq),
                error,
            } => ServerFrame::BinaryStreamAck {
                seq: *seq,
                error: error.as_ref(),
            },
        }
    }
}

impl ServerFrame<'_> {
    fn event(&self) -> &'static str {
        match self {
            ServerFrame::Error { .. } => "error",
            ServerFrame::FfmpegOutput { .. } => "ffmpegOutput",
            ServerFrame::Ack { .. } => "ack",
            ServerFrame::BinaryStreamAck { .. } => "binarystreamAck",
        }
    }
}

/// Decodes a text frame into a client intent.
pub fn decode_text(text: &str) -> Result<ChannelEvent, serde_json::Error> {
    serde_json::from_str::<ClientFrame>(text).map(ChannelEvent::from)
}

/// Event name and ack of a text frame, read without its payload.
#[derive(Debug, Deserialize)]
struct FrameEnvelope {
    event: String,
    #[serde(default)]
    ack: Option<u64>,
}

/// Turns a `start` frame whose data failed to decode into a start with empty
/// data, so the client still gets its ack, carrying `INVALID_PARAMETERS`.
fn salvage_start(text: &str) -> Option<ChannelEvent> {
    let envelope = serde_json::from_str::<FrameEnvelope>(text).ok()?;
    (envelope.event == "start").then(|| ChannelEvent::Start {
        config: SessionConfig::default(),
        ack: envelope.ack.map(AckToken::Request),
    })
}

/// Encodes a notification as the JSON carried by a text frame.
pub fn encode_message(message: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ServerFrame::from(message))
}

/// WebSocket upgrade handler. Query parameters are handed to the start
/// policy as peer information.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    PeerAddr(remote_address): PeerAddr,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let relay = state.relay().clone();
    let peer = PeerInfo::new(remote_address).with_query(query);

    ws.on_upgrade(move |socket| async move {
        let (sender, receiver) = socket.split();
        serve_socket(relay, peer, sender, receiver).await;
    })
}

/// Bridges one socket to a relay connection until either side goes away.
pub async fn serve_socket<W, R>(relay: RelayServer, peer: PeerInfo, mut sender: W, mut receiver: R)
where
    W: Sink<Message> + Unpin + Send,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
{
    let id = peer.id;
    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();
    info!(connection = %id, remote = ?peer.remote_address, "WebSocket client connected");

    let (intents_tx, intents_rx) = mpsc::channel(INTENT_BUFFER);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);

    let connection = relay.serve_connection(peer, intents_rx, outbound_tx);

    let reader = async move {
        let mut seq = 0u64;
        loop {
            let frame = tokio::select! {
                frame = receiver.next() => frame,
                // The connection ended on its own (e.g. relay shutdown).
                _ = intents_tx.closed() => break,
            };

            let intent = match frame {
                Some(Ok(Message::Text(text))) => match decode_text(text.as_str()) {
                    Ok(intent) => intent,
                    Err(e) => {
                        WS_DECODE_ERRORS.inc();
                        match salvage_start(text.as_str()) {
                            Some(intent) => {
                                warn!(connection = %id, "Rejecting malformed start frame: {}", e);
                                intent
                            }
                            None => {
                                warn!(connection = %id, "Ignoring undecodable frame: {}", e);
                                continue;
                            }
                        }
                    }
                },
                Some(Ok(Message::Binary(data))) => {
                    seq += 1;
                    WS_MEDIA_BYTES.inc_by(data.len() as u64);
                    ChannelEvent::BinaryStream {
                        data,
                        ack: Some(AckToken::Binary(seq)),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(connection = %id, "WebSocket client closed");
                    break;
                }
                // Pings are answered by axum.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(connection = %id, "WebSocket receive error: {}", e);
                    break;
                }
            };

            WS_MESSAGES_RECEIVED
                .with_label_values(&[intent.name()])
                .inc();
            if intents_tx.send(intent).await.is_err() {
                break;
            }
        }
        let _ = intents_tx.send(ChannelEvent::Disconnect).await;
    };

    let writer = async move {
        while let Some(message) = outbound_rx.recv().await {
            let frame = ServerFrame::from(&message);
            let event = frame.event();
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    warn!(connection = %id, "Failed to serialize message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                debug!(connection = %id, "WebSocket send failed, client disconnected");
                break;
            }
            WS_MESSAGES_SENT.with_label_values(&[event]).inc();
        }
        let _ = sender.send(Message::Close(None)).await;
    };

    tokio::join!(connection, reader, writer);

    WS_CONNECTIONS_ACTIVE.dec();
    info!(connection = %id, "WebSocket client disconnected");
}
