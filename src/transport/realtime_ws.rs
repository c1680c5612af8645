//! Streaming WebSocket transport to the agent gateway.
//!
//! The gateway speaks a JSON frame protocol over one persistent duplex
//! socket: outbound frames carry base64 PCM16 audio chunks, inbound frames
//! carry transcripts, agent responses, tool calls, keepalive pings, and
//! agent audio (played by the embedding UI, ignored here).

use super::{Transport, TransportEvent};
use crate::config::Config;
use crate::error::ConnectError;
use crate::transcript::{Role, TranscriptEntry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::StatusCode, protocol::Message as WsMessage},
};
use tracing::{debug, error, info, trace, warn};

// --- Gateway wire format ---
mod wire {
    use crate::canvas::ToolName;
    use serde::{Deserialize, Serialize};

    /// Frames sent by the gateway.
    ///
    /// `timestamp_ms` fields are session-relative milliseconds measured
    /// from connection establishment, the same clock the session layer
    /// stamps agent messages with. Wall-clock timestamps are not part of
    /// this protocol; the transcript dedup window relies on a single time
    /// base.
    #[derive(Deserialize, Debug)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub(super) enum ServerFrame {
        UserTranscript {
            text: String,
            timestamp_ms: u64,
        },
        AgentTranscript {
            text: String,
            timestamp_ms: u64,
        },
        AgentMessage {
            text: String,
        },
        ToolCall {
            name: ToolName,
            #[serde(default)]
            args: serde_json::Value,
        },
        AudioChunk {
            data: String,
        },
        Interruption {
            #[serde(default)]
            reason: Option<String>,
        },
        Ping {
            event_id: u64,
        },
        SessionClosed {
            #[serde(default)]
            reason: Option<String>,
        },
        Error {
            message: String,
        },
    }

    #[derive(Serialize, Debug)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub(super) enum ClientFrame {
        AudioChunk { data: String },
        Pong { event_id: u64 },
    }
}

/// Transport over a persistent duplex WebSocket to the agent gateway.
pub struct RealtimeWsTransport {
    config: Arc<Config>,
    audio_tx: Option<mpsc::Sender<Bytes>>,
    pump: Option<JoinHandle<()>>,
}

impl RealtimeWsTransport {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            audio_tx: None,
            pump: None,
        }
    }
}

#[async_trait]
impl Transport for RealtimeWsTransport {
    async fn connect(&mut self, events: mpsc::Sender<TransportEvent>) -> Result<(), ConnectError> {
        let api_key = self
            .config
            .gateway_api_key
            .as_ref()
            .ok_or(ConnectError::InvalidCredential)?;

        let mut request = self
            .config
            .gateway_url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectError::Transport(e.to_string()))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", api_key)
                .parse()
                .map_err(|_| ConnectError::InvalidCredential)?,
        );

        let (ws_stream, _) = connect_async(request).await.map_err(classify_ws_error)?;
        info!(url = %self.config.gateway_url, "Connected to agent gateway.");

        let (audio_tx, audio_rx) = mpsc::channel::<Bytes>(256);
        let _ = events.send(TransportEvent::Status { connected: true }).await;
        self.pump = Some(tokio::spawn(async move {
            if let Err(e) = pump(ws_stream, audio_rx, events.clone()).await {
                error!(error = ?e, "Gateway pump terminated with error.");
                // A write-path failure must surface as a hangup, not a
                // silently dropped event sender.
                let _ = events.send(TransportEvent::Status { connected: false }).await;
            }
        }));
        self.audio_tx = Some(audio_tx);
        Ok(())
    }

    async fn disconnect(&mut self) {
        // Dropping the audio sender makes the pump send a close frame and
        // exit; the abort below is a backstop so local release never blocks
        // on a hung socket.
        self.audio_tx = None;
        if let Some(mut handle) = self.pump.take() {
            if tokio::time::timeout(std::time::Duration::from_millis(500), &mut handle)
                .await
                .is_err()
            {
                handle.abort();
                warn!("Gateway pump did not exit in time; aborted.");
            }
        }
        debug!("Gateway transport released.");
    }

    fn send_audio(&self, frame: Bytes) {
        let Some(tx) = &self.audio_tx else {
            warn!("Dropping audio frame: gateway transport is not connected.");
            return;
        };
        if tx.try_send(frame).is_err() {
            warn!("Dropping audio frame: gateway write queue is full or closed.");
        }
    }
}

/// Maps a WebSocket handshake failure to the §7 error taxonomy.
fn classify_ws_error(err: tokio_tungstenite::tungstenite::Error) -> ConnectError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match &err {
        WsError::Http(response) => match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ConnectError::InvalidCredential,
            _ => ConnectError::Transport(err.to_string()),
        },
        _ => ConnectError::Transport(err.to_string()),
    }
}

/// Bidirectional pump: outgoing audio frames and incoming gateway frames.
async fn pump(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut audio_rx: mpsc::Receiver<Bytes>,
    events: mpsc::Sender<TransportEvent>,
) -> Result<()> {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    loop {
        tokio::select! {
            maybe_frame = audio_rx.recv() => {
                match maybe_frame {
                    Some(frame) => {
                        let out = wire::ClientFrame::AudioChunk { data: BASE64.encode(&frame) };
                        ws_tx.send(WsMessage::Text(serde_json::to_string(&out)?.into())).await?;
                    }
                    None => {
                        // Local disconnect: close gracefully and stop.
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            },
            maybe_msg = ws_rx.next() => {
                match maybe_msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        let frame: wire::ServerFrame = match serde_json::from_str(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(error = %e, "Ignoring unparseable gateway frame.");
                                continue;
                            }
                        };
                        if !handle_server_frame(frame, &events, &mut ws_tx).await? {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(close_frame))) => {
                        info!(?close_frame, "Gateway closed the connection.");
                        let _ = events.send(TransportEvent::Status { connected: false }).await;
                        break;
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "Error reading from gateway.");
                        let _ = events.send(TransportEvent::Status { connected: false }).await;
                        break;
                    }
                    None => {
                        let _ = events.send(TransportEvent::Status { connected: false }).await;
                        break;
                    }
                }
            },
        }
    }
    Ok(())
}

/// Translates one gateway frame into transport events. Returns `false` when
/// the session is over and the pump should stop.
async fn handle_server_frame<S>(
    frame: wire::ServerFrame,
    events: &mpsc::Sender<TransportEvent>,
    ws_tx: &mut S,
) -> Result<bool>
where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    match frame {
        wire::ServerFrame::UserTranscript { text, timestamp_ms } => {
            events
                .send(TransportEvent::Transcript(TranscriptEntry::new(
                    Role::User,
                    text,
                    timestamp_ms,
                )))
                .await
                .context("event channel closed")?;
        }
        wire::ServerFrame::AgentTranscript { text, timestamp_ms } => {
            events
                .send(TransportEvent::Transcript(TranscriptEntry::new(
                    Role::Agent,
                    text,
                    timestamp_ms,
                )))
                .await
                .context("event channel closed")?;
        }
        wire::ServerFrame::AgentMessage { text } => {
            events
                .send(TransportEvent::Message(text))
                .await
                .context("event channel closed")?;
        }
        wire::ServerFrame::ToolCall { name, args } => {
            events
                .send(TransportEvent::ToolCall(crate::canvas::ToolCall {
                    name,
                    args,
                }))
                .await
                .context("event channel closed")?;
        }
        wire::ServerFrame::AudioChunk { data } => {
            // Playback is owned by the embedding UI, not this layer.
            trace!(len = data.len(), "Dropping agent audio chunk.");
        }
        wire::ServerFrame::Interruption { reason } => {
            debug!(?reason, "User barge-in reported by gateway.");
        }
        wire::ServerFrame::Ping { event_id } => {
            let pong = wire::ClientFrame::Pong { event_id };
            ws_tx
                .send(WsMessage::Text(serde_json::to_string(&pong)?.into()))
                .await?;
        }
        wire::ServerFrame::SessionClosed { reason } => {
            info!(?reason, "Gateway ended the session.");
            let _ = events.send(TransportEvent::Status { connected: false }).await;
            return Ok(false);
        }
        wire::ServerFrame::Error { message } => {
            warn!(%message, "Gateway reported an error.");
        }
    }
    Ok(true)
}
