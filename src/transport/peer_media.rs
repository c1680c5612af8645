//! WebRTC peer media transport.
//!
//! The peer session is negotiated out-of-band: the SDP offer is POSTed to
//! the signaling endpoint with the bearer credential and the answer comes
//! back in the response body. Microphone audio goes out on a local Opus
//! track; agent events (transcripts, messages, tool calls) arrive as JSON
//! on the `agent-events` data channel. Agent audio arrives on a remote
//! track consumed by the embedding UI's playback path, not here.

use super::{Transport, TransportEvent};
use crate::config::Config;
use crate::error::ConnectError;
use crate::transcript::{Role, TranscriptEntry};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

// --- Data channel event format ---
mod wire {
    use crate::canvas::ToolName;
    use serde::{Deserialize, Serialize};

    #[derive(Deserialize, Debug)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub(super) enum AgentEvent {
        UserTranscript {
            text: String,
        },
        AgentTranscript {
            text: String,
        },
        AgentMessage {
            text: String,
        },
        ToolCall {
            name: ToolName,
            #[serde(default)]
            args: serde_json::Value,
        },
        Error {
            message: String,
        },
    }

    #[derive(Serialize, Debug)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub(super) enum ClientEvent {
        SessionConfig { modalities: Vec<String> },
    }
}

const AUDIO_FRAME_DURATION: Duration = Duration::from_millis(20);

/// Transport over a WebRTC peer session with HTTP SDP signaling.
pub struct PeerMediaTransport {
    config: Arc<Config>,
    pc: Option<Arc<RTCPeerConnection>>,
    audio_tx: Option<mpsc::Sender<Bytes>>,
    writer: Option<JoinHandle<()>>,
}

impl PeerMediaTransport {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            pc: None,
            audio_tx: None,
            writer: None,
        }
    }
}

#[async_trait]
impl Transport for PeerMediaTransport {
    async fn connect(&mut self, events: mpsc::Sender<TransportEvent>) -> Result<(), ConnectError> {
        let api_key = self
            .config
            .peer_api_key
            .clone()
            .ok_or(ConnectError::InvalidCredential)?;

        let mut media = MediaEngine::default();
        if let Err(e) = media.register_default_codecs() {
            warn!(error = %e, "Media engine rejected the default codec set.");
            return Err(ConnectError::Unsupported);
        }
        let api = APIBuilder::new().with_media_engine(media).build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_owned()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| ConnectError::Transport(e.to_string()))?,
        );

        match establish(&pc, &events, &api_key, &self.config).await {
            Ok((audio_tx, writer)) => {
                self.pc = Some(pc);
                self.audio_tx = Some(audio_tx);
                self.writer = Some(writer);
                Ok(())
            }
            Err(e) => {
                // Do not leave a half-negotiated peer connection behind.
                let _ = pc.close().await;
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) {
        self.audio_tx = None;
        if let Some(handle) = self.writer.take() {
            handle.abort();
        }
        if let Some(pc) = self.pc.take() {
            match tokio::time::timeout(Duration::from_millis(500), pc.close()).await {
                Ok(Err(e)) => warn!(error = %e, "Peer connection close reported an error."),
                Err(_) => warn!("Peer connection close timed out; local state released anyway."),
                Ok(Ok(())) => {}
            }
        }
        debug!("Peer media transport released.");
    }

    fn send_audio(&self, frame: Bytes) {
        let Some(tx) = &self.audio_tx else {
            warn!("Dropping audio frame: peer transport is not connected.");
            return;
        };
        if tx.try_send(frame).is_err() {
            warn!("Dropping audio frame: peer write queue is full or closed.");
        }
    }
}

/// Negotiates the session on an already-created peer connection and starts
/// the audio writer. On error the caller closes the peer connection.
async fn establish(
    pc: &Arc<RTCPeerConnection>,
    events: &mpsc::Sender<TransportEvent>,
    api_key: &str,
    config: &Config,
) -> Result<(mpsc::Sender<Bytes>, JoinHandle<()>), ConnectError> {
    let started = Instant::now();

    let dc = pc
        .create_data_channel("agent-events", None)
        .await
        .map_err(|e| ConnectError::Transport(e.to_string()))?;

    let events_in = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = events_in.clone();
        Box::pin(async move {
            handle_agent_event(&msg.data, &events, started).await;
        })
    }));

    let dc_open = Arc::clone(&dc);
    let events_open = events.clone();
    dc.on_open(Box::new(move || {
        let dc = Arc::clone(&dc_open);
        let events = events_open.clone();
        Box::pin(async move {
            let hello = wire::ClientEvent::SessionConfig {
                modalities: vec!["audio".to_string(), "text".to_string()],
            };
            match serde_json::to_string(&hello) {
                Ok(json) => {
                    if let Err(e) = dc.send_text(json).await {
                        warn!(error = %e, "Failed to send session config on data channel.");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to serialize session config."),
            }
            let _ = events.send(TransportEvent::Status { connected: true }).await;
        })
    }));

    let (ready_tx, mut ready_rx) = mpsc::channel::<bool>(1);
    let events_state = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let events = events_state.clone();
        let ready = ready_tx.clone();
        Box::pin(async move {
            match state {
                RTCPeerConnectionState::Connected => {
                    info!("Peer connection established.");
                    let _ = ready.try_send(true);
                }
                RTCPeerConnectionState::Disconnected
                | RTCPeerConnectionState::Failed
                | RTCPeerConnectionState::Closed => {
                    let _ = ready.try_send(false);
                    let _ = events.send(TransportEvent::Status { connected: false }).await;
                }
                _ => {}
            }
        })
    }));

    let track = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 1,
            ..Default::default()
        },
        "audio".to_owned(),
        "easel-voice".to_owned(),
    ));
    pc.add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .map_err(|e| ConnectError::Transport(e.to_string()))?;

    let offer = pc
        .create_offer(None)
        .await
        .map_err(|e| ConnectError::Transport(e.to_string()))?;
    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(offer)
        .await
        .map_err(|e| ConnectError::Transport(e.to_string()))?;
    let _ = gather_complete.recv().await;
    let local = pc
        .local_description()
        .await
        .ok_or_else(|| ConnectError::Transport("no local description after ICE gathering".into()))?;

    // Out-of-band signaling: offer out, answer back.
    let answer_sdp = exchange_sdp(&config.signaling_url, api_key, local.sdp).await?;
    let answer = RTCSessionDescription::answer(answer_sdp)
        .map_err(|e| ConnectError::Transport(e.to_string()))?;
    pc.set_remote_description(answer)
        .await
        .map_err(|e| ConnectError::Transport(e.to_string()))?;

    match ready_rx.recv().await {
        Some(true) => {}
        _ => return Err(ConnectError::Transport("peer connection failed to establish".into())),
    }

    let (audio_tx, mut audio_rx) = mpsc::channel::<Bytes>(256);
    let writer = tokio::spawn(async move {
        while let Some(frame) = audio_rx.recv().await {
            let sample = Sample {
                data: frame,
                duration: AUDIO_FRAME_DURATION,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                warn!(error = %e, "Failed to write audio sample to peer track.");
            }
        }
    });

    Ok((audio_tx, writer))
}

/// POSTs the SDP offer to the signaling endpoint and returns the answer.
async fn exchange_sdp(
    signaling_url: &str,
    api_key: &str,
    offer_sdp: String,
) -> Result<String, ConnectError> {
    let client = reqwest::Client::new();
    let response = client
        .post(signaling_url)
        .bearer_auth(api_key)
        .header(reqwest::header::CONTENT_TYPE, "application/sdp")
        .body(offer_sdp)
        .send()
        .await
        .map_err(|e| ConnectError::Transport(e.to_string()))?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ConnectError::InvalidCredential);
    }
    if !status.is_success() {
        return Err(ConnectError::Transport(format!(
            "signaling failed with status {}",
            status
        )));
    }
    response
        .text()
        .await
        .map_err(|e| ConnectError::Transport(e.to_string()))
}

/// Translates one data channel payload into transport events, stamping
/// session-relative timestamps (the peer wire carries none).
async fn handle_agent_event(data: &Bytes, events: &mpsc::Sender<TransportEvent>, started: Instant) {
    let event: wire::AgentEvent = match serde_json::from_slice(data) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Ignoring unparseable data channel event.");
            return;
        }
    };
    let now_ms = started.elapsed().as_millis() as u64;
    let outcome = match event {
        wire::AgentEvent::UserTranscript { text } => {
            events
                .send(TransportEvent::Transcript(TranscriptEntry::new(
                    Role::User,
                    text,
                    now_ms,
                )))
                .await
        }
        wire::AgentEvent::AgentTranscript { text } => {
            events
                .send(TransportEvent::Transcript(TranscriptEntry::new(
                    Role::Agent,
                    text,
                    now_ms,
                )))
                .await
        }
        wire::AgentEvent::AgentMessage { text } => events.send(TransportEvent::Message(text)).await,
        wire::AgentEvent::ToolCall { name, args } => {
            events
                .send(TransportEvent::ToolCall(crate::canvas::ToolCall {
                    name,
                    args,
                }))
                .await
        }
        wire::AgentEvent::Error { message } => {
            warn!(%message, "Agent reported an error on the data channel.");
            return;
        }
    };
    if outcome.is_err() {
        debug!("Event channel closed; dropping data channel event.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::ToolName;
    use crate::transport::TransportKind;

    #[test]
    fn parses_data_channel_events() {
        let event: wire::AgentEvent =
            serde_json::from_str(r#"{"type":"user_transcript","text":"remove the background"}"#)
                .unwrap();
        assert!(matches!(event, wire::AgentEvent::UserTranscript { .. }));

        let event: wire::AgentEvent = serde_json::from_str(
            r#"{"type":"tool_call","name":"remove-background","args":{"feather":2}}"#,
        )
        .unwrap();
        match event {
            wire::AgentEvent::ToolCall { name, args } => {
                assert_eq!(name, ToolName::RemoveBackground);
                assert_eq!(args["feather"], 2);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn serializes_session_config() {
        let hello = wire::ClientEvent::SessionConfig {
            modalities: vec!["audio".to_string(), "text".to_string()],
        };
        let json = serde_json::to_string(&hello).unwrap();
        assert_eq!(
            json,
            r#"{"type":"session_config","modalities":["audio","text"]}"#
        );
    }

    #[tokio::test]
    async fn agent_events_are_stamped_with_session_relative_time() {
        let (tx, mut rx) = mpsc::channel(4);
        let started = Instant::now();
        let payload = Bytes::from_static(br#"{"type":"agent_transcript","text":"done"}"#);
        handle_agent_event(&payload, &tx, started).await;

        match rx.recv().await.unwrap() {
            TransportEvent::Transcript(entry) => {
                assert_eq!(entry.role, Role::Agent);
                assert_eq!(entry.text, "done");
                assert!(entry.timestamp_ms < 1000);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unparseable_payloads_are_ignored() {
        let (tx, mut rx) = mpsc::channel(4);
        handle_agent_event(&Bytes::from_static(b"not json"), &tx, Instant::now()).await;
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn send_audio_without_connection_is_a_no_op() {
        let config = Arc::new(crate::config::test_config(TransportKind::PeerMedia));
        let transport = PeerMediaTransport::new(config);
        transport.send_audio(Bytes::from_static(b"\x00\x01"));
    }
}
