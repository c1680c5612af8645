//! Transport adapters for the live voice connection.
//!
//! Two concrete transports speak different wire protocols behind one
//! contract:
//!
//! - `realtime_ws`: a persistent duplex WebSocket to the agent gateway,
//!   one JSON frame per audio chunk.
//! - `peer_media`: a WebRTC peer session negotiated through out-of-band
//!   SDP signaling, with agent events on a data channel.
//!
//! Callers never branch on which transport is active; the session
//! controller acquires one through [`TransportKind::create`] and drives it
//! through the [`Transport`] trait alone.

pub mod peer_media;
pub mod realtime_ws;

use crate::canvas::ToolCall;
use crate::config::Config;
use crate::error::ConnectError;
use crate::transcript::TranscriptEntry;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An inbound event delivered by the active transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A complete text message from the agent.
    Message(String),
    /// Connection status change. `connected: false` means the remote side
    /// ended the session.
    Status { connected: bool },
    /// A structured edit request from the agent.
    ToolCall(ToolCall),
    /// A transcript line for either side of the conversation.
    Transcript(TranscriptEntry),
}

/// Which transport implementation a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    RealtimeWs,
    PeerMedia,
}

impl TransportKind {
    /// Builds a disconnected transport of this kind.
    pub fn create(self, config: Arc<Config>) -> Box<dyn Transport> {
        match self {
            TransportKind::RealtimeWs => Box::new(realtime_ws::RealtimeWsTransport::new(config)),
            TransportKind::PeerMedia => Box::new(peer_media::PeerMediaTransport::new(config)),
        }
    }
}

/// One physical connection to the remote conversational agent.
///
/// Implementations stream microphone audio out and deliver agent events in
/// through the channel handed to [`Transport::connect`]. Events for the
/// same logical turn arrive in non-decreasing timestamp order; tool calls
/// may interleave with transcript events in arbitrary relative order.
#[async_trait]
pub trait Transport: Send {
    /// Establishes the connection. Rejects with a classified error and
    /// leaves no partial resources allocated on failure.
    async fn connect(&mut self, events: mpsc::Sender<TransportEvent>) -> Result<(), ConnectError>;

    /// Closes the connection. Idempotent; safe to call on an already-closed
    /// transport. Local state is released unconditionally even if the
    /// underlying close hangs.
    async fn disconnect(&mut self);

    /// Queues one audio frame for the agent. Fire-and-forget; frame order
    /// is preserved by the underlying transport.
    fn send_audio(&self, frame: Bytes);
}
