//! Easel Voice Session Core
//!
//! This library contains the connection lifecycle and tool-call mediation
//! logic that sits between a realtime conversational agent and the Easel
//! canvas editor. The canvas itself, the image providers behind each tool,
//! and the UI are external collaborators reached through narrow traits.
//!
//! Module overview:
//!
//! - `config`: environment-driven configuration (transport selection and
//!   credentials).
//! - `canvas`: the closed set of canvas tools, preview artifacts, and the
//!   traits the embedding application implements.
//! - `transcript`: ordered, deduplicated transcript aggregation.
//! - `transport`: the adapter contract plus the two concrete transports
//!   (streaming WebSocket gateway, WebRTC peer session).
//! - `session`: the session controller state machine and the action
//!   mediator that holds tool-call previews for user approval.

pub mod canvas;
pub mod config;
pub mod error;
pub mod session;
pub mod transcript;
pub mod transport;

pub use canvas::{ActionResult, Artifact, CanvasCommit, CanvasOperations, TargetSlot, ToolCall, ToolName};
pub use config::Config;
pub use error::{CommitError, ConnectError, MediatorError};
pub use session::controller::{ConnectionState, SessionController, TransportFactory};
pub use session::mediator::{ActionMediator, PendingAction};
pub use transcript::{Role, TranscriptAggregator, TranscriptEntry};
pub use transport::{Transport, TransportEvent, TransportKind};
