//! Owns the live voice session: one transport, one state machine.
//!
//! The controller is the only component that holds the transport, the
//! transcript, and the pending action; the aggregator and mediator only
//! derive new state from events it routes to them. `connect()` is guarded
//! by a flag that is checked-and-set before the first suspension point, so
//! a second call can never race past an in-flight attempt.

use crate::canvas::{CanvasCommit, CanvasOperations};
use crate::config::Config;
use crate::error::{ConnectError, MediatorError};
use crate::session::mediator::{ActionMediator, PendingAction};
use crate::transcript::{Role, TranscriptAggregator, TranscriptEntry};
use crate::transport::{Transport, TransportEvent, TransportKind};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// Connection lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Produces a disconnected transport for a new session. The default
/// factory dispatches on the configured [`TransportKind`]; tests supply
/// their own.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Box<dyn Transport>;
}

struct KindFactory {
    kind: TransportKind,
    config: Arc<Config>,
}

impl TransportFactory for KindFactory {
    fn create(&self) -> Box<dyn Transport> {
        self.kind.create(self.config.clone())
    }
}

/// State shared between the controller and its event pump task.
struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    transcript: StdMutex<TranscriptAggregator>,
    mediator: ActionMediator,
    connect_guard: AtomicBool,
    transport: AsyncMutex<Option<Box<dyn Transport>>>,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

/// The orchestrating state machine for one voice session.
pub struct SessionController {
    config: Arc<Config>,
    factory: Arc<dyn TransportFactory>,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl SessionController {
    pub fn new(
        config: Arc<Config>,
        ops: Arc<dyn CanvasOperations>,
        commit: Arc<dyn CanvasCommit>,
    ) -> Self {
        let factory = Arc::new(KindFactory {
            kind: config.transport,
            config: config.clone(),
        });
        Self::with_factory(config, factory, ops, commit)
    }

    pub fn with_factory(
        config: Arc<Config>,
        factory: Arc<dyn TransportFactory>,
        ops: Arc<dyn CanvasOperations>,
        commit: Arc<dyn CanvasCommit>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            state_tx,
            transcript: StdMutex::new(TranscriptAggregator::new(config.dedup_window_ms)),
            mediator: ActionMediator::new(ops, commit),
            connect_guard: AtomicBool::new(false),
            transport: AsyncMutex::new(None),
            pump: StdMutex::new(None),
        });
        Self {
            config,
            factory,
            shared,
            state_rx,
        }
    }

    /// Opens a voice session. A call while one is connecting or connected
    /// is a no-op; exactly one transport is ever opened per live session.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        // Checked-and-set before the first await. State updates alone are
        // not enough: a second call could arrive before an async state
        // transition becomes visible.
        if self.shared.connect_guard.swap(true, Ordering::SeqCst) {
            debug!("connect() ignored: an attempt is already in flight.");
            return Ok(());
        }
        if *self.state_rx.borrow() != ConnectionState::Disconnected {
            self.shared.connect_guard.store(false, Ordering::SeqCst);
            debug!("connect() ignored: session is already live.");
            return Ok(());
        }

        let session_id = Uuid::new_v4();
        self.shared
            .state_tx
            .send_replace(ConnectionState::Connecting);
        info!(%session_id, transport = ?self.config.transport, "Connecting voice session.");

        match self.establish(session_id).await {
            Ok(()) => {
                self.shared
                    .state_tx
                    .send_replace(ConnectionState::Connected);
                self.shared.connect_guard.store(false, Ordering::SeqCst);
                info!(%session_id, "Voice session connected.");
                Ok(())
            }
            Err(e) => {
                self.shared.transport.lock().await.take();
                self.shared
                    .state_tx
                    .send_replace(ConnectionState::Disconnected);
                self.shared.connect_guard.store(false, Ordering::SeqCst);
                error!(%session_id, error = %e, hint = e.remediation(), "Voice session failed to connect.");
                Err(e)
            }
        }
    }

    async fn establish(&self, session_id: Uuid) -> Result<(), ConnectError> {
        let mut transport = self.factory.create();
        let (events_tx, events_rx) = mpsc::channel(128);
        transport.connect(events_tx).await?;
        *self.shared.transport.lock().await = Some(transport);

        let started = Instant::now();
        let span = info_span!("session_pump", %session_id);
        let pump = tokio::spawn(
            run_event_pump(self.shared.clone(), events_rx, started).instrument(span),
        );
        *self.shared.pump.lock().unwrap() = Some(pump);
        Ok(())
    }

    /// Tears the session down. Safe to call when never connected and safe
    /// to call repeatedly. Local state is released unconditionally; the
    /// transport-level close is best-effort.
    pub async fn disconnect(&self) {
        let held = self.shared.transport.lock().await.is_some();
        if !held && *self.state_rx.borrow() == ConnectionState::Disconnected {
            debug!("disconnect() ignored: no session is live.");
            return;
        }

        self.shared
            .state_tx
            .send_replace(ConnectionState::Disconnecting);
        if let Some(handle) = self.shared.pump.lock().unwrap().take() {
            handle.abort();
        }
        release_locally(&self.shared).await;
        info!("Voice session disconnected.");
    }

    /// Queues one microphone frame for the agent. Fire-and-forget; frames
    /// sent while no transport is held (or while one is being swapped) are
    /// dropped.
    pub fn send_audio(&self, frame: Bytes) {
        if let Ok(guard) = self.shared.transport.try_lock() {
            if let Some(transport) = guard.as_ref() {
                transport.send_audio(frame);
                return;
            }
        }
        debug!("Dropping audio frame: no transport available.");
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// A receiver the UI can watch for state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.shared.transcript.lock().unwrap().snapshot()
    }

    /// User-initiated transcript clearing; the session stays live.
    pub fn clear_transcript(&self) {
        self.shared.transcript.lock().unwrap().clear();
    }

    pub fn pending_action(&self) -> Option<PendingAction> {
        self.shared.mediator.pending_action()
    }

    /// Applies the pending preview to the canvas. See
    /// [`ActionMediator::approve`].
    pub fn approve(&self) -> Result<(), MediatorError> {
        self.shared.mediator.approve()
    }

    /// Discards the pending preview. See [`ActionMediator::reject`].
    pub fn reject(&self) -> Result<(), MediatorError> {
        self.shared.mediator.reject()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        // Scoped release: the pump stops and local state is marked
        // disconnected even on abrupt teardown. The transport closes when
        // its box is dropped with the shared state.
        if let Some(handle) = self.shared.pump.lock().unwrap().take() {
            handle.abort();
        }
        self.shared.mediator.clear_pending();
        self.shared.connect_guard.store(false, Ordering::SeqCst);
        self.shared
            .state_tx
            .send_replace(ConnectionState::Disconnected);
    }
}

/// Fans transport events out to the transcript aggregator and the action
/// mediator until the channel closes or the remote side hangs up. Either
/// way the session is released: a transport that drops its event sender
/// without an explicit hangup must not strand the session in `Connected`.
async fn run_event_pump(
    shared: Arc<Shared>,
    mut events: mpsc::Receiver<TransportEvent>,
    started: Instant,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Transcript(entry) => {
                if !shared.transcript.lock().unwrap().push(entry) {
                    debug!("Dropped duplicate transcript entry.");
                }
            }
            TransportEvent::Message(text) => {
                // Same session-relative clock as transport-stamped
                // transcript entries, so the dedup window stays coherent.
                let timestamp_ms = started.elapsed().as_millis() as u64;
                shared
                    .transcript
                    .lock()
                    .unwrap()
                    .push(TranscriptEntry::new(Role::Agent, text, timestamp_ms));
            }
            TransportEvent::ToolCall(call) => {
                // A failed preview or a busy mediator must never tear the
                // session down.
                match shared.mediator.execute_tool_call(call).await {
                    Ok(result) => {
                        info!(ok = result.is_success(), "Tool call previewed; awaiting user decision.")
                    }
                    Err(e) => warn!(error = %e, "Tool call not executed."),
                }
            }
            TransportEvent::Status { connected: true } => {
                debug!("Transport reports connected.");
            }
            TransportEvent::Status { connected: false } => {
                info!("Transport reports disconnected; releasing session state.");
                break;
            }
        }
    }
    release_locally(&shared).await;
    debug!("Event pump finished.");
}

/// The single release path shared by `disconnect()`, remote hangup, and
/// connect failure: transport closed best-effort, transcript and pending
/// action cleared, state machine returned to `Disconnected`.
async fn release_locally(shared: &Shared) {
    let transport = shared.transport.lock().await.take();
    if let Some(mut transport) = transport {
        transport.disconnect().await;
    }
    shared.transcript.lock().unwrap().clear();
    shared.mediator.clear_pending();
    shared.connect_guard.store(false, Ordering::SeqCst);
    shared
        .state_tx
        .send_replace(ConnectionState::Disconnected);
}
