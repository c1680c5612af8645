//! Voice Session Management
//!
//! This module contains the core logic for a live voice session. It is
//! structured into submodules for clarity:
//!
//! - `controller`: owns the transport and the session state machine, from
//!   `connect()` through teardown.
//! - `mediator`: executes agent tool calls in preview mode and holds the
//!   single pending action awaiting user approval.

pub mod controller;
pub mod mediator;

pub use controller::SessionController;
