//! Classified errors for the voice session core.
//!
//! Connection failures carry a distinct variant per failure class because
//! the remediation shown to the user differs (grant microphone permission
//! vs. check the configured credential vs. close the app holding the
//! device). Nothing in this module is fatal to the embedding application.

use thiserror::Error;

/// A connection-establishment failure, classified for user-facing display.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("audio capture is not supported in this environment")]
    Unsupported,
    #[error("no audio input device was found")]
    DeviceNotFound,
    #[error("the audio input device is in use")]
    DeviceBusy,
    #[error("the voice credential was rejected")]
    InvalidCredential,
    #[error("voice connection failed: {0}")]
    Transport(String),
}

impl ConnectError {
    /// A remediation hint suitable for direct display next to the error.
    pub fn remediation(&self) -> &'static str {
        match self {
            ConnectError::PermissionDenied => {
                "Grant microphone access in your browser or system settings and try again."
            }
            ConnectError::Unsupported => {
                "Voice sessions need audio capture support; try a different device or browser."
            }
            ConnectError::DeviceNotFound => {
                "Plug in or enable a microphone, then reconnect."
            }
            ConnectError::DeviceBusy => {
                "Another application is using the microphone; close it and reconnect."
            }
            ConnectError::InvalidCredential => {
                "Check the voice API credential in settings."
            }
            ConnectError::Transport(_) => "Check your network connection and try again.",
        }
    }
}

/// Failure to apply an approved preview to the canvas.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CommitError(pub String);

/// Errors surfaced by the action mediator.
///
/// `Busy` is a policy outcome, not a fault: a tool call that arrives while
/// another action awaits review is rejected rather than queued or allowed
/// to replace the preview the user is looking at.
#[derive(Debug, Error)]
pub enum MediatorError {
    #[error("another action is already awaiting review")]
    Busy,
    #[error("no action is awaiting review")]
    NothingPending,
    #[error("the pending action failed and has no preview to apply")]
    NotApprovable,
    #[error("could not apply the approved edit: {0}")]
    Commit(#[from] CommitError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_errors_have_distinct_messages() {
        let all = [
            ConnectError::PermissionDenied,
            ConnectError::Unsupported,
            ConnectError::DeviceNotFound,
            ConnectError::DeviceBusy,
            ConnectError::InvalidCredential,
            ConnectError::Transport("timed out".into()),
        ];
        let mut messages: Vec<String> = all.iter().map(|e| e.to_string()).collect();
        let mut hints: Vec<&str> = all.iter().map(|e| e.remediation()).collect();
        messages.sort();
        messages.dedup();
        hints.sort();
        hints.dedup();
        assert_eq!(messages.len(), all.len());
        assert_eq!(hints.len(), all.len());
    }

    #[test]
    fn commit_error_converts_into_mediator_error() {
        let err: MediatorError = CommitError("canvas detached".into()).into();
        assert!(matches!(err, MediatorError::Commit(_)));
        assert!(err.to_string().contains("canvas detached"));
    }
}
