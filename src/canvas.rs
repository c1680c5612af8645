//! Canvas tool vocabulary and the traits the embedding editor implements.
//!
//! The remote agent requests edits through a closed set of tools. Each tool
//! call is executed in preview mode through [`CanvasOperations`], producing
//! a candidate [`Artifact`] that only reaches shared canvas state when the
//! user approves it and the mediator invokes [`CanvasCommit`].

use crate::error::CommitError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The closed set of canvas operations the agent may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolName {
    GenerateBackground,
    MagicEdit,
    RemoveBackground,
    Upscale,
    Restore,
    EnhanceFace,
}

impl ToolName {
    /// The canvas slot an approved result of this tool is committed to.
    pub fn target_slot(self) -> TargetSlot {
        match self {
            ToolName::GenerateBackground => TargetSlot::Background,
            ToolName::MagicEdit => TargetSlot::Image,
            ToolName::RemoveBackground => TargetSlot::Image,
            ToolName::Upscale => TargetSlot::Image,
            ToolName::Restore => TargetSlot::Image,
            ToolName::EnhanceFace => TargetSlot::Image,
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ToolName::GenerateBackground => "generate-background",
            ToolName::MagicEdit => "magic-edit",
            ToolName::RemoveBackground => "remove-background",
            ToolName::Upscale => "upscale",
            ToolName::Restore => "restore",
            ToolName::EnhanceFace => "enhance-face",
        };
        f.write_str(name)
    }
}

/// Where on the canvas an approved artifact lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSlot {
    /// The primary image layer.
    Image,
    /// The background layer behind the subject.
    Background,
}

/// A structured edit request from the remote agent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCall {
    pub name: ToolName,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// A candidate result produced by running a tool in preview mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub mime: String,
    pub data: Bytes,
}

impl Artifact {
    pub fn png(data: impl Into<Bytes>) -> Self {
        Self {
            mime: "image/png".to_string(),
            data: data.into(),
        }
    }
}

/// Outcome of a preview execution. A failed preview still becomes a pending
/// action so the user can see what the agent attempted.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResult {
    Success { preview: Artifact },
    Failure { error: String },
}

impl ActionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionResult::Success { .. })
    }

    pub fn preview(&self) -> Option<&Artifact> {
        match self {
            ActionResult::Success { preview } => Some(preview),
            ActionResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ActionResult::Success { .. } => None,
            ActionResult::Failure { error } => Some(error),
        }
    }
}

/// The image-operation provider behind the tool set.
///
/// Implementations run the requested operation against whatever external
/// services are configured and return a candidate artifact without touching
/// shared canvas state. The mediator treats this as opaque.
#[async_trait]
pub trait CanvasOperations: Send + Sync {
    async fn run(&self, name: ToolName, args: &serde_json::Value) -> anyhow::Result<Artifact>;
}

/// Applies an approved preview to shared canvas state.
///
/// Called at most once per pending action, only on approval. Expected to be
/// side-effect-complete on return.
pub trait CanvasCommit: Send + Sync {
    fn commit(&self, artifact: &Artifact, slot: TargetSlot) -> Result<(), CommitError>;
}
