//! Tool-call mediation: preview, approve, reject.
//!
//! Every agent tool call is executed through the opaque
//! [`CanvasOperations`] provider in preview mode and parked as a
//! [`PendingAction`] until the user decides. At most one pending action
//! exists at a time; a tool call arriving while one is outstanding is
//! rejected with [`MediatorError::Busy`] rather than queued or allowed to
//! replace the preview under review.

use crate::canvas::{ActionResult, CanvasCommit, CanvasOperations, ToolCall};
use crate::error::MediatorError;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// One tool call paired with its (possibly failed) preview result,
/// awaiting a user decision.
#[derive(Debug, Clone)]
pub struct PendingAction {
    pub call: ToolCall,
    pub result: ActionResult,
}

/// Holds at most one pending action and routes approvals to the canvas.
pub struct ActionMediator {
    ops: Arc<dyn CanvasOperations>,
    commit: Arc<dyn CanvasCommit>,
    pending: Mutex<Option<PendingAction>>,
    executing: AtomicBool,
}

impl ActionMediator {
    pub fn new(ops: Arc<dyn CanvasOperations>, commit: Arc<dyn CanvasCommit>) -> Self {
        Self {
            ops,
            commit,
            pending: Mutex::new(None),
            executing: AtomicBool::new(false),
        }
    }

    /// Runs a tool call in preview mode and parks the outcome as the
    /// pending action.
    ///
    /// Provider failures are folded into a failed [`ActionResult`] so the
    /// user sees what the agent attempted; they never propagate to the
    /// session's event path. Returns [`MediatorError::Busy`] if an action
    /// is already pending or a preview is still executing.
    pub async fn execute_tool_call(&self, call: ToolCall) -> Result<ActionResult, MediatorError> {
        if self.pending.lock().unwrap().is_some() || self.executing.swap(true, Ordering::SeqCst) {
            warn!(tool = %call.name, "Rejecting tool call: an action is already awaiting review.");
            return Err(MediatorError::Busy);
        }

        info!(tool = %call.name, "Executing tool call in preview mode.");
        let result = match self.ops.run(call.name, &call.args).await {
            Ok(preview) => ActionResult::Success { preview },
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool preview failed.");
                ActionResult::Failure {
                    error: e.to_string(),
                }
            }
        };

        *self.pending.lock().unwrap() = Some(PendingAction {
            call,
            result: result.clone(),
        });
        self.executing.store(false, Ordering::SeqCst);
        Ok(result)
    }

    /// Commits the pending preview to the canvas and clears the pending
    /// action.
    ///
    /// The pending action is cleared even when the commit itself fails;
    /// commits are never retried automatically. A failed preview cannot be
    /// approved and stays pending for the user to reject.
    pub fn approve(&self) -> Result<(), MediatorError> {
        let mut pending = self.pending.lock().unwrap();
        let action = pending.as_ref().ok_or(MediatorError::NothingPending)?;
        let Some(preview) = action.result.preview() else {
            return Err(MediatorError::NotApprovable);
        };

        let slot = action.call.name.target_slot();
        let outcome = self.commit.commit(preview, slot);
        info!(tool = %action.call.name, ?slot, ok = outcome.is_ok(), "Pending action approved.");
        *pending = None;
        outcome.map_err(MediatorError::from)
    }

    /// Discards the pending action without touching canvas state.
    pub fn reject(&self) -> Result<(), MediatorError> {
        let mut pending = self.pending.lock().unwrap();
        let action = pending.take().ok_or(MediatorError::NothingPending)?;
        info!(tool = %action.call.name, "Pending action rejected.");
        Ok(())
    }

    /// Snapshot of the pending action, if any.
    pub fn pending_action(&self) -> Option<PendingAction> {
        self.pending.lock().unwrap().clone()
    }

    /// Silently drops any pending action. Used on session teardown: an
    /// approval decision is never valid across a session boundary.
    pub fn clear_pending(&self) {
        self.pending.lock().unwrap().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{Artifact, TargetSlot, ToolName};
    use crate::error::CommitError;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct StubOps {
        fail: bool,
        calls: AtomicUsize,
        block: Option<Arc<Notify>>,
    }

    impl StubOps {
        fn ok() -> Self {
            Self {
                fail: false,
                calls: AtomicUsize::new(0),
                block: None,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                calls: AtomicUsize::new(0),
                block: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl CanvasOperations for StubOps {
        async fn run(
            &self,
            name: ToolName,
            _args: &serde_json::Value,
        ) -> anyhow::Result<Artifact> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.block {
                gate.notified().await;
            }
            if self.fail {
                anyhow::bail!("provider unavailable");
            }
            Ok(Artifact::png(format!("preview-{}", name).into_bytes()))
        }
    }

    #[derive(Default)]
    struct RecordingCommit {
        commits: Mutex<Vec<(Artifact, TargetSlot)>>,
        fail: bool,
    }

    impl CanvasCommit for RecordingCommit {
        fn commit(&self, artifact: &Artifact, slot: TargetSlot) -> Result<(), CommitError> {
            self.commits.lock().unwrap().push((artifact.clone(), slot));
            if self.fail {
                return Err(CommitError("canvas detached".into()));
            }
            Ok(())
        }
    }

    fn call(name: ToolName) -> ToolCall {
        ToolCall {
            name,
            args: serde_json::json!({"prompt": "make it blue"}),
        }
    }

    fn mediator(ops: StubOps, commit: RecordingCommit) -> (ActionMediator, Arc<RecordingCommit>) {
        let commit = Arc::new(commit);
        (
            ActionMediator::new(Arc::new(ops), commit.clone()),
            commit,
        )
    }

    #[tokio::test]
    async fn successful_preview_becomes_pending() {
        let (mediator, _) = mediator(StubOps::ok(), RecordingCommit::default());
        let result = mediator
            .execute_tool_call(call(ToolName::MagicEdit))
            .await
            .unwrap();
        assert!(result.is_success());

        let pending = mediator.pending_action().expect("action should be pending");
        assert_eq!(pending.call.name, ToolName::MagicEdit);
        assert!(pending.result.is_success());
    }

    #[tokio::test]
    async fn failed_preview_is_still_shown_as_pending() {
        let (mediator, commit) = mediator(StubOps::failing(), RecordingCommit::default());
        let result = mediator
            .execute_tool_call(call(ToolName::Upscale))
            .await
            .unwrap();
        assert!(!result.is_success());
        assert_eq!(result.error(), Some("provider unavailable"));

        let pending = mediator.pending_action().expect("failure is still pending");
        assert!(!pending.result.is_success());

        // A failed preview cannot be approved and commits nothing.
        assert!(matches!(
            mediator.approve(),
            Err(MediatorError::NotApprovable)
        ));
        assert!(commit.commits.lock().unwrap().is_empty());
        // But it can be rejected.
        mediator.reject().unwrap();
        assert!(mediator.pending_action().is_none());
    }

    #[tokio::test]
    async fn second_tool_call_while_pending_is_rejected() {
        let (mediator, _) = mediator(StubOps::ok(), RecordingCommit::default());
        mediator
            .execute_tool_call(call(ToolName::MagicEdit))
            .await
            .unwrap();

        let err = mediator
            .execute_tool_call(call(ToolName::Restore))
            .await
            .unwrap_err();
        assert!(matches!(err, MediatorError::Busy));

        // The original pending action is untouched.
        let pending = mediator.pending_action().unwrap();
        assert_eq!(pending.call.name, ToolName::MagicEdit);
    }

    #[tokio::test]
    async fn concurrent_execution_is_rejected_while_preview_runs() {
        let gate = Arc::new(Notify::new());
        let ops = Arc::new(StubOps {
            fail: false,
            calls: AtomicUsize::new(0),
            block: Some(gate.clone()),
        });
        let mediator = Arc::new(ActionMediator::new(
            ops.clone(),
            Arc::new(RecordingCommit::default()),
        ));

        let first = {
            let mediator = mediator.clone();
            tokio::spawn(async move { mediator.execute_tool_call(call(ToolName::MagicEdit)).await })
        };
        tokio::task::yield_now().await;

        let err = mediator
            .execute_tool_call(call(ToolName::Restore))
            .await
            .unwrap_err();
        assert!(matches!(err, MediatorError::Busy));

        gate.notify_one();
        assert!(first.await.unwrap().is_ok());
        // The rejected call never reached the provider.
        assert_eq!(ops.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn approve_commits_exactly_once_and_clears_pending() {
        let (mediator, commit) = mediator(StubOps::ok(), RecordingCommit::default());
        mediator
            .execute_tool_call(call(ToolName::GenerateBackground))
            .await
            .unwrap();
        let preview = mediator
            .pending_action()
            .unwrap()
            .result
            .preview()
            .cloned()
            .unwrap();

        mediator.approve().unwrap();

        let commits = commit.commits.lock().unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].0, preview);
        assert_eq!(commits[0].1, TargetSlot::Background);
        drop(commits);

        assert!(mediator.pending_action().is_none());
        assert!(matches!(
            mediator.approve(),
            Err(MediatorError::NothingPending)
        ));
    }

    #[tokio::test]
    async fn commit_failure_surfaces_but_still_clears_pending() {
        let (mediator, commit) = mediator(
            StubOps::ok(),
            RecordingCommit {
                fail: true,
                ..Default::default()
            },
        );
        mediator
            .execute_tool_call(call(ToolName::MagicEdit))
            .await
            .unwrap();

        let err = mediator.approve().unwrap_err();
        assert!(matches!(err, MediatorError::Commit(_)));
        // No retry loop: the action is gone even though the commit failed.
        assert!(mediator.pending_action().is_none());
        assert_eq!(commit.commits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reject_is_a_pure_discard() {
        let (mediator, commit) = mediator(StubOps::ok(), RecordingCommit::default());
        mediator
            .execute_tool_call(call(ToolName::EnhanceFace))
            .await
            .unwrap();

        mediator.reject().unwrap();
        assert!(mediator.pending_action().is_none());
        assert!(commit.commits.lock().unwrap().is_empty());

        assert!(matches!(
            mediator.reject(),
            Err(MediatorError::NothingPending)
        ));
    }

    #[tokio::test]
    async fn clearing_pending_unblocks_the_next_tool_call() {
        let (mediator, _) = mediator(StubOps::ok(), RecordingCommit::default());
        mediator
            .execute_tool_call(call(ToolName::MagicEdit))
            .await
            .unwrap();
        mediator.clear_pending();
        assert!(mediator.pending_action().is_none());

        let result = mediator
            .execute_tool_call(call(ToolName::Restore))
            .await
            .unwrap();
        assert!(result.is_success());
    }
}
