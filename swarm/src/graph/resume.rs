//! Single-use resume handles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::ResumeError;

use super::checkpoint::CheckpointState;

/// A single-consumer capability to resume a paused workflow.
///
/// The handle is consumed atomically on first use; resuming twice with
/// the same handle (or any clone of it) fails with
/// [`ResumeError::NoInterruptToResume`].
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    /// The engine thread holding the paused state.
    pub thread_id: String,
    /// The paused workflow's id.
    pub workflow_id: String,
    /// Identity of this specific interrupt.
    pub interrupt_id: String,
    /// Stable id of the checkpoint written at the pause.
    pub checkpoint_id: String,
    /// The checkpoint itself.
    pub checkpoint: CheckpointState,
    /// Why the workflow paused.
    pub reason: String,
    consumed: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub(crate) fn new(
        thread_id: impl Into<String>,
        workflow_id: impl Into<String>,
        interrupt_id: impl Into<String>,
        checkpoint_id: impl Into<String>,
        checkpoint: CheckpointState,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            workflow_id: workflow_id.into(),
            interrupt_id: interrupt_id.into(),
            checkpoint_id: checkpoint_id.into(),
            checkpoint,
            reason: reason.into(),
            consumed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Consume the handle. Fails on reuse.
    pub(crate) fn consume(&self) -> Result<(), ResumeError> {
        if self
            .consumed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Ok(())
        } else {
            Err(ResumeError::NoInterruptToResume)
        }
    }

    /// Whether the handle has been consumed.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::checkpoint::EVENT_SCHEMA_VERSION;
    use std::collections::BTreeMap;

    fn handle() -> InterruptHandle {
        InterruptHandle::new(
            "thread-1",
            "wf-1",
            "int-1",
            "chk-1",
            CheckpointState {
                workflow_id: "wf-1".into(),
                run_id: "run-1".into(),
                step_index: 1,
                frontier: vec!["approval".into()],
                channel_values: BTreeMap::new(),
                interruption_reason: Some("Approve?".into()),
                event_schema_version: EVENT_SCHEMA_VERSION.into(),
            },
            "Approve?",
        )
    }

    #[test]
    fn identifiers_are_non_empty() {
        let h = handle();
        assert!(!h.thread_id.is_empty());
        assert!(!h.workflow_id.is_empty());
        assert!(!h.interrupt_id.is_empty());
        assert!(!h.checkpoint_id.is_empty());
    }

    #[test]
    fn consume_is_single_use_across_clones() {
        let h = handle();
        let clone = h.clone();
        h.consume().expect("first use");
        assert!(h.is_consumed());
        assert_eq!(
            clone.consume().expect_err("clone shares the consumed flag"),
            ResumeError::NoInterruptToResume
        );
    }
}
