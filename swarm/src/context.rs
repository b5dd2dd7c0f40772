//! Per-run context shared with tools, guardrails, and hooks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::value::{JsonMap, Value};

/// A cooperative cancellation flag.
///
/// One signal tears down the whole subtree: the agent loop polls the flag
/// between suspension points and races long awaits against
/// [`CancelFlag::cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelFlag {
    /// Create a new, unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves when cancellation is requested. Resolves immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Reset the flag for a fresh run.
    pub(crate) fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// The explicit per-run context store.
///
/// This is the only mutable state shared across the participants of a
/// single run; there is no cross-agent global state.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Unique id of this run.
    pub run_id: String,
    /// Name of the agent driving the run.
    pub agent_name: String,
    /// Cancellation flag for the run's subtree.
    pub cancel: CancelFlag,
    state: Arc<Mutex<JsonMap<String, Value>>>,
}

impl RunContext {
    /// Create a fresh context for `agent_name`.
    #[must_use]
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self::with_cancel(agent_name, CancelFlag::new())
    }

    /// Create a context sharing an existing cancellation flag.
    #[must_use]
    pub fn with_cancel(agent_name: impl Into<String>, cancel: CancelFlag) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            agent_name: agent_name.into(),
            cancel,
            state: Arc::new(Mutex::new(JsonMap::new())),
        }
    }

    /// Store a value in the run's context store.
    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.state.lock().await.insert(key.into(), value);
    }

    /// Read a value from the run's context store.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.state.lock().await.get(key).cloned()
    }

    /// Snapshot the whole context store.
    pub async fn snapshot(&self) -> JsonMap<String, Value> {
        self.state.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn cancel_flag_wakes_waiters() {
        let flag = CancelFlag::new();
        let waiter = flag.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        flag.cancel();
        task.await.expect("waiter completes");
        assert!(flag.is_cancelled());
    }

    #[tokio::test]
    async fn context_store_round_trips() {
        let cx = RunContext::new("tester");
        cx.set("attempts", json!(2)).await;
        assert_eq!(cx.get("attempts").await, Some(json!(2)));
        assert_eq!(cx.get("missing").await, None);
    }
}
