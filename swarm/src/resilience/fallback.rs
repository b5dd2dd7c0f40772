//! Ordered fallback chains.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::warn;

use crate::error::{Error, Result};

type StepFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;
type FailureObserver = Arc<dyn Fn(&str, &Error) + Send + Sync>;

/// One named attempt in a chain.
#[derive(Clone)]
pub struct FallbackStep<T> {
    name: String,
    op: StepFn<T>,
}

impl<T> FallbackStep<T> {
    /// Create a step from an async factory.
    pub fn new<F, Fut>(name: impl Into<String>, op: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            op: Arc::new(move || Box::pin(op())),
        }
    }
}

impl<T> std::fmt::Debug for FallbackStep<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackStep")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Attempts steps in order until one succeeds.
#[derive(Clone)]
pub struct FallbackChain<T> {
    steps: Vec<FallbackStep<T>>,
    on_failure: Option<FailureObserver>,
}

impl<T> Default for FallbackChain<T> {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            on_failure: None,
        }
    }
}

impl<T> std::fmt::Debug for FallbackChain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackChain")
            .field("steps", &self.steps.len())
            .finish_non_exhaustive()
    }
}

impl<T> FallbackChain<T> {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    #[must_use]
    pub fn step(mut self, step: FallbackStep<T>) -> Self {
        self.steps.push(step);
        self
    }

    /// Observe each step failure before the chain moves on.
    #[must_use]
    pub fn on_failure(mut self, observer: impl Fn(&str, &Error) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(observer));
        self
    }

    /// Run the chain.
    ///
    /// # Errors
    ///
    /// [`Error::AllFallbacksFailed`] carrying every step's error when no
    /// step succeeds (also for an empty chain).
    pub async fn run(&self) -> Result<T> {
        let mut errors = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            match (step.op)().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(step = %step.name, error = %e, "fallback step failed");
                    if let Some(observer) = &self.on_failure {
                        observer(&step.name, &e);
                    }
                    errors.push(e);
                }
            }
        }
        Err(Error::AllFallbacksFailed(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Mutex;

    #[tokio::test]
    async fn first_success_wins() {
        let chain = FallbackChain::new()
            .step(FallbackStep::new("primary", || async {
                Err::<&str, _>(Error::generation("primary down"))
            }))
            .step(FallbackStep::new("secondary", || async { Ok("from secondary") }));
        assert_eq!(chain.run().await.expect("secondary succeeds"), "from secondary");
    }

    #[tokio::test]
    async fn all_failures_collect_errors() {
        let chain: FallbackChain<()> = FallbackChain::new()
            .step(FallbackStep::new("a", || async {
                Err(Error::generation("a down"))
            }))
            .step(FallbackStep::new("b", || async {
                Err(Error::generation("b down"))
            }));
        let err = chain.run().await.expect_err("nothing succeeds");
        match err {
            Error::AllFallbacksFailed(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn failure_observer_sees_each_step() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in_observer = Arc::clone(&seen);
        let chain: FallbackChain<()> = FallbackChain::new()
            .step(FallbackStep::new("a", || async {
                Err(Error::generation("a down"))
            }))
            .step(FallbackStep::new("b", || async {
                Err(Error::generation("b down"))
            }))
            .on_failure(move |name, _| {
                seen_in_observer
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .push(name.to_owned());
            });
        let _ = chain.run().await;
        let seen = seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        assert_eq!(*seen, ["a", "b"]);
    }

    #[tokio::test]
    async fn empty_chain_fails() {
        let chain: FallbackChain<()> = FallbackChain::new();
        assert_eq!(
            chain.run().await.expect_err("empty").kind(),
            ErrorKind::AllFallbacksFailed
        );
    }
}
