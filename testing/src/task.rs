//! A lifecycle task resolved by hand.

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Task factory accepted by `LifecycleConfig`
pub type TaskFactory =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<Value>> + Send>;

#[derive(Default)]
struct Shared {
    resolver: Option<oneshot::Sender<anyhow::Result<Value>>>,
    token: Option<CancellationToken>,
    created: bool,
}

/// A task whose outcome is decided by the test
///
/// Hand [`ManualTask::factory`] to a lifecycle invocation, then settle the
/// task with [`ManualTask::resolve`] or [`ManualTask::fail`]. The token the
/// controller passed in is kept so tests can check cancellation.
///
/// # Example
///
/// ```ignore
/// let task = ManualTask::new();
/// let handle = invoke(LifecycleConfig::new(engine, types, task.factory()))?;
/// handle.abort();
/// assert!(task.was_cancelled());
/// assert!(!task.resolve(json!({})));
/// ```
#[derive(Clone, Default)]
pub struct ManualTask {
    shared: Arc<Mutex<Shared>>,
}

impl ManualTask {
    /// Create an unresolved task
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The factory to hand to `LifecycleConfig`
    ///
    /// Only one factory per task should be invoked.
    #[must_use]
    pub fn factory(&self) -> TaskFactory {
        let shared = Arc::clone(&self.shared);
        Box::new(move |token| {
            let (tx, rx) = oneshot::channel();
            {
                let mut shared = shared.lock().unwrap_or_else(PoisonError::into_inner);
                shared.resolver = Some(tx);
                shared.token = Some(token);
                shared.created = true;
            }
            Box::pin(async move {
                rx.await
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("manual task dropped without a result")))
            })
        })
    }

    /// Whether the factory was called
    #[must_use]
    pub fn was_created(&self) -> bool {
        self.lock().created
    }

    /// Whether the controller cancelled the task's token
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.lock()
            .token
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Complete the task successfully
    ///
    /// Returns `false` if the task was never created, was already settled, or
    /// is no longer being awaited.
    pub fn resolve(&self, value: Value) -> bool {
        self.settle(Ok(value))
    }

    /// Fail the task
    ///
    /// Returns `false` under the same conditions as [`ManualTask::resolve`].
    pub fn fail(&self, error: anyhow::Error) -> bool {
        self.settle(Err(error))
    }

    fn settle(&self, result: anyhow::Result<Value>) -> bool {
        self.lock()
            .resolver
            .take()
            .is_some_and(|tx| tx.send(result).is_ok())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ManualTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.lock();
        f.debug_struct("ManualTask")
            .field("created", &shared.created)
            .field("pending", &shared.resolver.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_resolve_completes_the_future() {
        let task = ManualTask::new();
        let future = (task.factory())(CancellationToken::new());
        assert!(task.was_created());

        assert!(task.resolve(json!(1)));
        assert_eq!(future.await.unwrap(), json!(1));
        assert!(!task.resolve(json!(2)));
    }

    #[tokio::test]
    async fn test_dropped_future_rejects_settlement() {
        let task = ManualTask::new();
        let token = CancellationToken::new();
        let future = (task.factory())(token.clone());
        drop(future);
        token.cancel();

        assert!(task.was_cancelled());
        assert!(!task.fail(anyhow::anyhow!("late")));
    }
}
