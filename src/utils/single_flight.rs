//! Single-flight execution
//!
//! Coalesces concurrent requests for the same keyed operation onto one
//! in-flight future. The first caller starts the work, every other caller
//! attaches to it, and the outcome is cached for later callers.
//!
//! The work runs on a spawned task, so a caller that stops awaiting does not
//! cancel the operation for everyone else.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use tokio::sync::Mutex;
use tokio::task::JoinError;

type SharedOutcome<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// One coalesced operation
pub struct SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    slot: Mutex<Option<SharedOutcome<T, E>>>,
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Join the in-flight or cached operation, or start it with `start`
    ///
    /// `start` is only invoked by the caller that finds the slot empty.
    pub async fn run<F, Fut>(&self, start: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let shared = {
            let mut slot = self.slot.lock().await;
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let task = tokio::spawn(start());
                    let outcome = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(join_error) => Err(E::from(join_error)),
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Some(outcome.clone());
                    outcome
                }
            }
        };
        shared.await
    }

    /// Completed outcome, if any
    pub async fn peek(&self) -> Option<Result<T, E>> {
        let slot = self.slot.lock().await;
        slot.as_ref().and_then(|outcome| outcome.peek().cloned())
    }

    /// Forget a completed failure so the next caller starts over
    ///
    /// In-flight operations and successes are left untouched. Returns whether
    /// the slot was cleared.
    pub async fn clear_failure(&self) -> bool {
        let mut slot = self.slot.lock().await;
        let failed = matches!(
            slot.as_ref().and_then(|outcome| outcome.peek()),
            Some(Err(_))
        );
        if failed {
            *slot = None;
        }
        failed
    }
}

impl<T, E> Default for SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct TestError(String);

    impl From<JoinError> for TestError {
        fn from(e: JoinError) -> Self {
            TestError(e.to_string())
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flight: Arc<SingleFlight<u32, TestError>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let flight = Arc::clone(&flight);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                flight
                    .run(|| async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(7)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(7));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(flight.peek().await, Some(Ok(7)));
    }

    #[tokio::test]
    async fn test_failure_is_cached_until_cleared() {
        let flight: SingleFlight<u32, TestError> = SingleFlight::new();

        let first = flight
            .run(|| async { Err(TestError("boom".to_string())) })
            .await;
        assert_eq!(first, Err(TestError("boom".to_string())));

        // Cached: the second start closure never runs
        let second = flight.run(|| async { Ok(1) }).await;
        assert_eq!(second, Err(TestError("boom".to_string())));

        assert!(flight.clear_failure().await);
        assert_eq!(flight.run(|| async { Ok(1) }).await, Ok(1));
        assert!(!flight.clear_failure().await);
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cancel_work() {
        let flight: Arc<SingleFlight<u32, TestError>> = Arc::new(SingleFlight::new());
        let finished = Arc::new(AtomicUsize::new(0));

        let abandoned = {
            let flight = Arc::clone(&flight);
            let finished = Arc::clone(&finished);
            tokio::spawn(async move {
                flight
                    .run(|| async move {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        finished.fetch_add(1, Ordering::SeqCst);
                        Ok(3)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        abandoned.abort();

        assert_eq!(flight.run(|| async { Ok(99) }).await, Ok(3));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
