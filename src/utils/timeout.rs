//! Timeout wrappers for fetches that might hang

use std::future::Future;
use std::time::Duration;
use tokio::time::{error::Elapsed, timeout};

/// Execute `operation` with a timeout
pub async fn with_custom_timeout<F, T>(operation: F, duration: Duration) -> Result<T, Elapsed>
where
    F: Future<Output = T>,
{
    timeout(duration, operation).await
}

/// Execute `operation`, bounded only when `duration` is set
///
/// Returns `None` on expiry.
pub async fn with_timeout_opt<F, T>(operation: F, duration: Option<Duration>) -> Option<T>
where
    F: Future<Output = T>,
{
    match duration {
        Some(limit) => with_custom_timeout(operation, limit).await.ok(),
        None => Some(operation.await),
    }
}
