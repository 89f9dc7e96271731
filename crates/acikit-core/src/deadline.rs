// Deadline wrapper for any controller operation.

use std::future::Future;
use std::time::Duration;

use crate::error::CoreError;

/// Run `fut` with a deadline. On expiry the future is dropped, which aborts
/// any in-flight request it owns, and [`CoreError::Timeout`] is returned.
pub async fn within<T, F>(timeout: Duration, fut: F) -> Result<T, CoreError>
where
    F: Future<Output = Result<T, CoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::Timeout {
            timeout_secs: timeout.as_secs().max(1),
        }),
    }
}
