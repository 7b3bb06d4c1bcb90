use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Attempts per operation before a transaction failure is surfaced.
pub const MAX_TRANSACTION_ATTEMPTS: u32 = 3;

const BACKOFF_STEP_MS: u64 = 25;

/// Run `operation` again from scratch while it fails with a retryable
/// transaction error, up to `MAX_TRANSACTION_ATTEMPTS` times.
pub async fn with_transaction_retry<T, F, Fut>(label: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Err(e) if e.is_retryable() && attempt < MAX_TRANSACTION_ATTEMPTS => {
                tracing::warn!(
                    operation = label,
                    attempt = attempt,
                    error = %e,
                    "Storage transaction failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(BACKOFF_STEP_MS * attempt as u64)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
