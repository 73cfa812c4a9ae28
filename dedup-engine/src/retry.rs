//! Retry helper for transient repository faults.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use catalog_store::StoreResult;

/// Maximum retry attempts after the initial call.
const MAX_RETRIES: u32 = 3;

/// Run `op`, retrying transient failures with linear-growth backoff
/// (2 s, 4 s, 6 s). Non-transient errors and exhaustion propagate.
pub async fn with_retries<T, F, Fut>(name: &str, mut op: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                attempt += 1;
                let delay = Duration::from_secs(2 * u64::from(attempt));
                warn!("{name}: transient failure ({e}), retry {attempt}/{MAX_RETRIES} in {delay:?}");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_store::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_then_succeed() {
        let calls = AtomicU32::new(0);
        let result = with_retries("op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Timeout("slow".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_propagates_the_last_error() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = with_retries("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::RateLimited("429".into())) }
        })
        .await;
        assert!(matches!(result, Err(StoreError::RateLimited(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = with_retries("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Backend("boom".into())) }
        })
        .await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
