//! Exponential-backoff retry for store writes.
//!
//! Mirrors the operational tooling's policy: start at 2s, double up to a
//! 60s cap, give up after 10 attempts. Only transient store errors are
//! retried; logical failures surface immediately.

use std::future::Future;

use tracing::warn;

use crate::config::RetryPolicy;
use crate::store::StoreError;

/// Run `op` until it succeeds, fails non-transiently, or exhausts the
/// policy's attempt budget.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                warn!(
                    op = op_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_secs = backoff.as_secs_f64(),
                    error = %err,
                    "transient store error, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(80),
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(&fast_policy(10), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(StoreError::Transient("quota".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.expect("succeeds"), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(&fast_policy(4), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Unavailable("down".into())) }
        })
        .await;
        assert!(result.expect_err("exhausted").is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(&fast_policy(10), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::aborted("raced")) }
        })
        .await;
        assert!(matches!(
            result.expect_err("aborted"),
            StoreError::TransactionAborted(_)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
