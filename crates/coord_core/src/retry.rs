//! Caller-side retry for transient failures.
//!
//! The lease manager and the recorder never retry on their own; callers that
//! want backoff (the shard worker, the event-counting handler) wrap calls in
//! [`retry_transient`].

use std::fmt::Display;
use std::future::Future;

use crate::config::RetryPolicy;

pub async fn retry_transient<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    is_transient: impl Fn(&E) -> bool,
    mut call: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts && is_transient(&error) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
