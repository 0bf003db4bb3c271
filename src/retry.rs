//! Bounded retry with exponential backoff and jitter.
//!
//! Transient external failures (provider 5xx, rate limiting, store timeouts)
//! are retried up to a bounded attempt count; everything else surfaces on the
//! first failure.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Maximum attempts for a retryable external call.
pub const MAX_ATTEMPTS: usize = 5;

/// Base delay doubled on each retry.
pub const BASE_DELAY: Duration = Duration::from_millis(200);

/// Run `op` up to `max_attempts` times, sleeping between attempts with
/// exponential backoff plus up to 50% random jitter.
///
/// Only errors for which `is_transient` returns `true` are retried; the
/// final error (transient or not) is returned to the caller.
pub async fn with_backoff<T, E, Fut, Op>(
    label: &str,
    max_attempts: usize,
    base_delay: Duration,
    is_transient: impl Fn(&E) -> bool,
    mut op: Op,
) -> Result<T, E>
where
    E: std::fmt::Display,
    Fut: Future<Output = Result<T, E>>,
    Op: FnMut() -> Fut,
{
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && is_transient(&err) => {
                let backoff = base_delay.saturating_mul(1 << (attempt - 1).min(16) as u32);
                let jitter_cap = (backoff.as_millis() / 2).max(1) as u64;
                let jitter = rand::rng().random_range(0..jitter_cap);
                let delay = backoff + Duration::from_millis(jitter);
                warn!(
                    target: "lectern::retry",
                    %err,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "{label}: transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
