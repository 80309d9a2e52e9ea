//! Dispatcher-side retry policy. Workers never retry on their own; when a
//! policy allows more than one attempt the dispatcher re-invokes the worker
//! for the same item with exponential backoff.

use anyhow::{bail, Result};
use std::future::Future;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;
const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    /// A single attempt: retries are opt-in.
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("retry max_attempts must be greater than 0");
        }
        if self.max_backoff < self.initial_backoff {
            bail!("retry max_backoff must not be smaller than initial_backoff");
        }
        Ok(())
    }
}

pub(crate) enum RetryDisposition {
    Retry,
    Settle,
}

/// Runs `operation` until `classify` settles its output or the policy's
/// attempts are exhausted. Cancellation during a backoff sleep returns the
/// last output as is.
pub(crate) async fn retry_with_backoff<T, F, Fut, C, L>(
    policy: RetryPolicy,
    cancellation: Option<&CancellationToken>,
    mut operation: F,
    mut classify: C,
    mut on_retry: L,
) -> T
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = T>,
    C: FnMut(&T) -> RetryDisposition,
    L: FnMut(usize, Duration, &T),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        attempt += 1;
        let output = operation(attempt).await;

        if attempt >= max_attempts {
            return output;
        }
        if let RetryDisposition::Settle = classify(&output) {
            return output;
        }

        on_retry(attempt, backoff, &output);
        if !sleep_with_cancellation(backoff, cancellation).await {
            return output;
        }
        backoff = next_backoff(backoff, policy.max_backoff);
    }
}

async fn sleep_with_cancellation(delay: Duration, cancellation: Option<&CancellationToken>) -> bool {
    if delay.is_zero() {
        yield_now().await;
        return cancellation.map_or(true, |token| !token.is_cancelled());
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => false,
            _ = sleep(delay) => true,
        }
    } else {
        sleep(delay).await;
        true
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
