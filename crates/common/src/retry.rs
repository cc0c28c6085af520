//! Bounded retry with exponential backoff and a per-call deadline.
//!
//! Every external collaborator is wrapped in a [`CallPolicy`] at the
//! boundary so the intake logic never has to reason about retries.

use std::{future::Future, time::Duration};

use tracing::warn;

use crate::Error;

/// Backoff doubles per attempt up to `base * 2^MAX_BACKOFF_SHIFT`.
pub const MAX_BACKOFF_SHIFT: u32 = 6;

/// Attempts, backoff and deadline applied to one kind of collaborator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    /// Total attempts including the first one. `0` is treated as `1`.
    pub attempts: u32,
    pub base_backoff: Duration,
    /// Deadline for a single attempt. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            base_backoff: Duration::from_millis(200),
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl CallPolicy {
    /// A policy that tries once and never times out.
    #[must_use]
    pub fn once() -> Self {
        Self {
            attempts: 1,
            base_backoff: Duration::ZERO,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(1_u32 << attempt.min(MAX_BACKOFF_SHIFT))
    }

    /// Run `call` until it succeeds, fails permanently, or the attempt
    /// budget is spent. The last error is returned.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            let result = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, call()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::timeout(operation, limit).into()),
                },
                None => call().await,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            attempt += 1;
            if attempt >= max_attempts || is_permanent(&err) {
                return Err(err);
            }

            let delay = self.backoff_for(attempt - 1);
            warn!(
                operation,
                attempt,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "collaborator call failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// HTTP statuses that will not change on retry (client errors other than
/// request-timeout and rate-limit).
#[must_use]
pub fn is_permanent_status(status: u16) -> bool {
    (400..500).contains(&status) && status != 408 && status != 429
}

/// Whether an error chain contains an [`Error::Permanent`].
#[must_use]
pub fn is_permanent(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<Error>(), Some(Error::Permanent { .. })))
}
