use std::time::Duration;
use tracing::{debug, info};

use super::{IntervalLock, LockError};

/// Progress of one `acquire_with_retry` attempt, for user-facing reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireAttempt {
    /// The lock was acquired on this attempt (1-based).
    Acquired { attempt: u32, max_attempts: u32 },
    /// The attempt failed; the next one starts after `retry_in`.
    Waiting {
        attempt: u32,
        max_attempts: u32,
        retry_in: Duration,
        reason: String,
    },
}

/// Acquire `lock`, retrying up to `max_attempts` times.
///
/// Between attempts the caller sleeps for the lock's full duration, long
/// enough for a holder that stopped renewing to expire. Competing CLI
/// invocations therefore serialize instead of failing immediately. Every
/// attempt is reported through `on_attempt`.
pub async fn acquire_with_retry<F>(
    lock: &IntervalLock,
    max_attempts: u32,
    mut on_attempt: F,
) -> Result<(), LockError>
where
    F: FnMut(&AcquireAttempt),
{
    let max_attempts = max_attempts.max(1);
    let retry_in = Duration::from_secs(lock.duration_secs().max(0) as u64);

    let mut attempt = 1;
    loop {
        match lock.acquire().await {
            Ok(()) => {
                info!(attempt, max_attempts, namespace = ?lock.namespace(), "lock acquired");
                on_attempt(&AcquireAttempt::Acquired {
                    attempt,
                    max_attempts,
                });
                return Ok(());
            }
            Err(e) => {
                debug!(attempt, max_attempts, error = %e, "lock acquisition attempt failed");
                if attempt >= max_attempts {
                    return Err(LockError::AttemptsExhausted {
                        attempts: max_attempts,
                        last: Box::new(e),
                    });
                }
                on_attempt(&AcquireAttempt::Waiting {
                    attempt,
                    max_attempts,
                    retry_in,
                    reason: e.to_string(),
                });
            }
        }
        tokio::time::sleep(retry_in).await;
        attempt += 1;
    }
}
