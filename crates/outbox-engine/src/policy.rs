//! Outcome policy: what happens to an item after a delivery attempt.
//!
//! The policy is a pure function from `(failure, attempt count, now)` to a
//! disposition; the dispatch cycle applies the disposition to the store.

use chrono::{DateTime, Duration, Utc};

use crate::sender::SendError;

/// Stored attempt count at which a failing item is retired to dead-letter.
pub const MAX_ATTEMPTS: i32 = 5;

/// Throttle window applied when a rate-limit signal carries no hint.
pub const DEFAULT_RETRY_AFTER_SECS: i64 = 60;

/// Longest retry-after hint honored from a provider. Hints outside
/// `[0, MAX_RETRY_AFTER_SECS]` are treated as absent.
pub const MAX_RETRY_AFTER_SECS: i64 = 86_400;

/// Base delay of the exponential backoff ladder.
pub const BACKOFF_BASE_MS: u64 = 5000;

/// The stored outcome of one failed delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Rate limited; park until the retry-after window elapses.
    Throttle {
        retry_after_seconds: i64,
        retry_after_until: DateTime<Utc>,
    },
    /// Retryable failure; schedule the next attempt on the backoff ladder.
    Retry {
        next_attempt_at: DateTime<Utc>,
        critical_error: bool,
    },
    /// Retries exhausted; retire to dead-letter.
    DeadLetter {
        critical_error: bool,
        backfill_eligible: bool,
    },
}

/// Computes the backoff delay before the next attempt.
///
/// Implements binary exponential backoff:
/// - `delay = 5000ms * 2^attempt_count`
///
/// # Examples
///
/// | Attempt Count | Delay |
/// |---------------|-------|
/// | 0             | 5s    |
/// | 1             | 10s   |
/// | 2             | 20s   |
/// | 3             | 40s   |
/// | 4             | 80s   |
///
/// Counts past the dead-letter threshold never reach this in practice; the
/// shift saturates instead of overflowing for out-of-range values.
pub fn retry_backoff(attempt_count: i32) -> Duration {
    let shift = attempt_count.clamp(0, 62) as u32;
    let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
    let delay_ms = BACKOFF_BASE_MS.saturating_mul(multiplier);

    Duration::milliseconds(delay_ms.min(i64::MAX as u64) as i64)
}

/// Maps a failed attempt to its disposition.
///
/// `attempt_count` is the stored count after this attempt's increment. A
/// rate-limit signal always throttles, regardless of the attempt count; it
/// is deliberately decoupled from the exhaustion threshold. Retry-after
/// hints outside `[0, MAX_RETRY_AFTER_SECS]` fall back to the default
/// window.
pub fn decide(error: &SendError, attempt_count: i32, now: DateTime<Utc>) -> Disposition {
    let exhaust_or_retry = |critical_error: bool| {
        if attempt_count >= MAX_ATTEMPTS {
            Disposition::DeadLetter {
                critical_error,
                backfill_eligible: critical_error,
            }
        } else {
            Disposition::Retry {
                next_attempt_at: now + retry_backoff(attempt_count),
                critical_error,
            }
        }
    };

    match error {
        SendError::RateLimited {
            retry_after_seconds,
        } => {
            // The hint is provider input; bounded so the window arithmetic
            // below cannot overflow
            let secs = retry_after_seconds
                .filter(|s| (0..=MAX_RETRY_AFTER_SECS).contains(s))
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            Disposition::Throttle {
                retry_after_seconds: secs,
                retry_after_until: now + Duration::seconds(secs),
            }
        }
        SendError::ServerError { .. } | SendError::Network { .. } => exhaust_or_retry(true),
        SendError::ClientError { .. } => exhaust_or_retry(false),
    }
}
