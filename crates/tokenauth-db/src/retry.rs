//! Retry-on-contention for store operations.

use std::thread;
use std::time::Duration;

use crate::error::DbError;

/// A bounded, linearly backed-off retry policy.
///
/// Only [`ErrorClass::Transient`](crate::ErrorClass::Transient) failures are
/// retried. Attempts run strictly one after another; after attempt `n` fails
/// the caller sleeps `n × base_delay` before attempt `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

/// Policy for credential lookups.
pub const LOOKUP_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 3,
    base_delay: Duration::from_millis(10),
};

/// Policy for bulk seeding.
pub const SEED_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 3,
    base_delay: Duration::from_millis(50),
};

impl RetryPolicy {
    /// Sleep inserted after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Runs `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// # Errors
    ///
    /// Fatal errors are returned as-is from the attempt that raised them.
    /// A transient error on the last attempt becomes
    /// `DbError::RetryExhausted` wrapping it.
    pub fn run<T, F>(&self, operation: &'static str, mut op: F) -> Result<T, DbError>
    where
        F: FnMut() -> Result<T, DbError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "store busy, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(DbError::RetryExhausted {
                        operation,
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;
    use std::time::Instant;

    const FAST: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
    };

    fn busy() -> DbError {
        DbError::Sqlite(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_BUSY),
            None,
        ))
    }

    #[test]
    fn lookup_and_seed_policies_keep_distinct_bases() {
        assert_eq!(LOOKUP_RETRY.max_attempts, 3);
        assert_eq!(SEED_RETRY.max_attempts, 3);
        assert_eq!(LOOKUP_RETRY.delay_after(1), Duration::from_millis(10));
        assert_eq!(LOOKUP_RETRY.delay_after(2), Duration::from_millis(20));
        assert_eq!(SEED_RETRY.delay_after(1), Duration::from_millis(50));
        assert_eq!(SEED_RETRY.delay_after(2), Duration::from_millis(100));
    }

    #[test]
    fn transient_failures_are_retried_until_success() {
        let mut calls = 0;
        let started = Instant::now();
        let value = FAST
            .run("lookup", || {
                calls += 1;
                if calls < 3 {
                    Err(busy())
                } else {
                    Ok(7)
                }
            })
            .expect("third attempt should succeed");

        assert_eq!(value, 7);
        assert_eq!(calls, 3);
        assert!(
            started.elapsed() >= Duration::from_millis(15),
            "should have slept 5 ms then 10 ms"
        );
    }

    #[test]
    fn persistent_contention_exhausts_retries() {
        let mut calls = 0;
        let err = FAST
            .run::<(), _>("seed", || {
                calls += 1;
                Err(busy())
            })
            .expect_err("should give up");

        assert_eq!(calls, 3);
        match err {
            DbError::RetryExhausted {
                operation,
                attempts,
                source,
            } => {
                assert_eq!(operation, "seed");
                assert_eq!(attempts, 3);
                assert!(source.is_transient());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let mut calls = 0;
        let err = FAST
            .run::<(), _>("lookup", || {
                calls += 1;
                Err(DbError::Sqlite(rusqlite::Error::InvalidQuery))
            })
            .expect_err("should fail immediately");

        assert_eq!(calls, 1);
        assert!(matches!(err, DbError::Sqlite(_)));
    }
}
