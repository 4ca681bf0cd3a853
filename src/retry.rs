//! Retry logic with exponential backoff
//!
//! Bounded, iterative retry for transient failures — repeated failures
//! never grow the call stack. Used by directory page requests; the
//! download coordinator runs its own attempt loop because each retry must
//! clean up partial files first.

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Classifies an error as transient (worth retrying) or permanent.
///
/// Network timeouts, connection resets, and 429/5xx statuses are
/// transient. A rejected credential, a corrupt archive, or bad
/// configuration will fail the same way every time.
pub trait IsRetryable {
    /// Returns true if retrying the operation could succeed
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Authentication failure is fatal to the run, never retried
            Error::Auth(_) => false,
            Error::Network(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || matches!(
                        e.status(),
                        Some(s) if s.as_u16() == 429 || s.is_server_error()
                    )
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Discovery(e) => match e {
                // 429 and 5xx from the listing endpoint are rate limiting
                // or transient server trouble
                crate::error::DiscoveryError::BadStatus { status, .. } => {
                    *status == 429 || *status >= 500
                }
                // A page that already exhausted its retries stays failed
                crate::error::DiscoveryError::PageFailed { .. } => false,
            },
            // Download errors are retried by the coordinator's own
            // whole-attempt loop, not here
            Error::Download(_) => false,
            // Corrupt archives and converter failures are permanent within a run
            Error::Conversion(_) => false,
            Error::Config { .. } => false,
            Error::Serialization(_) => false,
            Error::Other(_) => false,
        }
    }
}

/// Run `operation`, retrying transient failures with exponential backoff.
///
/// Up to `config.max_attempts` retries after the initial call. The pause
/// before retry `n` is `initial_delay * backoff_multiplier^n`, capped at
/// `max_delay`, optionally jittered. Permanent failures return at once.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut retries: u32 = 0;
    let mut delay = config.initial_delay;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::info!(attempts = retries + 1, "succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !err.is_retryable() {
            tracing::error!(error = %err, "permanent failure, not retrying");
            return Err(err);
        }
        if retries >= config.max_attempts {
            tracing::error!(
                error = %err,
                attempts = retries + 1,
                "still failing after all retries, giving up"
            );
            return Err(err);
        }

        retries += 1;
        tracing::warn!(
            error = %err,
            attempt = retries,
            max_attempts = config.max_attempts,
            delay_ms = delay.as_millis(),
            "transient failure, will retry"
        );

        let pause = if config.jitter { with_jitter(delay) } else { delay };
        tokio::time::sleep(pause).await;
        delay = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
            .min(config.max_delay);
    }
}

/// Spread a delay uniformly over `[delay, 2*delay)` so synchronized
/// retries fan out instead of arriving together
fn with_jitter(delay: Duration) -> Duration {
    let factor = 1.0 + rand::thread_rng().gen_range(0.0..1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiscoveryError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum FakeFailure {
        Transient,
        Fatal,
    }

    impl std::fmt::Display for FakeFailure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                FakeFailure::Transient => write!(f, "transient"),
                FakeFailure::Fatal => write!(f, "fatal"),
            }
        }
    }

    impl IsRetryable for FakeFailure {
        fn is_retryable(&self) -> bool {
            matches!(self, FakeFailure::Transient)
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// Run an operation that fails `failures` times before yielding `value`,
    /// returning the result and how many calls it took
    async fn flaky_run(
        config: &RetryConfig,
        failures: u32,
        failure: fn() -> FakeFailure,
        value: u32,
    ) -> (Result<u32, FakeFailure>, u32) {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result = retry_with_backoff(config, || {
            let calls = calls_in.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < failures {
                    Err(failure())
                } else {
                    Ok(value)
                }
            }
        })
        .await;
        (result, calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn first_success_needs_no_retry() {
        let (result, calls) = flaky_run(&fast_config(3), 0, || FakeFailure::Transient, 42).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn transient_failures_retry_until_success() {
        let (result, calls) = flaky_run(&fast_config(3), 2, || FakeFailure::Transient, 7).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 3, "two retries then success");
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (result, calls) =
            flaky_run(&fast_config(3), u32::MAX, || FakeFailure::Transient, 0).await;
        assert!(result.is_err());
        assert_eq!(calls, 4, "initial attempt plus three retries");
    }

    #[tokio::test]
    async fn fatal_failure_returns_immediately() {
        let (result, calls) = flaky_run(&fast_config(3), u32::MAX, || FakeFailure::Fatal, 0).await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn delays_grow_with_the_multiplier_and_stop_at_the_cap() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 10.0,
            jitter: false,
        };

        let start = std::time::Instant::now();
        let (result, _) = flaky_run(&config, u32::MAX, || FakeFailure::Transient, 0).await;
        let elapsed = start.elapsed();

        assert!(result.is_err());
        // 50ms, then capped at 100ms twice; uncapped would be 50+500+5000ms
        assert!(elapsed >= Duration::from_millis(250), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "cap not applied, waited {elapsed:?}");
    }

    #[test]
    fn jitter_lands_between_one_and_two_times_the_delay() {
        let delay = Duration::from_millis(50);
        for i in 0..200 {
            let jittered = with_jitter(delay);
            assert!(jittered >= delay, "iteration {i}: {jittered:?} < {delay:?}");
            assert!(jittered < delay * 2, "iteration {i}: {jittered:?} >= 2x");
        }
    }

    #[test]
    fn auth_errors_are_never_retryable() {
        assert!(!Error::Auth("rejected".to_string()).is_retryable());
    }

    #[test]
    fn rate_limited_listing_status_is_retryable() {
        let err = Error::Discovery(DiscoveryError::BadStatus {
            partition: "DE".to_string(),
            status: 429,
        });
        assert!(err.is_retryable());

        let err = Error::Discovery(DiscoveryError::BadStatus {
            partition: "DE".to_string(),
            status: 503,
        });
        assert!(err.is_retryable());

        let err = Error::Discovery(DiscoveryError::BadStatus {
            partition: "DE".to_string(),
            status: 404,
        });
        assert!(!err.is_retryable());
    }

    #[test]
    fn io_timeout_is_retryable_but_not_found_is_not() {
        let timeout = Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "t"));
        assert!(timeout.is_retryable());

        let missing = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "n"));
        assert!(!missing.is_retryable());
    }

    #[test]
    fn conversion_errors_are_not_retryable() {
        let err = Error::Conversion(crate::error::ConversionError::NoTabularMembers {
            archive: std::path::PathBuf::from("x.zip"),
        });
        assert!(!err.is_retryable());
    }
}
