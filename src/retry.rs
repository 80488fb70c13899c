//! Retry with exponential backoff.
//!
//! Used only around session establishment (login). Individual record writes,
//! renames, and closes are never retried: a failure there aborts the writer.

use crate::error::{TransportError, TransportResult};
use std::time::Duration;
use tracing::warn;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    /// Three attempts, starting at four seconds between them.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 4000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No waiting between attempts. Handy in tests.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    fn next_delay(&self, delay_ms: u64) -> u64 {
        // `as` saturates on overflow and NaN maps to 0
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let next = (delay_ms as f64 * self.backoff_multiplier.max(1.0)) as u64;
        next.min(self.max_delay_ms)
    }
}

/// Retry a function with exponential backoff.
///
/// Errors for which [`TransportError::is_transient`] is false (bad credentials,
/// invalid port, permission problems) are returned immediately.
///
/// # Example
/// ```ignore
/// let session = retry_with_backoff(&RetryConfig::default(), || {
///     FtpSession::login(&session_config)
/// })?;
/// ```
///
/// # Errors
///
/// Returns the last error once `max_attempts` is exhausted, or the first
/// non-transient error.
pub fn retry_with_backoff<F, T>(config: &RetryConfig, mut operation: F) -> TransportResult<T>
where
    F: FnMut() -> TransportResult<T>,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;
        match operation() {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !err.is_transient() || attempt >= config.max_attempts.max(1) {
                    return Err(err);
                }
                warn!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms,
                    "retrying after transient error: {err}"
                );
                if delay_ms > 0 {
                    std::thread::sleep(Duration::from_millis(delay_ms));
                }
                delay_ms = config.next_delay(delay_ms);
            }
        }
    }
}

/// Run `operation`, logging and discarding any error.
///
/// Teardown steps such as logout run after data is already published (or the
/// job already failed), so their errors must not change the outcome.
pub fn ignore_teardown_error<F>(what: &str, operation: F)
where
    F: FnOnce() -> Result<(), TransportError>,
{
    if let Err(err) = operation() {
        warn!("{what} failed, ignoring: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn retries_transient_errors_until_success() {
        let mut calls = 0;
        let out = retry_with_backoff(&RetryConfig::immediate(3), || {
            calls += 1;
            if calls < 3 {
                Err(TransportError::new(ErrorKind::Timeout, "slow"))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(out.unwrap(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let out: TransportResult<()> = retry_with_backoff(&RetryConfig::immediate(2), || {
            calls += 1;
            Err(TransportError::new(ErrorKind::Unreachable, "down"))
        });
        assert_eq!(out.unwrap_err().kind, ErrorKind::Unreachable);
        assert_eq!(calls, 2);
    }

    #[test]
    fn does_not_retry_bad_credentials() {
        let mut calls = 0;
        let out: TransportResult<()> = retry_with_backoff(&RetryConfig::immediate(5), || {
            calls += 1;
            Err(TransportError::new(ErrorKind::Authentication, "530"))
        });
        assert!(out.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn delay_is_capped() {
        let cfg = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 250,
            backoff_multiplier: 2.0,
        };
        assert_eq!(cfg.next_delay(100), 200);
        assert_eq!(cfg.next_delay(200), 250);
    }
}
