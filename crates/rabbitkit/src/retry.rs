//! Bounded retries with a fixed step between attempts.
//!
//! Each attempt runs under its own [`Deadline`]. The operation is expected to
//! hand `deadline.remaining()` to every backend call it makes, so a slow
//! broker is cut off at the deadline and the child process is killed rather
//! than left behind.

use crate::error::{Error, Result};
use crate::types::RetryPolicy;
use std::thread;
use std::time::{Duration, Instant};

/// Callback trait for retry progress notifications.
pub trait RetryCallback {
    /// Called when an attempt failed and another one will follow.
    ///
    /// # Arguments
    /// * `attempt` - The attempt that just failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay` - Time until the next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay: Duration);
}

/// No-op callback that does nothing.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&self, _attempt: u32, _max_attempts: u32, _error: &Error, _delay: Duration) {}
}

/// Callback that logs retry information at debug level.
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay: Duration) {
        log::debug!(
            "Attempt {}/{} failed: {}. Retrying in {}s",
            attempt,
            max_attempts,
            error,
            delay.as_secs()
        );
    }
}

/// A point in time by which an attempt must finish.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Instant::now() + timeout,
        }
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Execute an operation with bounded retries.
///
/// Retries while the operation fails with a retryable error (command failure
/// or timeout), sleeping `policy.step_delay` between attempts. A
/// non-retryable error is returned at once. When every attempt fails the
/// result is [`Error::RetryExhausted`] carrying the final error. A policy
/// with zero attempts is refused with [`Error::InvalidPolicy`] before the
/// operation runs.
///
/// # Arguments
/// * `operation_name` - What is being retried, for the exhaustion message
/// * `policy` - Attempt count, step and per-attempt deadline
/// * `callback` - Optional callback for retry notifications
/// * `operation` - The operation to execute, given the attempt's deadline
pub fn with_retry<T, F>(
    operation_name: &str,
    policy: &RetryPolicy,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(Deadline) -> Result<T>,
{
    policy.validate()?;

    let mut attempt = 0;
    loop {
        attempt += 1;
        let deadline = Deadline::after(policy.attempt_timeout);
        let e = match operation(deadline) {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !e.is_retryable() {
            return Err(e);
        }

        if attempt >= policy.max_attempts {
            return Err(Error::RetryExhausted {
                operation: operation_name.to_string(),
                attempts: policy.max_attempts,
                budget: policy.budget(),
                source: Box::new(e),
            });
        }

        if let Some(cb) = callback {
            cb.on_retry(attempt, policy.max_attempts, &e, policy.step_delay);
        }
        thread::sleep(policy.step_delay);
    }
}
