//! Error types for rabbitmqctl operations.
//!
//! Errors are categorized so the retry executor can tell a broker that is
//! still coming up apart from a problem retrying will not fix. Each variant
//! carries enough context (command line, elapsed budget) for an operator to
//! see which step failed.

use std::time::Duration;
use thiserror::Error;

/// Categories of errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The command failed or timed out; the broker may not be ready yet
    Transient,
    /// A bounded retry loop ran out of attempts
    Exhausted,
    /// rabbitmqctl is not installed or not found
    NotInstalled,
    /// The request itself is invalid (missing password, zero attempts, ...)
    Invalid,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is worth retrying.
    ///
    /// Every command failure counts as transient: rabbitmqctl reports an
    /// unreachable node and a rejected argument the same way.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Transient => "Broker command failed",
            Self::Exhausted => "Broker never became available",
            Self::NotInstalled => "rabbitmqctl not installed",
            Self::Invalid => "Invalid request",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Transient => "Check that the RabbitMQ node is running and reachable",
            Self::Exhausted => "Inspect the node logs; the cluster did not answer in time",
            Self::NotInstalled => "Install rabbitmq-server or pass the rabbitmqctl path explicitly",
            Self::Invalid => "Fix the desired user definition or retry settings",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while talking to the broker.
#[derive(Debug, Error)]
pub enum Error {
    /// rabbitmqctl exited with a non-zero status (or could not be spawned)
    #[error("command failed: {command}{}: {stderr}", .code.map(|c| format!(" (exit {c})")).unwrap_or_default())]
    ExecutionFailure {
        /// The command line that failed
        command: String,
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Trimmed standard error output
        stderr: String,
    },

    /// rabbitmqctl did not finish before its deadline and was killed
    #[error("command timed out after {}s: {command}", .timeout.as_secs_f64())]
    Timeout {
        /// The command line that timed out
        command: String,
        /// The deadline that was exceeded
        timeout: Duration,
    },

    /// A bounded retry loop failed on every attempt
    #[error("{operation} is still failing after {} seconds expired ({attempts} attempts)", .budget.as_secs())]
    RetryExhausted {
        /// What was being retried
        operation: String,
        /// Number of attempts made
        attempts: u32,
        /// Total retry budget (`attempts * step delay`)
        budget: Duration,
        /// The error from the final attempt
        #[source]
        source: Box<Error>,
    },

    /// rabbitmqctl was not found
    #[error("rabbitmqctl not found. Install rabbitmq-server or set its path explicitly")]
    CtlNotFound,

    /// A user cannot be created without a password
    #[error("user '{name}' cannot be created without a password")]
    MissingPassword {
        /// Name of the user
        name: String,
    },

    /// A retry policy that would never run its operation
    #[error("invalid retry policy: {reason}")]
    InvalidPolicy {
        /// What is wrong with the policy
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::ExecutionFailure { .. } | Error::Timeout { .. } => ErrorCategory::Transient,
            Error::RetryExhausted { .. } => ErrorCategory::Exhausted,
            Error::CtlNotFound => ErrorCategory::NotInstalled,
            Error::MissingPassword { .. } | Error::InvalidPolicy { .. } => ErrorCategory::Invalid,
            Error::Io(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether this is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, Error>;
