use std::time::Duration;

use anyhow::Error;
use thiserror::Error;

/// Application-level error types for bcrm-rs.
///
/// ## Exit Codes
///
/// Each variant maps to an exit code (via `exit_code()`):
/// - 1: General errors (Api, State, Pipeline)
/// - 2: Configuration errors (InvalidConfig)
/// - 3: Completed, but some batches ended with a fatal failure
/// - 130: Interrupted before every batch reached an outcome
#[derive(Error, Debug, PartialEq)]
pub enum BcrmError {
    /// Remote API error that aborted the run.
    #[error("API error: {0}")]
    Api(String),

    /// Configuration error (non-retryable).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Persistence failure. Progress can no longer be trusted to survive a restart.
    #[error("State store error: {0}")]
    State(String),

    /// Operation cancelled by user.
    #[error("Operation cancelled by user")]
    Cancelled,

    /// Some batches were rejected permanently.
    #[error("Partial failure: {processed} processed, {failed} failed")]
    PartialFailure { processed: u64, failed: u64 },

    /// General pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl BcrmError {
    pub fn exit_code(&self) -> i32 {
        match self {
            BcrmError::InvalidConfig(_) => 2,
            BcrmError::PartialFailure { .. } => 3,
            BcrmError::Cancelled => 130,
            _ => 1,
        }
    }
}

/// Classified failure returned by the remote API collaborator.
///
/// `TransientNetwork`, `RateLimited` and `ServerError` are retried with
/// backoff. `ClientRejection` and `Authentication` are permanent.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("rate limited, retry after {}ms", .0.as_millis())]
    RateLimited(Duration),

    #[error("server error (status {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("request rejected (status {status}): {message}")]
    ClientRejection { status: u16, message: String },

    #[error("authentication failed (status {status}): {message}")]
    Authentication { status: u16, message: String },
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::TransientNetwork(_) | ApiError::RateLimited(_) | ApiError::ServerError { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited(duration) => Some(*duration),
            _ => None,
        }
    }
}

pub fn is_cancelled_error(e: &Error) -> bool {
    if let Some(err) = e.downcast_ref::<BcrmError>() {
        return *err == BcrmError::Cancelled;
    }
    false
}

/// Extract the exit code from an anyhow::Error, defaulting to 1.
pub fn exit_code_from_error(e: &Error) -> i32 {
    if let Some(err) = e.downcast_ref::<BcrmError>() {
        return err.exit_code();
    }
    1
}
