//! Error Types
//!
//! Pool-level failures form a closed taxonomy ([`PoolError`]). Per-endpoint
//! transport failures ([`TransportError`]) never escape a dispatch as pool
//! errors: strategies absorb them, record them into the health tracker and
//! surface only the final outcome.

use thiserror::Error;

use crate::messages::ErrorCode;

/// Pool-level dispatch failures
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// No endpoints configured for the pool
    #[error("Model pool has no endpoints")]
    EmptyPool,

    /// The caller cancelled the dispatch
    #[error("Dispatch cancelled by caller")]
    Cancelled,

    /// Any other unexpected failure inside the dispatch pipeline
    #[error("Pool dispatch failed: {0}")]
    Internal(String),
}

impl PoolError {
    /// Error code reported to callers
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::EmptyPool => ErrorCode::EmptyPool,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Internal(_) => ErrorCode::PoolError,
        }
    }

    /// HTTP-analogous status code
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::EmptyPool => 503,
            Self::Cancelled => 499,
            Self::Internal(_) => 500,
        }
    }
}

/// Failure of a single transport call against one endpoint
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Could not reach the endpoint or the connection broke
    #[error("Connection error: {0}")]
    Connection(String),

    /// The endpoint answered with a non-success status
    #[error("Endpoint returned {status}: {message}")]
    Status {
        /// HTTP status
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// The response could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The request body cannot be sent to this endpoint
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The call was cancelled through its cancellation token
    #[error("Transport call cancelled")]
    Cancelled,
}

impl TransportError {
    /// Status code recorded for this failure
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Status { status, .. } => *status,
            Self::Cancelled => 499,
            Self::InvalidRequest(_) => 400,
            Self::Connection(_) | Self::Decode(_) => 502,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Status {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            Self::Connection(e.to_string())
        }
    }
}

/// Failures while building a pool from external configuration
#[derive(Debug, Error)]
pub enum FactoryError {
    /// The named model group does not exist
    #[error("Model group not found: {0}")]
    GroupNotFound(String),

    /// The configuration source could not be read
    #[error("Configuration source failed: {0}")]
    Source(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_taxonomy() {
        assert_eq!(PoolError::EmptyPool.status_code(), 503);
        assert_eq!(PoolError::EmptyPool.code(), ErrorCode::EmptyPool);
        assert_eq!(PoolError::Cancelled.status_code(), 499);
        assert_eq!(PoolError::Cancelled.code(), ErrorCode::Cancelled);

        let internal = PoolError::Internal("boom".into());
        assert_eq!(internal.status_code(), 500);
        assert_eq!(internal.code(), ErrorCode::PoolError);
        assert!(internal.to_string().contains("boom"));
    }

    #[test]
    fn test_transport_error_status() {
        let err = TransportError::Status {
            status: 429,
            message: "rate limited".into(),
        };
        assert_eq!(err.status_code(), 429);
        assert_eq!(TransportError::Connection("refused".into()).status_code(), 502);
    }
}
