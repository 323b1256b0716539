// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Palaver
//!
//! One crate-wide error enum plus a nested enum for backend failures.
//! Parameter validation never produces an error value; invalid overrides are
//! skipped during context resolution.

use thiserror::Error;

/// Main error type for Palaver operations
#[derive(Error, Debug)]
pub enum PalaverError {
    /// Backend or network failures
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Configuration errors (unknown provider, missing credentials)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Turn life cycle violations
    #[error("Session error: {0}")]
    Session(String),

    /// The user cancelled the in-flight turn
    #[error("Generation aborted")]
    Aborted,

    /// Knowledge store errors
    #[error("Knowledge error: {0}")]
    Knowledge(String),

    /// Message store errors
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// API-specific error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    /// Rate limited by the API
    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u32),

    /// Requested model not found
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Context window exceeded
    #[error("Context too long: {current} tokens exceeds limit of {limit}")]
    ContextTooLong { current: u32, limit: u32 },

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid response from API
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// API returned an error
    #[error("API error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Timeout waiting for response
    #[error("Request timed out")]
    Timeout,

    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamError(String),
}

impl PalaverError {
    /// Whether this error came from the backend or the network.
    ///
    /// Only this class is surfaced to the user as a turn failure.
    pub fn is_backend(&self) -> bool {
        matches!(self, PalaverError::Api(_) | PalaverError::Http(_))
    }

    /// Whether this error marks a user-initiated abort.
    pub fn is_aborted(&self) -> bool {
        matches!(self, PalaverError::Aborted)
    }
}

/// Result type alias for Palaver operations
pub type Result<T> = std::result::Result<T, PalaverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palaver_error_config() {
        let err = PalaverError::Config("unknown provider: foo".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("foo"));
    }

    #[test]
    fn test_palaver_error_session() {
        let err = PalaverError::Session("turn already active".to_string());
        assert!(err.to_string().contains("Session error"));
    }

    #[test]
    fn test_palaver_error_aborted() {
        let err = PalaverError::Aborted;
        assert!(err.is_aborted());
        assert!(!err.is_backend());
        assert_eq!(err.to_string(), "Generation aborted");
    }

    #[test]
    fn test_palaver_error_knowledge() {
        let err = PalaverError::Knowledge("missing info.json".to_string());
        assert!(err.to_string().contains("Knowledge error"));
    }

    #[test]
    fn test_palaver_error_store() {
        let err = PalaverError::Store("message not found".to_string());
        assert!(err.to_string().contains("Store error"));
    }

    #[test]
    fn test_palaver_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PalaverError = io_err.into();
        assert!(err.to_string().contains("IO error"));
        assert!(!err.is_backend());
    }

    #[test]
    fn test_palaver_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: PalaverError = json_err.into();
        assert!(err.to_string().contains("JSON error"));
    }

    #[test]
    fn test_palaver_error_from_api_error() {
        let err: PalaverError = ApiError::AuthenticationFailed.into();
        assert!(err.to_string().contains("API error"));
        assert!(err.is_backend());
    }

    #[test]
    fn test_api_error_rate_limited() {
        let err = ApiError::RateLimited(30);
        assert!(err.to_string().contains("Rate limited"));
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn test_api_error_context_too_long() {
        let err = ApiError::ContextTooLong {
            current: 10000,
            limit: 8192,
        };
        assert!(err.to_string().contains("10000"));
        assert!(err.to_string().contains("8192"));
    }

    #[test]
    fn test_api_error_server_error() {
        let err = ApiError::ServerError {
            status: 500,
            message: "internal server error".to_string(),
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("internal server error"));
    }

    #[test]
    fn test_api_error_timeout() {
        assert!(ApiError::Timeout.to_string().contains("timed out"));
    }

    #[test]
    fn test_api_error_stream_error() {
        let err = ApiError::StreamError("stream closed".to_string());
        assert!(err.to_string().contains("Streaming error"));
    }

    #[test]
    fn test_api_error_clone_eq() {
        let err = ApiError::ModelNotFound("gpt-5".to_string());
        assert_eq!(err.clone(), err);
    }

    #[test]
    fn test_result_error() {
        fn fails() -> Result<i32> {
            Err(PalaverError::InvalidInput("test".to_string()))
        }

        assert!(fails().is_err());
    }
}
