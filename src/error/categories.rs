use std::fmt;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    // Client errors
    ValidationError,
    AuthenticationError,
    NotFound,
    /// Operation is not legal for the invoice's current status, e.g.
    /// extending an invoice that is no longer pending.
    InvalidState,
    /// The reference key is already bound to another invoice.
    DuplicateReference,

    // Upstream errors
    UpstreamUnavailable,
    UpstreamTimeout,

    // System errors
    InternalError,
}

impl ErrorCategory {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError => StatusCode::BAD_REQUEST,
            Self::AuthenticationError => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidState | Self::DuplicateReference => StatusCode::CONFLICT,
            Self::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::AuthenticationError => "AUTH_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidState => "INVALID_STATE",
            Self::DuplicateReference => "DUPLICATE_REFERENCE",
            Self::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            Self::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ValidationError
                | Self::AuthenticationError
                | Self::NotFound
                | Self::InvalidState
                | Self::DuplicateReference
        )
    }

    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_status_codes() {
        assert_eq!(
            ErrorCategory::ValidationError.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorCategory::InvalidState.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ErrorCategory::DuplicateReference.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ErrorCategory::UpstreamUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorCategory::UpstreamTimeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ErrorCategory::InternalError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_category_codes() {
        assert_eq!(ErrorCategory::InvalidState.error_code(), "INVALID_STATE");
        assert_eq!(
            ErrorCategory::DuplicateReference.error_code(),
            "DUPLICATE_REFERENCE"
        );
        assert_eq!(
            ErrorCategory::AuthenticationError.error_code(),
            "AUTH_FAILED"
        );
    }

    #[test]
    fn test_client_vs_server_errors() {
        assert!(ErrorCategory::ValidationError.is_client_error());
        assert!(ErrorCategory::InvalidState.is_client_error());
        assert!(!ErrorCategory::InvalidState.is_server_error());

        assert!(ErrorCategory::UpstreamUnavailable.is_server_error());
        assert!(ErrorCategory::InternalError.is_server_error());
        assert!(!ErrorCategory::InternalError.is_client_error());
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(format!("{}", ErrorCategory::NotFound), "NOT_FOUND");
        assert_eq!(
            format!("{}", ErrorCategory::UpstreamTimeout),
            "UPSTREAM_TIMEOUT"
        );
    }
}
