//! Error types for management API operations.
//!
//! Errors are categorized so callers can tell a broker that could not be
//! reached (worth retrying) from a broker that refused a request (not worth
//! retrying) and from an object that simply is not there.

use std::fmt;

/// Result type alias for management API operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of management API errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transport, authentication or server-side failure (transient, retryable).
    Unavailable,
    /// The broker refused the request (validation error, conflict).
    Rejected,
    /// The addressed object does not exist.
    NotFound,
    /// The broker answered with something we could not decode.
    Format,
    /// Other/unknown errors.
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }

    /// Whether this error can be safely ignored by a delete (already gone).
    #[must_use]
    pub fn is_ignorable(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Get a user-friendly description of this error category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unavailable => "Broker management API unavailable",
            Self::Rejected => "Request rejected by the broker",
            Self::NotFound => "Object not found",
            Self::Format => "Unexpected response from the broker",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    #[must_use]
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Unavailable => {
                "Check the endpoint, credentials and that the management plugin is enabled, then re-run"
            }
            Self::Rejected => "Fix the declared attributes; the broker will reject them again as-is",
            Self::NotFound => "The object was removed outside of warren; re-run apply to recreate it",
            Self::Format => "Check that the endpoint points at a RabbitMQ management API",
            Self::Other => "Check the error details for more information",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while talking to the management API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The broker could not be reached or did not accept our credentials.
    #[error("management API unavailable: {message}")]
    Unavailable {
        /// Error message.
        message: String,
        /// HTTP status code if a response was received.
        status: Option<u16>,
    },

    /// The broker rejected the request.
    #[error("broker rejected {method} {path} ({status}): {reason}")]
    Rejected {
        /// HTTP method of the rejected request.
        method: String,
        /// API path of the rejected request.
        path: String,
        /// HTTP status code.
        status: u16,
        /// Reason reported by the broker.
        reason: String,
    },

    /// The addressed object does not exist.
    #[error("not found: {path}")]
    NotFound {
        /// API path that returned 404.
        path: String,
    },

    /// Response body could not be decoded.
    #[error("invalid API response: {0}")]
    InvalidResponse(String),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an unavailable error.
    pub fn unavailable(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Unavailable {
            message: message.into(),
            status,
        }
    }

    /// Create a rejection error.
    pub fn rejected(
        method: impl Into<String>,
        path: impl Into<String>,
        status: u16,
        reason: impl Into<String>,
    ) -> Self {
        Self::Rejected {
            method: method.into(),
            path: path.into(),
            status,
            reason: reason.into(),
        }
    }

    /// Map a non-success HTTP status to an error.
    ///
    /// `body` is the raw response body; the broker's `reason` field is
    /// extracted from it when present.
    pub fn from_status(method: &str, path: &str, status: u16, body: &str) -> Self {
        match status {
            404 => Self::NotFound {
                path: path.to_string(),
            },
            401 | 403 => Self::unavailable(
                format!("{method} {path}: not authorized (HTTP {status})"),
                Some(status),
            ),
            500..=599 => Self::unavailable(
                format!("{method} {path}: HTTP {status}: {}", reason_from_body(body)),
                Some(status),
            ),
            _ => Self::rejected(method, path, status, reason_from_body(body)),
        }
    }

    /// Get the error category for retry logic.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Unavailable { .. } => ErrorCategory::Unavailable,
            Error::Rejected { .. } => ErrorCategory::Rejected,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::InvalidResponse(_) => ErrorCategory::Format,
            Error::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether this error means the object is absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.category().is_ignorable()
    }
}

/// Pull the broker's `reason` (or `error`) out of a JSON error body.
fn reason_from_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("reason")
                .or_else(|| v.get("error"))
                .and_then(|r| r.as_str().map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::from_status("?", "?", code, ""),
            other => Self::unavailable(other.to_string(), None),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retryable() {
        assert!(ErrorCategory::Unavailable.is_retryable());
        assert!(!ErrorCategory::Rejected.is_retryable());
        assert!(!ErrorCategory::NotFound.is_retryable());
        assert!(!ErrorCategory::Format.is_retryable());
        assert!(!ErrorCategory::Other.is_retryable());
    }

    #[test]
    fn test_error_category_ignorable() {
        assert!(ErrorCategory::NotFound.is_ignorable());
        assert!(!ErrorCategory::Unavailable.is_ignorable());
        assert!(!ErrorCategory::Rejected.is_ignorable());
    }

    #[test]
    fn test_error_category_advice() {
        assert!(!ErrorCategory::Unavailable.advice().is_empty());
        assert!(!ErrorCategory::Rejected.advice().is_empty());
        assert!(!ErrorCategory::NotFound.advice().is_empty());
    }

    #[test]
    fn test_from_status_not_found() {
        let err = Error::from_status("GET", "/api/queues/%2F/q", 404, "");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_status_auth_is_unavailable() {
        let err = Error::from_status("GET", "/api/vhosts", 401, "");
        assert_eq!(err.category(), ErrorCategory::Unavailable);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_status_server_error_is_unavailable() {
        let err = Error::from_status("PUT", "/api/vhosts/test", 503, "");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_status_bad_request_extracts_reason() {
        let body = r#"{"error":"bad_request","reason":"inequivalent arg 'type'"}"#;
        let err = Error::from_status("PUT", "/api/exchanges/test/x", 400, body);
        match err {
            Error::Rejected { status, reason, .. } => {
                assert_eq!(status, 400);
                assert_eq!(reason, "inequivalent arg 'type'");
            }
            other => panic!("Expected Error::Rejected, got {other:?}"),
        }
    }

    #[test]
    fn test_reason_falls_back_to_raw_body() {
        assert_eq!(reason_from_body("  plain text  "), "plain text");
    }

    #[test]
    fn test_error_display() {
        let err = Error::rejected("POST", "/api/bindings/test/e/x/q/y", 400, "no exchange");
        let display = err.to_string();
        assert!(display.contains("POST"));
        assert!(display.contains("no exchange"));
    }
}
