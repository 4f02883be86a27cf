//! Error types for the execution backends

use thiserror::Error;

/// Result type alias for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur when talking to an execution backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Control plane returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error body returned by the control plane
        message: String,
    },

    /// Control plane stayed unreachable after every retry attempt
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// No connection parameters for the requested cloud
    #[error("no backend configured for cloud '{0}'")]
    UnknownCloud(String),

    /// Failed to parse a response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Invalid backend configuration
    #[error("invalid backend configuration: {0}")]
    Config(String),
}

impl BackendError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if this error is transient and worth trying again later
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
            || matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }
}

/// Turns a non-success response into an `ApiError`
pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(BackendError::api_error(status.as_u16(), error_text));
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(BackendError::api_error(404, "gone").is_not_found());
        assert!(!BackendError::api_error(500, "boom").is_not_found());
        assert!(BackendError::api_error(503, "busy").is_transient());
        assert!(BackendError::Unavailable("create job".into()).is_transient());
        assert!(!BackendError::UnknownCloud("aws".into()).is_transient());
    }
}
