//! Failure taxonomy shared by the blocking HTTP clients.

use reqwest::blocking::Response;
use reqwest::StatusCode;
use thiserror::Error;

use crate::retry::Transient;

/// Error returned by embedding and language-model HTTP clients.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// 429 or a quota-exhaustion message.
    #[error("rate limited ({status}): {body}")]
    RateLimited {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Request exceeded the client deadline.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// Connection could not be established or was dropped.
    #[error("connection error: {0}")]
    Connection(String),
    /// 5xx from the provider.
    #[error("provider error ({status}): {body}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Any other non-success status (auth, invalid request, unknown model).
    #[error("request rejected ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Response arrived but did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// Client-side configuration problem.
    #[error("client error: {0}")]
    Client(String),
}

impl ProviderError {
    /// Classifies a non-success status and its body.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        let code = status.as_u16();
        if status == StatusCode::TOO_MANY_REQUESTS || body.to_ascii_lowercase().contains("quota") {
            ProviderError::RateLimited { status: code, body }
        } else if status.is_server_error() {
            ProviderError::Server { status: code, body }
        } else {
            ProviderError::Rejected { status: code, body }
        }
    }
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Timeout(_)
                | ProviderError::Connection(_)
                | ProviderError::Server { .. }
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            ProviderError::Connection(err.to_string())
        } else if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::from_status(status, err.to_string())
        } else {
            ProviderError::Client(err.to_string())
        }
    }
}

/// Returns the response when successful, otherwise the classified failure.
pub fn check_status(resp: Response) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp
        .text()
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(ProviderError::from_status(status, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_transience() {
        let transient = |status: StatusCode, body: &str| {
            ProviderError::from_status(status, body.to_string()).is_transient()
        };
        assert!(transient(StatusCode::TOO_MANY_REQUESTS, ""));
        assert!(transient(StatusCode::BAD_GATEWAY, ""));
        assert!(!transient(StatusCode::UNAUTHORIZED, ""));
        assert!(!transient(StatusCode::BAD_REQUEST, "bad prompt"));
    }

    #[test]
    fn quota_message_counts_as_rate_limit() {
        let err = ProviderError::from_status(
            StatusCode::FORBIDDEN,
            "Quota exceeded for requests per minute".into(),
        );
        assert!(matches!(err, ProviderError::RateLimited { status: 403, .. }));
        assert!(err.is_transient());
    }
}
