//! JSON bodies for requests refused by admission control.

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::{header, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

use crate::admission::AdmissionError;

/// Error code for tier refusals.
pub const TOO_MANY_REQUEST: &str = "TOO_MANY_REQUEST";
/// Error code for counter store failures.
pub const RATE_LIMIT_STORAGE_ERROR: &str = "RATE_LIMIT_STORAGE_ERROR";
/// Error code for requests whose handler panicked.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// The body of a refused request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Correlation id of the refused request
    pub request_id: String,
}

impl ErrorBody {
    /// Create a body.
    pub fn new(code: &str, message: &str, request_id: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            request_id: request_id.into(),
        }
    }
}

/// A refused request, ready to be turned into a response.
#[derive(Debug)]
pub struct Rejection {
    error: AdmissionError,
    request_id: String,
}

impl Rejection {
    /// Wrap `error` for the request identified by `request_id`.
    pub fn new(error: AdmissionError, request_id: impl Into<String>) -> Self {
        Self {
            error,
            request_id: request_id.into(),
        }
    }

    /// Status code for the wrapped error.
    pub fn status(&self) -> StatusCode {
        match self.error {
            AdmissionError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AdmissionError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body for the wrapped error.
    ///
    /// Store failures are reported generically; the cause only goes to logs.
    pub fn body(&self) -> ErrorBody {
        let (code, message) = match self.error {
            AdmissionError::RateLimited { .. } => (TOO_MANY_REQUEST, "too many request"),
            AdmissionError::StoreUnavailable(_) => {
                (RATE_LIMIT_STORAGE_ERROR, "rate limit storage error")
            }
        };
        ErrorBody::new(code, message, self.request_id.clone())
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.body())).into_response();

        if let Some(retry_after) = self.error.retry_after() {
            // Round up so clients never retry before the window rolls over.
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::Scope;
    use crate::store::StoreError;
    use std::time::Duration;

    #[test]
    fn test_rate_limited_body() {
        let rejection = Rejection::new(
            AdmissionError::RateLimited {
                scope: Scope::Client,
                retry_after: None,
            },
            "rid-1",
        );

        assert_eq!(rejection.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            rejection.body(),
            ErrorBody {
                code: "TOO_MANY_REQUEST".to_string(),
                message: "too many request".to_string(),
                request_id: "rid-1".to_string(),
            }
        );
    }

    #[test]
    fn test_store_failure_is_internal_error() {
        let rejection = Rejection::new(
            AdmissionError::StoreUnavailable(StoreError::Timeout(Duration::from_millis(500))),
            "rid-2",
        );

        assert_eq!(rejection.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(rejection.body().code, RATE_LIMIT_STORAGE_ERROR);

        let response = rejection.into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let rejection = Rejection::new(
            AdmissionError::RateLimited {
                scope: Scope::Global,
                retry_after: Some(Duration::from_millis(12_300)),
            },
            "rid-3",
        );

        let response = rejection.into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "13");
    }
}
