//! Turning handler panics into JSON error responses.

use std::any::Any;

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use tracing::error;

use super::rejection::{ErrorBody, INTERNAL_ERROR};
use super::request_id::RequestId;

/// Panic handler for `tower_http::catch_panic::CatchPanicLayer`.
///
/// Answers 500 with an `INTERNAL_ERROR` body carrying the id of the request
/// that panicked.
pub fn internal_error(panic: Box<dyn Any + Send + 'static>) -> Response {
    let request_id = RequestId::current().map(|id| id.0).unwrap_or_default();

    let detail = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    error!(rid = %request_id, panic = %detail, "Request handler panicked");

    let body = ErrorBody::new(INTERNAL_ERROR, "internal server error", request_id);
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}
