//! Request correlation ids.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use http::HeaderValue;
use uuid::Uuid;

/// Header carrying the correlation id in both directions.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest inbound id that is reused rather than replaced.
const MAX_INBOUND_LEN: usize = 128;

tokio::task_local! {
    static CURRENT: RequestId;
}

/// The correlation id of the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    /// The id of the request being served by this task, if any.
    ///
    /// Available to code that only sees the task, such as a panic handler.
    pub fn current() -> Option<Self> {
        CURRENT.try_with(Clone::clone).ok()
    }

    fn generate() -> Self {
        RequestId(Uuid::new_v4().to_string())
    }

    fn from_header(value: &HeaderValue) -> Option<Self> {
        let id = value.to_str().ok()?.trim();
        if id.is_empty() || id.len() > MAX_INBOUND_LEN {
            return None;
        }
        Some(RequestId(id.to_string()))
    }
}

/// Middleware that reuses the caller's `X-Request-ID` or assigns a new one,
/// stores it as a [`RequestId`] extension and echoes it on the response.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(RequestId::from_header)
        .unwrap_or_else(RequestId::generate);

    req.extensions_mut().insert(id.clone());
    let mut response = CURRENT.scope(id.clone(), next.run(req)).await;

    if let Ok(value) = HeaderValue::from_str(&id.0) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
