//! Admission control middleware for HTTP requests.

use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use axum::response::IntoResponse;
use http::{Request, Response};
use tower::Layer;
use tracing::debug;

use super::client::ClientKeyExtractor;
use super::rejection::Rejection;
use super::request_id::RequestId;
use crate::admission::{AdmissionDecisionPoint, AdmissionError};

struct Shared {
    decision_point: AdmissionDecisionPoint,
    extractor: ClientKeyExtractor,
}

/// Tower layer that runs every request past the admission decision point.
///
/// Admitted requests continue with their [`crate::ratelimit::ClientKey`]
/// stored as an extension. Refused requests never reach the inner service.
#[derive(Clone)]
pub struct AdmissionLayer(Arc<Shared>);

impl AdmissionLayer {
    /// Create a layer over `decision_point`.
    pub fn new(decision_point: AdmissionDecisionPoint, extractor: ClientKeyExtractor) -> Self {
        Self(Arc::new(Shared {
            decision_point,
            extractor,
        }))
    }
}

impl<Service> Layer<Service> for AdmissionLayer
where
    Service: Send + Clone,
{
    type Service = AdmissionService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        AdmissionService {
            next,
            shared: self.0.clone(),
        }
    }
}

/// Service produced by [`AdmissionLayer`].
#[derive(Clone)]
pub struct AdmissionService<Service> {
    next: Service,
    shared: Arc<Shared>,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for AdmissionService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        // Keep the service that was polled ready; leave a fresh clone behind.
        let clone = self.next.clone();
        let mut next = std::mem::replace(&mut self.next, clone);
        let shared = self.shared.clone();

        Box::pin(async move {
            let client = shared.extractor.extract(&req);

            let err = match shared.decision_point.admit(&client).await {
                Ok(()) => {
                    req.extensions_mut().insert(client);
                    return next.call(req).await;
                }
                Err(err) => err,
            };

            let request_id = req
                .extensions()
                .get::<RequestId>()
                .map(|id| id.0.clone())
                .unwrap_or_default();

            if let AdmissionError::RateLimited { scope, .. } = &err {
                debug!(
                    rid = %request_id,
                    client = %client,
                    route = %req.uri().path(),
                    scope = %scope,
                    "Request rejected due to rate limit"
                );
            }

            Ok(Rejection::new(err, request_id).into_response())
        })
    }
}
