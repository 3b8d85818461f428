//! HTTP surface: correlation ids, access logs, panic recovery and admission control.

mod client;
mod layer;
mod recovery;
mod rejection;
mod request_id;
mod server;

pub use client::{AuthenticatedIdentity, ClientKeyExtractor, UNKNOWN_CLIENT};
pub use layer::{AdmissionLayer, AdmissionService};
pub use recovery::internal_error;
pub use rejection::{
    ErrorBody, Rejection, INTERNAL_ERROR, RATE_LIMIT_STORAGE_ERROR, TOO_MANY_REQUEST,
};
pub use request_id::{request_id, RequestId, REQUEST_ID_HEADER};
pub use server::{build_router, with_middleware, HttpServer};
