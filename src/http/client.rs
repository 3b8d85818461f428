//! Client key extraction from inbound requests.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use http::Request;

use crate::ratelimit::ClientKey;

/// Key used when a request carries no usable address.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// A verified caller identity, inserted as a request extension by the
/// authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity(pub String);

/// Decides which client key a request counts against.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientKeyExtractor {
    trust_forwarded_headers: bool,
    key_by_identity: bool,
}

impl ClientKeyExtractor {
    /// Create an extractor.
    ///
    /// Forwarded headers are spoofable, so only trust them behind a proxy
    /// that overwrites them.
    pub fn new(trust_forwarded_headers: bool, key_by_identity: bool) -> Self {
        Self {
            trust_forwarded_headers,
            key_by_identity,
        }
    }

    /// The key for `req`. Requests without any usable address share the
    /// [`UNKNOWN_CLIENT`] budget.
    pub fn extract<B>(&self, req: &Request<B>) -> ClientKey {
        if self.key_by_identity {
            if let Some(identity) = req.extensions().get::<AuthenticatedIdentity>() {
                return ClientKey::identity(identity.0.clone());
            }
        }

        self.client_ip(req)
            .map(ClientKey::from)
            .unwrap_or_else(|| ClientKey::address(UNKNOWN_CLIENT))
    }

    fn client_ip<B>(&self, req: &Request<B>) -> Option<IpAddr> {
        if self.trust_forwarded_headers {
            if let Some(ip) = forwarded_ip(req) {
                return Some(ip);
            }
        }

        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|connect_info| connect_info.0.ip())
    }
}

/// First address in `X-Forwarded-For`, else `X-Real-IP`.
fn forwarded_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(forwarded_for) = req.headers().get("x-forwarded-for") {
        let first = forwarded_for.to_str().ok()?.split(',').next()?;
        return first.trim().parse().ok();
    }

    req.headers()
        .get("x-real-ip")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
