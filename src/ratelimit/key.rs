//! Limiter keys and their wire layout in the shared counter store.

use std::fmt;
use std::net::IpAddr;

/// Store key of the service-wide counter.
pub const GLOBAL_KEY: &str = "rate:global";

/// Prefix of per-address counters.
pub const ADDRESS_KEY_PREFIX: &str = "rate:ip:";

/// Prefix of per-identity counters.
pub const IDENTITY_KEY_PREFIX: &str = "rate:id:";

/// Who a per-client budget belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    /// The request's source address
    Address(String),
    /// A verified identity supplied by the authentication layer
    Identity(String),
}

impl ClientKey {
    /// Key a client by its network address.
    pub fn address(addr: impl Into<String>) -> Self {
        ClientKey::Address(addr.into())
    }

    /// Key a client by an authenticated identity.
    pub fn identity(id: impl Into<String>) -> Self {
        ClientKey::Identity(id.into())
    }

    /// The raw identifier without its kind.
    pub fn as_str(&self) -> &str {
        match self {
            ClientKey::Address(a) => a,
            ClientKey::Identity(i) => i,
        }
    }

    /// Store key for this client, e.g. `rate:ip:10.0.0.1`.
    pub fn store_key(&self) -> String {
        match self {
            ClientKey::Address(a) => format!("{ADDRESS_KEY_PREFIX}{a}"),
            ClientKey::Identity(i) => format!("{IDENTITY_KEY_PREFIX}{i}"),
        }
    }
}

impl From<IpAddr> for ClientKey {
    fn from(ip: IpAddr) -> Self {
        ClientKey::Address(ip.to_string())
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKey::Address(a) => write!(f, "ip:{a}"),
            ClientKey::Identity(i) => write!(f, "id:{i}"),
        }
    }
}

/// The scope of a single window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LimiterKey {
    /// The service-wide budget
    Global,
    /// A per-client budget
    Client(ClientKey),
}

impl LimiterKey {
    /// Store key for this scope.
    pub fn store_key(&self) -> String {
        match self {
            LimiterKey::Global => GLOBAL_KEY.to_string(),
            LimiterKey::Client(client) => client.store_key(),
        }
    }
}

impl fmt::Display for LimiterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.store_key())
    }
}
