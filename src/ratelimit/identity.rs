//! Identity resolution: which quota a request is counted against.

use std::fmt;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use http::header::HeaderName;
use http::request::Parts;
use tracing::warn;

/// Identity used when the host did not record a peer address.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// The result of resolving a request's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Count the request against this key
    Key(String),
    /// Do not rate limit this request at all
    Skip,
}

impl Identity {
    /// Create a keyed identity.
    pub fn key(key: impl Into<String>) -> Self {
        Identity::Key(key.into())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Key(key) => write!(f, "{}", key),
            Identity::Skip => write!(f, "<skip>"),
        }
    }
}

/// Derives an identity from a request.
///
/// Must be deterministic for a given request and free of side effects.
pub trait IdentityResolver: Send + Sync {
    /// Resolve the identity for a request.
    fn resolve(&self, parts: &Parts) -> Identity;
}

/// Extract the peer address recorded by the host, if any.
pub fn peer_addr(parts: &Parts) -> Option<SocketAddr> {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0)
        .or_else(|| parts.extensions.get::<SocketAddr>().copied())
}

/// Default resolver: the peer's IP address.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerAddr;

impl IdentityResolver for PeerAddr {
    fn resolve(&self, parts: &Parts) -> Identity {
        match peer_addr(parts) {
            Some(addr) => Identity::Key(addr.ip().to_string()),
            None => {
                warn!(
                    uri = %parts.uri,
                    "No peer address recorded for request; counting it as '{}'",
                    UNKNOWN_IDENTITY
                );
                Identity::key(UNKNOWN_IDENTITY)
            }
        }
    }
}

/// Resolver keyed on a request header; requests without it are not limited.
///
/// The key is the header's bytes with non-printable bytes, quotes and
/// backslashes escaped, so distinct values always map to distinct keys.
#[derive(Debug, Clone)]
pub struct HeaderValueResolver {
    header: HeaderName,
}

impl HeaderValueResolver {
    /// Key requests on the value of `header`.
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl IdentityResolver for HeaderValueResolver {
    fn resolve(&self, parts: &Parts) -> Identity {
        match parts.headers.get(&self.header) {
            Some(value) => Identity::key(value.as_bytes().escape_ascii().to_string()),
            None => Identity::Skip,
        }
    }
}

/// Resolver wrapping a closure.
pub struct FnResolver<F>(pub F);

impl<F> IdentityResolver for FnResolver<F>
where
    F: Fn(&Parts) -> Identity + Send + Sync,
{
    fn resolve(&self, parts: &Parts) -> Identity {
        (self.0)(parts)
    }
}

impl<F> fmt::Debug for FnResolver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnResolver")
    }
}
