//! Whitelist and blacklist rules.
//!
//! A rule is a guard over the request. It may suspend (for example to look
//! something up) but must not touch counter state.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use http::request::Parts;

use super::identity::peer_addr;

/// A predicate over an incoming request.
#[async_trait]
pub trait AccessRule: Send + Sync {
    /// Whether the request matches this rule.
    async fn matches(&self, parts: &Parts) -> bool;
}

/// Rule backed by a synchronous closure.
pub struct FnRule<F>(pub F);

#[async_trait]
impl<F> AccessRule for FnRule<F>
where
    F: Fn(&Parts) -> bool + Send + Sync,
{
    async fn matches(&self, parts: &Parts) -> bool {
        (self.0)(parts)
    }
}

impl<F> fmt::Debug for FnRule<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnRule")
    }
}

/// Rule matching a fixed set of peer IP addresses.
#[derive(Debug, Clone, Default)]
pub struct AddrList {
    addrs: HashSet<IpAddr>,
}

impl AddrList {
    /// Create a rule matching any of `addrs`.
    pub fn new(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            addrs: addrs.into_iter().collect(),
        }
    }

    /// Number of addresses in the list.
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

#[async_trait]
impl AccessRule for AddrList {
    async fn matches(&self, parts: &Parts) -> bool {
        peer_addr(parts).is_some_and(|addr| self.addrs.contains(&addr.ip()))
    }
}
