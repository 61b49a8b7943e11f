//! Counter store trait for abstracting local and shared implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::counter::{CounterRecord, Quota};
use super::distributed::SharedStore;
use super::local::LocalStore;
use crate::error::StoreError;

/// Default key namespace for counter records.
pub const DEFAULT_NAMESPACE: &str = "limit";

/// Build the storage key for an identity.
pub fn namespaced_key(namespace: &str, identity: &str) -> String {
    format!("{}:{}", namespace, identity)
}

/// Trait for counter store implementations.
///
/// `get` applies one request to the identity's window (see
/// [`counter::advance`](super::counter::advance)), persists the result and
/// returns it. Concurrent calls for the same identity must serialize: no two
/// callers may observe the same pre-decrement `remaining`.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Record one request for `identity` at `now` (epoch ms) and return the
    /// window state it produced.
    async fn get(
        &self,
        identity: &str,
        quota: Quota,
        now: u64,
    ) -> Result<CounterRecord, StoreError>;
}

/// Which store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// In-process map
    #[default]
    #[serde(alias = "memory")]
    Local,
    /// Redis shared between processes
    #[serde(alias = "redis")]
    Shared,
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverKind::Local => write!(f, "local"),
            DriverKind::Shared => write!(f, "shared"),
        }
    }
}

/// A configured counter store.
#[derive(Debug, Clone)]
pub enum Backend {
    /// Process-local counters
    Local(LocalStore),
    /// Counters shared through Redis
    Shared(SharedStore),
}

impl Backend {
    /// The driver this backend was built for.
    pub fn kind(&self) -> DriverKind {
        match self {
            Backend::Local(_) => DriverKind::Local,
            Backend::Shared(_) => DriverKind::Shared,
        }
    }
}

impl From<LocalStore> for Backend {
    fn from(store: LocalStore) -> Self {
        Backend::Local(store)
    }
}

impl From<SharedStore> for Backend {
    fn from(store: SharedStore) -> Self {
        Backend::Shared(store)
    }
}

#[async_trait]
impl CounterStore for Backend {
    async fn get(
        &self,
        identity: &str,
        quota: Quota,
        now: u64,
    ) -> Result<CounterRecord, StoreError> {
        match self {
            Backend::Local(store) => store.get(identity, quota, now).await,
            Backend::Shared(store) => store.get(identity, quota, now).await,
        }
    }
}
