//! Process-local counter store.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::backend::{namespaced_key, CounterStore, DEFAULT_NAMESPACE};
use super::counter::{advance, CounterRecord, Quota};
use crate::error::StoreError;

/// In-memory counter store.
///
/// Cloning yields another handle to the same map, so whoever owns the store's
/// lifecycle can keep a handle and [`clear`](Self::clear) it (for example
/// between test runs) while the limiter uses another.
///
/// Entries are only replaced lazily, never swept. Memory grows with the
/// number of distinct identities until the map is cleared.
#[derive(Debug, Clone)]
pub struct LocalStore {
    /// Counter records indexed by namespaced key
    entries: Arc<DashMap<String, CounterRecord>>,
    namespace: String,
}

impl LocalStore {
    /// Create an empty store using the default `limit` namespace.
    pub fn new() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    /// Create an empty store with a custom key namespace.
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            namespace: namespace.into(),
        }
    }

    /// Look at an identity's record without counting a request.
    pub fn snapshot(&self, identity: &str) -> Option<CounterRecord> {
        let key = namespaced_key(&self.namespace, identity);
        self.entries.get(&key).map(|r| r.value().clone())
    }

    /// Remove every record.
    pub fn clear(&self) {
        debug!(entries = self.entries.len(), "Clearing local counter store");
        self.entries.clear();
    }

    /// Number of identities with a record.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for LocalStore {
    async fn get(
        &self,
        identity: &str,
        quota: Quota,
        now: u64,
    ) -> Result<CounterRecord, StoreError> {
        let key = namespaced_key(&self.namespace, identity);

        // The entry guard holds the shard lock for the whole read-modify-write.
        let record = match self.entries.entry(key) {
            Entry::Occupied(mut entry) => {
                let next = advance(Some(entry.get()), identity, quota, now);
                entry.insert(next.clone());
                next
            }
            Entry::Vacant(entry) => {
                let next = advance(None, identity, quota, now);
                entry.insert(next.clone());
                next
            }
        };

        trace!(
            identity = %identity,
            remaining = record.remaining,
            total = record.total,
            reset = record.reset,
            "Local counter updated"
        );

        Ok(record)
    }
}
