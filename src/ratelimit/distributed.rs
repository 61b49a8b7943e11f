//! Shared counter store backed by Redis.
//!
//! Several processes pointing at the same Redis share one quota per
//! identity. The window transition runs as a single Lua script on the server,
//! so a read and the write that follows it can never interleave with another
//! process.
//!
//! Each identity is a hash at `<namespace>:<identity>` with the fields
//! `remaining`, `total` and `reset` (epoch milliseconds). The key expires when
//! its window ends, which reclaims identities that stop sending requests.

use std::fmt;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, trace};

use super::backend::{namespaced_key, CounterStore, DEFAULT_NAMESPACE};
use super::counter::{CounterRecord, Quota};
use crate::error::StoreError;

/// Applies one request to a window; mirrors `counter::advance`.
///
/// KEYS[1] = record key
/// ARGV[1] = max, ARGV[2] = duration (ms), ARGV[3] = now (epoch ms)
///
/// Returns `{remaining, total, reset}`.
const ADVANCE_SCRIPT: &str = r#"
local key = KEYS[1]
local max = tonumber(ARGV[1])
local duration = tonumber(ARGV[2])
local now = tonumber(ARGV[3])

local reset = tonumber(redis.call('HGET', key, 'reset'))
if not reset or reset <= now then
    reset = now + duration
    redis.call('HSET', key, 'remaining', max, 'total', max, 'reset', reset)
    redis.call('PEXPIRE', key, duration)
    return {max, max, reset}
end

local remaining = tonumber(redis.call('HGET', key, 'remaining')) or 0
if remaining > 0 then
    remaining = redis.call('HINCRBY', key, 'remaining', -1)
end
local total = tonumber(redis.call('HGET', key, 'total')) or max

return {remaining, total, reset}
"#;

/// Redis-backed counter store.
#[derive(Clone)]
pub struct SharedStore {
    conn: ConnectionManager,
    script: Script,
    namespace: String,
}

impl fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl SharedStore {
    /// Wrap an existing connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            script: Script::new(ADVANCE_SCRIPT),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Connect to Redis at `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!(url = %url, "Connected shared counter store");
        Ok(Self::new(conn))
    }

    /// Use a custom key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

#[async_trait]
impl CounterStore for SharedStore {
    async fn get(
        &self,
        identity: &str,
        quota: Quota,
        now: u64,
    ) -> Result<CounterRecord, StoreError> {
        let key = namespaced_key(&self.namespace, identity);
        let mut conn = self.conn.clone();

        let reply: Vec<i64> = self
            .script
            .key(&key)
            .arg(quota.max)
            .arg(quota.duration_millis())
            .arg(now)
            .invoke_async(&mut conn)
            .await?;

        let record = record_from_reply(&key, identity, &reply)?;

        trace!(
            key = %key,
            remaining = record.remaining,
            total = record.total,
            reset = record.reset,
            "Shared counter updated"
        );

        Ok(record)
    }
}

/// Decode the script's `{remaining, total, reset}` reply.
fn record_from_reply(key: &str, identity: &str, reply: &[i64]) -> Result<CounterRecord, StoreError> {
    let malformed = |reason: String| StoreError::Malformed {
        key: key.to_string(),
        reason,
    };

    let [remaining, total, reset] = reply else {
        return Err(malformed(format!("expected 3 fields, got {}", reply.len())));
    };

    let field = |name: &str, value: i64| {
        u64::try_from(value).map_err(|_| malformed(format!("{} is negative: {}", name, value)))
    };

    let total = field("total", *total)?;
    let remaining = field("remaining", *remaining)?;
    if remaining > total {
        return Err(malformed(format!(
            "remaining {} exceeds total {}",
            remaining, total
        )));
    }

    Ok(CounterRecord {
        identity: identity.to_string(),
        total,
        remaining,
        reset: field("reset", *reset)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_record_from_reply() {
        let record = record_from_reply("limit:a", "a", &[4, 5, 1_000]).unwrap();
        assert_eq!(
            record,
            CounterRecord {
                identity: "a".to_string(),
                total: 5,
                remaining: 4,
                reset: 1_000,
            }
        );
    }

    #[test]
    fn test_record_from_reply_rejects_bad_shapes() {
        assert!(matches!(
            record_from_reply("limit:a", "a", &[1, 2]),
            Err(StoreError::Malformed { .. })
        ));
        assert!(matches!(
            record_from_reply("limit:a", "a", &[-1, 2, 3]),
            Err(StoreError::Malformed { .. })
        ));
        assert!(matches!(
            record_from_reply("limit:a", "a", &[3, 2, 3]),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let result = SharedStore::connect("not a redis url").await;
        assert!(matches!(result, Err(StoreError::Redis(_))));
    }

    // The tests below need a live Redis: `REDIS_URL=... cargo test -- --ignored`

    async fn test_store(namespace: &str) -> SharedStore {
        let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set");
        let store = SharedStore::connect(&url).await.unwrap();
        let namespace = format!("quotaguard-test-{}-{}", namespace, std::process::id());
        store.with_namespace(namespace)
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn test_shared_store_window_lifecycle() {
        let store = test_store("lifecycle").await;
        let quota = Quota::new(2, Duration::from_millis(1000));

        let first = store.get("client", quota, 0).await.unwrap();
        assert_eq!((first.remaining, first.total, first.reset), (2, 2, 1000));

        let second = store.get("client", quota, 10).await.unwrap();
        assert_eq!(second.remaining, 1);
        let third = store.get("client", quota, 20).await.unwrap();
        assert_eq!(third.remaining, 0);
        let fourth = store.get("client", quota, 30).await.unwrap();
        assert_eq!(fourth.remaining, 0);

        let fresh = store.get("client", quota, 1000).await.unwrap();
        assert_eq!((fresh.remaining, fresh.reset), (2, 2000));
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn test_shared_store_concurrent_requests_never_exceed_quota() {
        let store = test_store("concurrency").await;
        let store = Arc::new(store);
        let max = 20;
        let quota = Quota::new(max, Duration::from_secs(60));
        let now = chrono::Utc::now().timestamp_millis() as u64;

        let mut handles = Vec::new();
        for _ in 0..max * 3 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.get("hot", quota, now).await.unwrap().admits()
            }));
        }

        let results = futures::future::join_all(handles).await;
        let admitted = results.into_iter().filter(|r| matches!(r, Ok(true))).count();

        assert_eq!(admitted as u64, max);
    }
}
