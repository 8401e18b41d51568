//! Redis-backed counter store.

use crate::{CounterKey, CounterStore, DEFAULT_KEY_PREFIX};
use async_trait::async_trait;
use qrquota_core::SubjectId;
use qrquota_error::StoreResult;
use redis::Script;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, instrument};

/// INCR with an expiry set only when the counter is created.
///
/// KEYS[1]: counter key
/// ARGV[1]: ttl in milliseconds
///
/// The PTTL check also repairs a key that somehow lost its expiry, so no
/// counter can outlive its window indefinitely.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('PTTL', KEYS[1]) == -1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// DECR that never goes below zero and never creates a key.
///
/// KEYS[1]: counter key
const DECREMENT_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current <= 0 then
    return 0
end
return redis.call('DECR', KEYS[1])
"#;

const SCAN_BATCH: u64 = 500;

/// Counter store on a Redis server, shared by every process that points at it.
///
/// Every mutation is a single Lua script, so increment-and-read is atomic on
/// the server regardless of how many instances are enforcing quotas.
pub struct RedisCounterStore {
    conn: ConnectionManager,
    prefix: String,
    increment: Script,
    decrement: Script,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Wrap an existing connection manager.
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            increment: Script::new(INCREMENT_SCRIPT),
            decrement: Script::new(DECREMENT_SCRIPT),
        }
    }

    /// Connect to `url` with the default key prefix.
    ///
    /// # Errors
    ///
    /// Returns a store error if the URL is invalid or the server is unreachable.
    #[instrument]
    pub async fn connect(url: &str) -> StoreResult<Self> {
        Self::connect_with_prefix(url, DEFAULT_KEY_PREFIX).await
    }

    /// Connect to `url`, namespacing every key under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the URL is invalid or the server is unreachable.
    #[instrument]
    pub async fn connect_with_prefix(url: &str, prefix: &str) -> StoreResult<Self> {
        debug!("Connecting to Redis counter store");
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, prefix))
    }

    /// Key prefix of this store.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    #[instrument(skip(self), fields(subject = %key.subject, kind = %key.kind))]
    async fn increment_and_get(&self, key: &CounterKey, ttl: Duration) -> StoreResult<u64> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let count: u64 = self
            .increment
            .key(key.render(&self.prefix))
            .arg(ttl_ms)
            .invoke_async(&mut self.conn.clone())
            .await?;
        Ok(count)
    }

    #[instrument(skip(self), fields(subject = %key.subject, kind = %key.kind))]
    async fn decrement(&self, key: &CounterKey) -> StoreResult<u64> {
        let count: u64 = self
            .decrement
            .key(key.render(&self.prefix))
            .invoke_async(&mut self.conn.clone())
            .await?;
        Ok(count)
    }

    async fn peek(&self, key: &CounterKey) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let count = redis::cmd("GET")
            .arg(key.render(&self.prefix))
            .query_async::<Option<u64>>(&mut conn)
            .await?;
        Ok(count.unwrap_or(0))
    }

    #[instrument(skip(self))]
    async fn reset_subject(&self, subject: &SubjectId) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let pattern = CounterKey::subject_pattern(&self.prefix, subject);
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                removed += redis::cmd("DEL")
                    .arg(&keys)
                    .query_async::<u64>(&mut conn)
                    .await?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        debug!(removed, "Reset subject counters");
        Ok(removed)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
