//! In-process counter store.

use crate::{CounterKey, CounterStore};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use qrquota_core::{Clock, SubjectId, SystemClock};
use qrquota_error::StoreResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument};

/// Default period of the background purge.
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Counter value and the instant it stops being valid.
#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    expires_at: DateTime<Utc>,
}

impl CounterEntry {
    fn fresh(now: DateTime<Utc>, ttl: Duration) -> Self {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        Self {
            count: 0,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Counter store backed by a sharded in-process map.
///
/// Increments run under the shard lock of their key via the `dashmap` entry
/// API, so concurrent increments of one key never lose updates. Counts are
/// only shared within one process; multi-instance deployments need
/// [`RedisCounterStore`](crate::RedisCounterStore).
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use qrquota_core::{SubjectId, WindowKind};
/// use qrquota_store::{CounterKey, CounterStore, MemoryCounterStore};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryCounterStore::new();
/// let key = CounterKey::new(SubjectId::user(1), WindowKind::Minute, WindowKind::Minute.window_key(Utc::now()));
///
/// assert_eq!(store.increment_and_get(&key, Duration::from_secs(61)).await?, 1);
/// assert_eq!(store.increment_and_get(&key, Duration::from_secs(61)).await?, 2);
/// assert_eq!(store.peek(&key).await?, 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryCounterStore {
    counters: Arc<DashMap<CounterKey, CounterEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store that reads expiry time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        debug!("Creating in-memory counter store");
        Self {
            counters: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Remove expired counters. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        purge(&self.counters, self.clock.now())
    }

    /// Purge expired counters every `period` on the current tokio runtime.
    ///
    /// Expired counters are otherwise only dropped when their key is read
    /// again, and most window instances are never read after they end. The
    /// task stops once every handle to the store has been dropped.
    pub fn spawn_purge(&self, period: Duration) -> JoinHandle<()> {
        let counters = Arc::downgrade(&self.counters);
        let clock = Arc::clone(&self.clock);
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let Some(counters) = counters.upgrade() else {
                    break;
                };
                purge(&counters, clock.now());
            }
            debug!("Counter store dropped, purge task stopped");
        })
    }

    /// Drop the counter under `key` if it has expired.
    fn evict_expired(&self, key: &CounterKey, now: DateTime<Utc>) -> bool {
        self.counters
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
    }

    /// Number of stored counters, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the store holds no counters.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

fn purge(counters: &DashMap<CounterKey, CounterEntry>, now: DateTime<Utc>) -> usize {
    let before = counters.len();
    counters.retain(|_, entry| !entry.is_expired(now));
    let removed = before.saturating_sub(counters.len());
    if removed > 0 {
        info!(removed, remaining = counters.len(), "Purged expired counters");
    }
    removed
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    #[instrument(skip(self), fields(subject = %key.subject, kind = %key.kind))]
    async fn increment_and_get(&self, key: &CounterKey, ttl: Duration) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut entry = self
            .counters
            .entry(key.clone())
            .or_insert_with(|| CounterEntry::fresh(now, ttl));
        if entry.is_expired(now) {
            debug!("Counter expired, starting a new one");
            *entry = CounterEntry::fresh(now, ttl);
        }
        entry.count += 1;
        Ok(entry.count)
    }

    #[instrument(skip(self), fields(subject = %key.subject, kind = %key.kind))]
    async fn decrement(&self, key: &CounterKey) -> StoreResult<u64> {
        let now = self.clock.now();
        if self.evict_expired(key, now) {
            return Ok(0);
        }
        match self.counters.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.count = entry.count.saturating_sub(1);
                Ok(entry.count)
            }
            _ => Ok(0),
        }
    }

    async fn peek(&self, key: &CounterKey) -> StoreResult<u64> {
        let now = self.clock.now();
        if self.evict_expired(key, now) {
            return Ok(0);
        }
        Ok(self
            .counters
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.count)
            .unwrap_or(0))
    }

    #[instrument(skip(self))]
    async fn reset_subject(&self, subject: &SubjectId) -> StoreResult<u64> {
        let mut removed = 0;
        self.counters.retain(|key, _| {
            let keep = &key.subject != subject;
            if !keep {
                removed += 1;
            }
            keep
        });
        debug!(removed, "Reset subject counters");
        Ok(removed)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
