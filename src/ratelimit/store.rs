//! Concurrent keyed counter storage.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, trace};

use super::counter::{CounterRecord, Limit, Transition};
use super::key::RateLimitKey;
use crate::error::{Result, TurnstileError};

/// Thread-safe store of fixed-window counters, one per [`RateLimitKey`].
///
/// Backed by a sharded [`DashMap`]: each key hashes to one shard and every
/// mutation runs under that shard's write lock, so at most one mutation per
/// key is ever in flight. Keys in different shards never wait on each
/// other; keys sharing a shard serialize only for the few instructions of
/// an increment. The shard count is fixed at construction
/// ([`KeyedCounterStore::with_shard_amount`]).
///
/// A store belongs to exactly one limiter so that distinct limits never
/// share counts.
#[derive(Debug)]
pub struct KeyedCounterStore {
    records: DashMap<RateLimitKey, CounterRecord>,
    /// How long an expired record survives before a sweep may remove it
    idle_threshold: Duration,
}

impl KeyedCounterStore {
    /// Create an empty store with the default shard count.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            idle_threshold: Duration::ZERO,
        }
    }

    /// Create an empty store with an explicit shard count.
    ///
    /// `shards` must be a power of two greater than one.
    pub fn with_shard_amount(shards: usize) -> Result<Self> {
        if shards <= 1 || !shards.is_power_of_two() {
            return Err(TurnstileError::Config(format!(
                "shard amount must be a power of two greater than 1, got {}",
                shards
            )));
        }
        Ok(Self {
            records: DashMap::with_shard_amount(shards),
            idle_threshold: Duration::ZERO,
        })
    }

    /// Set how long a record must have been expired before [`sweep`](Self::sweep) removes it.
    pub fn with_idle_threshold(mut self, idle_threshold: Duration) -> Self {
        self.idle_threshold = idle_threshold;
        self
    }

    /// Get the idle threshold.
    pub fn idle_threshold(&self) -> Duration {
        self.idle_threshold
    }

    /// Record one request for `key` and return the post-increment record.
    ///
    /// Creates the record on first sight and rolls the window over when it
    /// has elapsed.
    pub fn get_and_increment(&self, key: &RateLimitKey, limit: &Limit, now: Instant) -> CounterRecord {
        self.hit_with(key, limit, now, |record| *record)
    }

    /// Record one request for `key` and run `inspect` on the post-increment
    /// record while the key is still locked.
    ///
    /// `inspect` must be short and must not touch this store; it runs inside
    /// the shard's critical section.
    pub fn hit_with<R>(
        &self,
        key: &RateLimitKey,
        limit: &Limit,
        now: Instant,
        inspect: impl FnOnce(&CounterRecord) -> R,
    ) -> R {
        // Fast path avoids cloning the key for records that already exist.
        if let Some(mut record) = self.records.get_mut(key) {
            Self::record_hit(key, &mut record, now);
            return inspect(&*record);
        }

        let mut record = self.records.entry(key.clone()).or_insert_with(|| {
            debug!(
                key = %key,
                limit = limit.max(),
                window = ?limit.window(),
                "Creating new rate limit counter"
            );
            CounterRecord::new(now, limit.window())
        });
        Self::record_hit(key, &mut record, now);
        inspect(&*record)
    }

    fn record_hit(key: &RateLimitKey, record: &mut CounterRecord, now: Instant) {
        if record.hit(now) == Transition::RolledOver {
            trace!(key = %key, "Rate limit window rolled over");
        }
    }

    /// Remove records whose window ended at least `idle_threshold` ago.
    ///
    /// A record touched after its window ended has already rolled over into
    /// a fresh window, so it is never removed here. Safe to run alongside
    /// [`get_and_increment`](Self::get_and_increment); each shard is locked
    /// only while it is scanned.
    ///
    /// Returns the number of records removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let idle_threshold = self.idle_threshold;
        let mut removed = 0;

        self.records.retain(|_, record| {
            // An idle threshold past the end of time keeps the record forever.
            let keep = match record.reset_at().checked_add(idle_threshold) {
                Some(evict_at) => now < evict_at,
                None => true,
            };
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            debug!(removed, remaining = self.records.len(), "Swept expired rate limit counters");
        }
        removed
    }

    /// Get a copy of the record for `key` without counting a request.
    pub fn peek(&self, key: &RateLimitKey) -> Option<CounterRecord> {
        self.records.get(key).map(|record| *record)
    }

    /// Get the number of tracked keys.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remove every record.
    pub fn clear(&self) {
        self.records.clear();
    }
}

impl Default for KeyedCounterStore {
    fn default() -> Self {
        Self::new()
    }
}
