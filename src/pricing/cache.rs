//! In-memory exchange-rate cache.
//!
//! Holds at most one table and the time it was fetched. An entry younger
//! than the TTL is fresh; an older one is stale but still served when a
//! refresh fails. Entries are replaced, never merged.

use super::types::ExchangeRateTable;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Default lifetime of a fetched rate table, in seconds.
pub const RATE_CACHE_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone)]
struct CacheEntry {
    table: Arc<ExchangeRateTable>,
    fetched_at: DateTime<Utc>,
}

/// The rate cache.
#[derive(Debug, Clone)]
pub struct RateCache {
    entry: Option<CacheEntry>,
    ttl: Duration,
}

impl Default for RateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RateCache {
    pub fn new() -> Self {
        Self::with_ttl(Duration::seconds(RATE_CACHE_TTL_SECS))
    }

    /// Cache with a custom lifetime (for testing).
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { entry: None, ttl }
    }

    /// The cached table if it is younger than the TTL at `now`.
    pub fn fresh(&self, now: DateTime<Utc>) -> Option<Arc<ExchangeRateTable>> {
        let entry = self.entry.as_ref()?;
        if now - entry.fetched_at < self.ttl {
            Some(Arc::clone(&entry.table))
        } else {
            None
        }
    }

    /// The cached table regardless of age.
    pub fn stale(&self) -> Option<Arc<ExchangeRateTable>> {
        self.entry.as_ref().map(|e| Arc::clone(&e.table))
    }

    /// Replace the cached table and restart its clock at `now`.
    pub fn store(
        &mut self,
        table: ExchangeRateTable,
        now: DateTime<Utc>,
    ) -> Arc<ExchangeRateTable> {
        let table = Arc::new(table);
        self.entry = Some(CacheEntry {
            table: Arc::clone(&table),
            fetched_at: now,
        });
        table
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.entry.as_ref().map(|e| e.fetched_at)
    }

    /// Drop the cached table.
    pub fn clear(&mut self) {
        self.entry = None;
    }
}
