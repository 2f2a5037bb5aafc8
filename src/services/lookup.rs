// src/services/lookup.rs

//! Cache-aside player lookup.
//!
//! Hits are served from memory until their TTL runs out. Empty results are
//! cached too, under a shorter TTL. The cache holds at most `capacity`
//! distinct filters and evicts the least recently used.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::Result;
use crate::models::{CacheConfig, PlayerFilter, PlayerView};
use crate::storage::PlayerReader;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

impl<T: Clone> CacheEntry<T> {
    fn fresh(&self, now: Instant) -> Option<T> {
        (now < self.expires_at).then(|| self.value.clone())
    }
}

/// Result of a lookup, flagged with where it came from.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub players: Arc<Vec<PlayerView>>,
    pub cached: bool,
}

/// TTL cache in front of a [`PlayerReader`].
pub struct CachedLookup {
    reader: Arc<dyn PlayerReader>,
    ttl: Duration,
    negative_ttl: Duration,
    searches: Mutex<LruCache<PlayerFilter, CacheEntry<Arc<Vec<PlayerView>>>>>,
    last_sync: Mutex<Option<CacheEntry<Option<DateTime<Utc>>>>>,
}

impl CachedLookup {
    pub fn new(reader: Arc<dyn PlayerReader>, config: &CacheConfig) -> Self {
        Self::with_ttl(
            reader,
            Duration::from_secs(config.ttl_secs),
            Duration::from_secs(config.negative_ttl_secs),
        )
        .with_capacity(config.capacity)
    }

    pub fn with_ttl(reader: Arc<dyn PlayerReader>, ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            reader,
            ttl,
            negative_ttl,
            searches: Mutex::new(LruCache::new(capacity(DEFAULT_CAPACITY))),
            last_sync: Mutex::new(None),
        }
    }

    /// Cap the number of cached filters. A zero capacity keeps one entry.
    pub fn with_capacity(self, max_entries: usize) -> Self {
        Self {
            searches: Mutex::new(LruCache::new(capacity(max_entries))),
            ..self
        }
    }

    /// Filters currently cached, live or expired.
    pub fn cached_searches(&self) -> usize {
        self.searches.lock().len()
    }

    /// Look players up by uid and/or username.
    pub async fn search(&self, filter: &PlayerFilter) -> Result<Lookup> {
        let filter = filter.normalized()?;
        let now = Instant::now();

        if let Some(players) = self.searches.lock().get(&filter).and_then(|e| e.fresh(now)) {
            log::debug!("[CACHE] hit {:?}", filter);
            return Ok(Lookup {
                players,
                cached: true,
            });
        }

        let players = Arc::new(self.reader.search_by_key_or_name(&filter).await?);
        let ttl = if players.is_empty() {
            self.negative_ttl
        } else {
            self.ttl
        };

        self.searches.lock().put(
            filter,
            CacheEntry {
                value: Arc::clone(&players),
                expires_at: Instant::now() + ttl,
            },
        );

        Ok(Lookup {
            players,
            cached: false,
        })
    }

    /// Last successful sync time, cached like a search.
    pub async fn last_sync(&self) -> Result<Option<DateTime<Utc>>> {
        let now = Instant::now();
        if let Some(at) = self.last_sync.lock().as_ref().and_then(|e| e.fresh(now)) {
            return Ok(at);
        }

        let at = self.reader.last_sync_timestamp().await?;
        *self.last_sync.lock() = Some(CacheEntry {
            value: at,
            expires_at: Instant::now() + self.ttl,
        });
        Ok(at)
    }
}

fn capacity(max_entries: usize) -> NonZeroUsize {
    NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN)
}
