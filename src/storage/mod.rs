//! Storage abstractions for player persistence.
//!
//! The write side is split in two layers:
//! - [`PlayerStore`]: primitive operations a backend must provide
//! - [`AdaptiveStorageGateway`]: picks a [`WriteStrategy`] from the batch size,
//!   bounds each step with a timeout and falls back to a single transaction
//!
//! The read side ([`PlayerReader`]) is used by the lookup cache and the HTTP
//! routes.

pub mod gateway;
pub mod memory;
pub mod postgres;
pub mod strategy;

use std::collections::HashSet;
use std::ops::AddAssign;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::{PlayerFilter, PlayerRecord, PlayerUpdate, PlayerView};

// Re-export for convenience
pub use gateway::{AdaptiveStorageGateway, UpsertSummary};
pub use memory::MemoryStore;
pub use postgres::PgPlayerStore;
pub use strategy::{StrategyPolicy, WriteStrategy};

/// Per-record outcome counts of a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
    /// Existing rows whose fields already matched
    pub unchanged: usize,
}

impl UpsertCounts {
    pub fn inserted() -> Self {
        Self {
            inserted: 1,
            ..Self::default()
        }
    }

    pub fn updated() -> Self {
        Self {
            updated: 1,
            ..Self::default()
        }
    }

    pub fn unchanged() -> Self {
        Self {
            unchanged: 1,
            ..Self::default()
        }
    }

    /// Records the store accepted, changed or not.
    pub fn written(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }
}

impl AddAssign for UpsertCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
        self.unchanged += rhs.unchanged;
    }
}

/// Primitive write operations of a player store.
///
/// Every upsert keys on `external_id`. The update path overwrites
/// `display_name`, `crew_tag` and `last_seen_at` only.
#[async_trait]
pub trait PlayerStore: Send + Sync {
    /// Upsert a single record.
    async fn upsert_one(&self, record: &PlayerRecord) -> Result<UpsertCounts>;

    /// Upsert all records in one all-or-nothing transaction.
    async fn upsert_many(&self, records: &[PlayerRecord]) -> Result<UpsertCounts>;

    /// Set-based upsert for large batches.
    async fn bulk_native_upsert(&self, records: &[PlayerRecord]) -> Result<UpsertCounts>;

    /// Which of `keys` already exist.
    async fn find_existing_keys(&self, keys: &[String]) -> Result<HashSet<String>>;

    /// Insert records, silently skipping keys that already exist.
    /// Returns how many rows were created.
    async fn create_many(&self, records: &[PlayerRecord]) -> Result<usize>;

    /// Overwrite the mutable fields of one row. Returns whether a row changed.
    async fn update_one(&self, key: &str, update: &PlayerUpdate) -> Result<bool>;

    /// Remember when the last successful cycle finished.
    async fn record_sync(&self, at: DateTime<Utc>) -> Result<()>;
}

/// Read operations used by the lookup path.
#[async_trait]
pub trait PlayerReader: Send + Sync {
    /// Players matching every set field of a normalized filter,
    /// annotated with the server they are listed on.
    async fn search_by_key_or_name(&self, filter: &PlayerFilter) -> Result<Vec<PlayerView>>;

    /// Timestamp written by the last [`PlayerStore::record_sync`].
    async fn last_sync_timestamp(&self) -> Result<Option<DateTime<Utc>>>;
}

/// Whether applying `update` to `current` would change anything.
pub(crate) fn differs(current: &PlayerRecord, update: &PlayerUpdate) -> bool {
    current.display_name != update.display_name
        || current.crew_tag != update.crew_tag
        || current.last_seen_at != update.last_seen_at
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate() {
        let mut counts = UpsertCounts::default();
        counts += UpsertCounts::inserted();
        counts += UpsertCounts::updated();
        counts += UpsertCounts::unchanged();
        counts += UpsertCounts::inserted();
        assert_eq!(counts.inserted, 2);
        assert_eq!(counts.written(), 4);
    }
}
