// src/storage/strategy.rs

//! Batch write strategies and the size policy that selects them.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, timeout};

use crate::error::{AppError, Result};
use crate::models::{PlayerRecord, StorageConfig};
use crate::storage::{PlayerStore, UpsertCounts};

/// How a batch is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteStrategy {
    /// One all-or-nothing transaction
    SingleTransaction,
    /// Fixed-size transactions, failed chunks skipped
    Chunked,
    /// Existing-key lookup, bulk create, per-row update
    SplitCreateUpdate,
    /// One set-based statement
    NativeBulk,
}

impl WriteStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SingleTransaction => "single-transaction",
            Self::Chunked => "chunked",
            Self::SplitCreateUpdate => "split-create-update",
            Self::NativeBulk => "native-bulk",
        }
    }

    /// Write `batch` with this strategy.
    pub(crate) async fn apply(
        self,
        store: &dyn PlayerStore,
        batch: &[PlayerRecord],
        policy: &StrategyPolicy,
    ) -> Result<StrategyReport> {
        match self {
            Self::SingleTransaction => {
                let counts = if let [record] = batch {
                    bounded("upsert_one", policy.transaction_timeout, store.upsert_one(record))
                        .await?
                } else {
                    bounded(
                        "upsert_many",
                        policy.transaction_timeout,
                        store.upsert_many(batch),
                    )
                    .await?
                };
                Ok(StrategyReport::complete(counts))
            }
            Self::Chunked => write_chunked(store, batch, policy).await,
            Self::SplitCreateUpdate => write_split(store, batch, policy).await,
            Self::NativeBulk => {
                let counts = bounded(
                    "bulk_native_upsert",
                    policy.transaction_timeout,
                    store.bulk_native_upsert(batch),
                )
                .await?;
                Ok(StrategyReport::complete(counts))
            }
        }
    }
}

impl fmt::Display for WriteStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a strategy managed to write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StrategyReport {
    pub counts: UpsertCounts,
    /// Records in skipped chunks
    pub failed_records: usize,
}

impl StrategyReport {
    fn complete(counts: UpsertCounts) -> Self {
        Self {
            counts,
            failed_records: 0,
        }
    }
}

/// Size thresholds and limits for batch writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyPolicy {
    /// Batches up to this size use a single transaction
    pub single_max: usize,
    /// Batches up to this size are chunked
    pub chunked_max: usize,
    /// Batches up to this size use split create/update; larger go native
    pub split_max: usize,
    pub chunk_size: usize,
    pub chunk_pause: Duration,
    pub chunk_timeout: Duration,
    pub transaction_timeout: Duration,
}

impl Default for StrategyPolicy {
    fn default() -> Self {
        Self::from(&StorageConfig::default())
    }
}

impl From<&StorageConfig> for StrategyPolicy {
    fn from(config: &StorageConfig) -> Self {
        Self {
            single_max: config.single_max,
            chunked_max: config.chunked_max,
            split_max: config.split_max,
            chunk_size: config.chunk_size.max(1),
            chunk_pause: Duration::from_millis(config.chunk_pause_ms),
            chunk_timeout: Duration::from_secs(config.chunk_timeout_secs),
            transaction_timeout: Duration::from_secs(config.transaction_timeout_secs),
        }
    }
}

impl StrategyPolicy {
    /// Strategy for a batch of `size` records.
    pub fn select(&self, size: usize) -> WriteStrategy {
        if size <= self.single_max {
            WriteStrategy::SingleTransaction
        } else if size <= self.chunked_max {
            WriteStrategy::Chunked
        } else if size <= self.split_max {
            WriteStrategy::SplitCreateUpdate
        } else {
            WriteStrategy::NativeBulk
        }
    }
}

/// Run a store operation under a deadline.
async fn bounded<T>(
    operation: &str,
    limit: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    timeout(limit, future)
        .await
        .map_err(|_| AppError::timeout(operation, limit))?
}

async fn write_chunked(
    store: &dyn PlayerStore,
    batch: &[PlayerRecord],
    policy: &StrategyPolicy,
) -> Result<StrategyReport> {
    let chunks: Vec<_> = batch.chunks(policy.chunk_size).collect();
    let total = chunks.len();
    let mut report = StrategyReport::default();
    let mut succeeded = 0;

    for (i, chunk) in chunks.into_iter().enumerate() {
        match bounded("upsert_many", policy.chunk_timeout, store.upsert_many(chunk)).await {
            Ok(counts) => {
                report.counts += counts;
                succeeded += 1;
                log::debug!("[STORE] chunk {}/{} wrote {} records", i + 1, total, chunk.len());
            }
            Err(e) => {
                report.failed_records += chunk.len();
                log::warn!("[STORE] chunk {}/{} failed: {}", i + 1, total, e);
            }
        }

        if i + 1 < total && !policy.chunk_pause.is_zero() {
            sleep(policy.chunk_pause).await;
        }
    }

    if succeeded == 0 {
        return Err(AppError::store_write(
            WriteStrategy::Chunked,
            format!("all {total} chunks failed"),
        ));
    }
    Ok(report)
}

async fn write_split(
    store: &dyn PlayerStore,
    batch: &[PlayerRecord],
    policy: &StrategyPolicy,
) -> Result<StrategyReport> {
    let keys: Vec<String> = batch.iter().map(|r| r.external_id.clone()).collect();
    let existing: HashSet<String> = bounded(
        "find_existing_keys",
        policy.transaction_timeout,
        store.find_existing_keys(&keys),
    )
    .await?;

    let (to_update, to_create): (Vec<&PlayerRecord>, Vec<&PlayerRecord>) = batch
        .iter()
        .partition(|r| existing.contains(&r.external_id));

    let mut counts = UpsertCounts::default();

    if !to_create.is_empty() {
        let to_create: Vec<PlayerRecord> = to_create.into_iter().cloned().collect();
        let created = bounded(
            "create_many",
            policy.transaction_timeout,
            store.create_many(&to_create),
        )
        .await?;
        counts.inserted += created;
        // Rows created concurrently since the key lookup were skipped.
        counts.unchanged += to_create.len().saturating_sub(created);
    }

    for record in to_update {
        let changed = bounded(
            "update_one",
            policy.chunk_timeout,
            store.update_one(&record.external_id, &record.update_fields()),
        )
        .await?;
        if changed {
            counts.updated += 1;
        } else {
            counts.unchanged += 1;
        }
    }

    Ok(StrategyReport::complete(counts))
}
