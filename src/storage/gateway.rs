// src/storage/gateway.rs

//! Size-adaptive upsert entry point.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::models::PlayerRecord;
use crate::storage::{PlayerStore, StrategyPolicy, UpsertCounts, WriteStrategy};

/// Result of one [`AdaptiveStorageGateway::upsert_batch`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    /// Strategy that produced the result
    pub strategy: WriteStrategy,
    /// Primary strategy that failed, when the fallback wrote the batch
    pub fallback_from: Option<WriteStrategy>,
    pub counts: UpsertCounts,
    /// Records lost to skipped chunks
    pub failed_records: usize,
    pub duration_ms: u64,
}

impl UpsertSummary {
    pub fn fallback_used(&self) -> bool {
        self.fallback_from.is_some()
    }
}

/// Routes batches to a write strategy by size, with one fallback.
pub struct AdaptiveStorageGateway {
    store: Arc<dyn PlayerStore>,
    policy: StrategyPolicy,
}

impl AdaptiveStorageGateway {
    pub fn new(store: Arc<dyn PlayerStore>, policy: StrategyPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<dyn PlayerStore> {
        &self.store
    }

    /// Upsert a batch keyed by `external_id`.
    ///
    /// When the selected strategy fails, the batch is retried once as a
    /// single transaction. A failing single transaction is not retried.
    pub async fn upsert_batch(&self, records: &[PlayerRecord]) -> Result<UpsertSummary> {
        if records.is_empty() {
            return Err(AppError::EmptyBatch);
        }
        if let Some(index) = records.iter().position(|r| r.external_id.is_empty()) {
            return Err(AppError::MissingKey { index });
        }

        let started = Instant::now();
        let primary = self.policy.select(records.len());
        log::info!(
            "[STORE] Writing {} records with {} strategy",
            records.len(),
            primary
        );

        let (strategy, fallback_from, report) =
            match primary.apply(self.store.as_ref(), records, &self.policy).await {
                Ok(report) => (primary, None, report),
                Err(e) if primary == WriteStrategy::SingleTransaction => return Err(e),
                Err(e) => {
                    log::warn!(
                        "[STORE] {} failed ({}), falling back to {}",
                        primary,
                        e,
                        WriteStrategy::SingleTransaction
                    );
                    let report = WriteStrategy::SingleTransaction
                        .apply(self.store.as_ref(), records, &self.policy)
                        .await
                        .map_err(|fallback| {
                            AppError::store_write(
                                primary,
                                format!("{e}; fallback failed: {fallback}"),
                            )
                        })?;
                    (WriteStrategy::SingleTransaction, Some(primary), report)
                }
            };

        let summary = UpsertSummary {
            strategy,
            fallback_from,
            counts: report.counts,
            failed_records: report.failed_records,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        log::info!(
            "[STORE] {} done in {}ms (inserted: {} | updated: {} | unchanged: {} | failed: {})",
            summary.strategy,
            summary.duration_ms,
            summary.counts.inserted,
            summary.counts.updated,
            summary.counts.unchanged,
            summary.failed_records
        );
        Ok(summary)
    }
}
