// src/pipeline/sync.rs

//! One sync cycle: fetch, transform, dedupe, write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::error::Result;
use crate::models::{Config, FetcherConfig, PlayerRecord, SourceDescriptor};
use crate::pipeline::guard::ExecutionGuard;
use crate::pipeline::state::{CycleOutcome, CycleResult, CycleState, SkipReason};
use crate::services::{FetchOptions, RetryingFetcher, transform_batch};
use crate::storage::{AdaptiveStorageGateway, PlayerStore, StrategyPolicy};
use crate::utils;

/// Lock name held for the duration of a cycle.
pub const SYNC_LOCK: &str = "sync_players";

/// How sources are fetched each cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    pub delay: Duration,
    pub max_retries: u32,
    pub retry: bool,
}

impl From<&FetcherConfig> for FetchPlan {
    fn from(config: &FetcherConfig) -> Self {
        Self {
            delay: Duration::from_millis(config.delay_ms),
            max_retries: config.max_retries,
            retry: config.retry,
        }
    }
}

/// Orchestrates sync cycles against one store.
pub struct SyncPipeline {
    fetcher: RetryingFetcher,
    sources: Vec<SourceDescriptor>,
    gateway: AdaptiveStorageGateway,
    guard: ExecutionGuard,
    plan: FetchPlan,
}

impl SyncPipeline {
    pub fn new(
        fetcher: RetryingFetcher,
        sources: Vec<SourceDescriptor>,
        gateway: AdaptiveStorageGateway,
        guard: ExecutionGuard,
        plan: FetchPlan,
    ) -> Self {
        Self {
            fetcher,
            sources,
            gateway,
            guard,
            plan,
        }
    }

    /// Wire an HTTP fetcher and a gateway over `store` from configuration.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn PlayerStore>,
        guard: ExecutionGuard,
    ) -> Result<Self> {
        Ok(Self::new(
            RetryingFetcher::from_config(&config.fetcher)?,
            config.source_descriptors()?,
            AdaptiveStorageGateway::new(store, StrategyPolicy::from(&config.storage)),
            guard,
            FetchPlan::from(&config.fetcher),
        ))
    }

    pub fn guard(&self) -> &ExecutionGuard {
        &self.guard
    }

    /// Run one cycle unless one is already running or shutdown has begun.
    ///
    /// Skips are counted on `state` but never as failures. The lock is taken
    /// before the shutdown check so a concurrent drain either sees it or the
    /// cycle sees the shutdown.
    pub async fn process(&self, state: &CycleState) -> CycleOutcome {
        let Some(claim) = state.try_begin() else {
            log::info!("[SKIP] Previous cycle still in progress");
            state.record_skip();
            return CycleOutcome::Skipped(SkipReason::InProgress);
        };

        let lock = self.guard.acquire(SYNC_LOCK);
        if self.guard.is_shutting_down() {
            self.guard.release(lock);
            drop(claim);
            log::info!("[SKIP] Shutdown in progress, not starting a cycle");
            state.record_skip();
            return CycleOutcome::Skipped(SkipReason::ShuttingDown);
        }

        let result = self.run_cycle().await;
        state.record_result(&result);
        drop(claim);
        self.guard.release(lock);

        CycleOutcome::Completed(result)
    }

    async fn run_cycle(&self) -> CycleResult {
        let started = Instant::now();
        utils::log::header(&format!(
            "Player sync ({} sources)",
            self.sources.len()
        ));

        let fetch = if self.plan.retry {
            self.fetcher
                .fetch_all_with_retry(&self.sources, self.plan.delay, self.plan.max_retries)
                .await
        } else {
            self.fetcher
                .fetch_all(&self.sources, self.plan.delay, &FetchOptions::default())
                .await
        };

        let entries = fetch.entries();
        let outcome = transform_batch(&entries, Utc::now());
        for reject in &outcome.rejects {
            match &reject.detail {
                Some(detail) => log::warn!(
                    "[REJECT] #{} from {} ({}): {} - {}",
                    reject.index,
                    reject.source_tag,
                    reject.raw_label,
                    reject.reason,
                    detail
                ),
                None => log::warn!(
                    "[REJECT] #{} from {} ({}): {}",
                    reject.index,
                    reject.source_tag,
                    reject.raw_label,
                    reject.reason
                ),
            }
        }

        let valid_count = outcome.records.len();
        let (records, duplicate_count) = dedupe_latest(outcome.records);

        let mut result = CycleResult {
            valid_count,
            reject_count: outcome.rejects.len(),
            duplicate_count,
            fetch: fetch.summary.clone(),
            ..CycleResult::default()
        };

        if records.is_empty() {
            log::warn!("[SYNC] No valid players to write");
        } else {
            match self.gateway.upsert_batch(&records).await {
                Ok(summary) => {
                    result.write = Some(summary);
                    if let Err(e) = self.gateway.store().record_sync(Utc::now()).await {
                        log::warn!("[SYNC] Failed to record sync time: {}", e);
                    }
                }
                Err(e) => {
                    log::error!("[SYNC] Write failed: {}", e);
                    result.error = Some(e.to_string());
                }
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        log_result(&result);
        result
    }
}

/// Keep one record per key: the latest `last_seen_at`, later entry on ties.
///
/// Output keeps first-seen key order. Returns the number of records dropped.
pub fn dedupe_latest(records: Vec<PlayerRecord>) -> (Vec<PlayerRecord>, usize) {
    let total = records.len();
    let mut position: HashMap<String, usize> = HashMap::with_capacity(total);
    let mut unique: Vec<PlayerRecord> = Vec::with_capacity(total);

    for record in records {
        match position.get(&record.external_id) {
            Some(&i) => {
                if record.last_seen_at >= unique[i].last_seen_at {
                    unique[i] = record;
                }
            }
            None => {
                position.insert(record.external_id.clone(), unique.len());
                unique.push(record);
            }
        }
    }

    let dropped = total - unique.len();
    (unique, dropped)
}

fn log_result(result: &CycleResult) {
    let write = match (&result.write, &result.error) {
        (Some(w), _) => format!(
            "{}{} (inserted {} / updated {} / unchanged {} / failed {})",
            w.strategy,
            w.fallback_from
                .map(|f| format!(" after {f} failed"))
                .unwrap_or_default(),
            w.counts.inserted,
            w.counts.updated,
            w.counts.unchanged,
            w.failed_records
        ),
        (None, Some(e)) => format!("FAILED: {e}"),
        (None, None) => "skipped".to_string(),
    };

    utils::log::summary(
        "[COMPLETED] Player sync",
        &[
            (
                "Sources",
                format!("{}/{} ok", result.fetch.successful, result.fetch.total),
            ),
            ("Entries", result.fetch.total_items.to_string()),
            ("Valid", result.valid_count.to_string()),
            ("Rejected", result.reject_count.to_string()),
            ("Duplicates", result.duplicate_count.to_string()),
            ("Write", write),
            ("Duration", format!("{}ms", result.duration_ms)),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};

    fn record(id: &str, name: &str, seen: Option<DateTime<Utc>>) -> PlayerRecord {
        PlayerRecord {
            external_id: id.into(),
            display_name: name.into(),
            crew_tag: None,
            source_tag: "US1".into(),
            last_seen_at: seen,
        }
    }

    #[test]
    fn dedupe_prefers_latest_then_later_entry() {
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();

        let (records, dropped) = dedupe_latest(vec![
            record("1", "new", Some(late)),
            record("2", "first", Some(early)),
            record("1", "old", Some(early)),
            record("2", "second", Some(early)),
        ]);

        assert_eq!(dropped, 2);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].display_name, "new");
        assert_eq!(records[1].display_name, "second");
    }

    #[test]
    fn fetch_plan_from_config() {
        let plan = FetchPlan::from(&FetcherConfig::default());
        assert_eq!(plan.delay, Duration::from_millis(1000));
        assert_eq!(plan.max_retries, 2);
        assert!(plan.retry);
    }
}
