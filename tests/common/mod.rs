//! Shared fixtures: a canned transport and a store with injectable failures.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use roster_sync::error::{AppError, FetchError, Result};
use roster_sync::models::{PlayerRecord, PlayerUpdate, SourceDescriptor};
use roster_sync::pipeline::{ExecutionGuard, FetchPlan, SyncPipeline};
use roster_sync::services::{RetryingFetcher, Transport};
use roster_sync::storage::{
    AdaptiveStorageGateway, MemoryStore, PlayerStore, StrategyPolicy, UpsertCounts,
};
use serde_json::Value;
use tokio::time::Instant;
use url::Url;

/// Serves a fixed payload per source tag (last path segment), optionally slowly.
#[derive(Default)]
pub struct CannedTransport {
    payloads: Mutex<HashMap<String, std::result::Result<Value, FetchError>>>,
    latency: Mutex<Duration>,
    pub requests: AtomicUsize,
    /// Every request panics instead of answering
    pub panics: AtomicBool,
}

impl CannedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, tag: &str, payload: Value) {
        self.payloads.lock().insert(tag.to_string(), Ok(payload));
    }

    pub fn fail(&self, tag: &str, error: FetchError) {
        self.payloads.lock().insert(tag.to_string(), Err(error));
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }
}

#[async_trait]
impl Transport for CannedTransport {
    async fn get_json(
        &self,
        url: &Url,
        _timeout: Duration,
    ) -> std::result::Result<(u16, Value), FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.panics.load(Ordering::SeqCst) {
            panic!("transport blew up on {url}");
        }
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let tag = url.path().rsplit('/').next().unwrap_or_default().to_string();
        self.payloads
            .lock()
            .get(&tag)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::Status { status: 404, reason: "Not Found".into() }))
            .map(|v| (200, v))
    }
}

pub fn sources(tags: &[&str]) -> Vec<SourceDescriptor> {
    tags.iter()
        .map(|t| SourceDescriptor::parse(t, &format!("https://players.test/{t}")).unwrap())
        .collect()
}

pub fn record(id: &str, name: &str) -> PlayerRecord {
    PlayerRecord {
        external_id: id.to_string(),
        display_name: name.to_string(),
        crew_tag: None,
        source_tag: "US1".to_string(),
        last_seen_at: None,
    }
}

pub fn records(n: usize) -> Vec<PlayerRecord> {
    (0..n).map(|i| record(&format!("p-{i:04}"), &format!("Player{i}"))).collect()
}

/// [`MemoryStore`] with switchable failures and a call log.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_upsert_one: AtomicBool,
    pub fail_upsert_many: AtomicBool,
    pub fail_bulk: AtomicBool,
    pub fail_find_existing: AtomicBool,
    /// `upsert_many` fails for any batch containing this key
    pub poison_key: Mutex<Option<String>>,
    /// `upsert_many` stalls this long for any batch containing the key
    pub slow_key: Mutex<Option<(String, Duration)>>,
    pub write_latency: Mutex<Duration>,
    /// Start instant of every `upsert_many` call
    pub write_times: Mutex<Vec<Instant>>,
    pub calls: Mutex<Vec<&'static str>>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn enter(&self, call: &'static str, flag: &AtomicBool) -> Result<()> {
        self.calls.lock().push(call);
        if flag.load(Ordering::SeqCst) {
            return Err(AppError::store_write(call, "injected failure"));
        }
        Ok(())
    }

    async fn pause(&self) {
        let latency = *self.write_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PlayerStore for FlakyStore {
    async fn upsert_one(&self, record: &PlayerRecord) -> Result<UpsertCounts> {
        self.enter("upsert_one", &self.fail_upsert_one)?;
        self.pause().await;
        self.inner.upsert_one(record).await
    }

    async fn upsert_many(&self, records: &[PlayerRecord]) -> Result<UpsertCounts> {
        self.enter("upsert_many", &self.fail_upsert_many)?;
        self.write_times.lock().push(Instant::now());
        let slow = self.slow_key.lock().clone();
        if let Some((key, stall)) = slow {
            if records.iter().any(|r| r.external_id == key) {
                tokio::time::sleep(stall).await;
            }
        }
        let poison = self.poison_key.lock().clone();
        if let Some(key) = poison {
            if records.iter().any(|r| r.external_id == key) {
                return Err(AppError::store_write("upsert_many", "poisoned chunk"));
            }
        }
        self.pause().await;
        self.inner.upsert_many(records).await
    }

    async fn bulk_native_upsert(&self, records: &[PlayerRecord]) -> Result<UpsertCounts> {
        self.enter("bulk_native_upsert", &self.fail_bulk)?;
        self.pause().await;
        self.inner.bulk_native_upsert(records).await
    }

    async fn find_existing_keys(&self, keys: &[String]) -> Result<HashSet<String>> {
        self.enter("find_existing_keys", &self.fail_find_existing)?;
        self.inner.find_existing_keys(keys).await
    }

    async fn create_many(&self, records: &[PlayerRecord]) -> Result<usize> {
        self.calls.lock().push("create_many");
        self.inner.create_many(records).await
    }

    async fn update_one(&self, key: &str, update: &PlayerUpdate) -> Result<bool> {
        self.calls.lock().push("update_one");
        self.inner.update_one(key, update).await
    }

    async fn record_sync(&self, at: DateTime<Utc>) -> Result<()> {
        self.calls.lock().push("record_sync");
        self.inner.record_sync(at).await
    }
}

/// Pipeline over `transport` and `store` with no inter-source delay.
pub fn pipeline(
    transport: Arc<CannedTransport>,
    tags: &[&str],
    store: Arc<dyn PlayerStore>,
    guard: ExecutionGuard,
) -> SyncPipeline {
    SyncPipeline::new(
        RetryingFetcher::new(transport, "test", Duration::from_millis(800)),
        sources(tags),
        AdaptiveStorageGateway::new(store, StrategyPolicy::default()),
        guard,
        FetchPlan {
            delay: Duration::ZERO,
            max_retries: 0,
            retry: false,
        },
    )
}
