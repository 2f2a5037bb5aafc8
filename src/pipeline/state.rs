// src/pipeline/state.rs

//! Per-scheduler cycle state: the in-progress flag, counters and last result.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::models::FetchSummary;
use crate::storage::{UpsertSummary, WriteStrategy};

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleResult {
    pub valid_count: usize,
    pub reject_count: usize,
    /// Valid records dropped because a later entry had the same key
    pub duplicate_count: usize,
    pub duration_ms: u64,
    pub fetch: FetchSummary,
    /// Present when a write was attempted and succeeded
    pub write: Option<UpsertSummary>,
    /// Present when the write failed even after fallback
    pub error: Option<String>,
}

impl CycleResult {
    pub fn strategy_used(&self) -> Option<WriteStrategy> {
        self.write.as_ref().map(|w| w.strategy)
    }

    pub fn written(&self) -> usize {
        self.write.as_ref().map_or(0, |w| w.counts.written())
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Why a cycle did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    InProgress,
    ShuttingDown,
}

/// What a call to `SyncPipeline::process` did.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(CycleResult),
    Skipped(SkipReason),
}

/// Cycle bookkeeping owned by the scheduler and lent to the pipeline.
#[derive(Debug, Default)]
pub struct CycleState {
    in_progress: AtomicBool,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    last: Mutex<Option<CycleResult>>,
}

/// Held while a cycle runs; clears the in-progress flag on drop.
#[derive(Debug)]
pub struct CycleClaim<'a> {
    state: &'a CycleState,
}

impl Drop for CycleClaim<'_> {
    fn drop(&mut self) {
        self.state.in_progress.store(false, Ordering::SeqCst);
    }
}

impl CycleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the in-progress flag, or `None` if a cycle is already running.
    pub fn try_begin(&self) -> Option<CycleClaim<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| CycleClaim { state: self })
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result(&self, result: &CycleResult) {
        if result.failed() {
            self.failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
        *self.last.lock() = Some(result.clone());
    }

    pub fn completed_cycles(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed_cycles(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn skipped_cycles(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn last_result(&self) -> Option<CycleResult> {
        self.last.lock().clone()
    }
}
