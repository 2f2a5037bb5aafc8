// src/pipeline/scheduler.rs

//! Fixed-period cycle scheduler.
//!
//! `start` fires a cycle immediately and then once per period. Each firing
//! runs on its own task, so a slow cycle never delays the ticker; overlapping
//! firings are skipped by [`SyncPipeline::process`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::pipeline::state::{CycleOutcome, CycleResult, CycleState};
use crate::pipeline::sync::SyncPipeline;

/// Snapshot for health probes.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub in_progress: bool,
    pub outstanding_locks: Vec<String>,
    pub completed_cycles: u64,
    pub failed_cycles: u64,
    pub skipped_cycles: u64,
    pub last_cycle: Option<CycleResult>,
}

pub struct CycleScheduler {
    pipeline: Arc<SyncPipeline>,
    state: Arc<CycleState>,
    period: Duration,
    ticker: Mutex<Option<CancellationToken>>,
}

impl CycleScheduler {
    pub fn new(pipeline: Arc<SyncPipeline>, period: Duration) -> Self {
        Self {
            pipeline,
            state: Arc::new(CycleState::new()),
            period: period.max(Duration::from_millis(1)),
            ticker: Mutex::new(None),
        }
    }

    /// Start firing cycles. No-op while already started.
    ///
    /// Firing also stops once the guard begins shutdown.
    pub fn start(&self) {
        let mut ticker = self.ticker.lock();
        if ticker.as_ref().is_some_and(|t| !t.is_cancelled()) {
            return;
        }

        let token = self.pipeline.guard().shutdown_token().child_token();
        *ticker = Some(token.clone());

        let pipeline = Arc::clone(&self.pipeline);
        let state = Arc::clone(&self.state);
        let period = self.period;
        log::info!("[SCHEDULER] Started, period {}s", period.as_secs_f64());

        tokio::spawn(async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticks.tick() => {
                        let pipeline = Arc::clone(&pipeline);
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            pipeline.process(&state).await;
                        });
                    }
                }
            }
            log::info!("[SCHEDULER] Stopped");
        });
    }

    /// Cancel future firings. A cycle already running is left to finish.
    pub fn stop(&self) {
        if let Some(token) = self.ticker.lock().take() {
            token.cancel();
        }
    }

    /// Run one cycle on the caller's task, sharing the scheduler's state.
    pub async fn run_once(&self) -> CycleOutcome {
        self.pipeline.process(&self.state).await
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self
                .ticker
                .lock()
                .as_ref()
                .is_some_and(|t| !t.is_cancelled()),
            in_progress: self.state.in_progress(),
            outstanding_locks: self.pipeline.guard().list_outstanding(),
            completed_cycles: self.state.completed_cycles(),
            failed_cycles: self.state.failed_cycles(),
            skipped_cycles: self.state.skipped_cycles(),
            last_cycle: self.state.last_result(),
        }
    }
}
