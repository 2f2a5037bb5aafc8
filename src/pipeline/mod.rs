//! Sync pipeline: execution guard, cycle orchestration and scheduling.
//!
//! - `ExecutionGuard`: outstanding-work registry that gates shutdown
//! - `SyncPipeline`: one fetch → transform → write cycle
//! - `CycleScheduler`: fires cycles on a fixed period, skipping overlaps

pub mod guard;
pub mod scheduler;
pub mod state;
pub mod sync;

pub use guard::{ExecutionGuard, LockHandle};
pub use scheduler::{CycleScheduler, SchedulerStatus};
pub use state::{CycleClaim, CycleOutcome, CycleResult, CycleState, SkipReason};
pub use sync::{FetchPlan, SYNC_LOCK, SyncPipeline, dedupe_latest};
