// src/pipeline/guard.rs

//! Named execution locks with shutdown draining.
//!
//! Every in-flight operation holds a [`LockHandle`]. Once shutdown begins,
//! [`ExecutionGuard::await_drain`] resolves as soon as the last handle is
//! released. The guard never exits the process; the caller decides what
//! happens after the drain.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Proof of an acquired lock.
///
/// Released by [`ExecutionGuard::release`] or when dropped, so a cycle that
/// panics still lets the drain finish.
#[must_use = "an unreleased lock blocks shutdown"]
pub struct LockHandle {
    id: u64,
    name: String,
    inner: Arc<GuardInner>,
}

impl LockHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl PartialEq for LockHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for LockHandle {}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.inner.remove(self.id, &self.name);
    }
}

struct GuardInner {
    locks: Mutex<HashMap<u64, String>>,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
    drained: Notify,
    shutdown: CancellationToken,
    poll_interval: Duration,
}

impl GuardInner {
    fn remove(&self, id: u64, name: &str) {
        let remaining = {
            let mut locks = self.locks.lock();
            if locks.remove(&id).is_none() {
                return;
            }
            locks.len()
        };
        log::debug!("[LOCK] released {} (#{})", name, id);

        if remaining == 0 && self.shutting_down.load(Ordering::SeqCst) {
            log::info!("[DRAIN] All locks released");
            self.drained.notify_waiters();
        }
    }
}

/// Registry of outstanding operations. Cheap to clone.
#[derive(Clone)]
pub struct ExecutionGuard {
    inner: Arc<GuardInner>,
}

impl Default for ExecutionGuard {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

impl ExecutionGuard {
    /// `poll_interval` bounds how long a drain can miss a release notification.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(GuardInner {
                locks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                shutting_down: AtomicBool::new(false),
                drained: Notify::new(),
                shutdown: CancellationToken::new(),
                poll_interval: poll_interval.max(Duration::from_millis(1)),
            }),
        }
    }

    /// Register an operation. Names need not be unique.
    pub fn acquire(&self, name: &str) -> LockHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.locks.lock().insert(id, name.to_string());
        log::debug!("[LOCK] acquired {} (#{})", name, id);
        LockHandle {
            id,
            name: name.to_string(),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Release a lock. Releasing the last lock during shutdown wakes drainers.
    pub fn release(&self, handle: LockHandle) {
        drop(handle);
    }

    pub fn has_outstanding(&self) -> bool {
        !self.inner.locks.lock().is_empty()
    }

    /// Names of outstanding locks, oldest first.
    pub fn list_outstanding(&self) -> Vec<String> {
        let locks = self.inner.locks.lock();
        let mut entries: Vec<_> = locks.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        entries.into_iter().map(|(_, name)| name.clone()).collect()
    }

    /// Flag shutdown and cancel [`Self::shutdown_token`]. Idempotent.
    pub fn begin_shutdown(&self) {
        if !self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            let outstanding = self.list_outstanding();
            if outstanding.is_empty() {
                log::info!("[SHUTDOWN] No outstanding operations");
            } else {
                log::info!(
                    "[SHUTDOWN] Waiting for {} operation(s): {}",
                    outstanding.len(),
                    outstanding.join(", ")
                );
            }
            self.inner.shutdown.cancel();
            self.inner.drained.notify_waiters();
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Resolve once shutdown has begun and no locks remain.
    pub async fn await_drain(&self) {
        loop {
            let notified = self.inner.drained.notified();
            if self.is_shutting_down() && !self.has_outstanding() {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(self.inner.poll_interval) => {}
            }
        }
    }
}
