//! Registry of in-flight runs, used to cancel everything on shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct TrackedRun {
    label: String,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    runs: Mutex<HashMap<u64, TrackedRun>>,
    next_id: AtomicU64,
    emptied: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, TrackedRun>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

/// Keeps a run registered for as long as it lives. Hold it inside the
/// worker task so the entry disappears when the worker exits.
#[derive(Debug)]
pub struct RunGuard {
    id: u64,
    inner: Arc<Inner>,
}

impl RunGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut runs = self.inner.lock();
        runs.remove(&self.id);
        if runs.is_empty() {
            self.inner.emptied.notify_waiters();
        }
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, label: impl Into<String>, cancel: CancellationToken) -> RunGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().insert(
            id,
            TrackedRun {
                label: label.into(),
                cancel,
                started_at: Utc::now(),
            },
        );
        RunGuard {
            id,
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// `(label, started_at)` of every tracked run.
    pub fn snapshot(&self) -> Vec<(String, DateTime<Utc>)> {
        self.inner
            .lock()
            .values()
            .map(|run| (run.label.clone(), run.started_at))
            .collect()
    }

    /// Cancel every tracked run and wait up to `grace` for them to exit.
    /// Returns how many were still running when the wait ended.
    pub async fn cancel_all(&self, grace: Duration) -> usize {
        let count = {
            let runs = self.inner.lock();
            for run in runs.values() {
                run.cancel.cancel();
            }
            runs.len()
        };
        if count == 0 {
            return 0;
        }
        log::info!("cancelling {} in-flight runs", count);

        let wait = async {
            loop {
                let emptied = self.inner.emptied.notified();
                tokio::pin!(emptied);
                emptied.as_mut().enable();
                if self.is_empty() {
                    return;
                }
                emptied.await;
            }
        };

        if tokio::time::timeout(grace, wait).await.is_err() {
            let remaining = self.inner.lock();
            for run in remaining.values() {
                log::warn!("run '{}' did not exit within the grace period", run.label);
            }
            return remaining.len();
        }
        0
    }
}
