//! Bounded worker pool.
//!
//! Every submission becomes a Tokio task that waits for a semaphore permit
//! before doing any work, so at most `max_workers` sends run at once. The
//! pool tracks submissions until they finish; that count is what callers
//! drain on before disconnecting.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};

use crate::observability::metrics;

#[derive(Debug, Default)]
struct Counters {
    pending: AtomicUsize,
    running: AtomicUsize,
    idle: Notify,
}

/// Decrements `pending` when the task ends, however it ends.
struct PendingGuard {
    counters: Arc<Counters>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let left = self.counters.pending.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_pending(left);
        if left == 0 {
            self.counters.idle.notify_waiters();
        }
    }
}

struct RunningGuard {
    counters: Arc<Counters>,
}

impl RunningGuard {
    fn new(counters: Arc<Counters>) -> Self {
        counters.running.fetch_add(1, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.counters.running.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct WorkerPool {
    permits: Arc<Semaphore>,
    max_workers: usize,
    counters: Arc<Counters>,
    runtime: Handle,
}

impl WorkerPool {
    /// Create a pool that spawns onto `runtime`.
    pub fn new(max_workers: usize, runtime: Handle) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            counters: Arc::new(Counters::default()),
            runtime,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Queue `work`. Returns immediately; safe to call from outside the runtime.
    pub fn submit<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let pending = self.counters.pending.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_pending(pending);

        let guard = PendingGuard {
            counters: self.counters.clone(),
        };
        let permits = self.permits.clone();
        self.runtime.spawn(async move {
            let guard = guard;
            let Ok(_permit) = permits.acquire_owned().await else {
                tracing::error!("Worker pool closed, dropping task");
                return;
            };
            let _running = RunningGuard::new(guard.counters.clone());
            work.await;
        });
    }

    /// Submitted tasks that have not finished (waiting + running).
    pub fn pending_count(&self) -> usize {
        self.counters.pending.load(Ordering::SeqCst)
    }

    /// Tasks currently holding a worker slot.
    pub fn in_flight(&self) -> usize {
        self.counters.running.load(Ordering::SeqCst)
    }

    /// Resolve once nothing is pending.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.counters.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("max_workers", &self.max_workers)
            .field("pending", &self.pending_count())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
