//! Dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! send_queue / send_topic (caller thread)
//!     → request.rs: validate destination and body
//!     → pool.rs: submit, returns immediately
//!     → task.rs: hooks, audit, gated send, single reconnect-retry
//! ```
//!
//! # Design Decisions
//! - Fire-and-forget: outcomes only reach hooks and the audit log
//! - No ordering across sends, no dispatch-level deadline

pub mod pool;
pub mod request;
pub mod task;

use std::sync::Arc;

use tokio::runtime::Handle;

pub use pool::WorkerPool;
pub use request::{
    AfterHook, BeforeHook, Destination, DestinationKind, SendContext, SendOptions, SendRequest,
};
pub use task::TaskContext;

/// Pool plus the shared task context.
#[derive(Debug)]
pub struct Dispatcher {
    context: Arc<TaskContext>,
    pool: WorkerPool,
}

impl Dispatcher {
    pub fn new(context: TaskContext, max_workers: usize, runtime: Handle) -> Self {
        Self {
            context: Arc::new(context),
            pool: WorkerPool::new(max_workers, runtime),
        }
    }

    /// Queue a validated request.
    pub fn submit(&self, request: SendRequest) {
        let context = self.context.clone();
        self.pool.submit(context.run(request));
    }

    pub fn pending_count(&self) -> usize {
        self.pool.pending_count()
    }

    pub async fn wait_idle(&self) {
        self.pool.wait_idle().await
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}
