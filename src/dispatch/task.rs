//! The work one dispatched send performs.
//!
//! # Flow
//! ```text
//! identifier → audit "before" → before-hook
//!     → send (through the gate)
//!         closed session, first time → reconnect → send again
//!         closed session, second time → terminal
//!         reconnect failed → terminal, nothing sent
//!         anything else → terminal
//!     → audit "after" → after-hook
//! ```
//!
//! A panicking hook is logged and skipped; the rest of the flow still runs.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use futures_util::FutureExt;

use crate::config::IdentifierFn;
use crate::dispatch::request::SendRequest;
use crate::error::DispatchError;
use crate::net::connection::{ConnectionManager, Session};
use crate::observability::audit::{AuditAction, AuditRecord, AuditSink};
use crate::observability::logging::SharedLogger;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::GuardedCall;
use crate::resilience::gate::CircuitGate;

/// Everything a task needs, shared by all tasks of one engine.
pub struct TaskContext {
    pub connections: Arc<ConnectionManager>,
    pub gate: Arc<CircuitGate>,
    pub audit: Option<Arc<AuditSink>>,
    pub logger: SharedLogger,
    pub identifier: IdentifierFn,
}

impl TaskContext {
    /// Run one send to completion. Never fails; the outcome goes to the
    /// after-hook and the audit log.
    pub async fn run(self: Arc<Self>, request: SendRequest) {
        let identifier = (self.identifier)();
        let started_at = SystemTime::now();
        let clock = Instant::now();
        let context = request.context(&identifier, started_at);
        let kind = request.destination.kind().as_str();

        self.audit(AuditAction::Before, &identifier, &request, None);
        if let Some(hook) = &request.options.before {
            guard_hook(&identifier, "before", || hook(&context));
        }

        let result = self.deliver(&identifier, &request).await;

        match &result {
            Ok(()) => {
                self.logger.debug(format_args!(
                    "[broker-dispatch][{}] Sent :: {}",
                    identifier,
                    request.destination.path()
                ));
                tracing::debug!(
                    identifier = %identifier,
                    destination = %request.destination.path(),
                    elapsed_ms = clock.elapsed().as_millis() as u64,
                    "Send completed"
                );
            }
            Err(e) => {
                self.logger.error(format_args!(
                    "[broker-dispatch][{}] Send failed :: {} :: {}",
                    identifier,
                    request.destination.path(),
                    e
                ));
                tracing::warn!(
                    identifier = %identifier,
                    destination = %request.destination.path(),
                    kind = e.kind(),
                    error = %e,
                    "Send failed"
                );
            }
        }
        metrics::record_send(
            kind,
            result.as_ref().err().map_or("ok", DispatchError::kind),
            clock.elapsed(),
        );

        let outcome = match &result {
            Ok(()) => "ok".to_string(),
            Err(e) => e.to_string(),
        };
        self.audit(AuditAction::After, &identifier, &request, Some(&outcome));
        if let Some(hook) = &request.options.after {
            guard_hook(&identifier, "after", || hook(&context, result.as_ref().err()));
        }
    }

    /// Send, reconnecting at most once when the session turns out closed.
    async fn deliver(&self, identifier: &str, request: &SendRequest) -> Result<(), DispatchError> {
        let mut session = self.connections.connect(identifier).await?;
        let mut reconnected = false;

        loop {
            match self.attempt(&session, request).await {
                Err(e) if e.is_closed() && !reconnected => {
                    self.logger.debug(format_args!(
                        "[broker-dispatch][{}] Connection closed :: {} - reconnecting",
                        identifier, e
                    ));
                    tracing::info!(
                        identifier,
                        generation = session.generation(),
                        error = %e,
                        "Session closed during send, reconnecting"
                    );
                    reconnected = true;
                    session = self
                        .connections
                        .reconnect(identifier, Some(session.generation()))
                        .await?;
                }
                result => return result,
            }
        }
    }

    async fn attempt(&self, session: &Session, request: &SendRequest) -> Result<(), DispatchError> {
        let connection = session.connection().clone();
        let path = request.destination.path();
        let call: GuardedCall<'_> = async move {
            connection
                .send(
                    &path,
                    request.options.effective_content_type(),
                    &request.body,
                    &request.options.frame_options,
                )
                .await
        }
        .boxed();

        self.gate
            .execute(request.options.circuit.as_deref(), call)
            .await
    }

    fn audit(&self, action: AuditAction, identifier: &str, request: &SendRequest, outcome: Option<&str>) {
        let Some(sink) = &self.audit else {
            return;
        };
        sink.write(&AuditRecord {
            action,
            identifier,
            destination_type: request.destination.kind().as_str(),
            destination_name: request.destination.name(),
            body: &request.body,
            outcome,
            fields: &request.options.log_fields,
        });
    }
}

/// Run a caller hook, containing a panic so the send still completes.
fn guard_hook(identifier: &str, hook: &'static str, call: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(call)).is_err() {
        tracing::error!(identifier, hook, "Send hook panicked");
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("gate", &self.gate)
            .field("audit", &self.audit.as_ref().map(|sink| sink.path().to_path_buf()))
            .finish_non_exhaustive()
    }
}
