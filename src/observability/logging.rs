//! Structured logging.
//!
//! # Responsibilities
//! - Define the `Logger` capability handed to an engine through its config
//! - Provide the no-op default and a `tracing`-backed implementation
//! - Initialize a `tracing` subscriber for binaries and tests
//!
//! # Design Decisions
//! - Each engine carries its own logger; there is no process-wide logger
//! - Internal structured events always go through `tracing`; the `Logger`
//!   capability carries the human-readable progress lines

use std::fmt;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Debug/error sink supplied by the caller.
pub trait Logger: Send + Sync {
    fn debug(&self, args: fmt::Arguments<'_>);
    fn error(&self, args: fmt::Arguments<'_>);
}

/// Shared logger handle.
pub type SharedLogger = Arc<dyn Logger>;

/// Discards everything. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn debug(&self, _args: fmt::Arguments<'_>) {}
    fn error(&self, _args: fmt::Arguments<'_>) {}
}

/// Forwards to `tracing` under the `broker_dispatch` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(target: "broker_dispatch", "{}", args);
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!(target: "broker_dispatch", "{}", args);
    }
}

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"broker_dispatch=debug"`).
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_logging(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
