//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch tasks produce:
//!     → logging.rs (Logger capability + tracing events)
//!     → audit.rs (before/after JSON lines, when a sink path is configured)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout via tracing-subscriber)
//!     → Audit file
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Correlation identifier flows through hooks, logs and audit records
//! - Audit write failures are logged, never surfaced to the send

pub mod audit;
pub mod logging;
pub mod metrics;

pub use audit::{AuditAction, AuditRecord, AuditSink};
pub use logging::{init_logging, Logger, NoopLogger, SharedLogger, TracingLogger};
