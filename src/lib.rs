//! Asynchronous dispatch layer for STOMP message brokers.
//!
//! Callers hand messages to an [`Enqueuer`] and return immediately. A bounded
//! pool of Tokio tasks delivers them over one shared broker session,
//! reconnecting once when the session turns out closed, optionally behind a
//! named circuit breaker. Outcomes are reported through per-send hooks and an
//! optional JSON-lines audit log.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod stomp;

pub use config::{CircuitSettings, Config};
pub use dispatch::{DestinationKind, SendContext, SendOptions};
pub use engine::Enqueuer;
pub use error::{DispatchError, EngineError, ValidationError};
pub use net::{ConnectError, ConnectOptions, Connection, Connector, FrameOption, TransportError};
pub use observability::{Logger, TracingLogger};
pub use resilience::{BackoffPolicy, BreakerEngine, BreakerError, RollingBreaker};
