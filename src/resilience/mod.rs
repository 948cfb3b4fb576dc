//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Send with a circuit name:
//!     → gate.rs (is the name registered on this engine?)
//!     → circuit_breaker.rs (fail fast when open, time out slow sends)
//!     → transport send
//!
//! Dial failure:
//!     → backoff.rs (delay before the next attempt)
//! ```
//!
//! # Design Decisions
//! - Breakers are opt-in per send; unnamed sends never touch them
//! - The breaker is a trait so engines can share or replace it
//! - Backoff is pure, the caller does the sleeping

pub mod backoff;
pub mod circuit_breaker;
pub mod gate;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{BreakerEngine, BreakerError, CircuitState, GuardedCall, RollingBreaker};
pub use gate::CircuitGate;
