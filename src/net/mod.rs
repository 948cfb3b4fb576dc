//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Engine construction
//!     → connection.rs: connect() dials through a transport::Connector
//!     → Session installed (Connected)
//!
//! Send observes a closed session
//!     → connection.rs: reconnect(stale generation)
//!     → re-dial with backoff, or report ConnectError
//! ```
//!
//! # Design Decisions
//! - Exactly one session shared by every worker
//! - Sessions are replaced wholesale, never mutated in place
//! - The transport is a trait so tests and other brokers can plug in

pub mod connection;
pub mod transport;

pub use connection::{ConnectError, ConnectionManager, ConnectionState, Session};
pub use transport::{ConnectOptions, Connection, Connector, FrameOption, TransportError};
