//! Bundled STOMP transport.
//!
//! # Data Flow
//! ```text
//! StompConnector::dial
//!     → TCP connect
//!     → CONNECT / CONNECTED handshake (frame.rs)
//!     → StompConnection (shared by all workers)
//!         → send(): SEND frame through the writer lock
//!         → read loop: ERROR / EOF mark the session closed
//! ```
//!
//! # Design Decisions
//! - Only what a producer needs: CONNECT, SEND, DISCONNECT
//! - A remotely closed session reports `ClosedUnexpectedly`, a locally
//!   closed one `AlreadyClosed`, so the dispatcher can tell when to reconnect

pub mod client;
pub mod frame;

pub use client::{StompConnection, StompConnector};
pub use frame::Frame;
