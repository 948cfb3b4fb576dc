//! Transport collaborator contracts.
//!
//! # Responsibilities
//! - Define how a broker session is dialed (`Connector`)
//! - Define what a live session can do (`Connection`)
//! - Provide an error type in which "connection closed" is distinguishable
//!
//! Implementations must tolerate concurrent `send` calls on one connection,
//! since every worker shares the same session.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a transport session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The session was closed locally before this call.
    #[error("connection already closed")]
    AlreadyClosed,

    /// The peer went away or reported a fatal error.
    #[error("connection closed unexpectedly: {0}")]
    ClosedUnexpectedly(String),

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer spoke something we could not understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The broker refused the request.
    #[error("broker error: {0}")]
    Broker(String),

    /// The configured network kind cannot be dialed.
    #[error("unsupported network `{0}`")]
    UnsupportedNetwork(String),
}

impl TransportError {
    /// True when the session is unusable and a reconnect may help.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::AlreadyClosed | Self::ClosedUnexpectedly(_))
    }
}

/// Options applied to an individual frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOption {
    /// Add a custom header entry.
    Header(String, String),
    /// Do not emit a `content-length` header.
    NoContentLength,
}

impl FrameOption {
    /// Shorthand for [`FrameOption::Header`].
    pub fn header(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Header(key.into(), value.into())
    }
}

/// Options used when dialing the broker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Login for the CONNECT frame.
    pub login: Option<String>,

    /// Passcode for the CONNECT frame.
    pub passcode: Option<String>,

    /// Virtual host; defaults to the host part of the address.
    pub host: Option<String>,

    /// Heart-beat `(send_ms, receive_ms)` negotiated with the broker.
    pub heart_beat: (u32, u32),

    /// Extra CONNECT headers.
    pub headers: BTreeMap<String, String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            login: None,
            passcode: None,
            host: None,
            heart_beat: (0, 0),
            headers: BTreeMap::new(),
        }
    }
}

/// A live broker session.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send `body` to `destination` (e.g. `/queue/orders`).
    async fn send(
        &self,
        destination: &str,
        content_type: &str,
        body: &[u8],
        options: &[FrameOption],
    ) -> Result<(), TransportError>;

    /// Close the session. Later sends fail with [`TransportError::AlreadyClosed`].
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Dials broker sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new session to `addr` over `network`.
    async fn dial(
        &self,
        network: &str,
        addr: &str,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn Connection>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_classification() {
        assert!(TransportError::AlreadyClosed.is_closed());
        assert!(TransportError::ClosedUnexpectedly("eof".into()).is_closed());
        assert!(!TransportError::Protocol("bad frame".into()).is_closed());
        assert!(!TransportError::Broker("denied".into()).is_closed());
    }

    #[test]
    fn test_error_display() {
        let err = TransportError::UnsupportedNetwork("udp".into());
        assert_eq!(err.to_string(), "unsupported network `udp`");
    }
}
