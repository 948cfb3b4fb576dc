//! Error types surfaced by the engine and its dispatch tasks.

use std::path::PathBuf;

use thiserror::Error;

use crate::net::connection::ConnectError;
use crate::net::transport::TransportError;
use crate::resilience::circuit_breaker::BreakerError;

/// Rejected synchronously by `send_queue` / `send_topic`; nothing was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("empty body")]
    EmptyBody,

    #[error("empty queue name")]
    EmptyQueueName,

    #[error("empty topic name")]
    EmptyTopicName,
}

/// Why a dispatched send failed. Delivered to after-hooks and the audit log.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No session could be (re)established.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The transport rejected the send.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The circuit breaker denied or cut short the send.
    #[error("circuit `{circuit}`: {source}")]
    Circuit {
        circuit: String,
        #[source]
        source: BreakerError,
    },
}

impl DispatchError {
    /// The breaker denied the call without touching the transport.
    pub fn is_circuit_open(&self) -> bool {
        matches!(
            self,
            Self::Circuit {
                source: BreakerError::Open,
                ..
            }
        )
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect(_))
    }

    /// Session closed; a reconnect may help.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_closed())
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect_error",
            Self::Transport(e) if e.is_closed() => "closed",
            Self::Transport(_) => "transport_error",
            Self::Circuit { source, .. } => match source {
                BreakerError::Open => "circuit_open",
                BreakerError::Timeout(_) => "circuit_timeout",
                BreakerError::Saturated => "circuit_saturated",
                BreakerError::Call(_) => "transport_error",
            },
        }
    }
}

/// Engine construction and synchronous check failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("cannot open audit sink {}: {source}", .path.display())]
    AuditSink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_validation_messages() {
        assert_eq!(ValidationError::EmptyBody.to_string(), "empty body");
        assert_eq!(ValidationError::EmptyQueueName.to_string(), "empty queue name");
        assert_eq!(ValidationError::EmptyTopicName.to_string(), "empty topic name");
    }

    #[test]
    fn test_dispatch_error_kinds() {
        let open = DispatchError::Circuit {
            circuit: "cb1".into(),
            source: BreakerError::Open,
        };
        assert!(open.is_circuit_open());
        assert_eq!(open.kind(), "circuit_open");
        assert_eq!(open.to_string(), "circuit `cb1`: circuit open");

        let timeout = DispatchError::Circuit {
            circuit: "cb1".into(),
            source: BreakerError::Timeout(Duration::from_millis(5)),
        };
        assert!(!timeout.is_circuit_open());
        assert_eq!(timeout.kind(), "circuit_timeout");

        let closed = DispatchError::Transport(TransportError::AlreadyClosed);
        assert!(closed.is_closed());
        assert_eq!(closed.kind(), "closed");

        let broker = DispatchError::Transport(TransportError::Broker("denied".into()));
        assert!(!broker.is_closed());
        assert_eq!(broker.kind(), "transport_error");
    }
}
