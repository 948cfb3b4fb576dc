//! Connection state machine and reconnect handling.
//!
//! # Responsibilities
//! - Own the single shared broker session
//! - Dial with bounded retries, paced by the backoff policy
//! - Re-dial on demand when a send observes a closed session
//!
//! # State Transitions
//! ```text
//! Disconnected → Connected: dial succeeded
//! Connected → Disconnected: a send saw the session closed, or disconnect()
//! Disconnected (terminal for this call): retries exhausted → ConnectError
//! ```
//!
//! State and session live together in one `ArcSwap` cell, so a reader can
//! never see "connected" paired with a session that is being replaced. Every
//! swap happens under `connect_lock`, which also keeps at most one dial
//! sequence in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::net::transport::{ConnectOptions, Connection, Connector, TransportError};
use crate::observability::logging::SharedLogger;
use crate::observability::metrics;
use crate::resilience::backoff::BackoffPolicy;

/// Dialing gave up.
#[derive(Debug, Error)]
#[error("{addr} is out of service after {attempts} connect attempt(s): {source}")]
pub struct ConnectError {
    pub addr: String,
    pub attempts: u32,
    #[source]
    pub source: TransportError,
}

/// A dialed session plus the generation it was installed at.
#[derive(Clone)]
pub struct Session {
    generation: u64,
    connection: Arc<dyn Connection>,
}

impl Session {
    /// Increases by one for every successful dial.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone)]
pub enum ConnectionState {
    Disconnected,
    Connected(Session),
}

/// Owns the broker session shared by every worker.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    network: String,
    addr: String,
    options: ConnectOptions,
    retries: u32,
    backoff: BackoffPolicy,
    logger: SharedLogger,
    state: ArcSwap<ConnectionState>,
    connect_lock: Mutex<()>,
    generation: AtomicU64,
    dial_attempts: AtomicU64,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("network", &self.network)
            .field("addr", &self.addr)
            .field("retries", &self.retries)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager in the `Disconnected` state. `config` must already be
    /// normalized.
    pub fn new(connector: Arc<dyn Connector>, config: &Config) -> Self {
        Self {
            connector,
            network: config.network.clone(),
            addr: config.addr.clone(),
            options: config.connect_options.clone(),
            retries: config.retries_connect.max(1),
            backoff: config.backoff.clone(),
            logger: config.logger(),
            state: ArcSwap::from_pointee(ConnectionState::Disconnected),
            connect_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            dial_attempts: AtomicU64::new(0),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ConnectionState {
        self.state.load().as_ref().clone()
    }

    pub fn is_connected(&self) -> bool {
        matches!(**self.state.load(), ConnectionState::Connected(_))
    }

    /// The current session, if connected.
    pub fn session(&self) -> Option<Session> {
        match &**self.state.load() {
            ConnectionState::Connected(session) => Some(session.clone()),
            ConnectionState::Disconnected => None,
        }
    }

    /// Total dial attempts made over the manager's lifetime.
    pub fn dial_attempts(&self) -> u64 {
        self.dial_attempts.load(Ordering::Relaxed)
    }

    /// Ensure a session exists, dialing if needed.
    pub async fn connect(&self, identifier: &str) -> Result<Session, ConnectError> {
        if let Some(session) = self.session() {
            return Ok(session);
        }

        let _guard = self.connect_lock.lock().await;
        // another caller may have connected while we waited for the lock
        if let Some(session) = self.session() {
            return Ok(session);
        }
        self.dial_with_retries(identifier).await
    }

    /// Replace a session that was observed closed.
    ///
    /// `stale` is the generation the caller failed on. If the current session
    /// is newer, somebody already reconnected and it is returned as is.
    pub async fn reconnect(
        &self,
        identifier: &str,
        stale: Option<u64>,
    ) -> Result<Session, ConnectError> {
        let _guard = self.connect_lock.lock().await;

        if let Some(session) = self.session() {
            if stale != Some(session.generation) {
                return Ok(session);
            }
            self.state.store(Arc::new(ConnectionState::Disconnected));
            tracing::warn!(
                identifier,
                addr = %self.addr,
                generation = session.generation,
                "Session marked disconnected"
            );
        }

        let result = self.dial_with_retries(identifier).await;
        metrics::record_reconnect(result.is_ok());
        result
    }

    /// Close the current session.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        let _guard = self.connect_lock.lock().await;
        let previous = self.state.swap(Arc::new(ConnectionState::Disconnected));
        match &*previous {
            ConnectionState::Connected(session) => {
                tracing::info!(addr = %self.addr, generation = session.generation, "Disconnecting");
                session.connection.disconnect().await
            }
            ConnectionState::Disconnected => Err(TransportError::AlreadyClosed),
        }
    }

    /// Dial up to `retries` times. Caller must hold `connect_lock`.
    async fn dial_with_retries(&self, identifier: &str) -> Result<Session, ConnectError> {
        let mut last_error = None;

        for attempt in 1..=self.retries {
            self.dial_attempts.fetch_add(1, Ordering::Relaxed);
            match self
                .connector
                .dial(&self.network, &self.addr, &self.options)
                .await
            {
                Ok(connection) => {
                    let session = Session {
                        generation: self.generation.fetch_add(1, Ordering::Relaxed) + 1,
                        connection,
                    };
                    self.state
                        .store(Arc::new(ConnectionState::Connected(session.clone())));
                    self.logger.debug(format_args!(
                        "[broker-dispatch][{}] Connected :: {}",
                        identifier, self.addr
                    ));
                    tracing::debug!(
                        identifier,
                        addr = %self.addr,
                        generation = session.generation,
                        attempt,
                        "Connected"
                    );
                    return Ok(session);
                }
                Err(e) => {
                    let sleep = self.backoff.delay(attempt);
                    self.logger.error(format_args!(
                        "[broker-dispatch][{}] {} is out of service :: dial failed ({}) - sleeping {:?} - {}/{}",
                        identifier, self.addr, e, sleep, attempt, self.retries
                    ));
                    tracing::warn!(
                        identifier,
                        addr = %self.addr,
                        attempt,
                        max_attempts = self.retries,
                        sleep_ms = sleep.as_millis() as u64,
                        error = %e,
                        "Dial failed"
                    );
                    last_error = Some(e);
                    tokio::time::sleep(sleep).await;
                }
            }
        }

        self.logger.error(format_args!(
            "[broker-dispatch][{}] {} is out of service",
            identifier, self.addr
        ));
        tracing::error!(identifier, addr = %self.addr, attempts = self.retries, "Giving up on broker");

        Err(ConnectError {
            addr: self.addr.clone(),
            attempts: self.retries,
            source: last_error
                .unwrap_or_else(|| TransportError::Protocol("no dial attempted".into())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::FrameOption;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct NullConnection;

    #[async_trait]
    impl Connection for NullConnection {
        async fn send(&self, _: &str, _: &str, _: &[u8], _: &[FrameOption]) -> Result<(), TransportError> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    /// Fails the first `failures` dials, then succeeds.
    struct FlakyConnector {
        failures: u32,
        dials: AtomicU32,
        delay: Duration,
    }

    impl FlakyConnector {
        fn new(failures: u32) -> Self {
            Self { failures, dials: AtomicU32::new(0), delay: Duration::ZERO }
        }
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        async fn dial(&self, _: &str, _: &str, _: &ConnectOptions) -> Result<Arc<dyn Connection>, TransportError> {
            let n = self.dials.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if n < self.failures {
                Err(TransportError::Io(std::io::ErrorKind::ConnectionRefused.into()))
            } else {
                Ok(Arc::new(NullConnection))
            }
        }
    }

    fn config(retries: u32, sleeps: Arc<AtomicU32>) -> Config {
        Config {
            retries_connect: retries,
            backoff: BackoffPolicy::custom(move |_| {
                sleeps.fetch_add(1, Ordering::SeqCst);
                Duration::from_millis(1)
            }),
            ..Default::default()
        }
        .normalized()
    }

    #[tokio::test]
    async fn test_connect_first_try() {
        let connector = Arc::new(FlakyConnector::new(0));
        let sleeps = Arc::new(AtomicU32::new(0));
        let manager = ConnectionManager::new(connector.clone(), &config(3, sleeps.clone()));

        assert!(!manager.is_connected());
        let session = manager.connect("t").await.unwrap();
        assert_eq!(session.generation(), 1);
        assert!(manager.is_connected());
        assert_eq!(sleeps.load(Ordering::SeqCst), 0);

        // idempotent fast path
        manager.connect("t").await.unwrap();
        assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_retries_until_success() {
        let connector = Arc::new(FlakyConnector::new(2));
        let sleeps = Arc::new(AtomicU32::new(0));
        let manager = ConnectionManager::new(connector.clone(), &config(3, sleeps.clone()));

        manager.connect("t").await.unwrap();
        assert_eq!(connector.dials.load(Ordering::SeqCst), 3);
        assert_eq!(sleeps.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_exhausts_retries() {
        let connector = Arc::new(FlakyConnector::new(u32::MAX));
        let sleeps = Arc::new(AtomicU32::new(0));
        let manager = ConnectionManager::new(connector.clone(), &config(1, sleeps.clone()));

        let err = manager.connect("t").await.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(err.addr, "localhost:61613");
        assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
        assert_eq!(sleeps.load(Ordering::SeqCst), 1);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_concurrent_connects_dial_once() {
        let connector = Arc::new(FlakyConnector {
            delay: Duration::from_millis(20),
            ..FlakyConnector::new(0)
        });
        let sleeps = Arc::new(AtomicU32::new(0));
        let manager = Arc::new(ConnectionManager::new(connector.clone(), &config(3, sleeps)));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let m = manager.clone();
                tokio::spawn(async move { m.connect("t").await.map(|s| s.generation()) })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 1);
        }
        assert_eq!(connector.dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnect_skips_when_already_replaced() {
        let connector = Arc::new(FlakyConnector::new(0));
        let sleeps = Arc::new(AtomicU32::new(0));
        let manager = ConnectionManager::new(connector.clone(), &config(3, sleeps));

        let first = manager.connect("t").await.unwrap();
        let second = manager.reconnect("a", Some(first.generation())).await.unwrap();
        assert_eq!(second.generation(), 2);

        // a second task that failed on the same stale session must not redial
        let third = manager.reconnect("b", Some(first.generation())).await.unwrap();
        assert_eq!(third.generation(), 2);
        assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
        assert_eq!(manager.dial_attempts(), 2);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let connector = Arc::new(FlakyConnector::new(0));
        let sleeps = Arc::new(AtomicU32::new(0));
        let manager = ConnectionManager::new(connector, &config(3, sleeps));

        manager.connect("t").await.unwrap();
        manager.disconnect().await.unwrap();
        assert!(matches!(manager.state(), ConnectionState::Disconnected));
        assert!(matches!(manager.disconnect().await, Err(TransportError::AlreadyClosed)));
    }
}
