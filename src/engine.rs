//! Engine facade.
//!
//! `Enqueuer` ties the pieces together: it owns the connection manager, the
//! circuit gate and the dispatcher, validates sends on the caller's thread and
//! hands them to the pool.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::runtime::Handle;
use uuid::Uuid;

use crate::config::{CircuitSettings, Config};
use crate::dispatch::request::DEFAULT_CONTENT_TYPE;
use crate::dispatch::{Destination, DestinationKind, Dispatcher, SendOptions, SendRequest, TaskContext};
use crate::error::{DispatchError, EngineError, ValidationError};
use crate::net::connection::{ConnectionManager, ConnectionState};
use crate::net::transport::{Connector, FrameOption, TransportError};
use crate::observability::audit::AuditSink;
use crate::resilience::circuit_breaker::{BreakerEngine, RollingBreaker};
use crate::resilience::gate::CircuitGate;
use crate::stomp::StompConnector;

/// Body of reachability checks.
pub const CHECK_BODY: &[u8] = b"PING";
/// How long a check message may live on the broker.
pub const CHECK_EXPIRY: Duration = Duration::from_secs(60);

/// Asynchronous message producer.
#[derive(Debug)]
pub struct Enqueuer {
    id: String,
    config: Config,
    connections: Arc<ConnectionManager>,
    gate: Arc<CircuitGate>,
    dispatcher: Dispatcher,
}

impl Enqueuer {
    /// Connect to a STOMP broker.
    pub async fn connect(config: Config) -> Result<Self, EngineError> {
        Self::with_connector(config, Arc::new(StompConnector::new())).await
    }

    /// Connect through a custom transport, with a private breaker engine.
    pub async fn with_connector(
        config: Config,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, EngineError> {
        Self::with_parts(config, connector, Arc::new(RollingBreaker::new())).await
    }

    /// Connect through a custom transport and breaker engine. The breaker may
    /// be shared between engines; circuit names are scoped per engine.
    pub async fn with_parts(
        config: Config,
        connector: Arc<dyn Connector>,
        breaker: Arc<dyn BreakerEngine>,
    ) -> Result<Self, EngineError> {
        let config = config.normalized();
        let id = config.next_identifier();

        let audit = match &config.audit_sink_path {
            Some(path) => Some(Arc::new(AuditSink::open(path).map_err(|source| {
                EngineError::AuditSink {
                    path: path.clone(),
                    source,
                }
            })?)),
            None => None,
        };

        let connections = Arc::new(ConnectionManager::new(connector, &config));
        connections.connect(&config.next_identifier()).await?;

        let gate = Arc::new(CircuitGate::new(id.clone(), breaker));
        let context = TaskContext {
            connections: connections.clone(),
            gate: gate.clone(),
            audit,
            logger: config.logger(),
            identifier: config
                .identifier
                .clone()
                .unwrap_or_else(|| Arc::new(|| Uuid::new_v4().to_string())),
        };
        let dispatcher = Dispatcher::new(context, config.max_workers, Handle::current());

        tracing::info!(
            engine = %id,
            addr = %config.addr,
            network = %config.network,
            max_workers = config.max_workers,
            "Engine ready"
        );

        Ok(Self {
            id,
            config,
            connections,
            gate,
            dispatcher,
        })
    }

    /// Queue `body` for `/queue/{name}`. Returns once validated; the outcome
    /// is reported to the hooks in `options` and the audit log.
    pub fn send_queue(
        &self,
        name: &str,
        body: impl Into<Vec<u8>>,
        options: SendOptions,
    ) -> Result<(), ValidationError> {
        self.send(DestinationKind::Queue, name, body.into(), options)
    }

    /// Queue `body` for `/topic/{name}`.
    pub fn send_topic(
        &self,
        name: &str,
        body: impl Into<Vec<u8>>,
        options: SendOptions,
    ) -> Result<(), ValidationError> {
        self.send(DestinationKind::Topic, name, body.into(), options)
    }

    fn send(
        &self,
        kind: DestinationKind,
        name: &str,
        body: Vec<u8>,
        options: SendOptions,
    ) -> Result<(), ValidationError> {
        let request = SendRequest::new(kind, name, body, options)?;
        self.dispatcher.submit(request);
        Ok(())
    }

    /// Sends submitted but not yet finished.
    pub fn queue_size(&self) -> usize {
        self.dispatcher.pending_count()
    }

    /// Resolve once `queue_size()` reaches zero.
    pub async fn wait_idle(&self) {
        self.dispatcher.wait_idle().await
    }

    /// The normalized configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connections.state()
    }

    /// Check a queue by sending a non-persistent, short-lived marker directly
    /// on the session, bypassing the pool and any circuit.
    pub async fn check_queue(&self, name: &str) -> Result<(), EngineError> {
        self.check(DestinationKind::Queue, name).await
    }

    pub async fn check_topic(&self, name: &str) -> Result<(), EngineError> {
        self.check(DestinationKind::Topic, name).await
    }

    async fn check(&self, kind: DestinationKind, name: &str) -> Result<(), EngineError> {
        let destination = Destination::new(kind, name)?;
        let identifier = self.config.next_identifier();
        let session = self.connections.connect(&identifier).await?;

        let options = [
            FrameOption::header("persistent", "false"),
            FrameOption::header("expires", check_expiry().to_string()),
        ];
        session
            .connection()
            .send(
                &destination.path(),
                DEFAULT_CONTENT_TYPE,
                CHECK_BODY,
                &options,
            )
            .await
            .map_err(DispatchError::from)?;

        tracing::debug!(
            engine = %self.id,
            identifier = %identifier,
            destination = %destination.path(),
            "Check sent"
        );
        Ok(())
    }

    /// Close the broker session. Drain first (`wait_idle`); sends racing a
    /// disconnect may fail or reconnect.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        tracing::info!(engine = %self.id, pending = self.queue_size(), "Disconnecting engine");
        self.connections.disconnect().await
    }

    /// Register or reconfigure the circuit `name` on this engine.
    pub fn configure_circuit_breaker(&self, name: &str, settings: CircuitSettings) {
        self.gate.configure(name, settings);
        tracing::debug!(engine = %self.id, circuit = name, "Circuit configured");
    }

    pub fn is_gated(&self, name: &str) -> bool {
        self.gate.is_gated(name)
    }
}

/// Unix milliseconds `CHECK_EXPIRY` from now.
fn check_expiry() -> u128 {
    (SystemTime::now() + CHECK_EXPIRY)
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
