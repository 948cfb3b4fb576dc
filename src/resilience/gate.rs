//! Circuit gate.
//!
//! Holds the set of circuit names this engine registered and routes a send
//! through the breaker only when it names one of them. Names are scoped with
//! the engine id before reaching the breaker, so engines sharing one breaker
//! never see each other's circuits.

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::CircuitSettings;
use crate::error::DispatchError;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{BreakerEngine, BreakerError, GuardedCall};

pub struct CircuitGate {
    scope: String,
    /// circuit name → scoped breaker name
    registered: DashMap<String, String>,
    engine: Arc<dyn BreakerEngine>,
}

impl CircuitGate {
    pub fn new(scope: impl Into<String>, engine: Arc<dyn BreakerEngine>) -> Self {
        Self {
            scope: scope.into(),
            registered: DashMap::new(),
            engine,
        }
    }

    /// The name the breaker engine sees for `name`.
    pub fn scoped_name(&self, name: &str) -> String {
        format!("{}::{}", name, self.scope)
    }

    /// Register (or reconfigure) `name`. Empty names are ignored.
    pub fn configure(&self, name: &str, settings: CircuitSettings) {
        if name.is_empty() {
            return;
        }
        let scoped = self.scoped_name(name);
        self.engine.configure(&scoped, settings.normalized());
        self.registered.insert(name.to_string(), scoped);
    }

    pub fn is_gated(&self, name: &str) -> bool {
        !name.is_empty() && self.registered.contains_key(name)
    }

    /// Run `call`, under the breaker when `circuit` is registered.
    pub async fn execute(
        &self,
        circuit: Option<&str>,
        call: GuardedCall<'_>,
    ) -> Result<(), DispatchError> {
        let scoped = circuit.and_then(|name| {
            self.registered
                .get(name)
                .map(|entry| (name, entry.value().clone()))
        });

        let Some((name, scoped)) = scoped else {
            return call.await.map_err(DispatchError::Transport);
        };

        match self.engine.execute(&scoped, call).await {
            Ok(()) => Ok(()),
            Err(BreakerError::Call(e)) => Err(DispatchError::Transport(e)),
            Err(e) => {
                if matches!(e, BreakerError::Open | BreakerError::Saturated) {
                    metrics::record_circuit_rejection(name);
                }
                Err(DispatchError::Circuit {
                    circuit: name.to_string(),
                    source: e,
                })
            }
        }
    }
}

impl std::fmt::Debug for CircuitGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitGate")
            .field("scope", &self.scope)
            .field("registered", &self.registered.len())
            .finish()
    }
}
