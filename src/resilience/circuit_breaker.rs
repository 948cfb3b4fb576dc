//! Circuit breaker engine.
//!
//! # States
//! - Closed: normal operation, calls pass through and are counted
//! - Open: downstream assumed broken, calls fail fast
//! - Half-Open: sleep window elapsed, a single trial call is let through
//!
//! # State Transitions
//! ```text
//! Closed → Open: window holds >= request_volume_threshold calls
//!                and error% >= error_percent_threshold
//! Open → Half-Open: sleep window elapsed, next call becomes the trial
//! Half-Open → Closed: trial succeeds (window reset)
//! Half-Open → Open: trial fails (sleep window restarts)
//! ```
//!
//! The rolling window is ten one-second buckets. Calls running longer than
//! the circuit timeout fail and count as errors; calls beyond
//! `max_concurrent_requests` are rejected without being counted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::CircuitSettings;
use crate::net::transport::TransportError;

const WINDOW_BUCKETS: u64 = 10;

/// Why a guarded call did not succeed.
#[derive(Debug, Error)]
pub enum BreakerError {
    /// The circuit is open; the call was not made.
    #[error("circuit open")]
    Open,

    /// The call ran longer than the circuit timeout.
    #[error("circuit timeout after {0:?}")]
    Timeout(Duration),

    /// Too many calls already running on this circuit; the call was not made.
    #[error("max concurrency reached")]
    Saturated,

    /// The call itself failed.
    #[error(transparent)]
    Call(TransportError),
}

/// A send wrapped for execution under a breaker.
pub type GuardedCall<'a> = BoxFuture<'a, Result<(), TransportError>>;

/// Breaker collaborator used by the circuit gate.
///
/// Names are global to an engine implementation; callers scope them.
#[async_trait]
pub trait BreakerEngine: Send + Sync {
    /// Create or replace the circuit `name`.
    fn configure(&self, name: &str, settings: CircuitSettings);

    /// Run `call` under the circuit `name`.
    async fn execute<'a>(&'a self, name: &'a str, call: GuardedCall<'a>) -> Result<(), BreakerError>;
}

/// Externally visible circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    second: u64,
    successes: u32,
    failures: u32,
}

#[derive(Debug, Default)]
struct CircuitData {
    opened_at: Option<Instant>,
    trialing: bool,
    buckets: VecDeque<Bucket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

#[derive(Debug)]
struct Circuit {
    settings: CircuitSettings,
    data: Mutex<CircuitData>,
    in_flight: Arc<Semaphore>,
    epoch: Instant,
}

impl Circuit {
    fn new(settings: CircuitSettings) -> Self {
        let settings = settings.normalized();
        Self {
            settings,
            data: Mutex::new(CircuitData::default()),
            in_flight: Arc::new(Semaphore::new(settings.max_concurrent_requests)),
            epoch: Instant::now(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CircuitData> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn now_second(&self) -> u64 {
        self.epoch.elapsed().as_secs()
    }

    fn state(&self) -> CircuitState {
        let data = self.lock();
        match data.opened_at {
            None => CircuitState::Closed,
            Some(_) if data.trialing => CircuitState::HalfOpen,
            Some(opened_at) if opened_at.elapsed() >= self.settings.sleep_window() => {
                CircuitState::HalfOpen
            }
            Some(_) => CircuitState::Open,
        }
    }

    fn admit(&self) -> Result<Admission, BreakerError> {
        let mut data = self.lock();
        match data.opened_at {
            None => Ok(Admission::Normal),
            Some(opened_at)
                if !data.trialing && opened_at.elapsed() >= self.settings.sleep_window() =>
            {
                data.trialing = true;
                Ok(Admission::Trial)
            }
            Some(_) => Err(BreakerError::Open),
        }
    }

    fn abandon_trial(&self, admission: Admission) {
        if admission == Admission::Trial {
            self.lock().trialing = false;
        }
    }

    /// Record an outcome. Returns the new state when it changed.
    fn record(&self, admission: Admission, success: bool) -> Option<CircuitState> {
        let now = self.now_second();
        let mut data = self.lock();

        if admission == Admission::Trial {
            data.trialing = false;
            return if success {
                data.opened_at = None;
                data.buckets.clear();
                Some(CircuitState::Closed)
            } else {
                data.opened_at = Some(Instant::now());
                Some(CircuitState::Open)
            };
        }

        while data
            .buckets
            .front()
            .is_some_and(|b| b.second + WINDOW_BUCKETS <= now)
        {
            data.buckets.pop_front();
        }
        match data.buckets.back_mut() {
            Some(bucket) if bucket.second == now => {
                if success {
                    bucket.successes += 1;
                } else {
                    bucket.failures += 1;
                }
            }
            _ => data.buckets.push_back(Bucket {
                second: now,
                successes: success as u32,
                failures: (!success) as u32,
            }),
        }

        // health is re-evaluated on every outcome, successes included
        if data.opened_at.is_some() {
            return None;
        }
        let (total, failures) = data.buckets.iter().fold((0u64, 0u64), |(t, f), b| {
            (t + (b.successes + b.failures) as u64, f + b.failures as u64)
        });
        let trips = total >= self.settings.request_volume_threshold as u64
            && failures * 100 >= self.settings.error_percent_threshold as u64 * total;
        if trips {
            data.opened_at = Some(Instant::now());
            Some(CircuitState::Open)
        } else {
            None
        }
    }
}

/// In-process breaker engine with rolling error-rate windows.
#[derive(Debug, Default)]
pub struct RollingBreaker {
    circuits: DashMap<String, Arc<Circuit>>,
}

impl RollingBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `name`, if it exists.
    pub fn state(&self, name: &str) -> Option<CircuitState> {
        self.circuits.get(name).map(|c| c.state())
    }

    fn circuit(&self, name: &str) -> Arc<Circuit> {
        if let Some(circuit) = self.circuits.get(name) {
            return circuit.clone();
        }
        self.circuits
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Circuit::new(CircuitSettings::default())))
            .clone()
    }
}

#[async_trait]
impl BreakerEngine for RollingBreaker {
    fn configure(&self, name: &str, settings: CircuitSettings) {
        // reconfiguring starts the circuit over with an empty window
        self.circuits
            .insert(name.to_string(), Arc::new(Circuit::new(settings)));
    }

    async fn execute<'a>(&'a self, name: &'a str, call: GuardedCall<'a>) -> Result<(), BreakerError> {
        let circuit = self.circuit(name);
        let admission = circuit.admit()?;

        let _permit = match circuit.in_flight.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                circuit.abandon_trial(admission);
                return Err(BreakerError::Saturated);
            }
        };

        let timeout = circuit.settings.timeout();
        let (result, success) = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(())) => (Ok(()), true),
            Ok(Err(e)) => (Err(BreakerError::Call(e)), false),
            Err(_) => (Err(BreakerError::Timeout(timeout)), false),
        };

        match circuit.record(admission, success) {
            Some(CircuitState::Open) => tracing::warn!(circuit = name, "Circuit opened"),
            Some(CircuitState::Closed) => tracing::info!(circuit = name, "Circuit closed"),
            _ => {}
        }
        result
    }
}
