//! Configuration schema definitions.
//!
//! All serializable fields can come from a TOML file; caller-supplied
//! capabilities (logger, identifier generator) are set in code.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::net::transport::ConnectOptions;
use crate::observability::logging::{NoopLogger, SharedLogger};
use crate::resilience::backoff::BackoffPolicy;

pub const DEFAULT_NETWORK: &str = "tcp";
pub const DEFAULT_ADDR: &str = "localhost:61613";
pub const DEFAULT_RETRIES_CONNECT: u32 = 3;
pub const MAX_RETRIES_CONNECT: u32 = 5;

/// Produces correlation identifiers.
pub type IdentifierFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Engine configuration.
///
/// Zero/empty values mean "use the default"; [`Config::normalized`] fills them
/// in and the engine only ever stores a normalized copy.
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Transport kind (default: "tcp").
    pub network: String,

    /// Broker `host:port` (default: "localhost:61613").
    pub addr: String,

    /// Options passed to the connector when dialing.
    pub connect_options: ConnectOptions,

    /// Maximum sends running concurrently (default: logical core count).
    pub max_workers: usize,

    /// Dial attempts per connect (default 3, clamped to 1..=5).
    pub retries_connect: u32,

    /// Sleep between failed dial attempts (default: exponential).
    pub backoff: BackoffPolicy,

    /// When set, before/after audit records are appended to this file.
    pub audit_sink_path: Option<PathBuf>,

    /// Receives progress and failure lines (default: discard).
    #[serde(skip)]
    pub logger: Option<SharedLogger>,

    /// Generates correlation identifiers (default: random UUID).
    #[serde(skip)]
    pub identifier: Option<IdentifierFn>,
}

impl Config {
    /// Fill defaults and clamp ranges. Never fails.
    pub fn normalized(mut self) -> Self {
        if self.network.is_empty() {
            self.network = DEFAULT_NETWORK.to_string();
        }
        if self.addr.is_empty() {
            self.addr = DEFAULT_ADDR.to_string();
        }
        if self.max_workers < 1 {
            self.max_workers = default_max_workers();
        }
        self.retries_connect = match self.retries_connect {
            0 => DEFAULT_RETRIES_CONNECT,
            n => n.min(MAX_RETRIES_CONNECT),
        };
        if self.logger.is_none() {
            self.logger = Some(Arc::new(NoopLogger));
        }
        if self.identifier.is_none() {
            self.identifier = Some(Arc::new(|| Uuid::new_v4().to_string()));
        }
        self
    }

    /// Replace the connect options.
    pub fn set_options(&mut self, options: ConnectOptions) {
        self.connect_options = options;
    }

    /// Add one extra CONNECT header.
    pub fn add_option(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.connect_options.headers.insert(key.into(), value.into());
    }

    pub fn logger(&self) -> SharedLogger {
        self.logger.clone().unwrap_or_else(|| Arc::new(NoopLogger))
    }

    /// Generate a fresh correlation identifier.
    pub fn next_identifier(&self) -> String {
        match &self.identifier {
            Some(f) => f(),
            None => Uuid::new_v4().to_string(),
        }
    }
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("network", &self.network)
            .field("addr", &self.addr)
            .field("connect_options", &self.connect_options)
            .field("max_workers", &self.max_workers)
            .field("retries_connect", &self.retries_connect)
            .field("backoff", &self.backoff)
            .field("audit_sink_path", &self.audit_sink_path)
            .field("logger", &self.logger.as_ref().map(|_| ".."))
            .field("identifier", &self.identifier.as_ref().map(|_| ".."))
            .finish()
    }
}

const DEFAULT_CIRCUIT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 10_000;
const DEFAULT_REQUEST_VOLUME_THRESHOLD: u32 = 100;
const DEFAULT_SLEEP_WINDOW_MS: u64 = 500;
const DEFAULT_ERROR_PERCENT_THRESHOLD: u32 = 5;

/// Breaker settings for one named circuit. Zero fields take defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitSettings {
    /// How long a gated send may run, in milliseconds (default 10000).
    pub timeout_ms: u64,

    /// Gated sends allowed at the same time (default 10000, capped at the
    /// semaphore permit limit).
    pub max_concurrent_requests: usize,

    /// Requests in the rolling window before the error rate is considered
    /// (default 100).
    pub request_volume_threshold: u32,

    /// How long an open circuit waits before letting a trial call through, in
    /// milliseconds (default 500).
    pub sleep_window_ms: u64,

    /// Error percentage that opens the circuit (default 5).
    pub error_percent_threshold: u32,
}

impl CircuitSettings {
    pub fn normalized(mut self) -> Self {
        if self.timeout_ms == 0 {
            self.timeout_ms = DEFAULT_CIRCUIT_TIMEOUT_MS;
        }
        if self.max_concurrent_requests == 0 {
            self.max_concurrent_requests = DEFAULT_MAX_CONCURRENT_REQUESTS;
        }
        self.max_concurrent_requests = self
            .max_concurrent_requests
            .min(tokio::sync::Semaphore::MAX_PERMITS);
        if self.request_volume_threshold == 0 {
            self.request_volume_threshold = DEFAULT_REQUEST_VOLUME_THRESHOLD;
        }
        if self.sleep_window_ms == 0 {
            self.sleep_window_ms = DEFAULT_SLEEP_WINDOW_MS;
        }
        if self.error_percent_threshold == 0 {
            self.error_percent_threshold = DEFAULT_ERROR_PERCENT_THRESHOLD;
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sleep_window(&self) -> Duration {
        Duration::from_millis(self.sleep_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default().normalized();
        assert_eq!(config.addr, "localhost:61613");
        assert_eq!(config.network, "tcp");
        assert_eq!(
            config.max_workers,
            std::thread::available_parallelism().unwrap().get()
        );
        assert_eq!(config.retries_connect, 3);
        assert!(config.logger.is_some());
        assert!(config.audit_sink_path.is_none());
        assert_eq!(config.backoff.delay(1), Duration::from_millis(200));

        let id = config.next_identifier();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_ne!(id, config.next_identifier());
    }

    #[test]
    fn test_retries_connect_clamping() {
        let clamp = |n| Config { retries_connect: n, ..Default::default() }.normalized().retries_connect;
        assert_eq!(clamp(0), 3);
        assert_eq!(clamp(1), 1);
        assert_eq!(clamp(4), 4);
        assert_eq!(clamp(5), 5);
        assert_eq!(clamp(10), 5);
    }

    #[test]
    fn test_explicit_values_survive() {
        let config = Config {
            network: "tcp4".into(),
            addr: "broker:61614".into(),
            max_workers: 2,
            backoff: BackoffPolicy::Linear,
            identifier: Some(Arc::new(|| "fixed".to_string())),
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.network, "tcp4");
        assert_eq!(config.addr, "broker:61614");
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.next_identifier(), "fixed");
        assert_eq!(config.backoff.delay(2), Duration::from_millis(200));
    }

    #[test]
    fn test_connect_option_helpers() {
        let mut config = Config::default();
        assert!(config.connect_options.headers.is_empty());
        config.add_option("client-id", "worker-1");
        assert_eq!(config.connect_options.headers["client-id"], "worker-1");

        config.set_options(ConnectOptions {
            login: Some("guest".into()),
            ..Default::default()
        });
        assert!(config.connect_options.headers.is_empty());
        assert_eq!(config.connect_options.login.as_deref(), Some("guest"));
    }

    #[test]
    fn test_circuit_settings_defaults() {
        let settings = CircuitSettings::default().normalized();
        assert_eq!(settings.timeout(), Duration::from_secs(10));
        assert_eq!(settings.max_concurrent_requests, 10_000);
        assert_eq!(settings.request_volume_threshold, 100);
        assert_eq!(settings.sleep_window(), Duration::from_millis(500));
        assert_eq!(settings.error_percent_threshold, 5);

        let custom = CircuitSettings {
            request_volume_threshold: 3,
            error_percent_threshold: 1,
            ..Default::default()
        }
        .normalized();
        assert_eq!(custom.request_volume_threshold, 3);
        assert_eq!(custom.error_percent_threshold, 1);
    }

    #[test]
    fn test_max_concurrent_requests_capped() {
        let settings = CircuitSettings {
            max_concurrent_requests: usize::MAX,
            ..Default::default()
        }
        .normalized();
        assert_eq!(settings.max_concurrent_requests, tokio::sync::Semaphore::MAX_PERMITS);
    }
}
