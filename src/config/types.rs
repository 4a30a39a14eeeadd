use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for trickled
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Durable state backend
    #[serde(default)]
    pub store: StoreConfig,

    /// Correlation router
    #[serde(default)]
    pub router: RouterConfig,

    /// SMS transport
    #[serde(default)]
    pub transport: TransportConfig,

    /// Admin API configuration
    #[serde(default)]
    pub admin: AdminConfig,

    /// Logging and tracing
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Shutdown configuration
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Storage backend
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Volatile, for development and tests
    Memory,
    /// fjall LSM keyspace on local disk
    #[default]
    Fjall,
}

/// Storage configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Data directory for fjall (platform data dir when unset)
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// In-memory store.
    pub fn memory() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: None,
        }
    }
}

/// Correlation router configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Serial worker queues; each correlation id always maps to the same one
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// Capacity of the bounded inbox
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Redeliveries of an envelope that failed transiently
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,

    /// First redelivery delay, doubled per attempt
    #[serde(default = "default_redelivery_base_delay", with = "humantime_serde")]
    pub redelivery_base_delay: Duration,

    /// Redelivery delay cap
    #[serde(default = "default_redelivery_max_delay", with = "humantime_serde")]
    pub redelivery_max_delay: Duration,

    /// In-place re-runs of load-decide-save after a version conflict
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            mailbox_capacity: default_mailbox_capacity(),
            max_redeliveries: default_max_redeliveries(),
            redelivery_base_delay: default_redelivery_base_delay(),
            redelivery_max_delay: default_redelivery_max_delay(),
            conflict_retries: default_conflict_retries(),
        }
    }
}

fn default_shards() -> usize {
    8
}

fn default_mailbox_capacity() -> usize {
    10_000
}

fn default_max_redeliveries() -> u32 {
    5
}

fn default_redelivery_base_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_redelivery_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_conflict_retries() -> u32 {
    3
}

/// Transport configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportConfig {
    /// In-process mock transport
    #[serde(default)]
    pub mock: MockTransportConfig,
}

/// Mock transport behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct MockTransportConfig {
    /// Simulated send latency
    #[serde(default = "default_mock_latency", with = "humantime_serde")]
    pub latency: Duration,

    /// Fraction of sends reported as failed (0.0 - 1.0)
    #[serde(default)]
    pub failure_rate: f64,

    /// Cost reported per delivered message, smallest currency unit
    #[serde(default = "default_mock_cost")]
    pub cost: i64,
}

impl Default for MockTransportConfig {
    fn default() -> Self {
        Self {
            latency: default_mock_latency(),
            failure_rate: 0.0,
            cost: default_mock_cost(),
        }
    }
}

fn default_mock_latency() -> Duration {
    Duration::from_millis(50)
}

fn default_mock_cost() -> i64 {
    1
}

/// Admin API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// HTTP API address
    #[serde(default = "default_admin_address")]
    pub address: SocketAddr,

    /// Enable metrics endpoint
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable health endpoints
    #[serde(default = "default_true")]
    pub health: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            address: default_admin_address(),
            metrics: true,
            health: true,
        }
    }
}

fn default_admin_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

fn default_true() -> bool {
    true
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Enable structured JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// OTLP endpoint for distributed tracing
    pub otlp_endpoint: Option<String>,

    /// Trace sample rate (0.0 - 1.0)
    #[serde(default = "default_sample_rate")]
    pub trace_sample_rate: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            log_level: default_log_level(),
            otlp_endpoint: None,
            trace_sample_rate: default_sample_rate(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sample_rate() -> f64 {
    1.0
}

/// Shutdown configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// How long to wait for in-flight envelopes to drain
    #[serde(default = "default_drain_timeout", with = "humantime_serde")]
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: default_drain_timeout(),
        }
    }
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Humantime serde support module
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
