//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Alias used when a handler or broker does not name one.
pub const DEFAULT_ALIAS: &str = "default";

/// Bucket used by `body_offload` when neither the handler nor the broker names one.
pub const DEFAULT_OFFLOAD_BUCKET: &str = "LargeHttpRequestBodies";

/// Root configuration for the bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Which broker implementation to connect with.
    pub transport: TransportKind,

    /// Broker connections, one per alias.
    pub brokers: Vec<BrokerConfig>,

    /// Virtual hosts served over HTTP and targeted by subscriptions.
    pub servers: Vec<ServerConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Broker implementation selector.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Nats,
    Memory,
}

/// One named broker connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Name handlers use to refer to this connection.
    pub alias: String,

    /// Server URLs (e.g., "nats://127.0.0.1:4222").
    pub urls: Vec<String>,

    /// User JWT credentials file. Exclusive with `nkey_credential_file`.
    pub user_credential_file: Option<String>,

    /// NKey seed file. Exclusive with `user_credential_file`.
    pub nkey_credential_file: Option<String>,

    pub client_name: Option<String>,

    pub inbox_prefix: Option<String>,

    /// Default bucket for `body_offload` handlers on this alias.
    pub large_body_bucket: Option<String>,

    /// Inbound subscriptions dispatched into the HTTP servers.
    pub subscribe: Vec<SubscribeConfig>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            alias: DEFAULT_ALIAS.to_string(),
            urls: Vec::new(),
            user_credential_file: None,
            nkey_credential_file: None,
            client_name: None,
            inbox_prefix: None,
            large_body_bucket: None,
            subscribe: Vec::new(),
        }
    }
}

/// Message → HTTP subscription.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscribeConfig {
    /// Subject pattern; may contain `*` and `>` wildcards.
    pub subject: String,

    /// Method template (e.g., "GET" or "{header.X-Method}").
    pub method: String,

    /// Target URL template (e.g., "http://localhost:8080/{subject.asPath}").
    pub url: String,

    #[serde(default)]
    pub queue_group: Option<String>,
}

/// A virtual host.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,

    /// Listen addresses: `[network/]host:port[-port]`.
    pub listen: Vec<String>,

    /// Routes, evaluated in order.
    pub routes: Vec<RouteConfig>,
}

/// Route definition.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouteConfig {
    /// Route identifier for logging.
    pub name: String,

    /// Host header to match (optional).
    pub host: Option<String>,

    /// Path prefix to match (e.g., "/api").
    pub path_prefix: Option<String>,

    /// Allowed methods (empty or absent matches all).
    pub methods: Option<Vec<String>>,

    /// Ordered handler chain.
    pub handle: Vec<HandlerConfig>,
}

/// One stage of a route's handler chain.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "handler", rename_all = "snake_case")]
pub enum HandlerConfig {
    BodyOffload {
        #[serde(default)]
        alias: Option<String>,
        #[serde(default)]
        bucket: Option<String>,
        #[serde(default = "default_offload_ttl_secs")]
        ttl_secs: u64,
    },
    Publish {
        #[serde(default)]
        alias: Option<String>,
        subject: String,
        #[serde(default = "default_true")]
        headers: bool,
    },
    Request {
        #[serde(default)]
        alias: Option<String>,
        subject: String,
        #[serde(default = "default_request_timeout_ms")]
        timeout_ms: u64,
        #[serde(default = "default_true")]
        headers: bool,
    },
    Respond {
        #[serde(default = "default_respond_status")]
        status: u16,
        #[serde(default)]
        body: String,
    },
}

fn default_true() -> bool {
    true
}

fn default_offload_ttl_secs() -> u64 {
    300
}

fn default_request_timeout_ms() -> u64 {
    1000
}

fn default_respond_status() -> u16 {
    200
}

/// Timeout settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total HTTP request timeout on live listeners in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Forward log lines to a subject.
    pub log_output: Option<LogOutputConfig>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            log_output: None,
        }
    }
}

/// Log forwarding target.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogOutputConfig {
    #[serde(default)]
    pub alias: Option<String>,
    pub subject: String,
}
