//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber
//! - Select pretty or JSON console output
//! - Attach the subject forwarder when `log_output` is configured
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - Forwarded lines are always JSON, whatever the console format

use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogFormat, ObservabilityConfig};
use crate::observability::forward::{self, ForwardWriter};

/// Filter used when neither `RUST_LOG` nor the configured level parse.
pub const DEFAULT_FILTER: &str = "nats_http_bridge=info,tower_http=info";

/// Build the level filter for `config`.
pub fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber.
///
/// `forward` receives every forwardable event as one JSON line.
pub fn init_logging(config: &ObservabilityConfig, forward: Option<ForwardWriter>) -> Result<(), TryInitError> {
    let console = match config.log_format {
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Pretty => fmt::layer().boxed(),
    };
    let forwarder = forward.map(|writer| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(filter_fn(forward::is_forwardable))
    });

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(console)
        .with(forwarder)
        .try_init()
}
