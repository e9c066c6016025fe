//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BridgeConfig (validated, immutable)
//!     → consumed once by the startup sequence
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BridgeConfig, BrokerConfig, HandlerConfig, LogFormat, LogOutputConfig, ObservabilityConfig,
    RouteConfig, ServerConfig, SubscribeConfig, TimeoutConfig, TransportKind, DEFAULT_ALIAS,
    DEFAULT_OFFLOAD_BUCKET,
};
