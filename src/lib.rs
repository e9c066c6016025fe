//! HTTP ⇄ NATS bridge library.
//!
//! Publishes incoming HTTP requests as messages, turns request-reply
//! exchanges into HTTP responses, and dispatches subscribed messages into
//! the same HTTP handler chains.

pub mod bridge;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod registry;
pub mod routing;
pub mod template;
pub mod transport;

pub use config::BridgeConfig;
pub use http::HttpServer;
pub use lifecycle::{BridgeApp, Shutdown};
