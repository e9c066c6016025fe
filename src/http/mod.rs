//! HTTP side of the bridge.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, per-port dispatch, tracing, timeout)
//!     → vhost.rs (virtual host → route → handler chain)
//!     → bridge stages / respond.rs
//!     → Send to client
//!
//! Subscription delivery
//!     → vhost.rs HostTable (same hosts, same chains)
//!     → recorder.rs (buffer the response into a reply message)
//! ```

pub mod recorder;
pub mod respond;
pub mod server;
pub mod vhost;

pub use server::HttpServer;
pub use vhost::{BuildError, HostTable, VirtualHost};
