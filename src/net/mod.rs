//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! "tcp/0.0.0.0:8080-8081"       (server listen entry)
//!     → address.rs (parse network, host, port range)
//!     → listener.rs (bind one TcpListener per port)
//!     → Hand off to HTTP layer
//!
//! Subscription target URL
//!     → ListenAddress::matches(network, port)
//!     → selects the virtual host to dispatch into
//! ```

pub mod address;
pub mod listener;

pub use address::{AddressError, ListenAddress};
