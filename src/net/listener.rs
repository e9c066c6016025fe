//! TCP listener binding.
//!
//! # Responsibilities
//! - Bind every port of a listen address range
//! - Report the bound local addresses for logging

use tokio::net::TcpListener;

use crate::net::address::ListenAddress;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(String, std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Bind one TCP listener per port in `address`.
pub async fn bind(address: &ListenAddress) -> Result<Vec<TcpListener>, ListenerError> {
    let mut listeners = Vec::new();
    for addr in address.bind_addresses() {
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ListenerError::Bind(addr.clone(), e))?;

        if let Ok(local) = listener.local_addr() {
            tracing::info!(address = %local, network = %address.network, "Listener bound");
        }
        listeners.push(listener);
    }
    Ok(listeners)
}
