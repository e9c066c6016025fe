//! HTTP listeners for the virtual hosts.
//!
//! # Responsibilities
//! - Bind every distinct listen port across all virtual hosts
//! - Serve each port with the hosts listening on it
//! - Wire up middleware (tracing, request timeout)
//! - Stop accepting on shutdown and let in-flight requests finish
//!
//! # Design Decisions
//! - One bind per network and port: two hosts sharing a port share a socket
//!   and are told apart by their routes
//! - First host with an accepting route wins, in configuration order

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tokio::task::JoinSet;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::http::vhost::{HostTable, VirtualHost};
use crate::lifecycle::Shutdown;
use crate::net::listener::{self, ListenerError};
use crate::net::ListenAddress;

#[derive(Clone)]
struct PortHosts {
    hosts: Arc<Vec<Arc<VirtualHost>>>,
}

async fn dispatch(State(state): State<PortHosts>, request: Request<Body>) -> Response {
    let Some(host) = state.hosts.iter().find(|host| host.accepts(&request)) else {
        tracing::debug!(
            method = %request.method(),
            path = %request.uri().path(),
            "No virtual host accepted request"
        );
        return (StatusCode::NOT_FOUND, "No matching route found").into_response();
    };
    host.serve(request).await
}

/// HTTP front of the bridge.
pub struct HttpServer {
    hosts: Arc<HostTable>,
    request_timeout: Duration,
}

impl HttpServer {
    pub fn new(hosts: Arc<HostTable>, request_timeout: Duration) -> Self {
        Self {
            hosts,
            request_timeout,
        }
    }

    /// Single-port listen addresses to bind, deduplicated by network and port.
    pub fn addresses(&self) -> Vec<ListenAddress> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for host in self.hosts.hosts() {
            for address in host.listen() {
                for port in address.start_port..=address.end_port {
                    if seen.insert((address.network.clone(), port)) {
                        out.push(ListenAddress {
                            network: address.network.clone(),
                            host: address.host.clone(),
                            start_port: port,
                            end_port: port,
                        });
                    }
                }
            }
        }
        out
    }

    /// Build the router serving one bound port.
    #[allow(deprecated)]
    pub fn router_for(&self, network: &str, port: u16) -> Router {
        let state = PortHosts {
            hosts: Arc::new(self.hosts.listening_on(network, port)),
        };
        Router::new()
            .fallback(dispatch)
            .with_state(state)
            .layer(TimeoutLayer::new(self.request_timeout))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind every port and serve until `shutdown` fires.
    ///
    /// Returns once all listeners are bound; the serving tasks are in the
    /// returned set.
    pub async fn spawn(&self, shutdown: &Shutdown) -> Result<JoinSet<std::io::Result<()>>, ListenerError> {
        let mut bound = Vec::new();
        for address in self.addresses() {
            for listener in listener::bind(&address).await? {
                bound.push((self.router_for(&address.network, address.start_port), listener));
            }
        }

        let mut tasks = JoinSet::new();
        for (router, listener) in bound {
            let mut signal = shutdown.subscribe();
            tasks.spawn(async move {
                let addr = listener.local_addr()?;
                tracing::info!(address = %addr, "HTTP server starting");
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = signal.recv().await;
                    })
                    .await?;
                tracing::info!(address = %addr, "HTTP server stopped");
                Ok(())
            });
        }
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HandlerConfig, RouteConfig, ServerConfig};
    use crate::registry::ConnectionRegistry;
    use axum::body::to_bytes;
    use tower::ServiceExt;

    fn server(name: &str, listen: &[&str], host: Option<&str>, body: &str) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            listen: listen.iter().map(|s| s.to_string()).collect(),
            routes: vec![RouteConfig {
                name: name.to_string(),
                host: host.map(str::to_string),
                handle: vec![HandlerConfig::Respond {
                    status: 200,
                    body: body.to_string(),
                }],
                ..Default::default()
            }],
        }
    }

    fn http_server(servers: &[ServerConfig]) -> HttpServer {
        let registry = Arc::new(ConnectionRegistry::new());
        let hosts = HostTable::from_config(servers, &registry).unwrap();
        HttpServer::new(Arc::new(hosts), Duration::from_secs(5))
    }

    #[test]
    fn test_addresses_are_deduplicated_per_port() {
        let server = http_server(&[
            server("a", &["0.0.0.0:8080-8081"], None, ""),
            server("b", &["localhost:8081", "tcp6/[::1]:8081"], None, ""),
        ]);
        let ports: Vec<(String, u16)> = server
            .addresses()
            .into_iter()
            .map(|a| (a.network, a.start_port))
            .collect();
        assert_eq!(
            ports,
            [
                ("tcp".to_string(), 8080),
                ("tcp".to_string(), 8081),
                ("tcp6".to_string(), 8081)
            ]
        );
    }

    #[tokio::test]
    async fn test_shared_port_split_by_host() {
        let server = http_server(&[
            server("a", &[":8080"], Some("a.example.com"), "a"),
            server("b", &[":8080"], Some("b.example.com"), "b"),
        ]);
        let router = server.router_for("tcp", 8080);

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("host", "b.example.com:8080")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"b");

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("host", "c.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
