//! Virtual hosts and their route chains.
//!
//! # Data Flow
//! ```text
//! ServerConfig
//!     → listen addresses parsed
//!     → each RouteConfig: matchers + handler chain
//!         handle = [body_offload, publish, request]
//!         → axum::Router { "/", "/{*path}" → terminal(request) }
//!           .layer(publish).layer(body_offload)     (last layer runs first)
//!
//! Dispatch (live listener or subscription):
//!     HostTable → hosts listening on the target port
//!     → first host with an accepting route
//!     → route chain via tower::ServiceExt::oneshot
//! ```
//!
//! # Design Decisions
//! - A chain ends at its first terminal stage (`request`, `respond`);
//!   stages after it are never reached and are dropped with a warning
//! - A chain without a terminal stage answers 200 with an empty body

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use thiserror::Error;
use tower::ServiceExt;

use crate::bridge::subscribe::Dispatcher;
use crate::bridge::{self, BodyOffload, BridgeRule, Publish};
use crate::config::{HandlerConfig, RouteConfig, ServerConfig, DEFAULT_ALIAS};
use crate::http::respond::{InvalidStatus, Respond};
use crate::net::address::{AddressError, ListenAddress, DEFAULT_NETWORK};
use crate::registry::ConnectionRegistry;
use crate::routing::{Route, Router as RouteTable};
use crate::template::{Template, TemplateError};

/// Errors raised while provisioning a virtual host.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("server {server:?}: {source}")]
    Address {
        server: String,
        #[source]
        source: AddressError,
    },

    #[error("route {route:?}: {source}")]
    Template {
        route: String,
        #[source]
        source: TemplateError,
    },

    #[error("route {route:?}: {source}")]
    Status {
        route: String,
        #[source]
        source: InvalidStatus,
    },
}

#[derive(Clone)]
enum Terminal {
    Request(Arc<bridge::Request>),
    Respond(Arc<Respond>),
    Empty,
}

async fn terminal(State(terminal): State<Terminal>, req: Request<Body>) -> Response {
    match terminal {
        Terminal::Request(stage) => bridge::request::serve_request(State(stage), req).await,
        Terminal::Respond(stage) => stage.response(),
        Terminal::Empty => StatusCode::OK.into_response(),
    }
}

fn alias_or_default(alias: &Option<String>) -> String {
    alias.clone().unwrap_or_else(|| DEFAULT_ALIAS.to_string())
}

/// Provision the handler chain of `route` into a service.
pub fn build_chain(
    route: &RouteConfig,
    registry: &Arc<ConnectionRegistry>,
) -> Result<(Vec<BridgeRule>, axum::Router), BuildError> {
    let template = |source: &str| {
        Template::parse(source).map_err(|source| BuildError::Template {
            route: route.name.clone(),
            source,
        })
    };

    let mut rules = Vec::new();
    let mut end = Terminal::Empty;

    for (i, handler) in route.handle.iter().enumerate() {
        if !matches!(end, Terminal::Empty) {
            tracing::warn!(
                route = %route.name,
                skipped = route.handle.len() - i,
                "Handlers after a terminal stage are never reached"
            );
            break;
        }
        match handler {
            HandlerConfig::BodyOffload {
                alias,
                bucket,
                ttl_secs,
            } => rules.push(BridgeRule::BodyOffload(Arc::new(BodyOffload::new(
                registry.clone(),
                alias_or_default(alias),
                bucket.clone(),
                Duration::from_secs(*ttl_secs),
            )))),
            HandlerConfig::Publish {
                alias,
                subject,
                headers,
            } => rules.push(BridgeRule::Publish(Arc::new(Publish::new(
                registry.clone(),
                alias_or_default(alias),
                template(subject)?,
                *headers,
            )))),
            HandlerConfig::Request {
                alias,
                subject,
                timeout_ms,
                headers,
            } => {
                let stage = Arc::new(bridge::Request::new(
                    registry.clone(),
                    alias_or_default(alias),
                    template(subject)?,
                    Duration::from_millis(*timeout_ms),
                    *headers,
                ));
                rules.push(BridgeRule::Request(stage.clone()));
                end = Terminal::Request(stage);
            }
            HandlerConfig::Respond { status, body } => {
                let respond = Respond::new(*status, body.clone()).map_err(|source| BuildError::Status {
                    route: route.name.clone(),
                    source,
                })?;
                end = Terminal::Respond(Arc::new(respond));
            }
        }
    }

    let mut service = axum::Router::new()
        .route("/", any(terminal))
        .route("/{*path}", any(terminal))
        .with_state(end);
    for rule in rules.iter().rev() {
        service = rule.layer_onto(service);
    }
    Ok((rules, service))
}

/// A configured server block.
#[derive(Debug)]
pub struct VirtualHost {
    name: String,
    listen: Vec<ListenAddress>,
    routes: RouteTable<axum::Router>,
}

impl VirtualHost {
    pub fn new(name: impl Into<String>, listen: Vec<ListenAddress>, routes: RouteTable<axum::Router>) -> Self {
        Self {
            name: name.into(),
            listen,
            routes,
        }
    }

    pub fn from_config(config: &ServerConfig, registry: &Arc<ConnectionRegistry>) -> Result<Self, BuildError> {
        let listen = config
            .listen
            .iter()
            .map(|raw| raw.parse::<ListenAddress>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| BuildError::Address {
                server: config.name.clone(),
                source,
            })?;

        let mut routes = Vec::with_capacity(config.routes.len());
        for route in &config.routes {
            let (rules, service) = build_chain(route, registry)?;
            tracing::debug!(
                server = %config.name,
                route = %route.name,
                stages = ?rules.iter().map(BridgeRule::kind).collect::<Vec<_>>(),
                "Route provisioned"
            );
            routes.push(Route::from_config(route, service));
        }

        Ok(Self::new(config.name.clone(), listen, RouteTable::new(routes)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn listen(&self) -> &[ListenAddress] {
        &self.listen
    }

    /// True if any listen address covers `network`/`port`.
    pub fn listens_on(&self, network: &str, port: u16) -> bool {
        self.listen.iter().any(|addr| addr.matches(network, port))
    }

    /// True if a route accepts `req`.
    pub fn accepts(&self, req: &Request<Body>) -> bool {
        self.routes.match_request(req).is_some()
    }

    /// Run `req` through the first accepting route. 404 if none does.
    pub async fn serve(&self, req: Request<Body>) -> Response {
        let Some(route) = self.routes.match_request(&req) else {
            tracing::debug!(server = %self.name, path = %req.uri().path(), "No route matched");
            return (StatusCode::NOT_FOUND, "No matching route found").into_response();
        };
        tracing::debug!(server = %self.name, route = %route.name, "Route matched");

        let result: Result<Response, Infallible> = route.handler.clone().oneshot(req).await;
        match result {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

/// Port a request targets: explicit, else the scheme default.
pub fn target_port(req: &Request<Body>) -> Option<u16> {
    req.uri().port_u16().or_else(|| match req.uri().scheme_str() {
        Some("https") => Some(443),
        Some("http") => Some(80),
        _ => None,
    })
}

/// Every virtual host, in configuration order.
#[derive(Debug, Default)]
pub struct HostTable {
    hosts: Vec<Arc<VirtualHost>>,
}

impl HostTable {
    pub fn new(hosts: Vec<VirtualHost>) -> Self {
        Self {
            hosts: hosts.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn from_config(servers: &[ServerConfig], registry: &Arc<ConnectionRegistry>) -> Result<Self, BuildError> {
        let hosts = servers
            .iter()
            .map(|server| VirtualHost::from_config(server, registry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(hosts))
    }

    pub fn hosts(&self) -> &[Arc<VirtualHost>] {
        &self.hosts
    }

    /// Hosts that listen on `network`/`port`.
    pub fn listening_on(&self, network: &str, port: u16) -> Vec<Arc<VirtualHost>> {
        self.hosts
            .iter()
            .filter(|host| host.listens_on(network, port))
            .cloned()
            .collect()
    }

    /// First host listening on the request's target that accepts it.
    pub fn select(&self, req: &Request<Body>) -> Option<&Arc<VirtualHost>> {
        let port = target_port(req)?;
        self.hosts
            .iter()
            .find(|host| host.listens_on(DEFAULT_NETWORK, port) && host.accepts(req))
    }
}

#[async_trait]
impl Dispatcher for HostTable {
    async fn dispatch(&self, req: Request<Body>) -> Option<Response> {
        let host = self.select(&req)?.clone();
        Some(host.serve(req).await)
    }
}
