//! Subscribe stage: broker delivery → synthetic HTTP request.
//!
//! # Data Flow
//! ```text
//! delivery on `subject` (optionally as a queue-group member)
//!     → method / url templates rendered against the message
//!     → synthetic request (message headers, payload as body)
//!     → Dispatcher::dispatch (virtual host by listen port, then route)
//!     → response recorded → reply message, or discarded without a reply address
//! ```
//!
//! # State Machine
//! ```text
//! Provisioned ──start──▶ Subscribed ──stop──▶ Draining ──▶ Unsubscribed
//! ```
//!
//! # Design Decisions
//! - Every delivery is handled on its own task; deliveries are unordered
//! - Draining stops new deliveries, still handles the ones already buffered,
//!   then waits for every in-flight handler
//! - An unroutable message is logged and dropped; no reply is sent

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{self, header, HeaderName, HeaderValue, Method, Uri};
use axum::response::Response;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};

use crate::bridge::BridgeError;
use crate::http::recorder::{self, RecordedResponse};
use crate::observability::metrics;
use crate::registry::ConnectionRegistry;
use crate::template::{MessageVars, Template};
use crate::transport::{BridgeMessage, Connection, Subscription};

/// User agent on every synthetic request.
pub const USER_AGENT: &str = "nats-http-bridge";

/// The HTTP side a subscription dispatches into.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Serve `req` on the first virtual host that listens on its target and
    /// has a route accepting it. `None` when no host does.
    async fn dispatch(&self, req: http::Request<Body>) -> Option<Response>;
}

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeState {
    Provisioned,
    Subscribed,
    Draining,
    Unsubscribed,
}

/// Reasons a delivery could not be dispatched.
#[derive(Debug, Error)]
pub enum InboundError {
    #[error("invalid method {0:?}")]
    Method(String),

    #[error("invalid target URL {0:?}")]
    Url(String),

    #[error("no virtual host accepts {method} {url}")]
    Unrouted { method: String, url: String },
}

/// Provisioned subscription.
pub struct Subscribe {
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<dyn Dispatcher>,
    alias: String,
    subject: String,
    queue_group: Option<String>,
    method: Template,
    url: Template,
    state: watch::Sender<SubscribeState>,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Subscribe {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<dyn Dispatcher>,
        alias: impl Into<String>,
        subject: impl Into<String>,
        queue_group: Option<String>,
        method: Template,
        url: Template,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            alias: alias.into(),
            subject: subject.into(),
            queue_group,
            method,
            url,
            state: watch::Sender::new(SubscribeState::Provisioned),
            stop: watch::Sender::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SubscribeState {
        *self.state.borrow()
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Register the subscription and start handling deliveries.
    pub async fn start(self: &Arc<Self>) -> Result<(), BridgeError> {
        let broker = self.registry.resolve(&self.alias)?;
        let conn = broker.connection().clone();
        let sub = conn
            .subscribe(&self.subject, self.queue_group.as_deref())
            .await?;

        tracing::info!(
            alias = %self.alias,
            subject = %self.subject,
            queue_group = ?self.queue_group,
            "Subscribed"
        );
        self.state.send_replace(SubscribeState::Subscribed);

        let stop = self.stop.subscribe();
        let handle = tokio::spawn(self.clone().run(conn, sub, stop));
        *self.task.lock().await = Some(handle);
        Ok(())
    }

    /// Drain the subscription and wait for in-flight handlers.
    pub async fn stop(&self) {
        self.stop.send_replace(true);
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(subject = %self.subject, error = %e, "Subscription task failed");
            }
        }
        self.state.send_replace(SubscribeState::Unsubscribed);
    }

    async fn run(
        self: Arc<Self>,
        conn: Arc<dyn Connection>,
        mut sub: Box<dyn Subscription>,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                msg = sub.next() => match msg {
                    Some(msg) => self.spawn_handler(&mut in_flight, &conn, msg),
                    None => break,
                },
                _ = stop.changed() => {
                    self.state.send_replace(SubscribeState::Draining);
                    tracing::info!(subject = %self.subject, in_flight = in_flight.len(), "Draining subscription");
                    if let Err(e) = sub.drain().await {
                        tracing::error!(subject = %self.subject, error = %e, "Drain failed");
                    }
                    while let Some(msg) = sub.next().await {
                        self.spawn_handler(&mut in_flight, &conn, msg);
                    }
                    break;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(subject = %self.subject, error = %e, "Message handler panicked");
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(subject = %self.subject, error = %e, "Message handler panicked");
            }
        }
        self.state.send_replace(SubscribeState::Unsubscribed);
        tracing::info!(subject = %self.subject, "Unsubscribed");
    }

    fn spawn_handler(self: &Arc<Self>, in_flight: &mut JoinSet<()>, conn: &Arc<dyn Connection>, msg: BridgeMessage) {
        let this = self.clone();
        let conn = conn.clone();
        in_flight.spawn(async move { this.handle(conn.as_ref(), msg).await });
    }

    /// Dispatch one delivery and reply if it asked for one.
    pub async fn handle(&self, conn: &dyn Connection, msg: BridgeMessage) {
        tracing::debug!(subject = %msg.subject, reply = ?msg.reply, "Message received");

        let response = match self.dispatch(&msg).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(subject = %msg.subject, error = %e, "Dropping message");
                metrics::record_inbound(&self.subject, "dropped");
                return;
            }
        };

        let Some(reply_to) = msg.reply else {
            recorder::discard(response).await;
            metrics::record_inbound(&self.subject, "ok");
            return;
        };

        let recorded = match RecordedResponse::record(response).await {
            Ok(recorded) => recorded,
            Err(e) => {
                tracing::error!(subject = %msg.subject, error = %e, "Could not read handler response");
                metrics::record_inbound(&self.subject, "error");
                return;
            }
        };

        match conn.publish(recorded.into_message(reply_to)).await {
            Ok(()) => metrics::record_inbound(&self.subject, "ok"),
            Err(e) => {
                tracing::error!(subject = %msg.subject, error = %e, "Could not send reply");
                metrics::record_inbound(&self.subject, "error");
            }
        }
    }

    async fn dispatch(&self, msg: &BridgeMessage) -> Result<Response, InboundError> {
        let vars = MessageVars::new(msg);
        let method = self.method.render(&vars);
        let url = self.url.render(&vars);

        let req = synthetic_request(msg, &method, &url)?;
        self.dispatcher
            .dispatch(req)
            .await
            .ok_or(InboundError::Unrouted { method, url })
    }
}

impl std::fmt::Debug for Subscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribe")
            .field("alias", &self.alias)
            .field("subject", &self.subject)
            .field("queue_group", &self.queue_group)
            .field("state", &self.state())
            .finish()
    }
}

/// Build the HTTP request a delivery is dispatched as.
pub fn synthetic_request(msg: &BridgeMessage, method: &str, url: &str) -> Result<http::Request<Body>, InboundError> {
    let method = Method::from_bytes(method.as_bytes()).map_err(|_| InboundError::Method(method.to_string()))?;
    let uri: Uri = url.parse().map_err(|_| InboundError::Url(url.to_string()))?;
    let authority = uri
        .authority()
        .cloned()
        .ok_or_else(|| InboundError::Url(url.to_string()))?;

    let mut req = http::Request::new(Body::from(msg.payload.clone()));
    *req.method_mut() = method;
    *req.uri_mut() = uri;

    let headers = req.headers_mut();
    for (name, values) in msg.headers.iter() {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(name.clone(), value);
            }
        }
    }
    if !headers.contains_key(header::HOST) {
        if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
            headers.insert(header::HOST, host);
        }
    }
    headers.append(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));

    Ok(req)
}
