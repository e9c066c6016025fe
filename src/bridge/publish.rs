//! Publish stage: HTTP request → fire-and-forget message.
//!
//! Runs as middleware. After publishing, the request (with its body
//! restored) continues down the chain.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::bridge::{build_message, BridgeError};
use crate::observability::metrics;
use crate::registry::ConnectionRegistry;
use crate::template::{HttpVars, Template};

/// Provisioned publish stage.
#[derive(Debug)]
pub struct Publish {
    registry: Arc<ConnectionRegistry>,
    alias: String,
    subject: Template,
    headers: bool,
}

impl Publish {
    pub fn new(registry: Arc<ConnectionRegistry>, alias: impl Into<String>, subject: Template, headers: bool) -> Self {
        Self {
            registry,
            alias: alias.into(),
            subject,
            headers,
        }
    }

    /// Publish a message for `req` and return the request for the next stage.
    pub async fn publish(&self, req: Request<Body>) -> Result<Request<Body>, BridgeError> {
        let broker = self.registry.resolve(&self.alias)?;

        let (parts, body) = req.into_parts();
        let bytes = to_bytes(body, usize::MAX)
            .await
            .map_err(|e| BridgeError::Body(e.to_string()))?;

        let subject = self.subject.render(&HttpVars::from_parts(&parts));
        tracing::debug!(alias = %self.alias, subject = %subject, "Publishing message");

        let msg = build_message(&parts, bytes.clone(), subject, self.headers);
        match broker.connection().publish(msg).await {
            Ok(()) => metrics::record_publish(&self.alias, "ok"),
            Err(e) => {
                metrics::record_publish(&self.alias, "error");
                return Err(e.into());
            }
        }

        Ok(Request::from_parts(parts, Body::from(bytes)))
    }
}

/// Middleware entry point.
pub async fn publish_message(State(stage): State<Arc<Publish>>, req: Request<Body>, next: Next) -> Response {
    match stage.publish(req).await {
        Ok(req) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}
