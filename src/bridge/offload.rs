//! Body offload stage.
//!
//! # Responsibilities
//! - Buffer the whole request body
//! - Store non-empty bodies in a blob bucket under a fresh id
//! - Record bucket and id as side-channel headers
//! - Hand an empty body to the rest of the chain
//!
//! Must run before `publish`/`request` in a route's chain; nothing enforces
//! the ordering.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::bridge::{BridgeError, ExtraHeaders, BODY_BUCKET_HEADER, BODY_ID_HEADER};
use crate::config::DEFAULT_OFFLOAD_BUCKET;
use crate::observability::metrics;
use crate::registry::ConnectionRegistry;

/// Provisioned offload stage.
#[derive(Debug)]
pub struct BodyOffload {
    registry: Arc<ConnectionRegistry>,
    alias: String,
    bucket: Option<String>,
    ttl: Duration,
}

impl BodyOffload {
    pub fn new(registry: Arc<ConnectionRegistry>, alias: impl Into<String>, bucket: Option<String>, ttl: Duration) -> Self {
        Self {
            registry,
            alias: alias.into(),
            bucket,
            ttl,
        }
    }

    /// Move the body of `req` to the blob store.
    ///
    /// The bucket is the stage's own, else the broker's `large_body_bucket`,
    /// else `LargeHttpRequestBodies`.
    pub async fn offload(&self, req: Request<Body>) -> Result<Request<Body>, BridgeError> {
        let (mut parts, body) = req.into_parts();
        let bytes = to_bytes(body, usize::MAX)
            .await
            .map_err(|e| BridgeError::Body(e.to_string()))?;

        if bytes.is_empty() {
            return Ok(Request::from_parts(parts, Body::empty()));
        }

        let broker = self.registry.resolve(&self.alias)?;
        let bucket = self
            .bucket
            .as_deref()
            .or(broker.large_body_bucket())
            .unwrap_or(DEFAULT_OFFLOAD_BUCKET)
            .to_string();

        let store = broker.blob_store(&bucket, self.ttl).await?;
        let id = Uuid::new_v4().simple().to_string();
        let size = bytes.len();
        store.put(&id, bytes).await?;

        tracing::debug!(alias = %self.alias, bucket = %bucket, id = %id, size, "Request body offloaded");
        metrics::record_offload(&bucket);

        ExtraHeaders::set(&mut parts.extensions, BODY_BUCKET_HEADER, bucket);
        ExtraHeaders::set(&mut parts.extensions, BODY_ID_HEADER, id);
        Ok(Request::from_parts(parts, Body::empty()))
    }
}

/// Middleware entry point.
pub async fn offload_body(State(stage): State<Arc<BodyOffload>>, req: Request<Body>, next: Next) -> Response {
    match stage.offload(req).await {
        Ok(req) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}
