//! Protocol bridge stages.
//!
//! # Data Flow
//! ```text
//! HTTP request (per route, in configured order)
//!     → offload.rs   body → blob bucket, bucket + id → ExtraHeaders
//!     → publish.rs   build_message → Connection::publish → next stage
//!     → request.rs   build_message → Connection::request → HTTP response
//!
//! Broker delivery
//!     → subscribe.rs templates → synthetic request → virtual host
//!     → recorded response → reply message (if a reply address is set)
//! ```
//!
//! # Design Decisions
//! - Stages resolve their broker alias per call, so an unknown alias
//!   surfaces as an error on first use rather than at load time
//! - Side-channel headers ride in request extensions and are emitted with
//!   their exact casing; HTTP headers are re-emitted in canonical form
//! - The three `X-NatsBridge-*` request headers are always appended last

pub mod offload;
pub mod publish;
pub mod request;
pub mod subscribe;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::request::Parts;
use axum::http::{Extensions, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::registry::RegistryError;
use crate::template::vars::decoded_path;
use crate::transport::{BlobStoreError, BridgeMessage, MessageHeaders, TransportError};

pub use offload::BodyOffload;
pub use publish::Publish;
pub use request::Request;
pub use subscribe::{Subscribe, SubscribeState};

pub const METHOD_HEADER: &str = "X-NatsBridge-Method";
pub const URL_PATH_HEADER: &str = "X-NatsBridge-UrlPath";
pub const URL_QUERY_HEADER: &str = "X-NatsBridge-UrlQuery";
pub const BODY_BUCKET_HEADER: &str = "X-NatsBridge-Body-Bucket";
pub const BODY_ID_HEADER: &str = "X-NatsBridge-Body-Id";

/// Errors a bridge stage can surface to the HTTP caller.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    BlobStore(#[from] BlobStoreError),

    #[error("could not read request body: {0}")]
    Body(String),
}

impl BridgeError {
    pub fn status(&self) -> StatusCode {
        match self {
            BridgeError::Transport(TransportError::NoResponders(_)) => StatusCode::NOT_FOUND,
            BridgeError::Transport(TransportError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            BridgeError::Transport(_) => StatusCode::BAD_GATEWAY,
            BridgeError::Registry(_) | BridgeError::BlobStore(_) | BridgeError::Body(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::NOT_FOUND {
            tracing::warn!(error = %self, "No responders");
        } else {
            tracing::error!(error = %self, status = status.as_u16(), "Bridge stage failed");
        }
        (status, self.to_string()).into_response()
    }
}

/// Headers that must reach the message with their exact casing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraHeaders(BTreeMap<String, String>);

impl ExtraHeaders {
    /// Record `name: value` on the request, creating the map on first write.
    pub fn set(extensions: &mut Extensions, name: impl Into<String>, value: impl Into<String>) {
        match extensions.get_mut::<ExtraHeaders>() {
            Some(extra) => {
                extra.0.insert(name.into(), value.into());
            }
            None => {
                let mut extra = ExtraHeaders::default();
                extra.0.insert(name.into(), value.into());
                extensions.insert(extra);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// `content-type` → `Content-Type`.
pub fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}

/// Build the outbound message for an HTTP request.
///
/// With `passthrough`, every HTTP header and side-channel entry is copied;
/// without it the message carries only the three synthesized headers.
pub fn build_message(parts: &Parts, body: Bytes, subject: String, passthrough: bool) -> BridgeMessage {
    let mut headers = MessageHeaders::new();
    if passthrough {
        for (name, value) in parts.headers.iter() {
            headers.append(
                canonical_header_name(name.as_str()),
                String::from_utf8_lossy(value.as_bytes()),
            );
        }
        if let Some(extra) = parts.extensions.get::<ExtraHeaders>() {
            for (name, value) in extra.iter() {
                headers.append(name, value);
            }
        }
    }
    headers.append(METHOD_HEADER, parts.method.as_str());
    headers.append(URL_PATH_HEADER, decoded_path(&parts.uri));
    headers.append(URL_QUERY_HEADER, parts.uri.query().unwrap_or_default());

    BridgeMessage::new(subject, body).with_headers(headers)
}

/// A provisioned bridge stage.
#[derive(Clone)]
pub enum BridgeRule {
    BodyOffload(Arc<BodyOffload>),
    Publish(Arc<Publish>),
    Request(Arc<Request>),
    Subscribe(Arc<Subscribe>),
}

impl BridgeRule {
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeRule::BodyOffload(_) => "body_offload",
            BridgeRule::Publish(_) => "publish",
            BridgeRule::Request(_) => "request",
            BridgeRule::Subscribe(_) => "subscribe",
        }
    }

    /// True for stages that produce the HTTP response themselves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BridgeRule::Request(_))
    }

    /// Wrap `router` with this stage as middleware.
    ///
    /// Terminal and inbound stages are not middleware and leave it untouched.
    pub fn layer_onto(&self, router: axum::Router) -> axum::Router {
        match self {
            BridgeRule::BodyOffload(stage) => {
                router.layer(from_fn_with_state(stage.clone(), offload::offload_body))
            }
            BridgeRule::Publish(stage) => {
                router.layer(from_fn_with_state(stage.clone(), publish::publish_message))
            }
            BridgeRule::Request(_) | BridgeRule::Subscribe(_) => router,
        }
    }
}

impl std::fmt::Debug for BridgeRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BridgeRule").field(&self.kind()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn parts(uri: &str) -> Parts {
        let (parts, _) = axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "text/plain")
            .body(Body::empty())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn test_canonical_header_name() {
        assert_eq!(canonical_header_name("content-type"), "Content-Type");
        assert_eq!(canonical_header_name("x-natsbridge-body-id"), "X-Natsbridge-Body-Id");
        assert_eq!(canonical_header_name("accept"), "Accept");
    }

    #[test]
    fn test_build_message_with_passthrough() {
        let mut parts = parts("/foo/bar?x=1");
        ExtraHeaders::set(&mut parts.extensions, BODY_ID_HEADER, "abc");
        ExtraHeaders::set(&mut parts.extensions, METHOD_HEADER, "spoofed");

        let msg = build_message(&parts, Bytes::from_static(b"hi"), "foo.bar".into(), true);
        assert_eq!(msg.subject, "foo.bar");
        assert_eq!(msg.payload, Bytes::from_static(b"hi"));
        assert_eq!(msg.headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(msg.headers.get(BODY_ID_HEADER), Some("abc"));
        assert_eq!(msg.headers.get(URL_PATH_HEADER), Some("/foo/bar"));
        assert_eq!(msg.headers.get(URL_QUERY_HEADER), Some("x=1"));
        // side-channel value first, synthesized value appended after it
        assert_eq!(
            msg.headers.get_all(METHOD_HEADER),
            ["spoofed".to_string(), "POST".to_string()]
        );
    }

    #[test]
    fn test_url_path_header_is_decoded() {
        let msg = build_message(&parts("/foo%20bar/baz?q=a%20b"), Bytes::new(), "s".into(), false);
        assert_eq!(msg.headers.get(URL_PATH_HEADER), Some("/foo bar/baz"));
        // the query stays raw
        assert_eq!(msg.headers.get(URL_QUERY_HEADER), Some("q=a%20b"));
    }

    #[test]
    fn test_build_message_without_passthrough() {
        let mut parts = parts("/foo");
        ExtraHeaders::set(&mut parts.extensions, BODY_ID_HEADER, "abc");

        let msg = build_message(&parts, Bytes::new(), "foo".into(), false);
        assert_eq!(msg.headers.len(), 3);
        assert_eq!(msg.headers.get(METHOD_HEADER), Some("POST"));
        assert_eq!(msg.headers.get(URL_QUERY_HEADER), Some(""));
        assert_eq!(msg.headers.get("Content-Type"), None);
    }

    #[test]
    fn test_extra_headers_created_on_first_write() {
        let mut ext = Extensions::new();
        assert!(ext.get::<ExtraHeaders>().is_none());
        ExtraHeaders::set(&mut ext, "A", "1");
        ExtraHeaders::set(&mut ext, "B", "2");
        let extra = ext.get::<ExtraHeaders>().unwrap();
        assert_eq!(extra.get("A"), Some("1"));
        assert_eq!(extra.iter().count(), 2);
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (BridgeError::Transport(TransportError::NoResponders("s".into())), 404),
            (
                BridgeError::Transport(TransportError::Timeout {
                    subject: "s".into(),
                    timeout: std::time::Duration::from_secs(1),
                }),
                504,
            ),
            (BridgeError::Transport(TransportError::Closed), 502),
            (BridgeError::Registry(RegistryError::UnknownAlias("x".into())), 500),
            (BridgeError::Body("eof".into()), 500),
        ];
        for (err, status) in cases {
            assert_eq!(err.status().as_u16(), status, "{}", err);
        }
    }
}
