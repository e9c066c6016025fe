//! Request stage: HTTP request → request-reply message → HTTP response.
//!
//! # Responsibilities
//! - Send the message and wait for one reply, bounded by the stage timeout
//! - Turn the reply into the HTTP response (headers and payload, status 200)
//! - Map no-responders to 404 and other failures to 5xx
//!
//! Terminal: the rest of the chain never runs after this stage.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{self, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};

use crate::bridge::{build_message, BridgeError};
use crate::observability::metrics;
use crate::registry::ConnectionRegistry;
use crate::template::{HttpVars, Template};
use crate::transport::{BridgeMessage, TransportError};

/// Provisioned request stage.
#[derive(Debug)]
pub struct Request {
    registry: Arc<ConnectionRegistry>,
    alias: String,
    subject: Template,
    timeout: Duration,
    headers: bool,
}

impl Request {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        alias: impl Into<String>,
        subject: Template,
        timeout: Duration,
        headers: bool,
    ) -> Self {
        Self {
            registry,
            alias: alias.into(),
            subject,
            timeout,
            headers,
        }
    }

    pub async fn request(&self, req: http::Request<Body>) -> Result<Response, BridgeError> {
        let broker = self.registry.resolve(&self.alias)?;

        let (parts, body) = req.into_parts();
        let bytes = to_bytes(body, usize::MAX)
            .await
            .map_err(|e| BridgeError::Body(e.to_string()))?;

        let subject = self.subject.render(&HttpVars::from_parts(&parts));
        tracing::debug!(alias = %self.alias, subject = %subject, timeout = ?self.timeout, "Sending request");

        let msg = build_message(&parts, bytes, subject, self.headers);
        let start = Instant::now();
        match broker.connection().request(msg, self.timeout).await {
            Ok(reply) => {
                metrics::record_request(&self.alias, "ok", start);
                Ok(reply_to_response(reply))
            }
            Err(e) => {
                let outcome = match &e {
                    TransportError::NoResponders(_) => "no_responders",
                    TransportError::Timeout { .. } => "timeout",
                    _ => "error",
                };
                metrics::record_request(&self.alias, outcome, start);
                Err(e.into())
            }
        }
    }
}

/// Copy reply headers and payload into a 200 response.
///
/// Names or values HTTP cannot carry are skipped.
pub fn reply_to_response(reply: BridgeMessage) -> Response {
    let mut response = Response::new(Body::from(reply.payload));
    let headers = response.headers_mut();
    for (name, values) in reply.headers.iter() {
        let Ok(header) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::debug!(header = %name, "Skipping reply header with invalid name");
            continue;
        };
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.append(header.clone(), value);
                }
                Err(_) => tracing::debug!(header = %name, "Skipping reply header with invalid value"),
            }
        }
    }
    response
}

/// Terminal handler entry point.
pub async fn serve_request(State(stage): State<Arc<Request>>, req: http::Request<Body>) -> Response {
    match stage.request(req).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BrokerConnection;
    use crate::transport::{Connection, MemoryTransport, MessageHeaders};
    use axum::body::Bytes;
    use axum::http::StatusCode;

    fn stage(transport: &MemoryTransport, timeout: Duration) -> Request {
        let mut registry = ConnectionRegistry::new();
        registry.insert(BrokerConnection::new("default", transport.connection()));
        Request::new(
            Arc::new(registry),
            "default",
            Template::parse("{path.asSubject}").unwrap(),
            timeout,
            true,
        )
    }

    fn get(path: &str) -> http::Request<Body> {
        http::Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_no_responders_is_404() {
        let transport = MemoryTransport::new();
        let stage = stage(&transport, Duration::from_secs(1));
        let err = stage.request(get("/nobody/home")).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_timeout_is_504() {
        let transport = MemoryTransport::new();
        let _silent = transport.connection().subscribe("slow", None).await.unwrap();
        let stage = stage(&transport, Duration::from_millis(20));
        let err = stage.request(get("/slow")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_reply_becomes_response() {
        let transport = MemoryTransport::new();
        let responder = transport.connection();
        let mut sub = responder.subscribe("greet.joe", None).await.unwrap();
        tokio::spawn(async move {
            let msg = sub.next().await.unwrap();
            let headers: MessageHeaders = [("RespHeader", "V")].into_iter().collect();
            let reply = BridgeMessage::new(msg.reply.unwrap(), "respData").with_headers(headers);
            responder.publish(reply).await.unwrap();
        });

        let stage = stage(&transport, Duration::from_secs(1));
        let response = stage.request(get("/greet/joe")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("RespHeader").unwrap(), "V");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, Bytes::from_static(b"respData"));
    }

    #[test]
    fn test_reply_headers_keep_multiple_values() {
        let mut headers = MessageHeaders::new();
        headers.append("X-Multi", "a");
        headers.append("X-Multi", "b");
        headers.append("Bad Name", "skipped");
        let response = reply_to_response(BridgeMessage::new("_INBOX.1", "").with_headers(headers));

        let values: Vec<_> = response.headers().get_all("x-multi").iter().collect();
        assert_eq!(values, ["a", "b"]);
        assert_eq!(response.headers().len(), 2);
    }
}
