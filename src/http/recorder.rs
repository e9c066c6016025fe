//! Response capture for subscription dispatch.
//!
//! # Responsibilities
//! - Buffer status, headers and body of a handler response
//! - Turn a recorded response into a reply message
//! - Drain a response nobody will read, however large

use axum::body::{to_bytes, Bytes};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use futures_util::StreamExt;

use crate::transport::{BridgeMessage, MessageHeaders};

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct RecordedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedResponse {
    pub async fn record(response: Response) -> Result<Self, axum::Error> {
        let (parts, body) = response.into_parts();
        let body = to_bytes(body, usize::MAX).await?;
        Ok(Self {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    /// Reply message to `subject`: every header value plus the body.
    ///
    /// The status is not carried.
    pub fn into_message(self, subject: impl Into<String>) -> BridgeMessage {
        let mut headers = MessageHeaders::new();
        for (name, value) in self.headers.iter() {
            headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        BridgeMessage::new(subject, self.body).with_headers(headers)
    }
}

/// Consume a response body without keeping it.
pub async fn discard(response: Response) {
    let mut stream = response.into_body().into_data_stream();
    while let Some(chunk) = stream.next().await {
        if chunk.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn test_record_into_message() {
        let mut response = Response::new(Body::from("resp"));
        *response.status_mut() = StatusCode::CREATED;
        response
            .headers_mut()
            .append("set-cookie", HeaderValue::from_static("a=1"));
        response
            .headers_mut()
            .append("set-cookie", HeaderValue::from_static("b=2"));

        let recorded = RecordedResponse::record(response).await.unwrap();
        assert_eq!(recorded.status, StatusCode::CREATED);

        let msg = recorded.into_message("_INBOX.abc");
        assert_eq!(msg.subject, "_INBOX.abc");
        assert_eq!(msg.payload, Bytes::from_static(b"resp"));
        assert_eq!(
            msg.headers.get_all("set-cookie"),
            ["a=1".to_string(), "b=2".to_string()]
        );
        assert!(msg.reply.is_none());
    }

    #[tokio::test]
    async fn test_discard_large_body() {
        let response = Response::new(Body::from(vec![0u8; 4 * 1024 * 1024]));
        discard(response).await;
    }
}
