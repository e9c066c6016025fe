//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::sync::Arc;

use nats_http_bridge::config::parse_config;
use nats_http_bridge::lifecycle::BridgeApp;
use nats_http_bridge::transport::memory::MemoryConnection;
use nats_http_bridge::transport::{BridgeMessage, Connection, MemoryTransport, MessageHeaders};

/// Provision a bridge from TOML over a fresh in-memory broker.
///
/// The returned transport shares the broker, so `transport.connection()`
/// acts as another client on the same bus.
pub async fn memory_app(toml: &str) -> (BridgeApp, MemoryTransport) {
    let config = parse_config(toml).unwrap();
    let transport = MemoryTransport::new();
    let app = BridgeApp::provision(&config, &transport).await.unwrap();
    (app, transport)
}

/// Answer every request on `subject` with `f(request)`.
pub async fn spawn_responder<F>(transport: &MemoryTransport, subject: &str, f: F)
where
    F: Fn(&BridgeMessage) -> (MessageHeaders, String) + Send + Sync + 'static,
{
    let conn: Arc<MemoryConnection> = transport.connection();
    let mut sub = conn.subscribe(subject, None).await.unwrap();
    tokio::spawn(async move {
        while let Some(msg) = sub.next().await {
            let Some(reply) = msg.reply.clone() else { continue };
            let (headers, body) = f(&msg);
            let _ = conn
                .publish(BridgeMessage::new(reply, body).with_headers(headers))
                .await;
        }
    });
}
