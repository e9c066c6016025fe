//! End-to-end flows over the in-memory broker.

use std::time::Duration;

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{Request, StatusCode};
use nats_http_bridge::bridge::subscribe::Dispatcher;
use nats_http_bridge::bridge::{
    SubscribeState, BODY_BUCKET_HEADER, BODY_ID_HEADER, METHOD_HEADER, URL_PATH_HEADER, URL_QUERY_HEADER,
};
use nats_http_bridge::config::DEFAULT_OFFLOAD_BUCKET;
use nats_http_bridge::transport::{BlobStore, BridgeMessage, Connection, MessageHeaders, TransportError};

mod common;

async fn body_of(response: axum::response::Response) -> Bytes {
    to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

#[tokio::test]
async fn test_publish_then_respond() {
    let (app, transport) = common::memory_app(
        r#"
        transport = "memory"
        [[brokers]]

        [[servers]]
        name = "api"
        listen = ["127.0.0.1:8080"]

        [[servers.routes]]
        name = "events"
        path_prefix = "/events"
        handle = [
            { handler = "publish", subject = "http.{path.asSubject}" },
            { handler = "respond", status = 202, body = "queued" },
        ]
        "#,
    )
    .await;
    let mut sub = transport.connection().subscribe("http.>", None).await.unwrap();

    let req = Request::builder()
        .method("POST")
        .uri("http://127.0.0.1:8080/events/created?id=7")
        .header("content-type", "text/plain")
        .body(Body::from("hello"))
        .unwrap();
    let response = app.hosts().dispatch(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_of(response).await, Bytes::from_static(b"queued"));

    let msg = sub.next().await.unwrap();
    assert_eq!(msg.subject, "http.events.created");
    assert_eq!(msg.headers.get(METHOD_HEADER), Some("POST"));
    assert_eq!(msg.headers.get(URL_PATH_HEADER), Some("/events/created"));
    assert_eq!(msg.headers.get(URL_QUERY_HEADER), Some("id=7"));
    assert_eq!(msg.headers.get("Content-Type"), Some("text/plain"));
    assert_eq!(msg.payload, Bytes::from_static(b"hello"));
}

#[tokio::test]
async fn test_request_reply_and_no_responders() {
    let (app, transport) = common::memory_app(
        r#"
        transport = "memory"
        [[brokers]]

        [[servers]]
        name = "api"
        listen = ["127.0.0.1:8080"]

        [[servers.routes]]
        name = "rpc"
        path_prefix = "/rpc"
        handle = [{ handler = "request", subject = "rpc.{path.asSubject.1:}" }]
        "#,
    )
    .await;
    common::spawn_responder(&transport, "rpc.ping", |msg| {
        let headers: MessageHeaders = [("X-Answer", "42")].into_iter().collect();
        (headers, format!("pong {}", String::from_utf8_lossy(&msg.payload)))
    })
    .await;

    let req = Request::builder()
        .method("PUT")
        .uri("http://127.0.0.1:8080/rpc/ping")
        .body(Body::from("1"))
        .unwrap();
    let response = app.hosts().dispatch(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-answer").unwrap(), "42");
    assert_eq!(body_of(response).await, Bytes::from_static(b"pong 1"));

    let req = Request::builder()
        .uri("http://127.0.0.1:8080/rpc/nobody")
        .body(Body::empty())
        .unwrap();
    let response = app.hosts().dispatch(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_offloaded_body_travels_by_reference() {
    let (app, transport) = common::memory_app(
        r#"
        transport = "memory"
        [[brokers]]

        [[servers]]
        name = "api"
        listen = ["127.0.0.1:8080"]

        [[servers.routes]]
        name = "upload"
        handle = [
            { handler = "body_offload", ttl_secs = 60 },
            { handler = "publish", subject = "uploads" },
        ]
        "#,
    )
    .await;
    let client = transport.connection();
    let mut sub = client.subscribe("uploads", None).await.unwrap();

    let req = Request::builder()
        .method("POST")
        .uri("http://127.0.0.1:8080/upload")
        .body(Body::from("a rather large body"))
        .unwrap();
    let response = app.hosts().dispatch(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let msg = sub.next().await.unwrap();
    assert!(msg.payload.is_empty());
    assert_eq!(msg.headers.get(BODY_BUCKET_HEADER), Some(DEFAULT_OFFLOAD_BUCKET));
    let id = msg.headers.get(BODY_ID_HEADER).unwrap();

    let store = client.blob_bucket(DEFAULT_OFFLOAD_BUCKET).await.unwrap().unwrap();
    assert_eq!(store.ttl().await.unwrap(), Duration::from_secs(60));
    assert_eq!(store.get(id).await.unwrap(), Bytes::from_static(b"a rather large body"));
}

#[tokio::test]
async fn test_subscription_dispatches_into_http_chain() {
    let (mut app, transport) = common::memory_app(
        r#"
        transport = "memory"

        [[brokers]]
        [[brokers.subscribe]]
        subject = "inbound.>"
        method = "POST"
        url = "http://127.0.0.1:28631/{subject.asPath}"

        [[servers]]
        name = "api"
        listen = ["127.0.0.1:28631"]

        [[servers.routes]]
        name = "inbound"
        path_prefix = "/inbound/orders"
        methods = ["POST"]
        handle = [{ handler = "request", subject = "backend.{path.asSubject.1:}" }]
        "#,
    )
    .await;
    common::spawn_responder(&transport, "backend.orders", |msg| {
        let headers: MessageHeaders = [("X-Backend", "orders")].into_iter().collect();
        let method = msg.headers.get(METHOD_HEADER).unwrap_or_default().to_string();
        (headers, format!("{} {}", method, String::from_utf8_lossy(&msg.payload)))
    })
    .await;

    app.start().await.unwrap();
    assert_eq!(app.subscriptions()[0].state(), SubscribeState::Subscribed);

    let client = transport.connection();
    let reply = client
        .request(BridgeMessage::new("inbound.orders", "new order"), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(reply.payload, Bytes::from_static(b"POST new order"));
    assert_eq!(reply.headers.get("x-backend"), Some("orders"));

    // no route accepts the target: dropped, never answered
    let err = client
        .request(BridgeMessage::new("inbound.lost", "lost"), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Timeout { .. }));

    let subscriptions = app.subscriptions().to_vec();
    app.stop().await;
    assert_eq!(subscriptions[0].state(), SubscribeState::Unsubscribed);
}

#[tokio::test]
async fn test_live_listener_serves_http() {
    let (mut app, transport) = common::memory_app(
        r#"
        transport = "memory"
        [[brokers]]

        [[servers]]
        name = "api"
        listen = ["127.0.0.1:28632"]

        [[servers.routes]]
        name = "greet"
        path_prefix = "/greet"
        handle = [{ handler = "request", subject = "{path.asSubject}", timeout_ms = 2000 }]
        "#,
    )
    .await;
    common::spawn_responder(&transport, "greet.*", |msg| {
        (MessageHeaders::new(), format!("hello {}", &msg.subject["greet.".len()..]))
    })
    .await;
    app.start().await.unwrap();

    let response = reqwest::get("http://127.0.0.1:28632/greet/joe").await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(&response.bytes().await.unwrap()[..], b"hello joe");

    let response = reqwest::get("http://127.0.0.1:28632/elsewhere").await.unwrap();
    assert_eq!(response.status().as_u16(), 404);

    app.stop().await;
    assert!(reqwest::get("http://127.0.0.1:28632/greet/joe").await.is_err());
}
