//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_messages_published_total` (counter): publish stage outcomes by alias
//! - `bridge_requests_total` (counter): request stage outcomes by alias
//! - `bridge_request_duration_seconds` (histogram): request-reply latency by alias
//! - `bridge_inbound_messages_total` (counter): subscription deliveries by subject
//! - `bridge_bodies_offloaded_total` (counter): bodies moved to a blob bucket
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so tests and
//!   configs without `metrics_enabled` pay nothing
//! - Labels stay low-cardinality: alias, configured subject pattern, bucket

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint started");
    Ok(())
}

pub fn record_publish(alias: &str, outcome: &'static str) {
    counter!(
        "bridge_messages_published_total",
        "alias" => alias.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_request(alias: &str, outcome: &'static str, start: Instant) {
    histogram!("bridge_request_duration_seconds", "alias" => alias.to_string())
        .record(start.elapsed().as_secs_f64());
    counter!(
        "bridge_requests_total",
        "alias" => alias.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_inbound(subject: &str, outcome: &'static str) {
    counter!(
        "bridge_inbound_messages_total",
        "subject" => subject.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_offload(bucket: &str) {
    counter!("bridge_bodies_offloaded_total", "bucket" => bucket.to_string()).increment(1);
}
