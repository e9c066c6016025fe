//! Log forwarding to a broker subject.
//!
//! # Data Flow
//! ```text
//! tracing event
//!     → JSON fmt layer → ForwardWriter (one line per event)
//!     → unbounded channel (buffers until the registry is up)
//!     → LogBacklog::start task → Connection::publish(subject, line)
//! ```
//!
//! # Design Decisions
//! - Events from the transport and from this module are never forwarded:
//!   a failing publish must not produce another line to publish
//! - Writes never block or fail the caller; lines are dropped once the
//!   forwarding task is gone

use std::io;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::Metadata;
use tracing_subscriber::fmt::MakeWriter;

use crate::registry::ConnectionRegistry;
use crate::transport::BridgeMessage;

/// Targets whose events stay local.
const LOCAL_TARGETS: &[&str] = &[
    "nats_http_bridge::transport",
    "nats_http_bridge::observability::forward",
    "async_nats",
];

/// True if an event may be forwarded.
pub fn is_forwardable(metadata: &Metadata<'_>) -> bool {
    !LOCAL_TARGETS
        .iter()
        .any(|target| metadata.target().starts_with(target))
}

/// Writer side handed to the fmt layer.
#[derive(Debug, Clone)]
pub struct ForwardWriter {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl io::Write for ForwardWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let line = buf.strip_suffix(b"\n").unwrap_or(buf);
        if !line.is_empty() {
            let _ = self.tx.send(Bytes::copy_from_slice(line));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for ForwardWriter {
    type Writer = ForwardWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Lines written so far, waiting for a connection.
#[derive(Debug)]
pub struct LogBacklog {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

/// Create a connected writer and backlog.
pub fn channel() -> (ForwardWriter, LogBacklog) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ForwardWriter { tx }, LogBacklog { rx })
}

impl LogBacklog {
    /// Publish buffered and future lines to `subject` on `alias`.
    ///
    /// On shutdown the lines already queued are flushed before the task ends.
    pub fn start(
        mut self,
        registry: &ConnectionRegistry,
        alias: &str,
        subject: String,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<JoinHandle<()>, crate::registry::RegistryError> {
        let broker = registry.resolve(alias)?;
        let conn = broker.connection().clone();
        tracing::info!(alias = %alias, subject = %subject, "Forwarding logs");

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    line = self.rx.recv() => match line {
                        Some(line) => forward(conn.as_ref(), &subject, line).await,
                        None => break,
                    },
                    _ = shutdown.recv() => {
                        while let Ok(line) = self.rx.try_recv() {
                            forward(conn.as_ref(), &subject, line).await;
                        }
                        break;
                    }
                }
            }
        }))
    }
}

async fn forward(conn: &dyn crate::transport::Connection, subject: &str, line: Bytes) {
    if let Err(e) = conn.publish(BridgeMessage::new(subject, line)).await {
        tracing::debug!(subject = %subject, error = %e, "Dropping log line");
    }
}
