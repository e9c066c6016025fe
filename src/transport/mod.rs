//! Broker transport subsystem.
//!
//! # Data Flow
//! ```text
//! BrokerConfig
//!     → ConnectOptions (urls, auth, client name, inbox prefix)
//!     → Transport::connect (once per alias, at startup)
//!     → Arc<dyn Connection> shared by every bridge stage on that alias
//!
//! Connection:
//!     publish(msg)                 fire-and-forget
//!     request(msg, timeout)        → reply | NoResponders | Timeout
//!     subscribe(subject, group)    → Box<dyn Subscription>
//!     blob_bucket / create_blob_bucket → Arc<dyn BlobStore>
//! ```
//!
//! # Design Decisions
//! - The bridge only sees these traits; wire protocol, auth and reconnects
//!   belong to the implementation
//! - `memory` is a complete in-process broker (tests, standalone runs)
//! - `nats` (feature `nats`) talks to a real NATS server via `async-nats`
//! - Nothing in this module emits log events on the publish path, so log
//!   lines can be forwarded over a connection without feeding back

pub mod memory;
pub mod message;
#[cfg(feature = "nats")]
pub mod nats;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use memory::{MemoryBroker, MemoryTransport};
pub use message::{BridgeMessage, MessageHeaders};

/// Errors raised by a transport or connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("invalid connect options: {0}")]
    Options(String),

    #[error("no responders available for subject {0}")]
    NoResponders(String),

    #[error("request on subject {subject} timed out after {timeout:?}")]
    Timeout { subject: String, timeout: Duration },

    #[error("could not publish to {subject}: {reason}")]
    Publish { subject: String, reason: String },

    #[error("could not subscribe to {subject}: {reason}")]
    Subscribe { subject: String, reason: String },

    #[error("connection closed")]
    Closed,
}

/// Errors raised by a blob store.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("bucket {0} does not exist")]
    BucketNotFound(String),

    #[error("object {key} not found in bucket {bucket}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("bucket {bucket} TTL mismatch: current {current:?}, configured {configured:?}")]
    TtlMismatch {
        bucket: String,
        current: Duration,
        configured: Duration,
    },

    #[error("blob store backend error: {0}")]
    Backend(String),
}

/// Authentication handed to the transport. The two file kinds are exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Auth {
    #[default]
    None,
    /// User JWT credentials file.
    CredentialsFile(PathBuf),
    /// NKey seed file.
    NkeySeedFile(PathBuf),
}

/// Options for establishing a connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub urls: Vec<String>,
    pub auth: Auth,
    pub client_name: Option<String>,
    pub inbox_prefix: Option<String>,
}

/// Creates connections.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn Connection>, TransportError>;
}

/// A live broker connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Publish without expecting a reply. `msg.reply` is forwarded as-is.
    async fn publish(&self, msg: BridgeMessage) -> Result<(), TransportError>;

    /// Publish and wait up to `timeout` for a single reply.
    async fn request(&self, msg: BridgeMessage, timeout: Duration) -> Result<BridgeMessage, TransportError>;

    /// Subscribe to `subject`, optionally as a member of `queue_group`.
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<Box<dyn Subscription>, TransportError>;

    /// Open an existing blob bucket; `Ok(None)` if it does not exist.
    async fn blob_bucket(&self, bucket: &str) -> Result<Option<Arc<dyn BlobStore>>, BlobStoreError>;

    /// Create a blob bucket whose objects expire after `ttl`.
    async fn create_blob_bucket(&self, bucket: &str, ttl: Duration) -> Result<Arc<dyn BlobStore>, BlobStoreError>;

    /// Server URL this connection is attached to (credentials redacted).
    fn connected_url(&self) -> String;

    /// Flush and close the connection.
    async fn close(&self);
}

/// A stream of deliveries for one subscription.
#[async_trait]
pub trait Subscription: Send {
    /// Next delivery, or `None` once the subscription has ended.
    async fn next(&mut self) -> Option<BridgeMessage>;

    /// Stop new deliveries. Messages already buffered are still returned
    /// by `next` before it yields `None`.
    async fn drain(&mut self) -> Result<(), TransportError>;
}

/// Object storage with a bucket-wide TTL.
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// The TTL the bucket was created with.
    async fn ttl(&self) -> Result<Duration, BlobStoreError>;

    async fn put(&self, key: &str, data: Bytes) -> Result<(), BlobStoreError>;

    async fn get(&self, key: &str) -> Result<Bytes, BlobStoreError>;
}
