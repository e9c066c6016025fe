//! In-process broker.
//!
//! # Responsibilities
//! - Subject routing with `*` (one token) and `>` (one or more trailing tokens)
//! - Queue groups: each message goes to exactly one member (round-robin)
//! - Request-reply over a private inbox subject
//! - Object buckets with a bucket-wide TTL, enforced on read
//!
//! Every connection made through the same [`MemoryTransport`] shares one
//! [`MemoryBroker`], so a test can publish on one connection and observe the
//! delivery on another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    BlobStore, BlobStoreError, BridgeMessage, ConnectOptions, Connection, Subscription, Transport,
    TransportError,
};

const DEFAULT_INBOX_PREFIX: &str = "_INBOX";
const MEMORY_URL: &str = "memory://local";

/// Check a subject against a subscription pattern.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut tokens = subject.split('.');
    let mut filters = pattern.split('.').peekable();

    while let Some(filter) = filters.next() {
        if filter == ">" && filters.peek().is_none() {
            // needs at least one remaining token
            return tokens.next().is_some();
        }
        match tokens.next() {
            Some(token) if filter == "*" || filter == token => {}
            _ => return false,
        }
    }

    tokens.next().is_none()
}

struct SubscriptionEntry {
    subject: String,
    queue_group: Option<String>,
    tx: mpsc::UnboundedSender<BridgeMessage>,
}

/// Shared routing state behind every memory connection.
#[derive(Default)]
pub struct MemoryBroker {
    subscriptions: DashMap<u64, SubscriptionEntry>,
    next_id: AtomicU64,
    group_counters: DashMap<String, AtomicUsize>,
    buckets: DashMap<String, Arc<MemoryBlobStore>>,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> (u64, mpsc::UnboundedReceiver<BridgeMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.insert(
            id,
            SubscriptionEntry {
                subject: subject.to_string(),
                queue_group: queue_group.map(str::to_string),
                tx,
            },
        );
        (id, rx)
    }

    fn unregister(&self, id: u64) {
        self.subscriptions.remove(&id);
    }

    /// Number of live subscriptions, inboxes included.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Route `msg` to every matching subscriber. Returns the delivery count.
    pub fn deliver(&self, msg: BridgeMessage) -> usize {
        let mut direct = Vec::new();
        let mut groups: HashMap<String, Vec<(u64, mpsc::UnboundedSender<BridgeMessage>)>> =
            HashMap::new();
        let mut stale = Vec::new();

        for entry in self.subscriptions.iter() {
            if entry.tx.is_closed() {
                stale.push(*entry.key());
                continue;
            }
            if !subject_matches(&entry.subject, &msg.subject) {
                continue;
            }
            match &entry.queue_group {
                Some(group) => groups
                    .entry(group.clone())
                    .or_default()
                    .push((*entry.key(), entry.tx.clone())),
                None => direct.push(entry.tx.clone()),
            }
        }
        for id in stale {
            self.unregister(id);
        }

        let mut delivered = 0;
        for tx in direct {
            if tx.send(msg.clone()).is_ok() {
                delivered += 1;
            }
        }
        for (group, mut members) in groups {
            members.sort_by_key(|(id, _)| *id);
            let counter = self
                .group_counters
                .entry(group)
                .or_insert_with(|| AtomicUsize::new(0));
            let idx = counter.fetch_add(1, Ordering::Relaxed) % members.len();
            if members[idx].1.send(msg.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

/// [`Transport`] handing out connections to one shared [`MemoryBroker`].
#[derive(Clone, Default)]
pub struct MemoryTransport {
    broker: Arc<MemoryBroker>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_broker(broker: Arc<MemoryBroker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }

    /// A connection with default options.
    pub fn connection(&self) -> Arc<MemoryConnection> {
        Arc::new(MemoryConnection::new(self.broker.clone(), &ConnectOptions::default()))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn Connection>, TransportError> {
        Ok(Arc::new(MemoryConnection::new(self.broker.clone(), options)))
    }
}

/// A connection to a [`MemoryBroker`].
pub struct MemoryConnection {
    broker: Arc<MemoryBroker>,
    url: String,
    inbox_prefix: String,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn new(broker: Arc<MemoryBroker>, options: &ConnectOptions) -> Self {
        Self {
            broker,
            url: options
                .urls
                .first()
                .cloned()
                .unwrap_or_else(|| MEMORY_URL.to_string()),
            inbox_prefix: options
                .inbox_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_INBOX_PREFIX.to_string()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn publish(&self, msg: BridgeMessage) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.broker.deliver(msg);
        Ok(())
    }

    async fn request(&self, mut msg: BridgeMessage, timeout: Duration) -> Result<BridgeMessage, TransportError> {
        self.ensure_open()?;

        let inbox = format!("{}.{}", self.inbox_prefix, Uuid::new_v4().simple());
        let (id, mut rx) = self.broker.register(&inbox, None);
        let subject = msg.subject.clone();
        msg.reply = Some(inbox);

        if self.broker.deliver(msg) == 0 {
            self.broker.unregister(id);
            return Err(TransportError::NoResponders(subject));
        }

        let outcome = tokio::time::timeout(timeout, rx.recv()).await;
        self.broker.unregister(id);

        match outcome {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout { subject, timeout }),
        }
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        self.ensure_open()?;
        let (id, rx) = self.broker.register(subject, queue_group);
        Ok(Box::new(MemorySubscription {
            id,
            rx,
            broker: self.broker.clone(),
        }))
    }

    async fn blob_bucket(&self, bucket: &str) -> Result<Option<Arc<dyn BlobStore>>, BlobStoreError> {
        Ok(self
            .broker
            .buckets
            .get(bucket)
            .map(|store| store.clone() as Arc<dyn BlobStore>))
    }

    async fn create_blob_bucket(&self, bucket: &str, ttl: Duration) -> Result<Arc<dyn BlobStore>, BlobStoreError> {
        let store = self
            .broker
            .buckets
            .entry(bucket.to_string())
            .or_insert_with(|| Arc::new(MemoryBlobStore::new(bucket, ttl)))
            .clone();
        Ok(store)
    }

    fn connected_url(&self) -> String {
        self.url.clone()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct MemorySubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<BridgeMessage>,
    broker: Arc<MemoryBroker>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<BridgeMessage> {
        self.rx.recv().await
    }

    async fn drain(&mut self) -> Result<(), TransportError> {
        self.broker.unregister(self.id);
        self.rx.close();
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.broker.unregister(self.id);
    }
}

/// In-memory object bucket.
pub struct MemoryBlobStore {
    bucket: String,
    ttl: Duration,
    objects: DashMap<String, (Instant, Bytes)>,
}

impl MemoryBlobStore {
    pub fn new(bucket: &str, ttl: Duration) -> Self {
        Self {
            bucket: bucket.to_string(),
            ttl,
            objects: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Drop every object older than the TTL. A zero TTL keeps everything.
    fn evict_expired(&self) {
        if self.ttl.is_zero() {
            return;
        }
        self.objects.retain(|_, (stored_at, _)| stored_at.elapsed() <= self.ttl);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn ttl(&self) -> Result<Duration, BlobStoreError> {
        Ok(self.ttl)
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), BlobStoreError> {
        self.evict_expired();
        self.objects.insert(key.to_string(), (Instant::now(), data));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, BlobStoreError> {
        let not_found = || BlobStoreError::ObjectNotFound {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        };

        let (stored_at, data) = self
            .objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(not_found)?;

        // zero TTL means objects never expire
        if !self.ttl.is_zero() && stored_at.elapsed() > self.ttl {
            self.objects.remove(key);
            return Err(not_found());
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_matches() {
        assert!(subject_matches("foo", "foo"));
        assert!(subject_matches("foo.bar", "foo.bar"));
        assert!(!subject_matches("foo", "foo.bar"));
        assert!(!subject_matches("foo.bar", "foo"));

        assert!(subject_matches("foo.*", "foo.bar"));
        assert!(subject_matches("*.bar", "foo.bar"));
        assert!(!subject_matches("foo.*", "foo.bar.baz"));
        assert!(!subject_matches("foo.*", "foo"));

        assert!(subject_matches("foo.>", "foo.bar"));
        assert!(subject_matches("foo.>", "foo.bar.baz"));
        assert!(!subject_matches("foo.>", "foo"));
        assert!(subject_matches(">", "anything.at.all"));
    }

    #[tokio::test]
    async fn test_publish_reaches_all_plain_subscribers() {
        let transport = MemoryTransport::new();
        let conn = transport.connection();
        let mut a = conn.subscribe("greet.*", None).await.unwrap();
        let mut b = conn.subscribe("greet.joe", None).await.unwrap();

        conn.publish(BridgeMessage::new("greet.joe", "hi")).await.unwrap();

        assert_eq!(a.next().await.unwrap().payload, Bytes::from_static(b"hi"));
        assert_eq!(b.next().await.unwrap().subject, "greet.joe");
    }

    #[tokio::test]
    async fn test_queue_group_delivers_to_exactly_one() {
        let transport = MemoryTransport::new();
        let conn = transport.connection();
        let mut a = conn.subscribe("work", Some("workers")).await.unwrap();
        let mut b = conn.subscribe("work", Some("workers")).await.unwrap();

        for _ in 0..4 {
            conn.publish(BridgeMessage::new("work", "job")).await.unwrap();
        }
        a.drain().await.unwrap();
        b.drain().await.unwrap();

        let mut count_a = 0;
        while a.next().await.is_some() {
            count_a += 1;
        }
        let mut count_b = 0;
        while b.next().await.is_some() {
            count_b += 1;
        }
        assert_eq!(count_a + count_b, 4);
        assert_eq!(count_a, 2, "round-robin spreads evenly");
    }

    #[tokio::test]
    async fn test_request_without_responder() {
        let conn = MemoryTransport::new().connection();
        let err = conn
            .request(BridgeMessage::new("nobody.home", ""), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NoResponders(s) if s == "nobody.home"));
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let conn = MemoryTransport::new().connection();
        let _silent = conn.subscribe("slow", None).await.unwrap();
        let err = conn
            .request(BridgeMessage::new("slow", ""), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_request_reply_round_trip() {
        let transport = MemoryTransport::new();
        let server = transport.connection();
        let client = transport.connection();
        let mut sub = server.subscribe("echo", None).await.unwrap();

        tokio::spawn(async move {
            let msg = sub.next().await.unwrap();
            let reply = BridgeMessage::new(msg.reply.unwrap(), msg.payload);
            server.publish(reply).await.unwrap();
        });

        let reply = client
            .request(BridgeMessage::new("echo", "ping"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.payload, Bytes::from_static(b"ping"));
        assert!(reply.subject.starts_with("_INBOX."));
    }

    #[tokio::test]
    async fn test_drain_keeps_buffered_messages() {
        let conn = MemoryTransport::new().connection();
        let mut sub = conn.subscribe("d", None).await.unwrap();
        conn.publish(BridgeMessage::new("d", "1")).await.unwrap();
        sub.drain().await.unwrap();
        conn.publish(BridgeMessage::new("d", "2")).await.unwrap();

        assert_eq!(sub.next().await.unwrap().payload, Bytes::from_static(b"1"));
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_publish() {
        let conn = MemoryTransport::new().connection();
        conn.close().await;
        let err = conn.publish(BridgeMessage::new("x", "")).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn test_blob_bucket_lifecycle() {
        let conn = MemoryTransport::new().connection();
        assert!(conn.blob_bucket("b").await.unwrap().is_none());

        let store = conn.create_blob_bucket("b", Duration::from_secs(60)).await.unwrap();
        store.put("k", Bytes::from_static(b"v")).await.unwrap();

        let reopened = conn.blob_bucket("b").await.unwrap().unwrap();
        assert_eq!(reopened.get("k").await.unwrap(), Bytes::from_static(b"v"));
        assert_eq!(reopened.ttl().await.unwrap(), Duration::from_secs(60));
        assert!(matches!(
            reopened.get("missing").await,
            Err(BlobStoreError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_put_evicts_expired_objects() {
        let store = MemoryBlobStore::new("b", Duration::from_millis(10));
        for i in 0..100 {
            store.put(&format!("k{}", i), Bytes::from_static(b"v")).await.unwrap();
        }
        assert_eq!(store.len(), 100);

        tokio::time::sleep(Duration::from_millis(50)).await;
        store.put("fresh", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("fresh").await.unwrap(), Bytes::from_static(b"v"));
    }

    #[tokio::test]
    async fn test_zero_ttl_never_evicts() {
        let store = MemoryBlobStore::new("b", Duration::ZERO);
        store.put("old", Bytes::from_static(b"v")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.put("new", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(store.len(), 2);
    }
}
