//! NATS transport backed by `async-nats`.
//!
//! Object buckets are JetStream object stores; the bucket TTL is the
//! `max_age` of the backing `OBJ_<bucket>` stream.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::context::{
    GetStreamError, GetStreamErrorKind, ObjectStoreError, ObjectStoreErrorKind,
};
use async_nats::jetstream::{self, object_store, Context, ErrorCode};
use async_nats::{HeaderMap, RequestErrorKind};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::AsyncReadExt;
use url::Url;

use super::{
    Auth, BlobStore, BlobStoreError, BridgeMessage, ConnectOptions, Connection, MessageHeaders,
    Subscription, Transport, TransportError,
};

/// [`Transport`] dialing a NATS server.
#[derive(Debug, Clone, Copy, Default)]
pub struct NatsTransport;

impl NatsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn Connection>, TransportError> {
        let mut opts = async_nats::ConnectOptions::new();
        if let Some(name) = &options.client_name {
            opts = opts.name(name);
        }
        if let Some(prefix) = &options.inbox_prefix {
            opts = opts.custom_inbox_prefix(prefix);
        }
        opts = match &options.auth {
            Auth::None => opts,
            Auth::CredentialsFile(path) => opts
                .credentials_file(path)
                .await
                .map_err(|e| TransportError::Options(format!("{}: {}", path.display(), e)))?,
            Auth::NkeySeedFile(path) => {
                let seed = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| TransportError::Options(format!("{}: {}", path.display(), e)))?;
                opts.nkey(seed.trim().to_string())
            }
        };

        let servers = if options.urls.is_empty() {
            "nats://127.0.0.1:4222".to_string()
        } else {
            options.urls.join(",")
        };

        let client = opts
            .connect(servers.as_str())
            .await
            .map_err(|e| TransportError::Connect {
                url: redact(&servers),
                reason: e.to_string(),
            })?;

        Ok(Arc::new(NatsConnection {
            jetstream: jetstream::new(client.clone()),
            url: redact(&servers),
            client,
        }))
    }
}

/// Strip credentials from every URL in a comma-separated server list.
fn redact(servers: &str) -> String {
    servers
        .split(',')
        .map(|raw| match Url::parse(raw.trim()) {
            Ok(mut url) if !url.username().is_empty() || url.password().is_some() => {
                let _ = url.set_password(None);
                let _ = url.set_username("");
                url.to_string()
            }
            _ => raw.trim().to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn to_nats_headers(headers: &MessageHeaders) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, values) in headers.iter() {
        for value in values {
            out.append(name, value.as_str());
        }
    }
    out
}

fn from_nats_message(msg: async_nats::Message) -> BridgeMessage {
    let mut headers = MessageHeaders::new();
    if let Some(map) = &msg.headers {
        for (name, values) in map.iter() {
            for value in values {
                headers.append(name.to_string(), value.as_str());
            }
        }
    }
    BridgeMessage {
        subject: msg.subject.to_string(),
        headers,
        payload: msg.payload,
        reply: msg.reply.map(|r| r.to_string()),
    }
}

struct NatsConnection {
    client: async_nats::Client,
    jetstream: Context,
    url: String,
}

#[async_trait]
impl Connection for NatsConnection {
    async fn publish(&self, msg: BridgeMessage) -> Result<(), TransportError> {
        let headers = to_nats_headers(&msg.headers);
        let subject = msg.subject;
        let result = match msg.reply {
            Some(reply) => {
                self.client
                    .publish_with_reply_and_headers(subject.clone(), reply, headers, msg.payload)
                    .await
            }
            None => {
                self.client
                    .publish_with_headers(subject.clone(), headers, msg.payload)
                    .await
            }
        };
        result.map_err(|e| TransportError::Publish {
            subject,
            reason: e.to_string(),
        })
    }

    async fn request(&self, msg: BridgeMessage, timeout: Duration) -> Result<BridgeMessage, TransportError> {
        let request = async_nats::Request::new()
            .headers(to_nats_headers(&msg.headers))
            .payload(msg.payload)
            .timeout(Some(timeout));

        match self.client.send_request(msg.subject.clone(), request).await {
            Ok(reply) => Ok(from_nats_message(reply)),
            Err(err) => Err(match err.kind() {
                RequestErrorKind::NoResponders => TransportError::NoResponders(msg.subject),
                RequestErrorKind::TimedOut => TransportError::Timeout {
                    subject: msg.subject,
                    timeout,
                },
                RequestErrorKind::Other => TransportError::Publish {
                    subject: msg.subject,
                    reason: err.to_string(),
                },
            }),
        }
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        let result = match queue_group {
            Some(group) => {
                self.client
                    .queue_subscribe(subject.to_string(), group.to_string())
                    .await
            }
            None => self.client.subscribe(subject.to_string()).await,
        };
        let inner = result.map_err(|e| TransportError::Subscribe {
            subject: subject.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(NatsSubscription { inner }))
    }

    async fn blob_bucket(&self, bucket: &str) -> Result<Option<Arc<dyn BlobStore>>, BlobStoreError> {
        match self.jetstream.get_object_store(bucket).await {
            Ok(store) => Ok(Some(Arc::new(NatsBlobStore {
                bucket: bucket.to_string(),
                store,
                jetstream: self.jetstream.clone(),
            }))),
            Err(e) if is_missing_bucket(&e) => Ok(None),
            Err(e) => Err(BlobStoreError::Backend(format!("open bucket {}: {}", bucket, e))),
        }
    }

    async fn create_blob_bucket(&self, bucket: &str, ttl: Duration) -> Result<Arc<dyn BlobStore>, BlobStoreError> {
        let store = self
            .jetstream
            .create_object_store(object_store::Config {
                bucket: bucket.to_string(),
                max_age: ttl,
                ..Default::default()
            })
            .await
            .map_err(|e| BlobStoreError::Backend(format!("create bucket {}: {}", bucket, e)))?;
        Ok(Arc::new(NatsBlobStore {
            bucket: bucket.to_string(),
            store,
            jetstream: self.jetstream.clone(),
        }))
    }

    fn connected_url(&self) -> String {
        self.url.clone()
    }

    async fn close(&self) {
        if let Err(e) = self.client.flush().await {
            tracing::error!(url = %self.url, error = %e, "Flush on close failed");
        }
        if let Err(e) = self.client.drain().await {
            tracing::error!(url = %self.url, error = %e, "Drain on close failed");
        }
    }
}

struct NatsSubscription {
    inner: async_nats::Subscriber,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Option<BridgeMessage> {
        self.inner.next().await.map(from_nats_message)
    }

    async fn drain(&mut self) -> Result<(), TransportError> {
        self.inner
            .drain()
            .await
            .map_err(|e| TransportError::Subscribe {
                subject: String::new(),
                reason: e.to_string(),
            })
    }
}

struct NatsBlobStore {
    bucket: String,
    store: object_store::ObjectStore,
    jetstream: Context,
}

#[async_trait]
impl BlobStore for NatsBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn ttl(&self) -> Result<Duration, BlobStoreError> {
        let stream = self
            .jetstream
            .get_stream(format!("OBJ_{}", self.bucket))
            .await
            .map_err(|_| BlobStoreError::BucketNotFound(self.bucket.clone()))?;
        Ok(stream.cached_info().config.max_age)
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), BlobStoreError> {
        let mut reader = data.as_ref();
        self.store
            .put(key, &mut reader)
            .await
            .map_err(|e| BlobStoreError::Backend(format!("put {}/{}: {}", self.bucket, key, e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, BlobStoreError> {
        let mut object = self
            .store
            .get(key)
            .await
            .map_err(|_| BlobStoreError::ObjectNotFound {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            })?;
        let mut data = Vec::new();
        object
            .read_to_end(&mut data)
            .await
            .map_err(|e| BlobStoreError::Backend(format!("read {}/{}: {}", self.bucket, key, e)))?;
        Ok(Bytes::from(data))
    }
}

/// A bucket is missing only when its backing stream does not exist.
fn is_missing_bucket(err: &ObjectStoreError) -> bool {
    use std::error::Error as _;

    err.kind() == ObjectStoreErrorKind::GetStore
        && err
            .source()
            .and_then(|source| source.downcast_ref::<GetStreamError>())
            .is_some_and(is_missing_stream)
}

fn is_missing_stream(err: &GetStreamError) -> bool {
    matches!(
        err.kind(),
        GetStreamErrorKind::JetStream(api) if api.error_code() == ErrorCode::STREAM_NOT_FOUND
    )
}
