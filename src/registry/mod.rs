//! Named broker connections.
//!
//! # Data Flow
//! ```text
//! [BrokerConfig]                         (startup)
//!     → connect_options (auth, client name, inbox prefix)
//!     → Transport::connect, once per alias
//!     → ConnectionRegistry (immutable, shared via Arc)
//!
//! Per request / message:
//!     registry.resolve(alias) → Arc<BrokerConnection> | UnknownAlias
//!     conn.blob_store(bucket, ttl) → opened or created on first use
//! ```
//!
//! # Design Decisions
//! - Exactly one live connection per alias, shared by every stage using it
//! - Unknown aliases are reported when first resolved, not at load time
//! - Blob stores live in set-once cells: concurrent first uses open or
//!   create the bucket once, and later uses reuse the handle
//! - A bucket whose TTL differs from the requested one is an error on
//!   every access; nothing is migrated

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::config::BrokerConfig;
use crate::transport::{
    Auth, BlobStore, BlobStoreError, ConnectOptions, Connection, Transport, TransportError,
};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no broker connection with alias {0:?}")]
    UnknownAlias(String),

    #[error("broker {alias:?}: {source}")]
    Connect {
        alias: String,
        #[source]
        source: TransportError,
    },
}

type BlobCell = Arc<OnceCell<(Arc<dyn BlobStore>, Duration)>>;

/// A live connection plus the blob stores opened through it.
pub struct BrokerConnection {
    alias: String,
    conn: Arc<dyn Connection>,
    large_body_bucket: Option<String>,
    blob_stores: DashMap<String, BlobCell>,
}

impl BrokerConnection {
    pub fn new(alias: impl Into<String>, conn: Arc<dyn Connection>) -> Self {
        Self {
            alias: alias.into(),
            conn,
            large_body_bucket: None,
            blob_stores: DashMap::new(),
        }
    }

    pub fn with_large_body_bucket(mut self, bucket: Option<String>) -> Self {
        self.large_body_bucket = bucket;
        self
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    /// Bucket configured on the broker block, if any.
    pub fn large_body_bucket(&self) -> Option<&str> {
        self.large_body_bucket.as_deref()
    }

    /// Blob store for `bucket`, opening or creating it on first use.
    pub async fn blob_store(&self, bucket: &str, ttl: Duration) -> Result<Arc<dyn BlobStore>, BlobStoreError> {
        let cell = self.blob_stores.entry(bucket.to_string()).or_default().clone();

        let (store, current) = cell
            .get_or_try_init(|| async {
                let store = match self.conn.blob_bucket(bucket).await? {
                    Some(store) => store,
                    None => {
                        tracing::info!(alias = %self.alias, bucket = %bucket, ttl = ?ttl, "Creating blob bucket");
                        self.conn.create_blob_bucket(bucket, ttl).await?
                    }
                };
                let current = store.ttl().await?;
                Ok::<_, BlobStoreError>((store, current))
            })
            .await?;

        if *current != ttl {
            return Err(BlobStoreError::TtlMismatch {
                bucket: bucket.to_string(),
                current: *current,
                configured: ttl,
            });
        }
        Ok(store.clone())
    }
}

impl std::fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("alias", &self.alias)
            .field("url", &self.conn.connected_url())
            .finish()
    }
}

/// Translate a broker block into transport options.
pub fn connect_options(config: &BrokerConfig) -> Result<ConnectOptions, TransportError> {
    let auth = match (&config.user_credential_file, &config.nkey_credential_file) {
        (Some(_), Some(_)) => {
            return Err(TransportError::Options(
                "user_credential_file and nkey_credential_file are mutually exclusive".into(),
            ))
        }
        (Some(creds), None) => Auth::CredentialsFile(PathBuf::from(creds)),
        (None, Some(seed)) => Auth::NkeySeedFile(PathBuf::from(seed)),
        (None, None) => Auth::None,
    };
    Ok(ConnectOptions {
        urls: config.urls.clone(),
        auth,
        client_name: config.client_name.clone(),
        inbox_prefix: config.inbox_prefix.clone(),
    })
}

/// Every broker connection, keyed by alias.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<String, Arc<BrokerConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect every broker block, in order. Fails on the first error.
    pub async fn connect_all(configs: &[BrokerConfig], transport: &dyn Transport) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for config in configs {
            let wrap = |source| RegistryError::Connect {
                alias: config.alias.clone(),
                source,
            };
            let options = connect_options(config).map_err(wrap)?;
            let conn = transport.connect(&options).await.map_err(wrap)?;

            tracing::info!(alias = %config.alias, url = %conn.connected_url(), "Broker connected");
            registry.insert(
                BrokerConnection::new(config.alias.clone(), conn)
                    .with_large_body_bucket(config.large_body_bucket.clone()),
            );
        }
        Ok(registry)
    }

    pub fn insert(&mut self, conn: BrokerConnection) {
        self.connections.insert(conn.alias.clone(), Arc::new(conn));
    }

    pub fn resolve(&self, alias: &str) -> Result<Arc<BrokerConnection>, RegistryError> {
        self.connections
            .get(alias)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownAlias(alias.to_string()))
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub async fn close_all(&self) {
        for (alias, conn) in &self.connections {
            conn.conn.close().await;
            tracing::info!(alias = %alias, "Broker connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn broker(alias: &str) -> BrokerConfig {
        BrokerConfig {
            alias: alias.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_resolve_known_and_unknown() {
        let transport = MemoryTransport::new();
        let registry = ConnectionRegistry::connect_all(&[broker("default"), broker("other")], &transport)
            .await
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.resolve("other").unwrap().alias(), "other");
        assert!(matches!(
            registry.resolve("missing"),
            Err(RegistryError::UnknownAlias(a)) if a == "missing"
        ));
    }

    #[tokio::test]
    async fn test_conflicting_credentials_fail_to_connect() {
        let mut config = broker("default");
        config.user_credential_file = Some("a.creds".into());
        config.nkey_credential_file = Some("b.nk".into());
        let err = ConnectionRegistry::connect_all(&[config], &MemoryTransport::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Connect { .. }));
    }

    #[test]
    fn test_connect_options_auth() {
        let mut config = broker("default");
        config.nkey_credential_file = Some("seed.nk".into());
        config.inbox_prefix = Some("_BRIDGE".into());
        let opts = connect_options(&config).unwrap();
        assert_eq!(opts.auth, Auth::NkeySeedFile(PathBuf::from("seed.nk")));
        assert_eq!(opts.inbox_prefix.as_deref(), Some("_BRIDGE"));
    }

    #[tokio::test]
    async fn test_blob_store_created_once_and_reused() {
        let transport = MemoryTransport::new();
        let conn = BrokerConnection::new("default", transport.connection());
        let ttl = Duration::from_secs(300);

        let (a, b) = tokio::join!(conn.blob_store("bodies", ttl), conn.blob_store("bodies", ttl));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_blob_store_ttl_mismatch_is_sticky() {
        let transport = MemoryTransport::new();
        let conn = transport.connection();
        conn.create_blob_bucket("bodies", Duration::from_secs(60)).await.unwrap();

        let broker = BrokerConnection::new("default", conn);
        for _ in 0..2 {
            let result = broker.blob_store("bodies", Duration::from_secs(300)).await;
            assert!(matches!(result, Err(BlobStoreError::TtlMismatch { .. })));
        }
        assert!(broker.blob_store("bodies", Duration::from_secs(60)).await.is_ok());
    }
}
