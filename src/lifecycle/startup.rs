//! Startup orchestration.
//!
//! # Responsibilities
//! - Connect every broker alias
//! - Provision virtual hosts, route chains and subscriptions
//! - Start subscriptions, then bind listeners
//! - Stop in reverse: listeners, subscriptions (drained), connections
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::{JoinHandle, JoinSet};

use crate::bridge::subscribe::Dispatcher;
use crate::bridge::{BridgeError, BridgeRule, Subscribe};
use crate::config::BridgeConfig;
use crate::http::vhost::{BuildError, HostTable};
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::net::listener::ListenerError;
use crate::observability::forward::LogBacklog;
use crate::registry::{ConnectionRegistry, RegistryError};
use crate::template::{Template, TemplateError};
use crate::transport::Transport;

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("subscription {subject:?}: {source}")]
    Template {
        subject: String,
        #[source]
        source: TemplateError,
    },

    #[error(transparent)]
    Subscribe(#[from] BridgeError),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// The provisioned bridge.
pub struct BridgeApp {
    registry: Arc<ConnectionRegistry>,
    hosts: Arc<HostTable>,
    subscriptions: Vec<Arc<Subscribe>>,
    request_timeout: Duration,
    shutdown: Shutdown,
    servers: JoinSet<std::io::Result<()>>,
    forwarder: Option<JoinHandle<()>>,
}

impl BridgeApp {
    /// Connect brokers and provision every host, route and subscription.
    pub async fn provision(config: &BridgeConfig, transport: &dyn Transport) -> Result<Self, StartupError> {
        let registry = Arc::new(ConnectionRegistry::connect_all(&config.brokers, transport).await?);
        let hosts = Arc::new(HostTable::from_config(&config.servers, &registry)?);
        let dispatcher: Arc<dyn Dispatcher> = hosts.clone();

        let mut subscriptions = Vec::new();
        for broker in &config.brokers {
            for sub in &broker.subscribe {
                let template = |source: &str| {
                    Template::parse(source).map_err(|source| StartupError::Template {
                        subject: sub.subject.clone(),
                        source,
                    })
                };
                let subscription = Arc::new(Subscribe::new(
                    registry.clone(),
                    dispatcher.clone(),
                    broker.alias.clone(),
                    sub.subject.clone(),
                    sub.queue_group.clone(),
                    template(&sub.method)?,
                    template(&sub.url)?,
                ));
                tracing::debug!(
                    alias = %broker.alias,
                    subject = %sub.subject,
                    rule = ?BridgeRule::Subscribe(subscription.clone()),
                    "Subscription provisioned"
                );
                subscriptions.push(subscription);
            }
        }

        tracing::info!(
            brokers = registry.len(),
            hosts = hosts.hosts().len(),
            subscriptions = subscriptions.len(),
            "Bridge provisioned"
        );

        Ok(Self {
            registry,
            hosts,
            subscriptions,
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
            shutdown: Shutdown::new(),
            servers: JoinSet::new(),
            forwarder: None,
        })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn hosts(&self) -> &Arc<HostTable> {
        &self.hosts
    }

    pub fn subscriptions(&self) -> &[Arc<Subscribe>] {
        &self.subscriptions
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Flush buffered log lines to `subject` and keep forwarding.
    pub fn forward_logs(&mut self, backlog: LogBacklog, alias: &str, subject: &str) -> Result<(), StartupError> {
        let task = backlog.start(&self.registry, alias, subject.to_string(), self.shutdown.subscribe())?;
        self.forwarder = Some(task);
        Ok(())
    }

    /// Start subscriptions, then the HTTP listeners.
    pub async fn start(&mut self) -> Result<(), StartupError> {
        for sub in &self.subscriptions {
            sub.start().await?;
        }
        let server = HttpServer::new(self.hosts.clone(), self.request_timeout);
        self.servers = server.spawn(&self.shutdown).await?;
        tracing::info!(listeners = self.servers.len(), "Bridge started");
        Ok(())
    }

    /// Stop listeners, drain subscriptions, close connections.
    pub async fn stop(mut self) {
        self.shutdown.trigger();
        while let Some(joined) = self.servers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
                Err(e) => tracing::error!(error = %e, "HTTP server task panicked"),
            }
        }

        for sub in &self.subscriptions {
            sub.stop().await;
        }

        if let Some(forwarder) = self.forwarder.take() {
            let _ = forwarder.await;
        }
        self.registry.close_all().await;
        tracing::info!("Bridge stopped");
    }
}
