//! Controller assembly and outbound calls.
//!
//! `Controller` wires the registry, router, correlation table, inboxes and
//! the UDP listener together, and is the surface command handlers use to
//! talk to nodes.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::net::UdpSocket;

use dcsbus_core::error::{DcsBusError, Result};
use dcsbus_core::protocol::{Envelope, Request, NO_CHANNEL, REGISTER_COMMAND};

use crate::config::ControllerConfig;
use crate::dispatch::{CorrelationTable, Dispatcher, EventListener, Pipeline};
use crate::inbox::InboxSet;
use crate::obs::ControllerMetrics;
use crate::registry::{ConfigCatalog, ServerRegistry, ServerStatus};
use crate::store::ServerStore;
use crate::transport::{resolve_target, send_datagram, UdpListener};

#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    cfg: ControllerConfig,
    catalog: Arc<ConfigCatalog>,
    registry: Arc<ServerRegistry>,
    dispatcher: Arc<Dispatcher>,
    correlation: Arc<CorrelationTable>,
    inboxes: Arc<InboxSet>,
    metrics: Arc<ControllerMetrics>,
    listener: Mutex<Option<UdpListener>>,
}

impl Controller {
    /// Build the controller. Opens the store and seeds the registry from the
    /// configured installations; nothing listens until `start`.
    pub fn new(cfg: ControllerConfig) -> Result<Self> {
        cfg.validate()?;

        let metrics = Arc::new(ControllerMetrics::default());
        let store = Arc::new(ServerStore::open(&cfg.store.path, cfg.store.pool_size)?);
        let catalog = Arc::new(ConfigCatalog::new(&cfg.installations));
        let registry = Arc::new(ServerRegistry::new(
            catalog.clone(),
            store,
            cfg.controller.agent.clone(),
            cfg.controller.hook_version.clone(),
        ));
        let seeded = registry.init_from_catalog();

        let correlation = Arc::new(CorrelationTable::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&correlation), Arc::clone(&metrics)));
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            Arc::clone(&metrics),
        ));
        let inboxes = Arc::new(InboxSet::new(pipeline, Arc::clone(&metrics)));

        tracing::info!(
            agent = %cfg.controller.agent,
            hook_version = %cfg.controller.hook_version,
            servers = seeded,
            "controller initialized"
        );

        Ok(Self {
            inner: Arc::new(ControllerInner {
                cfg,
                catalog,
                registry,
                dispatcher,
                correlation,
                inboxes,
                metrics,
                listener: Mutex::new(None),
            }),
        })
    }

    pub fn cfg(&self) -> &ControllerConfig {
        &self.inner.cfg
    }

    pub fn catalog(&self) -> Arc<ConfigCatalog> {
        Arc::clone(&self.inner.catalog)
    }

    pub fn registry(&self) -> Arc<ServerRegistry> {
        Arc::clone(&self.inner.registry)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.inner.dispatcher)
    }

    pub fn correlation(&self) -> Arc<CorrelationTable> {
        Arc::clone(&self.inner.correlation)
    }

    pub fn metrics(&self) -> Arc<ControllerMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Subscribe an event listener to the commands it declares.
    pub fn register_listener(&self, listener: Arc<dyn EventListener>) {
        self.inner.dispatcher.register_listener(listener);
    }

    /// Bind the listener. Every server starts over as UNREGISTERED.
    /// Starting twice returns the existing address.
    pub async fn start(&self) -> Result<SocketAddr> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }
        let addr = self.inner.cfg.controller.listen_addr()?;
        self.inner.registry.reset_statuses();
        let listener = UdpListener::bind(
            addr,
            Arc::clone(&self.inner.inboxes),
            Arc::clone(&self.inner.metrics),
        )
        .await?;
        let local = listener.local_addr();

        let mut slot = self.lock_listener();
        if let Some(existing) = slot.as_ref() {
            // Lost a concurrent start; the new socket closes when dropped.
            return Ok(existing.local_addr());
        }
        *slot = Some(listener);
        Ok(local)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_listener().as_ref().map(UdpListener::local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.lock_listener().is_some()
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<UdpListener>> {
        self.inner.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn socket(&self) -> Result<(Arc<UdpSocket>, SocketAddr)> {
        self.lock_listener()
            .as_ref()
            .map(|l| (l.socket(), l.local_addr()))
            .ok_or(DcsBusError::NotRunning)
    }

    /// Fire-and-forget request to a server. `channel` defaults to `-1`.
    pub async fn send_request(&self, server: &str, mut request: Request) -> Result<()> {
        let (socket, local) = self.socket()?;
        let (host, port) = self.inner.registry.target(server)?;
        let target = resolve_target(&host, port, local).await?;
        if request.channel().is_none() {
            request.set_channel(NO_CHANNEL);
        }
        send_datagram(&socket, &request.to_bytes()?, target).await?;
        tracing::debug!(server = %server, command = %request.command(), "request sent");
        Ok(())
    }

    /// Send a request and wait for the reply carrying the same channel token.
    pub async fn send_request_sync(
        &self,
        server: &str,
        mut request: Request,
        timeout: Duration,
    ) -> Result<Arc<Envelope>> {
        let (socket, local) = self.socket()?;
        let (host, port) = self.inner.registry.target(server)?;
        let target = resolve_target(&host, port, local).await?;

        let pending = self.inner.correlation.open(server, request.command());
        request.set_channel(pending.token());
        let bytes = request.to_bytes()?;
        tracing::debug!(
            server = %server,
            command = %request.command(),
            token = %pending.token(),
            "sync request sent"
        );
        send_datagram(&socket, &bytes, target).await?;

        let res = pending.wait(timeout).await;
        let outcome = match &res {
            Ok(_) => "ok",
            Err(e) if e.is_timeout() => "timeout",
            Err(_) => "error",
        };
        self.inner.metrics.sync_calls.inc(&[("outcome", outcome)]);
        res
    }

    /// Issue all calls concurrently. Results line up with `calls`; one
    /// failure never affects the others.
    pub async fn send_request_sync_all(
        &self,
        calls: Vec<(String, Request)>,
        timeout: Duration,
    ) -> Vec<Result<Arc<Envelope>>> {
        join_all(calls.into_iter().map(|(server, request)| async move {
            self.send_request_sync(&server, request, timeout).await
        }))
        .await
    }

    /// Ask every known server to register. Servers that do not answer in
    /// time are marked SHUTDOWN. Returns how many answered.
    pub async fn register_servers(&self) -> usize {
        let names = self.inner.registry.names();
        if names.is_empty() {
            return 0;
        }
        let per_server = self.inner.cfg.controller.register_secs_per_server();
        let timeout = Duration::from_secs(per_server.saturating_mul(names.len() as u64));
        tracing::info!(servers = names.len(), timeout_s = timeout.as_secs(), "registering servers");

        let calls = names
            .iter()
            .map(|name| (name.clone(), Request::new(REGISTER_COMMAND)))
            .collect();
        let results = self.send_request_sync_all(calls, timeout).await;

        let mut answered = 0;
        for (name, res) in names.iter().zip(results) {
            match res {
                Ok(_) => answered += 1,
                Err(e) if e.is_timeout() => {
                    tracing::debug!(server = %name, "no answer to registration request");
                    self.inner.registry.set_status(name, ServerStatus::Shutdown);
                }
                Err(e) => {
                    tracing::warn!(
                        server = %name,
                        code = e.code().as_str(),
                        error = %e,
                        "registration request failed"
                    );
                }
            }
        }
        tracing::info!(answered, servers = names.len(), "server registration round finished");
        answered
    }

    /// Loop a message back into this controller's own listener.
    pub async fn send_to_controller(&self, mut request: Request) -> Result<()> {
        let (socket, local) = self.socket()?;
        if request.channel().is_none() {
            request.set_channel(NO_CHANNEL);
        }
        send_datagram(&socket, &request.to_bytes()?, loopback_target(local)).await
    }

    /// Stop the listener, drain every inbox, then fail calls still waiting.
    pub async fn shutdown(&self) {
        self.inner.metrics.set_draining();
        let listener = self.lock_listener().take();
        if let Some(listener) = listener {
            listener.stop().await;
        }
        let workers = self.inner.inboxes.drain().await;
        let failed = self.inner.correlation.fail_all();
        tracing::info!(workers, failed_calls = failed, "controller stopped");
        tracing::debug!(metrics = %self.inner.metrics.render(), "final metrics");
    }
}

/// Unspecified bind addresses are not routable as a destination.
fn loopback_target(local: SocketAddr) -> SocketAddr {
    match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), local.port())
        }
        _ => local,
    }
}
