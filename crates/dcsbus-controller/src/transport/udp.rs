//! UDP ingestion listener.
//!
//! The receive loop runs as its own task and only decodes and enqueues, so
//! slow per-server work never stalls the socket. The same socket carries
//! outbound requests, which keeps node replies addressed to this listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use dcsbus_core::error::{DcsBusError, Result};
use dcsbus_core::protocol::{decode_datagram, MAX_DATAGRAM_BYTES};

use crate::inbox::InboxSet;
use crate::obs::ControllerMetrics;

pub struct UdpListener {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl UdpListener {
    /// Bind `addr` and start receiving. A bind failure is the one fatal error.
    pub async fn bind(
        addr: SocketAddr,
        inboxes: Arc<InboxSet>,
        metrics: Arc<ControllerMetrics>,
    ) -> Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local_addr = socket.local_addr()?;
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(recv_loop(Arc::clone(&socket), stop_rx, inboxes, metrics));
        tracing::info!(
            addr = %local_addr,
            max_datagram = MAX_DATAGRAM_BYTES,
            "udp listener bound"
        );
        Ok(Self {
            socket,
            local_addr,
            stop: Some(stop_tx),
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    /// Stop accepting datagrams and wait for the receive loop to exit.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::error!(error = %e, "udp receive loop ended abnormally");
        }
        tracing::info!(addr = %self.local_addr, "udp listener stopped");
    }
}

/// Send one datagram, refusing payloads a node could not receive whole.
pub async fn send_datagram(socket: &UdpSocket, bytes: &[u8], target: SocketAddr) -> Result<()> {
    if bytes.len() > MAX_DATAGRAM_BYTES {
        return Err(DcsBusError::PayloadTooLarge(bytes.len()));
    }
    socket.send_to(bytes, target).await?;
    Ok(())
}

/// Resolve a node endpoint to an address the listener socket can reach.
///
/// Name lookup runs on tokio's resolver. Only addresses of the socket's
/// family are usable: an IPv4 socket cannot send to an IPv6 peer.
pub async fn resolve_target(host: &str, port: u16, local: SocketAddr) -> Result<SocketAddr> {
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| DcsBusError::Io(format!("cannot resolve {host}:{port}: {e}")))?;
    same_family(addrs, local).ok_or_else(|| {
        DcsBusError::Io(format!(
            "{host}:{port} has no address reachable from listener {local}"
        ))
    })
}

fn same_family(
    addrs: impl IntoIterator<Item = SocketAddr>,
    local: SocketAddr,
) -> Option<SocketAddr> {
    addrs.into_iter().find(|a| a.is_ipv4() == local.is_ipv4())
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    mut stop: oneshot::Receiver<()>,
    inboxes: Arc<InboxSet>,
    metrics: Arc<ControllerMetrics>,
) {
    // One spare byte so an oversized datagram is detected instead of silently truncated.
    let mut buf = vec![0u8; MAX_DATAGRAM_BYTES + 1];
    loop {
        tokio::select! {
            _ = &mut stop => break,
            res = socket.recv_from(&mut buf) => match res {
                Ok((len, peer)) => {
                    metrics.datagrams_received.inc(&[]);
                    match decode_datagram(&buf[..len]) {
                        Ok(env) => inboxes.enqueue(env),
                        Err(e) => {
                            metrics.decode_errors.inc(&[("code", e.code().as_str())]);
                            tracing::warn!(
                                peer = %peer,
                                len,
                                code = e.code().as_str(),
                                error = %e,
                                "discarding datagram"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "udp recv failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}
