//! Per-server inboxes.
//!
//! Each server name owns one unbounded FIFO queue and exactly one worker task
//! draining it. Enqueueing never blocks the receive loop; a slow server only
//! delays its own queue.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use futures_util::FutureExt;
use tokio::sync::mpsc::{self, error::SendError};
use tokio::task::JoinHandle;

use dcsbus_core::protocol::Envelope;

use crate::obs::ControllerMetrics;

/// What a worker does after an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop this worker and discard its inbox; the next envelope for the
    /// server starts a fresh one.
    Terminate,
}

/// Per-envelope work executed by inbox workers.
#[async_trait]
pub trait EnvelopeProcessor: Send + Sync + 'static {
    async fn process(&self, env: Arc<Envelope>) -> Flow;
}

pub enum InboxItem {
    Envelope(Arc<Envelope>),
    /// Sentinel: the worker exits once it reaches this item.
    Stop,
}

struct Inbox {
    id: u64,
    tx: mpsc::UnboundedSender<InboxItem>,
    worker: JoinHandle<()>,
}

/// `server_name -> inbox`.
pub struct InboxSet {
    inboxes: DashMap<String, Inbox>,
    processor: Arc<dyn EnvelopeProcessor>,
    seq: AtomicU64,
    metrics: Arc<ControllerMetrics>,
}

impl InboxSet {
    pub fn new(processor: Arc<dyn EnvelopeProcessor>, metrics: Arc<ControllerMetrics>) -> Self {
        Self {
            inboxes: DashMap::new(),
            processor,
            seq: AtomicU64::new(1),
            metrics,
        }
    }

    /// Queue an envelope for its server, starting a worker on first sight.
    pub fn enqueue(self: &Arc<Self>, env: Envelope) {
        let name = env.server_name.clone();
        let mut item = InboxItem::Envelope(Arc::new(env));

        // A second attempt covers a worker that terminated between lookup and send.
        for _ in 0..2 {
            let inbox = self
                .inboxes
                .entry(name.clone())
                .or_insert_with(|| self.spawn_inbox(&name));
            let id = inbox.id;
            match inbox.tx.send(item) {
                Ok(()) => return,
                Err(SendError(back)) => {
                    item = back;
                    drop(inbox);
                    self.discard(&name, id);
                }
            }
        }
        tracing::warn!(server = %name, "inbox unavailable; envelope dropped");
    }

    fn spawn_inbox(self: &Arc<Self>, name: &str) -> Inbox {
        let id = self.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(
            name.to_string(),
            id,
            rx,
            Arc::clone(&self.processor),
            Arc::downgrade(self),
            Arc::clone(&self.metrics),
        ));
        self.metrics.inboxes_active.inc(&[]);
        tracing::debug!(server = %name, inbox = id, "inbox created");
        Inbox { id, tx, worker }
    }

    /// Remove the inbox for `name` if it is still the one identified by `id`.
    fn discard(&self, name: &str, id: u64) {
        if self.inboxes.remove_if(name, |_, inbox| inbox.id == id).is_some() {
            tracing::debug!(server = %name, inbox = id, "inbox discarded");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inboxes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inboxes.is_empty()
    }

    /// Stop every worker after its queued envelopes and wait for all of them.
    /// Returns the number of workers joined.
    pub async fn drain(&self) -> usize {
        let names: Vec<String> = self.inboxes.iter().map(|e| e.key().clone()).collect();
        let mut workers = Vec::with_capacity(names.len());
        for name in names {
            if let Some((_, inbox)) = self.inboxes.remove(&name) {
                // Fails only if the worker already exited; joining still works.
                let _ = inbox.tx.send(InboxItem::Stop);
                workers.push(inbox.worker);
            }
        }

        let joined = workers.len();
        for res in join_all(workers).await {
            if let Err(e) = res {
                tracing::error!(error = %e, "inbox worker ended abnormally");
            }
        }
        joined
    }
}

async fn run_worker(
    name: String,
    id: u64,
    mut rx: mpsc::UnboundedReceiver<InboxItem>,
    processor: Arc<dyn EnvelopeProcessor>,
    set: Weak<InboxSet>,
    metrics: Arc<ControllerMetrics>,
) {
    tracing::debug!(server = %name, inbox = id, "worker started");
    while let Some(item) = rx.recv().await {
        let env = match item {
            InboxItem::Envelope(env) => env,
            InboxItem::Stop => break,
        };
        let command = env.command.clone();

        let flow = match AssertUnwindSafe(processor.process(env)).catch_unwind().await {
            Ok(flow) => flow,
            Err(_) => {
                tracing::error!(server = %name, command = %command, "envelope processing panicked");
                metrics.worker_errors.inc(&[]);
                Flow::Continue
            }
        };

        if flow == Flow::Terminate {
            rx.close();
            if let Some(set) = set.upgrade() {
                set.discard(&name, id);
            }
            break;
        }
    }
    metrics.inboxes_active.dec(&[]);
    tracing::debug!(server = %name, inbox = id, "worker stopped");
}
