//! Correlation table for synchronous calls over the datagram transport.
//!
//! A caller registers a token, sends the request with `channel = token`, and
//! awaits the reply. The router fulfills the token when the node answers.
//! Removing an entry (reply, timeout, caller drop, shutdown) makes the token
//! inert; replies arriving afterwards are orphans.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

use dcsbus_core::error::{DcsBusError, Result};
use dcsbus_core::protocol::{new_sync_token, Envelope};

type ReplySender = oneshot::Sender<Result<Arc<Envelope>>>;

struct PendingCall {
    tx: ReplySender,
    server: String,
    command: String,
    issued_at: Instant,
}

/// `token -> pending call`.
#[derive(Default)]
pub struct CorrelationTable {
    pending: DashMap<String, PendingCall>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Open a pending call. Dropping the returned handle removes it again.
    pub fn open(self: &Arc<Self>, server: &str, command: &str) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        let call = PendingCall {
            tx,
            server: server.to_string(),
            command: command.to_string(),
            issued_at: Instant::now(),
        };
        // v4 collisions are practically impossible; still never reuse a live token.
        let token = loop {
            let token = new_sync_token();
            match self.pending.entry(token.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(v) => {
                    v.insert(call);
                    break token;
                }
            }
        };

        PendingReply {
            table: Arc::clone(self),
            token,
            server: server.to_string(),
            command: command.to_string(),
            rx: Some(rx),
        }
    }

    /// Deliver a reply. Returns false when no call waits on its token (orphan).
    pub fn fulfill(&self, env: &Arc<Envelope>) -> bool {
        let Some(token) = env.sync_token() else {
            return false;
        };
        let Some((_, call)) = self.pending.remove(token) else {
            return false;
        };
        tracing::trace!(
            server = %call.server,
            command = %call.command,
            token = %token,
            elapsed_ms = call.issued_at.elapsed().as_millis() as u64,
            "sync reply received"
        );
        // Err means the caller gave up in the same instant; treat as delivered.
        let _ = call.tx.send(Ok(Arc::clone(env)));
        true
    }

    /// Fail every pending call (listener shutdown). Returns how many were failed.
    pub fn fail_all(&self) -> usize {
        let tokens: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for token in tokens {
            if let Some((_, call)) = self.pending.remove(&token) {
                let _ = call.tx.send(Err(DcsBusError::Shutdown));
                failed += 1;
            }
        }
        failed
    }

    pub fn contains(&self, token: &str) -> bool {
        self.pending.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn cancel(&self, token: &str) {
        self.pending.remove(token);
    }
}

/// Caller side of a pending call.
pub struct PendingReply {
    table: Arc<CorrelationTable>,
    token: String,
    server: String,
    command: String,
    rx: Option<oneshot::Receiver<Result<Arc<Envelope>>>>,
}

impl PendingReply {
    /// Token to put into the request's `channel`.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Wait for the reply or fail with `Timeout` after `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> Result<Arc<Envelope>> {
        let Some(rx) = self.rx.take() else {
            return Err(DcsBusError::Shutdown);
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            // Sender dropped without a verdict: table went away.
            Ok(Err(_)) => Err(DcsBusError::Shutdown),
            Err(_) => {
                tracing::debug!(
                    server = %self.server,
                    command = %self.command,
                    token = %self.token,
                    "sync call timed out"
                );
                Err(DcsBusError::Timeout {
                    server: self.server.clone(),
                    command: self.command.clone(),
                })
            }
        }
        // `self` drops here and removes the token if it is still pending.
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table.cancel(&self.token);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use dcsbus_core::ErrorCode;

    fn reply(token: &str) -> Arc<Envelope> {
        Arc::new(Envelope::new("Alpha", "getVariable").with_channel(token))
    }

    #[tokio::test]
    async fn reply_within_timeout_is_returned() {
        let table = Arc::new(CorrelationTable::new());
        let pending = table.open("Alpha", "getVariable");
        let token = pending.token().to_string();
        assert!(table.contains(&token));

        let t2 = Arc::clone(&table);
        let tok = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(t2.fulfill(&reply(&tok)));
        });

        let env = pending.wait(Duration::from_secs(2)).await.unwrap();
        assert_eq!(env.channel.as_deref(), Some(token.as_str()));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn out_of_order_replies_reach_their_own_callers() {
        let table = Arc::new(CorrelationTable::new());
        let a = table.open("Alpha", "getVariable");
        let b = table.open("Alpha", "getVariable");
        let (ta, tb) = (a.token().to_string(), b.token().to_string());
        assert_ne!(ta, tb);

        let wa = tokio::spawn(a.wait(Duration::from_secs(5)));
        let wb = tokio::spawn(b.wait(Duration::from_secs(5)));
        let answer = |token: &str, value: &str| {
            Arc::new(
                Envelope::new("Alpha", "getVariable")
                    .with_channel(token)
                    .with_field("value", serde_json::json!(value)),
            )
        };
        assert!(table.fulfill(&answer(&tb, "b")));
        assert!(table.fulfill(&answer(&ta, "a")));

        let ra = wa.await.unwrap().unwrap();
        let rb = wb.await.unwrap().unwrap();
        assert_eq!(ra.get("value"), Some(&serde_json::json!("a")));
        assert_eq!(rb.get("value"), Some(&serde_json::json!("b")));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn timeout_removes_the_call_and_late_reply_is_orphaned() {
        let table = Arc::new(CorrelationTable::new());
        let pending = table.open("Alpha", "getVariable");
        let token = pending.token().to_string();

        let err = pending.wait(Duration::from_millis(30)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert!(!table.contains(&token));
        assert!(!table.fulfill(&reply(&token)));
    }

    #[tokio::test]
    async fn fail_all_releases_waiters() {
        let table = Arc::new(CorrelationTable::new());
        let a = table.open("Alpha", "x");
        let b = table.open("Beta", "y");
        assert_ne!(a.token(), b.token());

        let waiter = tokio::spawn(a.wait(Duration::from_secs(30)));
        tokio::task::yield_now().await;
        assert_eq!(table.fail_all(), 2);

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.code(), ErrorCode::Shutdown);
        drop(b);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn dropped_caller_frees_its_token() {
        let table = Arc::new(CorrelationTable::new());
        let pending = table.open("Alpha", "x");
        let token = pending.token().to_string();
        drop(pending);
        assert!(!table.contains(&token));
    }

    #[test]
    fn non_sync_channel_is_never_correlated() {
        let table = CorrelationTable::new();
        let env = Arc::new(Envelope::new("Alpha", "x").with_channel("-1"));
        assert!(!table.fulfill(&env));
    }
}
