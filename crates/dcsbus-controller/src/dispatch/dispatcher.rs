use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;

use dcsbus_core::error::Result;
use dcsbus_core::protocol::Envelope;

use crate::obs::ControllerMetrics;

use super::correlation::CorrelationTable;

/// Event subscriber. Declares the commands it wants; receives the raw envelope.
#[async_trait]
pub trait EventListener: Send + Sync {
    fn name(&self) -> &str;
    fn commands(&self) -> Vec<String>;
    async fn process_event(&self, env: Arc<Envelope>) -> Result<()>;
}

/// What the router did with an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchOutcome {
    /// A pending call was fulfilled.
    pub correlated: bool,
    /// Number of subscriber invocations scheduled.
    pub fanned_out: usize,
}

/// Routes envelopes to pending calls and to subscribers (`command -> listeners`).
pub struct Dispatcher {
    by_command: DashMap<String, Vec<Arc<dyn EventListener>>>,
    correlation: Arc<CorrelationTable>,
    metrics: Arc<ControllerMetrics>,
}

impl Dispatcher {
    pub fn new(correlation: Arc<CorrelationTable>, metrics: Arc<ControllerMetrics>) -> Self {
        Self {
            by_command: DashMap::new(),
            correlation,
            metrics,
        }
    }

    pub fn correlation(&self) -> &Arc<CorrelationTable> {
        &self.correlation
    }

    /// Index a listener under each command it declares.
    pub fn register_listener(&self, listener: Arc<dyn EventListener>) {
        tracing::debug!(listener = %listener.name(), "registering event listener");
        for command in listener.commands() {
            self.by_command
                .entry(command)
                .or_default()
                .push(Arc::clone(&listener));
        }
    }

    /// Remove every registration of the named listener.
    pub fn unregister_listener(&self, name: &str) -> bool {
        let mut removed = false;
        for mut entry in self.by_command.iter_mut() {
            let before = entry.len();
            entry.retain(|l| l.name() != name);
            removed |= entry.len() != before;
        }
        self.by_command.retain(|_, ls| !ls.is_empty());
        if removed {
            tracing::debug!(listener = %name, "event listener unregistered");
        }
        removed
    }

    pub fn registered_commands(&self) -> Vec<String> {
        let mut cmds: Vec<String> = self.by_command.iter().map(|e| e.key().clone()).collect();
        cmds.sort();
        cmds
    }

    pub fn has_listeners(&self, command: &str) -> bool {
        self.by_command.contains_key(command)
    }

    fn listeners_for(&self, command: &str) -> Vec<Arc<dyn EventListener>> {
        self.by_command
            .get(command)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Correlate, then fan out.
    ///
    /// A correlated reply ends here unless it is a registration, which is
    /// also an event. Subscribers run as independent tasks; their failures
    /// and panics are logged and never reach the caller.
    pub fn dispatch(&self, env: Arc<Envelope>) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        if let Some(token) = env.sync_token() {
            if self.correlation.fulfill(&env) {
                outcome.correlated = true;
                if !env.is_registration() {
                    return outcome;
                }
            } else {
                tracing::debug!(
                    server = %env.server_name,
                    command = %env.command,
                    token = %token,
                    "orphaned sync reply"
                );
                self.metrics.orphaned_replies.inc(&[]);
            }
        }

        for listener in self.listeners_for(&env.command) {
            let metrics = Arc::clone(&self.metrics);
            let env = Arc::clone(&env);
            tokio::spawn(async move {
                let name = listener.name().to_string();
                let command = env.command.clone();
                match AssertUnwindSafe(listener.process_event(env)).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(
                            listener = %name,
                            command = %command,
                            error = %e,
                            "event listener failed"
                        );
                        metrics.subscriber_failures.inc(&[("listener", name.as_str())]);
                    }
                    Err(_) => {
                        tracing::error!(
                            listener = %name,
                            command = %command,
                            "event listener panicked"
                        );
                        metrics.subscriber_failures.inc(&[("listener", name.as_str())]);
                    }
                }
            });
            outcome.fanned_out += 1;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use std::time::Duration;

    use tokio::sync::mpsc;

    use dcsbus_core::DcsBusError;

    use super::*;

    struct Recorder {
        name: &'static str,
        commands: Vec<String>,
        tx: mpsc::UnboundedSender<(String, String)>,
    }

    #[async_trait]
    impl EventListener for Recorder {
        fn name(&self) -> &str {
            self.name
        }
        fn commands(&self) -> Vec<String> {
            self.commands.clone()
        }
        async fn process_event(&self, env: Arc<Envelope>) -> Result<()> {
            let _ = self.tx.send((self.name.to_string(), env.command.clone()));
            Ok(())
        }
    }

    struct Failing {
        panic: bool,
    }

    #[async_trait]
    impl EventListener for Failing {
        fn name(&self) -> &str {
            if self.panic { "panicky" } else { "failing" }
        }
        fn commands(&self) -> Vec<String> {
            vec!["onPlayerConnect".into()]
        }
        async fn process_event(&self, _env: Arc<Envelope>) -> Result<()> {
            if self.panic {
                panic!("listener bug");
            }
            Err(DcsBusError::Subscriber {
                listener: "failing".into(),
                msg: "boom".into(),
            })
        }
    }

    type Setup = (
        Dispatcher,
        Arc<CorrelationTable>,
        Arc<ControllerMetrics>,
        mpsc::UnboundedReceiver<(String, String)>,
    );

    fn setup() -> Setup {
        let table = Arc::new(CorrelationTable::new());
        let metrics = Arc::new(ControllerMetrics::default());
        let d = Dispatcher::new(Arc::clone(&table), Arc::clone(&metrics));
        let (tx, rx) = mpsc::unbounded_channel();
        d.register_listener(Arc::new(Recorder {
            name: "recorder",
            commands: vec![
                "onPlayerConnect".into(),
                "registerDCSServer".into(),
                "getVariable".into(),
            ],
            tx,
        }));
        (d, table, metrics, rx)
    }

    #[tokio::test]
    async fn correlated_reply_is_not_broadcast() {
        let (d, table, _m, mut rx) = setup();
        let pending = table.open("Alpha", "getVariable");
        let env = Arc::new(Envelope::new("Alpha", "getVariable").with_channel(pending.token()));

        let out = d.dispatch(env);
        assert_eq!(out, DispatchOutcome { correlated: true, fanned_out: 0 });
        assert!(pending.wait(Duration::from_secs(1)).await.is_ok());
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn correlated_registration_is_also_broadcast() {
        let (d, table, _m, mut rx) = setup();
        let pending = table.open("Alpha", "registerDCSServer");
        let env =
            Arc::new(Envelope::new("Alpha", "registerDCSServer").with_channel(pending.token()));

        let out = d.dispatch(env);
        assert_eq!(out, DispatchOutcome { correlated: true, fanned_out: 1 });
        assert!(pending.wait(Duration::from_secs(1)).await.is_ok());
        assert_eq!(rx.recv().await.unwrap().1, "registerDCSServer");
    }

    #[tokio::test]
    async fn orphaned_reply_falls_through_to_subscribers() {
        let (d, _table, metrics, mut rx) = setup();
        let env = Arc::new(Envelope::new("Alpha", "getVariable").with_channel("sync-gone"));
        let out = d.dispatch(env);
        assert_eq!(out, DispatchOutcome { correlated: false, fanned_out: 1 });
        assert_eq!(metrics.orphaned_replies.get(&[]), 1);
        assert_eq!(rx.recv().await.unwrap().1, "getVariable");
    }

    #[tokio::test]
    async fn failing_subscribers_are_isolated() {
        let (d, _table, metrics, mut rx) = setup();
        d.register_listener(Arc::new(Failing { panic: false }));
        d.register_listener(Arc::new(Failing { panic: true }));

        let out = d.dispatch(Arc::new(Envelope::new("Alpha", "onPlayerConnect")));
        assert_eq!(out.fanned_out, 3);
        let got = rx.recv().await.unwrap();
        assert_eq!(got, ("recorder".to_string(), "onPlayerConnect".to_string()));

        // Let the failing tasks finish.
        for _ in 0..50 {
            if metrics.subscriber_failures.get(&[("listener", "failing")]) == 1
                && metrics.subscriber_failures.get(&[("listener", "panicky")]) == 1
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(metrics.subscriber_failures.get(&[("listener", "failing")]), 1);
        assert_eq!(metrics.subscriber_failures.get(&[("listener", "panicky")]), 1);

        // Router still works afterwards.
        d.dispatch(Arc::new(Envelope::new("Alpha", "onPlayerConnect")));
        assert_eq!(rx.recv().await.unwrap().1, "onPlayerConnect");
    }

    #[tokio::test]
    async fn unregister_removes_every_interest() {
        let (d, _table, _m, _rx) = setup();
        assert_eq!(d.registered_commands().len(), 3);
        assert!(d.has_listeners("getVariable"));
        assert!(d.unregister_listener("recorder"));
        assert!(d.registered_commands().is_empty());
        assert!(!d.has_listeners("getVariable"));
        assert!(!d.unregister_listener("recorder"));
    }
}
