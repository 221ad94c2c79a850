use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use dcsbus_core::protocol::Envelope;

use crate::inbox::{EnvelopeProcessor, Flow};
use crate::obs::ControllerMetrics;
use crate::registry::{ServerRegistry, LIFECYCLE_COMMANDS};

use super::dispatcher::Dispatcher;

/// Worker-side handling of one envelope: registration gate, lifecycle
/// status, then routing.
pub struct Pipeline {
    registry: Arc<ServerRegistry>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<ControllerMetrics>,
}

impl Pipeline {
    pub fn new(
        registry: Arc<ServerRegistry>,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            metrics,
        }
    }

    /// Metric label for a command. Nodes choose command names freely, so
    /// only commands the controller knows get their own series.
    fn command_label<'a>(&self, env: &'a Envelope) -> &'a str {
        let command = env.command.as_str();
        if env.is_registration()
            || LIFECYCLE_COMMANDS.contains(&command)
            || self.dispatcher.has_listeners(command)
        {
            command
        } else {
            OTHER_COMMAND
        }
    }
}

const OTHER_COMMAND: &str = "other";

#[async_trait]
impl EnvelopeProcessor for Pipeline {
    async fn process(&self, env: Arc<Envelope>) -> Flow {
        let server = env.server_name.as_str();

        if env.is_registration() {
            match self.registry.register(&env).await {
                Ok(status) => {
                    self.metrics.registrations.inc(&[("outcome", "ok")]);
                    tracing::info!(server = %server, status = %status, "server registered");
                }
                Err(e) => {
                    self.metrics.registrations.inc(&[("outcome", e.code().as_str())]);
                    tracing::error!(
                        server = %server,
                        code = e.code().as_str(),
                        error = %e,
                        "registration failed"
                    );
                    return Flow::Terminate;
                }
            }
        } else if let Err(e) = self.registry.ensure_registered(server) {
            self.metrics.unregistered_drops.inc(&[]);
            tracing::debug!(
                server = %server,
                command = %env.command,
                code = e.code().as_str(),
                error = %e,
                "dropping command"
            );
            return Flow::Continue;
        } else if let Some(status) = self.registry.apply_event(&env) {
            tracing::debug!(server = %server, status = %status, "status updated from event");
        }

        let started = Instant::now();
        let outcome = self.dispatcher.dispatch(Arc::clone(&env));
        self.metrics
            .dispatch_duration
            .observe(&[("command", self.command_label(&env))], started.elapsed());
        tracing::trace!(
            server = %server,
            command = %env.command,
            correlated = outcome.correlated,
            fanned_out = outcome.fanned_out,
            "envelope dispatched"
        );
        Flow::Continue
    }
}
