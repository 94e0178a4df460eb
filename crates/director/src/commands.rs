//! Command-bus consumer
//!
//! Consumes command envelopes from the Director's command subscription,
//! executes them through the Director core and publishes exactly one
//! completion per correlation id. Duplicates inside the sliding window
//! re-emit the cached completion instead of re-executing; completions are
//! idempotent, so the Conductor side may also observe them more than once.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use stratoflow_core::command::{
    CommandEnvelope, CommandKind, CompletionEnvelope, CorrelationId,
};
use stratoflow_core::error::Result;
use stratoflow_ports::messaging::{SubscriberPort, TopicPublisher};

use crate::director::Director;

const DEDUP_WINDOW: usize = 256;

pub struct CommandConsumer {
    director: Arc<Director>,
    subscriber: Arc<dyn SubscriberPort>,
    publisher: Arc<dyn TopicPublisher>,
    command_subscription: String,
    completion_topic: String,
}

impl CommandConsumer {
    pub fn new(
        director: Arc<Director>,
        subscriber: Arc<dyn SubscriberPort>,
        publisher: Arc<dyn TopicPublisher>,
    ) -> Self {
        let spec = &director.architecture().service_manager_spec;
        let command_subscription = spec.command_subscription.clone();
        let completion_topic = spec.completion_topic.clone();
        Self {
            director,
            subscriber,
            publisher,
            command_subscription,
            completion_topic,
        }
    }

    /// Consume until the shutdown signal flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut source = self.subscriber.consumer(&self.command_subscription).await?;
        // Sliding dedup window: correlation id -> the completion it produced.
        let mut order: VecDeque<CorrelationId> = VecDeque::new();
        let mut completions: HashMap<CorrelationId, CompletionEnvelope> = HashMap::new();

        info!(subscription = %self.command_subscription, "command consumer started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                pulled = source.pull() => {
                    let delivery = match pulled {
                        Ok(Some(delivery)) => delivery,
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "command pull failed");
                            continue;
                        }
                    };

                    let command = match CommandEnvelope::from_bytes(&delivery.message.payload) {
                        Ok(command) => command,
                        Err(e) => {
                            // A malformed command can never complete; drop it
                            // rather than redeliver forever.
                            warn!(error = %e, "discarding unparseable command");
                            delivery.ack.ack();
                            continue;
                        }
                    };

                    let completion = match completions.get(&command.correlation_id) {
                        Some(cached) => {
                            info!(correlation_id = %command.correlation_id, "duplicate command, re-emitting completion");
                            cached.clone()
                        }
                        None => {
                            let completion = self.execute(&command).await;
                            order.push_back(command.correlation_id);
                            completions.insert(command.correlation_id, completion.clone());
                            while order.len() > DEDUP_WINDOW {
                                if let Some(evicted) = order.pop_front() {
                                    completions.remove(&evicted);
                                }
                            }
                            completion
                        }
                    };

                    match completion.to_bytes() {
                        Ok(payload) => {
                            if let Err(e) = self
                                .publisher
                                .publish(&self.completion_topic, payload, HashMap::new())
                                .await
                            {
                                warn!(
                                    correlation_id = %command.correlation_id,
                                    error = %e,
                                    "failed to publish completion"
                                );
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to encode completion"),
                    }
                    delivery.ack.ack();
                }
            }
        }
        source.close().await?;
        info!("command consumer stopped");
        Ok(())
    }

    async fn execute(&self, command: &CommandEnvelope) -> CompletionEnvelope {
        let id = command.correlation_id;
        info!(
            correlation_id = %id,
            kind = ?command.kind,
            dataflow = %command.dataflow,
            "executing command"
        );

        if command.is_expired(Utc::now()) {
            return CompletionEnvelope::failure(id, "command deadline elapsed before execution");
        }

        let result = match command.kind {
            CommandKind::Setup => self.director.setup(&command.dataflow).await,
            CommandKind::Teardown => self.director.teardown(&command.dataflow).await,
        };

        match result {
            Ok(report) => match report.first_failure() {
                None => CompletionEnvelope::success(id, report),
                Some(blocker) => CompletionEnvelope::failure(
                    id,
                    format!("{} {}: {}", blocker.kind, blocker.name, blocker.outcome),
                ),
            },
            Err(e) => CompletionEnvelope::failure(id, e.to_string()),
        }
    }
}
