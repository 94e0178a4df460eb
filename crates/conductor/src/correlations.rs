//! In-flight command correlation table
//!
//! An explicit table of awaited correlation ids with deadlines, fed by a
//! listener on the completion subscription. Duplicate completions for an id
//! that already resolved (or was never registered) are ignored, so the
//! consumer side tolerates the Director re-emitting completions.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use stratoflow_core::command::{CompletionEnvelope, CorrelationId};
use stratoflow_core::error::{DomainError, Result};
use stratoflow_ports::messaging::SubscriberPort;

pub struct CompletionWaiter {
    pending: Arc<DashMap<CorrelationId, oneshot::Sender<CompletionEnvelope>>>,
    listener: JoinHandle<()>,
}

impl CompletionWaiter {
    /// Start listening on the completion subscription.
    pub async fn start(
        subscriber: Arc<dyn SubscriberPort>,
        completion_subscription: &str,
    ) -> Result<Self> {
        let mut source = subscriber.consumer(completion_subscription).await?;
        let pending: Arc<DashMap<CorrelationId, oneshot::Sender<CompletionEnvelope>>> =
            Arc::new(DashMap::new());
        let table = Arc::clone(&pending);

        let listener = tokio::spawn(async move {
            loop {
                let delivery = match source.pull().await {
                    Ok(Some(delivery)) => delivery,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "completion pull failed");
                        continue;
                    }
                };
                match CompletionEnvelope::from_bytes(&delivery.message.payload) {
                    Ok(completion) => match table.remove(&completion.correlation_id) {
                        Some((_, reply)) => {
                            let _ = reply.send(completion);
                        }
                        None => {
                            debug!(
                                correlation_id = %completion.correlation_id,
                                "unawaited or duplicate completion, ignoring"
                            );
                        }
                    },
                    Err(e) => warn!(error = %e, "discarding unparseable completion"),
                }
                delivery.ack.ack();
            }
        });

        Ok(Self { pending, listener })
    }

    /// Register interest in a correlation id. Must happen before the command
    /// is published or the completion may race past the table.
    pub fn register(&self, id: CorrelationId) -> oneshot::Receiver<CompletionEnvelope> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        rx
    }

    /// Await a registered completion within its deadline. A deadline miss is
    /// a Timeout tagged with the correlation id.
    pub async fn wait(
        &self,
        id: CorrelationId,
        rx: oneshot::Receiver<CompletionEnvelope>,
        deadline: Duration,
    ) -> Result<CompletionEnvelope> {
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(completion)) => Ok(completion),
            Ok(Err(_)) => Err(DomainError::Infrastructure(format!(
                "completion listener dropped while awaiting {id}"
            ))),
            Err(_) => {
                self.pending.remove(&id);
                Err(DomainError::Timeout(format!(
                    "command {id} unanswered after {deadline:?}"
                )))
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for CompletionWaiter {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
