//! The streaming pipeline engine
//!
//! Topology: source -> fan-out to N workers -> [enricher] -> batch
//! accumulator -> sink. Delivery settlement is exclusive and exactly-once by
//! construction (the ack token is moved, never cloned). Shutdown follows the
//! four steps: stop intake, drain in-flight workers under a deadline, flush
//! the accumulator, close the sink; a worker still holding a token past the
//! drain deadline is aborted and its token drop reads as nack on the
//! transport.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use stratoflow_core::error::Result;
use stratoflow_core::message::Message;
use stratoflow_ports::messaging::{AckToken, Delivery, MessageSource};

use crate::batcher::{BatchAccumulator, BatchSettings};
use crate::enricher::EnrichStage;
use crate::sinks::BatchSink;
use crate::stats::{PipelineCounters, PipelineStats};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub num_workers: usize,
    pub channel_capacity: usize,
    /// How long in-flight workers may keep draining after intake stops.
    pub drain_deadline: Duration,
    pub batch: BatchSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            channel_capacity: 64,
            drain_deadline: Duration::from_secs(10),
            batch: BatchSettings::default(),
        }
    }
}

/// What a transformer did with a message.
pub enum Transformed<T> {
    Emit(T),
    /// Consumed without emitting; the delivery is acked.
    Skip,
}

/// Per-message transformation, applied after enrichment.
pub trait MessageTransformer<T>: Send + Sync {
    fn transform(&self, msg: &Message) -> Result<Transformed<T>>;
}

impl<T, F> MessageTransformer<T> for F
where
    F: Fn(&Message) -> Result<Transformed<T>> + Send + Sync,
{
    fn transform(&self, msg: &Message) -> Result<Transformed<T>> {
        self(msg)
    }
}

pub struct StreamingPipeline<T: Send + 'static> {
    source: Box<dyn MessageSource>,
    enricher: Option<Arc<dyn EnrichStage>>,
    transformer: Arc<dyn MessageTransformer<T>>,
    sink: Arc<dyn BatchSink<T>>,
    config: PipelineConfig,
}

impl<T: Send + 'static> StreamingPipeline<T> {
    pub fn new(
        source: Box<dyn MessageSource>,
        transformer: Arc<dyn MessageTransformer<T>>,
        sink: Arc<dyn BatchSink<T>>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            enricher: None,
            transformer,
            sink,
            config,
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn EnrichStage>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Drive the pipeline until the shutdown signal flips or the source
    /// closes, then drain and flush. Returns the final counters.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<PipelineStats> {
        let Self {
            mut source,
            enricher,
            transformer,
            sink,
            config,
        } = self;

        let counters = PipelineCounters::new_arc();
        let (work_tx, work_rx) = mpsc::channel::<Delivery>(config.channel_capacity);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (batch_tx, batch_rx) = mpsc::channel::<(T, AckToken)>(config.channel_capacity);

        let batcher = BatchAccumulator::new(
            batch_rx,
            Arc::clone(&sink),
            config.batch.clone(),
            Arc::clone(&counters),
        );
        let batcher_handle = tokio::spawn(batcher.run());

        let mut workers = Vec::with_capacity(config.num_workers.max(1));
        for worker_id in 0..config.num_workers.max(1) {
            let work_rx = Arc::clone(&work_rx);
            let enricher = enricher.clone();
            let transformer = Arc::clone(&transformer);
            let batch_tx = batch_tx.clone();
            let counters = Arc::clone(&counters);
            workers.push(tokio::spawn(async move {
                loop {
                    let delivery = { work_rx.lock().await.recv().await };
                    let Some(delivery) = delivery else { break };
                    process_one(
                        worker_id,
                        delivery,
                        enricher.as_deref(),
                        transformer.as_ref(),
                        &batch_tx,
                        &counters,
                    )
                    .await;
                }
            }));
        }
        drop(batch_tx);

        // Step 1: intake, until shutdown flips or the source closes.
        let mut shutdown = shutdown;
        loop {
            if *shutdown.borrow() {
                info!("shutdown signalled, stopping source intake");
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown signalled, stopping source intake");
                        break;
                    }
                }
                pulled = source.pull() => match pulled {
                    Ok(Some(delivery)) => {
                        counters.delivered.fetch_add(1, Ordering::Relaxed);
                        if work_tx.send(delivery).await.is_err() {
                            warn!("worker channel closed, stopping intake");
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("source closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "source pull failed, backing off");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
        if let Err(e) = source.close().await {
            warn!(error = %e, "source close failed");
        }
        drop(work_tx);

        // Step 2: drain in-flight workers with a deadline.
        let abort_handles: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();
        if tokio::time::timeout(config.drain_deadline, futures::future::join_all(workers))
            .await
            .is_err()
        {
            warn!("drain deadline elapsed, aborting in-flight workers");
            for handle in abort_handles {
                handle.abort();
            }
        }

        // Steps 3 & 4: the accumulator flushes what remains and closes the
        // sink once the last worker sender is gone.
        if let Err(e) = batcher_handle.await {
            warn!(error = %e, "batch accumulator task failed");
        }

        let stats = counters.snapshot();
        info!(
            delivered = stats.delivered,
            acked = stats.acked,
            nacked = stats.nacked,
            skipped = stats.skipped,
            "pipeline stopped"
        );
        Ok(stats)
    }
}

async fn process_one<T: Send + 'static>(
    worker_id: usize,
    delivery: Delivery,
    enricher: Option<&dyn EnrichStage>,
    transformer: &dyn MessageTransformer<T>,
    batch_tx: &mpsc::Sender<(T, AckToken)>,
    counters: &Arc<PipelineCounters>,
) {
    let Delivery { mut message, ack } = delivery;

    if let Some(enricher) = enricher {
        if let Err(e) = enricher.enrich(&mut message).await {
            warn!(worker_id, message_id = %message.id, error = %e, "enrichment failed");
            counters.nacked.fetch_add(1, Ordering::Relaxed);
            counters.processing_failures.fetch_add(1, Ordering::Relaxed);
            ack.nack();
            return;
        }
    }

    match transformer.transform(&message) {
        Ok(Transformed::Emit(item)) => {
            if let Err(send_error) = batch_tx.send((item, ack)).await {
                // The accumulator is gone; settle for redelivery.
                let (_, token) = send_error.0;
                counters.nacked.fetch_add(1, Ordering::Relaxed);
                token.nack();
            }
        }
        Ok(Transformed::Skip) => {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            counters.acked.fetch_add(1, Ordering::Relaxed);
            ack.ack();
        }
        Err(e) => {
            // The message failed transformation: nack exactly once, keep the
            // worker alive.
            warn!(worker_id, message_id = %message.id, error = %e, "message transformation failed");
            counters.nacked.fetch_add(1, Ordering::Relaxed);
            counters.processing_failures.fetch_add(1, Ordering::Relaxed);
            ack.nack();
        }
    }
}
