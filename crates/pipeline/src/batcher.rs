//! Batch accumulation and atomic flush
//!
//! Buffers up to `batch_size` items or `flush_timeout` from the first
//! buffered item, whichever comes first. A flush is atomic from the
//! pipeline's viewpoint: sink success acks the whole batch, a sink-level
//! error nacks it; sinks exposing per-row results settle each row
//! individually, in accumulation order.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use stratoflow_ports::messaging::AckToken;

use crate::sinks::{BatchSink, SinkReport};
use crate::stats::PipelineCounters;

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub flush_timeout: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 32,
            flush_timeout: Duration::from_millis(500),
        }
    }
}

pub struct BatchAccumulator<T: Send + 'static> {
    rx: mpsc::Receiver<(T, AckToken)>,
    sink: Arc<dyn BatchSink<T>>,
    settings: BatchSettings,
    counters: Arc<PipelineCounters>,
}

impl<T: Send + 'static> BatchAccumulator<T> {
    pub fn new(
        rx: mpsc::Receiver<(T, AckToken)>,
        sink: Arc<dyn BatchSink<T>>,
        settings: BatchSettings,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            rx,
            sink,
            settings,
            counters,
        }
    }

    pub async fn run(mut self) {
        loop {
            // The flush timer starts with the first buffered item.
            let Some(first) = self.rx.recv().await else {
                break;
            };
            let mut buf = vec![first];
            let deadline = tokio::time::sleep(self.settings.flush_timeout);
            tokio::pin!(deadline);

            let mut closed = false;
            while buf.len() < self.settings.batch_size {
                tokio::select! {
                    item = self.rx.recv() => match item {
                        Some(item) => buf.push(item),
                        None => {
                            closed = true;
                            break;
                        }
                    },
                    _ = &mut deadline => break,
                }
            }

            self.flush(buf).await;
            if closed {
                break;
            }
        }

        if let Err(e) = self.sink.close().await {
            warn!(error = %e, "sink close failed");
        }
    }

    async fn flush(&self, buf: Vec<(T, AckToken)>) {
        let mut items = Vec::with_capacity(buf.len());
        let mut tokens = Vec::with_capacity(buf.len());
        for (item, token) in buf {
            items.push(item);
            tokens.push(token);
        }
        let size = items.len();

        match self.sink.write(items).await {
            Ok(SinkReport::Complete) => {
                self.counters
                    .acked
                    .fetch_add(tokens.len() as u64, Ordering::Relaxed);
                for token in tokens {
                    token.ack();
                }
                self.counters.batches_flushed.fetch_add(1, Ordering::Relaxed);
                debug!(size, "batch flushed");
            }
            Ok(SinkReport::PerRow(errors)) => {
                for (i, token) in tokens.into_iter().enumerate() {
                    match errors.get(i).and_then(Option::as_deref) {
                        Some(reason) => {
                            debug!(row = i, reason, "row rejected by sink");
                            token.nack();
                            self.counters.nacked.fetch_add(1, Ordering::Relaxed);
                        }
                        None => {
                            token.ack();
                            self.counters.acked.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                self.counters.batches_flushed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(size, error = %e, "batch flush failed, nacking batch");
                self.counters
                    .nacked
                    .fetch_add(tokens.len() as u64, Ordering::Relaxed);
                for token in tokens {
                    token.nack();
                }
            }
        }
    }
}
