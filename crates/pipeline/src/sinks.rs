//! Batch sinks: warehouse append, object-store archive, topic publish
//!
//! A sink reports either `Complete` (the whole batch applied) or `PerRow`
//! outcomes so the accumulator can settle rows independently. A sink-level
//! error means nothing was applied and the whole batch is retried.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use stratoflow_core::error::Result;
use stratoflow_core::hydration::short_token;
use stratoflow_core::message::{Message, MessageData};
use stratoflow_ports::messaging::TopicPublisher;
use stratoflow_ports::stores::{ObjectStore, WarehouseWriter};

/// Outcome of one batch write.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkReport {
    /// Every row applied.
    Complete,
    /// Outcome per row, in batch order: `None` applied, `Some(reason)` not.
    PerRow(Vec<Option<String>>),
}

impl SinkReport {
    pub fn per_row_is_clean(errors: &[Option<String>]) -> bool {
        errors.iter().all(Option::is_none)
    }
}

#[async_trait]
pub trait BatchSink<T: Send>: Send + Sync {
    async fn write(&self, batch: Vec<T>) -> Result<SinkReport>;

    /// Called once during shutdown after the final flush.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Appends rows to a warehouse table, mapping per-row results through.
pub struct WarehouseSink<R: Send + Sync> {
    writer: Arc<dyn WarehouseWriter<R>>,
    dataset: String,
    table: String,
}

impl<R: Send + Sync> WarehouseSink<R> {
    pub fn new(
        writer: Arc<dyn WarehouseWriter<R>>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            writer,
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

#[async_trait]
impl<R: Send + Sync> BatchSink<R> for WarehouseSink<R> {
    async fn write(&self, batch: Vec<R>) -> Result<SinkReport> {
        let results = self
            .writer
            .append_rows(&self.dataset, &self.table, &batch)
            .await?;
        if results.iter().all(|r| r.is_ok()) {
            return Ok(SinkReport::Complete);
        }
        let mut errors = vec![None; batch.len()];
        for result in results {
            if let Some(error) = result.error {
                if result.index < errors.len() {
                    errors[result.index] = Some(error);
                }
            }
        }
        Ok(SinkReport::PerRow(errors))
    }
}

/// Writes each batch as one NDJSON object under a key prefix.
pub struct ArchiveSink<R: Send + Sync> {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
    _marker: std::marker::PhantomData<fn(R)>,
}

impl<R: Send + Sync> ArchiveSink<R> {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into(),
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<R: Serialize + Send + Sync> BatchSink<R> for ArchiveSink<R> {
    async fn write(&self, batch: Vec<R>) -> Result<SinkReport> {
        let mut errors: Vec<Option<String>> = vec![None; batch.len()];
        let mut body = Vec::new();
        let mut written = 0usize;
        for (i, row) in batch.iter().enumerate() {
            match serde_json::to_vec(row) {
                Ok(line) => {
                    body.extend_from_slice(&line);
                    body.push(b'\n');
                    written += 1;
                }
                Err(e) => errors[i] = Some(format!("unserializable record: {e}")),
            }
        }

        if written > 0 {
            let key = format!(
                "{}/{}-{}.ndjson",
                self.prefix,
                Utc::now().format("%Y%m%dT%H%M%S%3f"),
                short_token()
            );
            self.store.put_object(&self.bucket, &key, body).await?;
            debug!(bucket = %self.bucket, key = %key, records = written, "archived batch");
        }

        if SinkReport::per_row_is_clean(&errors) {
            Ok(SinkReport::Complete)
        } else {
            Ok(SinkReport::PerRow(errors))
        }
    }
}

/// Publishes each message's wire record to a downstream topic.
///
/// The record is built through the double-wrap guard: a message whose
/// payload already is a serialized record is reported as a failed row and
/// never re-wrapped.
pub struct PublishSink {
    publisher: Arc<dyn TopicPublisher>,
    topic: String,
}

impl PublishSink {
    pub fn new(publisher: Arc<dyn TopicPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl BatchSink<Message> for PublishSink {
    async fn write(&self, batch: Vec<Message>) -> Result<SinkReport> {
        let mut errors: Vec<Option<String>> = vec![None; batch.len()];
        for (i, message) in batch.iter().enumerate() {
            let record = match MessageData::from_message(message) {
                Ok(record) => record,
                Err(e) => {
                    errors[i] = Some(e.to_string());
                    continue;
                }
            };
            let payload = match record.to_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    errors[i] = Some(e.to_string());
                    continue;
                }
            };
            // Attributes travel as transport metadata, not in the record.
            let attributes: HashMap<String, String> = message.attributes.clone();
            if let Err(e) = self
                .publisher
                .publish(&self.topic, payload, attributes)
                .await
            {
                errors[i] = Some(e.to_string());
            }
        }

        if SinkReport::per_row_is_clean(&errors) {
            Ok(SinkReport::Complete)
        } else {
            Ok(SinkReport::PerRow(errors))
        }
    }
}
