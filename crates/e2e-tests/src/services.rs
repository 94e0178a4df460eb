//! Pipeline service shapes
//!
//! Builders mirroring the deployed service binaries: ingestion (device
//! payloads onto the dataflow topic), enrichment (layered cache between the
//! topic pair), warehouse append and object-store archive. Scenarios run
//! these in-process against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stratoflow_adapters::{
    DocumentStore, InMemoryCloud, InMemoryObjectStore, InMemoryPubSub, InMemoryWarehouse,
    RemoteCache,
};
use stratoflow_core::error::{DomainError, Result};
use stratoflow_core::message::{Message, MessageData};
use stratoflow_pipeline::{
    ArchiveSink, BatchSettings, CacheChain, Enricher, MessageTransformer, NearCache,
    PipelineConfig, PublishSink, StreamingPipeline, Transformed, WarehouseSink,
    uid_attribute_extractor,
};
use stratoflow_ports::messaging::{SubscriberPort, TopicPublisher};
use stratoflow_ports::stores::KeyedStore;

use crate::helpers::loadgen::RawReading;

/// The authoritative enrichment record for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub client_id: String,
    pub location_id: String,
    pub category: String,
}

/// The row shape appended to the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedReading {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Pipeline settings tuned for fast in-memory runs.
pub fn service_config() -> PipelineConfig {
    PipelineConfig {
        num_workers: 3,
        channel_capacity: 32,
        drain_deadline: Duration::from_secs(5),
        batch: BatchSettings {
            batch_size: 10,
            flush_timeout: Duration::from_millis(100),
        },
    }
}

/// Ingestion: raw device payloads from the broker-facing subscription onto
/// the dataflow topic, untouched, with the device uid attribute preserved.
pub async fn ingestion_pipeline(
    bus: &Arc<InMemoryPubSub>,
    input_subscription: &str,
    output_topic: &str,
) -> Result<StreamingPipeline<Message>> {
    let source = bus.consumer(input_subscription).await?;
    let transformer: Arc<dyn MessageTransformer<Message>> =
        Arc::new(|msg: &Message| Ok(Transformed::Emit(msg.clone())));
    let sink = Arc::new(PublishSink::new(
        Arc::clone(bus) as Arc<dyn TopicPublisher>,
        output_topic,
    ));
    Ok(StreamingPipeline::new(source, transformer, sink, service_config()))
}

/// Enrichment: near cache -> far cache -> authoritative document store,
/// applied to the enrichment map; the inner payload travels untouched.
pub async fn enrichment_pipeline(
    cloud: &Arc<InMemoryCloud>,
    input_subscription: &str,
    output_topic: &str,
    collection: &str,
    cache: &str,
) -> Result<StreamingPipeline<Message>> {
    let bus = cloud.pubsub();
    let source = bus.consumer(input_subscription).await?;

    let near: Arc<dyn KeyedStore<String, DeviceInfo>> =
        Arc::new(NearCache::new(1024, Duration::from_secs(60)));
    let far: Arc<dyn KeyedStore<String, DeviceInfo>> = Arc::new(RemoteCache::new(
        Arc::clone(cloud),
        cache,
        Duration::from_secs(300),
    ));
    let authority: Arc<dyn KeyedStore<String, DeviceInfo>> =
        Arc::new(DocumentStore::new(Arc::clone(cloud), collection));
    let chain = CacheChain::new(vec![near, far, authority]);

    let enricher = Enricher::new(
        uid_attribute_extractor(),
        Arc::new(|msg: &mut Message, info: &DeviceInfo| {
            msg.enrich("name", info.client_id.clone());
            msg.enrich("location", info.location_id.clone());
            msg.enrich("serviceTag", info.category.clone());
        }),
        chain,
    );

    // Unwrap the upstream record exactly once; the enrichment gathered on
    // the wrapped message carries over to the inner one.
    let transformer: Arc<dyn MessageTransformer<Message>> = Arc::new(|msg: &Message| {
        let envelope = MessageData::from_bytes(&msg.payload)?;
        let mut inner = envelope.into_message(msg.attributes.clone());
        inner.enrichment.extend(msg.enrichment.clone());
        Ok(Transformed::Emit(inner))
    });

    let sink = Arc::new(PublishSink::new(
        bus as Arc<dyn TopicPublisher>,
        output_topic,
    ));
    Ok(StreamingPipeline::new(source, transformer, sink, service_config())
        .with_enricher(Arc::new(enricher)))
}

/// Warehouse append: unwraps the upstream record, merges enrichment fields
/// into the row shape.
pub async fn warehouse_pipeline(
    cloud: &Arc<InMemoryCloud>,
    input_subscription: &str,
    dataset: &str,
    table: &str,
) -> Result<StreamingPipeline<EnrichedReading>> {
    let source = cloud.pubsub().consumer(input_subscription).await?;
    let writer = Arc::new(InMemoryWarehouse::new(Arc::clone(cloud)));
    let sink = Arc::new(WarehouseSink::new(writer, dataset, table));
    Ok(StreamingPipeline::new(
        source,
        enriched_reading_transformer(),
        sink,
        service_config(),
    ))
}

/// Archive: unwraps the upstream record and appends raw readings as NDJSON
/// batches under the bucket prefix.
pub async fn archive_pipeline(
    cloud: &Arc<InMemoryCloud>,
    input_subscription: &str,
    bucket: &str,
    prefix: &str,
) -> Result<StreamingPipeline<RawReading>> {
    let source = cloud.pubsub().consumer(input_subscription).await?;
    let store = Arc::new(InMemoryObjectStore::new(Arc::clone(cloud)));
    let sink = Arc::new(ArchiveSink::new(store, bucket, prefix));
    let transformer: Arc<dyn MessageTransformer<RawReading>> = Arc::new(|msg: &Message| {
        let envelope = MessageData::from_bytes(&msg.payload)?;
        let raw: RawReading = serde_json::from_slice(&envelope.payload)
            .map_err(|e| DomainError::Processing(format!("unparseable reading: {e}")))?;
        Ok(Transformed::Emit(raw))
    });
    Ok(StreamingPipeline::new(source, transformer, sink, service_config()))
}

/// Unwrap the upstream record once, then the inner raw reading, attaching
/// the enrichment fields when present.
pub fn enriched_reading_transformer() -> Arc<dyn MessageTransformer<EnrichedReading>> {
    Arc::new(|msg: &Message| {
        let envelope = MessageData::from_bytes(&msg.payload)?;
        let raw: RawReading = serde_json::from_slice(&envelope.payload)
            .map_err(|e| DomainError::Processing(format!("unparseable reading: {e}")))?;

        let field = |key: &str| {
            envelope
                .enrichment_data
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        Ok(Transformed::Emit(EnrichedReading {
            device_id: raw.device_id,
            timestamp: raw.timestamp,
            value: raw.value,
            client_id: field("name"),
            location_id: field("location"),
            category: field("serviceTag"),
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn transformer_unwraps_exactly_one_envelope() {
        let raw = RawReading {
            device_id: "dev-1".into(),
            timestamp: Utc::now(),
            value: 21.5,
        };
        let mut inner = Message::new(
            serde_json::to_vec(&raw).unwrap(),
            HashMap::from([("uid".to_string(), "dev-1".to_string())]),
        );
        inner.enrich("name", "client-a");
        inner.enrich("location", "hall");
        let wire = MessageData::from_message(&inner).unwrap().to_bytes().unwrap();
        let delivered = Message::new(wire, inner.attributes.clone());

        let transformer = enriched_reading_transformer();
        let Transformed::Emit(row) = transformer.transform(&delivered).unwrap() else {
            panic!("expected a row");
        };
        assert_eq!(row.device_id, "dev-1");
        assert_eq!(row.client_id.as_deref(), Some("client-a"));
        assert_eq!(row.location_id.as_deref(), Some("hall"));
        assert_eq!(row.category, None);
    }

    #[test]
    fn transformer_rejects_non_record_payloads() {
        let delivered = Message::new(b"not a record".to_vec(), HashMap::new());
        let transformer = enriched_reading_transformer();
        assert!(transformer.transform(&delivered).is_err());
    }
}
