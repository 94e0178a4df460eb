//! Message enrichment stage
//!
//! Extracts a key from each message, resolves it through the layered cache
//! chain and applies the result to the enrichment map. The payload bytes are
//! never touched; a key the authoritative store does not know leaves the
//! message flowing un-enriched.

use std::sync::Arc;

use async_trait::async_trait;

use stratoflow_core::error::Result;
use stratoflow_core::message::Message;

use crate::cache::CacheChain;

/// The stage interface the pipeline drives; type-erased over the
/// enrichment value.
#[async_trait]
pub trait EnrichStage: Send + Sync {
    async fn enrich(&self, msg: &mut Message) -> Result<()>;
}

pub type KeyExtractor = Arc<dyn Fn(&Message) -> Option<String> + Send + Sync>;
pub type Applier<V> = Arc<dyn Fn(&mut Message, &V) + Send + Sync>;

pub struct Enricher<V> {
    extract_key: KeyExtractor,
    apply: Applier<V>,
    chain: CacheChain<V>,
}

impl<V: Send + Sync> Enricher<V> {
    pub fn new(extract_key: KeyExtractor, apply: Applier<V>, chain: CacheChain<V>) -> Self {
        Self {
            extract_key,
            apply,
            chain,
        }
    }
}

#[async_trait]
impl<V: Send + Sync> EnrichStage for Enricher<V> {
    async fn enrich(&self, msg: &mut Message) -> Result<()> {
        let Some(key) = (self.extract_key)(msg) else {
            return Ok(());
        };
        if let Some(value) = self.chain.get_through(&key).await? {
            (self.apply)(msg, &value);
        }
        Ok(())
    }
}

/// Key extractor reading the device uid transport attribute.
pub fn uid_attribute_extractor() -> KeyExtractor {
    Arc::new(|msg: &Message| msg.attribute("uid").map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    use crate::cache::NearCache;
    use stratoflow_ports::stores::KeyedStore;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct DeviceInfo {
        name: String,
        location: String,
    }

    async fn enricher_with(seed: &[(&str, DeviceInfo)]) -> Enricher<DeviceInfo> {
        let store: Arc<NearCache<DeviceInfo>> =
            Arc::new(NearCache::new(16, Duration::from_secs(60)));
        for (key, value) in seed {
            store.put(&key.to_string(), value).await.unwrap();
        }

        Enricher::new(
            uid_attribute_extractor(),
            Arc::new(|msg: &mut Message, info: &DeviceInfo| {
                msg.enrich("name", info.name.clone());
                msg.enrich("location", info.location.clone());
            }),
            CacheChain::new(vec![store as Arc<dyn KeyedStore<String, DeviceInfo>>]),
        )
    }

    #[tokio::test]
    async fn known_key_applies_enrichment_without_touching_payload() {
        let enricher = enricher_with(&[(
            "dev-1",
            DeviceInfo {
                name: "thermostat".into(),
                location: "hall".into(),
            },
        )])
        .await;
        let mut msg = Message::new(
            b"raw".to_vec(),
            HashMap::from([("uid".to_string(), "dev-1".to_string())]),
        );

        enricher.enrich(&mut msg).await.unwrap();
        assert_eq!(msg.payload, b"raw");
        assert_eq!(
            msg.enrichment.get("location").and_then(|v| v.as_str()),
            Some("hall")
        );
    }

    #[tokio::test]
    async fn unknown_key_leaves_message_untouched() {
        let enricher = enricher_with(&[]).await;
        let mut msg = Message::new(
            b"raw".to_vec(),
            HashMap::from([("uid".to_string(), "dev-9".to_string())]),
        );
        enricher.enrich(&mut msg).await.unwrap();
        assert!(msg.enrichment.is_empty());
    }

    #[tokio::test]
    async fn missing_key_attribute_is_a_noop() {
        let enricher = enricher_with(&[]).await;
        let mut msg = Message::new(b"raw".to_vec(), HashMap::new());
        enricher.enrich(&mut msg).await.unwrap();
        assert!(msg.enrichment.is_empty());
    }
}
