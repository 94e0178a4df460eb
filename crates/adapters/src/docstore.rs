//! Document store and remote cache handles
//!
//! Both implement the uniform [`KeyedStore`] contract so the enrichment
//! chain can layer them: [`DocumentStore`] is the authoritative source of
//! truth, [`RemoteCache`] the optional out-of-process far cache with TTL'd
//! entries.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use stratoflow_core::error::{DomainError, Result};
use stratoflow_ports::stores::KeyedStore;

use crate::cloud::InMemoryCloud;

/// Handle over one provisioned collection.
pub struct DocumentStore<V> {
    cloud: Arc<InMemoryCloud>,
    collection: String,
    _marker: PhantomData<fn() -> V>,
}

impl<V> DocumentStore<V> {
    pub fn new(cloud: Arc<InMemoryCloud>, collection: impl Into<String>) -> Self {
        Self {
            cloud,
            collection: collection.into(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<V> KeyedStore<String, V> for DocumentStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, key: &String) -> Result<Option<V>> {
        let record = self
            .cloud
            .collections
            .get(&self.collection)
            .ok_or_else(|| DomainError::NotFound(format!("collection {}", self.collection)))?;
        let result = match record.documents.get(key) {
            Some(doc) => {
                let value = serde_json::from_value(doc.clone()).map_err(|e| {
                    DomainError::Processing(format!(
                        "document {key} in {} has unexpected shape: {e}",
                        self.collection
                    ))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        };
        result
    }

    async fn put(&self, key: &String, value: &V) -> Result<()> {
        let record = self
            .cloud
            .collections
            .get(&self.collection)
            .ok_or_else(|| DomainError::NotFound(format!("collection {}", self.collection)))?;
        let doc = serde_json::to_value(value)
            .map_err(|e| DomainError::Processing(format!("unserializable document: {e}")))?;
        record.documents.insert(key.clone(), doc);
        Ok(())
    }
}

/// Handle over one provisioned cache instance; entries expire after `ttl`.
pub struct RemoteCache<V> {
    cloud: Arc<InMemoryCloud>,
    name: String,
    ttl: Duration,
    _marker: PhantomData<fn() -> V>,
}

impl<V> RemoteCache<V> {
    pub fn new(cloud: Arc<InMemoryCloud>, name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            cloud,
            name: name.into(),
            ttl,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<V> KeyedStore<String, V> for RemoteCache<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, key: &String) -> Result<Option<V>> {
        let record = self
            .cloud
            .caches
            .get(&self.name)
            .ok_or_else(|| DomainError::NotFound(format!("cache {}", self.name)))?;
        let expired = match record.entries.get(key) {
            Some(entry) => {
                let (value, stored_at) = entry.value();
                if stored_at.elapsed() < self.ttl {
                    let parsed = serde_json::from_value(value.clone()).map_err(|e| {
                        DomainError::Processing(format!("cache entry {key} unreadable: {e}"))
                    })?;
                    return Ok(Some(parsed));
                }
                true
            }
            None => false,
        };
        if expired {
            record.entries.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &String, value: &V) -> Result<()> {
        let record = self
            .cloud
            .caches
            .get(&self.name)
            .ok_or_else(|| DomainError::NotFound(format!("cache {}", self.name)))?;
        let encoded = serde_json::to_value(value)
            .map_err(|e| DomainError::Processing(format!("unserializable cache entry: {e}")))?;
        record.entries.insert(key.clone(), (encoded, Instant::now()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    use stratoflow_core::architecture::{CacheInstanceConfig, CollectionConfig};
    use stratoflow_ports::provisioner::ResourceProvisioner;

    use crate::cloud::{CacheProvisioner, CollectionProvisioner};
    use crate::pubsub::InMemoryPubSub;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct DeviceInfo {
        name: String,
        location: String,
    }

    async fn cloud_with_stores() -> Arc<InMemoryCloud> {
        let cloud = InMemoryCloud::new(Arc::new(InMemoryPubSub::new()));
        CollectionProvisioner::new(Arc::clone(&cloud))
            .ensure(&CollectionConfig {
                name: "devices".into(),
                database: "(default)".into(),
            })
            .await
            .unwrap();
        CacheProvisioner::new(Arc::clone(&cloud))
            .ensure(&CacheInstanceConfig {
                name: "device-cache".into(),
                memory_gb: 1,
            })
            .await
            .unwrap();
        cloud
    }

    #[tokio::test]
    async fn document_store_round_trips() {
        let cloud = cloud_with_stores().await;
        let store: DocumentStore<DeviceInfo> = DocumentStore::new(cloud, "devices");
        let info = DeviceInfo {
            name: "thermostat".into(),
            location: "hall".into(),
        };
        store.put(&"dev-1".to_string(), &info).await.unwrap();
        assert_eq!(store.get(&"dev-1".to_string()).await.unwrap(), Some(info));
        assert_eq!(store.get(&"dev-2".to_string()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn remote_cache_expires_entries() {
        let cloud = cloud_with_stores().await;
        let cache: RemoteCache<DeviceInfo> =
            RemoteCache::new(cloud, "device-cache", Duration::from_millis(20));
        let info = DeviceInfo {
            name: "thermostat".into(),
            location: "hall".into(),
        };
        cache.put(&"dev-1".to_string(), &info).await.unwrap();
        assert!(cache.get(&"dev-1".to_string()).await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get(&"dev-1".to_string()).await.unwrap().is_none());
    }
}
