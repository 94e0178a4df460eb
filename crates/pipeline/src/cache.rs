//! Layered enrichment cache
//!
//! A chain of [`KeyedStore`] layers, nearest first, with the authoritative
//! store last. Lookups stop at the first hit and write back only to the
//! layers that missed. A layer failure is logged and treated as a miss so
//! the chain degrades instead of failing the message.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use stratoflow_core::error::Result;
use stratoflow_ports::stores::KeyedStore;

/// In-process near cache, size- and TTL-bounded.
///
/// Contended fills are redundant rather than serialized: two workers missing
/// the same key may both fetch and both fill; the last write wins. That is
/// acceptable here because fills are idempotent.
pub struct NearCache<V> {
    capacity: usize,
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry<V>>>,
}

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

impl<V> NearCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl<V: Clone + Send + Sync> KeyedStore<String, V> for NearCache<V> {
    async fn get(&self, key: &String) -> Result<Option<V>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired: drop it under the write lock.
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn put(&self, key: &String, value: &V) -> Result<()> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) && entries.len() >= self.capacity {
            // Evict expired entries first, then the oldest.
            let ttl = self.ttl;
            entries.retain(|_, e| e.stored_at.elapsed() < ttl);
            if entries.len() >= self.capacity {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.stored_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key.clone(),
            Entry {
                value: value.clone(),
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }
}

/// Composed lookup chain: near cache -> far cache -> authoritative store.
pub struct CacheChain<V> {
    layers: Vec<Arc<dyn KeyedStore<String, V>>>,
}

impl<V: Send + Sync> CacheChain<V> {
    pub fn new(layers: Vec<Arc<dyn KeyedStore<String, V>>>) -> Self {
        Self { layers }
    }

    /// First-hit lookup with write-back to the layers that missed.
    ///
    /// `None` means the key is unknown even to the authoritative store: the
    /// message flows without enrichment.
    pub async fn get_through(&self, key: &String) -> Result<Option<V>> {
        for (depth, layer) in self.layers.iter().enumerate() {
            match layer.get(key).await {
                Ok(Some(value)) => {
                    for missed in &self.layers[..depth] {
                        if let Err(e) = missed.put(key, &value).await {
                            debug!(key = %key, error = %e, "cache write-back failed");
                        }
                    }
                    return Ok(Some(value));
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key, depth, error = %e, "cache layer lookup failed, falling through");
                }
            }
        }
        Ok(None)
    }
}
