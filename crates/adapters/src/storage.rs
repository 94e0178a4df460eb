//! In-memory object store

use std::sync::Arc;

use async_trait::async_trait;

use stratoflow_core::error::{DomainError, Result};
use stratoflow_ports::stores::ObjectStore;

use crate::cloud::InMemoryCloud;

pub struct InMemoryObjectStore {
    cloud: Arc<InMemoryCloud>,
}

impl InMemoryObjectStore {
    pub fn new(cloud: Arc<InMemoryCloud>) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()> {
        let record = self
            .cloud
            .buckets
            .get(bucket)
            .ok_or_else(|| DomainError::NotFound(format!("bucket {bucket}")))?;
        record.objects.lock().insert(key.to_string(), data);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let record = self
            .cloud
            .buckets
            .get(bucket)
            .ok_or_else(|| DomainError::NotFound(format!("bucket {bucket}")))?;
        let objects = record.objects.lock();
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| DomainError::NotFound(format!("object {bucket}/{key}")))
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let record = self
            .cloud
            .buckets
            .get(bucket)
            .ok_or_else(|| DomainError::NotFound(format!("bucket {bucket}")))?;
        let objects = record.objects.lock();
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
