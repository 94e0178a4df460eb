//! Storage contracts: warehouse append, object store, keyed stores
//!
//! `KeyedStore` is the uniform get/put contract the layered enrichment cache
//! chains over: near cache, far cache and the authoritative document store
//! all implement it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use stratoflow_core::error::Result;

/// Per-row outcome of a warehouse append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowResult {
    pub index: usize,
    pub error: Option<String>,
}

impl RowResult {
    pub fn ok(index: usize) -> Self {
        Self { index, error: None }
    }

    pub fn failed(index: usize, error: impl Into<String>) -> Self {
        Self {
            index,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Appends typed rows to a warehouse table, reporting per-row outcomes.
///
/// The whole call failing is a batch-level error; individual row rejections
/// come back in the result vector so callers can settle rows independently.
#[async_trait]
pub trait WarehouseWriter<R: Send + Sync>: Send + Sync {
    async fn append_rows(&self, dataset: &str, table: &str, rows: &[R]) -> Result<Vec<RowResult>>;
}

/// Immutable object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Keys under a prefix, lexicographic order.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
}

/// Uniform get/put over a keyed store.
///
/// A `None` from `get` is a miss, never an error; read-only layers may
/// accept `put` as a no-op.
#[async_trait]
pub trait KeyedStore<K: Send + Sync, V: Send + Sync>: Send + Sync {
    async fn get(&self, key: &K) -> Result<Option<V>>;

    async fn put(&self, key: &K, value: &V) -> Result<()>;
}
