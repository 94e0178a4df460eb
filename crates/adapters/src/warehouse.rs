//! In-memory warehouse writer
//!
//! Appends go to tables provisioned in the backing [`InMemoryCloud`]; each
//! row is checked against the table's resolved schema and reported
//! individually, so sinks can settle rows independently.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use stratoflow_core::error::{DomainError, Result};
use stratoflow_ports::stores::{RowResult, WarehouseWriter};

use crate::cloud::InMemoryCloud;

pub struct InMemoryWarehouse {
    cloud: Arc<InMemoryCloud>,
}

impl InMemoryWarehouse {
    pub fn new(cloud: Arc<InMemoryCloud>) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl<R: Serialize + Send + Sync> WarehouseWriter<R> for InMemoryWarehouse {
    async fn append_rows(&self, dataset: &str, table: &str, rows: &[R]) -> Result<Vec<RowResult>> {
        let key = InMemoryCloud::table_key(dataset, table);
        let record = self
            .cloud
            .tables
            .get(&key)
            .ok_or_else(|| DomainError::NotFound(format!("table {key}")))?;

        let mut results = Vec::with_capacity(rows.len());
        let mut stored = record.rows.lock();
        for (index, row) in rows.iter().enumerate() {
            let value = match serde_json::to_value(row) {
                Ok(value) => value,
                Err(e) => {
                    results.push(RowResult::failed(index, format!("unserializable row: {e}")));
                    continue;
                }
            };
            match record.schema.check_row(&value) {
                Ok(()) => {
                    stored.push(value);
                    results.push(RowResult::ok(index));
                }
                Err(reason) => results.push(RowResult::failed(index, reason)),
            }
        }
        Ok(results)
    }
}
