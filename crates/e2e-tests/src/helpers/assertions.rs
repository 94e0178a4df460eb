//! Deadline-bounded sink pollers

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use stratoflow_adapters::{InMemoryCloud, InMemoryObjectStore};
use stratoflow_ports::stores::ObjectStore;

/// Poll `condition` until it holds or the deadline elapses.
pub async fn wait_for<F, Fut>(deadline: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let stop_at = Instant::now() + deadline;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= stop_at {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Wait until the table holds at least `expected` rows.
pub async fn wait_for_row_count(
    cloud: &Arc<InMemoryCloud>,
    dataset: &str,
    table: &str,
    expected: usize,
    deadline: Duration,
) -> bool {
    let cloud = Arc::clone(cloud);
    let dataset = dataset.to_string();
    let table = table.to_string();
    wait_for(deadline, Duration::from_millis(100), move || {
        let cloud = Arc::clone(&cloud);
        let dataset = dataset.clone();
        let table = table.clone();
        async move { cloud.table_row_count(&dataset, &table) >= expected }
    })
    .await
}

/// Total NDJSON records across every object under the prefix.
pub async fn count_archive_records(
    cloud: &Arc<InMemoryCloud>,
    bucket: &str,
    prefix: &str,
) -> usize {
    let store = InMemoryObjectStore::new(Arc::clone(cloud));
    let keys = match store.list_objects(bucket, prefix).await {
        Ok(keys) => keys,
        Err(_) => return 0,
    };
    let mut records = 0usize;
    for key in keys {
        if let Ok(data) = store.get_object(bucket, &key).await {
            records += data.split(|b| *b == b'\n').filter(|l| !l.is_empty()).count();
        }
    }
    records
}
