//! Device load generator
//!
//! Simulated devices publish readings at a fixed per-device rate for a
//! duration. The generator reports both the expected and the actually
//! published count so scenarios can assert end-to-end conservation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use stratoflow_core::error::Result;
use stratoflow_ports::messaging::TopicPublisher;

/// The raw payload a device publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    /// Messages per second.
    pub message_rate: f64,
}

pub struct LoadGenerator {
    publisher: Arc<dyn TopicPublisher>,
    topic: String,
    devices: Vec<Device>,
}

impl LoadGenerator {
    pub fn new(publisher: Arc<dyn TopicPublisher>, topic: impl Into<String>, devices: Vec<Device>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            devices,
        }
    }

    /// How many messages all devices will publish over `duration`.
    pub fn expected_messages_for(&self, duration: Duration) -> usize {
        self.devices
            .iter()
            .map(|d| (d.message_rate * duration.as_secs_f64()).round() as usize)
            .sum()
    }

    /// Run every device until the duration elapses; returns the published
    /// count.
    pub async fn run(&self, duration: Duration) -> Result<usize> {
        let mut tasks = Vec::with_capacity(self.devices.len());
        for device in &self.devices {
            let publisher = Arc::clone(&self.publisher);
            let topic = self.topic.clone();
            let device = device.clone();
            tasks.push(tokio::spawn(async move {
                run_device(publisher, topic, device, duration).await
            }));
        }

        let mut published = 0usize;
        for task in tasks {
            published += task
                .await
                .map_err(|e| stratoflow_core::DomainError::Infrastructure(e.to_string()))??;
        }
        info!(published, topic = %self.topic, "load generation finished");
        Ok(published)
    }
}

async fn run_device(
    publisher: Arc<dyn TopicPublisher>,
    topic: String,
    device: Device,
    duration: Duration,
) -> Result<usize> {
    let total = (device.message_rate * duration.as_secs_f64()).round() as usize;
    if total == 0 {
        return Ok(0);
    }
    let interval = duration.div_f64(total as f64);
    let mut ticker = tokio::time::interval(interval);

    let mut published = 0usize;
    for _ in 0..total {
        ticker.tick().await;
        let reading = RawReading {
            device_id: device.id.clone(),
            timestamp: Utc::now(),
            value: 20.0 + published as f64,
        };
        let payload = serde_json::to_vec(&reading)
            .map_err(|e| stratoflow_core::DomainError::Processing(e.to_string()))?;
        let attributes = HashMap::from([("uid".to_string(), device.id.clone())]);
        publisher.publish(&topic, payload, attributes).await?;
        published += 1;
    }
    Ok(published)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratoflow_adapters::InMemoryPubSub;

    #[tokio::test]
    async fn publishes_expected_count_with_uid_attribute() {
        let bus = Arc::new(InMemoryPubSub::new());
        bus.create_topic("readings");
        bus.create_subscription("readings-sub", "readings").unwrap();

        let generator = LoadGenerator::new(
            Arc::clone(&bus) as Arc<dyn TopicPublisher>,
            "readings",
            vec![
                Device {
                    id: "dev-0".into(),
                    message_rate: 10.0,
                },
                Device {
                    id: "dev-1".into(),
                    message_rate: 10.0,
                },
            ],
        );

        let duration = Duration::from_millis(500);
        let expected = generator.expected_messages_for(duration);
        let published = generator.run(duration).await.unwrap();

        assert_eq!(expected, 10);
        assert_eq!(published, expected);
        assert_eq!(bus.backlog("readings-sub"), expected);
    }
}
