//! In-process Director harness
//!
//! Stands up the Director with its axum surface on an ephemeral port over a
//! fresh in-memory backend, the way a deployed Director would answer the
//! Conductor and the services.

use std::sync::Arc;

use stratoflow_adapters::{InMemoryCloud, InMemoryPubSub};
use stratoflow_core::architecture::Architecture;
use stratoflow_director::{start_server, Director, ServiceManager};

pub struct DirectorHarness {
    pub bus: Arc<InMemoryPubSub>,
    pub cloud: Arc<InMemoryCloud>,
    pub director: Arc<Director>,
    pub base_url: String,
    pub http: reqwest::Client,
}

pub async fn start_director(arch: &Architecture) -> DirectorHarness {
    let bus = Arc::new(InMemoryPubSub::new());
    let cloud = InMemoryCloud::new(Arc::clone(&bus));
    let manager = Arc::new(ServiceManager::in_memory(&cloud));

    let director = Director::new(arch.clone(), Arc::clone(&manager));
    director.init(&manager).await.expect("director init");
    let (addr, _server) = start_server(Arc::clone(&director), "127.0.0.1:0".parse().expect("addr"))
        .await
        .expect("director server");

    DirectorHarness {
        bus,
        cloud,
        director,
        base_url: format!("http://{addr}"),
        http: reqwest::Client::new(),
    }
}

impl DirectorHarness {
    pub async fn setup(&self, dataflow_name: &str) -> reqwest::Response {
        self.http
            .post(format!("{}/dataflow/setup", self.base_url))
            .json(&serde_json::json!({ "dataflow_name": dataflow_name }))
            .send()
            .await
            .expect("setup call")
    }

    pub async fn teardown(&self) -> reqwest::Response {
        self.http
            .post(format!("{}/orchestrate/teardown", self.base_url))
            .send()
            .await
            .expect("teardown call")
    }

    pub async fn healthz(&self) -> reqwest::Response {
        self.http
            .get(format!("{}/healthz", self.base_url))
            .send()
            .await
            .expect("healthz call")
    }
}
