//! Director binary
//!
//! Wires the in-memory backend behind the port contracts; provider-backed
//! adapters replace the backend without touching the Director core.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use stratoflow_adapters::{InMemoryCloud, InMemoryPubSub};
use stratoflow_core::hydration::hydrate;
use stratoflow_director::{CommandConsumer, Director, DirectorConfig, ServiceManager};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = DirectorConfig::from_env().map_err(|e| {
        error!(error = %e, "failed to load director config");
        e
    })?;
    let architecture = hydrate(&config.load_architecture()?, None)?;
    info!(
        project_id = %architecture.project_id,
        dataflows = architecture.dataflows.len(),
        "architecture loaded and hydrated"
    );

    let bus = Arc::new(InMemoryPubSub::new());
    let cloud = InMemoryCloud::new(Arc::clone(&bus));
    let manager = Arc::new(ServiceManager::in_memory(&cloud));

    let director = Director::new(architecture, Arc::clone(&manager));
    director.init(&manager).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if config.enable_command_bus {
        let consumer = CommandConsumer::new(Arc::clone(&director), bus.clone(), bus.clone());
        let consumer_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = consumer.run(consumer_shutdown).await {
                error!(error = %e, "command consumer failed");
            }
        });
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let (bound, server) = stratoflow_director::start_server(Arc::clone(&director), addr).await?;
    info!(addr = %bound, state = %director.state(), "director is running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping director");
    let _ = shutdown_tx.send(true);
    director.shutdown();
    server.abort();
    info!("director stopped");
    Ok(())
}
