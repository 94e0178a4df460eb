//! Conductor CLI
//!
//! Exit code 0 on success; on the first failed phase the process exits
//! non-zero after printing the phase tag. The binary wires the in-memory
//! adapter set; provider-backed adapters slot in behind the same ports.
//! Without a `--director-url` an embedded in-process Director backs the
//! run, so a full local emulation works end to end.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use stratoflow_adapters::{
    InMemoryBuilder, InMemoryCloud, InMemoryDeployer, InMemoryIam, InMemoryPubSub,
};
use stratoflow_conductor::{Conductor, ConductorOptions, ConductorPorts};
use stratoflow_core::schema_registry::{self, FieldKind, FieldSchema, TableSchema};
use stratoflow_core::{hydrate, Architecture};
use stratoflow_director::{CommandConsumer, Director, ServiceManager};

#[derive(Debug, Parser)]
#[command(name = "conductor", about = "Deploy a Stratoflow architecture")]
struct Cli {
    /// Target project id (required, environment-specific).
    #[arg(long)]
    project_id: String,

    /// Architecture document.
    #[arg(long, default_value = "services.yaml")]
    services_file: PathBuf,

    /// Tear down deployed services and resources instead of deploying.
    #[arg(long, default_value_t = false)]
    teardown: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    run_setup_iam: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    run_deploy_director: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    run_setup_resources: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    run_apply_iam: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    run_deploy_services: bool,

    /// Control endpoint of an already-running Director; required when
    /// --run-deploy-director=false.
    #[arg(long)]
    director_url: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    register_builtin_schemas();

    let architecture = match load_architecture(&cli) {
        Ok(arch) => arch,
        Err(e) => {
            error!(error = %e, "failed to load architecture");
            return ExitCode::FAILURE;
        }
    };
    info!(
        project_id = %architecture.project_id,
        dataflows = architecture.dataflows.len(),
        "architecture hydrated"
    );

    let bus = Arc::new(InMemoryPubSub::new());
    let deployer = Arc::new(InMemoryDeployer::new());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    // Local emulation: without an external endpoint, an embedded Director
    // answers the control plane over the shared in-memory backend.
    if cli.director_url.is_none() {
        let cloud = InMemoryCloud::new(Arc::clone(&bus));
        let manager = Arc::new(ServiceManager::in_memory(&cloud));
        let director = Director::new(architecture.clone(), Arc::clone(&manager));
        if let Err(e) = director.init(&manager).await {
            error!(error = %e, "embedded director failed to initialize");
            return ExitCode::FAILURE;
        }
        let (addr, _server) = match stratoflow_director::start_server(
            Arc::clone(&director),
            SocketAddr::from(([127, 0, 0, 1], 0)),
        )
        .await
        {
            Ok(bound) => bound,
            Err(e) => {
                error!(error = %e, "embedded director failed to serve");
                return ExitCode::FAILURE;
            }
        };
        let consumer = CommandConsumer::new(Arc::clone(&director), bus.clone(), bus.clone());
        let consumer_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = consumer.run(consumer_shutdown).await {
                error!(error = %e, "embedded command consumer failed");
            }
        });
        deployer.override_endpoint(
            &architecture.service_manager_spec.name,
            format!("http://{addr}"),
        );
        info!(addr = %addr, "embedded director running for local emulation");
    }

    let ports = ConductorPorts {
        iam: Arc::new(InMemoryIam::new(&architecture.project_id)),
        builder: Arc::new(InMemoryBuilder::new()),
        deployer,
        publisher: bus.clone(),
        subscriber: bus,
    };

    let options = ConductorOptions {
        run_setup_iam: cli.run_setup_iam,
        run_deploy_director: cli.run_deploy_director,
        run_setup_resources: cli.run_setup_resources,
        run_apply_iam: cli.run_apply_iam,
        run_deploy_services: cli.run_deploy_services,
        director_url: cli.director_url.clone(),
        ..Default::default()
    };

    let conductor = match Conductor::new(architecture, options, ports) {
        Ok(conductor) => conductor,
        Err(e) => {
            error!(error = %e, "failed to create conductor");
            return ExitCode::FAILURE;
        }
    };

    if cli.teardown {
        info!("starting teardown");
        conductor.teardown().await;
        info!("teardown complete");
        return ExitCode::SUCCESS;
    }

    match conductor.run().await {
        Ok(summary) => {
            info!(
                deployed = summary.deployed.len(),
                skipped = summary.skipped_services.len(),
                "conductor successfully deployed the architecture"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(phase = %e.phase, error = %e.source, "conductor run failed");
            eprintln!("conductor failed in phase {}: {}", e.phase, e.source);
            ExitCode::FAILURE
        }
    }
}

fn load_architecture(cli: &Cli) -> Result<Architecture, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(&cli.services_file)?;
    let mut arch: Architecture = serde_yaml::from_str(&content)?;
    // The project id is environment-specific and always comes from the CLI.
    arch.project_id = cli.project_id.clone();
    Ok(hydrate(&arch, None)?)
}

/// Schemas for the stock telemetry dataflows. Deployments with their own
/// table shapes register them before hydration.
fn register_builtin_schemas() {
    let reading = TableSchema::new(vec![
        FieldSchema::required("device_id", FieldKind::String),
        FieldSchema::required("timestamp", FieldKind::Timestamp),
        FieldSchema::required("value", FieldKind::Float),
    ]);
    let enriched = TableSchema::new(vec![
        FieldSchema::required("device_id", FieldKind::String),
        FieldSchema::required("timestamp", FieldKind::Timestamp),
        FieldSchema::required("value", FieldKind::Float),
        FieldSchema::optional("client_id", FieldKind::String),
        FieldSchema::optional("location_id", FieldKind::String),
        FieldSchema::optional("category", FieldKind::String),
    ]);
    for (id, schema) in [
        ("stratoflow.telemetry.Reading", reading),
        ("stratoflow.telemetry.EnrichedReading", enriched),
    ] {
        if let Err(e) = schema_registry::register_schema(id, schema) {
            error!(schema = id, error = %e, "builtin schema registration failed");
        }
    }
    // Late registrations are programming errors from here on.
    schema_registry::seal();
}
