//! The Conductor: phased deployment state machine
//!
//! Six ordered phases drive an architecture from source to running
//! services: preflight, Director IAM, Director deploy, remote resource
//! setup over the command bus, service IAM, and dependency-ordered service
//! deployment. Each phase is gated by an option flag; skipping the Director
//! deploy requires a `director_url` override so downstream phases keep
//! their input. Teardown runs the reverse, lifecycle-aware and
//! best-effort.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use stratoflow_core::architecture::{Architecture, ServiceSpec};
use stratoflow_core::command::{CommandEnvelope, CommandKind, DataflowSelector};
use stratoflow_core::error::{DomainError, Result};
use stratoflow_core::hydration::topological_order;
use stratoflow_core::identity::{plan_for_architecture, IamPlan};
use stratoflow_core::provisioning::ProvisionReport;
use stratoflow_core::LifecycleStrategy;
use stratoflow_ports::deployment::{ImageBuilder, ServiceDeployer};
use stratoflow_ports::iam::IamClient;
use stratoflow_ports::messaging::{SubscriberPort, TopicPublisher};

use crate::applier::{apply_plan, BackoffPolicy};
use crate::correlations::CompletionWaiter;
use crate::preflight::run_preflight;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Preflight,
    DirectorIam,
    DeployDirector,
    RemoteSetup,
    ServiceIam,
    DeployServices,
    Teardown,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Preflight => "preflight",
            Self::DirectorIam => "director-iam",
            Self::DeployDirector => "deploy-director",
            Self::RemoteSetup => "remote-setup",
            Self::ServiceIam => "service-iam",
            Self::DeployServices => "deploy-services",
            Self::Teardown => "teardown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("phase {phase} failed: {source}")]
pub struct ConductorError {
    pub phase: Phase,
    #[source]
    pub source: DomainError,
}

#[derive(Debug, Clone)]
pub struct ConductorOptions {
    pub run_setup_iam: bool,
    pub run_deploy_director: bool,
    pub run_setup_resources: bool,
    pub run_apply_iam: bool,
    pub run_deploy_services: bool,
    /// Required when `run_deploy_director` is false: the phase that would
    /// have discovered the endpoint is skipped.
    pub director_url: Option<String>,
    /// Top-level deadline for a full run.
    pub total_deadline: Duration,
    pub command_deadline: Duration,
    pub health_probe_deadline: Duration,
    pub health_probe_interval: Duration,
    pub iam_backoff: BackoffPolicy,
}

impl Default for ConductorOptions {
    fn default() -> Self {
        Self {
            run_setup_iam: true,
            run_deploy_director: true,
            run_setup_resources: true,
            run_apply_iam: true,
            run_deploy_services: true,
            director_url: None,
            total_deadline: Duration::from_secs(20 * 60),
            command_deadline: Duration::from_secs(5 * 60),
            health_probe_deadline: Duration::from_secs(60),
            health_probe_interval: Duration::from_millis(500),
            iam_backoff: BackoffPolicy::default(),
        }
    }
}

/// The port bundle a Conductor drives.
pub struct ConductorPorts {
    pub iam: Arc<dyn IamClient>,
    pub builder: Arc<dyn ImageBuilder>,
    pub deployer: Arc<dyn ServiceDeployer>,
    pub publisher: Arc<dyn TopicPublisher>,
    pub subscriber: Arc<dyn SubscriberPort>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub status: PhaseStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Completed,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployedService {
    pub dataflow: String,
    pub service: String,
    pub revision: String,
    pub url: String,
}

/// The single structured summary a run emits.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub phases: Vec<PhaseOutcome>,
    pub deployed: Vec<DeployedService>,
    /// Services never attempted because a dependency failed.
    pub skipped_services: Vec<String>,
}

pub struct Conductor {
    architecture: Architecture,
    options: ConductorOptions,
    ports: ConductorPorts,
    http: reqwest::Client,
}

impl Conductor {
    /// Build a Conductor over a hydrated architecture.
    ///
    /// Skipping the Director deploy without a `director_url` override is
    /// rejected up front: downstream phases would have no control endpoint.
    pub fn new(
        architecture: Architecture,
        options: ConductorOptions,
        ports: ConductorPorts,
    ) -> Result<Self> {
        if !options.run_deploy_director && options.director_url.is_none() {
            return Err(DomainError::Precondition(
                "director_url is required when the deploy-director phase is skipped".into(),
            ));
        }
        Ok(Self {
            architecture,
            options,
            ports,
            http: reqwest::Client::new(),
        })
    }

    /// Run the deployment phases in order. The first failed phase aborts the
    /// run; the summary carries per-phase outcomes either way.
    pub async fn run(&self) -> std::result::Result<RunSummary, Box<ConductorError>> {
        let deadline = Instant::now() + self.options.total_deadline;
        let mut summary = RunSummary::default();

        // Phase 1: preflight always runs.
        self.execute_phase(Phase::Preflight, &mut summary, deadline, true, |c| async move {
            run_preflight(&c.architecture)
        })
        .await?;

        // Phase 2: Director IAM.
        let director_plan = self.director_plan();
        self.execute_phase(
            Phase::DirectorIam,
            &mut summary,
            deadline,
            self.options.run_setup_iam,
            |c| async move {
                apply_plan(&*c.ports.iam, &director_plan, &c.options.iam_backoff).await
            },
        )
        .await?;

        // Phase 3: build and deploy the Director, then probe its health.
        let mut director_url = self.options.director_url.clone();
        if self.options.run_deploy_director {
            let started = Instant::now();
            match self.deploy_director(deadline).await {
                Ok(endpoint) => {
                    info!(
                        phase = %Phase::DeployDirector,
                        url = %endpoint.url,
                        revision = %endpoint.revision,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "phase completed"
                    );
                    director_url = Some(endpoint.url);
                    summary.phases.push(PhaseOutcome {
                        phase: Phase::DeployDirector,
                        status: PhaseStatus::Completed,
                    });
                }
                Err(e) => {
                    return Err(self.fail(Phase::DeployDirector, e, &mut summary));
                }
            }
        } else {
            info!(phase = %Phase::DeployDirector, "phase skipped, using director_url override");
            summary.phases.push(PhaseOutcome {
                phase: Phase::DeployDirector,
                status: PhaseStatus::Skipped,
            });
        }
        let director_url = director_url.unwrap_or_default();

        // Phase 4: remote resource setup over the command bus.
        self.execute_phase(
            Phase::RemoteSetup,
            &mut summary,
            deadline,
            self.options.run_setup_resources,
            |c| async move { c.remote_setup().await.map(|_| ()) },
        )
        .await?;

        // Phase 5: the full capability plan, polled until visible.
        let full_plan = plan_for_architecture(&self.architecture);
        self.execute_phase(
            Phase::ServiceIam,
            &mut summary,
            deadline,
            self.options.run_apply_iam,
            |c| async move { apply_plan(&*c.ports.iam, &full_plan, &c.options.iam_backoff).await },
        )
        .await?;

        // Phase 6: build and deploy services in dependency order.
        if self.options.run_deploy_services {
            match self.deploy_services(&director_url, &mut summary).await {
                Ok(()) => summary.phases.push(PhaseOutcome {
                    phase: Phase::DeployServices,
                    status: PhaseStatus::Completed,
                }),
                Err(e) => return Err(self.fail(Phase::DeployServices, e, &mut summary)),
            }
        } else {
            summary.phases.push(PhaseOutcome {
                phase: Phase::DeployServices,
                status: PhaseStatus::Skipped,
            });
        }

        self.log_summary(&summary);
        Ok(summary)
    }

    /// Reverse, lifecycle-aware teardown. Best-effort: every step is
    /// attempted and logged, nothing aborts.
    pub async fn teardown(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut failures = Vec::new();

        // Application services first.
        for (dataflow, svc) in self.architecture.all_services() {
            match self.ports.deployer.teardown(&svc.name).await {
                Ok(()) => info!(dataflow, service = %svc.name, "service torn down"),
                Err(e) => {
                    warn!(dataflow, service = %svc.name, error = %e, "service teardown failed");
                    failures.push(format!("service {}: {e}", svc.name));
                }
            }
        }

        // Remote resources through the Director, honoring lifecycle policy.
        match self.send_command(CommandKind::Teardown).await {
            Ok(report) => {
                for item in &report.items {
                    info!(resource = %format!("{} {}", item.kind, item.name), outcome = %item.outcome, "teardown outcome");
                }
            }
            Err(e) => {
                warn!(error = %e, "remote teardown command failed");
                failures.push(format!("remote teardown: {e}"));
            }
        }

        // Then the Director itself.
        let director = &self.architecture.service_manager_spec;
        if let Err(e) = self.ports.deployer.teardown(&director.name).await {
            warn!(error = %e, "director teardown failed");
            failures.push(format!("director: {e}"));
        }

        // Finally the principals of ephemeral dataflows.
        for (name, flow) in &self.architecture.dataflows {
            if flow.lifecycle.strategy != LifecycleStrategy::Ephemeral {
                info!(dataflow = %name, "permanent lifecycle, principals retained");
                continue;
            }
            for svc in flow.services.values() {
                if let Err(e) = self.ports.iam.delete_principal(&svc.service_account).await {
                    warn!(principal = %svc.service_account, error = %e, "principal revocation failed");
                    failures.push(format!("principal {}: {e}", svc.service_account));
                }
            }
        }
        if self
            .architecture
            .dataflows
            .values()
            .all(|f| f.lifecycle.strategy == LifecycleStrategy::Ephemeral)
        {
            if let Err(e) = self.ports.iam.delete_principal(&director.service_account).await {
                warn!(error = %e, "director principal revocation failed");
                failures.push(format!("principal {}: {e}", director.service_account));
            }
        }

        summary.phases.push(PhaseOutcome {
            phase: Phase::Teardown,
            status: if failures.is_empty() {
                PhaseStatus::Completed
            } else {
                PhaseStatus::Failed(failures.join("; "))
            },
        });
        self.log_summary(&summary);
        summary
    }

    // ---- phase helpers ----

    async fn execute_phase<'a, F, Fut>(
        &'a self,
        phase: Phase,
        summary: &mut RunSummary,
        deadline: Instant,
        enabled: bool,
        body: F,
    ) -> std::result::Result<(), Box<ConductorError>>
    where
        F: FnOnce(&'a Conductor) -> Fut,
        Fut: std::future::Future<Output = Result<()>> + 'a,
    {
        if !enabled {
            info!(phase = %phase, "phase skipped by options");
            summary.phases.push(PhaseOutcome {
                phase,
                status: PhaseStatus::Skipped,
            });
            return Ok(());
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(self.fail(
                phase,
                DomainError::Timeout("top-level deadline spent before phase start".into()),
                summary,
            ));
        }

        let started = Instant::now();
        info!(phase = %phase, "phase starting");
        let result = match tokio::time::timeout(remaining, body(self)).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::Timeout(
                "top-level deadline elapsed during phase".into(),
            )),
        };
        match result {
            Ok(()) => {
                info!(phase = %phase, elapsed_ms = started.elapsed().as_millis() as u64, "phase completed");
                summary.phases.push(PhaseOutcome {
                    phase,
                    status: PhaseStatus::Completed,
                });
                Ok(())
            }
            Err(e) => Err(self.fail(phase, e, summary)),
        }
    }

    fn fail(
        &self,
        phase: Phase,
        source: DomainError,
        summary: &mut RunSummary,
    ) -> Box<ConductorError> {
        error!(phase = %phase, error = %source, "phase failed");
        summary.phases.push(PhaseOutcome {
            phase,
            status: PhaseStatus::Failed(source.to_string()),
        });
        self.log_summary(summary);
        Box::new(ConductorError { phase, source })
    }

    fn log_summary(&self, summary: &RunSummary) {
        match serde_json::to_string(summary) {
            Ok(json) => info!(summary = %json, "conductor run summary"),
            Err(e) => warn!(error = %e, "failed to encode run summary"),
        }
    }

    /// The Director's own slice of the capability plan, applied before the
    /// Director is deployed.
    fn director_plan(&self) -> IamPlan {
        let full = plan_for_architecture(&self.architecture);
        let director_sa = &self.architecture.service_manager_spec.service_account;
        IamPlan {
            bindings: full
                .bindings
                .into_iter()
                .filter(|b| b.principal == *director_sa)
                .collect(),
        }
    }

    async fn deploy_director(
        &self,
        deadline: Instant,
    ) -> Result<stratoflow_ports::deployment::ServiceEndpoint> {
        let director = &self.architecture.service_manager_spec;
        let image = self
            .ports
            .builder
            .build(&director.name, &director.deployment)
            .await?;
        let mut env = director.deployment.environment_vars.clone();
        env.insert("PROJECT_ID".to_string(), self.architecture.project_id.clone());
        env.insert("SERVICE_NAME".to_string(), director.name.clone());
        let endpoint = self
            .ports
            .deployer
            .deploy(
                &director.name,
                &image,
                &director.service_account,
                env,
                director.deployment.secret_environment_vars.clone(),
            )
            .await?;
        info!(
            service = %director.name,
            revision = %endpoint.revision,
            url = %endpoint.url,
            "director deployed"
        );

        let probe_deadline = deadline
            .saturating_duration_since(Instant::now())
            .min(self.options.health_probe_deadline);
        self.probe_healthz(&endpoint.url, probe_deadline).await?;
        Ok(endpoint)
    }

    async fn probe_healthz(&self, base_url: &str, deadline: Duration) -> Result<()> {
        let target = format!("{}/healthz", base_url.trim_end_matches('/'));
        let stop_at = Instant::now() + deadline;
        loop {
            match self.http.get(&target).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(url = %target, "director is healthy");
                    return Ok(());
                }
                Ok(resp) => {
                    warn!(url = %target, status = %resp.status(), "health probe not ready");
                }
                Err(e) => {
                    warn!(url = %target, error = %e, "health probe failed");
                }
            }
            if Instant::now() >= stop_at {
                return Err(DomainError::Timeout(format!(
                    "director at {target} never reported healthy"
                )));
            }
            tokio::time::sleep(self.options.health_probe_interval).await;
        }
    }

    /// Send SETUP for all dataflows and await the correlated completion.
    async fn remote_setup(&self) -> Result<ProvisionReport> {
        self.send_command(CommandKind::Setup).await
    }

    async fn send_command(&self, kind: CommandKind) -> Result<ProvisionReport> {
        let director = &self.architecture.service_manager_spec;
        let waiter = CompletionWaiter::start(
            Arc::clone(&self.ports.subscriber),
            &director.completion_subscription,
        )
        .await?;

        let command = CommandEnvelope::new(
            kind,
            DataflowSelector::All,
            chrono::Duration::from_std(self.options.command_deadline)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
        );
        let rx = waiter.register(command.correlation_id);
        info!(
            correlation_id = %command.correlation_id,
            kind = ?kind,
            topic = %director.command_topic,
            "sending command"
        );
        self.ports
            .publisher
            .publish(
                &director.command_topic,
                command.to_bytes()?,
                std::collections::HashMap::new(),
            )
            .await?;

        let completion = waiter
            .wait(command.correlation_id, rx, self.options.command_deadline)
            .await?;
        match completion.status {
            stratoflow_core::command::CompletionStatus::Success => {
                info!(correlation_id = %command.correlation_id, "command completed");
                Ok(completion.report.unwrap_or_default())
            }
            stratoflow_core::command::CompletionStatus::Failure { message } => {
                Err(DomainError::Precondition(format!(
                    "command {} failed remotely: {message}",
                    command.correlation_id
                )))
            }
        }
    }

    /// Build and deploy every service, topologically ordered per dataflow.
    /// A failure skips the whole dependent subtree but independent branches
    /// continue; the phase fails if anything failed.
    async fn deploy_services(
        &self,
        director_url: &str,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let mut first_error: Option<DomainError> = None;

        for (dataflow, flow) in &self.architecture.dataflows {
            let order = topological_order(flow)?;
            let mut unavailable: BTreeSet<&str> = BTreeSet::new();

            for name in &order {
                let svc = match flow.services.get(name) {
                    Some(svc) => svc,
                    None => continue,
                };
                if let Some(dep) = svc
                    .dependencies
                    .iter()
                    .find(|d| unavailable.contains(d.as_str()))
                {
                    warn!(
                        dataflow,
                        service = %name,
                        dependency = %dep,
                        "skipping service, dependency unavailable"
                    );
                    unavailable.insert(name.as_str());
                    summary.skipped_services.push(name.clone());
                    continue;
                }

                match self.build_and_deploy(dataflow, svc, director_url).await {
                    Ok(deployed) => {
                        info!(
                            dataflow,
                            service = %deployed.service,
                            revision = %deployed.revision,
                            "service deployed"
                        );
                        summary.deployed.push(deployed);
                    }
                    Err(e) => {
                        error!(dataflow, service = %name, error = %e, "service deploy failed");
                        unavailable.insert(name.as_str());
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    async fn build_and_deploy(
        &self,
        dataflow: &str,
        svc: &ServiceSpec,
        director_url: &str,
    ) -> Result<DeployedService> {
        let image = self.ports.builder.build(&svc.name, &svc.deployment).await?;
        let env = self.service_env(dataflow, svc, director_url);
        let endpoint = self
            .ports
            .deployer
            .deploy(
                &svc.name,
                &image,
                &svc.service_account,
                env,
                svc.deployment.secret_environment_vars.clone(),
            )
            .await?;
        Ok(DeployedService {
            dataflow: dataflow.to_string(),
            service: svc.name.clone(),
            revision: endpoint.revision,
            url: endpoint.url,
        })
    }

    fn service_env(
        &self,
        dataflow: &str,
        svc: &ServiceSpec,
        director_url: &str,
    ) -> BTreeMap<String, String> {
        let mut env = svc.deployment.environment_vars.clone();
        env.insert("PROJECT_ID".to_string(), self.architecture.project_id.clone());
        env.insert("SERVICE_NAME".to_string(), svc.name.clone());
        env.insert("DATAFLOW_NAME".to_string(), dataflow.to_string());
        env.insert(
            "SERVICE_DIRECTOR_URL".to_string(),
            director_url.to_string(),
        );
        env
    }
}
