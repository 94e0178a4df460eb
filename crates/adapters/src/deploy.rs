//! In-memory build and deploy
//!
//! The builder records the image it "produced"; the deployer registers a
//! revision that becomes ready after a configurable delay and polls it the
//! way a real run target is polled, returning a Timeout error kind when the
//! deadline elapses first. Tests that drive a real in-process service can
//! register an endpoint override so probes hit a live listener.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use stratoflow_core::architecture::DeploymentSpec;
use stratoflow_core::error::{DomainError, Result};
use stratoflow_core::hydration::short_token;
use stratoflow_ports::deployment::{ImageBuilder, ImageRef, ServiceDeployer, ServiceEndpoint};

pub struct InMemoryBuilder {
    built: DashMap<String, ImageRef>,
}

impl Default for InMemoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBuilder {
    pub fn new() -> Self {
        Self {
            built: DashMap::new(),
        }
    }

    pub fn built_image(&self, service: &str) -> Option<ImageRef> {
        self.built.get(service).map(|i| i.clone())
    }
}

#[async_trait]
impl ImageBuilder for InMemoryBuilder {
    async fn build(&self, service: &str, spec: &DeploymentSpec) -> Result<ImageRef> {
        if spec.source_path.is_empty() {
            return Err(DomainError::Precondition(format!(
                "service {service} has no source path"
            )));
        }
        let image = if spec.image.is_empty() {
            ImageRef(format!("local/{service}:{}", short_token()))
        } else {
            ImageRef(spec.image.clone())
        };
        info!(service, image = %image, "built image");
        self.built.insert(service.to_string(), image.clone());
        Ok(image)
    }
}

struct DeployedService {
    endpoint: ServiceEndpoint,
    ready_at: Instant,
}

pub struct InMemoryDeployer {
    services: DashMap<String, Arc<DeployedService>>,
    endpoint_overrides: DashMap<String, String>,
    readiness_delay: Duration,
    poll_interval: Duration,
    poll_deadline: Duration,
}

impl InMemoryDeployer {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            endpoint_overrides: DashMap::new(),
            readiness_delay: Duration::from_millis(20),
            poll_interval: Duration::from_millis(10),
            poll_deadline: Duration::from_secs(5),
        }
    }

    pub fn with_timings(
        readiness_delay: Duration,
        poll_interval: Duration,
        poll_deadline: Duration,
    ) -> Self {
        Self {
            readiness_delay,
            poll_interval,
            poll_deadline,
            ..Self::new()
        }
    }

    /// Route a service's endpoint to a live listener (e.g. an in-process
    /// Director started by a test harness).
    pub fn override_endpoint(&self, service: &str, url: impl Into<String>) {
        self.endpoint_overrides
            .insert(service.to_string(), url.into());
    }

    pub fn is_deployed(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }
}

impl Default for InMemoryDeployer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceDeployer for InMemoryDeployer {
    async fn deploy(
        &self,
        service: &str,
        image: &ImageRef,
        principal: &str,
        env: BTreeMap<String, String>,
        secret_env: BTreeMap<String, String>,
    ) -> Result<ServiceEndpoint> {
        let revision = format!("{service}-{}", short_token());
        let url = self
            .endpoint_overrides
            .get(service)
            .map(|u| u.clone())
            .unwrap_or_else(|| format!("http://{service}.run.local"));
        info!(
            service,
            image = %image,
            principal,
            revision = %revision,
            env_vars = env.len(),
            secrets = secret_env.len(),
            "submitted revision"
        );

        let deployed = Arc::new(DeployedService {
            endpoint: ServiceEndpoint {
                url,
                revision: revision.clone(),
            },
            ready_at: Instant::now() + self.readiness_delay,
        });
        self.services.insert(service.to_string(), Arc::clone(&deployed));

        // Deployment is observable: return only after the revision reports
        // ready or the poll deadline elapses.
        let deadline = Instant::now() + self.poll_deadline;
        loop {
            if Instant::now() >= deployed.ready_at {
                info!(service, revision = %revision, "revision ready");
                return Ok(deployed.endpoint.clone());
            }
            if Instant::now() >= deadline {
                return Err(DomainError::Timeout(format!(
                    "revision {revision} of {service} never became ready"
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn teardown(&self, service: &str) -> Result<()> {
        self.services.remove(service);
        Ok(())
    }
}
