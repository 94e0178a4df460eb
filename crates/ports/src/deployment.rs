//! Build and deploy contracts
//!
//! Deployment is observable: `deploy` returns only after the new revision
//! has reached its ready condition or the poll deadline has elapsed; on
//! deadline the error kind is Timeout, distinguishable from a transient
//! failure.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use stratoflow_core::architecture::DeploymentSpec;
use stratoflow_core::error::Result;

/// Immutable image reference produced by a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef(pub String);

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a deployed revision answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub url: String,
    /// Revision id, logged for every deployed service.
    pub revision: String,
}

/// Packages a named source module into an immutable image.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, service: &str, spec: &DeploymentSpec) -> Result<ImageRef>;
}

/// Submits a run target binding environment, secrets and an identity.
#[async_trait]
pub trait ServiceDeployer: Send + Sync {
    async fn deploy(
        &self,
        service: &str,
        image: &ImageRef,
        principal: &str,
        env: BTreeMap<String, String>,
        secret_env: BTreeMap<String, String>,
    ) -> Result<ServiceEndpoint>;

    /// Remove a deployed service. Idempotent.
    async fn teardown(&self, service: &str) -> Result<()>;
}
