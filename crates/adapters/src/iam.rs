//! In-memory IAM with simulated grant propagation
//!
//! Grants succeed immediately but only become observable after the
//! configured propagation delay, so the applier's bounded polling is
//! exercised the way it would be against a real identity backend.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use stratoflow_core::error::Result;
use stratoflow_core::identity::CapabilityBinding;
use stratoflow_ports::iam::IamClient;

pub struct InMemoryIam {
    project_id: String,
    principals: DashSet<String>,
    grants: DashMap<String, Grant>,
    propagation_delay: Duration,
}

struct Grant {
    principal: String,
    granted_at: Instant,
}

impl InMemoryIam {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self::with_propagation_delay(project_id, Duration::from_millis(50))
    }

    pub fn with_propagation_delay(project_id: impl Into<String>, delay: Duration) -> Self {
        Self {
            project_id: project_id.into(),
            principals: DashSet::new(),
            grants: DashMap::new(),
            propagation_delay: delay,
        }
    }

    fn binding_key(binding: &CapabilityBinding) -> String {
        format!(
            "{}|{}|{:?}",
            binding.principal, binding.resource, binding.role
        )
    }

    pub fn principal_exists(&self, logical_name: &str) -> bool {
        self.principals.contains(logical_name)
    }

    pub fn grant_count(&self) -> usize {
        self.grants.len()
    }
}

#[async_trait]
impl IamClient for InMemoryIam {
    async fn ensure_principal(&self, logical_name: &str) -> Result<String> {
        self.principals.insert(logical_name.to_string());
        Ok(format!("{logical_name}@{}.principals.local", self.project_id))
    }

    async fn grant(&self, binding: &CapabilityBinding) -> Result<()> {
        // Re-granting keeps the original timestamp: propagation is counted
        // from the first grant.
        self.grants
            .entry(Self::binding_key(binding))
            .or_insert_with(|| Grant {
                principal: binding.principal.clone(),
                granted_at: Instant::now(),
            });
        Ok(())
    }

    async fn observe_binding(&self, binding: &CapabilityBinding) -> Result<bool> {
        Ok(self
            .grants
            .get(&Self::binding_key(binding))
            .map(|g| g.granted_at.elapsed() >= self.propagation_delay)
            .unwrap_or(false))
    }

    async fn revoke(&self, binding: &CapabilityBinding) -> Result<()> {
        self.grants.remove(&Self::binding_key(binding));
        Ok(())
    }

    async fn delete_principal(&self, logical_name: &str) -> Result<()> {
        self.principals.remove(logical_name);
        self.grants.retain(|_, g| g.principal != logical_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratoflow_core::identity::{ResourceRef, Role};

    fn binding() -> CapabilityBinding {
        CapabilityBinding {
            principal: "ingest-sa".into(),
            resource: ResourceRef::Topic("readings".into()),
            role: Role::Publisher,
        }
    }

    #[tokio::test]
    async fn grants_become_visible_after_propagation() {
        let iam = InMemoryIam::with_propagation_delay("demo", Duration::from_millis(30));
        iam.ensure_principal("ingest-sa").await.unwrap();
        iam.grant(&binding()).await.unwrap();

        assert!(!iam.observe_binding(&binding()).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(iam.observe_binding(&binding()).await.unwrap());
    }

    #[tokio::test]
    async fn deleting_a_principal_revokes_its_grants() {
        let iam = InMemoryIam::with_propagation_delay("demo", Duration::ZERO);
        iam.ensure_principal("ingest-sa").await.unwrap();
        iam.grant(&binding()).await.unwrap();
        assert_eq!(iam.grant_count(), 1);

        iam.delete_principal("ingest-sa").await.unwrap();
        assert!(!iam.principal_exists("ingest-sa"));
        assert_eq!(iam.grant_count(), 0);
        assert!(!iam.observe_binding(&binding()).await.unwrap());
    }
}
