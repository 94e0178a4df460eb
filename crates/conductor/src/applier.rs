//! IAM plan application with bounded visibility polling
//!
//! Grants succeed long before they are effective. The applier performs every
//! grant, then polls `observe_binding` with exponential backoff until the
//! whole plan is visible or the budget is spent, surfacing the unresolved
//! set on failure.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use stratoflow_core::error::{DomainError, Result};
use stratoflow_core::identity::IamPlan;
use stratoflow_ports::iam::IamClient;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Total time budget for the visibility poll.
    pub budget: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            max: Duration::from_secs(5),
            multiplier: 2.0,
            budget: Duration::from_secs(120),
        }
    }
}

impl BackoffPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        let scaled = current.mul_f64(self.multiplier);
        scaled.min(self.max)
    }
}

/// Ensure principals, perform grants, and wait for every binding to become
/// observable.
pub async fn apply_plan(
    iam: &dyn IamClient,
    plan: &IamPlan,
    policy: &BackoffPolicy,
) -> Result<()> {
    let principals: BTreeSet<&str> = plan.bindings.iter().map(|b| b.principal.as_str()).collect();
    for principal in &principals {
        let resolved = iam.ensure_principal(principal).await?;
        debug!(principal, resolved = %resolved, "principal ready");
    }

    for binding in &plan.bindings {
        grant_with_retries(iam, binding).await?;
    }
    info!(
        bindings = plan.len(),
        principals = principals.len(),
        "plan granted, waiting for visibility"
    );

    let deadline = Instant::now() + policy.budget;
    let mut delay = policy.initial;
    let mut unresolved: Vec<_> = plan.bindings.iter().collect();
    loop {
        let mut still_pending = Vec::new();
        for binding in unresolved {
            if !iam.observe_binding(binding).await? {
                still_pending.push(binding);
            }
        }
        if still_pending.is_empty() {
            info!("every binding is observable");
            return Ok(());
        }
        if Instant::now() + delay >= deadline {
            let sample: Vec<String> = still_pending.iter().take(5).map(|b| b.to_string()).collect();
            return Err(DomainError::Timeout(format!(
                "{} bindings never became visible, first: {}",
                still_pending.len(),
                sample.join("; ")
            )));
        }
        debug!(pending = still_pending.len(), delay_ms = delay.as_millis() as u64, "bindings not yet visible");
        tokio::time::sleep(delay).await;
        delay = policy.next_delay(delay);
        unresolved = still_pending;
    }
}

async fn grant_with_retries(
    iam: &dyn IamClient,
    binding: &stratoflow_core::identity::CapabilityBinding,
) -> Result<()> {
    let mut attempts = 0;
    loop {
        match iam.grant(binding).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempts < 3 => {
                attempts += 1;
                warn!(binding = %binding, attempt = attempts, error = %e, "grant failed, retrying");
                tokio::time::sleep(Duration::from_millis(50 * attempts)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use stratoflow_adapters::InMemoryIam;
    use stratoflow_core::identity::{CapabilityBinding, ResourceRef, Role};

    fn plan_of(bindings: Vec<CapabilityBinding>) -> IamPlan {
        IamPlan {
            bindings: BTreeSet::from_iter(bindings),
        }
    }

    #[tokio::test]
    async fn applies_and_waits_for_propagation() {
        let iam = InMemoryIam::with_propagation_delay("demo", Duration::from_millis(60));
        let plan = plan_of(vec![CapabilityBinding {
            principal: "ingest-sa".into(),
            resource: ResourceRef::Topic("readings".into()),
            role: Role::Publisher,
        }]);

        let policy = BackoffPolicy {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(50),
            multiplier: 2.0,
            budget: Duration::from_secs(2),
        };
        apply_plan(&iam, &plan, &policy).await.unwrap();

        for binding in &plan.bindings {
            assert!(iam.observe_binding(binding).await.unwrap());
        }
    }

    #[tokio::test]
    async fn exhausted_budget_surfaces_unresolved_set() {
        // A propagation delay far beyond the budget: visibility never comes.
        let iam = InMemoryIam::with_propagation_delay("demo", Duration::from_secs(60));
        let plan = plan_of(vec![CapabilityBinding {
            principal: "sink-sa".into(),
            resource: ResourceRef::Dataset("telemetry".into()),
            role: Role::DatasetViewer,
        }]);

        let policy = BackoffPolicy {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(20),
            multiplier: 2.0,
            budget: Duration::from_millis(100),
        };
        let err = apply_plan(&iam, &plan, &policy).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("sink-sa"));
    }

    #[tokio::test]
    async fn empty_plan_is_a_noop() {
        let iam = InMemoryIam::new("demo");
        apply_plan(&iam, &IamPlan::default(), &BackoffPolicy::default())
            .await
            .unwrap();
    }
}
