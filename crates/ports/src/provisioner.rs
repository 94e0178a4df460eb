//! Uniform resource provisioning contract
//!
//! One trait per resource kind through an associated `Spec` type. Creation
//! is idempotent by name: observing "already exists with a compatible shape"
//! is success (`Existed`), an incompatible shape is a Conflict error, never
//! a silent update. Destruction tolerates absence.

use async_trait::async_trait;

use stratoflow_core::error::Result;
use stratoflow_core::provisioning::{DestroyOutcome, EnsureOutcome, Observation};

#[async_trait]
pub trait ResourceProvisioner: Send + Sync {
    /// The desired-state document for this resource kind.
    type Spec: Send + Sync;

    /// Bring the resource to the desired state.
    async fn ensure(&self, desired: &Self::Spec) -> Result<EnsureOutcome>;

    /// Remove the resource. Idempotent: an absent resource is `Absent`, not
    /// an error.
    async fn destroy(&self, name: &str) -> Result<DestroyOutcome>;

    /// Report the observed state without mutating anything.
    async fn observe(&self, name: &str) -> Result<Observation>;
}
