//! Identity and capability contracts

use async_trait::async_trait;

use stratoflow_core::error::Result;
use stratoflow_core::identity::CapabilityBinding;

/// Identity operations against the target platform.
///
/// Grants may take time to propagate: `grant` returning success does not
/// imply the binding is effective yet. Callers poll `observe_binding` with
/// bounded backoff until visibility is confirmed.
#[async_trait]
pub trait IamClient: Send + Sync {
    /// Create the principal if needed and return its resolved identifier.
    async fn ensure_principal(&self, logical_name: &str) -> Result<String>;

    async fn grant(&self, binding: &CapabilityBinding) -> Result<()>;

    /// Whether the binding is currently observable as effective.
    async fn observe_binding(&self, binding: &CapabilityBinding) -> Result<bool>;

    async fn revoke(&self, binding: &CapabilityBinding) -> Result<()>;

    /// Delete the principal and every binding it holds. Idempotent.
    async fn delete_principal(&self, logical_name: &str) -> Result<()>;
}
