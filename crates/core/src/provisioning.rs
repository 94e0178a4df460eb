//! Provisioning outcomes and reports
//!
//! Shared result vocabulary between the resource provisioners, the Director
//! and the command-bus completions. Bulk operations report per-item
//! outcomes; a report is serializable so it can travel in a completion.

use serde::{Deserialize, Serialize};

/// Result of an idempotent `ensure` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnsureOutcome {
    Created,
    Existed,
    Updated,
}

/// Result of an idempotent `destroy` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestroyOutcome {
    Destroyed,
    Absent,
}

/// Result of an `observe` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Observation {
    Exists,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Topic,
    Subscription,
    Bucket,
    Dataset,
    Table,
    Cache,
    Collection,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Topic => "topic",
            Self::Subscription => "subscription",
            Self::Bucket => "bucket",
            Self::Dataset => "dataset",
            Self::Table => "table",
            Self::Cache => "cache",
            Self::Collection => "collection",
        };
        f.write_str(s)
    }
}

/// Outcome for a single resource within a bulk operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Ensured(EnsureOutcome),
    Destroyed(DestroyOutcome),
    SkippedPermanent,
    Failed(String),
}

impl ItemOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl std::fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ensured(EnsureOutcome::Created) => f.write_str("created"),
            Self::Ensured(EnsureOutcome::Existed) => f.write_str("existed"),
            Self::Ensured(EnsureOutcome::Updated) => f.write_str("updated"),
            Self::Destroyed(DestroyOutcome::Destroyed) => f.write_str("destroyed"),
            Self::Destroyed(DestroyOutcome::Absent) => f.write_str("absent"),
            Self::SkippedPermanent => f.write_str("skipped:permanent"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub kind: ResourceKind,
    pub name: String,
    pub outcome: ItemOutcome,
}

/// Per-item outcomes of one setup or teardown pass over a dataflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub dataflow: String,
    pub items: Vec<ResourceOutcome>,
}

impl ProvisionReport {
    pub fn new(dataflow: impl Into<String>) -> Self {
        Self {
            dataflow: dataflow.into(),
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, kind: ResourceKind, name: impl Into<String>, outcome: ItemOutcome) {
        self.items.push(ResourceOutcome {
            kind,
            name: name.into(),
            outcome,
        });
    }

    pub fn first_failure(&self) -> Option<&ResourceOutcome> {
        self.items.iter().find(|i| i.outcome.is_failure())
    }

    pub fn created_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Ensured(EnsureOutcome::Created)))
            .count()
    }

    /// Merge another report (e.g. per-dataflow reports under an "all"
    /// selector) keeping item order.
    pub fn merge(&mut self, other: ProvisionReport) {
        self.items.extend(other.items);
    }
}
