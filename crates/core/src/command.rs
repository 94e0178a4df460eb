//! Command and completion envelopes for the Conductor <-> Director bus

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, Result};
use crate::provisioning::ProvisionReport;

/// Correlation identifier tying a command to its completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Setup,
    Teardown,
}

/// Which dataflows a command addresses: a single one by name, or `"all"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataflowSelector {
    All,
    Named(String),
}

impl DataflowSelector {
    pub fn matches(&self, dataflow: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(name) => name == dataflow,
        }
    }
}

impl From<String> for DataflowSelector {
    fn from(value: String) -> Self {
        if value == "all" {
            Self::All
        } else {
            Self::Named(value)
        }
    }
}

impl From<DataflowSelector> for String {
    fn from(value: DataflowSelector) -> Self {
        match value {
            DataflowSelector::All => "all".to_string(),
            DataflowSelector::Named(name) => name,
        }
    }
}

impl std::fmt::Display for DataflowSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// A command published on the request topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub correlation_id: CorrelationId,
    pub kind: CommandKind,
    pub dataflow: DataflowSelector,
    pub deadline: DateTime<Utc>,
}

impl CommandEnvelope {
    pub fn new(kind: CommandKind, dataflow: DataflowSelector, ttl: Duration) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            kind,
            dataflow,
            deadline: Utc::now() + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| DomainError::Infrastructure(format!("failed to encode command: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| DomainError::Processing(format!("failed to decode command: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Success,
    Failure { message: String },
}

/// The single completion observable for every command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEnvelope {
    pub correlation_id: CorrelationId,
    pub status: CompletionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ProvisionReport>,
}

impl CompletionEnvelope {
    pub fn success(correlation_id: CorrelationId, report: ProvisionReport) -> Self {
        Self {
            correlation_id,
            status: CompletionStatus::Success,
            report: Some(report),
        }
    }

    pub fn failure(correlation_id: CorrelationId, message: impl Into<String>) -> Self {
        Self {
            correlation_id,
            status: CompletionStatus::Failure {
                message: message.into(),
            },
            report: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, CompletionStatus::Success)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| DomainError::Infrastructure(format!("failed to encode completion: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| DomainError::Processing(format!("failed to decode completion: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_round_trips_through_plain_strings() {
        let all: DataflowSelector = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(all, DataflowSelector::All);
        let named: DataflowSelector = serde_json::from_str("\"telemetry\"").unwrap();
        assert!(named.matches("telemetry"));
        assert!(!named.matches("other"));
        assert_eq!(serde_json::to_string(&DataflowSelector::All).unwrap(), "\"all\"");
    }

    #[test]
    fn command_envelope_round_trips() {
        let cmd = CommandEnvelope::new(
            CommandKind::Setup,
            DataflowSelector::Named("telemetry".into()),
            Duration::minutes(5),
        );
        let back = CommandEnvelope::from_bytes(&cmd.to_bytes().unwrap()).unwrap();
        assert_eq!(back, cmd);
        assert!(!back.is_expired(Utc::now()));
    }

    #[test]
    fn expired_commands_are_detected() {
        let cmd = CommandEnvelope::new(
            CommandKind::Teardown,
            DataflowSelector::All,
            Duration::seconds(-1),
        );
        assert!(cmd.is_expired(Utc::now()));
    }
}
