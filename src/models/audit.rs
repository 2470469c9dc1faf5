use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    High,
}

/// An immutable, append-only audit record. See §4.9 and §9 (never unbounded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub action: String,
    pub actor: String,
    pub resource: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: AuditOutcome,
    pub severity: AuditSeverity,
    pub details: Value,
}

impl AuditEntry {
    pub fn new(
        action: impl Into<String>,
        actor: impl Into<String>,
        resource: impl Into<String>,
        outcome: AuditOutcome,
        details: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.into(),
            actor: actor.into(),
            resource: resource.into(),
            timestamp: Utc::now(),
            outcome,
            severity: AuditSeverity::Info,
            details,
        }
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }
}
