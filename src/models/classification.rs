use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClassification {
    Public,
    Internal,
    Confidential,
    Restricted,
}

impl DataClassification {
    pub fn default_retention_days(&self) -> u32 {
        match self {
            DataClassification::Public => 365,
            DataClassification::Internal => 730,
            DataClassification::Confidential => 1825,
            DataClassification::Restricted => 2555,
        }
    }
}

/// Maps a field name to its handling rule. An explicit rule always wins over
/// auto-classification heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub field_name: String,
    pub classification: DataClassification,
    pub encryption_required: bool,
    pub retention_days: u32,
}

impl ClassificationRule {
    pub fn new(field_name: impl Into<String>, classification: DataClassification, encryption_required: bool) -> Self {
        let retention_days = classification.default_retention_days();
        Self {
            field_name: field_name.into(),
            classification,
            encryption_required,
            retention_days,
        }
    }
}
