use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSubjectRequestType {
    Access,
    Portability,
    Deletion,
    Rectification,
    RestrictProcessing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSubjectRequestStatus {
    Pending,
    InProgress,
    Completed,
    Denied,
}

/// §4.5, §4's state machine: `pending -> in_progress -> completed | denied`,
/// serial per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSubjectRequest {
    pub id: Uuid,
    pub subject_id: String,
    pub request_type: DataSubjectRequestType,
    pub status: DataSubjectRequestStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl DataSubjectRequest {
    pub fn submit(subject_id: impl Into<String>, request_type: DataSubjectRequestType) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id: subject_id.into(),
            request_type,
            status: DataSubjectRequestStatus::Pending,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            notes: None,
        }
    }

    pub fn start(&mut self) -> CoreResult<()> {
        if self.status != DataSubjectRequestStatus::Pending {
            return Err(CoreError::ValidationError(format!(
                "request {} cannot start from status {:?}",
                self.id, self.status
            )));
        }
        self.status = DataSubjectRequestStatus::InProgress;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self, notes: Option<String>) -> CoreResult<()> {
        self.finish(DataSubjectRequestStatus::Completed, notes)
    }

    pub fn deny(&mut self, notes: Option<String>) -> CoreResult<()> {
        self.finish(DataSubjectRequestStatus::Denied, notes)
    }

    fn finish(&mut self, status: DataSubjectRequestStatus, notes: Option<String>) -> CoreResult<()> {
        if self.status != DataSubjectRequestStatus::InProgress {
            return Err(CoreError::ValidationError(format!(
                "request {} cannot finish from status {:?}",
                self.id, self.status
            )));
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.notes = notes;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cannot_skip_in_progress() {
        let mut request = DataSubjectRequest::submit("subject-1", DataSubjectRequestType::Access);
        assert!(request.complete(None).is_err());
    }

    #[test]
    fn happy_path_transitions() {
        let mut request = DataSubjectRequest::submit("subject-1", DataSubjectRequestType::Deletion);
        request.start().unwrap();
        request.complete(Some("done".to_string())).unwrap();
        assert_eq!(request.status, DataSubjectRequestStatus::Completed);
        assert!(request.completed_at.is_some());
    }
}
