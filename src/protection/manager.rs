use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::crypto::{outcome_of, EncryptionRecord, EncryptionService};
use crate::error::{CoreError, CoreResult};
use crate::models::{AuditEntry, AuditOutcome, AuditSeverity, ClassificationRule, DataClassification, PrivacySettings};
use crate::protection::classification::{auto_classify, default_encryption_required};
use crate::protection::requests::{DataSubjectRequest, DataSubjectRequestType};

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub data_subjects: u64,
    pub requests: Vec<DataSubjectRequest>,
    pub retention_compliance: bool,
    pub encryption_compliance: bool,
    pub consent_compliance: bool,
}

fn encrypted_marker(field: &str) -> String {
    format!("_{field}_encrypted")
}

/// C5 — field classification, protection, data-subject requests, and
/// compliance reporting, all funneled through one audit trail (§4.5).
pub struct DataProtectionManager {
    rules: RwLock<HashMap<String, ClassificationRule>>,
    encryption: Arc<dyn EncryptionService>,
    audit: Arc<AuditLog>,
    requests: RwLock<HashMap<Uuid, DataSubjectRequest>>,
}

impl DataProtectionManager {
    pub fn new(encryption: Arc<dyn EncryptionService>, audit: Arc<AuditLog>) -> Arc<Self> {
        Arc::new(Self {
            rules: RwLock::new(HashMap::new()),
            encryption,
            audit,
            requests: RwLock::new(HashMap::new()),
        })
    }

    pub async fn set_rule(&self, rule: ClassificationRule) {
        self.rules.write().await.insert(rule.field_name.clone(), rule);
    }

    /// Classifies `field` on `record`, encrypting it in place and stamping
    /// `_<field>_encrypted` when the effective rule requires it (§4.5).
    pub async fn classify_and_protect(
        &self,
        record: &mut Map<String, Value>,
        field: &str,
        context: &str,
        source: &str,
    ) -> CoreResult<DataClassification> {
        let payload = record.get(field).map(|v| v.to_string()).unwrap_or_default();
        let rule = self.rules.read().await.get(field).cloned();

        let (classification, encryption_required) = match &rule {
            Some(r) => (r.classification, r.encryption_required),
            None => {
                let classification = auto_classify(&payload, context);
                (classification, default_encryption_required(classification))
            }
        };

        let result: CoreResult<()> = if encryption_required && classification != DataClassification::Public {
            match self.encryption.encrypt(payload.as_bytes(), classification).await {
                Ok(record_enc) => {
                    record.insert(field.to_string(), serde_json::to_value(&record_enc).expect("envelope serializes"));
                    record.insert(encrypted_marker(field), Value::Bool(true));
                    Ok(())
                }
                Err(e) => Err(e),
            }
        } else {
            Ok(())
        };

        self.audit
            .record(
                AuditEntry::new(
                    "classify",
                    source,
                    field,
                    outcome_of(&result),
                    json!({ "classification": classification, "encrypted": encryption_required }),
                )
                .with_severity(AuditSeverity::Info),
            )
            .await;

        result.map(|_| classification)
    }

    /// Unwraps `field` on `record` if it carries the encrypted marker,
    /// stripping the marker from the returned record (§4.5).
    pub async fn access_classified(&self, record: &mut Map<String, Value>, field: &str, accessor: &str) -> CoreResult<Value> {
        let marker = encrypted_marker(field);
        let is_encrypted = record.get(&marker).and_then(Value::as_bool).unwrap_or(false);

        let result: CoreResult<Value> = if is_encrypted {
            let envelope = record
                .get(field)
                .cloned()
                .ok_or_else(|| CoreError::ValidationError(format!("field '{field}' missing")))?;
            let record_enc: EncryptionRecord =
                serde_json::from_value(envelope).map_err(|e| CoreError::ValidationError(e.to_string()))?;
            let plaintext = self.encryption.decrypt(&record_enc).await?;
            let plaintext_str = String::from_utf8(plaintext).map_err(|e| CoreError::ValidationError(e.to_string()))?;
            let value: Value = serde_json::from_str(&plaintext_str).unwrap_or(Value::String(plaintext_str));
            record.insert(field.to_string(), value.clone());
            record.remove(&marker);
            Ok(value)
        } else {
            Ok(record.get(field).cloned().unwrap_or(Value::Null))
        };

        self.audit
            .record(AuditEntry::new("access", accessor, field, outcome_of(&result), json!({})))
            .await;
        result
    }

    pub async fn submit_request(&self, subject_id: impl Into<String>, request_type: DataSubjectRequestType) -> DataSubjectRequest {
        let request = DataSubjectRequest::submit(subject_id, request_type);
        self.requests.write().await.insert(request.id, request.clone());
        self.audit
            .record(AuditEntry::new(
                "request_submitted",
                &request.subject_id,
                request.id.to_string(),
                AuditOutcome::Success,
                json!({ "type": request.request_type }),
            ))
            .await;
        request
    }

    pub async fn start_request(&self, id: Uuid) -> CoreResult<()> {
        let mut requests = self.requests.write().await;
        let request = requests.get_mut(&id).ok_or_else(|| CoreError::ValidationError(format!("request '{id}' not found")))?;
        let result = request.start();
        let actor = request.subject_id.clone();
        drop(requests);
        self.audit
            .record(AuditEntry::new("request_started", actor, id.to_string(), outcome_of(&result), json!({})))
            .await;
        result
    }

    pub async fn finish_request(&self, id: Uuid, denied: bool, notes: Option<String>) -> CoreResult<()> {
        let mut requests = self.requests.write().await;
        let request = requests.get_mut(&id).ok_or_else(|| CoreError::ValidationError(format!("request '{id}' not found")))?;
        let result = if denied { request.deny(notes) } else { request.complete(notes) };
        let actor = request.subject_id.clone();
        drop(requests);
        self.audit
            .record(AuditEntry::new("request_finished", actor, id.to_string(), outcome_of(&result), json!({ "denied": denied })))
            .await;
        result
    }

    pub async fn requests_for(&self, subject_id: &str) -> Vec<DataSubjectRequest> {
        self.requests
            .read()
            .await
            .values()
            .filter(|r| r.subject_id == subject_id)
            .cloned()
            .collect()
    }

    /// Applies a boolean privacy-setting change, refreshing the consent
    /// timestamp when the field requires it (§4.5).
    pub async fn update_privacy_setting(&self, persona_id: &str, settings: &mut PrivacySettings, field: &str, value: bool) {
        match field {
            "data_collection" => settings.data_collection = value,
            "personal_data_processing" => settings.personal_data_processing = value,
            "third_party_sharing" => settings.third_party_sharing = value,
            "analytics" => settings.analytics = value,
            "marketing_communications" => settings.marketing_communications = value,
            "location_tracking" => settings.location_tracking = value,
            "biometric_processing" => settings.biometric_processing = value,
            other => {
                tracing::warn!(field = other, "unknown privacy setting field ignored");
                return;
            }
        }
        if PrivacySettings::touches_consent(field) {
            settings.consent_timestamp = Some(Utc::now());
        }
        self.audit
            .record(AuditEntry::new("privacy_setting_changed", persona_id, field, AuditOutcome::Success, json!({ "value": value })))
            .await;
    }

    pub async fn audit_trail(&self) -> Vec<AuditEntry> {
        self.audit.tail().await
    }

    /// `retention_violations` is supplied by the caller (the repository
    /// layer, which can see actual record ages); this manager has no
    /// visibility into stored data ages on its own.
    pub async fn compliance_report(&self, data_subjects: u64, privacy_settings: &PrivacySettings, retention_violations: u64) -> ComplianceReport {
        let requests = self.requests.read().await.values().cloned().collect();
        ComplianceReport {
            id: Uuid::new_v4(),
            generated_at: Utc::now(),
            data_subjects,
            requests,
            retention_compliance: retention_violations == 0,
            encryption_compliance: self.encryption.available(),
            consent_compliance: privacy_settings.consent_timestamp.is_some() && privacy_settings.personal_data_processing,
        }
    }
}
