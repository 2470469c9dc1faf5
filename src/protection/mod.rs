//! C5 — field classification, encryption-on-write, data-subject request
//! handling, privacy settings, and compliance reporting (§4.5).

pub mod classification;
pub mod manager;
pub mod requests;

pub use classification::{auto_classify, default_encryption_required};
pub use manager::{ComplianceReport, DataProtectionManager};
pub use requests::{DataSubjectRequest, DataSubjectRequestStatus, DataSubjectRequestType};
