use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::DataClassification;

static SSN_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static CARD_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{16}\b").unwrap());
static PHONE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(\d{3}\) \d{3}-\d{4}").unwrap());

const CONFIDENTIAL_KEYWORDS: &[&str] = &[
    "password",
    "secret",
    "key",
    "token",
    "credential",
    "confidential",
    "private",
    "sensitive",
    "restricted",
];

/// Auto-classification heuristic used when no explicit [`ClassificationRule`]
/// covers a field (§4.5).
///
/// [`ClassificationRule`]: crate::models::ClassificationRule
pub fn auto_classify(payload: &str, context: &str) -> DataClassification {
    if SSN_PATTERN.is_match(payload)
        || EMAIL_PATTERN.is_match(payload)
        || CARD_PATTERN.is_match(payload)
        || PHONE_PATTERN.is_match(payload)
    {
        return DataClassification::Restricted;
    }

    let lower = payload.to_lowercase();
    if CONFIDENTIAL_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return DataClassification::Confidential;
    }

    let context_lower = context.to_lowercase();
    if context_lower.contains("internal") || context_lower.contains("private") {
        return DataClassification::Internal;
    }

    DataClassification::Public
}

/// Default encryption policy for a classification with no explicit rule:
/// confidential and restricted data is encrypted, public and internal is not.
pub fn default_encryption_required(classification: DataClassification) -> bool {
    matches!(classification, DataClassification::Confidential | DataClassification::Restricted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssn_is_restricted() {
        assert_eq!(auto_classify("ssn: 123-45-6789", ""), DataClassification::Restricted);
    }

    #[test]
    fn password_keyword_is_confidential() {
        assert_eq!(auto_classify("the password is hunter2", ""), DataClassification::Confidential);
    }

    #[test]
    fn internal_context_without_keywords_is_internal() {
        assert_eq!(auto_classify("quarterly numbers", "internal planning doc"), DataClassification::Internal);
    }

    #[test]
    fn plain_text_is_public() {
        assert_eq!(auto_classify("hello world", "greeting"), DataClassification::Public);
    }
}
