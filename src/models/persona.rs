use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temperament {
    Calm,
    Energetic,
    Analytical,
    Empathetic,
    Assertive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationStyle {
    Formal,
    Casual,
    Technical,
    Supportive,
    Direct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalityTrait {
    pub name: String,
    /// 0-100.
    pub value: u8,
    pub category: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personality {
    pub traits: Vec<PersonalityTrait>,
    pub temperament: Temperament,
    pub communication_style: CommunicationStyle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub max_memories: u32,
    /// 0-100.
    pub importance_threshold: u8,
    pub retention_days: u32,
    pub auto_optimize: bool,
    pub category_tags: Vec<String>,
    pub compression: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memories: 10_000,
            importance_threshold: 30,
            retention_days: 365,
            auto_optimize: true,
            category_tags: Vec::new(),
            compression: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacySettings {
    pub data_collection: bool,
    pub personal_data_processing: bool,
    pub third_party_sharing: bool,
    pub analytics: bool,
    pub marketing_communications: bool,
    pub location_tracking: bool,
    pub biometric_processing: bool,
    pub consent_timestamp: Option<DateTime<Utc>>,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            data_collection: false,
            personal_data_processing: false,
            third_party_sharing: false,
            analytics: false,
            marketing_communications: false,
            location_tracking: false,
            biometric_processing: false,
            consent_timestamp: None,
        }
    }
}

impl PrivacySettings {
    /// Applies a partial change, returning whether the consent timestamp
    /// should be refreshed — it is, when the change touches
    /// `data_collection` or `personal_data_processing` (§4.5).
    pub fn touches_consent(field: &str) -> bool {
        matches!(field, "data_collection" | "personal_data_processing")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub personality: Personality,
    pub memory_config: MemoryConfig,
    pub privacy_settings: PrivacySettings,
    pub is_active: bool,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Persona {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            personality: Personality {
                traits: Vec::new(),
                temperament: Temperament::Calm,
                communication_style: CommunicationStyle::Casual,
            },
            memory_config: MemoryConfig::default(),
            privacy_settings: PrivacySettings::default(),
            is_active: false,
            version: "1.0.0".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}
