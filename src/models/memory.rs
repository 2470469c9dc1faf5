use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Text,
    Image,
    Audio,
    Video,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    Hot,
    Warm,
    Cold,
}

impl MemoryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::Hot => "hot",
            MemoryTier::Warm => "warm",
            MemoryTier::Cold => "cold",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "hot" => Some(MemoryTier::Hot),
            "warm" => Some(MemoryTier::Warm),
            "cold" => Some(MemoryTier::Cold),
            _ => None,
        }
    }
}

/// A persona-owned knowledge unit. See §3 and invariant 5 (soft-deleted
/// entries are invisible to all listing queries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntity {
    pub id: Uuid,
    pub persona_id: Uuid,
    pub memory_type: MemoryType,
    pub content: String,
    pub tags: Vec<String>,
    /// 0-100.
    pub importance: u8,
    pub tier: MemoryTier,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MemoryEntity {
    pub fn new(persona_id: Uuid, memory_type: MemoryType, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            persona_id,
            memory_type,
            content: content.into(),
            tags: Vec::new(),
            importance: 50,
            tier: MemoryTier::Warm,
            embedding: None,
            embedding_model: None,
            access_count: 0,
            last_accessed: now,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn mark_accessed(&mut self) {
        self.access_count += 1;
        self.last_accessed = Utc::now();
        self.updated_at = self.last_accessed;
    }
}
