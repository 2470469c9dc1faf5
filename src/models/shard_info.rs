use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// String identifier of a shard, e.g. `shard_00`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardId(pub String);

impl ShardId {
    pub fn new(zero_padded_index: u32, width: usize) -> Self {
        ShardId(format!("shard_{:0width$}", zero_padded_index, width = width))
    }

    pub fn fallback() -> Self {
        ShardId("shard_00".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ShardId {
    fn from(s: &str) -> Self {
        ShardId(s.to_string())
    }
}

impl From<String> for ShardId {
    fn from(s: String) -> Self {
        ShardId(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    Active,
    Inactive,
    Migrating,
    Readonly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardInfo {
    pub shard_id: ShardId,
    pub display_name: String,
    pub file_path: std::path::PathBuf,
    pub range_start: Option<String>,
    pub range_end: Option<String>,
    pub status: ShardStatus,
    pub node_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl ShardInfo {
    pub fn new(shard_id: ShardId, file_path: std::path::PathBuf) -> Self {
        let now = Utc::now();
        Self {
            display_name: shard_id.to_string(),
            shard_id,
            file_path,
            range_start: None,
            range_end: None,
            status: ShardStatus::Active,
            node_id: Uuid::new_v4(),
            created_at: now,
            last_accessed: now,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, ShardStatus::Active)
    }
}
