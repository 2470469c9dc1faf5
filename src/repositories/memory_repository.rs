use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::error::{CoreError, CoreResult};
use crate::models::{AuditEntry, AuditOutcome, MemoryEntity, MemoryTier, MemoryType, ShardId};
use crate::protection::DataProtectionManager;
use crate::sharding::manager::ShardManager;

struct MemoryRow {
    id: String,
    persona_id: String,
    memory_type: String,
    content: String,
    content_encrypted: i64,
    tags: String,
    importance: i64,
    memory_tier: String,
    embedding: Option<String>,
    embedding_model: Option<String>,
    access_count: i64,
    last_accessed: String,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

const SELECT_COLUMNS: &str = "id, persona_id, memory_type, content, _content_encrypted, tags, importance, \
     memory_tier, embedding, embedding_model, access_count, last_accessed, created_at, updated_at, deleted_at";

impl MemoryRow {
    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            &format!(
                "INSERT INTO memory_entities ({SELECT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                self.id,
                self.persona_id,
                self.memory_type,
                self.content,
                self.content_encrypted,
                self.tags,
                self.importance,
                self.memory_tier,
                self.embedding,
                self.embedding_model,
                self.access_count,
                self.last_accessed,
                self.created_at,
                self.updated_at,
                self.deleted_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE memory_entities SET persona_id=?2, memory_type=?3, content=?4, _content_encrypted=?5, \
             tags=?6, importance=?7, memory_tier=?8, embedding=?9, embedding_model=?10, access_count=?11, \
             last_accessed=?12, updated_at=?13, deleted_at=?14 WHERE id=?1",
            params![
                self.id,
                self.persona_id,
                self.memory_type,
                self.content,
                self.content_encrypted,
                self.tags,
                self.importance,
                self.memory_tier,
                self.embedding,
                self.embedding_model,
                self.access_count,
                self.last_accessed,
                self.updated_at,
                self.deleted_at
            ],
        )
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            persona_id: row.get(1)?,
            memory_type: row.get(2)?,
            content: row.get(3)?,
            content_encrypted: row.get(4)?,
            tags: row.get(5)?,
            importance: row.get(6)?,
            memory_tier: row.get(7)?,
            embedding: row.get(8)?,
            embedding_model: row.get(9)?,
            access_count: row.get(10)?,
            last_accessed: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
            deleted_at: row.get(14)?,
        })
    }
}

fn memory_type_str(t: MemoryType) -> &'static str {
    match t {
        MemoryType::Text => "text",
        MemoryType::Image => "image",
        MemoryType::Audio => "audio",
        MemoryType::Video => "video",
        MemoryType::File => "file",
    }
}

fn memory_type_from_str(s: &str) -> CoreResult<MemoryType> {
    match s {
        "text" => Ok(MemoryType::Text),
        "image" => Ok(MemoryType::Image),
        "audio" => Ok(MemoryType::Audio),
        "video" => Ok(MemoryType::Video),
        "file" => Ok(MemoryType::File),
        other => Err(CoreError::ValidationError(format!("unknown memory type '{other}'"))),
    }
}

fn parse_timestamp(raw: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| CoreError::ValidationError(e.to_string()))
}

/// C6 memory variant — co-located with its owning persona by routing key
/// `(memory.id, memory.personaId)` (§4.6).
pub struct MemoryRepository {
    manager: Arc<ShardManager>,
    protection: Arc<DataProtectionManager>,
    audit: Arc<AuditLog>,
}

impl MemoryRepository {
    pub fn new(manager: Arc<ShardManager>, protection: Arc<DataProtectionManager>, audit: Arc<AuditLog>) -> Self {
        Self { manager, protection, audit }
    }

    async fn shard_for(&self, memory: &MemoryEntity) -> CoreResult<ShardId> {
        self.manager
            .shard_for("memory", &memory.id.to_string(), Some(&memory.persona_id.to_string()))
            .await
    }

    async fn build_row(&self, memory: &MemoryEntity) -> CoreResult<MemoryRow> {
        let mut record = Map::new();
        record.insert("content".to_string(), Value::String(memory.content.clone()));
        self.protection
            .classify_and_protect(&mut record, "content", "memory content", "memory_repository")
            .await?;
        let content_value = record.get("content").cloned().unwrap_or(Value::Null);
        let content_encrypted = record.contains_key("_content_encrypted");
        let content = match &content_value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        Ok(MemoryRow {
            id: memory.id.to_string(),
            persona_id: memory.persona_id.to_string(),
            memory_type: memory_type_str(memory.memory_type).to_string(),
            content,
            content_encrypted: content_encrypted as i64,
            tags: serde_json::to_string(&memory.tags).expect("tags serialize"),
            importance: memory.importance as i64,
            memory_tier: memory.tier.as_str().to_string(),
            embedding: memory.embedding.as_ref().map(|e| serde_json::to_string(e).expect("embedding serializes")),
            embedding_model: memory.embedding_model.clone(),
            access_count: memory.access_count as i64,
            last_accessed: memory.last_accessed.to_rfc3339(),
            created_at: memory.created_at.to_rfc3339(),
            updated_at: memory.updated_at.to_rfc3339(),
            deleted_at: memory.deleted_at.map(|d| d.to_rfc3339()),
        })
    }

    async fn row_to_memory(&self, row: MemoryRow) -> CoreResult<MemoryEntity> {
        let mut record = Map::new();
        record.insert("content".to_string(), Value::String(row.content.clone()));
        if row.content_encrypted != 0 {
            record.insert("_content_encrypted".to_string(), Value::Bool(true));
        }
        let content_value = self.protection.access_classified(&mut record, "content", "memory_repository").await?;
        let content = match content_value {
            Value::String(s) => s,
            other => other.to_string(),
        };

        Ok(MemoryEntity {
            id: Uuid::parse_str(&row.id).map_err(|e| CoreError::ValidationError(e.to_string()))?,
            persona_id: Uuid::parse_str(&row.persona_id).map_err(|e| CoreError::ValidationError(e.to_string()))?,
            memory_type: memory_type_from_str(&row.memory_type)?,
            content,
            tags: serde_json::from_str(&row.tags).unwrap_or_default(),
            importance: row.importance as u8,
            tier: MemoryTier::from_str(&row.memory_tier).ok_or_else(|| CoreError::ValidationError("invalid memory tier".to_string()))?,
            embedding: row.embedding.and_then(|e| serde_json::from_str(&e).ok()),
            embedding_model: row.embedding_model,
            access_count: row.access_count as u64,
            last_accessed: parse_timestamp(&row.last_accessed)?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            deleted_at: row.deleted_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }

    pub async fn create(&self, memory: &MemoryEntity) -> CoreResult<ShardId> {
        let shard_id = self.shard_for(memory).await?;
        let row = self.build_row(memory).await?;
        let mut guard = self.manager.connection(&shard_id).await?;
        guard.with(move |conn| row.insert(conn)).await?;

        self.audit
            .record(AuditEntry::new(
                "memory_created",
                "system",
                memory.id.to_string(),
                AuditOutcome::Success,
                json!({ "shard": shard_id.to_string(), "persona_id": memory.persona_id.to_string() }),
            ))
            .await;
        Ok(shard_id)
    }

    /// Stamps `updated_at` before persisting (§4.8 — callers that mutate a
    /// memory and save it should not have to remember to bump it themselves).
    pub async fn update(&self, memory: &MemoryEntity) -> CoreResult<()> {
        let mut memory = memory.clone();
        memory.updated_at = Utc::now();
        let shard_id = self.shard_for(&memory).await?;
        let row = self.build_row(&memory).await?;
        let mut guard = self.manager.connection(&shard_id).await?;
        guard.with(move |conn| row.update(conn)).await?;
        Ok(())
    }

    pub async fn mark_accessed(&self, id: Uuid, persona_id: Uuid) -> CoreResult<()> {
        if let Some(mut memory) = self.get_by_id(id, Some(persona_id)).await? {
            memory.mark_accessed();
            self.update(&memory).await?;
        }
        Ok(())
    }

    pub async fn update_tier(&self, id: Uuid, persona_id: Uuid, tier: MemoryTier) -> CoreResult<()> {
        if let Some(mut memory) = self.get_by_id(id, Some(persona_id)).await? {
            memory.tier = tier;
            memory.updated_at = Utc::now();
            self.update(&memory).await?;
        }
        Ok(())
    }

    pub async fn update_embedding(&self, id: Uuid, persona_id: Uuid, embedding: Vec<f32>, model: String) -> CoreResult<()> {
        if let Some(mut memory) = self.get_by_id(id, Some(persona_id)).await? {
            memory.embedding = Some(embedding);
            memory.embedding_model = Some(model);
            memory.updated_at = Utc::now();
            self.update(&memory).await?;
        }
        Ok(())
    }

    /// Soft delete: stamps `deleted_at` rather than removing the row
    /// (invariant 5 — deleted entries are invisible to listing queries).
    pub async fn delete(&self, id: Uuid, persona_id: Uuid) -> CoreResult<()> {
        if let Some(mut memory) = self.get_by_id(id, Some(persona_id)).await? {
            memory.deleted_at = Some(Utc::now());
            self.update(&memory).await?;
        }
        Ok(())
    }

    pub async fn get_by_id(&self, id: Uuid, persona_id: Option<Uuid>) -> CoreResult<Option<MemoryEntity>> {
        match persona_id {
            Some(persona_id) => {
                let shard_id = self
                    .manager
                    .shard_for("memory", &id.to_string(), Some(&persona_id.to_string()))
                    .await?;
                self.get_from_shard(&shard_id, id).await
            }
            None => {
                for shard in self.manager.active_shard_ids().await {
                    if let Some(memory) = self.get_from_shard(&shard, id).await? {
                        return Ok(Some(memory));
                    }
                }
                Ok(None)
            }
        }
    }

    async fn get_from_shard(&self, shard_id: &ShardId, id: Uuid) -> CoreResult<Option<MemoryEntity>> {
        let id_str = id.to_string();
        let mut guard = self.manager.connection(shard_id).await?;
        let row = guard
            .with(move |conn| {
                conn.query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM memory_entities WHERE id = ?1 AND deleted_at IS NULL"),
                    params![id_str],
                    MemoryRow::from_row,
                )
                .optional()
            })
            .await?;
        match row {
            Some(row) => Ok(Some(self.row_to_memory(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn get_by_persona_id(&self, persona_id: Uuid) -> CoreResult<Vec<MemoryEntity>> {
        let persona_str = persona_id.to_string();
        let mut matches = Vec::new();
        for shard in self.manager.active_shard_ids().await {
            let persona_str = persona_str.clone();
            let mut guard = self.manager.connection(&shard).await?;
            let rows = guard
                .with(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {SELECT_COLUMNS} FROM memory_entities WHERE persona_id = ?1 AND deleted_at IS NULL"
                    ))?;
                    let rows = stmt.query_map(params![persona_str], MemoryRow::from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>();
                    rows
                })
                .await?;
            for row in rows {
                matches.push(self.row_to_memory(row).await?);
            }
        }
        Ok(matches)
    }

    async fn scan_shard(&self, shard_id: ShardId, predicate: String, args: Vec<String>) -> CoreResult<Vec<MemoryEntity>> {
        let mut guard = self.manager.connection(&shard_id).await?;
        let query = format!("SELECT {SELECT_COLUMNS} FROM memory_entities WHERE deleted_at IS NULL AND {predicate}");
        let rows = guard
            .with(move |conn| {
                let mut stmt = conn.prepare(&query)?;
                let params: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a as &dyn rusqlite::ToSql).collect();
                let rows = stmt.query_map(params.as_slice(), MemoryRow::from_row)?.collect::<rusqlite::Result<Vec<_>>>();
                rows
            })
            .await?;
        let mut memories = Vec::with_capacity(rows.len());
        for row in rows {
            memories.push(self.row_to_memory(row).await?);
        }
        Ok(memories)
    }

    pub async fn get_by_tier(&self, tier: MemoryTier) -> CoreResult<Vec<MemoryEntity>> {
        let shards = self.manager.active_shard_ids().await;
        let results = try_join_all(
            shards
                .into_iter()
                .map(|s| self.scan_shard(s, "memory_tier = ?1".to_string(), vec![tier.as_str().to_string()])),
        )
        .await?;
        Ok(results.into_iter().flatten().collect())
    }

    pub async fn get_all_active(&self) -> CoreResult<Vec<MemoryEntity>> {
        let shards = self.manager.active_shard_ids().await;
        let results = try_join_all(shards.into_iter().map(|s| self.scan_shard(s, "1 = 1".to_string(), Vec::new()))).await?;
        Ok(results.into_iter().flatten().collect())
    }

    /// Substring match on content, filtered by `deleted_at IS NULL` (§4.6).
    /// Matching happens after decryption since content may be encrypted at
    /// rest; the LIKE clause is only a coarse pre-filter on ciphertext so it
    /// always falls back to scanning every row on a shard.
    pub async fn search_across_shards(&self, query: &str, persona_id: Option<Uuid>) -> CoreResult<Vec<MemoryEntity>> {
        let shards = self.manager.active_shard_ids().await;
        let (predicate, args): (String, Vec<String>) = match persona_id {
            Some(p) => ("persona_id = ?1".to_string(), vec![p.to_string()]),
            None => ("1 = 1".to_string(), Vec::new()),
        };
        let results = try_join_all(shards.into_iter().map(|s| self.scan_shard(s, predicate.clone(), args.clone()))).await?;
        let query_lower = query.to_lowercase();
        Ok(results
            .into_iter()
            .flatten()
            .filter(|m| m.content.to_lowercase().contains(&query_lower))
            .collect())
    }

    /// Analogous to `PersonaRepository::migrate_to_shard` (§4.6).
    pub async fn migrate_to_shard(&self, id: Uuid, target_shard_id: &ShardId) -> CoreResult<()> {
        let shards = self.manager.active_shard_ids().await;
        let mut source = None;
        let mut found = None;
        for shard in shards {
            if let Some(memory) = self.get_from_shard(&shard, id).await? {
                found = Some(memory);
                source = Some(shard);
                break;
            }
        }
        let source_shard = source.ok_or_else(|| CoreError::ValidationError(format!("memory '{id}' not found on any active shard")))?;
        let memory = found.expect("found alongside source");

        let row = self.build_row(&memory).await?;
        let mut target_guard = self.manager.connection(target_shard_id).await?;
        target_guard.with(move |conn| row.insert(conn)).await?;

        let id_str = id.to_string();
        let mut source_guard = self.manager.connection(&source_shard).await?;
        source_guard
            .with(move |conn| conn.execute("DELETE FROM memory_entities WHERE id = ?1", params![id_str]))
            .await?;

        self.audit
            .record(AuditEntry::new(
                "memory_migrated",
                "system",
                id.to_string(),
                AuditOutcome::Success,
                json!({ "from": source_shard.to_string(), "to": target_shard_id.to_string() }),
            ))
            .await;
        Ok(())
    }
}
