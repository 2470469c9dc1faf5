use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::error::{CoreError, CoreResult};
use crate::models::{AuditEntry, AuditOutcome, MemoryConfig, Persona, Personality, PrivacySettings, ShardId};
use crate::protection::DataProtectionManager;
use crate::sharding::manager::ShardManager;

struct PersonaRow {
    id: String,
    name: String,
    description: String,
    personality: String,
    personality_encrypted: i64,
    memory_config: String,
    privacy_settings: String,
    is_active: i64,
    version: String,
    created_at: String,
    updated_at: String,
}

impl PersonaRow {
    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO personas \
             (id, name, description, personality, _personality_encrypted, memory_config, privacy_settings, \
              is_active, version, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                self.id,
                self.name,
                self.description,
                self.personality,
                self.personality_encrypted,
                self.memory_config,
                self.privacy_settings,
                self.is_active,
                self.version,
                self.created_at,
                self.updated_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE personas SET name=?2, description=?3, personality=?4, _personality_encrypted=?5, \
             memory_config=?6, privacy_settings=?7, is_active=?8, version=?9, updated_at=?10 WHERE id=?1",
            params![
                self.id,
                self.name,
                self.description,
                self.personality,
                self.personality_encrypted,
                self.memory_config,
                self.privacy_settings,
                self.is_active,
                self.version,
                self.updated_at
            ],
        )
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            personality: row.get(3)?,
            personality_encrypted: row.get(4)?,
            memory_config: row.get(5)?,
            privacy_settings: row.get(6)?,
            is_active: row.get(7)?,
            version: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

const SELECT_COLUMNS: &str =
    "id, name, description, personality, _personality_encrypted, memory_config, privacy_settings, is_active, version, created_at, updated_at";

fn parse_timestamp(raw: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| CoreError::ValidationError(e.to_string()))
}

/// C6 persona variant — routed CRUD with cross-shard scatter-gather for
/// `getAll`/`getActive` (§4.6).
pub struct PersonaRepository {
    manager: Arc<ShardManager>,
    protection: Arc<DataProtectionManager>,
    audit: Arc<AuditLog>,
}

impl PersonaRepository {
    pub fn new(manager: Arc<ShardManager>, protection: Arc<DataProtectionManager>, audit: Arc<AuditLog>) -> Self {
        Self { manager, protection, audit }
    }

    async fn build_row(&self, persona: &Persona) -> CoreResult<PersonaRow> {
        let mut record = Map::new();
        record.insert(
            "personality".to_string(),
            serde_json::to_value(&persona.personality).expect("personality serializes"),
        );
        self.protection
            .classify_and_protect(&mut record, "personality", "persona profile", "persona_repository")
            .await?;
        let personality_value = record.get("personality").cloned().unwrap_or(Value::Null);
        let personality_encrypted = record.contains_key("_personality_encrypted");

        Ok(PersonaRow {
            id: persona.id.to_string(),
            name: persona.name.clone(),
            description: persona.description.clone(),
            personality: serde_json::to_string(&personality_value).expect("value serializes"),
            personality_encrypted: personality_encrypted as i64,
            memory_config: serde_json::to_string(&persona.memory_config).expect("memory config serializes"),
            privacy_settings: serde_json::to_string(&persona.privacy_settings).expect("privacy settings serializes"),
            is_active: persona.is_active as i64,
            version: persona.version.clone(),
            created_at: persona.created_at.to_rfc3339(),
            updated_at: persona.updated_at.to_rfc3339(),
        })
    }

    async fn row_to_persona(&self, row: PersonaRow) -> CoreResult<Persona> {
        let mut record = Map::new();
        let personality_raw: Value = serde_json::from_str(&row.personality).map_err(|e| CoreError::ValidationError(e.to_string()))?;
        record.insert("personality".to_string(), personality_raw);
        if row.personality_encrypted != 0 {
            record.insert("_personality_encrypted".to_string(), Value::Bool(true));
        }
        let personality_value = self.protection.access_classified(&mut record, "personality", "persona_repository").await?;
        let personality: Personality =
            serde_json::from_value(personality_value).map_err(|e| CoreError::ValidationError(e.to_string()))?;
        let memory_config: MemoryConfig =
            serde_json::from_str(&row.memory_config).map_err(|e| CoreError::ValidationError(e.to_string()))?;
        let privacy_settings: PrivacySettings =
            serde_json::from_str(&row.privacy_settings).map_err(|e| CoreError::ValidationError(e.to_string()))?;

        Ok(Persona {
            id: Uuid::parse_str(&row.id).map_err(|e| CoreError::ValidationError(e.to_string()))?,
            name: row.name,
            description: row.description,
            personality,
            memory_config,
            privacy_settings,
            is_active: row.is_active != 0,
            version: row.version,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }

    pub async fn create(&self, persona: &Persona) -> CoreResult<ShardId> {
        let shard_id = self.manager.shard_for("persona", &persona.id.to_string(), None).await?;
        let row = self.build_row(persona).await?;
        let mut guard = self.manager.connection(&shard_id).await?;
        guard.with(move |conn| row.insert(conn)).await?;

        self.audit
            .record(AuditEntry::new(
                "persona_created",
                "system",
                persona.id.to_string(),
                AuditOutcome::Success,
                json!({ "shard": shard_id.to_string() }),
            ))
            .await;
        Ok(shard_id)
    }

    /// Stamps `updated_at` before persisting (§4.8 — callers that mutate a
    /// persona and save it should not have to remember to bump it themselves).
    pub async fn update(&self, persona: &Persona) -> CoreResult<()> {
        let mut persona = persona.clone();
        persona.updated_at = Utc::now();
        let shard_id = self.manager.shard_for("persona", &persona.id.to_string(), None).await?;
        let row = self.build_row(&persona).await?;
        let mut guard = self.manager.connection(&shard_id).await?;
        guard.with(move |conn| row.update(conn)).await?;
        Ok(())
    }

    /// Sets `id` active, then clears every other persona across all active
    /// shards. No cross-shard transaction (§4.6, §5).
    pub async fn activate(&self, id: Uuid) -> CoreResult<()> {
        let shard_id = self.manager.shard_for("persona", &id.to_string(), None).await?;
        let id_str = id.to_string();
        {
            let target = id_str.clone();
            let mut guard = self.manager.connection(&shard_id).await?;
            guard.with(move |conn| conn.execute("UPDATE personas SET is_active = 1 WHERE id = ?1", params![target])).await?;
        }

        for shard in self.manager.active_shard_ids().await {
            let exclude = id_str.clone();
            let mut guard = self.manager.connection(&shard).await?;
            guard
                .with(move |conn| conn.execute("UPDATE personas SET is_active = 0 WHERE id <> ?1", params![exclude]))
                .await?;
        }

        self.audit
            .record(AuditEntry::new("persona_activated", "system", id.to_string(), AuditOutcome::Success, json!({})))
            .await;
        Ok(())
    }

    pub async fn deactivate(&self, id: Uuid) -> CoreResult<()> {
        let shard_id = self.manager.shard_for("persona", &id.to_string(), None).await?;
        let id_str = id.to_string();
        let mut guard = self.manager.connection(&shard_id).await?;
        guard.with(move |conn| conn.execute("UPDATE personas SET is_active = 0 WHERE id = ?1", params![id_str])).await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> CoreResult<()> {
        let shard_id = self.manager.shard_for("persona", &id.to_string(), None).await?;
        let id_str = id.to_string();
        let mut guard = self.manager.connection(&shard_id).await?;
        guard.with(move |conn| conn.execute("DELETE FROM personas WHERE id = ?1", params![id_str])).await?;
        Ok(())
    }

    pub async fn get_by_id(&self, id: Uuid) -> CoreResult<Option<Persona>> {
        let shard_id = self.manager.shard_for("persona", &id.to_string(), None).await?;
        self.get_from_shard(&shard_id, id).await
    }

    async fn get_from_shard(&self, shard_id: &ShardId, id: Uuid) -> CoreResult<Option<Persona>> {
        let id_str = id.to_string();
        let mut guard = self.manager.connection(shard_id).await?;
        let row = guard
            .with(move |conn| {
                conn.query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM personas WHERE id = ?1"),
                    params![id_str],
                    PersonaRow::from_row,
                )
                .optional()
            })
            .await?;
        match row {
            Some(row) => Ok(Some(self.row_to_persona(row).await?)),
            None => Ok(None),
        }
    }

    async fn scan_shard(&self, shard_id: ShardId, active_only: bool) -> CoreResult<Vec<Persona>> {
        let mut guard = self.manager.connection(&shard_id).await?;
        let query = if active_only {
            format!("SELECT {SELECT_COLUMNS} FROM personas WHERE is_active = 1")
        } else {
            format!("SELECT {SELECT_COLUMNS} FROM personas")
        };
        let rows = guard
            .with(move |conn| {
                let mut stmt = conn.prepare(&query)?;
                let rows = stmt.query_map([], PersonaRow::from_row)?.collect::<rusqlite::Result<Vec<_>>>();
                rows
            })
            .await?;
        let mut personas = Vec::with_capacity(rows.len());
        for row in rows {
            personas.push(self.row_to_persona(row).await?);
        }
        Ok(personas)
    }

    pub async fn get_all(&self) -> CoreResult<Vec<Persona>> {
        let shards = self.manager.active_shard_ids().await;
        let results = try_join_all(shards.into_iter().map(|s| self.scan_shard(s, false))).await?;
        Ok(results.into_iter().flatten().collect())
    }

    /// At most one persona should be active (invariant 1); §5 allows a brief
    /// window where two appear active, so we pick the most recently updated.
    pub async fn get_active(&self) -> CoreResult<Option<Persona>> {
        let shards = self.manager.active_shard_ids().await;
        let results = try_join_all(shards.into_iter().map(|s| self.scan_shard(s, true))).await?;
        let mut active: Vec<Persona> = results.into_iter().flatten().collect();
        if active.len() > 1 {
            tracing::warn!(count = active.len(), "more than one active persona observed across shards");
        }
        active.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(active.into_iter().next())
    }

    pub async fn get_by_shard_id(&self, shard_id: &ShardId) -> CoreResult<Vec<Persona>> {
        self.scan_shard(shard_id.clone(), false).await
    }

    /// Loads the persona from wherever it currently lives, inserts it into
    /// `target_shard_id`, then deletes the source row. Memory migration is a
    /// separate operation (§4.6).
    pub async fn migrate_to_shard(&self, persona_id: Uuid, target_shard_id: &ShardId) -> CoreResult<()> {
        let shards = self.manager.active_shard_ids().await;
        let mut source = None;
        let mut found = None;
        for shard in shards {
            if let Some(persona) = self.get_from_shard(&shard, persona_id).await? {
                found = Some(persona);
                source = Some(shard);
                break;
            }
        }
        let source_shard =
            source.ok_or_else(|| CoreError::ValidationError(format!("persona '{persona_id}' not found on any active shard")))?;
        let persona = found.expect("found alongside source");

        let row = self.build_row(&persona).await?;
        let mut target_guard = self.manager.connection(target_shard_id).await?;
        target_guard.with(move |conn| row.insert(conn)).await?;

        let id_str = persona_id.to_string();
        let mut source_guard = self.manager.connection(&source_shard).await?;
        source_guard
            .with(move |conn| conn.execute("DELETE FROM personas WHERE id = ?1", params![id_str]))
            .await?;

        self.audit
            .record(AuditEntry::new(
                "persona_migrated",
                "system",
                persona_id.to_string(),
                AuditOutcome::Success,
                json!({ "from": source_shard.to_string(), "to": target_shard_id.to_string() }),
            ))
            .await;
        Ok(())
    }
}
