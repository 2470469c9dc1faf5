use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::models::{ShardId, ShardInfo, ShardStatus};
use crate::sharding::pool::{ConnectionGuard, ConnectionPool};
use crate::sharding::router::ShardRouter;
use crate::sharding::schema::SHARD_SCHEMA;

#[derive(Debug, Clone, Serialize)]
pub struct ShardMetrics {
    pub record_count: u64,
    pub disk_usage: u64,
    pub connection_count: u32,
    pub query_performance_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateMetrics {
    pub total_shards: u32,
    pub active_shards: u32,
    pub total_records: u64,
    pub average_records_per_shard: f64,
    pub per_shard: HashMap<String, ShardMetrics>,
    pub rebalance_status: String,
}

#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub source: ShardId,
    pub target: ShardId,
    pub record_count: u64,
    pub entity_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationOutcome {
    pub source: ShardId,
    pub target: ShardId,
    pub migrated: u64,
}

struct Registry {
    shards: HashMap<ShardId, ShardInfo>,
    pools: HashMap<ShardId, Arc<ConnectionPool>>,
}

/// C3 — owns the shard set and its connection pools; drives rebalance and
/// migration; exposes metrics (§4.3).
pub struct ShardManager {
    config: Config,
    registry: RwLock<Registry>,
    router: ShardRouter,
}

impl ShardManager {
    pub fn new(config: Config) -> Arc<Self> {
        let router = ShardRouter::new(
            config.sharding.strategy.clone(),
            config.sharding.consistent_hashing,
            config.sharding.virtual_nodes,
        );
        Arc::new(Self {
            config,
            registry: RwLock::new(Registry {
                shards: HashMap::new(),
                pools: HashMap::new(),
            }),
            router,
        })
    }

    /// Ensures the data directory exists, creates the initial shard set if
    /// absent, opens every shard's schema idempotently, and builds the ring.
    pub async fn initialize(self: &Arc<Self>) -> CoreResult<()> {
        std::fs::create_dir_all(self.config.shards_dir())?;

        let width = zero_padded_width(self.config.sharding.shard_count);
        for i in 0..self.config.sharding.shard_count {
            let shard_id = ShardId::new(i, width);
            if !self.registry.read().await.shards.contains_key(&shard_id) {
                self.register_shard(shard_id).await?;
            }
        }

        self.rebuild_ring().await;
        Ok(())
    }

    async fn register_shard(&self, shard_id: ShardId) -> CoreResult<()> {
        let file_path = self.config.shards_dir().join(format!("{}.db", shard_id));
        let pool = ConnectionPool::new(shard_id.clone(), file_path.clone(), self.config.pool.clone());
        pool.warm_up().await?;
        apply_schema(&pool, &shard_id).await?;

        let info = ShardInfo::new(shard_id.clone(), file_path);
        let mut registry = self.registry.write().await;
        registry.shards.insert(shard_id.clone(), info);
        registry.pools.insert(shard_id, pool);
        Ok(())
    }

    async fn rebuild_ring(&self) {
        let registry = self.registry.read().await;
        let all: Vec<ShardId> = registry.shards.keys().cloned().collect();
        let active: Vec<ShardId> = registry
            .shards
            .values()
            .filter(|s| s.is_active())
            .map(|s| s.shard_id.clone())
            .collect();
        drop(registry);
        self.router.rebuild(&all, &active).await;
    }

    pub async fn create_shard(self: &Arc<Self>, shard_id: ShardId) -> CoreResult<()> {
        if self.registry.read().await.shards.contains_key(&shard_id) {
            return Err(CoreError::ShardExists(shard_id));
        }
        self.register_shard(shard_id).await?;
        self.rebuild_ring().await;
        Ok(())
    }

    pub async fn remove_shard(self: &Arc<Self>, shard_id: &ShardId) -> CoreResult<()> {
        let exists = self.registry.read().await.shards.contains_key(shard_id);
        if !exists {
            return Err(CoreError::ShardMissing(shard_id.clone()));
        }

        let metrics = self.shard_metrics(shard_id).await?;
        if metrics.record_count > 0 {
            return Err(CoreError::ShardNotEmpty {
                shard: shard_id.clone(),
                record_count: metrics.record_count,
            });
        }

        let (pool, file_path) = {
            let mut registry = self.registry.write().await;
            let info = registry.shards.remove(shard_id).expect("checked above");
            let pool = registry.pools.remove(shard_id).expect("pool always paired with shard");
            (pool, info.file_path)
        };
        pool.shutdown().await;
        let _ = std::fs::remove_file(file_path);
        self.rebuild_ring().await;
        Ok(())
    }

    /// Probes every shard with `SELECT 1`, flipping status on transition
    /// (§4.3, §4's state machine).
    pub async fn health_check(self: &Arc<Self>) -> CoreResult<()> {
        let shard_ids: Vec<ShardId> = self.registry.read().await.shards.keys().cloned().collect();
        let mut changed = false;

        for shard_id in shard_ids {
            let healthy = self.probe(&shard_id).await;
            let mut registry = self.registry.write().await;
            if let Some(info) = registry.shards.get_mut(&shard_id) {
                let was_active = info.is_active();
                if healthy && !was_active {
                    info.status = ShardStatus::Active;
                    changed = true;
                } else if !healthy && was_active {
                    info.status = ShardStatus::Inactive;
                    changed = true;
                    tracing::warn!(shard = %shard_id, "shard failed health probe");
                }
            }
        }

        if changed {
            self.rebuild_ring().await;
        }
        Ok(())
    }

    async fn probe(&self, shard_id: &ShardId) -> bool {
        let pool = match self.pool_for(shard_id).await {
            Some(p) => p,
            None => return false,
        };
        let mut guard = match pool.acquire().await {
            Ok(g) => g,
            Err(_) => return false,
        };
        guard.with(|conn| conn.query_row("SELECT 1", [], |_| Ok(()))).await.is_ok()
    }

    async fn pool_for(&self, shard_id: &ShardId) -> Option<Arc<ConnectionPool>> {
        self.registry.read().await.pools.get(shard_id).cloned()
    }

    pub async fn list_shards(&self) -> Vec<ShardInfo> {
        self.registry.read().await.shards.values().cloned().collect()
    }

    async fn shard_metrics(&self, shard_id: &ShardId) -> CoreResult<ShardMetrics> {
        let pool = self
            .pool_for(shard_id)
            .await
            .ok_or_else(|| CoreError::ShardMissing(shard_id.clone()))?;
        let file_path = self
            .registry
            .read()
            .await
            .shards
            .get(shard_id)
            .map(|s| s.file_path.clone())
            .ok_or_else(|| CoreError::ShardMissing(shard_id.clone()))?;

        let mut guard = pool.acquire().await?;
        let stats = pool.stats().await;
        let record_count = guard
            .with(|conn| {
                let personas: i64 = conn.query_row("SELECT COUNT(*) FROM personas", [], |r| r.get(0))?;
                let memories: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM memory_entities WHERE deleted_at IS NULL",
                    [],
                    |r| r.get(0),
                )?;
                let conversations: i64 =
                    conn.query_row("SELECT COUNT(*) FROM conversations", [], |r| r.get(0))?;
                Ok((personas + memories + conversations) as u64)
            })
            .await?;

        let disk_usage = std::fs::metadata(&file_path).map(|m| m.len()).unwrap_or(0);

        Ok(ShardMetrics {
            record_count,
            disk_usage,
            connection_count: stats.total_connections,
            query_performance_ms: stats.connection_wait_time_ms,
        })
    }

    pub async fn metrics(&self) -> CoreResult<AggregateMetrics> {
        let shard_ids: Vec<ShardId> = self.registry.read().await.shards.keys().cloned().collect();
        let mut per_shard = HashMap::new();
        let mut total_records = 0u64;
        let mut active_shards = 0u32;

        for shard_id in &shard_ids {
            let m = self.shard_metrics(shard_id).await?;
            total_records += m.record_count;
            per_shard.insert(shard_id.to_string(), m);
        }
        for info in self.registry.read().await.shards.values() {
            if info.is_active() {
                active_shards += 1;
            }
        }

        let total_shards = shard_ids.len() as u32;
        let average_records_per_shard = if total_shards > 0 {
            total_records as f64 / total_shards as f64
        } else {
            0.0
        };

        Ok(AggregateMetrics {
            total_shards,
            active_shards,
            total_records,
            average_records_per_shard,
            per_shard,
            rebalance_status: "idle".to_string(),
        })
    }

    /// Rebalance algorithm (§4.3): pair overloaded/underloaded shards and
    /// move a quarter of the source's records, memory entities only.
    pub async fn rebalance(self: &Arc<Self>) -> CoreResult<Vec<MigrationOutcome>> {
        let metrics = self.metrics().await?;
        if metrics.total_shards == 0 {
            return Ok(Vec::new());
        }
        let avg = metrics.total_records as f64 / metrics.total_shards as f64;

        let mut overloaded: Vec<(ShardId, u64)> = metrics
            .per_shard
            .iter()
            .filter(|(_, m)| m.record_count as f64 > 1.5 * avg)
            .map(|(id, m)| (ShardId(id.clone()), m.record_count))
            .collect();
        let mut underloaded: Vec<ShardId> = metrics
            .per_shard
            .iter()
            .filter(|(_, m)| (m.record_count as f64) < 0.5 * avg)
            .map(|(id, _)| ShardId(id.clone()))
            .collect();
        overloaded.sort_by(|a, b| a.0.cmp(&b.0));
        underloaded.sort();

        let pair_count = overloaded.len().min(underloaded.len());
        let mut outcomes = Vec::new();
        for i in 0..pair_count {
            let (source, record_count) = &overloaded[i];
            let target = &underloaded[i];
            let plan = MigrationPlan {
                source: source.clone(),
                target: target.clone(),
                record_count: (*record_count as f64 * 0.25).floor() as u64,
                entity_types: vec!["memory_entities".to_string()],
            };
            outcomes.push(self.migrate(plan).await?);
        }
        Ok(outcomes)
    }

    /// Migrate (§4.3, §7). Selects the oldest undeleted rows by
    /// `last_accessed, created_at`, inserts them into the target, then
    /// deletes from the source. Insert uses `INSERT OR REPLACE` so a retry
    /// after a partial failure is idempotent and the target wins (§7).
    pub async fn migrate(self: &Arc<Self>, plan: MigrationPlan) -> CoreResult<MigrationOutcome> {
        let source_pool = self
            .pool_for(&plan.source)
            .await
            .ok_or_else(|| CoreError::ShardMissing(plan.source.clone()))?;
        let target_pool = self
            .pool_for(&plan.target)
            .await
            .ok_or_else(|| CoreError::ShardMissing(plan.target.clone()))?;

        if !plan.entity_types.iter().any(|e| e == "memory_entities") {
            return Ok(MigrationOutcome {
                source: plan.source,
                target: plan.target,
                migrated: 0,
            });
        }

        let mut source_guard = source_pool.acquire().await?;
        let limit = plan.record_count as i64;
        let rows: Vec<MemoryRow> = source_guard
            .with(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, persona_id, memory_type, content, _content_encrypted, tags, importance, \
                     memory_tier, embedding, embedding_model, access_count, last_accessed, created_at, updated_at \
                     FROM memory_entities WHERE deleted_at IS NULL \
                     ORDER BY last_accessed ASC, created_at ASC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map([limit], MemoryRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        drop(source_guard);

        let mut migrated = 0u64;
        for row in rows {
            let mut target_guard = target_pool.acquire().await?;
            let insert_result = target_guard.with(row.clone().insert_or_replace()).await;
            if insert_result.is_err() {
                return Err(CoreError::MigrationPartialFailure {
                    src: plan.source.clone(),
                    dst: plan.target.clone(),
                    migrated,
                    planned: plan.record_count,
                });
            }
            drop(target_guard);

            let mut source_guard = source_pool.acquire().await?;
            let id = row.id.clone();
            let delete_result = source_guard
                .with(move |conn| conn.execute("DELETE FROM memory_entities WHERE id = ?1", [id]))
                .await;
            if delete_result.is_err() {
                return Err(CoreError::MigrationPartialFailure {
                    src: plan.source.clone(),
                    dst: plan.target.clone(),
                    migrated,
                    planned: plan.record_count,
                });
            }
            migrated += 1;
        }

        Ok(MigrationOutcome {
            source: plan.source,
            target: plan.target,
            migrated,
        })
    }

    pub async fn shard_for(&self, entity_type: &str, entity_id: &str, parent_id: Option<&str>) -> CoreResult<ShardId> {
        let candidate = self.router.shard_for(entity_type, entity_id, parent_id).await?;
        if self.registry.read().await.shards.contains_key(&candidate) {
            Ok(candidate)
        } else {
            Err(CoreError::ShardUnavailable)
        }
    }

    pub async fn connection(&self, shard_id: &ShardId) -> CoreResult<ConnectionGuard> {
        let pool = self
            .pool_for(shard_id)
            .await
            .ok_or_else(|| CoreError::ShardMissing(shard_id.clone()))?;
        pool.acquire().await
    }

    pub async fn active_shard_ids(&self) -> Vec<ShardId> {
        self.registry
            .read()
            .await
            .shards
            .values()
            .filter(|s| s.is_active())
            .map(|s| s.shard_id.clone())
            .collect()
    }

    pub async fn shutdown(&self) {
        let registry = self.registry.read().await;
        for pool in registry.pools.values() {
            pool.shutdown().await;
        }
    }
}

async fn apply_schema(pool: &Arc<ConnectionPool>, shard_id: &ShardId) -> CoreResult<()> {
    let mut guard = pool.acquire().await?;
    guard.with(|conn| conn.execute_batch(SHARD_SCHEMA)).await
}

fn zero_padded_width(shard_count: u32) -> usize {
    let highest_index = shard_count.saturating_sub(1);
    highest_index.to_string().len().max(2)
}

#[derive(Debug, Clone)]
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
}

impl MemoryRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
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
        })
    }

    fn insert_or_replace(self) -> impl FnOnce(&rusqlite::Connection) -> rusqlite::Result<usize> {
        move |conn: &rusqlite::Connection| {
            conn.execute(
                "INSERT OR REPLACE INTO memory_entities \
                 (id, persona_id, memory_type, content, _content_encrypted, tags, importance, memory_tier, \
                  embedding, embedding_model, access_count, last_accessed, created_at, updated_at, deleted_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, NULL)",
                rusqlite::params![
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
                ],
            )
        }
    }
}
